use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Data quality error: {0}")]
    DataQuality(String),

    #[error("Model '{model}' failed to converge after {iterations} iterations: {reason}")]
    ModelConvergence {
        model: &'static str,
        iterations: usize,
        reason: String,
    },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Run cancelled during {stage}")]
    Cancelled { stage: &'static str },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
