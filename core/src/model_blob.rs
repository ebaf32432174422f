//! Fitted-model parameter sets as tagged, versioned JSON blobs.
//!
//! RULE: a blob is only ever unpacked into the model its tag names.
//! A different tag or an unsupported schema_version is a
//! SchemaMismatch, never a best-effort decode.

use crate::{
    bgnbd_model::{self, BgNbdParams},
    clv_forecaster::{ClvModels, MonetaryModel},
    error::{EngineError, EngineResult},
    gamma_gamma_model::{self, GammaGammaParams},
    input::Arm,
    uplift_modeler::{response_model_name, ResponseModel, UpliftModels, FEATURE_SCHEMA_VERSION},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub const BLOB_SCHEMA_VERSION: u32 = 1;

pub const MONETARY_FALLBACK_MODEL: &str = "monetary_fallback";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelBlob {
    pub model:          String,
    pub schema_version: u32,
    pub params:         serde_json::Value,
}

/// Population-mean-only monetary model, kept so a run that fell back
/// can still be replayed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MonetaryFallbackParams {
    pub population_mean: f64,
}

impl ModelBlob {
    pub fn pack(model: &str, params: &impl Serialize) -> EngineResult<Self> {
        Ok(Self {
            model: model.to_string(),
            schema_version: BLOB_SCHEMA_VERSION,
            params: serde_json::to_value(params)?,
        })
    }

    pub fn unpack<T: DeserializeOwned>(&self, expected_model: &str) -> EngineResult<T> {
        if self.model != expected_model {
            return Err(EngineError::SchemaMismatch(format!(
                "blob holds model '{}', expected '{expected_model}'",
                self.model
            )));
        }
        if self.schema_version != BLOB_SCHEMA_VERSION {
            return Err(EngineError::SchemaMismatch(format!(
                "model '{}' blob has schema_version {}, supported is {BLOB_SCHEMA_VERSION}",
                self.model, self.schema_version
            )));
        }
        Ok(serde_json::from_value(self.params.clone())?)
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

pub fn load_bgnbd(blob: &ModelBlob) -> EngineResult<BgNbdParams> {
    blob.unpack(bgnbd_model::MODEL_NAME)
}

pub fn load_gamma_gamma(blob: &ModelBlob) -> EngineResult<GammaGammaParams> {
    blob.unpack(gamma_gamma_model::MODEL_NAME)
}

pub fn load_monetary_fallback(blob: &ModelBlob) -> EngineResult<MonetaryFallbackParams> {
    blob.unpack(MONETARY_FALLBACK_MODEL)
}

/// Unpack a response model and check it carries the feature schema
/// version this build scores with.
pub fn load_response_model(blob: &ModelBlob, expected_model: &str) -> EngineResult<ResponseModel> {
    let model: ResponseModel = blob.unpack(expected_model)?;
    if model.model_name() != expected_model {
        return Err(EngineError::SchemaMismatch(format!(
            "blob tagged '{expected_model}' holds the {} arm",
            model.arm.name()
        )));
    }
    if model.schema.version != FEATURE_SCHEMA_VERSION {
        return Err(EngineError::SchemaMismatch(format!(
            "{expected_model}: feature schema version {} is not {FEATURE_SCHEMA_VERSION}",
            model.schema.version
        )));
    }
    Ok(model)
}

/// Rebuild the treatment/control pair; the shared-schema check runs again.
pub fn load_uplift_models(treat: &ModelBlob, control: &ModelBlob) -> EngineResult<UpliftModels> {
    UpliftModels::new(
        load_response_model(treat, response_model_name(Arm::Treatment))?,
        load_response_model(control, response_model_name(Arm::Control))?,
    )
}

/// Every model fitted in a run, as blobs.
pub fn run_blobs(clv: &ClvModels, uplift: &UpliftModels) -> EngineResult<Vec<ModelBlob>> {
    let mut blobs = vec![ModelBlob::pack(bgnbd_model::MODEL_NAME, &clv.frequency.params)?];
    blobs.push(match &clv.monetary {
        MonetaryModel::Fitted { model, .. } => {
            ModelBlob::pack(gamma_gamma_model::MODEL_NAME, &model.params)?
        }
        MonetaryModel::FallbackOnly { population_mean } => ModelBlob::pack(
            MONETARY_FALLBACK_MODEL,
            &MonetaryFallbackParams { population_mean: *population_mean },
        )?,
    });
    blobs.push(ModelBlob::pack(uplift.treat.model_name(), &uplift.treat)?);
    blobs.push(ModelBlob::pack(uplift.control.model_name(), &uplift.control)?);
    Ok(blobs)
}
