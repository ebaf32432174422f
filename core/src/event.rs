//! The run event log.
//!
//! RULE: stages never log-and-forget a degraded customer.
//! Every per-customer degradation (null CLV, unscored customer,
//! failed eligibility rule) is returned as a PipelineEvent so the
//! run's audit trail is committed together with its artifacts.

use crate::types::{CustomerId, RunId};
use serde::{Deserialize, Serialize};

/// Every event emitted during a pipeline run.
/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    // ── Engine events ──────────────────────────────
    RunStarted {
        run_id: RunId,
        transactions: usize,
        campaign_rows: usize,
    },
    StageCompleted {
        stage: Stage,
        rows: usize,
        elapsed_ms: u64,
    },

    // ── RFM ────────────────────────────────────────
    BucketsReduced {
        requested: usize,
        used: usize,
    },

    // ── Model fits ─────────────────────────────────
    ModelFitted {
        model: String,
        iterations: usize,
        objective: f64,
        training_rows: usize,
    },
    MonetaryFallback {
        customers: usize,
        population_mean: f64,
    },

    // ── Per-customer degradation ───────────────────
    ForecastDegraded {
        customer_id: CustomerId,
        reason: String,
    },
    CustomerUnscored {
        customer_id: CustomerId,
        reason: String,
    },
    EligibilityFailed {
        customer_id: CustomerId,
        rule: String,
        reason: String,
    },
}

impl PipelineEvent {
    /// Stable string name for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. }        => "run_started",
            Self::StageCompleted { .. }    => "stage_completed",
            Self::BucketsReduced { .. }    => "buckets_reduced",
            Self::ModelFitted { .. }       => "model_fitted",
            Self::MonetaryFallback { .. }  => "monetary_fallback",
            Self::ForecastDegraded { .. }  => "forecast_degraded",
            Self::CustomerUnscored { .. }  => "customer_unscored",
            Self::EligibilityFailed { .. } => "eligibility_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Rfm,
    Clv,
    Uplift,
    Targeting,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rfm       => "rfm",
            Self::Clv       => "clv",
            Self::Uplift    => "uplift",
            Self::Targeting => "targeting",
        }
    }
}

/// A persisted event row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:         Option<i64>,
    pub run_id:     RunId,
    pub seq:        u64,
    pub stage:      String,
    pub event_type: String,
    pub payload:    String,
}
