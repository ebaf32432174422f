//! The pipeline engine: runs the four stages and assembles RunArtifacts.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Validate every input log
//!   2. RFM aggregator
//!   3. CLV forecaster  ∥  Uplift modeler   (scoped threads)
//!   4. Final customer table (RFM ⋈ CLV)
//!   5. Eligibility filter
//!   6. Targeting ranker
//!
//! RULES:
//!   - Stages only read earlier stages' outputs; nothing is mutated.
//!   - Any fatal stage error aborts the whole run; no partial artifacts.
//!   - Every event is tagged with its stage and kept in emission order.

use crate::{
    artifacts::{RunArtifacts, RunManifest, StageEvent},
    cancel::CancelToken,
    clv_forecaster::{self, ClvOutput},
    config::EngineConfig,
    customer_table::CustomerTable,
    eligibility,
    error::{EngineError, EngineResult},
    event::{PipelineEvent, Stage},
    input::{validate_campaign, validate_transactions, CampaignRecord, CustomerProfile, Transaction},
    rfm_aggregator,
    targeting_ranker,
    types::RunId,
    uplift_modeler::{self, UpliftOutput},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// The three raw logs plus the snapshot date they are read against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineInputs {
    pub snapshot:     NaiveDate,
    pub transactions: Vec<Transaction>,
    pub campaign:     Vec<CampaignRecord>,
    #[serde(default)]
    pub profiles:     Vec<CustomerProfile>,
}

pub struct ProfitEngine {
    config: EngineConfig,
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn tag(stage: Stage, events: Vec<PipelineEvent>) -> impl Iterator<Item = StageEvent> {
    events.into_iter().map(move |event| StageEvent { stage: stage.name(), event })
}

fn completed(stage: Stage, rows: usize, started: Instant) -> StageEvent {
    StageEvent {
        stage: stage.name(),
        event: PipelineEvent::StageCompleted { stage, rows, elapsed_ms: elapsed_ms(started) },
    }
}

/// Of two parallel stage errors, the one that caused the other's
/// cancellation.
fn root_failure(a: EngineError, b: EngineError) -> EngineError {
    match (&a, &b) {
        (EngineError::Cancelled { .. }, other) if !matches!(other, EngineError::Cancelled { .. }) => b,
        _ => a,
    }
}

impl ProfitEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the pipeline under a fresh v4 run id.
    pub fn run(&self, inputs: &PipelineInputs, cancel: &CancelToken) -> EngineResult<RunArtifacts> {
        self.run_as(uuid::Uuid::new_v4().to_string(), inputs, cancel)
    }

    /// Run the pipeline under a caller-chosen run id.
    pub fn run_as(
        &self,
        run_id: RunId,
        inputs: &PipelineInputs,
        cancel: &CancelToken,
    ) -> EngineResult<RunArtifacts> {
        let config = &self.config;
        let snapshot = inputs.snapshot;

        validate_transactions(&inputs.transactions, snapshot)?;
        validate_campaign(&inputs.campaign)?;

        log::info!(
            "run {run_id}: {} transactions, {} campaign rows, snapshot {snapshot}",
            inputs.transactions.len(),
            inputs.campaign.len()
        );
        let mut events = vec![StageEvent {
            stage: "engine",
            event: PipelineEvent::RunStarted {
                run_id: run_id.clone(),
                transactions: inputs.transactions.len(),
                campaign_rows: inputs.campaign.len(),
            },
        }];

        // ── 1. RFM ─────────────────────────────────────────────
        cancel.check("rfm")?;
        let started = Instant::now();
        let rfm = rfm_aggregator::aggregate(&inputs.transactions, snapshot, &config.rfm)?;
        events.extend(tag(Stage::Rfm, rfm.events));
        events.push(completed(Stage::Rfm, rfm.table.len(), started));
        let rfm_table = rfm.table;

        // ── 2. CLV ∥ Uplift ────────────────────────────────────
        // A failing stage cancels its sibling through the shared child token.
        let stages = cancel.child();
        let (clv, uplift) = std::thread::scope(|scope| {
            let clv = scope.spawn(|| {
                let started = Instant::now();
                clv_forecaster::forecast(&inputs.transactions, snapshot, &config.clv, &stages)
                    .map(|out| (out, started))
                    .map_err(|e| {
                        stages.cancel();
                        e
                    })
            });
            let uplift = scope.spawn(|| {
                let started = Instant::now();
                uplift_modeler::model_uplift(&inputs.campaign, &rfm_table, &config.uplift, &stages)
                    .map(|out| (out, started))
                    .map_err(|e| {
                        stages.cancel();
                        e
                    })
            });
            (
                clv.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)),
                uplift.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)),
            )
        });
        let ((clv, clv_started), (uplift, uplift_started)): ((ClvOutput, Instant), (UpliftOutput, Instant)) =
            match (clv, uplift) {
                (Ok(clv), Ok(uplift)) => (clv, uplift),
                (Err(e), Ok(_)) | (Ok(_), Err(e)) => return Err(e),
                (Err(a), Err(b)) => return Err(root_failure(a, b)),
            };

        let clv_rows = clv.table.records().len();
        events.extend(tag(Stage::Clv, clv.events));
        events.push(completed(Stage::Clv, clv_rows, clv_started));
        events.extend(tag(Stage::Uplift, uplift.events));
        events.push(completed(Stage::Uplift, uplift.table.len(), uplift_started));

        // ── 3. Customer table, eligibility, ranking ────────────
        cancel.check("targeting")?;
        let started = Instant::now();
        let customers = CustomerTable::merge(&rfm_table, &clv.table)?;
        let eligible = eligibility::filter_eligible(
            &customers,
            &inputs.profiles,
            &config.targeting.eligibility,
        )?;
        events.extend(tag(Stage::Targeting, eligible.events));
        let targeting = targeting_ranker::build_targets(
            &uplift.table,
            &eligible.table,
            &inputs.campaign,
            &config.targeting,
        )?;
        events.push(completed(Stage::Targeting, targeting.ranked.len(), started));

        let manifest = RunManifest::new(
            run_id,
            snapshot,
            clv.table.calibration_end,
            rfm_table.bucket_count,
        );
        log::info!(
            "run {}: {} customers, {} eligible, {} targets",
            manifest.run_id,
            customers.len(),
            eligible.table.len(),
            targeting.targets.len()
        );

        Ok(RunArtifacts {
            manifest,
            rfm:           rfm_table,
            clv:           clv.table,
            customers,
            uplift:        uplift.table,
            ranked:        targeting.ranked,
            eligible:      eligible.table,
            targets:       targeting.targets,
            observed_qini: targeting.observed_qini,
            clv_models:    clv.models,
            uplift_models: uplift.models,
            events,
        })
    }
}
