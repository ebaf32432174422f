//! Everything one pipeline run produced, as immutable values.
//!
//! RunArtifacts is built once at the end of a successful run and
//! handed to the store (or a consumer) by reference. Nothing in it is
//! mutated afterwards.

use crate::{
    clv_forecaster::{ClvModels, ClvTable},
    customer_table::CustomerTable,
    error::EngineResult,
    event::{EventLogEntry, PipelineEvent},
    model_blob::{run_blobs, ModelBlob, BLOB_SCHEMA_VERSION},
    rfm_aggregator::RfmTable,
    targeting_ranker::{QiniPoint, RankedTable, TargetEntry},
    types::RunId,
    uplift_modeler::{UpliftModels, UpliftTable, FEATURE_SCHEMA_VERSION},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunManifest {
    pub run_id:                 RunId,
    pub engine_version:         String,
    pub snapshot:               NaiveDate,
    pub calibration_end:        NaiveDate,
    pub bucket_count:           usize,
    pub blob_schema_version:    u32,
    pub feature_schema_version: u32,
}

impl RunManifest {
    pub fn new(run_id: RunId, snapshot: NaiveDate, calibration_end: NaiveDate, bucket_count: usize) -> Self {
        Self {
            run_id,
            engine_version: ENGINE_VERSION.to_string(),
            snapshot,
            calibration_end,
            bucket_count,
            blob_schema_version: BLOB_SCHEMA_VERSION,
            feature_schema_version: FEATURE_SCHEMA_VERSION,
        }
    }
}

/// An event tagged with the stage that emitted it ("engine" for run-level events).
#[derive(Debug, Clone, PartialEq)]
pub struct StageEvent {
    pub stage: &'static str,
    pub event: PipelineEvent,
}

#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub manifest:      RunManifest,
    pub rfm:           RfmTable,
    pub clv:           ClvTable,
    pub customers:     CustomerTable,
    pub uplift:        UpliftTable,
    pub ranked:        RankedTable,
    pub eligible:      CustomerTable,
    pub targets:       Vec<TargetEntry>,
    pub observed_qini: Vec<QiniPoint>,
    pub clv_models:    ClvModels,
    pub uplift_models: UpliftModels,
    pub events:        Vec<StageEvent>,
}

impl RunArtifacts {
    pub fn run_id(&self) -> &str {
        &self.manifest.run_id
    }

    pub fn model_blobs(&self) -> EngineResult<Vec<ModelBlob>> {
        run_blobs(&self.clv_models, &self.uplift_models)
    }

    /// Events in emission order, numbered from 0, ready to persist.
    pub fn event_log(&self) -> EngineResult<Vec<EventLogEntry>> {
        self.events
            .iter()
            .enumerate()
            .map(|(seq, e)| {
                Ok(EventLogEntry {
                    id:         None,
                    run_id:     self.manifest.run_id.clone(),
                    seq:        seq as u64,
                    stage:      e.stage.to_string(),
                    event_type: e.event.type_name().to_string(),
                    payload:    serde_json::to_string(&e.event)?,
                })
            })
            .collect()
    }

    /// Events of one type, for summaries and tests.
    pub fn events_of(&self, type_name: &str) -> Vec<&PipelineEvent> {
        self.events
            .iter()
            .map(|e| &e.event)
            .filter(|e| e.type_name() == type_name)
            .collect()
    }
}
