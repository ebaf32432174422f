//! Uplift modeler: two independently trained response models.
//!
//! model_treat sees only treatment rows, model_ctrl only control rows.
//! Both embed the SAME FeatureSchema (feature list + standardization
//! fitted over the pooled campaign population), so their probabilities
//! are comparable. uplift = p_treat − p_ctrl is never clipped: negative
//! uplift marks customers the offer is predicted to put off.

use crate::{
    cancel::CancelToken,
    config::{FeatureKind, UpliftConfig},
    error::{EngineError, EngineResult},
    event::PipelineEvent,
    input::{validate_campaign, Arm, CampaignRecord},
    logistic_model::{self, LogisticParams},
    rfm_aggregator::{RfmRecord, RfmTable},
    types::CustomerId,
};
use serde::{Deserialize, Serialize};

pub const FEATURE_SCHEMA_VERSION: u32 = 1;

// ── Feature contract ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureSchema {
    pub version:  u32,
    pub features: Vec<FeatureKind>,
    pub means:    Vec<f64>,
    pub scales:   Vec<f64>,
}

pub fn raw_feature(kind: FeatureKind, r: &RfmRecord) -> f64 {
    match kind {
        FeatureKind::Recency     => r.recency as f64,
        FeatureKind::Frequency   => r.frequency as f64,
        FeatureKind::LogMonetary => r.monetary.ln_1p(),
        FeatureKind::RScore      => r.r_score as f64,
        FeatureKind::FScore      => r.f_score as f64,
        FeatureKind::MScore      => r.m_score as f64,
    }
}

impl FeatureSchema {
    /// Standardization fitted over `rows`. Constant columns keep scale 1.
    pub fn fit(features: &[FeatureKind], rows: &[&RfmRecord]) -> Self {
        let n = rows.len().max(1) as f64;
        let mut means = Vec::with_capacity(features.len());
        let mut scales = Vec::with_capacity(features.len());
        for &kind in features {
            let mean = rows.iter().map(|r| raw_feature(kind, r)).sum::<f64>() / n;
            let var = rows
                .iter()
                .map(|r| (raw_feature(kind, r) - mean).powi(2))
                .sum::<f64>()
                / n;
            let std = var.sqrt();
            means.push(mean);
            scales.push(if std > 1e-12 { std } else { 1.0 });
        }
        Self {
            version: FEATURE_SCHEMA_VERSION,
            features: features.to_vec(),
            means,
            scales,
        }
    }

    /// Standardized feature vector, or None if any value is not finite.
    pub fn transform(&self, r: &RfmRecord) -> Option<Vec<f64>> {
        let out: Vec<f64> = self
            .features
            .iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(&kind, (mean, scale))| (raw_feature(kind, r) - mean) / scale)
            .collect();
        out.iter().all(|v| v.is_finite()).then_some(out)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.features.iter().map(FeatureKind::name).collect()
    }
}

// ── Models ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ArmSummary {
    pub rows:          usize,
    pub responders:    usize,
    pub response_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseModel {
    pub arm:            Arm,
    pub schema:         FeatureSchema,
    pub params:         LogisticParams,
    pub summary:        ArmSummary,
    pub iterations:     usize,
    pub log_likelihood: f64,
}

/// Blob and event name of the response model trained on `arm`.
pub fn response_model_name(arm: Arm) -> &'static str {
    match arm {
        Arm::Treatment => "uplift_model_treat",
        Arm::Control   => "uplift_model_ctrl",
    }
}

impl ResponseModel {
    pub fn model_name(&self) -> &'static str {
        response_model_name(self.arm)
    }
}

/// The treatment/control pair. Each arm stays separately auditable.
#[derive(Debug, Clone, PartialEq)]
pub struct UpliftModels {
    pub treat:   ResponseModel,
    pub control: ResponseModel,
}

impl UpliftModels {
    pub fn new(treat: ResponseModel, control: ResponseModel) -> EngineResult<Self> {
        if treat.arm != Arm::Treatment || control.arm != Arm::Control {
            return Err(EngineError::SchemaMismatch(format!(
                "expected (treatment, control) models, got ({}, {})",
                treat.arm.name(),
                control.arm.name()
            )));
        }
        if treat.schema != control.schema {
            return Err(EngineError::SchemaMismatch(format!(
                "treatment features {:?} differ from control features {:?}",
                treat.schema.names(),
                control.schema.names()
            )));
        }
        Ok(Self { treat, control })
    }

    /// Score one customer. None when the feature vector is not finite.
    pub fn score(&self, r: &RfmRecord) -> Option<UpliftRecord> {
        let x = self.treat.schema.transform(r)?;
        Some(UpliftRecord {
            customer_id: r.customer_id,
            p_treat:     self.treat.params.predict_proba(&x),
            p_ctrl:      self.control.params.predict_proba(&x),
        })
    }
}

// ── Scores ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct UpliftRecord {
    pub customer_id: CustomerId,
    pub p_treat:     f64,
    pub p_ctrl:      f64,
}

impl UpliftRecord {
    pub fn uplift(&self) -> f64 {
        self.p_treat - self.p_ctrl
    }
}

/// Sorted by customer_id.
#[derive(Debug, Clone, PartialEq)]
pub struct UpliftTable {
    records: Vec<UpliftRecord>,
}

impl UpliftTable {
    pub fn from_records(mut records: Vec<UpliftRecord>) -> Self {
        records.sort_by_key(|r| r.customer_id);
        Self { records }
    }

    pub fn records(&self) -> &[UpliftRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, customer_id: CustomerId) -> Option<&UpliftRecord> {
        self.records
            .binary_search_by_key(&customer_id, |r| r.customer_id)
            .ok()
            .map(|idx| &self.records[idx])
    }
}

#[derive(Debug, Clone)]
pub struct UpliftOutput {
    pub table:  UpliftTable,
    pub models: UpliftModels,
    pub events: Vec<PipelineEvent>,
}

// ── Training ─────────────────────────────────────────────────────────────────

struct ArmData<'a> {
    rows:   Vec<&'a RfmRecord>,
    labels: Vec<bool>,
}

fn train_arm(
    arm: Arm,
    data: &ArmData<'_>,
    schema: &FeatureSchema,
    config: &UpliftConfig,
    cancel: &CancelToken,
) -> EngineResult<ResponseModel> {
    let responders = data.labels.iter().filter(|&&y| y).count();
    let rows = data.rows.len();
    if rows < config.min_rows_per_arm {
        return Err(EngineError::InsufficientData(format!(
            "{} arm has {rows} rows, need at least {}",
            arm.name(),
            config.min_rows_per_arm
        )));
    }
    if responders == 0 || responders == rows {
        return Err(EngineError::InsufficientData(format!(
            "{} arm needs both responders and non-responders ({responders}/{rows} responded)",
            arm.name()
        )));
    }

    let x: Vec<Vec<f64>> = data
        .rows
        .iter()
        .map(|r| {
            schema.transform(r).ok_or_else(|| {
                EngineError::DataQuality(format!(
                    "customer {} has non-finite training features",
                    r.customer_id
                ))
            })
        })
        .collect::<EngineResult<_>>()?;

    let fitted = logistic_model::fit(
        response_model_name(arm),
        &x,
        &data.labels,
        config.l2_penalty,
        &config.fit,
        cancel,
    )?;

    Ok(ResponseModel {
        arm,
        schema: schema.clone(),
        params: fitted.params,
        summary: ArmSummary {
            rows,
            responders,
            response_rate: responders as f64 / rows as f64,
        },
        iterations: fitted.iterations,
        log_likelihood: fitted.log_likelihood,
    })
}

/// Train the treatment and control models on their own arms.
pub fn train(
    campaign: &[CampaignRecord],
    rfm: &RfmTable,
    config: &UpliftConfig,
    cancel: &CancelToken,
) -> EngineResult<UpliftModels> {
    validate_campaign(campaign)?;

    let mut treat = ArmData { rows: Vec::new(), labels: Vec::new() };
    let mut control = ArmData { rows: Vec::new(), labels: Vec::new() };
    for record in campaign {
        let features = rfm.get(record.customer_id).ok_or_else(|| {
            EngineError::SchemaMismatch(format!(
                "campaign customer {} has no RFM record to build features from",
                record.customer_id
            ))
        })?;
        let arm = match record.arm {
            Arm::Treatment => &mut treat,
            Arm::Control   => &mut control,
        };
        arm.rows.push(features);
        arm.labels.push(record.responded);
    }

    let pooled: Vec<&RfmRecord> = treat.rows.iter().chain(&control.rows).copied().collect();
    let schema = FeatureSchema::fit(&config.features, &pooled);

    let (treat_model, control_model) = std::thread::scope(|scope| {
        let t = scope.spawn(|| train_arm(Arm::Treatment, &treat, &schema, config, cancel));
        let c = scope.spawn(|| train_arm(Arm::Control, &control, &schema, config, cancel));
        (
            t.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)),
            c.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)),
        )
    });

    let models = UpliftModels::new(treat_model?, control_model?)?;
    log::info!(
        "uplift: trained on {} treatment / {} control rows (response {:.3} vs {:.3})",
        models.treat.summary.rows,
        models.control.summary.rows,
        models.treat.summary.response_rate,
        models.control.summary.response_rate,
    );
    Ok(models)
}

// ── Scoring ──────────────────────────────────────────────────────────────────

/// Score every customer in the population with both models.
pub fn score_population(
    models: &UpliftModels,
    rfm: &RfmTable,
    cancel: &CancelToken,
) -> EngineResult<(UpliftTable, Vec<PipelineEvent>)> {
    cancel.check("uplift scoring")?;
    let mut records = Vec::with_capacity(rfm.len());
    let mut events = Vec::new();
    for r in rfm.records() {
        match models.score(r) {
            Some(record) => records.push(record),
            None => {
                log::warn!("uplift: customer {} left unscored (non-finite features)", r.customer_id);
                events.push(PipelineEvent::CustomerUnscored {
                    customer_id: r.customer_id,
                    reason: "non-finite feature vector".into(),
                });
            }
        }
    }
    Ok((UpliftTable::from_records(records), events))
}

pub fn model_uplift(
    campaign: &[CampaignRecord],
    rfm: &RfmTable,
    config: &UpliftConfig,
    cancel: &CancelToken,
) -> EngineResult<UpliftOutput> {
    let models = train(campaign, rfm, config, cancel)?;
    let mut events: Vec<PipelineEvent> = [&models.treat, &models.control]
        .iter()
        .map(|m| PipelineEvent::ModelFitted {
            model: m.model_name().into(),
            iterations: m.iterations,
            objective: m.log_likelihood,
            training_rows: m.summary.rows,
        })
        .collect();

    let (table, scoring_events) = score_population(&models, rfm, cancel)?;
    events.extend(scoring_events);

    Ok(UpliftOutput { table, models, events })
}
