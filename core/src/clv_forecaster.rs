//! CLV forecaster: BG/NBD purchase forecast × Gamma-Gamma value.
//!
//! This stage:
//!   1. Splits each history at the calibration end
//!   2. Fits the frequency/dropout and monetary models concurrently
//!   3. Forecasts monthly expected purchases out to the long horizon
//!   4. Discounts monthly increments × expected value into CLV_6m / CLV_12m
//!
//! Fit failures abort the run: every CLV record depends on both models.
//! A single customer whose forecast is not a finite non-negative number
//! gets null CLV and a ForecastDegraded event.

use crate::{
    bgnbd_model::{self, BgNbdCustomer, FittedBgNbd},
    cancel::CancelToken,
    config::ClvConfig,
    error::{EngineError, EngineResult},
    event::PipelineEvent,
    gamma_gamma_model::{self, FittedGammaGamma, MonetaryObservation},
    input::{group_by_customer, validate_transactions, PurchaseHistory, Transaction},
    types::{CustomerId, DAYS_PER_MONTH},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const SHORT_HORIZON_MONTHS: u32 = 6;
pub const LONG_HORIZON_MONTHS: u32 = 12;

// ── Public types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClvRecord {
    pub customer_id:            CustomerId,
    pub clv_6m:                 Option<f64>,
    pub clv_12m:                Option<f64>,
    pub expected_purchases_6m:  Option<f64>,
    pub expected_purchases_12m: Option<f64>,
    pub prob_alive:             f64,
    pub expected_value:         f64,
    /// True when expected_value is the population mean rather than
    /// the customer's own conditional estimate.
    pub monetary_fallback:      bool,
}

/// Immutable CLV table, sorted by customer_id.
#[derive(Debug, Clone, PartialEq)]
pub struct ClvTable {
    pub calibration_end: NaiveDate,
    records:             Vec<ClvRecord>,
}

impl ClvTable {
    pub fn records(&self) -> &[ClvRecord] {
        &self.records
    }

    pub fn get(&self, customer_id: CustomerId) -> Option<&ClvRecord> {
        self.records
            .binary_search_by_key(&customer_id, |r| r.customer_id)
            .ok()
            .map(|idx| &self.records[idx])
    }
}

/// How expected transaction value is produced for this run.
#[derive(Debug, Clone)]
pub enum MonetaryModel {
    Fitted {
        model:           FittedGammaGamma,
        population_mean: f64,
    },
    /// Too few repeat purchasers; every customer gets the configured mean.
    FallbackOnly { population_mean: f64 },
}

impl MonetaryModel {
    pub fn population_mean(&self) -> f64 {
        match self {
            Self::Fitted { population_mean, .. } | Self::FallbackOnly { population_mean } => {
                *population_mean
            }
        }
    }

    /// (expected value, fell back to population mean)
    fn expected_value(&self, calibration: Option<&PurchaseHistory>) -> (f64, bool) {
        let repeat = calibration.filter(|h| h.repeat_count() > 0);
        match (self, repeat) {
            (Self::Fitted { model, .. }, Some(history)) => {
                let mean = history.mean_repeat_value().unwrap_or(0.0);
                let value = model
                    .params
                    .conditional_expected_value(history.repeat_count() as f64, mean);
                (value, false)
            }
            _ => (self.population_mean(), true),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClvModels {
    pub frequency: FittedBgNbd,
    pub monetary:  MonetaryModel,
}

#[derive(Debug, Clone)]
pub struct ClvOutput {
    pub table:  ClvTable,
    pub models: ClvModels,
    pub events: Vec<PipelineEvent>,
}

// ── Calibration ──────────────────────────────────────────────────────────────

struct Calibrated {
    customer_id: CustomerId,
    history:     Option<PurchaseHistory>,
    stats:       BgNbdCustomer,
}

fn calibrate(history: &PurchaseHistory, calibration_end: NaiveDate) -> Calibrated {
    let cal = history.until(calibration_end);
    let stats = match &cal {
        Some(h) => BgNbdCustomer {
            frequency: h.repeat_days() as f64,
            recency:   h.active_span() as f64,
            age:       (calibration_end - h.first_day()).num_days() as f64,
        },
        None => BgNbdCustomer::new_customer(),
    };
    Calibrated { customer_id: history.customer_id, history: cal, stats }
}

// ── Fitting ──────────────────────────────────────────────────────────────────

fn fit_monetary(
    calibrated: &[Calibrated],
    config: &ClvConfig,
    cancel: &CancelToken,
) -> EngineResult<MonetaryModel> {
    let observations: Vec<MonetaryObservation> = calibrated
        .iter()
        .filter_map(|c| c.history.as_ref())
        .filter_map(|h| {
            let mean_value = h.mean_repeat_value()?;
            (mean_value > 0.0).then(|| MonetaryObservation {
                frequency: h.repeat_count() as f64,
                mean_value,
            })
        })
        .collect();

    if observations.len() < config.min_repeat_customers {
        return match config.fallback_mean {
            Some(population_mean) => {
                log::warn!(
                    "clv: {} repeat purchasers < {}; using fallback mean {population_mean:.2}",
                    observations.len(),
                    config.min_repeat_customers
                );
                Ok(MonetaryModel::FallbackOnly { population_mean })
            }
            None => Err(EngineError::InsufficientData(format!(
                "monetary model needs {} repeat purchasers, found {} and no fallback_mean is configured",
                config.min_repeat_customers,
                observations.len()
            ))),
        };
    }

    let model = gamma_gamma_model::fit(&observations, config.penalizer_coef, &config.monetary_fit, cancel)?;
    let population_mean = model.params.population_mean().unwrap_or_else(|| {
        observations.iter().map(|o| o.mean_value).sum::<f64>() / observations.len() as f64
    });
    Ok(MonetaryModel::Fitted { model, population_mean })
}

// ── Forecasting ──────────────────────────────────────────────────────────────

/// Discounted CLV per horizon from cumulative monthly purchase forecasts.
/// `cumulative[i]` is expected purchases over the first i+1 months.
pub fn discounted_clv(cumulative: &[f64], value: f64, discount_rate_monthly: f64, months: u32) -> f64 {
    let mut clv = 0.0;
    let mut previous = 0.0;
    for (i, &expected) in cumulative.iter().take(months as usize).enumerate() {
        let month = (i + 1) as i32;
        clv += (expected - previous) * value / (1.0 + discount_rate_monthly).powi(month);
        previous = expected;
    }
    clv
}

fn forecast_customer(
    c: &Calibrated,
    models: &ClvModels,
    discount_rate_monthly: f64,
) -> Result<ClvRecord, String> {
    let bgnbd = &models.frequency.params;
    let (expected_value, monetary_fallback) = models.monetary.expected_value(c.history.as_ref());
    if !expected_value.is_finite() || expected_value < 0.0 {
        return Err(format!("expected value {expected_value} is not a valid amount"));
    }

    let cumulative: Vec<f64> = (1..=LONG_HORIZON_MONTHS)
        .map(|month| {
            bgnbd
                .expected_purchases(&c.stats, month as f64 * DAYS_PER_MONTH)
                .ok_or_else(|| format!("purchase forecast failed at month {month}"))
        })
        .collect::<Result<_, _>>()?;

    let clv_6m = discounted_clv(&cumulative, expected_value, discount_rate_monthly, SHORT_HORIZON_MONTHS);
    let clv_12m = discounted_clv(&cumulative, expected_value, discount_rate_monthly, LONG_HORIZON_MONTHS);
    if !(clv_6m.is_finite() && clv_12m.is_finite()) || clv_6m < 0.0 || clv_12m < 0.0 {
        return Err(format!("clv out of range (6m={clv_6m}, 12m={clv_12m})"));
    }

    Ok(ClvRecord {
        customer_id: c.customer_id,
        clv_6m: Some(clv_6m),
        clv_12m: Some(clv_12m),
        expected_purchases_6m: Some(cumulative[SHORT_HORIZON_MONTHS as usize - 1]),
        expected_purchases_12m: Some(cumulative[LONG_HORIZON_MONTHS as usize - 1]),
        prob_alive: bgnbd.prob_alive(&c.stats),
        expected_value,
        monetary_fallback,
    })
}

/// Forecast CLV for every customer in the transaction log.
pub fn forecast(
    txns: &[Transaction],
    snapshot: NaiveDate,
    config: &ClvConfig,
    cancel: &CancelToken,
) -> EngineResult<ClvOutput> {
    validate_transactions(txns, snapshot)?;
    let calibration_end = config.calibration_end.unwrap_or(snapshot);
    if calibration_end > snapshot {
        return Err(EngineError::DataQuality(format!(
            "calibration end {calibration_end} is after snapshot {snapshot}"
        )));
    }

    let calibrated: Vec<Calibrated> = group_by_customer(txns)
        .values()
        .map(|h| calibrate(h, calibration_end))
        .collect();
    let training: Vec<BgNbdCustomer> = calibrated
        .iter()
        .filter(|c| c.history.is_some())
        .map(|c| c.stats)
        .collect();

    // The two fits share nothing; run them side by side.
    let (frequency, monetary) = std::thread::scope(|scope| {
        let freq = scope.spawn(|| {
            bgnbd_model::fit(&training, config.penalizer_coef, &config.frequency_fit, cancel)
        });
        let money = scope.spawn(|| fit_monetary(&calibrated, config, cancel));
        (
            freq.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)),
            money.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)),
        )
    });
    let models = ClvModels { frequency: frequency?, monetary: monetary? };

    let mut events = vec![PipelineEvent::ModelFitted {
        model: bgnbd_model::MODEL_NAME.into(),
        iterations: models.frequency.iterations,
        objective: models.frequency.log_likelihood,
        training_rows: models.frequency.training_rows,
    }];
    if let MonetaryModel::Fitted { model, .. } = &models.monetary {
        events.push(PipelineEvent::ModelFitted {
            model: gamma_gamma_model::MODEL_NAME.into(),
            iterations: model.iterations,
            objective: model.log_likelihood,
            training_rows: model.training_rows,
        });
    }

    let mut records = Vec::with_capacity(calibrated.len());
    let mut fallback_count = 0usize;
    for c in &calibrated {
        cancel.check("clv forecast")?;
        match forecast_customer(c, &models, config.discount_rate_monthly) {
            Ok(record) => {
                if record.monetary_fallback {
                    fallback_count += 1;
                }
                records.push(record);
            }
            Err(reason) => {
                log::warn!("clv: customer {} degraded to null CLV: {reason}", c.customer_id);
                events.push(PipelineEvent::ForecastDegraded {
                    customer_id: c.customer_id,
                    reason,
                });
                let (expected_value, monetary_fallback) =
                    models.monetary.expected_value(c.history.as_ref());
                records.push(ClvRecord {
                    customer_id: c.customer_id,
                    clv_6m: None,
                    clv_12m: None,
                    expected_purchases_6m: None,
                    expected_purchases_12m: None,
                    prob_alive: models.frequency.params.prob_alive(&c.stats),
                    expected_value,
                    monetary_fallback,
                });
            }
        }
    }

    if fallback_count > 0 {
        events.push(PipelineEvent::MonetaryFallback {
            customers: fallback_count,
            population_mean: models.monetary.population_mean(),
        });
    }

    log::info!(
        "clv: forecast {} customers (calibration_end={calibration_end}, fallback={fallback_count})",
        records.len()
    );

    Ok(ClvOutput {
        table: ClvTable { calibration_end, records },
        models,
        events,
    })
}
