//! Gamma-Gamma monetary-value model.
//!
//! Individual transaction values are Gamma(p, ν) around each customer's
//! mean; ν ~ Gamma(q, v) across the population. Fitted only on
//! customers with at least one repeat purchase.

use crate::{
    cancel::CancelToken,
    config::FitConfig,
    error::{EngineError, EngineResult},
    optimizer::nelder_mead,
    special_fn::ln_gamma,
};
use serde::{Deserialize, Serialize};

pub const MODEL_NAME: &str = "gamma_gamma";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GammaGammaParams {
    pub p: f64,
    pub q: f64,
    pub v: f64,
}

/// Repeat-purchase count and mean repeat-purchase value, both > 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonetaryObservation {
    pub frequency:  f64,
    pub mean_value: f64,
}

#[derive(Debug, Clone)]
pub struct FittedGammaGamma {
    pub params:         GammaGammaParams,
    pub iterations:     usize,
    pub log_likelihood: f64,
    pub training_rows:  usize,
}

impl GammaGammaParams {
    pub fn log_likelihood(&self, o: &MonetaryObservation) -> f64 {
        let Self { p, q, v } = *self;
        let (x, m) = (o.frequency, o.mean_value);
        ln_gamma(p * x + q) - ln_gamma(p * x) - ln_gamma(q)
            + q * v.ln()
            + (p * x - 1.0) * m.ln()
            + p * x * x.ln()
            - (p * x + q) * (x * m + v).ln()
    }

    /// E[value | x repeat purchases with mean m].
    pub fn conditional_expected_value(&self, frequency: f64, mean_value: f64) -> f64 {
        let Self { p, q, v } = *self;
        p * (v + frequency * mean_value) / (p * frequency + q - 1.0)
    }

    /// Population mean value; only defined for q > 1.
    pub fn population_mean(&self) -> Option<f64> {
        (self.q > 1.0).then(|| self.p * self.v / (self.q - 1.0))
    }
}

fn from_log_space(theta: &[f64], value_scale: f64) -> GammaGammaParams {
    GammaGammaParams {
        p: theta[0].exp(),
        q: theta[1].exp(),
        v: theta[2].exp() * value_scale,
    }
}

pub fn fit(
    observations: &[MonetaryObservation],
    penalizer_coef: f64,
    budget: &FitConfig,
    cancel: &CancelToken,
) -> EngineResult<FittedGammaGamma> {
    if observations.is_empty() {
        return Err(EngineError::InsufficientData(
            "monetary model needs at least one repeat purchaser".into(),
        ));
    }

    let value_scale =
        observations.iter().map(|o| o.mean_value).sum::<f64>() / observations.len() as f64;
    let scaled: Vec<MonetaryObservation> = observations
        .iter()
        .map(|o| MonetaryObservation {
            frequency:  o.frequency,
            mean_value: o.mean_value / value_scale,
        })
        .collect();

    let n = scaled.len() as f64;
    let objective = |theta: &[f64]| {
        let params = from_log_space(theta, 1.0);
        let ll: f64 = scaled.iter().map(|o| params.log_likelihood(o)).sum();
        let penalty = penalizer_coef * (params.p.powi(2) + params.q.powi(2) + params.v.powi(2));
        -ll / n + penalty
    };

    let minimum = nelder_mead(MODEL_NAME, objective, &[0.0; 3], budget, cancel)?;
    let params = from_log_space(&minimum.x, value_scale);

    if ![params.p, params.q, params.v].iter().all(|v| v.is_finite() && *v > 0.0) {
        return Err(EngineError::ModelConvergence {
            model: MODEL_NAME,
            iterations: minimum.iterations,
            reason: format!("optimum is degenerate: {params:?}"),
        });
    }

    let log_likelihood: f64 = observations.iter().map(|o| params.log_likelihood(o)).sum();
    log::debug!(
        "{MODEL_NAME}: p={:.4} q={:.4} v={:.4} ll={log_likelihood:.3}",
        params.p, params.q, params.v
    );

    Ok(FittedGammaGamma {
        params,
        iterations: minimum.iterations,
        log_likelihood,
        training_rows: observations.len(),
    })
}
