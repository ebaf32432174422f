//! BG/NBD purchase-frequency / dropout model.
//!
//! While alive, a customer purchases as a Poisson process with rate λ,
//! λ ~ Gamma(r, α) across the population. After each purchase the
//! customer drops out with probability p, p ~ Beta(a, b).
//!
//! Per-customer sufficient statistics (all in days):
//!   x   repeat purchases in the calibration window
//!   t_x time of the last purchase, measured from the first
//!   T   age: time from the first purchase to the end of calibration

use crate::{
    cancel::CancelToken,
    config::FitConfig,
    error::{EngineError, EngineResult},
    optimizer::nelder_mead,
    special_fn::{hyp2f1, ln_gamma, log_sum_exp},
};
use serde::{Deserialize, Serialize};

pub const MODEL_NAME: &str = "bgnbd";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BgNbdParams {
    pub r:     f64,
    pub alpha: f64,
    pub a:     f64,
    pub b:     f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BgNbdCustomer {
    pub frequency: f64,
    pub recency:   f64,
    pub age:       f64,
}

impl BgNbdCustomer {
    /// A customer with no purchase history at all.
    pub fn new_customer() -> Self {
        Self { frequency: 0.0, recency: 0.0, age: 0.0 }
    }
}

#[derive(Debug, Clone)]
pub struct FittedBgNbd {
    pub params:         BgNbdParams,
    pub iterations:     usize,
    pub log_likelihood: f64,
    pub training_rows:  usize,
}

impl BgNbdParams {
    pub fn log_likelihood(&self, c: &BgNbdCustomer) -> f64 {
        let Self { r, alpha, a, b } = *self;
        let x = c.frequency;

        let a1 = ln_gamma(r + x) - ln_gamma(r) + r * alpha.ln();
        let a2 = ln_gamma(a + b) + ln_gamma(b + x) - ln_gamma(b) - ln_gamma(a + b + x);
        let a3 = -(r + x) * (alpha + c.age).ln();
        let a4 = if x > 0.0 {
            a.ln() - (b + x - 1.0).ln() - (r + x) * (alpha + c.recency).ln()
        } else {
            f64::NEG_INFINITY
        };

        a1 + a2 + log_sum_exp(a3, a4)
    }

    /// Probability the customer is still alive at the end of calibration.
    pub fn prob_alive(&self, c: &BgNbdCustomer) -> f64 {
        if c.frequency == 0.0 {
            return 1.0;
        }
        let Self { r, alpha, a, b } = *self;
        let x = c.frequency;
        let ln_odds = a.ln() - (b + x - 1.0).ln()
            + (r + x) * ((alpha + c.age).ln() - (alpha + c.recency).ln());
        1.0 / (1.0 + ln_odds.exp())
    }

    /// Expected purchases in (T, T + t] given the customer's history.
    /// None when the forecast is not a finite non-negative number.
    pub fn expected_purchases(&self, c: &BgNbdCustomer, t: f64) -> Option<f64> {
        if t <= 0.0 {
            return Some(0.0);
        }
        let Self { r, alpha, a, b } = *self;
        let x = c.frequency;

        let hyp_a = r + x;
        let hyp_b = b + x;
        let hyp_c = a + b + x - 1.0;
        let z = t / (alpha + c.age + t);
        let hyp = hyp2f1(hyp_a, hyp_b, hyp_c, z)?;

        let ln_decay = (r + x) * ((alpha + c.age).ln() - (alpha + c.age + t).ln());
        let first = (a + b + x - 1.0) / (a - 1.0);
        let second = 1.0 - (hyp.ln() + ln_decay).exp();
        let numerator = first * second;

        let denominator = if x > 0.0 {
            1.0 + (a / (b + x - 1.0))
                * ((alpha + c.age) / (alpha + c.recency)).powf(r + x)
        } else {
            1.0
        };

        let expected = numerator / denominator;
        (expected.is_finite() && expected >= 0.0).then_some(expected)
    }
}

fn from_log_space(theta: &[f64], time_scale: f64) -> BgNbdParams {
    BgNbdParams {
        r:     theta[0].exp(),
        alpha: theta[1].exp() * time_scale,
        a:     theta[2].exp(),
        b:     theta[3].exp(),
    }
}

/// Maximum-likelihood fit. Times are rescaled internally so the optimizer
/// starts from unit parameters regardless of the calendar span.
pub fn fit(
    customers: &[BgNbdCustomer],
    penalizer_coef: f64,
    budget: &FitConfig,
    cancel: &CancelToken,
) -> EngineResult<FittedBgNbd> {
    if customers.is_empty() {
        return Err(EngineError::InsufficientData(
            "no customers with calibration history for the frequency model".into(),
        ));
    }
    if customers.iter().all(|c| c.frequency == 0.0) {
        return Err(EngineError::InsufficientData(
            "frequency model needs at least one repeat purchaser".into(),
        ));
    }

    let max_age = customers.iter().map(|c| c.age).fold(0.0, f64::max);
    let time_scale = if max_age > 0.0 { max_age / 10.0 } else { 1.0 };
    let scaled: Vec<BgNbdCustomer> = customers
        .iter()
        .map(|c| BgNbdCustomer {
            frequency: c.frequency,
            recency:   c.recency / time_scale,
            age:       c.age / time_scale,
        })
        .collect();

    let n = scaled.len() as f64;
    let objective = |theta: &[f64]| {
        let params = from_log_space(theta, 1.0);
        let ll: f64 = scaled.iter().map(|c| params.log_likelihood(c)).sum();
        let penalty = penalizer_coef
            * (params.r.powi(2) + params.alpha.powi(2) + params.a.powi(2) + params.b.powi(2));
        -ll / n + penalty
    };

    let minimum = nelder_mead(MODEL_NAME, objective, &[0.0; 4], budget, cancel)?;
    let params = from_log_space(&minimum.x, time_scale);

    if ![params.r, params.alpha, params.a, params.b].iter().all(|v| v.is_finite() && *v > 0.0) {
        return Err(EngineError::ModelConvergence {
            model: MODEL_NAME,
            iterations: minimum.iterations,
            reason: format!("optimum is degenerate: {params:?}"),
        });
    }

    let log_likelihood: f64 = customers.iter().map(|c| params.log_likelihood(c)).sum();
    log::debug!(
        "{MODEL_NAME}: r={:.4} alpha={:.4} a={:.4} b={:.4} ll={log_likelihood:.3}",
        params.r, params.alpha, params.a, params.b
    );

    Ok(FittedBgNbd {
        params,
        iterations: minimum.iterations,
        log_likelihood,
        training_rows: customers.len(),
    })
}
