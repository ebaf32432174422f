//! L2-regularised logistic regression fitted by Newton-Raphson.
//!
//! The objective is the mean negative log-likelihood plus
//! (λ/2)·‖β‖², with the intercept left unpenalised. Each Newton step
//! is halved until the objective does not increase.

use crate::{
    cancel::CancelToken,
    config::FitConfig,
    error::{EngineError, EngineResult},
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const MAX_STEP_HALVINGS: usize = 30;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogisticParams {
    pub intercept:    f64,
    pub coefficients: Vec<f64>,
}

impl LogisticParams {
    pub fn zeros(dim: usize) -> Self {
        Self { intercept: 0.0, coefficients: vec![0.0; dim] }
    }

    pub fn linear(&self, x: &[f64]) -> f64 {
        self.intercept + self.coefficients.iter().zip(x).map(|(b, v)| b * v).sum::<f64>()
    }

    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        sigmoid(self.linear(x))
    }
}

#[derive(Debug, Clone)]
pub struct FittedLogistic {
    pub params:         LogisticParams,
    pub iterations:     usize,
    pub log_likelihood: f64,
}

pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn softplus(z: f64) -> f64 {
    z.max(0.0) + (-z.abs()).exp().ln_1p()
}

fn objective(params: &LogisticParams, x: &[Vec<f64>], y: &[bool], l2: f64) -> f64 {
    let n = x.len() as f64;
    let nll: f64 = x
        .iter()
        .zip(y)
        .map(|(row, &label)| {
            let z = params.linear(row);
            softplus(z) - if label { z } else { 0.0 }
        })
        .sum();
    nll / n + 0.5 * l2 * params.coefficients.iter().map(|b| b * b).sum::<f64>()
}

/// Solve `a · out = rhs` by Gaussian elimination with partial pivoting.
/// None when the system is singular.
fn solve(mut a: Vec<Vec<f64>>, mut rhs: Vec<f64>) -> Option<Vec<f64>> {
    let n = rhs.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        rhs.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }
    let mut out = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * out[k]).sum();
        out[row] = (rhs[row] - tail) / a[row][row];
    }
    Some(out)
}

pub fn fit(
    model: &'static str,
    x: &[Vec<f64>],
    y: &[bool],
    l2: f64,
    budget: &FitConfig,
    cancel: &CancelToken,
) -> EngineResult<FittedLogistic> {
    let dim = x.first().map(Vec::len).unwrap_or(0);
    let n = x.len() as f64;
    let mut params = LogisticParams::zeros(dim);
    let mut current = objective(&params, x, y, l2);
    let deadline = Instant::now() + Duration::from_secs(budget.timeout_secs);

    let fail = |iterations: usize, reason: String| EngineError::ModelConvergence {
        model,
        iterations,
        reason,
    };

    for iteration in 1..=budget.max_iterations {
        cancel.check("classifier fit")?;
        if Instant::now() > deadline {
            return Err(fail(iteration, format!("timed out after {}s", budget.timeout_secs)));
        }

        // Augmented design: column 0 is the intercept.
        let size = dim + 1;
        let mut grad = vec![0.0; size];
        let mut hess = vec![vec![0.0; size]; size];
        for (row, &label) in x.iter().zip(y) {
            let p = params.predict_proba(row);
            let residual = p - if label { 1.0 } else { 0.0 };
            let weight = p * (1.0 - p);
            for i in 0..size {
                let xi = if i == 0 { 1.0 } else { row[i - 1] };
                grad[i] += residual * xi / n;
                for j in i..size {
                    let xj = if j == 0 { 1.0 } else { row[j - 1] };
                    hess[i][j] += weight * xi * xj / n;
                }
            }
        }
        for i in 0..size {
            for j in 0..i {
                hess[i][j] = hess[j][i];
            }
        }
        for i in 1..size {
            grad[i] += l2 * params.coefficients[i - 1];
            hess[i][i] += l2;
        }

        let step = solve(hess, grad)
            .ok_or_else(|| fail(iteration, "singular Hessian (separable data?)".into()))?;

        let max_step = step.iter().map(|s| s.abs()).fold(0.0, f64::max);
        if max_step < budget.tolerance {
            params.intercept -= step[0];
            for (b, s) in params.coefficients.iter_mut().zip(&step[1..]) {
                *b -= s;
            }
            let penalty = 0.5 * l2 * params.coefficients.iter().map(|b| b * b).sum::<f64>();
            let log_likelihood = -(objective(&params, x, y, l2) - penalty) * n;
            log::debug!("{model}: converged in {iteration} iterations (ll={log_likelihood:.4})");
            return Ok(FittedLogistic { params, iterations: iteration, log_likelihood });
        }

        // Rounding noise near the optimum must not reject a descent step.
        let slack = 1e-14 * current.abs().max(1.0);
        let mut scale = 1.0;
        let mut accepted = None;
        for _ in 0..MAX_STEP_HALVINGS {
            let candidate = LogisticParams {
                intercept: params.intercept - scale * step[0],
                coefficients: params
                    .coefficients
                    .iter()
                    .zip(&step[1..])
                    .map(|(b, s)| b - scale * s)
                    .collect(),
            };
            let value = objective(&candidate, x, y, l2);
            if value.is_finite() && value <= current + slack {
                accepted = Some((candidate, value));
                break;
            }
            scale *= 0.5;
        }
        let (next, value) =
            accepted.ok_or_else(|| fail(iteration, "line search could not decrease the objective".into()))?;

        params = next;
        current = value;
    }

    Err(fail(budget.max_iterations, "iteration cap reached".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget() -> FitConfig {
        FitConfig { max_iterations: 100, tolerance: 1e-10, timeout_secs: 10 }
    }

    #[test]
    fn intercept_only_model_recovers_base_rate() {
        // 3 of 10 respond; with no features the fit is logit(0.3).
        let x = vec![Vec::new(); 10];
        let y: Vec<bool> = (0..10).map(|i| i < 3).collect();
        let fit = fit("intercept", &x, &y, 0.0, &budget(), &CancelToken::new()).unwrap();
        assert!((fit.params.predict_proba(&[]) - 0.3).abs() < 1e-8);
    }

    #[test]
    fn positive_slope_for_increasing_response() {
        let x: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64 / 10.0 - 2.0]).collect();
        // Response becomes more likely as x grows, with overlap to avoid separation.
        let y: Vec<bool> = (0..40).map(|i| (i % 4 != 0 && i > 15) || i % 7 == 0).collect();
        let fit = fit("slope", &x, &y, 1e-3, &budget(), &CancelToken::new()).unwrap();
        assert!(fit.params.coefficients[0] > 0.0);
        assert!(fit.params.predict_proba(&[2.0]) > fit.params.predict_proba(&[-2.0]));
    }

    #[test]
    fn solve_handles_pivoting() {
        let a = vec![vec![0.0, 1.0], vec![2.0, 0.0]];
        let out = solve(a, vec![3.0, 4.0]).unwrap();
        assert_eq!(out, vec![2.0, 3.0]);
    }
}
