//! Derivative-free minimization (Nelder-Mead) under an explicit budget.
//!
//! RULE: an optimizer never returns a fit it did not converge on.
//! Exhausting the iteration cap or the wall-clock timeout is a
//! ModelConvergence error, which is fatal for the run.

use crate::{
    cancel::CancelToken,
    config::FitConfig,
    error::{EngineError, EngineResult},
};
use std::time::{Duration, Instant};

const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;
const INITIAL_STEP: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct Minimum {
    pub x:          Vec<f64>,
    pub value:      f64,
    pub iterations: usize,
}

/// Minimize `objective` starting from `start`.
/// Non-finite objective values are treated as +inf.
pub fn nelder_mead<F>(
    model: &'static str,
    objective: F,
    start: &[f64],
    budget: &FitConfig,
    cancel: &CancelToken,
) -> EngineResult<Minimum>
where
    F: Fn(&[f64]) -> f64,
{
    let dim = start.len();
    let eval = |x: &[f64]| {
        let v = objective(x);
        if v.is_finite() { v } else { f64::INFINITY }
    };

    let f0 = eval(start);
    if !f0.is_finite() {
        return Err(EngineError::ModelConvergence {
            model,
            iterations: 0,
            reason: "objective is not finite at the starting point".into(),
        });
    }

    let mut simplex: Vec<(Vec<f64>, f64)> = Vec::with_capacity(dim + 1);
    simplex.push((start.to_vec(), f0));
    for i in 0..dim {
        let mut vertex = start.to_vec();
        vertex[i] += INITIAL_STEP;
        let f = eval(&vertex);
        simplex.push((vertex, f));
    }

    let deadline = Instant::now() + Duration::from_secs(budget.timeout_secs);
    let x_tolerance = budget.tolerance.sqrt();

    for iteration in 1..=budget.max_iterations {
        cancel.check("model fit")?;
        if Instant::now() > deadline {
            return Err(EngineError::ModelConvergence {
                model,
                iterations: iteration,
                reason: format!("timed out after {}s", budget.timeout_secs),
            });
        }

        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
        let best = simplex[0].1;
        let worst = simplex[dim].1;

        let f_spread = (worst - best).abs();
        let x_spread = simplex[1..]
            .iter()
            .flat_map(|(v, _)| v.iter().zip(&simplex[0].0).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        if f_spread <= budget.tolerance * (1.0 + best.abs()) && x_spread <= x_tolerance {
            let (x, value) = simplex.swap_remove(0);
            log::debug!("{model}: converged in {iteration} iterations (objective={value:.6})");
            return Ok(Minimum { x, value, iterations: iteration });
        }

        let centroid: Vec<f64> = (0..dim)
            .map(|j| simplex[..dim].iter().map(|(v, _)| v[j]).sum::<f64>() / dim as f64)
            .collect();
        let along = |coef: f64| -> Vec<f64> {
            centroid
                .iter()
                .zip(&simplex[dim].0)
                .map(|(c, w)| c + coef * (c - w))
                .collect()
        };

        let reflected = along(REFLECT);
        let f_reflected = eval(&reflected);

        if f_reflected < best {
            let expanded = along(EXPAND);
            let f_expanded = eval(&expanded);
            simplex[dim] = if f_expanded < f_reflected {
                (expanded, f_expanded)
            } else {
                (reflected, f_reflected)
            };
            continue;
        }

        if f_reflected < simplex[dim - 1].1 {
            simplex[dim] = (reflected, f_reflected);
            continue;
        }

        let (contracted, f_contracted) = if f_reflected < worst {
            let c = along(CONTRACT * REFLECT);
            let f = eval(&c);
            (c, f)
        } else {
            let c = along(-CONTRACT);
            let f = eval(&c);
            (c, f)
        };

        if f_contracted < worst.min(f_reflected) {
            simplex[dim] = (contracted, f_contracted);
            continue;
        }

        // Shrink toward the best vertex.
        let best_vertex = simplex[0].0.clone();
        for (vertex, f) in simplex.iter_mut().skip(1) {
            for (v, b) in vertex.iter_mut().zip(&best_vertex) {
                *v = b + SHRINK * (*v - b);
            }
            *f = eval(vertex);
        }
    }

    Err(EngineError::ModelConvergence {
        model,
        iterations: budget.max_iterations,
        reason: "iteration cap reached".into(),
    })
}
