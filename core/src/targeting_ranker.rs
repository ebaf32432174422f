//! Targeting ranker: uplift-ordered list, Qini gain and the target list.
//!
//! Ordering is total: uplift descending (f64::total_cmp), then
//! customer_id ascending. percent = rank / N × 100 with rank 1-based,
//! so it is strictly increasing down the list.
//!
//! incremental_resp is the running sum of predicted uplift: expected
//! extra responders from treating everyone ranked so far versus
//! treating nobody. random_baseline is what the same number of
//! customers drawn at random would be expected to yield.

use crate::{
    config::TargetingConfig,
    customer_table::CustomerTable,
    error::{EngineError, EngineResult},
    input::{validate_campaign, Arm, CampaignRecord},
    types::CustomerId,
    uplift_modeler::UpliftTable,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Ranked list ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedEntry {
    pub rank:             usize,
    pub customer_id:      CustomerId,
    pub uplift:           f64,
    pub p_treat:          f64,
    pub p_ctrl:           f64,
    pub percent:          f64,
    pub incremental_resp: f64,
    pub random_baseline:  f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedTable {
    entries:      Vec<RankedEntry>,
    total_uplift: f64,
}

impl RankedTable {
    pub fn entries(&self) -> &[RankedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Predicted incremental responders from treating the whole population.
    pub fn total_uplift(&self) -> f64 {
        self.total_uplift
    }

    /// Mean gap between the model curve and the random baseline.
    /// Zero for an empty list.
    pub fn qini_coefficient(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        let gap: f64 = self
            .entries
            .iter()
            .map(|e| e.incremental_resp - e.random_baseline)
            .sum();
        gap / self.entries.len() as f64
    }

    /// The first floor(fraction × N) entries.
    pub fn top(&self, fraction: f64) -> &[RankedEntry] {
        &self.entries[..top_k_count(self.entries.len(), fraction)]
    }
}

/// K = floor(fraction × N), clamped to [0, N]. The epsilon keeps
/// fractions like 0.3 × 10 from flooring to 2.
pub fn top_k_count(population: usize, fraction: f64) -> usize {
    if fraction.is_nan() || fraction <= 0.0 {
        return 0;
    }
    let k = (fraction * population as f64 + 1e-9).floor() as usize;
    k.min(population)
}

pub fn rank(uplift: &UpliftTable) -> RankedTable {
    let mut scored: Vec<_> = uplift.records().iter().map(|r| (r.uplift(), r)).collect();
    scored.sort_by(|(ua, a), (ub, b)| ub.total_cmp(ua).then(a.customer_id.cmp(&b.customer_id)));

    let n = scored.len();
    let total_uplift: f64 = scored.iter().map(|(u, _)| u).sum();
    let mut cumulative = 0.0;
    let entries = scored
        .into_iter()
        .enumerate()
        .map(|(i, (uplift, r))| {
            let rank = i + 1;
            cumulative += uplift;
            let share = rank as f64 / n as f64;
            RankedEntry {
                rank,
                customer_id: r.customer_id,
                uplift,
                p_treat: r.p_treat,
                p_ctrl: r.p_ctrl,
                percent: rank as f64 * 100.0 / n as f64,
                incremental_resp: cumulative,
                random_baseline: share * total_uplift,
            }
        })
        .collect();

    RankedTable { entries, total_uplift }
}

// ── Observed Qini ────────────────────────────────────────────────────────────

/// One point of the empirical Qini curve, taken after each ranked
/// customer that appears in the campaign log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct QiniPoint {
    pub rank:               usize,
    pub percent:            f64,
    pub treated:            usize,
    pub treated_responders: usize,
    pub controls:           usize,
    pub control_responders: usize,
    /// treated_responders − control_responders × treated / controls
    pub incremental:        f64,
}

/// Walk the ranking and measure realised lift on the campaign rows.
pub fn observed_qini(ranked: &RankedTable, campaign: &[CampaignRecord]) -> EngineResult<Vec<QiniPoint>> {
    validate_campaign(campaign)?;
    let by_id: HashMap<CustomerId, &CampaignRecord> =
        campaign.iter().map(|r| (r.customer_id, r)).collect();

    let (mut nt, mut rt, mut nc, mut rc) = (0usize, 0usize, 0usize, 0usize);
    let mut points = Vec::new();
    for entry in ranked.entries() {
        let Some(record) = by_id.get(&entry.customer_id) else {
            continue;
        };
        match record.arm {
            Arm::Treatment => {
                nt += 1;
                rt += record.responded as usize;
            }
            Arm::Control => {
                nc += 1;
                rc += record.responded as usize;
            }
        }
        let control_term = if nc == 0 { 0.0 } else { rc as f64 * nt as f64 / nc as f64 };
        points.push(QiniPoint {
            rank: entry.rank,
            percent: entry.percent,
            treated: nt,
            treated_responders: rt,
            controls: nc,
            control_responders: rc,
            incremental: rt as f64 - control_term,
        });
    }
    Ok(points)
}

// ── Target list ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetEntry {
    pub customer_id: CustomerId,
    pub uplift:      f64,
    pub p_treat:     f64,
    pub p_ctrl:      f64,
}

/// Top-K of the ranking intersected with the eligible set, in rank order.
pub fn target_list(ranked: &RankedTable, top_fraction: f64, eligible: &CustomerTable) -> Vec<TargetEntry> {
    ranked
        .top(top_fraction)
        .iter()
        .filter(|e| eligible.get(e.customer_id).is_some())
        .map(|e| TargetEntry {
            customer_id: e.customer_id,
            uplift:      e.uplift,
            p_treat:     e.p_treat,
            p_ctrl:      e.p_ctrl,
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct TargetingOutput {
    pub ranked:        RankedTable,
    pub targets:       Vec<TargetEntry>,
    pub observed_qini: Vec<QiniPoint>,
}

pub fn build_targets(
    uplift: &UpliftTable,
    eligible: &CustomerTable,
    campaign: &[CampaignRecord],
    config: &TargetingConfig,
) -> EngineResult<TargetingOutput> {
    if !(0.0..=1.0).contains(&config.top_fraction) {
        return Err(EngineError::DataQuality(format!(
            "top_fraction {} is outside [0, 1]",
            config.top_fraction
        )));
    }
    let ranked = rank(uplift);
    let targets = target_list(&ranked, config.top_fraction, eligible);
    let observed_qini = observed_qini(&ranked, campaign)?;

    log::info!(
        "targeting: ranked {} customers, top {} -> {} eligible targets (qini={:.4})",
        ranked.len(),
        top_k_count(ranked.len(), config.top_fraction),
        targets.len(),
        ranked.qini_coefficient()
    );
    Ok(TargetingOutput { ranked, targets, observed_qini })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_k_floors() {
        assert_eq!(top_k_count(10, 0.2), 2);
        assert_eq!(top_k_count(10, 0.3), 3);
        assert_eq!(top_k_count(7, 0.5), 3);
        assert_eq!(top_k_count(7, 1.0), 7);
        assert_eq!(top_k_count(7, 0.0), 0);
        assert_eq!(top_k_count(0, 0.5), 0);
    }
}
