//! Read-only views over a finished run: headline totals, segment mix,
//! the R×F count grid, CLV by segment and per-customer lookup.
//!
//! Nothing here is cached. Every view is recomputed from the run's
//! immutable tables; a null CLV_12m is skipped, never counted as zero.

use crate::{
    artifacts::RunArtifacts,
    customer_table::CustomerRow,
    rfm_aggregator::Segment,
    types::CustomerId,
};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunOverview {
    pub total_customers: usize,
    pub total_monetary:  f64,
    /// Mean over customers with a CLV_12m. None when every value is null.
    pub mean_clv_12m:    Option<f64>,
    pub null_clv_12m:    usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SegmentCount {
    pub segment:   Segment,
    pub customers: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SegmentValue {
    pub segment:      Segment,
    pub customers:    usize,
    /// Customers in the segment with a non-null CLV_12m.
    pub with_clv_12m: usize,
    pub mean_clv_12m: Option<f64>,
}

/// Customer counts by (R_score, F_score). Scores run 1..=bucket_count.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RfGrid {
    pub bucket_count: usize,
    /// counts[r - 1][f - 1]
    counts: Vec<Vec<usize>>,
}

impl RfGrid {
    pub fn count(&self, r_score: u8, f_score: u8) -> usize {
        let (r, f) = (r_score as usize, f_score as usize);
        if r == 0 || f == 0 || r > self.bucket_count || f > self.bucket_count {
            return 0;
        }
        self.counts[r - 1][f - 1]
    }

    /// Rows by R_score ascending, columns by F_score ascending.
    pub fn rows(&self) -> &[Vec<usize>] {
        &self.counts
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }
}

fn mean(values: impl Iterator<Item = f64>) -> (usize, Option<f64>) {
    let (n, sum) = values.fold((0usize, 0.0), |(n, sum), v| (n + 1, sum + v));
    (n, (n > 0).then(|| sum / n as f64))
}

fn overview(rows: &[CustomerRow], total_monetary: f64) -> RunOverview {
    let (with_clv, mean_clv_12m) = mean(rows.iter().filter_map(|r| r.clv_12m));
    RunOverview {
        total_customers: rows.len(),
        total_monetary,
        mean_clv_12m,
        null_clv_12m: rows.len() - with_clv,
    }
}

fn clv_by_segment(rows: &[CustomerRow]) -> Vec<SegmentValue> {
    let mut groups: BTreeMap<Segment, Vec<&CustomerRow>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.segment).or_default().push(row);
    }
    let mut out: Vec<SegmentValue> = groups
        .into_iter()
        .map(|(segment, rows)| {
            let (with_clv_12m, mean_clv_12m) = mean(rows.iter().filter_map(|r| r.clv_12m));
            SegmentValue { segment, customers: rows.len(), with_clv_12m, mean_clv_12m }
        })
        .collect();
    out.sort_by(|a, b| match (a.mean_clv_12m, b.mean_clv_12m) {
        (Some(x), Some(y)) => y.total_cmp(&x).then(a.segment.cmp(&b.segment)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.segment.cmp(&b.segment),
    });
    out
}

impl RunArtifacts {
    pub fn overview(&self) -> RunOverview {
        let total_monetary = self.rfm.records().iter().map(|r| r.monetary).sum();
        overview(self.customers.rows(), total_monetary)
    }

    /// Segments present in the run, largest first. Equal counts follow
    /// segment order.
    pub fn segment_counts(&self) -> Vec<SegmentCount> {
        let mut counts: BTreeMap<Segment, usize> = BTreeMap::new();
        for r in self.rfm.records() {
            *counts.entry(r.segment).or_default() += 1;
        }
        let mut out: Vec<SegmentCount> = counts
            .into_iter()
            .map(|(segment, customers)| SegmentCount { segment, customers })
            .collect();
        out.sort_by(|a, b| b.customers.cmp(&a.customers).then(a.segment.cmp(&b.segment)));
        out
    }

    pub fn rf_grid(&self) -> RfGrid {
        let buckets = self.rfm.bucket_count;
        let mut counts = vec![vec![0usize; buckets]; buckets];
        for r in self.rfm.records() {
            counts[r.r_score as usize - 1][r.f_score as usize - 1] += 1;
        }
        RfGrid { bucket_count: buckets, counts }
    }

    /// Mean CLV_12m per segment, highest first. Segments whose every
    /// CLV_12m is null sort last.
    pub fn mean_clv_12m_by_segment(&self) -> Vec<SegmentValue> {
        clv_by_segment(self.customers.rows())
    }

    /// One customer's RFM and CLV fields.
    pub fn customer(&self, customer_id: CustomerId) -> Option<&CustomerRow> {
        self.customers.get(customer_id)
    }
}
