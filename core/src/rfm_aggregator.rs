//! RFM aggregator: transaction log to scored, segmented customer table.
//!
//! Conventions (fixed for every run):
//!   - Recency:   whole days from the last purchase to the snapshot date
//!   - Frequency: repeat transactions (transaction count − 1)
//!   - Monetary:  sum of all transaction amounts
//!
//! Scores are rank-based quantile bands over the current population
//! (see quantile.rs). Recency is inverted: more recent scores higher.
//! The segment is a pure function of (R, F, M, bucket count) via the
//! ordered rule table SEGMENT_RULES.

use crate::{
    config::{RfmConfig, SmallPopulationPolicy},
    error::{EngineError, EngineResult},
    event::PipelineEvent,
    input::{group_by_customer, validate_transactions, PurchaseHistory, Transaction},
    quantile::{quantile_scores, Direction, MAX_BANDS},
    types::{CustomerId, Days},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ── Public types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Champions,
    Loyal,
    PotentialLoyalist,
    AtRisk,
    BigSpender,
    NeedsAttention,
    Hibernating,
    Lost,
}

impl Segment {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Champions         => "Champions",
            Self::Loyal             => "Loyal",
            Self::PotentialLoyalist => "Potential Loyalist",
            Self::AtRisk            => "At Risk",
            Self::BigSpender        => "Big Spender",
            Self::NeedsAttention    => "Needs Attention",
            Self::Hibernating       => "Hibernating",
            Self::Lost              => "Lost",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        SEGMENT_RULES
            .iter()
            .map(|(segment, _)| *segment)
            .find(|s| s.label() == label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RfmRecord {
    pub customer_id: CustomerId,
    pub recency:     Days,
    pub frequency:   u32,
    pub monetary:    f64,
    pub r_score:     u8,
    pub f_score:     u8,
    pub m_score:     u8,
    pub segment:     Segment,
}

/// Immutable RFM table, sorted by customer_id.
#[derive(Debug, Clone, PartialEq)]
pub struct RfmTable {
    pub snapshot:     NaiveDate,
    pub bucket_count: usize,
    records:          Vec<RfmRecord>,
}

impl RfmTable {
    pub fn records(&self) -> &[RfmRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, customer_id: CustomerId) -> Option<&RfmRecord> {
        self.records
            .binary_search_by_key(&customer_id, |r| r.customer_id)
            .ok()
            .map(|idx| &self.records[idx])
    }
}

#[derive(Debug, Clone)]
pub struct RfmOutput {
    pub table:  RfmTable,
    pub events: Vec<PipelineEvent>,
}

// ── Segment rules ────────────────────────────────────────────────────────────

/// Scores normalized to [0, 1] so the rule table works for any bucket count.
#[derive(Debug, Clone, Copy)]
pub struct ScoreLevels {
    pub r: f64,
    pub f: f64,
    pub m: f64,
}

impl ScoreLevels {
    pub fn new(r_score: u8, f_score: u8, m_score: u8, bucket_count: usize) -> Self {
        let level = |s: u8| {
            if bucket_count <= 1 {
                1.0
            } else {
                (s as f64 - 1.0) / (bucket_count as f64 - 1.0)
            }
        };
        Self { r: level(r_score), f: level(f_score), m: level(m_score) }
    }
}

type SegmentRule = (Segment, fn(&ScoreLevels) -> bool);

/// Evaluated top to bottom; the first matching rule wins. The last rule
/// matches everything.
const SEGMENT_RULES: &[SegmentRule] = &[
    (Segment::Champions,         |l| l.r >= 0.66 && l.f >= 0.66 && l.m >= 0.5),
    (Segment::Loyal,             |l| l.r >= 0.5 && l.f >= 0.5),
    (Segment::PotentialLoyalist, |l| l.r >= 0.5),
    (Segment::AtRisk,            |l| l.f >= 0.5),
    (Segment::BigSpender,        |l| l.m >= 0.66),
    (Segment::NeedsAttention,    |l| l.r > 0.0 && l.f > 0.0),
    (Segment::Hibernating,       |l| l.r > 0.0),
    (Segment::Lost,              |_| true),
];

pub fn assign_segment(r_score: u8, f_score: u8, m_score: u8, bucket_count: usize) -> Segment {
    let levels = ScoreLevels::new(r_score, f_score, m_score, bucket_count);
    SEGMENT_RULES
        .iter()
        .find(|(_, matches)| matches(&levels))
        .map(|(segment, _)| *segment)
        .unwrap_or(Segment::Lost)
}

// ── Aggregation ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct RawRfm {
    customer_id: CustomerId,
    recency:     Days,
    frequency:   u32,
    monetary:    f64,
}

fn raw_rfm(history: &PurchaseHistory, snapshot: NaiveDate) -> RawRfm {
    RawRfm {
        customer_id: history.customer_id,
        recency:     (snapshot - history.last_day()).num_days(),
        frequency:   history.repeat_count(),
        monetary:    history.total_amount(),
    }
}

/// Decide how many buckets the population supports.
fn effective_bucket_count(
    population: usize,
    config: &RfmConfig,
    events: &mut Vec<PipelineEvent>,
) -> EngineResult<usize> {
    if config.bucket_count == 0 || config.bucket_count > MAX_BANDS {
        return Err(EngineError::Other(anyhow::anyhow!(
            "rfm.bucket_count {} outside 1..={MAX_BANDS}",
            config.bucket_count
        )));
    }
    if population == 0 {
        return Err(EngineError::InsufficientData(
            "no customers in transaction log".into(),
        ));
    }
    if population >= config.bucket_count {
        return Ok(config.bucket_count);
    }
    match config.small_population {
        SmallPopulationPolicy::Fail => Err(EngineError::InsufficientData(format!(
            "{population} customers cannot fill {} quantile buckets",
            config.bucket_count
        ))),
        SmallPopulationPolicy::ReduceBuckets => {
            log::warn!(
                "rfm: only {population} customers, reducing buckets {} -> {population}",
                config.bucket_count
            );
            events.push(PipelineEvent::BucketsReduced {
                requested: config.bucket_count,
                used: population,
            });
            Ok(population)
        }
    }
}

/// Aggregate a transaction log into the RFM table.
pub fn aggregate(
    txns: &[Transaction],
    snapshot: NaiveDate,
    config: &RfmConfig,
) -> EngineResult<RfmOutput> {
    validate_transactions(txns, snapshot)?;

    let histories: Vec<PurchaseHistory> = group_by_customer(txns).into_values().collect();
    let mut events = Vec::new();
    let buckets = effective_bucket_count(histories.len(), config, &mut events)?;

    // Per-customer aggregation is independent; shard it across threads.
    let raw: Vec<RawRfm> = std::thread::scope(|scope| {
        let handles: Vec<_> = histories
            .chunks(config.shard_size.max(1))
            .map(|shard| {
                scope.spawn(move || {
                    shard.iter().map(|h| raw_rfm(h, snapshot)).collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    });

    let recency: Vec<_> = raw.iter().map(|r| (r.customer_id, r.recency as f64)).collect();
    let frequency: Vec<_> = raw.iter().map(|r| (r.customer_id, r.frequency as f64)).collect();
    let monetary: Vec<_> = raw.iter().map(|r| (r.customer_id, r.monetary)).collect();

    let r_scores = quantile_scores(&recency, buckets, Direction::LowerIsBetter);
    let f_scores = quantile_scores(&frequency, buckets, Direction::HigherIsBetter);
    let m_scores = quantile_scores(&monetary, buckets, Direction::HigherIsBetter);

    let records: Vec<RfmRecord> = raw
        .iter()
        .enumerate()
        .map(|(i, r)| RfmRecord {
            customer_id: r.customer_id,
            recency:     r.recency,
            frequency:   r.frequency,
            monetary:    r.monetary,
            r_score:     r_scores[i],
            f_score:     f_scores[i],
            m_score:     m_scores[i],
            segment:     assign_segment(r_scores[i], f_scores[i], m_scores[i], buckets),
        })
        .collect();

    log::info!(
        "rfm: scored {} customers into {buckets} buckets (snapshot={snapshot})",
        records.len()
    );

    Ok(RfmOutput {
        table: RfmTable { snapshot, bucket_count: buckets, records },
        events,
    })
}
