//! Raw input logs: transactions, campaign responses and customer profiles.
//!
//! RULE: every log is validated before any stage reads it.
//! A malformed row fails the run with DataQuality; stages downstream
//! may assume amounts are finite and non-negative and that no
//! transaction is dated after the snapshot.

use crate::{
    error::{EngineError, EngineResult},
    types::{CustomerId, Days},
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

// ── Transactions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub customer_id: CustomerId,
    pub timestamp:   NaiveDateTime,
    pub amount:      f64,
}

impl Transaction {
    /// A transaction stamped at midnight of `date`.
    pub fn on_day(customer_id: CustomerId, date: NaiveDate, amount: f64) -> Self {
        Self {
            customer_id,
            timestamp: date.and_time(chrono::NaiveTime::MIN),
            amount,
        }
    }

    pub fn day(&self) -> NaiveDate {
        self.timestamp.date()
    }
}

pub fn validate_transactions(txns: &[Transaction], snapshot: NaiveDate) -> EngineResult<()> {
    for (row, t) in txns.iter().enumerate() {
        if !t.amount.is_finite() {
            return Err(EngineError::DataQuality(format!(
                "transaction row {row} (customer {}): amount is not finite",
                t.customer_id
            )));
        }
        if t.amount < 0.0 {
            return Err(EngineError::DataQuality(format!(
                "transaction row {row} (customer {}): negative amount {}",
                t.customer_id, t.amount
            )));
        }
        if t.day() > snapshot {
            return Err(EngineError::DataQuality(format!(
                "transaction row {row} (customer {}): dated {} after snapshot {snapshot}",
                t.customer_id,
                t.day()
            )));
        }
    }
    Ok(())
}

/// One customer's transactions, one entry per log row, ordered by
/// timestamp. Rows with equal timestamps keep their log order. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseHistory {
    pub customer_id: CustomerId,
    pub purchases:   Vec<(NaiveDateTime, f64)>,
}

impl PurchaseHistory {
    pub fn first_day(&self) -> NaiveDate {
        self.purchases[0].0.date()
    }

    pub fn last_day(&self) -> NaiveDate {
        self.purchases[self.purchases.len() - 1].0.date()
    }

    pub fn total_amount(&self) -> f64 {
        self.purchases.iter().map(|(_, amount)| amount).sum()
    }

    pub fn transaction_count(&self) -> usize {
        self.purchases.len()
    }

    /// Transactions after the first one.
    pub fn repeat_count(&self) -> u32 {
        (self.purchases.len() - 1) as u32
    }

    /// Distinct purchase days after the first one. BG/NBD works on
    /// daily periods, so same-day transactions are one period there.
    pub fn repeat_days(&self) -> u32 {
        let mut days = 1u32;
        for pair in self.purchases.windows(2) {
            if pair[1].0.date() != pair[0].0.date() {
                days += 1;
            }
        }
        days - 1
    }

    /// Days between the first and last purchase.
    pub fn active_span(&self) -> Days {
        (self.last_day() - self.first_day()).num_days()
    }

    /// Mean amount over repeat transactions. None without repeats.
    pub fn mean_repeat_value(&self) -> Option<f64> {
        let repeats = &self.purchases[1..];
        if repeats.is_empty() {
            return None;
        }
        Some(repeats.iter().map(|(_, amount)| amount).sum::<f64>() / repeats.len() as f64)
    }

    /// The part of the history dated on or before `cutoff`. None if nothing remains.
    pub fn until(&self, cutoff: NaiveDate) -> Option<PurchaseHistory> {
        let purchases: Vec<_> = self
            .purchases
            .iter()
            .copied()
            .filter(|(ts, _)| ts.date() <= cutoff)
            .collect();
        if purchases.is_empty() {
            None
        } else {
            Some(PurchaseHistory { customer_id: self.customer_id, purchases })
        }
    }
}

/// Group a validated log into per-customer histories, keyed and ordered by id.
pub fn group_by_customer(txns: &[Transaction]) -> BTreeMap<CustomerId, PurchaseHistory> {
    let mut grouped: BTreeMap<CustomerId, Vec<(NaiveDateTime, f64)>> = BTreeMap::new();
    for t in txns {
        grouped.entry(t.customer_id).or_default().push((t.timestamp, t.amount));
    }

    grouped
        .into_iter()
        .map(|(customer_id, mut purchases)| {
            // Stable: equal timestamps stay in log order.
            purchases.sort_by_key(|(ts, _)| *ts);
            (customer_id, PurchaseHistory { customer_id, purchases })
        })
        .collect()
}

// ── Campaign log ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Arm {
    Treatment,
    Control,
}

impl Arm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Treatment => "treatment",
            Self::Control   => "control",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CampaignRecord {
    pub customer_id: CustomerId,
    pub arm:         Arm,
    pub responded:   bool,
}

/// A customer may appear in the campaign log at most once.
pub fn validate_campaign(records: &[CampaignRecord]) -> EngineResult<()> {
    let mut seen = HashSet::with_capacity(records.len());
    for r in records {
        if !seen.insert(r.customer_id) {
            return Err(EngineError::DataQuality(format!(
                "duplicate customer_id {} in campaign log",
                r.customer_id
            )));
        }
    }
    Ok(())
}

// ── Customer profiles ────────────────────────────────────────────────────────

/// Business attributes consumed by eligibility rules.
/// A missing attribute makes any rule that needs it fail for the customer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CustomerProfile {
    pub customer_id: CustomerId,
    #[serde(default)]
    pub opted_out:   Option<bool>,
    #[serde(default)]
    pub converted:   Option<bool>,
}

pub fn index_profiles(
    profiles: &[CustomerProfile],
) -> EngineResult<HashMap<CustomerId, &CustomerProfile>> {
    let mut index = HashMap::with_capacity(profiles.len());
    for p in profiles {
        if index.insert(p.customer_id, p).is_some() {
            return Err(EngineError::DataQuality(format!(
                "duplicate customer_id {} in profile table",
                p.customer_id
            )));
        }
    }
    Ok(index)
}
