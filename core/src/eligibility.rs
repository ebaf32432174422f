//! Eligibility filter: business rules over the final customer table.
//!
//! RULE: eligibility never looks at the ranking.
//! A customer is eligible only if every configured rule passes. A rule
//! that needs an attribute the customer lacks (no profile row, null
//! flag, null CLV) fails for that customer: the customer is excluded
//! and an EligibilityFailed event is recorded. The run continues.

use crate::{
    config::EligibilityConfig,
    customer_table::{CustomerRow, CustomerTable},
    error::{EngineError, EngineResult},
    event::PipelineEvent,
    input::{index_profiles, CustomerProfile},
    rfm_aggregator::Segment,
    types::{CustomerId, Days},
};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum EligibilityRule {
    NotOptedOut,
    NotConverted,
    SegmentNotIn(Vec<Segment>),
    MaxRecency(Days),
    MinClv12m(f64),
}

impl EligibilityRule {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotOptedOut     => "not_opted_out",
            Self::NotConverted    => "not_converted",
            Self::SegmentNotIn(_) => "segment_not_excluded",
            Self::MaxRecency(_)   => "max_recency",
            Self::MinClv12m(_)    => "min_clv_12m",
        }
    }

    /// Ok(pass) when the rule could be evaluated, Err(reason) when an
    /// attribute it needs is missing.
    fn evaluate(&self, row: &CustomerRow, profile: Option<&CustomerProfile>) -> Result<bool, String> {
        match self {
            Self::NotOptedOut => profile
                .ok_or("no customer profile")?
                .opted_out
                .map(|opted_out| !opted_out)
                .ok_or_else(|| "opted_out is unknown".to_string()),
            Self::NotConverted => profile
                .ok_or("no customer profile")?
                .converted
                .map(|converted| !converted)
                .ok_or_else(|| "converted is unknown".to_string()),
            Self::SegmentNotIn(excluded) => Ok(!excluded.contains(&row.segment)),
            Self::MaxRecency(max) => Ok(row.recency <= *max),
            Self::MinClv12m(min) => row
                .clv_12m
                .map(|clv| clv >= *min)
                .ok_or_else(|| "CLV_12m is null".to_string()),
        }
    }
}

/// Build the rule list from config, in evaluation order.
pub fn rules_from_config(config: &EligibilityConfig) -> EngineResult<Vec<EligibilityRule>> {
    let mut rules = Vec::new();
    if config.exclude_opted_out {
        rules.push(EligibilityRule::NotOptedOut);
    }
    if config.exclude_converted {
        rules.push(EligibilityRule::NotConverted);
    }
    if !config.exclude_segments.is_empty() {
        let segments = config
            .exclude_segments
            .iter()
            .map(|label| {
                Segment::from_label(label).ok_or_else(|| {
                    EngineError::SchemaMismatch(format!("unknown segment label '{label}'"))
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;
        rules.push(EligibilityRule::SegmentNotIn(segments));
    }
    if let Some(max) = config.max_recency_days {
        rules.push(EligibilityRule::MaxRecency(max));
    }
    if let Some(min) = config.min_clv_12m {
        rules.push(EligibilityRule::MinClv12m(min));
    }
    Ok(rules)
}

#[derive(Debug, Clone)]
pub struct EligibilityOutput {
    pub table:    CustomerTable,
    /// Customers a rule evaluated to false for.
    pub excluded: usize,
    /// Customers a rule could not be evaluated for.
    pub failed:   usize,
    pub events:   Vec<PipelineEvent>,
}

enum Verdict {
    Eligible,
    Excluded,
    Failed { rule: &'static str, reason: String },
}

fn judge(
    rules: &[EligibilityRule],
    row: &CustomerRow,
    profiles: &HashMap<CustomerId, &CustomerProfile>,
) -> Verdict {
    let profile = profiles.get(&row.customer_id).copied();
    for rule in rules {
        match rule.evaluate(row, profile) {
            Ok(true) => {}
            Ok(false) => return Verdict::Excluded,
            Err(reason) => return Verdict::Failed { rule: rule.name(), reason },
        }
    }
    Verdict::Eligible
}

pub fn filter_eligible(
    customers: &CustomerTable,
    profiles: &[CustomerProfile],
    config: &EligibilityConfig,
) -> EngineResult<EligibilityOutput> {
    let rules = rules_from_config(config)?;
    let index = index_profiles(profiles)?;

    let mut eligible = Vec::with_capacity(customers.len());
    let mut excluded = 0usize;
    let mut events = Vec::new();
    for row in customers.rows() {
        match judge(&rules, row, &index) {
            Verdict::Eligible => eligible.push(row.customer_id),
            Verdict::Excluded => excluded += 1,
            Verdict::Failed { rule, reason } => {
                log::warn!(
                    "eligibility: customer {} excluded, rule {rule} failed: {reason}",
                    row.customer_id
                );
                events.push(PipelineEvent::EligibilityFailed {
                    customer_id: row.customer_id,
                    rule: rule.to_string(),
                    reason,
                });
            }
        }
    }

    let failed = events.len();
    let table = customers.filter(|row| eligible.binary_search(&row.customer_id).is_ok());
    log::info!(
        "eligibility: {} of {} customers eligible ({excluded} excluded, {failed} failed)",
        table.len(),
        customers.len()
    );
    Ok(EligibilityOutput { table, excluded, failed, events })
}
