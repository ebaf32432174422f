//! Seeded synthetic inputs for the runner and the test-suite.
//!
//! Purchases follow the same story the frequency model tells: while
//! alive a customer buys at a Gamma-distributed rate and drops out
//! after each purchase with a Beta-distributed probability. Basket
//! values are Gamma around a per-customer mean.
//!
//! The campaign log carries a known treatment effect: recent buyers
//! respond better when treated, long-lapsed buyers respond worse.

use crate::{
    engine::PipelineInputs,
    input::{Arm, CampaignRecord, CustomerProfile, Transaction},
    logistic_model::sigmoid,
    rng::{RngBank, StreamSlot},
    types::CustomerId,
};
use chrono::{Duration, NaiveDate};

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub customers:            usize,
    pub snapshot:             NaiveDate,
    /// Days of history before the snapshot.
    pub history_days:         i64,
    /// Share of customers included in the campaign.
    pub campaign_share:       f64,
    pub treatment_share:      f64,
    /// Log-odds shift of treatment for recent buyers.
    pub treatment_effect:     f64,
    pub opt_out_rate:         f64,
    pub converted_rate:       f64,
    pub missing_profile_rate: f64,
}

impl SyntheticConfig {
    pub fn new(customers: usize, snapshot: NaiveDate) -> Self {
        Self {
            customers,
            snapshot,
            history_days:         365,
            campaign_share:       0.6,
            treatment_share:      0.5,
            treatment_effect:     1.2,
            opt_out_rate:         0.08,
            converted_rate:       0.05,
            missing_profile_rate: 0.02,
        }
    }
}

struct Behaviour {
    rate:       f64,
    dropout:    f64,
    mean_value: f64,
    born:       i64,
}

pub fn generate(seed: u64, config: &SyntheticConfig) -> PipelineInputs {
    let bank = RngBank::new(seed);
    let mut behaviour_rng = bank.for_stream(StreamSlot::Behaviour);
    let mut purchase_rng = bank.for_stream(StreamSlot::Purchases);
    let mut amount_rng = bank.for_stream(StreamSlot::Amounts);
    let mut campaign_rng = bank.for_stream(StreamSlot::Campaign);
    let mut profile_rng = bank.for_stream(StreamSlot::Profiles);

    let start = config.snapshot - Duration::days(config.history_days);
    let mut transactions = Vec::new();
    let mut campaign = Vec::new();
    let mut profiles = Vec::new();

    for index in 0..config.customers {
        let customer_id = index as CustomerId + 1;
        let b = Behaviour {
            rate:       behaviour_rng.gamma(2.0, 0.02),
            dropout:    behaviour_rng.beta(1.0, 4.0),
            mean_value: behaviour_rng.gamma(4.0, 12.5),
            born:       behaviour_rng.range(0, (config.history_days * 5 / 6).max(1)),
        };

        // Purchase days, as offsets from `start`.
        let mut days = vec![b.born];
        let mut t = b.born as f64;
        loop {
            if purchase_rng.chance(b.dropout) {
                break;
            }
            t += purchase_rng.exponential(b.rate);
            if t > config.history_days as f64 {
                break;
            }
            days.push(t.floor() as i64);
        }

        for &day in &days {
            let amount = (amount_rng.gamma(6.0, b.mean_value / 6.0) * 100.0).round() / 100.0;
            transactions.push(Transaction::on_day(customer_id, start + Duration::days(day), amount));
        }

        let last = days[days.len() - 1];
        let recency = config.history_days - last;
        let repeat = (days.len() - 1) as f64;

        if campaign_rng.chance(config.campaign_share) {
            let arm = if campaign_rng.chance(config.treatment_share) {
                Arm::Treatment
            } else {
                Arm::Control
            };
            let base = -2.0 + 0.25 * repeat.min(8.0) - 0.004 * recency as f64;
            let effect = match arm {
                Arm::Control => 0.0,
                Arm::Treatment if recency < 90 => config.treatment_effect,
                Arm::Treatment => -0.5 * config.treatment_effect,
            };
            let responded = campaign_rng.chance(sigmoid(base + effect));
            campaign.push(CampaignRecord { customer_id, arm, responded });
        }

        if !profile_rng.chance(config.missing_profile_rate) {
            let opted_out = profile_rng.chance(config.opt_out_rate);
            let converted = profile_rng.chance(config.converted_rate);
            profiles.push(CustomerProfile {
                customer_id,
                opted_out: Some(opted_out),
                converted: Some(converted),
            });
        }
    }

    log::debug!(
        "synthetic: seed {seed}, {} customers, {} transactions, {} campaign rows",
        config.customers,
        transactions.len(),
        campaign.len()
    );

    PipelineInputs {
        snapshot: config.snapshot,
        transactions,
        campaign,
        profiles,
    }
}
