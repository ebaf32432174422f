use chrono::{Duration, NaiveDate};
use profit_engine_core::{
    config::{EngineConfig, RfmConfig, SmallPopulationPolicy},
    error::EngineError,
    event::PipelineEvent,
    input::{group_by_customer, Transaction},
    rfm_aggregator::{aggregate, assign_segment, Segment},
    synthetic::{self, SyntheticConfig},
};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn day0() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn day(n: i64) -> NaiveDate {
    day0() + Duration::days(n)
}

fn rfm_config() -> RfmConfig {
    EngineConfig::default_test().rfm
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// Customer 101 buys on days 0, 30 and 60 for 100, 150 and 200.
/// With the snapshot on day 90: Recency 30, Frequency 2, Monetary 450.
#[test]
fn three_purchases_give_expected_rfm() {
    let txns = vec![
        Transaction::on_day(101, day(0), 100.0),
        Transaction::on_day(101, day(30), 150.0),
        Transaction::on_day(101, day(60), 200.0),
    ];

    let out = aggregate(&txns, day(90), &rfm_config()).unwrap();
    let r = out.table.get(101).expect("customer 101 scored");

    assert_eq!(r.recency, 30);
    assert_eq!(r.frequency, 2);
    assert_eq!(r.monetary, 450.0);
}

/// Every transaction counts toward Frequency, including several on one day.
#[test]
fn same_day_purchases_each_count_for_frequency() {
    let txns = vec![
        Transaction::on_day(1, day(0), 10.0),
        Transaction::on_day(1, day(0), 20.0),
        Transaction::on_day(1, day(0), 30.0),
        Transaction::on_day(7, day(10), 20.0),
        Transaction::on_day(7, day(10), 5.0),
        Transaction::on_day(7, day(12), 10.0),
    ];

    let out = aggregate(&txns, day(12), &rfm_config()).unwrap();

    let one_day = out.table.get(1).unwrap();
    assert_eq!(one_day.frequency, 2, "three transactions = two repeats");
    assert_eq!(one_day.monetary, 60.0);
    assert_eq!(one_day.recency, 12);

    let two_days = out.table.get(7).unwrap();
    assert_eq!(two_days.frequency, 2);
    assert_eq!(two_days.monetary, 35.0);
    assert_eq!(two_days.recency, 0);
}

/// The monetary model sees single transaction values, not day totals,
/// while BG/NBD periods stay daily.
#[test]
fn purchase_history_keeps_one_entry_per_transaction() {
    let txns = vec![
        Transaction::on_day(3, day(4), 100.0),
        Transaction::on_day(3, day(0), 50.0),
        Transaction::on_day(3, day(4), 20.0),
    ];
    let histories = group_by_customer(&txns);
    let h = &histories[&3];

    assert_eq!(h.transaction_count(), 3);
    assert_eq!(h.repeat_count(), 2);
    assert_eq!(h.repeat_days(), 1);
    assert_eq!(h.first_day(), day(0));
    assert_eq!(h.mean_repeat_value(), Some(60.0));
    let amounts: Vec<f64> = h.purchases.iter().map(|(_, a)| *a).collect();
    assert_eq!(amounts, vec![50.0, 100.0, 20.0], "ordered by time, ties in log order");
}

#[test]
fn aggregation_is_idempotent() {
    let inputs = synthetic::generate(5, &SyntheticConfig::new(300, day(365)));

    let a = aggregate(&inputs.transactions, inputs.snapshot, &rfm_config()).unwrap();
    let b = aggregate(&inputs.transactions, inputs.snapshot, &rfm_config()).unwrap();

    assert_eq!(a.table, b.table, "same input must give the same RFM table");
}

/// Shard size only changes how work is split, never the result.
#[test]
fn shard_size_does_not_change_output() {
    let inputs = synthetic::generate(6, &SyntheticConfig::new(250, day(365)));
    let mut small = rfm_config();
    small.shard_size = 7;
    let mut large = rfm_config();
    large.shard_size = 10_000;

    let a = aggregate(&inputs.transactions, inputs.snapshot, &small).unwrap();
    let b = aggregate(&inputs.transactions, inputs.snapshot, &large).unwrap();
    assert_eq!(a.table, b.table);
}

#[test]
fn recency_frequency_and_scores_are_in_range() {
    let inputs = synthetic::generate(9, &SyntheticConfig::new(400, day(365)));
    let out = aggregate(&inputs.transactions, inputs.snapshot, &rfm_config()).unwrap();
    let buckets = out.table.bucket_count as u8;

    let mut previous = i64::MIN;
    for r in out.table.records() {
        assert!(r.customer_id > previous, "table must be sorted by customer_id");
        previous = r.customer_id;
        assert!(r.recency >= 0, "customer {} recency {}", r.customer_id, r.recency);
        assert!(r.monetary >= 0.0);
        for score in [r.r_score, r.f_score, r.m_score] {
            assert!((1..=buckets).contains(&score), "score {score} outside 1..={buckets}");
        }
        assert_eq!(r.segment, assign_segment(r.r_score, r.f_score, r.m_score, buckets as usize));
    }
}

/// Equal values are split across bands by customer_id, so a population
/// with identical behaviour still fills every band evenly.
#[test]
fn ties_are_broken_by_customer_id() {
    let txns: Vec<Transaction> = (1..=8).map(|id| Transaction::on_day(id, day(5), 10.0)).collect();
    let out = aggregate(&txns, day(10), &rfm_config()).unwrap();

    let m_scores: Vec<u8> = out.table.records().iter().map(|r| r.m_score).collect();
    assert_eq!(m_scores, vec![1, 1, 2, 2, 3, 3, 4, 4]);

    // Recency is inverted, but ties still rank by id.
    let r_scores: Vec<u8> = out.table.records().iter().map(|r| r.r_score).collect();
    assert_eq!(r_scores, vec![4, 4, 3, 3, 2, 2, 1, 1]);
}

#[test]
fn more_recent_customers_score_higher_on_recency() {
    let txns = vec![
        Transaction::on_day(1, day(0), 10.0),
        Transaction::on_day(2, day(40), 10.0),
        Transaction::on_day(3, day(80), 10.0),
        Transaction::on_day(4, day(99), 10.0),
    ];
    let out = aggregate(&txns, day(100), &rfm_config()).unwrap();
    let scores: Vec<u8> = out.table.records().iter().map(|r| r.r_score).collect();
    assert_eq!(scores, vec![1, 2, 3, 4]);
}

#[test]
fn segment_rules_are_a_pure_function() {
    assert_eq!(assign_segment(4, 4, 4, 4), Segment::Champions);
    assert_eq!(assign_segment(1, 1, 1, 4), Segment::Lost);
    assert_eq!(assign_segment(1, 4, 1, 4), Segment::AtRisk);
    assert_eq!(assign_segment(1, 1, 4, 4), Segment::BigSpender);
    for (r, f, m) in [(1, 2, 3), (3, 1, 2), (2, 3, 1)] {
        assert_eq!(assign_segment(r, f, m, 4), assign_segment(r, f, m, 4));
    }
    assert_eq!(Segment::from_label("Needs Attention"), Some(Segment::NeedsAttention));
    assert_eq!(Segment::from_label("Nope"), None);
}

#[test]
fn small_population_reduces_buckets_and_records_it() {
    let txns = vec![
        Transaction::on_day(1, day(0), 10.0),
        Transaction::on_day(2, day(3), 30.0),
    ];
    let out = aggregate(&txns, day(10), &rfm_config()).unwrap();

    assert_eq!(out.table.bucket_count, 2);
    assert!(out
        .events
        .iter()
        .any(|e| matches!(e, PipelineEvent::BucketsReduced { requested: 4, used: 2 })));
}

#[test]
fn small_population_fails_under_fail_policy() {
    let txns = vec![Transaction::on_day(1, day(0), 10.0)];
    let mut config = rfm_config();
    config.small_population = SmallPopulationPolicy::Fail;

    let err = aggregate(&txns, day(10), &config).unwrap_err();
    assert!(matches!(err, EngineError::InsufficientData(_)), "got {err:?}");
}

/// Scores are u8; a bucket count past 255 is refused rather than wrapped.
#[test]
fn bucket_count_beyond_u8_is_rejected() {
    let txns: Vec<Transaction> =
        (1..=300).map(|id| Transaction::on_day(id, day(0), id as f64)).collect();
    let mut config = rfm_config();
    config.bucket_count = 300;

    let err = aggregate(&txns, day(10), &config).unwrap_err();
    assert!(matches!(err, EngineError::Other(_)), "got {err:?}");

    let mut engine_config = EngineConfig::default_test();
    engine_config.rfm.bucket_count = 300;
    assert!(engine_config.validate().is_err());

    config.bucket_count = 255;
    let out = aggregate(&txns, day(10), &config).unwrap();
    assert_eq!(out.table.get(300).unwrap().m_score, 255, "top spender takes the top band");
    assert!(out.table.records().iter().all(|r| r.m_score >= 1));
}

#[test]
fn empty_log_is_insufficient_data() {
    let err = aggregate(&[], day(10), &rfm_config()).unwrap_err();
    assert!(matches!(err, EngineError::InsufficientData(_)), "got {err:?}");
}

#[test]
fn negative_or_non_finite_amount_is_rejected() {
    for bad in [-1.0, f64::NAN, f64::INFINITY] {
        let txns = vec![
            Transaction::on_day(1, day(0), 10.0),
            Transaction::on_day(2, day(1), bad),
        ];
        let err = aggregate(&txns, day(10), &rfm_config()).unwrap_err();
        assert!(matches!(err, EngineError::DataQuality(_)), "amount {bad}: got {err:?}");
    }
}

#[test]
fn transaction_after_snapshot_is_rejected() {
    let txns = vec![Transaction::on_day(1, day(11), 10.0)];
    let err = aggregate(&txns, day(10), &rfm_config()).unwrap_err();
    assert!(matches!(err, EngineError::DataQuality(_)), "got {err:?}");
}

#[test]
fn zero_amount_is_allowed() {
    let txns = vec![Transaction::on_day(1, day(0), 0.0)];
    let out = aggregate(&txns, day(10), &rfm_config()).unwrap();
    assert_eq!(out.table.get(1).unwrap().monetary, 0.0);
}
