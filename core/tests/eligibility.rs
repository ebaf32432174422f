use chrono::NaiveDate;
use profit_engine_core::{
    cancel::CancelToken,
    clv_forecaster::{forecast, ClvTable},
    config::{EligibilityConfig, EngineConfig},
    customer_table::CustomerTable,
    eligibility::{filter_eligible, rules_from_config, EligibilityRule},
    error::EngineError,
    event::PipelineEvent,
    input::CustomerProfile,
    rfm_aggregator::{aggregate, RfmTable, Segment},
    synthetic::{self, SyntheticConfig},
};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn snapshot() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()
}

/// A synthetic population with its RFM and CLV tables merged.
fn customers(seed: u64) -> (RfmTable, ClvTable, CustomerTable) {
    let config = EngineConfig::default_test();
    let inputs = synthetic::generate(seed, &SyntheticConfig::new(300, snapshot()));
    let rfm = aggregate(&inputs.transactions, snapshot(), &config.rfm).unwrap().table;
    let clv = forecast(&inputs.transactions, snapshot(), &config.clv, &CancelToken::new())
        .unwrap()
        .table;
    let table = CustomerTable::merge(&rfm, &clv).unwrap();
    (rfm, clv, table)
}

fn profile(customer_id: i64, opted_out: Option<bool>, converted: Option<bool>) -> CustomerProfile {
    CustomerProfile { customer_id, opted_out, converted }
}

fn everyone_clean(table: &CustomerTable) -> Vec<CustomerProfile> {
    table.rows().iter().map(|r| profile(r.customer_id, Some(false), Some(false))).collect()
}

fn no_rules() -> EligibilityConfig {
    EligibilityConfig::default()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn merged_table_has_one_row_per_rfm_customer() {
    let (rfm, clv, table) = customers(51);
    assert_eq!(table.len(), rfm.len());
    for row in table.rows() {
        let r = rfm.get(row.customer_id).unwrap();
        assert_eq!((row.recency, row.frequency, row.monetary), (r.recency, r.frequency, r.monetary));
        assert_eq!(row.clv_12m, clv.get(row.customer_id).unwrap().clv_12m);
    }
}

#[test]
fn no_rules_means_everyone_is_eligible() {
    let (_, _, table) = customers(52);
    let out = filter_eligible(&table, &[], &no_rules()).unwrap();
    assert_eq!(out.table, table);
    assert!(out.events.is_empty());
}

#[test]
fn opted_out_and_converted_customers_are_excluded() {
    let (_, _, table) = customers(53);
    let mut profiles = everyone_clean(&table);
    let opted = profiles[0].customer_id;
    let converted = profiles[1].customer_id;
    profiles[0].opted_out = Some(true);
    profiles[1].converted = Some(true);

    let config = EligibilityConfig { exclude_opted_out: true, exclude_converted: true, ..no_rules() };
    let out = filter_eligible(&table, &profiles, &config).unwrap();

    assert_eq!(out.table.len(), table.len() - 2);
    assert!(out.table.get(opted).is_none());
    assert!(out.table.get(converted).is_none());
    assert_eq!(out.excluded, 2);
    assert!(out.events.is_empty(), "plain exclusions are not failures");
}

/// A rule that needs a missing attribute excludes the customer and
/// reports why, without failing the run.
#[test]
fn missing_profile_fails_the_rule_and_is_reported() {
    let (_, _, table) = customers(54);
    let mut profiles = everyone_clean(&table);
    let missing = profiles.remove(0).customer_id;
    let unknown = profiles[0].customer_id;
    profiles[0].opted_out = None;

    let config = EligibilityConfig { exclude_opted_out: true, ..no_rules() };
    let out = filter_eligible(&table, &profiles, &config).unwrap();

    assert!(out.table.get(missing).is_none());
    assert!(out.table.get(unknown).is_none());
    assert_eq!(out.failed, 2);
    let failed: Vec<i64> = out
        .events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::EligibilityFailed { customer_id, rule, .. } => {
                assert_eq!(rule, "not_opted_out");
                Some(*customer_id)
            }
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec![missing, unknown]);
}

#[test]
fn segment_recency_and_clv_rules_apply() {
    let (_, _, table) = customers(55);
    let config = EligibilityConfig {
        exclude_segments: vec!["Lost".into(), "Hibernating".into()],
        max_recency_days: Some(180),
        min_clv_12m: Some(5.0),
        ..no_rules()
    };
    let out = filter_eligible(&table, &[], &config).unwrap();

    assert!(!out.table.is_empty(), "some customers should pass");
    for row in out.table.rows() {
        assert!(!matches!(row.segment, Segment::Lost | Segment::Hibernating));
        assert!(row.recency <= 180);
        assert!(row.clv_12m.unwrap() >= 5.0);
    }
    assert_eq!(out.table.len() + out.excluded + out.failed, table.len());
}

#[test]
fn eligible_table_keeps_schema_and_order() {
    let (_, _, table) = customers(56);
    let config = EligibilityConfig { max_recency_days: Some(90), ..no_rules() };
    let out = filter_eligible(&table, &[], &config).unwrap();

    let ids: Vec<i64> = out.table.rows().iter().map(|r| r.customer_id).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    for row in out.table.rows() {
        assert_eq!(Some(row), table.get(row.customer_id));
    }
}

#[test]
fn unknown_segment_label_is_rejected() {
    let config = EligibilityConfig { exclude_segments: vec!["Whales".into()], ..no_rules() };
    let err = rules_from_config(&config).unwrap_err();
    assert!(matches!(err, EngineError::SchemaMismatch(_)), "got {err:?}");

    let mut engine_config = EngineConfig::default_test();
    engine_config.targeting.eligibility = config;
    assert!(engine_config.validate().is_err());
}

#[test]
fn rules_are_built_in_a_fixed_order() {
    let config = EligibilityConfig {
        exclude_opted_out: true,
        exclude_converted: true,
        exclude_segments: vec!["Lost".into()],
        max_recency_days: Some(30),
        min_clv_12m: Some(1.0),
    };
    let names: Vec<&str> = rules_from_config(&config).unwrap().iter().map(EligibilityRule::name).collect();
    assert_eq!(
        names,
        vec!["not_opted_out", "not_converted", "segment_not_excluded", "max_recency", "min_clv_12m"]
    );
}

#[test]
fn duplicate_profiles_are_data_quality() {
    let (_, _, table) = customers(57);
    let id = table.rows()[0].customer_id;
    let profiles = vec![profile(id, Some(false), None), profile(id, Some(true), None)];
    let err = filter_eligible(&table, &profiles, &no_rules()).unwrap_err();
    assert!(matches!(err, EngineError::DataQuality(_)), "got {err:?}");
}
