use chrono::NaiveDate;
use profit_engine_core::{
    cancel::CancelToken,
    config::{EngineConfig, FitConfig},
    engine::{PipelineInputs, ProfitEngine},
    error::EngineError,
    event::PipelineEvent,
    input::Transaction,
    synthetic::{self, SyntheticConfig},
    targeting_ranker::top_k_count,
};
use std::{
    collections::HashSet,
    time::{Duration, Instant},
};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn snapshot() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
}

fn inputs(seed: u64) -> PipelineInputs {
    synthetic::generate(seed, &SyntheticConfig::new(700, snapshot()))
}

fn engine() -> ProfitEngine {
    let _ = env_logger::builder().is_test(true).try_init();
    ProfitEngine::new(EngineConfig::default_test())
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn every_customer_flows_through_every_table() {
    let inputs = inputs(71);
    let out = engine().run(&inputs, &CancelToken::new()).unwrap();

    let mut ids: Vec<i64> = inputs.transactions.iter().map(|t| t.customer_id).collect();
    ids.sort();
    ids.dedup();

    let rfm_ids: Vec<i64> = out.rfm.records().iter().map(|r| r.customer_id).collect();
    let clv_ids: Vec<i64> = out.clv.records().iter().map(|r| r.customer_id).collect();
    let table_ids: Vec<i64> = out.customers.rows().iter().map(|r| r.customer_id).collect();
    assert_eq!(rfm_ids, ids);
    assert_eq!(clv_ids, ids);
    assert_eq!(table_ids, ids);
    assert_eq!(out.uplift.len() + out.events_of("customer_unscored").len(), ids.len());
    assert_eq!(out.ranked.len(), out.uplift.len());
    assert_eq!(out.manifest.snapshot, snapshot());
}

/// Targets are eligible, inside the top-K of the full ranking, and keep
/// the ranking's order.
#[test]
fn targets_are_eligible_top_k_in_rank_order() {
    let out = engine().run(&inputs(72), &CancelToken::new()).unwrap();
    let fraction = EngineConfig::default_test().targeting.top_fraction;
    let k = top_k_count(out.ranked.len(), fraction);
    assert!(k > 0);

    let top: Vec<i64> = out.ranked.top(fraction).iter().map(|e| e.customer_id).collect();
    let eligible: HashSet<i64> = out.eligible.rows().iter().map(|r| r.customer_id).collect();

    let mut cursor = 0;
    for t in &out.targets {
        assert!(eligible.contains(&t.customer_id), "target {} is not eligible", t.customer_id);
        let pos = top[cursor..]
            .iter()
            .position(|id| *id == t.customer_id)
            .expect("target outside the top-K or out of order");
        cursor += pos + 1;
    }
    assert!(out.targets.len() <= k);
    let expected = top.iter().filter(|id| eligible.contains(id)).count();
    assert_eq!(out.targets.len(), expected);
}

#[test]
fn opted_out_customers_never_reach_the_target_list() {
    let inputs = inputs(73);
    let out = engine().run(&inputs, &CancelToken::new()).unwrap();

    let blocked: HashSet<i64> = inputs
        .profiles
        .iter()
        .filter(|p| p.opted_out == Some(true) || p.converted == Some(true))
        .map(|p| p.customer_id)
        .collect();
    assert!(!blocked.is_empty());
    assert!(out.targets.iter().all(|t| !blocked.contains(&t.customer_id)));
}

#[test]
fn events_are_tagged_with_their_stage() {
    let out = engine().run(&inputs(74), &CancelToken::new()).unwrap();

    assert!(matches!(out.events[0].event, PipelineEvent::RunStarted { .. }));
    assert_eq!(out.events[0].stage, "engine");
    for e in &out.events {
        match &e.event {
            PipelineEvent::BucketsReduced { .. } => assert_eq!(e.stage, "rfm"),
            PipelineEvent::ForecastDegraded { .. } | PipelineEvent::MonetaryFallback { .. } => {
                assert_eq!(e.stage, "clv")
            }
            PipelineEvent::CustomerUnscored { .. } => assert_eq!(e.stage, "uplift"),
            PipelineEvent::EligibilityFailed { .. } => assert_eq!(e.stage, "targeting"),
            PipelineEvent::StageCompleted { stage, .. } => assert_eq!(e.stage, stage.name()),
            _ => {}
        }
    }
    assert_eq!(out.events_of("stage_completed").len(), 4);
    assert!(out.events_of("model_fitted").len() >= 3);
}

#[test]
fn missing_profiles_are_reported_not_fatal() {
    let mut inputs = inputs(75);
    let dropped = inputs.profiles.remove(0).customer_id;
    let out = engine().run(&inputs, &CancelToken::new()).unwrap();

    assert!(out.eligible.get(dropped).is_none());
    assert!(out.events_of("eligibility_failed").iter().any(|e| matches!(
        e,
        PipelineEvent::EligibilityFailed { customer_id, .. } if *customer_id == dropped
    )));
}

#[test]
fn pre_cancelled_run_returns_cancelled() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = engine().run(&inputs(76), &cancel).unwrap_err();
    assert!(matches!(err, EngineError::Cancelled { .. }), "got {err:?}");
}

/// An uplift failure stops a CLV fit that would otherwise run to its
/// timeout, and the run reports the uplift failure.
#[test]
fn failing_stage_cancels_its_sibling() {
    let mut config = EngineConfig::default_test();
    let endless = FitConfig { max_iterations: usize::MAX, tolerance: -1.0, timeout_secs: 120 };
    config.clv.frequency_fit = endless.clone();
    config.clv.monetary_fit = endless;
    config.uplift.min_rows_per_arm = usize::MAX;

    let started = Instant::now();
    let err = ProfitEngine::new(config).run(&inputs(79), &CancelToken::new()).unwrap_err();

    assert!(matches!(err, EngineError::InsufficientData(_)), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(60), "took {:?}", started.elapsed());
}

#[test]
fn bad_transaction_aborts_the_run() {
    let mut inputs = inputs(77);
    inputs.transactions.push(Transaction::on_day(1, snapshot(), -5.0));
    let err = engine().run(&inputs, &CancelToken::new()).unwrap_err();
    assert!(matches!(err, EngineError::DataQuality(_)), "got {err:?}");
}

#[test]
fn fresh_runs_get_distinct_ids() {
    let inputs = inputs(78);
    let a = engine().run(&inputs, &CancelToken::new()).unwrap();
    let b = engine().run(&inputs, &CancelToken::new()).unwrap();
    assert_ne!(a.run_id(), b.run_id());
    assert_eq!(a.ranked, b.ranked);
}

#[test]
fn shipped_config_loads_and_validates() {
    let config = EngineConfig::load("../data").expect("data/ config loads");
    config.validate().unwrap();
    assert!(config.targeting.top_fraction > 0.0 && config.targeting.top_fraction <= 1.0);
}
