use profit_engine_core::{
    input::{Arm, CampaignRecord},
    targeting_ranker::{observed_qini, rank, top_k_count, RankedTable},
    uplift_modeler::{UpliftRecord, UpliftTable},
};

// ── Helpers ──────────────────────────────────────────────────────────────────

/// One customer per uplift value, ids 1.., all with p_ctrl 0.4.
fn table_with_uplifts(uplifts: &[f64]) -> UpliftTable {
    UpliftTable::from_records(
        uplifts
            .iter()
            .enumerate()
            .map(|(i, u)| UpliftRecord {
                customer_id: i as i64 + 1,
                p_treat:     0.4 + u,
                p_ctrl:      0.4,
            })
            .collect(),
    )
}

fn scenario_uplifts() -> Vec<f64> {
    vec![0.30, 0.25, 0.20, 0.15, 0.10, 0.05, 0.02, 0.0, -0.02, -0.05]
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// Ten customers with uplift 0.30 down to −0.05: the top row is the 0.30
/// customer at 10 percent, and the top 20 percent holds exactly two.
#[test]
fn ten_customer_ranking_and_top_fifth() {
    // Shuffle ids against uplift so the sort does real work.
    let mut uplifts = scenario_uplifts();
    uplifts.reverse();
    let ranked = rank(&table_with_uplifts(&uplifts));

    let first = &ranked.entries()[0];
    assert_eq!(first.customer_id, 10, "customer with uplift 0.30");
    assert!((first.uplift - 0.30).abs() < 1e-12);
    assert_eq!(first.percent, 10.0);
    assert_eq!(first.rank, 1);

    assert_eq!(ranked.top(0.2).len(), 2);
    assert_eq!(ranked.entries().last().unwrap().percent, 100.0);
}

#[test]
fn percent_strictly_increases_within_bounds() {
    let ranked = rank(&table_with_uplifts(&[0.1, -0.2, 0.3, 0.0, 0.05, 0.05, -0.01]));
    let percents: Vec<f64> = ranked.entries().iter().map(|e| e.percent).collect();

    assert!(percents.windows(2).all(|w| w[0] < w[1]), "{percents:?}");
    assert!(percents.iter().all(|p| (0.0..=100.0).contains(p)));
}

#[test]
fn equal_uplift_is_ordered_by_ascending_id() {
    let ranked = rank(&table_with_uplifts(&[0.1, 0.2, 0.1, 0.2, 0.1]));
    let ids: Vec<i64> = ranked.entries().iter().map(|e| e.customer_id).collect();
    assert_eq!(ids, vec![2, 4, 1, 3, 5]);
}

#[test]
fn ranked_uplift_matches_probabilities_exactly() {
    let ranked = rank(&table_with_uplifts(&scenario_uplifts()));
    for e in ranked.entries() {
        assert_eq!(e.uplift, e.p_treat - e.p_ctrl);
    }
}

#[test]
fn incremental_response_rises_through_positive_prefix() {
    let ranked = rank(&table_with_uplifts(&scenario_uplifts()));
    let positive: Vec<f64> = ranked
        .entries()
        .iter()
        .take_while(|e| e.uplift > 0.0)
        .map(|e| e.incremental_resp)
        .collect();

    assert_eq!(positive.len(), 7);
    assert!(positive.windows(2).all(|w| w[1] >= w[0]), "{positive:?}");

    // After the negative tail the curve ends at the population total.
    let last = ranked.entries().last().unwrap();
    assert!((last.incremental_resp - ranked.total_uplift()).abs() < 1e-12);
    assert!((last.random_baseline - ranked.total_uplift()).abs() < 1e-12);
}

#[test]
fn good_ranking_beats_random_baseline() {
    let ranked = rank(&table_with_uplifts(&scenario_uplifts()));
    for e in ranked.entries() {
        assert!(e.incremental_resp >= e.random_baseline - 1e-12, "rank {}", e.rank);
    }
    assert!(ranked.qini_coefficient() > 0.0);
}

#[test]
fn top_k_is_floor_of_fraction_times_population() {
    for n in [0usize, 1, 4, 5, 9, 10, 11, 99, 1000] {
        let uplifts: Vec<f64> = (0..n).map(|i| i as f64 / 1000.0).collect();
        let ranked = rank(&table_with_uplifts(&uplifts));
        let expected = (0.2 * n as f64).floor() as usize;
        assert_eq!(ranked.top(0.2).len(), expected, "n = {n}");
        assert_eq!(top_k_count(n, 0.2), expected);
    }
}

#[test]
fn empty_population_ranks_to_empty_table() {
    let ranked: RankedTable = rank(&UpliftTable::from_records(Vec::new()));
    assert!(ranked.is_empty());
    assert_eq!(ranked.qini_coefficient(), 0.0);
    assert!(ranked.top(0.5).is_empty());
}

/// Treated responders concentrated at the top of the ranking show up as
/// realised lift on the observed curve.
#[test]
fn observed_qini_counts_realised_lift() {
    let ranked = rank(&table_with_uplifts(&[0.4, 0.3, 0.2, 0.1]));
    let campaign = vec![
        CampaignRecord { customer_id: 1, arm: Arm::Treatment, responded: true },
        CampaignRecord { customer_id: 2, arm: Arm::Control,   responded: false },
        CampaignRecord { customer_id: 3, arm: Arm::Treatment, responded: false },
        CampaignRecord { customer_id: 4, arm: Arm::Control,   responded: true },
    ];

    let curve = observed_qini(&ranked, &campaign).unwrap();
    let incremental: Vec<f64> = curve.iter().map(|p| p.incremental).collect();
    // 1 − 0, 1 − 0·1/1, 1 − 0·2/1, 1 − 1·2/2
    assert_eq!(incremental, vec![1.0, 1.0, 1.0, 0.0]);
    assert_eq!(curve.last().unwrap().treated, 2);
    assert_eq!(curve.last().unwrap().controls, 2);
}

#[test]
fn observed_qini_skips_customers_outside_the_campaign() {
    let ranked = rank(&table_with_uplifts(&[0.4, 0.3, 0.2]));
    let campaign = vec![CampaignRecord { customer_id: 2, arm: Arm::Treatment, responded: true }];

    let curve = observed_qini(&ranked, &campaign).unwrap();
    assert_eq!(curve.len(), 1);
    assert_eq!(curve[0].rank, 2);
}
