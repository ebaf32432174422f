//! engine-runner: headless batch runner for the profitability engine.
//!
//! Usage:
//!   engine-runner --seed 12345 --customers 5000 --db run.db
//!   engine-runner --input inputs.json --snapshot 2024-06-30 --db run.db
//!   engine-runner --seed 7 --customer 1042
//!
//! Without --input, inputs come from the seeded synthetic generator.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use profit_engine_core::{
    artifacts::RunArtifacts,
    cancel::CancelToken,
    config::EngineConfig,
    engine::{PipelineInputs, ProfitEngine},
    store::{ArtifactStore, ArtifactTable},
    synthetic::{self, SyntheticConfig},
};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let customers = parse_arg(&args, "--customers", 2_000usize);
    let db = flag_value(&args, "--db").unwrap_or(":memory:");
    let data_dir = flag_value(&args, "--data-dir").unwrap_or("./data");
    let input = flag_value(&args, "--input");
    let snapshot = flag_value(&args, "--snapshot")
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .with_context(|| format!("--snapshot '{s}' is not YYYY-MM-DD"))
        })
        .transpose()?;

    println!("Customer profitability engine: engine-runner");
    println!("  data_dir:  {data_dir}");
    println!("  db:        {db}");
    match input {
        Some(path) => println!("  input:     {path}"),
        None => {
            println!("  seed:      {seed}");
            println!("  customers: {customers}");
        }
    }
    println!();

    let config = EngineConfig::load(data_dir)?;
    let inputs = match input {
        Some(path) => load_inputs(path, snapshot)?,
        None => {
            let snapshot = snapshot.unwrap_or_else(|| {
                let today = chrono::Local::now().date_naive();
                log::warn!("no --snapshot given, using today ({today})");
                today
            });
            synthetic::generate(seed, &SyntheticConfig::new(customers, snapshot))
        }
    };

    let mut store = ArtifactStore::open(db)?;
    store.migrate()?;

    let engine = ProfitEngine::new(config);
    let artifacts = engine.run(&inputs, &CancelToken::new())?;
    store.commit_run(&artifacts)?;

    print_summary(&artifacts, &store)?;
    if let Some(id) = flag_value(&args, "--customer") {
        print_customer(&artifacts, id)?;
    }
    Ok(())
}

/// Read a JSON PipelineInputs file. --snapshot overrides the file's date.
fn load_inputs(path: &str, snapshot: Option<NaiveDate>) -> Result<PipelineInputs> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Cannot read {path}"))?;
    let mut inputs: PipelineInputs =
        serde_json::from_str(&content).with_context(|| format!("Cannot parse {path}"))?;
    if let Some(snapshot) = snapshot {
        inputs.snapshot = snapshot;
    }
    Ok(inputs)
}

fn print_summary(a: &RunArtifacts, store: &ArtifactStore) -> Result<()> {
    let run_id = a.run_id();
    println!("=== RUN SUMMARY ===");
    println!("  run_id:          {run_id}");
    println!("  snapshot:        {}", a.manifest.snapshot);
    println!("  calibration end: {}", a.manifest.calibration_end);
    println!("  customers:       {}", a.customers.len());
    println!("  rfm buckets:     {}", a.manifest.bucket_count);
    println!("  eligible:        {}", a.eligible.len());
    println!("  targets:         {}", a.targets.len());
    println!("  events logged:   {}", store.row_count(ArtifactTable::EventLog, run_id)?);

    let ov = a.overview();
    println!();
    println!("=== OVERVIEW ===");
    println!("  total customers: {}", ov.total_customers);
    println!("  total monetary:  {:.2}", ov.total_monetary);
    match ov.mean_clv_12m {
        Some(mean) => println!("  mean CLV 12m:    {mean:.2} ({} null)", ov.null_clv_12m),
        None => println!("  mean CLV 12m:    n/a (all null)"),
    }

    println!();
    println!("=== SEGMENTS ===");
    let by_value = a.mean_clv_12m_by_segment();
    for c in a.segment_counts() {
        let mean = by_value
            .iter()
            .find(|v| v.segment == c.segment)
            .and_then(|v| v.mean_clv_12m)
            .map_or_else(|| "n/a".to_string(), |m| format!("{m:.2}"));
        println!("  {:<18} {:>6} customers | mean CLV 12m {mean}", c.segment.label(), c.customers);
    }

    println!();
    println!("=== R x F GRID ===");
    let grid = a.rf_grid();
    let header: String = (1..=grid.bucket_count).map(|f| format!("{:>6}", format!("F{f}"))).collect();
    println!("      {header}");
    for (r, row) in grid.rows().iter().enumerate() {
        let cells: String = row.iter().map(|n| format!("{n:>6}")).collect();
        println!("  R{:<3}{cells}", r + 1);
    }

    println!();
    println!("=== MODELS ===");
    let f = &a.clv_models.frequency.params;
    println!("  bgnbd:       r={:.4} alpha={:.4} a={:.4} b={:.4}", f.r, f.alpha, f.a, f.b);
    println!(
        "  monetary:    population mean {:.2}",
        a.clv_models.monetary.population_mean()
    );
    for m in [&a.uplift_models.treat, &a.uplift_models.control] {
        println!(
            "  {:<18} rows={} responders={} rate={:.3}",
            m.model_name(),
            m.summary.rows,
            m.summary.responders,
            m.summary.response_rate
        );
    }

    println!();
    println!("=== UPLIFT ===");
    println!("  predicted incremental (all): {:.2}", a.ranked.total_uplift());
    println!("  qini coefficient:            {:.4}", a.ranked.qini_coefficient());
    if let Some(last) = a.observed_qini.last() {
        println!("  observed incremental (all):  {:.2}", last.incremental);
    }
    println!();
    println!("  top targets:");
    for t in a.targets.iter().take(10) {
        println!(
            "    {:>8} | uplift {:+.4} | p_treat {:.4} | p_ctrl {:.4}",
            t.customer_id,
            t.uplift,
            t.p_treat,
            t.p_ctrl
        );
    }
    Ok(())
}

fn print_customer(a: &RunArtifacts, id: &str) -> Result<()> {
    let customer_id: i64 = id.parse().with_context(|| format!("--customer '{id}' is not an id"))?;
    println!();
    println!("=== CUSTOMER {customer_id} ===");
    match a.customer(customer_id) {
        Some(row) => println!("{}", serde_json::to_string_pretty(row)?),
        None => println!("  not in this run"),
    }
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
