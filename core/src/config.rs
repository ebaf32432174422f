use crate::{quantile::MAX_BANDS, rfm_aggregator::Segment};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ── RFM scoring ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SmallPopulationPolicy {
    /// Use as many buckets as there are customers.
    ReduceBuckets,
    /// Refuse to score with InsufficientData.
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RfmConfig {
    pub bucket_count: usize,
    pub small_population: SmallPopulationPolicy,
    /// Customers per aggregation shard.
    pub shard_size: usize,
}

// ── Optimizer budget (shared by every fitted model) ────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub timeout_secs: u64,
}

// ── CLV forecasting ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClvConfig {
    /// End of the calibration window. None = the snapshot date.
    #[serde(default)]
    pub calibration_end: Option<NaiveDate>,
    pub discount_rate_monthly: f64,
    pub penalizer_coef: f64,
    pub frequency_fit: FitConfig,
    pub monetary_fit: FitConfig,
    /// Minimum repeat customers required to fit the monetary model.
    pub min_repeat_customers: usize,
    /// Average value used for everyone when the monetary model cannot be fit.
    #[serde(default)]
    pub fallback_mean: Option<f64>,
}

// ── Uplift modelling ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Recency,
    Frequency,
    LogMonetary,
    RScore,
    FScore,
    MScore,
}

impl FeatureKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Recency     => "recency",
            Self::Frequency   => "frequency",
            Self::LogMonetary => "log_monetary",
            Self::RScore      => "r_score",
            Self::FScore      => "f_score",
            Self::MScore      => "m_score",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpliftConfig {
    pub features: Vec<FeatureKind>,
    pub l2_penalty: f64,
    pub fit: FitConfig,
    pub min_rows_per_arm: usize,
}

// ── Targeting ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EligibilityConfig {
    pub exclude_opted_out: bool,
    pub exclude_converted: bool,
    #[serde(default)]
    pub exclude_segments: Vec<String>,
    #[serde(default)]
    pub max_recency_days: Option<i64>,
    #[serde(default)]
    pub min_clv_12m: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetingConfig {
    pub top_fraction: f64,
    pub eligibility: EligibilityConfig,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub rfm: RfmConfig,
    pub clv: ClvConfig,
    pub uplift: UpliftConfig,
    pub targeting: TargetingConfig,
}

impl EngineConfig {
    /// Load from the data/ directory.
    /// In tests, use EngineConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let rfm: RfmConfig = read_json(&format!("{data_dir}/rfm/rfm_config.json"))?;
        let clv: ClvConfig = read_json(&format!("{data_dir}/clv/clv_config.json"))?;
        let uplift: UpliftConfig = read_json(&format!("{data_dir}/uplift/uplift_config.json"))?;
        let targeting: TargetingConfig =
            read_json(&format!("{data_dir}/targeting/targeting_config.json"))?;

        let config = Self { rfm, clv, uplift, targeting };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a stage meaningless.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rfm.bucket_count == 0 {
            anyhow::bail!("rfm.bucket_count must be > 0");
        }
        if self.rfm.bucket_count > MAX_BANDS {
            anyhow::bail!(
                "rfm.bucket_count must be <= {MAX_BANDS}, got {}",
                self.rfm.bucket_count
            );
        }
        if self.rfm.shard_size == 0 {
            anyhow::bail!("rfm.shard_size must be > 0");
        }
        if self.clv.discount_rate_monthly < 0.0 {
            anyhow::bail!("clv.discount_rate_monthly must be >= 0");
        }
        if self.uplift.features.is_empty() {
            anyhow::bail!("uplift.features must name at least one feature");
        }
        if !(0.0..=1.0).contains(&self.targeting.top_fraction) {
            anyhow::bail!(
                "targeting.top_fraction must lie in [0, 1], got {}",
                self.targeting.top_fraction
            );
        }
        for label in &self.targeting.eligibility.exclude_segments {
            if Segment::from_label(label).is_none() {
                anyhow::bail!("targeting.eligibility.exclude_segments: unknown segment '{label}'");
            }
        }
        Ok(())
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            rfm: RfmConfig {
                bucket_count: 4,
                small_population: SmallPopulationPolicy::ReduceBuckets,
                shard_size: 64,
            },
            clv: ClvConfig {
                calibration_end: None,
                discount_rate_monthly: 0.01,
                penalizer_coef: 0.0,
                frequency_fit: FitConfig {
                    max_iterations: 5_000,
                    tolerance: 1e-10,
                    timeout_secs: 30,
                },
                monetary_fit: FitConfig {
                    max_iterations: 5_000,
                    tolerance: 1e-10,
                    timeout_secs: 30,
                },
                min_repeat_customers: 5,
                fallback_mean: None,
            },
            uplift: UpliftConfig {
                features: vec![
                    FeatureKind::Recency,
                    FeatureKind::Frequency,
                    FeatureKind::LogMonetary,
                ],
                l2_penalty: 1e-3,
                fit: FitConfig {
                    max_iterations: 100,
                    tolerance: 1e-8,
                    timeout_secs: 30,
                },
                min_rows_per_arm: 10,
            },
            targeting: TargetingConfig {
                top_fraction: 0.2,
                eligibility: EligibilityConfig {
                    exclude_opted_out: true,
                    exclude_converted: true,
                    exclude_segments: Vec::new(),
                    max_recency_days: None,
                    min_clv_12m: None,
                },
            },
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
    serde_json::from_str(&content).map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))
}
