//! Deterministic random number generation for synthetic data.
//!
//! RULE: the pipeline itself never draws random numbers.
//! Only the synthetic generator does, and all of its randomness flows
//! through StreamRng instances derived from a single master seed.
//!
//! Each kind of synthetic data gets its own stream, seeded from
//! (master_seed XOR slot index). This means:
//!   - Adding a new stream never changes existing streams.
//!   - Each stream is fully reproducible in isolation.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

/// A named, deterministic RNG for one synthetic data stream.
pub struct StreamRng {
    pub name: &'static str,
    inner: Pcg64Mcg,
}

impl StreamRng {
    /// The slot index must never change once assigned.
    pub fn new(master_seed: u64, slot_index: u64) -> Self {
        let derived_seed = master_seed ^ (slot_index.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self {
            name: "unnamed",
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        self.inner.gen::<f64>()
    }

    /// Roll an integer in [lo, hi).
    pub fn range(&mut self, lo: i64, hi: i64) -> i64 {
        self.inner.gen_range(lo..hi)
    }

    /// Bernoulli trial: returns true with probability p.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    /// Exponential waiting time with the given rate.
    pub fn exponential(&mut self, rate: f64) -> f64 {
        let u = self.next_f64().max(1e-300);
        -u.ln() / rate
    }

    /// Standard normal via Box-Muller.
    pub fn normal(&mut self) -> f64 {
        let u1 = self.next_f64().max(1e-300);
        let u2 = self.next_f64();
        (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }

    /// Gamma(shape, scale) by Marsaglia-Tsang. Shapes below 1 are
    /// boosted by one and corrected with a uniform power.
    pub fn gamma(&mut self, shape: f64, scale: f64) -> f64 {
        if shape < 1.0 {
            let u = self.next_f64().max(1e-300);
            return self.gamma(shape + 1.0, scale) * u.powf(1.0 / shape);
        }
        let d = shape - 1.0 / 3.0;
        let c = 1.0 / (9.0 * d).sqrt();
        loop {
            let z = self.normal();
            let v = (1.0 + c * z).powi(3);
            if v <= 0.0 {
                continue;
            }
            let u = self.next_f64().max(1e-300);
            if u.ln() < 0.5 * z * z + d - d * v + d * v.ln() {
                return d * v * scale;
            }
        }
    }

    /// Beta(a, b) as a ratio of gammas.
    pub fn beta(&mut self, a: f64, b: f64) -> f64 {
        let x = self.gamma(a, 1.0);
        let y = self.gamma(b, 1.0);
        x / (x + y)
    }
}

/// All synthetic streams for one seed, indexed by stable slot.
pub struct RngBank {
    master_seed: u64,
}

impl RngBank {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn for_stream(&self, slot: StreamSlot) -> StreamRng {
        StreamRng::new(self.master_seed, slot as u64).with_name(slot.name())
    }
}

/// Stable stream slot assignments.
/// NEVER reorder or remove entries. Only append.
/// Reordering changes every stream's seed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum StreamSlot {
    Behaviour = 0,
    Purchases = 1,
    Amounts = 2,
    Campaign = 3,
    Profiles = 4,
}

impl StreamSlot {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Behaviour => "behaviour",
            Self::Purchases => "purchases",
            Self::Amounts => "amounts",
            Self::Campaign => "campaign",
            Self::Profiles => "profiles",
        }
    }
}
