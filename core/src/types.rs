//! Shared primitive types used across the entire engine.

/// A customer identifier. Matches the integer index used by the
/// artifact tables.
pub type CustomerId = i64;

/// The canonical pipeline run identifier.
pub type RunId = String;

/// Whole days. Recency, tenure and horizons are all measured in days.
pub type Days = i64;

/// Days per forecast month. Horizons given in months are converted with this.
pub const DAYS_PER_MONTH: f64 = 30.0;
