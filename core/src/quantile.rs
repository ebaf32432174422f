//! Rank-based quantile bucketing.
//!
//! Customers are ordered by (value, customer_id). The position in that
//! order is the rank, and bands are cut over ranks rather than values,
//! so equal values never collapse bands and band sizes differ by at most one.

use crate::types::CustomerId;
use std::cmp::Ordering;

/// Scores are stored as u8, so no more bands than this.
pub const MAX_BANDS: usize = u8::MAX as usize;

/// Band boundaries over ranks 0..population.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantileBands {
    /// Exclusive upper rank bound of each band, strictly increasing.
    upper_bounds: Vec<usize>,
}

impl QuantileBands {
    /// Requires `0 < bands <= population` and `bands <= MAX_BANDS`.
    pub fn new(population: usize, bands: usize) -> Self {
        assert!(bands > 0 && bands <= population, "bands must be in 1..=population");
        assert!(bands <= MAX_BANDS, "bands must fit a u8 score");
        let upper_bounds = (1..=bands).map(|k| k * population / bands).collect();
        Self { upper_bounds }
    }

    pub fn band_count(&self) -> usize {
        self.upper_bounds.len()
    }

    /// Zero-based band for a zero-based rank.
    pub fn band_of(&self, rank: usize) -> usize {
        self.upper_bounds.partition_point(|&ub| ub <= rank)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Larger values earn higher scores.
    HigherIsBetter,
    /// Smaller values earn higher scores (recency).
    LowerIsBetter,
}

/// Score every (customer, value) pair into 1..=bands.
/// Output is in the same order as the input.
pub fn quantile_scores(values: &[(CustomerId, f64)], bands: usize, direction: Direction) -> Vec<u8> {
    if values.is_empty() {
        return Vec::new();
    }
    let quantiles = QuantileBands::new(values.len(), bands);

    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&i, &j| {
        let (id_i, v_i) = values[i];
        let (id_j, v_j) = values[j];
        match v_i.total_cmp(&v_j) {
            Ordering::Equal => id_i.cmp(&id_j),
            other => other,
        }
    });

    let mut scores = vec![0u8; values.len()];
    for (rank, &idx) in order.iter().enumerate() {
        let band = quantiles.band_of(rank);
        scores[idx] = match direction {
            Direction::HigherIsBetter => (band + 1) as u8,
            Direction::LowerIsBetter  => (quantiles.band_count() - band) as u8,
        };
    }
    scores
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_are_as_equal_as_possible() {
        let bands = QuantileBands::new(10, 4);
        let mut sizes = [0usize; 4];
        for rank in 0..10 {
            sizes[bands.band_of(rank)] += 1;
        }
        assert_eq!(sizes.iter().sum::<usize>(), 10);
        let max = *sizes.iter().max().unwrap();
        let min = *sizes.iter().min().unwrap();
        assert!(max - min <= 1, "band sizes {sizes:?} differ by more than one");
    }

    #[test]
    fn ties_split_by_customer_id() {
        let values = vec![(4, 1.0), (3, 1.0), (2, 1.0), (1, 1.0)];
        let scores = quantile_scores(&values, 4, Direction::HigherIsBetter);
        // Lower id ranks first among equal values.
        assert_eq!(scores, vec![4, 3, 2, 1]);
    }

    #[test]
    fn lower_is_better_inverts_scores() {
        let values = vec![(1, 5.0), (2, 50.0), (3, 500.0)];
        let scores = quantile_scores(&values, 3, Direction::LowerIsBetter);
        assert_eq!(scores, vec![3, 2, 1]);
    }
}
