// src/utils/random_choice.rs
use rand::Rng;

use crate::core::{Result, ShapError};

/// Draws items with replacement, proportionally to fixed weights.
///
/// Construction builds a cumulative-weight table; every draw is one uniform
/// number plus an upper-bound binary search, `O(log k)` for `k` items.
#[derive(Debug, Clone)]
pub struct RandomChoice<T> {
    items: Vec<T>,
    cumulative: Vec<f64>,
}

impl<T: Clone> RandomChoice<T> {
    pub fn new(items: Vec<T>, weights: Vec<f64>) -> Result<Self> {
        if items.len() != weights.len() {
            return Err(ShapError::IncompatibleDimensions(format!(
                "{} items but {} weights",
                items.len(),
                weights.len()
            )));
        }
        if items.is_empty() {
            return Err(ShapError::InvalidInput(
                "cannot choose from an empty list".to_string(),
            ));
        }
        if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(ShapError::InvalidInput(format!(
                "weights must be finite and non-negative, got {}",
                bad
            )));
        }

        let mut total = 0.0;
        let cumulative: Vec<f64> = weights
            .iter()
            .map(|w| {
                total += w;
                total
            })
            .collect();
        if total <= 0.0 {
            return Err(ShapError::ArithmeticError(
                "weights sum to zero".to_string(),
            ));
        }
        Ok(RandomChoice { items, cumulative })
    }

    /// Every item equally likely.
    pub fn uniform(items: Vec<T>) -> Result<Self> {
        let weights = vec![1.0; items.len()];
        Self::new(items, weights)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// One draw.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> T {
        let total = self.cumulative[self.cumulative.len() - 1];
        let target = rng.gen::<f64>() * total;
        // first index whose cumulative weight is strictly above the target
        let idx = self
            .cumulative
            .partition_point(|c| *c <= target)
            .min(self.items.len() - 1);
        self.items[idx].clone()
    }

    /// `n` independent draws with replacement.
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<T> {
        (0..n).map(|_| self.choose(rng)).collect()
    }
}
