// src/utils/background.rs
use ndarray::Axis;
use rand::seq::index;
use rand::Rng;

use crate::core::{Dataset, Result, ShapError};

/// Shrinks a large reference dataset into a background set.
///
/// Every explanation evaluates the model on `|coalitions| x |background|`
/// synthetic rows, so a few dozen representative rows are usually enough.
pub struct BackgroundSelector;

impl BackgroundSelector {
    /// `n` distinct rows drawn uniformly at random, in their original order.
    pub fn random<R: Rng + ?Sized>(data: &Dataset, n: usize, rng: &mut R) -> Result<Dataset> {
        Self::check(data, n)?;
        let mut rows = index::sample(rng, data.nrows(), n).into_vec();
        rows.sort_unstable();
        Ok(data.select(Axis(0), &rows))
    }

    /// The first `n` rows.
    pub fn first(data: &Dataset, n: usize) -> Result<Dataset> {
        Self::check(data, n)?;
        let rows: Vec<usize> = (0..n).collect();
        Ok(data.select(Axis(0), &rows))
    }

    fn check(data: &Dataset, n: usize) -> Result<()> {
        if n == 0 {
            return Err(ShapError::InvalidInput(
                "a background needs at least one row".to_string(),
            ));
        }
        if n > data.nrows() {
            return Err(ShapError::InvalidInput(format!(
                "cannot select {} rows from a dataset with {}",
                n,
                data.nrows()
            )));
        }
        Ok(())
    }
}
