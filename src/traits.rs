// src/traits.rs
use ndarray::Array2;

use crate::core::{Dataset, Result};

/// A model that can be explained.
///
/// `predict` receives a batch of feature rows and returns one output row per
/// input row. The number of output columns must not change between calls.
/// Implementations are shared across executor threads, hence `Sync`.
pub trait PredictModel: Sync {
    fn predict(&self, inputs: &Dataset) -> Result<Array2<f64>>;
}

impl<F> PredictModel for F
where
    F: Fn(&Dataset) -> Result<Array2<f64>> + Sync,
{
    fn predict(&self, inputs: &Dataset) -> Result<Array2<f64>> {
        self(inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Axis};

    struct RowSum;

    impl PredictModel for RowSum {
        fn predict(&self, inputs: &Dataset) -> Result<Array2<f64>> {
            Ok(inputs.sum_axis(Axis(1)).insert_axis(Axis(1)))
        }
    }

    fn predict_with<M: PredictModel>(model: &M, inputs: &Dataset) -> Result<Array2<f64>> {
        model.predict(inputs)
    }

    #[test]
    fn structs_and_closures_are_models() {
        let inputs = array![[1.0, 2.0], [3.0, 4.0]];
        let doubled = |x: &Dataset| -> Result<Array2<f64>> { Ok(x.mapv(|v| 2.0 * v)) };

        assert_eq!(predict_with(&RowSum, &inputs).unwrap(), array![[3.0], [7.0]]);
        assert_eq!(
            predict_with(&doubled, &inputs).unwrap(),
            array![[2.0, 4.0], [6.0, 8.0]]
        );
    }
}
