// src/algorithms/regression/lasso_lars_ic.rs
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::lars::{LarsPath, LarsPathResult};
use crate::core::{Result, ShapError};
use crate::utils::linalg;

/// Iteration cap per feature for the underlying lasso path.
const ITERATIONS_PER_FEATURE: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InformationCriterion {
    Aic,
    Bic,
}

/// Lasso model selection: compute the lasso path on centred data and keep
/// the step with the smallest information criterion.
#[derive(Debug, Clone, Copy)]
pub struct LassoLarsIc {
    criterion: InformationCriterion,
}

impl LassoLarsIc {
    pub fn new(criterion: InformationCriterion) -> Self {
        LassoLarsIc { criterion }
    }

    pub fn aic() -> Self {
        Self::new(InformationCriterion::Aic)
    }

    pub fn bic() -> Self {
        Self::new(InformationCriterion::Bic)
    }

    pub fn fit(&self, x: &ArrayView2<f64>, y: &ArrayView1<f64>) -> Result<LassoLarsIcResult> {
        let n_samples = x.nrows();
        if n_samples == 0 {
            return Err(ShapError::InvalidInput(
                "cannot select a lasso model without samples".to_string(),
            ));
        }
        if y.len() != n_samples {
            return Err(ShapError::IncompatibleDimensions(format!(
                "design has {} rows but {} observations",
                n_samples,
                y.len()
            )));
        }

        let x_mean = linalg::col_mean(x);
        let y_mean = y.sum() / n_samples as f64;
        let xc = linalg::sub_from_rows(x, &x_mean.view())?;
        let yc = y.mapv(|v| v - y_mean);

        let max_iter = ITERATIONS_PER_FEATURE * x.ncols().max(1);
        let path = LarsPath::lasso(max_iter).fit(&xc.view(), &yc.view())?;

        let k = match self.criterion {
            InformationCriterion::Aic => 2.0,
            InformationCriterion::Bic => (n_samples as f64).ln(),
        };
        let variance = yc.mapv(|v| v * v).sum() / n_samples as f64;

        // residuals of every step at once (sign flipped): one column per path step
        let residuals = xc.dot(&path.coefs.t()) - &yc.view().insert_axis(Axis(1));
        let criterion: Array1<f64> = residuals
            .axis_iter(Axis(1))
            .zip(path.coefs.outer_iter())
            .map(|(r, coef)| {
                let mse = r.mapv(|v| v * v).sum() / n_samples as f64;
                let dof = coef.iter().filter(|c| c.abs() > f64::EPSILON).count();
                n_samples as f64 * mse / (variance + f64::EPSILON) + k * dof as f64
            })
            .collect();

        let best_step = criterion
            .iter()
            .enumerate()
            .fold((0, f64::INFINITY), |best, (i, &c)| if c < best.1 { (i, c) } else { best })
            .0;
        let coefficients = path.coefs.row(best_step).to_owned();
        let intercept = y_mean - x_mean.dot(&coefficients);

        Ok(LassoLarsIcResult {
            coefficients,
            alpha: path.alphas[best_step],
            intercept,
            criterion,
            best_step,
            path,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LassoLarsIcResult {
    pub coefficients: Array1<f64>,
    pub alpha: f64,
    pub intercept: f64,
    /// Criterion value at every step of the path.
    pub criterion: Array1<f64>,
    pub best_step: usize,
    pub path: LarsPathResult,
}

impl LassoLarsIcResult {
    /// Features with a non-negligible coefficient at the chosen step.
    pub fn selected(&self) -> Vec<usize> {
        linalg::nonzero_indices(&self.coefficients, f64::EPSILON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn informative_and_noise(seed: u64) -> (Array2<f64>, Array1<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let small = Normal::new(0.0, 0.05).unwrap();
        let n = 200;
        let x = Array2::from_shape_fn((n, 2), |_| normal.sample(&mut rng));
        let y = Array1::from_shape_fn(n, |i| 3.0 * x[[i, 0]] + 1.0 + small.sample(&mut rng));
        (x, y)
    }

    #[test]
    fn aic_keeps_the_informative_column() {
        let (x, y) = informative_and_noise(42);
        let fit = LassoLarsIc::aic().fit(&x.view(), &y.view()).unwrap();
        assert_abs_diff_eq!(fit.coefficients[0], 3.0, epsilon = 0.05);
        assert_abs_diff_eq!(fit.coefficients[1], 0.0, epsilon = 0.05);
        assert_abs_diff_eq!(fit.intercept, 1.0, epsilon = 0.05);
        assert!(fit.selected().contains(&0));
    }

    #[test]
    fn bic_keeps_the_informative_column() {
        let (x, y) = informative_and_noise(7);
        let fit = LassoLarsIc::bic().fit(&x.view(), &y.view()).unwrap();
        assert_abs_diff_eq!(fit.coefficients[0], 3.0, epsilon = 0.05);
        assert_abs_diff_eq!(fit.coefficients[1], 0.0, epsilon = 0.05);
        assert_eq!(fit.criterion.len(), fit.path.n_iter + 1);
        let min = fit.criterion.iter().copied().fold(f64::INFINITY, f64::min);
        assert_eq!(fit.criterion[fit.best_step], min);
        assert_eq!(fit.alpha, fit.path.alphas[fit.best_step]);
    }

    #[test]
    fn empty_model_for_constant_target() {
        let (x, _) = informative_and_noise(3);
        let y = Array1::from_elem(x.nrows(), 5.0);
        let fit = LassoLarsIc::aic().fit(&x.view(), &y.view()).unwrap();
        assert!(fit.selected().is_empty());
        assert_abs_diff_eq!(fit.intercept, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn rejects_empty_input() {
        let x = Array2::<f64>::zeros((0, 2));
        let y = Array1::<f64>::zeros(0);
        assert!(LassoLarsIc::aic().fit(&x.view(), &y.view()).is_err());
    }
}
