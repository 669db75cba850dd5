// src/algorithms/regression/wlr.rs
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::core::{Result, ShapError};
use crate::utils::linalg;

/// Weighted least squares via the normal equations `(XᵀWX)β = XᵀWy`.
///
/// Coefficient inference uses a Student's t-distribution with
/// `samples - parameters` degrees of freedom.
#[derive(Debug, Clone, Copy)]
pub struct WeightedLinearRegression {
    intercept: bool,
    require_variance: bool,
}

impl Default for WeightedLinearRegression {
    fn default() -> Self {
        WeightedLinearRegression {
            intercept: true,
            require_variance: false,
        }
    }
}

impl WeightedLinearRegression {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit an extra constant term, reported separately as the intercept.
    pub fn intercept(mut self, intercept: bool) -> Self {
        self.intercept = intercept;
        self
    }

    /// Fail with an arithmetic error when the observations carry no
    /// variance (total sum of squares of zero).
    pub fn require_variance(mut self, require: bool) -> Self {
        self.require_variance = require;
        self
    }

    pub fn fit(
        &self,
        x: &ArrayView2<f64>,
        y: &ArrayView1<f64>,
        weights: &ArrayView1<f64>,
    ) -> Result<WlrResults> {
        let n = x.nrows();
        if y.len() != n || weights.len() != n {
            return Err(ShapError::IncompatibleDimensions(format!(
                "design has {} rows, observations {}, weights {}",
                n,
                y.len(),
                weights.len()
            )));
        }
        if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(ShapError::InvalidInput(format!(
                "sample weights must be finite and non-negative, got {}",
                w
            )));
        }
        let weight_sum = weights.sum();
        if weight_sum == 0.0 {
            return Err(ShapError::ArithmeticError(
                "sample weights sum to zero".to_string(),
            ));
        }

        let design = if self.intercept {
            let ones = Array2::<f64>::ones((n, 1));
            ndarray::concatenate(Axis(1), &[x.view(), ones.view()])?
        } else {
            x.to_owned()
        };
        let p = design.ncols();

        let (xtwx, xtwy) = linalg::weighted_gram_vec(&design.view(), weights, y)?;
        let xtwx_inv = linalg::safe_invert(&xtwx.view())?;
        let beta = xtwx_inv.dot(&xtwy);

        let residuals = y - &design.dot(&beta);
        let sse: f64 = residuals
            .iter()
            .zip(weights.iter())
            .map(|(r, w)| w * r * r)
            .sum();
        let mse = sse / weight_sum;

        let centre = if self.intercept {
            y.iter().zip(weights.iter()).map(|(v, w)| v * w).sum::<f64>() / weight_sum
        } else {
            0.0
        };
        let tss: f64 = y
            .iter()
            .zip(weights.iter())
            .map(|(v, w)| w * (v - centre) * (v - centre))
            .sum();
        if self.require_variance && tss == 0.0 {
            return Err(ShapError::ArithmeticError(
                "observations have zero total sum of squares".to_string(),
            ));
        }
        let r_squared = if tss > 0.0 { Some(1.0 - sse / tss) } else { None };

        let dof = n as i64 - p as i64;
        let (std_errors, p_values) = if dof > 0 {
            let sigma2 = sse / dof as f64;
            let se: Array1<f64> = xtwx_inv
                .diag()
                .mapv(|d| (sigma2 * d).max(0.0).sqrt());
            let t_dist = students_t(dof)?;
            let p_values = beta
                .iter()
                .zip(se.iter())
                .map(|(&b, &s)| two_sided_p_value(&t_dist, b, s))
                .collect::<Array1<f64>>();
            (se, p_values)
        } else {
            (Array1::from_elem(p, f64::NAN), Array1::from_elem(p, f64::NAN))
        };

        let (coefficients, intercept, intercept_std_error) = if self.intercept {
            (
                beta.slice(s![..p - 1]).to_owned(),
                beta[p - 1],
                Some(std_errors[p - 1]),
            )
        } else {
            (beta, 0.0, None)
        };
        let k = coefficients.len();

        Ok(WlrResults {
            coefficients,
            intercept,
            mse,
            std_errors: std_errors.slice(s![..k]).to_owned(),
            intercept_std_error,
            p_values: p_values.slice(s![..k]).to_owned(),
            dof,
            r_squared,
        })
    }
}

fn students_t(dof: i64) -> Result<StudentsT> {
    StudentsT::new(0.0, 1.0, dof as f64)
        .map_err(|e| ShapError::ArithmeticError(format!("t-distribution with {} dof: {}", dof, e)))
}

fn two_sided_p_value(t_dist: &StudentsT, coef: f64, se: f64) -> f64 {
    if se == 0.0 {
        return if coef == 0.0 { 1.0 } else { 0.0 };
    }
    let t = (coef / se).abs();
    (2.0 * (1.0 - t_dist.cdf(t))).clamp(0.0, 1.0)
}

/// Output of [`WeightedLinearRegression::fit`].
#[derive(Debug, Clone)]
pub struct WlrResults {
    pub coefficients: Array1<f64>,
    /// Zero when fitted without an intercept.
    pub intercept: f64,
    /// Weighted mean squared residual, `Σ wᵢrᵢ² / Σ wᵢ`.
    pub mse: f64,
    pub std_errors: Array1<f64>,
    pub intercept_std_error: Option<f64>,
    pub p_values: Array1<f64>,
    /// Residual degrees of freedom; non-positive values leave the
    /// standard errors and p-values undefined (NaN).
    pub dof: i64,
    pub r_squared: Option<f64>,
}

impl WlrResults {
    /// Confidence radius of every coefficient at significance level `alpha`:
    /// `stdError · t(1 - alpha/2, dof)`.
    pub fn conf(&self, alpha: f64) -> Result<Array1<f64>> {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(ShapError::InvalidInput(format!(
                "significance level must lie in (0, 1), got {}",
                alpha
            )));
        }
        if self.dof <= 0 {
            return Ok(Array1::from_elem(self.coefficients.len(), f64::NAN));
        }
        let quantile = students_t(self.dof)?.inverse_cdf(1.0 - alpha / 2.0);
        Ok(self.std_errors.mapv(|se| se * quantile))
    }

    /// Fitted values for the rows of `x`, intercept included.
    pub fn predict(&self, x: &ArrayView2<f64>) -> Array1<f64> {
        x.dot(&self.coefficients) + self.intercept
    }
}
