// src/algorithms/regression/lars.rs

//! Least Angle Regression and its Lasso modification.
//!
//! Computes the whole regularisation path: starting from the empty model,
//! features enter the active set in order of their correlation with the
//! residual, and coefficients move along the equiangular direction of the
//! active set. In Lasso mode a coefficient that would cross zero is removed
//! from the active set at the crossing point instead.
//!
//! The Gram matrix of the active set is never formed; its Cholesky factor is
//! grown one row at a time and downdated with Givens rotations on a drop.
//! Design columns are permuted in place so that the active features always
//! occupy the leading columns of the working copy.

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};

use crate::core::{Result, ShapError};
use crate::utils::linalg;

/// Diagonal pivots below this mark a regressor as linearly dependent on the
/// active set.
const DEGENERATE_PIVOT: f64 = 1e-7;
/// Correlations are rounded to this many decimals before comparisons.
const COV_PRECISION: i32 = 16;
/// Attempts at regularising an ill-conditioned factor before giving up.
const MAX_REGULARIZATION_ROUNDS: i32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LarsMethod {
    Lar,
    Lasso,
}

/// Configuration of one path computation.
#[derive(Debug, Clone, Copy)]
pub struct LarsPath {
    max_iter: usize,
    method: LarsMethod,
    alpha_min: f64,
}

impl LarsPath {
    pub fn new(max_iter: usize, method: LarsMethod) -> Self {
        LarsPath {
            max_iter,
            method,
            alpha_min: 0.0,
        }
    }

    pub fn lar(max_iter: usize) -> Self {
        Self::new(max_iter, LarsMethod::Lar)
    }

    pub fn lasso(max_iter: usize) -> Self {
        Self::new(max_iter, LarsMethod::Lasso)
    }

    /// Stop once the correlation threshold falls to `alpha_min`; the final
    /// coefficients are interpolated to that exact point.
    pub fn alpha_min(mut self, alpha_min: f64) -> Self {
        self.alpha_min = alpha_min;
        self
    }

    pub fn fit(&self, x: &ArrayView2<f64>, y: &ArrayView1<f64>) -> Result<LarsPathResult> {
        if x.nrows() != y.len() {
            return Err(ShapError::IncompatibleDimensions(format!(
                "design has {} rows but {} observations",
                x.nrows(),
                y.len()
            )));
        }
        if x.nrows() == 0 {
            return Err(ShapError::InvalidInput(
                "cannot compute a LARS path without samples".to_string(),
            ));
        }
        if self.alpha_min < 0.0 || !self.alpha_min.is_finite() {
            return Err(ShapError::InvalidInput(format!(
                "alpha_min must be finite and non-negative, got {}",
                self.alpha_min
            )));
        }
        LarsState::new(self, x, y).run()
    }
}

/// What happened to the active set in one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LarsStep {
    /// Feature that entered the active set, if any.
    pub added: Option<usize>,
    /// Features removed because their coefficient crossed zero.
    pub dropped: Vec<usize>,
    /// Active set size once the iteration completed.
    pub n_active: usize,
}

/// A computed path. Row `k` of `coefs` holds the coefficients at `alphas[k]`.
#[derive(Debug, Clone)]
pub struct LarsPathResult {
    pub alphas: Array1<f64>,
    /// Active features at the end of the path, in order of entry. A lasso
    /// path stopped by an increasing alpha keeps the feature that entered on
    /// the final iteration, with a zero coefficient.
    pub active: Vec<usize>,
    /// `(n_iter + 1) x n_features`
    pub coefs: Array2<f64>,
    pub n_iter: usize,
    pub steps: Vec<LarsStep>,
    /// Regressors skipped as linearly dependent on the active set, in the
    /// order they were found. None of them ever enters `active`.
    pub degenerate: Vec<usize>,
}

impl LarsPathResult {
    /// Coefficients at the end of the path.
    pub fn final_coefs(&self) -> Array1<f64> {
        self.coefs.row(self.coefs.nrows() - 1).to_owned()
    }
}

/// Per-fit working state. Owned by a single call to [`LarsPath::fit`].
struct LarsState {
    method: LarsMethod,
    max_iter: usize,
    alpha_min: f64,
    n_samples: usize,
    n_features: usize,
    max_features: usize,
    /// Working copy of the design; columns `0..n_active` are the active set.
    x: Array2<f64>,
    y: Array1<f64>,
    /// Correlations of the inactive columns `n_active..` with the residual.
    cov: Vec<f64>,
    /// Original feature index of each working column.
    indices: Vec<usize>,
    active: Vec<usize>,
    sign_active: Vec<f64>,
    /// Lower Cholesky factor of the active Gram matrix.
    l: Array2<f64>,
    n_active: usize,
    /// Indexed by original feature; set once a regressor is found to be
    /// linearly dependent on the active set.
    degenerate: Vec<bool>,
    skipped: Vec<usize>,
    coefs: Array2<f64>,
    alphas: Array1<f64>,
    n_iter: usize,
    steps: Vec<LarsStep>,
}

impl LarsState {
    fn new(config: &LarsPath, x: &ArrayView2<f64>, y: &ArrayView1<f64>) -> Self {
        let (n_samples, n_features) = x.dim();
        let max_features = config.max_iter.min(n_features);
        let cov = x.t().dot(y).to_vec();
        LarsState {
            method: config.method,
            max_iter: config.max_iter,
            alpha_min: config.alpha_min,
            n_samples,
            n_features,
            max_features,
            x: x.to_owned(),
            y: y.to_owned(),
            cov,
            indices: (0..n_features).collect(),
            active: Vec::with_capacity(max_features),
            sign_active: vec![0.0; max_features],
            l: Array2::zeros((max_features, max_features)),
            n_active: 0,
            degenerate: vec![false; n_features],
            skipped: Vec::new(),
            coefs: Array2::zeros((max_features + 1, n_features)),
            alphas: Array1::zeros(max_features + 1),
            n_iter: 0,
            steps: Vec::new(),
        }
    }

    fn is_degenerate(&self, k: usize) -> bool {
        self.degenerate[self.indices[self.n_active + k]]
    }

    /// Inactive position with the largest correlation, skipping degenerate
    /// regressors.
    fn select(&self) -> Option<usize> {
        let masked: Array1<f64> = self
            .cov
            .iter()
            .enumerate()
            .map(|(k, c)| if self.is_degenerate(k) { 0.0 } else { *c })
            .collect();
        linalg::argmax_abs_rounded(&masked.view(), COV_PRECISION)
    }

    fn run(mut self) -> Result<LarsPathResult> {
        let tiny32 = f32::MIN_POSITIVE as f64;
        let equality_tolerance = f32::EPSILON as f64;
        let mut drop = false;

        loop {
            let (c_idx, c_signed) = match self.select() {
                Some(idx) if !self.is_degenerate(idx) => (idx, self.cov[idx]),
                _ => (0, 0.0),
            };
            let c = c_signed.abs();

            let alpha = c / self.n_samples as f64;
            self.alphas[self.n_iter] = alpha;
            if alpha <= self.alpha_min + equality_tolerance {
                if (alpha - self.alpha_min).abs() > equality_tolerance {
                    self.interpolate_to_alpha_min(alpha);
                }
                break;
            }
            if self.n_iter >= self.max_iter || self.n_active >= self.n_features {
                break;
            }

            let mut added = None;
            if !drop {
                if !self.add_feature(c_idx, c_signed) {
                    continue;
                }
                added = self.active.last().copied();
            }

            if self.method == LarsMethod::Lasso
                && self.n_iter > 0
                && self.alphas[self.n_iter - 1] < alpha
            {
                log::warn!(
                    "Early stopping the LARS path at iteration {}: residues are small and alpha \
                     ({:e}) is no longer decreasing",
                    self.n_iter,
                    alpha
                );
                break;
            }

            let (least_squares, aa) = self.equiangular_weights()?;
            let eq_dir = self
                .x
                .slice(s![.., ..self.n_active])
                .dot(&least_squares);
            let corr_eq_dir: Vec<f64> = self
                .x
                .slice(s![.., self.n_active..])
                .t()
                .dot(&eq_dir)
                .iter()
                .map(|v| linalg::round_to(*v, COV_PRECISION))
                .collect();

            let mut gamma = c / aa;
            for (k, (&cov_k, &corr_k)) in self.cov.iter().zip(corr_eq_dir.iter()).enumerate() {
                if self.is_degenerate(k) {
                    continue;
                }
                let g1 = (c - cov_k) / (aa - corr_k + tiny32);
                let g2 = (c + cov_k) / (aa + corr_k + tiny32);
                gamma = gamma.min(linalg::min_positive(&[g1, g2]));
            }

            drop = false;
            let mut drop_positions = Vec::new();
            if self.method == LarsMethod::Lasso {
                let current = self.coefs.row(self.n_iter);
                let z: Vec<f64> = self
                    .active
                    .iter()
                    .zip(least_squares.iter())
                    .map(|(&feature, &ls)| -current[feature] / (ls + tiny32))
                    .collect();
                let z_pos = linalg::min_positive(&z);
                if z_pos < gamma {
                    drop_positions = (0..z.len()).filter(|&i| z[i] == z_pos).rev().collect();
                    gamma = z_pos;
                    drop = true;
                }
            }

            self.apply_step(gamma, &least_squares, &corr_eq_dir);

            let mut dropped = Vec::new();
            if drop {
                dropped = self.drop_features(&drop_positions);
            }
            self.steps.push(LarsStep {
                added,
                dropped,
                n_active: self.n_active,
            });
        }

        let n_rows = self.n_iter + 1;
        Ok(LarsPathResult {
            alphas: self.alphas.slice(s![..n_rows]).to_owned(),
            active: self.active,
            coefs: self.coefs.slice(s![..n_rows, ..]).to_owned(),
            n_iter: self.n_iter,
            steps: self.steps,
            degenerate: self.skipped,
        })
    }

    /// Moves the inactive column at `c_idx` to the front of the inactive
    /// block and extends the Cholesky factor. Returns `false` (after undoing
    /// the move and marking the regressor degenerate) when the new pivot is
    /// too small.
    fn add_feature(&mut self, c_idx: usize, c_signed: f64) -> bool {
        let m = self.n_active;
        let n = c_idx + m;
        self.sign_active[m] = c_signed.signum();
        self.cov.swap(c_idx, 0);
        self.indices.swap(n, m);
        linalg::swap_columns(&mut self.x, n, m);

        let column = self.x.column(m);
        let c = column.dot(&column);
        for j in 0..m {
            self.l[[m, j]] = column.dot(&self.x.column(j));
        }
        if m > 0 {
            let rhs = self.l.slice(s![m, ..m]).to_owned();
            let solved = linalg::solve_lower_triangular(&self.l.slice(s![..m, ..m]), &rhs.view());
            self.l.slice_mut(s![m, ..m]).assign(&solved);
        }
        let row = self.l.slice(s![m, ..m]);
        let v = row.dot(&row);
        let diag = (c - v).abs().sqrt().max(f64::EPSILON);
        self.l[[m, m]] = diag;

        if diag < DEGENERATE_PIVOT {
            let feature = self.indices[m];
            log::warn!(
                "Regressor {} is degenerate (Cholesky pivot {:e}) and is dropped from the LARS path",
                feature,
                diag
            );
            linalg::swap_columns(&mut self.x, n, m);
            self.indices.swap(n, m);
            self.cov.swap(c_idx, 0);
            self.degenerate[feature] = true;
            self.skipped.push(feature);
            return false;
        }

        self.cov.remove(0);
        self.active.push(self.indices[m]);
        self.n_active += 1;
        true
    }

    /// Weights of the active columns along the equiangular direction, and
    /// the normalising constant `AA`.
    fn equiangular_weights(&self) -> Result<(Array1<f64>, f64)> {
        let n = self.n_active;
        let signs = Array1::from(self.sign_active[..n].to_vec());
        let l = self.l.slice(s![..n, ..n]);
        let mut least_squares = linalg::solve_cholesky(&l, &signs.view());

        if n == 1 && least_squares[0] == 0.0 {
            least_squares[0] = 1.0;
            return Ok((least_squares, 1.0));
        }

        let mut aa = 1.0 / least_squares.dot(&signs).sqrt();
        if !aa.is_finite() {
            log::debug!("Active Gram factor is ill-conditioned; regularising its diagonal");
            let mut regularized = l.to_owned();
            let mut round = 0;
            while !aa.is_finite() {
                if round >= MAX_REGULARIZATION_ROUNDS {
                    return Err(ShapError::ArithmeticError(
                        "LARS equiangular direction could not be regularised".to_string(),
                    ));
                }
                for i in 0..n {
                    regularized[[i, i]] += 2f64.powi(round) * f64::EPSILON;
                }
                least_squares = linalg::solve_cholesky(&regularized.view(), &signs.view());
                let tmp = least_squares.dot(&signs).max(f64::EPSILON);
                aa = 1.0 / tmp.sqrt();
                round += 1;
            }
        }
        least_squares *= aa;
        Ok((least_squares, aa))
    }

    fn apply_step(&mut self, gamma: f64, least_squares: &Array1<f64>, corr_eq_dir: &[f64]) {
        self.n_iter += 1;
        if self.n_iter >= self.coefs.nrows() {
            self.grow_buffers();
        }
        for (pos, &feature) in self.active.iter().enumerate() {
            self.coefs[[self.n_iter, feature]] =
                self.coefs[[self.n_iter - 1, feature]] + gamma * least_squares[pos];
        }
        for (cov_k, corr_k) in self.cov.iter_mut().zip(corr_eq_dir.iter()) {
            *cov_k -= gamma * corr_k;
        }
    }

    fn grow_buffers(&mut self) {
        let extra = 2 * 1usize.max(self.max_features.saturating_sub(self.n_active));
        let rows = self.n_iter + extra;
        let mut coefs = Array2::zeros((rows, self.n_features));
        coefs
            .slice_mut(s![..self.coefs.nrows(), ..])
            .assign(&self.coefs);
        let mut alphas = Array1::zeros(rows);
        alphas.slice_mut(s![..self.alphas.len()]).assign(&self.alphas);
        self.coefs = coefs;
        self.alphas = alphas;
    }

    /// Removes the active positions in `positions` (descending order), moves
    /// their columns to the front of the inactive block and recomputes their
    /// correlations with the current residual.
    fn drop_features(&mut self, positions: &[usize]) -> Vec<usize> {
        let mut dropped = Vec::with_capacity(positions.len());
        for &ii in positions {
            {
                let n = self.n_active;
                let mut block = self.l.slice_mut(s![..n, ..n]);
                linalg::cholesky_delete(&mut block, ii);
            }
            self.n_active -= 1;
            dropped.push(self.active.remove(ii));
            for i in ii..self.n_active {
                linalg::swap_columns(&mut self.x, i, i + 1);
                self.indices.swap(i, i + 1);
            }
            self.sign_active.remove(ii);
            self.sign_active.push(0.0);
        }

        let coef = self.coefs.row(self.n_iter);
        let active_coefs: Array1<f64> = self.active.iter().map(|&f| coef[f]).collect();
        let residual = &self.y - &self.x.slice(s![.., ..self.n_active]).dot(&active_coefs);
        let k = dropped.len();
        let mut cov: Vec<f64> = self
            .x
            .slice(s![.., self.n_active..self.n_active + k])
            .t()
            .dot(&residual)
            .to_vec();
        cov.extend_from_slice(&self.cov);
        self.cov = cov;
        dropped
    }

    /// Pulls the last coefficient row back to where the path crosses
    /// `alpha_min`.
    fn interpolate_to_alpha_min(&mut self, alpha: f64) {
        if self.n_iter > 0 {
            let prev_alpha = self.alphas[self.n_iter - 1];
            let ss = (prev_alpha - self.alpha_min) / (prev_alpha - alpha);
            let prev = self.coefs.row(self.n_iter - 1).to_owned();
            let mut current = self.coefs.row_mut(self.n_iter);
            let interpolated = &prev + &((&current - &prev) * ss);
            current.assign(&interpolated);
        }
        self.alphas[self.n_iter] = self.alpha_min;
    }
}
