// src/utils/linalg.rs

//! Dense matrix and vector helpers shared by the regression solvers.
//!
//! Everything here is a pure function of its arguments, except
//! [`swap_columns`] and [`cholesky_delete`], which mutate the buffer they are handed.
//!
//! Matrix inversion is backed by nalgebra by default. With the `linalg`
//! feature it goes through ndarray-linalg (LAPACK) instead. Both backends
//! fall back to the Moore-Penrose pseudo-inverse when the matrix is
//! numerically singular.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut2, Axis};

use crate::core::{Result, ShapError};

/// Stacks equally sized rows into a matrix.
pub fn matrix_from_rows(rows: &[Array1<f64>]) -> Result<Array2<f64>> {
    let ncols = rows.first().map_or(0, |r| r.len());
    let mut data = Vec::with_capacity(rows.len() * ncols);
    for (i, row) in rows.iter().enumerate() {
        if row.len() != ncols {
            return Err(ShapError::IncompatibleDimensions(format!(
                "row {} has {} entries, expected {}",
                i,
                row.len(),
                ncols
            )));
        }
        data.extend(row.iter().copied());
    }
    Ok(Array2::from_shape_vec((rows.len(), ncols), data)?)
}

pub fn row_sum(m: &ArrayView2<f64>) -> Array1<f64> {
    m.sum_axis(Axis(1))
}

pub fn col_sum(m: &ArrayView2<f64>) -> Array1<f64> {
    m.sum_axis(Axis(0))
}

pub fn row_square_sum(m: &ArrayView2<f64>) -> Array1<f64> {
    m.map_axis(Axis(1), |row| row.iter().map(|v| v * v).sum())
}

/// Column means; an empty matrix yields zeros.
pub fn col_mean(m: &ArrayView2<f64>) -> Array1<f64> {
    if m.nrows() == 0 {
        return Array1::zeros(m.ncols());
    }
    col_sum(m) / m.nrows() as f64
}

/// `m[i, j] - v[j]` for every row `i`.
pub fn sub_from_rows(m: &ArrayView2<f64>, v: &ArrayView1<f64>) -> Result<Array2<f64>> {
    if v.len() != m.ncols() {
        return Err(ShapError::IncompatibleDimensions(format!(
            "cannot subtract a vector of length {} from rows of length {}",
            v.len(),
            m.ncols()
        )));
    }
    Ok(m - &v.view().insert_axis(Axis(0)))
}

/// `m[i, j] - v[i]` for every column `j`.
pub fn sub_from_cols(m: &ArrayView2<f64>, v: &ArrayView1<f64>) -> Result<Array2<f64>> {
    if v.len() != m.nrows() {
        return Err(ShapError::IncompatibleDimensions(format!(
            "cannot subtract a vector of length {} from columns of length {}",
            v.len(),
            m.nrows()
        )));
    }
    Ok(m - &v.view().insert_axis(Axis(1)))
}

pub fn map_elements<F: Fn(f64) -> f64>(m: &ArrayView2<f64>, f: F) -> Array2<f64> {
    m.mapv(f)
}

/// Computes `Aᵀ·diag(w)·A` and `Aᵀ·diag(w)·C` in a single pass over the rows.
pub fn weighted_gram(
    a: &ArrayView2<f64>,
    w: &ArrayView1<f64>,
    c: &ArrayView2<f64>,
) -> Result<(Array2<f64>, Array2<f64>)> {
    if a.nrows() != w.len() || a.nrows() != c.nrows() {
        return Err(ShapError::IncompatibleDimensions(format!(
            "design has {} rows, weights {}, targets {}",
            a.nrows(),
            w.len(),
            c.nrows()
        )));
    }
    let p = a.ncols();
    let q = c.ncols();
    let mut ata = Array2::<f64>::zeros((p, p));
    let mut atc = Array2::<f64>::zeros((p, q));

    for ((row, &wi), crow) in a.outer_iter().zip(w.iter()).zip(c.outer_iter()) {
        if wi == 0.0 {
            continue;
        }
        for j in 0..p {
            let wa = wi * row[j];
            if wa == 0.0 {
                continue;
            }
            for k in j..p {
                ata[[j, k]] += wa * row[k];
            }
            for k in 0..q {
                atc[[j, k]] += wa * crow[k];
            }
        }
    }
    for j in 0..p {
        for k in 0..j {
            ata[[j, k]] = ata[[k, j]];
        }
    }
    Ok((ata, atc))
}

/// Vector form of [`weighted_gram`]: returns `Aᵀ·diag(w)·A` and `Aᵀ·diag(w)·y`.
pub fn weighted_gram_vec(
    a: &ArrayView2<f64>,
    w: &ArrayView1<f64>,
    y: &ArrayView1<f64>,
) -> Result<(Array2<f64>, Array1<f64>)> {
    let (ata, aty) = weighted_gram(a, w, &y.view().insert_axis(Axis(1)))?;
    Ok((ata, aty.column(0).to_owned()))
}

/// Inverts a square matrix, falling back to the pseudo-inverse when it is
/// numerically singular. Singularity is never reported as an error.
pub fn safe_invert(m: &ArrayView2<f64>) -> Result<Array2<f64>> {
    if !m.is_square() {
        return Err(ShapError::IncompatibleDimensions(format!(
            "cannot invert a {}x{} matrix",
            m.nrows(),
            m.ncols()
        )));
    }
    if m.nrows() == 0 {
        return Ok(Array2::zeros((0, 0)));
    }
    if m.iter().any(|v| !v.is_finite()) {
        return Err(ShapError::ArithmeticError(
            "cannot invert a matrix with non-finite entries".to_string(),
        ));
    }
    backend::invert(m)
}

/// Moore-Penrose pseudo-inverse via singular value decomposition.
pub fn pseudo_inverse(m: &ArrayView2<f64>) -> Result<Array2<f64>> {
    if m.nrows() == 0 || m.ncols() == 0 {
        return Ok(Array2::zeros((m.ncols(), m.nrows())));
    }
    backend::pseudo_inverse(m)
}

/// Smallest strictly positive value, or `f64::MAX` when there is none.
pub fn min_positive<'a, I: IntoIterator<Item = &'a f64>>(values: I) -> f64 {
    values
        .into_iter()
        .copied()
        .filter(|v| *v > 0.0)
        .fold(f64::MAX, f64::min)
}

/// Indices whose absolute value exceeds `eps`.
pub fn nonzero_indices<'a, I: IntoIterator<Item = &'a f64>>(values: I, eps: f64) -> Vec<usize> {
    values
        .into_iter()
        .enumerate()
        .filter(|(_, v)| v.abs() > eps)
        .map(|(i, _)| i)
        .collect()
}

/// Rounds half away from zero to `decimals` places, leaving values that
/// would overflow the scaling untouched.
pub fn round_to(x: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    let rounded = (x * scale).round() / scale;
    if rounded.is_finite() {
        rounded
    } else {
        x
    }
}

/// Index of the largest absolute value after rounding to `decimals` places;
/// ties go to the lowest index.
pub fn argmax_abs_rounded(values: &ArrayView1<f64>, decimals: i32) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, v) in values.iter().enumerate() {
        let candidate = round_to(v.abs(), decimals);
        match best {
            Some((_, current)) if candidate <= current => {}
            _ => best = Some((i, candidate)),
        }
    }
    best.map(|(i, _)| i)
}

/// Solves `L·x = b` for lower-triangular `L` by forward substitution.
pub fn solve_lower_triangular(l: &ArrayView2<f64>, b: &ArrayView1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut x = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut acc = b[i];
        for k in 0..i {
            acc -= l[[i, k]] * x[k];
        }
        x[i] = acc / l[[i, i]];
    }
    x
}

/// Solves `Lᵀ·x = b` for lower-triangular `L` by back substitution.
pub fn solve_upper_from_lower(l: &ArrayView2<f64>, b: &ArrayView1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut acc = b[i];
        for k in (i + 1)..n {
            acc -= l[[k, i]] * x[k];
        }
        x[i] = acc / l[[i, i]];
    }
    x
}

/// Solves `L·Lᵀ·x = b` given the lower Cholesky factor `L`.
pub fn solve_cholesky(l: &ArrayView2<f64>, b: &ArrayView1<f64>) -> Array1<f64> {
    let y = solve_lower_triangular(l, b);
    solve_upper_from_lower(l, &y.view())
}

/// Swaps two columns in place.
pub fn swap_columns(m: &mut Array2<f64>, i: usize, j: usize) {
    if i == j {
        return;
    }
    for k in 0..m.nrows() {
        m.swap([k, i], [k, j]);
    }
}

/// Removes row and column `go_out` from the lower Cholesky factor held in
/// `l` (an `n x n` view), restoring triangularity with Givens rotations.
///
/// Mutates `l` in place. Afterwards the leading `(n-1) x (n-1)` block is the
/// factor of the Gram matrix without the removed variable; the last row is
/// left as scratch.
pub fn cholesky_delete(l: &mut ArrayViewMut2<f64>, go_out: usize) {
    let n = l.nrows();
    if go_out + 1 >= n {
        return;
    }
    for i in go_out..n - 1 {
        for k in 0..=(i + 1) {
            l[[i, k]] = l[[i + 1, k]];
        }
    }
    for i in go_out..n - 1 {
        let a = l[[i, i]];
        let b = l[[i, i + 1]];
        // hypot is non-negative, so the new diagonal needs no sign fix-up
        let r = a.hypot(b);
        let (c, s) = if r == 0.0 { (1.0, 0.0) } else { (a / r, b / r) };
        l[[i, i]] = r;
        l[[i, i + 1]] = 0.0;
        for k in (i + 1)..(n - 1) {
            let x = l[[k, i]];
            let y = l[[k, i + 1]];
            l[[k, i]] = c * x + s * y;
            l[[k, i + 1]] = c * y - s * x;
        }
    }
}

#[cfg(not(feature = "linalg"))]
mod backend {
    use nalgebra::DMatrix;
    use ndarray::{Array2, ArrayView2};

    use crate::core::{Result, ShapError};

    fn to_dmatrix(m: &ArrayView2<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(m.nrows(), m.ncols(), |i, j| m[[i, j]])
    }

    fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
        Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
    }

    fn tolerance(singular_values: &[f64], rows: usize, cols: usize) -> f64 {
        let smax = singular_values.iter().copied().fold(0.0, f64::max);
        smax * rows.max(cols) as f64 * f64::EPSILON
    }

    pub(super) fn invert(m: &ArrayView2<f64>) -> Result<Array2<f64>> {
        let dm = to_dmatrix(m);
        let svd = dm.clone().svd(true, true);
        let tol = tolerance(svd.singular_values.as_slice(), dm.nrows(), dm.ncols());
        let smin = svd.singular_values.iter().copied().fold(f64::INFINITY, f64::min);
        if smin > tol {
            if let Some(inv) = dm.try_inverse() {
                if inv.iter().all(|v| v.is_finite()) {
                    return Ok(from_dmatrix(&inv));
                }
            }
        }
        log::debug!(
            "{}x{} matrix is numerically singular (smallest singular value {:e}); using the pseudo-inverse",
            m.nrows(),
            m.ncols(),
            smin
        );
        let pinv = svd
            .pseudo_inverse(tol.max(f64::MIN_POSITIVE))
            .map_err(|e| ShapError::ArithmeticError(e.to_string()))?;
        Ok(from_dmatrix(&pinv))
    }

    pub(super) fn pseudo_inverse(m: &ArrayView2<f64>) -> Result<Array2<f64>> {
        let dm = to_dmatrix(m);
        let svd = dm.svd(true, true);
        let tol = tolerance(svd.singular_values.as_slice(), m.nrows(), m.ncols());
        let pinv = svd
            .pseudo_inverse(tol.max(f64::MIN_POSITIVE))
            .map_err(|e| ShapError::ArithmeticError(e.to_string()))?;
        Ok(from_dmatrix(&pinv))
    }
}

#[cfg(feature = "linalg")]
mod backend {
    use ndarray::{Array2, ArrayView2, Axis};
    use ndarray_linalg::{Inverse, SVD};

    use crate::core::{Result, ShapError};

    fn svd_parts(m: &ArrayView2<f64>) -> Result<(Array2<f64>, ndarray::Array1<f64>, Array2<f64>)> {
        let (u, s, vt) = m
            .svd(true, true)
            .map_err(|e| ShapError::ArithmeticError(format!("SVD failed: {}", e)))?;
        let u = u.ok_or_else(|| ShapError::InternalError("SVD did not return U".to_string()))?;
        let vt = vt.ok_or_else(|| ShapError::InternalError("SVD did not return Vt".to_string()))?;
        Ok((u, s, vt))
    }

    fn tolerance(s: &ndarray::Array1<f64>, rows: usize, cols: usize) -> f64 {
        let smax = s.iter().copied().fold(0.0, f64::max);
        smax * rows.max(cols) as f64 * f64::EPSILON
    }

    fn pinv_from_parts(
        u: &Array2<f64>,
        s: &ndarray::Array1<f64>,
        vt: &Array2<f64>,
        tol: f64,
    ) -> Array2<f64> {
        let mut out = Array2::<f64>::zeros((vt.ncols(), u.nrows()));
        for (i, &si) in s.iter().enumerate() {
            if si <= tol {
                continue;
            }
            let v = vt.row(i).insert_axis(Axis(1));
            let ut = u.column(i).insert_axis(Axis(0));
            out = out + &(v.dot(&ut) / si);
        }
        out
    }

    pub(super) fn invert(m: &ArrayView2<f64>) -> Result<Array2<f64>> {
        let (u, s, vt) = svd_parts(m)?;
        let tol = tolerance(&s, m.nrows(), m.ncols());
        let smin = s.iter().copied().fold(f64::INFINITY, f64::min);
        if smin > tol {
            if let Ok(inv) = m.inv() {
                if inv.iter().all(|v| v.is_finite()) {
                    return Ok(inv);
                }
            }
        }
        log::debug!(
            "{}x{} matrix is numerically singular (smallest singular value {:e}); using the pseudo-inverse",
            m.nrows(),
            m.ncols(),
            smin
        );
        Ok(pinv_from_parts(&u, &s, &vt, tol))
    }

    pub(super) fn pseudo_inverse(m: &ArrayView2<f64>) -> Result<Array2<f64>> {
        let (u, s, vt) = svd_parts(m)?;
        let tol = tolerance(&s, m.nrows(), m.ncols());
        Ok(pinv_from_parts(&u, &s, &vt, tol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, s};

    #[test]
    fn sums_and_means() {
        let m = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        assert_eq!(row_sum(&m.view()), array![3.0, 7.0, 11.0]);
        assert_eq!(col_sum(&m.view()), array![9.0, 12.0]);
        assert_eq!(row_square_sum(&m.view()), array![5.0, 25.0, 61.0]);
        assert_eq!(col_mean(&m.view()), array![3.0, 4.0]);
    }

    #[test]
    fn subtract_vectors() {
        let m = array![[1.0, 2.0], [3.0, 4.0]];
        let rows = sub_from_rows(&m.view(), &array![1.0, 2.0].view()).unwrap();
        assert_eq!(rows, array![[0.0, 0.0], [2.0, 2.0]]);
        let cols = sub_from_cols(&m.view(), &array![1.0, 3.0].view()).unwrap();
        assert_eq!(cols, array![[0.0, 1.0], [0.0, 1.0]]);
        assert!(sub_from_rows(&m.view(), &array![1.0].view()).is_err());
        assert_eq!(map_elements(&m.view(), |v| v - 1.0), array![[0.0, 1.0], [2.0, 3.0]]);
    }

    #[test]
    fn matrix_from_rows_checks_widths() {
        let m = matrix_from_rows(&[array![1.0, 2.0], array![3.0, 4.0]]).unwrap();
        assert_eq!(m, array![[1.0, 2.0], [3.0, 4.0]]);
        assert!(matrix_from_rows(&[array![1.0, 2.0], array![3.0]]).is_err());
        assert_eq!(matrix_from_rows(&[]).unwrap().dim(), (0, 0));
    }

    #[test]
    fn weighted_gram_matches_explicit_product() {
        let a = array![[1.0, 2.0], [0.0, 1.0], [3.0, -1.0]];
        let w = array![1.0, 2.0, 0.5];
        let c = array![[1.0], [2.0], [3.0]];
        let (ata, atc) = weighted_gram(&a.view(), &w.view(), &c.view()).unwrap();
        let wd = Array2::from_diag(&w);
        let expected_ata = a.t().dot(&wd).dot(&a);
        let expected_atc = a.t().dot(&wd).dot(&c);
        for (x, y) in ata.iter().zip(expected_ata.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-12);
        }
        for (x, y) in atc.iter().zip(expected_atc.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-12);
        }
    }

    #[test]
    fn inverts_regular_matrix() {
        let m = array![[4.0, 7.0], [2.0, 6.0]];
        let inv = safe_invert(&m.view()).unwrap();
        let id = m.dot(&inv);
        assert_abs_diff_eq!(id[[0, 0]], 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(id[[0, 1]], 0.0, epsilon = 1e-10);
        assert_abs_diff_eq!(id[[1, 1]], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn singular_matrix_falls_back_to_pseudo_inverse() {
        let m = array![[1.0, 2.0], [2.0, 4.0]];
        let inv = safe_invert(&m.view()).unwrap();
        // A·A⁺·A = A holds for the pseudo-inverse.
        let back = m.dot(&inv).dot(&m);
        for (x, y) in back.iter().zip(m.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-9);
        }
        let zeros = safe_invert(&Array2::<f64>::zeros((2, 2)).view()).unwrap();
        assert!(zeros.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn rejects_non_square() {
        let m = Array2::<f64>::zeros((2, 3));
        assert!(matches!(
            safe_invert(&m.view()),
            Err(ShapError::IncompatibleDimensions(_))
        ));
        let pinv = pseudo_inverse(&array![[1.0, 0.0, 0.0], [0.0, 2.0, 0.0]].view()).unwrap();
        assert_eq!(pinv.dim(), (3, 2));
        assert_abs_diff_eq!(pinv[[1, 1]], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn positive_and_nonzero_queries() {
        let v = [-1.0, 0.0, 3.0, 0.5];
        assert_eq!(min_positive(&v), 0.5);
        assert_eq!(min_positive(&[-1.0, 0.0]), f64::MAX);
        assert_eq!(nonzero_indices(&v, 1e-12), vec![0, 2, 3]);
    }

    #[test]
    fn argmax_prefers_lowest_index_on_ties() {
        let v = array![0.1, -0.3, 0.3 + 1e-18, 0.2];
        assert_eq!(argmax_abs_rounded(&v.view(), 16), Some(1));
        assert_eq!(argmax_abs_rounded(&Array1::<f64>::zeros(0).view(), 16), None);
    }

    #[test]
    fn triangular_solves() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        // Cholesky factor of a
        let l = array![[2.0, 0.0], [1.0, 2.0_f64.sqrt()]];
        let b = array![2.0, 1.0];
        let x = solve_cholesky(&l.view(), &b.view());
        let back = a.dot(&x);
        assert_abs_diff_eq!(back[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(back[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn column_swap_mutates_in_place() {
        let mut m = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        swap_columns(&mut m, 0, 2);
        assert_eq!(m, array![[3.0, 2.0, 1.0], [6.0, 5.0, 4.0]]);
        swap_columns(&mut m, 1, 1);
        assert_eq!(m, array![[3.0, 2.0, 1.0], [6.0, 5.0, 4.0]]);
    }

    #[test]
    fn cholesky_delete_matches_refactorization() {
        // Gram matrix of three variables and its Cholesky factor.
        let g = array![[4.0, 2.0, 1.0], [2.0, 5.0, 3.0], [1.0, 3.0, 6.0]];
        let mut l = Array2::<f64>::zeros((3, 3));
        for i in 0..3 {
            for j in 0..=i {
                let mut sum = g[[i, j]];
                for k in 0..j {
                    sum -= l[[i, k]] * l[[j, k]];
                }
                l[[i, j]] = if i == j { sum.sqrt() } else { sum / l[[j, j]] };
            }
        }
        cholesky_delete(&mut l.view_mut(), 1);
        let reduced = l.slice(s![0..2, 0..2]).to_owned();
        let rebuilt = reduced.dot(&reduced.t());
        let expected = array![[4.0, 1.0], [1.0, 6.0]];
        for (x, y) in rebuilt.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-10);
        }
        assert!(reduced[[0, 0]] > 0.0 && reduced[[1, 1]] > 0.0);
    }
}
