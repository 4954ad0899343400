//! Dense kernels for small symmetric positive-definite matrices.
//!
//! Storage everywhere else is `ndarray`; factorisations go through
//! `nalgebra::Cholesky`, converting at this boundary. Every routine returns
//! `None` for input that is not a finite, symmetric, positive-definite
//! matrix. Callers decide whether that is fatal.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Relative tolerance for [`is_symmetric`], scaled by the largest entry.
pub const SYMMETRY_TOL: f64 = 1e-8;

pub fn to_dmatrix(a: ArrayView2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

pub fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn(m.shape(), |(i, j)| m[(i, j)])
}

/// Whether `a` is square and `|a_ij - a_ji| <= tol * max|a|` everywhere.
pub fn is_symmetric(a: ArrayView2<f64>, tol: f64) -> bool {
    let n = a.nrows();
    if a.ncols() != n {
        return false;
    }
    let scale = a.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    (0..n).all(|i| (0..i).all(|j| (a[[i, j]] - a[[j, i]]).abs() <= tol * scale))
}

fn factor(a: ArrayView2<f64>) -> Option<Cholesky<f64, Dyn>> {
    if a.iter().any(|v| !v.is_finite()) || !is_symmetric(a, SYMMETRY_TOL) {
        return None;
    }
    let chol = Cholesky::new(to_dmatrix(a))?;
    // nalgebra only rejects zero or negative pivots; keep the factor finite too
    if chol.l_dirty().diagonal().iter().all(|d| d.is_finite() && *d > 0.0) {
        Some(chol)
    } else {
        None
    }
}

/// Lower-triangular Cholesky factor `L` with `a = L Lᵀ`.
pub fn cholesky(a: ArrayView2<f64>) -> Option<Array2<f64>> {
    factor(a).map(|chol| from_dmatrix(&chol.l()))
}

/// Solve `Lᵀ x = b` for a lower-triangular factor `L`.
pub fn solve_lower_transposed(l: ArrayView2<f64>, b: ArrayView1<f64>) -> Option<Array1<f64>> {
    let rhs = DVector::from_iterator(b.len(), b.iter().copied());
    to_dmatrix(l)
        .tr_solve_lower_triangular(&rhs)
        .map(|x| Array1::from_iter(x.iter().copied()))
}

/// log|A| from the Cholesky factor of `A`.
pub fn log_det_from_cholesky(l: ArrayView2<f64>) -> f64 {
    2.0 * l.diag().iter().map(|d| d.ln()).sum::<f64>()
}

/// Inverse of an SPD matrix via its Cholesky factor.
pub fn spd_inverse(a: ArrayView2<f64>) -> Option<Array2<f64>> {
    let inv = from_dmatrix(&factor(a)?.inverse());
    // the two triangles differ by round-off
    Some((&inv + &inv.t()) * 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn max_abs_diff(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f64::max)
    }

    #[test]
    fn cholesky_reconstructs() {
        let a = array![[4.0, 2.0, 0.4], [2.0, 5.0, 1.0], [0.4, 1.0, 3.0]];
        let l = cholesky(a.view()).unwrap();
        let back = l.dot(&l.t());
        assert!(max_abs_diff(&back, &a) < 1e-12);
        assert_eq!(l[[0, 1]], 0.0);
    }

    #[test]
    fn cholesky_rejects_indefinite() {
        let a = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(cholesky(a.view()).is_none());
        let zero = Array2::<f64>::zeros((2, 2));
        assert!(cholesky(zero.view()).is_none());
        let nan = array![[f64::NAN]];
        assert!(cholesky(nan.view()).is_none());
    }

    #[test]
    fn cholesky_rejects_non_square() {
        let a = Array2::<f64>::eye(2);
        assert!(cholesky(a.slice(ndarray::s![.., ..1])).is_none());
    }

    #[test]
    fn asymmetric_input_is_rejected() {
        // lower triangle alone is positive definite, the matrix is not symmetric
        let a = array![[2.0, 5.0], [0.0, 2.0]];
        assert!(!is_symmetric(a.view(), SYMMETRY_TOL));
        assert!(cholesky(a.view()).is_none());
        assert!(spd_inverse(a.view()).is_none());
    }

    #[test]
    fn symmetry_tolerance_is_relative() {
        let a = array![[4.0e6, 1.0e6], [1.0e6 + 1e-3, 3.0e6]];
        assert!(is_symmetric(a.view(), SYMMETRY_TOL));
        let b = array![[4.0, 1.0], [1.001, 3.0]];
        assert!(!is_symmetric(b.view(), SYMMETRY_TOL));
    }

    #[test]
    fn transposed_solve() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let l = cholesky(a.view()).unwrap();
        let b = array![1.0, 2.0];
        let x = solve_lower_transposed(l.view(), b.view()).unwrap();
        assert!((l.t().dot(&x) - &b).iter().all(|d| d.abs() < 1e-12));
    }

    #[test]
    fn log_det_matches_product() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let l = cholesky(a.view()).unwrap();
        assert!((log_det_from_cholesky(l.view()) - 8.0f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn spd_inverse_identity() {
        let a = array![[4.0, 2.0, 0.4], [2.0, 5.0, 1.0], [0.4, 1.0, 3.0]];
        let inv = spd_inverse(a.view()).unwrap();
        let eye = Array2::<f64>::eye(3);
        assert!(max_abs_diff(&a.dot(&inv), &eye) < 1e-10);
        assert!(max_abs_diff(&inv, &inv.t().to_owned()) < 1e-15);
    }
}
