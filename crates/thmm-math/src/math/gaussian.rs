//! Gaussian log-density kernels.
//!
//! Two parameterisations are supported:
//! - diagonal: per-feature variances
//! - precision: the Cholesky factor `L` of a precision matrix `P = L Lᵀ`
//!
//! The precision form never inverts anything at scoring time:
//! `log N(x; μ, P⁻¹) = -½ d ln 2π + ½ ln|P| - ½ ‖Lᵀ(x - μ)‖²`.

use super::linalg::log_det_from_cholesky;
use super::stable::LN_2PI;
use ndarray::{ArrayView1, ArrayView2};

/// Log-density of a Gaussian with independent per-feature variances.
///
/// Returns NAN if any variance is non-positive or the lengths disagree.
pub fn log_pdf_diagonal(x: ArrayView1<f64>, mean: ArrayView1<f64>, var: ArrayView1<f64>) -> f64 {
    if x.len() != mean.len() || x.len() != var.len() {
        return f64::NAN;
    }
    let mut log_pdf = 0.0;
    for ((&xi, &mu), &v) in x.iter().zip(mean.iter()).zip(var.iter()) {
        if v.is_nan() || v <= 0.0 {
            return f64::NAN;
        }
        let diff = xi - mu;
        log_pdf -= 0.5 * (LN_2PI + v.ln() + diff * diff / v);
    }
    log_pdf
}

/// Precomputed pieces of a precision-parameterised Gaussian.
#[derive(Debug, Clone)]
pub struct PrecisionFactor<'a> {
    /// Lower Cholesky factor of the precision matrix.
    pub chol: ArrayView2<'a, f64>,
    /// ln|P|, see [`log_det_from_cholesky`].
    pub log_det: f64,
}

impl<'a> PrecisionFactor<'a> {
    pub fn new(chol: ArrayView2<'a, f64>) -> Self {
        let log_det = log_det_from_cholesky(chol);
        Self { chol, log_det }
    }
}

/// Log-density of a Gaussian parameterised by a factored precision matrix.
pub fn log_pdf_precision(
    x: ArrayView1<f64>,
    mean: ArrayView1<f64>,
    factor: &PrecisionFactor<'_>,
) -> f64 {
    let d = x.len();
    if mean.len() != d || factor.chol.nrows() != d {
        return f64::NAN;
    }
    let z = factor.chol.t().dot(&(&x - &mean));
    -0.5 * (d as f64 * LN_2PI - factor.log_det + z.dot(&z))
}
