//! Gaussian emissions shared by the replicas of each unique state.
//!
//! Parameters are stored once per unique state. Scoring evaluates each
//! unique density once per timestep and replicates the column over the
//! state's `n_tied` replicas.
//!
//! Full models keep the Cholesky factor of every precision matrix, computed
//! when the model is built. An asymmetric precision is rejected at that
//! point with [`Error::Numerical`], one that cannot be factored with
//! [`Error::NotPositiveDefinite`]. Neither is ever symmetrised or
//! regularised.

use super::expand::TiedLayout;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use rand::distr::Distribution;
use rand::Rng;
use rand_distr::StandardNormal;
use thmm_common::{CovarianceKind, Error, Result};
use thmm_math::gaussian::{log_pdf_diagonal, log_pdf_precision, PrecisionFactor};
use thmm_math::linalg::{cholesky, is_symmetric, solve_lower_transposed, spd_inverse, SYMMETRY_TOL};

/// Spread of the emission densities.
#[derive(Debug, Clone, PartialEq)]
pub enum Covariance {
    /// Per-feature variances, `(n_unique, F)`.
    Diagonal(Array2<f64>),
    /// Precision matrices, `(n_unique, F, F)`.
    Full(Array3<f64>),
}

impl Covariance {
    pub fn kind(&self) -> CovarianceKind {
        match self {
            Covariance::Diagonal(_) => CovarianceKind::Diagonal,
            Covariance::Full(_) => CovarianceKind::Full,
        }
    }
}

/// Validated Gaussian emission parameters in unique space.
#[derive(Debug, Clone)]
pub struct EmissionModel {
    means: Array2<f64>,
    covariance: Covariance,
    /// Lower Cholesky factors of the precisions (full models only).
    chol: Option<Array3<f64>>,
}

impl EmissionModel {
    /// Build a model, checking shapes, variances and positive definiteness.
    pub fn new(means: Array2<f64>, covariance: Covariance) -> Result<Self> {
        let (n, f) = means.dim();
        if means.iter().any(|m| !m.is_finite()) {
            return Err(Error::Numerical("means must be finite".into()));
        }

        let chol = match &covariance {
            Covariance::Diagonal(var) => {
                if var.dim() != (n, f) {
                    return Err(Error::shape(
                        "var",
                        format!("({n}, {f})"),
                        format!("{:?}", var.shape()),
                    ));
                }
                if let Some(((u, _), v)) = var
                    .indexed_iter()
                    .find(|(_, v)| !v.is_finite() || **v <= 0.0)
                {
                    return Err(Error::Numerical(format!(
                        "variance of unique state {u} must be finite and > 0, got {v}"
                    )));
                }
                None
            }
            Covariance::Full(precision) => {
                if precision.dim() != (n, f, f) {
                    return Err(Error::shape(
                        "precision",
                        format!("({n}, {f}, {f})"),
                        format!("{:?}", precision.shape()),
                    ));
                }
                let mut factors = Array3::zeros((n, f, f));
                for (u, p) in precision.outer_iter().enumerate() {
                    if !is_symmetric(p, SYMMETRY_TOL) {
                        return Err(Error::Numerical(format!(
                            "precision of unique state {u} is not symmetric"
                        )));
                    }
                    let l = cholesky(p).ok_or_else(|| Error::NotPositiveDefinite {
                        name: "precision".into(),
                        state: u,
                    })?;
                    factors.index_axis_mut(Axis(0), u).assign(&l);
                }
                Some(factors)
            }
        };

        Ok(Self {
            means,
            covariance,
            chol,
        })
    }

    pub fn n_unique(&self) -> usize {
        self.means.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.means.ncols()
    }

    pub fn kind(&self) -> CovarianceKind {
        self.covariance.kind()
    }

    pub fn means(&self) -> ArrayView2<'_, f64> {
        self.means.view()
    }

    pub fn covariance(&self) -> &Covariance {
        &self.covariance
    }

    /// Per-feature variances; the diagonal of the covariance for full models.
    pub fn variances(&self) -> Array2<f64> {
        match &self.covariance {
            Covariance::Diagonal(var) => var.clone(),
            Covariance::Full(precision) => {
                let mut out = Array2::zeros(self.means.dim());
                for (u, p) in precision.outer_iter().enumerate() {
                    // factored at construction, so the inverse exists
                    if let Some(cov) = spd_inverse(p) {
                        out.row_mut(u).assign(&cov.diag());
                    }
                }
                out
            }
        }
    }

    /// Precision matrices; `diag(1 / var)` for diagonal models.
    pub fn precisions(&self) -> Array3<f64> {
        match &self.covariance {
            Covariance::Full(precision) => precision.clone(),
            Covariance::Diagonal(var) => {
                let (n, f) = var.dim();
                let mut out = Array3::zeros((n, f, f));
                for (mut p, v) in out.outer_iter_mut().zip(var.outer_iter()) {
                    p.diag_mut().assign(&v.mapv(|x| 1.0 / x));
                }
                out
            }
        }
    }

    /// Log-density of every observation under every unique state, `(T, n_unique)`.
    pub fn log_prob_unique(&self, obs: ArrayView2<f64>) -> Result<Array2<f64>> {
        let f = self.n_features();
        if obs.ncols() != f {
            return Err(Error::shape(
                "observations",
                format!("{f} columns"),
                format!("{:?}", obs.shape()),
            ));
        }

        let n = self.n_unique();
        let mut out = Array2::zeros((obs.nrows(), n));
        match (&self.covariance, &self.chol) {
            (Covariance::Full(_), Some(chol)) => {
                for u in 0..n {
                    let factor = PrecisionFactor::new(chol.index_axis(Axis(0), u));
                    let mean = self.means.row(u);
                    for (t, x) in obs.outer_iter().enumerate() {
                        out[[t, u]] = log_pdf_precision(x, mean, &factor);
                    }
                }
            }
            (Covariance::Diagonal(var), _) => {
                for u in 0..n {
                    let mean = self.means.row(u);
                    let v = var.row(u);
                    for (t, x) in obs.outer_iter().enumerate() {
                        out[[t, u]] = log_pdf_diagonal(x, mean, v);
                    }
                }
            }
            (Covariance::Full(_), None) => {
                return Err(Error::Numerical("precision factors missing".into()));
            }
        }
        Ok(out)
    }

    /// Log-density over the expanded state space, `(T, n_components)`.
    pub fn log_prob(&self, obs: ArrayView2<f64>, layout: &TiedLayout) -> Result<Array2<f64>> {
        if layout.n_unique() != self.n_unique() {
            return Err(Error::shape(
                "emission means",
                format!("leading dimension {}", layout.n_unique()),
                format!("{:?}", self.means.shape()),
            ));
        }
        let unique = self.log_prob_unique(obs)?;
        let columns: Vec<usize> = (0..layout.n_components())
            .map(|i| layout.unique_of(i))
            .collect();
        Ok(unique.select(Axis(1), &columns))
    }

    /// Draw one observation for expanded state `state`.
    ///
    /// Replicas share their unique state's Gaussian. Full models use
    /// `x = μ + L⁻ᵀ z` with `P = L Lᵀ`, so `Cov(x) = P⁻¹`.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        state: usize,
        layout: &TiedLayout,
        rng: &mut R,
    ) -> Result<Array1<f64>> {
        if layout.n_unique() != self.n_unique() || state >= layout.n_components() {
            return Err(Error::shape(
                "state index",
                format!("< {} with {} unique states", layout.n_components(), self.n_unique()),
                state,
            ));
        }
        let u = layout.unique_of(state);
        let z: Array1<f64> =
            Array1::from_shape_fn(self.n_features(), |_| StandardNormal.sample(&mut *rng));
        let mean = self.means.row(u);
        let x = match (&self.covariance, &self.chol) {
            (Covariance::Diagonal(var), _) => &mean + &(var.row(u).mapv(f64::sqrt) * &z),
            (Covariance::Full(_), Some(chol)) => {
                let offset = solve_lower_transposed(chol.index_axis(Axis(0), u), z.view())
                    .ok_or_else(|| {
                        Error::Numerical(format!("precision factor of unique state {u} is singular"))
                    })?;
                &mean + &offset
            }
            (Covariance::Full(_), None) => {
                return Err(Error::Numerical("precision factors missing".into()));
            }
        };
        Ok(x)
    }
}

/// Diagonal covariance from an isotropic `(n_unique,)` or per-feature
/// `(n_unique, F)` variance array.
pub(crate) fn broadcast_variances(var: ArrayView1<f64>, n_features: usize) -> Array2<f64> {
    let mut out = Array2::zeros((var.len(), n_features));
    for (mut row, &v) in out.outer_iter_mut().zip(var.iter()) {
        row.fill(v);
    }
    out
}
