//! Priors over the unique-space parameters.
//!
//! | Parameter | Prior | Hyperparameters |
//! |---|---|---|
//! | start distribution | Dirichlet | `startprob_prior` (n_unique,) |
//! | transition rows | Dirichlet | `transmat_prior` (n_unique, n_unique) |
//! | means | Normal | `mu_prior` (n_unique, F), `mu_weight` (n_unique,) |
//! | precisions | Wishart-like | `precision_prior` (n_unique, F, F), `precision_weight` (n_unique,) |
//!
//! Every setter checks that the leading dimension equals `n_unique` before
//! touching any state. The expanded forms (leading dimension
//! `n_unique * n_tied`) are built on first access and cached until the
//! unique-space prior is reassigned.

use super::expand::TiedLayout;
use crate::config::PriorConfig;
use ndarray::{Array1, Array2, Array3, ArrayView, ArrayView1, ArrayView2, Dimension, Ix1, Ix2, Ix3};
use std::cell::OnceCell;
use thmm_common::{Error, Result};
use thmm_math::dirichlet::DirichletParams;
use thmm_math::linalg::{cholesky, is_symmetric, spd_inverse, SYMMETRY_TOL};

/// Unique-space prior hyperparameters with lazily expanded views.
#[derive(Debug, Clone)]
pub struct PriorStore {
    layout: TiedLayout,
    n_features: usize,
    startprob_prior: Array1<f64>,
    transmat_prior: Array2<f64>,
    mu_prior: Array2<f64>,
    mu_weight: Array1<f64>,
    precision_prior: Array3<f64>,
    precision_weight: Array1<f64>,
    expanded_mu_prior: OnceCell<Array2<f64>>,
    expanded_precision_prior: OnceCell<Array3<f64>>,
}

fn check_finite<D: Dimension>(name: &str, a: &ArrayView<f64, D>, min: f64, strict: bool) -> Result<()> {
    let bad = a
        .iter()
        .find(|v| !v.is_finite() || **v < min || (strict && **v <= min));
    match bad {
        Some(v) => Err(Error::Configuration(format!(
            "{name} entries must be finite and {} {min}, got {v}",
            if strict { ">" } else { ">=" }
        ))),
        None => Ok(()),
    }
}

fn shape_error(name: &str, expected: impl std::fmt::Display, shape: &[usize]) -> Error {
    Error::shape(name, expected, format!("shape {shape:?}"))
}

impl PriorStore {
    /// Flat priors: maximum-likelihood updates, identity precision prior.
    pub fn new(layout: TiedLayout, n_features: usize) -> Self {
        Self::from_config(layout, n_features, &PriorConfig::default())
    }

    /// Symmetric priors from scalar strengths.
    pub fn from_config(layout: TiedLayout, n_features: usize, config: &PriorConfig) -> Self {
        let n = layout.n_unique();
        let mut precision_prior = Array3::zeros((n, n_features, n_features));
        for mut p in precision_prior.outer_iter_mut() {
            p.diag_mut().fill(config.precision_scale);
        }
        Self {
            layout,
            n_features,
            startprob_prior: Array1::from_elem(n, config.startprob_concentration),
            transmat_prior: Array2::from_elem((n, n), config.transmat_concentration),
            mu_prior: Array2::zeros((n, n_features)),
            mu_weight: Array1::from_elem(n, config.mu_weight),
            precision_prior,
            precision_weight: Array1::from_elem(n, config.precision_weight),
            expanded_mu_prior: OnceCell::new(),
            expanded_precision_prior: OnceCell::new(),
        }
    }

    pub fn layout(&self) -> TiedLayout {
        self.layout
    }

    // ------------------------------------------------------------------
    // Dirichlet priors
    // ------------------------------------------------------------------

    pub fn startprob_prior(&self) -> ArrayView1<'_, f64> {
        self.startprob_prior.view()
    }

    pub fn set_startprob_prior(&mut self, prior: ArrayView1<f64>) -> Result<()> {
        let n = self.layout.n_unique();
        if prior.len() != n {
            return Err(shape_error("startprob_prior", format!("({n},)"), prior.shape()));
        }
        check_finite("startprob_prior", &prior, 0.0, true)?;
        self.startprob_prior = prior.to_owned();
        Ok(())
    }

    pub fn transmat_prior(&self) -> ArrayView2<'_, f64> {
        self.transmat_prior.view()
    }

    pub fn set_transmat_prior(&mut self, prior: ArrayView2<f64>) -> Result<()> {
        let n = self.layout.n_unique();
        if prior.dim() != (n, n) {
            return Err(shape_error("transmat_prior", format!("({n}, {n})"), prior.shape()));
        }
        check_finite("transmat_prior", &prior, 0.0, true)?;
        self.transmat_prior = prior.to_owned();
        Ok(())
    }

    /// Dirichlet prior over the start distribution.
    pub(crate) fn startprob_dirichlet(&self) -> Result<DirichletParams> {
        DirichletParams::new(self.startprob_prior.to_vec())
            .ok_or_else(|| Error::Configuration("invalid startprob_prior".into()))
    }

    /// Dirichlet prior over transition row `u`.
    pub(crate) fn transmat_dirichlet(&self, u: usize) -> Result<DirichletParams> {
        DirichletParams::new(self.transmat_prior.row(u).to_vec())
            .ok_or_else(|| Error::Configuration(format!("invalid transmat_prior row {u}")))
    }

    // ------------------------------------------------------------------
    // Mean prior
    // ------------------------------------------------------------------

    pub fn mu_prior(&self) -> ArrayView2<'_, f64> {
        self.mu_prior.view()
    }

    /// Set the prior means: `(n_unique,)` when there is one feature, or
    /// `(n_unique, n_features)`.
    pub fn set_mu_prior<D: Dimension>(&mut self, prior: ArrayView<f64, D>) -> Result<()> {
        let mu = coerce_means("mu_prior", prior, self.layout.n_unique(), self.n_features)?;
        check_finite("mu_prior", &mu.view(), f64::MIN, false)?;
        self.mu_prior = mu;
        self.expanded_mu_prior = OnceCell::new();
        Ok(())
    }

    pub fn mu_weight(&self) -> ArrayView1<'_, f64> {
        self.mu_weight.view()
    }

    pub fn set_mu_weight(&mut self, weight: ArrayView1<f64>) -> Result<()> {
        let n = self.layout.n_unique();
        if weight.len() != n {
            return Err(shape_error("mu_weight", format!("({n},)"), weight.shape()));
        }
        check_finite("mu_weight", &weight, 0.0, false)?;
        self.mu_weight = weight.to_owned();
        Ok(())
    }

    /// Prior means in expanded shape `(n_components, n_features)`.
    pub fn expanded_mu_prior(&self) -> &Array2<f64> {
        self.expanded_mu_prior
            .get_or_init(|| self.layout.replicate(&self.mu_prior))
    }

    // ------------------------------------------------------------------
    // Precision prior
    // ------------------------------------------------------------------

    pub fn precision_prior(&self) -> ArrayView<'_, f64, Ix3> {
        self.precision_prior.view()
    }

    /// Set the prior precision matrices.
    ///
    /// Accepted shapes, all with leading dimension `n_unique`:
    /// - `(n_unique,)`: isotropic `s * I`
    /// - `(n_unique, F)`: diagonal
    /// - `(n_unique, F, F)`: full, must be symmetric and positive definite
    pub fn set_precision_prior<D: Dimension>(&mut self, prior: ArrayView<f64, D>) -> Result<()> {
        let n = self.layout.n_unique();
        let f = self.n_features;
        let shape = prior.shape().to_vec();
        if shape.first() != Some(&n) {
            return Err(shape_error(
                "precision_prior",
                format!("leading dimension {n}"),
                &shape,
            ));
        }

        let prior = prior.into_dyn();
        let full = match prior.ndim() {
            1 => {
                let scale = prior
                    .into_dimensionality::<Ix1>()
                    .map_err(|_| shape_error("precision_prior", format!("({n},)"), &shape))?;
                check_finite("precision_prior", &scale, 0.0, true)?;
                let mut out = Array3::zeros((n, f, f));
                for (mut p, &s) in out.outer_iter_mut().zip(scale.iter()) {
                    p.diag_mut().fill(s);
                }
                out
            }
            2 => {
                let diag = prior
                    .into_dimensionality::<Ix2>()
                    .map_err(|_| shape_error("precision_prior", format!("({n}, {f})"), &shape))?;
                if diag.ncols() != f {
                    return Err(shape_error("precision_prior", format!("({n}, {f})"), &shape));
                }
                check_finite("precision_prior", &diag, 0.0, true)?;
                let mut out = Array3::zeros((n, f, f));
                for (mut p, d) in out.outer_iter_mut().zip(diag.outer_iter()) {
                    p.diag_mut().assign(&d);
                }
                out
            }
            3 => {
                let full = prior
                    .into_dimensionality::<Ix3>()
                    .map_err(|_| shape_error("precision_prior", format!("({n}, {f}, {f})"), &shape))?;
                if full.dim() != (n, f, f) {
                    return Err(shape_error("precision_prior", format!("({n}, {f}, {f})"), &shape));
                }
                for (u, p) in full.outer_iter().enumerate() {
                    if !is_symmetric(p, SYMMETRY_TOL) {
                        return Err(Error::Numerical(format!(
                            "precision_prior of unique state {u} is not symmetric"
                        )));
                    }
                    if cholesky(p).is_none() {
                        return Err(Error::NotPositiveDefinite {
                            name: "precision_prior".into(),
                            state: u,
                        });
                    }
                }
                full.to_owned()
            }
            _ => {
                return Err(shape_error(
                    "precision_prior",
                    format!("({n},), ({n}, {f}) or ({n}, {f}, {f})"),
                    &shape,
                ))
            }
        };

        self.precision_prior = full;
        self.expanded_precision_prior = OnceCell::new();
        Ok(())
    }

    pub fn precision_weight(&self) -> ArrayView1<'_, f64> {
        self.precision_weight.view()
    }

    pub fn set_precision_weight(&mut self, weight: ArrayView1<f64>) -> Result<()> {
        let n = self.layout.n_unique();
        if weight.len() != n {
            return Err(shape_error("precision_weight", format!("({n},)"), weight.shape()));
        }
        check_finite("precision_weight", &weight, 0.0, false)?;
        self.precision_weight = weight.to_owned();
        Ok(())
    }

    /// Prior precisions in expanded shape `(n_components, F, F)`.
    pub fn expanded_precision_prior(&self) -> &Array3<f64> {
        self.expanded_precision_prior
            .get_or_init(|| self.layout.replicate(&self.precision_prior))
    }

    /// Prior covariance `P0⁻¹` of unique state `u`.
    pub(crate) fn prior_covariance(&self, u: usize) -> Result<Array2<f64>> {
        spd_inverse(self.precision_prior.index_axis(ndarray::Axis(0), u)).ok_or_else(|| {
            Error::NotPositiveDefinite {
                name: "precision_prior".into(),
                state: u,
            }
        })
    }
}

/// Normalise a means array to `(n_unique, n_features)`.
pub(crate) fn coerce_means<D: Dimension>(
    name: &str,
    a: ArrayView<f64, D>,
    n_unique: usize,
    n_features: usize,
) -> Result<Array2<f64>> {
    let shape = a.shape().to_vec();
    let a = a.into_dyn();
    let out = match a.ndim() {
        1 if n_features == 1 => a
            .into_dimensionality::<Ix1>()
            .ok()
            .map(|v| v.insert_axis(ndarray::Axis(1)).to_owned()),
        2 => a.into_dimensionality::<Ix2>().ok().map(|v| v.to_owned()),
        _ => None,
    };
    match out {
        Some(m) if m.dim() == (n_unique, n_features) => Ok(m),
        _ => Err(shape_error(name, format!("({n_unique}, {n_features})"), &shape)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn store(n_unique: usize, n_tied: usize, n_features: usize) -> PriorStore {
        PriorStore::new(TiedLayout::new(n_unique, n_tied).unwrap(), n_features)
    }

    #[test]
    fn test_defaults_are_flat() {
        let s = store(2, 3, 2);
        assert_eq!(s.startprob_prior(), array![1.0, 1.0]);
        assert_eq!(s.transmat_prior(), Array2::from_elem((2, 2), 1.0));
        assert_eq!(s.mu_weight(), array![0.0, 0.0]);
        assert_eq!(s.expanded_precision_prior().dim(), (6, 2, 2));
        assert_eq!(s.expanded_precision_prior()[[5, 1, 1]], 1.0);
        assert_eq!(s.expanded_precision_prior()[[5, 0, 1]], 0.0);
    }

    #[test]
    fn test_precision_prior_wrong_leading_dimension() {
        let mut s = store(2, 1, 1);
        let before = s.precision_prior().to_owned();
        let err = s
            .set_precision_prior(array![0.7, 0.8, 0.9].view())
            .unwrap_err();
        assert!(matches!(err, Error::Shape { .. }));
        assert_eq!(s.precision_prior(), before);
    }

    #[test]
    fn test_precision_prior_expands_per_unique_row() {
        let mut s = store(2, 2, 1);
        s.set_precision_prior(array![[0.7], [0.3]].view()).unwrap();
        let expanded = s.expanded_precision_prior();
        assert_eq!(expanded.dim(), (4, 1, 1));
        assert_eq!(
            expanded.iter().copied().collect::<Vec<_>>(),
            vec![0.7, 0.7, 0.3, 0.3]
        );
    }

    #[test]
    fn test_precision_prior_isotropic_and_full() {
        let mut s = store(2, 2, 2);
        s.set_precision_prior(array![2.0, 3.0].view()).unwrap();
        assert_eq!(s.precision_prior()[[1, 1, 1]], 3.0);
        assert_eq!(s.precision_prior()[[1, 0, 1]], 0.0);

        let full = array![[[2.0, 0.5], [0.5, 1.0]], [[1.0, 0.0], [0.0, 4.0]]];
        s.set_precision_prior(full.view()).unwrap();
        let expanded = s.expanded_precision_prior();
        assert_eq!(expanded.index_axis(ndarray::Axis(0), 1), full.index_axis(ndarray::Axis(0), 0));
        assert_eq!(expanded.index_axis(ndarray::Axis(0), 2), full.index_axis(ndarray::Axis(0), 1));
    }

    #[test]
    fn test_precision_prior_cache_resets() {
        let mut s = store(2, 2, 1);
        assert_eq!(s.expanded_precision_prior()[[0, 0, 0]], 1.0);
        s.set_precision_prior(array![5.0, 6.0].view()).unwrap();
        assert_eq!(s.expanded_precision_prior()[[1, 0, 0]], 5.0);
        assert_eq!(s.expanded_precision_prior()[[2, 0, 0]], 6.0);
    }

    #[test]
    fn test_precision_prior_rejects_indefinite() {
        let mut s = store(1, 1, 2);
        let bad = array![[[1.0, 2.0], [2.0, 1.0]]];
        let err = s.set_precision_prior(bad.view()).unwrap_err();
        assert!(matches!(err, Error::NotPositiveDefinite { state: 0, .. }));
    }

    #[test]
    fn test_precision_prior_rejects_asymmetric() {
        let mut s = store(1, 1, 2);
        let before = s.precision_prior().to_owned();
        let lopsided = array![[[2.0, 5.0], [0.0, 2.0]]];
        let err = s.set_precision_prior(lopsided.view()).unwrap_err();
        assert!(matches!(err, Error::Numerical(_)));
        assert_eq!(s.precision_prior(), before);
    }

    #[test]
    fn test_precision_prior_rejects_trailing_shape() {
        let mut s = store(2, 1, 2);
        assert!(s.set_precision_prior(array![[1.0], [2.0]].view()).is_err());
        assert!(s.set_precision_prior(array![0.0, 1.0].view()).is_err());
    }

    #[test]
    fn test_mu_prior_univariate_and_expansion() {
        let mut s = store(2, 3, 1);
        s.set_mu_prior(array![0.5, -1.0].view()).unwrap();
        let expanded = s.expanded_mu_prior();
        assert_eq!(expanded.dim(), (6, 1));
        assert_eq!(expanded[[2, 0]], 0.5);
        assert_eq!(expanded[[3, 0]], -1.0);
        assert!(s.set_mu_prior(array![0.5, -1.0, 2.0].view()).is_err());
    }

    #[test]
    fn test_dirichlet_setters_validate() {
        let mut s = store(2, 1, 1);
        assert!(s.set_startprob_prior(array![1.0].view()).is_err());
        assert!(s.set_transmat_prior(array![[1.0, 0.0], [1.0, 1.0]].view()).is_err());
        s.set_transmat_prior(array![[5.0, 1.0], [1.0, 5.0]].view()).unwrap();
        assert_eq!(s.transmat_dirichlet(1).unwrap().alpha, vec![1.0, 5.0]);
    }

    #[test]
    fn test_weights_reject_negative() {
        let mut s = store(2, 1, 1);
        assert!(s.set_mu_weight(array![1.0, -1.0].view()).is_err());
        assert!(s.set_precision_weight(array![1.0, 2.0].view()).is_ok());
        assert_eq!(s.precision_weight(), array![1.0, 2.0]);
    }
}
