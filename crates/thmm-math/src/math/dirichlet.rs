//! Dirichlet priors over probability vectors.
//!
//! Start probabilities and every row of the unique transition matrix carry
//! a Dirichlet prior. The M-step uses the posterior mode:
//! - Prior: `p ~ Dirichlet(α_1..α_K)`
//! - Expected counts: `n = (n_1..n_K)` from the forward-backward pass
//! - Posterior: `p | n ~ Dirichlet(α_i + n_i)`
//! - MAP: `p_i ∝ max(α_i + n_i - 1, 0)`
//!
//! With all `α_i = 1` the MAP estimate is the maximum-likelihood estimate.

use super::normalize::normalize;
use ndarray::{Array1, Axis};
use serde::{Deserialize, Serialize};

/// Floor applied to MAP components before renormalisation.
pub const MAP_FLOOR: f64 = 1e-20;

/// Parameters for a Dirichlet distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirichletParams {
    /// Concentration parameters (all must be > 0)
    pub alpha: Vec<f64>,
}

impl DirichletParams {
    /// Create new Dirichlet parameters with validation.
    ///
    /// Returns None if any parameter is non-positive, NaN, or if the vector is empty.
    pub fn new(alpha: Vec<f64>) -> Option<Self> {
        if alpha.is_empty() {
            return None;
        }
        for &a in &alpha {
            if a.is_nan() || a <= 0.0 {
                return None;
            }
        }
        Some(Self { alpha })
    }

    /// Flat prior with all α_i = 1.
    pub fn uniform(k: usize) -> Option<Self> {
        Self::new(vec![1.0; k])
    }

    /// Number of categories K.
    pub fn k(&self) -> usize {
        self.alpha.len()
    }

    /// Mode of the distribution, `p_i ∝ max(α_i - 1, 0)`.
    ///
    /// Components are floored at [`MAP_FLOOR`] before renormalising, so the
    /// result is always a proper probability vector, including when every
    /// α_i ≤ 1 (the result is then uniform).
    pub fn mode(&self) -> Array1<f64> {
        let mut mode: Array1<f64> = self
            .alpha
            .iter()
            .map(|&a| (a - 1.0).max(0.0).max(MAP_FLOOR))
            .collect();
        normalize(&mut mode, Axis(0));
        mode
    }
}

/// Posterior parameters `α_i + n_i` after observing (expected) counts.
///
/// Returns None if the counts do not match the prior or are negative/NaN.
pub fn posterior_params(prior: &DirichletParams, counts: &[f64]) -> Option<DirichletParams> {
    if counts.len() != prior.k() {
        return None;
    }
    for &c in counts {
        if c.is_nan() || c < 0.0 {
            return None;
        }
    }

    let new_alpha: Vec<f64> = prior
        .alpha
        .iter()
        .zip(counts.iter())
        .map(|(&a, &n)| a + n)
        .collect();

    DirichletParams::new(new_alpha)
}

/// MAP estimate of a probability vector from expected counts.
///
/// Returns None if the counts do not match the prior or are invalid.
pub fn map_estimate(prior: &DirichletParams, counts: &[f64]) -> Option<Array1<f64>> {
    posterior_params(prior, counts).map(|post| post.mode())
}
