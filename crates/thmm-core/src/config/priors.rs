//! Prior strengths applied when the estimator is built from configuration.
//!
//! These are scalar hyperparameters; per-state prior arrays are set on the
//! estimator's [`PriorStore`](crate::inference::priors::PriorStore) directly.

use serde::{Deserialize, Serialize};

/// Scalar prior hyperparameters.
///
/// Defaults reduce every update to maximum likelihood.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PriorConfig {
    /// Symmetric Dirichlet concentration on the start distribution.
    pub startprob_concentration: f64,
    /// Symmetric Dirichlet concentration on every transition row.
    pub transmat_concentration: f64,
    /// Pseudo-count pulling means toward the mean prior (0 disables).
    pub mu_weight: f64,
    /// Pseudo-count pulling precisions toward the precision prior (0 disables).
    pub precision_weight: f64,
    /// Isotropic scale of the default precision prior, `scale * I`.
    pub precision_scale: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            startprob_concentration: 1.0,
            transmat_concentration: 1.0,
            mu_weight: 0.0,
            precision_weight: 0.0,
            precision_scale: 1.0,
        }
    }
}

impl PriorConfig {
    /// Check ranges; returns a description of the first violation.
    pub fn validate(&self) -> Result<(), String> {
        let positive = [
            ("startprob_concentration", self.startprob_concentration),
            ("transmat_concentration", self.transmat_concentration),
            ("precision_scale", self.precision_scale),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(format!("priors.{name} must be finite and > 0, got {value}"));
            }
        }
        let non_negative = [
            ("mu_weight", self.mu_weight),
            ("precision_weight", self.precision_weight),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("priors.{name} must be finite and >= 0, got {value}"));
            }
        }
        Ok(())
    }
}
