//! Error types for the tied HMM estimator.
//!
//! Every error carries a stable numeric code and a category, so callers
//! can branch on the kind of failure without matching message text.
//!
//! Every error is raised synchronously by the call that triggered it. There
//! is no retry or recovery logic anywhere in the estimator: a shape error
//! leaves the estimator untouched, a numerical error aborts the current
//! call.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for tied HMM operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid construction parameters, masks, or configuration files.
    Config,
    /// Arrays whose shape disagrees with (n_unique, n_tied, n_features).
    Shape,
    /// Singular matrices, non-positive variances, impossible observations.
    Numerical,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Shape => write!(f, "shape"),
            ErrorCategory::Numerical => write!(f, "numerical"),
        }
    }
}

/// Unified error type for the tied HMM crates.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid parameter code '{0}' (expected one of s, t, m, p, w)")]
    InvalidParamCode(char),

    // Shape errors (20-29)
    #[error("shape mismatch for {name}: expected {expected}, got {actual}")]
    Shape {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("no observations provided")]
    EmptyObservations,

    // Numerical errors (30-39)
    #[error("numerical error: {0}")]
    Numerical(String),

    #[error("{name} for unique state {state} is not positive definite")]
    NotPositiveDefinite { name: String, state: usize },
}

impl Error {
    /// Convenience constructor for shape mismatches.
    pub fn shape(
        name: impl Into<String>,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        Error::Shape {
            name: name.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Shape errors
    /// - 30-39: Numerical errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Configuration(_) => 10,
            Error::InvalidParamCode(_) => 11,
            Error::Shape { .. } => 20,
            Error::EmptyObservations => 21,
            Error::Numerical(_) => 30,
            Error::NotPositiveDefinite { .. } => 31,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Configuration(_) | Error::InvalidParamCode(_) => ErrorCategory::Config,
            Error::Shape { .. } | Error::EmptyObservations => ErrorCategory::Shape,
            Error::Numerical(_) | Error::NotPositiveDefinite { .. } => ErrorCategory::Numerical,
        }
    }
}
