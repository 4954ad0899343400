//! Tied HMM common types and errors.
//!
//! This crate provides foundational types shared across the thmm crates:
//! - The unified error taxonomy with stable codes
//! - Parameter kinds and the per-kind enable mask
//! - The covariance parameterisation switch

pub mod error;
pub mod params;

pub use error::{Error, ErrorCategory, Result};
pub use params::{CovarianceKind, ParamKind, ParamsMask};
