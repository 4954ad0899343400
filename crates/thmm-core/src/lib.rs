//! Tied-state Gaussian hidden Markov model estimator.
//!
//! A small number of *unique* semantic states is expanded into a lattice of
//! `n_unique * n_tied` internal states. Replicas of a unique state share its
//! Gaussian emission parameters and form a left-to-right sub-chain, which
//! gives every unique state a minimum dwell time of `n_tied` steps.
//!
//! The public parameter surface is always unique-space; expanded arrays are
//! rebuilt from it on every pass.

pub mod config;
pub mod inference;
pub mod logging;

pub use config::{load_config, ConfigError, ConfigOptions, PriorConfig, ResolvedConfig, ThmmConfig};
pub use inference::estimator::{FitReport, TiedHmm};
pub use inference::expand::{Reduction, TiedLayout};
pub use inference::priors::PriorStore;
pub use thmm_common::{CovarianceKind, Error, ParamKind, ParamsMask, Result};
