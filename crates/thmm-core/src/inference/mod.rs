//! Tied-state HMM inference.
//!
//! - [`expand`]: index arithmetic between unique and expanded state spaces
//! - [`priors`]: prior hyperparameters with cached expanded views
//! - [`emission`]: Gaussian emission densities and sampling
//! - [`forward_backward`]: log-space recursions over the expanded lattice
//! - [`init`]: data-driven starting values
//! - [`estimator`]: the EM estimator tying the pieces together

pub mod emission;
pub mod estimator;
pub mod expand;
pub mod forward_backward;
pub mod init;
pub mod priors;
