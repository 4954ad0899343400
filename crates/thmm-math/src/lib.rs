//! Tied HMM math utilities.

pub mod math;

pub use math::stable::*;
pub use math::dirichlet;
pub use math::gaussian;
pub use math::linalg;
pub use math::normalize::*;
