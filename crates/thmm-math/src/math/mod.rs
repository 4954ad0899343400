//! Core math modules.

pub mod stable;
pub mod dirichlet;
pub mod gaussian;
pub mod linalg;
pub mod normalize;
