//! Mathematical utilities: bounded nonlinear least squares, linear least
//! squares, and sample quantiles.

pub mod dogbox;
pub mod ols;
pub mod quantile;

pub use dogbox::*;
pub use ols::*;
pub use quantile::*;
