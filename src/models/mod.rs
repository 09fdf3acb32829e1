//! Levels curve model.
//!
//! The curve is implemented as small, pure functions so that fitting and
//! rendering code can share one definition.

pub mod model;

pub use model::*;
