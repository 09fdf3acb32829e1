//! Levels fitting orchestration.
//!
//! Responsibilities:
//!
//! - fit one band pair with the bounded solver (pixels or histogram)
//! - short-circuit degenerate bands
//! - fit all channels of an image pair concurrently on a worker pool

pub mod cancel;
pub mod fitter;
pub mod matcher;

pub use cancel::*;
pub use fitter::*;
pub use matcher::*;
