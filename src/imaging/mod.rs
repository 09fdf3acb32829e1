//! Pixel-level collaborators of the fitter.
//!
//! - `bands`: split images into labelled 8-bit planes
//! - `modes`: pick a common working mode for a set of images
//! - `render`: bake fitted curves into lookup tables and apply them

pub mod bands;
pub mod modes;
pub mod render;

pub use bands::Bands;
pub use modes::{convert, determine_common_mode, mode_of};
pub use render::level_image;
