//! Input/output helpers.
//!
//! - image decode/encode (`image`)
//! - fitted parameter JSON read/write (`params`)

pub mod image;
pub mod params;

pub use self::image::*;
pub use self::params::*;
