//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the fitted curve (`LevelsAdjustment`)
//! - fit configuration (`FitStrategy`, `FitOptions`, `DegeneratePolicy`)
//! - fit outputs (`BandFit`, `ChannelFit`)
//! - working pixel layouts (`ColorMode`) and run configuration (`MatchConfig`)

pub mod types;

pub use types::*;
