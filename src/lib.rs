//! `levels-match` library crate.
//!
//! The binary (`levels`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the fitter can be embedded by other tools (batch jobs, GUIs)

pub mod app;
pub mod cli;
pub mod domain;
pub mod error;
pub mod fit;
pub mod imaging;
pub mod io;
pub mod math;
pub mod models;
pub mod plot;
pub mod report;
