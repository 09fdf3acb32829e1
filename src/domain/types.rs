//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - exported to JSON
//! - reloaded later to re-apply a fit to another image

use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Levels adjustment for a single band.
///
/// All points are normalized to `[0, 1]`; `gamma` lies in `[0, inf)`. No order
/// is enforced between the black and white points, so a fit may invert a band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelsAdjustment {
    pub input_black: f64,
    pub input_white: f64,
    pub output_black: f64,
    pub output_white: f64,
    pub gamma: f64,
}

impl LevelsAdjustment {
    /// Number of fitted parameters.
    pub const LEN: usize = 5;

    pub const IDENTITY: LevelsAdjustment = LevelsAdjustment {
        input_black: 0.0,
        input_white: 1.0,
        output_black: 0.0,
        output_white: 1.0,
        gamma: 1.0,
    };

    /// Lower box bounds, in parameter-vector order.
    pub const LOWER: [f64; 5] = [0.0, 0.0, 0.0, 0.0, 0.0];

    /// Upper box bounds, in parameter-vector order.
    pub const UPPER: [f64; 5] = [1.0, 1.0, 1.0, 1.0, f64::INFINITY];

    /// A curve that maps every input to `level`.
    pub fn flat(level: f64) -> Self {
        let level = level.clamp(0.0, 1.0);
        Self {
            output_black: level,
            output_white: level,
            ..Self::IDENTITY
        }
    }

    /// Parameter vector `[ib, iw, ob, ow, gamma]` as seen by the solver.
    pub fn to_array(self) -> [f64; 5] {
        [
            self.input_black,
            self.input_white,
            self.output_black,
            self.output_white,
            self.gamma,
        ]
    }

    pub fn from_slice(p: &[f64]) -> Self {
        Self {
            input_black: p[0],
            input_white: p[1],
            output_black: p[2],
            output_white: p[3],
            gamma: p[4],
        }
    }

    /// Parameters rescaled to the familiar 8-bit editor ranges (gamma unchanged).
    pub fn to_8bit(self) -> [f64; 5] {
        [
            self.input_black * 255.0,
            self.input_white * 255.0,
            self.output_black * 255.0,
            self.output_white * 255.0,
            self.gamma,
        ]
    }

    /// Whether every value lies inside the solver's box bounds.
    pub fn within_bounds(self) -> bool {
        self.to_array()
            .iter()
            .zip(Self::LOWER.iter().zip(Self::UPPER.iter()))
            .all(|(&v, (&lo, &hi))| v >= lo && v <= hi)
    }
}

impl Default for LevelsAdjustment {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// How a band pair is compared during fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FitStrategy {
    /// Pixel-to-pixel fit. Uses positional correspondence; seeded from a
    /// histogram fit on large bands.
    Pixels,
    /// Quantile-to-quantile fit. Ignores pixel positions entirely, roughly what
    /// the histogram panel of an image editor shows.
    Histogram,
}

impl FitStrategy {
    pub fn display_name(self) -> &'static str {
        match self {
            FitStrategy::Pixels => "pixels",
            FitStrategy::Histogram => "histogram",
        }
    }
}

/// What to do with a band that has zero variance in either image.
///
/// Such bands do not determine a unique curve, so the optimizer result would be
/// arbitrary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DegeneratePolicy {
    /// Skip the optimizer and return the closed-form least-squares curve:
    /// identity when both bands hold the same constant, otherwise a flat curve
    /// at the target mean. The fit is flagged as degenerate.
    ShortCircuit,
    /// Fail the band with a `DegenerateChannel` error.
    Reject,
}

/// Solver settings threaded through every fit call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    /// Relative step tolerance of the final fit.
    pub tolerance: f64,
    /// Looser step tolerance for the histogram fit that seeds a pixel fit.
    pub seed_tolerance: f64,
    /// Number of quantiles compared by the histogram strategy. Pixel fits on
    /// bands larger than this are seeded from a histogram fit.
    pub samples: usize,
    /// Residual evaluations allowed before the fit is declared non-convergent.
    pub max_evaluations: usize,
    pub degenerate: DegeneratePolicy,
}

impl FitOptions {
    pub const DEFAULT_TOLERANCE: f64 = 1.0 / 1024.0;
    pub const DEFAULT_SEED_TOLERANCE: f64 = 1.0 / 256.0;
    pub const DEFAULT_SAMPLES: usize = 2048;
    /// 100 evaluations per fitted parameter.
    pub const DEFAULT_MAX_EVALUATIONS: usize = 100 * LevelsAdjustment::LEN;

    pub fn validate(&self) -> Result<(), AppError> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(AppError::config(format!(
                "Invalid tolerance {} (must be finite and > 0).",
                self.tolerance
            )));
        }
        if !(self.seed_tolerance.is_finite() && self.seed_tolerance > 0.0) {
            return Err(AppError::config(format!(
                "Invalid seed tolerance {} (must be finite and > 0).",
                self.seed_tolerance
            )));
        }
        if self.samples < 2 {
            return Err(AppError::config("Sample count must be >= 2."));
        }
        if self.max_evaluations == 0 {
            return Err(AppError::config("Max evaluations must be > 0."));
        }
        Ok(())
    }
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            tolerance: Self::DEFAULT_TOLERANCE,
            seed_tolerance: Self::DEFAULT_SEED_TOLERANCE,
            samples: Self::DEFAULT_SAMPLES,
            max_evaluations: Self::DEFAULT_MAX_EVALUATIONS,
            degenerate: DegeneratePolicy::ShortCircuit,
        }
    }
}

/// One fitted band plus solver diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandFit {
    pub adjustment: LevelsAdjustment,
    /// Set when the band had zero variance and the optimizer was skipped.
    pub degenerate: bool,
    /// `0.5 * Σ r_i²` on the normalized data the final fit used.
    pub cost: f64,
    pub rmse: f64,
    /// Residual evaluations spent by the final fit (seed fit excluded).
    pub evaluations: usize,
}

/// Matcher output for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelFit {
    pub index: usize,
    pub label: String,
    pub fit: BandFit,
}

/// Pixel layouts the tool fits and renders in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// Luminance.
    L,
    /// Luminance + alpha.
    La,
    Rgb,
    Rgba,
}

impl ColorMode {
    pub const ALL: [ColorMode; 4] = [ColorMode::L, ColorMode::La, ColorMode::Rgb, ColorMode::Rgba];

    pub fn channel_labels(self) -> &'static [&'static str] {
        match self {
            ColorMode::L => &["L"],
            ColorMode::La => &["L", "A"],
            ColorMode::Rgb => &["R", "G", "B"],
            ColorMode::Rgba => &["R", "G", "B", "A"],
        }
    }

    pub fn channel_count(self) -> usize {
        self.channel_labels().len()
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ColorMode::L => "L",
            ColorMode::La => "LA",
            ColorMode::Rgb => "RGB",
            ColorMode::Rgba => "RGBA",
        }
    }

    /// Modes whose images can be stored in `self` without loss.
    pub fn supports(self, other: ColorMode) -> bool {
        match self {
            ColorMode::L => other == ColorMode::L,
            ColorMode::La => matches!(other, ColorMode::L | ColorMode::La),
            ColorMode::Rgb => matches!(other, ColorMode::L | ColorMode::Rgb),
            ColorMode::Rgba => true,
        }
    }
}

/// Configuration for one `levels match` run.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Image whose levels are adjusted.
    pub to_level: PathBuf,
    /// Already-adjusted image to compare against.
    pub to_match: PathBuf,
    /// Image the fitted curves are applied to (defaults to `to_level`).
    pub input: Option<PathBuf>,
    pub output: PathBuf,
    /// Forced working mode; negotiated from the images when `None`.
    pub mode: Option<ColorMode>,
    pub strategy: FitStrategy,
    pub options: FitOptions,
    /// Worker threads for per-channel fits (`0` = available parallelism).
    pub threads: usize,
    pub export_params: Option<PathBuf>,
    pub plot: bool,
    pub plot_width: usize,
    pub plot_height: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_round_trips_through_array() {
        let p = LevelsAdjustment::from_slice(&LevelsAdjustment::IDENTITY.to_array());
        assert_eq!(p, LevelsAdjustment::IDENTITY);
        assert!(p.within_bounds());
    }

    #[test]
    fn gamma_has_no_upper_bound() {
        let p = LevelsAdjustment {
            gamma: 40.0,
            ..LevelsAdjustment::IDENTITY
        };
        assert!(p.within_bounds());
        let bad = LevelsAdjustment {
            input_white: 1.5,
            ..LevelsAdjustment::IDENTITY
        };
        assert!(!bad.within_bounds());
    }

    #[test]
    fn default_options_validate() {
        assert!(FitOptions::default().validate().is_ok());
        let bad = FitOptions {
            tolerance: 0.0,
            ..FitOptions::default()
        };
        assert_eq!(
            bad.validate().unwrap_err().kind(),
            crate::error::ErrorKind::Config
        );
    }

    #[test]
    fn rgba_supports_every_mode() {
        for mode in ColorMode::ALL {
            assert!(ColorMode::Rgba.supports(mode));
        }
        assert!(!ColorMode::Rgb.supports(ColorMode::La));
        assert!(!ColorMode::La.supports(ColorMode::Rgb));
    }
}
