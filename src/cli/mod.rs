//! Command-line parsing for the levels matcher.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the fitting code.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::{ColorMode, DegeneratePolicy, FitOptions, FitStrategy};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "levels",
    version,
    about = "Recover the levels adjustment between two images and apply it"
)]
pub struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit per-channel levels from an image pair and apply them.
    Match(MatchArgs),
    /// Apply levels saved by `levels match --export-params` to an image.
    Apply(ApplyArgs),
}

#[derive(Debug, Parser, Clone)]
pub struct MatchArgs {
    /// Original image, before the adjustment.
    #[arg(default_value = "tolevel.png")]
    pub to_level: PathBuf,

    /// The same image after the adjustment.
    #[arg(default_value = "tomatch.png")]
    pub to_match: PathBuf,

    /// Where to write the leveled image.
    #[arg(short, long, default_value = "output.png")]
    pub output: PathBuf,

    /// Image to apply the fitted levels to (defaults to TO_LEVEL).
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Working mode (negotiated from the images when omitted).
    #[arg(short, long, value_enum)]
    pub mode: Option<ColorMode>,

    /// Compare pixels positionally or by histogram quantiles.
    #[arg(short, long, value_enum, default_value_t = FitStrategy::Pixels)]
    pub strategy: FitStrategy,

    /// Relative step tolerance of the final fit.
    #[arg(long, default_value_t = FitOptions::DEFAULT_TOLERANCE)]
    pub tolerance: f64,

    /// Step tolerance of the histogram fit that seeds a pixel fit.
    #[arg(long, default_value_t = FitOptions::DEFAULT_SEED_TOLERANCE)]
    pub seed_tolerance: f64,

    /// Quantiles compared by the histogram strategy.
    #[arg(long, default_value_t = FitOptions::DEFAULT_SAMPLES)]
    pub samples: usize,

    /// Residual evaluations allowed per channel fit.
    #[arg(long, default_value_t = FitOptions::DEFAULT_MAX_EVALUATIONS)]
    pub max_evaluations: usize,

    /// What to do with constant channels.
    #[arg(long, value_enum, default_value_t = DegeneratePolicy::ShortCircuit)]
    pub degenerate: DegeneratePolicy,

    /// Worker threads for channel fits (0 = all cores).
    #[arg(short = 'j', long, default_value_t = 0)]
    pub threads: usize,

    /// Save the fitted parameters to JSON.
    #[arg(long = "export-params", value_name = "JSON")]
    pub export_params: Option<PathBuf>,

    /// Render each channel's curve as an ASCII plot.
    #[arg(long)]
    pub plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 64)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 20)]
    pub height: usize,
}

#[derive(Debug, Parser, Clone)]
pub struct ApplyArgs {
    /// Params JSON produced by `levels match --export-params`.
    #[arg(short, long, value_name = "JSON")]
    pub params: PathBuf,

    /// Image to level.
    pub input: PathBuf,

    /// Where to write the leveled image.
    #[arg(short, long, default_value = "output.png")]
    pub output: PathBuf,

    /// Render each channel's curve as an ASCII plot.
    #[arg(long)]
    pub plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 64)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 20)]
    pub height: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn match_defaults_follow_the_classic_filenames() {
        let cli = Cli::parse_from(["levels", "match"]);
        let Command::Match(args) = cli.command else {
            panic!("expected match");
        };
        assert_eq!(args.to_level, PathBuf::from("tolevel.png"));
        assert_eq!(args.to_match, PathBuf::from("tomatch.png"));
        assert_eq!(args.output, PathBuf::from("output.png"));
        assert_eq!(args.strategy, FitStrategy::Pixels);
        assert_eq!(args.degenerate, DegeneratePolicy::ShortCircuit);
        assert!(args.mode.is_none());
    }

    #[test]
    fn match_options_parse() {
        let cli = Cli::parse_from([
            "levels", "-vv", "match", "a.png", "b.png", "-o", "c.png", "--mode", "rgba",
            "--strategy", "histogram", "--degenerate", "reject", "-j", "2",
        ]);
        assert_eq!(cli.verbose, 2);
        let Command::Match(args) = cli.command else {
            panic!("expected match");
        };
        assert_eq!(args.mode, Some(ColorMode::Rgba));
        assert_eq!(args.strategy, FitStrategy::Histogram);
        assert_eq!(args.degenerate, DegeneratePolicy::Reject);
        assert_eq!(args.threads, 2);
    }
}
