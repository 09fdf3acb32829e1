//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and installs logging
//! - runs the match or apply pipeline
//! - prints reports/plots
//! - writes the leveled image and optional exports

use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::{ApplyArgs, Command, MatchArgs};
use crate::domain::{FitOptions, MatchConfig};
use crate::error::AppError;
use crate::imaging::Bands;
use crate::math::quantiles;

pub mod pipeline;

/// Quantile pairs overlaid on `--plot` charts.
const PLOT_SAMPLES: usize = 24;

/// Entry point for the `levels` binary.
pub fn run() -> Result<(), AppError> {
    // `levels a.png b.png` and bare `levels` behave like `levels match ...`.
    //
    // Clap requires a subcommand name, so we do a small, explicit rewrite of the
    // argv list before parsing.
    let argv = rewrite_args(std::env::args().collect());
    let cli = crate::cli::Cli::parse_from(argv);
    init_logging(cli.verbose);

    match cli.command {
        Command::Match(args) => handle_match(args),
        Command::Apply(args) => handle_apply(args),
    }
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    // A second install (tests, embedding) is harmless.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

fn handle_match(args: MatchArgs) -> Result<(), AppError> {
    let config = match_config_from_args(&args);
    config.options.validate()?;
    let run = pipeline::run_match(&config)?;

    println!(
        "{}",
        crate::report::format_run_summary(&config, run.mode, &run.fits)
    );

    if config.plot {
        for c in &run.fits {
            let samples = quantile_pairs(&run.to_level, &run.to_match, c.index);
            let plot = crate::plot::render_curve_plot_with_samples(
                &c.label,
                &c.fit.adjustment,
                &samples,
                config.plot_width,
                config.plot_height,
            );
            println!("{plot}");
        }
    }

    if let Some(path) = &config.export_params {
        let params = crate::io::params::ParamsFile::from_fits(run.mode, config.strategy, &run.fits);
        crate::io::params::write_params_json(path, &params)?;
        info!(path = %path.display(), "wrote params");
    }

    crate::io::image::save_image(&config.output, &run.leveled)?;
    println!("{} saved", config.output.display());
    Ok(())
}

fn handle_apply(args: ApplyArgs) -> Result<(), AppError> {
    let params = crate::io::params::read_params_json(&args.params)?;
    let input = crate::io::image::load_image(&args.input)?;
    let leveled = pipeline::run_apply(&params, &input)?;

    println!("{}", crate::report::format_params_summary(&params));

    if args.plot {
        for c in &params.channels {
            let plot = crate::plot::render_curve_plot(&c.label, &c.adjustment, args.width, args.height);
            println!("{plot}");
        }
    }

    crate::io::image::save_image(&args.output, &leveled)?;
    println!("{} saved", args.output.display());
    Ok(())
}

pub fn match_config_from_args(args: &MatchArgs) -> MatchConfig {
    MatchConfig {
        to_level: args.to_level.clone(),
        to_match: args.to_match.clone(),
        input: args.input.clone(),
        output: args.output.clone(),
        mode: args.mode,
        strategy: args.strategy,
        options: FitOptions {
            tolerance: args.tolerance,
            seed_tolerance: args.seed_tolerance,
            samples: args.samples,
            max_evaluations: args.max_evaluations,
            degenerate: args.degenerate,
        },
        threads: args.threads,
        export_params: args.export_params.clone(),
        plot: args.plot,
        plot_width: args.width,
        plot_height: args.height,
    }
}

/// Matched quantiles of one channel, in 8-bit units.
fn quantile_pairs(x: &Bands, y: &Bands, index: usize) -> Vec<(f64, f64)> {
    let xq = quantiles(&x.channel_values(index), PLOT_SAMPLES);
    let yq = quantiles(&y.channel_values(index), PLOT_SAMPLES);
    xq.into_iter().zip(yq).collect()
}

/// Rewrite argv so `levels` defaults to `levels match`.
///
/// Rules:
/// - `levels`                       -> `levels match`
/// - `levels a.png b.png ...`       -> `levels match a.png b.png ...`
/// - `levels -v a.png b.png`        -> `levels -v match a.png b.png`
/// - `levels --help/--version/-h`   -> unchanged (show top-level help/version)
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    // Global verbosity flags may precede the subcommand.
    let first = argv
        .iter()
        .skip(1)
        .position(|a| !is_verbosity_flag(a))
        .map(|i| i + 1);

    let Some(first) = first else {
        argv.push("match".to_string());
        return argv;
    };

    let arg = argv[first].as_str();
    let is_top_level_help_or_version =
        matches!(arg, "-h" | "--help" | "-V" | "--version" | "help");
    let is_subcommand = matches!(arg, "match" | "apply");
    if !(is_top_level_help_or_version || is_subcommand) {
        argv.insert(first, "match".to_string());
    }
    argv
}

fn is_verbosity_flag(arg: &str) -> bool {
    arg == "--verbose" || (arg.len() > 1 && arg.starts_with('-') && arg[1..].chars().all(|c| c == 'v'))
}
