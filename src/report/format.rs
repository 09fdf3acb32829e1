//! Formatted terminal output for match and apply runs.
//!
//! We keep formatting code in one place so:
//! - the fitting code stays clean and testable
//! - output changes are localized

use crate::domain::{ChannelFit, ColorMode, LevelsAdjustment, MatchConfig};
use crate::io::params::ParamsFile;

/// Format the run header plus the per-channel fit table.
pub fn format_run_summary(config: &MatchConfig, mode: ColorMode, fits: &[ChannelFit]) -> String {
    let mut out = String::new();

    out.push_str("=== levels - Levels Match ===\n");
    out.push_str(&format!("To level: {}\n", config.to_level.display()));
    out.push_str(&format!("To match: {}\n", config.to_match.display()));
    if let Some(input) = &config.input {
        out.push_str(&format!("Input: {}\n", input.display()));
    }
    out.push_str(&format!(
        "Mode: {} | Strategy: {} | tol={:.3e} samples={}\n",
        mode.display_name(),
        config.strategy.display_name(),
        config.options.tolerance,
        config.options.samples,
    ));

    out.push_str("\nChannel fits (8-bit scale):\n");
    out.push_str(&format_fit_table(fits));
    out.push('\n');

    out
}

/// Table of fitted channels: black/white points on the 0..255 scale, gamma,
/// RMSE in 8-bit levels and solver evaluations.
pub fn format_fit_table(fits: &[ChannelFit]) -> String {
    let mut out = header();
    for c in fits {
        let note = if c.fit.degenerate { "degenerate" } else { "" };
        out.push_str(&row(
            &c.label,
            &c.fit.adjustment,
            &format!("{:.3}", c.fit.rmse * 255.0),
            &c.fit.evaluations.to_string(),
            note,
        ));
    }
    out
}

/// Summary of a params file about to be applied.
pub fn format_params_summary(params: &ParamsFile) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Params: mode={} strategy={} generated={}\n",
        params.mode.display_name(),
        params.strategy.display_name(),
        params.generated.to_rfc3339(),
    ));
    out.push_str(&header());
    for c in &params.channels {
        let note = if c.degenerate { "degenerate" } else { "" };
        out.push_str(&row(&c.label, &c.adjustment, &format!("{:.3}", c.rmse * 255.0), "-", note));
    }
    out
}

fn header() -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:<7} {:>8} {:>8} {:>9} {:>9} {:>7} {:>8} {:>6} {:<10}",
            "channel", "in_black", "in_white", "out_black", "out_white", "gamma", "rmse", "evals", "note"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(
        format!(
            "{:-<7} {:-<8} {:-<8} {:-<9} {:-<9} {:-<7} {:-<8} {:-<6} {:-<10}",
            "", "", "", "", "", "", "", "", ""
        )
        .trim_end(),
    );
    out.push('\n');
    out
}

fn row(label: &str, p: &LevelsAdjustment, rmse: &str, evals: &str, note: &str) -> String {
    let [ib, iw, ob, ow, gamma] = p.to_8bit();
    let mut line = format!(
        "{:<7} {:>8.2} {:>8.2} {:>9.2} {:>9.2} {:>7.3} {:>8} {:>6} {:<10}",
        truncate(label, 7),
        ib,
        iw,
        ob,
        ow,
        gamma,
        rmse,
        evals,
        note
    )
    .trim_end()
    .to_string();
    line.push('\n');
    line
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}
