//! Levels curve evaluation.
//!
//! The fitter relies on two primitive operations:
//! - evaluate the curve at one normalized value (solver residuals)
//! - evaluate it over a whole slice (pixel/quantile vectors)
//!
//! Rendering additionally bakes the curve into a 256-entry lookup table.

use crate::domain::LevelsAdjustment;

/// Evaluate the levels curve at `x` (normalized to `[0, 1]`).
///
/// `t = clip((x - ib) / (iw - ib), 0, 1) ^ gamma`, then
/// `y = clip(t * (ow - ob) + ob, 0, 1)`.
///
/// When `iw == ib` the rescale degenerates to its limit, a hard threshold at
/// `ib`, so the result is always finite.
pub fn level(x: f64, p: &LevelsAdjustment) -> f64 {
    let span = p.input_white - p.input_black;
    let t = if span == 0.0 {
        if x > p.input_black { 1.0 } else { 0.0 }
    } else {
        ((x - p.input_black) / span).clamp(0.0, 1.0)
    };
    // NaN from a non-finite parameter collapses to black.
    let t = t.powf(p.gamma);
    let y = t * (p.output_white - p.output_black) + p.output_black;
    if y.is_nan() { 0.0 } else { y.clamp(0.0, 1.0) }
}

/// Evaluate the curve over a slice of normalized values.
pub fn level_slice(values: &[f64], p: &LevelsAdjustment) -> Vec<f64> {
    values.iter().map(|&x| level(x, p)).collect()
}

/// Bake the curve into an 8-bit lookup table: `rint(level(i / 255) * 255)`.
pub fn lookup_table(p: &LevelsAdjustment) -> [u8; 256] {
    let mut table = [0u8; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        let y = level(i as f64 / 255.0, p) * 255.0;
        // `level` is clamped to [0, 1], so the cast cannot saturate.
        *slot = y.round_ties_even() as u8;
    }
    table
}
