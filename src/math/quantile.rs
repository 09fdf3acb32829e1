//! Evenly spaced sample quantiles.

/// `count` quantiles of `values` at `0, 1/(count-1), ..., 1`, linearly
/// interpolated between order statistics.
///
/// Returns an empty vector for empty input or `count == 0`.
pub fn quantiles(values: &[f64], count: usize) -> Vec<f64> {
    if values.is_empty() || count == 0 {
        return Vec::new();
    }

    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);

    if count == 1 {
        return vec![sorted[0]];
    }

    let last = (sorted.len() - 1) as f64;
    (0..count)
        .map(|j| {
            let pos = j as f64 / (count as f64 - 1.0) * last;
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(sorted.len() - 1);
            let frac = pos - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        })
        .collect()
}
