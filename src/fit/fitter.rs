//! Single-band fitting.
//!
//! Given two bands `x` (to be leveled) and `y` (to match), both with values in
//! `[0, 255]`, we find the `LevelsAdjustment` minimizing `Σ (level(x_i) - y_i)²`
//! inside the parameter box, using one of two strategies:
//!
//! - **histogram**: compare `samples` evenly spaced quantiles of each band.
//!   Cheap and independent of pixel positions, so it cannot see spatially
//!   varying differences.
//! - **pixels**: compare the bands pixel by pixel. Bands larger than `samples`
//!   are first fit by histogram with a looser tolerance, and that result seeds
//!   the full fit; this speeds up convergence and keeps the solver away from
//!   poor local optima on large, noisy bands.
//!
//! Bands with zero variance are handled before the solver ever runs, according
//! to `DegeneratePolicy`.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::domain::{BandFit, DegeneratePolicy, FitOptions, FitStrategy, LevelsAdjustment};
use crate::error::{AppError, ErrorKind};
use crate::fit::CancelToken;
use crate::math::{LeastSquaresProblem, Linearization, SolverSettings, minimize, quantiles};
use crate::models::level;

/// Residuals per parallel work item. Partial sums are combined in chunk order,
/// so results do not depend on thread scheduling.
const CHUNK: usize = 16 * 1024;

const N: usize = LevelsAdjustment::LEN;

/// Fit by comparing quantiles of the two bands.
pub fn fit_histogram(x: &[f64], y: &[f64], opts: &FitOptions) -> Result<BandFit, AppError> {
    fit_band(x, y, FitStrategy::Histogram, opts)
}

/// Fit by comparing the two bands pixel by pixel.
pub fn fit_pixels(x: &[f64], y: &[f64], opts: &FitOptions) -> Result<BandFit, AppError> {
    fit_band(x, y, FitStrategy::Pixels, opts)
}

/// Fit one band pair with the given strategy.
pub fn fit_band(
    x: &[f64],
    y: &[f64],
    strategy: FitStrategy,
    opts: &FitOptions,
) -> Result<BandFit, AppError> {
    fit_band_with_cancel(x, y, strategy, opts, &CancelToken::new())
}

/// Fit one band pair, giving up with `Cancelled` once `cancel` trips.
pub fn fit_band_with_cancel(
    x: &[f64],
    y: &[f64],
    strategy: FitStrategy,
    opts: &FitOptions,
    cancel: &CancelToken,
) -> Result<BandFit, AppError> {
    opts.validate()?;
    check_lengths(x.len(), y.len())?;
    if x.iter().chain(y).any(|v| !v.is_finite()) {
        return Err(AppError::invalid_input("Band contains non-finite values."));
    }

    let xs = normalize(x.iter().copied());
    let ys = normalize(y.iter().copied());
    fit_normalized(&xs, &ys, strategy, opts, cancel)
}

/// Fit two 8-bit planes, normalizing straight from the bytes.
pub fn fit_plane_with_cancel(
    x: &[u8],
    y: &[u8],
    strategy: FitStrategy,
    opts: &FitOptions,
    cancel: &CancelToken,
) -> Result<BandFit, AppError> {
    opts.validate()?;
    check_lengths(x.len(), y.len())?;

    let xs = normalize(x.iter().map(|&v| f64::from(v)));
    let ys = normalize(y.iter().map(|&v| f64::from(v)));
    fit_normalized(&xs, &ys, strategy, opts, cancel)
}

/// `x` and `y` are already scaled to `[0, 1]`.
fn fit_normalized(
    x: &[f64],
    y: &[f64],
    strategy: FitStrategy,
    opts: &FitOptions,
    cancel: &CancelToken,
) -> Result<BandFit, AppError> {
    if let Some(fit) = degenerate_fit(x, y, opts.degenerate)? {
        return Ok(fit);
    }

    match strategy {
        FitStrategy::Histogram => histogram_fit(x, y, opts.tolerance, opts, cancel),
        FitStrategy::Pixels => pixel_fit(x, y, opts, cancel),
    }
}

fn histogram_fit(
    x: &[f64],
    y: &[f64],
    xtol: f64,
    opts: &FitOptions,
    cancel: &CancelToken,
) -> Result<BandFit, AppError> {
    let xq = quantiles(x, opts.samples);
    let yq = quantiles(y, opts.samples);
    solve(&xq, &yq, LevelsAdjustment::IDENTITY, xtol, opts, cancel)
}

fn pixel_fit(
    x: &[f64],
    y: &[f64],
    opts: &FitOptions,
    cancel: &CancelToken,
) -> Result<BandFit, AppError> {
    let seed = if x.len() > opts.samples {
        let seed = histogram_fit(x, y, opts.seed_tolerance, opts, cancel)?;
        debug!(
            pixels = x.len(),
            evaluations = seed.evaluations,
            seed = ?seed.adjustment,
            "seeded pixel fit from histogram"
        );
        seed.adjustment
    } else {
        LevelsAdjustment::IDENTITY
    };

    solve(x, y, seed, opts.tolerance, opts, cancel)
}

fn solve(
    x: &[f64],
    y: &[f64],
    seed: LevelsAdjustment,
    xtol: f64,
    opts: &FitOptions,
    cancel: &CancelToken,
) -> Result<BandFit, AppError> {
    let problem = CurveProblem { x, y };
    let settings = SolverSettings::new(xtol, opts.max_evaluations);
    let solution = minimize(
        &problem,
        &seed.to_array(),
        &LevelsAdjustment::LOWER,
        &LevelsAdjustment::UPPER,
        &settings,
        cancel,
    )?;

    let rmse = (2.0 * solution.cost / x.len() as f64).sqrt();
    Ok(BandFit {
        adjustment: LevelsAdjustment::from_slice(&solution.x),
        degenerate: false,
        cost: solution.cost,
        rmse,
        evaluations: solution.evaluations,
    })
}

fn check_lengths(x: usize, y: usize) -> Result<(), AppError> {
    if x == 0 || y == 0 {
        return Err(AppError::invalid_input("Cannot fit an empty band."));
    }
    if x != y {
        return Err(AppError::invalid_input(format!(
            "Band lengths differ: {x} vs {y}."
        )));
    }
    Ok(())
}

/// Closed-form result for bands with zero variance, or `None` when the band
/// pair is fit normally.
fn degenerate_fit(
    x: &[f64],
    y: &[f64],
    policy: DegeneratePolicy,
) -> Result<Option<BandFit>, AppError> {
    let x_constant = is_constant(x);
    let y_constant = is_constant(y);
    if !(x_constant || y_constant) {
        return Ok(None);
    }

    if policy == DegeneratePolicy::Reject {
        return Err(AppError::new(
            ErrorKind::DegenerateChannel,
            "Band has zero variance; no unique levels curve fits it.",
        ));
    }

    // Both the identity (same constant) and the flat curve at the target mean
    // are least-squares optima here.
    let adjustment = if x_constant && y_constant && x[0] == y[0] {
        LevelsAdjustment::IDENTITY
    } else {
        LevelsAdjustment::flat(mean(y))
    };

    let cost = 0.5
        * x.iter()
            .zip(y)
            .map(|(&xi, &yi)| {
                let r = level(xi, &adjustment) - yi;
                r * r
            })
            .sum::<f64>();
    let rmse = (2.0 * cost / x.len() as f64).sqrt();

    warn!(
        source_constant = x_constant,
        target_constant = y_constant,
        "zero-variance band, skipping optimizer"
    );

    Ok(Some(BandFit {
        adjustment,
        degenerate: true,
        cost,
        rmse,
        evaluations: 0,
    }))
}

fn is_constant(values: &[f64]) -> bool {
    values.iter().all(|&v| v == values[0])
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn normalize(values: impl Iterator<Item = f64>) -> Vec<f64> {
    values.map(|v| v / 255.0).collect()
}

/// Residuals `level(x_i; p) - y_i` over normalized data.
struct CurveProblem<'a> {
    x: &'a [f64],
    y: &'a [f64],
}

impl LeastSquaresProblem for CurveProblem<'_> {
    fn cost(&self, p: &[f64]) -> f64 {
        let p = LevelsAdjustment::from_slice(p);
        let partial: Vec<f64> = self
            .x
            .par_chunks(CHUNK)
            .zip(self.y.par_chunks(CHUNK))
            .map(|(xs, ys)| {
                xs.iter()
                    .zip(ys)
                    .map(|(&x, &y)| {
                        let r = level(x, &p) - y;
                        r * r
                    })
                    .sum::<f64>()
            })
            .collect();
        0.5 * partial.iter().sum::<f64>()
    }

    fn linearize(&self, p: &[f64], steps: &[f64]) -> Linearization {
        let base = LevelsAdjustment::from_slice(p);
        let mut shifted = [base; N];
        let mut dx = [0.0; N];
        for j in 0..N {
            let mut q = base.to_array();
            q[j] = p[j] + steps[j];
            dx[j] = q[j] - p[j];
            shifted[j] = LevelsAdjustment::from_slice(&q);
        }

        let partial: Vec<NormalSums> = self
            .x
            .par_chunks(CHUNK)
            .zip(self.y.par_chunks(CHUNK))
            .map(|(xs, ys)| {
                let mut acc = NormalSums::default();
                let mut row = [0.0; N];
                for (&x, &y) in xs.iter().zip(ys) {
                    let f0 = level(x, &base);
                    for j in 0..N {
                        row[j] = if dx[j] != 0.0 {
                            (level(x, &shifted[j]) - f0) / dx[j]
                        } else {
                            0.0
                        };
                    }
                    acc.push(f0 - y, &row);
                }
                acc
            })
            .collect();

        partial
            .into_iter()
            .fold(NormalSums::default(), NormalSums::merge)
            .into_linearization()
    }
}

/// Running sums for the normal equations.
#[derive(Debug, Clone, Copy, Default)]
struct NormalSums {
    sse: f64,
    gram: [[f64; N]; N],
    gradient: [f64; N],
}

impl NormalSums {
    fn push(&mut self, r: f64, row: &[f64; N]) {
        self.sse += r * r;
        for a in 0..N {
            self.gradient[a] += row[a] * r;
            for b in a..N {
                self.gram[a][b] += row[a] * row[b];
            }
        }
    }

    fn merge(mut self, other: NormalSums) -> NormalSums {
        self.sse += other.sse;
        for a in 0..N {
            self.gradient[a] += other.gradient[a];
            for b in a..N {
                self.gram[a][b] += other.gram[a][b];
            }
        }
        self
    }

    fn into_linearization(self) -> Linearization {
        // Only the upper triangle was accumulated.
        let gram = DMatrix::from_fn(N, N, |a, b| {
            if a <= b {
                self.gram[a][b]
            } else {
                self.gram[b][a]
            }
        });
        Linearization {
            cost: 0.5 * self.sse,
            gram,
            gradient: DVector::from_row_slice(&self.gradient),
        }
    }
}
