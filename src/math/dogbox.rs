//! Bounded nonlinear least squares.
//!
//! Minimizes `½ Σ r_i(p)²` subject to `lower <= p <= upper` with a dogleg
//! trust-region method whose trust region is a box ("dogbox"):
//!
//! - parameters sitting on a bound whose gradient points out of the box are
//!   frozen for the iteration; the rest form the free set
//! - the step is a dogleg between the Cauchy point and the Gauss-Newton step,
//!   clipped to the intersection of the trust box and the bounds
//! - the Jacobian comes from forward differences, with steps flipped inwards
//!   at the bounds
//!
//! Problems only ever hand back `JᵀJ` and `Jᵀr` (see `LeastSquaresProblem`),
//! so memory stays independent of the number of residuals.
//!
//! Termination mirrors the usual least-squares conventions: gradient norm
//! (`gtol`), relative cost change (`ftol`), relative step size (`xtol`). Running
//! out of residual evaluations is an error, never a silent "best effort".

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::error::{AppError, ErrorKind};
use crate::fit::CancelToken;
use crate::math::solve_least_squares;

/// √ε, the relative forward-difference step.
const DIFF_STEP: f64 = 1.490_116_119_384_765_6e-8;

/// Relative distance below which a parameter counts as sitting on its bound.
const ACTIVE_RTOL: f64 = 1e-10;

/// Local linear model of a problem at one parameter vector.
#[derive(Debug, Clone)]
pub struct Linearization {
    /// `½ Σ r_i²`.
    pub cost: f64,
    /// `JᵀJ`.
    pub gram: DMatrix<f64>,
    /// `Jᵀr`.
    pub gradient: DVector<f64>,
}

/// A residual vector the solver can evaluate and linearize.
pub trait LeastSquaresProblem {
    /// `½ Σ r_i(p)²`. Non-finite values make the solver shrink its step.
    fn cost(&self, p: &[f64]) -> f64;

    /// Cost, `JᵀJ` and `Jᵀr` at `p`, where column `j` of `J` is the forward
    /// difference of the residuals along `steps[j]`.
    fn linearize(&self, p: &[f64], steps: &[f64]) -> Linearization;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSettings {
    pub xtol: f64,
    pub ftol: f64,
    pub gtol: f64,
    pub max_evaluations: usize,
}

impl SolverSettings {
    /// Step tolerance `xtol` with the default cost/gradient tolerances (`1e-8`).
    pub fn new(xtol: f64, max_evaluations: usize) -> Self {
        Self {
            xtol,
            ftol: 1e-8,
            gtol: 1e-8,
            max_evaluations,
        }
    }
}

/// Why the solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Gradient,
    Cost,
    Step,
    CostAndStep,
}

#[derive(Debug, Clone)]
pub struct Solution {
    pub x: Vec<f64>,
    pub cost: f64,
    pub evaluations: usize,
    pub iterations: usize,
    pub termination: Termination,
}

/// Minimize `problem` inside the box `[lower, upper]`, starting from `x0`.
///
/// `x0` must lie inside the bounds (on a bound is fine). Upper bounds may be
/// `f64::INFINITY`.
pub fn minimize<P: LeastSquaresProblem + ?Sized>(
    problem: &P,
    x0: &[f64],
    lower: &[f64],
    upper: &[f64],
    settings: &SolverSettings,
    cancel: &CancelToken,
) -> Result<Solution, AppError> {
    let n = x0.len();
    if n == 0 || lower.len() != n || upper.len() != n {
        return Err(AppError::invalid_input(
            "Bounds do not match the parameter count.",
        ));
    }
    let feasible = x0
        .iter()
        .zip(lower.iter().zip(upper))
        .all(|(&x, (&lo, &hi))| x >= lo && x <= hi);
    if !feasible {
        return Err(AppError::invalid_input(format!(
            "Initial guess {x0:?} lies outside the bounds."
        )));
    }

    let mut x = x0.to_vec();
    let mut lin = problem.linearize(&x, &jacobian_steps(&x, lower, upper));
    if !lin.cost.is_finite() {
        return Err(AppError::invalid_input(
            "Residuals are not finite at the initial guess.",
        ));
    }
    let mut evaluations = 1usize;
    let mut iterations = 0usize;

    let mut delta = inf_norm(&x);
    if delta == 0.0 {
        delta = 1.0;
    }
    let mut on_bound = active_constraints(&x, lower, upper);

    let termination = loop {
        if cancel.is_cancelled() {
            return Err(AppError::new(ErrorKind::Cancelled, "Fit cancelled."));
        }

        let free: Vec<usize> = (0..n)
            .filter(|&i| !(f64::from(on_bound[i]) * lin.gradient[i] < 0.0))
            .collect();
        let g_norm = free
            .iter()
            .map(|&i| lin.gradient[i].abs())
            .fold(0.0, f64::max);
        if g_norm < settings.gtol {
            break Termination::Gradient;
        }

        let k = free.len();
        let gram = DMatrix::from_fn(k, k, |a, b| lin.gram[(free[a], free[b])]);
        let g = DVector::from_fn(k, |a, _| lin.gradient[free[a]]);
        let x_free: Vec<f64> = free.iter().map(|&i| x[i]).collect();
        let lb_free: Vec<f64> = free.iter().map(|&i| lower[i]).collect();
        let ub_free: Vec<f64> = free.iter().map(|&i| upper[i]).collect();

        let newton = solve_least_squares(&gram, &(-&g)).ok_or_else(|| {
            AppError::new(
                ErrorKind::FitNonConvergence,
                "Gauss-Newton step is not finite.",
            )
        })?;
        // Quadratic model along the steepest-descent ray: a t² + b t.
        let a = 0.5 * g.dot(&(&gram * &g));
        let b = -g.dot(&g);

        let x_norm = l2_norm(&x);
        let mut actual_reduction = -1.0;
        let mut status = None;
        let mut accepted: Option<(Vec<f64>, Vec<i8>)> = None;

        while actual_reduction <= 0.0 && evaluations < settings.max_evaluations {
            let (step, hits, tr_hit) =
                dogleg_step(&x_free, &newton, &g, a, b, delta, &lb_free, &ub_free);
            let predicted = -(0.5 * step.dot(&(&gram * &step)) + g.dot(&step));

            let mut x_new = x.clone();
            for (j, &i) in free.iter().enumerate() {
                x_new[i] = (x[i] + step[j]).clamp(lower[i], upper[i]);
            }
            let cost_new = problem.cost(&x_new);
            evaluations += 1;

            let step_h_norm = step.amax();
            if !cost_new.is_finite() {
                delta = 0.25 * step_h_norm;
                continue;
            }

            actual_reduction = lin.cost - cost_new;
            let (new_delta, ratio) =
                update_radius(delta, actual_reduction, predicted, step_h_norm, tr_hit);
            delta = new_delta;

            status = check_termination(
                actual_reduction,
                lin.cost,
                step.norm(),
                x_norm,
                ratio,
                settings,
            );
            accepted = Some((x_new, hits));
            if status.is_some() {
                break;
            }
        }

        if actual_reduction > 0.0 {
            if let Some((x_new, hits)) = accepted {
                for (j, &i) in free.iter().enumerate() {
                    on_bound[i] = hits[j];
                }
                x = x_new;
                for i in 0..n {
                    match on_bound[i] {
                        -1 => x[i] = lower[i],
                        1 => x[i] = upper[i],
                        _ => {}
                    }
                }
                lin = problem.linearize(&x, &jacobian_steps(&x, lower, upper));
            }
        }
        iterations += 1;

        if let Some(status) = status {
            break status;
        }
        if evaluations >= settings.max_evaluations {
            return Err(AppError::new(
                ErrorKind::FitNonConvergence,
                format!(
                    "Least squares did not converge within {} evaluations (cost={:.6e}).",
                    settings.max_evaluations, lin.cost
                ),
            ));
        }
    };

    debug!(
        iterations,
        evaluations,
        cost = lin.cost,
        termination = ?termination,
        "least squares finished"
    );

    Ok(Solution {
        x,
        cost: lin.cost,
        evaluations,
        iterations,
        termination,
    })
}

/// Forward-difference steps, flipped to a backward step where the forward one
/// would leave the box.
fn jacobian_steps(x: &[f64], lower: &[f64], upper: &[f64]) -> Vec<f64> {
    x.iter()
        .zip(lower.iter().zip(upper))
        .map(|(&x, (&lo, &hi))| {
            let sign = if x >= 0.0 { 1.0 } else { -1.0 };
            let h = DIFF_STEP * sign * x.abs().max(1.0);
            let lower_dist = x - lo;
            let upper_dist = hi - x;
            let stepped = x + h;
            if stepped >= lo && stepped <= hi {
                h
            } else if h.abs() <= lower_dist.max(upper_dist) {
                -h
            } else if upper_dist >= lower_dist {
                upper_dist
            } else {
                -lower_dist
            }
        })
        .collect()
}

/// `-1` for parameters on their lower bound, `1` on the upper bound, else `0`.
fn active_constraints(x: &[f64], lower: &[f64], upper: &[f64]) -> Vec<i8> {
    x.iter()
        .zip(lower.iter().zip(upper))
        .map(|(&x, (&lo, &hi))| {
            let lower_dist = x - lo;
            let upper_dist = hi - x;
            if hi.is_finite() && upper_dist <= lower_dist.min(ACTIVE_RTOL * hi.abs().max(1.0)) {
                1
            } else if lo.is_finite()
                && lower_dist <= upper_dist.min(ACTIVE_RTOL * lo.abs().max(1.0))
            {
                -1
            } else {
                0
            }
        })
        .collect()
}

/// Dogleg step inside `[lower - x, upper - x] ∩ [-delta, delta]`.
///
/// Returns the step, which original bounds it ran into (`-1`/`1` per
/// parameter), and whether it stopped on the trust-region boundary.
#[allow(clippy::too_many_arguments)]
fn dogleg_step(
    x: &[f64],
    newton: &DVector<f64>,
    g: &DVector<f64>,
    a: f64,
    b: f64,
    delta: f64,
    lower: &[f64],
    upper: &[f64],
) -> (DVector<f64>, Vec<i8>, bool) {
    let k = x.len();
    let lb_shift: Vec<f64> = lower.iter().zip(x).map(|(lo, x)| lo - x).collect();
    let ub_shift: Vec<f64> = upper.iter().zip(x).map(|(hi, x)| hi - x).collect();
    let lb_total: Vec<f64> = lb_shift.iter().map(|v| v.max(-delta)).collect();
    let ub_total: Vec<f64> = ub_shift.iter().map(|v| v.min(delta)).collect();

    let mut bound_hits = vec![0i8; k];
    if in_bounds(newton.as_slice(), &lb_total, &ub_total) {
        return (newton.clone(), bound_hits, false);
    }

    let origin = vec![0.0; k];
    let descent: Vec<f64> = g.iter().map(|v| -v).collect();
    let (to_bounds, _) = step_size_to_bound(&origin, &descent, &lb_total, &ub_total);
    let t = minimize_quadratic_1d(a, b, 0.0, to_bounds);
    let cauchy = g * -t;

    let diff = newton - &cauchy;
    let (step_size, hits) =
        step_size_to_bound(cauchy.as_slice(), diff.as_slice(), &lb_total, &ub_total);

    let mut tr_hit = false;
    for i in 0..k {
        if hits[i] < 0 {
            if lb_total[i] == lb_shift[i] {
                bound_hits[i] = -1;
            } else {
                tr_hit = true;
            }
        } else if hits[i] > 0 {
            if ub_total[i] == ub_shift[i] {
                bound_hits[i] = 1;
            } else {
                tr_hit = true;
            }
        }
    }

    let step = if step_size.is_finite() {
        &cauchy + diff * step_size
    } else {
        cauchy
    };
    (step, bound_hits, tr_hit)
}

fn in_bounds(x: &[f64], lower: &[f64], upper: &[f64]) -> bool {
    x.iter()
        .zip(lower.iter().zip(upper))
        .all(|(&x, (&lo, &hi))| x >= lo && x <= hi)
}

/// Largest `t` such that `x + t s` stays inside `[lower, upper]`, plus the
/// direction sign of each coordinate that limits it.
fn step_size_to_bound(x: &[f64], s: &[f64], lower: &[f64], upper: &[f64]) -> (f64, Vec<i8>) {
    let steps: Vec<f64> = (0..x.len())
        .map(|i| {
            if s[i] != 0.0 {
                ((lower[i] - x[i]) / s[i]).max((upper[i] - x[i]) / s[i])
            } else {
                f64::INFINITY
            }
        })
        .collect();
    let min_step = steps.iter().copied().fold(f64::INFINITY, f64::min);
    let hits = steps
        .iter()
        .zip(s)
        .map(|(&step, &si)| {
            if step == min_step && si > 0.0 {
                1
            } else if step == min_step && si < 0.0 {
                -1
            } else {
                0
            }
        })
        .collect();
    (min_step, hits)
}

/// Minimizer of `a t² + b t` on `[lo, hi]`.
fn minimize_quadratic_1d(a: f64, b: f64, lo: f64, hi: f64) -> f64 {
    let mut candidates = vec![lo];
    if hi.is_finite() {
        candidates.push(hi);
    }
    if a != 0.0 {
        let extremum = -0.5 * b / a;
        if lo < extremum && extremum < hi {
            candidates.push(extremum);
        }
    }

    let mut best = lo;
    let mut best_value = f64::INFINITY;
    for t in candidates {
        let value = t * (a * t + b);
        if value < best_value {
            best = t;
            best_value = value;
        }
    }
    best
}

fn update_radius(
    delta: f64,
    actual_reduction: f64,
    predicted_reduction: f64,
    step_norm: f64,
    bound_hit: bool,
) -> (f64, f64) {
    let ratio = if predicted_reduction > 0.0 {
        actual_reduction / predicted_reduction
    } else if predicted_reduction == actual_reduction && actual_reduction == 0.0 {
        1.0
    } else {
        0.0
    };

    let delta = if ratio < 0.25 {
        0.25 * step_norm
    } else if ratio > 0.75 && bound_hit {
        2.0 * delta
    } else {
        delta
    };
    (delta, ratio)
}

fn check_termination(
    cost_reduction: f64,
    cost: f64,
    step_norm: f64,
    x_norm: f64,
    ratio: f64,
    settings: &SolverSettings,
) -> Option<Termination> {
    let ftol_ok = cost_reduction < settings.ftol * cost && ratio > 0.25;
    let xtol_ok = step_norm < settings.xtol * (settings.xtol + x_norm);
    match (ftol_ok, xtol_ok) {
        (true, true) => Some(Termination::CostAndStep),
        (true, false) => Some(Termination::Cost),
        (false, true) => Some(Termination::Step),
        (false, false) => None,
    }
}

fn inf_norm(x: &[f64]) -> f64 {
    x.iter().map(|v| v.abs()).fold(0.0, f64::max)
}

fn l2_norm(x: &[f64]) -> f64 {
    x.iter().map(|v| v * v).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Straight line `p0 + p1 t` with an exact Jacobian.
    struct Line {
        t: Vec<f64>,
        y: Vec<f64>,
    }

    impl Line {
        fn residuals(&self, p: &[f64]) -> Vec<f64> {
            self.t
                .iter()
                .zip(&self.y)
                .map(|(&t, &y)| p[0] + p[1] * t - y)
                .collect()
        }
    }

    impl LeastSquaresProblem for Line {
        fn cost(&self, p: &[f64]) -> f64 {
            0.5 * self.residuals(p).iter().map(|r| r * r).sum::<f64>()
        }

        fn linearize(&self, p: &[f64], _steps: &[f64]) -> Linearization {
            let r = self.residuals(p);
            let mut gram = DMatrix::zeros(2, 2);
            let mut gradient = DVector::zeros(2);
            for (&t, &ri) in self.t.iter().zip(&r) {
                let row = [1.0, t];
                for a in 0..2 {
                    gradient[a] += row[a] * ri;
                    for b in 0..2 {
                        gram[(a, b)] += row[a] * row[b];
                    }
                }
            }
            Linearization {
                cost: 0.5 * r.iter().map(|v| v * v).sum::<f64>(),
                gram,
                gradient,
            }
        }
    }

    fn line() -> Line {
        let t: Vec<f64> = (0..=10).map(f64::from).collect();
        let y = t.iter().map(|t| 2.0 + 3.0 * t).collect();
        Line { t, y }
    }

    #[test]
    fn recovers_unconstrained_optimum() {
        let settings = SolverSettings::new(1e-10, 200);
        let sol = minimize(
            &line(),
            &[0.0, 0.0],
            &[-10.0, -10.0],
            &[10.0, 10.0],
            &settings,
            &CancelToken::new(),
        )
        .unwrap();
        assert!((sol.x[0] - 2.0).abs() < 1e-5, "got {:?}", sol.x);
        assert!((sol.x[1] - 3.0).abs() < 1e-5, "got {:?}", sol.x);
        assert!(sol.cost < 1e-10);
    }

    #[test]
    fn stops_on_active_bound() {
        // Intercept capped at 1: the slope absorbs what it can.
        let settings = SolverSettings::new(1e-10, 200);
        let sol = minimize(
            &line(),
            &[0.0, 0.0],
            &[0.0, 0.0],
            &[1.0, 10.0],
            &settings,
            &CancelToken::new(),
        )
        .unwrap();
        let expected_slope = 3.0 + 55.0 / 385.0;
        assert_eq!(sol.x[0], 1.0);
        assert!((sol.x[1] - expected_slope).abs() < 1e-5, "got {:?}", sol.x);
    }

    #[test]
    fn exact_start_terminates_on_gradient() {
        let settings = SolverSettings::new(1e-3, 10);
        let sol = minimize(
            &line(),
            &[2.0, 3.0],
            &[-10.0, -10.0],
            &[10.0, 10.0],
            &settings,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(sol.termination, Termination::Gradient);
        assert_eq!(sol.evaluations, 1);
        assert_eq!(sol.x, vec![2.0, 3.0]);
    }

    #[test]
    fn running_out_of_evaluations_is_an_error() {
        let settings = SolverSettings::new(1e-12, 2);
        let err = minimize(
            &line(),
            &[0.0, 0.0],
            &[-10.0, -10.0],
            &[10.0, 10.0],
            &settings,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FitNonConvergence);
    }

    #[test]
    fn cancelled_token_stops_the_solver() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = minimize(
            &line(),
            &[0.0, 0.0],
            &[-10.0, -10.0],
            &[10.0, 10.0],
            &SolverSettings::new(1e-6, 100),
            &cancel,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn infeasible_start_is_rejected() {
        let err = minimize(
            &line(),
            &[2.0, 0.0],
            &[0.0, 0.0],
            &[1.0, 1.0],
            &SolverSettings::new(1e-6, 100),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn steps_flip_inwards_at_upper_bound() {
        let steps = jacobian_steps(&[1.0, 0.0], &[0.0, 0.0], &[1.0, f64::INFINITY]);
        assert!(steps[0] < 0.0);
        assert!(steps[1] > 0.0);
    }

    #[test]
    fn active_constraints_flag_both_sides() {
        let active = active_constraints(&[0.0, 1.0, 0.5], &[0.0; 3], &[1.0; 3]);
        assert_eq!(active, vec![-1, 1, 0]);
    }
}
