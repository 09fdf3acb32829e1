//! Linear least squares solver.
//!
//! Each trust-region iteration needs the Gauss-Newton step for the free
//! parameters, i.e. the minimum-norm solution of
//!
//! ```text
//! minimize ‖J p + r‖²
//! ```
//!
//! The fitter never materializes `J` (one row per pixel); it accumulates the
//! Gram matrix `JᵀJ` and gradient `Jᵀr` instead, so the step is the
//! pseudo-inverse solution of `JᵀJ p = -Jᵀr`. That is the same vector
//! `lstsq(J, -r)` returns, at 5x5 cost.
//!
//! Implementation choices:
//! - SVD, so rank-deficient systems (a parameter with no influence on the
//!   residuals) still yield the minimum-norm step instead of failing.
//! - Singular values are cut relative to the largest one, like `lstsq`'s
//!   default `rcond`.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system has no finite solution.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    if x.nrows() != y.len() || x.ncols() == 0 {
        return None;
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return None;
    }

    let svd = x.clone().svd(true, true);
    let max_sv = svd.singular_values.iter().copied().fold(0.0_f64, f64::max);
    if max_sv == 0.0 {
        // Nothing to move along; the minimum-norm solution is zero.
        return Some(DVector::zeros(x.ncols()));
    }

    let rcond = f64::EPSILON * x.nrows().max(x.ncols()) as f64;
    let beta = svd.solve(y, max_sv * rcond).ok()?;
    if beta.iter().all(|v| v.is_finite()) {
        Some(beta)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn rank_deficient_system_gets_minimum_norm_solution() {
        // Second column has no influence: the step along it must be zero.
        let x = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 0.0]);
        let y = DVector::from_row_slice(&[2.0, 0.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 0.5).abs() < 1e-12);
        assert!(beta[1].abs() < 1e-12);
    }

    #[test]
    fn zero_matrix_gives_zero_step() {
        let x = DMatrix::<f64>::zeros(3, 3);
        let y = DVector::from_row_slice(&[1.0, 2.0, 3.0]);
        let beta = solve_least_squares(&x, &y).unwrap();
        assert!(beta.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn non_finite_input_is_rejected() {
        let x = DMatrix::from_row_slice(1, 1, &[f64::NAN]);
        let y = DVector::from_row_slice(&[1.0]);
        assert!(solve_least_squares(&x, &y).is_none());
    }
}
