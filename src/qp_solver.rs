//! Quadratic programming and weighted least squares.
//!
//! All problems are expressed as minimizing `0.5 * x'*H*x - x'*f`, optionally subject to
//! linear inequality constraints `B*x >= c`. Inequality constraints are handled with a primal
//! log-barrier interior point method, so the iterates stay strictly inside the feasible region
//! once they get there. The least squares variants are thin transformations into these two
//! primitives.
//!
//! The solver never fails on numerical grounds: when the Newton system becomes singular or
//! the iteration budget runs out, the best iterate found so far is returned. Only shape errors
//! (mismatched dimensions, inverted bounds) are reported, as [SolverError].
//!
//! ```
//! use nalgebra::{DMatrix, DVector};
//! use rs_kinematic_control::qp_solver::QpSolver;
//!
//! let solver = QpSolver::default();
//! // Minimize 0.5*x^2 - 2*x subject to x <= 1
//! let h = DMatrix::from_element(1, 1, 1.0);
//! let f = DVector::from_element(1, 2.0);
//! let b = DMatrix::from_element(1, 1, -1.0);
//! let c = DVector::from_element(1, -1.0);
//! let x = solver.solve_constrained(&h, &f, &b, &c, &DVector::zeros(1)).unwrap();
//! assert!(x[0] <= 1.0 && x[0] > 0.99);
//! ```

use std::fmt;

use nalgebra::{DMatrix, DVector};
use tracing::{debug, error, warn};

/// Diagonal elements of a triangular factor smaller than this are treated as singular.
pub const SINGULAR_PIVOT: f64 = 1E-5;

/// Hard limit on the step halvings of the line search, so that it always terminates.
const MAX_STEP_SHRINKS: usize = 64;

/// Tuning of the interior point method. Set once per solver, never adapted between calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    /// Maximum number of Newton iterations.
    pub max_iterations: usize,

    /// The method stops when the norm of the accepted step drops below this value.
    pub tolerance: f64,

    /// Initial weight `u` of the barrier function.
    pub barrier_weight: f64,

    /// The barrier weight is multiplied by this factor after every accepted step (0 < x < 1).
    pub barrier_decay: f64,

    /// On a constraint violation the decay moves this fraction of the way towards 1.
    pub decay_slowdown: f64,

    /// The barrier weight is multiplied by this factor for each violated constraint.
    pub barrier_growth: f64,

    /// First step scalar tried by the line search.
    pub initial_step: f64,

    /// The step scalar is multiplied by this factor until the step is feasible (0 < x < 1).
    pub step_shrink: f64,

    /// Distance assigned to a violated constraint, so that the barrier stays finite.
    pub violation_floor: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            max_iterations: 30,
            tolerance: 1E-4,
            barrier_weight: 1.0,
            barrier_decay: 0.5,
            decay_slowdown: 0.1,
            barrier_growth: 2.0,
            initial_step: 1.0,
            step_shrink: 0.5,
            violation_floor: 1E-2,
        }
    }
}

impl SolverOptions {
    /// Checks that the options describe a working method.
    pub fn validate(&self) -> Result<(), SolverError> {
        let problem = if self.max_iterations == 0 {
            Some("max_iterations must be at least 1".to_string())
        } else if !(self.tolerance > 0.0) {
            Some(format!("tolerance was {} but it must be positive", self.tolerance))
        } else if !(self.barrier_weight > 0.0) {
            Some(format!("barrier_weight was {} but it must be positive", self.barrier_weight))
        } else if !(self.barrier_decay > 0.0 && self.barrier_decay < 1.0) {
            Some(format!("barrier_decay was {} but it must be in (0, 1)", self.barrier_decay))
        } else if !(0.0..=1.0).contains(&self.decay_slowdown) {
            Some(format!("decay_slowdown was {} but it must be in [0, 1]", self.decay_slowdown))
        } else if !(self.barrier_growth >= 1.0) {
            Some(format!("barrier_growth was {} but it must be at least 1", self.barrier_growth))
        } else if !(self.initial_step > 0.0) {
            Some(format!("initial_step was {} but it must be positive", self.initial_step))
        } else if !(self.step_shrink > 0.0 && self.step_shrink < 1.0) {
            Some(format!("step_shrink was {} but it must be in (0, 1)", self.step_shrink))
        } else if !(self.violation_floor > 0.0) {
            Some(format!("violation_floor was {} but it must be positive", self.violation_floor))
        } else {
            None
        };

        match problem {
            Some(message) => Err(SolverError::InvalidOptions(message)),
            None => Ok(()),
        }
    }
}

/// Errors reported by the solver. These are programming errors in the caller, numeric
/// difficulties are never reported this way.
#[derive(Debug, Clone, PartialEq)]
pub enum SolverError {
    DimensionMismatch { operation: &'static str, details: String },
    InvalidBounds { index: usize, lower: f64, upper: f64 },
    InvalidOptions(String),
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SolverError::DimensionMismatch { operation, details } =>
                write!(f, "Dimensions of input arguments to {} do not match: {}", operation, details),
            SolverError::InvalidBounds { index, lower, upper } =>
                write!(f, "Lower bound {} is greater than upper bound {} for element {}", lower, upper, index),
            SolverError::InvalidOptions(msg) =>
                write!(f, "Invalid solver options: {}", msg),
        }
    }
}

impl std::error::Error for SolverError {}

/// Upper triangular system `U*x = b` left after eliminating the equality constraints.
#[derive(Debug, Clone)]
pub struct ReducedSystem {
    pub upper: DMatrix<f64>,
    pub rhs: DVector<f64>,
}

/// Solver for quadratic programs and weighted least squares problems.
///
/// The solver holds only its options, so a single instance can be reused for any number
/// of independent problems and gives identical results for identical inputs.
#[derive(Debug, Clone, Default)]
pub struct QpSolver {
    options: SolverOptions,
}

impl QpSolver {
    /// Creates the solver with the given options, that are validated.
    pub fn new(options: SolverOptions) -> Result<Self, SolverError> {
        options.validate()?;
        Ok(QpSolver { options })
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    /// Minimizes `0.5*x'*H*x - x'*f` without constraints.
    ///
    /// The minimum satisfies `H*x = f`, so this is a single linear solve. If `H` is
    /// singular, `x0` is returned.
    pub fn solve(&self, h: &DMatrix<f64>, f: &DVector<f64>, x0: &DVector<f64>)
                 -> Result<DVector<f64>, SolverError> {
        let n = x0.len();
        if h.nrows() != n || h.ncols() != n || f.len() != n {
            return Err(mismatch("solve", format!(
                "H matrix was {}x{}, f vector was {}x1, and x0 vector was {}x1",
                h.nrows(), h.ncols(), f.len(), n)));
        }

        match h.clone().lu().solve(f) {
            Some(x) => Ok(x),
            None => {
                warn!("solve(): H matrix is singular, returning the initial guess");
                Ok(x0.clone())
            }
        }
    }

    /// Minimizes `0.5*x'*H*x - x'*f` subject to `B*x >= c`.
    ///
    /// If `x0` is feasible, the returned value is feasible. If it is not, the method tries to
    /// reach the feasible region and returns the best point it found, which never violates
    /// the constraints more than `x0` does.
    pub fn solve_constrained(&self, h: &DMatrix<f64>, f: &DVector<f64>,
                             b: &DMatrix<f64>, c: &DVector<f64>,
                             x0: &DVector<f64>) -> Result<DVector<f64>, SolverError> {
        let n = x0.len();
        if h.nrows() != n || h.ncols() != n || f.len() != n || b.ncols() != n || b.nrows() != c.len() {
            return Err(mismatch("solve_constrained", format!(
                "H matrix was {}x{}, f vector was {}x1, B matrix was {}x{}, c vector was {}x1, \
                 and x0 vector was {}x1",
                h.nrows(), h.ncols(), f.len(), b.nrows(), b.ncols(), c.len(), n)));
        }
        Ok(self.interior_point(h, f, b, c, x0))
    }

    /// Solves `min 0.5*(y - A*x)'*W*(y - A*x)` without constraints.
    pub fn least_squares(&self, y: &DVector<f64>, a: &DMatrix<f64>, w: &DMatrix<f64>,
                         x0: &DVector<f64>) -> Result<DVector<f64>, SolverError> {
        let (m, n) = a.shape();
        if y.len() != m || x0.len() != n || w.nrows() != m || w.ncols() != m {
            return Err(mismatch("least_squares", format!(
                "y vector was {}x1, A matrix was {}x{}, W matrix was {}x{} (expected {}x{}), \
                 and x0 vector was {}x1",
                y.len(), m, n, w.nrows(), w.ncols(), m, m, x0.len())));
        }
        let atw = a.transpose() * w;
        self.solve(&(&atw * a), &(&atw * y), x0)
    }

    /// Solves `min 0.5*(y - A*x)'*W*(y - A*x)` subject to `x_min <= x <= x_max`.
    pub fn least_squares_bounded(&self, y: &DVector<f64>, a: &DMatrix<f64>, w: &DMatrix<f64>,
                                 x_min: &DVector<f64>, x_max: &DVector<f64>,
                                 x0: &DVector<f64>) -> Result<DVector<f64>, SolverError> {
        let (m, n) = a.shape();
        if y.len() != m || x0.len() != n || x_min.len() != n || x_max.len() != n
            || w.nrows() != m || w.ncols() != m {
            return Err(mismatch("least_squares_bounded", format!(
                "y vector was {}x1, A matrix was {}x{}, W matrix was {}x{} (expected {}x{}), \
                 x_min vector was {}x1, x_max vector was {}x1, and x0 vector was {}x1",
                y.len(), m, n, w.nrows(), w.ncols(), m, m, x_min.len(), x_max.len(), x0.len())));
        }
        check_bounds(x_min, x_max)?;

        let (b, c) = box_constraints(x_min, x_max, 0, n);
        let atw = a.transpose() * w;
        Ok(self.interior_point(&(&atw * a), &(&atw * y), &b, &c, x0))
    }

    /// Solves `min 0.5*(xd - x)'*W*(xd - x)` subject to `A*x = y`.
    ///
    /// The Lagrangian `L = 0.5*x'*W*x - x'*W*xd + (A*x - y)'*lambda` is stationary where
    ///
    /// ```text
    /// [ 0  A ][ lambda ] = [   y  ]
    /// [ A' W ][   x    ]   [ W*xd ]
    /// ```
    ///
    /// This matrix is QR decomposed and only the lower block of the triangular system is
    /// solved, so lambda is never computed.
    pub fn least_squares_equality(&self, xd: &DVector<f64>, w: &DMatrix<f64>,
                                  y: &DVector<f64>, a: &DMatrix<f64>,
                                  x0: &DVector<f64>) -> Result<DVector<f64>, SolverError> {
        if x0.len() != a.ncols() {
            return Err(mismatch("least_squares_equality", format!(
                "x0 vector was {}x1 but A matrix has {} columns", x0.len(), a.ncols())));
        }
        let reduced = self.eliminate_equality(xd, w, y, a)?;
        back_substitution(&reduced.upper, &reduced.rhs, x0)
    }

    /// Solves `min 0.5*(xd - x)'*W*(xd - x)` subject to `A*x = y` and `x_min <= x <= x_max`.
    ///
    /// The saddle point system of [QpSolver::least_squares_equality] is solved with the
    /// interior point method over the stacked state `[lambda; x]`, with the box acting
    /// on `x` only.
    pub fn least_squares_equality_bounded(&self, xd: &DVector<f64>, w: &DMatrix<f64>,
                                          y: &DVector<f64>, a: &DMatrix<f64>,
                                          x_min: &DVector<f64>, x_max: &DVector<f64>,
                                          x0: &DVector<f64>) -> Result<DVector<f64>, SolverError> {
        let (m, n) = a.shape();
        if xd.len() != n || y.len() != m || x0.len() != n || x_min.len() != n || x_max.len() != n
            || w.nrows() != n || w.ncols() != n {
            return Err(mismatch("least_squares_equality_bounded", format!(
                "xd vector was {}x1, W matrix was {}x{} (expected {}x{}), y vector was {}x1, \
                 A matrix was {}x{}, x_min vector was {}x1, x_max vector was {}x1, \
                 and x0 vector was {}x1",
                xd.len(), w.nrows(), w.ncols(), n, n, y.len(), m, n,
                x_min.len(), x_max.len(), x0.len())));
        }
        check_bounds(x_min, x_max)?;

        let h = saddle_point_matrix(a, w);
        let f = stacked(y, &(w * xd));
        let (b, c) = box_constraints(x_min, x_max, m, m + n);

        // Multipliers start at zero
        let state = stacked(&DVector::zeros(m), x0);
        let state = self.interior_point(&h, &f, &b, &c, &state);
        Ok(state.rows(m, n).into_owned())
    }

    /// Eliminates the equality constraint of `min 0.5*(xd - x)'*W*(xd - x)`, `A*x = y`,
    /// returning the upper triangular system that only involves `x`.
    pub fn eliminate_equality(&self, xd: &DVector<f64>, w: &DMatrix<f64>,
                              y: &DVector<f64>, a: &DMatrix<f64>) -> Result<ReducedSystem, SolverError> {
        let (m, n) = a.shape();
        if xd.len() != n || y.len() != m || w.nrows() != n || w.ncols() != n {
            return Err(mismatch("eliminate_equality", format!(
                "xd vector was {}x1, W matrix was {}x{} (expected {}x{}), y vector was {}x1, \
                 and A matrix was {}x{}",
                xd.len(), w.nrows(), w.ncols(), n, n, y.len(), m, n)));
        }

        let qr = saddle_point_matrix(a, w).qr();
        let q = qr.q();
        let r = qr.r();

        // Lower rows of Q'*[y; W*xd] are Q12'*y + Q22'*W*xd
        let projected = q.tr_mul(&stacked(y, &(w * xd)));

        Ok(ReducedSystem {
            upper: r.view((m, m), (n, n)).into_owned(),
            rhs: projected.rows(m, n).into_owned(),
        })
    }

    /// Log-barrier Newton iteration for `min 0.5*x'*H*x - x'*f - u*sum(log(d_i))`,
    /// `d_i = b_i*x - c_i`. Dimensions must have been checked.
    ///
    /// ```text
    /// g(x) = H*x - f - u*sum((1/d_i)*b_i')
    /// I(x) = H + u*sum((1/d_i^2)*b_i'*b_i)
    /// ```
    fn interior_point(&self, h: &DMatrix<f64>, f: &DVector<f64>,
                      b: &DMatrix<f64>, c: &DVector<f64>, x0: &DVector<f64>) -> DVector<f64> {
        let opts = &self.options;
        let rows: Vec<DVector<f64>> = (0..b.nrows()).map(|j| b.row(j).transpose()).collect();
        let outer: Vec<DMatrix<f64>> = rows.iter().map(|bt| bt * bt.transpose()).collect();

        let mut x = x0.clone();
        let mut best: Option<DVector<f64>> = None;
        let mut u = opts.barrier_weight;
        let mut beta = opts.barrier_decay;

        for iteration in 0..opts.max_iterations {
            let mut distance = distances(&rows, c, &x);
            let violated = distance.iter().filter(|d| **d < 0.0).count();

            if violated > 0 {
                // Push harder away from the boundary, go back to the last feasible
                // solution and decrease the barrier more slowly from now on
                u *= opts.barrier_growth.powi(violated as i32);
                beta += opts.decay_slowdown * (1.0 - beta);
                if let Some(previous) = &best {
                    x.copy_from(previous);
                    distance = distances(&rows, c, &x);
                }
            } else {
                best = Some(x.clone());
            }

            for d in distance.iter_mut() {
                if *d <= 0.0 {
                    *d = opts.violation_floor;
                }
            }

            let mut gradient = h * &x - f;
            let mut hessian = h.clone();
            for ((bt, btb), d) in rows.iter().zip(&outer).zip(&distance) {
                gradient -= bt * (u / d);
                hessian += btb * (u / (d * d));
            }

            let Some(dx) = hessian.lu().solve(&(-gradient)) else {
                debug!("interior_point(): singular Newton system at iteration {}", iteration);
                break;
            };

            // Shrink the step until every constraint is strictly satisfied
            let mut alpha = opts.initial_step;
            for (bt, d) in rows.iter().zip(&distance) {
                let rate = bt.dot(&dx);
                let mut shrinks = 0;
                while d + alpha * rate <= 0.0 && shrinks < MAX_STEP_SHRINKS {
                    alpha *= opts.step_shrink;
                    shrinks += 1;
                }
            }

            let step = alpha * dx;
            if step.norm() < opts.tolerance {
                debug!("interior_point(): converged after {} iterations ({} violated)",
                    iteration + 1, violated);
                break;
            }

            x += step;
            u *= beta;
        }

        if max_violation(&rows, c, &x) <= 0.0 {
            return x;
        }
        if let Some(best) = best {
            return best;
        }
        if max_violation(&rows, c, &x) <= max_violation(&rows, c, x0) {
            x
        } else {
            warn!("interior_point(): could not improve on an infeasible initial guess");
            x0.clone()
        }
    }
}

/// Solves the upper triangular system `U*x = b` starting from the last element.
/// Elements with a pivot smaller than [SINGULAR_PIVOT] take their value from `fallback`.
pub fn back_substitution(u: &DMatrix<f64>, b: &DVector<f64>,
                         fallback: &DVector<f64>) -> Result<DVector<f64>, SolverError> {
    let n = b.len();
    if u.shape() != (n, n) || fallback.len() != n {
        return Err(mismatch("back_substitution", format!(
            "U matrix was {}x{} (expected {}x{}), b vector was {}x1 and fallback vector was {}x1",
            u.nrows(), u.ncols(), n, n, n, fallback.len())));
    }
    let mut x = DVector::zeros(n);
    for i in (0..n).rev() {
        let sum: f64 = ((i + 1)..n).map(|j| u[(i, j)] * x[j]).sum();
        x[i] = if u[(i, i)].abs() < SINGULAR_PIVOT {
            fallback[i]
        } else {
            (b[i] - sum) / u[(i, i)]
        };
    }
    Ok(x)
}

fn mismatch(operation: &'static str, details: String) -> SolverError {
    let error = SolverError::DimensionMismatch { operation, details };
    error!("{}", error);
    error
}

fn check_bounds(x_min: &DVector<f64>, x_max: &DVector<f64>) -> Result<(), SolverError> {
    for (index, (lower, upper)) in x_min.iter().zip(x_max.iter()).enumerate() {
        if !(lower <= upper) {
            let error = SolverError::InvalidBounds { index, lower: *lower, upper: *upper };
            error!("{}", error);
            return Err(error);
        }
    }
    Ok(())
}

fn distances(rows: &[DVector<f64>], c: &DVector<f64>, x: &DVector<f64>) -> Vec<f64> {
    rows.iter().zip(c.iter()).map(|(bt, cj)| bt.dot(x) - cj).collect()
}

/// Largest amount by which any constraint is violated, zero or less if all are satisfied.
fn max_violation(rows: &[DVector<f64>], c: &DVector<f64>, x: &DVector<f64>) -> f64 {
    distances(rows, c, x).into_iter().map(|d| -d).fold(0.0, f64::max)
}

/// Builds `B = [-I; I]`, `c = [-x_max; x_min]` acting on `n` variables starting at
/// `offset` of a state with `total` elements.
fn box_constraints(x_min: &DVector<f64>, x_max: &DVector<f64>, offset: usize, total: usize)
                   -> (DMatrix<f64>, DVector<f64>) {
    let n = x_min.len();
    let mut b = DMatrix::zeros(2 * n, total);
    let mut c = DVector::zeros(2 * n);
    for i in 0..n {
        b[(i, offset + i)] = -1.0;
        b[(n + i, offset + i)] = 1.0;
        c[i] = -x_max[i];
        c[n + i] = x_min[i];
    }
    (b, c)
}

/// `[[0, A], [A', W]]`
fn saddle_point_matrix(a: &DMatrix<f64>, w: &DMatrix<f64>) -> DMatrix<f64> {
    let (m, n) = a.shape();
    let mut h = DMatrix::zeros(m + n, m + n);
    h.view_mut((0, m), (m, n)).copy_from(a);
    h.view_mut((m, 0), (n, m)).copy_from(&a.transpose());
    h.view_mut((m, m), (n, n)).copy_from(w);
    h
}

fn stacked(head: &DVector<f64>, tail: &DVector<f64>) -> DVector<f64> {
    DVector::from_iterator(head.len() + tail.len(), head.iter().chain(tail.iter()).copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-2;

    fn spd_matrix() -> DMatrix<f64> {
        DMatrix::from_row_slice(3, 3, &[
            4.0, 1.0, 0.5,
            1.0, 3.0, 0.2,
            0.5, 0.2, 2.0,
        ])
    }

    #[test]
    fn test_unconstrained_solves_normal_equation() {
        let solver = QpSolver::default();
        let h = spd_matrix();
        let f = DVector::from_vec(vec![1.0, -2.0, 0.5]);
        let x = solver.solve(&h, &f, &DVector::zeros(3)).unwrap();
        assert!((&h * &x - &f).norm() < 1e-9);
    }

    #[test]
    fn test_dimension_mismatch_is_reported() {
        let solver = QpSolver::default();
        let result = solver.solve(&spd_matrix(), &DVector::zeros(2), &DVector::zeros(3));
        assert!(matches!(result, Err(SolverError::DimensionMismatch { operation: "solve", .. })));

        let a = DMatrix::identity(2, 3);
        let w = DMatrix::identity(3, 3); // Must be 2x2
        let result = solver.least_squares(&DVector::zeros(2), &a, &w, &DVector::zeros(3));
        assert!(result.is_err());
    }

    #[test]
    fn test_singular_hessian_returns_initial_guess() {
        let solver = QpSolver::default();
        let h = DMatrix::zeros(2, 2);
        let x0 = DVector::from_vec(vec![0.3, -0.4]);
        let x = solver.solve(&h, &DVector::from_vec(vec![1.0, 1.0]), &x0).unwrap();
        assert_eq!(x, x0);
    }

    #[test]
    fn test_active_constraint_is_respected() {
        let solver = QpSolver::default();
        // min 0.5*x^2 - 2*x, x <= 1 (unconstrained optimum at 2)
        let h = DMatrix::from_element(1, 1, 1.0);
        let f = DVector::from_element(1, 2.0);
        let b = DMatrix::from_element(1, 1, -1.0);
        let c = DVector::from_element(1, -1.0);
        let x = solver.solve_constrained(&h, &f, &b, &c, &DVector::zeros(1)).unwrap();
        assert!(x[0] <= 1.0, "x = {}", x[0]);
        assert!((x[0] - 1.0).abs() < EPSILON, "x = {}", x[0]);
    }

    #[test]
    fn test_inactive_constraint_does_not_bias_much() {
        let solver = QpSolver::default();
        let h = spd_matrix();
        let f = DVector::from_vec(vec![1.0, 0.5, -0.5]);
        let expected = solver.solve(&h, &f, &DVector::zeros(3)).unwrap();
        let x_min = DVector::from_element(3, -10.0);
        let x_max = DVector::from_element(3, 10.0);

        let (b, c) = box_constraints(&x_min, &x_max, 0, 3);
        let x = solver.solve_constrained(&h, &f, &b, &c, &DVector::zeros(3)).unwrap();
        assert!((x - expected).norm() < EPSILON);
    }

    #[test]
    fn test_box_least_squares_clamps() {
        let solver = QpSolver::default();
        let a = DMatrix::identity(2, 2);
        let w = DMatrix::identity(2, 2);
        let y = DVector::from_vec(vec![3.0, -0.2]);
        let x_min = DVector::from_vec(vec![-1.0, -1.0]);
        let x_max = DVector::from_vec(vec![1.0, 1.0]);
        let x = solver.least_squares_bounded(&y, &a, &w, &x_min, &x_max, &DVector::zeros(2)).unwrap();
        assert!(x[0] <= 1.0 && x[0] > 1.0 - EPSILON, "x = {}", x);
        assert!((x[1] + 0.2).abs() < EPSILON, "x = {}", x);
    }

    #[test]
    fn test_inverted_bounds_are_rejected() {
        let solver = QpSolver::default();
        let a = DMatrix::identity(2, 2);
        let x_min = DVector::from_vec(vec![0.0, 1.0]);
        let x_max = DVector::from_vec(vec![1.0, 0.0]);
        let result = solver.least_squares_bounded(&DVector::zeros(2), &a, &a, &x_min, &x_max,
                                                  &DVector::zeros(2));
        assert_eq!(result, Err(SolverError::InvalidBounds { index: 1, lower: 1.0, upper: 0.0 }));
    }

    #[test]
    fn test_equality_least_squares() {
        let solver = QpSolver::default();
        // One equation in three unknowns: x0 + x1 + x2 = 3, closest to xd = 0 is [1, 1, 1]
        let a = DMatrix::from_row_slice(1, 3, &[1.0, 1.0, 1.0]);
        let y = DVector::from_element(1, 3.0);
        let w = DMatrix::identity(3, 3);
        let x = solver.least_squares_equality(&DVector::zeros(3), &w, &y, &a, &DVector::zeros(3)).unwrap();
        assert!((&a * &x - &y).norm() < 1e-9);
        assert!((x - DVector::from_element(3, 1.0)).norm() < 1e-9);
    }

    #[test]
    fn test_bounded_equality_matches_direct_solution_when_box_is_loose() {
        let solver = QpSolver::default();
        let a = DMatrix::from_row_slice(2, 3, &[
            1.0, 0.0, 1.0,
            0.0, 1.0, 1.0,
        ]);
        let y = DVector::from_vec(vec![0.5, -0.25]);
        let w = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 2.0, 3.0]));
        let xd = DVector::from_vec(vec![0.2, 0.1, -0.3]);
        let x0 = DVector::zeros(3);

        let direct = solver.least_squares_equality(&xd, &w, &y, &a, &x0).unwrap();
        let x_min = DVector::from_element(3, -5.0);
        let x_max = DVector::from_element(3, 5.0);
        let barrier = solver.least_squares_equality_bounded(&xd, &w, &y, &a, &x_min, &x_max, &x0).unwrap();

        assert!((&a * &barrier - &y).norm() < EPSILON);
        assert!((direct - barrier).norm() < EPSILON);
    }

    #[test]
    fn test_solver_is_deterministic() {
        let solver = QpSolver::default();
        let h = spd_matrix();
        let f = DVector::from_vec(vec![5.0, -5.0, 1.0]);
        let x_min = DVector::from_element(3, -0.5);
        let x_max = DVector::from_element(3, 0.5);
        let (b, c) = box_constraints(&x_min, &x_max, 0, 3);
        let first = solver.solve_constrained(&h, &f, &b, &c, &DVector::zeros(3)).unwrap();
        let second = solver.solve_constrained(&h, &f, &b, &c, &DVector::zeros(3)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_infeasible_start_is_never_made_worse() {
        let solver = QpSolver::default();
        let h = DMatrix::identity(2, 2);
        let f = DVector::from_vec(vec![0.0, 0.0]);
        let x_min = DVector::from_vec(vec![-1.0, -1.0]);
        let x_max = DVector::from_vec(vec![1.0, 1.0]);
        let (b, c) = box_constraints(&x_min, &x_max, 0, 2);
        let rows: Vec<DVector<f64>> = (0..b.nrows()).map(|j| b.row(j).transpose()).collect();

        let x0 = DVector::from_vec(vec![3.0, 0.0]);
        let x = solver.solve_constrained(&h, &f, &b, &c, &x0).unwrap();
        assert!(max_violation(&rows, &c, &x) <= max_violation(&rows, &c, &x0));
    }

    #[test]
    fn test_back_substitution_uses_fallback_on_singular_pivot() {
        let u = DMatrix::from_row_slice(3, 3, &[
            2.0, 1.0, 0.0,
            0.0, 0.0, 1.0,
            0.0, 0.0, 4.0,
        ]);
        let b = DVector::from_vec(vec![4.0, 1.0, 8.0]);
        let fallback = DVector::from_vec(vec![0.0, 0.7, 0.0]);
        let x = back_substitution(&u, &b, &fallback).unwrap();
        assert_eq!(x[2], 2.0);
        assert_eq!(x[1], 0.7);
        assert!((x[0] - (4.0 - 0.7) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_back_substitution_checks_dimensions() {
        let u = DMatrix::<f64>::identity(3, 3);
        let b = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        assert!(matches!(back_substitution(&u, &b, &DVector::zeros(2)),
                         Err(SolverError::DimensionMismatch { .. })));
        assert!(matches!(back_substitution(&DMatrix::identity(2, 3), &b, &DVector::zeros(3)),
                         Err(SolverError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_invalid_options() {
        let options = SolverOptions { barrier_decay: 1.5, ..SolverOptions::default() };
        assert!(matches!(QpSolver::new(options), Err(SolverError::InvalidOptions(_))));
        assert!(QpSolver::new(SolverOptions::default()).is_ok());
    }
}
