#[cfg(test)]
mod tests {
    extern crate rand;

    use nalgebra::{DMatrix, DVector};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::kinematic_traits::ChainState;
    use crate::qp_solver::{QpSolver, SolverOptions};
    use crate::serial_kinematic_control::velocity_bounds;

    const CASES: usize = 50;

    fn random_matrix(rng: &mut StdRng, rows: usize, cols: usize) -> DMatrix<f64> {
        DMatrix::from_fn(rows, cols, |_, _| rng.gen_range(-1.0..1.0))
    }

    fn random_vector(rng: &mut StdRng, n: usize) -> DVector<f64> {
        DVector::from_fn(n, |_, _| rng.gen_range(-1.0..1.0))
    }

    /// Symmetric positive definite, eigenvalues at least 0.5
    fn random_positive_definite(rng: &mut StdRng, n: usize) -> DMatrix<f64> {
        let m = random_matrix(rng, n, n);
        m.transpose() * &m + DMatrix::identity(n, n) * 0.5
    }

    #[test]
    fn test_constrained_stays_feasible() {
        let mut rng = StdRng::seed_from_u64(42);
        let solver = QpSolver::default();
        for case in 0..CASES {
            let n = rng.gen_range(2..6);
            let m = rng.gen_range(1..9);
            let h = random_positive_definite(&mut rng, n);
            let f = random_vector(&mut rng, n) * 3.0;
            let b = random_matrix(&mut rng, m, n);
            let x0 = random_vector(&mut rng, n);
            // x0 strictly inside every constraint
            let slack = DVector::from_fn(m, |_, _| rng.gen_range(0.1..1.0));
            let c = &b * &x0 - slack;

            let x = solver.solve_constrained(&h, &f, &b, &c, &x0).unwrap();
            let distance = &b * &x - &c;
            for i in 0..m {
                assert!(distance[i] >= -1e-9, "case {}: constraint {} violated by {}", case, i, -distance[i]);
            }
        }
    }

    #[test]
    fn test_unconstrained_residual() {
        let mut rng = StdRng::seed_from_u64(7);
        let solver = QpSolver::default();
        for _ in 0..CASES {
            let n = rng.gen_range(1..8);
            let h = random_positive_definite(&mut rng, n);
            let f = random_vector(&mut rng, n);
            let x = solver.solve(&h, &f, &DVector::zeros(n)).unwrap();
            assert!((&h * &x - &f).norm() < 1e-8);
        }
    }

    #[test]
    fn test_box_least_squares_within_box() {
        let mut rng = StdRng::seed_from_u64(2024);
        let solver = QpSolver::default();
        for case in 0..CASES {
            let n = rng.gen_range(1..7);
            let m = rng.gen_range(n..8);
            let a = random_matrix(&mut rng, m, n);
            let y = random_vector(&mut rng, m) * 5.0;
            let w = DMatrix::from_diagonal(&DVector::from_fn(m, |_, _| rng.gen_range(0.5..2.0)));
            let x_min = DVector::from_fn(n, |_, _| rng.gen_range(-1.0..0.0));
            let x_max = DVector::from_fn(n, |i, _| x_min[i] + rng.gen_range(0.05..1.5));
            let x0 = (&x_min + &x_max) * 0.5;

            let x = solver.least_squares_bounded(&y, &a, &w, &x_min, &x_max, &x0).unwrap();
            for i in 0..n {
                assert!(x[i] >= x_min[i] - 1e-9 && x[i] <= x_max[i] + 1e-9,
                        "case {}: x[{}] = {} outside [{}, {}]", case, i, x[i], x_min[i], x_max[i]);
            }
        }
    }

    #[test]
    fn test_equality_residual() {
        let mut rng = StdRng::seed_from_u64(99);
        let solver = QpSolver::default();
        for _ in 0..CASES {
            let n = rng.gen_range(3..9);
            let m = rng.gen_range(1..n);
            let a = random_matrix(&mut rng, m, n) + DMatrix::identity(m, n) * 2.0;
            let y = random_vector(&mut rng, m);
            let w = random_positive_definite(&mut rng, n);
            let xd = random_vector(&mut rng, n);

            let x = solver.least_squares_equality(&xd, &w, &y, &a, &DVector::zeros(n)).unwrap();
            assert!((&a * &x - &y).norm() < 1e-6, "residual {}", (&a * &x - &y).norm());

            let wide = DVector::from_element(n, 100.0);
            let x = solver.least_squares_equality_bounded(&xd, &w, &y, &a, &(-&wide), &wide, &DVector::zeros(n)).unwrap();
            assert!((&a * &x - &y).norm() < 1e-6, "bounded residual {}", (&a * &x - &y).norm());
        }
    }

    #[test]
    fn test_identical_inputs_identical_outputs() {
        let mut rng = StdRng::seed_from_u64(5);
        let first = QpSolver::new(SolverOptions::default()).unwrap();
        let second = first.clone();
        for _ in 0..10 {
            let n = 4;
            let a = random_matrix(&mut rng, 6, n);
            let y = random_vector(&mut rng, 6);
            let w = DMatrix::identity(6, 6);
            let x_min = DVector::from_element(n, -0.3);
            let x_max = DVector::from_element(n, 0.4);
            let x0 = DVector::from_element(n, 0.05);
            let one = first.least_squares_bounded(&y, &a, &w, &x_min, &x_max, &x0).unwrap();
            let two = second.least_squares_bounded(&y, &a, &w, &x_min, &x_max, &x0).unwrap();
            assert_eq!(one, two);
        }
    }

    #[test]
    fn test_velocity_bounds_contain_zero_inside_limits() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..CASES {
            let n = rng.gen_range(1..9);
            let limits: Vec<(f64, f64)> = (0..n).map(|_| {
                let lower = rng.gen_range(-3.0..0.0);
                (lower, lower + rng.gen_range(0.1..5.0))
            }).collect();
            let positions = DVector::from_fn(n, |i, _| rng.gen_range(limits[i].0..=limits[i].1));
            let state = ChainState::at_rest(
                positions,
                limits,
                DVector::from_fn(n, |_, _| rng.gen_range(0.1..3.0)),
                DVector::from_fn(n, |_, _| rng.gen_range(0.5..10.0)),
                DMatrix::zeros(6, n),
            ).unwrap();
            let dt = rng.gen_range(0.001..0.05);
            let bounds = velocity_bounds(&state, dt);
            for i in 0..n {
                assert!(bounds.lower[i] <= 0.0 && 0.0 <= bounds.upper[i]);
                assert!(bounds.upper[i] <= state.speed_limits[i] && bounds.lower[i] >= -state.speed_limits[i]);
            }
        }
    }

    #[test]
    fn test_velocity_bounds_ordered_outside_limits() {
        let mut rng = StdRng::seed_from_u64(12);
        for _ in 0..CASES {
            let (lower, upper) = (-1.0, 1.0);
            let beyond = rng.gen_range(0.0..2.0);
            let position = if rng.gen_bool(0.5) { upper + beyond } else { lower - beyond };
            let state = ChainState::at_rest(
                DVector::from_element(1, position),
                vec![(lower, upper)],
                DVector::from_element(1, 1.0),
                DVector::from_element(1, 5.0),
                DMatrix::zeros(6, 1),
            ).unwrap();
            let bounds = velocity_bounds(&state, 0.01);
            assert!(bounds.lower[0] <= bounds.upper[0]);
            if position > upper {
                assert!(bounds.upper[0] <= 0.0);
            } else {
                assert!(bounds.lower[0] >= 0.0);
            }
        }
    }
}
