//! Joint space trajectory through waypoints, C² continuous, starting and ending at rest.
//! Its samples feed [crate::serial_kinematic_control::SerialKinematicControl::track_joint_trajectory].

use nalgebra::{DMatrix, DVector};
use tracing::error;

use crate::control_error::ControlError;

#[derive(Debug, Clone)]
pub struct CubicSpline {
    times: Vec<f64>,
    waypoints: Vec<DVector<f64>>,
    velocities: Vec<DVector<f64>>,
}

/// Position, velocity and acceleration at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct SplineState {
    pub position: DVector<f64>,
    pub velocity: DVector<f64>,
    pub acceleration: DVector<f64>,
}

impl CubicSpline {
    /// # Arguments
    ///
    /// * `waypoints` - at least two points of the same dimension
    /// * `times` - strictly increasing time of every waypoint
    pub fn new(waypoints: Vec<DVector<f64>>, times: Vec<f64>) -> Result<Self, ControlError> {
        let fail = |details: String| {
            let err = ControlError::InvalidParameter(details);
            error!("{}", err);
            Err(err)
        };
        if waypoints.len() < 2 {
            return fail(format!("a spline needs at least two waypoints but {} given", waypoints.len()));
        }
        if waypoints.len() != times.len() {
            return fail(format!("{} waypoints but {} times", waypoints.len(), times.len()));
        }
        let dim = waypoints[0].len();
        if waypoints.iter().any(|w| w.len() != dim || w.iter().any(|v| !v.is_finite())) {
            return fail("waypoints differ in dimension or are not finite".into());
        }
        if times.iter().any(|t| !t.is_finite()) || times.windows(2).any(|t| !(t[1] > t[0])) {
            return fail(format!("times must be strictly increasing: {:?}", times));
        }

        let velocities = velocities(&waypoints, &times, dim)?;
        Ok(CubicSpline { times, waypoints, velocities })
    }

    pub fn start_time(&self) -> f64 {
        self.times[0]
    }

    pub fn end_time(&self) -> f64 {
        self.times[self.times.len() - 1]
    }

    pub fn dimension(&self) -> usize {
        self.waypoints[0].len()
    }

    /// State at time `t`. Before the start and after the end the spline rests at its first and
    /// last waypoint. A NaN time is taken as the start.
    pub fn state(&self, t: f64) -> SplineState {
        let dim = self.dimension();
        let last = self.times.len() - 1;
        if !(t > self.times[0]) || t >= self.times[last] {
            let index = if t >= self.times[last] { last } else { 0 };
            return SplineState {
                position: self.waypoints[index].clone(),
                velocity: DVector::zeros(dim),
                acceleration: DVector::zeros(dim),
            };
        }

        // Segment with times[k] <= t < times[k + 1]
        let k = self.times.partition_point(|&time| time <= t) - 1;
        let span = self.times[k + 1] - self.times[k];
        let s = t - self.times[k];

        let (p0, p1) = (&self.waypoints[k], &self.waypoints[k + 1]);
        let (v0, v1) = (&self.velocities[k], &self.velocities[k + 1]);
        let c = ((p1 - p0) * (3.0 / span) - v0 * 2.0 - v1) / span;
        let d = ((p0 - p1) * (2.0 / span) + v0 + v1) / (span * span);

        SplineState {
            position: p0 + v0 * s + &c * (s * s) + &d * (s * s * s),
            velocity: v0 + &c * (2.0 * s) + &d * (3.0 * s * s),
            acceleration: &c * 2.0 + &d * (6.0 * s),
        }
    }
}

/// Waypoint velocities giving continuous acceleration, zero at both ends. Solves the
/// tridiagonal system A v = B x for all dimensions at once.
fn velocities(waypoints: &[DVector<f64>], times: &[f64], dim: usize) -> Result<Vec<DVector<f64>>, ControlError> {
    let m = waypoints.len();
    let mut a = DMatrix::<f64>::zeros(m, m);
    let mut b = DMatrix::<f64>::zeros(m, m);
    a[(0, 0)] = 1.0;
    a[(m - 1, m - 1)] = 1.0;
    for i in 1..m - 1 {
        let before = times[i] - times[i - 1];
        let after = times[i + 1] - times[i];
        a[(i, i - 1)] = 1.0 / before;
        a[(i, i)] = 2.0 / before + 2.0 / after;
        a[(i, i + 1)] = 1.0 / after;
        b[(i, i - 1)] = -3.0 / (before * before);
        b[(i, i)] = 3.0 / (before * before) - 3.0 / (after * after);
        b[(i, i + 1)] = 3.0 / (after * after);
    }

    let x = DMatrix::from_fn(m, dim, |row, col| waypoints[row][col]);
    let v = a.lu().solve(&(b * x)).ok_or_else(|| {
        let err = ControlError::InvalidParameter("spline velocity system is singular".into());
        error!("{}", err);
        err
    })?;
    Ok((0..m).map(|row| v.row(row).transpose()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    fn spline() -> CubicSpline {
        CubicSpline::new(
            vec![
                DVector::from_vec(vec![0.0, 1.0]),
                DVector::from_vec(vec![1.0, 0.5]),
                DVector::from_vec(vec![0.5, -0.5]),
                DVector::from_vec(vec![2.0, 0.0]),
            ],
            vec![0.0, 1.0, 2.5, 3.0],
        ).unwrap()
    }

    #[test]
    fn test_passes_through_waypoints() {
        let spline = spline();
        let expected = [(1.0, [1.0, 0.5]), (2.5, [0.5, -0.5])];
        for (t, point) in expected {
            // Approach the knot from the left, it belongs to the next segment
            let state = spline.state(t - 1e-12);
            assert!((state.position[0] - point[0]).abs() < 1e-9);
            assert!((state.position[1] - point[1]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_rests_at_ends() {
        let spline = spline();
        let start = spline.state(-1.0);
        assert_eq!(start.position, DVector::from_vec(vec![0.0, 1.0]));
        assert_eq!(start.velocity, DVector::zeros(2));
        let end = spline.state(10.0);
        assert_eq!(end.position, DVector::from_vec(vec![2.0, 0.0]));
        assert!(spline.state(1e-9).velocity.norm() < 1e-6);
        assert!(spline.state(3.0 - 1e-9).velocity.norm() < 1e-6);
    }

    #[test]
    fn test_non_finite_time() {
        let spline = spline();
        let undefined = spline.state(f64::NAN);
        assert_eq!(undefined.position, DVector::from_vec(vec![0.0, 1.0]));
        assert_eq!(undefined.acceleration, DVector::zeros(2));
        assert_eq!(spline.state(f64::NEG_INFINITY).position, DVector::from_vec(vec![0.0, 1.0]));
        assert_eq!(spline.state(f64::INFINITY).position, DVector::from_vec(vec![2.0, 0.0]));
    }

    #[test]
    fn test_continuous_velocity_and_acceleration() {
        let spline = spline();
        for knot in [1.0, 2.5] {
            let left = spline.state(knot - 1e-7);
            let right = spline.state(knot + 1e-7);
            assert!((&left.velocity - &right.velocity).norm() < 1e-5);
            assert!((&left.acceleration - &right.acceleration).norm() < 1e-4);
        }
    }

    #[test]
    fn test_velocity_is_derivative_of_position() {
        let spline = spline();
        let (t, h) = (1.7, 1e-6);
        let numeric = (spline.state(t + h).position - spline.state(t - h).position) / (2.0 * h);
        assert!((numeric - spline.state(t).velocity).norm() < 1e-6);
    }

    #[test]
    fn test_two_waypoints_straight_segment() {
        let spline = CubicSpline::new(vec![DVector::zeros(1), DVector::from_element(1, 1.0)],
                                      vec![0.0, 2.0]).unwrap();
        assert!((spline.state(1.0).position[0] - 0.5).abs() < EPSILON);
        assert_eq!(spline.start_time(), 0.0);
        assert_eq!(spline.end_time(), 2.0);
        assert_eq!(spline.dimension(), 1);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(CubicSpline::new(vec![DVector::zeros(2)], vec![0.0]).is_err());
        assert!(CubicSpline::new(vec![DVector::zeros(2), DVector::zeros(3)], vec![0.0, 1.0]).is_err());
        assert!(CubicSpline::new(vec![DVector::zeros(2), DVector::zeros(2)], vec![1.0, 1.0]).is_err());
        assert!(CubicSpline::new(vec![DVector::zeros(2), DVector::zeros(2)], vec![0.0]).is_err());
    }
}
