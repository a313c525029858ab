//! Defines the snapshot of the manipulator state the controller works on, and the trait
//! through which the kinematic model provides it.

use std::sync::{Arc, Mutex, RwLock};

use nalgebra::{DMatrix, DVector, Isometry3, Vector6};

use crate::control_error::ControlError;

/// Pose is used a pose of the end-effector. It contains both Cartesian position and rotation quaternion
/// ```
/// extern crate nalgebra as na;
/// use na::{Isometry3, Translation3, UnitQuaternion, Vector3};
///
/// type Pose = Isometry3<f64>;
///
/// let translation = Translation3::new(1.0, 0.0, 0.0);
/// // The quaternion should be normalized to represent a valid rotation.
/// let rotation = UnitQuaternion::from_quaternion(na::Quaternion::new(1.0, 0.0, 0.0, 1.0).normalize());
/// let transform = Pose::from_parts(translation, rotation);
/// ```
pub type Pose = Isometry3<f64>;

/// Linear velocity (first three elements) followed by angular velocity.
pub type Twist = Vector6<f64>;

/// Number of task space degrees of freedom (rows of the Jacobian).
pub const TASK_DOF: usize = 6;

/// Everything the controller needs to know about the manipulator for one control cycle.
///
/// It is read once at the start of the cycle, so a model updated concurrently by an
/// estimator cannot change under the controller while it solves.
#[derive(Debug, Clone)]
pub struct ChainState {
    pub joint_positions: DVector<f64>,
    pub joint_velocities: DVector<f64>,

    /// (lower, upper) position limit of every joint.
    pub position_limits: Vec<(f64, f64)>,

    /// Maximum rated speed of every joint (positive).
    pub speed_limits: DVector<f64>,

    /// Maximum acceleration of every joint (positive).
    pub acceleration_limits: DVector<f64>,

    /// 6 x n matrix mapping joint velocities to the end-effector twist.
    pub jacobian: DMatrix<f64>,

    /// n x n symmetric positive semi-definite weighting for redundancy resolution.
    pub inertia: DMatrix<f64>,

    pub endpoint_pose: Pose,
}

impl ChainState {
    /// Validated snapshot.
    #[allow(clippy::too_many_arguments)]
    pub fn new(joint_positions: DVector<f64>, joint_velocities: DVector<f64>,
               position_limits: Vec<(f64, f64)>, speed_limits: DVector<f64>,
               acceleration_limits: DVector<f64>, jacobian: DMatrix<f64>,
               inertia: DMatrix<f64>, endpoint_pose: Pose) -> Result<Self, ControlError> {
        let state = ChainState {
            joint_positions,
            joint_velocities,
            position_limits,
            speed_limits,
            acceleration_limits,
            jacobian,
            inertia,
            endpoint_pose,
        };
        state.validate()?;
        Ok(state)
    }

    /// State of a manipulator standing still, weighted by identity and with the end-effector
    /// at the origin. Convenient when only the Jacobian and the limits matter.
    pub fn at_rest(joint_positions: DVector<f64>, position_limits: Vec<(f64, f64)>,
                   speed_limits: DVector<f64>, acceleration_limits: DVector<f64>,
                   jacobian: DMatrix<f64>) -> Result<Self, ControlError> {
        let n = joint_positions.len();
        let state = ChainState {
            joint_positions,
            joint_velocities: DVector::zeros(n),
            position_limits,
            speed_limits,
            acceleration_limits,
            jacobian,
            inertia: DMatrix::identity(n, n),
            endpoint_pose: Pose::identity(),
        };
        state.validate()?;
        Ok(state)
    }

    /// Number of joints.
    pub fn dof(&self) -> usize {
        self.joint_positions.len()
    }

    /// Checks dimensions and limits. Joint positions outside their limits are accepted,
    /// the controller must be able to bring such a joint back.
    pub fn validate(&self) -> Result<(), ControlError> {
        let n = self.dof();
        if n == 0 {
            return Err(ControlError::InvalidParameter("the manipulator has no joints".into()));
        }
        if self.joint_velocities.len() != n || self.position_limits.len() != n
            || self.speed_limits.len() != n || self.acceleration_limits.len() != n
            || self.jacobian.shape() != (TASK_DOF, n) || self.inertia.shape() != (n, n) {
            return Err(ControlError::DimensionMismatch {
                operation: "validate",
                details: format!(
                    "This robot has {} joints, but there were {} velocities, {} position limits, \
                     {} speed limits, {} acceleration limits, a {}x{} Jacobian and a {}x{} inertia matrix",
                    n, self.joint_velocities.len(), self.position_limits.len(),
                    self.speed_limits.len(), self.acceleration_limits.len(),
                    self.jacobian.nrows(), self.jacobian.ncols(),
                    self.inertia.nrows(), self.inertia.ncols()),
            });
        }

        let finite = |values: &[f64]| values.iter().all(|v| v.is_finite());
        if !finite(self.joint_positions.as_slice()) || !finite(self.joint_velocities.as_slice())
            || !finite(self.jacobian.as_slice()) || !finite(self.inertia.as_slice()) {
            return Err(ControlError::InvalidParameter(
                "joint state, Jacobian or inertia contains non-finite values".into()));
        }

        for i in 0..n {
            let (lower, upper) = self.position_limits[i];
            if !(lower < upper) || !lower.is_finite() || !upper.is_finite() {
                return Err(ControlError::InvalidLimit {
                    joint: format!("#{}", i),
                    message: format!("lower position limit {} is not less than upper limit {}", lower, upper),
                });
            }
            if !(self.speed_limits[i] > 0.0 && self.speed_limits[i].is_finite()) {
                return Err(ControlError::InvalidLimit {
                    joint: format!("#{}", i),
                    message: format!("speed limit {} must be positive", self.speed_limits[i]),
                });
            }
            if !(self.acceleration_limits[i] > 0.0 && self.acceleration_limits[i].is_finite()) {
                return Err(ControlError::InvalidLimit {
                    joint: format!("#{}", i),
                    message: format!("acceleration limit {} must be positive", self.acceleration_limits[i]),
                });
            }
        }
        Ok(())
    }
}

/// Source of the manipulator state. The controller calls [KinematicModel::state] exactly once
/// per control cycle.
pub trait KinematicModel {
    /// Number of actuated joints.
    fn dof(&self) -> usize;

    /// Consistent snapshot of the current state.
    fn state(&self) -> ChainState;
}

/// A fixed snapshot is a model that never moves.
impl KinematicModel for ChainState {
    fn dof(&self) -> usize {
        ChainState::dof(self)
    }

    fn state(&self) -> ChainState {
        self.clone()
    }
}

/// Model shared with a separate estimator thread. The read lock is held only while the
/// snapshot is copied.
impl<M: KinematicModel> KinematicModel for Arc<RwLock<M>> {
    fn dof(&self) -> usize {
        self.read().unwrap_or_else(|poisoned| poisoned.into_inner()).dof()
    }

    fn state(&self) -> ChainState {
        self.read().unwrap_or_else(|poisoned| poisoned.into_inner()).state()
    }
}

impl<M: KinematicModel> KinematicModel for Arc<Mutex<M>> {
    fn dof(&self) -> usize {
        self.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).dof()
    }

    fn state(&self) -> ChainState {
        self.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).state()
    }
}
