//! Resolved-rate controller for serial manipulators.
//!
//! Every call is one control cycle: the model is read once, the joint velocity bounds for this
//! cycle are derived from the position, speed and acceleration limits, and a least squares
//! problem is solved for the joint velocities.
//!
//! * With 6 joints or fewer, the end-effector twist is tracked as closely as the bounds allow.
//! * With more than 6 joints, the twist is an equality constraint and the remaining freedom
//!   moves the joints towards a redundancy objective, weighted by the inertia of the robot and
//!   a penalty growing near the joint limits.
//!
//! The returned command always has one element per joint and always lies within the bounds
//! of the cycle. When the inputs are unusable, the previous command is repeated at 90 %.

use nalgebra::{DMatrix, DVector};
use tracing::{debug, error, warn};

use crate::control_error::ControlError;
use crate::jacobian::{manipulability, partial_derivative, pseudo_inverse};
use crate::kinematic_traits::{ChainState, KinematicModel, Pose, Twist, TASK_DOF};
use crate::pose::pose_error;
use crate::qp_solver::{QpSolver, ReducedSystem, SolverError, SolverOptions, SINGULAR_PIVOT};

/// Fraction of the previous velocity kept when no better command can be computed.
pub const DAMPING: f64 = 0.9;

/// Distances to the joint limits are not taken smaller than this in the limit penalty.
const MIN_LIMIT_DISTANCE: f64 = 1E-6;

/// Added to the diagonal of a weighting matrix that is not positive definite.
const WEIGHT_REGULARIZATION: f64 = 1E-3;

/// Fraction of the box width the warm start keeps away from the bounds.
const WARM_START_MARGIN: f64 = 0.01;

/// Largest task space residual accepted from the elimination strategy.
const TASK_TOLERANCE: f64 = 1E-9;

/// How the joint velocities of a redundant robot are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedundancyStrategy {
    /// Interior point solution of the equality constrained problem with the velocity bounds
    /// as inequality constraints.
    #[default]
    Barrier,
    /// QR elimination of the equality constraint followed by back-substitution joint by joint,
    /// clamping every joint to its bounds as it is found. If a joint had to be clamped or the
    /// twist is not met, the cycle is solved as with [RedundancyStrategy::Barrier].
    Elimination,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlOptions {
    /// Control loop frequency in Hz
    pub frequency: f64,
    pub proportional_gain: f64,
    /// Scalar of the default redundancy objective, see [singularity_avoidance]
    pub singularity_avoidance_gain: f64,
    pub redundancy: RedundancyStrategy,
}

impl Default for ControlOptions {
    fn default() -> Self {
        ControlOptions {
            frequency: 100.0,
            proportional_gain: 1.0,
            singularity_avoidance_gain: 0.5,
            redundancy: RedundancyStrategy::Barrier,
        }
    }
}

impl ControlOptions {
    pub fn validate(&self) -> Result<(), ControlError> {
        if !(self.frequency > 0.0 && self.frequency.is_finite()) {
            return Err(ControlError::InvalidParameter(format!(
                "control frequency must be positive, was {}", self.frequency)));
        }
        if !(self.singularity_avoidance_gain > 0.0 && self.singularity_avoidance_gain.is_finite()) {
            return Err(ControlError::InvalidParameter(format!(
                "singularity avoidance gain must be positive, was {}", self.singularity_avoidance_gain)));
        }
        if self.proportional_gain == 0.0 || !self.proportional_gain.is_finite() {
            return Err(ControlError::InvalidGain(self.proportional_gain));
        }
        Ok(())
    }
}

/// Outcome of [SerialKinematicControl::set_proportional_gain]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GainUpdate {
    Accepted,
    /// A negative gain was given and its absolute value is used instead.
    SignCorrected { requested: f64 },
}

/// Joint velocity range allowed during one control cycle. `lower <= upper` for every joint.
#[derive(Debug, Clone, PartialEq)]
pub struct VelocityBounds {
    pub lower: DVector<f64>,
    pub upper: DVector<f64>,
}

impl VelocityBounds {
    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn contains(&self, velocities: &DVector<f64>, tolerance: f64) -> bool {
        velocities.len() == self.len() && (0..self.len()).all(|i|
            velocities[i] >= self.lower[i] - tolerance && velocities[i] <= self.upper[i] + tolerance)
    }

    pub fn clamp(&self, velocities: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(self.len(), |i, _| velocities[i].max(self.lower[i]).min(self.upper[i]))
    }

    pub fn midpoint(&self) -> DVector<f64> {
        (&self.lower + &self.upper) * 0.5
    }

    /// `velocities` moved strictly inside the box.
    fn warm_start(&self, velocities: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(self.len(), |i, _| {
            let margin = WARM_START_MARGIN * (self.upper[i] - self.lower[i]);
            velocities[i].max(self.lower[i] + margin).min(self.upper[i] - margin)
        })
    }
}

/// Velocity bounds of every joint for a control period `dt`. Each bound is the tightest of:
///  * reaching the position limit within one period,
///  * the speed limit,
///  * stopping at the position limit with the maximum deceleration.
///
/// Distances to the limits are clamped at zero, so a joint beyond a limit may only retreat.
pub fn velocity_bounds(state: &ChainState, dt: f64) -> VelocityBounds {
    let n = state.dof();
    let mut lower = DVector::zeros(n);
    let mut upper = DVector::zeros(n);
    for i in 0..n {
        let q = state.joint_positions[i];
        let (q_min, q_max) = state.position_limits[i];
        let speed = state.speed_limits[i];
        let acceleration = state.acceleration_limits[i];

        let to_lower = (q - q_min).max(0.0);
        let to_upper = (q_max - q).max(0.0);

        lower[i] = (-to_lower / dt).max(-speed).max(-(2.0 * acceleration * to_lower).sqrt());
        upper[i] = (to_upper / dt).min(speed).min((2.0 * acceleration * to_upper).sqrt());
    }
    VelocityBounds { lower, upper }
}

/// Joint limit penalty of Chan and Dubey. It is 1 while the joint is moving away from its
/// nearest limit (or not moving), otherwise `range² / (4 (q_max - q)(q - q_min))`, which is 1 in
/// the middle of the range and grows without bound at the limits.
pub(crate) fn joint_penalty(state: &ChainState, joint: usize) -> f64 {
    let q = state.joint_positions[joint];
    let velocity = state.joint_velocities[joint];
    let (q_min, q_max) = state.position_limits[joint];

    let range = q_max - q_min;
    let to_upper = (q_max - q).max(MIN_LIMIT_DISTANCE);
    let to_lower = (q - q_min).max(MIN_LIMIT_DISTANCE);

    let gradient = range * range * (2.0 * q - q_max - q_min)
        / (4.0 * to_upper * to_upper * to_lower * to_lower);
    if gradient * velocity > 0.0 {
        range * range / (4.0 * to_upper * to_lower)
    } else {
        1.0
    }
}

/// Gradient of the manipulability `μ = sqrt(det(J Jᵗ))` scaled by `scalar`:
/// `scalar * μ * trace(∂J/∂qᵢ J⁺)`. The first element is zero, the first joint of the chain
/// cannot change the manipulability. Returns zeros if `scalar` is not positive.
pub fn singularity_avoidance(jacobian: &DMatrix<f64>, scalar: f64) -> DVector<f64> {
    let n = jacobian.ncols();
    let mut gradient = DVector::zeros(n);
    if !(scalar > 0.0) {
        error!("singularity_avoidance(): scalar was {} but it must be positive", scalar);
        return gradient;
    }

    let inverse = match pseudo_inverse(jacobian, 1E-9) {
        Ok(inverse) => inverse,
        Err(_) => return gradient,
    };
    let mu = manipulability(jacobian);
    for i in 1..n {
        gradient[i] = scalar * mu * (partial_derivative(jacobian, i) * &inverse).trace();
    }
    gradient
}

/// Controller of one serial manipulator, see the module documentation.
pub struct SerialKinematicControl<M: KinematicModel> {
    model: M,
    solver: QpSolver,
    gain: f64,
    period: f64,
    singularity_gain: f64,
    strategy: RedundancyStrategy,
    last_command: DVector<f64>,
    redundant_task: Option<DVector<f64>>,
}

impl<M: KinematicModel> SerialKinematicControl<M> {
    pub fn new(model: M, options: ControlOptions, solver_options: SolverOptions) -> Result<Self, ControlError> {
        let gain = options.proportional_gain.abs();
        if options.proportional_gain < 0.0 {
            warn!("Proportional gain {} was negative, using {}", options.proportional_gain, gain);
        }
        options.validate()?;
        let solver = QpSolver::new(solver_options)?;

        let n = model.dof();
        if n == 0 {
            return Err(ControlError::InvalidParameter("the manipulator has no joints".into()));
        }

        Ok(SerialKinematicControl {
            model,
            solver,
            gain,
            period: 1.0 / options.frequency,
            singularity_gain: options.singularity_avoidance_gain,
            strategy: options.redundancy,
            last_command: DVector::zeros(n),
            redundant_task: None,
        })
    }

    /// Controller with default control and solver options.
    pub fn with_defaults(model: M) -> Result<Self, ControlError> {
        SerialKinematicControl::new(model, ControlOptions::default(), SolverOptions::default())
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Access to the model, to update its state between cycles.
    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn proportional_gain(&self) -> f64 {
        self.gain
    }

    /// Control period in seconds
    pub fn control_period(&self) -> f64 {
        self.period
    }

    pub fn redundancy_strategy(&self) -> RedundancyStrategy {
        self.strategy
    }

    pub fn set_redundancy_strategy(&mut self, strategy: RedundancyStrategy) {
        self.strategy = strategy;
    }

    /// Command returned by the most recent cycle
    pub fn last_command(&self) -> &DVector<f64> {
        &self.last_command
    }

    /// Sets the gain of the feedback terms. Zero is rejected, a negative gain is replaced by
    /// its absolute value.
    pub fn set_proportional_gain(&mut self, gain: f64) -> Result<GainUpdate, ControlError> {
        if gain == 0.0 || !gain.is_finite() {
            error!("set_proportional_gain(): gain was {} but it must be non-zero and finite", gain);
            return Err(ControlError::InvalidGain(gain));
        }
        if gain < 0.0 {
            warn!("set_proportional_gain(): gain was {}, it must be positive. Using {}", gain, -gain);
            self.gain = -gain;
            return Ok(GainUpdate::SignCorrected { requested: gain });
        }
        self.gain = gain;
        Ok(GainUpdate::Accepted)
    }

    /// Secondary task for the next redundant cycle that is not given an explicit one.
    pub fn set_redundant_task(&mut self, task: DVector<f64>) -> Result<(), ControlError> {
        let n = self.last_command.len();
        if task.len() != n {
            let err = ControlError::DimensionMismatch {
                operation: "set_redundant_task",
                details: format!("This robot has {} joints but the task vector was {}x1", n, task.len()),
            };
            error!("{}", err);
            return Err(err);
        }
        self.redundant_task = Some(task);
        Ok(())
    }

    /// Velocity bounds of the current state
    pub fn speed_limits(&self) -> Result<VelocityBounds, ControlError> {
        let state = self.snapshot("speed_limits")?;
        Ok(velocity_bounds(&state, self.period))
    }

    /// Joint limit penalty of one joint in the current state
    pub fn joint_penalty(&self, joint: usize) -> Result<f64, ControlError> {
        let state = self.snapshot("joint_penalty")?;
        if joint >= state.dof() {
            let err = ControlError::DimensionMismatch {
                operation: "joint_penalty",
                details: format!("joint {} requested but the robot has {} joints", joint, state.dof()),
            };
            error!("{}", err);
            return Err(err);
        }
        Ok(joint_penalty(&state, joint))
    }

    /// Singularity avoidance gradient of the current state, zeros if the state is unusable.
    pub fn singularity_avoidance(&self, scalar: f64) -> DVector<f64> {
        match self.snapshot("singularity_avoidance") {
            Ok(state) => singularity_avoidance(&state.jacobian, scalar),
            Err(_) => DVector::zeros(self.last_command.len()),
        }
    }

    /// Joint velocities giving the end-effector `twist`. For redundant robots, `redundancy`
    /// is the joint velocity to approach in the null space.
    pub fn move_at_speed(&mut self, twist: &Twist, redundancy: Option<&DVector<f64>>) -> DVector<f64> {
        let state = match self.snapshot("move_at_speed") {
            Ok(state) => state,
            Err(_) => return self.fallback(None),
        };
        self.resolve(&state, twist, redundancy, "move_at_speed")
    }

    /// Proportional control towards joint positions.
    pub fn move_to_position(&mut self, position: &DVector<f64>) -> DVector<f64> {
        let state = match self.snapshot("move_to_position") {
            Ok(state) => state,
            Err(_) => return self.fallback(None),
        };
        let bounds = velocity_bounds(&state, self.period);
        if position.len() != state.dof() {
            self.report_mismatch("move_to_position", format!(
                "This robot has {} joints but the target was {}x1", state.dof(), position.len()));
            return self.fallback(Some(&bounds));
        }

        let command = (position - &state.joint_positions) * self.gain;
        self.commit(command, &bounds)
    }

    /// Proportional control of the end-effector towards `pose`.
    pub fn move_to_pose(&mut self, pose: &Pose, redundancy: Option<&DVector<f64>>) -> DVector<f64> {
        let state = match self.snapshot("move_to_pose") {
            Ok(state) => state,
            Err(_) => return self.fallback(None),
        };
        let twist = pose_error(pose, &state.endpoint_pose) * self.gain;
        self.resolve(&state, &twist, redundancy, "move_to_pose")
    }

    /// Follows a Cartesian trajectory: feed-forward of its velocity, predicted to the end of
    /// the cycle when the acceleration is known, plus feedback of the pose error.
    pub fn track_cartesian_trajectory(&mut self, pose: &Pose, velocity: &Twist,
                                      acceleration: Option<&Twist>,
                                      redundancy: Option<&DVector<f64>>) -> DVector<f64> {
        let state = match self.snapshot("track_cartesian_trajectory") {
            Ok(state) => state,
            Err(_) => return self.fallback(None),
        };
        let mut twist = velocity + pose_error(pose, &state.endpoint_pose) * self.gain;
        if let Some(acceleration) = acceleration {
            twist += acceleration * self.period;
        }
        self.resolve(&state, &twist, redundancy, "track_cartesian_trajectory")
    }

    /// Follows a joint trajectory: feed-forward of its velocity plus feedback of the position
    /// error, clamped to the bounds.
    pub fn track_joint_trajectory(&mut self, position: &DVector<f64>, velocity: &DVector<f64>,
                                  acceleration: Option<&DVector<f64>>) -> DVector<f64> {
        let state = match self.snapshot("track_joint_trajectory") {
            Ok(state) => state,
            Err(_) => return self.fallback(None),
        };
        let bounds = velocity_bounds(&state, self.period);
        let n = state.dof();
        if position.len() != n || velocity.len() != n || acceleration.is_some_and(|a| a.len() != n) {
            self.report_mismatch("track_joint_trajectory", format!(
                "This robot has {} joints but the position was {}x1, the velocity {}x1 and the acceleration {}x1",
                n, position.len(), velocity.len(), acceleration.map_or(n, |a| a.len())));
            return self.fallback(Some(&bounds));
        }

        let mut command = velocity + (position - &state.joint_positions) * self.gain;
        if let Some(acceleration) = acceleration {
            command += acceleration * self.period;
        }
        self.commit(command, &bounds)
    }

    fn snapshot(&self, operation: &'static str) -> Result<ChainState, ControlError> {
        let state = self.model.state();
        let result = state.validate().and_then(|_| {
            if state.dof() == self.last_command.len() {
                Ok(())
            } else {
                Err(ControlError::DimensionMismatch {
                    operation,
                    details: format!("The controller was built for {} joints but the model now has {}",
                                     self.last_command.len(), state.dof()),
                })
            }
        });
        match result {
            Ok(()) => Ok(state),
            Err(err) => {
                error!("{}(): unusable model state: {}", operation, err);
                Err(err)
            }
        }
    }

    fn resolve(&mut self, state: &ChainState, twist: &Twist, redundancy: Option<&DVector<f64>>,
               operation: &'static str) -> DVector<f64> {
        let n = state.dof();
        let bounds = velocity_bounds(state, self.period);
        if let Some(objective) = redundancy {
            if objective.len() != n {
                self.report_mismatch(operation, format!(
                    "This robot has {} joints but the redundancy vector was {}x1", n, objective.len()));
                return self.fallback(Some(&bounds));
            }
        }

        if twist.iter().any(|v| !v.is_finite()) {
            error!("{}(): the requested twist {:?} is not finite", operation, twist.as_slice());
            return self.fallback(Some(&bounds));
        }

        let y = DVector::from_column_slice(twist.as_slice());
        let solution = if n <= TASK_DOF {
            if redundancy.is_some() {
                debug!("{}(): the robot is not redundant, redundancy vector ignored", operation);
            }
            let w = DMatrix::identity(TASK_DOF, TASK_DOF);
            self.solver.least_squares_bounded(&y, &state.jacobian, &w,
                                              &bounds.lower, &bounds.upper, &bounds.midpoint())
        } else {
            let objective = match redundancy {
                Some(objective) => objective.clone(),
                None => match self.redundant_task.take() {
                    Some(task) => task,
                    None => singularity_avoidance(&state.jacobian, self.singularity_gain),
                },
            };
            let w = redundancy_weighting(state);
            match self.strategy {
                RedundancyStrategy::Barrier => self.solver.least_squares_equality_bounded(
                    &objective, &w, &y, &state.jacobian, &bounds.lower, &bounds.upper,
                    &bounds.warm_start(&state.joint_velocities)),
                RedundancyStrategy::Elimination => self.eliminate(state, &objective, &w, &y, &bounds),
            }
        };

        match solution {
            Ok(command) => self.commit(command, &bounds),
            Err(err) => {
                error!("{}(): {}", operation, err);
                self.fallback(Some(&bounds))
            }
        }
    }

    /// Elimination strategy, falling back to the bounded interior point solution when the
    /// back-substitution could not stay inside the bounds while meeting the twist.
    fn eliminate(&self, state: &ChainState, objective: &DVector<f64>, w: &DMatrix<f64>,
                 y: &DVector<f64>, bounds: &VelocityBounds) -> Result<DVector<f64>, SolverError> {
        let reduced = self.solver.eliminate_equality(objective, w, y, &state.jacobian)?;
        let (velocities, clamped) = solve_joint_control(&reduced, state, bounds);
        let residual = (&state.jacobian * &velocities - y).norm();
        if !clamped && residual <= TASK_TOLERANCE * (1.0 + y.norm()) {
            return Ok(velocities);
        }
        debug!("Elimination missed the twist by {:e} (clamped: {}), solving with the bounds as constraints",
            residual, clamped);
        self.solver.least_squares_equality_bounded(objective, w, y, &state.jacobian,
                                                   &bounds.lower, &bounds.upper,
                                                   &bounds.warm_start(&state.joint_velocities))
    }

    /// Replaces non-finite elements by the damped previous command and clamps to the bounds.
    fn commit(&mut self, command: DVector<f64>, bounds: &VelocityBounds) -> DVector<f64> {
        let damped = &self.last_command * DAMPING;
        let mut corrected = false;
        let command = DVector::from_fn(bounds.len(), |i, _| {
            if command[i].is_finite() {
                command[i]
            } else {
                corrected = true;
                damped[i]
            }
        });
        if corrected {
            warn!("Non-finite joint velocity replaced by the damped previous command");
        }
        self.last_command = bounds.clamp(&command);
        self.last_command.clone()
    }

    fn fallback(&mut self, bounds: Option<&VelocityBounds>) -> DVector<f64> {
        let damped = &self.last_command * DAMPING;
        self.last_command = match bounds {
            Some(bounds) => bounds.clamp(&damped),
            None => damped,
        };
        self.last_command.clone()
    }

    fn report_mismatch(&self, operation: &'static str, details: String) {
        error!("{}", ControlError::DimensionMismatch { operation, details });
    }
}

/// Inertia with the joint limit penalty added on the diagonal: `W = M + diag(penalty - 1)`.
fn redundancy_weighting(state: &ChainState) -> DMatrix<f64> {
    let n = state.dof();
    let mut w = state.inertia.clone();
    for i in 0..n {
        w[(i, i)] += joint_penalty(state, i) - 1.0;
    }
    if w.clone().cholesky().is_none() {
        debug!("Weighting matrix is not positive definite, regularizing");
        for i in 0..n {
            w[(i, i)] += WEIGHT_REGULARIZATION;
        }
    }
    w
}

/// Back-substitution of the reduced system from the last joint to the first. A joint with a
/// vanishing pivot keeps 90 % of its current velocity; every joint is clamped to its bounds
/// before the joints above it use its value. Also tells whether any joint was clamped.
fn solve_joint_control(reduced: &ReducedSystem, state: &ChainState,
                       bounds: &VelocityBounds) -> (DVector<f64>, bool) {
    let n = state.dof();
    let u = &reduced.upper;
    let mut velocities = DVector::zeros(n);
    let mut clamped = false;
    for i in (0..n).rev() {
        let pivot = u[(i, i)];
        let value = if pivot.abs() < SINGULAR_PIVOT {
            debug!("Joint {} is singular in the reduced system, damping it", i);
            DAMPING * state.joint_velocities[i]
        } else {
            let mut sum = 0.0;
            for j in i + 1..n {
                sum += u[(i, j)] * velocities[j];
            }
            (reduced.rhs[i] - sum) / pivot
        };
        velocities[i] = value.max(bounds.lower[i]).min(bounds.upper[i]);
        clamped |= velocities[i] != value;
    }
    (velocities, clamped)
}
