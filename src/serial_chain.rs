//! Serial chain of links connected by revolute and prismatic joints. Provides forward
//! kinematics, the geometric Jacobian and the joint space inertia, and serves them to the
//! controller as a [KinematicModel].

use nalgebra::{DMatrix, DVector, Matrix3, Point3, Vector3};
use tracing::{debug, error};

use crate::control_error::ControlError;
use crate::joint::{Joint, JointKind};
use crate::kinematic_traits::{ChainState, KinematicModel, Pose, TASK_DOF};
use crate::rigid_body::RigidBody;

/// Joint and the link it moves. Built from a list of such pairs, the chain keeps only the
/// actuated joints: a fixed joint merges its link into the preceding one and its origin into
/// the next joint (or into the end-effector offset when it is the last).
#[derive(Debug, Clone)]
pub struct SerialChain {
    joints: Vec<Joint>,
    links: Vec<RigidBody>,
    endpoint: Pose,

    positions: DVector<f64>,
    velocities: DVector<f64>,
    endpoint_pose: Pose,
    jacobian: DMatrix<f64>,
    inertia: DMatrix<f64>,
}

struct Frames {
    /// Joint axes in the base frame
    axes: Vec<Vector3<f64>>,
    /// Joint origins in the base frame
    origins: Vec<Vector3<f64>>,
    /// Link frames after the joint motion
    links: Vec<Pose>,
    endpoint: Pose,
}

impl SerialChain {
    /// # Arguments
    ///
    /// * `segments` - joints from the base outwards, each with the link it drives
    /// * `endpoint` - end-effector placement in the frame of the last link
    pub fn new(segments: Vec<(Joint, RigidBody)>, endpoint: Pose) -> Result<Self, ControlError> {
        let mut joints: Vec<Joint> = Vec::with_capacity(segments.len());
        let mut links: Vec<RigidBody> = Vec::with_capacity(segments.len());
        // Offset of fixed joints seen since the last actuated one
        let mut pending = Pose::identity();

        for (joint, link) in segments {
            if joint.is_actuated() {
                let mut joint = joint;
                joint.set_origin(pending * joint.origin());
                pending = Pose::identity();
                joints.push(joint);
                links.push(link);
            } else {
                pending = pending * joint.origin();
                match links.last_mut() {
                    Some(previous) => previous.combine(&link, &pending),
                    None => debug!("Link '{}' is part of the base", link.name()),
                }
            }
        }

        if joints.is_empty() {
            return Err(ControlError::InvalidParameter("the chain has no actuated joints".into()));
        }

        let n = joints.len();
        let positions = DVector::from_iterator(n, joints.iter().map(|j| j.home_position()));
        let mut chain = SerialChain {
            joints,
            links,
            endpoint: pending * endpoint,
            positions: positions.clone(),
            velocities: DVector::zeros(n),
            endpoint_pose: Pose::identity(),
            jacobian: DMatrix::zeros(TASK_DOF, n),
            inertia: DMatrix::zeros(n, n),
        };
        chain.update_state(&positions, &DVector::zeros(n))?;
        Ok(chain)
    }

    /// Number of actuated joints
    pub fn dof(&self) -> usize {
        self.joints.len()
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub fn joint_positions(&self) -> &DVector<f64> {
        &self.positions
    }

    pub fn joint_velocities(&self) -> &DVector<f64> {
        &self.velocities
    }

    pub fn endpoint_pose(&self) -> &Pose {
        &self.endpoint_pose
    }

    pub fn jacobian(&self) -> &DMatrix<f64> {
        &self.jacobian
    }

    pub fn inertia(&self) -> &DMatrix<f64> {
        &self.inertia
    }

    /// Sets the joint state and recomputes kinematics. The state is left unchanged if the
    /// lengths are wrong or a position lies outside its joint limits.
    pub fn update_state(&mut self, positions: &DVector<f64>, velocities: &DVector<f64>) -> Result<(), ControlError> {
        let n = self.dof();
        if positions.len() != n || velocities.len() != n {
            let err = ControlError::DimensionMismatch {
                operation: "update_state",
                details: format!("This robot has {} joints but {} positions and {} velocities were given",
                                 n, positions.len(), velocities.len()),
            };
            error!("{}", err);
            return Err(err);
        }
        for (joint, &position) in self.joints.iter().zip(positions.iter()) {
            if !joint.in_range(position) {
                let limits = joint.limits();
                let err = ControlError::OutOfRange {
                    joint: joint.name().to_string(),
                    position,
                    lower: limits.lower,
                    upper: limits.upper,
                };
                error!("{}", err);
                return Err(err);
            }
        }

        let frames = self.frames(positions);
        self.jacobian = self.geometric_jacobian(&frames);
        self.inertia = self.joint_space_inertia(&frames);
        self.endpoint_pose = frames.endpoint;
        self.positions = positions.clone();
        self.velocities = velocities.clone();
        Ok(())
    }

    /// End-effector pose for the given joint positions without touching the state.
    /// Positions beyond the limits are accepted here.
    pub fn forward(&self, positions: &DVector<f64>) -> Pose {
        self.frames(positions).endpoint
    }

    fn frames(&self, positions: &DVector<f64>) -> Frames {
        let n = self.dof();
        let mut frames = Frames {
            axes: Vec::with_capacity(n),
            origins: Vec::with_capacity(n),
            links: Vec::with_capacity(n),
            endpoint: Pose::identity(),
        };

        let mut frame = Pose::identity();
        for (joint, position) in self.joints.iter().zip(positions.iter()) {
            frame = frame * joint.origin();
            frames.origins.push(frame.translation.vector);
            frames.axes.push(frame.rotation * joint.axis().into_inner());
            frame = frame * joint.motion(*position);
            frames.links.push(frame);
        }
        frames.endpoint = frame * self.endpoint;
        frames
    }

    /// Column i is [aᵢ × (p - oᵢ); aᵢ] for a revolute and [aᵢ; 0] for a prismatic joint,
    /// with p the point of interest.
    fn column(&self, frames: &Frames, i: usize, point: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
        let axis = frames.axes[i];
        match self.joints[i].kind() {
            JointKind::Revolute => (axis.cross(&(point - frames.origins[i])), axis),
            JointKind::Prismatic => (axis, Vector3::zeros()),
            JointKind::Fixed => (Vector3::zeros(), Vector3::zeros()),
        }
    }

    fn geometric_jacobian(&self, frames: &Frames) -> DMatrix<f64> {
        let n = self.dof();
        let point = frames.endpoint.translation.vector;
        let mut jacobian = DMatrix::zeros(TASK_DOF, n);
        for i in 0..n {
            let (linear, angular) = self.column(frames, i, &point);
            jacobian.fixed_view_mut::<3, 1>(0, i).copy_from(&linear);
            jacobian.fixed_view_mut::<3, 1>(3, i).copy_from(&angular);
        }
        jacobian
    }

    /// M = Σₖ mₖ Jᵥₖᵗ Jᵥₖ + Jωₖᵗ Iₖ Jωₖ over the links, with Jᵥₖ the Jacobian of the center of
    /// mass of link k and Iₖ its inertia rotated into the base frame.
    fn joint_space_inertia(&self, frames: &Frames) -> DMatrix<f64> {
        let n = self.dof();
        let mut inertia = DMatrix::zeros(n, n);

        for (k, link) in self.links.iter().enumerate() {
            if link.mass() <= 0.0 && link.inertia().norm() <= 0.0 {
                continue;
            }
            let com = (frames.links[k] * Point3::from(*link.center_of_mass())).coords;
            let rotation = frames.links[k].rotation.to_rotation_matrix();
            let rotated: Matrix3<f64> = rotation.matrix() * link.inertia() * rotation.matrix().transpose();

            let mut linear = DMatrix::zeros(3, n);
            let mut angular = DMatrix::zeros(3, n);
            for i in 0..=k {
                let (v, w) = self.column(frames, i, &com);
                linear.fixed_view_mut::<3, 1>(0, i).copy_from(&v);
                angular.fixed_view_mut::<3, 1>(0, i).copy_from(&w);
            }
            let rotated = DMatrix::from_column_slice(3, 3, rotated.as_slice());
            inertia += linear.transpose() * &linear * link.mass() + angular.transpose() * rotated * &angular;
        }

        // Symmetric up to rounding, make it exact
        (&inertia + inertia.transpose()) * 0.5
    }

    fn limit_vectors(&self) -> (Vec<(f64, f64)>, DVector<f64>, DVector<f64>) {
        let n = self.dof();
        let positions = self.joints.iter().map(|j| (j.limits().lower, j.limits().upper)).collect();
        let speed = DVector::from_iterator(n, self.joints.iter().map(|j| j.limits().speed));
        let acceleration = DVector::from_iterator(n, self.joints.iter().map(|j| j.limits().acceleration));
        (positions, speed, acceleration)
    }
}

impl KinematicModel for SerialChain {
    fn dof(&self) -> usize {
        SerialChain::dof(self)
    }

    fn state(&self) -> ChainState {
        let (position_limits, speed_limits, acceleration_limits) = self.limit_vectors();
        ChainState {
            joint_positions: self.positions.clone(),
            joint_velocities: self.velocities.clone(),
            position_limits,
            speed_limits,
            acceleration_limits,
            jacobian: self.jacobian.clone(),
            inertia: self.inertia.clone(),
            endpoint_pose: self.endpoint_pose,
        }
    }
}
