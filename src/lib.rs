//! Resolved-rate differential kinematics control of serial manipulators, with the constrained
//! least squares solver it is built on.
//!
//! At every control cycle the controller reads the state of the manipulator (joint positions
//! and velocities, Jacobian, inertia, end-effector pose) and computes the joint velocities that
//! move the end-effector with the desired twist, towards a pose, or along a trajectory. Joint
//! position, speed and acceleration limits are respected at every cycle.
//!
//! # Features
//!
//! - Log-barrier interior point solver for quadratic programs and weighted least squares
//!   problems with box and equality constraints. It has no robotics knowledge and can be used
//!   on its own.
//! - Joint velocity bounds combining the position limit, the speed limit and the braking
//!   distance at maximum deceleration.
//! - Robots with six joints or fewer track the twist as closely as the bounds allow.
//! - Redundant robots track the twist exactly and use the remaining freedom for a secondary
//!   task, by default moving away from singularities. The weighting combines the joint space
//!   inertia with a penalty that grows near the joint limits.
//! - Pose, Cartesian trajectory and joint trajectory tracking with velocity and acceleration
//!   feed-forward.
//! - When the inputs cannot be used, the previous command is repeated at 90 %, so the
//!   controller always returns a command that is safe to send.
//! - Serial chain model with revolute, prismatic and fixed joints, computing forward
//!   kinematics, the geometric Jacobian and the joint space inertia.
//! - Cubic spline trajectories in joint space.
//! - Robot description and controller settings from YAML (optional, `allow_filesystem`).
//!
//! ```
//! use nalgebra::{DMatrix, DVector};
//! use rs_kinematic_control::kinematic_traits::{ChainState, Twist};
//! use rs_kinematic_control::serial_kinematic_control::SerialKinematicControl;
//!
//! // Six joints, each moving the end-effector along one task direction.
//! let state = ChainState::at_rest(
//!     DVector::zeros(6),
//!     vec![(-1.0, 1.0); 6],
//!     DVector::from_element(6, 2.0),
//!     DVector::from_element(6, 5.0),
//!     DMatrix::identity(6, 6),
//! ).unwrap();
//!
//! let mut control = SerialKinematicControl::with_defaults(state).unwrap();
//! let velocities = control.move_at_speed(&Twist::new(0.5, 0.0, 0.0, 0.0, 0.0, 0.0), None);
//! assert!((velocities[0] - 0.5).abs() < 1e-2);
//! ```

pub mod qp_solver;

pub mod control_error;
pub mod kinematic_traits;
pub mod pose;
pub mod jacobian;

pub mod joint;
pub mod rigid_body;
pub mod serial_chain;

pub mod cubic_spline;

pub mod serial_kinematic_control;

#[path = "utils/utils.rs"]
pub mod utils;

#[cfg(feature = "allow_filesystem")]
pub mod parameter_error;

#[cfg(feature = "allow_filesystem")]
pub mod parameters_from_file;

#[cfg(test)]
mod tests;
