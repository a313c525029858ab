//! Joint of a serial chain: its kind, axis, placement relative to the previous link and limits.

use std::str::FromStr;

use nalgebra::{Translation3, Unit, UnitQuaternion, Vector3};

use crate::control_error::ControlError;
use crate::kinematic_traits::Pose;

/// Default speed limit, 100 revolutions per minute.
pub const DEFAULT_SPEED_LIMIT: f64 = 100.0 * 2.0 * std::f64::consts::PI / 60.0;
pub const DEFAULT_ACCELERATION_LIMIT: f64 = 5.0;
pub const DEFAULT_EFFORT_LIMIT: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointKind {
    Revolute,
    Prismatic,
    /// Rigidly connects two links. Fixed joints are folded away when the chain is built.
    Fixed,
}

impl FromStr for JointKind {
    type Err = ControlError;

    /// Accepts the joint type names of robot description files. A continuous joint is a
    /// revolute joint whose limits are just very wide.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "revolute" | "continuous" => Ok(JointKind::Revolute),
            "prismatic" => Ok(JointKind::Prismatic),
            "fixed" => Ok(JointKind::Fixed),
            other => Err(ControlError::InvalidParameter(format!("unknown joint type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointLimits {
    pub lower: f64,
    pub upper: f64,
    pub speed: f64,
    pub acceleration: f64,
    pub effort: f64,
}

impl JointLimits {
    /// Position range with default speed, acceleration and effort limits.
    pub fn new(lower: f64, upper: f64) -> Self {
        JointLimits {
            lower,
            upper,
            speed: DEFAULT_SPEED_LIMIT,
            acceleration: DEFAULT_ACCELERATION_LIMIT,
            effort: DEFAULT_EFFORT_LIMIT,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_acceleration(mut self, acceleration: f64) -> Self {
        self.acceleration = acceleration;
        self
    }

    fn validate(&self, joint: &str) -> Result<(), ControlError> {
        let invalid = |message: String| Err(ControlError::InvalidLimit { joint: joint.to_string(), message });
        if !(self.lower < self.upper) {
            return invalid(format!("lower limit {} must be less than upper limit {}", self.lower, self.upper));
        }
        if !(self.speed > 0.0 && self.speed.is_finite()) {
            return invalid(format!("speed limit {} must be positive", self.speed));
        }
        if !(self.acceleration > 0.0 && self.acceleration.is_finite()) {
            return invalid(format!("acceleration limit {} must be positive", self.acceleration));
        }
        if !(self.effort > 0.0) {
            return invalid(format!("effort limit {} must be positive", self.effort));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Joint {
    name: String,
    kind: JointKind,
    axis: Unit<Vector3<f64>>,
    /// Placement of the joint frame relative to the frame of the previous link
    origin: Pose,
    limits: JointLimits,
    damping: f64,
    friction: f64,
}

impl Joint {
    pub fn new(name: &str, kind: JointKind, axis: Vector3<f64>, origin: Pose,
               limits: JointLimits, damping: f64, friction: f64) -> Result<Self, ControlError> {
        let axis = Unit::try_new(axis, 1E-9).ok_or_else(|| ControlError::InvalidParameter(
            format!("axis of the '{}' joint has zero length", name)))?;
        if kind != JointKind::Fixed {
            limits.validate(name)?;
        }
        if damping < 0.0 || friction < 0.0 {
            return Err(ControlError::InvalidParameter(format!(
                "damping {} and friction {} of the '{}' joint cannot be negative", damping, friction, name)));
        }
        Ok(Joint { name: name.to_string(), kind, axis, origin, limits, damping, friction })
    }

    pub fn revolute(name: &str, axis: Vector3<f64>, origin: Pose, limits: JointLimits) -> Result<Self, ControlError> {
        Joint::new(name, JointKind::Revolute, axis, origin, limits, 1.0, 0.0)
    }

    pub fn prismatic(name: &str, axis: Vector3<f64>, origin: Pose, limits: JointLimits) -> Result<Self, ControlError> {
        Joint::new(name, JointKind::Prismatic, axis, origin, limits, 1.0, 0.0)
    }

    pub fn fixed(name: &str, origin: Pose) -> Result<Self, ControlError> {
        Joint::new(name, JointKind::Fixed, Vector3::z(), origin, JointLimits::new(0.0, 0.0), 0.0, 0.0)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> JointKind {
        self.kind
    }

    pub fn is_actuated(&self) -> bool {
        self.kind != JointKind::Fixed
    }

    pub fn axis(&self) -> &Unit<Vector3<f64>> {
        &self.axis
    }

    pub fn origin(&self) -> &Pose {
        &self.origin
    }

    pub fn limits(&self) -> &JointLimits {
        &self.limits
    }

    pub fn damping(&self) -> f64 {
        self.damping
    }

    pub fn friction(&self) -> f64 {
        self.friction
    }

    pub(crate) fn set_origin(&mut self, origin: Pose) {
        self.origin = origin;
    }

    pub fn in_range(&self, position: f64) -> bool {
        position >= self.limits.lower && position <= self.limits.upper
    }

    /// Transform introduced by the joint at the given position, applied after the origin.
    pub fn motion(&self, position: f64) -> Pose {
        match self.kind {
            JointKind::Revolute => Pose::from_parts(
                Translation3::identity(),
                UnitQuaternion::from_axis_angle(&self.axis, position)),
            JointKind::Prismatic => Pose::from_parts(
                Translation3::from(self.axis.into_inner() * position),
                UnitQuaternion::identity()),
            JointKind::Fixed => Pose::identity(),
        }
    }

    /// Start position for a freshly built chain: zero when it is within limits, the middle
    /// of the range otherwise.
    pub fn home_position(&self) -> f64 {
        if self.in_range(0.0) {
            0.0
        } else {
            0.5 * (self.limits.lower + self.limits.upper)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    const EPSILON: f64 = 1e-12;

    #[test]
    fn test_parse_kind() {
        assert_eq!("revolute".parse::<JointKind>().unwrap(), JointKind::Revolute);
        assert_eq!("Continuous".parse::<JointKind>().unwrap(), JointKind::Revolute);
        assert_eq!("prismatic".parse::<JointKind>().unwrap(), JointKind::Prismatic);
        assert_eq!("fixed".parse::<JointKind>().unwrap(), JointKind::Fixed);
        assert!("floating".parse::<JointKind>().is_err());
    }

    #[test]
    fn test_inverted_limits_rejected() {
        let result = Joint::revolute("j1", Vector3::z(), Pose::identity(), JointLimits::new(1.0, -1.0));
        assert!(matches!(result, Err(ControlError::InvalidLimit { .. })));
    }

    #[test]
    fn test_zero_axis_rejected() {
        let result = Joint::revolute("j1", Vector3::zeros(), Pose::identity(), JointLimits::new(-1.0, 1.0));
        assert!(result.is_err());
    }

    #[test]
    fn test_negative_speed_rejected() {
        let limits = JointLimits::new(-1.0, 1.0).with_speed(-2.0);
        assert!(Joint::revolute("j1", Vector3::z(), Pose::identity(), limits).is_err());
    }

    #[test]
    fn test_fixed_joint_ignores_limits() {
        let joint = Joint::fixed("flange", Pose::identity()).unwrap();
        assert!(!joint.is_actuated());
        assert_eq!(joint.motion(1.0), Pose::identity());
    }

    #[test]
    fn test_revolute_motion() {
        let joint = Joint::revolute("j1", Vector3::z(), Pose::identity(), JointLimits::new(-3.0, 3.0)).unwrap();
        let moved = joint.motion(FRAC_PI_2) * nalgebra::Point3::new(1.0, 0.0, 0.0);
        assert!((moved.x).abs() < EPSILON);
        assert!((moved.y - 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_prismatic_motion() {
        let joint = Joint::prismatic("slide", Vector3::new(0.0, 2.0, 0.0), Pose::identity(),
                                     JointLimits::new(0.0, 1.0)).unwrap();
        let moved = joint.motion(0.25);
        assert!((moved.translation.vector - Vector3::new(0.0, 0.25, 0.0)).norm() < EPSILON);
    }

    #[test]
    fn test_home_position() {
        let centered = Joint::revolute("a", Vector3::z(), Pose::identity(), JointLimits::new(-1.0, 1.0)).unwrap();
        assert_eq!(centered.home_position(), 0.0);
        let offset = Joint::prismatic("b", Vector3::z(), Pose::identity(), JointLimits::new(0.2, 0.6)).unwrap();
        assert!((offset.home_position() - 0.4).abs() < EPSILON);
    }
}
