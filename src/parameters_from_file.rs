//! Reads the robot description and the controller settings from a YAML file (optional)

use std::path::Path;

use nalgebra::{Matrix3, Vector3};
use yaml_rust2::{Yaml, YamlLoader};

use crate::joint::{Joint, JointKind, JointLimits, DEFAULT_ACCELERATION_LIMIT, DEFAULT_EFFORT_LIMIT, DEFAULT_SPEED_LIMIT};
use crate::kinematic_traits::Pose;
use crate::parameter_error::ParameterError;
use crate::pose::from_xyz_rpy;
use crate::qp_solver::SolverOptions;
use crate::rigid_body::RigidBody;
use crate::serial_chain::SerialChain;
use crate::serial_kinematic_control::{ControlOptions, RedundancyStrategy};

/// Everything needed to build a controller for one robot.
#[derive(Debug, Clone)]
pub struct RobotDescription {
    pub chain: SerialChain,
    pub control: ControlOptions,
    pub solver: SolverOptions,
}

impl RobotDescription {
    /// Read the robot description from YAML file. YAML file like this is supported:
    /// ```yaml
    /// control: { frequency: 100, proportional_gain: 2.0, redundancy: barrier }
    /// solver: { max_iterations: 30, tolerance: 0.0001 }
    /// joints:
    ///   - name: j1
    ///     type: revolute
    ///     axis: [0, 0, 1]
    ///     origin: { xyz: [0, 0, 0.15], rpy: [0, 0, 0] }
    ///     limits: { lower: deg(-170), upper: deg(170), speed: 2.0, acceleration: 5.0, effort: 50 }
    ///     link: { mass: 3.0, inertia: [0.03, 0.03, 0.01], com: [0, 0, 0.1] }
    /// endpoint: { xyz: [0, 0, 0.1], rpy: [0, 0, 0] }
    /// ```
    /// The `control` and `solver` sections and every key in them are optional. Angles
    /// (position limits of revolute joints and `rpy`) may be written as deg(angle).
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ParameterError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ParameterError> {
        let docs = YamlLoader::load_from_str(contents)
            .map_err(|e| ParameterError::ParseError(e.to_string()))?;
        let doc = docs.first()
            .ok_or_else(|| ParameterError::ParseError("the YAML document is empty".into()))?;

        let control = control_options(&doc["control"])?;
        let solver = solver_options(&doc["solver"])?;

        let joints = doc["joints"].as_vec()
            .ok_or_else(|| ParameterError::MissingField("joints".into()))?;
        let segments = joints.iter().enumerate()
            .map(|(i, joint)| segment(i, joint))
            .collect::<Result<Vec<_>, _>>()?;
        let endpoint = optional_pose(&doc["endpoint"], "endpoint")?;

        let chain = SerialChain::new(segments, endpoint)?;
        Ok(RobotDescription { chain, control, solver })
    }
}

fn control_options(section: &Yaml) -> Result<ControlOptions, ParameterError> {
    let mut options = ControlOptions::default();
    if section.is_badvalue() {
        return Ok(options);
    }
    if let Some(value) = optional_number(&section["frequency"], "control.frequency")? {
        options.frequency = value;
    }
    if let Some(value) = optional_number(&section["proportional_gain"], "control.proportional_gain")? {
        options.proportional_gain = value;
    }
    if let Some(value) = optional_number(&section["singularity_avoidance_gain"], "control.singularity_avoidance_gain")? {
        options.singularity_avoidance_gain = value;
    }
    match &section["redundancy"] {
        Yaml::BadValue => {}
        value => {
            options.redundancy = match value.as_str().map(|s| s.to_ascii_lowercase()).as_deref() {
                Some("barrier") => RedundancyStrategy::Barrier,
                Some("elimination") => RedundancyStrategy::Elimination,
                _ => return Err(ParameterError::ParseError(format!(
                    "control.redundancy must be 'barrier' or 'elimination', was {:?}", value))),
            }
        }
    }
    Ok(options)
}

fn solver_options(section: &Yaml) -> Result<SolverOptions, ParameterError> {
    let mut options = SolverOptions::default();
    if section.is_badvalue() {
        return Ok(options);
    }
    match &section["max_iterations"] {
        Yaml::BadValue => {}
        Yaml::Integer(value) if *value > 0 => options.max_iterations = *value as usize,
        other => return Err(ParameterError::ParseError(format!(
            "solver.max_iterations must be a positive integer, was {:?}", other))),
    }
    let fields: [(&str, &mut f64); 8] = [
        ("tolerance", &mut options.tolerance),
        ("barrier_weight", &mut options.barrier_weight),
        ("barrier_decay", &mut options.barrier_decay),
        ("decay_slowdown", &mut options.decay_slowdown),
        ("barrier_growth", &mut options.barrier_growth),
        ("initial_step", &mut options.initial_step),
        ("step_shrink", &mut options.step_shrink),
        ("violation_floor", &mut options.violation_floor),
    ];
    for (key, target) in fields {
        if let Some(value) = optional_number(&section[key], key)? {
            *target = value;
        }
    }
    options.validate().map_err(|e| ParameterError::ParseError(e.to_string()))?;
    Ok(options)
}

fn segment(index: usize, joint: &Yaml) -> Result<(Joint, RigidBody), ParameterError> {
    let name = match joint["name"].as_str() {
        Some(name) => name.to_string(),
        None => format!("joint_{}", index + 1),
    };
    let kind: JointKind = joint["type"].as_str()
        .ok_or_else(|| ParameterError::MissingField(format!("joints[{}].type", index)))?
        .parse()?;
    let origin = optional_pose(&joint["origin"], &format!("{}.origin", name))?;
    let link = rigid_body(&joint["link"], &name)?;

    if kind == JointKind::Fixed {
        return Ok((Joint::fixed(&name, origin)?, link));
    }

    let axis = match &joint["axis"] {
        Yaml::BadValue => Vector3::z(),
        axis => Vector3::from(triple(axis, &format!("{}.axis", name))?),
    };

    let limits = &joint["limits"];
    if limits.is_badvalue() {
        return Err(ParameterError::MissingField(format!("{}.limits", name)));
    }
    let position = |key: &str| -> Result<f64, ParameterError> {
        let field = format!("{}.limits.{}", name, key);
        let value = &limits[key];
        if value.is_badvalue() {
            return Err(ParameterError::MissingField(field));
        }
        match kind {
            JointKind::Revolute => angle(value, &field),
            _ => number(value, &field),
        }
    };
    let rate = |key: &str, default: f64| -> Result<f64, ParameterError> {
        Ok(optional_number(&limits[key], &format!("{}.limits.{}", name, key))?.unwrap_or(default))
    };
    let limits = JointLimits {
        lower: position("lower")?,
        upper: position("upper")?,
        speed: rate("speed", DEFAULT_SPEED_LIMIT)?,
        acceleration: rate("acceleration", DEFAULT_ACCELERATION_LIMIT)?,
        effort: rate("effort", DEFAULT_EFFORT_LIMIT)?,
    };

    let damping = optional_number(&joint["damping"], &format!("{}.damping", name))?.unwrap_or(1.0);
    let friction = optional_number(&joint["friction"], &format!("{}.friction", name))?.unwrap_or(0.0);
    Ok((Joint::new(&name, kind, axis, origin, limits, damping, friction)?, link))
}

fn rigid_body(link: &Yaml, joint: &str) -> Result<RigidBody, ParameterError> {
    let name = format!("{}_link", joint);
    if link.is_badvalue() {
        return Ok(RigidBody::massless(&name));
    }
    let mass = optional_number(&link["mass"], &format!("{}.mass", name))?.unwrap_or(0.0);
    let center_of_mass = match &link["com"] {
        Yaml::BadValue => Vector3::zeros(),
        com => Vector3::from(triple(com, &format!("{}.com", name))?),
    };
    let inertia = match &link["inertia"] {
        Yaml::BadValue => Matrix3::zeros(),
        inertia => inertia_matrix(inertia, &format!("{}.inertia", name))?,
    };
    Ok(RigidBody::new(&name, mass, inertia, center_of_mass)?)
}

/// Either the three principal moments [ixx, iyy, izz] or all six [ixx, iyy, izz, ixy, ixz, iyz].
fn inertia_matrix(value: &Yaml, field: &str) -> Result<Matrix3<f64>, ParameterError> {
    let items = value.as_vec().ok_or_else(|| ParameterError::ParseError(format!("{} must be a list", field)))?;
    let v = items.iter().map(|item| number(item, field)).collect::<Result<Vec<_>, _>>()?;
    match v.len() {
        3 => Ok(Matrix3::from_diagonal(&Vector3::new(v[0], v[1], v[2]))),
        6 => Ok(Matrix3::new(
            v[0], v[3], v[4],
            v[3], v[1], v[5],
            v[4], v[5], v[2])),
        found => Err(ParameterError::InvalidLength { field: field.to_string(), expected: 6, found }),
    }
}

fn optional_pose(value: &Yaml, field: &str) -> Result<Pose, ParameterError> {
    if value.is_badvalue() {
        return Ok(Pose::identity());
    }
    let xyz = match &value["xyz"] {
        Yaml::BadValue => [0.0; 3],
        xyz => triple(xyz, &format!("{}.xyz", field))?,
    };
    let rpy = match &value["rpy"] {
        Yaml::BadValue => [0.0; 3],
        rpy => angle_triple(rpy, &format!("{}.rpy", field))?,
    };
    Ok(from_xyz_rpy(xyz, rpy))
}

fn triple(value: &Yaml, field: &str) -> Result<[f64; 3], ParameterError> {
    collect_triple(value, field, number)
}

fn angle_triple(value: &Yaml, field: &str) -> Result<[f64; 3], ParameterError> {
    collect_triple(value, field, angle)
}

fn collect_triple(value: &Yaml, field: &str,
                  convert: fn(&Yaml, &str) -> Result<f64, ParameterError>) -> Result<[f64; 3], ParameterError> {
    let items = value.as_vec().ok_or_else(|| ParameterError::ParseError(format!("{} must be a list", field)))?;
    if items.len() != 3 {
        return Err(ParameterError::InvalidLength { field: field.to_string(), expected: 3, found: items.len() });
    }
    Ok([convert(&items[0], field)?, convert(&items[1], field)?, convert(&items[2], field)?])
}

fn optional_number(value: &Yaml, field: &str) -> Result<Option<f64>, ParameterError> {
    if value.is_badvalue() {
        return Ok(None);
    }
    number(value, field).map(Some)
}

fn number(value: &Yaml, field: &str) -> Result<f64, ParameterError> {
    let parsed = match value {
        Yaml::Real(_) => value.as_f64(),
        Yaml::Integer(i) => Some(*i as f64),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
        .ok_or_else(|| ParameterError::ParseError(format!("{} must be a number, was {:?}", field, value)))
}

/// Radians, or degrees when written as deg(angle).
fn angle(value: &Yaml, field: &str) -> Result<f64, ParameterError> {
    match value {
        Yaml::String(text) => parse_degrees(text)
            .map_err(|msg| ParameterError::WrongAngle(format!("{}: {}", field, msg))),
        _ => number(value, field),
    }
}

fn parse_degrees(text: &str) -> Result<f64, String> {
    let inner = text.trim()
        .strip_prefix("deg(")
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| format!("'{}' is neither a number nor deg(angle)", text))?;
    let degrees: f64 = inner.trim().parse()
        .map_err(|_| format!("'{}' is not a valid angle in degrees", inner))?;
    Ok(degrees.to_radians())
}
