//! Errors of the controller and the kinematic model

use std::fmt;

use crate::qp_solver::SolverError;

/// Precondition failures: wrong dimensions, invalid limits or parameters. Inside the control
/// loop these are logged and resolved to a safe command; they only reach the caller from
/// constructors and setters.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlError {
    DimensionMismatch { operation: &'static str, details: String },
    InvalidGain(f64),
    InvalidLimit { joint: String, message: String },
    InvalidParameter(String),
    OutOfRange { joint: String, position: f64, lower: f64, upper: f64 },
    Solver(SolverError),
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ControlError::DimensionMismatch { operation, details } =>
                write!(f, "{}(): {}", operation, details),
            ControlError::InvalidGain(gain) =>
                write!(f, "Proportional gain was {} but it must be non-zero and finite", gain),
            ControlError::InvalidLimit { joint, message } =>
                write!(f, "Invalid limit for the '{}' joint: {}", joint, message),
            ControlError::InvalidParameter(msg) =>
                write!(f, "Invalid parameter: {}", msg),
            ControlError::OutOfRange { joint, position, lower, upper } =>
                write!(f, "Position {} of the '{}' joint is outside its limits [{}, {}]",
                       position, joint, lower, upper),
            ControlError::Solver(err) =>
                write!(f, "Solver error: {}", err),
        }
    }
}

impl std::error::Error for ControlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ControlError::Solver(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SolverError> for ControlError {
    fn from(err: SolverError) -> Self {
        ControlError::Solver(err)
    }
}
