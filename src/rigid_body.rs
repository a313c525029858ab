//! Mass properties of a link

use nalgebra::{Matrix3, Vector3};

use crate::control_error::ControlError;
use crate::kinematic_traits::Pose;

#[derive(Debug, Clone, PartialEq)]
pub struct RigidBody {
    name: String,
    mass: f64,
    /// Inertia about the center of mass, in the link frame
    inertia: Matrix3<f64>,
    /// Center of mass in the link frame
    center_of_mass: Vector3<f64>,
}

impl RigidBody {
    pub fn new(name: &str, mass: f64, inertia: Matrix3<f64>, center_of_mass: Vector3<f64>) -> Result<Self, ControlError> {
        if !(mass >= 0.0) || !mass.is_finite() {
            return Err(ControlError::InvalidParameter(format!("mass {} of '{}' must be non-negative", mass, name)));
        }
        if (inertia - inertia.transpose()).norm() > 1E-9 * (1.0 + inertia.norm()) {
            return Err(ControlError::InvalidParameter(format!("inertia of '{}' is not symmetric", name)));
        }
        if inertia.iter().any(|v| !v.is_finite()) || center_of_mass.iter().any(|v| !v.is_finite()) {
            return Err(ControlError::InvalidParameter(format!("mass properties of '{}' are not finite", name)));
        }
        Ok(RigidBody { name: name.to_string(), mass, inertia, center_of_mass })
    }

    /// Body with principal moments of inertia along the link frame axes.
    pub fn with_principal_inertia(name: &str, mass: f64, moments: Vector3<f64>, center_of_mass: Vector3<f64>) -> Result<Self, ControlError> {
        RigidBody::new(name, mass, Matrix3::from_diagonal(&moments), center_of_mass)
    }

    pub fn massless(name: &str) -> Self {
        RigidBody {
            name: name.to_string(),
            mass: 0.0,
            inertia: Matrix3::zeros(),
            center_of_mass: Vector3::zeros(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn inertia(&self) -> &Matrix3<f64> {
        &self.inertia
    }

    pub fn center_of_mass(&self) -> &Vector3<f64> {
        &self.center_of_mass
    }

    /// Rigidly attaches `other`, whose frame is at `pose` in the frame of this body.
    /// Mass adds up, the center of mass is the weighted average and both inertias are moved
    /// to the new center of mass with the parallel axis theorem.
    pub fn combine(&mut self, other: &RigidBody, pose: &Pose) {
        let total = self.mass + other.mass;
        if total <= 0.0 {
            return;
        }

        let rotation = pose.rotation.to_rotation_matrix();
        let other_com = pose * nalgebra::Point3::from(other.center_of_mass);
        let other_inertia = rotation.matrix() * other.inertia * rotation.matrix().transpose();

        let com = (self.center_of_mass * self.mass + other_com.coords * other.mass) / total;
        self.inertia = self.inertia + parallel_axis(self.mass, &(self.center_of_mass - com))
            + other_inertia + parallel_axis(other.mass, &(other_com.coords - com));
        self.center_of_mass = com;
        self.mass = total;
    }
}

/// Inertia of a point mass at offset `d`: m (|d|² E - d dᵗ)
pub fn parallel_axis(mass: f64, d: &Vector3<f64>) -> Matrix3<f64> {
    (Matrix3::identity() * d.norm_squared() - d * d.transpose()) * mass
}
