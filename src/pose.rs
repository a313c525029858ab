//! Pose error between two end-effector poses, and construction of poses from the
//! xyz / roll-pitch-yaw form used in robot descriptions.

use nalgebra::{Translation3, UnitQuaternion};

use crate::kinematic_traits::{Pose, Twist};

/// Six-vector pointing from `actual` towards `desired`: the position difference followed by
/// the vector part of the rotation `desired * actual⁻¹`. When the two quaternions lie in
/// opposite hemispheres the orientation part is flipped so that it always points along the
/// shorter rotation.
pub fn pose_error(desired: &Pose, actual: &Pose) -> Twist {
    let position = desired.translation.vector - actual.translation.vector;

    let difference = desired.rotation * actual.rotation.inverse();
    let mut orientation = difference.imag();
    if desired.rotation.coords.dot(&actual.rotation.coords) < 0.0 {
        orientation = -orientation;
    }

    Twist::new(position.x, position.y, position.z, orientation.x, orientation.y, orientation.z)
}

/// Pose from a translation and fixed-axis roll, pitch and yaw angles in radians.
pub fn from_xyz_rpy(xyz: [f64; 3], rpy: [f64; 3]) -> Pose {
    Pose::from_parts(
        Translation3::new(xyz[0], xyz[1], xyz[2]),
        UnitQuaternion::from_euler_angles(rpy[0], rpy[1], rpy[2]),
    )
}

/// Pose that only translates.
pub fn translation(x: f64, y: f64, z: f64) -> Pose {
    Pose::from_parts(Translation3::new(x, y, z), UnitQuaternion::identity())
}

/// Rotation angle of the pose error, in radians.
pub fn angle_between(a: &Pose, b: &Pose) -> f64 {
    a.rotation.angle_to(&b.rotation)
}

/// Distance between the positions of two poses.
pub fn distance(a: &Pose, b: &Pose) -> f64 {
    (a.translation.vector - b.translation.vector).norm()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Quaternion;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn test_identical_poses() {
        let pose = from_xyz_rpy([0.1, -0.2, 0.3], [0.4, 0.5, -0.6]);
        assert!(pose_error(&pose, &pose).norm() < EPSILON);
    }

    #[test]
    fn test_translation_only() {
        let error = pose_error(&translation(0.1, 0.0, 0.0), &Pose::identity());
        assert!((error[0] - 0.1).abs() < EPSILON);
        assert!(error.rows(1, 5).norm() < EPSILON);
    }

    #[test]
    fn test_rotation_about_z() {
        let angle = 0.2_f64;
        let desired = from_xyz_rpy([0.0; 3], [0.0, 0.0, angle]);
        let error = pose_error(&desired, &Pose::identity());
        assert!(error.rows(0, 5).norm() < EPSILON);
        assert!((error[5] - (angle / 2.0).sin()).abs() < EPSILON);
    }

    #[test]
    fn test_hemisphere_flip() {
        let angle = 0.2_f64;
        let desired = from_xyz_rpy([0.0; 3], [0.0, 0.0, angle]);
        let flipped = UnitQuaternion::new_unchecked(-desired.rotation.into_inner());
        let flipped_pose = Pose::from_parts(desired.translation, flipped);
        let error = pose_error(&flipped_pose, &Pose::identity());
        assert!((error[5] - (angle / 2.0).sin()).abs() < EPSILON,
                "Error points the long way round: {}", error[5]);

        let negative_actual = Pose::from_parts(
            Translation3::identity(),
            UnitQuaternion::new_unchecked(-Quaternion::identity()),
        );
        let error = pose_error(&desired, &negative_actual);
        assert!((error[5] - (angle / 2.0).sin()).abs() < EPSILON);
    }

    #[test]
    fn test_angle_and_distance() {
        let a = from_xyz_rpy([0.0, 0.0, 0.0], [0.0, 0.0, 0.0]);
        let b = from_xyz_rpy([0.0, 3.0, 4.0], [0.3, 0.0, 0.0]);
        assert!((distance(&a, &b) - 5.0).abs() < EPSILON);
        assert!((angle_between(&a, &b) - 0.3).abs() < 1e-9);
    }
}
