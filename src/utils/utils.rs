//! Helper functions

use nalgebra::{DVector, Isometry3, UnitQuaternion};

/// Checks if all elements are finite
pub fn is_valid(values: &DVector<f64>) -> bool {
    values.iter().all(|v| v.is_finite())
}

/// Allows to specify joint values in degrees (converts to radians)
pub fn as_radians(degrees: &[f64]) -> DVector<f64> {
    DVector::from_iterator(degrees.len(), degrees.iter().map(|d| d.to_radians()))
}

/// Format joint values, converting radians to degrees.
pub fn format_joints(joints: &DVector<f64>) -> String {
    let mut row_str = String::new();
    for value in joints.iter() {
        row_str.push_str(&format!("{:7.2} ", value.to_degrees()));
    }
    format!("[{}]", row_str.trim_end())
}

pub fn dump_pose(isometry: &Isometry3<f64>) {
    let translation = isometry.translation.vector;
    let rotation: UnitQuaternion<f64> = isometry.rotation;

    println!(
        "x: {:.5}, y: {:.5}, z: {:.5},  quat: {:.5},{:.5},{:.5},{:.5}",
        translation.x, translation.y, translation.z, rotation.i, rotation.j, rotation.k, rotation.w
    );
}
