extern crate nalgebra as na;
use na::{DMatrix, DVector, Vector3};
use na::linalg::SVD;
use rayon::prelude::*;
use tracing::warn;

use crate::kinematic_traits::{Pose, TASK_DOF};

/// Function to compute the Jacobian matrix for a given robot and joint configuration
///
/// # Arguments
///
/// * `forward` - Forward kinematics of the robot
/// * `joints` - Joint positions, as many as the robot has joints
/// * `epsilon` - A small value used for numerical differentiation
///
/// # Returns
///
/// A 6 x n matrix, with the linear part of the twist in the first three rows
pub fn compute_jacobian<F>(forward: &F, joints: &DVector<f64>, epsilon: f64) -> DMatrix<f64>
where
    F: Fn(&DVector<f64>) -> Pose + Sync,
{
    let n = joints.len();
    let mut jacobian = DMatrix::zeros(TASK_DOF, n);
    let current_pose = forward(joints);
    let current_position = current_pose.translation.vector;
    let current_orientation = current_pose.rotation;

    let jacobian_columns: Vec<_> = (0..n).into_par_iter().map(|i| {
        let mut perturbed_qs = joints.clone();
        perturbed_qs[i] += epsilon;
        let perturbed_pose = forward(&perturbed_qs);

        let delta_position = (perturbed_pose.translation.vector - current_position) / epsilon;
        let delta_orientation = (perturbed_pose.rotation * current_orientation.inverse()).scaled_axis() / epsilon;

        (delta_position, delta_orientation)
    }).collect();

    for (i, (delta_position, delta_orientation)) in jacobian_columns.into_iter().enumerate() {
        jacobian.fixed_view_mut::<3, 1>(0, i).copy_from(&delta_position);
        jacobian.fixed_view_mut::<3, 1>(3, i).copy_from(&delta_orientation);
    }

    jacobian
}

/// Yoshikawa manipulability measure, sqrt(det(J Jᵗ)). Zero at singular configurations.
pub fn manipulability(jacobian: &DMatrix<f64>) -> f64 {
    (jacobian * jacobian.transpose()).determinant().max(0.0).sqrt()
}

/// Moore-Penrose pseudoinverse through SVD.
pub fn pseudo_inverse(matrix: &DMatrix<f64>, epsilon: f64) -> Result<DMatrix<f64>, &'static str> {
    let svd = SVD::new(matrix.clone(), true, true);
    svd.pseudo_inverse(epsilon).map_err(|err| {
        warn!("Pseudoinverse failed: {}", err);
        "Unable to compute the pseudoinverse of the Jacobian matrix"
    })
}

/// Derivative of the geometric Jacobian of an all-revolute chain with respect to the
/// position of one joint, expressed through the Jacobian itself.
///
/// Column j holds the linear part aⱼ × rⱼ and the axis aⱼ. Rotating joint i moves every
/// later axis and the end-effector, so
///  * for i ≤ j the column changes by [aᵢ × (aⱼ × rⱼ); aᵢ × aⱼ]
///  * for i > j only the end-effector moves: [aⱼ × (aᵢ × rᵢ); 0]
pub fn partial_derivative(jacobian: &DMatrix<f64>, joint: usize) -> DMatrix<f64> {
    let n = jacobian.ncols();
    let mut derivative = DMatrix::zeros(TASK_DOF, n);
    if joint >= n {
        warn!("partial_derivative(): joint {} requested but the Jacobian has {} columns", joint, n);
        return derivative;
    }

    let linear = |j: usize| -> Vector3<f64> { jacobian.fixed_view::<3, 1>(0, j).into_owned() };
    let axis = |j: usize| -> Vector3<f64> { jacobian.fixed_view::<3, 1>(3, j).into_owned() };

    let a_i = axis(joint);
    for j in 0..n {
        if joint <= j {
            derivative.fixed_view_mut::<3, 1>(0, j).copy_from(&a_i.cross(&linear(j)));
            derivative.fixed_view_mut::<3, 1>(3, j).copy_from(&a_i.cross(&axis(j)));
        } else {
            derivative.fixed_view_mut::<3, 1>(0, j).copy_from(&axis(j).cross(&linear(joint)));
        }
    }
    derivative
}
