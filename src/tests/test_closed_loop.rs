#[cfg(test)]
mod tests {
    use nalgebra::{DVector, Translation3};

    use crate::kinematic_traits::KinematicModel;
    use crate::parameters_from_file::RobotDescription;
    use crate::pose::{angle_between, distance};
    use crate::serial_chain::SerialChain;
    use crate::serial_kinematic_control::{velocity_bounds, SerialKinematicControl};

    const CYCLES: usize = 300;

    fn seven_axis() -> RobotDescription {
        RobotDescription::from_yaml_file("src/tests/data/seven_axis.yaml")
            .expect("Failed to load robot description from file")
    }

    /// Integrates the command over one period, as the robot would.
    fn integrate(chain: &mut SerialChain, command: &DVector<f64>, dt: f64) {
        let next = chain.joint_positions() + command * dt;
        let next = DVector::from_fn(next.len(), |i, _| {
            let limits = chain.joints()[i].limits();
            next[i].clamp(limits.lower, limits.upper)
        });
        chain.update_state(&next, command).expect("Integrated state must be accepted");
    }

    #[test]
    fn test_redundant_arm_reaches_pose() {
        let description = seven_axis();
        let mut chain = description.chain;
        let start = DVector::from_vec(vec![0.0, 0.5, 0.0, -1.0, 0.0, 0.5, 0.0]);
        chain.update_state(&start, &DVector::zeros(7)).unwrap();

        let target = Translation3::new(0.05, 0.03, -0.04) * chain.endpoint_pose();
        let initial_error = distance(&target, chain.endpoint_pose());

        let mut control = SerialKinematicControl::new(chain, description.control, description.solver).unwrap();
        let dt = control.control_period();
        for cycle in 0..CYCLES {
            let bounds = velocity_bounds(&control.model().state(), dt);
            let command = control.move_to_pose(&target, None);
            assert!(bounds.contains(&command, 1e-12), "cycle {}: {} outside bounds", cycle, command);
            integrate(control.model_mut(), &command, dt);
        }

        let reached = control.model().endpoint_pose();
        let final_error = distance(&target, reached);
        assert!(final_error < 0.05 * initial_error,
                "position error {} of initial {}", final_error, initial_error);
        assert!(angle_between(&target, reached) < 0.01);
    }

    #[test]
    fn test_joint_target_reached_within_limits() {
        let description = seven_axis();
        let target = DVector::from_vec(vec![0.3, -0.4, 0.2, -0.8, 0.1, 0.6, -0.2]);
        let mut control = SerialKinematicControl::new(description.chain, description.control, description.solver).unwrap();
        let dt = control.control_period();

        for _ in 0..CYCLES {
            let command = control.move_to_position(&target);
            integrate(control.model_mut(), &command, dt);
        }
        let reached = control.model().joint_positions();
        assert!((reached - &target).norm() < 1e-2, "reached {}", reached);
    }
}
