use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use nalgebra::DVector;
use tracing::info;

use rs_kinematic_control::cubic_spline::CubicSpline;
use rs_kinematic_control::kinematic_traits::KinematicModel;
use rs_kinematic_control::parameters_from_file::RobotDescription;
use rs_kinematic_control::pose;
use rs_kinematic_control::serial_chain::SerialChain;
use rs_kinematic_control::serial_kinematic_control::SerialKinematicControl;
use rs_kinematic_control::utils::{as_radians, dump_pose, format_joints, is_valid};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Proportional control towards the target joint positions
    Position,
    /// Cubic spline from the start to the target, tracked with feed-forward
    Trajectory,
    /// Proportional control of the end-effector towards the pose of the target joint positions
    Pose,
}

/// Runs the controller against the kinematic model in a simulated loop, integrating the
/// commanded joint velocities over every control period.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// YAML robot description
    #[arg(short, long)]
    config: PathBuf,

    /// Number of control cycles to simulate
    #[arg(short = 'n', long, default_value_t = 300)]
    cycles: usize,

    /// Target joint positions in degrees, comma separated
    #[arg(short, long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
    target: Vec<f64>,

    #[arg(short, long, value_enum, default_value_t = Mode::Position)]
    mode: Mode,

    /// Duration of the trajectory in seconds
    #[arg(short, long, default_value_t = 2.0)]
    duration: f64,

    /// Print joints every this many cycles
    #[arg(long, default_value_t = 10)]
    every: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let description = RobotDescription::from_yaml_file(&args.config)
        .with_context(|| format!("Failed to load robot description from {}", args.config.display()))?;
    let n = description.chain.dof();
    if args.target.len() != n {
        bail!("The robot has {} joints but {} target values were given", n, args.target.len());
    }
    let target = as_radians(&args.target);
    if !is_valid(&target) {
        bail!("Target joint positions must be finite");
    }
    let start = description.chain.joint_positions().clone();
    let target_pose = description.chain.forward(&target);

    let mut control = SerialKinematicControl::new(description.chain, description.control, description.solver)
        .context("Failed to create the controller")?;
    let dt = control.control_period();
    info!("{} joints, control period {} s, mode {:?}", n, dt, args.mode);

    let spline = CubicSpline::new(vec![start, target.clone()], vec![0.0, args.duration])
        .context("Failed to plan the trajectory")?;

    for cycle in 0..args.cycles {
        let command = match args.mode {
            Mode::Position => control.move_to_position(&target),
            Mode::Pose => control.move_to_pose(&target_pose, None),
            Mode::Trajectory => {
                let sample = spline.state(cycle as f64 * dt);
                control.track_joint_trajectory(&sample.position, &sample.velocity, Some(&sample.acceleration))
            }
        };

        let positions = control.model().joint_positions() + &command * dt;
        step(control.model_mut(), &positions, &command)
            .with_context(|| format!("Cycle {}", cycle))?;

        if args.every > 0 && cycle % args.every == 0 {
            println!("{:5} {}", cycle, format_joints(control.model().joint_positions()));
        }
    }

    let state = control.model().state();
    println!("Final joints: {}", format_joints(&state.joint_positions));
    print!("Final pose:   ");
    dump_pose(&state.endpoint_pose);
    println!("Distance to target pose {:.6} m, {:.6} rad",
             pose::distance(&state.endpoint_pose, &target_pose),
             pose::angle_between(&state.endpoint_pose, &target_pose));
    Ok(())
}

/// Moves the simulated robot. Integration may overshoot a limit by rounding, such positions
/// are kept at the limit.
fn step(chain: &mut SerialChain, positions: &DVector<f64>, velocities: &DVector<f64>) -> Result<()> {
    let limited = DVector::from_fn(positions.len(), |i, _| {
        let limits = chain.joints()[i].limits();
        positions[i].clamp(limits.lower, limits.upper)
    });
    chain.update_state(&limited, velocities)?;
    Ok(())
}
