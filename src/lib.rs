/*!
# holotraj

**holotraj** is a time-optimal trajectory generation library for holonomic (swerve) drivetrains
written for Rust - given a list of waypoints, the robot's physical limits and the obstacles to
avoid, the library finds the fastest trajectory through the waypoints that the drivetrain can
actually follow.

## Features
* waypoints that pin any mix of position, heading, velocity and angular velocity
* swerve drivetrain dynamics: wheel speed limits, motor torque limits and rigid body
  Newton-Euler equations
* collision avoidance between the robot's bumpers and polygonal obstacles
* a pluggable initial guess and a pluggable nonlinear programming backend, with a built-in
  interior point solver

## Using **holotraj**
Simply add the following to your `Cargo.toml` file:

```ignore
[dependencies]
holotraj = "*"
```

and now you can generate trajectories:

```no_run
use holotraj::{HolonomicWaypoint, Obstacle, ObstaclePoint, Path, SwerveDrivetrain, SwerveModule,
               SwerveTrajectoryGenerator};

fn main() {
    // a 45 kg robot with a module in each corner
    let modules = vec![SwerveModule::new(0.3, 0.3, 0.05, 60., 1.5),
                       SwerveModule::new(-0.3, 0.3, 0.05, 60., 1.5),
                       SwerveModule::new(-0.3, -0.3, 0.05, 60., 1.5),
                       SwerveModule::new(0.3, -0.3, 0.05, 60., 1.5)];
    let bumpers = Obstacle::rectangle(0.05, 0.8, 0.8);
    let drivetrain = SwerveDrivetrain::new(45., 6., modules, bumpers).unwrap();

    // start and finish at rest, turning around on the way
    let path = Path::new(vec![HolonomicWaypoint::stopped(0., 0., 0.),
                              HolonomicWaypoint::at_pose(3., 1., 1.57),
                              HolonomicWaypoint::stopped(5., 0., 3.14)]);
    let obstacles = vec![Obstacle::new(0.2, vec![ObstaclePoint::new(2., -0.5)])];

    let generator = SwerveTrajectoryGenerator::new(&drivetrain, path, obstacles).unwrap();
    let trajectory = generator.generate().unwrap();
    print!("The trajectory takes {} s", trajectory.total_time());

    // use the individual samples, perhaps to control a robot
    for sample in trajectory.iter() {
        print!("{}", sample);
    }
}
```

## Formulation
The path is split into control intervals. Every sample carries the robot's pose and velocity,
every interval a constant acceleration, its module forces and its duration, and the solver
minimizes the sum of the durations subject to exact constant-acceleration kinematics, the
waypoint constraints, obstacle clearance and the drivetrain's dynamics.

 */

mod drivetrain;
mod error;
mod generator;
mod guess;
pub mod nlp;
mod obstacle;
mod path;
mod problem;
mod set;
mod trajectory;

pub use drivetrain::{
    HolonomicDrivetrain, ModuleForce, SwerveDrivetrain, SwerveModule, SwerveVariables,
};
pub use error::TrajectoryError;
pub use generator::{HolonomicTrajectoryGenerator, SwerveTrajectoryGenerator};
pub use guess::{InitialGuess, LinearInitialGuess, StateGuess};
pub use nlp::{
    Backend, Constraint, Expr, InteriorPointSolver, RecordingBackend, Solution, SolveFailure,
    SolverOptions,
};
pub use obstacle::{Obstacle, ObstaclePoint};
pub use path::{
    HolonomicPath, HolonomicWaypoint, InitialGuessPoint, Path, PoseWaypoint, Waypoint,
    DEFAULT_CONTROL_INTERVAL_COUNT,
};
pub use problem::{
    apply_interval_set, apply_set_2d, HolonomicVariables, SeparatingLine,
    SwerveTrajectoryOptimizationProblem, TrajectoryOptimizationProblem, VariableMatrix,
    MIN_INTERVAL_DURATION,
};
pub use set::{EllipticalSet2d, IntervalSet1d, LinearSet2d, RectangularSet2d, Set2d};
pub use trajectory::{HolonomicTrajectory, HolonomicTrajectorySample};
