use log::{info, warn};

use crate::drivetrain::{HolonomicDrivetrain, SwerveDrivetrain};
use crate::error::TrajectoryError;
use crate::guess::{InitialGuess, LinearInitialGuess};
use crate::nlp::{Backend, InteriorPointSolver, SolverOptions};
use crate::obstacle::Obstacle;
use crate::path::HolonomicPath;
use crate::problem::{self, TrajectoryOptimizationProblem};
use crate::trajectory::HolonomicTrajectory;

/// Turns a path into a time-optimal trajectory for a holonomic drivetrain
///
/// Inputs are checked when the generator is created. Every call to `generate` builds a
/// fresh problem, solves it once and either returns the whole trajectory or the reason the
/// solver gave up.
pub struct HolonomicTrajectoryGenerator<'a, D: HolonomicDrivetrain> {
    drivetrain: &'a D,
    path: HolonomicPath,
    obstacles: Vec<Obstacle>,
    options: SolverOptions,
    initial_guess: Box<dyn InitialGuess>,
}

/// The generator for swerve drivetrains
pub type SwerveTrajectoryGenerator<'a> = HolonomicTrajectoryGenerator<'a, SwerveDrivetrain>;

impl<'a, D: HolonomicDrivetrain> HolonomicTrajectoryGenerator<'a, D> {
    /// Creates a generator
    ///
    /// # Arguments
    ///
    /// `drivetrain` - the robot
    /// `path` - at least two valid waypoints
    /// `obstacles` - regions the bumpers must stay clear of
    ///
    /// # Examples
    /// ```
    /// use holotraj::{
    ///     HolonomicWaypoint, Obstacle, Path, SwerveDrivetrain, SwerveModule,
    ///     SwerveTrajectoryGenerator,
    /// };
    /// let modules = vec![
    ///     SwerveModule::new(0.3, 0.3, 0.05, 60., 1.5),
    ///     SwerveModule::new(-0.3, -0.3, 0.05, 60., 1.5),
    /// ];
    /// let bumpers = Obstacle::rectangle(0., 0.8, 0.8);
    /// let drivetrain = SwerveDrivetrain::new(45., 6., modules, bumpers).unwrap();
    ///
    /// // a single waypoint is not a trajectory
    /// let path = Path::new(vec![HolonomicWaypoint::stopped(0., 0., 0.)]);
    /// assert!(SwerveTrajectoryGenerator::new(&drivetrain, path, Vec::new()).is_err());
    /// ```
    pub fn new(
        drivetrain: &'a D,
        path: HolonomicPath,
        obstacles: Vec<Obstacle>,
    ) -> Result<HolonomicTrajectoryGenerator<'a, D>, TrajectoryError> {
        problem::validate(&path, &obstacles)?;
        Ok(HolonomicTrajectoryGenerator {
            drivetrain,
            path,
            obstacles,
            options: SolverOptions::default(),
            initial_guess: Box::new(LinearInitialGuess::default()),
        })
    }

    pub fn with_options(mut self, options: SolverOptions) -> HolonomicTrajectoryGenerator<'a, D> {
        self.options = options;
        self
    }

    pub fn with_initial_guess(
        mut self,
        initial_guess: Box<dyn InitialGuess>,
    ) -> HolonomicTrajectoryGenerator<'a, D> {
        self.initial_guess = initial_guess;
        self
    }

    pub fn path(&self) -> &HolonomicPath {
        &self.path
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    /// Generates the trajectory with the built-in interior point solver
    pub fn generate(&self) -> Result<HolonomicTrajectory, TrajectoryError> {
        self.generate_with(InteriorPointSolver::new(self.options.clone()))
    }

    /// Generates the trajectory on the given backend
    pub fn generate_with<B: Backend>(
        &self,
        backend: B,
    ) -> Result<HolonomicTrajectory, TrajectoryError> {
        info!("Generating trajectory using {} waypoints", self.path.len());
        let problem = TrajectoryOptimizationProblem::new(
            self.drivetrain,
            &self.path,
            &self.obstacles,
            backend,
            self.initial_guess.as_ref(),
        )?;
        match problem.solve() {
            Ok(trajectory) => {
                info!(
                    "Generated trajectory with {} samples lasting {:.3} s",
                    trajectory.len(),
                    trajectory.total_time()
                );
                Ok(trajectory)
            }
            Err(error) => {
                warn!("Trajectory generation failed: {}", error);
                Err(error)
            }
        }
    }
}
