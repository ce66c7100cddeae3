//! Drivetrain models and the dynamics constraints they contribute to a problem.

use crate::error::TrajectoryError;
use crate::nlp::{Backend, Expr, Solution};
use crate::obstacle::Obstacle;
use crate::problem::HolonomicVariables;

/// The force a module applies to the chassis during one control interval, in newtons and in
/// the field frame
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ModuleForce {
    pub x: f64,
    pub y: f64,
}

impl ModuleForce {
    pub fn magnitude(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// What a trajectory problem needs to know about a drivetrain that can translate in any
/// direction while rotating
///
/// The problem allocates the chassis state and calls `apply_dynamics_constraints` once;
/// the drivetrain adds its own variables and constraints on top and hands the variables
/// back so forces can be read out of the solution.
pub trait HolonomicDrivetrain {
    /// the drivetrain's own decision variables
    type Variables;

    /// mass of the robot, in kilograms
    fn mass(&self) -> f64;

    /// moment of inertia about the center of rotation, in kg m^2
    fn moment_of_inertia(&self) -> f64;

    /// outline of the robot relative to its center of rotation
    fn bumpers(&self) -> &Obstacle;

    /// the fastest the chassis can translate, in m/s
    fn max_speed(&self) -> f64;

    /// the fastest the chassis can spin in place, in rad/s
    fn max_angular_speed(&self) -> f64;

    fn apply_dynamics_constraints<B: Backend>(
        &self,
        backend: &mut B,
        variables: &HolonomicVariables,
    ) -> Self::Variables;

    /// per-module forces during the control interval `interval`
    fn module_forces(
        &self,
        variables: &Self::Variables,
        solution: &Solution,
        interval: usize,
    ) -> Vec<ModuleForce>;
}

/// A wheel that is steered and driven independently of the others
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SwerveModule {
    /// offset from the center of rotation along the robot's forward axis, in meters
    pub x: f64,
    /// offset from the center of rotation along the robot's left axis, in meters
    pub y: f64,
    pub wheel_radius: f64,
    /// in rad/s
    pub wheel_max_angular_velocity: f64,
    /// in N m
    pub wheel_max_torque: f64,
}

impl SwerveModule {
    /// Creates a module
    ///
    /// # Examples
    /// ```
    /// use holotraj::SwerveModule;
    /// let module = SwerveModule::new(0.3, 0.3, 0.05, 60., 1.5);
    /// assert!((module.max_wheel_speed() - 3.).abs() < 1e-12);
    /// assert!((module.max_wheel_force() - 30.).abs() < 1e-12);
    /// ```
    pub fn new(
        x: f64,
        y: f64,
        wheel_radius: f64,
        wheel_max_angular_velocity: f64,
        wheel_max_torque: f64,
    ) -> SwerveModule {
        SwerveModule { x, y, wheel_radius, wheel_max_angular_velocity, wheel_max_torque }
    }

    /// the fastest the wheel's contact patch can move, in m/s
    pub fn max_wheel_speed(&self) -> f64 {
        self.wheel_radius * self.wheel_max_angular_velocity
    }

    /// the largest force the wheel can push with, in newtons
    pub fn max_wheel_force(&self) -> f64 {
        self.wheel_max_torque / self.wheel_radius
    }

    /// distance from the center of rotation
    pub fn radius(&self) -> f64 {
        self.x.hypot(self.y)
    }

    fn validate(&self, index: usize) -> Result<(), TrajectoryError> {
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(TrajectoryError::configuration(format!(
                "module {} has a non-finite offset",
                index
            )));
        }
        let limits = [
            ("wheel radius", self.wheel_radius),
            ("wheel max angular velocity", self.wheel_max_angular_velocity),
            ("wheel max torque", self.wheel_max_torque),
        ];
        for (name, value) in limits.iter() {
            if !value.is_finite() || *value <= 0. {
                return Err(TrajectoryError::configuration(format!(
                    "module {} {} must be positive and finite, got {}",
                    index, name, value
                )));
            }
        }
        Ok(())
    }
}

/// A holonomic drivetrain made of swerve modules
#[derive(Debug, Clone, PartialEq)]
pub struct SwerveDrivetrain {
    mass: f64,
    moment_of_inertia: f64,
    modules: Vec<SwerveModule>,
    bumpers: Obstacle,
}

impl SwerveDrivetrain {
    /// Creates a swerve drivetrain, rejecting physically meaningless parameters
    ///
    /// # Arguments
    ///
    /// `mass` - in kilograms
    /// `moment_of_inertia` - in kg m^2
    /// `modules` - at least one module; their order fixes the order of forces in every
    /// trajectory sample
    /// `bumpers` - outline of the robot relative to its center of rotation
    ///
    /// # Examples
    /// ```
    /// use holotraj::{Obstacle, SwerveDrivetrain, SwerveModule};
    /// let modules = vec![
    ///     SwerveModule::new(0.3, 0.3, 0.05, 60., 1.5),
    ///     SwerveModule::new(-0.3, 0.3, 0.05, 60., 1.5),
    ///     SwerveModule::new(-0.3, -0.3, 0.05, 60., 1.5),
    ///     SwerveModule::new(0.3, -0.3, 0.05, 60., 1.5),
    /// ];
    /// let bumpers = Obstacle::rectangle(0., 0.8, 0.8);
    /// let drivetrain = SwerveDrivetrain::new(45., 6., modules, bumpers.clone()).unwrap();
    /// assert_eq!(4, drivetrain.modules().len());
    ///
    /// assert!(SwerveDrivetrain::new(45., 6., Vec::new(), bumpers).is_err());
    /// ```
    pub fn new(
        mass: f64,
        moment_of_inertia: f64,
        modules: Vec<SwerveModule>,
        bumpers: Obstacle,
    ) -> Result<SwerveDrivetrain, TrajectoryError> {
        if !mass.is_finite() || mass <= 0. {
            return Err(TrajectoryError::configuration(format!(
                "mass must be positive and finite, got {}",
                mass
            )));
        }
        if !moment_of_inertia.is_finite() || moment_of_inertia <= 0. {
            return Err(TrajectoryError::configuration(format!(
                "moment of inertia must be positive and finite, got {}",
                moment_of_inertia
            )));
        }
        if modules.is_empty() {
            return Err(TrajectoryError::configuration(
                "a swerve drivetrain needs at least one module",
            ));
        }
        for (index, module) in modules.iter().enumerate() {
            module.validate(index)?;
        }
        if !bumpers.is_valid() {
            return Err(TrajectoryError::configuration(format!("invalid bumpers: {}", bumpers)));
        }
        Ok(SwerveDrivetrain { mass, moment_of_inertia, modules, bumpers })
    }

    pub fn modules(&self) -> &[SwerveModule] {
        &self.modules
    }
}

/// Force variables of a swerve drivetrain, indexed `[interval][module]`
#[derive(Debug, Clone)]
pub struct SwerveVariables {
    pub force_x: Vec<Vec<Expr>>,
    pub force_y: Vec<Vec<Expr>>,
}

/// module offset rotated into the field frame by `heading`
fn rotated_offset(module: &SwerveModule, cos_heading: &Expr, sin_heading: &Expr) -> (Expr, Expr) {
    let x = module.x * cos_heading - module.y * sin_heading;
    let y = module.x * sin_heading + module.y * cos_heading;
    (x, y)
}

/// velocity of a module's contact patch: chassis velocity plus omega cross offset
fn module_velocity(vx: &Expr, vy: &Expr, omega: &Expr, offset: &(Expr, Expr)) -> (Expr, Expr) {
    (vx - omega * &offset.1, vy + omega * &offset.0)
}

impl HolonomicDrivetrain for SwerveDrivetrain {
    type Variables = SwerveVariables;

    fn mass(&self) -> f64 {
        self.mass
    }

    fn moment_of_inertia(&self) -> f64 {
        self.moment_of_inertia
    }

    fn bumpers(&self) -> &Obstacle {
        &self.bumpers
    }

    fn max_speed(&self) -> f64 {
        self.modules.iter().map(SwerveModule::max_wheel_speed).fold(f64::INFINITY, f64::min)
    }

    fn max_angular_speed(&self) -> f64 {
        let limit = self
            .modules
            .iter()
            .filter(|module| module.radius() > 0.)
            .map(|module| module.max_wheel_speed() / module.radius())
            .fold(f64::INFINITY, f64::min);
        // modules sitting on the center of rotation do not limit spinning
        if limit.is_finite() {
            limit
        } else {
            self.max_speed()
        }
    }

    fn apply_dynamics_constraints<B: Backend>(
        &self,
        backend: &mut B,
        variables: &HolonomicVariables,
    ) -> SwerveVariables {
        let interval_count = variables.interval_count();
        let mass = backend.parameter(self.mass);
        let moment_of_inertia = backend.parameter(self.moment_of_inertia);
        let mut force_x = Vec::with_capacity(interval_count);
        let mut force_y = Vec::with_capacity(interval_count);

        // every sample keeps each wheel under its top speed
        for sample in 0..variables.sample_count() {
            let cos_heading = variables.heading(sample).cos();
            let sin_heading = variables.heading(sample).sin();
            for module in self.modules.iter() {
                let offset = rotated_offset(module, &cos_heading, &sin_heading);
                let (mvx, mvy) = module_velocity(
                    variables.vx(sample),
                    variables.vy(sample),
                    variables.omega(sample),
                    &offset,
                );
                let max_speed = module.max_wheel_speed();
                backend.subject_to(Expr::norm_squared(&mvx, &mvy).at_most(max_speed * max_speed));
            }
        }

        for interval in 0..interval_count {
            let cos_heading = variables.heading(interval).cos();
            let sin_heading = variables.heading(interval).sin();

            let mut interval_fx = Vec::with_capacity(self.modules.len());
            let mut interval_fy = Vec::with_capacity(self.modules.len());
            let mut net_fx = Expr::constant(0.);
            let mut net_fy = Expr::constant(0.);
            let mut net_torque = Expr::constant(0.);

            for module in self.modules.iter() {
                let fx = backend.decision_variable();
                let fy = backend.decision_variable();
                let offset = rotated_offset(module, &cos_heading, &sin_heading);

                net_fx = net_fx + &fx;
                net_fy = net_fy + &fy;
                net_torque = net_torque + Expr::cross(&offset.0, &offset.1, &fx, &fy);

                // a motor cannot push hard while spinning near its top speed
                let (mvx, mvy) = module_velocity(
                    variables.vx(interval),
                    variables.vy(interval),
                    variables.omega(interval),
                    &offset,
                );
                let max_speed = module.max_wheel_speed();
                let max_force = module.max_wheel_force();
                let envelope = Expr::norm_squared(&mvx, &mvy) / (max_speed * max_speed)
                    + Expr::norm_squared(&fx, &fy) / (max_force * max_force);
                backend.subject_to(envelope.at_most(1.));

                interval_fx.push(fx);
                interval_fy.push(fy);
            }

            backend.subject_to(net_fx.equal_to(&mass * variables.ax(interval)));
            backend.subject_to(net_fy.equal_to(&mass * variables.ay(interval)));
            backend.subject_to(net_torque.equal_to(&moment_of_inertia * variables.alpha(interval)));

            force_x.push(interval_fx);
            force_y.push(interval_fy);
        }

        SwerveVariables { force_x, force_y }
    }

    fn module_forces(
        &self,
        variables: &SwerveVariables,
        solution: &Solution,
        interval: usize,
    ) -> Vec<ModuleForce> {
        variables.force_x[interval]
            .iter()
            .zip(variables.force_y[interval].iter())
            .map(|(fx, fy)| ModuleForce { x: solution.value(fx), y: solution.value(fy) })
            .collect()
    }
}
