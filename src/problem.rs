//! Formulation of the time-optimal trajectory problem for holonomic drivetrains.
//!
//! The path is discretized into control intervals. Every sample point carries the chassis
//! pose and velocity, every interval carries a constant acceleration and its own duration.
//! The problem links consecutive samples with exact constant-acceleration kinematics, pins
//! the waypoint states, keeps the bumpers away from obstacles, lets the drivetrain add its
//! dynamics and finally minimizes the sum of all durations.

use log::info;

use crate::drivetrain::{HolonomicDrivetrain, ModuleForce, SwerveDrivetrain};
use crate::error::TrajectoryError;
use crate::guess::{InitialGuess, StateGuess};
use crate::nlp::{Backend, Expr, Solution};
use crate::obstacle::Obstacle;
use crate::path::{HolonomicPath, HolonomicWaypoint, Waypoint};
use crate::set::{IntervalSet1d, RectangularSet2d, Set2d};
use crate::trajectory::{HolonomicTrajectory, HolonomicTrajectorySample};

/// The shortest a control interval may last, in seconds
pub const MIN_INTERVAL_DURATION: f64 = 1e-4;

/// A fixed-shape matrix of decision variables
#[derive(Debug, Clone)]
pub struct VariableMatrix {
    rows: usize,
    cols: usize,
    entries: Vec<Expr>,
}

impl VariableMatrix {
    /// Declares `rows * cols` new decision variables, row by row
    pub fn new<B: Backend>(backend: &mut B, rows: usize, cols: usize) -> VariableMatrix {
        let entries = (0..rows * cols).map(|_| backend.decision_variable()).collect();
        VariableMatrix { rows, cols, entries }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> &Expr {
        &self.entries[row * self.cols + col]
    }

    pub fn row(&self, row: usize) -> &[Expr] {
        &self.entries[row * self.cols..(row + 1) * self.cols]
    }
}

const X: usize = 0;
const Y: usize = 1;
const HEADING: usize = 2;

/// The chassis state of a holonomic problem
///
/// Position and velocity have one column per sample, acceleration and duration one per
/// control interval. Rows are x, y and heading (or their derivatives).
#[derive(Debug, Clone)]
pub struct HolonomicVariables {
    position: VariableMatrix,
    velocity: VariableMatrix,
    acceleration: VariableMatrix,
    dt: Vec<Expr>,
}

impl HolonomicVariables {
    /// Declares the state for `interval_count` control intervals
    pub fn new<B: Backend>(backend: &mut B, interval_count: usize) -> HolonomicVariables {
        let duration = IntervalSet1d::greater_than(MIN_INTERVAL_DURATION);
        HolonomicVariables {
            position: VariableMatrix::new(backend, 3, interval_count + 1),
            velocity: VariableMatrix::new(backend, 3, interval_count + 1),
            acceleration: VariableMatrix::new(backend, 3, interval_count),
            dt: (0..interval_count).map(|_| backend.bounded_variable(&duration)).collect(),
        }
    }

    pub fn sample_count(&self) -> usize {
        self.position.cols()
    }

    pub fn interval_count(&self) -> usize {
        self.dt.len()
    }

    pub fn x(&self, sample: usize) -> &Expr {
        self.position.get(X, sample)
    }

    pub fn y(&self, sample: usize) -> &Expr {
        self.position.get(Y, sample)
    }

    pub fn heading(&self, sample: usize) -> &Expr {
        self.position.get(HEADING, sample)
    }

    pub fn vx(&self, sample: usize) -> &Expr {
        self.velocity.get(X, sample)
    }

    pub fn vy(&self, sample: usize) -> &Expr {
        self.velocity.get(Y, sample)
    }

    pub fn omega(&self, sample: usize) -> &Expr {
        self.velocity.get(HEADING, sample)
    }

    pub fn ax(&self, interval: usize) -> &Expr {
        self.acceleration.get(X, interval)
    }

    pub fn ay(&self, interval: usize) -> &Expr {
        self.acceleration.get(Y, interval)
    }

    pub fn alpha(&self, interval: usize) -> &Expr {
        self.acceleration.get(HEADING, interval)
    }

    pub fn dt(&self, interval: usize) -> &Expr {
        &self.dt[interval]
    }

    pub fn position(&self) -> &VariableMatrix {
        &self.position
    }

    pub fn velocity(&self) -> &VariableMatrix {
        &self.velocity
    }

    pub fn acceleration(&self) -> &VariableMatrix {
        &self.acceleration
    }
}

/// Returns the number of control intervals between each waypoint and the next
pub(crate) fn interval_counts(path: &HolonomicPath) -> Vec<usize> {
    let len = path.len();
    path.iter()
        .take(len.saturating_sub(1))
        .map(|waypoint| waypoint.pose.control_interval_count)
        .collect()
}

/// Checks everything that can be checked before a problem is built
pub(crate) fn validate(
    path: &HolonomicPath,
    obstacles: &[Obstacle],
) -> Result<(), TrajectoryError> {
    if path.len() < 2 {
        return Err(TrajectoryError::configuration(format!(
            "a trajectory needs at least 2 waypoints, got {}",
            path.len()
        )));
    }
    for (index, waypoint) in path.iter().enumerate() {
        if !waypoint.is_valid() {
            return Err(TrajectoryError::configuration(format!("waypoint {} is invalid", index)));
        }
    }
    for (index, waypoint) in path.iter().take(path.len() - 1).enumerate() {
        let pose = waypoint.pose();
        let required = pose.initial_guess_points.len() + 1;
        if pose.control_interval_count < required {
            return Err(TrajectoryError::configuration(format!(
                "waypoint {} needs at least {} control intervals, got {}",
                index, required, pose.control_interval_count
            )));
        }
    }
    for (index, obstacle) in obstacles.iter().enumerate() {
        if !obstacle.is_valid() {
            return Err(TrajectoryError::configuration(format!(
                "obstacle {} is invalid: {}",
                index, obstacle
            )));
        }
    }
    Ok(())
}

/// Constrains `expr` to lie in `set`
pub fn apply_interval_set<B: Backend>(backend: &mut B, expr: &Expr, set: &IntervalSet1d) {
    if set.is_exact() {
        backend.subject_to(expr.equal_to(set.lower));
        return;
    }
    if set.is_lower_bounded() {
        backend.subject_to(expr.at_least(set.lower));
    }
    if set.is_upper_bounded() {
        backend.subject_to(expr.at_most(set.upper));
    }
}

fn apply_rectangular_set<B: Backend>(
    backend: &mut B,
    x: &Expr,
    y: &Expr,
    set: &RectangularSet2d,
) {
    apply_interval_set(backend, x, &set.x_bound);
    apply_interval_set(backend, y, &set.y_bound);
}

/// Constrains the planar vector `(x, y)` to lie in `set`
pub fn apply_set_2d<B: Backend>(backend: &mut B, x: &Expr, y: &Expr, set: &Set2d) {
    match set {
        Set2d::Rectangular(rectangle) => apply_rectangular_set(backend, x, y, rectangle),
        Set2d::Linear { direction, r_bound } => {
            let (sin_theta, cos_theta) = direction.theta.sin_cos();
            backend.subject_to((x * sin_theta - y * cos_theta).equal_to(0.));
            apply_rectangular_set(backend, x, y, &direction.r_bound_box(r_bound));
        }
        Set2d::Elliptical(ellipse) => {
            let scaled = x.square() / (ellipse.x_radius * ellipse.x_radius)
                + y.square() / (ellipse.y_radius * ellipse.y_radius);
            backend.subject_to(scaled.at_most(1.));
        }
    }
}

/// A line separating the bumpers at one sample from one obstacle
///
/// Points `p` with `cos(angle) * p.x + sin(angle) * p.y <= offset` are on the bumpers' side.
#[derive(Debug, Clone)]
pub struct SeparatingLine {
    pub angle: Expr,
    pub offset: Expr,
}

/// The trajectory problem for any holonomic drivetrain
///
/// A problem is built once and solved once: `solve` consumes it.
pub struct TrajectoryOptimizationProblem<'a, D: HolonomicDrivetrain, B: Backend> {
    drivetrain: &'a D,
    backend: B,
    variables: HolonomicVariables,
    separating_lines: Vec<Vec<SeparatingLine>>,
    drivetrain_variables: D::Variables,
}

/// The trajectory problem for a swerve drivetrain
pub type SwerveTrajectoryOptimizationProblem<'a, B> =
    TrajectoryOptimizationProblem<'a, SwerveDrivetrain, B>;

impl<'a, D: HolonomicDrivetrain, B: Backend> TrajectoryOptimizationProblem<'a, D, B> {
    /// Formulates the problem on `backend`
    ///
    /// # Arguments
    ///
    /// `drivetrain` - the robot
    /// `path` - at least two waypoints
    /// `obstacles` - regions the bumpers must stay clear of
    /// `backend` - where variables and constraints are declared
    /// `guess` - seeds the backend's starting point
    pub fn new(
        drivetrain: &'a D,
        path: &HolonomicPath,
        obstacles: &[Obstacle],
        mut backend: B,
        guess: &dyn InitialGuess,
    ) -> Result<Self, TrajectoryError> {
        validate(path, obstacles)?;
        if !drivetrain.bumpers().is_valid() {
            return Err(TrajectoryError::configuration(format!(
                "invalid bumpers: {}",
                drivetrain.bumpers()
            )));
        }

        let interval_counts = interval_counts(path);
        let interval_count: usize = interval_counts.iter().sum();
        info!(
            "Formulating trajectory through {} waypoints with {} control intervals and {} \
             obstacles",
            path.len(),
            interval_count,
            obstacles.len()
        );

        let variables = HolonomicVariables::new(&mut backend, interval_count);

        let state_guess = guess.generate(
            path,
            &interval_counts,
            drivetrain.max_speed(),
            drivetrain.max_angular_speed(),
        );
        check_guess(&state_guess, variables.sample_count(), interval_count)?;
        seed(&mut backend, &variables, &state_guess);

        apply_kinematics_constraints(&mut backend, &variables, &interval_counts);
        apply_path_constraints(&mut backend, &variables, path, &interval_counts);
        let separating_lines = apply_obstacle_constraints(
            &mut backend,
            &variables,
            drivetrain.bumpers(),
            obstacles,
            &state_guess,
        );
        let drivetrain_variables = drivetrain.apply_dynamics_constraints(&mut backend, &variables);

        let total_time = variables.dt.iter().fold(Expr::constant(0.), |total, dt| total + dt);
        backend.minimize(total_time);

        Ok(TrajectoryOptimizationProblem {
            drivetrain,
            backend,
            variables,
            separating_lines,
            drivetrain_variables,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn variables(&self) -> &HolonomicVariables {
        &self.variables
    }

    pub fn drivetrain_variables(&self) -> &D::Variables {
        &self.drivetrain_variables
    }

    /// The line keeping the bumpers at `sample` away from `obstacle`
    pub fn separating_line(&self, sample: usize, obstacle: usize) -> &SeparatingLine {
        &self.separating_lines[sample][obstacle]
    }

    /// Solves the problem and reads the trajectory out of the solution
    pub fn solve(mut self) -> Result<HolonomicTrajectory, TrajectoryError> {
        let solution = self.backend.solve()?;
        Ok(self.extract(&solution))
    }

    fn extract(&self, solution: &Solution) -> HolonomicTrajectory {
        let variables = &self.variables;
        let last_interval = variables.interval_count() - 1;
        let samples = (0..variables.sample_count())
            .map(|sample| {
                let interval = sample.min(last_interval);
                let interval_duration = match sample {
                    0 => 0.,
                    _ => solution.value(variables.dt(sample - 1)),
                };
                let mut forces =
                    self.drivetrain.module_forces(&self.drivetrain_variables, solution, interval);
                let mut acceleration_x = solution.value(variables.ax(interval));
                let mut acceleration_y = solution.value(variables.ay(interval));

                // the final sample has no interval of its own: it keeps the last interval's
                // controls, turned with the chassis so they still balance at its heading
                if sample > last_interval {
                    let turn = solution.value(variables.heading(sample))
                        - solution.value(variables.heading(interval));
                    let (sin_turn, cos_turn) = turn.sin_cos();
                    let rotate =
                        |x: f64, y: f64| (x * cos_turn - y * sin_turn, x * sin_turn + y * cos_turn);
                    let (ax, ay) = rotate(acceleration_x, acceleration_y);
                    acceleration_x = ax;
                    acceleration_y = ay;
                    for force in forces.iter_mut() {
                        let (x, y) = rotate(force.x, force.y);
                        *force = ModuleForce { x, y };
                    }
                }

                HolonomicTrajectorySample {
                    interval_duration,
                    x: solution.value(variables.x(sample)),
                    y: solution.value(variables.y(sample)),
                    heading: solution.value(variables.heading(sample)),
                    velocity_x: solution.value(variables.vx(sample)),
                    velocity_y: solution.value(variables.vy(sample)),
                    angular_velocity: solution.value(variables.omega(sample)),
                    acceleration_x,
                    acceleration_y,
                    angular_acceleration: solution.value(variables.alpha(interval)),
                    module_forces: forces,
                }
            })
            .collect();
        HolonomicTrajectory::new(samples)
    }
}

/// every per-sample vector of the guess must cover every sample, and `dt` every interval
fn check_guess(
    guess: &StateGuess,
    sample_count: usize,
    interval_count: usize,
) -> Result<(), TrajectoryError> {
    let samples = [
        ("x", &guess.x),
        ("y", &guess.y),
        ("heading", &guess.heading),
        ("vx", &guess.vx),
        ("vy", &guess.vy),
        ("omega", &guess.omega),
    ];
    for (name, values) in samples.iter() {
        if values.len() != sample_count {
            return Err(TrajectoryError::configuration(format!(
                "initial guess has {} values of {}, expected {}",
                values.len(),
                name,
                sample_count
            )));
        }
    }
    if guess.dt.len() != interval_count {
        return Err(TrajectoryError::configuration(format!(
            "initial guess has {} interval durations, expected {}",
            guess.dt.len(),
            interval_count
        )));
    }
    Ok(())
}

fn seed<B: Backend>(backend: &mut B, variables: &HolonomicVariables, guess: &StateGuess) {
    for sample in 0..variables.sample_count() {
        backend.set_initial_value(variables.x(sample), guess.x[sample]);
        backend.set_initial_value(variables.y(sample), guess.y[sample]);
        backend.set_initial_value(variables.heading(sample), guess.heading[sample]);
        backend.set_initial_value(variables.vx(sample), guess.vx[sample]);
        backend.set_initial_value(variables.vy(sample), guess.vy[sample]);
        backend.set_initial_value(variables.omega(sample), guess.omega[sample]);
    }
    for interval in 0..variables.interval_count() {
        let dt = guess.dt[interval].max(MIN_INTERVAL_DURATION);
        backend.set_initial_value(variables.dt(interval), dt);
        let ax = (guess.vx[interval + 1] - guess.vx[interval]) / dt;
        let ay = (guess.vy[interval + 1] - guess.vy[interval]) / dt;
        backend.set_initial_value(variables.ax(interval), ax);
        backend.set_initial_value(variables.ay(interval), ay);
        backend.set_initial_value(
            variables.alpha(interval),
            (guess.omega[interval + 1] - guess.omega[interval]) / dt,
        );
    }
}

/// constant acceleration over each interval, uniform durations within a segment
fn apply_kinematics_constraints<B: Backend>(
    backend: &mut B,
    variables: &HolonomicVariables,
    interval_counts: &[usize],
) {
    for interval in 0..variables.interval_count() {
        let dt = variables.dt(interval);
        for row in [X, Y, HEADING].iter() {
            let p = variables.position.get(*row, interval);
            let v = variables.velocity.get(*row, interval);
            let a = variables.acceleration.get(*row, interval);
            let next_p = variables.position.get(*row, interval + 1);
            let next_v = variables.velocity.get(*row, interval + 1);

            backend.subject_to(next_p.equal_to(p + v * dt + 0.5 * a * dt * dt));
            backend.subject_to(next_v.equal_to(v + a * dt));
        }
    }

    let mut start = 0;
    for count in interval_counts.iter() {
        for interval in start..start + count - 1 {
            backend.subject_to(variables.dt(interval + 1).equal_to(variables.dt(interval)));
        }
        start += count;
    }
}

fn apply_waypoint_constraints<B: Backend>(
    backend: &mut B,
    variables: &HolonomicVariables,
    waypoint: &HolonomicWaypoint,
    sample: usize,
) {
    let pose = waypoint.pose();
    if pose.x_constrained {
        backend.subject_to(variables.x(sample).equal_to(pose.x));
    }
    if pose.y_constrained {
        backend.subject_to(variables.y(sample).equal_to(pose.y));
    }
    if pose.heading_constrained {
        backend.subject_to(variables.heading(sample).equal_to(pose.heading));
    }

    let vx = variables.vx(sample);
    let vy = variables.vy(sample);
    if waypoint.velocity_x_constrained {
        backend.subject_to(vx.equal_to(waypoint.velocity_x));
    }
    if waypoint.velocity_y_constrained {
        backend.subject_to(vy.equal_to(waypoint.velocity_y));
    }
    // both components pinned already pins the magnitude
    let both_pinned = waypoint.velocity_x_constrained && waypoint.velocity_y_constrained;
    if waypoint.velocity_magnitude_constrained && !both_pinned {
        let magnitude = waypoint.velocity_magnitude();
        if magnitude == 0. {
            if !waypoint.velocity_x_constrained {
                backend.subject_to(vx.equal_to(0.));
            }
            if !waypoint.velocity_y_constrained {
                backend.subject_to(vy.equal_to(0.));
            }
        } else {
            backend.subject_to(Expr::norm_squared(vx, vy).equal_to(magnitude * magnitude));
        }
    }
    if waypoint.angular_velocity_constrained {
        backend.subject_to(variables.omega(sample).equal_to(waypoint.angular_velocity));
    }
    if let Some(bound) = &waypoint.velocity_bound {
        apply_set_2d(backend, vx, vy, bound);
    }
}

fn apply_path_constraints<B: Backend>(
    backend: &mut B,
    variables: &HolonomicVariables,
    path: &HolonomicPath,
    interval_counts: &[usize],
) {
    let mut sample = 0;
    for (index, waypoint) in path.iter().enumerate() {
        apply_waypoint_constraints(backend, variables, waypoint, sample);
        if let Some(count) = interval_counts.get(index) {
            sample += count;
        }
    }
}

/// Keeps the bumpers, moved to each sample's pose, clear of every obstacle
///
/// Each sample and obstacle get a line of their own: every bumper corner must lie on one
/// side of it and every obstacle corner at least the combined safety distance beyond it on
/// the other. Such a line exists exactly when the convex hulls of the two outlines are that
/// far apart, so an obstacle swallowed whole by the bumpers is caught as well.
fn apply_obstacle_constraints<B: Backend>(
    backend: &mut B,
    variables: &HolonomicVariables,
    bumpers: &Obstacle,
    obstacles: &[Obstacle],
    guess: &StateGuess,
) -> Vec<Vec<SeparatingLine>> {
    let mut obstacle_points: Vec<Vec<(Expr, Expr)>> = Vec::with_capacity(obstacles.len());
    for obstacle in obstacles.iter() {
        let mut points = Vec::with_capacity(obstacle.points.len());
        for p in obstacle.points.iter() {
            points.push((backend.parameter(p.x), backend.parameter(p.y)));
        }
        obstacle_points.push(points);
    }

    let mut lines = Vec::with_capacity(variables.sample_count());
    for sample in 0..variables.sample_count() {
        let (x, y) = (variables.x(sample), variables.y(sample));
        let cos_heading = variables.heading(sample).cos();
        let sin_heading = variables.heading(sample).sin();
        let corners: Vec<(Expr, Expr)> = bumpers
            .points
            .iter()
            .map(|p| {
                let corner_x = x + p.x * &cos_heading - p.y * &sin_heading;
                let corner_y = y + p.x * &sin_heading + p.y * &cos_heading;
                (corner_x, corner_y)
            })
            .collect();

        let mut sample_lines = Vec::with_capacity(obstacles.len());
        for (obstacle, points) in obstacles.iter().zip(obstacle_points.iter()) {
            let distance = bumpers.safety_distance + obstacle.safety_distance;
            let line = SeparatingLine {
                angle: backend.decision_variable(),
                offset: backend.decision_variable(),
            };
            let (angle, offset) = seed_separating_line(bumpers, obstacle, guess, sample, distance);
            backend.set_initial_value(&line.angle, angle);
            backend.set_initial_value(&line.offset, offset);

            let (sin_angle, cos_angle) = (line.angle.sin(), line.angle.cos());
            for corner in corners.iter() {
                let projection = &cos_angle * &corner.0 + &sin_angle * &corner.1;
                backend.subject_to((&line.offset - projection).at_least(0.));
            }
            for point in points.iter() {
                let projection = &cos_angle * &point.0 + &sin_angle * &point.1;
                backend.subject_to((projection - &line.offset).at_least(distance));
            }
            sample_lines.push(line);
        }
        lines.push(sample_lines);
    }
    lines
}

/// points the line's normal from the guessed robot position towards the obstacle and puts
/// the line halfway across the gap
fn seed_separating_line(
    bumpers: &Obstacle,
    obstacle: &Obstacle,
    guess: &StateGuess,
    sample: usize,
    distance: f64,
) -> (f64, f64) {
    let (x, y, heading) = (guess.x[sample], guess.y[sample], guess.heading[sample]);
    let centroid = obstacle.centroid();
    let angle = (centroid.y - y).atan2(centroid.x - x);
    let (sin_angle, cos_angle) = angle.sin_cos();
    let (sin_heading, cos_heading) = heading.sin_cos();

    let bumper_extent = bumpers
        .points
        .iter()
        .map(|p| {
            let corner_x = x + p.x * cos_heading - p.y * sin_heading;
            let corner_y = y + p.x * sin_heading + p.y * cos_heading;
            cos_angle * corner_x + sin_angle * corner_y
        })
        .fold(f64::NEG_INFINITY, f64::max);
    let obstacle_extent = obstacle
        .points
        .iter()
        .map(|p| cos_angle * p.x + sin_angle * p.y)
        .fold(f64::INFINITY, f64::min);
    (angle, (bumper_extent + obstacle_extent - distance) / 2.)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivetrain::SwerveModule;
    use crate::guess::LinearInitialGuess;
    use crate::nlp::RecordingBackend;
    use crate::obstacle::ObstaclePoint;
    use crate::path::{InitialGuessPoint, Path};
    use crate::set::{EllipticalSet2d, LinearSet2d};
    use assert::close;

    fn drivetrain() -> SwerveDrivetrain {
        let modules = vec![
            SwerveModule::new(0.3, 0.3, 0.05, 60., 1.5),
            SwerveModule::new(-0.3, 0.3, 0.05, 60., 1.5),
            SwerveModule::new(-0.3, -0.3, 0.05, 60., 1.5),
            SwerveModule::new(0.3, -0.3, 0.05, 60., 1.5),
        ];
        SwerveDrivetrain::new(45., 6., modules, Obstacle::rectangle(0.05, 0.8, 0.8)).unwrap()
    }

    fn straight_path(intervals: usize) -> HolonomicPath {
        Path::new(vec![
            HolonomicWaypoint::stopped(0., 0., 0.).with_control_interval_count(intervals),
            HolonomicWaypoint::stopped(2., 0., 0.),
        ])
    }

    fn recorded<'a>(
        drivetrain: &'a SwerveDrivetrain,
        path: &HolonomicPath,
        obstacles: &[Obstacle],
    ) -> Result<SwerveTrajectoryOptimizationProblem<'a, RecordingBackend>, TrajectoryError> {
        let guess = LinearInitialGuess::default();
        let backend = RecordingBackend::new();
        TrajectoryOptimizationProblem::new(drivetrain, path, obstacles, backend, &guess)
    }

    /// a linear guess with one of its vectors cut short
    struct ShortGuess;

    impl InitialGuess for ShortGuess {
        fn generate(
            &self,
            path: &HolonomicPath,
            interval_counts: &[usize],
            max_speed: f64,
            max_angular_speed: f64,
        ) -> StateGuess {
            let linear = LinearInitialGuess::default();
            let mut guess = linear.generate(path, interval_counts, max_speed, max_angular_speed);
            guess.vx.clear();
            guess
        }
    }

    /// the inequalities that involve the separating line of `sample` and obstacle 0
    fn line_constraints<'a>(
        problem: &'a SwerveTrajectoryOptimizationProblem<'_, RecordingBackend>,
        sample: usize,
    ) -> Vec<&'a Expr> {
        let angle = problem.separating_line(sample, 0).angle.variable_index().unwrap();
        problem.backend().inequalities().iter().filter(|e| e.variables().contains(&angle)).collect()
    }

    /// initial values with the robot parked at `(x, y)` facing forward at every sample
    fn parked_at(
        problem: &SwerveTrajectoryOptimizationProblem<'_, RecordingBackend>,
        x: f64,
        y: f64,
    ) -> Vec<f64> {
        let variables = problem.variables();
        let mut values = problem.backend().initial_values().to_vec();
        for sample in 0..variables.sample_count() {
            values[variables.x(sample).variable_index().unwrap()] = x;
            values[variables.y(sample).variable_index().unwrap()] = y;
            values[variables.heading(sample).variable_index().unwrap()] = 0.;
        }
        values
    }

    #[test]
    fn variable_matrix_layout() {
        let mut backend = RecordingBackend::new();
        let matrix = VariableMatrix::new(&mut backend, 2, 3);
        assert_eq!(2, matrix.rows());
        assert_eq!(3, matrix.cols());
        assert_eq!(Some(4), matrix.get(1, 1).variable_index());
        assert_eq!(3, matrix.row(1).len());
        assert_eq!(Some(3), matrix.row(1)[0].variable_index());
    }

    #[test]
    fn holonomic_variable_shapes() {
        let mut backend = RecordingBackend::new();
        let variables = HolonomicVariables::new(&mut backend, 4);
        assert_eq!(5, variables.sample_count());
        assert_eq!(4, variables.interval_count());
        assert_eq!(3, variables.position().rows());
        assert_eq!(5, variables.velocity().cols());
        assert_eq!(4, variables.acceleration().cols());
        assert_eq!(3 * 5 + 3 * 5 + 3 * 4 + 4, backend.variable_count());
    }

    #[test]
    fn formulation_counts() {
        let drivetrain = drivetrain();
        let problem = recorded(&drivetrain, &straight_path(4), &[]).unwrap();
        let backend = problem.backend();

        // chassis state plus two force components per module and interval
        assert_eq!(46 + 2 * 4 * 4, backend.variable_count());
        // kinematics, uniform durations, two fully pinned waypoints, Newton-Euler
        assert_eq!(6 * 4 + 3 + 2 * 6 + 3 * 4, backend.equalities().len());
        // minimum durations, wheel speeds, power envelopes
        assert_eq!(4 + 5 * 4 + 4 * 4, backend.inequalities().len());
        assert!(backend.objective().is_some());
    }

    #[test]
    fn formulation_is_seeded_from_guess() {
        let drivetrain = drivetrain();
        let problem = recorded(&drivetrain, &straight_path(4), &[]).unwrap();
        let variables = problem.variables().clone();
        let trajectory = problem.solve().unwrap();

        assert_eq!(5, trajectory.len());
        assert_eq!(0., trajectory.sample(0).unwrap().interval_duration);
        close(2., trajectory.sample(4).unwrap().x, 1e-12);
        close(1., trajectory.sample(2).unwrap().x, 1e-12);
        // 2 m at half the top speed of 3 m/s
        close(4. / 3., trajectory.total_time(), 1e-12);
        assert_eq!(4, trajectory.sample(1).unwrap().module_forces.len());
        assert_eq!(Some(0), variables.x(0).variable_index());
    }

    #[test]
    fn waypoints_pin_their_own_samples() {
        let drivetrain = drivetrain();
        let path = Path::new(vec![
            HolonomicWaypoint::stopped(0., 0., 0.).with_control_interval_count(3),
            HolonomicWaypoint::at_pose(1., 1., 0.).with_control_interval_count(2),
            HolonomicWaypoint::stopped(2., 0., 0.),
        ]);
        let problem = recorded(&drivetrain, &path, &[]).unwrap();
        let index = problem.variables().x(3).variable_index().unwrap();
        let equalities = problem.backend().equalities();
        let pins: Vec<_> = equalities.iter().filter(|e| e.variables() == vec![index]).collect();
        assert_eq!(1, pins.len());
        // x(3) - 1
        close(-1., pins[0].value(&vec![0.; problem.backend().variable_count()]), 1e-12);
    }

    #[test]
    fn obstacle_constraint_counts() {
        let drivetrain = drivetrain();
        let path = straight_path(4);
        let without = recorded(&drivetrain, &path, &[]).unwrap();
        let (variables, inequalities) =
            (without.backend().variable_count(), without.backend().inequalities().len());

        let pole = Obstacle::new(0.1, vec![ObstaclePoint::new(1., 2.)]);
        let with_pole = recorded(&drivetrain, &path, &[pole]).unwrap();
        // a line per sample, four bumper corners and one point on either side of it
        assert_eq!(variables + 2 * 5, with_pole.backend().variable_count());
        assert_eq!(inequalities + (4 + 1) * 5, with_pole.backend().inequalities().len());

        let wall = Obstacle::new(0.1, vec![ObstaclePoint::new(0., 2.), ObstaclePoint::new(2., 2.)]);
        let with_wall = recorded(&drivetrain, &path, &[wall]).unwrap();
        assert_eq!(inequalities + (4 + 2) * 5, with_wall.backend().inequalities().len());
    }

    #[test]
    fn separating_line_is_seeded_towards_obstacle() {
        let drivetrain = drivetrain();
        let pole = Obstacle::new(0.1, vec![ObstaclePoint::new(1., 1.)]);
        let problem = recorded(&drivetrain, &straight_path(2), &[pole]).unwrap();
        let values = problem.backend().initial_values();

        // the guess puts sample 1 at (1, 0), straight below the pole
        let line = problem.separating_line(1, 0);
        close(std::f64::consts::FRAC_PI_2, values[line.angle.variable_index().unwrap()], 1e-12);
        // halfway between the bumper edge at 0.4 and the pole less its clearance
        close((0.4 + 1. - 0.15) / 2., values[line.offset.variable_index().unwrap()], 1e-12);
        for constraint in line_constraints(&problem, 1) {
            assert!(constraint.value(values) > 0.);
        }
    }

    #[test]
    fn separating_line_clearance_values() {
        let drivetrain = drivetrain();
        let pole = Obstacle::new(0.1, vec![ObstaclePoint::new(1., 1.)]);
        let problem = recorded(&drivetrain, &straight_path(2), &[pole]).unwrap();
        let mut values = parked_at(&problem, 1., 0.);

        // a horizontal line along the bumper edge at y = 0.4
        let line = problem.separating_line(0, 0);
        values[line.angle.variable_index().unwrap()] = std::f64::consts::FRAC_PI_2;
        values[line.offset.variable_index().unwrap()] = 0.4;
        let rows: Vec<f64> =
            line_constraints(&problem, 0).iter().map(|e| e.value(&values)).collect();
        assert_eq!(5, rows.len());
        // the left corners touch the line, the pole is 0.6 m beyond it with 0.15 m required
        close(0., rows[..4].iter().copied().fold(f64::INFINITY, f64::min), 1e-12);
        close(0.8, rows[..4].iter().copied().fold(f64::NEG_INFINITY, f64::max), 1e-12);
        close(0.45, rows[4], 1e-12);
    }

    #[test]
    fn obstacle_inside_bumpers_is_infeasible() {
        let drivetrain = drivetrain();
        let pole = Obstacle::new(0.1, vec![ObstaclePoint::new(1., 0.)]);
        let problem = recorded(&drivetrain, &straight_path(2), &[pole]).unwrap();
        let mut values = parked_at(&problem, 1., 0.);
        let line = problem.separating_line(0, 0);
        let (angle, offset) =
            (line.angle.variable_index().unwrap(), line.offset.variable_index().unwrap());

        // no line direction works, whatever the offset
        for step in 0..72 {
            let phi = step as f64 * std::f64::consts::PI / 36.;
            values[angle] = phi;
            for offset_value in [-1., 0., 0.4, 0.6, 1., 2.].iter() {
                values[offset] = *offset_value;
                let worst = line_constraints(&problem, 0)
                    .iter()
                    .map(|e| e.value(&values))
                    .fold(f64::INFINITY, f64::min);
                assert!(worst < -0.1, "angle {} offset {} is feasible", phi, offset_value);
            }
        }
    }

    #[test]
    fn velocity_constraints() {
        let mut backend = RecordingBackend::new();
        let variables = HolonomicVariables::new(&mut backend, 1);

        let mut moving = HolonomicWaypoint::at_pose(0., 0., 0.);
        moving.velocity_x = 1.;
        moving.velocity_magnitude_constrained = true;
        apply_waypoint_constraints(&mut backend, &variables, &moving, 0);
        // pose plus the speed
        assert_eq!(4, backend.equalities().len());

        let mut stopping = HolonomicWaypoint::at_pose(0., 0., 0.);
        stopping.velocity_magnitude_constrained = true;
        apply_waypoint_constraints(&mut backend, &variables, &stopping, 1);
        assert_eq!(4 + 5, backend.equalities().len());

        let circle = Set2d::Elliptical(EllipticalSet2d::circle(1.));
        let bounded = HolonomicWaypoint::at_pose(0., 0., 0.).with_velocity_bound(circle);
        let bounds = backend.inequalities().len();
        apply_waypoint_constraints(&mut backend, &variables, &bounded, 1);
        assert_eq!(4 + 5 + 3, backend.equalities().len());
        assert_eq!(bounds + 1, backend.inequalities().len());
    }

    #[test]
    fn set_application() {
        let mut backend = RecordingBackend::new();
        let x = backend.decision_variable();
        let y = backend.decision_variable();

        apply_interval_set(&mut backend, &x, &IntervalSet1d::r1());
        assert_eq!(0, backend.equalities().len() + backend.inequalities().len());
        apply_interval_set(&mut backend, &x, &IntervalSet1d::exact(2.));
        assert_eq!(1, backend.equalities().len());
        apply_interval_set(&mut backend, &x, &IntervalSet1d::new(-1., 1.));
        assert_eq!(2, backend.inequalities().len());

        // collinearity plus the bounded axis of the transformed box
        let linear =
            Set2d::Linear { direction: LinearSet2d::new(0.), r_bound: IntervalSet1d::new(1., 3.) };
        apply_set_2d(&mut backend, &x, &y, &linear);
        assert_eq!(2, backend.equalities().len());
        assert_eq!(4, backend.inequalities().len());
        close(0., backend.equalities()[1].value(&[2., 0.]), 1e-12);
        close(1., backend.equalities()[1].value(&[2., -1.]), 1e-12);

        let rectangle = Set2d::Rectangular(RectangularSet2d::new(
            IntervalSet1d::new(0., 1.),
            IntervalSet1d::r1(),
        ));
        apply_set_2d(&mut backend, &x, &y, &rectangle);
        assert_eq!(6, backend.inequalities().len());

        apply_set_2d(&mut backend, &x, &y, &Set2d::Elliptical(EllipticalSet2d::new(2., 1.)));
        let ellipse = backend.inequalities().last().unwrap();
        close(0., ellipse.value(&[2., 0.]), 1e-12);
        assert!(ellipse.value(&[1., 0.5]) > 0.);
    }

    #[test]
    fn validation_errors() {
        let drivetrain = drivetrain();

        let single = Path::new(vec![HolonomicWaypoint::stopped(0., 0., 0.)]);
        let rejected = |result: Result<_, TrajectoryError>| {
            matches!(result, Err(TrajectoryError::Configuration(_)))
        };
        assert!(rejected(recorded(&drivetrain, &single, &[]).map(|_| ())));

        let invalid = Path::new(vec![
            HolonomicWaypoint::stopped(0., 0., 0.),
            HolonomicWaypoint::stopped(f64::NAN, 0., 0.),
        ]);
        assert!(rejected(recorded(&drivetrain, &invalid, &[]).map(|_| ())));

        let crowded = Path::new(vec![
            HolonomicWaypoint::stopped(0., 0., 0.)
                .with_initial_guess_points(vec![
                    InitialGuessPoint::new(1., 0., 0.),
                    InitialGuessPoint::new(1.5, 0., 0.),
                ])
                .with_control_interval_count(2),
            HolonomicWaypoint::stopped(2., 0., 0.),
        ]);
        assert!(rejected(recorded(&drivetrain, &crowded, &[]).map(|_| ())));

        let bad_obstacle = Obstacle::new(-1., vec![ObstaclePoint::new(1., 1.)]);
        assert!(rejected(recorded(&drivetrain, &straight_path(4), &[bad_obstacle]).map(|_| ())));
    }

    #[test]
    fn short_guess_is_rejected() {
        let drivetrain = drivetrain();
        let result = TrajectoryOptimizationProblem::new(
            &drivetrain,
            &straight_path(4),
            &[],
            RecordingBackend::new(),
            &ShortGuess,
        );
        match result {
            Err(TrajectoryError::Configuration(message)) => assert!(message.contains("vx")),
            Err(other) => panic!("expected a configuration error, got {:?}", other),
            Ok(_) => panic!("a guess without velocities was accepted"),
        }
    }

    #[test]
    fn samples_carry_their_own_interval() {
        let drivetrain = drivetrain();
        let problem = recorded(&drivetrain, &straight_path(2), &[]).unwrap();
        let variables = problem.variables().clone();
        let forces = problem.drivetrain_variables().clone();
        let mut values = problem.backend().initial_values().to_vec();
        let mut set = |expr: &Expr, value: f64| values[expr.variable_index().unwrap()] = value;
        set(variables.ax(0), 1.);
        set(variables.ax(1), 2.);
        set(&forces.force_x[0][0], 3.);
        set(&forces.force_x[1][0], 4.);
        // a quarter turn during the last interval
        set(variables.heading(2), std::f64::consts::FRAC_PI_2);
        let solution = Solution::new(values, 0);

        let trajectory = problem.extract(&solution);
        close(1., trajectory.sample(0).unwrap().acceleration_x, 1e-12);
        close(2., trajectory.sample(1).unwrap().acceleration_x, 1e-12);
        close(3., trajectory.sample(0).unwrap().module_forces[0].x, 1e-12);
        close(4., trajectory.sample(1).unwrap().module_forces[0].x, 1e-12);
        // the last sample turns the last interval's controls with the chassis
        let last = trajectory.sample(2).unwrap();
        close(0., last.acceleration_x, 1e-12);
        close(2., last.acceleration_y, 1e-12);
        close(4., last.module_forces[0].y, 1e-12);
    }

    #[test]
    fn interval_counts_ignore_last_waypoint() {
        let path = Path::new(vec![
            HolonomicWaypoint::stopped(0., 0., 0.).with_control_interval_count(3),
            HolonomicWaypoint::stopped(1., 0., 0.).with_control_interval_count(5),
            HolonomicWaypoint::stopped(2., 0., 0.).with_control_interval_count(7),
        ]);
        assert_eq!(vec![3, 5], interval_counts(&path));
    }
}
