use std::slice::Iter;

use crate::error::TrajectoryError;
use crate::set::Set2d;

/// Number of control intervals between a waypoint and the next one unless told otherwise
pub const DEFAULT_CONTROL_INTERVAL_COUNT: usize = 10;

/// A guess of a state the robot passes through, used only to seed the optimizer
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct InitialGuessPoint {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

impl InitialGuessPoint {
    pub fn new(x: f64, y: f64, heading: f64) -> InitialGuessPoint {
        InitialGuessPoint { x, y, heading }
    }

    fn is_valid(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.heading.is_finite()
    }
}

/// Behaviour shared by every kind of waypoint a path can hold
pub trait Waypoint {
    /// The position part of the waypoint
    fn pose(&self) -> &PoseWaypoint;

    /// Whether the full velocity state of the robot is pinned at this waypoint
    fn is_velocity_state_known(&self) -> bool;

    /// Whether every stored value is usable
    fn is_valid(&self) -> bool;

    /// Whether x, y and heading are all pinned at this waypoint
    fn is_position_state_known(&self) -> bool {
        let pose = self.pose();
        pose.x_constrained && pose.y_constrained && pose.heading_constrained
    }

    fn is_state_known(&self) -> bool {
        self.is_position_state_known() && self.is_velocity_state_known()
    }
}

/// A waypoint that only describes the robot's position and heading
#[derive(Debug, Clone, PartialEq)]
pub struct PoseWaypoint {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub x_constrained: bool,
    pub y_constrained: bool,
    pub heading_constrained: bool,
    /// seeds for the samples between this waypoint and the next
    pub initial_guess_points: Vec<InitialGuessPoint>,
    /// number of control intervals between this waypoint and the next
    pub control_interval_count: usize,
}

impl PoseWaypoint {
    /// Creates a waypoint with x, y and heading all constrained
    ///
    /// # Examples
    /// ```
    /// use holotraj::{PoseWaypoint, Waypoint};
    /// let waypoint = PoseWaypoint::new(1.0, 2.0, 0.5);
    /// assert!(waypoint.is_position_state_known());
    /// ```
    pub fn new(x: f64, y: f64, heading: f64) -> PoseWaypoint {
        PoseWaypoint {
            x,
            y,
            heading,
            x_constrained: true,
            y_constrained: true,
            heading_constrained: true,
            initial_guess_points: Vec::new(),
            control_interval_count: DEFAULT_CONTROL_INTERVAL_COUNT,
        }
    }

    /// Creates a waypoint that pins the position but lets the optimizer pick the heading
    pub fn translation(x: f64, y: f64) -> PoseWaypoint {
        PoseWaypoint { heading_constrained: false, ..PoseWaypoint::new(x, y, 0.) }
    }

    pub fn with_initial_guess_points(mut self, points: Vec<InitialGuessPoint>) -> PoseWaypoint {
        self.initial_guess_points = points;
        self
    }

    pub fn with_control_interval_count(mut self, count: usize) -> PoseWaypoint {
        self.control_interval_count = count;
        self
    }
}

impl Waypoint for PoseWaypoint {
    fn pose(&self) -> &PoseWaypoint {
        self
    }

    /// a pose waypoint carries no velocity state, so nothing about it is left unknown
    fn is_velocity_state_known(&self) -> bool {
        true
    }

    fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.heading.is_finite()
            && self.initial_guess_points.iter().all(InitialGuessPoint::is_valid)
    }
}

/// A waypoint that may also pin the robot's velocity
#[derive(Debug, Clone, PartialEq)]
pub struct HolonomicWaypoint {
    pub pose: PoseWaypoint,
    pub velocity_x: f64,
    pub velocity_y: f64,
    pub angular_velocity: f64,
    pub velocity_x_constrained: bool,
    pub velocity_y_constrained: bool,
    /// pins the speed hypot(velocity_x, velocity_y) while leaving the direction free
    pub velocity_magnitude_constrained: bool,
    pub angular_velocity_constrained: bool,
    /// optional region the velocity vector must lie in
    pub velocity_bound: Option<Set2d>,
}

impl HolonomicWaypoint {
    /// Creates a waypoint where the robot is at rest at the given pose
    pub fn stopped(x: f64, y: f64, heading: f64) -> HolonomicWaypoint {
        HolonomicWaypoint {
            pose: PoseWaypoint::new(x, y, heading),
            velocity_x: 0.,
            velocity_y: 0.,
            angular_velocity: 0.,
            velocity_x_constrained: true,
            velocity_y_constrained: true,
            velocity_magnitude_constrained: true,
            angular_velocity_constrained: true,
            velocity_bound: None,
        }
    }

    /// Creates a waypoint with a pinned pose and free velocity
    pub fn at_pose(x: f64, y: f64, heading: f64) -> HolonomicWaypoint {
        HolonomicWaypoint::from(PoseWaypoint::new(x, y, heading))
    }

    pub fn with_velocity(
        mut self,
        velocity_x: f64,
        velocity_y: f64,
        angular_velocity: f64,
    ) -> HolonomicWaypoint {
        self.velocity_x = velocity_x;
        self.velocity_y = velocity_y;
        self.angular_velocity = angular_velocity;
        self.velocity_x_constrained = true;
        self.velocity_y_constrained = true;
        self.velocity_magnitude_constrained = true;
        self.angular_velocity_constrained = true;
        self
    }

    pub fn with_velocity_bound(mut self, bound: Set2d) -> HolonomicWaypoint {
        self.velocity_bound = Some(bound);
        self
    }

    pub fn with_initial_guess_points(
        mut self,
        points: Vec<InitialGuessPoint>,
    ) -> HolonomicWaypoint {
        self.pose.initial_guess_points = points;
        self
    }

    pub fn with_control_interval_count(mut self, count: usize) -> HolonomicWaypoint {
        self.pose.control_interval_count = count;
        self
    }

    /// The speed the magnitude constraint pins
    pub fn velocity_magnitude(&self) -> f64 {
        self.velocity_x.hypot(self.velocity_y)
    }
}

impl From<PoseWaypoint> for HolonomicWaypoint {
    fn from(pose: PoseWaypoint) -> HolonomicWaypoint {
        HolonomicWaypoint {
            pose,
            velocity_x: 0.,
            velocity_y: 0.,
            angular_velocity: 0.,
            velocity_x_constrained: false,
            velocity_y_constrained: false,
            velocity_magnitude_constrained: false,
            angular_velocity_constrained: false,
            velocity_bound: None,
        }
    }
}

impl Waypoint for HolonomicWaypoint {
    fn pose(&self) -> &PoseWaypoint {
        &self.pose
    }

    fn is_velocity_state_known(&self) -> bool {
        let translation_known = (self.velocity_x_constrained && self.velocity_y_constrained)
            || (self.velocity_magnitude_constrained && self.velocity_magnitude() == 0.);
        translation_known && self.angular_velocity_constrained
    }

    fn is_valid(&self) -> bool {
        self.pose.is_valid()
            && self.velocity_x.is_finite()
            && self.velocity_y.is_finite()
            && self.angular_velocity.is_finite()
            && self.velocity_bound.as_ref().map_or(true, Set2d::is_valid)
    }
}

/// An ordered list of waypoints the robot must visit
#[derive(Debug, Clone, PartialEq)]
pub struct Path<W: Waypoint> {
    waypoints: Vec<W>,
}

/// The path type the holonomic optimizer consumes
pub type HolonomicPath = Path<HolonomicWaypoint>;

impl<W: Waypoint> Path<W> {
    pub fn new(waypoints: Vec<W>) -> Path<W> {
        Path { waypoints }
    }

    /// Returns the number of waypoints in the path
    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// Returns the waypoint at `index`
    ///
    /// # Examples
    /// ```
    /// use holotraj::{Path, PoseWaypoint};
    /// let path = Path::new(vec![PoseWaypoint::new(0., 0., 0.)]);
    /// assert!(path.waypoint(0).is_ok());
    /// assert!(path.waypoint(1).is_err());
    /// ```
    pub fn waypoint(&self, index: usize) -> Result<&W, TrajectoryError> {
        let len = self.waypoints.len();
        self.waypoints.get(index).ok_or(TrajectoryError::IndexOutOfRange { index, len })
    }

    pub fn waypoint_mut(&mut self, index: usize) -> Result<&mut W, TrajectoryError> {
        let len = self.waypoints.len();
        self.waypoints.get_mut(index).ok_or(TrajectoryError::IndexOutOfRange { index, len })
    }

    pub fn push(&mut self, waypoint: W) {
        self.waypoints.push(waypoint);
    }

    pub fn iter(&self) -> Iter<'_, W> {
        self.waypoints.iter()
    }

    /// A path is valid when it holds at least one waypoint and every waypoint is valid
    pub fn is_valid(&self) -> bool {
        !self.waypoints.is_empty() && self.waypoints.iter().all(Waypoint::is_valid)
    }
}

impl From<Path<PoseWaypoint>> for HolonomicPath {
    fn from(path: Path<PoseWaypoint>) -> HolonomicPath {
        Path::new(path.waypoints.into_iter().map(HolonomicWaypoint::from).collect())
    }
}

impl<'a, W: Waypoint> IntoIterator for &'a Path<W> {
    type Item = &'a W;
    type IntoIter = Iter<'a, W>;

    fn into_iter(self) -> Self::IntoIter {
        self.waypoints.iter()
    }
}
