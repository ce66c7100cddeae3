use std::fmt;
use std::fmt::Formatter;

/// a corner of an obstacle, in meters
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ObstaclePoint {
    pub x: f64,
    pub y: f64,
}

impl ObstaclePoint {
    pub fn new(x: f64, y: f64) -> ObstaclePoint {
        ObstaclePoint { x, y }
    }
}

/// A polygonal region the robot must keep away from, padded by a safety distance
///
/// A single point describes a disc of radius `safety_distance`, two points a padded line
/// segment, and three or more points a closed polygon (the last point joins back to the
/// first). The robot's bumpers are described with the same type, relative to the robot's
/// center of rotation.
#[derive(Debug, Clone, PartialEq)]
pub struct Obstacle {
    pub safety_distance: f64,
    pub points: Vec<ObstaclePoint>,
}

impl Obstacle {
    /// Creates an obstacle
    ///
    /// # Arguments
    ///
    /// `safety_distance` - minimum allowed distance to the outline, must be nonnegative
    /// `points` - outline corners, in order
    ///
    /// # Examples
    /// ```
    /// use holotraj::{Obstacle, ObstaclePoint};
    /// let pole = Obstacle::new(0.2, vec![ObstaclePoint::new(3., 1.)]);
    /// assert!(pole.is_valid());
    /// assert_eq!(0, pole.edges().count());
    /// ```
    pub fn new(safety_distance: f64, points: Vec<ObstaclePoint>) -> Obstacle {
        Obstacle { safety_distance, points }
    }

    /// A rectangle centred on the origin, handy for describing bumpers
    pub fn rectangle(safety_distance: f64, length: f64, width: f64) -> Obstacle {
        let half_length = length / 2.;
        let half_width = width / 2.;
        Obstacle::new(safety_distance, vec![
            ObstaclePoint::new(half_length, half_width),
            ObstaclePoint::new(-half_length, half_width),
            ObstaclePoint::new(-half_length, -half_width),
            ObstaclePoint::new(half_length, -half_width),
        ])
    }

    /// Returns the outline's edges as pairs of consecutive corners
    pub fn edges(&self) -> impl Iterator<Item = (ObstaclePoint, ObstaclePoint)> + '_ {
        let count = match self.points.len() {
            0 | 1 => 0,
            2 => 1,
            n => n,
        };
        (0..count).map(move |idx| (self.points[idx], self.points[(idx + 1) % self.points.len()]))
    }

    /// The mean of the corners
    pub fn centroid(&self) -> ObstaclePoint {
        let count = self.points.len().max(1) as f64;
        let (x, y) = self.points.iter().fold((0., 0.), |(x, y), p| (x + p.x, y + p.y));
        ObstaclePoint::new(x / count, y / count)
    }

    /// An obstacle is valid when its safety distance is finite and nonnegative, it has at
    /// least one finite corner and no two consecutive corners coincide
    pub fn is_valid(&self) -> bool {
        let safety_valid = self.safety_distance.is_finite() && self.safety_distance >= 0.;
        if !safety_valid || self.points.is_empty() {
            return false;
        }
        if self.points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return false;
        }
        self.edges().all(|(a, b)| a != b)
    }
}

impl fmt::Display for Obstacle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Obstacle(safety: {}, points: [", self.safety_distance)?;
        for (idx, point) in self.points.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "({}, {})", point.x, point.y)?;
        }
        write!(f, "])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obstacle_edges() {
        let point = Obstacle::new(0.1, vec![ObstaclePoint::new(0., 0.)]);
        assert_eq!(0, point.edges().count());

        let segment =
            Obstacle::new(0.1, vec![ObstaclePoint::new(0., 0.), ObstaclePoint::new(1., 0.)]);
        assert_eq!(1, segment.edges().count());

        let bumpers = Obstacle::rectangle(0., 0.8, 0.6);
        let edges: Vec<_> = bumpers.edges().collect();
        assert_eq!(4, edges.len());
        // the outline closes back on the first corner
        assert_eq!(bumpers.points[3], edges[3].0);
        assert_eq!(bumpers.points[0], edges[3].1);
    }

    #[test]
    fn obstacle_validity() {
        assert!(Obstacle::rectangle(0.05, 1., 1.).is_valid());
        assert!(!Obstacle::new(0.1, Vec::new()).is_valid());
        assert!(!Obstacle::new(-0.1, vec![ObstaclePoint::new(0., 0.)]).is_valid());
        assert!(!Obstacle::new(f64::INFINITY, vec![ObstaclePoint::new(0., 0.)]).is_valid());
        assert!(!Obstacle::new(0.1, vec![ObstaclePoint::new(f64::NAN, 0.)]).is_valid());
        let repeated = Obstacle::new(0.1, vec![
            ObstaclePoint::new(0., 0.),
            ObstaclePoint::new(0., 0.),
            ObstaclePoint::new(1., 1.),
        ]);
        assert!(!repeated.is_valid());
    }

    #[test]
    fn obstacle_centroid() {
        let bumpers = Obstacle::rectangle(0., 0.8, 0.6);
        assert_eq!(ObstaclePoint::new(0., 0.), bumpers.centroid());
        let wall = Obstacle::new(0.1, vec![ObstaclePoint::new(0., 2.), ObstaclePoint::new(2., 3.)]);
        assert_eq!(ObstaclePoint::new(1., 2.5), wall.centroid());
    }

    #[test]
    fn obstacle_fmt() {
        let obstacle =
            Obstacle::new(0.5, vec![ObstaclePoint::new(1., 2.), ObstaclePoint::new(3., 4.5)]);
        assert_eq!("Obstacle(safety: 0.5, points: [(1, 2), (3, 4.5)])", format!("{}", obstacle));
    }
}
