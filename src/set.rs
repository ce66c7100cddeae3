//! Geometric sets used to express bounds on scalars and planar vectors.

use std::fmt;
use std::fmt::Formatter;

/// A closed interval of the real line, possibly unbounded on either side
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct IntervalSet1d {
    pub lower: f64,
    pub upper: f64,
}

impl IntervalSet1d {
    /// Creates an interval from its bounds
    ///
    /// # Examples
    /// ```
    /// use holotraj::IntervalSet1d;
    /// let speed = IntervalSet1d::new(0.0, 4.5);
    /// assert!(speed.contains(2.0));
    /// assert!(!speed.contains(-0.1));
    /// ```
    pub fn new(lower: f64, upper: f64) -> IntervalSet1d {
        IntervalSet1d { lower, upper }
    }

    /// The degenerate interval holding a single value
    pub fn exact(value: f64) -> IntervalSet1d {
        IntervalSet1d { lower: value, upper: value }
    }

    /// The whole real line, (-inf, inf)
    pub fn r1() -> IntervalSet1d {
        IntervalSet1d { lower: f64::NEG_INFINITY, upper: f64::INFINITY }
    }

    /// The interval [lower, inf)
    pub fn greater_than(lower: f64) -> IntervalSet1d {
        IntervalSet1d { lower, upper: f64::INFINITY }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }

    pub fn is_exact(&self) -> bool {
        self.lower == self.upper
    }

    pub fn is_lower_bounded(&self) -> bool {
        self.lower > f64::NEG_INFINITY
    }

    pub fn is_upper_bounded(&self) -> bool {
        self.upper < f64::INFINITY
    }

    /// An interval is valid when neither bound is NaN and lower does not exceed upper
    pub fn is_valid(&self) -> bool {
        !self.lower.is_nan() && !self.upper.is_nan() && self.lower <= self.upper
    }
}

impl fmt::Display for IntervalSet1d {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

/// An axis-aligned box made of two independent intervals
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RectangularSet2d {
    pub x_bound: IntervalSet1d,
    pub y_bound: IntervalSet1d,
}

impl RectangularSet2d {
    pub fn new(x_bound: IntervalSet1d, y_bound: IntervalSet1d) -> RectangularSet2d {
        RectangularSet2d { x_bound, y_bound }
    }

    /// The whole plane
    pub fn r2() -> RectangularSet2d {
        RectangularSet2d::new(IntervalSet1d::r1(), IntervalSet1d::r1())
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.x_bound.contains(x) && self.y_bound.contains(y)
    }

    pub fn is_valid(&self) -> bool {
        self.x_bound.is_valid() && self.y_bound.is_valid()
    }
}

impl fmt::Display for RectangularSet2d {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {}", self.x_bound, self.y_bound)
    }
}

/// A ray through the origin at angle `theta`
///
/// Vectors known to point along the ray (a velocity or a force with a known direction)
/// can then be bounded in magnitude with a plain box constraint.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LinearSet2d {
    pub theta: f64,
}

impl LinearSet2d {
    pub fn new(theta: f64) -> LinearSet2d {
        LinearSet2d { theta }
    }

    /// Returns the smallest axis-aligned box containing every point r(cos theta, sin theta)
    /// with r in `r_bound`
    ///
    /// The axis whose trig value dominates is bounded, the other is left unbounded. The
    /// up and down cones are checked before the right and left cones, so at exact
    /// multiples of 45 degrees the x axis is the one left free.
    ///
    /// # Arguments
    ///
    /// `theta` - angle of the ray
    /// `r_bound` - bound on the signed distance along the ray
    ///
    /// # Examples
    /// ```
    /// use holotraj::{IntervalSet1d, LinearSet2d};
    /// let bound = LinearSet2d::transform_r_bound(0.0, &IntervalSet1d::new(1.0, 3.0));
    /// assert_eq!(IntervalSet1d::new(1.0, 3.0), bound.x_bound);
    /// assert_eq!(IntervalSet1d::r1(), bound.y_bound);
    /// ```
    pub fn transform_r_bound(theta: f64, r_bound: &IntervalSet1d) -> RectangularSet2d {
        let sin_theta = theta.sin();
        let cos_theta = theta.cos();
        if sin_theta > cos_theta.abs() {
            // up cone
            RectangularSet2d::new(
                IntervalSet1d::r1(),
                IntervalSet1d::new(r_bound.lower * sin_theta, r_bound.upper * sin_theta),
            )
        } else if sin_theta < -cos_theta.abs() {
            // down cone
            RectangularSet2d::new(
                IntervalSet1d::r1(),
                IntervalSet1d::new(r_bound.upper * sin_theta, r_bound.lower * sin_theta),
            )
        } else if cos_theta >= sin_theta.abs() {
            // right cone
            RectangularSet2d::new(
                IntervalSet1d::new(r_bound.lower * cos_theta, r_bound.upper * cos_theta),
                IntervalSet1d::r1(),
            )
        } else {
            // left cone
            RectangularSet2d::new(
                IntervalSet1d::new(r_bound.upper * cos_theta, r_bound.lower * cos_theta),
                IntervalSet1d::r1(),
            )
        }
    }

    /// Convenience wrapper around `transform_r_bound` for this ray
    pub fn r_bound_box(&self, r_bound: &IntervalSet1d) -> RectangularSet2d {
        LinearSet2d::transform_r_bound(self.theta, r_bound)
    }

    pub fn is_valid(&self) -> bool {
        self.theta.is_finite()
    }
}

/// An origin-centred ellipse (with interior) given by its axis radii
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct EllipticalSet2d {
    pub x_radius: f64,
    pub y_radius: f64,
}

impl EllipticalSet2d {
    pub fn new(x_radius: f64, y_radius: f64) -> EllipticalSet2d {
        EllipticalSet2d { x_radius, y_radius }
    }

    /// A disc of the given radius
    pub fn circle(radius: f64) -> EllipticalSet2d {
        EllipticalSet2d::new(radius, radius)
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        (x / self.x_radius).powi(2) + (y / self.y_radius).powi(2) <= 1.0
    }

    pub fn is_valid(&self) -> bool {
        self.x_radius.is_finite()
            && self.y_radius.is_finite()
            && self.x_radius > 0.0
            && self.y_radius > 0.0
    }
}

/// Any of the planar sets a two dimensional quantity can be confined to
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Set2d {
    Rectangular(RectangularSet2d),
    /// along the ray `direction`, with signed length in `r_bound`
    Linear { direction: LinearSet2d, r_bound: IntervalSet1d },
    Elliptical(EllipticalSet2d),
}

impl Set2d {
    pub fn is_valid(&self) -> bool {
        match self {
            Set2d::Rectangular(set) => set.is_valid(),
            Set2d::Linear { direction, r_bound } => direction.is_valid() && r_bound.is_valid(),
            Set2d::Elliptical(set) => set.is_valid(),
        }
    }
}
