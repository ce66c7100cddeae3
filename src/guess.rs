//! Starting points for the optimizer.
//!
//! The solver only finds a local optimum, so where it starts matters. Guesses are kept
//! behind the [`InitialGuess`] trait so a caller can swap in a smarter heuristic without
//! touching how the problem is formulated.

use crate::path::{HolonomicPath, Waypoint};

/// Seed values for the chassis state, one entry per sample (or per interval for `dt`)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateGuess {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub heading: Vec<f64>,
    pub vx: Vec<f64>,
    pub vy: Vec<f64>,
    pub omega: Vec<f64>,
    pub dt: Vec<f64>,
}

impl StateGuess {
    pub fn sample_count(&self) -> usize {
        self.x.len()
    }

    pub fn total_time(&self) -> f64 {
        self.dt.iter().sum()
    }
}

/// Produces a starting point for a trajectory problem
pub trait InitialGuess {
    /// Generates one guess per sample of a path discretized with `interval_counts[i]`
    /// control intervals between waypoint `i` and waypoint `i + 1`
    ///
    /// `max_speed` and `max_angular_speed` are the drivetrain's limits, used to guess
    /// how long each segment takes.
    fn generate(
        &self,
        path: &HolonomicPath,
        interval_counts: &[usize],
        max_speed: f64,
        max_angular_speed: f64,
    ) -> StateGuess;
}

/// Interpolates linearly between waypoints, passing through each waypoint's initial guess
/// points, at half the drivetrain's top speed
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LinearInitialGuess {
    /// fraction of the top speed used to estimate segment durations
    pub speed_fraction: f64,
    /// shortest duration a segment is guessed to take, in seconds
    pub min_segment_time: f64,
}

impl Default for LinearInitialGuess {
    fn default() -> Self {
        LinearInitialGuess { speed_fraction: 0.5, min_segment_time: 0.1 }
    }
}

/// a pose along the way
#[derive(Debug, Copy, Clone)]
struct Knot {
    x: f64,
    y: f64,
    heading: f64,
}

impl LinearInitialGuess {
    /// Splits `interval_count` intervals between `subsegments` pieces, the remainder going
    /// to the last piece
    fn split(interval_count: usize, subsegments: usize) -> Vec<usize> {
        let base = interval_count / subsegments;
        let mut counts = vec![base; subsegments];
        if let Some(last) = counts.last_mut() {
            *last += interval_count - base * subsegments;
        }
        counts
    }

    fn segment_time(&self, knots: &[Knot], max_speed: f64, max_angular_speed: f64) -> f64 {
        let (distance, rotation) = knots.windows(2).fold((0., 0.), |(distance, rotation), pair| {
            (
                distance + (pair[1].x - pair[0].x).hypot(pair[1].y - pair[0].y),
                rotation + (pair[1].heading - pair[0].heading).abs(),
            )
        });
        let translation_time = distance / (self.speed_fraction * max_speed);
        let rotation_time = rotation / (self.speed_fraction * max_angular_speed);
        translation_time.max(rotation_time).max(self.min_segment_time)
    }
}

impl InitialGuess for LinearInitialGuess {
    fn generate(
        &self,
        path: &HolonomicPath,
        interval_counts: &[usize],
        max_speed: f64,
        max_angular_speed: f64,
    ) -> StateGuess {
        let mut guess = StateGuess::default();
        let waypoints: Vec<_> = path.iter().collect();

        for (segment, pair) in waypoints.windows(2).enumerate() {
            let start = pair[0].pose();
            let end = pair[1].pose();
            let interval_count = interval_counts[segment];

            let mut knots = vec![Knot { x: start.x, y: start.y, heading: start.heading }];
            let guess_points = start.initial_guess_points.iter();
            knots.extend(guess_points.map(|p| Knot { x: p.x, y: p.y, heading: p.heading }));
            knots.push(Knot { x: end.x, y: end.y, heading: end.heading });

            let segment_time = self.segment_time(&knots, max_speed, max_angular_speed);
            let dt = segment_time / interval_count as f64;
            let counts = LinearInitialGuess::split(interval_count, knots.len() - 1);
            for (piece, count) in counts.iter().enumerate() {
                let (from, to) = (knots[piece], knots[piece + 1]);
                for step in 0..*count {
                    let t = step as f64 / *count as f64;
                    guess.x.push(from.x + (to.x - from.x) * t);
                    guess.y.push(from.y + (to.y - from.y) * t);
                    guess.heading.push(from.heading + (to.heading - from.heading) * t);
                }
            }
            guess.dt.extend(std::iter::repeat(dt).take(interval_count));
        }

        if let Some(last) = waypoints.last() {
            let pose = last.pose();
            guess.x.push(pose.x);
            guess.y.push(pose.y);
            guess.heading.push(pose.heading);
        }

        // central differences inside, one-sided at the ends
        let samples = guess.x.len();
        for k in 0..samples {
            let (prev, next) = (k.saturating_sub(1), (k + 1).min(samples - 1));
            let span: f64 = guess.dt[prev..next].iter().sum();
            let rate = |values: &[f64]| {
                if span > 0. {
                    (values[next] - values[prev]) / span
                } else {
                    0.
                }
            };
            guess.vx.push(rate(&guess.x));
            guess.vy.push(rate(&guess.y));
            guess.omega.push(rate(&guess.heading));
        }

        // honour velocities pinned at the waypoints
        let mut sample = 0;
        for (index, waypoint) in waypoints.iter().enumerate() {
            if waypoint.velocity_x_constrained {
                guess.vx[sample] = waypoint.velocity_x;
            }
            if waypoint.velocity_y_constrained {
                guess.vy[sample] = waypoint.velocity_y;
            }
            if waypoint.angular_velocity_constrained {
                guess.omega[sample] = waypoint.angular_velocity;
            }
            if let Some(count) = interval_counts.get(index) {
                sample += count;
            }
        }

        guess
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{HolonomicWaypoint, InitialGuessPoint, Path};
    use assert::close;

    #[test]
    fn split_gives_remainder_to_last() {
        assert_eq!(vec![3, 3, 4], LinearInitialGuess::split(10, 3));
        assert_eq!(vec![5], LinearInitialGuess::split(5, 1));
        assert_eq!(vec![1, 1], LinearInitialGuess::split(2, 2));
    }

    #[test]
    fn straight_line_guess() {
        let path = Path::new(vec![
            HolonomicWaypoint::stopped(0., 0., 0.),
            HolonomicWaypoint::stopped(2., 0., 0.),
        ]);
        let guess = LinearInitialGuess::default().generate(&path, &[4], 3., 10.);

        assert_eq!(5, guess.sample_count());
        assert_eq!(4, guess.dt.len());
        // 2 m at half of 3 m/s
        close(4. / 3., guess.total_time(), 1e-12);
        for (k, x) in guess.x.iter().enumerate() {
            close(0.5 * k as f64, *x, 1e-12);
        }
        // pinned waypoint velocities win over finite differences
        close(0., guess.vx[0], 1e-12);
        close(0., guess.vx[4], 1e-12);
        close(1.5, guess.vx[2], 1e-12);
        assert!(guess.y.iter().chain(guess.vy.iter()).all(|v| *v == 0.));
    }

    #[test]
    fn guess_passes_through_guess_points() {
        let path = Path::new(vec![
            HolonomicWaypoint::at_pose(0., 0., 0.)
                .with_initial_guess_points(vec![InitialGuessPoint::new(1., 1., 0.5)])
                .with_control_interval_count(5),
            HolonomicWaypoint::at_pose(2., 0., 1.),
        ]);
        let guess = LinearInitialGuess::default().generate(&path, &[5], 3., 10.);

        assert_eq!(6, guess.sample_count());
        // two intervals to the guess point, three to the next waypoint
        close(1., guess.x[2], 1e-12);
        close(1., guess.y[2], 1e-12);
        close(0.5, guess.heading[2], 1e-12);
        close(2., guess.x[5], 1e-12);
        close(1., guess.heading[5], 1e-12);
        // free velocities follow the motion
        assert!(guess.vx[0] > 0.);
    }

    #[test]
    fn rotation_dominated_segment_time() {
        let path = Path::new(vec![
            HolonomicWaypoint::stopped(0., 0., 0.),
            HolonomicWaypoint::stopped(0., 0., 3.),
        ]);
        let guess = LinearInitialGuess::default().generate(&path, &[3], 3., 2.);
        close(3., guess.total_time(), 1e-12);

        let path = Path::new(vec![
            HolonomicWaypoint::stopped(0., 0., 0.),
            HolonomicWaypoint::stopped(0., 0., 0.),
        ]);
        let guess = LinearInitialGuess::default().generate(&path, &[3], 3., 2.);
        close(0.1, guess.total_time(), 1e-12);
    }

    #[test]
    fn multi_segment_guess() {
        let path = Path::new(vec![
            HolonomicWaypoint::stopped(0., 0., 0.).with_control_interval_count(2),
            HolonomicWaypoint::at_pose(1., 0., 0.).with_control_interval_count(3),
            HolonomicWaypoint::stopped(1., 1., 0.),
        ]);
        let guess = LinearInitialGuess::default().generate(&path, &[2, 3], 2., 2.);
        assert_eq!(6, guess.sample_count());
        assert_eq!(5, guess.dt.len());
        close(1., guess.x[2], 1e-12);
        close(0., guess.y[2], 1e-12);
        close(1., guess.y[5], 1e-12);
        close(0.5, guess.dt[0], 1e-12);
        close(1. / 3., guess.dt[4], 1e-12);
    }
}
