use std::fmt;
use std::fmt::Formatter;
use std::slice::Iter;

use crate::drivetrain::ModuleForce;
use crate::error::TrajectoryError;

/// The robot's state at one sample point of a solved trajectory
///
/// Accelerations and module forces are those of the control interval that starts at this
/// sample. The last sample starts no interval: it repeats the last interval's controls,
/// turned by the heading change over that interval so that they still balance at the last
/// sample's own heading.
#[derive(Debug, Clone, PartialEq)]
pub struct HolonomicTrajectorySample {
    /// time taken to reach this sample from the previous one, 0 for the first sample
    pub interval_duration: f64,
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub velocity_x: f64,
    pub velocity_y: f64,
    pub angular_velocity: f64,
    pub acceleration_x: f64,
    pub acceleration_y: f64,
    pub angular_acceleration: f64,
    /// one entry per drivetrain module, in module order
    pub module_forces: Vec<ModuleForce>,
}

impl HolonomicTrajectorySample {
    pub fn speed(&self) -> f64 {
        self.velocity_x.hypot(self.velocity_y)
    }
}

impl fmt::Display for HolonomicTrajectorySample {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sample(dt: {}, x: {}, y: {}, heading: {}, vx: {}, vy: {}, omega: {})",
            self.interval_duration,
            self.x,
            self.y,
            self.heading,
            self.velocity_x,
            self.velocity_y,
            self.angular_velocity
        )
    }
}

/// An ordered, immutable list of samples produced by a solve
#[derive(Debug, Clone, PartialEq)]
pub struct HolonomicTrajectory {
    samples: Vec<HolonomicTrajectorySample>,
}

impl HolonomicTrajectory {
    pub fn new(samples: Vec<HolonomicTrajectorySample>) -> HolonomicTrajectory {
        HolonomicTrajectory { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the sample at `index`
    pub fn sample(&self, index: usize) -> Result<&HolonomicTrajectorySample, TrajectoryError> {
        let len = self.samples.len();
        self.samples.get(index).ok_or(TrajectoryError::IndexOutOfRange { index, len })
    }

    pub fn samples(&self) -> &[HolonomicTrajectorySample] {
        &self.samples
    }

    pub fn iter(&self) -> Iter<'_, HolonomicTrajectorySample> {
        self.samples.iter()
    }

    /// Returns the time from the first sample to the last, in seconds
    pub fn total_time(&self) -> f64 {
        self.samples.iter().map(|sample| sample.interval_duration).sum()
    }

    /// Returns the time at which each sample is reached
    pub fn timestamps(&self) -> Vec<f64> {
        self.samples
            .iter()
            .scan(0., |time, sample| {
                *time += sample.interval_duration;
                Some(*time)
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a HolonomicTrajectory {
    type Item = &'a HolonomicTrajectorySample;
    type IntoIter = Iter<'a, HolonomicTrajectorySample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}
