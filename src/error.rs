use thiserror::Error;

use crate::nlp::SolveFailure;

/// Everything that can go wrong while describing or generating a trajectory
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrajectoryError {
    /// The inputs were rejected before any solve was attempted
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The solver could not produce a trajectory; carries the solver's diagnosis
    #[error("optimization failed: {0}")]
    OptimizationFailure(#[from] SolveFailure),

    /// A waypoint or sample index was outside the collection
    #[error("index {index} is out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

impl TrajectoryError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        TrajectoryError::Configuration(message.into())
    }
}
