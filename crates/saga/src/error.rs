//! Saga error types.

use thiserror::Error;

/// Error returned by a step's execute or compensate closure.
///
/// Boxed so any collaborator error converts with `?`.
pub type StepError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while defining or running a saga.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A saga needs at least one step.
    #[error("Saga '{saga}' has no steps")]
    EmptyDefinition { saga: String },

    /// Step names identify steps in results and logs, so they must be unique.
    #[error("Saga '{saga}' declares step '{step}' more than once")]
    DuplicateStep { saga: String, step: String },

    /// A step failed after all of its attempts.
    #[error("Saga step '{step}' failed after {attempts} attempt(s): {source}")]
    StepFailed {
        step: String,
        attempts: u32,
        #[source]
        source: StepError,
    },
}

impl SagaError {
    /// Returns the name of the failed step, if this is a step failure.
    pub fn step(&self) -> Option<&str> {
        match self {
            SagaError::StepFailed { step, .. } => Some(step),
            _ => None,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
