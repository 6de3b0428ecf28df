use crate::error::{SagaError, StepError};

/// A compensation that failed while unwinding a saga.
#[derive(Debug)]
pub struct CompensationFailure {
    pub step: String,
    pub error: StepError,
}

/// Terminal outcome of one saga execution.
#[derive(Debug)]
pub struct SagaResult<C> {
    /// True if every step succeeded.
    pub success: bool,
    /// On success, the last step's output. On failure, the context produced
    /// by the last step that succeeded (or the initial context).
    pub context: C,
    pub error: Option<SagaError>,
    pub failed_step: Option<String>,
    /// Names of the steps whose execute succeeded, in run order.
    pub completed_steps: Vec<String>,
    /// Compensations that failed. Never changes `success` or `error`.
    pub compensation_failures: Vec<CompensationFailure>,
}

impl<C> SagaResult<C> {
    /// Returns the context, or the step failure if the saga failed.
    pub fn into_result(self) -> Result<C, SagaError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.context),
        }
    }

    /// Returns true if any compensation failed.
    pub fn has_compensation_failures(&self) -> bool {
        !self.compensation_failures.is_empty()
    }
}
