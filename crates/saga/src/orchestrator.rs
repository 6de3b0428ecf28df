//! Saga orchestrator for running step lists with compensation.

use std::time::Instant;

use crate::definition::SagaDefinition;
use crate::error::{SagaError, StepError};
use crate::result::{CompensationFailure, SagaResult};
use crate::step::SagaStep;

/// Runs saga definitions.
///
/// Steps run one at a time in declared order, each receiving the previous
/// step's output. When a step fails for good, every step that already
/// succeeded is compensated in reverse order. The orchestrator keeps no state
/// between executions and persists nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct SagaOrchestrator;

impl SagaOrchestrator {
    pub fn new() -> Self {
        Self
    }

    /// Executes `definition` starting from `initial`.
    ///
    /// Always yields exactly one [`SagaResult`]; step and compensation
    /// failures are reported in it rather than returned as errors.
    #[tracing::instrument(skip_all, fields(saga = %definition.name()))]
    pub async fn execute<C>(&self, definition: &SagaDefinition<C>, initial: C) -> SagaResult<C>
    where
        C: Clone + Send + 'static,
    {
        metrics::counter!("saga_executions_total").increment(1);
        let saga_start = Instant::now();

        let mut context = initial;
        let mut completed: Vec<&SagaStep<C>> = Vec::with_capacity(definition.steps().len());

        for step in definition.steps() {
            tracing::info!(step = step.name(), "saga step started");

            match self.run_step(step, context.clone()).await {
                Ok(next) => {
                    context = next;
                    completed.push(step);
                }
                Err((attempts, source)) => {
                    tracing::warn!(
                        step = step.name(),
                        attempts,
                        error = %source,
                        "saga step failed"
                    );

                    let compensation_failures = self.compensate(&completed, &context).await;

                    metrics::histogram!("saga_duration_seconds")
                        .record(saga_start.elapsed().as_secs_f64());
                    metrics::counter!("saga_failed").increment(1);
                    tracing::warn!(
                        failed_step = step.name(),
                        compensated = completed.len(),
                        compensation_failures = compensation_failures.len(),
                        "saga failed"
                    );

                    return SagaResult {
                        success: false,
                        context,
                        error: Some(SagaError::StepFailed {
                            step: step.name().to_string(),
                            attempts,
                            source,
                        }),
                        failed_step: Some(step.name().to_string()),
                        completed_steps: names(&completed),
                        compensation_failures,
                    };
                }
            }
        }

        let duration = saga_start.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);
        metrics::counter!("saga_completed").increment(1);
        tracing::info!(duration, "saga completed successfully");

        SagaResult {
            success: true,
            context,
            error: None,
            failed_step: None,
            completed_steps: names(&completed),
            compensation_failures: Vec::new(),
        }
    }

    /// Runs one step, retrying per its retry config.
    ///
    /// On failure returns the number of attempts made and the last error.
    async fn run_step<C>(&self, step: &SagaStep<C>, context: C) -> Result<C, (u32, StepError)>
    where
        C: Clone + Send + 'static,
    {
        let max_attempts = step.retry_config().map_or(1, |retry| retry.max_attempts());
        let mut attempt = 0;
        loop {
            attempt += 1;
            match step.execute(context.clone()).await {
                Ok(next) => return Ok(next),
                Err(err) if attempt < max_attempts => {
                    let delay = step
                        .retry_config()
                        .map(|retry| retry.delay_after(attempt))
                        .unwrap_or_default();
                    tracing::warn!(
                        step = step.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "saga step attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err((attempt, err)),
            }
        }
    }

    /// Compensates `completed` in reverse order, best-effort.
    async fn compensate<C>(&self, completed: &[&SagaStep<C>], context: &C) -> Vec<CompensationFailure>
    where
        C: Clone + Send + 'static,
    {
        let mut failures = Vec::new();

        for step in completed.iter().rev() {
            let Some(compensation) = step.compensate(context.clone()) else {
                continue;
            };

            match compensation.await {
                Ok(()) => {
                    tracing::info!(step = step.name(), "compensation step completed");
                }
                Err(error) => {
                    metrics::counter!("saga_compensation_failures_total").increment(1);
                    tracing::warn!(
                        step = step.name(),
                        error = %error,
                        "compensation step failed"
                    );
                    failures.push(CompensationFailure {
                        step: step.name().to_string(),
                        error,
                    });
                }
            }
        }

        failures
    }
}

fn names<C>(steps: &[&SagaStep<C>]) -> Vec<String> {
    steps.iter().map(|s| s.name().to_string()).collect()
}
