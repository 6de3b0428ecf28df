use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::error::StepError;
use crate::retry::RetryConfig;

/// Future returned by step closures.
pub type StepFuture<T> = BoxFuture<'static, Result<T, StepError>>;

type ExecuteFn<C> = Arc<dyn Fn(C) -> StepFuture<C> + Send + Sync>;
type CompensateFn<C> = Arc<dyn Fn(C) -> StepFuture<()> + Send + Sync>;

/// One named step of a saga.
///
/// `execute` receives the previous step's output and returns the next
/// context. `compensate`, if present, undoes the step and receives the most
/// recent successful context.
pub struct SagaStep<C> {
    name: String,
    execute: ExecuteFn<C>,
    compensate: Option<CompensateFn<C>>,
    retry: Option<RetryConfig>,
}

impl<C: Send + 'static> SagaStep<C> {
    pub fn new<F, Fut>(name: impl Into<String>, execute: F) -> Self
    where
        F: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<C, StepError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            execute: Arc::new(move |ctx: C| -> StepFuture<C> { Box::pin(execute(ctx)) }),
            compensate: None,
            retry: None,
        }
    }

    #[must_use]
    pub fn with_compensation<F, Fut>(mut self, compensate: F) -> Self
    where
        F: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StepError>> + Send + 'static,
    {
        self.compensate = Some(Arc::new(move |ctx: C| -> StepFuture<()> {
            Box::pin(compensate(ctx))
        }));
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }
}

impl<C> SagaStep<C> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_compensation(&self) -> bool {
        self.compensate.is_some()
    }

    pub fn retry_config(&self) -> Option<&RetryConfig> {
        self.retry.as_ref()
    }

    pub(crate) fn execute(&self, ctx: C) -> StepFuture<C> {
        (self.execute)(ctx)
    }

    pub(crate) fn compensate(&self, ctx: C) -> Option<StepFuture<()>> {
        self.compensate.as_ref().map(|compensate| compensate(ctx))
    }
}

impl<C> Clone for SagaStep<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            execute: Arc::clone(&self.execute),
            compensate: self.compensate.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl<C> fmt::Debug for SagaStep<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SagaStep")
            .field("name", &self.name)
            .field("has_compensation", &self.has_compensation())
            .field("retry", &self.retry)
            .finish()
    }
}
