//! The propagation-aware retry wrapper.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::time::Instant;

use crate::backoff::Backoff;
use crate::error::{Classify, TransactionError};
use crate::manager::TransactionManager;
use crate::options::TransactionOptions;
use crate::propagation::Propagation;
use crate::session::{Session, TransactionDescriptor};
use common::TransactionId;

/// Point in time a whole unit of work must finish by.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    limit: Duration,
}

impl Deadline {
    fn from_options(options: &TransactionOptions) -> Option<Self> {
        options.timeout.map(|limit| Deadline {
            at: Instant::now() + limit,
            limit,
        })
    }

    fn exceeded(&self) -> TransactionError {
        metrics::counter!("transaction_timeouts_total").increment(1);
        TransactionError::Timeout(self.limit)
    }
}

/// Runs `fut`, failing with a timeout error once `deadline` passes.
async fn bounded<F: Future>(
    deadline: Option<Deadline>,
    fut: F,
) -> Result<F::Output, TransactionError> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline.at, fut)
            .await
            .map_err(|_| deadline.exceeded()),
        None => Ok(fut.await),
    }
}

/// Runs units of work under a propagation mode, retrying transient
/// failures.
///
/// Every unit of work receives the caller's [`Session`] and must use it (and
/// pass it on) for any database access. Scopes this wrapper opens are
/// committed or rolled back here; joined scopes leave that to the owner, and
/// only the owning scope retries.
///
/// # Example
///
/// ```ignore
/// let tx = Transactional::new(PgTransactionManager::new(pool));
/// let mut session = tx.session();
/// let id = tx
///     .run(&mut session, &TransactionOptions::required(), |s| {
///         Box::pin(async move { insert_account(s, "ada").await })
///     })
///     .await?;
/// ```
pub struct Transactional<M> {
    manager: Arc<M>,
}

impl<M> Clone for Transactional<M> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

impl<M: TransactionManager> Transactional<M> {
    pub fn new(manager: M) -> Self {
        Self::from_arc(Arc::new(manager))
    }

    pub fn from_arc(manager: Arc<M>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    /// Creates an empty session for a new call chain.
    pub fn session(&self) -> Session<M::Tx> {
        Session::new()
    }

    /// Runs `work` according to `options`.
    ///
    /// Errors raised by the wrapper itself (propagation violations, begin or
    /// commit failures, timeouts) reach the caller through
    /// `E: From<TransactionError>`.
    #[tracing::instrument(
        skip_all,
        fields(propagation = %options.propagation, depth = session.depth())
    )]
    pub async fn run<T, E, F>(
        &self,
        session: &mut Session<M::Tx>,
        options: &TransactionOptions,
        mut work: F,
    ) -> Result<T, E>
    where
        F: for<'s> FnMut(&'s mut Session<M::Tx>) -> BoxFuture<'s, Result<T, E>> + Send,
        T: Send,
        E: From<TransactionError> + Classify + Display + Send,
    {
        let deadline = Deadline::from_options(options);
        let propagation = options.propagation;

        match (propagation, session.is_active()) {
            (Propagation::Required | Propagation::Supports | Propagation::Mandatory, true) => {
                self.run_joined(session, options, deadline, &mut work).await
            }
            (Propagation::Required | Propagation::RequiresNew, _) => {
                self.run_owned(session, options, deadline, &mut work).await
            }
            (Propagation::Supports | Propagation::Never | Propagation::NotSupported, false) => {
                self.run_detached(session, options, deadline, &mut work).await
            }
            (Propagation::NotSupported, true) => {
                let mark = session.suspend();
                tracing::debug!("suspended ambient transaction");
                let result = self.run_detached(session, options, deadline, &mut work).await;
                session.resume(mark);
                result
            }
            (Propagation::Mandatory, false) => Err(E::from(TransactionError::Propagation {
                propagation,
                reason: "no active transaction",
            })),
            (Propagation::Never, true) => Err(E::from(TransactionError::Propagation {
                propagation,
                reason: "a transaction is active",
            })),
        }
    }

    async fn run_joined<T, E, F>(
        &self,
        session: &mut Session<M::Tx>,
        options: &TransactionOptions,
        deadline: Option<Deadline>,
        work: &mut F,
    ) -> Result<T, E>
    where
        F: for<'s> FnMut(&'s mut Session<M::Tx>) -> BoxFuture<'s, Result<T, E>> + Send,
        E: From<TransactionError>,
    {
        if let Some(current) = session.current() {
            if current.isolation_level != options.isolation_level {
                tracing::debug!(
                    requested = options.isolation_level.as_sql(),
                    active = current.isolation_level.as_sql(),
                    "joined transaction keeps its isolation level"
                );
            }
        }

        let mark = session.join();
        let outcome = bounded(deadline, work(session)).await;
        session.leave(mark);
        outcome.map_err(E::from)?
    }

    async fn run_owned<T, E, F>(
        &self,
        session: &mut Session<M::Tx>,
        options: &TransactionOptions,
        deadline: Option<Deadline>,
        work: &mut F,
    ) -> Result<T, E>
    where
        F: for<'s> FnMut(&'s mut Session<M::Tx>) -> BoxFuture<'s, Result<T, E>> + Send,
        E: From<TransactionError> + Classify + Display,
    {
        let backoff = options.backoff();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt_owned(session, options, deadline, work).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    self.before_retry(err, attempt, options, &backoff, deadline)
                        .await?;
                }
            }
        }
    }

    async fn attempt_owned<T, E, F>(
        &self,
        session: &mut Session<M::Tx>,
        options: &TransactionOptions,
        deadline: Option<Deadline>,
        work: &mut F,
    ) -> Result<T, E>
    where
        F: for<'s> FnMut(&'s mut Session<M::Tx>) -> BoxFuture<'s, Result<T, E>> + Send,
        E: From<TransactionError>,
    {
        let handle = bounded(deadline, self.manager.begin(options.isolation_level))
            .await
            .map_err(E::from)?
            .map_err(|e| E::from(TransactionError::from(e)))?;

        let transaction_id = TransactionId::new();
        let descriptor = TransactionDescriptor {
            transaction_id,
            depth: session.depth() + 1,
            isolation_level: options.isolation_level,
            propagation: options.propagation,
            suspended_parent: session.current().map(|d| d.transaction_id),
        };
        tracing::debug!(
            %transaction_id,
            suspended_parent = ?descriptor.suspended_parent,
            "began transaction"
        );

        let mark = session.begin_scope(descriptor, handle);
        let outcome = bounded(deadline, work(session)).await;
        let scoped = session
            .resume(mark)
            .filter(|active| active.descriptor.transaction_id == transaction_id)
            .ok_or_else(|| E::from(TransactionError::ScopeLost))?;

        match outcome {
            Ok(Ok(value)) => {
                bounded(deadline, self.manager.commit(scoped.handle))
                    .await
                    .map_err(E::from)?
                    .map_err(|e| E::from(TransactionError::from(e)))?;
                tracing::debug!(%transaction_id, "committed transaction");
                Ok(value)
            }
            Ok(Err(err)) => {
                self.rollback(transaction_id, scoped.handle).await;
                Err(err)
            }
            Err(timeout) => {
                self.rollback(transaction_id, scoped.handle).await;
                Err(E::from(timeout))
            }
        }
    }

    async fn run_detached<T, E, F>(
        &self,
        session: &mut Session<M::Tx>,
        options: &TransactionOptions,
        deadline: Option<Deadline>,
        work: &mut F,
    ) -> Result<T, E>
    where
        F: for<'s> FnMut(&'s mut Session<M::Tx>) -> BoxFuture<'s, Result<T, E>> + Send,
        E: From<TransactionError> + Classify + Display,
    {
        let backoff = options.backoff();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = bounded(deadline, work(session)).await.map_err(E::from)?;
            match outcome {
                Ok(value) => return Ok(value),
                Err(err) => {
                    self.before_retry(err, attempt, options, &backoff, deadline)
                        .await?;
                }
            }
        }
    }

    /// Decides whether the failed `attempt` may be retried and waits out the
    /// backoff. Hands the error back when giving up.
    async fn before_retry<E>(
        &self,
        err: E,
        attempt: u32,
        options: &TransactionOptions,
        backoff: &Backoff,
        deadline: Option<Deadline>,
    ) -> Result<(), E>
    where
        E: From<TransactionError> + Classify + Display,
    {
        if !err.is_retryable() {
            return Err(err);
        }
        if attempt > options.max_retries {
            tracing::warn!(attempt, error = %err, "giving up after retries exhausted");
            return Err(err);
        }

        let delay = backoff.delay(attempt);
        if let Some(deadline) = deadline {
            if Instant::now() + delay >= deadline.at {
                return Err(E::from(deadline.exceeded()));
            }
        }

        metrics::counter!("transaction_retries_total").increment(1);
        tracing::warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying after transient failure"
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }

    async fn rollback(&self, transaction_id: TransactionId, handle: M::Tx) {
        match self.manager.rollback(handle).await {
            Ok(()) => tracing::debug!(%transaction_id, "rolled back transaction"),
            Err(e) => tracing::error!(%transaction_id, error = %e, "rollback failed"),
        }
    }
}
