//! Options for a transactional unit of work.

use std::time::Duration;

use crate::backoff::Backoff;
use crate::propagation::{IsolationLevel, Propagation};

/// Options controlling how [`Transactional::run`](crate::Transactional::run)
/// scopes and retries a unit of work.
///
/// # Default Values
///
/// - `propagation`: `Required`
/// - `isolation_level`: `ReadCommitted`
/// - `timeout`: none
/// - `max_retries`: 3
/// - `retry_delay`: 100ms (backoff base)
/// - `max_retry_delay`: 5 seconds (backoff cap)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOptions {
    pub propagation: Propagation,
    pub isolation_level: IsolationLevel,
    /// Bounds the whole unit, retries and backoff included.
    pub timeout: Option<Duration>,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            propagation: Propagation::Required,
            isolation_level: IsolationLevel::ReadCommitted,
            timeout: None,
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(5),
        }
    }
}

impl TransactionOptions {
    /// Creates default options with the given propagation mode.
    pub fn new(propagation: Propagation) -> Self {
        Self {
            propagation,
            ..Self::default()
        }
    }

    pub fn required() -> Self {
        Self::new(Propagation::Required)
    }

    pub fn requires_new() -> Self {
        Self::new(Propagation::RequiresNew)
    }

    pub fn supports() -> Self {
        Self::new(Propagation::Supports)
    }

    pub fn mandatory() -> Self {
        Self::new(Propagation::Mandatory)
    }

    pub fn never() -> Self {
        Self::new(Propagation::Never)
    }

    pub fn not_supported() -> Self {
        Self::new(Propagation::NotSupported)
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_isolation(mut self, isolation_level: IsolationLevel) -> Self {
        self.isolation_level = isolation_level;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    #[must_use]
    pub fn with_max_retry_delay(mut self, max_retry_delay: Duration) -> Self {
        self.max_retry_delay = max_retry_delay;
        self
    }

    /// Returns the backoff derived from the retry delay settings.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.retry_delay, self.max_retry_delay)
    }
}
