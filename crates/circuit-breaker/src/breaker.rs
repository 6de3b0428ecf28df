//! The circuit breaker state machine.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::error::CircuitBreakerError;

/// The state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls pass through; consecutive failures are counted.
    Closed,
    /// Calls are short-circuited until the reset timeout elapses.
    Open,
    /// One trial call at a time is admitted to probe recovery.
    HalfOpen,
}

impl CircuitState {
    /// Returns the state name as used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time view of a breaker's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerSnapshot {
    /// The protected dependency's name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Failures since the last success (or since the circuit last opened).
    pub consecutive_failures: u32,
    /// Trial successes accumulated while half-open.
    pub consecutive_successes: u32,
    /// When the circuit last opened, if it is open or half-open.
    pub opened_at: Option<Instant>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Guards calls to one downstream dependency.
///
/// One instance is shared (usually behind an `Arc`) by every caller that
/// targets the same dependency; counters are kept behind a mutex that is
/// never held across an await point.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker for the named dependency.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Returns the protected dependency's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the breaker configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns the current state.
    ///
    /// An open circuit whose timeout has elapsed still reports `Open` until
    /// the next call moves it to `HalfOpen`.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Returns a copy of the current counters.
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.lock();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            opened_at: inner.opened_at,
        }
    }

    /// Runs `f` through the breaker.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitBreakerError::Open`] without calling `f` while the
    /// circuit is open, and [`CircuitBreakerError::Inner`] when `f` fails.
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(permit) = self.try_acquire() else {
            metrics::counter!("circuit_breaker_rejections_total", "breaker" => self.name.clone())
                .increment(1);
            tracing::debug!(breaker = %self.name, "circuit open, call short-circuited");
            return Err(CircuitBreakerError::Open {
                name: self.name.clone(),
            });
        };

        match f().await {
            Ok(value) => {
                permit.succeeded();
                Ok(value)
            }
            Err(err) => {
                permit.failed();
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    /// Runs `f` through the breaker, serving `fallback` instead of failing.
    ///
    /// The fallback is used when the circuit short-circuits the call and
    /// when `f` itself fails; the failure still counts toward opening.
    pub async fn execute_with_fallback<F, Fut, T, E, FB, FbFut>(&self, f: F, fallback: FB) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        FB: FnOnce() -> FbFut,
        FbFut: Future<Output = T>,
    {
        match self.execute(f).await {
            Ok(value) => value,
            Err(CircuitBreakerError::Open { .. }) => fallback().await,
            Err(CircuitBreakerError::Inner(err)) => {
                tracing::warn!(breaker = %self.name, error = %err, "call failed, serving fallback");
                fallback().await
            }
        }
    }

    /// Forces the breaker back to `Closed` and clears all counters.
    pub fn reset(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Some(Permit::new(self, false)),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .is_none_or(|opened| opened.elapsed() >= self.config.reset_timeout);
                if !elapsed {
                    return None;
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.consecutive_successes = 0;
                inner.trial_in_flight = true;
                Some(Permit::new(self, true))
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return None;
                }
                inner.trial_in_flight = true;
                Some(Permit::new(self, true))
            }
        }
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        match (inner.state, trial) {
            (CircuitState::Closed, _) => {
                inner.consecutive_failures = 0;
            }
            (CircuitState::HalfOpen, true) => {
                inner.trial_in_flight = false;
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.opened_at = None;
                }
            }
            // A call admitted while closed that finished after the circuit
            // tripped says nothing about recovery.
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.lock();
        match (inner.state, trial) {
            (CircuitState::Closed, _) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                    inner.opened_at = Some(Instant::now());
                }
            }
            (CircuitState::HalfOpen, true) => {
                inner.trial_in_flight = false;
                inner.consecutive_failures += 1;
                inner.consecutive_successes = 0;
                self.transition(&mut inner, CircuitState::Open);
                inner.opened_at = Some(Instant::now());
            }
            _ => {}
        }
    }

    fn release_trial(&self) {
        self.lock().trial_in_flight = false;
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        metrics::counter!(
            "circuit_breaker_transitions_total",
            "breaker" => self.name.clone(),
            "to" => to.as_str()
        )
        .increment(1);
        match to {
            CircuitState::Open => tracing::warn!(
                breaker = %self.name,
                %from,
                failures = inner.consecutive_failures,
                "circuit opened"
            ),
            CircuitState::HalfOpen => {
                tracing::info!(breaker = %self.name, %from, "circuit half-open, admitting trial call")
            }
            CircuitState::Closed => tracing::info!(breaker = %self.name, %from, "circuit closed"),
        }
    }
}

/// Admission to run one call; reports the outcome back to the breaker.
///
/// A trial permit dropped without an outcome (the call was cancelled) frees
/// the half-open slot without counting either way.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    fn succeeded(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    fn failed(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.release_trial();
        }
    }
}
