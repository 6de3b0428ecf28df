//! Circuit breaker configuration.

use std::time::Duration;

/// Thresholds and timing for a [`CircuitBreaker`](crate::CircuitBreaker).
///
/// # Default Values
///
/// - `failure_threshold`: 5
/// - `success_threshold`: 2
/// - `reset_timeout`: 30 seconds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in `Closed` before the circuit opens.
    pub failure_threshold: u32,
    /// Consecutive trial successes in `HalfOpen` before the circuit closes.
    pub success_threshold: u32,
    /// How long the circuit stays `Open` before admitting a trial call.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates a config with default thresholds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure threshold. Values below 1 are raised to 1.
    #[must_use]
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Sets the success threshold. Values below 1 are raised to 1.
    #[must_use]
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    /// Sets the open-state reset timeout.
    #[must_use]
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}
