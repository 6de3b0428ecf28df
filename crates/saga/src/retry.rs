use std::time::Duration;

/// Per-step retry policy.
///
/// A step with a retry policy is attempted up to `1 + max_retries` times.
/// The pause after attempt `n` is `delay * backoff_multiplier^(n-1)`.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `delay`: 100 milliseconds
/// - `backoff_multiplier`: 2.0
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_retries,
            delay,
            backoff_multiplier,
        }
    }

    /// Total attempts allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Pause after the given failed attempt (1-based).
    ///
    /// Falls back to the base delay when the product is not a valid duration.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(self.delay)
    }
}
