//! Relay configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use circuit_breaker::CircuitBreakerConfig;
use outbox::DispatcherConfig;
use thiserror::Error;

/// Errors raised while reading configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable is set but cannot be parsed.
    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Relay configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `5`)
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `RELAY_BATCH_SIZE`: rows claimed per round (default: `100`)
/// - `RELAY_POLL_INTERVAL_MS`: idle pause between rounds (default: `1000`)
/// - `RELAY_MAX_ATTEMPTS`: deliveries before a row is failed (default: `10`)
/// - `BREAKER_FAILURE_THRESHOLD`: failures before the bus breaker opens (default: `5`)
/// - `BREAKER_SUCCESS_THRESHOLD`: trial successes to close it (default: `2`)
/// - `BREAKER_RESET_TIMEOUT_MS`: open duration before a trial (default: `30000`)
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub breaker_failure_threshold: u32,
    pub breaker_success_threshold: u32,
    pub breaker_reset_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`, which returns a variable's value
    /// if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        Ok(Self {
            database_url,
            database_max_connections: parse_or(
                &lookup,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "PORT", defaults.port)?,
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            batch_size: parse_or(&lookup, "RELAY_BATCH_SIZE", defaults.batch_size)?,
            poll_interval: Duration::from_millis(parse_or(
                &lookup,
                "RELAY_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )?),
            max_attempts: parse_or(&lookup, "RELAY_MAX_ATTEMPTS", defaults.max_attempts)?,
            breaker_failure_threshold: parse_or(
                &lookup,
                "BREAKER_FAILURE_THRESHOLD",
                defaults.breaker_failure_threshold,
            )?,
            breaker_success_threshold: parse_or(
                &lookup,
                "BREAKER_SUCCESS_THRESHOLD",
                defaults.breaker_success_threshold,
            )?,
            breaker_reset_timeout: Duration::from_millis(parse_or(
                &lookup,
                "BREAKER_RESET_TIMEOUT_MS",
                defaults.breaker_reset_timeout.as_millis() as u64,
            )?),
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig::default()
            .with_batch_size(self.batch_size)
            .with_poll_interval(self.poll_interval)
            .with_max_attempts(self.max_attempts)
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new()
            .failure_threshold(self.breaker_failure_threshold)
            .success_threshold(self.breaker_success_threshold)
            .reset_timeout(self.breaker_reset_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        let dispatcher = DispatcherConfig::default();
        let breaker = CircuitBreakerConfig::default();
        Self {
            database_url: String::new(),
            database_max_connections: 5,
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            batch_size: dispatcher.batch_size,
            poll_interval: dispatcher.poll_interval,
            max_attempts: dispatcher.max_attempts,
            breaker_failure_threshold: breaker.failure_threshold,
            breaker_success_threshold: breaker.success_threshold,
            breaker_reset_timeout: breaker.reset_timeout,
        }
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
