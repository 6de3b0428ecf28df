//! Circuit breaker for protecting calls to downstream dependencies.
//!
//! A breaker counts consecutive failures of the calls it wraps. Once the
//! failure threshold is reached it opens and short-circuits every call for
//! the reset timeout, then lets a single trial call through at a time. Enough
//! trial successes close it again; any trial failure reopens it.
//!
//! ```text
//! Closed ──(failures ≥ threshold)──► Open ──(reset timeout)──► HalfOpen
//!    ▲                                 ▲                          │
//!    │                                 └───────(trial fails)──────┤
//!    └────────────(successes ≥ threshold)─────────────────────────┘
//! ```

pub mod breaker;
pub mod config;
pub mod error;
pub mod registry;

pub use breaker::{CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
pub use config::CircuitBreakerConfig;
pub use error::CircuitBreakerError;
pub use registry::CircuitBreakerRegistry;
