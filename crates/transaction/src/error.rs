//! Transaction error types and failure classification.

use std::time::Duration;

use thiserror::Error;

use crate::propagation::Propagation;

/// How a failure should be treated by retrying callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Invalid use of the API (e.g. `Mandatory` without a transaction).
    /// Fatal, never retried.
    Programming,
    /// Deadlocks, serialization conflicts, connection trouble. Retried.
    Transient,
    /// Constraint violations and validation failures. Never retried.
    BusinessRule,
    /// The unit of work ran out of time. Never retried.
    Timeout,
}

impl FailureKind {
    /// Returns true if an operation failing this way may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Transient)
    }
}

/// Maps an error onto the retry taxonomy.
pub trait Classify {
    /// Returns how this failure should be treated.
    fn failure_kind(&self) -> FailureKind;

    /// Shorthand for `self.failure_kind().is_retryable()`.
    fn is_retryable(&self) -> bool {
        self.failure_kind().is_retryable()
    }
}

/// Stable error codes that database drivers map their failures into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbErrorCode {
    Deadlock,
    SerializationFailure,
    LockNotAvailable,
    ConnectionFailure,
    PoolTimeout,
    Network,
    UniqueViolation,
    ForeignKeyViolation,
    NotNullViolation,
    CheckViolation,
    Validation,
    NotFound,
    Other,
}

impl DbErrorCode {
    /// Returns the code name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DbErrorCode::Deadlock => "deadlock",
            DbErrorCode::SerializationFailure => "serialization_failure",
            DbErrorCode::LockNotAvailable => "lock_not_available",
            DbErrorCode::ConnectionFailure => "connection_failure",
            DbErrorCode::PoolTimeout => "pool_timeout",
            DbErrorCode::Network => "network",
            DbErrorCode::UniqueViolation => "unique_violation",
            DbErrorCode::ForeignKeyViolation => "foreign_key_violation",
            DbErrorCode::NotNullViolation => "not_null_violation",
            DbErrorCode::CheckViolation => "check_violation",
            DbErrorCode::Validation => "validation",
            DbErrorCode::NotFound => "not_found",
            DbErrorCode::Other => "other",
        }
    }

    /// Returns true for codes worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DbErrorCode::Deadlock
                | DbErrorCode::SerializationFailure
                | DbErrorCode::LockNotAvailable
                | DbErrorCode::ConnectionFailure
                | DbErrorCode::PoolTimeout
                | DbErrorCode::Network
        )
    }
}

impl std::fmt::Display for DbErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classified database failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct DbError {
    pub code: DbErrorCode,
    pub message: String,
}

impl DbError {
    /// Creates a database error with the given code.
    pub fn new(code: DbErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl Classify for DbError {
    fn failure_kind(&self) -> FailureKind {
        if self.code.is_transient() {
            FailureKind::Transient
        } else {
            FailureKind::BusinessRule
        }
    }
}

/// Errors raised by the transaction wrapper itself.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The propagation mode forbids running in the current context.
    #[error("Propagation '{propagation}' violated: {reason}")]
    Propagation {
        propagation: Propagation,
        reason: &'static str,
    },

    /// The session no longer holds the transaction this scope opened.
    #[error("Transaction scope lost before completion")]
    ScopeLost,

    /// Beginning, committing or rolling back failed.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// The unit of work, including retries, exceeded its timeout.
    #[error("Transaction timed out after {0:?}")]
    Timeout(Duration),
}

impl Classify for TransactionError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            TransactionError::Propagation { .. } | TransactionError::ScopeLost => {
                FailureKind::Programming
            }
            TransactionError::Database(e) => e.failure_kind(),
            TransactionError::Timeout(_) => FailureKind::Timeout,
        }
    }
}

/// Convenience type alias for transaction results.
pub type Result<T> = std::result::Result<T, TransactionError>;
