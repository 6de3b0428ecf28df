use thiserror::Error;

use common::EventId;
use transaction::{Classify, DbError, FailureKind, TransactionError};

use crate::bus::BusError;

/// Errors that can occur when writing or dispatching outbox events.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// The event is missing a required field.
    #[error("Invalid outbox event: {0}")]
    InvalidEvent(String),

    /// An outcome was recorded for a row the claim does not hold.
    #[error("Event {0} is not part of this claim")]
    NotClaimed(EventId),

    /// The write path could not run in the caller's transaction.
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// The message bus rejected or failed a publish.
    #[error("Message bus error: {0}")]
    Bus(#[from] BusError),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for OutboxError {
    fn from(err: sqlx::Error) -> Self {
        OutboxError::Database(DbError::from(err))
    }
}

impl Classify for OutboxError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            OutboxError::Transaction(e) => e.failure_kind(),
            OutboxError::Database(e) => e.failure_kind(),
            OutboxError::Bus(e) if e.is_transient() => FailureKind::Transient,
            OutboxError::NotClaimed(_) | OutboxError::Migration(_) => FailureKind::Programming,
            OutboxError::InvalidEvent(_) | OutboxError::Bus(_) | OutboxError::Serialization(_) => {
                FailureKind::BusinessRule
            }
        }
    }
}

/// Result type for outbox operations.
pub type Result<T> = std::result::Result<T, OutboxError>;
