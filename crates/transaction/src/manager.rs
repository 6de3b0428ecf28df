//! Persistence collaborator interface.

use async_trait::async_trait;

use crate::error::DbError;
use crate::propagation::IsolationLevel;

/// Begins, commits and rolls back driver transactions.
///
/// Implementations map driver failures into [`DbError`] so the retry
/// wrapper can classify them. A handle dropped without `commit` or
/// `rollback` must be rolled back by the driver.
#[async_trait]
pub trait TransactionManager: Send + Sync {
    /// The driver's transaction handle.
    type Tx: Send;

    /// Begins a transaction at the given isolation level.
    async fn begin(&self, isolation: IsolationLevel) -> Result<Self::Tx, DbError>;

    /// Commits the transaction.
    async fn commit(&self, tx: Self::Tx) -> Result<(), DbError>;

    /// Rolls the transaction back.
    async fn rollback(&self, tx: Self::Tx) -> Result<(), DbError>;
}
