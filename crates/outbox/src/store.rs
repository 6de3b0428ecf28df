use async_trait::async_trait;

use common::EventId;

use crate::Result;
use crate::event::OutboxEvent;

/// Persistence for outbox rows.
///
/// Writes go through the caller's business transaction (`Self::Tx`) so the
/// row exists exactly when the business change does. Reads and claims use
/// the store's own connections.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// The business transaction handle rows are inserted through.
    type Tx: Send;

    /// A batch of rows locked for delivery.
    type Claim: OutboxClaim;

    /// Inserts a pending row inside `tx`. Visible only after `tx` commits.
    async fn insert(&self, tx: &mut Self::Tx, event: &OutboxEvent) -> Result<()>;

    /// Locks up to `limit` pending rows, oldest first.
    ///
    /// Rows with `attempt_count >= max_attempts` are never claimed. Rows
    /// locked by another claim are skipped, so concurrent dispatchers never
    /// receive the same row.
    async fn claim_pending(&self, limit: usize, max_attempts: u32) -> Result<Self::Claim>;

    /// Retrieves a row by ID.
    async fn get(&self, id: EventId) -> Result<Option<OutboxEvent>>;

    /// Counts rows still eligible for delivery.
    async fn pending_count(&self, max_attempts: u32) -> Result<u64>;

    /// Counts rows whose attempts are exhausted.
    async fn failed_count(&self, max_attempts: u32) -> Result<u64>;
}

/// Rows claimed for delivery.
///
/// Outcomes recorded with `mark_*` take effect on [`finish`](Self::finish).
/// Dropping the claim unfinished releases the rows unchanged, so anything
/// already handed to the bus is delivered again.
#[async_trait]
pub trait OutboxClaim: Send {
    /// The claimed rows in `created_at` order.
    fn events(&self) -> &[OutboxEvent];

    /// Records that the bus accepted the row.
    async fn mark_dispatched(&mut self, id: EventId) -> Result<()>;

    /// Records a failed delivery: increments `attempt_count` and sets
    /// `last_error`. The row stays pending until its attempts run out.
    async fn mark_failed(&mut self, id: EventId, error: &str) -> Result<()>;

    /// Applies the recorded outcomes and releases the rows.
    async fn finish(self) -> Result<()>;
}
