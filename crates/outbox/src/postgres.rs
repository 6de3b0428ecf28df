use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use common::EventId;
use transaction::DbError;

use crate::bus::{BusError, Message, MessageBus};
use crate::error::{OutboxError, Result};
use crate::event::OutboxEvent;
use crate::store::{OutboxClaim, OutboxStore};

const SELECT_COLUMNS: &str = "id, aggregate_type, aggregate_id, event_type, payload, created_at, \
     dispatched_at, attempt_count, last_error";

fn attempts_param(max_attempts: u32) -> i32 {
    i32::try_from(max_attempts).unwrap_or(i32::MAX)
}

fn row_to_event(row: PgRow) -> Result<OutboxEvent> {
    let attempt_count: i32 = row.try_get("attempt_count")?;
    Ok(OutboxEvent {
        id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
        aggregate_type: row.try_get("aggregate_type")?,
        aggregate_id: row.try_get("aggregate_id")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        created_at: row.try_get("created_at")?,
        dispatched_at: row.try_get("dispatched_at")?,
        attempt_count: u32::try_from(attempt_count).unwrap_or(0),
        last_error: row.try_get("last_error")?,
    })
}

/// PostgreSQL-backed outbox store.
#[derive(Debug, Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    /// Creates a new PostgreSQL outbox store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    type Tx = Transaction<'static, Postgres>;
    type Claim = PgOutboxClaim;

    async fn insert(&self, tx: &mut Self::Tx, event: &OutboxEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events (id, aggregate_type, aggregate_id, event_type, payload, created_at, attempt_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(&event.aggregate_type)
        .bind(&event.aggregate_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.created_at)
        .bind(attempts_param(event.attempt_count))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn claim_pending(&self, limit: usize, max_attempts: u32) -> Result<PgOutboxClaim> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM outbox_events
            WHERE dispatched_at IS NULL AND attempt_count < $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#
        ))
        .bind(attempts_param(max_attempts))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .await?;

        let events = rows
            .into_iter()
            .map(row_to_event)
            .collect::<Result<Vec<_>>>()?;

        Ok(PgOutboxClaim { tx, events })
    }

    async fn get(&self, id: EventId) -> Result<Option<OutboxEvent>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_events WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_event).transpose()
    }

    async fn pending_count(&self, max_attempts: u32) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM outbox_events WHERE dispatched_at IS NULL AND attempt_count < $1",
        )
        .bind(attempts_param(max_attempts))
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn failed_count(&self, max_attempts: u32) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM outbox_events WHERE dispatched_at IS NULL AND attempt_count >= $1",
        )
        .bind(attempts_param(max_attempts))
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }
}

/// Rows locked by a `FOR UPDATE SKIP LOCKED` claim transaction.
///
/// Dropping the claim rolls the transaction back and releases the locks.
pub struct PgOutboxClaim {
    tx: Transaction<'static, Postgres>,
    events: Vec<OutboxEvent>,
}

impl std::fmt::Debug for PgOutboxClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgOutboxClaim")
            .field("events", &self.events.len())
            .finish_non_exhaustive()
    }
}

impl PgOutboxClaim {
    fn ensure_claimed(&self, id: EventId) -> Result<()> {
        if self.events.iter().any(|e| e.id == id) {
            Ok(())
        } else {
            Err(OutboxError::NotClaimed(id))
        }
    }
}

#[async_trait]
impl OutboxClaim for PgOutboxClaim {
    fn events(&self) -> &[OutboxEvent] {
        &self.events
    }

    async fn mark_dispatched(&mut self, id: EventId) -> Result<()> {
        self.ensure_claimed(id)?;
        sqlx::query("UPDATE outbox_events SET dispatched_at = NOW() WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn mark_failed(&mut self, id: EventId, error: &str) -> Result<()> {
        self.ensure_claimed(id)?;
        sqlx::query(
            "UPDATE outbox_events SET attempt_count = attempt_count + 1, last_error = $2 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(error)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn finish(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// Largest `NOTIFY` payload PostgreSQL accepts, exclusive.
pub const NOTIFY_PAYLOAD_LIMIT: usize = 8000;

/// Message bus over PostgreSQL `NOTIFY`.
///
/// Each message is sent with `pg_notify(topic, body)` where the body is the
/// JSON object `{"key", "headers", "payload"}`. Listeners subscribe with
/// `LISTEN "<topic>"`.
#[derive(Debug, Clone)]
pub struct PgNotifyBus {
    pool: PgPool,
}

impl PgNotifyBus {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Serializes the `NOTIFY` body for a message.
    pub fn body(message: &Message) -> std::result::Result<String, BusError> {
        let body = serde_json::to_string(&serde_json::json!({
            "key": message.key,
            "headers": message.headers,
            "payload": message.payload,
        }))?;
        if body.len() >= NOTIFY_PAYLOAD_LIMIT {
            return Err(BusError::PayloadTooLarge {
                size: body.len(),
                limit: NOTIFY_PAYLOAD_LIMIT,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl MessageBus for PgNotifyBus {
    async fn publish(&self, message: &Message) -> std::result::Result<(), BusError> {
        let body = Self::body(message)?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&message.topic)
            .bind(body)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                let err = DbError::from(e);
                if err.code.is_transient() {
                    BusError::Unavailable(err.to_string())
                } else {
                    BusError::Rejected(err.to_string())
                }
            })?;
        Ok(())
    }
}
