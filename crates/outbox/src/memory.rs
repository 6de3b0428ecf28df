use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use common::EventId;
use transaction::InMemoryTx;

use crate::error::{OutboxError, Result};
use crate::event::OutboxEvent;
use crate::store::{OutboxClaim, OutboxStore};

#[derive(Debug, Default)]
struct StoreState {
    rows: Vec<OutboxEvent>,
    locked: HashSet<EventId>,
}

type SharedState = Arc<Mutex<StoreState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, StoreState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory outbox store for testing.
///
/// Inserts are staged on the [`InMemoryTx`] and appear only when it commits.
/// Claimed rows are locked until the claim is finished or dropped.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOutboxStore {
    state: SharedState,
}

impl InMemoryOutboxStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every committed row in insertion order.
    pub fn events(&self) -> Vec<OutboxEvent> {
        lock(&self.state).rows.clone()
    }

    /// Returns the number of committed rows.
    pub fn len(&self) -> usize {
        lock(&self.state).rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    type Tx = InMemoryTx;
    type Claim = InMemoryClaim;

    async fn insert(&self, tx: &mut InMemoryTx, event: &OutboxEvent) -> Result<()> {
        let state = Arc::clone(&self.state);
        let event = event.clone();
        tx.stage(move || lock(&state).rows.push(event));
        Ok(())
    }

    async fn claim_pending(&self, limit: usize, max_attempts: u32) -> Result<InMemoryClaim> {
        let mut state = lock(&self.state);
        let mut events: Vec<OutboxEvent> = state
            .rows
            .iter()
            .filter(|e| e.is_pending(max_attempts) && !state.locked.contains(&e.id))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.created_at);
        events.truncate(limit);

        state.locked.extend(events.iter().map(|e| e.id));

        Ok(InMemoryClaim {
            state: Arc::clone(&self.state),
            events,
            outcomes: Vec::new(),
        })
    }

    async fn get(&self, id: EventId) -> Result<Option<OutboxEvent>> {
        Ok(lock(&self.state).rows.iter().find(|e| e.id == id).cloned())
    }

    async fn pending_count(&self, max_attempts: u32) -> Result<u64> {
        let state = lock(&self.state);
        Ok(state.rows.iter().filter(|e| e.is_pending(max_attempts)).count() as u64)
    }

    async fn failed_count(&self, max_attempts: u32) -> Result<u64> {
        let state = lock(&self.state);
        Ok(state
            .rows
            .iter()
            .filter(|e| e.dispatched_at.is_none() && e.attempt_count >= max_attempts)
            .count() as u64)
    }
}

#[derive(Debug)]
enum Outcome {
    Dispatched(DateTime<Utc>),
    Failed(String),
}

/// Rows claimed from an [`InMemoryOutboxStore`].
#[derive(Debug)]
pub struct InMemoryClaim {
    state: SharedState,
    events: Vec<OutboxEvent>,
    outcomes: Vec<(EventId, Outcome)>,
}

impl InMemoryClaim {
    fn ensure_claimed(&self, id: EventId) -> Result<()> {
        if self.events.iter().any(|e| e.id == id) {
            Ok(())
        } else {
            Err(OutboxError::NotClaimed(id))
        }
    }
}

#[async_trait]
impl OutboxClaim for InMemoryClaim {
    fn events(&self) -> &[OutboxEvent] {
        &self.events
    }

    async fn mark_dispatched(&mut self, id: EventId) -> Result<()> {
        self.ensure_claimed(id)?;
        self.outcomes.push((id, Outcome::Dispatched(Utc::now())));
        Ok(())
    }

    async fn mark_failed(&mut self, id: EventId, error: &str) -> Result<()> {
        self.ensure_claimed(id)?;
        self.outcomes.push((id, Outcome::Failed(error.to_string())));
        Ok(())
    }

    async fn finish(mut self) -> Result<()> {
        let outcomes = std::mem::take(&mut self.outcomes);
        let mut state = lock(&self.state);
        for (id, outcome) in outcomes {
            if let Some(row) = state.rows.iter_mut().find(|e| e.id == id) {
                match outcome {
                    Outcome::Dispatched(at) => row.dispatched_at = Some(at),
                    Outcome::Failed(error) => {
                        row.attempt_count += 1;
                        row.last_error = Some(error);
                    }
                }
            }
        }
        Ok(())
    }
}

impl Drop for InMemoryClaim {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        for event in &self.events {
            state.locked.remove(&event.id);
        }
    }
}
