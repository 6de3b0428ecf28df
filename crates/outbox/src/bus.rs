//! Message bus collaborator.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::OutboxEvent;

/// Errors returned by a message bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The broker could not be reached or did not acknowledge in time.
    #[error("Bus unavailable: {0}")]
    Unavailable(String),

    /// The broker refused the message.
    #[error("Message rejected: {0}")]
    Rejected(String),

    #[error("Message body of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BusError {
    /// Returns true if publishing the same message again may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, BusError::Unavailable(_))
    }
}

/// A message as handed to the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    /// Partitioning key; events of one aggregate share it.
    pub key: String,
    pub payload: serde_json::Value,
    pub headers: BTreeMap<String, String>,
}

impl Message {
    /// Builds the message for an outbox row.
    ///
    /// The topic is `"{aggregate type, lowercased}-events"` and the key is
    /// the aggregate ID. The `attempt` header counts this delivery, from 1.
    pub fn from_event(event: &OutboxEvent) -> Self {
        let headers = BTreeMap::from([
            ("event-id".to_string(), event.id.to_string()),
            ("event-type".to_string(), event.event_type.clone()),
            ("aggregate-type".to_string(), event.aggregate_type.clone()),
            ("created-at".to_string(), event.created_at.to_rfc3339()),
            ("attempt".to_string(), (event.attempt_count + 1).to_string()),
        ]);

        Self {
            topic: topic_for(&event.aggregate_type),
            key: event.aggregate_id.clone(),
            payload: event.payload.clone(),
            headers,
        }
    }

    /// Returns a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Returns the topic events of the given aggregate type are published to.
pub fn topic_for(aggregate_type: &str) -> String {
    format!("{}-events", aggregate_type.to_lowercase())
}

/// Publishes messages to a broker.
///
/// `publish` returning `Ok` means the broker accepted the message.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, message: &Message) -> Result<(), BusError>;
}

#[derive(Debug, Default)]
struct BusState {
    published: Vec<Message>,
    failures: VecDeque<BusError>,
    unavailable: bool,
}

/// In-memory message bus for testing.
///
/// Records accepted messages and can be scripted to fail.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMessageBus {
    state: Arc<Mutex<BusState>>,
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next publish fail with `error`.
    pub fn fail_next(&self, error: BusError) {
        self.lock().failures.push_back(error);
    }

    /// Makes every publish fail until called again with `false`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Returns every accepted message in publish order.
    pub fn published(&self) -> Vec<Message> {
        self.lock().published.clone()
    }

    /// Returns how many accepted messages carry the given event ID.
    pub fn deliveries_of(&self, event_id: &str) -> usize {
        self.lock()
            .published
            .iter()
            .filter(|m| m.header("event-id") == Some(event_id))
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, message: &Message) -> Result<(), BusError> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(BusError::Unavailable("broker is down".to_string()));
        }
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        state.published.push(message.clone());
        Ok(())
    }
}
