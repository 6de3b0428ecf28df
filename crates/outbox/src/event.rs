use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::EventId;

use crate::error::{OutboxError, Result};

/// Delivery state of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Not yet delivered; the dispatcher will pick it up.
    Pending,
    /// Accepted by the message bus.
    Dispatched,
    /// Delivery attempts are exhausted; needs operator attention.
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Dispatched => "dispatched",
            OutboxStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A row of the `outbox_events` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Unique identifier; consumers deduplicate on it.
    pub id: EventId,

    /// The type of aggregate that produced the event (e.g., "Account").
    pub aggregate_type: String,

    pub aggregate_id: String,

    /// The type of the event (e.g., "AccountCreated").
    pub event_type: String,

    pub payload: serde_json::Value,

    pub created_at: DateTime<Utc>,

    /// When the message bus accepted the event, if it has.
    pub dispatched_at: Option<DateTime<Utc>>,

    /// Failed delivery attempts so far.
    pub attempt_count: u32,

    /// Error from the most recent failed attempt.
    pub last_error: Option<String>,
}

impl OutboxEvent {
    /// Returns the delivery state given the dispatcher's attempt limit.
    pub fn status(&self, max_attempts: u32) -> OutboxStatus {
        if self.dispatched_at.is_some() {
            OutboxStatus::Dispatched
        } else if self.attempt_count >= max_attempts {
            OutboxStatus::Failed
        } else {
            OutboxStatus::Pending
        }
    }

    /// Returns true if the dispatcher may still claim this row.
    pub fn is_pending(&self, max_attempts: u32) -> bool {
        self.status(max_attempts) == OutboxStatus::Pending
    }
}

/// An event to be written to the outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxEvent {
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl NewOutboxEvent {
    /// Creates a new event builder.
    pub fn builder() -> NewOutboxEventBuilder {
        NewOutboxEventBuilder::default()
    }

    /// Assigns an identifier and creation time, producing a pending row.
    pub fn into_event(self) -> OutboxEvent {
        OutboxEvent {
            id: EventId::new(),
            aggregate_type: self.aggregate_type,
            aggregate_id: self.aggregate_id,
            event_type: self.event_type,
            payload: self.payload,
            created_at: Utc::now(),
            dispatched_at: None,
            attempt_count: 0,
            last_error: None,
        }
    }
}

/// Builder for [`NewOutboxEvent`].
#[derive(Debug, Default)]
pub struct NewOutboxEventBuilder {
    aggregate_type: Option<String>,
    aggregate_id: Option<String>,
    event_type: Option<String>,
    payload: Option<serde_json::Value>,
}

impl NewOutboxEventBuilder {
    /// Sets the aggregate type.
    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    /// Sets the aggregate ID.
    pub fn aggregate_id(mut self, aggregate_id: impl ToString) -> Self {
        self.aggregate_id = Some(aggregate_id.to_string());
        self
    }

    /// Sets the event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Builds the event, rejecting missing or blank fields.
    pub fn build(self) -> Result<NewOutboxEvent> {
        Ok(NewOutboxEvent {
            aggregate_type: required("aggregate_type", self.aggregate_type)?,
            aggregate_id: required("aggregate_id", self.aggregate_id)?,
            event_type: required("event_type", self.event_type)?,
            payload: self
                .payload
                .ok_or_else(|| OutboxError::InvalidEvent("payload is required".to_string()))?,
        })
    }
}

fn required(field: &'static str, value: Option<String>) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(OutboxError::InvalidEvent(format!("{field} is required"))),
    }
}
