//! Transactional outbox.
//!
//! Events are written to the `outbox_events` table through the caller's
//! business transaction with [`Outbox::publish`], so an event exists exactly
//! when the change that produced it committed. A separate
//! [`OutboxDispatcher`] drains pending rows to a [`MessageBus`] through a
//! circuit breaker. Delivery is at least once; consumers deduplicate on the
//! event ID.

pub mod bus;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod store;

pub use bus::{BusError, InMemoryMessageBus, Message, MessageBus, topic_for};
pub use common::EventId;
pub use dispatcher::{DispatchReport, DispatcherConfig, OutboxDispatcher};
pub use error::{OutboxError, Result};
pub use event::{NewOutboxEvent, NewOutboxEventBuilder, OutboxEvent, OutboxStatus};
pub use memory::{InMemoryClaim, InMemoryOutboxStore};
pub use outbox::Outbox;
pub use postgres::{PgNotifyBus, PgOutboxClaim, PostgresOutboxStore};
pub use store::{OutboxClaim, OutboxStore};
