//! End-to-end outbox flow over the in-memory store, bus and transaction
//! manager.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use outbox::{
    BusError, DispatcherConfig, InMemoryMessageBus, InMemoryOutboxStore, Message, MessageBus,
    NewOutboxEvent, Outbox, OutboxDispatcher, OutboxEvent, OutboxStatus, OutboxStore,
};
use transaction::{InMemoryTransactionManager, TransactionOptions, Transactional};

struct Harness {
    transactional: Transactional<InMemoryTransactionManager>,
    outbox: Outbox<InMemoryOutboxStore, InMemoryTransactionManager>,
    store: Arc<InMemoryOutboxStore>,
}

impl Harness {
    fn new() -> Self {
        let transactional = Transactional::new(InMemoryTransactionManager::new());
        let store = Arc::new(InMemoryOutboxStore::new());
        let outbox = Outbox::from_arc(Arc::clone(&store), transactional.clone());
        Self {
            transactional,
            outbox,
            store,
        }
    }

    /// Commits one outbox row per aggregate ID in a single business
    /// transaction.
    async fn commit_events(&self, ids: &[&str]) -> Vec<OutboxEvent> {
        let mut session = self.transactional.session();
        let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        self.transactional
            .run(&mut session, &TransactionOptions::required(), |s| {
                let outbox = self.outbox.clone();
                let ids = ids.clone();
                Box::pin(async move {
                    let mut rows = Vec::new();
                    for id in ids {
                        let event = NewOutboxEvent::builder()
                            .aggregate_type("Account")
                            .aggregate_id(&id)
                            .event_type("AccountCreated")
                            .payload_raw(serde_json::json!({ "account_id": id }))
                            .build()?;
                        rows.push(outbox.publish(s, event).await?);
                    }
                    Ok::<_, outbox::OutboxError>(rows)
                })
            })
            .await
            .unwrap()
    }

    fn dispatcher<B: MessageBus>(
        &self,
        bus: Arc<B>,
        breaker: CircuitBreakerConfig,
        config: DispatcherConfig,
    ) -> OutboxDispatcher<InMemoryOutboxStore, B> {
        OutboxDispatcher::new(
            Arc::clone(&self.store),
            bus,
            Arc::new(CircuitBreaker::new("message-bus", breaker)),
            config,
        )
    }
}

#[tokio::test]
async fn test_committed_event_is_dispatched_once() {
    let harness = Harness::new();
    let bus = Arc::new(InMemoryMessageBus::new());
    let dispatcher = harness.dispatcher(
        Arc::clone(&bus),
        CircuitBreakerConfig::default(),
        DispatcherConfig::default(),
    );
    let rows = harness.commit_events(&["acc-1"]).await;

    let report = dispatcher.dispatch_once().await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.dispatched, 1);

    let published = bus.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "account-events");
    assert_eq!(published[0].key, "acc-1");
    assert_eq!(
        published[0].header("event-id"),
        Some(rows[0].id.to_string().as_str())
    );

    let stored = harness.store.get(rows[0].id).await.unwrap().unwrap();
    assert_eq!(stored.status(10), OutboxStatus::Dispatched);

    let report = dispatcher.dispatch_once().await.unwrap();
    assert_eq!(report.claimed, 0);
    assert_eq!(bus.published().len(), 1);
}

#[tokio::test]
async fn test_batches_follow_creation_order() {
    let harness = Harness::new();
    let bus = Arc::new(InMemoryMessageBus::new());
    let dispatcher = harness.dispatcher(
        Arc::clone(&bus),
        CircuitBreakerConfig::default(),
        DispatcherConfig::default().with_batch_size(2),
    );
    harness.commit_events(&["a", "b", "c"]).await;

    assert_eq!(dispatcher.dispatch_once().await.unwrap().dispatched, 2);
    assert_eq!(dispatcher.dispatch_once().await.unwrap().dispatched, 1);

    let keys: Vec<String> = bus.published().into_iter().map(|m| m.key).collect();
    assert_eq!(keys, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_failed_publish_records_attempt_and_stays_pending() {
    let harness = Harness::new();
    let bus = Arc::new(InMemoryMessageBus::new());
    let dispatcher = harness.dispatcher(
        Arc::clone(&bus),
        CircuitBreakerConfig::default(),
        DispatcherConfig::default(),
    );
    let rows = harness.commit_events(&["acc-1"]).await;

    bus.fail_next(BusError::Unavailable("connection reset".to_string()));
    let report = dispatcher.dispatch_once().await.unwrap();
    assert_eq!(report.failed, 1);

    let stored = harness.store.get(rows[0].id).await.unwrap().unwrap();
    assert_eq!(stored.attempt_count, 1);
    assert_eq!(
        stored.last_error.as_deref(),
        Some("Bus unavailable: connection reset")
    );
    assert_eq!(stored.status(10), OutboxStatus::Pending);

    let report = dispatcher.dispatch_once().await.unwrap();
    assert_eq!(report.dispatched, 1);
    assert_eq!(bus.published()[0].header("attempt"), Some("2"));
}

#[tokio::test]
async fn test_exhausted_event_reaches_failed_state() {
    let harness = Harness::new();
    let bus = Arc::new(InMemoryMessageBus::new());
    bus.set_unavailable(true);
    let dispatcher = harness.dispatcher(
        Arc::clone(&bus),
        CircuitBreakerConfig::default().failure_threshold(100),
        DispatcherConfig::default().with_max_attempts(2),
    );
    let rows = harness.commit_events(&["acc-1"]).await;

    assert_eq!(dispatcher.dispatch_once().await.unwrap().exhausted, 0);
    assert_eq!(dispatcher.dispatch_once().await.unwrap().exhausted, 1);
    assert_eq!(dispatcher.dispatch_once().await.unwrap().claimed, 0);

    let stored = harness.store.get(rows[0].id).await.unwrap().unwrap();
    assert_eq!(stored.status(2), OutboxStatus::Failed);
    assert_eq!(harness.store.failed_count(2).await.unwrap(), 1);
    assert_eq!(harness.store.pending_count(2).await.unwrap(), 0);
}

#[tokio::test]
async fn test_open_breaker_stops_batch_without_spending_attempts() {
    let harness = Harness::new();
    let bus = Arc::new(InMemoryMessageBus::new());
    bus.set_unavailable(true);
    let dispatcher = harness.dispatcher(
        Arc::clone(&bus),
        CircuitBreakerConfig::default()
            .failure_threshold(1)
            .reset_timeout(Duration::from_secs(60)),
        DispatcherConfig::default(),
    );
    let rows = harness.commit_events(&["a", "b", "c"]).await;

    let report = dispatcher.dispatch_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert!(report.short_circuited);
    assert_eq!(dispatcher.breaker().state(), CircuitState::Open);

    let report = dispatcher.dispatch_once().await.unwrap();
    assert_eq!(report.failed, 0);
    assert!(report.short_circuited);

    let attempts: Vec<u32> = harness
        .store
        .events()
        .iter()
        .map(|e| e.attempt_count)
        .collect();
    assert_eq!(attempts, vec![1, 0, 0]);
    assert_eq!(harness.store.pending_count(10).await.unwrap(), rows.len() as u64);
}

#[tokio::test]
async fn test_rejected_messages_do_not_open_breaker() {
    let harness = Harness::new();
    let bus = Arc::new(InMemoryMessageBus::new());
    let dispatcher = harness.dispatcher(
        Arc::clone(&bus),
        CircuitBreakerConfig::default()
            .failure_threshold(2)
            .reset_timeout(Duration::from_secs(60)),
        DispatcherConfig::default(),
    );
    let rows = harness.commit_events(&["bad-1", "bad-2", "good"]).await;

    bus.fail_next(BusError::Rejected("schema mismatch".to_string()));
    bus.fail_next(BusError::PayloadTooLarge {
        size: 2048,
        limit: 1024,
    });
    let report = dispatcher.dispatch_once().await.unwrap();

    assert_eq!(report.claimed, 3);
    assert_eq!(report.failed, 2);
    assert_eq!(report.dispatched, 1);
    assert!(!report.short_circuited);
    assert_eq!(dispatcher.breaker().state(), CircuitState::Closed);
    assert_eq!(dispatcher.breaker().snapshot().consecutive_failures, 0);

    let published = bus.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].key, "good");

    let rejected = harness.store.get(rows[0].id).await.unwrap().unwrap();
    assert_eq!(rejected.attempt_count, 1);
    assert_eq!(
        rejected.last_error.as_deref(),
        Some("Message rejected: schema mismatch")
    );
    let delivered = harness.store.get(rows[2].id).await.unwrap().unwrap();
    assert_eq!(delivered.status(10), OutboxStatus::Dispatched);
}

/// Bus that acknowledges a message and then never returns, as if the
/// dispatcher process died right after the broker accepted it.
struct AckThenHang {
    inner: InMemoryMessageBus,
    hang: AtomicBool,
}

#[async_trait]
impl MessageBus for AckThenHang {
    async fn publish(&self, message: &Message) -> Result<(), BusError> {
        self.inner.publish(message).await?;
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_crash_after_broker_ack_redelivers() {
    let harness = Harness::new();
    let bus = Arc::new(AckThenHang {
        inner: InMemoryMessageBus::new(),
        hang: AtomicBool::new(true),
    });
    let dispatcher = harness.dispatcher(
        Arc::clone(&bus),
        CircuitBreakerConfig::default(),
        DispatcherConfig::default(),
    );
    let rows = harness.commit_events(&["acc-1"]).await;
    let event_id = rows[0].id.to_string();

    let crashed =
        tokio::time::timeout(Duration::from_millis(50), dispatcher.dispatch_once()).await;
    assert!(crashed.is_err());
    assert_eq!(bus.inner.deliveries_of(&event_id), 1);
    assert_eq!(harness.store.pending_count(10).await.unwrap(), 1);

    bus.hang.store(false, Ordering::SeqCst);
    let restarted = harness.dispatcher(
        Arc::clone(&bus),
        CircuitBreakerConfig::default(),
        DispatcherConfig::default(),
    );
    let report = restarted.dispatch_once().await.unwrap();
    assert_eq!(report.dispatched, 1);
    assert_eq!(bus.inner.deliveries_of(&event_id), 2);
    assert_eq!(harness.store.pending_count(10).await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_dispatchers_do_not_double_deliver() {
    let harness = Harness::new();
    let bus = Arc::new(InMemoryMessageBus::new());
    let config = DispatcherConfig::default().with_batch_size(3);
    let first = harness.dispatcher(Arc::clone(&bus), CircuitBreakerConfig::default(), config.clone());
    let second = harness.dispatcher(Arc::clone(&bus), CircuitBreakerConfig::default(), config);
    let rows = harness.commit_events(&["a", "b", "c", "d", "e", "f"]).await;

    let (a, b) = tokio::join!(first.dispatch_once(), second.dispatch_once());
    assert_eq!(a.unwrap().dispatched + b.unwrap().dispatched, 6);

    for row in &rows {
        assert_eq!(bus.deliveries_of(&row.id.to_string()), 1);
    }
}

#[tokio::test]
async fn test_run_drains_until_shutdown() {
    let harness = Harness::new();
    let bus = Arc::new(InMemoryMessageBus::new());
    let dispatcher = harness.dispatcher(
        Arc::clone(&bus),
        CircuitBreakerConfig::default(),
        DispatcherConfig::default().with_poll_interval(Duration::from_millis(10)),
    );
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.run(shutdown_rx).await }
    });

    harness.commit_events(&["a", "b"]).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while bus.published().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
