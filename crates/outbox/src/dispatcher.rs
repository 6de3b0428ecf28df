//! Dispatch path: drains pending rows to the message bus.

use std::sync::Arc;
use std::time::Duration;

use circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use tokio::sync::watch;

use crate::bus::{BusError, Message, MessageBus};
use crate::error::Result;
use crate::event::OutboxEvent;
use crate::store::{OutboxClaim, OutboxStore};

/// Dispatcher settings.
///
/// # Default Values
///
/// - `batch_size`: 100
/// - `poll_interval`: 1 second
/// - `max_attempts`: 10
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Most rows claimed per round.
    pub batch_size: usize,
    /// Pause between rounds that found less than a full batch.
    pub poll_interval: Duration,
    /// Failed deliveries after which a row is left alone.
    pub max_attempts: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_secs(1),
            max_attempts: 10,
        }
    }
}

impl DispatcherConfig {
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// Outcome of one dispatch round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub claimed: usize,
    pub dispatched: usize,
    pub failed: usize,
    /// Rows whose failure this round used up their last attempt.
    pub exhausted: usize,
    /// True if the breaker was open and the round stopped early.
    pub short_circuited: bool,
}

/// Publishes pending outbox rows through a circuit-breaker guarded bus.
pub struct OutboxDispatcher<S, B> {
    store: Arc<S>,
    bus: Arc<B>,
    breaker: Arc<CircuitBreaker>,
    config: DispatcherConfig,
}

impl<S, B> Clone for OutboxDispatcher<S, B> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            bus: Arc::clone(&self.bus),
            breaker: Arc::clone(&self.breaker),
            config: self.config.clone(),
        }
    }
}

impl<S: OutboxStore, B: MessageBus> OutboxDispatcher<S, B> {
    pub fn new(
        store: Arc<S>,
        bus: Arc<B>,
        breaker: Arc<CircuitBreaker>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            bus,
            breaker,
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Claims one batch of pending rows and publishes each.
    ///
    /// Accepted rows are marked dispatched; failures bump `attempt_count`
    /// and record `last_error`. Rejected messages are failed without
    /// touching the breaker. Once the breaker opens, the remaining rows
    /// are released untouched. Outcomes become durable when the claim
    /// finishes, after every publish, so a crash in between redelivers.
    #[tracing::instrument(skip(self), fields(breaker = %self.breaker.name()))]
    pub async fn dispatch_once(&self) -> Result<DispatchReport> {
        let mut claim = self
            .store
            .claim_pending(self.config.batch_size, self.config.max_attempts)
            .await?;
        let events = claim.events().to_vec();
        let mut report = DispatchReport {
            claimed: events.len(),
            ..DispatchReport::default()
        };

        for event in &events {
            let message = Message::from_event(event);
            // Only transient errors count against the breaker.
            let outcome = self
                .breaker
                .execute(|| async {
                    match self.bus.publish(&message).await {
                        Err(err) if err.is_transient() => Err(err),
                        other => Ok(other),
                    }
                })
                .await;
            match outcome {
                Ok(Ok(())) => {
                    claim.mark_dispatched(event.id).await?;
                    report.dispatched += 1;
                    metrics::counter!("outbox_events_dispatched_total").increment(1);
                    tracing::debug!(event_id = %event.id, topic = %message.topic, "event dispatched");
                }
                Ok(Err(err)) | Err(CircuitBreakerError::Inner(err)) => {
                    self.record_failure(&mut claim, event, &err, &mut report)
                        .await?;
                }
                Err(CircuitBreakerError::Open { .. }) => {
                    report.short_circuited = true;
                    tracing::warn!(
                        remaining = events.len() - report.dispatched - report.failed,
                        "message bus circuit open, stopping batch"
                    );
                    break;
                }
            }
        }

        claim.finish().await?;

        if report.claimed > 0 {
            tracing::info!(
                claimed = report.claimed,
                dispatched = report.dispatched,
                failed = report.failed,
                "dispatch round complete"
            );
        }
        Ok(report)
    }

    async fn record_failure(
        &self,
        claim: &mut S::Claim,
        event: &OutboxEvent,
        err: &BusError,
        report: &mut DispatchReport,
    ) -> Result<()> {
        claim.mark_failed(event.id, &err.to_string()).await?;
        report.failed += 1;
        metrics::counter!("outbox_dispatch_failures_total").increment(1);

        let attempts = event.attempt_count + 1;
        if attempts >= self.config.max_attempts {
            report.exhausted += 1;
            metrics::counter!("outbox_events_exhausted_total").increment(1);
            tracing::error!(
                event_id = %event.id,
                attempts,
                error = %err,
                "event delivery attempts exhausted"
            );
        } else {
            tracing::warn!(
                event_id = %event.id,
                attempts,
                transient = err.is_transient(),
                error = %err,
                "event delivery failed"
            );
        }
        Ok(())
    }

    /// Dispatches until `shutdown` turns true or its sender is dropped.
    ///
    /// A full batch is followed immediately by another round; otherwise the
    /// dispatcher sleeps for `poll_interval`. Round errors are logged and
    /// retried on the next tick.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "outbox dispatcher started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let full_batch = match self.dispatch_once().await {
                Ok(report) => report.claimed == self.config.batch_size && !report.short_circuited,
                Err(e) => {
                    tracing::error!(error = %e, "dispatch round failed");
                    false
                }
            };
            if full_batch {
                continue;
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("outbox dispatcher stopped");
    }
}
