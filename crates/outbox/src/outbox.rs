use std::sync::Arc;

use transaction::{Session, TransactionError, TransactionManager, TransactionOptions, Transactional};

use crate::error::{OutboxError, Result};
use crate::event::{NewOutboxEvent, OutboxEvent};
use crate::store::OutboxStore;

/// Write path of the outbox.
///
/// [`publish`](Self::publish) requires an active transaction in the session
/// and inserts through it, so the row commits or rolls back together with
/// the caller's business change.
pub struct Outbox<S, M> {
    store: Arc<S>,
    transactional: Transactional<M>,
}

impl<S, M> Clone for Outbox<S, M> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            transactional: self.transactional.clone(),
        }
    }
}

impl<S, M> Outbox<S, M>
where
    S: OutboxStore + 'static,
    M: TransactionManager<Tx = S::Tx>,
{
    pub fn new(store: S, transactional: Transactional<M>) -> Self {
        Self::from_arc(Arc::new(store), transactional)
    }

    pub fn from_arc(store: Arc<S>, transactional: Transactional<M>) -> Self {
        Self {
            store,
            transactional,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Writes `event` through the session's active transaction.
    ///
    /// Fails with a propagation error, without touching the database, when
    /// no transaction is active. The returned row is durable only once the
    /// caller's transaction commits.
    #[tracing::instrument(
        skip_all,
        fields(aggregate_type = %event.aggregate_type, event_type = %event.event_type)
    )]
    pub async fn publish(
        &self,
        session: &mut Session<S::Tx>,
        event: NewOutboxEvent,
    ) -> Result<OutboxEvent> {
        let row = event.into_event();
        let store = Arc::clone(&self.store);

        let inserted = self
            .transactional
            .run(session, &TransactionOptions::mandatory(), |s| {
                let store = Arc::clone(&store);
                let row = row.clone();
                Box::pin(async move {
                    let tx = s.transaction().ok_or(TransactionError::ScopeLost)?;
                    store.insert(tx, &row).await?;
                    Ok::<_, OutboxError>(row)
                })
            })
            .await?;

        metrics::counter!("outbox_events_published_total").increment(1);
        tracing::debug!(event_id = %inserted.id, "event written to outbox");
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryOutboxStore;
    use transaction::{Classify, FailureKind, InMemoryTransactionManager};

    fn setup() -> (
        InMemoryTransactionManager,
        Transactional<InMemoryTransactionManager>,
        Outbox<InMemoryOutboxStore, InMemoryTransactionManager>,
    ) {
        let manager = InMemoryTransactionManager::new();
        let transactional = Transactional::new(manager.clone());
        let outbox = Outbox::new(InMemoryOutboxStore::new(), transactional.clone());
        (manager, transactional, outbox)
    }

    fn account_created() -> NewOutboxEvent {
        NewOutboxEvent::builder()
            .aggregate_type("Account")
            .aggregate_id("acc-1")
            .event_type("AccountCreated")
            .payload_raw(serde_json::json!({"email": "ada@example.com"}))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_publish_requires_active_transaction() {
        let (manager, transactional, outbox) = setup();
        let mut session = transactional.session();

        let err = outbox
            .publish(&mut session, account_created())
            .await
            .unwrap_err();

        assert_eq!(err.failure_kind(), FailureKind::Programming);
        assert!(manager.journal().is_empty());
        assert!(outbox.store().is_empty());
    }

    #[tokio::test]
    async fn test_publish_commits_with_business_transaction() {
        let (_manager, transactional, outbox) = setup();
        let mut session = transactional.session();

        let row = transactional
            .run(&mut session, &TransactionOptions::required(), |s| {
                let outbox = outbox.clone();
                Box::pin(async move { outbox.publish(s, account_created()).await })
            })
            .await
            .unwrap();

        let stored = outbox.store().events();
        assert_eq!(stored, vec![row]);
        assert!(stored[0].is_pending(5));
    }

    #[tokio::test]
    async fn test_publish_rolls_back_with_business_transaction() {
        let (_manager, transactional, outbox) = setup();
        let mut session = transactional.session();

        let result = transactional
            .run(&mut session, &TransactionOptions::required(), |s| {
                let outbox = outbox.clone();
                Box::pin(async move {
                    outbox.publish(s, account_created()).await?;
                    Err::<(), _>(OutboxError::InvalidEvent("business rule failed".to_string()))
                })
            })
            .await;

        assert!(result.is_err());
        assert!(outbox.store().is_empty());
    }
}
