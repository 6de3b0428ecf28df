use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::DbError;
use crate::manager::TransactionManager;
use crate::propagation::IsolationLevel;

type Effect = Box<dyn FnOnce() + Send>;

/// Handle for an in-memory transaction.
///
/// Stores stage their writes as effects; the effects run, in order, only
/// when the transaction commits. Rolling back or dropping the handle
/// discards them.
pub struct InMemoryTx {
    id: u64,
    isolation: IsolationLevel,
    staged: Vec<Effect>,
}

impl InMemoryTx {
    /// Returns the transaction's sequence number.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the isolation level the transaction was begun with.
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    /// Stages a write that becomes visible on commit.
    pub fn stage(&mut self, effect: impl FnOnce() + Send + 'static) {
        self.staged.push(Box::new(effect));
    }

    /// Returns the number of staged writes.
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }
}

impl std::fmt::Debug for InMemoryTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTx")
            .field("id", &self.id)
            .field("isolation", &self.isolation)
            .field("staged", &self.staged.len())
            .finish()
    }
}

/// A transaction lifecycle call recorded by [`InMemoryTransactionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOp {
    Begin(u64),
    Commit(u64),
    Rollback(u64),
}

#[derive(Debug, Default)]
struct ManagerState {
    next_id: u64,
    journal: Vec<TxOp>,
    begin_failures: VecDeque<DbError>,
    commit_failures: VecDeque<DbError>,
}

/// In-memory transaction manager for testing.
///
/// Records every begin/commit/rollback and can be told to fail upcoming
/// begins or commits with a given error.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransactionManager {
    state: Arc<Mutex<ManagerState>>,
}

impl InMemoryTransactionManager {
    /// Creates a new in-memory transaction manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `begin` fail with `error`.
    pub fn fail_next_begin(&self, error: DbError) {
        self.lock().begin_failures.push_back(error);
    }

    /// Makes the next `commit` fail with `error`; the transaction is
    /// discarded as if rolled back.
    pub fn fail_next_commit(&self, error: DbError) {
        self.lock().commit_failures.push_back(error);
    }

    /// Returns every recorded lifecycle call in order.
    pub fn journal(&self) -> Vec<TxOp> {
        self.lock().journal.clone()
    }

    /// Returns the number of transactions begun.
    pub fn begin_count(&self) -> usize {
        self.count(|op| matches!(op, TxOp::Begin(_)))
    }

    /// Returns the number of successful commits.
    pub fn commit_count(&self) -> usize {
        self.count(|op| matches!(op, TxOp::Commit(_)))
    }

    /// Returns the number of rollbacks, including failed commits.
    pub fn rollback_count(&self) -> usize {
        self.count(|op| matches!(op, TxOp::Rollback(_)))
    }

    fn count(&self, pred: impl Fn(&TxOp) -> bool) -> usize {
        self.lock().journal.iter().filter(|op| pred(op)).count()
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TransactionManager for InMemoryTransactionManager {
    type Tx = InMemoryTx;

    async fn begin(&self, isolation: IsolationLevel) -> Result<InMemoryTx, DbError> {
        let mut state = self.lock();
        if let Some(error) = state.begin_failures.pop_front() {
            return Err(error);
        }
        state.next_id += 1;
        let id = state.next_id;
        state.journal.push(TxOp::Begin(id));
        Ok(InMemoryTx {
            id,
            isolation,
            staged: Vec::new(),
        })
    }

    async fn commit(&self, tx: InMemoryTx) -> Result<(), DbError> {
        {
            let mut state = self.lock();
            if let Some(error) = state.commit_failures.pop_front() {
                state.journal.push(TxOp::Rollback(tx.id));
                return Err(error);
            }
            state.journal.push(TxOp::Commit(tx.id));
        }
        for effect in tx.staged {
            effect();
        }
        Ok(())
    }

    async fn rollback(&self, tx: InMemoryTx) -> Result<(), DbError> {
        self.lock().journal.push(TxOp::Rollback(tx.id));
        Ok(())
    }
}
