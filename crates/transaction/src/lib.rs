//! Transaction scoping and retry for units of database work.
//!
//! A unit of work runs through [`Transactional::run`] with a declared
//! [`Propagation`] mode. The ambient transaction travels explicitly in a
//! [`Session`] that every unit of work receives, so joining, suspending and
//! restoring transactions never depends on thread- or task-local state.
//!
//! Failures are classified through [`Classify`]: transient ones (deadlocks,
//! serialization conflicts, connection trouble) are retried with full-jitter
//! exponential backoff, everything else propagates on the first attempt.

pub mod backoff;
pub mod error;
pub mod manager;
pub mod memory;
pub mod options;
pub mod postgres;
pub mod propagation;
pub mod session;
pub mod transactional;

pub use backoff::Backoff;
pub use common::TransactionId;
pub use error::{Classify, DbError, DbErrorCode, FailureKind, Result, TransactionError};
pub use manager::TransactionManager;
pub use memory::{InMemoryTransactionManager, InMemoryTx, TxOp};
pub use options::TransactionOptions;
pub use postgres::PgTransactionManager;
pub use propagation::{IsolationLevel, Propagation};
pub use session::{Session, TransactionDescriptor};
pub use transactional::Transactional;
