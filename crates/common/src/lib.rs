//! Identifier types shared by the transaction, outbox and saga crates.

mod types;

pub use types::{EventId, TransactionId};
