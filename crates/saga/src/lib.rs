//! Saga pattern implementation.
//!
//! This crate provides the Saga Pattern for running a multi-step operation
//! across independently-owned resources with an all-or-nothing outcome:
//!
//! 1. Steps run strictly in declared order, each receiving the previous
//!    step's output.
//! 2. A step may retry with a geometric delay before it counts as failed.
//! 3. If any step fails, previously completed steps are compensated in
//!    reverse order.
//!
//! Compensation is best-effort. Nothing is persisted; a saga interrupted by a
//! crash is not resumed.

pub mod definition;
pub mod error;
pub mod orchestrator;
pub mod result;
pub mod retry;
pub mod step;

pub use definition::{SagaDefinition, SagaDefinitionBuilder};
pub use error::{Result, SagaError, StepError};
pub use orchestrator::SagaOrchestrator;
pub use result::{CompensationFailure, SagaResult};
pub use retry::RetryConfig;
pub use step::{SagaStep, StepFuture};
