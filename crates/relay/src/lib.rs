//! Outbox relay: the process that drains `outbox_events` to the message bus.
//!
//! Runs an [`OutboxDispatcher`](outbox::OutboxDispatcher) in the background
//! and serves `/health` and `/metrics` over HTTP.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use circuit_breaker::CircuitBreaker;
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::OutboxStore;
use tower_http::trace::TraceLayer;

pub use config::{Config, ConfigError};

/// Name of the breaker guarding the message bus.
pub const BUS_BREAKER: &str = "message-bus";

/// Shared state for the HTTP handlers.
pub struct RelayState<S> {
    pub store: Arc<S>,
    pub breaker: Arc<CircuitBreaker>,
    /// Attempts after which a row counts as failed rather than pending.
    pub max_attempts: u32,
}

/// Creates the Axum application router.
pub fn create_app<S: OutboxStore + 'static>(
    state: Arc<RelayState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http())
}
