//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use circuit_breaker::CircuitState;
use outbox::OutboxStore;
use serde::Serialize;

use crate::RelayState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct BreakerHealth {
    pub name: String,
    pub state: &'static str,
    pub consecutive_failures: u32,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok` while the bus breaker is closed, `degraded` otherwise.
    pub status: &'static str,
    pub breaker: BreakerHealth,
    pub pending_events: u64,
    pub failed_events: u64,
}

/// GET /health: reports bus breaker state and outbox backlog.
///
/// Answers 503 if the outbox store is temporarily unreachable and 500 for
/// any other store error.
pub async fn check<S: OutboxStore>(
    State(state): State<Arc<RelayState<S>>>,
) -> Result<Json<HealthResponse>, ApiError> {
    let pending_events = state.store.pending_count(state.max_attempts).await?;
    let failed_events = state.store.failed_count(state.max_attempts).await?;
    metrics::gauge!("outbox_pending_events").set(pending_events as f64);
    metrics::gauge!("outbox_failed_events").set(failed_events as f64);

    let snapshot = state.breaker.snapshot();
    let status = if snapshot.state == CircuitState::Closed {
        "ok"
    } else {
        "degraded"
    };

    Ok(Json(HealthResponse {
        status,
        breaker: BreakerHealth {
            name: snapshot.name,
            state: snapshot.state.as_str(),
            consecutive_failures: snapshot.consecutive_failures,
        },
        pending_events,
        failed_events,
    }))
}
