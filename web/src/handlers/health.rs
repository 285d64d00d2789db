//! Health check endpoints.
//!
//! `/health` is a plain liveness probe. The orchestrator adds `/health/ready`,
//! which reports whether alerts are currently served degraded.

use crate::state::OrchestratorState;
use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use tourism_alerts_runtime::circuit_breaker::State as CircuitState;

/// Liveness probe.
///
/// ```text
/// GET /health  ->  200 "ok"
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness report of the orchestrator.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Readiness {
    /// `"UP"`, or `"DEGRADED"` while the circuit is not closed.
    pub status: &'static str,
    /// Breaker state towards the notification service.
    pub circuit_state: CircuitState,
    /// Live push subscriptions.
    pub connected_clients: usize,
}

/// Readiness probe.
///
/// Always 200: a degraded orchestrator still answers with fallbacks.
///
/// ```text
/// GET /health/ready
/// {"status":"DEGRADED","circuitState":"OPEN","connectedClients":3}
/// ```
pub async fn readiness(State(state): State<OrchestratorState>) -> (StatusCode, Json<Readiness>) {
    let circuit_state = state.client.breaker().state().await;
    let status = match circuit_state {
        CircuitState::Closed => "UP",
        CircuitState::Open | CircuitState::HalfOpen => "DEGRADED",
    };

    (
        StatusCode::OK,
        Json(Readiness {
            status,
            circuit_state,
            connected_clients: state.broadcaster.count(),
        }),
    )
}
