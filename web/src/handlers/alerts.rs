//! Orchestrator REST and subscriber push endpoints.
//!
//! Unary routes go through the resilient client, so a degraded service shows
//! up as fallback answers (`status: FALLBACK` alerts, empty snapshots) rather
//! than errors. `GET /api/alerts/sse` registers a broadcaster subscription for
//! the lifetime of the HTTP response.

use crate::error::AppError;
use crate::handlers::rpc::FilterQuery;
use crate::middleware::CorrelationId;
use crate::state::OrchestratorState;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use tourism_alerts_client::ClientStats;
use tourism_alerts_core::{Alert, AlertId, AlertService, SubmitAlert};
use tourism_alerts_runtime::BroadcastEvent;

/// Kind of the synthetic alert published by `broadcast-test`.
pub const TEST_ALERT_KIND: &str = "GENERAL";

/// Routes of the orchestrator API.
pub fn router(state: OrchestratorState) -> Router {
    Router::new()
        .route("/api/alerts", post(submit))
        .route("/api/alerts/active", get(active))
        .route("/api/alerts/:id/resolve", post(resolve))
        .route("/api/alerts/sse", get(subscribe))
        .route("/api/alerts/broadcast-test", post(broadcast_test))
        .route("/api/alerts/stats", get(stats))
        .with_state(state)
}

/// Active alerts; empty while the service is degraded.
///
/// # Errors
///
/// 422 for an unknown kind in the filter.
pub async fn active(
    State(state): State<OrchestratorState>,
    Query(query): Query<FilterQuery>,
) -> Result<Json<Vec<Alert>>, AppError> {
    let filter = query.into_filter()?;
    let alerts = state.client.snapshot(&filter).await?;
    Ok(Json(alerts))
}

/// Submit an alert; a degraded service yields a `FALLBACK` alert.
///
/// # Errors
///
/// 422 for an unknown kind or an over-long message.
pub async fn submit(
    State(state): State<OrchestratorState>,
    correlation_id: CorrelationId,
    Json(request): Json<SubmitAlert>,
) -> Result<Json<Alert>, AppError> {
    let alert = state.client.submit(request).await?;
    tracing::info!(
        %correlation_id,
        alert_id = %alert.id,
        status = ?alert.status,
        "Alert submitted"
    );
    Ok(Json(alert))
}

/// Resolve an alert.
///
/// # Errors
///
/// 404 for an unknown id; 503 while the circuit is open.
pub async fn resolve(
    State(state): State<OrchestratorState>,
    Path(id): Path<String>,
) -> Result<Json<Alert>, AppError> {
    let alert = state.client.resolve(&AlertId::new(id)).await?;
    Ok(Json(alert))
}

/// Subscriber push stream: a `connected` welcome, then one `alert` event per publish.
pub async fn subscribe(
    State(state): State<OrchestratorState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (subscription, events) = state.broadcaster.subscribe();
    tracing::info!(
        subscription_id = %subscription.id,
        subscribers = state.broadcaster.count(),
        "Subscriber connected"
    );

    let events = events.filter_map(|event| async move { broadcast_event(&event).map(Ok) });
    Sse::new(events).keep_alive(KeepAlive::default())
}

fn broadcast_event(event: &BroadcastEvent) -> Option<Event> {
    match event.to_json() {
        Ok(data) => Some(Event::default().event(event.name()).id(event.id()).data(data)),
        Err(e) => {
            tracing::warn!(event = event.name(), error = %e, "Failed to encode event");
            None
        }
    }
}

/// Result of a test broadcast.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastTestResponse {
    /// The synthetic alert.
    pub alert: Alert,
    /// Subscribers it was queued for.
    pub delivered: usize,
    /// Subscribers dropped during the publish.
    pub dropped: usize,
}

/// Publish a synthetic alert to every subscriber without touching the service.
///
/// # Errors
///
/// Never fails in practice; the synthetic submission is always valid.
pub async fn broadcast_test(
    State(state): State<OrchestratorState>,
) -> Result<Json<BroadcastTestResponse>, AppError> {
    let validated = SubmitAlert::new(
        TEST_ALERT_KIND,
        "Test Location",
        "Test broadcast from the alert orchestrator",
        3,
    )
    .validate()?;
    let alert = Alert::active(validated, state.clock.now());
    let report = state.broadcaster.publish(&alert);
    tracing::info!(alert_id = %alert.id, delivered = report.delivered, "Test alert broadcast");

    Ok(Json(BroadcastTestResponse {
        alert,
        delivered: report.delivered,
        dropped: report.dropped,
    }))
}

/// Client statistics plus the live subscriber count.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStats {
    /// Resilient client statistics.
    #[serde(flatten)]
    pub client: ClientStats,
    /// Live push subscriptions.
    pub connected_clients: usize,
}

/// Orchestrator statistics.
pub async fn stats(State(state): State<OrchestratorState>) -> Json<OrchestratorStats> {
    Json(OrchestratorStats {
        client: state.client.stats().await,
        connected_clients: state.broadcaster.count(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tourism_alerts_client::ResilientAlertClient;
    use tourism_alerts_core::AlertStatus;
    use tourism_alerts_runtime::{Broadcaster, CircuitBreakerConfig};
    use tourism_alerts_testing::mocks::Behavior;
    use tourism_alerts_testing::{MockAlertService, test_clock};
    use tower::ServiceExt;

    fn state(mock: &Arc<MockAlertService>) -> OrchestratorState {
        let client = ResilientAlertClient::builder(mock.clone())
            .deadline(Duration::from_millis(200))
            .breaker(
                CircuitBreakerConfig::builder()
                    .consecutive_failures(2)
                    .cool_down(Duration::from_secs(60))
                    .build(),
            )
            .build();
        OrchestratorState::new(Arc::new(client), Broadcaster::new())
            .with_clock(Arc::new(test_clock()))
    }

    async fn json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post(uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        match body {
            Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn submission() -> serde_json::Value {
        serde_json::json!({
            "kind": "HEALTH",
            "location": "Old Town",
            "message": "Heat wave",
            "severity": 4,
        })
    }

    #[tokio::test]
    async fn test_submit_and_active() {
        let mock = Arc::new(MockAlertService::new());
        let app = router(state(&mock));

        let response = app
            .clone()
            .oneshot(post("/api/alerts", Some(submission())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let created: Alert = json(response).await;
        assert_eq!(created.status, AlertStatus::Active);

        let response = app
            .oneshot(get("/api/alerts/active?location=Old%20Town"))
            .await
            .unwrap();
        let active: Vec<Alert> = json(response).await;
        assert_eq!(active, vec![created]);
    }

    #[tokio::test]
    async fn test_degraded_service_answers_with_fallbacks() {
        let mock = Arc::new(MockAlertService::with_behavior(Behavior::Unavailable));
        let app = router(state(&mock));

        let response = app
            .clone()
            .oneshot(post("/api/alerts", Some(submission())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let fallback: Alert = json(response).await;
        assert_eq!(fallback.status, AlertStatus::Fallback);
        assert!(fallback.id.as_str().starts_with("FALLBACK-"));

        let response = app.clone().oneshot(get("/api/alerts/active")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let active: Vec<Alert> = json(response).await;
        assert!(active.is_empty());

        // Two failures opened the circuit; resolve has no fallback.
        let response = app
            .oneshot(post("/api/alerts/ALERT-00000000/resolve", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = json(response).await;
        assert_eq!(body["code"], "CIRCUIT_OPEN");
    }

    #[tokio::test]
    async fn test_submit_invalid_kind_is_422() {
        let mock = Arc::new(MockAlertService::new());
        let response = router(state(&mock))
            .oneshot(post(
                "/api/alerts",
                Some(serde_json::json!({
                    "kind": "ALIENS",
                    "location": "Downtown",
                    "message": "?",
                    "severity": 1,
                })),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(mock.submit_calls(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_test_reaches_subscribers() {
        let mock = Arc::new(MockAlertService::new());
        let state = state(&mock);
        let (_subscription, mut events) = state.broadcaster.subscribe();
        let app = router(state);

        let response = app
            .oneshot(post("/api/alerts/broadcast-test", None))
            .await
            .unwrap();
        let body: serde_json::Value = json(response).await;
        assert_eq!(body["delivered"], 1);
        assert_eq!(body["alert"]["kind"], TEST_ALERT_KIND);
        assert_eq!(body["alert"]["createdAt"], "2026-01-01T00:00:00Z");

        assert!(matches!(events.next().await, Some(BroadcastEvent::Connected(_))));
        match events.next().await {
            Some(BroadcastEvent::Alert(alert)) => {
                assert_eq!(alert.id.as_str(), body["alert"]["id"]);
            }
            other => unreachable!("expected alert, got {other:?}"),
        }
        assert_eq!(mock.submit_calls(), 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let mock = Arc::new(MockAlertService::new());
        let state = state(&mock);
        let (_subscription, _events) = state.broadcaster.subscribe();
        let app = router(state);

        app.clone()
            .oneshot(post("/api/alerts", Some(submission())))
            .await
            .unwrap();
        let response = app.oneshot(get("/api/alerts/stats")).await.unwrap();
        let body: serde_json::Value = json(response).await;

        assert_eq!(body["totalAlertsSent"], 1);
        assert_eq!(body["connectedClients"], 1);
        assert_eq!(body["circuitState"], "CLOSED");
    }

    #[tokio::test]
    async fn test_sse_sends_welcome_first() {
        let mock = Arc::new(MockAlertService::new());
        let state = state(&mock);
        let broadcaster = state.broadcaster.clone();
        let response = router(state).oneshot(get("/api/alerts/sse")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );
        assert_eq!(broadcaster.count(), 1);

        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        let text = String::from_utf8(first.to_vec()).unwrap();
        assert!(text.contains("event: connected"), "{text}");
        assert!(text.contains("\"status\":\"connected\""), "{text}");

        drop(body);
        assert_eq!(broadcaster.count(), 0);
    }
}
