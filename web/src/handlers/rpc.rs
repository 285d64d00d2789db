//! RPC surface of the notification service.
//!
//! | Operation | Route |
//! |---|---|
//! | submit | `POST /rpc/alerts` |
//! | stream | `GET /rpc/alerts/stream?location=&kinds=` (SSE) |
//! | snapshot | `GET /rpc/alerts/active?location=&kinds=&min_severity=` |
//! | resolve | `POST /rpc/alerts/{id}/resolve` |
//!
//! Every stream item is one `alert` event whose `data` is the JSON alert and
//! whose `id` is the alert id. The response ends when the service shuts down.

use crate::error::AppError;
use async_stream::stream;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tourism_alerts_core::{
    Alert, AlertError, AlertFilter, AlertId, AlertKind, AlertService, SubmitAlert, clamp_severity,
};

/// Shared state of the RPC routes.
pub type ServiceState = Arc<dyn AlertService>;

/// Filter query string shared by the stream and snapshot routes.
#[derive(Debug, Default, Deserialize)]
pub struct FilterQuery {
    /// Exact location; absent or empty matches all.
    pub location: Option<String>,
    /// Comma-separated kinds; absent or empty matches all.
    pub kinds: Option<String>,
    /// Minimum severity, clamped to 1..=5.
    pub min_severity: Option<i64>,
}

impl FilterQuery {
    /// Convert to an [`AlertFilter`].
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::InvalidArgument`] for an unknown kind.
    pub fn into_filter(self) -> Result<AlertFilter, AlertError> {
        let kinds = match self.kinds.as_deref() {
            Some(list) => AlertKind::parse_list(list)?,
            None => Vec::new(),
        };
        Ok(AlertFilter {
            location: self.location.filter(|l| !l.is_empty()),
            kinds,
            min_severity: self.min_severity.map(clamp_severity),
        })
    }
}

/// Routes of the RPC surface over `service`.
pub fn router(service: ServiceState) -> Router {
    Router::new()
        .route("/rpc/alerts", post(submit))
        .route("/rpc/alerts/stream", get(stream_alerts))
        .route("/rpc/alerts/active", get(snapshot))
        .route("/rpc/alerts/:id/resolve", post(resolve))
        .with_state(service)
}

/// Unary submit.
///
/// # Errors
///
/// 422 for an unknown kind or an over-long message.
pub async fn submit(
    State(service): State<ServiceState>,
    Json(request): Json<SubmitAlert>,
) -> Result<Json<Alert>, AppError> {
    let alert = service.submit(request).await?;
    Ok(Json(alert))
}

/// Server-push stream of alerts accepted from now on.
///
/// # Errors
///
/// 422 for an unknown kind in the filter; 503 once the service is shutting down.
pub async fn stream_alerts(
    State(service): State<ServiceState>,
    Query(query): Query<FilterQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let filter = query.into_filter()?;
    let mut alerts = service.stream(filter).await?;

    let events = stream! {
        while let Some(item) = alerts.next().await {
            match item {
                Ok(alert) => match alert_event(&alert) {
                    Ok(event) => yield Ok::<_, Infallible>(event),
                    Err(e) => tracing::warn!(alert_id = %alert.id, error = %e, "Failed to encode alert"),
                },
                Err(e) => {
                    tracing::info!(error = %e, "Alert stream ended");
                    break;
                }
            }
        }
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Unary snapshot of active alerts.
///
/// # Errors
///
/// 422 for an unknown kind in the filter.
pub async fn snapshot(
    State(service): State<ServiceState>,
    Query(query): Query<FilterQuery>,
) -> Result<Json<Vec<Alert>>, AppError> {
    let filter = query.into_filter()?;
    let alerts = service.snapshot(&filter).await?;
    Ok(Json(alerts))
}

/// Unary resolve.
///
/// # Errors
///
/// 404 for an unknown id.
pub async fn resolve(
    State(service): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<Alert>, AppError> {
    let alert = service.resolve(&AlertId::new(id)).await?;
    Ok(Json(alert))
}

/// SSE `alert` event for `alert`.
///
/// # Errors
///
/// Returns an error if the alert cannot be serialized.
pub fn alert_event(alert: &Alert) -> Result<Event, serde_json::Error> {
    let data = serde_json::to_string(alert)?;
    Ok(Event::default().event("alert").id(alert.id.as_str()).data(data))
}
