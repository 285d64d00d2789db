//! Axum integration for the tourism alert pipeline.
//!
//! Two routers, one per binary:
//!
//! - [`rpc_router`]: the notification service. Exposes any
//!   [`AlertService`] over HTTP (JSON unary calls, SSE push stream).
//! - [`orchestrator_router`]: the alert orchestrator. REST endpoints backed by
//!   the resilient client, plus the subscriber push stream fed by the
//!   broadcaster.
//!
//! # Request Flow
//!
//! ```text
//! HTTP ──> correlation id ──> handler ──> AlertService / Broadcaster
//!                                 │
//!                                 └──> AppError ──> { "code", "message" }
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tourism_alerts_runtime::{AlertStreamService, InMemoryAlertStore};
//! use tourism_alerts_web::rpc_router;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let service = Arc::new(AlertStreamService::new(Arc::new(InMemoryAlertStore::new())));
//! let app = rpc_router(service);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:9090").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{Router, routing::get};
use std::sync::Arc;
use tourism_alerts_core::AlertService;
use tourism_alerts_runtime::metrics::MetricsServer;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

// Re-export key types for convenience
pub use config::{ConfigError, Environment, OrchestratorConfig, ServiceConfig};
pub use error::AppError;
pub use middleware::{CORRELATION_ID_HEADER, CorrelationId, correlation_id};
pub use state::OrchestratorState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Router of the notification service.
pub fn rpc_router(service: Arc<dyn AlertService>) -> Router {
    handlers::rpc::router(service)
        .route("/health", get(handlers::health_check))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(correlation_id)),
        )
}

/// Router of the alert orchestrator.
///
/// CORS is permissive: browser dashboards on other origins subscribe to
/// `/api/alerts/sse`.
pub fn orchestrator_router(state: OrchestratorState) -> Router {
    let ready = Router::new()
        .route("/health/ready", get(handlers::health::readiness))
        .with_state(state.clone());

    handlers::alerts::router(state)
        .merge(ready)
        .route("/health", get(handlers::health_check))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(axum::middleware::from_fn(correlation_id)),
        )
}

/// `GET /metrics` in Prometheus text format.
///
/// Renders an empty body when `metrics` did not install the recorder.
pub fn metrics_router(metrics: Arc<MetricsServer>) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let metrics = Arc::clone(&metrics);
            async move { metrics.render().unwrap_or_default() }
        }),
    )
}
