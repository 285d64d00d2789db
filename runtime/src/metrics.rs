//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the pipeline components:
//! - Streaming service submissions and open streams
//! - Resilient client calls, fallbacks and received stream items
//! - Circuit breaker state
//! - Broadcaster deliveries and subscriber count
//! - Reconciliation ticks
//!
//! # Example
//!
//! ```rust,no_run
//! use tourism_alerts_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Render with server.render() behind a /metrics route
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics recorder holder.
///
/// Installs the global recorder; the owning binary serves [`MetricsServer::render`]
/// on its metrics address.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server for `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the owning binary should serve metrics on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests) this logs a warning
    /// and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder was not installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Streaming service
    describe_counter!("alerts_submitted_total", "Alerts accepted by the streaming service");
    describe_counter!("alerts_rejected_total", "Submissions rejected by validation");
    describe_gauge!("alert_streams_open", "Open server-push streams");

    // Resilient client
    describe_counter!("client_calls_total", "Unary calls issued by the resilient client");
    describe_counter!("client_fallbacks_total", "Unary calls answered by a fallback");
    describe_counter!("client_stream_items_total", "Alerts received over the push stream");
    describe_histogram!("client_call_duration_seconds", "Unary call latency");
    describe_counter!("client_stream_reconnects_total", "Push stream reconnect attempts");

    // Circuit breaker
    describe_gauge!(
        "circuit_breaker_state",
        "Current circuit breaker state (0=closed, 1=half-open, 2=open)"
    );
    describe_counter!("circuit_breaker_rejections_total", "Calls rejected while open");

    // Broadcaster
    describe_gauge!("broadcast_subscribers", "Live subscriptions");
    describe_counter!("broadcast_deliveries_total", "Alert events delivered to subscribers");
    describe_counter!("broadcast_dropped_total", "Subscriptions dropped after a failed delivery");

    // Reconciliation
    describe_counter!("reconciliation_ticks_total", "Reconciliation ticks run");
    describe_counter!("reconciliation_republished_total", "Alerts published by reconciliation");
    describe_counter!("reconciliation_failures_total", "Reconciliation ticks whose snapshot failed");
}

/// Streaming service metrics recorder.
pub struct ServiceMetrics;

impl ServiceMetrics {
    /// Record an accepted submission.
    pub fn record_submitted() {
        counter!("alerts_submitted_total").increment(1);
    }

    /// Record a rejected submission.
    pub fn record_rejected() {
        counter!("alerts_rejected_total").increment(1);
    }

    /// Record the number of open streams.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_open_streams(count: usize) {
        gauge!("alert_streams_open").set(count as f64);
    }
}

/// Resilient client metrics recorder.
pub struct ClientMetrics;

impl ClientMetrics {
    /// Record a unary call and its latency.
    pub fn record_call(operation: &'static str, duration: Duration) {
        counter!("client_calls_total", "operation" => operation).increment(1);
        histogram!("client_call_duration_seconds", "operation" => operation)
            .record(duration.as_secs_f64());
    }

    /// Record a fallback answer.
    pub fn record_fallback(operation: &'static str) {
        counter!("client_fallbacks_total", "operation" => operation).increment(1);
    }

    /// Record an alert received over the stream.
    pub fn record_stream_item() {
        counter!("client_stream_items_total").increment(1);
    }

    /// Record a stream reconnect attempt.
    pub fn record_reconnect() {
        counter!("client_stream_reconnects_total").increment(1);
    }
}

/// Circuit breaker metrics recorder.
pub struct BreakerMetrics;

impl BreakerMetrics {
    /// Record circuit breaker state.
    ///
    /// 0 = Closed, 1 = `HalfOpen`, 2 = Open
    pub fn record_state(state: f64) {
        gauge!("circuit_breaker_state").set(state);
    }

    /// Record a rejected call (circuit open).
    pub fn record_rejection() {
        counter!("circuit_breaker_rejections_total").increment(1);
    }
}

/// Broadcaster metrics recorder.
pub struct BroadcastMetrics;

impl BroadcastMetrics {
    /// Record the live subscriber count.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_subscribers(count: usize) {
        gauge!("broadcast_subscribers").set(count as f64);
    }

    /// Record one publish outcome.
    pub fn record_publish(delivered: usize, dropped: usize) {
        counter!("broadcast_deliveries_total").increment(delivered as u64);
        if dropped > 0 {
            counter!("broadcast_dropped_total").increment(dropped as u64);
        }
    }
}

/// Reconciliation metrics recorder.
pub struct ReconciliationMetrics;

impl ReconciliationMetrics {
    /// Record a completed tick.
    pub fn record_tick(republished: usize) {
        counter!("reconciliation_ticks_total").increment(1);
        counter!("reconciliation_republished_total").increment(republished as u64);
    }

    /// Record a tick whose snapshot failed.
    pub fn record_failure() {
        counter!("reconciliation_ticks_total").increment(1);
        counter!("reconciliation_failures_total").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn test_metrics_server_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        ServiceMetrics::record_submitted();
        BroadcastMetrics::record_publish(3, 1);

        // The recorder is global; another test may have installed it first.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("alerts_submitted_total"));
            assert!(rendered.contains("broadcast_deliveries_total"));
        }
    }
}
