//! Notification Service
//!
//! Owns the alert store and exposes it over the streaming RPC surface:
//! - `POST /rpc/alerts` submit
//! - `GET /rpc/alerts/stream` server-push stream (SSE)
//! - `GET /rpc/alerts/active` snapshot
//! - `POST /rpc/alerts/{id}/resolve` resolve
//!
//! Run with: `cargo run --bin notification-service`
//! Configure with `ALERTS_CONFIG=service.toml` or `ALERTS_*` variables.

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tourism_alerts_core::environment::SystemClock;
use tourism_alerts_runtime::metrics::MetricsServer;
use tourism_alerts_runtime::{AlertStreamService, InMemoryAlertStore};
use tourism_alerts_web::{Environment, ServiceConfig, metrics_router, rpc_router};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();

    let config = ServiceConfig::load().context("Failed to load configuration")?;
    init_tracing(config.environment);
    info!(environment = %config.environment, "Starting notification service");

    let mut metrics = MetricsServer::new(config.metrics_addr.unwrap_or(config.bind_addr));
    metrics.start()?;
    let metrics = Arc::new(metrics);

    let store = Arc::new(InMemoryAlertStore::new());
    let service = Arc::new(AlertStreamService::with_options(
        store,
        Arc::new(SystemClock),
        config.stream_buffer,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut app = rpc_router(service.clone());
    let metrics_task = match config.metrics_addr {
        Some(addr) => Some(tokio::spawn(serve_metrics(
            addr,
            metrics.clone(),
            shutdown_rx.clone(),
        ))),
        None => {
            app = app.merge(metrics_router(metrics.clone()));
            None
        }
    };

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "RPC listener ready");

    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(err) => error!(error = %err, "Unable to listen for shutdown signal"),
    }

    // Open streams must end before the server can drain its connections.
    service.shutdown();
    shutdown_tx.send_replace(true);

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "RPC server error during shutdown"),
        Err(e) => warn!(error = %e, "RPC server task failed"),
    }
    if let Some(task) = metrics_task {
        if let Err(e) = task.await {
            warn!(error = %e, "Metrics server task failed");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn serve_metrics(
    addr: SocketAddr,
    metrics: Arc<MetricsServer>,
    mut shutdown: watch::Receiver<bool>,
) {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "Failed to bind metrics listener");
            return;
        }
    };
    info!(%addr, "Prometheus metrics available at /metrics");

    let served = axum::serve(listener, metrics_router(metrics))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await;
    if let Err(e) = served {
        warn!(error = %e, "Metrics server error");
    }
}

fn init_tracing(environment: Environment) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| environment.default_log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
