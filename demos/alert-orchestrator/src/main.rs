//! Alert Orchestrator
//!
//! Consumes the notification service through the resilient client and
//! re-broadcasts every alert to browser subscribers:
//! - stream path: a supervised, reconnecting alert stream
//! - safety net: a reconciliation loop re-reading the active snapshot
//! - subscribers: `GET /api/alerts/sse`
//!
//! Run with: `cargo run --bin alert-orchestrator`
//! Configure with `ALERTS_CONFIG=orchestrator.toml` or `ALERTS_*` variables.

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tourism_alerts_client::{HttpAlertClient, ResilientAlertClient};
use tourism_alerts_core::environment::SystemClock;
use tourism_alerts_runtime::metrics::MetricsServer;
use tourism_alerts_runtime::{
    AlertRouter, Broadcaster, LoggingNotifier, Reconciler, StreamSupervisor, seen_channel,
};
use tourism_alerts_web::{
    Environment, OrchestratorConfig, OrchestratorState, metrics_router, orchestrator_router,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often the subscriber registry is swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();

    let config = OrchestratorConfig::load().context("Failed to load configuration")?;
    init_tracing(config.environment);
    info!(
        environment = %config.environment,
        service_url = %config.service_url,
        "Starting alert orchestrator"
    );

    let mut metrics = MetricsServer::new(config.metrics_addr.unwrap_or(config.bind_addr));
    metrics.start()?;
    let metrics = Arc::new(metrics);

    let transport = Arc::new(HttpAlertClient::new(config.service_url.clone()));
    let client = Arc::new(
        ResilientAlertClient::builder(transport)
            .breaker(config.breaker_config())
            .deadline(config.deadline())
            .router(AlertRouter::new(Arc::new(LoggingNotifier)))
            .recent_capacity(config.recent_capacity)
            .on_alert(|alert| debug!(alert_id = %alert.id, kind = %alert.kind, "Alert received"))
            .build(),
    );

    let broadcaster = Broadcaster::with_config(config.broadcaster_config(), Arc::new(SystemClock));
    let (seen, seen_rx) = seen_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let supervisor = StreamSupervisor::new(
        client.clone(),
        config.stream_filter()?,
        config.retry_policy(),
        broadcaster.clone(),
        seen,
    );
    let reconciler = Reconciler::new(
        client.clone(),
        broadcaster.clone(),
        config.reconciliation_config(),
        seen_rx,
    );

    let mut background: Vec<(&str, JoinHandle<()>)> = vec![
        ("stream supervisor", tokio::spawn(supervisor.run(shutdown_rx.clone()))),
        ("reconciliation", tokio::spawn(reconciler.run(shutdown_rx.clone()))),
        (
            "subscriber sweeper",
            tokio::spawn(sweep_subscribers(
                broadcaster.clone(),
                config.subscriber_idle(),
                shutdown_rx.clone(),
            )),
        ),
    ];

    let state = OrchestratorState::new(client.clone(), broadcaster.clone());
    let mut app = orchestrator_router(state);
    match config.metrics_addr {
        Some(addr) => background.push((
            "metrics server",
            tokio::spawn(serve_metrics(addr, metrics.clone(), shutdown_rx.clone())),
        )),
        None => app = app.merge(metrics_router(metrics.clone())),
    }

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "Orchestrator listening");

    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { stopped(&mut server_shutdown).await })
            .await
    });

    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(err) => error!(error = %err, "Unable to listen for shutdown signal"),
    }

    shutdown_tx.send_replace(true);
    // Subscriber streams never end on their own.
    broadcaster.close();

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "HTTP server error during shutdown"),
        Err(e) => warn!(error = %e, "HTTP server task failed"),
    }
    for (name, task) in background {
        if let Err(e) = task.await {
            warn!(task = name, error = %e, "Background task failed");
        }
    }

    let stats = client.stats().await;
    info!(
        sent = stats.total_alerts_sent,
        received = stats.total_alerts_received,
        fallbacks = stats.fallbacks,
        circuit_state = ?stats.circuit_state,
        "Shutdown complete"
    );
    Ok(())
}

/// Periodically drop closed and stalled subscriptions.
async fn sweep_subscribers(
    broadcaster: Broadcaster,
    max_idle: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let removed = broadcaster.sweep(max_idle);
                if removed > 0 {
                    info!(removed, subscribers = broadcaster.count(), "Swept subscribers");
                }
            }
            () = stopped(&mut shutdown) => break,
        }
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
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
        .with_graceful_shutdown(async move { stopped(&mut shutdown).await })
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
