//! Resilient alert client.
//!
//! [`ResilientAlertClient`] decorates any [`AlertService`] (usually the
//! [`HttpAlertClient`](crate::HttpAlertClient)) with:
//!
//! - a deadline on every unary call,
//! - a circuit breaker around unary calls, with fallbacks for `submit`
//!   (a local `FALLBACK` alert) and `snapshot` (an empty list),
//! - per-alert side effects on the stream: statistics, severity routing and
//!   registered hooks, all run before the alert reaches the consumer.
//!
//! Only transport failures (unavailable, deadline exceeded) count against the
//! breaker. Validation errors and unknown ids are answers, not failures.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tourism_alerts_client::{HttpAlertClient, ResilientAlertClient};
//! use tourism_alerts_core::{AlertService, SubmitAlert};
//!
//! # async fn example() {
//! let client = ResilientAlertClient::builder(Arc::new(HttpAlertClient::new("http://localhost:8080")))
//!     .deadline(Duration::from_secs(5))
//!     .on_alert(|alert| println!("received {}", alert.id))
//!     .build();
//!
//! let alert = client
//!     .submit(SubmitAlert::new("CROWD", "Downtown", "Festival crowd", 3))
//!     .await;
//! # let _ = alert;
//! # }
//! ```

use async_stream::stream;
use futures::StreamExt;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tourism_alerts_core::environment::{Clock, SystemClock};
use tourism_alerts_core::{
    Alert, AlertError, AlertFilter, AlertId, AlertService, AlertStream, BoxFuture, SubmitAlert,
};
use tourism_alerts_runtime::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerMetrics, State,
};
use tourism_alerts_runtime::metrics::ClientMetrics;
use tourism_alerts_runtime::routing::AlertRouter;

/// Default deadline for unary calls.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

/// Default number of received alerts kept for [`ClientStats`].
pub const DEFAULT_RECENT_CAPACITY: usize = 100;

/// Side effect run for every alert received on the stream.
pub type AlertHook = Arc<dyn Fn(&Alert) + Send + Sync>;

/// Point-in-time client statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStats {
    /// Alerts accepted by the service through `submit`.
    pub total_alerts_sent: u64,
    /// Alerts received over the stream.
    pub total_alerts_received: u64,
    /// Unary calls answered by a fallback.
    pub fallbacks: u64,
    /// Most recently received alerts, oldest first.
    pub recent_alerts: Vec<Alert>,
    /// Current breaker state.
    pub circuit_state: State,
    /// Breaker counters.
    pub circuit: CircuitBreakerMetrics,
}

struct StatsState {
    sent: AtomicU64,
    received: AtomicU64,
    fallbacks: AtomicU64,
    recent: Mutex<VecDeque<Alert>>,
    capacity: usize,
}

impl StatsState {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn record_received(&self, alert: &Alert) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back(alert.clone());
    }

    fn recent(&self) -> MutexGuard<'_, VecDeque<Alert>> {
        self.recent.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builder for [`ResilientAlertClient`].
pub struct ResilientAlertClientBuilder {
    inner: Arc<dyn AlertService>,
    breaker: CircuitBreakerConfig,
    deadline: Duration,
    router: AlertRouter,
    clock: Arc<dyn Clock>,
    hooks: Vec<AlertHook>,
    recent_capacity: usize,
}

impl ResilientAlertClientBuilder {
    /// Set the circuit breaker configuration.
    #[must_use]
    pub fn breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    /// Set the unary call deadline.
    #[must_use]
    pub const fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set the severity router.
    #[must_use]
    pub fn router(mut self, router: AlertRouter) -> Self {
        self.router = router;
        self
    }

    /// Set the clock used to stamp fallback alerts.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register a side effect for every streamed alert.
    #[must_use]
    pub fn on_alert(mut self, hook: impl Fn(&Alert) + Send + Sync + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Set how many received alerts [`ClientStats`] keeps.
    #[must_use]
    pub const fn recent_capacity(mut self, capacity: usize) -> Self {
        self.recent_capacity = capacity;
        self
    }

    /// Build the client.
    #[must_use]
    pub fn build(self) -> ResilientAlertClient {
        ResilientAlertClient {
            inner: self.inner,
            breaker: CircuitBreaker::new("alert-service", self.breaker),
            deadline: self.deadline,
            router: self.router,
            clock: self.clock,
            hooks: self.hooks.into(),
            stats: Arc::new(StatsState::new(self.recent_capacity)),
        }
    }
}

/// [`AlertService`] decorator adding deadline, breaker, fallbacks and stream side effects.
#[derive(Clone)]
pub struct ResilientAlertClient {
    inner: Arc<dyn AlertService>,
    breaker: CircuitBreaker,
    deadline: Duration,
    router: AlertRouter,
    clock: Arc<dyn Clock>,
    hooks: Arc<[AlertHook]>,
    stats: Arc<StatsState>,
}

impl ResilientAlertClient {
    /// Start building a client around `inner`.
    #[must_use]
    pub fn builder(inner: Arc<dyn AlertService>) -> ResilientAlertClientBuilder {
        ResilientAlertClientBuilder {
            inner,
            breaker: CircuitBreakerConfig::default(),
            deadline: DEFAULT_DEADLINE,
            router: AlertRouter::default(),
            clock: Arc::new(SystemClock),
            hooks: Vec::new(),
            recent_capacity: DEFAULT_RECENT_CAPACITY,
        }
    }

    /// The circuit breaker guarding unary calls.
    #[must_use]
    pub const fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Snapshot of the client statistics.
    pub async fn stats(&self) -> ClientStats {
        let total_alerts_sent = self.stats.sent.load(Ordering::Relaxed);
        let total_alerts_received = self.stats.received.load(Ordering::Relaxed);
        let fallbacks = self.stats.fallbacks.load(Ordering::Relaxed);
        let recent_alerts = self.stats.recent().iter().cloned().collect();
        ClientStats {
            total_alerts_sent,
            total_alerts_received,
            fallbacks,
            recent_alerts,
            circuit_state: self.breaker.state().await,
            circuit: self.breaker.metrics(),
        }
    }

    /// Run `call` under the deadline and the breaker.
    async fn guarded<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T, AlertError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AlertError>>,
    {
        let started = Instant::now();
        let deadline = self.deadline;

        let outcome = self
            .breaker
            .call(|| async move {
                match tokio::time::timeout(deadline, call()).await {
                    Err(_) => Err(AlertError::DeadlineExceeded(deadline)),
                    Ok(Err(e)) if e.is_transient() => Err(e),
                    // Healthy answers, including rejections, keep the circuit closed.
                    Ok(answer) => Ok(answer),
                }
            })
            .await;
        ClientMetrics::record_call(operation, started.elapsed());

        match outcome {
            Ok(answer) => answer,
            Err(CircuitBreakerError::Inner(e)) => Err(e),
            Err(CircuitBreakerError::Open) => Err(AlertError::CircuitOpen),
        }
    }

    fn record_fallback(&self, operation: &'static str, reason: &AlertError) {
        self.stats.fallbacks.fetch_add(1, Ordering::Relaxed);
        ClientMetrics::record_fallback(operation);
        tracing::warn!(operation, error = %reason, "Alert service degraded, answering with fallback");
    }
}

fn degraded(err: &AlertError) -> bool {
    err.is_transient() || matches!(err, AlertError::CircuitOpen)
}

impl AlertService for ResilientAlertClient {
    fn submit(&self, request: SubmitAlert) -> BoxFuture<'_, Result<Alert, AlertError>> {
        Box::pin(async move {
            // Rejected locally: never reaches the network or the breaker.
            let validated = request.validate()?;

            match self.guarded("submit", || self.inner.submit(request)).await {
                Ok(alert) => {
                    self.stats.sent.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(alert_id = %alert.id, severity = alert.severity, "Alert submitted");
                    Ok(alert)
                }
                Err(e) if degraded(&e) => {
                    self.record_fallback("submit", &e);
                    Ok(Alert::fallback(validated, self.clock.now()))
                }
                Err(e) => Err(e),
            }
        })
    }

    fn stream(&self, filter: AlertFilter) -> BoxFuture<'_, Result<AlertStream, AlertError>> {
        let inner = Arc::clone(&self.inner);
        let router = self.router.clone();
        let hooks = Arc::clone(&self.hooks);
        let stats = Arc::clone(&self.stats);

        Box::pin(async move {
            // Cold: nothing is opened until the consumer polls.
            let alerts: AlertStream = Box::pin(stream! {
                let mut upstream = match inner.stream(filter).await {
                    Ok(upstream) => upstream,
                    Err(e) => {
                        tracing::warn!(error = %e, "Could not open alert stream");
                        yield Err(e);
                        return;
                    }
                };

                while let Some(item) = upstream.next().await {
                    match item {
                        Ok(alert) => {
                            stats.record_received(&alert);
                            ClientMetrics::record_stream_item();
                            let tier = router.route(&alert);
                            tracing::debug!(alert_id = %alert.id, ?tier, "Alert received");
                            for hook in hooks.iter() {
                                hook(&alert);
                            }
                            yield Ok(alert);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Alert stream terminated by transport error");
                            yield Err(e);
                            return;
                        }
                    }
                }
                tracing::info!("Alert stream completed");
            });
            Ok(alerts)
        })
    }

    fn snapshot<'a>(
        &'a self,
        filter: &'a AlertFilter,
    ) -> BoxFuture<'a, Result<Vec<Alert>, AlertError>> {
        Box::pin(async move {
            match self.guarded("snapshot", || self.inner.snapshot(filter)).await {
                Err(e) if degraded(&e) => {
                    self.record_fallback("snapshot", &e);
                    Ok(Vec::new())
                }
                other => other,
            }
        })
    }

    fn resolve<'a>(&'a self, id: &'a AlertId) -> BoxFuture<'a, Result<Alert, AlertError>> {
        Box::pin(async move { self.guarded("resolve", || self.inner.resolve(id)).await })
    }
}
