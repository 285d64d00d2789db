//! # Tourism Alerts Runtime
//!
//! Runtime components of the real-time alert distribution pipeline.
//!
//! ## Core Components
//!
//! - **Store**: [`store::InMemoryAlertStore`], the source of truth for alerts
//! - **Streaming service**: [`service::AlertStreamService`], submit / stream / snapshot / resolve
//! - **Circuit breaker**: [`circuit_breaker::CircuitBreaker`] with a rolling failure window
//! - **Backoff**: [`retry::RetryPolicy`] and [`retry::Backoff`] for stream reconnects
//! - **Broadcaster**: [`broadcaster::Broadcaster`], fan-out to push subscribers
//! - **Reconciliation**: [`reconciliation::Reconciler`], the periodic snapshot safety net
//! - **Supervisor**: [`supervisor::StreamSupervisor`], the reconnecting stream path
//! - **Routing**: [`routing::AlertRouter`], severity tiers and notification actions
//! - **Metrics**: Prometheus recorders in [`metrics`]
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use tourism_alerts_core::{AlertFilter, AlertService, SubmitAlert};
//! use tourism_alerts_runtime::{AlertStreamService, InMemoryAlertStore};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let service = AlertStreamService::new(Arc::new(InMemoryAlertStore::new()));
//!
//! let alert = service
//!     .submit(SubmitAlert::new("SECURITY", "Downtown", "Incident", 9))
//!     .await
//!     .unwrap();
//! assert_eq!(alert.severity, 5);
//!
//! let active = service.snapshot(&AlertFilter::location("Downtown")).await.unwrap();
//! assert_eq!(active.len(), 1);
//! # });
//! ```

/// Fan-out of alerts to push subscribers
pub mod broadcaster;

/// Circuit breaker pattern for preventing cascading failures
pub mod circuit_breaker;

/// Prometheus metrics for observability
pub mod metrics;

pub mod reconciliation;

/// Exponential backoff for stream reconnects
pub mod retry;

pub mod routing;

/// Streaming alert service
pub mod service;

/// In-memory alert store
pub mod store;

pub mod supervisor;

pub use broadcaster::{BroadcastEvent, Broadcaster, Subscription, SubscriptionStream};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
pub use reconciliation::{Reconciler, ReconciliationConfig, SeenRecorder, seen_channel};
pub use routing::{AlertRouter, LoggingNotifier, Notifier, SeverityTier};
pub use service::AlertStreamService;
pub use store::InMemoryAlertStore;
pub use supervisor::StreamSupervisor;
