//! Fan-out of alerts to downstream push subscribers.
//!
//! The [`Broadcaster`] owns the registry of live subscriptions. Each
//! subscription is backed by its own bounded `mpsc` queue, so one slow or
//! vanished consumer never blocks the others.
//!
//! # Architecture
//!
//! ```text
//! Stream path ─────┐                          ┌──> Subscription A (queue) ──> SSE
//!                  ├──> Broadcaster::publish ─┼──> Subscription B (queue) ──> SSE
//! Reconciliation ──┘                          └──> Subscription C (gone)  ──x removed
//! ```
//!
//! # Guarantees
//!
//! - Every subscription starts with a [`BroadcastEvent::Connected`] welcome.
//! - Publishes are serialized under the registry lock, so all subscribers see
//!   the same relative order.
//! - A delivery that fails (receiver dropped or queue full) removes that
//!   subscription and nothing else.
//! - The broadcaster does not deduplicate.

use crate::metrics::BroadcastMetrics;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tourism_alerts_core::Alert;
use tourism_alerts_core::environment::{Clock, SystemClock};
use uuid::Uuid;

/// Default per-subscription queue length.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// Text of the welcome event.
pub const WELCOME_MESSAGE: &str = "Connected to Alert Stream";

/// Why a delivery to one subscriber failed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The consumer went away.
    #[error("Subscriber gone")]
    SubscriberGone,
    /// The consumer stopped draining its queue.
    #[error("Subscriber queue full")]
    Lagging,
}

/// First event of every subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    /// Subscription the event was sent to.
    pub subscription_id: Uuid,
    /// Fixed greeting.
    pub message: String,
    /// Always `"connected"`.
    pub status: String,
    /// Connection time.
    pub timestamp: DateTime<Utc>,
}

/// Event delivered to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastEvent {
    /// Welcome sent on subscribe.
    Connected(Welcome),
    /// A published alert.
    Alert(Alert),
}

impl BroadcastEvent {
    /// Event name used on the push connection.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::Alert(_) => "alert",
        }
    }

    /// Event id: the alert id, or the subscription id for the welcome.
    #[must_use]
    pub fn id(&self) -> String {
        match self {
            Self::Connected(welcome) => welcome.subscription_id.to_string(),
            Self::Alert(alert) => alert.id.to_string(),
        }
    }

    /// JSON payload.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Connected(welcome) => serde_json::to_string(welcome),
            Self::Alert(alert) => serde_json::to_string(alert),
        }
    }
}

/// Handle describing one live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    /// Generated subscriber identifier.
    pub id: Uuid,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Outcome of one [`Broadcaster::publish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscriptions that accepted the alert.
    pub delivered: usize,
    /// Subscriptions removed because delivery failed.
    pub dropped: usize,
}

/// Broadcaster tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcasterConfig {
    /// Per-subscription queue length.
    pub buffer: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            buffer: DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

/// Last time the consumer pulled an event; shared between the registry
/// entry and its stream.
#[derive(Debug, Clone, Copy)]
struct Activity {
    /// Monotonic, for idle checks.
    instant: Instant,
    /// Wall clock, for reporting.
    at: DateTime<Utc>,
}

struct Subscriber {
    tx: mpsc::Sender<BroadcastEvent>,
    last_read: Arc<Mutex<Activity>>,
}

impl Subscriber {
    fn deliver(&self, event: BroadcastEvent) -> Result<(), DeliveryError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Closed(_) => DeliveryError::SubscriberGone,
            mpsc::error::TrySendError::Full(_) => DeliveryError::Lagging,
        })
    }

    fn has_backlog(&self) -> bool {
        self.tx.capacity() < self.tx.max_capacity()
    }

    fn idle_for(&self) -> Duration {
        lock(&self.last_read).instant.elapsed()
    }
}

struct Registry {
    subscribers: Mutex<HashMap<Uuid, Subscriber>>,
    config: BroadcasterConfig,
    clock: Arc<dyn Clock>,
}

/// Registry of live subscriptions with fan-out publish.
///
/// Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Registry>,
}

impl Broadcaster {
    /// Create a broadcaster with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BroadcasterConfig::default(), Arc::new(SystemClock))
    }

    /// Create a broadcaster with explicit settings and clock.
    #[must_use]
    pub fn with_config(config: BroadcasterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Registry {
                subscribers: Mutex::new(HashMap::new()),
                config: BroadcasterConfig {
                    buffer: config.buffer.max(1),
                },
                clock,
            }),
        }
    }

    /// Register a new subscription.
    ///
    /// The returned stream yields the welcome event first. Dropping the
    /// stream unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> (Subscription, SubscriptionStream) {
        let (tx, rx) = mpsc::channel(self.inner.config.buffer);
        let subscription = Subscription {
            id: Uuid::new_v4(),
            created_at: self.inner.clock.now(),
        };
        let last_read = Arc::new(Mutex::new(Activity {
            instant: Instant::now(),
            at: subscription.created_at,
        }));

        let welcome = BroadcastEvent::Connected(Welcome {
            subscription_id: subscription.id,
            message: WELCOME_MESSAGE.to_string(),
            status: "connected".to_string(),
            timestamp: subscription.created_at,
        });
        // Fresh queue with capacity >= 1 always has room for the welcome.
        let _ = tx.try_send(welcome);

        let count = {
            let mut subscribers = self.subscribers();
            subscribers.insert(
                subscription.id,
                Subscriber {
                    tx,
                    last_read: Arc::clone(&last_read),
                },
            );
            subscribers.len()
        };
        BroadcastMetrics::record_subscribers(count);
        tracing::info!(subscription_id = %subscription.id, subscribers = count, "Subscriber connected");

        let stream = SubscriptionStream {
            id: subscription.id,
            rx,
            last_read,
            broadcaster: self.clone(),
        };
        (subscription, stream)
    }

    /// Deliver `alert` to every live subscription.
    pub fn publish(&self, alert: &Alert) -> PublishReport {
        let mut report = PublishReport::default();
        let remaining = {
            let mut subscribers = self.subscribers();
            subscribers.retain(|id, subscriber| {
                match subscriber.deliver(BroadcastEvent::Alert(alert.clone())) {
                    Ok(()) => {
                        report.delivered += 1;
                        true
                    }
                    Err(reason) => {
                        report.dropped += 1;
                        tracing::warn!(subscription_id = %id, alert_id = %alert.id, %reason, "Dropping subscriber");
                        false
                    }
                }
            });
            subscribers.len()
        };

        BroadcastMetrics::record_publish(report.delivered, report.dropped);
        if report.dropped > 0 {
            BroadcastMetrics::record_subscribers(remaining);
        }
        tracing::debug!(
            alert_id = %alert.id,
            delivered = report.delivered,
            dropped = report.dropped,
            "Alert broadcast"
        );
        report
    }

    /// Remove a subscription. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        let (removed, count) = {
            let mut subscribers = self.subscribers();
            let removed = subscribers.remove(&id).is_some();
            (removed, subscribers.len())
        };
        if removed {
            BroadcastMetrics::record_subscribers(count);
            tracing::info!(subscription_id = %id, subscribers = count, "Subscriber disconnected");
        }
        removed
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.subscribers().len()
    }

    /// Remove subscriptions whose consumer is gone, or that hold undelivered
    /// events and have not read for longer than `max_idle`.
    ///
    /// A subscriber with an empty queue is never idle: a quiet feed is not a
    /// stalled consumer. Returns the number removed.
    pub fn sweep(&self, max_idle: Option<Duration>) -> usize {
        let (removed, remaining) = {
            let mut subscribers = self.subscribers();
            let before = subscribers.len();
            subscribers.retain(|id, subscriber| {
                if subscriber.tx.is_closed() {
                    tracing::debug!(subscription_id = %id, "Sweeping closed subscriber");
                    return false;
                }
                let stalled = max_idle.is_some_and(|max| {
                    subscriber.has_backlog() && subscriber.idle_for() >= max
                });
                if stalled {
                    tracing::warn!(subscription_id = %id, "Sweeping idle subscriber");
                }
                !stalled
            });
            (before - subscribers.len(), subscribers.len())
        };
        if removed > 0 {
            BroadcastMetrics::record_subscribers(remaining);
        }
        removed
    }

    /// Disconnect every subscription; their streams end after draining.
    ///
    /// Returns the number disconnected.
    pub fn close(&self) -> usize {
        let closed = self.subscribers().drain().count();
        if closed > 0 {
            BroadcastMetrics::record_subscribers(0);
            tracing::info!(closed, "All subscribers disconnected");
        }
        closed
    }

    fn subscribers(&self) -> MutexGuard<'_, HashMap<Uuid, Subscriber>> {
        lock(&self.inner.subscribers)
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("subscribers", &self.count())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

// A panicking holder cannot leave the map half-updated; keep serving.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Events of one subscription. Unsubscribes on drop.
pub struct SubscriptionStream {
    id: Uuid,
    rx: mpsc::Receiver<BroadcastEvent>,
    last_read: Arc<Mutex<Activity>>,
    broadcaster: Broadcaster,
}

impl SubscriptionStream {
    /// Subscription this stream belongs to.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// When the consumer last pulled an event; the creation time until then.
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        lock(&self.last_read).at
    }
}

impl Stream for SubscriptionStream {
    type Item = BroadcastEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.rx.poll_recv(cx);
        if let Poll::Ready(Some(_)) = &polled {
            let at = self.broadcaster.inner.clock.now();
            *lock(&self.last_read) = Activity {
                instant: Instant::now(),
                at,
            };
        }
        polled
    }
}

impl Drop for SubscriptionStream {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.id);
    }
}
