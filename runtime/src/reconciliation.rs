//! Periodic reconciliation of the stream path against snapshots.
//!
//! The push stream can miss alerts (reconnect gaps, lag). Every period the
//! [`Reconciler`] takes a snapshot of the active alerts for its location and
//! publishes whatever the broadcaster has not recently carried.
//!
//! "Recently carried" is tracked by a bounded, insertion-ordered
//! [`RecentlySeen`] set owned by the reconciler task. The stream path reports
//! the ids it delivers through a [`SeenRecorder`] instead of touching the set.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tourism_alerts_runtime::broadcaster::Broadcaster;
//! use tourism_alerts_runtime::reconciliation::{seen_channel, Reconciler, ReconciliationConfig};
//! # use tourism_alerts_core::AlertService;
//! # async fn example(service: Arc<dyn AlertService>) {
//! let (recorder, seen) = seen_channel();
//! let reconciler = Reconciler::new(service, Broadcaster::new(), ReconciliationConfig::default(), seen);
//! let (_stop, shutdown) = tokio::sync::watch::channel(false);
//! tokio::spawn(reconciler.run(shutdown));
//! # let _ = recorder;
//! # }
//! ```

use crate::broadcaster::Broadcaster;
use crate::metrics::ReconciliationMetrics;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{MissedTickBehavior, interval_at};
use tourism_alerts_core::{AlertFilter, AlertId, AlertService};

/// Default reconciliation period.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

/// Default reconciled location.
pub const DEFAULT_LOCATION: &str = "Downtown";

/// Default capacity of the recently-seen set.
pub const DEFAULT_RECENT_CAPACITY: usize = 100;

/// Reconciliation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationConfig {
    /// Time between ticks.
    pub period: Duration,
    /// Location passed to `snapshot`.
    pub location: String,
    /// Capacity of the recently-seen set.
    pub capacity: usize,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            location: DEFAULT_LOCATION.to_string(),
            capacity: DEFAULT_RECENT_CAPACITY,
        }
    }
}

/// Bounded set of alert ids; the oldest insert is evicted first.
#[derive(Debug, Clone)]
pub struct RecentlySeen {
    order: VecDeque<AlertId>,
    members: HashSet<AlertId>,
    capacity: usize,
}

impl RecentlySeen {
    /// Empty set holding at most `capacity` ids (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert `id`. Returns `false` if it was already present.
    pub fn insert(&mut self, id: AlertId) -> bool {
        if self.members.contains(&id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.members.insert(id.clone());
        self.order.push_back(id);
        true
    }

    /// Whether `id` is present.
    #[must_use]
    pub fn contains(&self, id: &AlertId) -> bool {
        self.members.contains(id)
    }

    /// Number of ids held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Reports ids delivered by the stream path to the reconciler.
#[derive(Debug, Clone)]
pub struct SeenRecorder {
    tx: mpsc::UnboundedSender<AlertId>,
}

impl SeenRecorder {
    /// Record that `id` was delivered. Ignored once the reconciler is gone.
    pub fn record(&self, id: AlertId) {
        let _ = self.tx.send(id);
    }
}

/// Create the channel connecting the stream path to a [`Reconciler`].
#[must_use]
pub fn seen_channel() -> (SeenRecorder, mpsc::UnboundedReceiver<AlertId>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SeenRecorder { tx }, rx)
}

enum LoopEvent {
    Tick,
    Seen(Option<AlertId>),
    ShutdownChanged,
    Stop,
}

/// Periodic snapshot-and-publish loop.
pub struct Reconciler {
    source: Arc<dyn AlertService>,
    broadcaster: Broadcaster,
    config: ReconciliationConfig,
    recent: RecentlySeen,
    seen: mpsc::UnboundedReceiver<AlertId>,
}

impl Reconciler {
    /// Create a reconciler reading snapshots from `source`.
    #[must_use]
    pub fn new(
        source: Arc<dyn AlertService>,
        broadcaster: Broadcaster,
        config: ReconciliationConfig,
        seen: mpsc::UnboundedReceiver<AlertId>,
    ) -> Self {
        Self {
            source,
            broadcaster,
            recent: RecentlySeen::new(config.capacity),
            config,
            seen,
        }
    }

    /// The recently-seen set.
    #[must_use]
    pub const fn recent(&self) -> &RecentlySeen {
        &self.recent
    }

    /// Run one reconciliation pass. Returns the number of alerts published.
    ///
    /// A failed snapshot is logged and counts as zero.
    pub async fn tick(&mut self) -> usize {
        self.drain_seen();

        let filter = AlertFilter::location(self.config.location.clone());
        let alerts = match self.source.snapshot(&filter).await {
            Ok(alerts) => alerts,
            Err(e) => {
                ReconciliationMetrics::record_failure();
                tracing::warn!(location = %self.config.location, error = %e, "Reconciliation snapshot failed");
                return 0;
            }
        };

        // The stream keeps delivering while the snapshot is in flight.
        self.drain_seen();

        let mut republished = 0;
        for alert in alerts {
            if self.recent.insert(alert.id.clone()) {
                self.broadcaster.publish(&alert);
                republished += 1;
            }
        }

        ReconciliationMetrics::record_tick(republished);
        if republished > 0 {
            tracing::info!(location = %self.config.location, republished, "Reconciliation published missed alerts");
        } else {
            tracing::debug!(location = %self.config.location, "Reconciliation found nothing new");
        }
        republished
    }

    fn drain_seen(&mut self) {
        while let Ok(id) = self.seen.try_recv() {
            self.recent.insert(id);
        }
    }

    /// Tick every period until `shutdown` turns `true`.
    ///
    /// The first tick happens one period after start.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        // `interval_at` rejects a zero period.
        let period = self.config.period.max(Duration::from_millis(1));
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut seen_open = true;

        tracing::info!(
            period_secs = self.config.period.as_secs(),
            location = %self.config.location,
            "Reconciliation loop started"
        );

        loop {
            let stopped = *shutdown.borrow_and_update();
            if stopped {
                break;
            }

            let event = tokio::select! {
                _ = ticker.tick() => LoopEvent::Tick,
                id = self.seen.recv(), if seen_open => LoopEvent::Seen(id),
                changed = shutdown.changed() => match changed {
                    Ok(()) => LoopEvent::ShutdownChanged,
                    Err(_) => LoopEvent::Stop,
                },
            };

            match event {
                LoopEvent::Tick => {
                    self.tick().await;
                }
                LoopEvent::Seen(Some(id)) => {
                    self.recent.insert(id);
                }
                LoopEvent::Seen(None) => seen_open = false,
                // Re-checked at the top of the loop.
                LoopEvent::ShutdownChanged => {}
                LoopEvent::Stop => break,
            }
        }

        tracing::info!("Reconciliation loop stopped");
    }
}
