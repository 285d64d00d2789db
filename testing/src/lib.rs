//! # Tourism Alerts Testing
//!
//! Test doubles and helpers for the alert pipeline.
//!
//! This crate provides:
//! - A fixed [`Clock`] for deterministic timestamps
//! - [`mocks::MockAlertService`], a scriptable in-memory `AlertService`
//! - proptest strategies for alert submissions
//! - Log capture for tests
//!
//! ## Example
//!
//! ```
//! use tourism_alerts_core::{AlertFilter, AlertService, SubmitAlert};
//! use tourism_alerts_testing::mocks::{Behavior, MockAlertService};
//!
//! # tokio_test_block_on(async {
//! let mock = MockAlertService::new();
//! mock.submit(SubmitAlert::new("WEATHER", "Harbor", "Fog", 2)).await.unwrap();
//! assert_eq!(mock.snapshot(&AlertFilter::all()).await.unwrap().len(), 1);
//!
//! mock.set_behavior(Behavior::Unavailable);
//! assert!(mock.snapshot(&AlertFilter::all()).await.is_err());
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use chrono::{DateTime, Utc};
use tourism_alerts_core::environment::Clock;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use async_stream::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use tokio::sync::broadcast;
    use tourism_alerts_core::{
        Alert, AlertError, AlertFilter, AlertId, AlertService, AlertStream, BoxFuture, SubmitAlert,
    };

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use tourism_alerts_testing::mocks::FixedClock;
    /// use tourism_alerts_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2026-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// How [`MockAlertService`] answers calls.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum Behavior {
        /// Answer like a reachable service.
        #[default]
        Healthy,
        /// Fail every call with [`AlertError::Unavailable`].
        Unavailable,
        /// Never complete unary calls; streams open but stay silent.
        Hang,
    }

    type Feed = broadcast::Sender<Result<Alert, AlertError>>;

    /// In-memory [`AlertService`] with scriptable failures and call counters.
    ///
    /// Streams see alerts submitted (or pushed) after they open. An error
    /// pushed with [`MockAlertService::push_error`] is delivered to every open
    /// stream and terminates it.
    pub struct MockAlertService {
        behavior: Mutex<Behavior>,
        alerts: Mutex<Vec<Alert>>,
        feed: Mutex<Feed>,
        submit_calls: AtomicUsize,
        stream_calls: AtomicUsize,
        snapshot_calls: AtomicUsize,
        resolve_calls: AtomicUsize,
    }

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    impl MockAlertService {
        /// Healthy, empty service.
        #[must_use]
        pub fn new() -> Self {
            Self::with_behavior(Behavior::Healthy)
        }

        /// Empty service with the given behavior.
        #[must_use]
        pub fn with_behavior(behavior: Behavior) -> Self {
            let (feed, _) = broadcast::channel(64);
            Self {
                behavior: Mutex::new(behavior),
                alerts: Mutex::new(Vec::new()),
                feed: Mutex::new(feed),
                submit_calls: AtomicUsize::new(0),
                stream_calls: AtomicUsize::new(0),
                snapshot_calls: AtomicUsize::new(0),
                resolve_calls: AtomicUsize::new(0),
            }
        }

        /// Change how subsequent calls are answered.
        pub fn set_behavior(&self, behavior: Behavior) {
            *lock(&self.behavior) = behavior;
        }

        /// Store `alert` without notifying streams.
        pub fn seed(&self, alert: Alert) {
            lock(&self.alerts).push(alert);
        }

        /// Deliver `alert` to open streams without storing it.
        pub fn push(&self, alert: Alert) {
            let _ = lock(&self.feed).send(Ok(alert));
        }

        /// Fail every open stream with `error`.
        pub fn push_error(&self, error: AlertError) {
            let _ = lock(&self.feed).send(Err(error));
        }

        /// Complete every open stream.
        pub fn close_streams(&self) {
            let (feed, _) = broadcast::channel(64);
            *lock(&self.feed) = feed;
        }

        /// Streams currently open.
        #[must_use]
        pub fn open_streams(&self) -> usize {
            lock(&self.feed).receiver_count()
        }

        /// Number of `submit` calls received.
        #[must_use]
        pub fn submit_calls(&self) -> usize {
            self.submit_calls.load(Ordering::SeqCst)
        }

        /// Number of `stream` calls received.
        #[must_use]
        pub fn stream_calls(&self) -> usize {
            self.stream_calls.load(Ordering::SeqCst)
        }

        /// Number of `snapshot` calls received.
        #[must_use]
        pub fn snapshot_calls(&self) -> usize {
            self.snapshot_calls.load(Ordering::SeqCst)
        }

        /// Number of `resolve` calls received.
        #[must_use]
        pub fn resolve_calls(&self) -> usize {
            self.resolve_calls.load(Ordering::SeqCst)
        }

        fn behavior(&self) -> Behavior {
            *lock(&self.behavior)
        }

        async fn gate(&self) -> Result<(), AlertError> {
            match self.behavior() {
                Behavior::Healthy => Ok(()),
                Behavior::Unavailable => Err(AlertError::Unavailable("mock service down".into())),
                Behavior::Hang => std::future::pending().await,
            }
        }
    }

    impl Default for MockAlertService {
        fn default() -> Self {
            Self::new()
        }
    }

    impl AlertService for MockAlertService {
        fn submit(&self, request: SubmitAlert) -> BoxFuture<'_, Result<Alert, AlertError>> {
            Box::pin(async move {
                self.submit_calls.fetch_add(1, Ordering::SeqCst);
                self.gate().await?;
                let alert = Alert::active(request.validate()?, Utc::now());
                self.seed(alert.clone());
                self.push(alert.clone());
                Ok(alert)
            })
        }

        fn stream(&self, filter: AlertFilter) -> BoxFuture<'_, Result<AlertStream, AlertError>> {
            Box::pin(async move {
                self.stream_calls.fetch_add(1, Ordering::SeqCst);
                if self.behavior() == Behavior::Unavailable {
                    return Err(AlertError::Unavailable("mock service down".into()));
                }
                let mut rx = lock(&self.feed).subscribe();
                let filter = AlertFilter {
                    min_severity: None,
                    ..filter
                };
                let stream: AlertStream = Box::pin(stream! {
                    loop {
                        match rx.recv().await {
                            Ok(Ok(alert)) => {
                                if filter.matches(&alert) {
                                    yield Ok(alert);
                                }
                            }
                            Ok(Err(e)) => {
                                yield Err(e);
                                break;
                            }
                            Err(broadcast::error::RecvError::Lagged(_)) => {}
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                });
                Ok(stream)
            })
        }

        fn snapshot<'a>(
            &'a self,
            filter: &'a AlertFilter,
        ) -> BoxFuture<'a, Result<Vec<Alert>, AlertError>> {
            Box::pin(async move {
                self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
                self.gate().await?;
                Ok(lock(&self.alerts)
                    .iter()
                    .filter(|alert| alert.is_active() && filter.matches(alert))
                    .cloned()
                    .collect())
            })
        }

        fn resolve<'a>(&'a self, id: &'a AlertId) -> BoxFuture<'a, Result<Alert, AlertError>> {
            Box::pin(async move {
                self.resolve_calls.fetch_add(1, Ordering::SeqCst);
                self.gate().await?;
                let mut alerts = lock(&self.alerts);
                let alert = alerts
                    .iter_mut()
                    .find(|alert| &alert.id == id)
                    .ok_or_else(|| AlertError::NotFound(id.to_string()))?;
                alert.resolve(Utc::now());
                Ok(alert.clone())
            })
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    /// Route `tracing` output to the test harness.
    ///
    /// Safe to call from every test; only the first call installs a subscriber.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use tourism_alerts_core::{AlertKind, SubmitAlert};

    /// Any known kind, in any letter case.
    pub fn kind_name() -> impl Strategy<Value = String> {
        (prop::sample::select(AlertKind::ALL.to_vec()), any::<bool>()).prop_map(|(kind, lower)| {
            if lower {
                kind.as_str().to_lowercase()
            } else {
                kind.as_str().to_string()
            }
        })
    }

    /// A valid submission with an unconstrained raw severity.
    pub fn submission() -> impl Strategy<Value = SubmitAlert> {
        (
            kind_name(),
            "[A-Z][a-z]{2,12}",
            "[ -~]{0,80}",
            any::<i64>(),
        )
            .prop_map(|(kind, location, message, severity)| {
                SubmitAlert::new(kind, location, message, severity)
            })
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, MockAlertService, test_clock};

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tourism_alerts_core::{AlertError, AlertFilter, AlertService, SubmitAlert};

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[tokio::test]
    async fn test_mock_stream_ends_on_pushed_error() {
        let mock = MockAlertService::new();
        let mut stream = mock.stream(AlertFilter::all()).await.unwrap();

        let alert = mock
            .submit(SubmitAlert::new("CROWD", "Plaza", "busy", 3))
            .await
            .unwrap();
        mock.push_error(AlertError::Unavailable("reset".into()));

        assert_eq!(stream.next().await, Some(Ok(alert)));
        assert!(matches!(stream.next().await, Some(Err(AlertError::Unavailable(_)))));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_mock_counts_calls() {
        let mock = MockAlertService::with_behavior(mocks::Behavior::Unavailable);
        assert!(mock.snapshot(&AlertFilter::all()).await.is_err());
        assert_eq!(mock.snapshot_calls(), 1);
        assert_eq!(mock.submit_calls(), 0);
    }
}
