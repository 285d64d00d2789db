//! In-process streaming alert service.
//!
//! [`AlertStreamService`] is the producer side of the pipeline. Accepted
//! alerts are persisted through the [`AlertStore`] and then pushed onto a
//! `tokio::sync::broadcast` feed. Every open stream owns one receiver on that
//! feed and applies its own location/kind filter.
//!
//! # Delivery
//!
//! - Streams only see alerts submitted after they were opened.
//! - A stream that falls more than the feed capacity behind skips the missed
//!   alerts and logs a warning; it is not closed.
//! - Dropping a stream releases its receiver.
//! - [`AlertStreamService::shutdown`] ends every open stream.

use crate::metrics::ServiceMetrics;
use async_stream::stream;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{broadcast, watch};
use tourism_alerts_core::environment::{Clock, SystemClock};
use tourism_alerts_core::{
    Alert, AlertError, AlertFilter, AlertId, AlertService, AlertStore, AlertStream, BoxFuture,
    SubmitAlert,
};

/// Default capacity of the internal alert feed.
pub const DEFAULT_STREAM_BUFFER: usize = 256;

/// Streaming service over an [`AlertStore`].
#[derive(Clone)]
pub struct AlertStreamService {
    store: Arc<dyn AlertStore>,
    clock: Arc<dyn Clock>,
    feed: broadcast::Sender<Alert>,
    shutdown: watch::Sender<bool>,
    streams: Arc<AtomicUsize>,
}

impl AlertStreamService {
    /// Create a service with the default feed capacity and the system clock.
    #[must_use]
    pub fn new(store: Arc<dyn AlertStore>) -> Self {
        Self::with_options(store, Arc::new(SystemClock), DEFAULT_STREAM_BUFFER)
    }

    /// Create a service with an explicit clock and feed capacity.
    #[must_use]
    pub fn with_options(store: Arc<dyn AlertStore>, clock: Arc<dyn Clock>, buffer: usize) -> Self {
        let (feed, _) = broadcast::channel(buffer.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            clock,
            feed,
            shutdown,
            streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of currently open streams.
    #[must_use]
    pub fn open_streams(&self) -> usize {
        self.feed.receiver_count()
    }

    /// End every open stream and refuse new ones.
    pub fn shutdown(&self) {
        tracing::info!(open_streams = self.open_streams(), "Shutting down alert streams");
        self.shutdown.send_replace(true);
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn open_stream(&self, filter: AlertFilter) -> AlertStream {
        let mut feed = self.feed.subscribe();
        let mut shutdown = self.shutdown.subscribe();
        let gauge = OpenStreamGauge::open(&self.streams);

        // Streams filter on location and kind only.
        let filter = AlertFilter {
            min_severity: None,
            ..filter
        };

        Box::pin(stream! {
            let _gauge = gauge;
            tracing::debug!(location = ?filter.location, kinds = ?filter.kinds, "Alert stream opened");
            loop {
                let stopped = *shutdown.borrow_and_update();
                if stopped {
                    break;
                }

                let next = tokio::select! {
                    changed = shutdown.changed() => match changed {
                        Ok(()) => continue,
                        Err(_) => None,
                    },
                    received = feed.recv() => Some(received),
                };

                match next {
                    None | Some(Err(broadcast::error::RecvError::Closed)) => break,
                    Some(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                        tracing::warn!(skipped, "Alert stream lagged behind the feed");
                    }
                    Some(Ok(alert)) => {
                        if filter.matches(&alert) {
                            yield Ok(alert);
                        }
                    }
                }
            }
            tracing::debug!("Alert stream closed");
        })
    }
}

/// Keeps the open-streams gauge in step with stream lifetimes, including
/// streams dropped by their consumer mid-flight.
struct OpenStreamGauge {
    streams: Arc<AtomicUsize>,
}

impl OpenStreamGauge {
    fn open(streams: &Arc<AtomicUsize>) -> Self {
        let open = streams.fetch_add(1, Ordering::SeqCst) + 1;
        ServiceMetrics::record_open_streams(open);
        Self {
            streams: Arc::clone(streams),
        }
    }
}

impl Drop for OpenStreamGauge {
    fn drop(&mut self) {
        let open = self.streams.fetch_sub(1, Ordering::SeqCst) - 1;
        ServiceMetrics::record_open_streams(open);
    }
}

impl AlertService for AlertStreamService {
    fn submit(&self, request: SubmitAlert) -> BoxFuture<'_, Result<Alert, AlertError>> {
        Box::pin(async move {
            let validated = request.validate().inspect_err(|e| {
                ServiceMetrics::record_rejected();
                tracing::debug!(error = %e, "Alert submission rejected");
            })?;

            let alert = self
                .store
                .create(Alert::active(validated, self.clock.now()))
                .await?;

            ServiceMetrics::record_submitted();
            tracing::info!(
                alert_id = %alert.id,
                kind = %alert.kind,
                location = %alert.location,
                severity = alert.severity,
                "Alert created"
            );

            // No receivers is not an error: nobody is listening yet.
            let _ = self.feed.send(alert.clone());
            Ok(alert)
        })
    }

    fn stream(&self, filter: AlertFilter) -> BoxFuture<'_, Result<AlertStream, AlertError>> {
        Box::pin(async move {
            if self.is_shut_down() {
                return Err(AlertError::ShuttingDown);
            }
            Ok(self.open_stream(filter))
        })
    }

    fn snapshot<'a>(
        &'a self,
        filter: &'a AlertFilter,
    ) -> BoxFuture<'a, Result<Vec<Alert>, AlertError>> {
        Box::pin(async move { self.store.find_active(filter).await })
    }

    fn resolve<'a>(&'a self, id: &'a AlertId) -> BoxFuture<'a, Result<Alert, AlertError>> {
        Box::pin(async move { self.store.resolve(id).await })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::InMemoryAlertStore;
    use futures::StreamExt;
    use futures::executor::block_on;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::time::Duration;
    use tokio::time::timeout;
    use tourism_alerts_core::{AlertKind, AlertStatus};

    fn service() -> AlertStreamService {
        AlertStreamService::new(Arc::new(InMemoryAlertStore::new()))
    }

    async fn next(stream: &mut AlertStream) -> Option<Result<Alert, AlertError>> {
        timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("stream should yield in time")
    }

    #[tokio::test]
    async fn test_submit_creates_active_alert() {
        let service = service();

        let alert = service
            .submit(SubmitAlert::new("SECURITY", "Downtown", "Pickpocket", 9))
            .await
            .unwrap();

        assert!(alert.id.as_str().starts_with("ALERT-"));
        assert_eq!(alert.kind, AlertKind::Security);
        assert_eq!(alert.severity, 5);
        assert_eq!(alert.status, AlertStatus::Active);
        assert!(alert.resolved_at.is_none());

        let snapshot = service.snapshot(&AlertFilter::all()).await.unwrap();
        assert_eq!(snapshot, vec![alert]);
    }

    #[tokio::test]
    async fn test_submit_rejects_unknown_kind() {
        let service = service();

        let err = service
            .submit(SubmitAlert::new("ALIENS", "Downtown", "?", 3))
            .await
            .unwrap_err();

        assert!(matches!(err, AlertError::InvalidArgument(_)));
        assert!(service.snapshot(&AlertFilter::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stream_receives_only_matching_future_alerts() {
        let service = service();
        service
            .submit(SubmitAlert::new("WEATHER", "Downtown", "before", 2))
            .await
            .unwrap();

        let mut stream = service
            .stream(AlertFilter::location("Downtown").with_kinds([AlertKind::Weather]))
            .await
            .unwrap();

        service
            .submit(SubmitAlert::new("WEATHER", "Harbor", "elsewhere", 2))
            .await
            .unwrap();
        service
            .submit(SubmitAlert::new("CROWD", "Downtown", "wrong kind", 2))
            .await
            .unwrap();
        let wanted = service
            .submit(SubmitAlert::new("WEATHER", "Downtown", "storm", 4))
            .await
            .unwrap();

        let received = next(&mut stream).await.unwrap().unwrap();
        assert_eq!(received, wanted);
    }

    #[tokio::test]
    async fn test_stream_ignores_min_severity() {
        let service = service();
        let mut stream = service
            .stream(AlertFilter::all().with_min_severity(5))
            .await
            .unwrap();

        let low = service
            .submit(SubmitAlert::new("GENERAL", "Downtown", "info", 1))
            .await
            .unwrap();

        assert_eq!(next(&mut stream).await.unwrap().unwrap(), low);
    }

    #[tokio::test]
    async fn test_streams_preserve_order_per_subscriber() {
        let service = service();
        let mut first = service.stream(AlertFilter::all()).await.unwrap();
        let mut second = service.stream(AlertFilter::all()).await.unwrap();

        let mut submitted = Vec::new();
        for i in 0..5 {
            submitted.push(
                service
                    .submit(SubmitAlert::new("TRAFFIC", "Ring Road", format!("jam {i}"), 3))
                    .await
                    .unwrap(),
            );
        }

        for expected in &submitted {
            assert_eq!(&next(&mut first).await.unwrap().unwrap(), expected);
            assert_eq!(&next(&mut second).await.unwrap().unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_dropping_stream_releases_receiver() {
        let service = service();
        let stream = service.stream(AlertFilter::all()).await.unwrap();
        assert_eq!(service.open_streams(), 1);

        drop(stream);
        assert_eq!(service.open_streams(), 0);
    }

    #[test]
    fn test_open_streams_gauge_follows_stream_lifetime() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let service = service();

        ::metrics::with_local_recorder(&recorder, || {
            let first = block_on(service.stream(AlertFilter::all())).unwrap();
            let second = block_on(service.stream(AlertFilter::all())).unwrap();
            assert!(handle.render().contains("alert_streams_open 2"));

            drop(first);
            assert!(handle.render().contains("alert_streams_open 1"));
            drop(second);
        });

        assert!(handle.render().contains("alert_streams_open 0"));
    }

    #[tokio::test]
    async fn test_shutdown_ends_streams_and_refuses_new_ones() {
        let service = service();
        let mut stream = service.stream(AlertFilter::all()).await.unwrap();

        service.shutdown();

        assert!(next(&mut stream).await.is_none());
        assert!(matches!(
            service.stream(AlertFilter::all()).await,
            Err(AlertError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_resolve_removes_from_snapshot() {
        let service = service();
        let alert = service
            .submit(SubmitAlert::new("HEALTH", "Old Town", "heat", 3))
            .await
            .unwrap();

        let resolved = service.resolve(&alert.id).await.unwrap();

        assert_eq!(resolved.status, AlertStatus::Resolved);
        assert!(service.snapshot(&AlertFilter::all()).await.unwrap().is_empty());
    }
}
