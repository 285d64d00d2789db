//! Keeps the alert push stream flowing into the broadcaster.
//!
//! The client stream is cold and terminates on the first transport error.
//! [`StreamSupervisor`] reopens it with exponential backoff until shutdown,
//! publishing every received alert and reporting its id to the reconciler.

use crate::broadcaster::Broadcaster;
use crate::metrics::ClientMetrics;
use crate::reconciliation::SeenRecorder;
use crate::retry::{Backoff, RetryPolicy};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tourism_alerts_core::{AlertError, AlertFilter, AlertService};

/// How one stream session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The server completed the stream.
    Completed,
    /// The stream could not be opened or failed mid-way.
    Failed(AlertError),
}

/// Reconnecting consumer of [`AlertService::stream`].
pub struct StreamSupervisor {
    source: Arc<dyn AlertService>,
    filter: AlertFilter,
    policy: RetryPolicy,
    broadcaster: Broadcaster,
    seen: SeenRecorder,
}

impl StreamSupervisor {
    /// Create a supervisor for `filter` on `source`.
    #[must_use]
    pub fn new(
        source: Arc<dyn AlertService>,
        filter: AlertFilter,
        policy: RetryPolicy,
        broadcaster: Broadcaster,
        seen: SeenRecorder,
    ) -> Self {
        Self {
            source,
            filter,
            policy,
            broadcaster,
            seen,
        }
    }

    /// Consume the stream once, until it ends.
    ///
    /// The backoff is reset whenever an alert arrives.
    pub async fn session(&self, backoff: &mut Backoff) -> SessionEnd {
        let mut stream = match self.source.stream(self.filter.clone()).await {
            Ok(stream) => stream,
            Err(e) => return SessionEnd::Failed(e),
        };
        tracing::info!(location = ?self.filter.location, kinds = ?self.filter.kinds, "Alert stream connected");

        while let Some(item) = stream.next().await {
            match item {
                Ok(alert) => {
                    backoff.reset();
                    self.broadcaster.publish(&alert);
                    self.seen.record(alert.id.clone());
                }
                Err(e) => return SessionEnd::Failed(e),
            }
        }
        SessionEnd::Completed
    }

    /// Run sessions until `shutdown` turns `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.policy.clone());

        loop {
            let end = tokio::select! {
                end = self.session(&mut backoff) => end,
                () = stopped(&mut shutdown) => break,
            };

            match &end {
                SessionEnd::Completed => tracing::info!("Alert stream completed by server"),
                SessionEnd::Failed(e) => tracing::warn!(error = %e, "Alert stream failed"),
            }

            let delay = backoff.next_delay();
            ClientMetrics::record_reconnect();
            tracing::info!(
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                attempt = backoff.attempt(),
                "Reconnecting alert stream"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = stopped(&mut shutdown) => break,
            }
        }

        tracing::info!("Stream supervisor stopped");
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::broadcaster::BroadcastEvent;
    use crate::reconciliation::seen_channel;
    use std::time::Duration;
    use tokio::time::timeout;
    use tourism_alerts_core::SubmitAlert;
    use tourism_alerts_testing::mocks::{Behavior, MockAlertService};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::builder()
            .initial_delay(Duration::from_millis(10))
            .max_delay(Duration::from_millis(50))
            .jitter(false)
            .build()
    }

    async fn wait_for_streams(mock: &MockAlertService, calls: usize) {
        timeout(Duration::from_secs(2), async {
            while mock.stream_calls() < calls || mock.open_streams() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("stream should be (re)opened");
    }

    #[tokio::test]
    async fn test_session_publishes_and_records() {
        let mock = Arc::new(MockAlertService::new());
        let broadcaster = Broadcaster::new();
        let (_, mut subscriber) = broadcaster.subscribe();
        let (recorder, mut seen) = seen_channel();
        let supervisor = StreamSupervisor::new(
            mock.clone(),
            AlertFilter::all(),
            fast_policy(),
            broadcaster,
            recorder,
        );

        let session = tokio::spawn(async move {
            let mut backoff = Backoff::new(fast_policy());
            supervisor.session(&mut backoff).await
        });
        wait_for_streams(&mock, 1).await;

        let alert = mock
            .submit(SubmitAlert::new("TRAFFIC", "Bridge", "closed", 4))
            .await
            .unwrap();
        mock.push_error(AlertError::Unavailable("reset".into()));

        let end = timeout(Duration::from_secs(1), session).await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::Failed(AlertError::Unavailable("reset".into())));

        assert!(matches!(subscriber.next().await, Some(BroadcastEvent::Connected(_))));
        assert_eq!(subscriber.next().await, Some(BroadcastEvent::Alert(alert.clone())));
        assert_eq!(seen.recv().await, Some(alert.id));
    }

    #[tokio::test]
    async fn test_session_completed_by_server() {
        let mock = Arc::new(MockAlertService::new());
        let (recorder, _seen) = seen_channel();
        let supervisor = StreamSupervisor::new(
            mock.clone(),
            AlertFilter::all(),
            fast_policy(),
            Broadcaster::new(),
            recorder,
        );

        let session = tokio::spawn(async move {
            let mut backoff = Backoff::new(fast_policy());
            supervisor.session(&mut backoff).await
        });
        wait_for_streams(&mock, 1).await;
        mock.close_streams();

        let end = timeout(Duration::from_secs(1), session).await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::Completed);
    }

    #[tokio::test]
    async fn test_run_reconnects_after_failure() {
        let mock = Arc::new(MockAlertService::new());
        let (recorder, _seen) = seen_channel();
        let supervisor = StreamSupervisor::new(
            mock.clone(),
            AlertFilter::all(),
            fast_policy(),
            Broadcaster::new(),
            recorder,
        );
        let (stop, shutdown) = watch::channel(false);
        let handle = tokio::spawn(supervisor.run(shutdown));

        wait_for_streams(&mock, 1).await;
        mock.push_error(AlertError::Unavailable("reset".into()));
        wait_for_streams(&mock, 2).await;

        stop.send_replace(true);
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_retries_when_stream_cannot_open() {
        let mock = Arc::new(MockAlertService::with_behavior(Behavior::Unavailable));
        let (recorder, _seen) = seen_channel();
        let supervisor = StreamSupervisor::new(
            mock.clone(),
            AlertFilter::all(),
            fast_policy(),
            Broadcaster::new(),
            recorder,
        );
        let (stop, shutdown) = watch::channel(false);
        let handle = tokio::spawn(supervisor.run(shutdown));

        timeout(Duration::from_secs(2), async {
            while mock.stream_calls() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        stop.send_replace(true);
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
