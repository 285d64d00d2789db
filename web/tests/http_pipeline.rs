//! The HTTP transport end to end: a real notification service router on a
//! local port, consumed through `HttpAlertClient`, and the orchestrator
//! pipeline on top of it.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tourism_alerts_client::{HttpAlertClient, ResilientAlertClient};
use tourism_alerts_core::{AlertError, AlertFilter, AlertKind, AlertService, AlertStatus, SubmitAlert};
use tourism_alerts_runtime::retry::RetryPolicy;
use tourism_alerts_runtime::{
    AlertStreamService, BroadcastEvent, Broadcaster, InMemoryAlertStore, StreamSupervisor,
    seen_channel,
};
use tourism_alerts_testing::helpers::init_test_tracing;
use tourism_alerts_web::rpc_router;

const WAIT: Duration = Duration::from_secs(5);

async fn serve(service: Arc<AlertStreamService>) -> SocketAddr {
    init_test_tracing();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, rpc_router(service)).await.unwrap();
    });
    addr
}

fn service() -> Arc<AlertStreamService> {
    Arc::new(AlertStreamService::new(Arc::new(InMemoryAlertStore::new())))
}

async fn wait_for_streams(service: &AlertStreamService, count: usize) {
    timeout(WAIT, async {
        while service.open_streams() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("stream never opened");
}

#[tokio::test]
async fn unary_calls_over_http() {
    let service = service();
    let client = HttpAlertClient::new(format!("http://{}", serve(service.clone()).await));

    let created = client
        .submit(SubmitAlert::new("SECURITY", "Downtown", "Incident", 9))
        .await
        .unwrap();
    assert_eq!(created.severity, 5);
    assert_eq!(created.status, AlertStatus::Active);

    let active = client.snapshot(&AlertFilter::location("Downtown")).await.unwrap();
    assert_eq!(active, vec![created.clone()]);

    let resolved = client.resolve(&created.id).await.unwrap();
    assert_eq!(resolved.status, AlertStatus::Resolved);
    assert_eq!(resolved.created_at, created.created_at);

    let err = client
        .submit(SubmitAlert::new("ALIENS", "Downtown", "?", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, AlertError::InvalidArgument(_)));
}

#[tokio::test]
async fn stream_over_sse_filters_and_completes_on_shutdown() {
    let service = service();
    let client = HttpAlertClient::new(format!("http://{}", serve(service.clone()).await));

    let mut stream = client
        .stream(AlertFilter::location("Downtown").with_kinds([AlertKind::Security]))
        .await
        .unwrap();
    wait_for_streams(&service, 1).await;

    service
        .submit(SubmitAlert::new("SECURITY", "Harbour", "Elsewhere", 3))
        .await
        .unwrap();
    service
        .submit(SubmitAlert::new("CROWD", "Downtown", "Other kind", 3))
        .await
        .unwrap();
    let wanted = service
        .submit(SubmitAlert::new("SECURITY", "Downtown", "Incident", 4))
        .await
        .unwrap();

    let received = timeout(WAIT, stream.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(received, wanted);

    service.shutdown();
    let end = timeout(WAIT, stream.next()).await.unwrap();
    assert!(end.is_none(), "stream should complete, got {end:?}");
}

#[tokio::test]
async fn orchestrator_pipeline_over_http() {
    let service = service();
    let addr = serve(service.clone()).await;
    let transport = Arc::new(HttpAlertClient::new(format!("http://{addr}")));
    let client: Arc<dyn AlertService> = Arc::new(ResilientAlertClient::builder(transport).build());

    let broadcaster = Broadcaster::new();
    let (_subscription, mut events) = broadcaster.subscribe();
    let (seen, _seen_rx) = seen_channel();
    let (stop_tx, stop_rx) = watch::channel(false);

    let supervisor = StreamSupervisor::new(
        client.clone(),
        AlertFilter::all(),
        RetryPolicy::builder()
            .initial_delay(Duration::from_millis(10))
            .jitter(false)
            .build(),
        broadcaster.clone(),
        seen,
    );
    let handle = tokio::spawn(supervisor.run(stop_rx));
    wait_for_streams(&service, 1).await;

    let created = client
        .submit(SubmitAlert::new("HEALTH", "Old Town", "Heat wave", 4))
        .await
        .unwrap();

    assert!(matches!(
        timeout(WAIT, events.next()).await.unwrap(),
        Some(BroadcastEvent::Connected(_))
    ));
    match timeout(WAIT, events.next()).await.unwrap() {
        Some(BroadcastEvent::Alert(alert)) => assert_eq!(alert.id, created.id),
        other => panic!("expected alert, got {other:?}"),
    }

    stop_tx.send_replace(true);
    timeout(WAIT, handle).await.unwrap().unwrap();
}
