//! HTTP transport for the alert service.
//!
//! Unary calls are JSON request/response; the push stream is consumed as
//! Server-Sent Events where each `alert` event carries one JSON [`Alert`].

use crate::error::TransportError;
use crate::sse::SseDecoder;
use async_stream::stream;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tourism_alerts_core::{
    Alert, AlertError, AlertFilter, AlertId, AlertService, AlertStream, BoxFuture, SubmitAlert,
};

/// Alert service client speaking the HTTP RPC surface.
#[derive(Clone, Debug)]
pub struct HttpAlertClient {
    client: Client,
    base_url: String,
}

impl HttpAlertClient {
    /// Create a client for the service at `base_url` (e.g. `http://localhost:8080`).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Create a client reusing an existing `reqwest` client.
    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// Service base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn filter_query(filter: &AlertFilter) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(location) = filter.location.as_deref().filter(|l| !l.is_empty()) {
            query.push(("location", location.to_string()));
        }
        if !filter.kinds.is_empty() {
            let kinds: Vec<&str> = filter.kinds.iter().map(|k| k.as_str()).collect();
            query.push(("kinds", kinds.join(",")));
        }
        if let Some(min) = filter.min_severity {
            query.push(("min_severity", min.to_string()));
        }
        query
    }

    async fn send(request: reqwest::RequestBuilder) -> Result<Response, TransportError> {
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::RequestFailed(e.to_string()))?;

        match response.status() {
            StatusCode::OK => Ok(response),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(TransportError::from_status(status.as_u16(), &body))
            }
        }
    }

    async fn json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, AlertError> {
        let response = Self::send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| TransportError::ResponseParseFailed(e.to_string()).into())
    }
}

impl AlertService for HttpAlertClient {
    fn submit(&self, request: SubmitAlert) -> BoxFuture<'_, Result<Alert, AlertError>> {
        Box::pin(async move {
            Self::json(self.client.post(self.url("/rpc/alerts")).json(&request)).await
        })
    }

    fn stream(&self, filter: AlertFilter) -> BoxFuture<'_, Result<AlertStream, AlertError>> {
        Box::pin(async move {
            let request = self
                .client
                .get(self.url("/rpc/alerts/stream"))
                .header("accept", "text/event-stream")
                .query(&Self::filter_query(&filter));
            let response = Self::send(request).await?;
            tracing::debug!(url = %response.url(), "Alert stream opened");

            let byte_stream = response.bytes_stream();
            let alerts: AlertStream = Box::pin(stream! {
                let mut decoder = SseDecoder::new();

                for await chunk in byte_stream {
                    let bytes = match chunk {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            yield Err(TransportError::StreamFailed(e.to_string()).into());
                            return;
                        }
                    };

                    for event in decoder.push(&bytes) {
                        if event.kind() != "alert" {
                            continue;
                        }
                        match serde_json::from_str::<Alert>(&event.data) {
                            Ok(alert) => yield Ok(alert),
                            Err(e) => {
                                yield Err(TransportError::ResponseParseFailed(e.to_string()).into());
                                return;
                            }
                        }
                    }
                }
            });
            Ok(alerts)
        })
    }

    fn snapshot<'a>(
        &'a self,
        filter: &'a AlertFilter,
    ) -> BoxFuture<'a, Result<Vec<Alert>, AlertError>> {
        Box::pin(async move {
            Self::json(
                self.client
                    .get(self.url("/rpc/alerts/active"))
                    .query(&Self::filter_query(filter)),
            )
            .await
        })
    }

    fn resolve<'a>(&'a self, id: &'a AlertId) -> BoxFuture<'a, Result<Alert, AlertError>> {
        Box::pin(async move {
            Self::json(self.client.post(self.url(&format!("/rpc/alerts/{id}/resolve")))).await
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::StreamExt;
    use tourism_alerts_core::{AlertKind, AlertStatus};
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn alert(kind: &str, severity: i64) -> Alert {
        let validated = SubmitAlert::new(kind, "Downtown", "Incident", severity)
            .validate()
            .unwrap();
        Alert::active(validated, Utc::now())
    }

    #[test]
    fn test_client_creation() {
        let client = HttpAlertClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_filter_query() {
        let filter = AlertFilter::location("Old Town")
            .with_kinds([AlertKind::Weather, AlertKind::Crowd])
            .with_min_severity(3);
        let query = HttpAlertClient::filter_query(&filter);
        assert_eq!(
            query,
            vec![
                ("location", "Old Town".to_string()),
                ("kinds", "WEATHER,CROWD".to_string()),
                ("min_severity", "3".to_string()),
            ]
        );
        assert!(HttpAlertClient::filter_query(&AlertFilter::all()).is_empty());
    }

    #[tokio::test]
    async fn test_submit_posts_json() {
        let server = MockServer::start().await;
        let request = SubmitAlert::new("SECURITY", "Downtown", "Incident", 9);
        let stored = alert("SECURITY", 9);
        Mock::given(method("POST"))
            .and(path("/rpc/alerts"))
            .and(body_json(&request))
            .respond_with(ResponseTemplate::new(200).set_body_json(&stored))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpAlertClient::new(server.uri());
        let created = client.submit(request).await.unwrap();

        assert_eq!(created, stored);
        assert_eq!(created.status, AlertStatus::Active);
    }

    #[tokio::test]
    async fn test_submit_validation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc/alerts"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
                "code": "VALIDATION_ERROR",
                "message": "unrecognized alert kind: \"ALIENS\"",
            })))
            .mount(&server)
            .await;

        let client = HttpAlertClient::new(server.uri());
        let err = client
            .submit(SubmitAlert::new("ALIENS", "Downtown", "?", 1))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            AlertError::InvalidArgument("unrecognized alert kind: \"ALIENS\"".into())
        );
    }

    #[tokio::test]
    async fn test_snapshot_passes_filter() {
        let server = MockServer::start().await;
        let active = vec![alert("CROWD", 3)];
        Mock::given(method("GET"))
            .and(path("/rpc/alerts/active"))
            .and(query_param("location", "Downtown"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&active))
            .mount(&server)
            .await;

        let client = HttpAlertClient::new(server.uri());
        let snapshot = client
            .snapshot(&AlertFilter::location("Downtown"))
            .await
            .unwrap();

        assert_eq!(snapshot, active);
    }

    #[tokio::test]
    async fn test_resolve_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc/alerts/ALERT-0000DEAD/resolve"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "code": "NOT_FOUND",
                "message": "Alert not found: ALERT-0000DEAD",
            })))
            .mount(&server)
            .await;

        let client = HttpAlertClient::new(server.uri());
        let err = client
            .resolve(&AlertId::from("ALERT-0000DEAD"))
            .await
            .unwrap_err();

        assert!(matches!(err, AlertError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rpc/alerts/active"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = HttpAlertClient::new(server.uri());
        let err = client.snapshot(&AlertFilter::all()).await.unwrap_err();

        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        // Nothing listens on port 9 of localhost in CI.
        let client = HttpAlertClient::new("http://127.0.0.1:9");
        let err = client.snapshot(&AlertFilter::all()).await.unwrap_err();
        assert!(matches!(err, AlertError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_stream_decodes_alert_events_and_completes() {
        let server = MockServer::start().await;
        let first = alert("WEATHER", 2);
        let second = alert("HEALTH", 4);
        let body = format!(
            ": keep-alive\n\nevent: alert\nid: {}\ndata: {}\n\nevent: other\ndata: ignored\n\nevent: alert\ndata: {}\n\n",
            first.id,
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap(),
        );
        Mock::given(method("GET"))
            .and(path("/rpc/alerts/stream"))
            .and(query_param("kinds", "WEATHER,HEALTH"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let client = HttpAlertClient::new(server.uri());
        let stream = client
            .stream(AlertFilter::all().with_kinds([AlertKind::Weather, AlertKind::Health]))
            .await
            .unwrap();
        let received: Vec<_> = stream.collect().await;

        assert_eq!(received, vec![Ok(first), Ok(second)]);
    }

    #[tokio::test]
    async fn test_stream_malformed_event_terminates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rpc/alerts/stream"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("event: alert\ndata: {not json\n\n"),
            )
            .mount(&server)
            .await;

        let client = HttpAlertClient::new(server.uri());
        let received: Vec<_> = client
            .stream(AlertFilter::all())
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(received.len(), 1);
        assert!(matches!(received[0], Err(AlertError::Unavailable(_))));
    }
}
