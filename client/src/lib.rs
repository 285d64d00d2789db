//! # Tourism Alerts Client
//!
//! Client side of the alert service RPC surface.
//!
//! - [`HttpAlertClient`]: the HTTP transport (JSON unary calls, SSE push stream)
//! - [`ResilientAlertClient`]: deadline, circuit breaker, fallbacks and
//!   per-alert side effects layered over any [`AlertService`](tourism_alerts_core::AlertService)
//!
//! ## Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use std::sync::Arc;
//! use tourism_alerts_client::{HttpAlertClient, ResilientAlertClient};
//! use tourism_alerts_core::{AlertFilter, AlertService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(HttpAlertClient::new("http://localhost:8080"));
//!     let client = ResilientAlertClient::builder(transport).build();
//!
//!     let mut alerts = client.stream(AlertFilter::location("Downtown")).await?;
//!     while let Some(alert) = alerts.next().await {
//!         println!("{:?}", alert?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod http;
pub mod resilient;
pub mod sse;

pub use error::TransportError;
pub use http::HttpAlertClient;
pub use resilient::{ClientStats, ResilientAlertClient, ResilientAlertClientBuilder};
