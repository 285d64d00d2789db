//! HTTP request handlers.
//!
//! - [`rpc`]: the notification service RPC surface
//! - [`alerts`]: the orchestrator REST API and subscriber push stream
//! - [`health`]: liveness and readiness probes

pub mod alerts;
pub mod health;
pub mod rpc;

pub use health::health_check;
