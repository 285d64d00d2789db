//! # Tourism Alerts Core
//!
//! Core types and traits for the real-time alert distribution pipeline.
//!
//! ```text
//! Store ──> Streaming Service ──> Client (stream | snapshot) ──> Broadcaster ──> Subscribers
//! ```
//!
//! This crate holds what every stage agrees on:
//!
//! - **Alert model**: [`Alert`], [`AlertKind`], [`AlertStatus`], submission validation
//! - **Error taxonomy**: [`AlertError`]
//! - **Store boundary**: [`AlertStore`], [`AlertFilter`]
//! - **RPC contract**: [`AlertService`], [`AlertStream`]
//! - **Environment**: [`environment::Clock`] for injectable time
//!
//! ## Example
//!
//! ```
//! use tourism_alerts_core::{AlertKind, SubmitAlert};
//!
//! let request = SubmitAlert::new("security", "Downtown", "Incident", 9);
//! let validated = request.validate().unwrap();
//! assert_eq!(validated.kind, AlertKind::Security);
//! assert_eq!(validated.severity, 5);
//! ```

pub mod alert;
pub mod error;
pub mod service;
pub mod store;

pub use alert::{
    clamp_severity, Alert, AlertId, AlertKind, AlertStatus, SubmitAlert, ValidatedAlert,
    MAX_MESSAGE_LEN, MAX_SEVERITY, MIN_SEVERITY,
};
pub use chrono::{DateTime, Utc};
pub use error::AlertError;
pub use service::{AlertService, AlertStream};
pub use store::{AlertFilter, AlertStore, BoxFuture};

/// Environment module - injected dependencies
///
/// External dependencies that make tests non-deterministic are abstracted
/// behind traits so tests can substitute fixed implementations.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use tourism_alerts_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
