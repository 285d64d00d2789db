//! Error taxonomy shared by every layer of the pipeline.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the store, the streaming service and its clients.
///
/// Delivery failures towards individual subscribers are not part of this
/// type: the broadcaster absorbs them and drops the subscriber.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlertError {
    /// The request was malformed (unknown kind, over-long message).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No alert with the given id exists.
    #[error("Alert not found: {0}")]
    NotFound(String),

    /// Transport failure talking to the alert service.
    #[error("Alert service unavailable: {0}")]
    Unavailable(String),

    /// A unary call did not complete within its deadline.
    #[error("Deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// The circuit breaker is open and the call was not attempted.
    #[error("Circuit breaker is open")]
    CircuitOpen,

    /// The service is shutting down; streams end with this.
    #[error("Alert service is shutting down")]
    ShuttingDown,
}

impl AlertError {
    /// Whether this error counts against the circuit breaker.
    ///
    /// Only transport-level failures do; a rejected argument or a missing
    /// alert is a healthy answer from a reachable service.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::DeadlineExceeded(_) | Self::ShuttingDown
        )
    }
}
