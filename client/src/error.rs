//! Transport errors of the HTTP alert client

use serde::Deserialize;
use thiserror::Error;
use tourism_alerts_core::AlertError;

/// Errors that can occur when talking to the alert service over HTTP
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connecting or sending failed
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Response body could not be decoded
    #[error("Response parsing failed: {0}")]
    ResponseParseFailed(String),

    /// The service answered with an error status
    #[error("Service error (status {status}): {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Error message from the service
        message: String,
    },

    /// The push stream broke mid-way
    #[error("Stream failed: {0}")]
    StreamFailed(String),
}

/// JSON error body produced by the service.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub(crate) message: String,
}

impl TransportError {
    /// Build a status error, preferring the service's JSON message over the raw body.
    pub(crate) fn from_status(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorBody>(body)
            .map(|parsed| parsed.message)
            .unwrap_or_else(|_| body.to_string());
        Self::Status { status, message }
    }
}

impl From<TransportError> for AlertError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Status { status: 400 | 422, message } => Self::InvalidArgument(message),
            TransportError::Status { status: 404, message } => Self::NotFound(message),
            other => Self::Unavailable(other.to_string()),
        }
    }
}
