//! The alert service contract.
//!
//! [`AlertService`] is the RPC surface of the producer side: unary `submit`,
//! server-streaming `stream`, unary `snapshot`, plus unary `resolve`. The same
//! trait is implemented by the in-process streaming service, by the HTTP
//! transport client, and by the resilient client decorator, so each layer can
//! be swapped for another or for a test double.
//!
//! # Streams
//!
//! `stream` yields every alert accepted by `submit` *after* the stream was
//! opened, in arrival order, filtered server-side. The sequence only ends when
//! the service shuts down or the transport fails. Consumers cancel by dropping
//! the stream, which releases the server-side subscription.

use crate::alert::{Alert, AlertId, SubmitAlert};
use crate::error::AlertError;
use crate::store::{AlertFilter, BoxFuture};
use futures::Stream;
use std::pin::Pin;

/// Server-push sequence of alerts.
pub type AlertStream = Pin<Box<dyn Stream<Item = Result<Alert, AlertError>> + Send>>;

/// RPC contract of the alert service.
pub trait AlertService: Send + Sync {
    /// Validate, persist and return a new ACTIVE alert.
    ///
    /// # Errors
    ///
    /// - [`AlertError::InvalidArgument`] for an unknown kind.
    /// - [`AlertError::Unavailable`] / [`AlertError::DeadlineExceeded`] on transport failure.
    fn submit(&self, request: SubmitAlert) -> BoxFuture<'_, Result<Alert, AlertError>>;

    /// Open a server-push stream of future alerts matching `filter`.
    ///
    /// `min_severity` in the filter is ignored; streams filter on location and
    /// kind only.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Unavailable`] if the stream cannot be opened.
    fn stream(&self, filter: AlertFilter) -> BoxFuture<'_, Result<AlertStream, AlertError>>;

    /// Point-in-time list of ACTIVE alerts matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Unavailable`] on transport failure.
    fn snapshot<'a>(&'a self, filter: &'a AlertFilter) -> BoxFuture<'a, Result<Vec<Alert>, AlertError>>;

    /// Resolve an alert.
    ///
    /// # Errors
    ///
    /// - [`AlertError::NotFound`] for an unknown id.
    /// - [`AlertError::Unavailable`] on transport failure.
    fn resolve<'a>(&'a self, id: &'a AlertId) -> BoxFuture<'a, Result<Alert, AlertError>>;
}
