//! Alert store abstraction.
//!
//! The store is the single source of truth for alerts and the only component
//! allowed to change alert state. Everything downstream (streaming service,
//! clients, broadcaster) observes and forwards.
//!
//! Implementations are assumed transactional per call. The in-memory
//! implementation lives in the runtime crate.

use crate::alert::{Alert, AlertId, AlertKind};
use crate::error::AlertError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store and service operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Predicate over alerts, used by queries and stream subscriptions.
///
/// Empty `location` or empty `kinds` match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertFilter {
    /// Exact location match; `None` or empty matches all.
    #[serde(default)]
    pub location: Option<String>,
    /// Accepted kinds; empty matches all.
    #[serde(default)]
    pub kinds: Vec<AlertKind>,
    /// Minimum severity (inclusive).
    #[serde(default)]
    pub min_severity: Option<u8>,
}

impl AlertFilter {
    /// Filter that matches every alert.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter on a single location.
    #[must_use]
    pub fn location(location: impl Into<String>) -> Self {
        Self {
            location: Some(location.into()),
            ..Self::default()
        }
    }

    /// Restrict to the given kinds.
    #[must_use]
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = AlertKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    /// Restrict to alerts at or above `severity`.
    #[must_use]
    pub const fn with_min_severity(mut self, severity: u8) -> Self {
        self.min_severity = Some(severity);
        self
    }

    /// Whether `alert` passes the filter (status is not considered).
    #[must_use]
    pub fn matches(&self, alert: &Alert) -> bool {
        let location_ok = match self.location.as_deref() {
            None | Some("") => true,
            Some(location) => alert.location == location,
        };
        let kind_ok = self.kinds.is_empty() || self.kinds.contains(&alert.kind);
        let severity_ok = self.min_severity.is_none_or(|min| alert.severity >= min);
        location_ok && kind_ok && severity_ok
    }
}

/// Persistence collaborator for alerts.
///
/// Uses explicit boxed futures so the store can be shared as
/// `Arc<dyn AlertStore>`.
pub trait AlertStore: Send + Sync {
    /// Persist a newly created alert and return the stored representation.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Unavailable`] if the backing storage fails.
    fn create(&self, alert: Alert) -> BoxFuture<'_, Result<Alert, AlertError>>;

    /// Transition an alert to RESOLVED.
    ///
    /// Resolving an already resolved alert returns it unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::NotFound`] for an unknown id.
    fn resolve<'a>(&'a self, id: &'a AlertId) -> BoxFuture<'a, Result<Alert, AlertError>>;

    /// All ACTIVE alerts matching `filter`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Unavailable`] if the backing storage fails.
    fn find_active<'a>(
        &'a self,
        filter: &'a AlertFilter,
    ) -> BoxFuture<'a, Result<Vec<Alert>, AlertError>>;

    /// Look up an alert by id, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Unavailable`] if the backing storage fails.
    fn find_by_id<'a>(&'a self, id: &'a AlertId)
    -> BoxFuture<'a, Result<Option<Alert>, AlertError>>;
}
