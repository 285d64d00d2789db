//! In-memory alert store.
//!
//! Keeps alerts in insertion order so snapshots come back oldest first.
//! Suitable for a single-node notification service and for tests; a durable
//! backend only has to implement [`AlertStore`].

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tourism_alerts_core::environment::{Clock, SystemClock};
use tourism_alerts_core::{Alert, AlertError, AlertFilter, AlertId, AlertStore, BoxFuture};

#[derive(Debug, Default)]
struct StoreState {
    alerts: HashMap<AlertId, Alert>,
    order: Vec<AlertId>,
}

/// Alert store backed by a `RwLock`-guarded map.
#[derive(Clone)]
pub struct InMemoryAlertStore {
    state: Arc<RwLock<StoreState>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryAlertStore {
    /// Create an empty store using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store stamping resolutions with `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            clock,
        }
    }

    /// Number of stored alerts, any status.
    pub async fn len(&self) -> usize {
        self.state.read().await.order.len()
    }

    /// Whether the store holds no alerts.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryAlertStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertStore for InMemoryAlertStore {
    fn create(&self, alert: Alert) -> BoxFuture<'_, Result<Alert, AlertError>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            if state.alerts.contains_key(&alert.id) {
                return Err(AlertError::InvalidArgument(format!(
                    "duplicate alert id {}",
                    alert.id
                )));
            }
            state.order.push(alert.id.clone());
            state.alerts.insert(alert.id.clone(), alert.clone());
            tracing::debug!(alert_id = %alert.id, "Alert stored");
            Ok(alert)
        })
    }

    fn resolve<'a>(&'a self, id: &'a AlertId) -> BoxFuture<'a, Result<Alert, AlertError>> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut state = self.state.write().await;
            let alert = state
                .alerts
                .get_mut(id)
                .ok_or_else(|| AlertError::NotFound(id.to_string()))?;

            if alert.resolve(now) {
                tracing::info!(alert_id = %id, "Alert resolved");
            } else {
                tracing::debug!(alert_id = %id, "Alert already resolved, leaving untouched");
            }
            Ok(alert.clone())
        })
    }

    fn find_active<'a>(
        &'a self,
        filter: &'a AlertFilter,
    ) -> BoxFuture<'a, Result<Vec<Alert>, AlertError>> {
        Box::pin(async move {
            let state = self.state.read().await;
            Ok(state
                .order
                .iter()
                .filter_map(|id| state.alerts.get(id))
                .filter(|alert| alert.is_active() && filter.matches(alert))
                .cloned()
                .collect())
        })
    }

    fn find_by_id<'a>(
        &'a self,
        id: &'a AlertId,
    ) -> BoxFuture<'a, Result<Option<Alert>, AlertError>> {
        Box::pin(async move { Ok(self.state.read().await.alerts.get(id).cloned()) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tourism_alerts_core::{AlertKind, AlertStatus, SubmitAlert};
    use tourism_alerts_testing::mocks::FixedClock;

    fn new_alert(kind: &str, location: &str) -> Alert {
        let validated = SubmitAlert::new(kind, location, "msg", 3).validate().unwrap();
        Alert::active(validated, Utc::now())
    }

    #[tokio::test]
    async fn test_create_and_find_by_id() {
        let store = InMemoryAlertStore::new();
        let alert = new_alert("WEATHER", "Harbor");

        let stored = store.create(alert.clone()).await.unwrap();
        assert_eq!(stored, alert);

        let found = store.find_by_id(&alert.id).await.unwrap();
        assert_eq!(found, Some(alert));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = InMemoryAlertStore::new();
        let alert = new_alert("WEATHER", "Harbor");
        store.create(alert.clone()).await.unwrap();
        assert!(store.create(alert).await.is_err());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_find_active_filters_and_keeps_order() {
        let store = InMemoryAlertStore::new();
        let first = store.create(new_alert("CROWD", "Downtown")).await.unwrap();
        store.create(new_alert("CROWD", "Harbor")).await.unwrap();
        let third = store.create(new_alert("SECURITY", "Downtown")).await.unwrap();

        let downtown = store
            .find_active(&AlertFilter::location("Downtown"))
            .await
            .unwrap();
        assert_eq!(downtown, vec![first.clone(), third]);

        let crowd = store
            .find_active(&AlertFilter::all().with_kinds([AlertKind::Crowd]))
            .await
            .unwrap();
        assert_eq!(crowd.len(), 2);
        assert_eq!(crowd[0], first);
    }

    #[tokio::test]
    async fn test_resolve_sets_timestamp_once() {
        let first_time = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let store = InMemoryAlertStore::with_clock(Arc::new(FixedClock::new(first_time)));
        let alert = store.create(new_alert("HEALTH", "Old Town")).await.unwrap();

        let resolved = store.resolve(&alert.id).await.unwrap();
        assert_eq!(resolved.status, AlertStatus::Resolved);
        assert_eq!(resolved.resolved_at, Some(first_time));
        assert_eq!(resolved.created_at, alert.created_at);

        let again = store.resolve(&alert.id).await.unwrap();
        assert_eq!(again.resolved_at, Some(first_time));

        let active = store.find_active(&AlertFilter::all()).await.unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_unknown_id() {
        let store = InMemoryAlertStore::new();
        let err = store.resolve(&AlertId::from("ALERT-DEADBEEF")).await.unwrap_err();
        assert!(matches!(err, AlertError::NotFound(_)));
    }
}
