//! Severity-based local routing of received alerts.
//!
//! Every alert that reaches the client is classified into a [`SeverityTier`]
//! and handed to the matching [`Notifier`] action.
//!
//! | Severity | Tier            | Action                        |
//! |----------|-----------------|-------------------------------|
//! | 5        | `Critical`      | notify emergency services     |
//! | 4        | `High`          | notify security team          |
//! | 3        | `Moderate`      | notify tourist guides         |
//! | 1-2      | `Informational` | logged only                   |

use serde::Serialize;
use std::sync::Arc;
use tourism_alerts_core::Alert;

/// Routing class derived from severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeverityTier {
    /// Severity 5.
    Critical,
    /// Severity 4.
    High,
    /// Severity 3.
    Moderate,
    /// Severity 1 or 2.
    Informational,
}

impl SeverityTier {
    /// Classify a severity. Values above 5 count as critical.
    #[must_use]
    pub const fn classify(severity: u8) -> Self {
        match severity {
            5.. => Self::Critical,
            4 => Self::High,
            3 => Self::Moderate,
            _ => Self::Informational,
        }
    }
}

/// Downstream notification actions.
///
/// These are stand-ins for integrations with emergency dispatch, security
/// staff and guide apps.
pub trait Notifier: Send + Sync {
    /// Critical alerts.
    fn notify_emergency_services(&self, alert: &Alert);

    /// High-severity alerts.
    fn notify_security_team(&self, alert: &Alert);

    /// Moderate alerts.
    fn notify_tourist_guides(&self, alert: &Alert);
}

/// [`Notifier`] that writes each action to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

impl Notifier for LoggingNotifier {
    fn notify_emergency_services(&self, alert: &Alert) {
        tracing::error!(alert_id = %alert.id, location = %alert.location, "Notifying emergency services");
    }

    fn notify_security_team(&self, alert: &Alert) {
        tracing::warn!(alert_id = %alert.id, location = %alert.location, "Notifying security team");
    }

    fn notify_tourist_guides(&self, alert: &Alert) {
        tracing::info!(alert_id = %alert.id, location = %alert.location, "Notifying tourist guides");
    }
}

/// Dispatches alerts to a [`Notifier`] by tier.
#[derive(Clone)]
pub struct AlertRouter {
    notifier: Arc<dyn Notifier>,
}

impl AlertRouter {
    /// Route through `notifier`.
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Classify `alert` and run the tier's action.
    pub fn route(&self, alert: &Alert) -> SeverityTier {
        let tier = SeverityTier::classify(alert.severity);
        match tier {
            SeverityTier::Critical => self.notifier.notify_emergency_services(alert),
            SeverityTier::High => self.notifier.notify_security_team(alert),
            SeverityTier::Moderate => self.notifier.notify_tourist_guides(alert),
            SeverityTier::Informational => {
                tracing::debug!(alert_id = %alert.id, severity = alert.severity, "Informational alert");
            }
        }
        tier
    }
}

impl Default for AlertRouter {
    fn default() -> Self {
        Self::new(Arc::new(LoggingNotifier))
    }
}

impl std::fmt::Debug for AlertRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertRouter").finish_non_exhaustive()
    }
}
