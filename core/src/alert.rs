//! Alert model.
//!
//! An [`Alert`] is the unit of distribution in the pipeline. Alerts are created
//! by the store (ACTIVE), may be resolved exactly once (RESOLVED), and are
//! otherwise immutable. The resilient client may synthesize a degraded alert
//! with status [`AlertStatus::Fallback`] when the alert service is unreachable;
//! such alerts were never persisted.

use crate::error::AlertError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lowest accepted severity.
pub const MIN_SEVERITY: u8 = 1;

/// Highest accepted severity.
pub const MAX_SEVERITY: u8 = 5;

/// Maximum message length in characters.
pub const MAX_MESSAGE_LEN: usize = 1000;

/// Opaque alert identifier (`ALERT-` followed by 8 uppercase hex digits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(String);

impl AlertId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self(format!("ALERT-{}", simple[..8].to_uppercase()))
    }

    /// Wrap an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AlertId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Closed set of alert kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    /// Storms, heat waves, flooding.
    Weather,
    /// Incidents requiring security staff.
    Security,
    /// Overcrowding at a site.
    Crowd,
    /// Road and transport disruption.
    Traffic,
    /// Public health notices.
    Health,
    /// General information.
    General,
    /// Anything else.
    Other,
}

impl AlertKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Weather,
        Self::Security,
        Self::Crowd,
        Self::Traffic,
        Self::Health,
        Self::General,
        Self::Other,
    ];

    /// Canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Weather => "WEATHER",
            Self::Security => "SECURITY",
            Self::Crowd => "CROWD",
            Self::Traffic => "TRAFFIC",
            Self::Health => "HEALTH",
            Self::General => "GENERAL",
            Self::Other => "OTHER",
        }
    }

    /// Parse a comma separated list of kinds (`"WEATHER,crowd"`).
    ///
    /// Blank entries are skipped, so an empty string yields an empty set.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::InvalidArgument`] for the first unrecognized entry.
    pub fn parse_list(list: &str) -> Result<Vec<Self>, AlertError> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for AlertKind {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == upper)
            .ok_or_else(|| AlertError::InvalidArgument(format!("unrecognized alert kind: {s:?}")))
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    /// Alert is in effect.
    Active,
    /// Alert has been resolved; terminal.
    Resolved,
    /// Degraded response synthesized by the client; never stored.
    Fallback,
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "ACTIVE",
            Self::Resolved => "RESOLVED",
            Self::Fallback => "FALLBACK",
        })
    }
}

/// Clamp a raw severity into `[MIN_SEVERITY, MAX_SEVERITY]`.
#[must_use]
pub fn clamp_severity(raw: i64) -> u8 {
    // Bounded by the clamp, the cast cannot truncate.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let severity = raw.clamp(i64::from(MIN_SEVERITY), i64::from(MAX_SEVERITY)) as u8;
    severity
}

/// Raw submission as received from a caller, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitAlert {
    /// Kind name; validated against [`AlertKind`].
    pub kind: String,
    /// Free-text place identifier.
    pub location: String,
    /// Human-readable text.
    pub message: String,
    /// Unclamped severity.
    pub severity: i64,
}

impl SubmitAlert {
    /// Build a submission.
    #[must_use]
    pub fn new(
        kind: impl Into<String>,
        location: impl Into<String>,
        message: impl Into<String>,
        severity: i64,
    ) -> Self {
        Self {
            kind: kind.into(),
            location: location.into(),
            message: message.into(),
            severity,
        }
    }

    /// Validate the submission and produce the normalized form.
    ///
    /// Kind must be recognized and the message must fit [`MAX_MESSAGE_LEN`];
    /// severity is clamped, never rejected.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::InvalidArgument`] on an unknown kind or an
    /// over-long message.
    pub fn validate(&self) -> Result<ValidatedAlert, AlertError> {
        let kind: AlertKind = self.kind.parse()?;
        if self.message.chars().count() > MAX_MESSAGE_LEN {
            return Err(AlertError::InvalidArgument(format!(
                "message exceeds {MAX_MESSAGE_LEN} characters"
            )));
        }
        Ok(ValidatedAlert {
            kind,
            location: self.location.clone(),
            message: self.message.clone(),
            severity: clamp_severity(self.severity),
        })
    }
}

/// A submission that passed validation; severity is already clamped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedAlert {
    /// Recognized kind.
    pub kind: AlertKind,
    /// Place identifier.
    pub location: String,
    /// Message text.
    pub message: String,
    /// Severity in `1..=5`.
    pub severity: u8,
}

/// The unit of distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Immutable identifier.
    pub id: AlertId,
    /// Alert kind.
    pub kind: AlertKind,
    /// Place identifier.
    pub location: String,
    /// Message text.
    pub message: String,
    /// Severity in `1..=5`.
    pub severity: u8,
    /// Lifecycle status.
    pub status: AlertStatus,
    /// Creation time, set once.
    pub created_at: DateTime<Utc>,
    /// Resolution time; present iff status is RESOLVED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// Create a fresh ACTIVE alert from a validated submission.
    #[must_use]
    pub fn active(validated: ValidatedAlert, created_at: DateTime<Utc>) -> Self {
        Self {
            id: AlertId::generate(),
            kind: validated.kind,
            location: validated.location,
            message: validated.message,
            severity: validated.severity,
            status: AlertStatus::Active,
            created_at,
            resolved_at: None,
        }
    }

    /// Synthesize the degraded stand-in returned when the service is down.
    ///
    /// The alert carries [`AlertStatus::Fallback`] and a `FALLBACK-` id so it
    /// can never be confused with a stored alert.
    #[must_use]
    pub fn fallback(validated: ValidatedAlert, created_at: DateTime<Utc>) -> Self {
        let generated = AlertId::generate();
        let suffix = generated.as_str().trim_start_matches("ALERT-");
        Self {
            id: AlertId::new(format!("FALLBACK-{suffix}")),
            kind: validated.kind,
            location: validated.location,
            message: format!("Service temporarily unavailable: {}", validated.message),
            severity: validated.severity,
            status: AlertStatus::Fallback,
            created_at,
            resolved_at: None,
        }
    }

    /// Whether the alert is currently in effect.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }

    /// Whether this is a client-side degraded stand-in.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.status == AlertStatus::Fallback
    }

    /// Apply the ACTIVE → RESOLVED transition.
    ///
    /// Returns `true` when the transition happened. Resolving an alert that is
    /// already resolved is a no-op and leaves `resolved_at` untouched.
    pub fn resolve(&mut self, at: DateTime<Utc>) -> bool {
        if self.status != AlertStatus::Active {
            return false;
        }
        self.status = AlertStatus::Resolved;
        self.resolved_at = Some(at);
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn submission(kind: &str, severity: i64) -> SubmitAlert {
        SubmitAlert::new(kind, "Downtown", "Incident", severity)
    }

    #[test]
    fn test_alert_id_format() {
        let id = AlertId::generate();
        let suffix = id.as_str().strip_prefix("ALERT-").expect("prefix");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_kind_parsing_is_case_insensitive() {
        assert_eq!("security".parse::<AlertKind>().unwrap(), AlertKind::Security);
        assert_eq!(" Crowd ".parse::<AlertKind>().unwrap(), AlertKind::Crowd);
        assert!(matches!(
            "TRANSPORT".parse::<AlertKind>(),
            Err(AlertError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_kind_list_parsing() {
        assert_eq!(
            AlertKind::parse_list("WEATHER, traffic").unwrap(),
            vec![AlertKind::Weather, AlertKind::Traffic]
        );
        assert!(AlertKind::parse_list("").unwrap().is_empty());
        assert!(AlertKind::parse_list("WEATHER,TEST").is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_kind() {
        let err = submission("TEST", 3).validate().unwrap_err();
        assert!(matches!(err, AlertError::InvalidArgument(_)));
    }

    #[test]
    fn test_validate_rejects_long_message() {
        let mut sub = submission("GENERAL", 3);
        sub.message = "x".repeat(MAX_MESSAGE_LEN + 1);
        assert!(sub.validate().is_err());
    }

    #[test]
    fn test_validate_clamps_severity() {
        assert_eq!(submission("SECURITY", 9).validate().unwrap().severity, 5);
        assert_eq!(submission("SECURITY", -4).validate().unwrap().severity, 1);
        assert_eq!(submission("SECURITY", 3).validate().unwrap().severity, 3);
    }

    #[test]
    fn test_resolve_is_monotonic() {
        let created = Utc::now();
        let mut alert = Alert::active(submission("CROWD", 2).validate().unwrap(), created);
        assert!(alert.resolved_at.is_none());

        let first = created + chrono::Duration::seconds(5);
        assert!(alert.resolve(first));
        assert_eq!(alert.status, AlertStatus::Resolved);
        assert_eq!(alert.resolved_at, Some(first));

        let second = created + chrono::Duration::seconds(10);
        assert!(!alert.resolve(second));
        assert_eq!(alert.resolved_at, Some(first));
    }

    #[test]
    fn test_fallback_is_distinguishable() {
        let validated = submission("WEATHER", 4).validate().unwrap();
        let alert = Alert::fallback(validated, Utc::now());
        assert!(alert.is_fallback());
        assert!(alert.id.as_str().starts_with("FALLBACK-"));
        assert!(alert.message.ends_with("Incident"));
    }

    #[test]
    fn test_alert_serializes_camel_case() {
        let alert = Alert::active(submission("HEALTH", 1).validate().unwrap(), Utc::now());
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["kind"], "HEALTH");
        assert_eq!(json["status"], "ACTIVE");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("resolvedAt").is_none());
    }

    proptest! {
        #[test]
        fn prop_severity_always_clamped(raw in any::<i64>()) {
            let clamped = clamp_severity(raw);
            prop_assert!((MIN_SEVERITY..=MAX_SEVERITY).contains(&clamped));
            prop_assert_eq!(i64::from(clamped), raw.clamp(1, 5));
        }
    }
}
