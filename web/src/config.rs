//! Configuration for the two binaries.
//!
//! Values are layered: built-in defaults, then an optional TOML file named by
//! `ALERTS_CONFIG`, then `ALERTS_*` environment variables. The result is
//! validated before use.
//!
//! ```no_run
//! use tourism_alerts_web::config::OrchestratorConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = OrchestratorConfig::load()?;
//! println!("stream source: {}", config.service_url);
//! # Ok(())
//! # }
//! ```
//!
//! Example file:
//!
//! ```toml
//! environment = "production"
//! bind_addr = "0.0.0.0:8080"
//! service_url = "http://notification-service:9090"
//! stream_kinds = ["SECURITY", "HEALTH"]
//!
//! [breaker]
//! failure_rate_threshold = 0.5
//! cool_down_ms = 10000
//!
//! [reconnect]
//! initial_ms = 250
//! ```

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tourism_alerts_core::{AlertFilter, AlertKind};
use tourism_alerts_runtime::broadcaster::BroadcasterConfig;
use tourism_alerts_runtime::retry::RetryPolicy;
use tourism_alerts_runtime::{CircuitBreakerConfig, ReconciliationConfig};

/// Variable naming the TOML file to load.
pub const CONFIG_FILE_VAR: &str = "ALERTS_CONFIG";

/// Variable selecting the [`Environment`].
pub const ENVIRONMENT_VAR: &str = "ALERTS_ENV";

/// Configuration error
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// Path from `ALERTS_CONFIG`.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this config.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment variable holds an unparsable value.
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
    },

    /// Unknown deployment environment.
    #[error("Invalid environment: {0}")]
    InvalidEnvironment(String),

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

/// Deployment environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Development environment (local)
    #[default]
    Development,
    /// Staging environment (pre-production)
    Staging,
    /// Production environment
    Production,
}

impl Environment {
    /// Log filter used when `RUST_LOG` is not set.
    #[must_use]
    pub const fn default_log_filter(self) -> &'static str {
        match self {
            Self::Development => {
                "info,tourism_alerts_runtime=debug,tourism_alerts_client=debug,tourism_alerts_web=debug"
            }
            Self::Staging => "info",
            Self::Production => "info,tower_http=warn",
        }
    }

    /// Check if this is production environment
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Development),
            "staging" | "stage" => Ok(Self::Staging),
            "prod" | "production" => Ok(Self::Production),
            _ => Err(ConfigError::InvalidEnvironment(s.to_string())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Staging => write!(f, "staging"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// Variable lookup; `std::env::var` in production, a map in tests.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

trait Layered: DeserializeOwned + Default {
    fn environment_mut(&mut self) -> &mut Environment;
    fn apply_env(&mut self, lookup: Lookup<'_>) -> Result<(), ConfigError>;
    fn validate(&self) -> Result<(), ConfigError>;
}

fn load_layered<C: Layered>(lookup: Lookup<'_>) -> Result<C, ConfigError> {
    let mut config = match lookup(CONFIG_FILE_VAR) {
        Some(path) => {
            let content =
                std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
            tracing::info!(path = %path, "Loaded configuration file");
            toml::from_str(&content)?
        }
        None => C::default(),
    };

    if let Some(env) = lookup(ENVIRONMENT_VAR) {
        *config.environment_mut() = env.parse()?;
    }
    config.apply_env(lookup)?;
    config.validate()?;
    Ok(config)
}

fn set<T: FromStr>(lookup: Lookup<'_>, key: &'static str, target: &mut T) -> Result<(), ConfigError> {
    if let Some(raw) = lookup(key) {
        *target = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key,
            value: raw.clone(),
        })?;
    }
    Ok(())
}

/// Blank values clear the option.
fn set_optional<T: FromStr>(
    lookup: Lookup<'_>,
    key: &'static str,
    target: &mut Option<T>,
) -> Result<(), ConfigError> {
    if let Some(raw) = lookup(key) {
        let trimmed = raw.trim();
        *target = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.parse().map_err(|_| ConfigError::InvalidValue {
                key,
                value: raw.clone(),
            })?)
        };
    }
    Ok(())
}

fn ensure(condition: bool, message: &str) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::Validation(message.to_string()))
    }
}

/// Settings of the notification service binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Deployment environment.
    pub environment: Environment,
    /// Address of the RPC listener.
    pub bind_addr: SocketAddr,
    /// Capacity of the live feed shared by all open streams.
    pub stream_buffer: usize,
    /// Separate metrics listener; `/metrics` is served on `bind_addr` when unset.
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            stream_buffer: tourism_alerts_runtime::service::DEFAULT_STREAM_BUFFER,
            metrics_addr: None,
        }
    }
}

impl ServiceConfig {
    /// Load from `ALERTS_CONFIG` and the process environment.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, a variable is
    /// malformed, or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the process environment.
    ///
    /// # Errors
    ///
    /// See [`ServiceConfig::load`].
    pub fn load_from(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        load_layered(lookup)
    }
}

impl Layered for ServiceConfig {
    fn environment_mut(&mut self) -> &mut Environment {
        &mut self.environment
    }

    fn apply_env(&mut self, lookup: Lookup<'_>) -> Result<(), ConfigError> {
        set(lookup, "ALERTS_BIND_ADDR", &mut self.bind_addr)?;
        set(lookup, "ALERTS_STREAM_BUFFER", &mut self.stream_buffer)?;
        set_optional(lookup, "ALERTS_METRICS_ADDR", &mut self.metrics_addr)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        ensure(self.stream_buffer > 0, "stream_buffer must be positive")
    }
}

/// Circuit breaker settings (`[breaker]` table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Failure ratio over the window that opens the circuit.
    pub failure_rate_threshold: f64,
    /// Outcomes required in the window before the rate is evaluated.
    pub minimum_calls: usize,
    /// Number of recent outcomes kept.
    pub window_size: usize,
    /// Consecutive failures that open the circuit.
    pub consecutive_failure_threshold: usize,
    /// Time spent open before probing.
    pub cool_down_ms: u64,
    /// Successful probes that close the circuit.
    pub success_threshold: usize,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_rate_threshold: defaults.failure_rate_threshold,
            minimum_calls: defaults.minimum_calls,
            window_size: defaults.window_size,
            consecutive_failure_threshold: defaults.consecutive_failures,
            cool_down_ms: u64::try_from(defaults.cool_down.as_millis()).unwrap_or(u64::MAX),
            success_threshold: defaults.success_threshold,
        }
    }
}

/// Stream reconnect backoff (`[reconnect]` table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    /// First delay.
    pub initial_ms: u64,
    /// Delay cap.
    pub max_ms: u64,
    /// Growth factor per attempt.
    pub multiplier: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

/// Settings of the alert orchestrator binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Deployment environment.
    pub environment: Environment,
    /// Address of the REST/SSE listener.
    pub bind_addr: SocketAddr,
    /// Base URL of the notification service.
    pub service_url: String,
    /// Deadline for unary calls.
    pub deadline_ms: u64,
    /// Circuit breaker.
    pub breaker: BreakerSettings,
    /// Reconciliation period.
    pub reconcile_period_secs: u64,
    /// Location the reconciliation loop snapshots.
    pub reconcile_location: String,
    /// Capacity of the recently-seen set and of the client's recent-alert ring.
    pub recent_capacity: usize,
    /// Location filter of the supervised stream; unset streams everything.
    pub stream_location: Option<String>,
    /// Kind filter of the supervised stream; empty streams every kind.
    pub stream_kinds: Vec<String>,
    /// Per-subscriber queue length.
    pub subscriber_buffer: usize,
    /// Idle timeout for subscribers with undelivered events; `0` disables it.
    pub subscriber_idle_secs: u64,
    /// Stream reconnect backoff.
    pub reconnect: ReconnectSettings,
    /// Separate metrics listener; `/metrics` is served on `bind_addr` when unset.
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let reconcile = ReconciliationConfig::default();
        Self {
            environment: Environment::Development,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            service_url: "http://localhost:9090".to_string(),
            deadline_ms: 5_000,
            breaker: BreakerSettings::default(),
            reconcile_period_secs: reconcile.period.as_secs(),
            reconcile_location: reconcile.location,
            recent_capacity: reconcile.capacity,
            stream_location: None,
            stream_kinds: Vec::new(),
            subscriber_buffer: BroadcasterConfig::default().buffer,
            subscriber_idle_secs: 300,
            reconnect: ReconnectSettings::default(),
            metrics_addr: None,
        }
    }
}

impl OrchestratorConfig {
    /// Load from `ALERTS_CONFIG` and the process environment.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, a variable is
    /// malformed, or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the process environment.
    ///
    /// # Errors
    ///
    /// See [`OrchestratorConfig::load`].
    pub fn load_from(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        load_layered(lookup)
    }

    /// Unary call deadline.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    /// Circuit breaker configuration.
    #[must_use]
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::builder()
            .failure_rate_threshold(self.breaker.failure_rate_threshold)
            .window_size(self.breaker.window_size)
            .minimum_calls(self.breaker.minimum_calls)
            .consecutive_failures(self.breaker.consecutive_failure_threshold)
            .cool_down(Duration::from_millis(self.breaker.cool_down_ms))
            .success_threshold(self.breaker.success_threshold)
            .build()
    }

    /// Reconnect policy of the stream supervisor.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .initial_delay(Duration::from_millis(self.reconnect.initial_ms))
            .max_delay(Duration::from_millis(self.reconnect.max_ms))
            .multiplier(self.reconnect.multiplier)
            .build()
    }

    /// Reconciliation loop configuration.
    #[must_use]
    pub fn reconciliation_config(&self) -> ReconciliationConfig {
        ReconciliationConfig {
            period: Duration::from_secs(self.reconcile_period_secs),
            location: self.reconcile_location.clone(),
            capacity: self.recent_capacity,
        }
    }

    /// Broadcaster configuration.
    #[must_use]
    pub const fn broadcaster_config(&self) -> BroadcasterConfig {
        BroadcasterConfig {
            buffer: self.subscriber_buffer,
        }
    }

    /// Idle timeout passed to the broadcaster sweep.
    #[must_use]
    pub const fn subscriber_idle(&self) -> Option<Duration> {
        if self.subscriber_idle_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.subscriber_idle_secs))
        }
    }

    /// Filter of the supervised stream.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for an unknown kind.
    pub fn stream_filter(&self) -> Result<AlertFilter, ConfigError> {
        let kinds = self
            .stream_kinds
            .iter()
            .map(|kind| kind.parse::<AlertKind>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConfigError::Validation(format!("stream_kinds: {e}")))?;

        Ok(AlertFilter {
            location: self.stream_location.clone(),
            kinds,
            min_severity: None,
        })
    }
}

impl Layered for OrchestratorConfig {
    fn environment_mut(&mut self) -> &mut Environment {
        &mut self.environment
    }

    fn apply_env(&mut self, lookup: Lookup<'_>) -> Result<(), ConfigError> {
        set(lookup, "ALERTS_BIND_ADDR", &mut self.bind_addr)?;
        set(lookup, "ALERTS_SERVICE_URL", &mut self.service_url)?;
        set(lookup, "ALERTS_DEADLINE_MS", &mut self.deadline_ms)?;

        let breaker = &mut self.breaker;
        set(lookup, "ALERTS_BREAKER_FAILURE_RATE_THRESHOLD", &mut breaker.failure_rate_threshold)?;
        set(lookup, "ALERTS_BREAKER_MINIMUM_CALLS", &mut breaker.minimum_calls)?;
        set(lookup, "ALERTS_BREAKER_WINDOW_SIZE", &mut breaker.window_size)?;
        set(
            lookup,
            "ALERTS_BREAKER_CONSECUTIVE_FAILURE_THRESHOLD",
            &mut breaker.consecutive_failure_threshold,
        )?;
        set(lookup, "ALERTS_BREAKER_COOL_DOWN_MS", &mut breaker.cool_down_ms)?;
        set(lookup, "ALERTS_BREAKER_SUCCESS_THRESHOLD", &mut breaker.success_threshold)?;

        set(lookup, "ALERTS_RECONCILE_PERIOD_SECS", &mut self.reconcile_period_secs)?;
        set(lookup, "ALERTS_RECONCILE_LOCATION", &mut self.reconcile_location)?;
        set(lookup, "ALERTS_RECENT_CAPACITY", &mut self.recent_capacity)?;
        set_optional(lookup, "ALERTS_STREAM_LOCATION", &mut self.stream_location)?;
        if let Some(kinds) = lookup("ALERTS_STREAM_KINDS") {
            self.stream_kinds = kinds
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
        }
        set(lookup, "ALERTS_SUBSCRIBER_BUFFER", &mut self.subscriber_buffer)?;
        set(lookup, "ALERTS_SUBSCRIBER_IDLE_SECS", &mut self.subscriber_idle_secs)?;

        set(lookup, "ALERTS_RECONNECT_INITIAL_MS", &mut self.reconnect.initial_ms)?;
        set(lookup, "ALERTS_RECONNECT_MAX_MS", &mut self.reconnect.max_ms)?;
        set(lookup, "ALERTS_RECONNECT_MULTIPLIER", &mut self.reconnect.multiplier)?;

        set_optional(lookup, "ALERTS_METRICS_ADDR", &mut self.metrics_addr)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        ensure(
            self.service_url.starts_with("http://") || self.service_url.starts_with("https://"),
            "service_url must be an http(s) URL",
        )?;
        ensure(self.deadline_ms > 0, "deadline_ms must be positive")?;

        let breaker = &self.breaker;
        ensure(
            breaker.failure_rate_threshold > 0.0 && breaker.failure_rate_threshold <= 1.0,
            "breaker.failure_rate_threshold must be in (0, 1]",
        )?;
        ensure(breaker.window_size > 0, "breaker.window_size must be positive")?;
        ensure(breaker.minimum_calls > 0, "breaker.minimum_calls must be positive")?;
        ensure(
            breaker.consecutive_failure_threshold > 0,
            "breaker.consecutive_failure_threshold must be positive",
        )?;
        ensure(breaker.success_threshold > 0, "breaker.success_threshold must be positive")?;

        ensure(self.reconcile_period_secs > 0, "reconcile_period_secs must be positive")?;
        ensure(self.recent_capacity > 0, "recent_capacity must be positive")?;
        ensure(self.subscriber_buffer > 0, "subscriber_buffer must be positive")?;

        ensure(self.reconnect.multiplier >= 1.0, "reconnect.multiplier must be at least 1")?;
        ensure(
            self.reconnect.initial_ms <= self.reconnect.max_ms,
            "reconnect.initial_ms must not exceed reconnect.max_ms",
        )?;

        self.stream_filter().map(|_| ())
    }
}
