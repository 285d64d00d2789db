//! Circuit breaker for calls to the alert service.
//!
//! A circuit breaker monitors operations and "opens" (stops allowing requests) when
//! failures exceed a threshold, so callers fail fast instead of waiting on a
//! service that is down.
//!
//! # States
//!
//! - **Closed**: Normal operation. Outcomes are recorded in a rolling window.
//! - **Open**: Too many failures. Requests are rejected for the cool-down period.
//! - **HalfOpen**: After the cool-down, requests probe the service; enough
//!   successes close the circuit, any failure re-opens it.
//!
//! # Opening
//!
//! The circuit opens from Closed when either:
//! - `consecutive_failures` failures happen in a row, or
//! - the window holds at least `minimum_calls` outcomes and the failure
//!   ratio over the last `window_size` calls reaches `failure_rate_threshold`.
//!
//! # Example
//!
//! ```rust
//! use tourism_alerts_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let config = CircuitBreakerConfig::builder()
//!     .failure_rate_threshold(0.5)
//!     .window_size(10)
//!     .cool_down(Duration::from_secs(30))
//!     .build();
//!
//! let breaker = CircuitBreaker::new("alert-service", config);
//!
//! match breaker.call(|| async { Ok::<_, String>(42) }).await {
//!     Ok(result) => println!("Success: {result}"),
//!     Err(e) => println!("Failed: {e}"),
//! }
//! # }
//! ```

use crate::metrics::BreakerMetrics;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit regardless of the window
    pub consecutive_failures: usize,
    /// Failure ratio (0.0-1.0] over the window that opens the circuit
    pub failure_rate_threshold: f64,
    /// Number of most recent outcomes kept in the rolling window
    pub window_size: usize,
    /// Outcomes required in the window before the ratio is evaluated
    pub minimum_calls: usize,
    /// Duration to wait before transitioning from Open to `HalfOpen`
    pub cool_down: Duration,
    /// Number of successes in `HalfOpen` state before closing the circuit
    pub success_threshold: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub const fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder {
            consecutive_failures: None,
            failure_rate_threshold: None,
            window_size: None,
            minimum_calls: None,
            cool_down: None,
            success_threshold: None,
        }
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    consecutive_failures: Option<usize>,
    failure_rate_threshold: Option<f64>,
    window_size: Option<usize>,
    minimum_calls: Option<usize>,
    cool_down: Option<Duration>,
    success_threshold: Option<usize>,
}

impl CircuitBreakerConfigBuilder {
    /// Set the consecutive failure threshold.
    #[must_use]
    pub const fn consecutive_failures(mut self, threshold: usize) -> Self {
        self.consecutive_failures = Some(threshold);
        self
    }

    /// Set the failure ratio that opens the circuit.
    #[must_use]
    pub const fn failure_rate_threshold(mut self, ratio: f64) -> Self {
        self.failure_rate_threshold = Some(ratio);
        self
    }

    /// Set the rolling window size.
    #[must_use]
    pub const fn window_size(mut self, size: usize) -> Self {
        self.window_size = Some(size);
        self
    }

    /// Set the minimum number of calls before the ratio applies.
    #[must_use]
    pub const fn minimum_calls(mut self, calls: usize) -> Self {
        self.minimum_calls = Some(calls);
        self
    }

    /// Set how long the circuit stays open.
    #[must_use]
    pub const fn cool_down(mut self, duration: Duration) -> Self {
        self.cool_down = Some(duration);
        self
    }

    /// Set the success threshold.
    ///
    /// Number of successes in `HalfOpen` state before closing the circuit.
    #[must_use]
    pub const fn success_threshold(mut self, threshold: usize) -> Self {
        self.success_threshold = Some(threshold);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> CircuitBreakerConfig {
        let window_size = self.window_size.unwrap_or(10).max(1);
        CircuitBreakerConfig {
            consecutive_failures: self.consecutive_failures.unwrap_or(5).max(1),
            failure_rate_threshold: self.failure_rate_threshold.unwrap_or(0.5),
            window_size,
            minimum_calls: self.minimum_calls.unwrap_or(5).clamp(1, window_size),
            cool_down: self.cool_down.unwrap_or(Duration::from_secs(30)),
            success_threshold: self.success_threshold.unwrap_or(2).max(1),
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, requests fail immediately
    Open,
    /// Circuit is half-open, testing if service recovered
    HalfOpen,
}

impl State {
    const fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

/// Errors from circuit breaker operations.
#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, request rejected
    #[error("Circuit breaker is open")]
    Open,
    /// Operation failed
    #[error("Operation failed: {0}")]
    Inner(E),
}

/// Internal state of the circuit breaker.
#[derive(Debug)]
struct CircuitBreakerState {
    state: State,
    /// Rolling window of outcomes, `true` = failure
    window: VecDeque<bool>,
    consecutive_failures: usize,
    success_count: usize,
    opened_at: Option<Instant>,
}

impl CircuitBreakerState {
    fn record(&mut self, failed: bool, window_size: usize) {
        if self.window.len() == window_size {
            self.window.pop_front();
        }
        self.window.push_back(failed);
    }

    #[allow(clippy::cast_precision_loss)]
    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|failed| **failed).count();
        failures as f64 / self.window.len() as f64
    }

    fn trip(&mut self) {
        self.state = State::Open;
        self.opened_at = Some(Instant::now());
        self.success_count = 0;
        BreakerMetrics::record_state(State::Open.gauge_value());
    }

    fn close(&mut self) {
        self.state = State::Closed;
        self.window.clear();
        self.consecutive_failures = 0;
        self.success_count = 0;
        self.opened_at = None;
        BreakerMetrics::record_state(State::Closed.gauge_value());
    }
}

/// Circuit breaker for preventing cascading failures.
///
/// Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    state: Arc<RwLock<CircuitBreakerState>>,
    // Metrics
    total_calls: Arc<AtomicU64>,
    total_successes: Arc<AtomicU64>,
    total_failures: Arc<AtomicU64>,
    total_rejections: Arc<AtomicU64>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(RwLock::new(CircuitBreakerState {
                state: State::Closed,
                window: VecDeque::with_capacity(config.window_size),
                consecutive_failures: 0,
                success_count: 0,
                opened_at: None,
            })),
            config: Arc::new(config),
            total_calls: Arc::new(AtomicU64::new(0)),
            total_successes: Arc::new(AtomicU64::new(0)),
            total_failures: Arc::new(AtomicU64::new(0)),
            total_rejections: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current state of the circuit breaker.
    pub async fn state(&self) -> State {
        let state = self.state.read().await;
        state.state
    }

    /// Call an operation through the circuit breaker.
    ///
    /// The operation is not invoked at all while the circuit is open.
    ///
    /// # Errors
    ///
    /// Returns `CircuitBreakerError::Open` if the circuit is open.
    /// Returns `CircuitBreakerError::Inner` if the operation fails.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        if !self.can_attempt().await {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            BreakerMetrics::record_rejection();
            tracing::warn!(breaker = %self.name, "Circuit breaker is OPEN, rejecting request");
            return Err(CircuitBreakerError::Open);
        }

        match operation().await {
            Ok(result) => {
                self.on_success().await;
                self.total_successes.fetch_add(1, Ordering::Relaxed);
                Ok(result)
            }
            Err(err) => {
                self.on_failure().await;
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    /// Check if the circuit breaker should allow an attempt.
    async fn can_attempt(&self) -> bool {
        let mut state = self.state.write().await;

        match state.state {
            State::Closed | State::HalfOpen => true,
            State::Open => {
                let cooled = state
                    .opened_at
                    .is_some_and(|opened| opened.elapsed() >= self.config.cool_down);
                if cooled {
                    tracing::info!(breaker = %self.name, "Circuit breaker transitioning OPEN -> HALF_OPEN");
                    state.state = State::HalfOpen;
                    state.success_count = 0;
                    BreakerMetrics::record_state(State::HalfOpen.gauge_value());
                }
                cooled
            }
        }
    }

    /// Handle successful operation.
    async fn on_success(&self) {
        let mut state = self.state.write().await;

        match state.state {
            State::Closed => {
                state.consecutive_failures = 0;
                state.record(false, self.config.window_size);
            }
            State::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    tracing::info!(
                        breaker = %self.name,
                        successes = state.success_count,
                        "Circuit breaker transitioning HALF_OPEN -> CLOSED"
                    );
                    state.close();
                }
            }
            // A call admitted before another caller tripped the circuit.
            State::Open => {}
        }
    }

    /// Handle failed operation.
    async fn on_failure(&self) {
        let mut state = self.state.write().await;

        match state.state {
            State::Closed => {
                state.consecutive_failures += 1;
                state.record(true, self.config.window_size);

                let rate = state.failure_rate();
                let rate_exceeded = state.window.len() >= self.config.minimum_calls
                    && rate >= self.config.failure_rate_threshold;
                if state.consecutive_failures >= self.config.consecutive_failures || rate_exceeded {
                    tracing::warn!(
                        breaker = %self.name,
                        consecutive = state.consecutive_failures,
                        failure_rate = rate,
                        "Circuit breaker transitioning CLOSED -> OPEN"
                    );
                    state.trip();
                }
            }
            State::HalfOpen => {
                tracing::warn!(
                    breaker = %self.name,
                    "Circuit breaker transitioning HALF_OPEN -> OPEN (recovery failed)"
                );
                state.trip();
            }
            State::Open => {}
        }
    }

    /// Get circuit breaker metrics.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }
}

/// Metrics for circuit breaker monitoring.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CircuitBreakerMetrics {
    /// Total number of calls attempted
    pub total_calls: u64,
    /// Total number of successful calls
    pub total_successes: u64,
    /// Total number of failed calls
    pub total_failures: u64,
    /// Total number of rejected calls (circuit open)
    pub total_rejections: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn breaker(config: CircuitBreakerConfig) -> CircuitBreaker {
        CircuitBreaker::new("test", config)
    }

    async fn fail(breaker: &CircuitBreaker, times: usize) {
        for _ in 0..times {
            let _ = breaker.call(|| async { Err::<i32, _>("error") }).await;
        }
    }

    async fn succeed(breaker: &CircuitBreaker, times: usize) {
        for _ in 0..times {
            let _ = breaker.call(|| async { Ok::<_, String>(42) }).await;
        }
    }

    #[tokio::test]
    async fn test_circuit_breaker_closed_on_success() {
        let breaker = breaker(CircuitBreakerConfig::default());

        let result = breaker.call(|| async { Ok::<_, String>(42) }).await;

        assert!(result.is_ok());
        assert_eq!(breaker.state().await, State::Closed);
    }

    #[tokio::test]
    async fn test_opens_after_consecutive_failures() {
        let breaker = breaker(
            CircuitBreakerConfig::builder()
                .consecutive_failures(3)
                .minimum_calls(10)
                .window_size(10)
                .build(),
        );

        fail(&breaker, 2).await;
        assert_eq!(breaker.state().await, State::Closed);

        fail(&breaker, 1).await;
        assert_eq!(breaker.state().await, State::Open);
    }

    #[tokio::test]
    async fn test_opens_when_failure_rate_exceeded() {
        let breaker = breaker(
            CircuitBreakerConfig::builder()
                .consecutive_failures(100)
                .failure_rate_threshold(0.5)
                .window_size(4)
                .minimum_calls(4)
                .build(),
        );

        // success, failure, success -> 3 calls, under minimum
        succeed(&breaker, 1).await;
        fail(&breaker, 1).await;
        succeed(&breaker, 1).await;
        assert_eq!(breaker.state().await, State::Closed);

        // 4th call is a failure: 2/4 = 0.5
        fail(&breaker, 1).await;
        assert_eq!(breaker.state().await, State::Open);
    }

    #[tokio::test]
    async fn test_window_forgets_old_failures() {
        let breaker = breaker(
            CircuitBreakerConfig::builder()
                .consecutive_failures(100)
                .failure_rate_threshold(0.5)
                .window_size(4)
                .minimum_calls(4)
                .build(),
        );

        fail(&breaker, 1).await;
        succeed(&breaker, 4).await;
        // Window now holds four successes; one failure is 1/4.
        fail(&breaker, 1).await;
        assert_eq!(breaker.state().await, State::Closed);
    }

    #[tokio::test]
    async fn test_open_circuit_does_not_invoke_operation() {
        let breaker = breaker(CircuitBreakerConfig::builder().consecutive_failures(2).build());
        fail(&breaker, 2).await;

        let invoked = AtomicUsize::new(0);
        let result = breaker
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(42)
            })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Open)));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.metrics().total_rejections, 1);
    }

    #[tokio::test]
    async fn test_transitions_to_half_open_then_closes() {
        let breaker = breaker(
            CircuitBreakerConfig::builder()
                .consecutive_failures(2)
                .cool_down(Duration::from_millis(50))
                .success_threshold(2)
                .build(),
        );
        fail(&breaker, 2).await;
        assert_eq!(breaker.state().await, State::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        succeed(&breaker, 1).await;
        assert_eq!(breaker.state().await, State::HalfOpen);

        succeed(&breaker, 1).await;
        assert_eq!(breaker.state().await, State::Closed);
    }

    #[tokio::test]
    async fn test_reopens_on_half_open_failure() {
        let breaker = breaker(
            CircuitBreakerConfig::builder()
                .consecutive_failures(2)
                .cool_down(Duration::from_millis(50))
                .build(),
        );
        fail(&breaker, 2).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        fail(&breaker, 1).await;

        assert_eq!(breaker.state().await, State::Open);
    }

    #[tokio::test]
    async fn test_circuit_breaker_metrics() {
        let breaker = breaker(CircuitBreakerConfig::default());

        succeed(&breaker, 3).await;
        fail(&breaker, 2).await;

        let metrics = breaker.metrics();
        assert_eq!(metrics.total_calls, 5);
        assert_eq!(metrics.total_successes, 3);
        assert_eq!(metrics.total_failures, 2);
        assert_eq!(metrics.total_rejections, 0);
    }

    #[test]
    fn test_builder_clamps_minimum_calls_to_window() {
        let config = CircuitBreakerConfig::builder()
            .window_size(3)
            .minimum_calls(10)
            .build();
        assert_eq!(config.minimum_calls, 3);
    }
}
