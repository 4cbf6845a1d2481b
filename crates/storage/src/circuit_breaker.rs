//! Circuit breaker guarding the shared backend.
//!
//! When the backend is unreachable, every operation would otherwise wait out
//! its full timeout before failing. The breaker detects sustained failures,
//! fails fast for a cooldown window, then lets probe requests through to
//! detect recovery.
//!
//! # State Machine
//!
//! ```text
//! ┌────────┐  failure_threshold  ┌──────┐  cooldown since last  ┌──────────┐
//! │ Closed │ ──────reached─────→ │ Open │ ──failure elapsed───→ │ HalfOpen │
//! └────────┘                     └──────┘ ←───any failure────── └──────────┘
//!      ↑                                                             │
//!      └───────────────── success_threshold reached ─────────────────┘
//! ```
//!
//! Every transition happens under one mutex, so concurrent callers observe a
//! linearizable sequence of states and no counter update is lost.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default number of consecutive failures before opening the circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time since the last failure before an open circuit admits probes.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Default number of consecutive half-open successes required to close.
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 3;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation; all requests pass through.
    Closed,
    /// Requests are rejected without touching the backend.
    Open,
    /// Probe requests pass through to test whether the backend recovered.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    failure_threshold: u32,
    /// Time since the last failure before an open circuit goes half-open.
    #[serde(with = "humantime_serde")]
    cooldown: Duration,
    /// Consecutive successful probes required to close the circuit.
    success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
        }
    }
}

#[bon::bon]
impl CircuitBreakerConfig {
    /// Creates a new circuit breaker configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if:
    /// - `failure_threshold` is zero
    /// - `cooldown` is zero
    /// - `success_threshold` is zero
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_FAILURE_THRESHOLD)] failure_threshold: u32,
        #[builder(default = DEFAULT_COOLDOWN)] cooldown: Duration,
        #[builder(default = DEFAULT_SUCCESS_THRESHOLD)] success_threshold: u32,
    ) -> Result<Self, ConfigError> {
        let config = Self { failure_threshold, cooldown, success_threshold };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants enforced by the builder.
    ///
    /// Deserialized configs bypass the builder and must be validated
    /// explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a threshold or the cooldown is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "failure_threshold",
                min: "1".into(),
                value: "0".into(),
            });
        }
        if self.cooldown.is_zero() {
            return Err(ConfigError::MustBePositive { field: "cooldown", value: "0s".into() });
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "success_threshold",
                min: "1".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }

    /// Returns the failure threshold.
    #[must_use]
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Returns the cooldown.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Returns the half-open success threshold.
    #[must_use]
    pub fn success_threshold(&self) -> u32 {
        self.success_threshold
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    /// Monotonic instant of the last recorded failure; drives the cooldown.
    last_failure_at: Option<Instant>,
    /// Wall-clock time of the last failure, for reporting.
    last_failure_wall: Option<DateTime<Utc>>,
    config: CircuitBreakerConfig,

    state_transitions: u64,
    fast_fail_count: u64,
}

impl Inner {
    fn cooldown_elapsed(&self, now: Instant) -> bool {
        self.last_failure_at
            .is_none_or(|at| now.saturating_duration_since(at) >= self.config.cooldown)
    }

    fn transition(&mut self, to: CircuitState) {
        let from = self.state;
        self.state = to;
        self.state_transitions += 1;
        match to {
            CircuitState::Open => tracing::warn!(
                previous_state = %from,
                new_state = %to,
                consecutive_failures = self.consecutive_failures,
                cooldown_secs = self.config.cooldown.as_secs(),
                "circuit breaker opened",
            ),
            _ => tracing::info!(
                previous_state = %from,
                new_state = %to,
                "circuit breaker state changed",
            ),
        }
    }
}

/// Thread-safe circuit breaker.
///
/// All state is behind a `parking_lot::Mutex` with very short critical
/// sections (no I/O under the lock). Clones share state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<Inner>>,
}

/// A snapshot of circuit breaker state and counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerMetrics {
    /// Current circuit state.
    pub state: CircuitState,
    /// Current consecutive failure count.
    pub consecutive_failures: u32,
    /// Current consecutive half-open success count.
    pub consecutive_successes: u32,
    /// Wall-clock time of the most recent failure.
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Total number of state transitions since creation.
    pub state_transitions: u64,
    /// Total number of requests rejected because the circuit was open.
    pub fast_fail_count: u64,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker in the closed state.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure_at: None,
                last_failure_wall: None,
                config,
                state_transitions: 0,
                fast_fail_count: 0,
            })),
        }
    }

    /// Checks whether a request may reach the backend.
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open here
    /// and admits the caller as a probe.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if inner.cooldown_elapsed(Instant::now()) {
                    inner.consecutive_successes = 0;
                    inner.transition(CircuitState::HalfOpen);
                    true
                } else {
                    inner.fast_fail_count += 1;
                    false
                }
            },
        }
    }

    /// Records a successful backend call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            },
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= inner.config.success_threshold {
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.transition(CircuitState::Closed);
                }
            },
            // A straggler admitted before the circuit opened. It proves
            // nothing about recovery.
            CircuitState::Open => {},
        }
    }

    /// Records a failed backend call.
    ///
    /// Only transient failures should be recorded. Permanent errors (not
    /// found, conflict, wrong type) do not indicate backend health issues.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure_at = Some(Instant::now());
        inner.last_failure_wall = Some(Utc::now());
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= inner.config.failure_threshold {
                    inner.transition(CircuitState::Open);
                }
            },
            CircuitState::HalfOpen => {
                inner.consecutive_successes = 0;
                inner.transition(CircuitState::Open);
            },
            // Already open: the fresh failure timestamp restarts the cooldown.
            CircuitState::Open => {},
        }
    }

    /// Returns the current state.
    ///
    /// This is a read-only peek: an open circuit whose cooldown has elapsed
    /// is reported as [`HalfOpen`](CircuitState::HalfOpen) without
    /// transitioning.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        Self::effective_state(&inner)
    }

    /// Returns a snapshot of state and counters.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        CircuitBreakerMetrics {
            state: Self::effective_state(&inner),
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            last_failure_at: inner.last_failure_wall,
            state_transitions: inner.state_transitions,
            fast_fail_count: inner.fast_fail_count,
        }
    }

    /// Returns the configuration this breaker was built with.
    #[must_use]
    pub fn config(&self) -> CircuitBreakerConfig {
        self.inner.lock().config
    }

    fn effective_state(inner: &Inner) -> CircuitState {
        match inner.state {
            CircuitState::Open if inner.cooldown_elapsed(Instant::now()) => CircuitState::HalfOpen,
            other => other,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::*;

    fn test_config(
        failure_threshold: u32,
        cooldown: Duration,
        success_threshold: u32,
    ) -> CircuitBreakerConfig {
        CircuitBreakerConfig { failure_threshold, cooldown, success_threshold }
    }

    fn open_breaker(cooldown: Duration, success_threshold: u32) -> CircuitBreaker {
        let cb = CircuitBreaker::new(test_config(1, cooldown, success_threshold));
        cb.record_failure();
        cb
    }

    #[test]
    fn starts_closed() {
        let cb = CircuitBreaker::default();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(test_config(5, Duration::from_secs(60), 3));

        for _ in 0..4 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn success_resets_failure_count() {
        let cb = CircuitBreaker::new(test_config(3, Duration::from_secs(30), 2));

        cb.record_failure();
        cb.record_failure();
        cb.record_success();

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().consecutive_failures, 2);
    }

    #[test]
    fn transitions_to_half_open_after_cooldown() {
        let cb = open_breaker(Duration::from_millis(10), 1);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());

        std::thread::sleep(Duration::from_millis(15));

        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn straggler_failure_restarts_cooldown() {
        let cb = open_breaker(Duration::from_millis(40), 1);

        std::thread::sleep(Duration::from_millis(25));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(25));

        // 50ms since opening, but only 25ms since the last failure.
        assert!(!cb.allow_request());
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let cb = open_breaker(Duration::from_millis(10), 3);
        std::thread::sleep(Duration::from_millis(15));
        assert!(cb.allow_request());

        cb.record_success();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().consecutive_failures, 0);
    }

    #[test]
    fn half_open_reopens_on_failure_and_clears_successes() {
        let cb = open_breaker(Duration::from_millis(10), 3);
        std::thread::sleep(Duration::from_millis(15));
        assert!(cb.allow_request());

        cb.record_success();
        cb.record_success();
        cb.record_failure();

        let m = cb.metrics();
        assert_eq!(m.state, CircuitState::Open);
        assert_eq!(m.consecutive_successes, 0);
        assert!(m.last_failure_at.is_some());
    }

    #[test]
    fn success_in_open_state_is_ignored() {
        let cb = open_breaker(Duration::from_secs(60), 1);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn metrics_tracking() {
        let cb = CircuitBreaker::new(test_config(2, Duration::from_secs(60), 1));

        cb.record_failure();
        cb.record_failure();

        assert!(!cb.allow_request());
        assert!(!cb.allow_request());

        let m = cb.metrics();
        assert_eq!(m.state, CircuitState::Open);
        assert_eq!(m.state_transitions, 1);
        assert_eq!(m.fast_fail_count, 2);
        assert_eq!(m.consecutive_failures, 2);
    }

    #[test]
    fn full_lifecycle() {
        let cb = CircuitBreaker::new(test_config(2, Duration::from_millis(10), 1));

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(15));
        assert!(cb.allow_request());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);

        // closed→open, open→half_open, half_open→closed
        assert_eq!(cb.metrics().state_transitions, 3);
    }

    #[test]
    fn concurrent_failures_open_exactly_once() {
        let cb = CircuitBreaker::new(test_config(5, Duration::from_secs(60), 3));

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let cb = cb.clone();
                scope.spawn(move || {
                    for _ in 0..25 {
                        cb.record_failure();
                    }
                });
            }
        });

        let m = cb.metrics();
        assert_eq!(m.state, CircuitState::Open);
        assert_eq!(m.consecutive_failures, 200);
        assert_eq!(m.state_transitions, 1);
    }

    #[test]
    fn config_defaults_pass_validation() {
        let config = CircuitBreakerConfig::builder().build().unwrap();
        assert_eq!(config.failure_threshold(), DEFAULT_FAILURE_THRESHOLD);
        assert_eq!(config.cooldown(), DEFAULT_COOLDOWN);
        assert_eq!(config.success_threshold(), DEFAULT_SUCCESS_THRESHOLD);
        assert_eq!(config, CircuitBreakerConfig::default());
    }

    #[rstest]
    #[case::zero_failure_threshold("failure_threshold")]
    #[case::zero_cooldown("cooldown")]
    #[case::zero_success_threshold("success_threshold")]
    fn config_zero_field_rejected(#[case] field: &str) {
        let result = match field {
            "failure_threshold" => CircuitBreakerConfig::builder().failure_threshold(0).build(),
            "cooldown" => CircuitBreakerConfig::builder().cooldown(Duration::ZERO).build(),
            "success_threshold" => CircuitBreakerConfig::builder().success_threshold(0).build(),
            _ => unreachable!(),
        };
        assert!(result.is_err(), "{field} = 0 should be rejected");
    }

    #[test]
    fn display_for_circuit_state() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
    }
}
