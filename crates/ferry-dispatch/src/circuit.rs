//! Circuit breaker guarding the relay endpoint.
//!
//! Fails fast while the endpoint is down and probes for recovery once the
//! reset window has passed. One breaker exists per dispatcher and only logical
//! deliveries (all retries of one event collapsed into one outcome) are
//! counted.
//!
//! # Circuit Breaker State Machine
//!
//! ```text
//!                          ┌─────────────────────────┐
//!                          │        CLOSED           │
//!                          │   (Normal Operation)    │
//!                          │                         │
//!                          │ ● All requests allowed  │
//!                          │ ● Counting failures     │
//!                          └─────────────────────────┘
//!                           │                        ▲
//!               5 failed    │                        │ probe
//!               deliveries  │                        │ succeeds
//!                           ▼                        │
//!    ┌─────────────────────────┐                  ┌───────────────────────┐
//!    │         OPEN            │                  │       HALF-OPEN       │
//!    │      (Fail Fast)        │   60s since      │   (Testing Recovery)  │
//!    │                         │   last failure   │                       │
//!    │ ● All requests blocked  │ ───────────────▶ │ ● One probe at a time │
//!    │ ● No network I/O        │                  │ ● Count restarts at 0 │
//!    └─────────────────────────┘                  └───────────────────────┘
//!                 ▲                                           │
//!                 │          failure count reaches 5 again    │
//!                 └───────────────────────────────────────────┘
//! ```
//!
//! A single failed probe does not reopen the circuit: the count restarts at
//! zero on entering HALF-OPEN, so the threshold must be reached again.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use ferry_core::Clock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{DispatchError, Result};

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failed deliveries that open the circuit.
    pub failure_threshold: u32,
    /// Time since the last failure before an open circuit allows a probe.
    pub reset_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: crate::DEFAULT_FAILURE_THRESHOLD,
            reset_timeout: crate::DEFAULT_CIRCUIT_RESET_TIMEOUT,
        }
    }
}

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - all requests allowed.
    Closed,
    /// Endpoint unhealthy - requests fail immediately.
    Open,
    /// Testing recovery - one request at a time.
    HalfOpen,
}

impl CircuitState {
    /// Upper-case label used by admin displays.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the breaker's internal counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitStats {
    /// Current circuit state.
    pub state: CircuitState,
    /// Consecutive failed deliveries in the current state.
    pub failure_count: u32,
    /// When the most recent failure was recorded.
    pub last_failure_at: Option<Instant>,
    /// Whether a half-open probe is currently in flight.
    pub probe_in_flight: bool,
}

impl CircuitStats {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            probe_in_flight: false,
        }
    }
}

/// Circuit breaker for the single relay endpoint.
///
/// State sits behind a short-lived mutex that is never held across an await,
/// so the queue worker and a concurrent connection test can share one breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitConfig,
    stats: Mutex<CircuitStats>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Creates a closed circuit breaker.
    pub fn new(config: CircuitConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, stats: Mutex::new(CircuitStats::new()), clock }
    }

    /// Decides whether a delivery may proceed.
    ///
    /// Moves an open circuit to half-open once the reset timeout has elapsed
    /// since the last failure, and admits a single probe while half-open.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::CircuitOpen` when the delivery must not be
    /// attempted.
    pub fn check(&self) -> Result<()> {
        let mut stats = self.stats.lock();

        if stats.state == CircuitState::Open {
            let reset_due = stats.last_failure_at.map_or(true, |failed_at| {
                self.clock.now().saturating_duration_since(failed_at) > self.config.reset_timeout
            });

            if !reset_due {
                return Err(DispatchError::CircuitOpen);
            }

            info!("circuit breaker entering HALF_OPEN state");
            stats.state = CircuitState::HalfOpen;
            stats.failure_count = 0;
            stats.probe_in_flight = false;
        }

        if stats.state == CircuitState::HalfOpen {
            if stats.probe_in_flight {
                return Err(DispatchError::CircuitOpen);
            }
            stats.probe_in_flight = true;
        }

        Ok(())
    }

    /// Records a successful logical delivery.
    pub fn record_success(&self) {
        let mut stats = self.stats.lock();

        match stats.state {
            CircuitState::Closed => {},
            CircuitState::Open => {
                warn!("recorded success while circuit is open");
            },
            CircuitState::HalfOpen => {
                info!("circuit breaker CLOSED - webhook restored");
                stats.state = CircuitState::Closed;
            },
        }

        stats.failure_count = 0;
        stats.probe_in_flight = false;
    }

    /// Records a failed logical delivery.
    pub fn record_failure(&self) {
        let mut stats = self.stats.lock();

        stats.failure_count = stats.failure_count.saturating_add(1);
        stats.last_failure_at = Some(self.clock.now());
        stats.probe_in_flight = false;

        if stats.state != CircuitState::Open && stats.failure_count >= self.config.failure_threshold
        {
            error!(
                failure_count = stats.failure_count,
                "circuit breaker OPEN - consecutive delivery failures"
            );
            stats.state = CircuitState::Open;
        }
    }

    /// Current state, without applying the timeout-driven transition.
    pub fn state(&self) -> CircuitState {
        self.stats.lock().state
    }

    /// Snapshot of all counters.
    pub fn stats(&self) -> CircuitStats {
        self.stats.lock().clone()
    }

    /// Breaker configuration.
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use ferry_core::TestClock;

    use super::*;

    fn test_breaker() -> (CircuitBreaker, TestClock) {
        let clock = TestClock::new();
        let config = CircuitConfig { failure_threshold: 3, reset_timeout: Duration::from_secs(10) };
        (CircuitBreaker::new(config, Arc::new(clock.clone())), clock)
    }

    fn open(breaker: &CircuitBreaker) {
        for _ in 0..breaker.config().failure_threshold {
            breaker.check().unwrap();
            breaker.record_failure();
        }
    }

    #[test]
    fn circuit_starts_closed() {
        let (breaker, _clock) = test_breaker();

        assert!(breaker.check().is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().failure_count, 0);
        assert_eq!(breaker.stats().last_failure_at, None);
    }

    #[test]
    fn consecutive_failures_open_circuit() {
        let (breaker, _clock) = test_breaker();

        for _ in 0..2 {
            breaker.record_failure();
            assert!(breaker.check().is_ok());
        }

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.check(), Err(DispatchError::CircuitOpen));
    }

    #[test]
    fn success_resets_failure_count() {
        let (breaker, _clock) = test_breaker();

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.stats().failure_count, 2);

        breaker.record_success();
        assert_eq!(breaker.stats().failure_count, 0);
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn open_circuit_blocks_until_reset_timeout_elapses() {
        let (breaker, clock) = test_breaker();
        open(&breaker);

        clock.advance(Duration::from_secs(10));
        assert_eq!(breaker.check(), Err(DispatchError::CircuitOpen));
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(Duration::from_millis(1));
        assert!(breaker.check().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.stats().failure_count, 0);
    }

    #[test]
    fn half_open_admits_one_probe_at_a_time() {
        let (breaker, clock) = test_breaker();
        open(&breaker);
        clock.advance(Duration::from_secs(11));

        assert!(breaker.check().is_ok());
        assert!(breaker.stats().probe_in_flight);
        assert_eq!(breaker.check(), Err(DispatchError::CircuitOpen));

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.check().is_ok());
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn single_half_open_failure_keeps_circuit_half_open() {
        // Entering HALF_OPEN restarts the count at zero, so one failed probe
        // only brings it to 1 and the circuit stays HALF_OPEN.
        let (breaker, clock) = test_breaker();
        open(&breaker);
        clock.advance(Duration::from_secs(11));

        breaker.check().unwrap();
        breaker.record_failure();

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::HalfOpen);
        assert_eq!(stats.failure_count, 1);
        assert!(!stats.probe_in_flight);
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn half_open_reopens_after_threshold_failures() {
        let (breaker, clock) = test_breaker();
        open(&breaker);
        clock.advance(Duration::from_secs(11));

        open(&breaker);
        assert_eq!(breaker.state(), CircuitState::Open);

        let reopened_at = breaker.stats().last_failure_at.unwrap();
        assert_eq!(reopened_at, clock.now());
        assert_eq!(breaker.check(), Err(DispatchError::CircuitOpen));
    }

    #[test]
    fn failures_while_open_extend_the_window() {
        let (breaker, clock) = test_breaker();
        open(&breaker);

        clock.advance(Duration::from_secs(8));
        breaker.record_failure();
        clock.advance(Duration::from_secs(8));

        assert_eq!(breaker.check(), Err(DispatchError::CircuitOpen));
    }

    #[test]
    fn state_labels() {
        assert_eq!(CircuitState::Closed.to_string(), "CLOSED");
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
        assert_eq!(serde_json::to_string(&CircuitState::HalfOpen).unwrap(), "\"HALF_OPEN\"");
    }
}
