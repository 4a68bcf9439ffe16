//! Exponential backoff for failed delivery attempts.
//!
//! A logical delivery is one initial attempt plus up to `max_retries` retries.
//! The wait before retry `n` is `base_delay * 2^(n-1)`, so the defaults give
//! 1s, 2s and 4s. The circuit breaker sees only the final outcome.

use std::{sync::Arc, time::Duration};

use ferry_core::{Clock, EventPayload, Settings};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{
    circuit::CircuitBreaker,
    client::{DeliveryRequest, DeliveryTransport},
    error::{DispatchError, ErrorCategory, Result},
};

/// Retry policy for relay delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,

    /// Wait before the first retry; doubles for each following retry.
    pub base_delay: Duration,

    /// Upper bound for any single wait.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: crate::DEFAULT_MAX_RETRIES,
            base_delay: crate::DEFAULT_RETRY_BASE_DELAY,
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Outcome of evaluating a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, then attempt again.
    Retry {
        /// How long to wait before the next attempt
        delay: Duration,
    },
    /// Stop and report the error.
    GiveUp {
        /// Reason why no further attempt is made
        reason: String,
    },
}

impl RetryPolicy {
    /// Total attempts for one logical delivery.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait before the given 1-based retry.
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let exponent = (retry - 1).min(20);
        let delay = self.base_delay.saturating_mul(2_u32.saturating_pow(exponent));
        delay.min(self.max_delay)
    }

    /// Decides whether attempt `attempt_number` (1-based) should be followed
    /// by another attempt.
    ///
    /// Every per-attempt failure is retried, including 4xx responses.
    /// Errors raised before the request leaves (an unusable URL, for
    /// example) are not.
    pub fn decide(&self, attempt_number: u32, error: &DispatchError) -> RetryDecision {
        if !error.is_delivery_failure() {
            return RetryDecision::GiveUp { reason: format!("non-retryable error: {error}") };
        }

        if attempt_number >= self.max_attempts() {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exceeded", self.max_attempts()),
            };
        }

        RetryDecision::Retry { delay: self.delay_before_retry(attempt_number) }
    }
}

/// Runs one logical delivery: attempts, backoff, and the single breaker update.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    transport: Arc<dyn DeliveryTransport>,
    circuit: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
}

impl RetryExecutor {
    /// Creates an executor sharing the dispatcher's breaker and clock.
    pub fn new(
        policy: RetryPolicy,
        transport: Arc<dyn DeliveryTransport>,
        circuit: Arc<CircuitBreaker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { policy, transport, circuit, clock }
    }

    /// Retry policy in effect.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Delivers `payload` to the configured endpoint.
    ///
    /// The caller must already have passed [`CircuitBreaker::check`]. Records
    /// exactly one success or failure on the breaker.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt once retries are exhausted.
    pub async fn deliver(
        &self,
        settings: &Settings,
        delivery_id: Uuid,
        payload: &EventPayload,
    ) -> Result<Value> {
        let mut attempt_number = 1;

        loop {
            let request = DeliveryRequest {
                delivery_id,
                url: settings.endpoint_url.clone(),
                api_key: settings.api_key().map(str::to_string),
                payload: payload.clone(),
                attempt_number,
            };

            let error = match self.transport.post(request).await {
                Ok(response) => {
                    debug!(
                        %delivery_id,
                        attempt = attempt_number,
                        status = response.status_code,
                        "event delivered"
                    );
                    self.circuit.record_success();
                    return Ok(response.body);
                },
                Err(error) => error,
            };

            match self.policy.decide(attempt_number, &error) {
                RetryDecision::Retry { delay } => {
                    warn!(
                        %delivery_id,
                        error = %error,
                        "retry {}/{} after {}ms",
                        attempt_number,
                        self.policy.max_retries,
                        delay.as_millis()
                    );
                    self.clock.sleep(delay).await;
                    attempt_number += 1;
                },
                RetryDecision::GiveUp { reason } => {
                    error!(
                        %delivery_id,
                        event_type = %payload.event_type,
                        category = %ErrorCategory::from(&error),
                        error = %error,
                        reason = %reason,
                        "webhook delivery failed"
                    );
                    self.circuit.record_failure();
                    return Err(error);
                },
            }
        }
    }
}
