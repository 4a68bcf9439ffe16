//! Error types for event dispatch.
//!
//! Separates failures that never reach the network (configuration, a full
//! queue, an open circuit) from per-attempt transport failures, which the
//! retry policy absorbs until attempts run out. Every variant is `Clone` so a
//! terminal error can be logged and handed to the waiting caller.

use std::fmt;

use ferry_core::CoreError;
use thiserror::Error;

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors surfaced by the dispatcher and its components.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Relay disabled or endpoint URL missing.
    #[error("webhook not configured: {message}")]
    NotConfigured {
        /// What is missing
        message: String,
    },

    /// Queue already holds its maximum number of events.
    #[error("dispatch queue full ({capacity} events), event dropped")]
    QueueFull {
        /// Configured queue capacity
        capacity: usize,
    },

    /// Circuit breaker is open, delivery short-circuited.
    #[error("circuit breaker open: webhook temporarily disabled")]
    CircuitOpen,

    /// Endpoint answered with a non-2xx status.
    #[error("HTTP {status_code}: {body}")]
    HttpStatus {
        /// HTTP status code
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// Connection-level failure.
    #[error("network connection failed: {message}")]
    Network {
        /// Error message describing the network failure
        message: String,
    },

    /// Request did not complete within the per-attempt timeout.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Number of seconds before the request timed out
        timeout_seconds: u64,
    },

    /// Endpoint answered 2xx with a body that is not JSON.
    #[error("invalid response body: {message}")]
    InvalidResponse {
        /// Parse error message
        message: String,
    },

    /// Settings could not be loaded from the host application.
    #[error("settings unavailable: {message}")]
    Settings {
        /// Underlying error message
        message: String,
    },

    /// Invalid transport or dispatcher configuration.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// The worker dropped an event without resolving it.
    #[error("internal dispatch error: {message}")]
    Internal {
        /// Internal error message
        message: String,
    },
}

impl DispatchError {
    /// Creates a not-configured error.
    pub fn not_configured(message: impl Into<String>) -> Self {
        Self::NotConfigured { message: message.into() }
    }

    /// Creates a queue-full error.
    pub fn queue_full(capacity: usize) -> Self {
        Self::QueueFull { capacity }
    }

    /// Creates an HTTP status error from a response.
    pub fn http_status(status_code: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus { status_code, body: body.into() }
    }

    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates an invalid-response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// True for failures of a single physical attempt.
    ///
    /// Only these are retried. Any other error ends the delivery at once.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(
            self,
            Self::HttpStatus { .. }
                | Self::Network { .. }
                | Self::Timeout { .. }
                | Self::InvalidResponse { .. }
        )
    }
}

impl From<CoreError> for DispatchError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::SettingsUnavailable(message) => Self::Settings { message },
            other => Self::Configuration { message: other.to_string() },
        }
    }
}

/// Category of dispatch error for structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Relay disabled or misconfigured.
    Configuration,
    /// Event rejected by a full queue.
    Capacity,
    /// Circuit breaker protection.
    Circuit,
    /// Non-2xx HTTP response.
    Http,
    /// Connectivity or timeout.
    Network,
    /// Internal system errors.
    Internal,
}

impl From<&DispatchError> for ErrorCategory {
    fn from(error: &DispatchError) -> Self {
        match error {
            DispatchError::NotConfigured { .. }
            | DispatchError::Settings { .. }
            | DispatchError::Configuration { .. } => Self::Configuration,
            DispatchError::QueueFull { .. } => Self::Capacity,
            DispatchError::CircuitOpen => Self::Circuit,
            DispatchError::HttpStatus { .. } | DispatchError::InvalidResponse { .. } => Self::Http,
            DispatchError::Network { .. } | DispatchError::Timeout { .. } => Self::Network,
            DispatchError::Internal { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Capacity => write!(f, "capacity"),
            Self::Circuit => write!(f, "circuit"),
            Self::Http => write!(f, "http"),
            Self::Network => write!(f, "network"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_failures_identified_correctly() {
        assert!(DispatchError::http_status(500, "boom").is_delivery_failure());
        assert!(DispatchError::http_status(404, "missing").is_delivery_failure());
        assert!(DispatchError::network("connection refused").is_delivery_failure());
        assert!(DispatchError::timeout(10).is_delivery_failure());
        assert!(DispatchError::invalid_response("expected value").is_delivery_failure());

        assert!(!DispatchError::CircuitOpen.is_delivery_failure());
        assert!(!DispatchError::queue_full(500).is_delivery_failure());
        assert!(!DispatchError::not_configured("disabled").is_delivery_failure());
        assert!(!DispatchError::internal("dropped").is_delivery_failure());
    }

    #[test]
    fn error_display_format() {
        assert_eq!(
            DispatchError::http_status(500, "Internal Server Error").to_string(),
            "HTTP 500: Internal Server Error"
        );
        assert_eq!(DispatchError::timeout(10).to_string(), "request timeout after 10s");
        assert!(DispatchError::CircuitOpen.to_string().contains("circuit breaker open"));
        assert!(DispatchError::not_configured("relay disabled")
            .to_string()
            .contains("webhook not configured"));
    }

    #[test]
    fn error_categories_mapped_correctly() {
        assert_eq!(ErrorCategory::from(&DispatchError::network("x")), ErrorCategory::Network);
        assert_eq!(ErrorCategory::from(&DispatchError::timeout(10)), ErrorCategory::Network);
        assert_eq!(ErrorCategory::from(&DispatchError::http_status(502, "")), ErrorCategory::Http);
        assert_eq!(ErrorCategory::from(&DispatchError::CircuitOpen), ErrorCategory::Circuit);
        assert_eq!(ErrorCategory::from(&DispatchError::queue_full(1)), ErrorCategory::Capacity);
        assert_eq!(ErrorCategory::Configuration.to_string(), "configuration");
    }

    #[test]
    fn core_errors_convert() {
        let err: DispatchError = CoreError::SettingsUnavailable("db down".to_string()).into();
        assert_eq!(err, DispatchError::Settings { message: "db down".to_string() });
    }
}
