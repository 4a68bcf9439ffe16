//! Error types shared by the relay core.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for settings and payload handling.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Settings could not be read from the host application.
    #[error("settings unavailable: {0}")]
    SettingsUnavailable(String),

    /// Payload could not be serialized to JSON.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// A URL could not be parsed or resolved.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

impl From<url::ParseError> for CoreError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}
