//! Relay settings supplied by the host application.
//!
//! Settings are read through [`SettingsProvider`] on every dispatch decision
//! and never cached by the relay, so toggling the relay off or pointing it at
//! a new endpoint takes effect on the next queued event.

use std::{future::Future, pin::Pin, sync::Arc};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Connection settings for the outbound relay endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Whether event relaying is switched on.
    pub enabled: bool,
    /// Destination URL receiving `POST` requests.
    pub endpoint_url: String,
    /// Value for the `x-api-key` header; empty means no header.
    pub api_key: String,
}

impl Settings {
    /// Creates enabled settings for the given endpoint.
    pub fn enabled(endpoint_url: impl Into<String>) -> Self {
        Self { enabled: true, endpoint_url: endpoint_url.into(), api_key: String::new() }
    }

    /// Sets the API key sent with each request.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    /// Returns a copy with surrounding whitespace stripped from string fields.
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self {
            enabled: self.enabled,
            endpoint_url: self.endpoint_url.trim().to_string(),
            api_key: self.api_key.trim().to_string(),
        }
    }

    /// True when an endpoint URL is present.
    pub fn has_endpoint(&self) -> bool {
        !self.endpoint_url.trim().is_empty()
    }

    /// True when relaying is enabled and an endpoint URL is present.
    pub fn is_configured(&self) -> bool {
        self.enabled && self.has_endpoint()
    }

    /// The API key, or `None` when blank.
    pub fn api_key(&self) -> Option<&str> {
        let key = self.api_key.trim();
        (!key.is_empty()).then_some(key)
    }
}

/// Read-through access to the host application's relay settings.
///
/// Implementations may hit a database or remote store on every call; the
/// relay assumes no caching contract.
pub trait SettingsProvider: Send + Sync + 'static {
    /// Loads the current settings.
    fn settings(&self) -> Pin<Box<dyn Future<Output = Result<Settings>> + Send + '_>>;
}

/// In-memory settings that can be swapped at runtime.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    inner: Arc<RwLock<Settings>>,
}

impl StaticSettings {
    /// Creates a provider returning the given settings.
    pub fn new(settings: Settings) -> Self {
        Self { inner: Arc::new(RwLock::new(settings)) }
    }

    /// Replaces the stored settings. Clones observe the change.
    pub fn update(&self, settings: Settings) {
        *self.inner.write() = settings;
    }

    /// Returns a snapshot of the stored settings.
    pub fn current(&self) -> Settings {
        self.inner.read().clone()
    }
}

impl SettingsProvider for StaticSettings {
    fn settings(&self) -> Pin<Box<dyn Future<Output = Result<Settings>> + Send + '_>> {
        let settings = self.current().normalized();
        Box::pin(async move { Ok(settings) })
    }
}
