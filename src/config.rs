//! Configuration for the ferry relay binary.

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use ferry_core::Settings;
use ferry_dispatch::{CircuitConfig, ClientConfig, DispatchConfig, RetryPolicy};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use url::Url;

/// Default configuration file, relative to the working directory.
pub const CONFIG_FILE: &str = "ferry.toml";

const ENV_PREFIX: &str = "FERRY_";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-field lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Relay configuration with defaults, file, and environment overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed with `FERRY_` (highest priority)
/// 2. Configuration file (`ferry.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Relaying is off until `enabled` is set and an `endpoint_url` is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // Endpoint
    /// Whether events are relayed at all.
    ///
    /// Environment variable: `FERRY_ENABLED`
    #[serde(default)]
    pub enabled: bool,
    /// Relay endpoint receiving `POST` requests.
    ///
    /// Environment variable: `FERRY_ENDPOINT_URL`
    #[serde(default)]
    pub endpoint_url: String,
    /// Value for the `x-api-key` header; empty sends no header.
    ///
    /// Environment variable: `FERRY_API_KEY`
    #[serde(default)]
    pub api_key: String,

    // Queue
    /// Maximum number of events waiting for delivery.
    ///
    /// Environment variable: `FERRY_MAX_QUEUE_SIZE`
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Pause between queued deliveries in milliseconds.
    ///
    /// Environment variable: `FERRY_RATE_LIMIT_MS`
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,

    // Retry
    /// Retries after the first failed attempt.
    ///
    /// Environment variable: `FERRY_MAX_RETRIES`
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Wait before the first retry in milliseconds; doubles per retry.
    ///
    /// Environment variable: `FERRY_RETRY_BASE_DELAY_MS`
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Upper bound for a single retry wait in milliseconds.
    ///
    /// Environment variable: `FERRY_RETRY_MAX_DELAY_MS`
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    // Client
    /// Per-attempt HTTP timeout in seconds.
    ///
    /// Environment variable: `FERRY_REQUEST_TIMEOUT_SECONDS`
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    // Circuit breaker
    /// Consecutive failed deliveries that open the circuit.
    ///
    /// Environment variable: `FERRY_CIRCUIT_FAILURE_THRESHOLD`
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,
    /// Seconds after the last failure before an open circuit allows a probe.
    ///
    /// Environment variable: `FERRY_CIRCUIT_RESET_TIMEOUT_SECONDS`
    #[serde(default = "default_circuit_reset_timeout_seconds")]
    pub circuit_reset_timeout_seconds: u64,

    // Logging
    /// Filter used when `RUST_LOG` is unset.
    ///
    /// Environment variable: `FERRY_LOG_FILTER`
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Log output format.
    ///
    /// Environment variable: `FERRY_LOG_FORMAT`
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Config {
    /// Loads configuration from defaults, the file at `path` and the
    /// environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX));

        let config: Self = figment.extract().context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Relay settings served to the dispatcher.
    pub fn to_settings(&self) -> Settings {
        Settings {
            enabled: self.enabled,
            endpoint_url: self.endpoint_url.clone(),
            api_key: self.api_key.clone(),
        }
        .normalized()
    }

    /// Convert to the dispatcher configuration.
    pub fn to_dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            max_queue_size: self.max_queue_size,
            rate_limit: Duration::from_millis(self.rate_limit_ms),
            retry_policy: self.to_retry_policy(),
            circuit: self.to_circuit_config(),
        }
    }

    /// Convert to retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    /// Convert to circuit breaker configuration.
    pub fn to_circuit_config(&self) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: self.circuit_failure_threshold,
            reset_timeout: Duration::from_secs(self.circuit_reset_timeout_seconds),
        }
    }

    /// Convert to HTTP client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.request_timeout_seconds),
            ..ClientConfig::default()
        }
    }

    /// API key with all but the last four characters masked, for logging.
    pub fn api_key_masked(&self) -> String {
        let key = self.api_key.trim();
        let chars = key.chars().count();
        if chars == 0 {
            return String::new();
        }
        if chars <= 4 {
            return "***".to_string();
        }

        let tail = key.chars().skip(chars - 4).collect::<String>();
        format!("***{tail}")
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            anyhow::bail!("max_queue_size must be greater than 0");
        }

        if self.request_timeout_seconds == 0 {
            anyhow::bail!("request_timeout_seconds must be greater than 0");
        }

        if self.circuit_failure_threshold == 0 {
            anyhow::bail!("circuit_failure_threshold must be greater than 0");
        }

        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            anyhow::bail!("retry_max_delay_ms cannot be less than retry_base_delay_ms");
        }

        let endpoint = self.endpoint_url.trim();
        if !endpoint.is_empty() {
            let url = Url::parse(endpoint)
                .with_context(|| format!("endpoint_url is not a valid URL: {endpoint}"))?;
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("endpoint_url must use http or https, got {}", url.scheme());
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint_url: String::new(),
            api_key: String::new(),
            max_queue_size: default_max_queue_size(),
            rate_limit_ms: default_rate_limit_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            request_timeout_seconds: default_request_timeout_seconds(),
            circuit_failure_threshold: default_circuit_failure_threshold(),
            circuit_reset_timeout_seconds: default_circuit_reset_timeout_seconds(),
            log_filter: default_log_filter(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_max_queue_size() -> usize {
    ferry_dispatch::DEFAULT_MAX_QUEUE_SIZE
}

fn default_rate_limit_ms() -> u64 {
    100
}

fn default_max_retries() -> u32 {
    ferry_dispatch::DEFAULT_MAX_RETRIES
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    60_000
}

fn default_request_timeout_seconds() -> u64 {
    ferry_dispatch::DEFAULT_TIMEOUT_SECONDS
}

fn default_circuit_failure_threshold() -> u32 {
    ferry_dispatch::DEFAULT_FAILURE_THRESHOLD
}

fn default_circuit_reset_timeout_seconds() -> u64 {
    60
}

fn default_log_filter() -> String {
    "info,ferry=debug".to_string()
}
