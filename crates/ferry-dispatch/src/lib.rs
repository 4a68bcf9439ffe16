//! Queued event relay with retries and a circuit breaker.
//!
//! Events are pushed onto a bounded FIFO queue and delivered one at a time to
//! a single HTTP endpoint by a background worker. Each logical delivery gets a
//! bounded number of retries with exponential backoff, and a circuit breaker
//! stops outbound traffic while the endpoint keeps failing.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────────┐   ┌────────────────┐   ┌───────────┐
//! │ Dispatcher │──▶│ Single Worker │──▶│ Retry Executor │──▶│ Transport │
//! └────────────┘   └───────────────┘   └────────────────┘   └───────────┘
//!       │                  │                    │
//!       ▼                  ▼                    ▼
//! ┌────────────┐   ┌───────────────┐   ┌────────────────┐
//! │ FIFO Queue │   │ Settings      │   │ Circuit        │
//! │ (max 500)  │   │ Provider      │   │ Breaker        │
//! └────────────┘   └───────────────┘   └────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ferry_core::{EventPayload, RealClock, Settings, StaticSettings};
//! use ferry_dispatch::{DeliveryClient, DispatchError, Dispatcher};
//! use serde_json::json;
//!
//! # async fn example() -> std::result::Result<(), DispatchError> {
//! let settings = StaticSettings::new(Settings::enabled("https://relay.example.com/events"));
//! let transport = DeliveryClient::with_defaults()?;
//! let dispatcher =
//!     Dispatcher::new(Arc::new(settings), Arc::new(transport), Arc::new(RealClock));
//!
//! let payload = EventPayload::new("topic.create", json!({ "topicId": 42 }));
//! if let Some(response) = dispatcher.send_event(payload).await? {
//!     println!("relay answered {response}");
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::time::Duration;

pub mod circuit;
pub mod client;
pub mod dispatcher;
pub mod error;
pub mod retry;

pub use circuit::{CircuitBreaker, CircuitConfig, CircuitState, CircuitStats};
pub use client::{
    ClientConfig, DeliveryClient, DeliveryRequest, DeliveryResponse, DeliveryTransport,
};
pub use dispatcher::{ConnectionReport, DeliveryHandle, DispatchConfig, DispatchStats, Dispatcher};
pub use error::{DispatchError, ErrorCategory, Result};
pub use retry::{RetryDecision, RetryExecutor, RetryPolicy};

/// Default queue capacity.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 500;

/// Default pause between queued deliveries.
pub const DEFAULT_RATE_LIMIT: Duration = Duration::from_millis(100);

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default wait before the first retry.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

/// Default HTTP request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(DEFAULT_TIMEOUT_SECONDS);

/// Default number of failed deliveries that opens the circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time an open circuit waits after the last failure.
pub const DEFAULT_CIRCUIT_RESET_TIMEOUT: Duration = Duration::from_secs(60);
