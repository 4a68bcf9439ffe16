//! HTTP transport for relay delivery.
//!
//! Performs exactly one `POST` per call with a fixed timeout and classifies
//! the outcome for the retry policy. Retrying is never done here.

use std::{future::Future, pin::Pin, time::Duration};

use bytes::Bytes;
use ferry_core::EventPayload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::error::{DispatchError, Result};

const MAX_ERROR_BODY_SIZE: usize = 1024;

/// Configuration for the HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout for a single request, including reading the body.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: crate::DEFAULT_REQUEST_TIMEOUT,
            user_agent: format!("ferry-relay/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// One physical delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRequest {
    /// Identifier shared by all attempts of one queued event.
    pub delivery_id: Uuid,
    /// Destination URL.
    pub url: String,
    /// Value for the `x-api-key` header.
    pub api_key: Option<String>,
    /// JSON body.
    pub payload: EventPayload,
    /// 1-based attempt number within the logical delivery.
    pub attempt_number: u32,
}

/// Successful (2xx) response from the relay endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Parsed JSON body; `Null` when the body was empty.
    pub body: Value,
    /// Total duration of the request.
    pub duration: Duration,
}

/// Performs single delivery attempts against the relay endpoint.
pub trait DeliveryTransport: Send + Sync + std::fmt::Debug + 'static {
    /// Sends one request.
    ///
    /// Resolves to `Ok` only for 2xx responses. Non-2xx responses fail with
    /// `DispatchError::HttpStatus`, connection problems with
    /// `DispatchError::Network` and slow responses with
    /// `DispatchError::Timeout`.
    fn post(
        &self,
        request: DeliveryRequest,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryResponse>> + Send + '_>>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DispatchError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a new delivery client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    async fn send(&self, request: DeliveryRequest) -> Result<DeliveryResponse> {
        let start_time = std::time::Instant::now();
        let body = Bytes::from(serde_json::to_vec(&request.payload).map_err(|e| {
            DispatchError::configuration(format!("payload serialization failed: {e}"))
        })?);

        let mut http_request = self
            .client
            .post(&request.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);

        if let Some(api_key) = request.api_key.as_deref().filter(|key| !key.is_empty()) {
            http_request = http_request.header("x-api-key", api_key);
        }

        let response = http_request.send().await.map_err(|e| self.classify(&e))?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| self.classify(&e))?;
        let duration = start_time.elapsed();

        tracing::debug!(
            status = status.as_u16(),
            duration_ms = duration.as_millis(),
            "received response"
        );

        if !status.is_success() {
            return Err(DispatchError::http_status(status.as_u16(), truncate_body(&bytes)));
        }

        let body = if bytes.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .map_err(|e| DispatchError::invalid_response(e.to_string()))?
        };

        Ok(DeliveryResponse { status_code: status.as_u16(), body, duration })
    }

    fn classify(&self, error: &reqwest::Error) -> DispatchError {
        if error.is_timeout() {
            return DispatchError::timeout(self.config.timeout.as_secs());
        }
        if error.is_builder() {
            return DispatchError::configuration(format!("invalid request: {error}"));
        }
        if error.is_connect() {
            return DispatchError::network(format!("connection failed: {error}"));
        }
        DispatchError::network(error.to_string())
    }
}

impl DeliveryTransport for DeliveryClient {
    fn post(
        &self,
        request: DeliveryRequest,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryResponse>> + Send + '_>> {
        let span = info_span!(
            "relay_delivery",
            delivery_id = %request.delivery_id,
            event_type = %request.payload.event_type,
            url = %request.url,
            attempt = request.attempt_number
        );

        Box::pin(
            async move {
                let result = self.send(request).await;
                if let Err(error) = &result {
                    tracing::warn!(error = %error, "delivery attempt failed");
                }
                result
            }
            .instrument(span),
        )
    }
}

fn truncate_body(bytes: &[u8]) -> String {
    if bytes.len() <= MAX_ERROR_BODY_SIZE {
        return String::from_utf8_lossy(bytes).into_owned();
    }

    let suffix = "... (truncated)";
    let truncated = String::from_utf8_lossy(&bytes[..MAX_ERROR_BODY_SIZE - suffix.len()]);
    format!("{truncated}{suffix}")
}

/// Scriptable in-memory transport for tests.
///
/// Available to this crate's own tests and, with the `test-util` feature, to
/// downstream test suites.
#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use std::{
        collections::VecDeque,
        future::Future,
        pin::Pin,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::{Duration, Instant},
    };

    use ferry_core::{Clock, RealClock};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use tokio::sync::watch;

    use super::{DeliveryRequest, DeliveryResponse, DeliveryTransport};
    use crate::error::{DispatchError, Result};

    /// Scripted result of one mock attempt.
    #[derive(Debug, Clone, PartialEq)]
    pub enum MockOutcome {
        /// 200 with the given JSON body.
        Success(Value),
        /// Non-2xx status with a text body.
        Status(u16, String),
        /// Connection failure.
        NetworkError(String),
        /// Per-attempt timeout.
        Timeout,
    }

    impl MockOutcome {
        fn into_result(self) -> Result<DeliveryResponse> {
            match self {
                Self::Success(body) => {
                    Ok(DeliveryResponse { status_code: 200, body, duration: Duration::ZERO })
                },
                Self::Status(status_code, body) => {
                    Err(DispatchError::http_status(status_code, body))
                },
                Self::NetworkError(message) => Err(DispatchError::network(message)),
                Self::Timeout => Err(DispatchError::timeout(10)),
            }
        }
    }

    /// A request seen by the mock, with the clock reading when it arrived.
    #[derive(Debug, Clone)]
    pub struct RecordedRequest {
        /// The request as sent.
        pub request: DeliveryRequest,
        /// When the attempt started.
        pub at: Instant,
    }

    /// Mock transport with scripted outcomes and a request log.
    ///
    /// Scripted outcomes are consumed in order; once exhausted every call gets
    /// the fallback outcome. While [`MockTransport::hold`] is active, calls
    /// block until [`MockTransport::release`] is called.
    #[derive(Debug)]
    pub struct MockTransport {
        script: Mutex<VecDeque<MockOutcome>>,
        fallback: Mutex<MockOutcome>,
        requests: Mutex<Vec<RecordedRequest>>,
        clock: Arc<dyn Clock>,
        gate: watch::Sender<bool>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockTransport {
        /// Creates a mock that answers every call with `{"ok": true}`.
        pub fn new() -> Self {
            Self::with_fallback(MockOutcome::Success(json!({"ok": true})))
        }

        /// Creates a mock that answers every unscripted call with `outcome`.
        pub fn with_fallback(outcome: MockOutcome) -> Self {
            let (gate, _) = watch::channel(false);
            Self {
                script: Mutex::new(VecDeque::new()),
                fallback: Mutex::new(outcome),
                requests: Mutex::new(Vec::new()),
                clock: Arc::new(RealClock::new()),
                gate,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        /// Creates a mock that always fails with the given status.
        pub fn failing(status_code: u16, body: &str) -> Self {
            Self::with_fallback(MockOutcome::Status(status_code, body.to_string()))
        }

        /// Uses `clock` to timestamp recorded requests.
        #[must_use]
        pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
            self.clock = clock;
            self
        }

        /// Appends outcomes to the script.
        pub fn push_outcomes(&self, outcomes: impl IntoIterator<Item = MockOutcome>) {
            self.script.lock().extend(outcomes);
        }

        /// Replaces the fallback outcome.
        pub fn set_fallback(&self, outcome: MockOutcome) {
            *self.fallback.lock() = outcome;
        }

        /// Blocks subsequent calls until released.
        pub fn hold(&self) {
            self.gate.send_replace(true);
        }

        /// Lets held and future calls proceed.
        pub fn release(&self) {
            self.gate.send_replace(false);
        }

        /// Every request received so far, in arrival order.
        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().clone()
        }

        /// Number of calls received so far.
        pub fn call_count(&self) -> usize {
            self.requests.lock().len()
        }

        /// Highest number of calls that were in flight simultaneously.
        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::Acquire)
        }

        async fn wait_for_gate(&self) {
            let mut gate = self.gate.subscribe();
            loop {
                let held = *gate.borrow_and_update();
                if !held || gate.changed().await.is_err() {
                    break;
                }
            }
        }

        fn next_outcome(&self) -> MockOutcome {
            self.script.lock().pop_front().unwrap_or_else(|| self.fallback.lock().clone())
        }
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl DeliveryTransport for MockTransport {
        fn post(
            &self,
            request: DeliveryRequest,
        ) -> Pin<Box<dyn Future<Output = Result<DeliveryResponse>> + Send + '_>> {
            Box::pin(async move {
                let current = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
                self.max_in_flight.fetch_max(current, Ordering::AcqRel);
                self.requests.lock().push(RecordedRequest { request, at: self.clock.now() });

                self.wait_for_gate().await;
                let outcome = self.next_outcome();

                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                outcome.into_result()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn create_test_request(url: String, api_key: Option<&str>) -> DeliveryRequest {
        DeliveryRequest {
            delivery_id: Uuid::new_v4(),
            url,
            api_key: api_key.map(str::to_string),
            payload: EventPayload::new("topic.create", json!({"topicId": 1})),
            attempt_number: 1,
        }
    }

    #[tokio::test]
    async fn successful_delivery_parses_json() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/events"))
            .and(matchers::header("content-type", "application/json"))
            .and(matchers::body_json(json!({"eventType": "topic.create", "data": {"topicId": 1}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"messageTs": "1.2"})))
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let request = create_test_request(format!("{}/events", mock_server.uri()), None);

        let response = client.post(request).await.unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, json!({"messageTs": "1.2"}));
    }

    #[tokio::test]
    async fn empty_success_body_is_null() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let response = client.post(create_test_request(mock_server.uri(), None)).await.unwrap();

        assert_eq!(response.status_code, 204);
        assert_eq!(response.body, Value::Null);
    }

    #[tokio::test]
    async fn non_json_success_body_is_rejected() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let result = client.post(create_test_request(mock_server.uri(), None)).await;

        assert!(matches!(result, Err(DispatchError::InvalidResponse { .. })));
    }

    #[tokio::test]
    async fn server_error_captures_body() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let result = client.post(create_test_request(mock_server.uri(), None)).await;

        assert_eq!(result, Err(DispatchError::http_status(500, "Internal Server Error")));
    }

    #[tokio::test]
    async fn api_key_header_sent_when_configured() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::header("x-api-key", "secret-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let result = client.post(create_test_request(mock_server.uri(), Some("secret-key"))).await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn api_key_header_omitted_when_blank() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        client.post(create_test_request(mock_server.uri(), Some(""))).await.unwrap();

        let received = mock_server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
        assert!(!received[0].headers.contains_key("x-api-key"));
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&mock_server)
            .await;

        let config = ClientConfig { timeout: Duration::from_millis(100), ..Default::default() };
        let client = DeliveryClient::new(config).unwrap();
        let result = client.post(create_test_request(mock_server.uri(), None)).await;

        assert!(matches!(result, Err(DispatchError::Timeout { .. })));
    }

    #[tokio::test]
    async fn refused_connection_is_network_error() {
        let client = DeliveryClient::with_defaults().unwrap();
        let request = create_test_request("http://127.0.0.1:1/".to_string(), None);
        let result = client.post(request).await;

        assert!(matches!(result, Err(DispatchError::Network { .. })));
    }

    #[test]
    fn long_error_bodies_truncated() {
        let body = vec![b'x'; 4096];
        let truncated = truncate_body(&body);

        assert_eq!(truncated.len(), MAX_ERROR_BODY_SIZE);
        assert!(truncated.ends_with("... (truncated)"));
        assert_eq!(truncate_body(b"short"), "short");
    }
}
