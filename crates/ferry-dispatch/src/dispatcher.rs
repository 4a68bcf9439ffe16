//! Bounded FIFO dispatch queue drained by a single worker task.
//!
//! Callers enqueue events and get back a [`DeliveryHandle`] that resolves once
//! the worker has finished with the event. The worker handles one event at a
//! time, so at most one queued delivery is in flight per dispatcher.
//!
//! # Worker loop
//!
//! ```text
//!   enqueue ──▶ [ e1 | e2 | e3 | ... ]  (max 500)
//!                  │
//!                  ▼
//!           reload settings ── disabled / no URL ──▶ reject "not configured"
//!                  │
//!                  ▼
//!           circuit check ──── open ───────────────▶ reject "circuit open"
//!                  │
//!                  ▼
//!           retry executor ── 1 + 3 attempts ──────▶ resolve / reject
//!                  │
//!                  ▼
//!           queue non-empty? ─ yes ─▶ pause 100ms ─▶ next event
//! ```

use std::{
    collections::VecDeque,
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::{Duration, Instant},
};

use ferry_core::{Clock, EventPayload, Settings, SettingsProvider};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    circuit::{CircuitBreaker, CircuitConfig, CircuitState, CircuitStats},
    client::DeliveryTransport,
    error::{DispatchError, Result},
    retry::{RetryExecutor, RetryPolicy},
};

/// Configuration for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum number of events waiting in the queue.
    pub max_queue_size: usize,

    /// Pause between consecutive queued deliveries.
    pub rate_limit: Duration,

    /// Retry policy applied to every logical delivery.
    pub retry_policy: RetryPolicy,

    /// Circuit breaker settings.
    pub circuit: CircuitConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: crate::DEFAULT_MAX_QUEUE_SIZE,
            rate_limit: crate::DEFAULT_RATE_LIMIT,
            retry_policy: RetryPolicy::default(),
            circuit: CircuitConfig::default(),
        }
    }
}

/// Counters for dispatcher monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Events accepted into the queue.
    pub enqueued: u64,
    /// Queued events delivered successfully.
    pub delivered: u64,
    /// Queued events that failed after all retries.
    pub failed: u64,
    /// Events rejected because the queue was full.
    pub dropped: u64,
    /// Events skipped or rejected because the relay was not configured.
    pub skipped: u64,
    /// Queued events rejected by the open circuit.
    pub circuit_rejections: u64,
    /// Events currently waiting in the queue.
    pub queue_depth: usize,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    skipped: AtomicU64,
    circuit_rejections: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_outcome(&self, outcome: &Result<Value>) {
        match outcome {
            Ok(_) => Self::bump(&self.delivered),
            Err(DispatchError::CircuitOpen) => Self::bump(&self.circuit_rejections),
            Err(DispatchError::NotConfigured { .. }) => Self::bump(&self.skipped),
            Err(_) => Self::bump(&self.failed),
        }
    }

    fn snapshot(&self, queue_depth: usize) -> DispatchStats {
        DispatchStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
            queue_depth,
        }
    }
}

/// Outcome of an admin connection test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionReport {
    /// Whether the test event was delivered.
    pub success: bool,
    /// Human-readable result.
    pub message: String,
}

impl ConnectionReport {
    fn from_outcome(outcome: &Result<Value>) -> Self {
        match outcome {
            Ok(_) => Self { success: true, message: "Webhook connection successful".to_string() },
            Err(error) => Self { success: false, message: format!("Webhook error: {error}") },
        }
    }
}

struct QueuedEvent {
    delivery_id: Uuid,
    payload: EventPayload,
    responder: oneshot::Sender<Result<Value>>,
    enqueued_at: Instant,
}

/// Pending outcome of a queued event.
///
/// Resolves to the endpoint's response body or the terminal error. Dropping
/// the handle does not cancel the delivery.
#[derive(Debug)]
pub struct DeliveryHandle {
    delivery_id: Uuid,
    receiver: oneshot::Receiver<Result<Value>>,
}

impl DeliveryHandle {
    /// Identifier attached to every log line for this event.
    pub fn delivery_id(&self) -> Uuid {
        self.delivery_id
    }
}

impl Future for DeliveryHandle {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(DispatchError::internal("worker dropped the event without resolving it"))
            })
        })
    }
}

struct Inner {
    config: DispatchConfig,
    settings: Arc<dyn SettingsProvider>,
    circuit: Arc<CircuitBreaker>,
    executor: RetryExecutor,
    clock: Arc<dyn Clock>,
    queue: Mutex<VecDeque<QueuedEvent>>,
    draining: AtomicBool,
    counters: Counters,
}

/// Queued, rate-limited event relay with retries and a circuit breaker.
///
/// Cheap to clone; clones share the queue, worker and breaker. Construct one
/// per process and hand clones to every call site.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.inner.config)
            .field("circuit_state", &self.circuit_state())
            .field("queue_len", &self.queue_len())
            .field("draining", &self.is_draining())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher with default configuration.
    pub fn new(
        settings: Arc<dyn SettingsProvider>,
        transport: Arc<dyn DeliveryTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_config(settings, transport, clock, DispatchConfig::default())
    }

    /// Creates a dispatcher with the given configuration.
    pub fn with_config(
        settings: Arc<dyn SettingsProvider>,
        transport: Arc<dyn DeliveryTransport>,
        clock: Arc<dyn Clock>,
        config: DispatchConfig,
    ) -> Self {
        let circuit = Arc::new(CircuitBreaker::new(config.circuit.clone(), clock.clone()));
        let executor = RetryExecutor::new(
            config.retry_policy.clone(),
            transport,
            circuit.clone(),
            clock.clone(),
        );

        Self {
            inner: Arc::new(Inner {
                config,
                settings,
                circuit,
                executor,
                clock,
                queue: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        }
    }

    /// Queues an event for delivery.
    ///
    /// Returns `Ok(None)` without queueing when the relay is disabled or has
    /// no endpoint URL. Otherwise the event is appended to the queue, the
    /// worker is started if idle, and a handle to the outcome is returned.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::QueueFull` if the queue is at capacity, or
    /// `DispatchError::Settings` if settings cannot be loaded.
    pub async fn enqueue(&self, payload: EventPayload) -> Result<Option<DeliveryHandle>> {
        let settings = self.inner.settings.settings().await?;
        if !settings.is_configured() {
            debug!(
                event_type = %payload.event_type,
                enabled = settings.enabled,
                "relay not configured, event not queued"
            );
            Counters::bump(&self.inner.counters.skipped);
            return Ok(None);
        }

        let delivery_id = Uuid::new_v4();
        let (responder, receiver) = oneshot::channel();

        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.config.max_queue_size {
                warn!(
                    event_type = %payload.event_type,
                    capacity = self.inner.config.max_queue_size,
                    "dispatch queue full, dropping event"
                );
                Counters::bump(&self.inner.counters.dropped);
                return Err(DispatchError::queue_full(self.inner.config.max_queue_size));
            }

            debug!(
                %delivery_id,
                event_type = %payload.event_type,
                queue_depth = queue.len() + 1,
                "event queued"
            );
            queue.push_back(QueuedEvent {
                delivery_id,
                payload,
                responder,
                enqueued_at: self.inner.clock.now(),
            });
        }

        Counters::bump(&self.inner.counters.enqueued);
        self.drain();

        Ok(Some(DeliveryHandle { delivery_id, receiver }))
    }

    /// Queues an event and waits for its outcome.
    ///
    /// Returns `Ok(None)` when the relay is disabled or unconfigured.
    ///
    /// # Errors
    ///
    /// Returns the enqueue error or the event's terminal delivery error.
    pub async fn send_event(&self, payload: EventPayload) -> Result<Option<Value>> {
        match self.enqueue(payload).await? {
            Some(handle) => handle.await.map(Some),
            None => Ok(None),
        }
    }

    /// Starts the worker if it is not already running.
    ///
    /// Calling this while a worker is active does nothing. Must be called
    /// from within a Tokio runtime.
    pub fn drain(&self) {
        if self
            .inner
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("starting dispatch worker");
            tokio::spawn(run_worker(self.inner.clone()));
        }
    }

    /// Sends a synthetic `test` event directly, bypassing the queue.
    ///
    /// Only an endpoint URL is required, so the endpoint can be checked
    /// before relaying is switched on. Still gated by the circuit breaker and
    /// retried like a queued event. The delivery runs on its own task and
    /// reaches a terminal outcome even if the caller stops waiting.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::NotConfigured` when no endpoint URL is set,
    /// `DispatchError::CircuitOpen` while the circuit is open, or the
    /// terminal delivery error.
    pub async fn test_connection(&self) -> Result<Value> {
        let inner = self.inner.clone();
        let task = tokio::spawn(async move { inner.connection_test().await });

        task.await.unwrap_or_else(|e| {
            Err(DispatchError::internal(format!("connection test task failed: {e}")))
        })
    }

    /// Runs [`Dispatcher::test_connection`] and summarizes the outcome.
    pub async fn connection_report(&self) -> ConnectionReport {
        ConnectionReport::from_outcome(&self.test_connection().await)
    }

    /// Current circuit state, for display.
    pub fn circuit_state(&self) -> CircuitState {
        self.inner.circuit.state()
    }

    /// Full circuit breaker snapshot.
    pub fn circuit_stats(&self) -> CircuitStats {
        self.inner.circuit.stats()
    }

    /// Events currently waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Whether a worker is currently active.
    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }

    /// Counter snapshot.
    pub fn stats(&self) -> DispatchStats {
        self.inner.counters.snapshot(self.queue_len())
    }

    /// Dispatcher configuration.
    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }
}

impl Inner {
    /// Pops the next event, or marks the worker idle when the queue is empty.
    ///
    /// The idle flag is cleared under the queue lock so an event pushed after
    /// this call always starts a fresh worker.
    fn next_event(&self) -> Option<QueuedEvent> {
        let mut queue = self.queue.lock();
        let event = queue.pop_front();
        if event.is_none() {
            self.draining.store(false, Ordering::Release);
        }
        event
    }

    async fn deliver(&self, delivery_id: Uuid, payload: &EventPayload) -> Result<Value> {
        let settings = self.settings.settings().await?;
        if !settings.enabled {
            return Err(DispatchError::not_configured("relay disabled"));
        }
        if !settings.has_endpoint() {
            return Err(DispatchError::not_configured("endpoint URL missing"));
        }

        self.attempt(&settings, delivery_id, payload).await
    }

    async fn connection_test(&self) -> Result<Value> {
        let settings = self.settings.settings().await?;
        if !settings.has_endpoint() {
            return Err(DispatchError::not_configured("endpoint URL missing"));
        }

        let payload = EventPayload::connection_test(self.clock.now_utc());
        let delivery_id = Uuid::new_v4();
        info!(%delivery_id, enabled = settings.enabled, "testing relay connection");

        self.attempt(&settings, delivery_id, &payload).await
    }

    /// Circuit check followed by the retried delivery.
    async fn attempt(
        &self,
        settings: &Settings,
        delivery_id: Uuid,
        payload: &EventPayload,
    ) -> Result<Value> {
        if let Err(error) = self.circuit.check() {
            warn!(
                %delivery_id,
                event_type = %payload.event_type,
                state = %self.circuit.state(),
                "circuit breaker open, skipping delivery"
            );
            return Err(error);
        }

        self.executor.deliver(settings, delivery_id, payload).await
    }

    async fn process(&self, event: QueuedEvent) {
        let QueuedEvent { delivery_id, payload, responder, enqueued_at } = event;
        debug!(
            %delivery_id,
            event_type = %payload.event_type,
            waited_ms = self.clock.now().saturating_duration_since(enqueued_at).as_millis(),
            "processing event"
        );

        let outcome = self.deliver(delivery_id, &payload).await;
        self.counters.record_outcome(&outcome);

        if responder.send(outcome).is_err() {
            debug!(%delivery_id, "caller stopped waiting for delivery outcome");
        }
    }
}

async fn run_worker(inner: Arc<Inner>) {
    while let Some(event) = inner.next_event() {
        inner.process(event).await;

        let pending = inner.queue.lock().len();
        if pending > 0 {
            inner.clock.sleep(inner.config.rate_limit).await;
        }
    }

    debug!("dispatch queue drained, worker idle");
}
