//! Producer path: bounded retry, circuit breaking and dead-lettering
//!
//! [`DeliveryCoordinator::send`] drives one message to a terminal outcome:
//!
//! ```text
//! breaker open? ──yes──────────────────────────────► DLQ (CircuitBreakerOpen)
//!      │ no
//!      ▼
//! publish ──ok──► Produced
//!      │ err
//!      ▼
//! transient && attempt < max? ──yes──► sleep(delay(attempt)) ──► publish
//!      │ no
//!      ▼
//! DLQ (PermanentError | RetriesExhausted) ──ok──► SentToDlq
//!                                         └─err─► Failed
//! ```
//!
//! Retries wait on the tokio timer, so a delivery in backoff costs nothing
//! but its future. The breaker is consulted once per `send`; retries of a
//! delivery already in flight are not cut short by it.

use crate::error::ForwardingFailure;
use crate::metrics::Metrics;
use crate::resilience::{
    BackoffPolicy, CircuitBreaker, CircuitState, DeadLetterEnvelope, DeadLetterForwarder,
    DefaultClassifier, DlqReason, FailureClassifier,
};
use chrono::{DateTime, Utc};
use courier_core::{BrokerError, Headers, Message, Publisher, header_keys};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Terminal result of one `send`
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// The broker acknowledged the message
    Produced {
        /// Topic the message landed in
        topic: String,
        /// Partition assigned by the broker
        partition: i32,
        /// Offset assigned by the broker
        offset: i64,
        /// Broker timestamp
        timestamp: DateTime<Utc>,
        /// Publish attempts it took (1 = first try)
        attempts: u32,
    },

    /// The message was parked on the dead-letter topic
    SentToDlq {
        /// Why it was dead-lettered
        reason: DlqReason,
        /// Dead-letter topic
        dlq_topic: String,
        /// Last delivery error, `None` when the breaker was open
        error: Option<BrokerError>,
    },

    /// Delivery failed and so did dead-letter forwarding
    Failed {
        /// Reason the message was headed for the dead-letter topic
        reason: DlqReason,
        /// Original and forwarding errors
        error: ForwardingFailure,
    },
}

impl DeliveryOutcome {
    /// Whether the broker acknowledged the message on the target topic
    pub fn is_produced(&self) -> bool {
        matches!(self, DeliveryOutcome::Produced { .. })
    }

    /// Dead-letter reason, if the message did not reach its topic
    pub fn reason(&self) -> Option<DlqReason> {
        match self {
            DeliveryOutcome::Produced { .. } => None,
            DeliveryOutcome::SentToDlq { reason, .. } | DeliveryOutcome::Failed { reason, .. } => {
                Some(*reason)
            }
        }
    }
}

/// One pass through the publish step
///
/// Lives only as long as the `send` call that created it.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    /// Message being delivered
    pub message: Message,
    /// Attempt number, starting at 1
    pub attempt: u32,
    /// When this attempt started
    pub started_at: Instant,
}

impl DeliveryAttempt {
    fn first(message: Message) -> Self {
        Self {
            message,
            attempt: 1,
            started_at: Instant::now(),
        }
    }

    fn next(self) -> Self {
        Self {
            message: self.message,
            attempt: self.attempt.saturating_add(1),
            started_at: Instant::now(),
        }
    }
}

/// Retry settings for the producer path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliverySettings {
    /// Total publish attempts per message (initial + retries)
    pub max_attempts: u32,
    /// Delay schedule between attempts
    pub backoff: BackoffPolicy,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Read-only snapshot of producer-side counters
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ProducerMetrics {
    /// Messages acknowledged by the broker
    pub produced: u64,
    /// Messages whose dead-letter forward also failed
    pub failed: u64,
    /// Retries scheduled
    pub retried: u64,
    /// Messages forwarded to the dead-letter topic
    pub sent_to_dlq: u64,
    /// Current consecutive failure count of the breaker
    pub consecutive_failures: u32,
    /// Whether the breaker is currently rejecting deliveries
    pub circuit_open: bool,
    /// Breaker state
    pub circuit_state: CircuitState,
    /// Failed attempts by error kind
    pub error_counts: BTreeMap<String, u64>,
}

#[derive(Default)]
struct ProducerStats {
    produced: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    sent_to_dlq: AtomicU64,
    error_counts: Mutex<BTreeMap<&'static str, u64>>,
}

impl ProducerStats {
    fn record_error(&self, kind: &'static str) {
        *self.error_counts.lock().entry(kind).or_insert(0) += 1;
    }
}

/// Drives messages to a terminal [`DeliveryOutcome`]
///
/// Cheap to share: wrap in an `Arc` and call [`send`](Self::send) or
/// [`spawn_send`](Self::spawn_send) from as many tasks as needed.
pub struct DeliveryCoordinator {
    topic: String,
    publisher: Arc<dyn Publisher>,
    forwarder: Arc<DeadLetterForwarder>,
    breaker: Arc<CircuitBreaker>,
    classifier: Arc<dyn FailureClassifier>,
    settings: DeliverySettings,
    stats: ProducerStats,
}

impl DeliveryCoordinator {
    /// Create a coordinator using the [`DefaultClassifier`]
    pub fn new(
        topic: impl Into<String>,
        publisher: Arc<dyn Publisher>,
        forwarder: Arc<DeadLetterForwarder>,
        breaker: Arc<CircuitBreaker>,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            topic: topic.into(),
            publisher,
            forwarder,
            breaker,
            classifier: Arc::new(DefaultClassifier::new()),
            settings,
            stats: ProducerStats::default(),
        }
    }

    /// Replace the failure classifier
    pub fn with_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Target topic
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Circuit breaker guarding this coordinator's channel
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Shared dead-letter forwarder
    pub fn forwarder(&self) -> &Arc<DeadLetterForwarder> {
        &self.forwarder
    }

    /// Deliver one message
    ///
    /// Never returns a bare transport error; every failure mode maps to a
    /// [`DeliveryOutcome`] variant.
    pub async fn send(&self, message: Message) -> DeliveryOutcome {
        if self.breaker.is_open() {
            tracing::warn!(
                topic = %self.topic,
                message_id = %message.id,
                "circuit breaker open, bypassing broker"
            );
            return self
                .dead_letter(&message, DlqReason::CircuitBreakerOpen, None)
                .await;
        }

        let mut headers = Headers::new();
        headers.insert(header_keys::MESSAGE_ID.into(), message.id.to_string());

        let mut current = DeliveryAttempt::first(message);
        loop {
            let result = self
                .publisher
                .publish(
                    &self.topic,
                    &current.message.key,
                    current.message.payload.clone(),
                    &headers,
                )
                .await;

            let error = match result {
                Ok(receipt) => {
                    self.breaker.record_success();
                    self.stats.produced.fetch_add(1, Ordering::Relaxed);
                    if let Some(m) = Metrics::get() {
                        m.record_produced(&self.topic, current.attempt);
                    }
                    tracing::debug!(
                        topic = %self.topic,
                        message_id = %current.message.id,
                        partition = receipt.partition,
                        offset = receipt.offset,
                        attempt = current.attempt,
                        "message produced"
                    );
                    return DeliveryOutcome::Produced {
                        topic: receipt.topic,
                        partition: receipt.partition,
                        offset: receipt.offset,
                        timestamp: receipt.timestamp,
                        attempts: current.attempt,
                    };
                }
                Err(e) => e,
            };

            self.breaker.record_failure();
            self.stats.record_error(error.kind());
            if let Some(m) = Metrics::get() {
                m.record_delivery_error(&self.topic, error.kind());
            }

            let class = self.classifier.classify(&error);
            tracing::warn!(
                topic = %self.topic,
                message_id = %current.message.id,
                attempt = current.attempt,
                max_attempts = self.settings.max_attempts,
                class = ?class,
                elapsed_ms = current.started_at.elapsed().as_millis() as u64,
                error = %error,
                "delivery attempt failed"
            );

            if class.is_transient() && current.attempt < self.settings.max_attempts {
                let delay = self.settings.backoff.delay(current.attempt);
                self.stats.retried.fetch_add(1, Ordering::Relaxed);
                if let Some(m) = Metrics::get() {
                    m.record_retry(&self.topic);
                }
                tracing::debug!(
                    topic = %self.topic,
                    message_id = %current.message.id,
                    attempt = current.attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retry scheduled"
                );
                tokio::time::sleep(delay).await;
                current = current.next();
                continue;
            }

            let reason = if class.is_transient() {
                DlqReason::RetriesExhausted
            } else {
                DlqReason::PermanentError
            };
            return self.dead_letter(&current.message, reason, Some(error)).await;
        }
    }

    /// Deliver on a spawned task
    pub fn spawn_send(self: &Arc<Self>, message: Message) -> JoinHandle<DeliveryOutcome> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.send(message).await })
    }

    /// Snapshot of producer-side counters
    pub fn metrics(&self) -> ProducerMetrics {
        let circuit_state = self.breaker.state();
        ProducerMetrics {
            produced: self.stats.produced.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            retried: self.stats.retried.load(Ordering::Relaxed),
            sent_to_dlq: self.stats.sent_to_dlq.load(Ordering::Relaxed),
            consecutive_failures: self.breaker.consecutive_failures(),
            circuit_open: circuit_state == CircuitState::Open,
            circuit_state,
            error_counts: self
                .stats
                .error_counts
                .lock()
                .iter()
                .map(|(kind, count)| ((*kind).to_string(), *count))
                .collect(),
        }
    }

    async fn dead_letter(
        &self,
        message: &Message,
        reason: DlqReason,
        error: Option<BrokerError>,
    ) -> DeliveryOutcome {
        let envelope = DeadLetterEnvelope::from_message(message, &self.topic, reason);

        match self.forwarder.forward(&envelope).await {
            Ok(()) => {
                self.stats.sent_to_dlq.fetch_add(1, Ordering::Relaxed);
                DeliveryOutcome::SentToDlq {
                    reason,
                    dlq_topic: self.forwarder.dlq_topic().to_string(),
                    error,
                }
            }
            Err(forwarding) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                DeliveryOutcome::Failed {
                    reason,
                    error: ForwardingFailure {
                        original: error,
                        forwarding,
                    },
                }
            }
        }
    }
}
