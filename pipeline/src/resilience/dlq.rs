//! Dead-letter forwarding
//!
//! A message that cannot be delivered (or a record that cannot be processed)
//! is wrapped in a [`DeadLetterEnvelope`] and republished to the
//! dead-letter topic. The payload goes out byte-for-byte as it came in; the
//! diagnostics travel as headers:
//!
//! | Header | Value |
//! |--------|-------|
//! | `original-topic` | topic the message was headed for (or read from) |
//! | `error-reason` | one of [`DlqReason`] |
//! | `message-id` | message identity |
//! | `failed-at` | RFC 3339 UTC timestamp |
//! | `original-partition` | consumer path only |
//! | `original-offset` | consumer path only |
//!
//! Forwarded envelopes are also kept in a bounded [`DeadLetterLog`] for
//! inspection.

use crate::metrics::Metrics;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use courier_core::{BrokerError, Headers, Message, MessageId, Publisher, Record, header_keys};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Why a message ended up on the dead-letter topic
///
/// The wire values are a fixed vocabulary; downstream tooling matches on
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum DlqReason {
    /// Producer: the circuit breaker was open, no delivery attempted
    #[serde(rename = "CircuitBreakerOpen")]
    CircuitBreakerOpen,
    /// Producer: the broker reported a non-retriable error
    #[serde(rename = "PermanentError")]
    PermanentError,
    /// Producer: every attempt failed with a transient error
    #[serde(rename = "RetriesExhausted")]
    RetriesExhausted,
    /// Consumer: processing failed on every attempt
    #[serde(rename = "max-retries-exceeded")]
    MaxRetriesExceeded,
}

impl DlqReason {
    /// Wire value for the `error-reason` header
    pub fn as_str(self) -> &'static str {
        match self {
            DlqReason::CircuitBreakerOpen => "CircuitBreakerOpen",
            DlqReason::PermanentError => "PermanentError",
            DlqReason::RetriesExhausted => "RetriesExhausted",
            DlqReason::MaxRetriesExceeded => "max-retries-exceeded",
        }
    }
}

impl fmt::Display for DlqReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed payload plus the diagnostics forwarded with it
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetterEnvelope {
    /// Topic the message was headed for (producer) or read from (consumer)
    pub original_topic: String,
    /// Original partition key, reused for the dead-letter record
    pub key: String,
    /// Original payload, unmodified
    pub payload: Bytes,
    /// Why the message was dead-lettered
    pub reason: DlqReason,
    /// Message identity
    pub message_id: MessageId,
    /// When the terminal failure happened
    pub failed_at: DateTime<Utc>,
    /// Source partition (consumer path)
    pub original_partition: Option<i32>,
    /// Source offset (consumer path)
    pub original_offset: Option<i64>,
}

impl DeadLetterEnvelope {
    /// Envelope for a message the producer path could not deliver
    pub fn from_message(message: &Message, topic: &str, reason: DlqReason) -> Self {
        Self {
            original_topic: topic.to_string(),
            key: message.key.clone(),
            payload: message.payload.clone(),
            reason,
            message_id: message.id.clone(),
            failed_at: Utc::now(),
            original_partition: None,
            original_offset: None,
        }
    }

    /// Envelope for a record the consumer path could not process
    pub fn from_record(record: &Record, identity: MessageId, reason: DlqReason) -> Self {
        Self {
            original_topic: record.topic.clone(),
            key: record.key.clone(),
            payload: record.payload.clone(),
            reason,
            message_id: identity,
            failed_at: Utc::now(),
            original_partition: Some(record.partition),
            original_offset: Some(record.offset),
        }
    }

    /// Diagnostic headers for the dead-letter record
    pub fn headers(&self) -> Headers {
        let mut headers = Headers::new();
        headers.insert(header_keys::ORIGINAL_TOPIC.into(), self.original_topic.clone());
        headers.insert(header_keys::ERROR_REASON.into(), self.reason.as_str().into());
        headers.insert(header_keys::MESSAGE_ID.into(), self.message_id.to_string());
        headers.insert(
            header_keys::FAILED_AT.into(),
            self.failed_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        if let Some(partition) = self.original_partition {
            headers.insert(header_keys::ORIGINAL_PARTITION.into(), partition.to_string());
        }
        if let Some(offset) = self.original_offset {
            headers.insert(header_keys::ORIGINAL_OFFSET.into(), offset.to_string());
        }
        headers
    }
}

/// Bounded in-memory log of recently dead-lettered envelopes
///
/// Oldest entries are evicted once `capacity` is reached.
pub struct DeadLetterLog {
    entries: Mutex<VecDeque<DeadLetterEnvelope>>,
    capacity: usize,
    /// Metrics: total envelopes ever captured
    total_captured: AtomicU64,
    /// Metrics: envelopes evicted due to capacity
    total_evicted: AtomicU64,
}

impl DeadLetterLog {
    /// Create a new log with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            total_captured: AtomicU64::new(0),
            total_evicted: AtomicU64::new(0),
        }
    }

    /// Append an envelope, evicting the oldest if full
    pub fn push(&self, envelope: DeadLetterEnvelope) {
        self.total_captured.fetch_add(1, Ordering::Relaxed);
        if self.capacity == 0 {
            self.total_evicted.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
            self.total_evicted.fetch_add(1, Ordering::Relaxed);
        }
        entries.push_back(envelope);
    }

    /// Oldest-first copy of up to `n` entries
    pub fn peek(&self, n: usize) -> Vec<DeadLetterEnvelope> {
        self.entries.lock().iter().take(n).cloned().collect()
    }

    /// Remove and return up to `n` of the oldest entries
    pub fn drain(&self, n: usize) -> Vec<DeadLetterEnvelope> {
        let mut entries = self.entries.lock();
        let count = n.min(entries.len());
        entries.drain(..count).collect()
    }

    /// Current number of entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the log is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Maximum number of retained entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total envelopes ever captured
    pub fn total_captured(&self) -> u64 {
        self.total_captured.load(Ordering::Relaxed)
    }

    /// Total envelopes evicted due to capacity
    pub fn total_evicted(&self) -> u64 {
        self.total_evicted.load(Ordering::Relaxed)
    }
}

/// Publishes dead-letter envelopes to the DLQ topic
///
/// One forwarder is shared by the producer and consumer paths.
pub struct DeadLetterForwarder {
    publisher: Arc<dyn Publisher>,
    dlq_topic: String,
    log: DeadLetterLog,
    forwarded: AtomicU64,
    failed: AtomicU64,
}

impl DeadLetterForwarder {
    /// Create a forwarder publishing to `dlq_topic`
    pub fn new(publisher: Arc<dyn Publisher>, dlq_topic: impl Into<String>, log_capacity: usize) -> Self {
        Self {
            publisher,
            dlq_topic: dlq_topic.into(),
            log: DeadLetterLog::new(log_capacity),
            forwarded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Forward one envelope
    ///
    /// The record is keyed by the original partition key. A publish error
    /// is returned to the caller untouched.
    pub async fn forward(&self, envelope: &DeadLetterEnvelope) -> Result<(), BrokerError> {
        let headers = envelope.headers();
        let result = self
            .publisher
            .publish(&self.dlq_topic, &envelope.key, envelope.payload.clone(), &headers)
            .await;

        match result {
            Ok(receipt) => {
                self.forwarded.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    dlq_topic = %self.dlq_topic,
                    original_topic = %envelope.original_topic,
                    message_id = %envelope.message_id,
                    reason = %envelope.reason,
                    dlq_partition = receipt.partition,
                    dlq_offset = receipt.offset,
                    "message forwarded to dead-letter topic"
                );
                if let Some(m) = Metrics::get() {
                    m.record_dead_lettered(&envelope.original_topic, envelope.reason.as_str());
                }
                self.log.push(envelope.clone());
                Ok(())
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    dlq_topic = %self.dlq_topic,
                    original_topic = %envelope.original_topic,
                    message_id = %envelope.message_id,
                    reason = %envelope.reason,
                    error = %e,
                    "dead-letter forwarding failed"
                );
                if let Some(m) = Metrics::get() {
                    m.record_forwarding_failure(&envelope.original_topic);
                }
                Err(e)
            }
        }
    }

    /// Dead-letter topic name
    pub fn dlq_topic(&self) -> &str {
        &self.dlq_topic
    }

    /// Envelopes successfully forwarded
    pub fn forwarded_count(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Forward attempts that failed
    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Recently forwarded envelopes
    pub fn log(&self) -> &DeadLetterLog {
        &self.log
    }
}
