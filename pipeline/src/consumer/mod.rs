//! Consumer path: at-least-once processing with manual offset commit
//!
//! [`AckCoordinator::handle`] takes one record through
//!
//! 1. dedup check (skip and commit if the identity was already processed)
//! 2. up to `max_attempts` calls to the [`RecordProcessor`], with backoff
//! 3. dead-letter forwarding when every attempt failed
//! 4. offset commit
//!
//! and [`PartitionWorker`] feeds it from a [`RecordSource`](courier_core::RecordSource)
//! in offset order.

mod dedup;
mod worker;

pub use dedup::{DedupEntry, DedupLedger};
pub use worker::{PartitionWorker, StopReason, WorkerSummary};

use crate::error::{ConsumerError, ProcessingError};
use crate::metrics::Metrics;
use crate::resilience::{BackoffPolicy, DeadLetterEnvelope, DeadLetterForwarder, DlqReason};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{OffsetCommitter, Record, header_keys};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Business logic applied to each record
///
/// Called at most `max_attempts` times per record. Implementations should be
/// idempotent for the same record: a crash between processing and commit
/// leads to redelivery, and the dedup ledger only remembers completed work.
#[async_trait]
pub trait RecordProcessor: Send + Sync {
    /// Short name for identification and logging
    fn name(&self) -> &'static str {
        "processor"
    }

    /// Process one record
    async fn process(&self, record: &Record) -> Result<(), ProcessingError>;
}

/// How a record was accounted for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Processed successfully and committed
    Processed,
    /// Identity already processed, committed without processing
    DuplicateSkipped,
    /// Every attempt failed, forwarded to the dead-letter topic and committed
    DeadLettered,
}

/// Retry settings for the consumer path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// Processing attempts per record
    pub max_attempts: u32,
    /// Delay schedule between attempts
    pub backoff: BackoffPolicy,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Read-only snapshot of consumer-side counters
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ConsumerMetrics {
    /// Records handed to `handle`
    pub consumed: u64,
    /// Records processed successfully
    pub processed: u64,
    /// Redelivered records skipped
    pub duplicates_skipped: u64,
    /// Failed processing attempts plus poll errors
    pub processing_errors: u64,
    /// Records forwarded to the dead-letter topic
    pub sent_to_dlq: u64,
    /// Offsets committed
    pub manual_commits: u64,
    /// Last committed offset, keyed by `topic/partition`
    pub committed_offsets: BTreeMap<String, i64>,
    /// When the last record arrived
    pub last_message_at: Option<DateTime<Utc>>,
    /// When the last commit succeeded
    pub last_commit_at: Option<DateTime<Utc>>,
    /// Identities currently held by the dedup ledger
    pub dedup_entries: usize,
}

#[derive(Default)]
struct ConsumerStats {
    consumed: AtomicU64,
    processed: AtomicU64,
    duplicates_skipped: AtomicU64,
    processing_errors: AtomicU64,
    sent_to_dlq: AtomicU64,
    manual_commits: AtomicU64,
    marks: Mutex<Marks>,
}

#[derive(Default)]
struct Marks {
    committed_offsets: BTreeMap<String, i64>,
    last_message_at: Option<DateTime<Utc>>,
    last_commit_at: Option<DateTime<Utc>>,
}

/// Identity used for deduplication
///
/// The `message-id` header when present, else `topic/partition/offset`.
pub fn record_identity(record: &Record) -> String {
    match record.header(header_keys::MESSAGE_ID) {
        Some(id) => id.to_string(),
        None => format!("{}/{}/{}", record.topic, record.partition, record.offset),
    }
}

/// Accounts for every record exactly once per successful commit
pub struct AckCoordinator {
    processor: Arc<dyn RecordProcessor>,
    ledger: Arc<DedupLedger>,
    forwarder: Arc<DeadLetterForwarder>,
    committer: Arc<dyn OffsetCommitter>,
    settings: ConsumerSettings,
    stats: ConsumerStats,
}

impl AckCoordinator {
    /// Create a coordinator
    pub fn new(
        processor: Arc<dyn RecordProcessor>,
        ledger: Arc<DedupLedger>,
        forwarder: Arc<DeadLetterForwarder>,
        committer: Arc<dyn OffsetCommitter>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            processor,
            ledger,
            forwarder,
            committer,
            settings,
            stats: ConsumerStats::default(),
        }
    }

    /// Shared dedup ledger
    pub fn ledger(&self) -> &Arc<DedupLedger> {
        &self.ledger
    }

    /// Shared dead-letter forwarder
    pub fn forwarder(&self) -> &Arc<DeadLetterForwarder> {
        &self.forwarder
    }

    /// Retry settings
    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    /// Handle one record
    ///
    /// On `Ok` the record's offset has been committed. On
    /// [`ConsumerError::Forwarding`] nothing was committed and the broker
    /// will redeliver the record.
    pub async fn handle(&self, record: &Record) -> Result<HandleOutcome, ConsumerError> {
        self.stats.consumed.fetch_add(1, Ordering::Relaxed);
        self.stats.marks.lock().last_message_at = Some(Utc::now());
        if let Some(m) = Metrics::get() {
            m.record_consumed(&record.topic);
        }

        let identity = record_identity(record);

        if self.ledger.seen(&identity) {
            self.stats.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
            if let Some(m) = Metrics::get() {
                m.record_duplicate(&record.topic);
            }
            tracing::debug!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                message_id = %identity,
                "duplicate record skipped"
            );
            self.commit(record).await?;
            return Ok(HandleOutcome::DuplicateSkipped);
        }

        let max_attempts = self.settings.max_attempts.max(1);
        let mut last_error = ProcessingError::new("not attempted");

        for attempt in 1..=max_attempts {
            match self.processor.process(record).await {
                Ok(()) => {
                    let fresh = self.ledger.record(DedupEntry {
                        identity: identity.clone(),
                        audited_at: Utc::now(),
                        partition: record.partition,
                        offset: record.offset,
                    });
                    if !fresh {
                        tracing::debug!(
                            message_id = %identity,
                            "identity recorded concurrently by another worker"
                        );
                    }
                    self.stats.processed.fetch_add(1, Ordering::Relaxed);
                    if let Some(m) = Metrics::get() {
                        m.record_processed(&record.topic);
                    }
                    self.commit(record).await?;
                    return Ok(HandleOutcome::Processed);
                }
                Err(e) => {
                    self.stats.processing_errors.fetch_add(1, Ordering::Relaxed);
                    if let Some(m) = Metrics::get() {
                        m.record_processing_error(&record.topic);
                    }
                    tracing::warn!(
                        processor = self.processor.name(),
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        message_id = %identity,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        error = %e,
                        "record processing failed"
                    );

                    if attempt < max_attempts {
                        let delay = self.settings.backoff.delay(attempt);
                        tracing::debug!(
                            message_id = %identity,
                            attempt = attempt,
                            delay_ms = delay.as_millis() as u64,
                            "processing retry scheduled"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = e;
                }
            }
        }

        let envelope =
            DeadLetterEnvelope::from_record(record, identity.into(), DlqReason::MaxRetriesExceeded);
        if let Err(forwarding) = self.forwarder.forward(&envelope).await {
            return Err(ConsumerError::Forwarding {
                topic: record.topic.clone(),
                partition: record.partition,
                offset: record.offset,
                processing: last_error,
                forwarding,
            });
        }
        self.stats.sent_to_dlq.fetch_add(1, Ordering::Relaxed);

        self.commit(record).await?;
        Ok(HandleOutcome::DeadLettered)
    }

    /// Snapshot of consumer-side counters
    pub fn metrics(&self) -> ConsumerMetrics {
        let marks = self.stats.marks.lock();
        ConsumerMetrics {
            consumed: self.stats.consumed.load(Ordering::Relaxed),
            processed: self.stats.processed.load(Ordering::Relaxed),
            duplicates_skipped: self.stats.duplicates_skipped.load(Ordering::Relaxed),
            processing_errors: self.stats.processing_errors.load(Ordering::Relaxed),
            sent_to_dlq: self.stats.sent_to_dlq.load(Ordering::Relaxed),
            manual_commits: self.stats.manual_commits.load(Ordering::Relaxed),
            committed_offsets: marks.committed_offsets.clone(),
            last_message_at: marks.last_message_at,
            last_commit_at: marks.last_commit_at,
            dedup_entries: self.ledger.len(),
        }
    }

    /// Count a failed poll against the processing error counter
    pub(crate) fn note_poll_error(&self, topic: &str) {
        self.stats.processing_errors.fetch_add(1, Ordering::Relaxed);
        if let Some(m) = Metrics::get() {
            m.record_processing_error(topic);
        }
    }

    async fn commit(&self, record: &Record) -> Result<(), ConsumerError> {
        self.committer
            .commit(&record.topic, record.partition, record.offset)
            .await
            .map_err(|source| ConsumerError::Commit {
                topic: record.topic.clone(),
                partition: record.partition,
                offset: record.offset,
                source,
            })?;

        self.stats.manual_commits.fetch_add(1, Ordering::Relaxed);
        {
            let mut marks = self.stats.marks.lock();
            marks
                .committed_offsets
                .insert(format!("{}/{}", record.topic, record.partition), record.offset);
            marks.last_commit_at = Some(Utc::now());
        }
        if let Some(m) = Metrics::get() {
            m.record_commit(&record.topic);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::offsets::MemoryOffsetStore;
    use bytes::Bytes;
    use courier_core::{BrokerError, DeliveryReceipt, Headers, Publisher};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    /// Processor that fails N times then succeeds
    struct FlakyProcessor {
        calls: AtomicU32,
        failures: u32,
    }

    impl FlakyProcessor {
        fn new(failures: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures,
            }
        }
    }

    #[async_trait]
    impl RecordProcessor for FlakyProcessor {
        async fn process(&self, _: &Record) -> Result<(), ProcessingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(ProcessingError::new("downstream ledger unavailable"))
            } else {
                Ok(())
            }
        }
    }

    /// Publisher capturing dead-letter records, optionally failing
    struct DlqSink {
        headers: Mutex<Vec<Headers>>,
        broken: bool,
    }

    #[async_trait]
    impl Publisher for DlqSink {
        fn name(&self) -> &'static str {
            "dlq-sink"
        }

        async fn publish(
            &self,
            topic: &str,
            _: &str,
            _: Bytes,
            headers: &Headers,
        ) -> Result<DeliveryReceipt, BrokerError> {
            if self.broken {
                return Err(BrokerError::Connection("dlq down".into()));
            }
            self.headers.lock().push(headers.clone());
            Ok(DeliveryReceipt {
                topic: topic.into(),
                partition: 0,
                offset: 0,
                timestamp: Utc::now(),
            })
        }
    }

    struct Harness {
        coordinator: AckCoordinator,
        processor: Arc<FlakyProcessor>,
        sink: Arc<DlqSink>,
        offsets: Arc<MemoryOffsetStore>,
    }

    fn harness(failures: u32, broken_dlq: bool) -> Harness {
        let processor = Arc::new(FlakyProcessor::new(failures));
        let sink = Arc::new(DlqSink {
            headers: Mutex::new(Vec::new()),
            broken: broken_dlq,
        });
        let offsets = Arc::new(MemoryOffsetStore::new());
        let coordinator = AckCoordinator::new(
            processor.clone(),
            Arc::new(DedupLedger::new(100)),
            Arc::new(DeadLetterForwarder::new(sink.clone(), "orders.dlq", 10)),
            offsets.clone(),
            ConsumerSettings {
                max_attempts: 3,
                backoff: BackoffPolicy::new(Duration::from_millis(1000)),
            },
        );
        Harness {
            coordinator,
            processor,
            sink,
            offsets,
        }
    }

    fn record(offset: i64, id: &str) -> Record {
        Record::new("orders", 0, offset, "CUST-1", Bytes::from_static(b"{}"))
            .with_header(header_keys::MESSAGE_ID, id)
    }

    #[test]
    fn test_identity_falls_back_to_position() {
        let r = Record::new("orders", 2, 17, "k", Bytes::new());
        assert_eq!(record_identity(&r), "orders/2/17");
        assert_eq!(record_identity(&r.with_header(header_keys::MESSAGE_ID, "TX-1")), "TX-1");
    }

    #[tokio::test]
    async fn test_processed_and_committed() {
        let h = harness(0, false);

        let outcome = h.coordinator.handle(&record(5, "TX-1")).await.unwrap();

        assert_eq!(outcome, HandleOutcome::Processed);
        assert_eq!(h.offsets.committed("orders", 0), Some(5));
        assert!(h.coordinator.ledger().seen("TX-1"));
        let m = h.coordinator.metrics();
        assert_eq!(m.processed, 1);
        assert_eq!(m.manual_commits, 1);
        assert_eq!(m.committed_offsets.get("orders/0"), Some(&5));
        assert!(m.last_commit_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_skipped_but_committed() {
        let h = harness(0, false);

        h.coordinator.handle(&record(5, "TX-1")).await.unwrap();
        let outcome = h.coordinator.handle(&record(6, "TX-1")).await.unwrap();

        assert_eq!(outcome, HandleOutcome::DuplicateSkipped);
        assert_eq!(h.processor.calls.load(Ordering::SeqCst), 1);
        let m = h.coordinator.metrics();
        assert_eq!(m.processed, 1);
        assert_eq!(m.duplicates_skipped, 1);
        assert_eq!(m.manual_commits, 2);
        assert_eq!(h.offsets.committed("orders", 0), Some(6));
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        tokio::time::pause();
        let h = harness(2, false);
        let start = tokio::time::Instant::now();

        let outcome = h.coordinator.handle(&record(1, "TX-2")).await.unwrap();

        assert_eq!(outcome, HandleOutcome::Processed);
        // 1000ms + 2000ms of backoff, give or take timer granularity
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(3000), "{waited:?}");
        assert!(waited < Duration::from_millis(3010), "{waited:?}");
        assert_eq!(h.coordinator.metrics().processing_errors, 2);
    }

    #[tokio::test]
    async fn test_exhaustion_dead_letters_and_commits() {
        tokio::time::pause();
        let h = harness(u32::MAX, false);

        let outcome = h.coordinator.handle(&record(9, "TX-3")).await.unwrap();

        assert_eq!(outcome, HandleOutcome::DeadLettered);
        assert_eq!(h.processor.calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.offsets.committed("orders", 0), Some(9));

        let headers = h.sink.headers.lock();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0][header_keys::ERROR_REASON], "max-retries-exceeded");
        assert_eq!(headers[0][header_keys::ORIGINAL_OFFSET], "9");
        assert_eq!(headers[0][header_keys::MESSAGE_ID], "TX-3");
        drop(headers);

        // Dead-lettered identities are not recorded as processed
        assert!(!h.coordinator.ledger().seen("TX-3"));
        assert_eq!(h.coordinator.metrics().sent_to_dlq, 1);
    }

    #[tokio::test]
    async fn test_forwarding_failure_leaves_offset_uncommitted() {
        tokio::time::pause();
        let h = harness(u32::MAX, true);

        let err = h.coordinator.handle(&record(4, "TX-4")).await.unwrap_err();

        match err {
            ConsumerError::Forwarding {
                offset,
                processing,
                forwarding,
                ..
            } => {
                assert_eq!(offset, 4);
                assert_eq!(processing, ProcessingError::new("downstream ledger unavailable"));
                assert_eq!(forwarding, BrokerError::Connection("dlq down".into()));
            }
            other => panic!("expected Forwarding, got {other:?}"),
        }
        assert_eq!(h.offsets.committed("orders", 0), None);
        assert_eq!(h.coordinator.metrics().manual_commits, 0);
    }

    #[test]
    fn test_metrics_snapshot_serializes() {
        let h = harness(0, false);
        let json = serde_json::to_value(h.coordinator.metrics()).unwrap();
        assert_eq!(json["consumed"], 0);
        assert!(json["last_commit_at"].is_null());
    }
}
