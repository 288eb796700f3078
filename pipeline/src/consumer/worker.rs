//! Partition worker - pulls records for one partition and hands them to the
//! ack coordinator strictly in offset order
//!
//! The worker stops when the shutdown signal fires, when its source is
//! exhausted, or when a record could neither be processed nor
//! dead-lettered. A record already being handled when shutdown fires is
//! finished first, so its offset is committed before the worker exits.

use super::{AckCoordinator, HandleOutcome};
use crate::error::ConsumerError;
use courier_core::RecordSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Why a worker stopped without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Shutdown was signalled
    Shutdown,
    /// The source reported it has nothing more to yield
    Exhausted,
}

/// What a worker did before it stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Records processed successfully
    pub processed: u64,
    /// Records skipped as duplicates
    pub duplicates_skipped: u64,
    /// Records forwarded to the dead-letter topic
    pub dead_lettered: u64,
    /// Records handled whose offset commit failed
    pub commit_failures: u64,
    /// Failed polls
    pub poll_errors: u64,
    /// Why the worker stopped
    pub stopped_by: StopReason,
}

impl WorkerSummary {
    fn new() -> Self {
        Self {
            processed: 0,
            duplicates_skipped: 0,
            dead_lettered: 0,
            commit_failures: 0,
            poll_errors: 0,
            stopped_by: StopReason::Shutdown,
        }
    }

    /// Records accounted for (processed, skipped or dead-lettered)
    pub fn handled(&self) -> u64 {
        self.processed + self.duplicates_skipped + self.dead_lettered
    }
}

/// Pull loop for one partition
pub struct PartitionWorker {
    topic: String,
    partition: i32,
    source: Box<dyn RecordSource>,
    coordinator: Arc<AckCoordinator>,
    shutdown: watch::Receiver<bool>,
    poll_backoff: Duration,
}

impl PartitionWorker {
    /// Create a worker
    ///
    /// Failed polls are retried after the coordinator's backoff base delay.
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        source: Box<dyn RecordSource>,
        coordinator: Arc<AckCoordinator>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let poll_backoff = coordinator.settings().backoff.base_delay;
        Self {
            topic: topic.into(),
            partition,
            source,
            coordinator,
            shutdown,
            poll_backoff,
        }
    }

    /// Override the delay after a failed poll
    pub fn with_poll_backoff(mut self, delay: Duration) -> Self {
        self.poll_backoff = delay;
        self
    }

    /// Run until shutdown, exhaustion or an unaccounted-for record
    ///
    /// Returns [`ConsumerError::Forwarding`] when a record could neither be
    /// processed nor dead-lettered. Its offset is left uncommitted.
    pub async fn run(mut self) -> Result<WorkerSummary, ConsumerError> {
        info!(topic = %self.topic, partition = self.partition, "partition worker started");
        let mut summary = WorkerSummary::new();

        loop {
            if *self.shutdown.borrow() {
                summary.stopped_by = StopReason::Shutdown;
                break;
            }

            let polled = tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    // A dropped sender counts as shutdown
                    if changed.is_err() || *self.shutdown.borrow() {
                        summary.stopped_by = StopReason::Shutdown;
                        break;
                    }
                    continue;
                }
                polled = self.source.poll() => polled,
            };

            let record = match polled {
                Ok(Some(record)) => record,
                Ok(None) => {
                    summary.stopped_by = StopReason::Exhausted;
                    break;
                }
                Err(e) => {
                    summary.poll_errors += 1;
                    self.coordinator.note_poll_error(&self.topic);
                    warn!(
                        topic = %self.topic,
                        partition = self.partition,
                        delay_ms = self.poll_backoff.as_millis() as u64,
                        error = %e,
                        "poll failed, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = self.shutdown.changed() => {}
                        _ = tokio::time::sleep(self.poll_backoff) => {}
                    }
                    continue;
                }
            };

            match self.coordinator.handle(&record).await {
                Ok(HandleOutcome::Processed) => summary.processed += 1,
                Ok(HandleOutcome::DuplicateSkipped) => summary.duplicates_skipped += 1,
                Ok(HandleOutcome::DeadLettered) => summary.dead_lettered += 1,
                Err(e @ ConsumerError::Commit { .. }) => {
                    summary.commit_failures += 1;
                    warn!(
                        topic = %self.topic,
                        partition = self.partition,
                        offset = record.offset,
                        error = %e,
                        "offset commit failed, continuing"
                    );
                }
                Err(e @ ConsumerError::Forwarding { .. }) => {
                    error!(
                        topic = %self.topic,
                        partition = self.partition,
                        offset = record.offset,
                        error = %e,
                        "record could not be processed or dead-lettered, stopping worker"
                    );
                    return Err(e);
                }
            }
            debug!(
                topic = %self.topic,
                partition = self.partition,
                offset = record.offset,
                "record handled"
            );
        }

        info!(
            topic = %self.topic,
            partition = self.partition,
            handled = summary.handled(),
            stopped_by = ?summary.stopped_by,
            "partition worker stopped"
        );
        Ok(summary)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::consumer::{ConsumerSettings, DedupLedger, RecordProcessor};
    use crate::error::ProcessingError;
    use crate::offsets::MemoryOffsetStore;
    use crate::resilience::{BackoffPolicy, DeadLetterForwarder};
    use async_trait::async_trait;
    use bytes::Bytes;
    use courier_core::{
        BrokerError, DeliveryReceipt, Headers, OffsetCommitter, Publisher, Record, header_keys,
    };
    use std::collections::VecDeque;

    struct OkProcessor;

    #[async_trait]
    impl RecordProcessor for OkProcessor {
        async fn process(&self, _: &Record) -> Result<(), ProcessingError> {
            Ok(())
        }
    }

    struct RejectingProcessor;

    #[async_trait]
    impl RecordProcessor for RejectingProcessor {
        async fn process(&self, _: &Record) -> Result<(), ProcessingError> {
            Err(ProcessingError::new("invalid account"))
        }
    }

    struct NullPublisher {
        broken: bool,
    }

    #[async_trait]
    impl Publisher for NullPublisher {
        fn name(&self) -> &'static str {
            "null"
        }

        async fn publish(
            &self,
            topic: &str,
            _: &str,
            _: Bytes,
            _: &Headers,
        ) -> Result<DeliveryReceipt, BrokerError> {
            if self.broken {
                return Err(BrokerError::NotReady);
            }
            Ok(DeliveryReceipt {
                topic: topic.into(),
                partition: 0,
                offset: 0,
                timestamp: chrono::Utc::now(),
            })
        }
    }

    /// Source replaying a script of poll results, exhausted when empty
    struct ScriptSource(VecDeque<Result<Option<Record>, BrokerError>>);

    #[async_trait]
    impl RecordSource for ScriptSource {
        async fn poll(&mut self) -> Result<Option<Record>, BrokerError> {
            self.0.pop_front().unwrap_or(Ok(None))
        }
    }

    /// Source that never yields
    struct IdleSource;

    #[async_trait]
    impl RecordSource for IdleSource {
        async fn poll(&mut self) -> Result<Option<Record>, BrokerError> {
            std::future::pending().await
        }
    }

    struct BrokenCommitter;

    #[async_trait]
    impl OffsetCommitter for BrokenCommitter {
        async fn commit(&self, _: &str, _: i32, _: i64) -> Result<(), BrokerError> {
            Err(BrokerError::Connection("coordinator moved".into()))
        }
    }

    fn coordinator(
        processor: Arc<dyn RecordProcessor>,
        committer: Arc<dyn OffsetCommitter>,
        broken_dlq: bool,
    ) -> Arc<AckCoordinator> {
        Arc::new(AckCoordinator::new(
            processor,
            Arc::new(DedupLedger::new(100)),
            Arc::new(DeadLetterForwarder::new(
                Arc::new(NullPublisher { broken: broken_dlq }),
                "orders.dlq",
                10,
            )),
            committer,
            ConsumerSettings {
                max_attempts: 2,
                backoff: BackoffPolicy::new(Duration::from_millis(100)),
            },
        ))
    }

    fn record(offset: i64, id: &str) -> Record {
        Record::new("orders", 0, offset, "CUST-1", Bytes::new())
            .with_header(header_keys::MESSAGE_ID, id)
    }

    fn script(records: Vec<Result<Option<Record>, BrokerError>>) -> Box<dyn RecordSource> {
        Box::new(ScriptSource(records.into()))
    }

    #[tokio::test]
    async fn test_drains_source_in_order() {
        let offsets = Arc::new(MemoryOffsetStore::new());
        let (_tx, rx) = watch::channel(false);
        let worker = PartitionWorker::new(
            "orders",
            0,
            script(vec![
                Ok(Some(record(0, "A"))),
                Ok(Some(record(1, "B"))),
                Ok(Some(record(2, "A"))),
            ]),
            coordinator(Arc::new(OkProcessor), offsets.clone(), false),
            rx,
        );

        let summary = worker.run().await.unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.duplicates_skipped, 1);
        assert_eq!(summary.stopped_by, StopReason::Exhausted);
        assert_eq!(offsets.committed("orders", 0), Some(2));
    }

    #[tokio::test]
    async fn test_poll_error_backs_off_and_continues() {
        tokio::time::pause();
        let offsets = Arc::new(MemoryOffsetStore::new());
        let c = coordinator(Arc::new(OkProcessor), offsets.clone(), false);
        let (_tx, rx) = watch::channel(false);
        let worker = PartitionWorker::new(
            "orders",
            0,
            script(vec![
                Err(BrokerError::Timeout("fetch".into())),
                Ok(Some(record(0, "A"))),
            ]),
            c.clone(),
            rx,
        );

        let summary = worker.run().await.unwrap();

        assert_eq!(summary.poll_errors, 1);
        assert_eq!(summary.processed, 1);
        assert_eq!(c.metrics().processing_errors, 1);
    }

    #[tokio::test]
    async fn test_commit_failure_does_not_stop_worker() {
        let (_tx, rx) = watch::channel(false);
        let worker = PartitionWorker::new(
            "orders",
            0,
            script(vec![Ok(Some(record(0, "A"))), Ok(Some(record(1, "B")))]),
            coordinator(Arc::new(OkProcessor), Arc::new(BrokenCommitter), false),
            rx,
        );

        let summary = worker.run().await.unwrap();

        assert_eq!(summary.commit_failures, 2);
        assert_eq!(summary.stopped_by, StopReason::Exhausted);
    }

    #[tokio::test]
    async fn test_forwarding_failure_stops_worker() {
        tokio::time::pause();
        let offsets = Arc::new(MemoryOffsetStore::new());
        let (_tx, rx) = watch::channel(false);
        let worker = PartitionWorker::new(
            "orders",
            0,
            script(vec![Ok(Some(record(0, "A"))), Ok(Some(record(1, "B")))]),
            coordinator(Arc::new(RejectingProcessor), offsets.clone(), true),
            rx,
        );

        let err = worker.run().await.unwrap_err();

        assert!(matches!(err, ConsumerError::Forwarding { offset: 0, .. }));
        assert_eq!(offsets.committed("orders", 0), None);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_worker() {
        let (tx, rx) = watch::channel(false);
        let worker = PartitionWorker::new(
            "orders",
            0,
            Box::new(IdleSource),
            coordinator(Arc::new(OkProcessor), Arc::new(MemoryOffsetStore::new()), false),
            rx,
        );

        let handle = tokio::spawn(worker.run());
        tx.send(true).unwrap();

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.stopped_by, StopReason::Shutdown);
        assert_eq!(summary.handled(), 0);
    }

    #[tokio::test]
    async fn test_dropped_sender_counts_as_shutdown() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let worker = PartitionWorker::new(
            "orders",
            0,
            Box::new(IdleSource),
            coordinator(Arc::new(OkProcessor), Arc::new(MemoryOffsetStore::new()), false),
            rx,
        );

        let summary = worker.run().await.unwrap();
        assert_eq!(summary.stopped_by, StopReason::Shutdown);
    }
}
