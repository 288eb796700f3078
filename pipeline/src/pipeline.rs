//! Pipeline builder
//!
//! Wires both paths around one dead-letter forwarder:
//!
//! ```text
//!                ┌────────────────────────┐
//!   send() ────> │  DeliveryCoordinator   │ ──> publisher (topic)
//!                │  breaker · classifier  │
//!                └───────────┬────────────┘
//!                            │ DLQ
//!                            ▼
//!                ┌────────────────────────┐
//!                │  DeadLetterForwarder   │ ──> publisher (dlq topic)
//!                └───────────▲────────────┘
//!                            │ DLQ
//!                ┌───────────┴────────────┐
//!   source p0 ─> │     AckCoordinator     │ ──> committer
//!   source p1 ─> │  dedup ledger · retry  │
//!                └────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use courier_pipeline::{MemoryBroker, MemoryOffsetStore, Pipeline};
//! use std::sync::Arc;
//!
//! let broker = Arc::new(MemoryBroker::new(2));
//! let mut runner = Pipeline::from_config(&config)
//!     .publisher_arc(broker.clone())
//!     .processor(LedgerWriter::new())
//!     .committer(Arc::new(MemoryOffsetStore::new()))
//!     .source(config.topic.clone(), 0, broker.source(&config.topic, 0, 0))
//!     .build()?;
//!
//! runner.start();
//! runner.delivery().send(message).await;
//! let report = runner.shutdown().await;
//! ```

use crate::config::Config;
use crate::consumer::{
    AckCoordinator, ConsumerSettings, DedupLedger, PartitionWorker, RecordProcessor, WorkerSummary,
};
use crate::delivery::{DeliveryCoordinator, DeliverySettings};
use crate::error::{ConsumerError, PipelineError, Result};
use crate::metrics_server::Probes;
use crate::resilience::{
    BackoffPolicy, CircuitBreaker, CircuitBreakerConfig, DeadLetterForwarder, FailureClassifier,
};
use courier_core::{OffsetCommitter, Publisher, RecordSource};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

struct PartitionSource {
    topic: String,
    partition: i32,
    source: Box<dyn RecordSource>,
}

/// Builder for a producer path and an optional consumer path
pub struct Pipeline {
    topic: String,
    dlq_topic: String,
    delivery: DeliverySettings,
    consumer: ConsumerSettings,
    breaker: CircuitBreakerConfig,
    dedup_capacity: usize,
    dlq_log_capacity: usize,
    publisher: Option<Arc<dyn Publisher>>,
    dlq_publisher: Option<Arc<dyn Publisher>>,
    classifier: Option<Arc<dyn FailureClassifier>>,
    processor: Option<Arc<dyn RecordProcessor>>,
    committer: Option<Arc<dyn OffsetCommitter>>,
    sources: Vec<PartitionSource>,
}

impl Pipeline {
    /// Create a builder with default settings
    pub fn new() -> Self {
        Self::from_config(&Config::default())
    }

    /// Create a builder carrying the retry, breaker and capacity settings of `config`
    pub fn from_config(config: &Config) -> Self {
        let backoff = BackoffPolicy::new(config.base_backoff).with_max_delay(config.max_backoff);
        let consumer_backoff =
            BackoffPolicy::new(config.consumer_backoff).with_max_delay(config.max_backoff);

        Self {
            topic: config.topic.clone(),
            dlq_topic: config.dlq_topic.clone(),
            delivery: DeliverySettings {
                max_attempts: config.max_attempts,
                backoff,
            },
            consumer: ConsumerSettings {
                max_attempts: config.consumer_max_attempts,
                backoff: consumer_backoff,
            },
            breaker: CircuitBreakerConfig {
                failure_threshold: config.circuit_threshold,
                open_duration: config.circuit_open_duration,
            },
            dedup_capacity: config.dedup_capacity,
            dlq_log_capacity: config.dlq_log_capacity,
            publisher: None,
            dlq_publisher: None,
            classifier: None,
            processor: None,
            committer: None,
            sources: Vec::new(),
        }
    }

    /// Set the producer topic (also the circuit breaker channel)
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Set the dead-letter topic shared by both paths
    pub fn dlq_topic(mut self, topic: impl Into<String>) -> Self {
        self.dlq_topic = topic.into();
        self
    }

    /// Set producer publish attempts per message
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.delivery.max_attempts = attempts;
        self
    }

    /// Set the producer backoff schedule
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.delivery.backoff = backoff;
        self
    }

    /// Set the circuit breaker threshold and open duration
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    /// Set consumer processing attempts per record
    pub fn consumer_max_attempts(mut self, attempts: u32) -> Self {
        self.consumer.max_attempts = attempts;
        self
    }

    /// Set the consumer backoff schedule
    pub fn consumer_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.consumer.backoff = backoff;
        self
    }

    /// Set how many identities the dedup ledger remembers
    pub fn dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity;
        self
    }

    /// Set how many forwarded envelopes the dead-letter log keeps
    pub fn dlq_log_capacity(mut self, capacity: usize) -> Self {
        self.dlq_log_capacity = capacity;
        self
    }

    /// Set the broker publisher
    ///
    /// Also used for dead-lettering unless [`Pipeline::dlq_publisher_arc`] is set.
    pub fn publisher<P: Publisher + 'static>(self, publisher: P) -> Self {
        self.publisher_arc(Arc::new(publisher))
    }

    /// Set the broker publisher (Arc version)
    pub fn publisher_arc(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Publish dead letters through a separate publisher
    pub fn dlq_publisher_arc(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.dlq_publisher = Some(publisher);
        self
    }

    /// Replace the default failure classifier
    pub fn classifier<C: FailureClassifier + 'static>(mut self, classifier: C) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    /// Set the consumer-side business logic
    pub fn processor<P: RecordProcessor + 'static>(self, processor: P) -> Self {
        self.processor_arc(Arc::new(processor))
    }

    /// Set the consumer-side business logic (Arc version)
    pub fn processor_arc(mut self, processor: Arc<dyn RecordProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Set where consumed offsets are committed
    pub fn committer(mut self, committer: Arc<dyn OffsetCommitter>) -> Self {
        self.committer = Some(committer);
        self
    }

    /// Add a partition to consume
    ///
    /// Each source gets its own [`PartitionWorker`].
    pub fn source<S: RecordSource + 'static>(
        mut self,
        topic: impl Into<String>,
        partition: i32,
        source: S,
    ) -> Self {
        self.sources.push(PartitionSource {
            topic: topic.into(),
            partition,
            source: Box::new(source),
        });
        self
    }

    /// Validate settings and wire the coordinators
    ///
    /// A consumer path is built only when a processor is set; it then needs
    /// a committer. Sources without a processor are a configuration error.
    pub fn build(self) -> Result<PipelineRunner> {
        self.validate()?;

        let publisher = self
            .publisher
            .ok_or_else(|| PipelineError::Config("no publisher configured".to_string()))?;
        let dlq_publisher = self.dlq_publisher.unwrap_or_else(|| publisher.clone());

        let forwarder = Arc::new(DeadLetterForwarder::new(
            dlq_publisher.clone(),
            self.dlq_topic,
            self.dlq_log_capacity,
        ));
        let breaker = Arc::new(CircuitBreaker::new(self.topic.clone(), self.breaker));

        let mut delivery = DeliveryCoordinator::new(
            self.topic,
            publisher.clone(),
            forwarder.clone(),
            breaker,
            self.delivery,
        );
        if let Some(classifier) = self.classifier {
            delivery = delivery.with_classifier(classifier);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (consumer, workers) = match (self.processor, self.committer) {
            (Some(processor), Some(committer)) => {
                let coordinator = Arc::new(AckCoordinator::new(
                    processor,
                    Arc::new(DedupLedger::new(self.dedup_capacity)),
                    forwarder,
                    committer,
                    self.consumer,
                ));
                let workers = self
                    .sources
                    .into_iter()
                    .map(|s| {
                        PartitionWorker::new(
                            s.topic,
                            s.partition,
                            s.source,
                            coordinator.clone(),
                            shutdown_rx.clone(),
                        )
                    })
                    .collect();
                (Some(coordinator), workers)
            }
            (Some(_), None) => {
                return Err(PipelineError::Config(
                    "processor configured without an offset committer".to_string(),
                ));
            }
            (None, _) if !self.sources.is_empty() => {
                return Err(PipelineError::Config(
                    "sources configured without a processor".to_string(),
                ));
            }
            (None, _) => (None, Vec::new()),
        };

        Ok(PipelineRunner {
            delivery: Arc::new(delivery),
            consumer,
            publisher,
            dlq_publisher,
            workers,
            handles: Vec::new(),
            shutdown_tx,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.topic.is_empty() || self.dlq_topic.is_empty() {
            return Err(PipelineError::Config("topics must not be empty".to_string()));
        }
        if self.topic == self.dlq_topic {
            return Err(PipelineError::Config(format!(
                "dead-letter topic must differ from topic '{}'",
                self.topic
            )));
        }
        if self.delivery.max_attempts == 0 || self.consumer.max_attempts == 0 {
            return Err(PipelineError::Config("max attempts must be at least 1".to_string()));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(PipelineError::Config(
                "circuit breaker threshold must be at least 1".to_string(),
            ));
        }
        if self.dedup_capacity == 0 {
            return Err(PipelineError::Config("dedup capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// How the partition workers ended
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Workers that stopped cleanly
    pub summaries: Vec<WorkerSummary>,
    /// Workers that stopped on an unaccounted-for record
    pub errors: Vec<ConsumerError>,
}

impl ShutdownReport {
    /// Records accounted for across all workers
    pub fn handled(&self) -> u64 {
        self.summaries.iter().map(WorkerSummary::handled).sum()
    }
}

/// Built pipeline: coordinators plus the partition workers driving the consumer path
pub struct PipelineRunner {
    delivery: Arc<DeliveryCoordinator>,
    consumer: Option<Arc<AckCoordinator>>,
    publisher: Arc<dyn Publisher>,
    dlq_publisher: Arc<dyn Publisher>,
    workers: Vec<PartitionWorker>,
    handles: Vec<JoinHandle<std::result::Result<WorkerSummary, ConsumerError>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl PipelineRunner {
    /// Producer path
    pub fn delivery(&self) -> &Arc<DeliveryCoordinator> {
        &self.delivery
    }

    /// Consumer path, when a processor was configured
    pub fn consumer(&self) -> Option<&Arc<AckCoordinator>> {
        self.consumer.as_ref()
    }

    /// Shared dead-letter forwarder
    pub fn forwarder(&self) -> &Arc<DeadLetterForwarder> {
        self.delivery.forwarder()
    }

    /// Coordinators for the metrics server
    pub fn probes(&self) -> Probes {
        let probes = Probes::new().with_delivery(self.delivery.clone());
        match &self.consumer {
            Some(consumer) => probes.with_consumer(consumer.clone()),
            None => probes,
        }
    }

    /// Workers spawned and still owned by this runner
    pub fn running_workers(&self) -> usize {
        self.handles.len()
    }

    /// Spawn one task per partition worker
    ///
    /// Calling it again is a no-op.
    pub fn start(&mut self) {
        let workers = std::mem::take(&mut self.workers);
        if !workers.is_empty() {
            info!(workers = workers.len(), "starting partition workers");
        }
        for worker in workers {
            self.handles.push(tokio::spawn(worker.run()));
        }
    }

    /// Wait for every worker to stop on its own (sources exhausted)
    pub async fn join(self) -> ShutdownReport {
        self.finish(false).await
    }

    /// Signal shutdown, drain the workers and shut the publisher down
    pub async fn shutdown(self) -> ShutdownReport {
        self.finish(true).await
    }

    async fn finish(mut self, signal: bool) -> ShutdownReport {
        if signal {
            let _ = self.shutdown_tx.send(true);
        }

        let mut report = ShutdownReport::default();
        for handle in self.handles.drain(..) {
            match handle.await {
                Ok(Ok(summary)) => report.summaries.push(summary),
                Ok(Err(e)) => {
                    error!(error = %e, "partition worker stopped with unaccounted-for record");
                    report.errors.push(e);
                }
                Err(e) => error!(error = %e, "partition worker task failed"),
            }
        }

        if let Err(e) = self.publisher.shutdown().await {
            error!(error = %e, publisher = self.publisher.name(), "publisher shutdown failed");
        }
        if !Arc::ptr_eq(&self.publisher, &self.dlq_publisher) {
            if let Err(e) = self.dlq_publisher.shutdown().await {
                error!(
                    error = %e,
                    publisher = self.dlq_publisher.name(),
                    "dead-letter publisher shutdown failed"
                );
            }
        }

        info!(
            handled = report.handled(),
            failed_workers = report.errors.len(),
            "pipeline stopped"
        );
        report
    }
}
