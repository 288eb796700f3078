//! Courier - resilient delivery pipeline
//!
//! Wraps a message broker with retry, circuit breaking, deduplication and
//! dead-lettering so that every message is either delivered, processed, or
//! parked on a dead-letter topic with enough context to replay it.
//!
//! # Two paths, one dead-letter topic
//!
//! ```text
//! Producer:  send ──► Breaker ──► Publish (retry w/ backoff) ──► topic
//!                                        │
//!                                        └─► DeadLetterForwarder ──► dlq topic
//!                                        ┌─►
//! Consumer:  source ──► Dedup ──► Process (retry w/ backoff) ──► commit
//! ```
//!
//! The broker itself stays a black box behind the traits in [`courier_core`].

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(missing_docs)]

pub mod config;
pub mod consumer;
pub mod delivery;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod metrics_server;
pub mod offsets;
pub mod pipeline;
pub mod resilience;

pub use config::{Config, LogFormat};
pub use consumer::{
    AckCoordinator, ConsumerMetrics, ConsumerSettings, DedupEntry, DedupLedger, HandleOutcome,
    PartitionWorker, RecordProcessor, StopReason, WorkerSummary, record_identity,
};
pub use delivery::{
    DeliveryAttempt, DeliveryCoordinator, DeliveryOutcome, DeliverySettings, ProducerMetrics,
};
pub use error::{ConsumerError, ForwardingFailure, PipelineError, ProcessingError, Result};
pub use memory::{MemoryBroker, MemorySource};
pub use metrics::Metrics;
pub use metrics_server::{MetricsServer, Probes};
pub use offsets::MemoryOffsetStore;
pub use pipeline::{Pipeline, PipelineRunner, ShutdownReport};
pub use resilience::{
    BackoffPolicy, CircuitBreaker, CircuitBreakerConfig, CircuitState, DeadLetterEnvelope,
    DeadLetterForwarder, DeadLetterLog, DefaultClassifier, DlqReason, FailureClass,
    FailureClassifier,
};

pub use courier_core::{
    BrokerError, DeliveryReceipt, Headers, Message, MessageId, OffsetCommitter, Publisher, Record,
    RecordSource, header_keys,
};
