//! Convenience re-exports for pipeline authors.
//!
//! ```rust
//! use courier_runtime::prelude::*;
//! ```

// Core types
pub use courier_core::{
    BrokerError, DeliveryReceipt, Headers, Message, MessageId, OffsetCommitter, Publisher, Record,
    RecordSource, header_keys,
};

// Pipeline builder
pub use courier_pipeline::{Config, Pipeline, PipelineRunner, ShutdownReport};

// Producer path
pub use courier_pipeline::{DeliveryCoordinator, DeliveryOutcome, ProducerMetrics};

// Consumer path
pub use courier_pipeline::{
    AckCoordinator, ConsumerMetrics, HandleOutcome, ProcessingError, RecordProcessor,
};

// Resilience
pub use courier_pipeline::{
    BackoffPolicy, CircuitBreakerConfig, CircuitState, DefaultClassifier, DlqReason,
    FailureClass, FailureClassifier,
};

// In-memory broker
pub use courier_pipeline::{MemoryBroker, MemoryOffsetStore};

// Error types
pub use courier_pipeline::{ConsumerError, PipelineError};

// Payloads
pub use bytes::Bytes;

// Shared ownership for publishers, processors and committers
pub use std::sync::Arc;

// Runtime
pub use crate::RuntimeBuilder;
