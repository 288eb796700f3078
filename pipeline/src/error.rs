//! Error types for Courier

use thiserror::Error;

// Re-export BrokerError from courier-core
pub use courier_core::BrokerError;

/// Result type alias for Courier setup and infrastructure operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Main error type for pipeline setup and infrastructure
///
/// Delivery and processing failures are never reported through this type:
/// the producer path returns a structured
/// [`DeliveryOutcome`](crate::delivery::DeliveryOutcome) and the consumer
/// path a [`ConsumerError`].
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Broker error outside of a delivery (e.g. during shutdown)
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Metrics error
    #[error("metrics error: {0}")]
    Metrics(String),
}

/// A dead-letter forward that failed after a delivery or processing failure
///
/// Carries both errors so the forwarding error never masks the cause that
/// sent the message to the dead-letter path in the first place. `original`
/// is `None` only when no delivery was attempted (circuit breaker open).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", describe_forwarding(.original.as_ref(), .forwarding))]
pub struct ForwardingFailure {
    /// Error that made the message undeliverable
    pub original: Option<BrokerError>,
    /// Error returned while publishing to the dead-letter topic
    pub forwarding: BrokerError,
}

fn describe_forwarding(original: Option<&BrokerError>, forwarding: &BrokerError) -> String {
    match original {
        Some(original) => {
            format!("dead-letter forwarding failed: {forwarding} (original error: {original})")
        }
        None => format!("dead-letter forwarding failed: {forwarding}"),
    }
}

/// Error returned by a [`RecordProcessor`](crate::consumer::RecordProcessor)
///
/// Processing failures are always retried up to the configured attempt
/// limit; the text ends up in logs only, the dead-letter record carries the
/// fixed `max-retries-exceeded` reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ProcessingError(pub String);

impl ProcessingError {
    /// Create from any displayable reason
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Failure reported by the consumer path's `handle`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    /// Processing failed on every attempt and the dead-letter forward failed too
    ///
    /// The offset is left uncommitted so the broker redelivers the record.
    #[error(
        "record {topic}/{partition}@{offset} unaccounted for: dead-letter forwarding failed: {forwarding} (processing error: {processing})"
    )]
    Forwarding {
        /// Source topic
        topic: String,
        /// Source partition
        partition: i32,
        /// Source offset
        offset: i64,
        /// Last processing error
        processing: ProcessingError,
        /// Error returned by the dead-letter publish
        forwarding: BrokerError,
    },

    /// The record was handled but committing its offset failed
    #[error("offset commit failed for {topic}/{partition}@{offset}: {source}")]
    Commit {
        /// Source topic
        topic: String,
        /// Source partition
        partition: i32,
        /// Offset that could not be committed
        offset: i64,
        /// Broker error
        source: BrokerError,
    },
}
