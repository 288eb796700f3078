//! Broker interfaces consumed by the Courier pipeline
//!
//! The broker itself (partitioning, replication, rebalancing, offset
//! storage) is an external collaborator. The pipeline only ever talks to it
//! through the three narrow traits below.

use crate::error::BrokerError;
use crate::message::{DeliveryReceipt, Headers, Record};
use async_trait::async_trait;
use bytes::Bytes;

/// Publisher trait - sends records to a topic
///
/// Both the producer path and the dead-letter forwarder publish through this
/// trait. Each call is one network round-trip as far as the pipeline is
/// concerned; the transport is expected to enforce its own timeout and report
/// expiry as [`BrokerError::Timeout`].
///
/// # Implementation Requirements
///
/// - Publishers must be `Send + Sync`; many deliveries share one instance
/// - Records with the same `key` must keep their relative order
/// - `headers` are attached to the record out-of-band of the payload
///
/// # Example
///
/// ```ignore
/// use courier_core::{BrokerError, DeliveryReceipt, Headers, Publisher};
/// use async_trait::async_trait;
/// use bytes::Bytes;
///
/// struct KafkaPublisher {
///     producer: rdkafka::producer::FutureProducer,
/// }
///
/// #[async_trait]
/// impl Publisher for KafkaPublisher {
///     fn name(&self) -> &'static str {
///         "kafka"
///     }
///
///     async fn publish(
///         &self,
///         topic: &str,
///         key: &str,
///         payload: Bytes,
///         headers: &Headers,
///     ) -> Result<DeliveryReceipt, BrokerError> {
///         // build a FutureRecord, await the delivery future, map the error
///         todo!()
///     }
/// }
/// ```
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Short name for identification and logging
    fn name(&self) -> &'static str;

    /// Publish one record and wait for the broker's acknowledgement
    ///
    /// # Returns
    ///
    /// * `Ok(DeliveryReceipt)` - partition, offset and timestamp assigned by the broker
    /// * `Err(BrokerError)` - the record was not acknowledged
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Bytes,
        headers: &Headers,
    ) -> Result<DeliveryReceipt, BrokerError>;

    /// Graceful shutdown
    ///
    /// Flush in-flight records and release connections. The default
    /// implementation returns `Ok(())`.
    async fn shutdown(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// Pull-based source of records for one partition (or partition set)
///
/// Records must be yielded in offset order. The consumer path processes
/// them strictly sequentially.
#[async_trait]
pub trait RecordSource: Send {
    /// Wait for the next record
    ///
    /// # Returns
    ///
    /// * `Ok(Some(record))` - next record in offset order
    /// * `Ok(None)` - the source is exhausted and will yield nothing more
    /// * `Err(BrokerError)` - the fetch failed; the caller may poll again
    async fn poll(&mut self) -> Result<Option<Record>, BrokerError>;
}

/// Advances the durable read position of a consumer
#[async_trait]
pub trait OffsetCommitter: Send + Sync {
    /// Commit `offset` as fully handled for `topic`/`partition`
    ///
    /// `offset` is the offset of the last record handled, not the next
    /// offset to read; implementations translate if their broker expects the
    /// latter.
    async fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<(), BrokerError>;
}
