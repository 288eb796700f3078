//! courier-core - Core types for the Courier delivery pipeline
//!
//! This crate provides the types shared between the pipeline and the broker
//! client that backs it:
//!
//! - [`Message`] - what callers submit to the producer path
//! - [`Record`] - what the consumer path pulls from the broker
//! - [`Publisher`], [`RecordSource`], [`OffsetCommitter`] - the broker seen as a black box
//! - [`BrokerError`] - error type for broker operations
//! - [`header_keys`] - reserved header constants (dead-letter wire contract)
//!
//! # Why this crate exists
//!
//! Broker client adapters only need to implement three traits. Keeping them
//! here means an adapter crate does not have to depend on the pipeline (and
//! its metrics/HTTP stack) just to plug in.
//!
//! ```text
//! courier-core ◄── courier-pipeline ◄── courier-runtime
//!      ▲
//!      └────────── broker adapters
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(missing_docs)]

mod broker;
mod error;
/// Reserved header keys for Courier records
pub mod header_keys;
/// Message and record types
pub mod message;

pub use broker::{OffsetCommitter, Publisher, RecordSource};
pub use error::BrokerError;
pub use message::{DeliveryReceipt, Headers, Message, MessageId, Metadata, Record};

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;

    // ==========================================================================
    // BrokerError Tests
    // ==========================================================================

    #[test]
    fn test_broker_error_timeout_display() {
        let err = BrokerError::Timeout("no ack within 10s".to_string());
        assert_eq!(err.to_string(), "request timed out: no ack within 10s");
    }

    #[test]
    fn test_broker_error_rejected_display() {
        let err = BrokerError::rejected("MessageSizeTooLarge", "record is 2MB");
        assert_eq!(
            err.to_string(),
            "broker rejected request [MessageSizeTooLarge]: record is 2MB"
        );
        assert_eq!(err.code(), Some("MessageSizeTooLarge"));
    }

    #[test]
    fn test_broker_error_not_ready_display() {
        assert_eq!(BrokerError::NotReady.to_string(), "broker client not ready");
        assert_eq!(BrokerError::NotReady.code(), None);
    }

    #[test]
    fn test_broker_error_kind_is_stable_label() {
        assert_eq!(BrokerError::Timeout("x".into()).kind(), "Timeout");
        assert_eq!(BrokerError::Connection("y".into()).kind(), "Connection");
        assert_eq!(BrokerError::rejected("A", "b").kind(), "Rejected");
        assert_eq!(BrokerError::Serialization("z".into()).kind(), "Serialization");
        assert_eq!(BrokerError::Shutdown("bye".into()).kind(), "Shutdown");
    }

    #[test]
    fn test_broker_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BrokerError>();
    }

    // ==========================================================================
    // Message / Record Tests
    // ==========================================================================

    #[test]
    fn test_generated_ids_are_unique() {
        let a = Message::new("CUST-1", Bytes::new());
        let b = Message::new("CUST-1", Bytes::new());
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.as_str().len(), 26);
    }

    #[test]
    fn test_message_with_id_keeps_identity() {
        let msg = Message::with_id("TX-1", "CUST-1", Bytes::from_static(b"{}"));
        assert_eq!(msg.id, "TX-1");
        assert_eq!(msg.id.to_string(), "TX-1");
        assert!(msg.timestamp > 0);
        assert!(msg.metadata().is_empty());
    }

    #[test]
    fn test_message_clone_shares_payload() {
        let payload = Bytes::from(vec![7u8; 4096]);
        let ptr = payload.as_ptr();
        let msg = Message::with_id("TX-2", "CUST-2", payload);
        let cloned = msg.clone();
        assert_eq!(cloned.payload.as_ptr(), ptr);
    }

    #[test]
    fn test_record_headers() {
        let record = Record::new("orders", 3, 42, "CUST-9", Bytes::from_static(b"x"))
            .with_header(header_keys::MESSAGE_ID, "TX-9");
        assert_eq!(record.header(header_keys::MESSAGE_ID), Some("TX-9"));
        assert_eq!(record.header("missing"), None);
        assert_eq!(record.partition, 3);
        assert_eq!(record.offset, 42);
    }

    // ==========================================================================
    // Publisher Trait Tests
    // ==========================================================================

    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Publisher that assigns sequential offsets on a single partition
    struct SequencePublisher {
        next_offset: AtomicI64,
    }

    #[async_trait::async_trait]
    impl Publisher for SequencePublisher {
        fn name(&self) -> &'static str {
            "sequence"
        }

        async fn publish(
            &self,
            topic: &str,
            _key: &str,
            _payload: Bytes,
            _headers: &Headers,
        ) -> Result<DeliveryReceipt, BrokerError> {
            Ok(DeliveryReceipt {
                topic: topic.to_string(),
                partition: 0,
                offset: self.next_offset.fetch_add(1, Ordering::SeqCst),
                timestamp: chrono::Utc::now(),
            })
        }
    }

    #[tokio::test]
    async fn test_publisher_is_object_safe() {
        let publisher: Arc<dyn Publisher> = Arc::new(SequencePublisher {
            next_offset: AtomicI64::new(0),
        });

        let first = publisher
            .publish("orders", "k", Bytes::new(), &Headers::new())
            .await
            .unwrap();
        let second = publisher
            .publish("orders", "k", Bytes::new(), &Headers::new())
            .await
            .unwrap();

        assert_eq!(publisher.name(), "sequence");
        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, 1);
        assert_eq!(second.topic, "orders");
    }

    #[tokio::test]
    async fn test_publisher_default_shutdown_succeeds() {
        let publisher = SequencePublisher {
            next_offset: AtomicI64::new(0),
        };
        assert!(publisher.shutdown().await.is_ok());
    }

    /// Source backed by a vector, exhausted when empty
    struct VecSource(std::collections::VecDeque<Record>);

    #[async_trait::async_trait]
    impl RecordSource for VecSource {
        async fn poll(&mut self) -> Result<Option<Record>, BrokerError> {
            Ok(self.0.pop_front())
        }
    }

    #[tokio::test]
    async fn test_record_source_signals_exhaustion() {
        let mut source: Box<dyn RecordSource> = Box::new(VecSource(
            vec![Record::new("t", 0, 0, "k", Bytes::new())].into(),
        ));

        assert!(source.poll().await.unwrap().is_some());
        assert!(source.poll().await.unwrap().is_none());
    }
}
