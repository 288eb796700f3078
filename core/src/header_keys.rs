//! Reserved header keys for Courier records
//!
//! The first four make up the dead-letter wire contract: every record
//! published to a DLQ topic carries them, alongside the original payload
//! bytes.

/// Topic the message was originally destined for (or read from)
pub const ORIGINAL_TOPIC: &str = "original-topic";

/// Reason code from the fixed dead-letter vocabulary
pub const ERROR_REASON: &str = "error-reason";

/// Message identity
///
/// Also set on every record the producer path publishes, so the consumer
/// path can deduplicate redeliveries by identity.
pub const MESSAGE_ID: &str = "message-id";

/// Failure time, ISO-8601 / RFC 3339 in UTC
pub const FAILED_AT: &str = "failed-at";

/// Partition the dead-lettered record was read from (consumer path only)
pub const ORIGINAL_PARTITION: &str = "original-partition";

/// Offset the dead-lettered record was read from (consumer path only)
pub const ORIGINAL_OFFSET: &str = "original-offset";
