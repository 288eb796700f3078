//! Message and record types for Courier
//!
//! [`Message`] is what callers hand to the producer path. [`Record`] is what
//! the consumer path pulls back out of the broker. Both carry payloads as
//! [`Bytes`] so that retries and dead-letter forwarding share the caller's
//! buffer instead of copying it.
//!
//! ```text
//! caller payload (Bytes)
//!        │
//!        ▼
//! Message ──► attempt 1 ──► attempt 2 ──► DLQ envelope
//! (all share the same underlying bytes)
//! ```

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Type alias for business attributes - lazy allocation
pub type Metadata = Option<Box<HashMap<String, String>>>;

/// Out-of-band record headers
///
/// Ordered so that encoded header sets are deterministic.
pub type Headers = BTreeMap<String, String>;

/// Helper to get metadata or empty map
#[inline]
fn metadata_ref(m: &Metadata) -> &HashMap<String, String> {
    static EMPTY: std::sync::OnceLock<HashMap<String, String>> = std::sync::OnceLock::new();
    m.as_ref()
        .map(|b| b.as_ref())
        .unwrap_or_else(|| EMPTY.get_or_init(HashMap::new))
}

/// Message identity
///
/// Callers usually supply their own business identifier (a transaction id,
/// an order number). [`MessageId::new`] generates a ULID for callers that
/// don't have one. Cloning is O(1).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(Arc<str>);

impl MessageId {
    /// Generate a new unique ID
    pub fn new() -> Self {
        Self(Arc::from(ulid::Ulid::new().to_string()))
    }

    /// View the identity as a string slice
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for MessageId {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for MessageId {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A message submitted to the producer path
///
/// Immutable once handed to the delivery coordinator. The partition key
/// decides which ordered sub-stream the broker routes the message to; the
/// pipeline never re-keys a message, dead-lettered copies included.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use courier_core::Message;
///
/// let msg = Message::with_id("TX-1001", "CUST-1", Bytes::from_static(b"{\"amount\":42}"))
///     .with_metadata("type", "transfer");
/// assert_eq!(msg.id, "TX-1001");
/// assert_eq!(msg.key, "CUST-1");
/// assert_eq!(msg.metadata().get("type").map(String::as_str), Some("transfer"));
/// ```
#[derive(Debug, Clone)]
pub struct Message {
    /// Unique identity (e.g. transaction id)
    pub id: MessageId,

    /// Partition key (customer / entity id used for ordering)
    pub key: String,

    /// Opaque payload - zero-copy via Bytes
    pub payload: Bytes,

    /// Creation time as Unix timestamp in nanoseconds
    pub timestamp: i64,

    /// Business attributes the pipeline does not interpret
    ///
    /// Lazily allocated - None when empty.
    pub metadata: Metadata,
}

impl Message {
    /// Create a new Message with a generated ID and the current timestamp
    pub fn new(key: impl Into<String>, payload: Bytes) -> Self {
        Self::with_id(MessageId::new(), key, payload)
    }

    /// Create a Message with a caller-supplied identity
    pub fn with_id(id: impl Into<MessageId>, key: impl Into<String>, payload: Bytes) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            payload,
            timestamp: Utc::now().timestamp_nanos_opt().unwrap_or(0),
            metadata: None,
        }
    }

    /// Add a business attribute to the message
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(|| Box::new(HashMap::new()))
            .insert(key.into(), value.into());
        self
    }

    /// Get business attributes (read-only)
    #[inline]
    pub fn metadata(&self) -> &HashMap<String, String> {
        metadata_ref(&self.metadata)
    }
}

/// A record pulled from the broker by the consumer path
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Topic the record was read from
    pub topic: String,
    /// Partition key
    pub key: String,
    /// Raw payload
    pub payload: Bytes,
    /// Partition within the topic
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Out-of-band headers
    pub headers: Headers,
    /// Broker timestamp
    pub timestamp: DateTime<Utc>,
}

impl Record {
    /// Create a record with no headers, timestamped now
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        key: impl Into<String>,
        payload: Bytes,
    ) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload,
            partition,
            offset,
            headers: Headers::new(),
            timestamp: Utc::now(),
        }
    }

    /// Add a header to the record
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Look up a header value
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

/// Delivery metadata returned by the broker on a successful publish
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DeliveryReceipt {
    /// Topic the record landed in
    pub topic: String,
    /// Partition chosen by the broker
    pub partition: i32,
    /// Offset assigned within the partition
    pub offset: i64,
    /// Broker-assigned timestamp
    pub timestamp: DateTime<Utc>,
}
