//! In-memory broker
//!
//! A single-process stand-in for a partitioned pub/sub broker: topics are
//! created on first use, keys are routed to partitions by FNV-1a hash, and
//! every partition is an append-only log with dense offsets starting at 0.
//! Used by the tests and the runtime demo; real deployments plug a broker
//! client into the [`Publisher`] / [`RecordSource`] traits instead.
//!
//! ```text
//! publish(key) ──hash──► partition N ──append──► [r0, r1, r2, ...]
//!                                                      ▲
//!                              MemorySource cursor ────┘
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use courier_core::{BrokerError, DeliveryReceipt, Headers, Publisher, Record, RecordSource};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Simple string hash (FNV-1a)
fn hash_key(key: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in key.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

struct PartitionLog {
    records: RwLock<Vec<Record>>,
    appended: Notify,
}

impl PartitionLog {
    fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            appended: Notify::new(),
        }
    }

    fn get(&self, offset: i64) -> Option<Record> {
        let index = usize::try_from(offset).ok()?;
        self.records.read().get(index).cloned()
    }
}

struct TopicLog {
    partitions: Vec<Arc<PartitionLog>>,
}

struct Shared {
    partitions: usize,
    topics: RwLock<HashMap<String, Arc<TopicLog>>>,
    injected: Mutex<HashMap<String, VecDeque<BrokerError>>>,
    closed: AtomicBool,
    closed_notify: Notify,
}

/// In-memory partitioned broker
///
/// Cloning yields another handle to the same broker.
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    /// Create a broker where every topic has `partitions` partitions (minimum 1)
    pub fn new(partitions: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                partitions: partitions.max(1),
                topics: RwLock::new(HashMap::new()),
                injected: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                closed_notify: Notify::new(),
            }),
        }
    }

    /// Partitions per topic
    pub fn partitions(&self) -> usize {
        self.shared.partitions
    }

    /// Partition a key is routed to
    pub fn partition_for(&self, key: &str) -> i32 {
        let index = hash_key(key) % self.shared.partitions as u64;
        i32::try_from(index).unwrap_or(0)
    }

    /// Make the next publishes to `topic` fail with `errors`, in order
    pub fn inject_failures(&self, topic: &str, errors: impl IntoIterator<Item = BrokerError>) {
        self.shared
            .injected
            .lock()
            .entry(topic.to_string())
            .or_default()
            .extend(errors);
    }

    /// Copy of every record in one partition
    pub fn records(&self, topic: &str, partition: i32) -> Vec<Record> {
        self.partition_log(topic, partition)
            .map(|log| log.records.read().clone())
            .unwrap_or_default()
    }

    /// Copy of every record in a topic, partition by partition
    pub fn topic_records(&self, topic: &str) -> Vec<Record> {
        (0..self.shared.partitions)
            .filter_map(|p| i32::try_from(p).ok())
            .flat_map(|p| self.records(topic, p))
            .collect()
    }

    /// Cursor over one partition starting at `from_offset`
    ///
    /// The source waits for new records until the broker is closed.
    pub fn source(&self, topic: &str, partition: i32, from_offset: i64) -> MemorySource {
        MemorySource {
            broker: self.clone(),
            log: self.partition_log(topic, partition),
            topic: topic.to_string(),
            partition,
            next_offset: from_offset.max(0),
            follow: true,
        }
    }

    /// Stop accepting publishes and wake every waiting source
    ///
    /// Sources drain what is already in the log, then report exhaustion.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.closed_notify.notify_waiters();
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn topic(&self, topic: &str) -> Arc<TopicLog> {
        if let Some(log) = self.shared.topics.read().get(topic) {
            return Arc::clone(log);
        }
        let mut topics = self.shared.topics.write();
        let log = topics.entry(topic.to_string()).or_insert_with(|| {
            Arc::new(TopicLog {
                partitions: (0..self.shared.partitions)
                    .map(|_| Arc::new(PartitionLog::new()))
                    .collect(),
            })
        });
        Arc::clone(log)
    }

    fn partition_log(&self, topic: &str, partition: i32) -> Option<Arc<PartitionLog>> {
        let index = usize::try_from(partition).ok()?;
        self.topic(topic).partitions.get(index).cloned()
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Bytes,
        headers: &Headers,
    ) -> Result<DeliveryReceipt, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Shutdown("memory broker closed".into()));
        }
        if let Some(error) = self
            .shared
            .injected
            .lock()
            .get_mut(topic)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let partition = self.partition_for(key);
        let log = self.partition_log(topic, partition).ok_or_else(|| {
            BrokerError::Validation(format!("{topic} has no partition {partition}"))
        })?;

        let timestamp = Utc::now();
        let offset = {
            let mut records = log.records.write();
            let offset = i64::try_from(records.len())
                .map_err(|_| BrokerError::Send(format!("{topic}/{partition} is full")))?;
            let mut record = Record::new(topic, partition, offset, key, payload);
            record.headers = headers.clone();
            record.timestamp = timestamp;
            records.push(record);
            offset
        };
        log.appended.notify_waiters();

        Ok(DeliveryReceipt {
            topic: topic.to_string(),
            partition,
            offset,
            timestamp,
        })
    }

    async fn shutdown(&self) -> Result<(), BrokerError> {
        self.close();
        Ok(())
    }
}

/// Cursor over one partition of a [`MemoryBroker`]
pub struct MemorySource {
    broker: MemoryBroker,
    log: Option<Arc<PartitionLog>>,
    topic: String,
    partition: i32,
    next_offset: i64,
    follow: bool,
}

impl MemorySource {
    /// Report exhaustion on reaching the end of the log instead of waiting
    pub fn until_caught_up(mut self) -> Self {
        self.follow = false;
        self
    }

    /// Offset of the next record this cursor yields
    pub fn position(&self) -> i64 {
        self.next_offset
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn poll(&mut self) -> Result<Option<Record>, BrokerError> {
        let Some(log) = self.log.clone() else {
            return Err(BrokerError::Validation(format!(
                "{} has no partition {}",
                self.topic, self.partition
            )));
        };

        let shared = Arc::clone(&self.broker.shared);
        loop {
            // Register interest before checking, so an append in between is not missed
            let appended = log.appended.notified();
            let closed = shared.closed_notify.notified();

            if let Some(record) = log.get(self.next_offset) {
                self.next_offset += 1;
                return Ok(Some(record));
            }
            if !self.follow || shared.closed.load(Ordering::Acquire) {
                return Ok(None);
            }

            tokio::select! {
                _ = appended => {}
                _ = closed => {}
            }
        }
    }
}
