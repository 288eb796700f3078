//! Broker doubles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use courier_pipeline::{
    BrokerError, DeliveryReceipt, Headers, OffsetCommitter, ProcessingError, Publisher, Record,
    RecordProcessor, header_keys,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::Instant;

/// One call to `publish`
#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub key: String,
    pub payload: Bytes,
    pub headers: Headers,
    pub at: Instant,
    pub accepted: bool,
}

impl Published {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

/// Publisher that fails per a per-topic script, then succeeds
///
/// Records every call, failed or not, with the (virtual) time it was made.
#[derive(Default)]
pub struct ScriptedPublisher {
    script: Mutex<HashMap<String, VecDeque<BrokerError>>>,
    always_fail: Mutex<HashMap<String, BrokerError>>,
    calls: Mutex<Vec<Published>>,
}

impl ScriptedPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next publishes to `topic` with `errors`, in order
    pub fn fail_next(&self, topic: &str, errors: impl IntoIterator<Item = BrokerError>) {
        self.script
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .extend(errors);
    }

    /// Fail every publish to `topic`
    pub fn fail_always(&self, topic: &str, error: BrokerError) {
        self.always_fail
            .lock()
            .unwrap()
            .insert(topic.to_string(), error);
    }

    /// Stop failing publishes to `topic`
    pub fn heal(&self, topic: &str) {
        self.always_fail.lock().unwrap().remove(topic);
        self.script.lock().unwrap().remove(topic);
    }

    /// Every call made for `topic`
    pub fn calls(&self, topic: &str) -> Vec<Published> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    /// Accepted records on `topic`
    pub fn accepted(&self, topic: &str) -> Vec<Published> {
        self.calls(topic).into_iter().filter(|p| p.accepted).collect()
    }

    fn next_failure(&self, topic: &str) -> Option<BrokerError> {
        if let Some(e) = self.always_fail.lock().unwrap().get(topic) {
            return Some(e.clone());
        }
        self.script
            .lock()
            .unwrap()
            .get_mut(topic)
            .and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl Publisher for ScriptedPublisher {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Bytes,
        headers: &Headers,
    ) -> Result<DeliveryReceipt, BrokerError> {
        let failure = self.next_failure(topic);
        let mut calls = self.calls.lock().unwrap();
        let offset = calls.iter().filter(|p| p.topic == topic && p.accepted).count() as i64;
        calls.push(Published {
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
            headers: headers.clone(),
            at: Instant::now(),
            accepted: failure.is_none(),
        });

        match failure {
            Some(e) => Err(e),
            None => Ok(DeliveryReceipt {
                topic: topic.to_string(),
                partition: 0,
                offset,
                timestamp: chrono::Utc::now(),
            }),
        }
    }
}

/// Committer that remembers every commit in order
#[derive(Default)]
pub struct RecordingCommitter {
    commits: Mutex<Vec<(String, i32, i64)>>,
}

impl RecordingCommitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commits(&self) -> Vec<(String, i32, i64)> {
        self.commits.lock().unwrap().clone()
    }
}

#[async_trait]
impl OffsetCommitter for RecordingCommitter {
    async fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<(), BrokerError> {
        self.commits
            .lock()
            .unwrap()
            .push((topic.to_string(), partition, offset));
        Ok(())
    }
}

/// Processor that fails its first `failures` calls, then succeeds
pub struct CountingProcessor {
    failures: u32,
    calls: AtomicU32,
    seen: Mutex<Vec<String>>,
}

impl CountingProcessor {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Never succeeds
    pub fn broken() -> Self {
        Self::new(u32::MAX)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Keys of successfully processed records, in order
    pub fn processed_keys(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordProcessor for CountingProcessor {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn process(&self, record: &Record) -> Result<(), ProcessingError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(ProcessingError::new("ledger unavailable"));
        }
        self.seen.lock().unwrap().push(record.key.clone());
        Ok(())
    }
}

/// Record carrying a producer-assigned identity
pub fn record_with_id(offset: i64, id: &str) -> Record {
    Record::new(
        "banking.transactions",
        0,
        offset,
        "CUST-1",
        Bytes::from(r#"{"amount":100}"#),
    )
    .with_header(header_keys::MESSAGE_ID, id)
}
