//! In-memory offset store
//!
//! Tracks the last committed offset per topic-partition. Stands in for the
//! broker's consumer-group offset storage in tests and single-node setups.
//!
//! ```text
//! worker p0 ──> commit(orders, 0, 41)
//! worker p1 ──> commit(orders, 1, 17)
//! worker p0 ──> commit(orders, 0, 42)
//! ```

use async_trait::async_trait;
use courier_core::{BrokerError, OffsetCommitter};
use parking_lot::RwLock;
use std::collections::HashMap;

/// In-memory [`OffsetCommitter`]
///
/// Commits are monotonic per partition: committing an offset lower than the
/// current one is accepted and ignored, matching how a broker treats a late
/// commit from a superseded worker.
pub struct MemoryOffsetStore {
    offsets: RwLock<HashMap<(String, i32), i64>>,
}

impl MemoryOffsetStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            offsets: RwLock::new(HashMap::new()),
        }
    }

    /// Last committed offset for a partition
    pub fn committed(&self, topic: &str, partition: i32) -> Option<i64> {
        self.offsets
            .read()
            .get(&(topic.to_string(), partition))
            .copied()
    }

    /// Offset a restarted worker should resume from
    pub fn resume_from(&self, topic: &str, partition: i32) -> i64 {
        self.committed(topic, partition).map_or(0, |o| o + 1)
    }

    /// All committed offsets
    pub fn all(&self) -> HashMap<(String, i32), i64> {
        self.offsets.read().clone()
    }

    /// Clear all offsets
    pub fn clear(&self) {
        self.offsets.write().clear();
    }

    fn set(&self, topic: &str, partition: i32, offset: i64) {
        let mut offsets = self.offsets.write();
        let entry = offsets.entry((topic.to_string(), partition)).or_insert(offset);
        // Only move forward (monotonic guarantee)
        if offset > *entry {
            *entry = offset;
        }
    }
}

impl Default for MemoryOffsetStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OffsetCommitter for MemoryOffsetStore {
    async fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<(), BrokerError> {
        if offset < 0 {
            return Err(BrokerError::Validation(format!(
                "negative offset {offset} for {topic}/{partition}"
            )));
        }
        self.set(topic, partition, offset);
        Ok(())
    }
}
