//! Dedup ledger
//!
//! Remembers which message identities the consumer path has already
//! processed, so a redelivered record is acknowledged without running the
//! processor again. Thread-safe using parking_lot mutex.
//!
//! # Memory Behavior
//!
//! The ledger is bounded: once `capacity` identities are held, recording a
//! new one evicts the oldest (FIFO by first insertion). An identity evicted
//! this way would be processed again if redelivered, so size the capacity
//! well above the broker's redelivery window.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Proof that one identity was processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupEntry {
    /// Message identity
    pub identity: String,
    /// When processing completed
    pub audited_at: DateTime<Utc>,
    /// Partition the record was read from
    pub partition: i32,
    /// Offset the record was read from
    pub offset: i64,
}

struct LedgerState {
    entries: HashMap<String, DedupEntry>,
    order: VecDeque<String>,
}

/// Bounded, insert-once store of processed identities
pub struct DedupLedger {
    state: Mutex<LedgerState>,
    capacity: usize,
}

impl DedupLedger {
    /// Create a ledger holding at most `capacity` identities (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(LedgerState {
                entries: HashMap::with_capacity(capacity.min(4096)),
                order: VecDeque::with_capacity(capacity.min(4096)),
            }),
            capacity,
        }
    }

    /// Check whether an identity has been recorded
    pub fn seen(&self, identity: &str) -> bool {
        self.state.lock().entries.contains_key(identity)
    }

    /// Record an entry
    ///
    /// Returns `false` (and leaves the existing entry untouched) when the
    /// identity is already present.
    pub fn record(&self, entry: DedupEntry) -> bool {
        let mut state = self.state.lock();
        if state.entries.contains_key(&entry.identity) {
            return false;
        }

        while state.order.len() >= self.capacity {
            match state.order.pop_front() {
                Some(oldest) => {
                    state.entries.remove(&oldest);
                }
                None => break,
            }
        }

        state.order.push_back(entry.identity.clone());
        state.entries.insert(entry.identity.clone(), entry);
        true
    }

    /// Look up the entry for an identity
    pub fn get(&self, identity: &str) -> Option<DedupEntry> {
        self.state.lock().entries.get(identity).cloned()
    }

    /// Number of identities currently held
    ///
    /// Returns a snapshot at the time of the call. The value may change
    /// immediately after due to concurrent access.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Check if the ledger is currently empty
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Maximum number of identities held
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn entry(identity: &str, offset: i64) -> DedupEntry {
        DedupEntry {
            identity: identity.to_string(),
            audited_at: Utc::now(),
            partition: 0,
            offset,
        }
    }

    #[test]
    fn test_record_then_seen() {
        let ledger = DedupLedger::new(10);
        assert!(!ledger.seen("TX-1"));

        assert!(ledger.record(entry("TX-1", 5)));
        assert!(ledger.seen("TX-1"));
        assert_eq!(ledger.get("TX-1").unwrap().offset, 5);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_second_insert_never_overwrites() {
        let ledger = DedupLedger::new(10);
        assert!(ledger.record(entry("TX-1", 5)));
        assert!(!ledger.record(entry("TX-1", 99)));

        assert_eq!(ledger.get("TX-1").unwrap().offset, 5);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_fifo_eviction() {
        let ledger = DedupLedger::new(2);
        ledger.record(entry("A", 0));
        ledger.record(entry("B", 1));
        ledger.record(entry("C", 2));

        assert!(!ledger.seen("A"));
        assert!(ledger.seen("B"));
        assert!(ledger.seen("C"));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_duplicate_does_not_refresh_position() {
        let ledger = DedupLedger::new(2);
        ledger.record(entry("A", 0));
        ledger.record(entry("B", 1));
        ledger.record(entry("A", 2));
        ledger.record(entry("C", 3));

        // A was inserted first, so it goes first
        assert!(!ledger.seen("A"));
        assert!(ledger.seen("B"));
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let ledger = DedupLedger::new(0);
        assert_eq!(ledger.capacity(), 1);
        ledger.record(entry("A", 0));
        assert!(ledger.seen("A"));
    }

    #[test]
    fn test_concurrent_record_single_winner() {
        let ledger = Arc::new(DedupLedger::new(100));
        let winners = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    if ledger.record(entry("TX-RACE", i)) {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(ledger.len(), 1);
    }
}
