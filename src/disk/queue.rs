//! Bounded dedup queue between the hot path and the persistence writer
//!
//! Producers push under a short lock and never touch the disk. The writer
//! drains a batch, releases the lock, and performs the I/O. Pushing a key
//! that is already queued replaces its value in place, so a burst of updates
//! to one item costs one write.

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// Keys in arrival order plus their latest values
struct QueueState<K, V> {
    order: VecDeque<K>,
    values: HashMap<K, V>,
}

/// FIFO of pending writes, deduplicated by key
pub struct PersistenceQueue<K, V> {
    state: Mutex<QueueState<K, V>>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V> PersistenceQueue<K, V> {
    /// Create a queue holding at most `capacity` distinct keys
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                order: VecDeque::new(),
                values: HashMap::new(),
            }),
            capacity,
        }
    }

    /// Queue a value
    ///
    /// Returns `false` when the key is new and the queue is full; the value
    /// is dropped.
    pub fn push(&self, key: K, value: V) -> bool {
        let mut state = self.state.lock();

        if let Some(existing) = state.values.get_mut(&key) {
            *existing = value;
            return true;
        }
        if state.order.len() >= self.capacity {
            return false;
        }

        state.order.push_back(key.clone());
        state.values.insert(key, value);
        true
    }

    /// Take up to `max` entries in arrival order
    pub fn drain(&self, max: usize) -> Vec<(K, V)> {
        let mut state = self.state.lock();
        let count = max.min(state.order.len());

        let mut batch = Vec::with_capacity(count);
        for _ in 0..count {
            let Some(key) = state.order.pop_front() else {
                break;
            };
            if let Some(value) = state.values.remove(&key) {
                batch.push((key, value));
            }
        }
        batch
    }

    /// Number of queued keys
    pub fn len(&self) -> usize {
        self.state.lock().order.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Counters shared by the hot path and the writer thread
#[derive(Default)]
pub struct PersistenceStats {
    written: CachePadded<AtomicU64>,
    failed: CachePadded<AtomicU64>,
    dropped: CachePadded<AtomicU64>,
}

/// Point-in-time copy of `PersistenceStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Files successfully written or updated
    pub written: u64,
    /// Write or rename failures
    pub failed: u64,
    /// Items rejected by a full queue
    pub dropped: u64,
}

impl PersistenceStats {
    /// Count successful writes
    pub fn record_written(&self, count: u64) {
        self.written.fetch_add(count, Ordering::Relaxed);
    }

    /// Count one failure
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one dropped item
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            written: self.written.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
