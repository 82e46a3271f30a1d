//! Observation sequencing and queries
//!
//! `ObservationBuffer` owns the global sequence counter. Every accepted record
//! is stamped with the next sequence number, folded into the current-value
//! index and appended to the ring archive, all under one lock. Sequence
//! numbers therefore follow ring insertion order exactly.
//!
//! Queries hold the same lock for their whole scan, so a concurrent writer
//! can never overwrite a slot that is being read.

use crate::memory::current::CurrentValueIndex;
use crate::memory::ring::{RingStore, RingView};
use crate::memory::{BufferKey, ObservationRecord};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Receives every record stored by an `ObservationBuffer`
///
/// Called while the sequencer lock is held: implementations must not block
/// and must not call back into the buffer.
pub trait ObservationObserver: Send + Sync {
    /// A record was assigned a sequence number and stored
    fn on_observation_added(&self, record: &ObservationRecord);
}

/// Result of an observation query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationResults {
    /// `false` when the request could not be answered (e.g. sequence out of range)
    pub is_valid: bool,
    /// Oldest sequence still addressable in the buffer
    pub first_sequence: u64,
    /// Newest sequence stored
    pub last_sequence: u64,
    /// Sequence the next stored record will receive
    pub next_sequence: u64,
    /// Lowest sequence among the returned records (0 when none)
    pub first_observation_sequence: u64,
    /// Highest sequence among the returned records (0 when none)
    pub last_observation_sequence: u64,
    /// Matched records
    pub observations: Vec<ObservationRecord>,
}

impl ObservationResults {
    fn new(bounds: SequenceBounds, observations: Vec<ObservationRecord>) -> Self {
        let first_observation_sequence = observations
            .iter()
            .map(|r| r.sequence)
            .min()
            .unwrap_or(0);
        let last_observation_sequence = observations
            .iter()
            .map(|r| r.sequence)
            .max()
            .unwrap_or(0);
        Self {
            is_valid: true,
            first_sequence: bounds.first,
            last_sequence: bounds.last,
            next_sequence: bounds.next,
            first_observation_sequence,
            last_observation_sequence,
            observations,
        }
    }

    fn invalid(bounds: SequenceBounds) -> Self {
        Self {
            is_valid: false,
            first_sequence: bounds.first,
            last_sequence: bounds.last,
            next_sequence: bounds.next,
            ..Self::default()
        }
    }

    /// Number of returned records
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// Whether no record was returned
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// Buffer-wide sequence bounds taken under the sequencer lock
#[derive(Debug, Clone, Copy)]
struct SequenceBounds {
    first: u64,
    last: u64,
    next: u64,
}

/// State guarded by the sequencer lock
struct SequencerState {
    /// Sequence the next record receives
    sequence: u64,
    /// Latest values and active conditions
    current: CurrentValueIndex,
}

/// Sequencer, archive and current-value cache for observations
pub struct ObservationBuffer {
    /// Sequence counter and current values
    state: Mutex<SequencerState>,
    /// Archive of stored records, oldest first
    archive: RingStore<ObservationRecord>,
    /// Ring capacity
    buffer_size: usize,
    /// Hooks notified of stored records
    observers: RwLock<Vec<Arc<dyn ObservationObserver>>>,
}

impl ObservationBuffer {
    /// Create a buffer whose ring holds `buffer_size` records
    ///
    /// # Panics
    ///
    /// Panics if `buffer_size` is zero.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            state: Mutex::new(SequencerState {
                sequence: 1,
                current: CurrentValueIndex::new(),
            }),
            archive: RingStore::new(buffer_size),
            buffer_size,
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Register a hook notified of every stored record
    pub fn add_observer(&self, observer: Arc<dyn ObservationObserver>) {
        self.observers.write().push(observer);
    }

    /// Ring capacity
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of records in the ring
    pub fn len(&self) -> usize {
        self.archive.size()
    }

    /// Whether no record has been stored
    pub fn is_empty(&self) -> bool {
        self.archive.is_empty()
    }

    /// Sequence the next stored record will receive
    pub fn next_sequence(&self) -> u64 {
        self.state.lock().sequence
    }

    /// Oldest sequence still addressable
    pub fn first_sequence(&self) -> u64 {
        self.bounds(&self.state.lock()).first
    }

    /// Newest sequence stored (0 when empty)
    pub fn last_sequence(&self) -> u64 {
        self.bounds(&self.state.lock()).last
    }

    fn bounds(&self, state: &SequencerState) -> SequenceBounds {
        let next = state.sequence;
        SequenceBounds {
            first: next.saturating_sub(self.buffer_size as u64).max(1),
            last: next.saturating_sub(1),
            next,
        }
    }

    /// Advance the sequence counter without storing a record
    pub fn increment_sequence(&self, count: u64) {
        let mut state = self.state.lock();
        state.sequence += count;
        trace!(sequence = state.sequence, count, "sequence incremented");
    }

    /// Store a record and return its sequence number
    ///
    /// Returns `0` when the record is rejected (out-of-range key, no values,
    /// or a non-positive timestamp).
    pub fn add_observation(&self, mut record: ObservationRecord) -> u64 {
        if !record.is_valid() {
            debug!(key = %record.key, "observation rejected");
            return 0;
        }
        record.sort_values();

        let mut state = self.state.lock();

        let sequence = state.sequence;
        record.sequence = sequence;

        // Update the current value cache before archiving
        state.current.apply(&record);

        for observer in self.observers.read().iter() {
            observer.on_observation_added(&record);
        }

        self.archive.add(record);
        state.sequence += 1;

        sequence
    }

    /// Re-insert persisted records with their original sequence numbers
    ///
    /// Records are applied in ascending sequence order; any record at or
    /// below the newest stored sequence is skipped. Observers are not
    /// notified. Returns the number of records restored.
    pub fn restore(&self, mut records: Vec<ObservationRecord>) -> usize {
        records.sort_by_key(|r| r.sequence);

        let mut state = self.state.lock();
        let mut restored = 0;

        for mut record in records {
            if !record.is_valid() || record.sequence < state.sequence {
                continue;
            }
            record.sort_values();

            state.sequence = record.sequence + 1;
            state.current.apply(&record);
            self.archive.add(record);
            restored += 1;
        }

        debug!(restored, next_sequence = state.sequence, "observations restored");
        restored
    }

    /// Current value and active conditions for each key
    ///
    /// An empty key list selects every key with a current value. Records are
    /// returned in ascending key order.
    pub fn get_current_observations(&self, keys: &[BufferKey]) -> ObservationResults {
        let state = self.state.lock();
        let bounds = self.bounds(&state);

        let mut observations = Vec::new();
        for key in selected_keys(keys, &state.current) {
            if let Some(record) = state.current.observation(key) {
                observations.push(record.clone());
            }
            observations.extend(state.current.conditions(key).iter().cloned());
        }

        ObservationResults::new(bounds, observations)
    }

    /// State of each key as of sequence `at`
    ///
    /// The archive is scanned backward from `at`; for each key the most
    /// recent record at or before `at` is returned. Keys with no archived
    /// record fall back to their current entries when those predate `at`.
    /// Invalid when `at` lies outside `[first_sequence, last_sequence]`.
    pub fn get_current_observations_at(&self, keys: &[BufferKey], at: u64) -> ObservationResults {
        let state = self.state.lock();
        let bounds = self.bounds(&state);

        if self.archive.is_empty() || at < bounds.first || at > bounds.last {
            debug!(
                at,
                first = bounds.first,
                last = bounds.last,
                "point-in-time query out of range"
            );
            return ObservationResults::invalid(bounds);
        }

        let wanted = selected_keys(keys, &state.current);
        let mut found: BTreeMap<BufferKey, ObservationRecord> = BTreeMap::new();

        self.archive.with_view(|view| {
            let end = view.partition_point(|r| r.sequence <= at);
            for index in (0..end).rev() {
                if found.len() == wanted.len() {
                    break;
                }
                if let Some(record) = view.get(index) {
                    if wanted.contains(&record.key) && !found.contains_key(&record.key) {
                        found.insert(record.key, record.clone());
                    }
                }
            }
        });

        let mut observations = Vec::new();
        for key in wanted {
            match found.remove(&key) {
                Some(record) => observations.push(record),
                None => {
                    // Nothing archived at or before `at`, use the cache
                    if let Some(record) = state.current.observation(key) {
                        if record.sequence <= at {
                            observations.push(record.clone());
                        }
                    }
                    observations.extend(
                        state
                            .current
                            .conditions(key)
                            .iter()
                            .filter(|r| r.sequence <= at)
                            .cloned(),
                    );
                }
            }
        }

        ObservationResults::new(bounds, observations)
    }

    /// Archived records for `keys` within the sequence range `[from, to]`
    ///
    /// `from` defaults to the oldest addressable sequence and `to` to the
    /// newest; `to` is clamped to the newest. At most `count` records are
    /// collected per key, oldest first. An empty key list matches every key.
    /// The result is ordered by sequence.
    pub fn get_observations(
        &self,
        keys: &[BufferKey],
        from: Option<u64>,
        to: Option<u64>,
        count: usize,
    ) -> ObservationResults {
        let state = self.state.lock();
        let bounds = self.bounds(&state);

        if self.archive.is_empty() {
            return ObservationResults::invalid(bounds);
        }

        let from = from.unwrap_or(bounds.first);
        let to = to.unwrap_or(bounds.last).min(bounds.last);
        if from < bounds.first || from > bounds.last || to < from {
            debug!(from, to, first = bounds.first, last = bounds.last, "range query out of range");
            return ObservationResults::invalid(bounds);
        }

        // Sorted, deduplicated key filter; None matches everything
        let wanted: Option<BTreeSet<BufferKey>> = if keys.is_empty() {
            None
        } else {
            Some(keys.iter().copied().collect())
        };

        let observations = self
            .archive
            .with_view(|view| collect_range(view, wanted.as_ref(), from, to, count));

        ObservationResults::new(bounds, observations)
    }
}

/// Scan `[from, to]` collecting up to `count` positions per key
fn collect_range(
    view: &RingView<'_, ObservationRecord>,
    wanted: Option<&BTreeSet<BufferKey>>,
    from: u64,
    to: u64,
    count: usize,
) -> Vec<ObservationRecord> {
    let from_index = view.partition_point(|r| r.sequence < from);
    let to_index = view.partition_point(|r| r.sequence <= to);

    let mut matches: BTreeMap<BufferKey, Vec<usize>> = BTreeMap::new();
    for index in from_index..to_index {
        let Some(record) = view.get(index) else {
            break;
        };
        if wanted.is_some_and(|keys| !keys.contains(&record.key)) {
            continue;
        }

        let positions = matches.entry(record.key).or_default();
        if positions.len() < count {
            positions.push(index);
        }
    }

    // Merge per-key runs back into ring order
    let mut positions: Vec<usize> = matches.into_values().flatten().collect();
    positions.sort_unstable();

    positions
        .into_iter()
        .filter_map(|index| view.get(index).cloned())
        .collect()
}

/// Sorted, deduplicated keys; an empty request selects every tracked key
fn selected_keys(keys: &[BufferKey], current: &CurrentValueIndex) -> BTreeSet<BufferKey> {
    if keys.is_empty() {
        current.keys().into_iter().collect()
    } else {
        keys.iter().copied().collect()
    }
}
