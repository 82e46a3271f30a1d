//! Fixed-capacity circular archive
//!
//! `RingStore` keeps the most recent `capacity` records in insertion order.
//! Once full, every insert overwrites the oldest slot and advances both the
//! start and end cursors. All access goes through a single mutex: reads and
//! writes are fully serialized.
//!
//! Logical index `i` (0 = oldest) maps to physical slot
//! `(start + i) % capacity`. The store knows nothing about sequence numbers;
//! the owning sequencer derives them.

use crate::error::{BufferError, Result};
use parking_lot::Mutex;

/// Cursor state guarded by the ring lock
struct RingState<T> {
    /// Physical slots, grown up to `capacity` and then overwritten in place
    slots: Vec<T>,
    /// Physical index of the oldest record
    start: usize,
    /// Physical index the next record is written to
    end: usize,
    /// Number of records stored
    size: usize,
    /// Whether every slot is occupied
    full: bool,
}

impl<T> RingState<T> {
    fn physical_index(&self, logical: usize, capacity: usize) -> usize {
        (self.start + logical) % capacity
    }
}

/// Circular buffer with overwrite-oldest semantics
pub struct RingStore<T> {
    /// Cursor state and slots
    state: Mutex<RingState<T>>,
    /// Maximum number of records
    capacity: usize,
}

impl<T: Clone> RingStore<T> {
    /// Create a new ring holding at most `capacity` records
    ///
    /// # Panics
    ///
    /// Panics if capacity is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be positive");

        Self {
            state: Mutex::new(RingState {
                slots: Vec::with_capacity(capacity.min(1 << 16)),
                start: 0,
                end: 0,
                size: 0,
                full: false,
            }),
            capacity,
        }
    }

    /// Maximum number of records
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of records currently stored
    pub fn size(&self) -> usize {
        self.state.lock().size
    }

    /// Whether no record has been stored
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Whether the ring has wrapped
    pub fn is_full(&self) -> bool {
        self.state.lock().full
    }

    /// Clone the record at logical index `index`
    pub fn get(&self, index: usize) -> Result<T> {
        let state = self.state.lock();
        if index >= state.size {
            return Err(BufferError::IndexOutOfRange {
                index,
                size: state.size,
            });
        }

        let physical = state.physical_index(index, self.capacity);
        Ok(state.slots[physical].clone())
    }

    /// Replace the record at logical index `index`
    pub fn set(&self, index: usize, item: T) -> Result<()> {
        let mut state = self.state.lock();
        if index >= state.size {
            return Err(BufferError::IndexOutOfRange {
                index,
                size: state.size,
            });
        }

        let physical = state.physical_index(index, self.capacity);
        state.slots[physical] = item;
        Ok(())
    }

    /// Append a record, evicting the oldest when full
    ///
    /// Returns the evicted record, if any.
    pub fn add(&self, item: T) -> Option<T> {
        let mut state = self.state.lock();

        if state.full {
            // Overwrite the oldest slot and move both cursors forward
            let end = state.end;
            let evicted = std::mem::replace(&mut state.slots[end], item);
            state.end = (end + 1) % self.capacity;
            state.start = state.end;
            return Some(evicted);
        }

        // Still filling unused capacity
        state.slots.push(item);
        state.size += 1;
        state.end = (state.end + 1) % self.capacity;
        if state.size == self.capacity {
            state.full = true;
        }
        None
    }

    /// Run a read-only closure over the logical contents under the ring lock
    ///
    /// The view stays consistent for the whole closure: no writer can
    /// overwrite a slot while it runs.
    pub fn with_view<R>(&self, f: impl FnOnce(&RingView<'_, T>) -> R) -> R {
        let state = self.state.lock();
        let view = RingView {
            slots: &state.slots,
            start: state.start,
            size: state.size,
            capacity: self.capacity,
        };
        f(&view)
    }

    /// Clone every record, oldest first
    pub fn to_vec(&self) -> Vec<T> {
        self.with_view(|view| view.iter().cloned().collect())
    }

    /// Drop every record
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.slots.clear();
        state.start = 0;
        state.end = 0;
        state.size = 0;
        state.full = false;
    }
}

/// Borrowed, lock-protected view of a ring's logical contents
pub struct RingView<'a, T> {
    slots: &'a [T],
    start: usize,
    size: usize,
    capacity: usize,
}

impl<'a, T> RingView<'a, T> {
    /// Number of records visible
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether the view is empty
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Record at logical index `index`, or `None` when out of range
    pub fn get(&self, index: usize) -> Option<&'a T> {
        if index >= self.size {
            return None;
        }
        self.slots.get((self.start + index) % self.capacity)
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &'a T> + '_ {
        (0..self.size).filter_map(move |i| self.get(i))
    }

    /// First logical index whose record does not satisfy `pred`
    ///
    /// The records must be partitioned by `pred` (all `true` before all
    /// `false`), as they are for ascending sequence numbers.
    pub fn partition_point(&self, mut pred: impl FnMut(&T) -> bool) -> usize {
        let (mut low, mut high) = (0, self.size);
        while low < high {
            let mid = low + (high - low) / 2;
            match self.get(mid) {
                Some(item) if pred(item) => low = mid + 1,
                _ => high = mid,
            }
        }
        low
    }
}
