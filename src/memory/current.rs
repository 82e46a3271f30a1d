//! Latest-value cache for observations
//!
//! `CurrentValueIndex` holds, per buffer key, either the most recent
//! sample/event record or the list of condition entries that are currently
//! active. It has no lock of its own: the observation buffer mutates it under
//! the sequencer lock.
//!
//! Merge rules:
//!
//! - DataSet updates are sparse; entries are merged into the previous full set
//!   unless the update is a reset or reports UNAVAILABLE
//! - Table updates replace whole rows; untouched rows are kept
//! - Condition entries are keyed by native code; WARNING/FAULT entries
//!   suppress NORMAL entries for the same key

use crate::memory::values::{self, parse_data_set_key, parse_table_key, ObservationValue};
use crate::memory::{BufferKey, Category, ConditionLevel, ObservationRecord, Representation};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Latest value per key plus active conditions per key
#[derive(Debug, Default)]
pub struct CurrentValueIndex {
    /// Samples and events
    observations: HashMap<BufferKey, ObservationRecord>,
    /// Active condition entries, oldest first
    conditions: HashMap<BufferKey, Vec<ObservationRecord>>,
}

impl CurrentValueIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a newly stored record into the index
    pub fn apply(&mut self, record: &ObservationRecord) {
        if record.category == Category::Condition {
            let active = self.conditions.entry(record.key).or_default();
            merge_conditions(active, record);
        } else {
            let merged = match self.observations.get(&record.key) {
                Some(previous) => merge_observation(previous, record),
                None => with_count(record.clone()),
            };
            self.observations.insert(record.key, merged);
        }
    }

    /// Latest sample or event for a key
    pub fn observation(&self, key: BufferKey) -> Option<&ObservationRecord> {
        self.observations.get(&key)
    }

    /// Active condition entries for a key
    pub fn conditions(&self, key: BufferKey) -> &[ObservationRecord] {
        self.conditions.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every key with a current value or condition, ascending
    pub fn keys(&self) -> Vec<BufferKey> {
        let keys: BTreeSet<BufferKey> = self
            .observations
            .keys()
            .chain(self.conditions.keys())
            .copied()
            .collect();
        keys.into_iter().collect()
    }

    /// Number of keys tracked
    pub fn len(&self) -> usize {
        self.observations.len() + self.conditions.len()
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty() && self.conditions.is_empty()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.observations.clear();
        self.conditions.clear();
    }
}

/// Merge a sample/event update against the previous current value
pub fn merge_observation(
    previous: &ObservationRecord,
    incoming: &ObservationRecord,
) -> ObservationRecord {
    let mergeable = !incoming.reset_triggered() && !incoming.is_unavailable();
    match incoming.representation {
        Representation::DataSet if mergeable => merge_data_set(previous, incoming),
        Representation::Table if mergeable => merge_table(previous, incoming),
        _ => with_count(incoming.clone()),
    }
}

/// Merge sparse DataSet entries into the previous entry set
///
/// Previous entries named in the update are dropped, the update's values are
/// appended, and `Count` is recomputed from the surviving entries.
pub fn merge_data_set(
    previous: &ObservationRecord,
    incoming: &ObservationRecord,
) -> ObservationRecord {
    let updated: HashSet<&str> = incoming
        .values
        .iter()
        .filter_map(|v| parse_data_set_key(&v.key))
        .collect();

    let kept = previous.values.iter().filter(|v| {
        matches!(parse_data_set_key(&v.key), Some(entry) if !updated.contains(entry))
    });

    rebuild(incoming, kept)
}

/// Merge Table rows into the previous table
///
/// Any row present in the update replaces every cell previously stored under
/// that row.
pub fn merge_table(
    previous: &ObservationRecord,
    incoming: &ObservationRecord,
) -> ObservationRecord {
    let updated_rows: HashSet<&str> = incoming
        .values
        .iter()
        .filter_map(|v| parse_table_key(&v.key).map(|(row, _)| row))
        .collect();

    let kept = previous.values.iter().filter(|v| {
        matches!(parse_table_key(&v.key), Some((row, _)) if !updated_rows.contains(row))
    });

    rebuild(incoming, kept)
}

/// Combine kept entries with the incoming values and recompute `Count`
fn rebuild<'a>(
    incoming: &ObservationRecord,
    kept: impl Iterator<Item = &'a ObservationValue>,
) -> ObservationRecord {
    let mut merged = incoming.clone();
    merged.values = kept
        .cloned()
        .chain(incoming.values.iter().filter(|v| v.key != values::COUNT).cloned())
        .collect();
    merged.sort_values();
    with_count(merged)
}

/// Set the `Count` value of a DataSet or Table record
fn with_count(mut record: ObservationRecord) -> ObservationRecord {
    if record.category == Category::Condition || record.is_unavailable() {
        return record;
    }

    let count = match record.representation {
        Representation::DataSet => record
            .values
            .iter()
            .filter(|v| parse_data_set_key(&v.key).is_some())
            .count(),
        Representation::Table => record
            .values
            .iter()
            .filter_map(|v| parse_table_key(&v.key).map(|(row, _)| row))
            .collect::<HashSet<_>>()
            .len(),
        _ => return record,
    };

    record.set_value(values::COUNT, count.to_string());
    record
}

/// Apply a condition entry to the active list of its key
///
/// UNAVAILABLE, and NORMAL without a native code, clear the list. Any other
/// entry replaces the active entry with the same native code. While a WARNING
/// or FAULT is active, NORMAL entries are dropped.
pub fn merge_conditions(active: &mut Vec<ObservationRecord>, incoming: &ObservationRecord) {
    let clears = match incoming.level() {
        Some(ConditionLevel::Normal) => incoming.native_code().is_none(),
        Some(ConditionLevel::Warning) | Some(ConditionLevel::Fault) => false,
        Some(ConditionLevel::Unavailable) | None => true,
    };

    if clears {
        active.clear();
        active.push(incoming.clone());
        return;
    }

    let native_code = incoming.native_code();
    active.retain(|entry| entry.native_code() != native_code && !entry.is_unavailable());
    active.push(incoming.clone());

    let fault_active = active
        .iter()
        .any(|entry| entry.level().is_some_and(ConditionLevel::is_active_fault));
    if fault_active {
        active.retain(|entry| entry.level() != Some(ConditionLevel::Normal));
    }
}
