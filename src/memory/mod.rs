//! In-memory observation and asset buffers
//!
//! This module holds the data structures that live for the lifetime of the
//! agent process. Key components include:
//!
//! - `BufferKey`, the compact (device, data item) identity of an observation
//! - `ObservationRecord`, one stored data point with its value pairs
//! - `RingStore`, the fixed-capacity archive of records
//! - `CurrentValueIndex`, latest value and active conditions per key
//! - `ObservationBuffer`, the sequencer tying the ring and index together
//! - `AssetStore`, the LRU-ordered asset array
//! - `KeyRegistry`, dense index assignment for devices and data items
//!
//! Records are moved into the buffers and handed back out as clones, so a
//! stored record can never be mutated behind a reader's back.

pub mod assets;
pub mod current;
pub mod observations;
pub mod registry;
pub mod ring;
pub mod values;

use crate::error::{BufferError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use values::ObservationValue;

/// Multiplier separating the device index from the data item index
pub const DEVICE_KEY_MULTIPLIER: u32 = 10_000;

/// Upper bound (exclusive) of device indices
pub const MAX_DEVICES: u32 = 1_000;

/// Compact identity of a (device, data item) pair
///
/// `key = device_index * 10000 + data_item_index`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BufferKey(u32);

impl BufferKey {
    /// Encode a device index and data item index
    pub fn new(device_index: u32, data_item_index: u32) -> Result<Self> {
        if device_index >= MAX_DEVICES || data_item_index >= DEVICE_KEY_MULTIPLIER {
            return Err(BufferError::InvalidKey {
                device_index,
                data_item_index,
            });
        }
        Ok(Self(device_index * DEVICE_KEY_MULTIPLIER + data_item_index))
    }

    /// Wrap an already encoded key
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The encoded integer
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Device index component
    pub const fn device_index(self) -> u32 {
        self.0 / DEVICE_KEY_MULTIPLIER
    }

    /// Data item index component
    pub const fn data_item_index(self) -> u32 {
        self.0 % DEVICE_KEY_MULTIPLIER
    }

    /// Whether the key decodes to an in-range device index
    pub const fn is_valid(self) -> bool {
        self.0 < MAX_DEVICES * DEVICE_KEY_MULTIPLIER
    }
}

impl fmt::Display for BufferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Data item category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    /// Continuously varying value
    Sample,
    /// Discrete state or message
    Event,
    /// Fault / warning / normal state with possibly many active entries
    Condition,
}

/// Data item representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Representation {
    /// Single value
    Value,
    /// Flat set of keyed entries
    DataSet,
    /// Value reported even when unchanged
    Discrete,
    /// Fixed-rate series of samples
    TimeSeries,
    /// Rows of keyed cells
    Table,
}

/// Level of a condition entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionLevel {
    /// No fault or warning
    Normal,
    /// Warning active
    Warning,
    /// Fault active
    Fault,
    /// Condition state unknown
    Unavailable,
}

impl ConditionLevel {
    /// Parse the `Level` value of a condition
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "NORMAL" => Some(Self::Normal),
            "WARNING" => Some(Self::Warning),
            "FAULT" => Some(Self::Fault),
            values::UNAVAILABLE => Some(Self::Unavailable),
            _ => None,
        }
    }

    /// Text used in the `Level` value
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Warning => "WARNING",
            Self::Fault => "FAULT",
            Self::Unavailable => values::UNAVAILABLE,
        }
    }

    /// Warning or fault
    pub fn is_active_fault(self) -> bool {
        matches!(self, Self::Warning | Self::Fault)
    }
}

/// One stored data point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    /// Device / data item identity
    pub key: BufferKey,
    /// Sequence number, assigned when the record is stored (0 before that)
    pub sequence: u64,
    /// Unix time in milliseconds
    pub timestamp: i64,
    /// Data item category
    pub category: Category,
    /// Data item representation
    pub representation: Representation,
    /// Value pairs, sorted ascending by key
    pub values: Vec<ObservationValue>,
}

impl ObservationRecord {
    /// Create a record with no values yet
    pub fn new(
        key: BufferKey,
        category: Category,
        representation: Representation,
        timestamp: i64,
    ) -> Self {
        Self {
            key,
            sequence: 0,
            timestamp,
            category,
            representation,
            values: Vec::new(),
        }
    }

    /// Sample with a single `Result` value
    pub fn sample(key: BufferKey, timestamp: i64, result: impl Into<String>) -> Self {
        Self::new(key, Category::Sample, Representation::Value, timestamp)
            .with_value(values::RESULT, result)
    }

    /// Event with a single `Result` value
    pub fn event(key: BufferKey, timestamp: i64, result: impl Into<String>) -> Self {
        Self::new(key, Category::Event, Representation::Value, timestamp)
            .with_value(values::RESULT, result)
    }

    /// Condition entry with a level and an optional native code
    pub fn condition(
        key: BufferKey,
        timestamp: i64,
        level: ConditionLevel,
        native_code: Option<&str>,
    ) -> Self {
        let record = Self::new(key, Category::Condition, Representation::Value, timestamp)
            .with_value(values::LEVEL, level.as_str());
        match native_code {
            Some(code) => record.with_value(values::NATIVE_CODE, code),
            None => record,
        }
    }

    /// TimeSeries sample holding `samples` taken at `sample_rate` Hz
    pub fn time_series<I>(key: BufferKey, timestamp: i64, sample_rate: f64, samples: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut record = Self::new(key, Category::Sample, Representation::TimeSeries, timestamp);
        let mut count = 0;
        for (i, sample) in samples.into_iter().enumerate() {
            record.set_value(values::time_series_key(i), sample);
            count += 1;
        }
        record
            .with_value(values::SAMPLE_RATE, sample_rate.to_string())
            .with_value(values::SAMPLE_COUNT, count.to_string())
    }

    /// Attach the descriptive fields of a condition entry
    ///
    /// Empty fields are left out.
    pub fn with_condition_details(
        self,
        native_severity: &str,
        qualifier: &str,
        condition_id: &str,
        message: &str,
    ) -> Self {
        [
            (values::NATIVE_SEVERITY, native_severity),
            (values::QUALIFIER, qualifier),
            (values::CONDITION_ID, condition_id),
            (values::MESSAGE, message),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .fold(self, |record, (key, value)| record.with_value(key, value))
    }

    /// Builder-style `set_value`
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_value(key, value);
        self
    }

    /// Insert or replace a value, keeping the values sorted
    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.values.binary_search_by(|v| v.key.as_str().cmp(&key)) {
            Ok(pos) => self.values[pos].value = value,
            Err(pos) => self.values.insert(pos, ObservationValue { key, value }),
        }
    }

    /// Look up a value by key
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values
            .binary_search_by(|v| v.key.as_str().cmp(key))
            .ok()
            .map(|pos| self.values[pos].value.as_str())
    }

    /// Restore the ascending key order after direct edits of `values`
    ///
    /// When a key appears more than once the last occurrence wins.
    pub fn sort_values(&mut self) {
        // Stable sort keeps insertion order among equal keys
        self.values.sort_by(|a, b| a.key.cmp(&b.key));
        let mut deduped: Vec<ObservationValue> = Vec::with_capacity(self.values.len());
        for value in self.values.drain(..) {
            match deduped.last_mut() {
                Some(last) if last.key == value.key => *last = value,
                _ => deduped.push(value),
            }
        }
        self.values = deduped;
    }

    /// Whether the record can be stored
    pub fn is_valid(&self) -> bool {
        self.key.is_valid() && !self.values.is_empty() && self.timestamp > 0
    }

    /// Condition level, if this is a condition entry
    pub fn level(&self) -> Option<ConditionLevel> {
        self.value(values::LEVEL).and_then(ConditionLevel::parse)
    }

    /// TimeSeries readings in sample order
    pub fn time_series_samples(&self) -> Vec<&str> {
        let mut samples: Vec<(usize, &str)> = self
            .values
            .iter()
            .filter_map(|v| Some((values::parse_time_series_key(&v.key)?, v.value.as_str())))
            .collect();
        samples.sort_unstable_by_key(|(index, _)| *index);
        samples.into_iter().map(|(_, value)| value).collect()
    }

    /// Condition native code, treating an empty string as absent
    pub fn native_code(&self) -> Option<&str> {
        self.value(values::NATIVE_CODE).filter(|code| !code.is_empty())
    }

    /// Whether the record reports an unavailable value or level
    pub fn is_unavailable(&self) -> bool {
        match self.category {
            Category::Condition => self.level() == Some(ConditionLevel::Unavailable),
            _ => self.value(values::RESULT) == Some(values::UNAVAILABLE),
        }
    }

    /// Whether the record carries a reset marker
    pub fn reset_triggered(&self) -> bool {
        matches!(
            self.value(values::RESET_TRIGGERED),
            Some(value) if !value.is_empty() && value != values::NOT_SPECIFIED
        )
    }
}

/// Current unix time in milliseconds
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_key_encoding() {
        let key = BufferKey::new(1, 2).unwrap();
        assert_eq!(key.raw(), 10_002);
        assert_eq!(key.device_index(), 1);
        assert_eq!(key.data_item_index(), 2);
        assert!(key.is_valid());
    }

    #[test]
    fn test_buffer_key_bounds() {
        assert!(BufferKey::new(999, 9_999).is_ok());
        assert!(matches!(
            BufferKey::new(1_000, 0),
            Err(BufferError::InvalidKey { device_index: 1_000, .. })
        ));
        assert!(BufferKey::new(0, 10_000).is_err());
        assert!(!BufferKey::from_raw(10_000_000).is_valid());
    }

    #[test]
    fn test_values_stay_sorted() {
        let record = ObservationRecord::new(
            BufferKey::from_raw(1),
            Category::Event,
            Representation::DataSet,
            1,
        )
        .with_value("b", "2")
        .with_value("a", "1")
        .with_value("c", "3")
        .with_value("b", "22");

        let keys: Vec<&str> = record.values.iter().map(|v| v.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(record.value("b"), Some("22"));
        assert_eq!(record.value("d"), None);
    }

    #[test]
    fn test_sort_values_last_write_wins() {
        let mut record = ObservationRecord::new(
            BufferKey::from_raw(1),
            Category::Sample,
            Representation::Value,
            1,
        );
        record.values.push(ObservationValue::new("z", "1"));
        record.values.push(ObservationValue::new("a", "1"));
        record.values.push(ObservationValue::new("z", "2"));
        record.sort_values();

        assert_eq!(record.values.len(), 2);
        assert_eq!(record.value("z"), Some("2"));
    }

    #[test]
    fn test_validity() {
        let key = BufferKey::from_raw(10_001);
        assert!(ObservationRecord::sample(key, 5, "1.0").is_valid());
        assert!(!ObservationRecord::sample(key, 0, "1.0").is_valid());
        let empty = ObservationRecord::new(key, Category::Sample, Representation::Value, 5);
        assert!(!empty.is_valid());
        assert!(!ObservationRecord::sample(BufferKey::from_raw(u32::MAX), 5, "1").is_valid());
    }

    #[test]
    fn test_condition_accessors() {
        let key = BufferKey::from_raw(7);
        let record = ObservationRecord::condition(key, 1, ConditionLevel::Warning, Some("E1"));
        assert_eq!(record.level(), Some(ConditionLevel::Warning));
        assert_eq!(record.native_code(), Some("E1"));
        assert!(!record.is_unavailable());

        let unavailable = ObservationRecord::condition(key, 1, ConditionLevel::Unavailable, None);
        assert!(unavailable.is_unavailable());
        assert_eq!(unavailable.native_code(), None);
    }

    #[test]
    fn test_time_series_samples_keep_order() {
        let key = BufferKey::from_raw(3);
        let samples: Vec<String> = (0..12).map(|i| (i * 10).to_string()).collect();
        let record = ObservationRecord::time_series(key, 1, 100.0, samples);

        assert!(record.is_valid());
        assert_eq!(record.representation, Representation::TimeSeries);
        assert_eq!(record.value(values::SAMPLE_COUNT), Some("12"));
        assert_eq!(record.value(values::SAMPLE_RATE), Some("100"));

        let readings = record.time_series_samples();
        assert_eq!(readings.len(), 12);
        assert_eq!(readings[2], "20");
        assert_eq!(readings[11], "110");
    }

    #[test]
    fn test_condition_details() {
        let key = BufferKey::from_raw(4);
        let record = ObservationRecord::condition(key, 1, ConditionLevel::Fault, Some("E7"))
            .with_condition_details("3", "HIGH", "", "Spindle overload");

        assert_eq!(record.value(values::NATIVE_SEVERITY), Some("3"));
        assert_eq!(record.value(values::QUALIFIER), Some("HIGH"));
        assert_eq!(record.value(values::CONDITION_ID), None);
        assert_eq!(record.value(values::MESSAGE), Some("Spindle overload"));
        assert_eq!(record.native_code(), Some("E7"));
    }

    #[test]
    fn test_reset_triggered() {
        let key = BufferKey::from_raw(7);
        let record = ObservationRecord::event(key, 1, "x");
        assert!(!record.reset_triggered());
        assert!(!record
            .clone()
            .with_value(values::RESET_TRIGGERED, values::NOT_SPECIFIED)
            .reset_triggered());
        assert!(record.with_value(values::RESET_TRIGGERED, "DAY").reset_triggered());
    }
}
