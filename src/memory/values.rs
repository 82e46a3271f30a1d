//! Observation value pairs and the well-known value keys
//!
//! Every observation carries an ordered list of `(key, value)` string pairs.
//! Simple observations only use `Result`; conditions add `Level`,
//! `NativeCode` and friends; DataSet and Table observations encode each entry
//! in the key itself (`DataSet[speed]`, `Table[T1][length]`).

use serde::{Deserialize, Serialize};

/// Value of an unavailable observation or condition level
pub const UNAVAILABLE: &str = "UNAVAILABLE";

/// Value of `ResetTriggered` when no reset happened
pub const NOT_SPECIFIED: &str = "NOT_SPECIFIED";

/// Main value of samples and events
pub const RESULT: &str = "Result";
/// Condition level (`NORMAL`, `WARNING`, `FAULT`, `UNAVAILABLE`)
pub const LEVEL: &str = "Level";
/// Condition native code
pub const NATIVE_CODE: &str = "NativeCode";
/// Condition native severity
pub const NATIVE_SEVERITY: &str = "NativeSeverity";
/// Condition qualifier
pub const QUALIFIER: &str = "Qualifier";
/// Condition identifier
pub const CONDITION_ID: &str = "ConditionId";
/// Condition message
pub const MESSAGE: &str = "Message";
/// Reset marker for DataSet / Table observations
pub const RESET_TRIGGERED: &str = "ResetTriggered";
/// Number of entries (DataSet) or rows (Table)
pub const COUNT: &str = "Count";
/// Time series sample rate
pub const SAMPLE_RATE: &str = "SampleRate";
/// Time series sample count
pub const SAMPLE_COUNT: &str = "SampleCount";

const DATA_SET_PREFIX: &str = "DataSet[";
const TABLE_PREFIX: &str = "Table[";
const TIME_SERIES_PREFIX: &str = "TimeSeries[";

/// A single `(key, value)` pair of an observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationValue {
    /// Value key
    pub key: String,
    /// Value text
    pub value: String,
}

impl ObservationValue {
    /// Create a new value pair
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Key of a DataSet entry
pub fn data_set_key(entry: &str) -> String {
    format!("{DATA_SET_PREFIX}{entry}]")
}

/// Key of a Table cell
pub fn table_key(row: &str, cell: &str) -> String {
    format!("{TABLE_PREFIX}{row}][{cell}]")
}

/// Key of a TimeSeries sample
pub fn time_series_key(index: usize) -> String {
    format!("{TIME_SERIES_PREFIX}{index}]")
}

/// Entry name of a `DataSet[entry]` key
pub fn parse_data_set_key(key: &str) -> Option<&str> {
    key.strip_prefix(DATA_SET_PREFIX)?.strip_suffix(']')
}

/// Row and cell names of a `Table[row][cell]` key
pub fn parse_table_key(key: &str) -> Option<(&str, &str)> {
    let inner = key.strip_prefix(TABLE_PREFIX)?.strip_suffix(']')?;
    inner.split_once("][")
}

/// Sample index of a `TimeSeries[n]` key
pub fn parse_time_series_key(key: &str) -> Option<usize> {
    key.strip_prefix(TIME_SERIES_PREFIX)?
        .strip_suffix(']')?
        .parse()
        .ok()
}
