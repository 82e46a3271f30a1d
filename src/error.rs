//! Error types shared by the in-memory buffers and the file persistence layer
//!
//! Only two kinds of failure are expressed through `BufferError`:
//!
//! - Bounds errors from the ring store (a caller bug)
//! - Persistence and configuration errors (disk I/O, encoding, bad settings)
//!
//! Rejected observations and assets are not errors; they are signalled with
//! sentinel return values (`0` sequence, `false`).

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Error types for buffer and persistence operations
#[derive(Debug, Error)]
pub enum BufferError {
    /// Logical ring index outside `[0, size)`
    #[error("index {index} is out of range for a buffer holding {size} records")]
    IndexOutOfRange {
        /// The requested logical index
        index: usize,
        /// Number of records stored when the access was made
        size: usize,
    },

    /// Device or data item index does not fit the buffer key encoding
    #[error("device {device_index} / data item {data_item_index} exceeds the buffer key range")]
    InvalidKey {
        /// Device index component
        device_index: u32,
        /// Data item index component
        data_item_index: u32,
    },

    /// An IO error occurred
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A persisted payload could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The CRC trailer of a persisted file did not match its contents
    #[error("checksum mismatch in {}", path.display())]
    Checksum {
        /// File that failed verification
        path: PathBuf,
    },

    /// Configuration values that cannot be used
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for buffer operations
pub type Result<T> = std::result::Result<T, BufferError>;
