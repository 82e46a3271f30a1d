//! `{index},{id}` key tables
//!
//! One plain-text file per category under the index directory, one entry per
//! line. Lines that do not parse are skipped on read.

use crate::error::Result;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Device UUID table
pub const DEVICES: &str = "devices";

/// Data item id table
pub const DATA_ITEMS: &str = "dataItems";

/// One `{index},{id}` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIndex {
    /// Dense index
    pub index: u32,
    /// Identifier the index stands for
    pub id: String,
}

impl FileIndex {
    /// Create an entry
    pub fn new(index: u32, id: impl Into<String>) -> Self {
        Self {
            index,
            id: id.into(),
        }
    }

    /// Parse a single line
    pub fn parse(line: &str) -> Option<Self> {
        let (index, id) = line.split_once(',')?;
        let id = id.trim();
        if id.is_empty() {
            return None;
        }
        Some(Self::new(index.trim().parse().ok()?, id))
    }

    /// Replace the `category` table in `dir` with `entries`
    pub fn write(dir: &Path, category: &str, entries: &[FileIndex]) -> Result<()> {
        fs::create_dir_all(dir)?;

        let mut body = Vec::new();
        for entry in entries {
            writeln!(body, "{},{}", entry.index, entry.id)?;
        }

        let path = dir.join(category);
        let tmp = dir.join(format!(".{category}.tmp"));
        fs::write(&tmp, body)?;
        fs::rename(tmp, path)?;
        Ok(())
    }

    /// Read the `category` table in `dir`
    ///
    /// A missing table reads as empty.
    pub fn read(dir: &Path, category: &str) -> Result<Vec<FileIndex>> {
        let path = dir.join(category);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            match Self::parse(line) {
                Some(entry) => entries.push(entry),
                None => debug!(path = %path.display(), line, "skipping malformed index line"),
            }
        }
        Ok(entries)
    }
}
