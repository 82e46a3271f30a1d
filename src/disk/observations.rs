//! Observation pages mirroring the observation ring
//!
//! Every flush writes the drained records as one page named
//! `{first}_{last}` after the sequence range it covers. The body is one JSON
//! record per line. Pages whose last sequence has fallen out of the ring
//! window are deleted by the retention sweep. Page writes, the sweep and
//! loading are serialized by `io_lock`.

use crate::disk::queue::{PersistenceQueue, PersistenceStats, StatsSnapshot};
use crate::disk::{list_numbered_files, parse_file_name, read_file, write_file};
use crate::error::Result;
use crate::memory::observations::{ObservationBuffer, ObservationObserver};
use crate::memory::{BufferKey, ObservationRecord};
use parking_lot::Mutex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Persists stored observations as sequence-range pages
pub struct ObservationFileBuffer {
    dir: PathBuf,
    compress: bool,
    max_items_per_write: usize,
    retention_interval: Duration,
    queue: PersistenceQueue<(BufferKey, u64), ObservationRecord>,
    last_retention: Mutex<Option<Instant>>,
    io_lock: Mutex<()>,
    stats: PersistenceStats,
}

impl ObservationFileBuffer {
    /// Create a page writer rooted at `dir`
    pub fn new(
        dir: impl Into<PathBuf>,
        compress: bool,
        max_items_per_write: usize,
        queue_capacity: usize,
        retention_interval: Duration,
    ) -> Self {
        Self {
            dir: dir.into(),
            compress,
            max_items_per_write: max_items_per_write.max(1),
            retention_interval,
            queue: PersistenceQueue::new(queue_capacity),
            last_retention: Mutex::new(None),
            io_lock: Mutex::new(()),
            stats: PersistenceStats::default(),
        }
    }

    /// Directory holding the pages
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of records waiting to be written
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Counter snapshot
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Write up to `max_items_per_write` queued records as one page
    pub fn flush(&self) -> Result<usize> {
        let _io = self.io_lock.lock();
        let mut batch: Vec<ObservationRecord> = self
            .queue
            .drain(self.max_items_per_write)
            .into_iter()
            .map(|(_, record)| record)
            .collect();
        if batch.is_empty() {
            return Ok(0);
        }
        batch.sort_by_key(|r| r.sequence);

        let first = batch[0].sequence;
        let last = batch[batch.len() - 1].sequence;

        let mut body = Vec::with_capacity(batch.len() * 128);
        for record in &batch {
            serde_json::to_writer(&mut body, record)?;
            body.write_all(b"\n")?;
        }

        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{first}_{last}"));
        if let Err(e) = write_file(&path, &body, self.compress) {
            self.stats.record_failed();
            return Err(e);
        }

        debug!(first, last, records = batch.len(), "observation page written");
        self.stats.record_written(batch.len() as u64);
        Ok(batch.len())
    }

    /// Flush until the queue is empty
    pub fn flush_all(&self) -> Result<usize> {
        let mut total = 0;
        loop {
            let written = self.flush()?;
            if written == 0 {
                return Ok(total);
            }
            total += written;
        }
    }

    /// Run `remove_expired` if `retention_interval` has passed since the last sweep
    pub fn retain(&self, first_sequence: u64) -> Result<usize> {
        {
            let mut last = self.last_retention.lock();
            if last.is_some_and(|at| at.elapsed() < self.retention_interval) {
                return Ok(0);
            }
            *last = Some(Instant::now());
        }
        self.remove_expired(first_sequence)
    }

    /// Delete pages whose last sequence is below `first_sequence`
    pub fn remove_expired(&self, first_sequence: u64) -> Result<usize> {
        let _io = self.io_lock.lock();
        self.remove_pages_before(first_sequence)
    }

    fn remove_pages_before(&self, first_sequence: u64) -> Result<usize> {
        let mut removed = 0;
        for (_, name) in list_numbered_files(&self.dir)? {
            let Some(last) = page_last(&name) else {
                continue;
            };
            if last < first_sequence {
                fs::remove_file(self.dir.join(&name))?;
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, first_sequence, "expired observation pages removed");
        }
        Ok(removed)
    }

    /// Restore every page into `buffer`
    ///
    /// Unreadable pages are deleted. Returns the number of records restored.
    pub fn load(&self, buffer: &ObservationBuffer) -> Result<usize> {
        let _io = self.io_lock.lock();
        let mut records = Vec::new();

        for (_, name) in list_numbered_files(&self.dir)? {
            if page_last(&name).is_none() {
                continue;
            }

            let path = self.dir.join(&name);
            match read_file(&path).and_then(|bytes| parse_page(&bytes)) {
                Ok(page) => records.extend(page),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "discarding unreadable observation page"
                    );
                    let _ = fs::remove_file(&path);
                }
            }
        }

        let restored = buffer.restore(records);
        info!(
            restored,
            next_sequence = buffer.next_sequence(),
            dir = %self.dir.display(),
            "observations loaded"
        );

        // Pages behind the restored window are no longer useful
        self.remove_pages_before(buffer.first_sequence())?;
        Ok(restored)
    }
}

impl ObservationObserver for ObservationFileBuffer {
    fn on_observation_added(&self, record: &ObservationRecord) {
        if !self.queue.push((record.key, record.sequence), record.clone()) {
            self.stats.record_dropped();
        }
    }
}

/// Last sequence of a `{first}_{last}` page name
fn page_last(name: &str) -> Option<u64> {
    let (_, last) = parse_file_name(name)?;
    last.parse().ok()
}

fn parse_page(bytes: &[u8]) -> Result<Vec<ObservationRecord>> {
    let mut records = Vec::new();
    for line in bytes.split(|b| *b == b'\n').filter(|l| !l.is_empty()) {
        records.push(serde_json::from_slice(line)?);
    }
    Ok(records)
}
