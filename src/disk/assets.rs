//! Asset files mirroring the asset store
//!
//! Each stored asset lives in `<dir>/{index}_{type}`, where `index` is its
//! position in the store array. The file buffer registers as an
//! `AssetObserver` and records two kinds of pending work:
//!
//! - Shifts: every array position vacated by an eviction or a move, in
//!   order. Replaying a shift deletes the file at that index and renames
//!   every higher index down by one, exactly as the array compacted.
//! - Payloads: asset ids to (re)write, deduplicated. The target index is
//!   resolved against the store when the batch is drained, so a payload
//!   queued before later shifts still lands at the asset's current position.
//!
//! Draining happens under the store lock (store first, then queue) so the
//! shift log and the resolved indices describe the same array. The I/O runs
//! after both locks are released, but under `flush_lock`: concurrent flushes
//! must replay their shift logs in the order they were drained.

use crate::disk::queue::{PersistenceQueue, PersistenceStats, StatsSnapshot};
use crate::disk::{list_numbered_files, parse_file_name, read_file, write_file};
use crate::error::Result;
use crate::memory::assets::{AssetObserver, AssetQueueItem, AssetRecord, AssetStore};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Persists asset store mutations as `{index}_{type}` files
pub struct AssetFileBuffer {
    dir: PathBuf,
    compress: bool,
    max_items_per_write: usize,
    shifts: Mutex<Vec<usize>>,
    payloads: PersistenceQueue<String, AssetQueueItem>,
    flush_lock: Mutex<()>,
    stats: PersistenceStats,
}

impl AssetFileBuffer {
    /// Create a file buffer rooted at `dir`
    pub fn new(
        dir: impl Into<PathBuf>,
        compress: bool,
        max_items_per_write: usize,
        queue_capacity: usize,
    ) -> Self {
        Self {
            dir: dir.into(),
            compress,
            max_items_per_write: max_items_per_write.max(1),
            shifts: Mutex::new(Vec::new()),
            payloads: PersistenceQueue::new(queue_capacity),
            flush_lock: Mutex::new(()),
            stats: PersistenceStats::default(),
        }
    }

    /// Directory holding the asset files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of assets waiting to be written
    pub fn pending(&self) -> usize {
        self.payloads.len()
    }

    /// Whether shifts or payloads are waiting
    pub fn has_pending(&self) -> bool {
        !self.payloads.is_empty() || !self.shifts.lock().is_empty()
    }

    /// Counter snapshot
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Replay pending shifts and write up to `max_items_per_write` assets
    ///
    /// Returns the number of files written. Individual file failures are
    /// logged and counted, not returned.
    pub fn flush(&self, store: &AssetStore) -> Result<usize> {
        // Held from drain to the last rename; never taken by the observer path
        let _flushing = self.flush_lock.lock();
        fs::create_dir_all(&self.dir)?;

        let (shifts, writes) = store.with_assets(|assets, positions| {
            let shifts = std::mem::take(&mut *self.shifts.lock());
            let writes: Vec<(usize, AssetRecord)> = self
                .payloads
                .drain(self.max_items_per_write)
                .into_iter()
                .filter_map(|(id, _)| positions.get(&id).map(|&i| (i, assets[i].clone())))
                .collect();
            (shifts, writes)
        });

        for position in shifts {
            if let Err(e) = self.apply_shift(position) {
                warn!(position, error = %e, "failed to shift asset files");
                self.stats.record_failed();
            }
        }

        let mut written = 0;
        for (index, asset) in &writes {
            match self.write_asset(*index, asset) {
                Ok(()) => written += 1,
                Err(e) => {
                    warn!(asset_id = %asset.asset_id, index, error = %e, "failed to write asset");
                    self.stats.record_failed();
                }
            }
        }

        if written > 0 {
            debug!(written, "assets persisted");
            self.stats.record_written(written as u64);
        }
        Ok(written)
    }

    /// Flush until nothing is pending
    pub fn flush_all(&self, store: &AssetStore) -> Result<usize> {
        let mut total = 0;
        loop {
            total += self.flush(store)?;
            if !self.has_pending() {
                return Ok(total);
            }
        }
    }

    /// Delete the file at `position` and move every higher index down by one
    fn apply_shift(&self, position: usize) -> Result<()> {
        for (index, name) in list_numbered_files(&self.dir)? {
            let index = index as usize;
            if index < position {
                continue;
            }

            let path = self.dir.join(&name);
            if index == position {
                fs::remove_file(&path)?;
                continue;
            }

            let Some((_, asset_type)) = parse_file_name(&name) else {
                continue;
            };
            fs::rename(&path, self.dir.join(format!("{}_{}", index - 1, asset_type)))?;
        }
        Ok(())
    }

    fn write_asset(&self, index: usize, asset: &AssetRecord) -> Result<()> {
        let name = format!("{}_{}", index, asset.asset_type);

        // A different type may occupy the slot
        for (existing, existing_name) in list_numbered_files(&self.dir)? {
            if existing as usize == index && existing_name != name {
                fs::remove_file(self.dir.join(existing_name))?;
            }
        }

        let body = serde_json::to_vec(asset)?;
        write_file(&self.dir.join(name), &body, self.compress)
    }

    /// Restore every asset file into `store`, then renumber files densely
    ///
    /// Files that fail their checksum or do not decode are deleted. The store
    /// is populated without notifying observers, so nothing is re-queued.
    pub fn load(&self, store: &AssetStore) -> Result<usize> {
        let _flushing = self.flush_lock.lock();
        let files = list_numbered_files(&self.dir)?;
        let mut loaded = Vec::with_capacity(files.len());

        for (_, name) in files {
            let path = self.dir.join(&name);
            match read_file(&path)
                .and_then(|bytes| Ok(serde_json::from_slice::<AssetRecord>(&bytes)?))
            {
                Ok(asset) => {
                    store.restore_asset(asset.clone());
                    loaded.push((name, asset));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "discarding unreadable asset file");
                    let _ = fs::remove_file(&path);
                }
            }
        }

        self.compact(store, &loaded)?;

        info!(assets = store.asset_count(), dir = %self.dir.display(), "assets loaded");
        Ok(store.asset_count())
    }

    /// Rename loaded files to the positions the store assigned them
    fn compact(&self, store: &AssetStore, loaded: &[(String, AssetRecord)]) -> Result<()> {
        // Only the last file of each id describes the stored asset
        let mut seen = HashSet::new();
        let mut keep = vec![false; loaded.len()];
        for (i, (_, asset)) in loaded.iter().enumerate().rev() {
            keep[i] = seen.insert(asset.asset_id.as_str());
        }

        for ((name, asset), keep) in loaded.iter().zip(keep) {
            let path = self.dir.join(name);
            let target = if keep { store.index_of(&asset.asset_id) } else { None };

            match target {
                None => fs::remove_file(&path)?,
                Some(index) => {
                    let target_name = format!("{}_{}", index, asset.asset_type);
                    if *name != target_name {
                        fs::rename(&path, self.dir.join(target_name))?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl AssetObserver for AssetFileBuffer {
    fn on_asset_added(&self, item: &AssetQueueItem) {
        if let Some(original) = item.original_index {
            self.shifts.lock().push(original);
        }
        if !self.payloads.push(item.asset.asset_id.clone(), item.clone()) {
            self.stats.record_dropped();
        }
    }

    fn on_asset_removed(&self, index: usize, _asset: &AssetRecord) {
        self.shifts.lock().push(index);
    }
}
