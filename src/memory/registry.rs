//! Dense index assignment for devices and data items
//!
//! Producers know devices by UUID and data items by id. `KeyRegistry` maps
//! both to the small integers packed into a `BufferKey`, and persists the
//! tables so keys stay stable across restarts. Data item ids are global: the
//! same id on two devices gets the same data item index.

use crate::disk::index::{FileIndex, DATA_ITEMS, DEVICES};
use crate::error::{BufferError, Result};
use crate::memory::{BufferKey, DEVICE_KEY_MULTIPLIER, MAX_DEVICES};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

/// One id <-> index table
#[derive(Default)]
struct IndexTable {
    by_id: HashMap<String, u32>,
    by_index: BTreeMap<u32, String>,
}

impl IndexTable {
    fn from_entries(entries: Vec<FileIndex>, limit: u32) -> Self {
        let mut table = Self::default();
        for entry in entries.into_iter().filter(|e| e.index < limit) {
            if table.by_id.contains_key(&entry.id) || table.by_index.contains_key(&entry.index) {
                debug!(index = entry.index, id = %entry.id, "duplicate index entry ignored");
                continue;
            }
            table.by_id.insert(entry.id.clone(), entry.index);
            table.by_index.insert(entry.index, entry.id);
        }
        table
    }

    fn get(&self, id: &str) -> Option<u32> {
        self.by_id.get(id).copied()
    }

    /// Existing index, or the next one past the highest assigned
    fn get_or_assign(&mut self, id: &str, limit: u32) -> Option<u32> {
        if let Some(index) = self.get(id) {
            return Some(index);
        }

        let next = self.by_index.keys().next_back().map_or(0, |last| last + 1);
        if next >= limit {
            return None;
        }

        self.by_id.insert(id.to_string(), next);
        self.by_index.insert(next, id.to_string());
        Some(next)
    }

    fn entries(&self) -> Vec<FileIndex> {
        self.by_index
            .iter()
            .map(|(&index, id)| FileIndex::new(index, id.clone()))
            .collect()
    }
}

/// Tables guarded by the registry lock
#[derive(Default)]
struct RegistryState {
    devices: IndexTable,
    data_items: IndexTable,
}

/// Maps device UUIDs and data item ids to `BufferKey`s
#[derive(Default)]
pub struct KeyRegistry {
    state: Mutex<RegistryState>,
}

impl KeyRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for a data item, assigning indices on first use
    pub fn key(&self, device_uuid: &str, data_item_id: &str) -> Result<BufferKey> {
        let mut state = self.state.lock();

        let device_index = state
            .devices
            .get_or_assign(device_uuid, MAX_DEVICES)
            .ok_or(BufferError::InvalidKey {
                device_index: MAX_DEVICES,
                data_item_index: 0,
            })?;
        let data_item_index = state
            .data_items
            .get_or_assign(data_item_id, DEVICE_KEY_MULTIPLIER)
            .ok_or(BufferError::InvalidKey {
                device_index,
                data_item_index: DEVICE_KEY_MULTIPLIER,
            })?;

        BufferKey::new(device_index, data_item_index)
    }

    /// Key for an already registered data item
    pub fn lookup(&self, device_uuid: &str, data_item_id: &str) -> Option<BufferKey> {
        let state = self.state.lock();
        let device_index = state.devices.get(device_uuid)?;
        let data_item_index = state.data_items.get(data_item_id)?;
        BufferKey::new(device_index, data_item_index).ok()
    }

    /// Device UUID and data item id a key stands for
    pub fn resolve(&self, key: BufferKey) -> Option<(String, String)> {
        let state = self.state.lock();
        let device = state.devices.by_index.get(&key.device_index())?;
        let data_item = state.data_items.by_index.get(&key.data_item_index())?;
        Some((device.clone(), data_item.clone()))
    }

    /// Number of registered devices
    pub fn device_count(&self) -> usize {
        self.state.lock().devices.by_index.len()
    }

    /// Number of registered data items
    pub fn data_item_count(&self) -> usize {
        self.state.lock().data_items.by_index.len()
    }

    /// Write both tables to `dir`
    pub fn save(&self, dir: &Path) -> Result<()> {
        let (devices, data_items) = {
            let state = self.state.lock();
            (state.devices.entries(), state.data_items.entries())
        };

        FileIndex::write(dir, DEVICES, &devices)?;
        FileIndex::write(dir, DATA_ITEMS, &data_items)?;
        Ok(())
    }

    /// Read both tables from `dir`
    ///
    /// Out-of-range and duplicate entries are dropped.
    pub fn load(dir: &Path) -> Result<Self> {
        let devices = IndexTable::from_entries(FileIndex::read(dir, DEVICES)?, MAX_DEVICES);
        let data_items =
            IndexTable::from_entries(FileIndex::read(dir, DATA_ITEMS)?, DEVICE_KEY_MULTIPLIER);

        debug!(
            devices = devices.by_index.len(),
            data_items = data_items.by_index.len(),
            "key registry loaded"
        );

        Ok(Self {
            state: Mutex::new(RegistryState {
                devices,
                data_items,
            }),
        })
    }
}
