//! Fixed-capacity asset store
//!
//! Assets are kept in an array ordered from least to most recently updated,
//! with a parallel `id -> index` map:
//!
//! - Adding an existing id removes its slot (shifting later assets left) and
//!   appends the new version at the end
//! - Adding a new id to a full store evicts index 0 and notifies observers
//! - Removing an asset is a soft delete: the flag is set and the asset is
//!   re-inserted as the most recent
//!
//! The id map is rebuilt from the array after every mutation.

use crate::memory::now_millis;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// A document-like record stored independently of the observation ring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    /// Unique asset identifier
    pub asset_id: String,
    /// Asset type (e.g. `CuttingTool`)
    pub asset_type: String,
    /// UUID of the owning device
    pub device_uuid: String,
    /// Unix time in milliseconds of the last change
    pub timestamp: i64,
    /// Soft-delete flag
    #[serde(default)]
    pub removed: bool,
    /// Asset document
    pub payload: serde_json::Value,
}

impl AssetRecord {
    /// Create a new asset stamped with the current time
    pub fn new(
        asset_id: impl Into<String>,
        asset_type: impl Into<String>,
        device_uuid: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            asset_id: asset_id.into(),
            asset_type: asset_type.into(),
            device_uuid: device_uuid.into(),
            timestamp: now_millis(),
            removed: false,
            payload,
        }
    }

    /// Whether the asset can be stored
    pub fn is_valid(&self) -> bool {
        !self.asset_id.is_empty() && !self.asset_type.is_empty()
    }
}

/// Placement of an added asset, as reported to observers
#[derive(Debug, Clone, PartialEq)]
pub struct AssetQueueItem {
    /// Array index the asset now occupies
    pub index: usize,
    /// The stored asset
    pub asset: AssetRecord,
    /// Index the asset occupied before this update, if it already existed
    pub original_index: Option<usize>,
}

/// Receives asset store mutations
///
/// Called while the store lock is held: implementations must not block and
/// must not call back into the store.
pub trait AssetObserver: Send + Sync {
    /// An asset was added or moved to the most recent position
    fn on_asset_added(&self, item: &AssetQueueItem);

    /// The asset at `index` was evicted to make room
    fn on_asset_removed(&self, index: usize, asset: &AssetRecord);
}

/// Array and id map guarded by the store lock
struct AssetState {
    /// Assets, least recently updated first
    assets: Vec<AssetRecord>,
    /// Asset id to array index
    index: HashMap<String, usize>,
}

impl AssetState {
    fn rebuild_index(&mut self) {
        self.index = self
            .assets
            .iter()
            .enumerate()
            .map(|(i, asset)| (asset.asset_id.clone(), i))
            .collect();
    }
}

/// LRU-ordered asset array with soft delete
pub struct AssetStore {
    /// Assets and id map
    state: Mutex<AssetState>,
    /// Maximum number of assets
    capacity: usize,
    /// Hooks notified of additions and evictions
    observers: RwLock<Vec<Arc<dyn AssetObserver>>>,
}

impl AssetStore {
    /// Create a store holding at most `capacity` assets
    ///
    /// # Panics
    ///
    /// Panics if capacity is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "asset capacity must be positive");

        Self {
            state: Mutex::new(AssetState {
                assets: Vec::with_capacity(capacity.min(4096)),
                index: HashMap::new(),
            }),
            capacity,
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Register a hook notified of store mutations
    pub fn add_observer(&self, observer: Arc<dyn AssetObserver>) {
        self.observers.write().push(observer);
    }

    /// Maximum number of assets
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored assets, removed ones included
    pub fn asset_count(&self) -> usize {
        self.state.lock().assets.len()
    }

    /// Whether an asset with this id is stored
    pub fn asset_exists(&self, asset_id: &str) -> bool {
        self.state.lock().index.contains_key(asset_id)
    }

    /// Array index of an asset
    pub fn index_of(&self, asset_id: &str) -> Option<usize> {
        self.state.lock().index.get(asset_id).copied()
    }

    /// Clone of an asset by id
    pub fn get_asset(&self, asset_id: &str) -> Option<AssetRecord> {
        let state = self.state.lock();
        state.index.get(asset_id).map(|&i| state.assets[i].clone())
    }

    /// Assets matching the filters, most recently updated first
    ///
    /// Filters apply in order: device, type, removed flag; the result is
    /// then truncated to `count`.
    pub fn get_assets(
        &self,
        device_uuid: Option<&str>,
        asset_type: Option<&str>,
        include_removed: bool,
        count: usize,
    ) -> Vec<AssetRecord> {
        let state = self.state.lock();
        state
            .assets
            .iter()
            .rev()
            .filter(|a| device_uuid.map_or(true, |uuid| a.device_uuid == uuid))
            .filter(|a| asset_type.map_or(true, |t| a.asset_type == t))
            .filter(|a| include_removed || !a.removed)
            .take(count)
            .cloned()
            .collect()
    }

    /// Every asset in array order (least recently updated first)
    pub fn assets(&self) -> Vec<AssetRecord> {
        self.state.lock().assets.clone()
    }

    /// Run `f` over the array and id map under the store lock
    pub(crate) fn with_assets<R>(
        &self,
        f: impl FnOnce(&[AssetRecord], &HashMap<String, usize>) -> R,
    ) -> R {
        let state = self.state.lock();
        f(&state.assets, &state.index)
    }

    /// Store an asset, moving an existing id to the most recent position
    ///
    /// Returns `false` when the asset has no id or type.
    pub fn add_asset(&self, asset: AssetRecord) -> bool {
        if !asset.is_valid() {
            debug!("asset rejected");
            return false;
        }

        let mut state = self.state.lock();
        self.insert(&mut state, asset, true);
        true
    }

    /// Store an asset loaded from disk without notifying observers
    pub fn restore_asset(&self, asset: AssetRecord) -> bool {
        if !asset.is_valid() {
            return false;
        }

        let mut state = self.state.lock();
        self.insert(&mut state, asset, false);
        true
    }

    fn insert(&self, state: &mut AssetState, asset: AssetRecord, notify: bool) {
        let original_index = state.index.get(&asset.asset_id).copied();
        let observers = self.observers.read();

        match original_index {
            Some(original) => {
                // Existing id: compact the array and re-append
                state.assets.remove(original);
            }
            None if state.assets.len() >= self.capacity => {
                // Full: push out the oldest asset
                let evicted = state.assets.remove(0);
                debug!(asset_id = %evicted.asset_id, "asset evicted");
                if notify {
                    for observer in observers.iter() {
                        observer.on_asset_removed(0, &evicted);
                    }
                }
            }
            None => {}
        }

        state.assets.push(asset);
        state.rebuild_index();

        let index = state.assets.len() - 1;
        trace!(asset_id = %state.assets[index].asset_id, index, ?original_index, "asset stored");

        if notify && !observers.is_empty() {
            let item = AssetQueueItem {
                index,
                asset: state.assets[index].clone(),
                original_index,
            };
            for observer in observers.iter() {
                observer.on_asset_added(&item);
            }
        }
    }

    /// Soft-delete an asset and move it to the most recent position
    ///
    /// Returns `false` only when the id is unknown. Removing an asset that is
    /// already removed moves it to the most recent position again.
    pub fn remove_asset(&self, asset_id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(&position) = state.index.get(asset_id) else {
            return false;
        };

        let mut asset = state.assets[position].clone();
        asset.removed = true;

        self.insert(&mut state, asset, true);
        true
    }

    /// Soft-delete the oldest asset of the given type that is not yet removed
    ///
    /// Only one asset is removed per call; returns `false` when none matched.
    pub fn remove_all_assets(&self, asset_type: &str) -> bool {
        let mut state = self.state.lock();
        let Some(mut asset) = state
            .assets
            .iter()
            .find(|a| a.asset_type == asset_type && !a.removed)
            .cloned()
        else {
            return false;
        };

        asset.removed = true;
        self.insert(&mut state, asset, true);
        true
    }
}
