//! Buffer configuration
//!
//! `BufferConfig` carries the scalar settings consumed by the observation
//! ring, the asset store and the persistence writer. Every field has a serde
//! default so a partial JSON document is enough to configure an agent.

use crate::error::{BufferError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the observation and asset buffers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferConfig {
    /// Root directory for persisted buffers
    #[serde(default = "default_path")]
    pub path: PathBuf,

    /// Capacity of the observation ring (number of records)
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Capacity of the asset store (number of assets)
    #[serde(default = "default_asset_buffer_size")]
    pub asset_buffer_size: usize,

    /// Period of the persistence writer
    #[serde(default = "default_write_interval", with = "duration_ms")]
    pub write_interval: Duration,

    /// Minimum period between observation page retention sweeps
    #[serde(default = "default_retention_interval", with = "duration_ms")]
    pub retention_interval: Duration,

    /// Maximum number of queued items written per writer tick
    #[serde(default = "default_max_items_per_write")]
    pub max_items_per_write: usize,

    /// Maximum number of pending items per persistence queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Whether persisted files are gzip compressed
    #[serde(default = "default_true")]
    pub use_compression: bool,

    /// Whether stored observations are mirrored to disk
    #[serde(default = "default_true")]
    pub persist_observations: bool,

    /// Whether assets are mirrored to disk
    #[serde(default = "default_true")]
    pub persist_assets: bool,
}

fn default_path() -> PathBuf {
    PathBuf::from("buffer")
}

fn default_buffer_size() -> usize {
    150_000
}

fn default_asset_buffer_size() -> usize {
    1_000
}

fn default_write_interval() -> Duration {
    Duration::from_millis(1_000)
}

fn default_retention_interval() -> Duration {
    Duration::from_millis(10_000)
}

fn default_max_items_per_write() -> usize {
    1_000
}

fn default_queue_capacity() -> usize {
    100_000
}

fn default_true() -> bool {
    true
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            buffer_size: default_buffer_size(),
            asset_buffer_size: default_asset_buffer_size(),
            write_interval: default_write_interval(),
            retention_interval: default_retention_interval(),
            max_items_per_write: default_max_items_per_write(),
            queue_capacity: default_queue_capacity(),
            use_compression: true,
            persist_observations: true,
            persist_assets: true,
        }
    }
}

impl BufferConfig {
    /// Start a configuration builder
    pub fn builder() -> BufferConfigBuilder {
        BufferConfigBuilder::default()
    }

    /// Small buffers and a fast writer rooted at `path`, for tests
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            buffer_size: 1_000,
            asset_buffer_size: 100,
            write_interval: Duration::from_millis(20),
            retention_interval: Duration::from_millis(100),
            max_items_per_write: 100,
            queue_capacity: 10_000,
            use_compression: true,
            persist_observations: true,
            persist_assets: true,
        }
    }

    /// Load a configuration from a JSON document on disk
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every capacity and interval is usable
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(BufferError::InvalidConfig("bufferSize must be greater than zero".into()));
        }
        if self.asset_buffer_size == 0 {
            return Err(BufferError::InvalidConfig(
                "assetBufferSize must be greater than zero".into(),
            ));
        }
        if self.max_items_per_write == 0 {
            return Err(BufferError::InvalidConfig(
                "maxItemsPerWrite must be greater than zero".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(BufferError::InvalidConfig(
                "queueCapacity must be greater than zero".into(),
            ));
        }
        if self.write_interval.is_zero() {
            return Err(BufferError::InvalidConfig(
                "writeInterval must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Directory holding persisted asset files
    pub fn assets_dir(&self) -> PathBuf {
        self.path.join("assets")
    }

    /// Directory holding persisted observation pages
    pub fn observations_dir(&self) -> PathBuf {
        self.path.join("observations")
    }

    /// Directory holding the device / data item index files
    pub fn index_dir(&self) -> PathBuf {
        self.path.join("index")
    }
}

/// Builder for `BufferConfig`
#[derive(Debug, Default)]
pub struct BufferConfigBuilder {
    config: BufferConfig,
}

impl BufferConfigBuilder {
    /// Set the storage path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Set the observation ring capacity
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    /// Set the asset store capacity
    pub fn asset_buffer_size(mut self, size: usize) -> Self {
        self.config.asset_buffer_size = size;
        self
    }

    /// Set the writer period
    pub fn write_interval(mut self, interval: Duration) -> Self {
        self.config.write_interval = interval;
        self
    }

    /// Set the retention sweep period
    pub fn retention_interval(mut self, interval: Duration) -> Self {
        self.config.retention_interval = interval;
        self
    }

    /// Set the number of items written per tick
    pub fn max_items_per_write(mut self, count: usize) -> Self {
        self.config.max_items_per_write = count;
        self
    }

    /// Set the persistence queue bound
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Compress persisted files
    pub fn use_compression(mut self, enabled: bool) -> Self {
        self.config.use_compression = enabled;
        self
    }

    /// Mirror stored observations to disk
    pub fn persist_observations(mut self, enabled: bool) -> Self {
        self.config.persist_observations = enabled;
        self
    }

    /// Mirror assets to disk
    pub fn persist_assets(mut self, enabled: bool) -> Self {
        self.config.persist_assets = enabled;
        self
    }

    /// Finish the configuration
    pub fn build(self) -> BufferConfig {
        self.config
    }
}
