//! MTConnect Buffer - observation sequencing and asset storage for an
//! MTConnect agent, with optional disk persistence.
//!
//! # Overview
//!
//! The crate has two in-memory stores and a persistence layer behind them:
//!
//! 1. An observation buffer that assigns strictly increasing sequence
//!    numbers, archives records in a fixed-capacity ring and keeps the
//!    current value (and active conditions) of every data item
//! 2. An asset store holding a bounded, least-recently-updated ordered set of
//!    asset documents with soft delete
//! 3. File buffers mirroring both stores to disk, fed through bounded queues
//!    and written by a background thread so producers never wait on I/O
//!
//! # Key Features
//!
//! - Gap-free sequence numbering under concurrent producers
//! - Current, point-in-time and range queries over the ring window
//! - DataSet / Table merging and condition list tracking
//! - Compressed, CRC-checked persistence files restored on startup
//!
//! # Usage
//!
//! ```no_run
//! use mtconnect_buffer::{AgentBuffers, BufferConfig, ObservationRecord};
//!
//! let buffers = AgentBuffers::open(BufferConfig::default())?;
//! let key = buffers.registry().key("device-uuid", "spindle-speed")?;
//! let sequence = buffers
//!     .observations()
//!     .add_observation(ObservationRecord::sample(key, 1_700_000_000_000, "1200"));
//! assert!(sequence > 0);
//! buffers.shutdown()?;
//! # Ok::<(), mtconnect_buffer::BufferError>(())
//! ```
//!
//! See the `demos` directory for a complete walkthrough.

#![warn(missing_docs)]

pub mod config;
pub mod daemon;
pub mod disk;
pub mod error;
pub mod memory;

pub use config::{BufferConfig, BufferConfigBuilder};
pub use daemon::{PersistenceWriter, WriterTargets};
pub use disk::assets::AssetFileBuffer;
pub use disk::observations::ObservationFileBuffer;
pub use disk::queue::StatsSnapshot;
pub use error::{BufferError, Result};
pub use memory::assets::{AssetObserver, AssetQueueItem, AssetRecord, AssetStore};
pub use memory::observations::{ObservationBuffer, ObservationObserver, ObservationResults};
pub use memory::registry::KeyRegistry;
pub use memory::{BufferKey, ObservationRecord};

use std::fs;
use std::sync::Arc;
use tracing::{info, warn};

/// Observation buffer, asset store and their persistence, wired together
pub struct AgentBuffers {
    config: BufferConfig,
    observations: Arc<ObservationBuffer>,
    assets: Arc<AssetStore>,
    registry: KeyRegistry,
    observation_files: Option<Arc<ObservationFileBuffer>>,
    asset_files: Option<Arc<AssetFileBuffer>>,
    writer: Option<PersistenceWriter>,
    open_failures: u64,
}

impl AgentBuffers {
    /// Create the buffers, restore persisted state and start the writer
    ///
    /// With both `persist_observations` and `persist_assets` disabled nothing
    /// touches the disk and no thread is started.
    ///
    /// Persistence is best-effort: when the buffer directory cannot be
    /// created, the key tables cannot be read, or a file buffer fails to
    /// load, the failure is logged and counted in `open_failures` and the
    /// affected file buffer is left disabled. Only an invalid configuration
    /// or a failure to spawn the writer thread is returned as an error.
    pub fn open(config: BufferConfig) -> Result<Self> {
        config.validate()?;

        let mut open_failures = 0;
        let mut persist_observations = config.persist_observations;
        let mut persist_assets = config.persist_assets;

        let registry = if persist_observations || persist_assets {
            match fs::create_dir_all(&config.path) {
                Ok(()) => KeyRegistry::load(&config.index_dir()).unwrap_or_else(|e| {
                    open_failed(&mut open_failures, "key tables", &e);
                    KeyRegistry::new()
                }),
                Err(e) => {
                    open_failed(&mut open_failures, "buffer directory", &e.into());
                    persist_observations = false;
                    persist_assets = false;
                    KeyRegistry::new()
                }
            }
        } else {
            KeyRegistry::new()
        };

        let observations = Arc::new(ObservationBuffer::new(config.buffer_size));
        let assets = Arc::new(AssetStore::new(config.asset_buffer_size));
        let mut targets = WriterTargets::default();

        if persist_observations {
            let pages = Arc::new(ObservationFileBuffer::new(
                config.observations_dir(),
                config.use_compression,
                config.max_items_per_write,
                config.queue_capacity,
                config.retention_interval,
            ));
            match pages.load(&observations) {
                Ok(_) => {
                    observations.add_observer(pages.clone());
                    targets.observations = Some((observations.clone(), pages));
                }
                Err(e) => open_failed(&mut open_failures, "observation pages", &e),
            }
        }

        if persist_assets {
            let files = Arc::new(AssetFileBuffer::new(
                config.assets_dir(),
                config.use_compression,
                config.max_items_per_write,
                config.queue_capacity,
            ));
            match files.load(&assets) {
                Ok(_) => {
                    assets.add_observer(files.clone());
                    targets.assets = Some((assets.clone(), files));
                }
                Err(e) => open_failed(&mut open_failures, "asset files", &e),
            }
        }

        let observation_files = targets.observations.as_ref().map(|(_, p)| p.clone());
        let asset_files = targets.assets.as_ref().map(|(_, f)| f.clone());
        let persistent = observation_files.is_some() || asset_files.is_some();

        let writer = if persistent {
            Some(PersistenceWriter::start(targets, config.write_interval)?)
        } else {
            None
        };

        info!(
            buffer_size = config.buffer_size,
            asset_buffer_size = config.asset_buffer_size,
            next_sequence = observations.next_sequence(),
            assets = assets.asset_count(),
            persistent,
            open_failures,
            "agent buffers opened"
        );

        Ok(Self {
            config,
            observations,
            assets,
            registry,
            observation_files,
            asset_files,
            writer,
            open_failures,
        })
    }

    /// Buffers with default settings and no persistence
    pub fn in_memory(buffer_size: usize, asset_buffer_size: usize) -> Result<Self> {
        Self::open(
            BufferConfig::builder()
                .buffer_size(buffer_size)
                .asset_buffer_size(asset_buffer_size)
                .persist_observations(false)
                .persist_assets(false)
                .build(),
        )
    }

    /// Active configuration
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// The observation sequencer
    pub fn observations(&self) -> &Arc<ObservationBuffer> {
        &self.observations
    }

    /// The asset store
    pub fn assets(&self) -> &Arc<AssetStore> {
        &self.assets
    }

    /// Device / data item key assignment
    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    /// Observation persistence counters, when enabled
    pub fn observation_stats(&self) -> Option<StatsSnapshot> {
        self.observation_files.as_ref().map(|f| f.stats())
    }

    /// Asset persistence counters, when enabled
    pub fn asset_stats(&self) -> Option<StatsSnapshot> {
        self.asset_files.as_ref().map(|f| f.stats())
    }

    /// Persistence setup steps that failed during `open`
    pub fn open_failures(&self) -> u64 {
        self.open_failures
    }

    /// Write all queued items and the key tables now
    pub fn flush(&self) -> Result<()> {
        if let Some(writer) = &self.writer {
            writer.flush()?;
            self.registry.save(&self.config.index_dir())?;
        }
        Ok(())
    }

    /// Stop the writer, flushing everything still queued
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.stop()?;
            self.registry.save(&self.config.index_dir())?;
        }
        Ok(())
    }
}

impl Drop for AgentBuffers {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "failed to stop agent buffers cleanly");
        }
    }
}

fn open_failed(failures: &mut u64, what: &'static str, error: &BufferError) {
    warn!(what, error = %error, "persistence unavailable, continuing in memory");
    *failures += 1;
}

/// Re-exported data types used in the API
pub mod types {
    pub use crate::memory::values::{ObservationValue, NOT_SPECIFIED, UNAVAILABLE};
    pub use crate::memory::{Category, ConditionLevel, Representation};
}
