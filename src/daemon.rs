//! Background persistence writer
//!
//! A single named thread wakes every `write_interval`, drains up to
//! `max_items_per_write` items from each persistence queue and writes them.
//! Observation page retention runs on the same thread, throttled by
//! `retention_interval`. Stopping the writer wakes the thread immediately,
//! joins it, and then flushes whatever is still queued.

use crate::disk::assets::AssetFileBuffer;
use crate::disk::observations::ObservationFileBuffer;
use crate::error::Result;
use crate::memory::assets::AssetStore;
use crate::memory::observations::ObservationBuffer;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the writer persists
#[derive(Default, Clone)]
pub struct WriterTargets {
    /// Observation ring and its page writer
    pub observations: Option<(Arc<ObservationBuffer>, Arc<ObservationFileBuffer>)>,
    /// Asset store and its file writer
    pub assets: Option<(Arc<AssetStore>, Arc<AssetFileBuffer>)>,
}

impl WriterTargets {
    /// One writer tick
    fn tick(&self) {
        if let Some((buffer, pages)) = &self.observations {
            if let Err(e) = pages.flush() {
                warn!(error = %e, "observation flush failed");
            }
            if let Err(e) = pages.retain(buffer.first_sequence()) {
                warn!(error = %e, "observation retention failed");
            }
        }

        if let Some((store, files)) = &self.assets {
            if let Err(e) = files.flush(store) {
                warn!(error = %e, "asset flush failed");
            }
        }
    }

    /// Write everything still queued
    fn drain(&self) -> Result<()> {
        if let Some((buffer, pages)) = &self.observations {
            let written = pages.flush_all()?;
            pages.remove_expired(buffer.first_sequence())?;
            debug!(written, "observation queue drained");
        }
        if let Some((store, files)) = &self.assets {
            let written = files.flush_all(store)?;
            debug!(written, "asset queue drained");
        }
        Ok(())
    }
}

/// State shared with the writer thread
struct Shared {
    stopped: Mutex<bool>,
    wake: Condvar,
    targets: WriterTargets,
}

/// Handle to the background persistence thread
pub struct PersistenceWriter {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PersistenceWriter {
    /// Spawn the writer thread
    pub fn start(targets: WriterTargets, interval: Duration) -> Result<Self> {
        let shared = Arc::new(Shared {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
            targets,
        });

        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("mtconnect-buffer-writer".to_string())
            .spawn(move || run(&thread_shared, interval))?;

        debug!(interval_ms = interval.as_millis() as u64, "persistence writer started");
        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Whether the thread is still running
    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Synchronously write everything queued so far
    pub fn flush(&self) -> Result<()> {
        self.shared.targets.drain()
    }

    /// Stop the thread and flush the remaining queue contents
    ///
    /// Calling `stop` more than once is harmless.
    pub fn stop(&self) -> Result<()> {
        let Some(handle) = self.handle.lock().take() else {
            return Ok(());
        };

        *self.shared.stopped.lock() = true;
        self.shared.wake.notify_all();

        if handle.join().is_err() {
            warn!("persistence writer thread panicked");
        }

        self.shared.targets.drain()?;
        info!("persistence writer stopped");
        Ok(())
    }
}

impl Drop for PersistenceWriter {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "final flush failed");
        }
    }
}

fn run(shared: &Shared, interval: Duration) {
    loop {
        {
            let mut stopped = shared.stopped.lock();
            if !*stopped {
                shared.wake.wait_for(&mut stopped, interval);
            }
            if *stopped {
                return;
            }
        }

        shared.targets.tick();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{BufferKey, ObservationRecord};
    use tempfile::tempdir;

    #[test]
    fn test_writer_persists_in_background() {
        let dir = tempdir().unwrap();
        let buffer = Arc::new(ObservationBuffer::new(100));
        let pages = Arc::new(ObservationFileBuffer::new(
            dir.path(),
            true,
            100,
            100,
            Duration::from_secs(60),
        ));
        buffer.add_observer(pages.clone());

        let writer = PersistenceWriter::start(
            WriterTargets {
                observations: Some((buffer.clone(), pages.clone())),
                assets: None,
            },
            Duration::from_millis(10),
        )
        .unwrap();

        let key = BufferKey::new(0, 1).unwrap();
        buffer.add_observation(ObservationRecord::sample(key, 10, "1"));

        let mut waited = 0;
        while pages.stats().written < 1 && waited < 200 {
            thread::sleep(Duration::from_millis(10));
            waited += 1;
        }
        assert_eq!(pages.pending(), 0);
        assert_eq!(pages.stats().written, 1);

        writer.stop().unwrap();
        assert!(!writer.is_running());
    }

    #[test]
    fn test_stop_drains_queue() {
        let dir = tempdir().unwrap();
        let buffer = Arc::new(ObservationBuffer::new(100));
        let pages = Arc::new(ObservationFileBuffer::new(
            dir.path(),
            false,
            1,
            100,
            Duration::from_secs(60),
        ));
        buffer.add_observer(pages.clone());

        let writer = PersistenceWriter::start(
            WriterTargets {
                observations: Some((buffer.clone(), pages.clone())),
                assets: None,
            },
            Duration::from_secs(3600),
        )
        .unwrap();

        let key = BufferKey::new(0, 1).unwrap();
        for ts in 1..=5 {
            buffer.add_observation(ObservationRecord::sample(key, ts, "1"));
        }

        writer.stop().unwrap();
        assert_eq!(pages.pending(), 0);
        assert_eq!(pages.stats().written, 5);

        // Second stop is a no-op
        writer.stop().unwrap();
    }
}
