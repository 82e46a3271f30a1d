//! Tests for restoring buffers from disk across restarts

use mtconnect_buffer::{AgentBuffers, AssetRecord, BufferConfig, ObservationRecord};
use serde_json::json;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn config(path: &Path, compress: bool) -> BufferConfig {
    let mut config = BufferConfig::for_testing(path);
    config.use_compression = compress;
    config
}

/// Test that an asset survives a restart unchanged, with and without compression
#[test]
fn test_asset_round_trip() {
    for compress in [true, false] {
        let dir = tempdir().unwrap();
        let original = AssetRecord::new(
            "tool-1",
            "CuttingTool",
            "device-uuid",
            json!({ "toolId": "T1", "life": [{ "type": "MINUTES", "value": 120 }] }),
        );

        {
            let buffers = AgentBuffers::open(config(dir.path(), compress)).unwrap();
            assert!(buffers.assets().add_asset(original.clone()));
            buffers.shutdown().unwrap();
        }

        let buffers = AgentBuffers::open(config(dir.path(), compress)).unwrap();
        let restored = buffers.assets().get_asset("tool-1").unwrap();
        assert_eq!(restored, original);
        assert_eq!(buffers.assets().asset_count(), 1);
    }
}

/// Test that compressed and plain files can be read by either setting
#[test]
fn test_compression_is_transparent_on_load() {
    let dir = tempdir().unwrap();
    {
        let buffers = AgentBuffers::open(config(dir.path(), true)).unwrap();
        buffers
            .assets()
            .add_asset(AssetRecord::new("a", "File", "d", json!({})));
        buffers.shutdown().unwrap();
    }

    let buffers = AgentBuffers::open(config(dir.path(), false)).unwrap();
    assert!(buffers.assets().asset_exists("a"));
}

/// Test that observations and the sequence counter survive a restart
#[test]
fn test_observation_restart() {
    let dir = tempdir().unwrap();
    let last;
    {
        let buffers = AgentBuffers::open(config(dir.path(), true)).unwrap();
        let key = buffers.registry().key("device-uuid", "Xpos").unwrap();
        for i in 0..20 {
            buffers
                .observations()
                .add_observation(ObservationRecord::sample(key, 1_000 + i, i.to_string()));
        }
        last = buffers.observations().last_sequence();
        buffers.shutdown().unwrap();
    }

    let buffers = AgentBuffers::open(config(dir.path(), true)).unwrap();
    let key = buffers.registry().lookup("device-uuid", "Xpos").unwrap();

    assert_eq!(buffers.observations().last_sequence(), last);
    assert_eq!(buffers.observations().next_sequence(), last + 1);

    let current = buffers.observations().get_current_observations(&[key]);
    assert_eq!(current.observations[0].value("Result"), Some("19"));

    let range = buffers.observations().get_observations(&[key], None, None, 100);
    assert_eq!(range.len(), 20);
}

/// Test that evictions before shutdown are reflected on disk
#[test]
fn test_evicted_assets_not_restored() {
    let dir = tempdir().unwrap();
    let mut cfg = config(dir.path(), true);
    cfg.asset_buffer_size = 2;

    {
        let buffers = AgentBuffers::open(cfg.clone()).unwrap();
        for id in ["a", "b", "c"] {
            buffers
                .assets()
                .add_asset(AssetRecord::new(id, "T", "d", json!({ "id": id })));
        }
        buffers.shutdown().unwrap();
    }

    assert_eq!(fs::read_dir(cfg.assets_dir()).unwrap().count(), 2);

    let buffers = AgentBuffers::open(cfg).unwrap();
    assert!(!buffers.assets().asset_exists("a"));
    assert_eq!(buffers.assets().index_of("b"), Some(0));
    assert_eq!(buffers.assets().index_of("c"), Some(1));
}

/// Test that disabling persistence writes nothing
#[test]
fn test_in_memory_touches_no_disk() {
    let dir = tempdir().unwrap();
    let mut cfg = config(&dir.path().join("root"), true);
    cfg.persist_assets = false;
    cfg.persist_observations = false;

    let buffers = AgentBuffers::open(cfg).unwrap();
    buffers
        .assets()
        .add_asset(AssetRecord::new("a", "T", "d", json!({})));
    buffers.shutdown().unwrap();

    assert!(!dir.path().join("root").exists());
}

/// Test that an unusable buffer directory leaves the in-memory buffers working
#[test]
fn test_open_with_unusable_directory_runs_in_memory() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("agent");
    fs::write(&blocker, b"not a directory").unwrap();

    let buffers = AgentBuffers::open(config(&blocker, true)).unwrap();
    assert_eq!(buffers.open_failures(), 1);
    assert!(buffers.observation_stats().is_none());
    assert!(buffers.asset_stats().is_none());

    let key = buffers.registry().key("device-uuid", "Xact").unwrap();
    assert_eq!(
        buffers
            .observations()
            .add_observation(ObservationRecord::sample(key, 1, "1.0")),
        1
    );
    assert!(buffers
        .assets()
        .add_asset(AssetRecord::new("a", "File", "device-uuid", json!({}))));

    buffers.flush().unwrap();
    buffers.shutdown().unwrap();
    assert_eq!(fs::read(&blocker).unwrap(), b"not a directory");
}

/// Test that a failing asset directory disables only asset persistence
#[test]
fn test_unreadable_asset_directory_disables_asset_files() {
    let dir = tempdir().unwrap();
    let base = config(dir.path(), false);
    fs::write(base.assets_dir(), b"in the way").unwrap();

    let buffers = AgentBuffers::open(base).unwrap();
    assert_eq!(buffers.open_failures(), 1);
    assert!(buffers.asset_stats().is_none());
    assert!(buffers.observation_stats().is_some());

    let key = buffers.registry().key("device-uuid", "Xact").unwrap();
    buffers
        .observations()
        .add_observation(ObservationRecord::sample(key, 1, "1.0"));
    buffers
        .assets()
        .add_asset(AssetRecord::new("a", "File", "device-uuid", json!({})));
    buffers.flush().unwrap();
    assert_eq!(buffers.observation_stats().unwrap().written, 1);
    assert!(buffers.assets().asset_exists("a"));
    buffers.shutdown().unwrap();
}
