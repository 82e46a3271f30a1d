//! Basic usage example for the MTConnect buffers
//!
//! This example demonstrates:
//! 1. Opening the buffers with a persistence directory
//! 2. Registering data items and producing observations from several threads
//! 3. Querying current values, a sequence range and a point in time
//! 4. Storing, updating and removing assets
//! 5. Shutting down and reopening to restore the persisted state
//!
//! Set `RUST_LOG=mtconnect_buffer=debug` to watch the persistence writer.

use mtconnect_buffer::memory::values::data_set_key;
use mtconnect_buffer::types::{Category, ConditionLevel, Representation};
use mtconnect_buffer::{AgentBuffers, AssetRecord, BufferConfig, ObservationRecord};
use serde_json::json;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let dir = tempfile::tempdir()?;
    let config = BufferConfig::builder()
        .path(dir.path().join("agent"))
        .buffer_size(1_024)
        .asset_buffer_size(16)
        .write_interval(Duration::from_millis(50))
        .build();

    let buffers = AgentBuffers::open(config.clone())?;

    let registry = buffers.registry();
    let position = registry.key("mill-1", "Xact")?;
    let speed = registry.key("mill-1", "Sspeed")?;
    let system = registry.key("mill-1", "system")?;
    let variables = registry.key("mill-1", "vars")?;
    let vibration = registry.key("mill-1", "vibration")?;

    println!("Producing observations from two threads...");
    thread::scope(|s| {
        for (key, scale) in [(position, 0.5), (speed, 100.0)] {
            let buffers = &buffers;
            s.spawn(move || {
                for i in 0..100 {
                    let value = format!("{:.1}", i as f64 * scale);
                    buffers
                        .observations()
                        .add_observation(ObservationRecord::sample(key, 1_000 + i, value));
                }
            });
        }
    });

    let observations = buffers.observations();
    observations.add_observation(
        ObservationRecord::condition(system, 2_000, ConditionLevel::Warning, Some("OVERTEMP"))
            .with_condition_details("2", "HIGH", "c-17", "Spindle temperature above limit"),
    );
    observations.add_observation(ObservationRecord::time_series(
        vibration,
        2_000,
        1_000.0,
        (0..8).map(|i| format!("{:.3}", (i as f64 * 0.8).sin())),
    ));
    observations.add_observation(
        ObservationRecord::new(variables, Category::Event, Representation::DataSet, 2_001)
            .with_value(data_set_key("feed"), "120")
            .with_value(data_set_key("tool"), "T4"),
    );
    observations.add_observation(
        ObservationRecord::new(variables, Category::Event, Representation::DataSet, 2_002)
            .with_value(data_set_key("tool"), "T7"),
    );

    let current = observations.get_current_observations(&[]);
    println!("Current values (next sequence {}):", current.next_sequence);
    for record in &current.observations {
        println!("  {} @ {}: {:?}", record.key, record.sequence, record.values);
    }

    let series = observations.get_current_observations(&[vibration]);
    if let Some(record) = series.observations.first() {
        println!("Vibration samples: {:?}", record.time_series_samples());
    }

    let range = observations.get_observations(&[position], Some(10), Some(60), 5);
    println!(
        "First {} position samples between 10 and 60: {:?}",
        range.len(),
        range.observations.iter().map(|r| r.sequence).collect::<Vec<_>>()
    );

    let at = observations.get_current_observations_at(&[position, speed], 100);
    println!("State at sequence 100: {} records", at.len());

    let assets = buffers.assets();
    assets.add_asset(AssetRecord::new(
        "T4",
        "CuttingTool",
        "mill-1",
        json!({ "toolId": "T4", "life": 120 }),
    ));
    assets.add_asset(AssetRecord::new(
        "T7",
        "CuttingTool",
        "mill-1",
        json!({ "toolId": "T7", "life": 80 }),
    ));
    assets.remove_asset("T4");
    println!(
        "Active cutting tools: {:?}",
        assets
            .get_assets(None, Some("CuttingTool"), false, 10)
            .iter()
            .map(|a| a.asset_id.as_str())
            .collect::<Vec<_>>()
    );

    let stats = buffers.observation_stats();
    buffers.shutdown()?;
    println!("Shut down, observation writer stats before final flush: {stats:?}");

    let reopened = AgentBuffers::open(config)?;
    println!(
        "Reopened: next sequence {}, {} assets, T4 removed = {}",
        reopened.observations().next_sequence(),
        reopened.assets().asset_count(),
        reopened
            .assets()
            .get_asset("T4")
            .map(|a| a.removed)
            .unwrap_or_default()
    );
    reopened.shutdown()?;

    Ok(())
}
