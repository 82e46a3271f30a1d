//! Tests for observation sequencing, current values and range queries

use crossbeam_utils::thread;
use mtconnect_buffer::memory::values::{data_set_key, COUNT};
use mtconnect_buffer::types::{Category, ConditionLevel, Representation};
use mtconnect_buffer::{BufferKey, ObservationBuffer, ObservationRecord};
use std::collections::HashSet;

fn key(raw: u32) -> BufferKey {
    BufferKey::from_raw(raw)
}

/// Test the capacity-3 walkthrough: sequencing, current value and range
#[test]
fn test_capacity_three_scenario() {
    let buffer = ObservationBuffer::new(3);

    let sequences: Vec<u64> = [10_001, 10_002, 10_001]
        .iter()
        .enumerate()
        .map(|(i, &raw)| {
            let timestamp = 100 + i as i64;
            buffer.add_observation(ObservationRecord::sample(key(raw), timestamp, i.to_string()))
        })
        .collect();
    assert_eq!(sequences, vec![1, 2, 3]);

    let current = buffer.get_current_observations(&[key(10_001)]);
    assert!(current.is_valid);
    assert_eq!(current.len(), 1);
    assert_eq!(current.observations[0].sequence, 3);

    let range = buffer.get_observations(&[key(10_001), key(10_002)], Some(1), Some(3), 100);
    assert!(range.is_valid);
    let seen: Vec<(u64, u32)> = range
        .observations
        .iter()
        .map(|r| (r.sequence, r.key.raw()))
        .collect();
    assert_eq!(seen, vec![(1, 10_001), (2, 10_002), (3, 10_001)]);
    assert_eq!(range.first_observation_sequence, 1);
    assert_eq!(range.last_observation_sequence, 3);
}

/// Test that the latest value of each key is returned regardless of insertion order
#[test]
fn test_current_values_any_order() {
    let buffer = ObservationBuffer::new(100);
    let keys = [key(5), key(1), key(3)];

    for (i, k) in keys.iter().enumerate() {
        buffer.add_observation(ObservationRecord::event(*k, 10, format!("v{i}")));
    }

    let current = buffer.get_current_observations(&keys);
    assert_eq!(current.len(), 3);

    // Ascending key order
    let values: Vec<(u32, &str)> = current
        .observations
        .iter()
        .map(|r| (r.key.raw(), r.value("Result").unwrap()))
        .collect();
    assert_eq!(values, vec![(1, "v1"), (3, "v2"), (5, "v0")]);
}

/// Test that overwriting leaves exactly `capacity` records reachable
#[test]
fn test_ring_overwrite_bounds() {
    let capacity = 8;
    let buffer = ObservationBuffer::new(capacity);

    for i in 0..=capacity as i64 {
        buffer.add_observation(ObservationRecord::sample(key(1), 1 + i, i.to_string()));
    }

    assert_eq!(buffer.len(), capacity);
    assert_eq!(buffer.last_sequence(), capacity as u64 + 1);
    assert_eq!(
        buffer.first_sequence(),
        buffer.last_sequence() - capacity as u64 + 1
    );

    let all = buffer.get_observations(&[], None, None, usize::MAX);
    assert_eq!(all.len(), capacity);
    assert_eq!(all.observations[0].sequence, 2);

    // The overwritten sequence is no longer addressable
    assert!(!buffer.get_observations(&[], Some(1), None, 10).is_valid);
}

/// Test that invalid records are rejected without consuming a sequence
#[test]
fn test_rejected_records() {
    let buffer = ObservationBuffer::new(4);

    assert_eq!(buffer.add_observation(ObservationRecord::sample(key(1), 0, "1")), 0);
    assert_eq!(
        buffer.add_observation(ObservationRecord::new(
            key(1),
            Category::Sample,
            Representation::Value,
            10
        )),
        0
    );
    assert_eq!(
        buffer.add_observation(ObservationRecord::sample(BufferKey::from_raw(u32::MAX), 10, "1")),
        0
    );

    assert_eq!(buffer.add_observation(ObservationRecord::sample(key(1), 10, "1")), 1);
}

/// Test that a WARNING suppresses the NORMAL entry of the same key
#[test]
fn test_condition_suppression() {
    let buffer = ObservationBuffer::new(10);
    let k = key(7);

    buffer.add_observation(ObservationRecord::condition(k, 1, ConditionLevel::Normal, Some("A")));
    buffer.add_observation(ObservationRecord::condition(k, 2, ConditionLevel::Warning, Some("B")));

    let current = buffer.get_current_observations(&[k]);
    let levels: Vec<ConditionLevel> = current
        .observations
        .iter()
        .filter_map(|r| r.level())
        .collect();
    assert_eq!(levels, vec![ConditionLevel::Warning]);
    assert_eq!(current.observations[0].native_code(), Some("B"));
}

/// Test that a DataSet update is merged into the current value only
#[test]
fn test_data_set_current_is_merged() {
    let buffer = ObservationBuffer::new(10);
    let k = key(9);
    let record = |entries: &[(&str, &str)]| {
        entries.iter().fold(
            ObservationRecord::new(k, Category::Event, Representation::DataSet, 5),
            |r, (name, v)| r.with_value(data_set_key(name), *v),
        )
    };

    buffer.add_observation(record(&[("a", "1"), ("b", "2")]));
    buffer.add_observation(record(&[("c", "3")]));

    let current = buffer.get_current_observations(&[k]);
    let merged = &current.observations[0];
    assert_eq!(merged.value(&data_set_key("a")), Some("1"));
    assert_eq!(merged.value(&data_set_key("c")), Some("3"));
    assert_eq!(merged.value(COUNT), Some("3"));

    // The archive keeps the update as produced
    let archived = buffer.get_observations(&[k], Some(2), Some(2), 10);
    assert_eq!(archived.observations[0].value(&data_set_key("a")), None);
}

/// Test point-in-time queries against the archive
#[test]
fn test_point_in_time() {
    let buffer = ObservationBuffer::new(10);
    buffer.add_observation(ObservationRecord::sample(key(1), 10, "a1"));
    buffer.add_observation(ObservationRecord::sample(key(2), 11, "b1"));
    buffer.add_observation(ObservationRecord::sample(key(1), 12, "a2"));

    let at_two = buffer.get_current_observations_at(&[key(1), key(2)], 2);
    assert!(at_two.is_valid);
    let values: Vec<&str> = at_two
        .observations
        .iter()
        .map(|r| r.value("Result").unwrap())
        .collect();
    assert_eq!(values, vec!["a1", "b1"]);

    assert!(!buffer.get_current_observations_at(&[key(1)], 4).is_valid);
    assert!(!buffer.get_current_observations_at(&[key(1)], 0).is_valid);
}

/// Test that range queries on an empty buffer are invalid but current queries are not
#[test]
fn test_empty_buffer_queries() {
    let buffer = ObservationBuffer::new(10);

    let range = buffer.get_observations(&[], None, None, 10);
    assert!(!range.is_valid);
    assert_eq!(range.next_sequence, 1);

    let current = buffer.get_current_observations(&[]);
    assert!(current.is_valid);
    assert!(current.is_empty());
}

/// Test that concurrent producers receive a contiguous run of sequences
#[test]
fn test_concurrent_producers_contiguous() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 500;

    let buffer = ObservationBuffer::new(THREADS * PER_THREAD);

    let sequences: Vec<u64> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let buffer = &buffer;
                s.spawn(move |_| {
                    (0..PER_THREAD)
                        .map(|i| {
                            buffer.add_observation(ObservationRecord::sample(
                                key(t as u32),
                                1 + i as i64,
                                i.to_string(),
                            ))
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    })
    .unwrap();

    let unique: HashSet<u64> = sequences.iter().copied().collect();
    assert_eq!(unique.len(), THREADS * PER_THREAD);
    assert_eq!(*unique.iter().min().unwrap(), 1);
    assert_eq!(*unique.iter().max().unwrap(), (THREADS * PER_THREAD) as u64);

    // The ring holds them in sequence order
    let all = buffer.get_observations(&[], None, None, usize::MAX);
    assert!(all.observations.windows(2).all(|w| w[0].sequence + 1 == w[1].sequence));

    // Each producer's records keep their relative order
    for t in 0..THREADS {
        let own = buffer.get_observations(&[key(t as u32)], None, None, usize::MAX);
        let results: Vec<String> = own
            .observations
            .iter()
            .map(|r| r.value("Result").unwrap().to_string())
            .collect();
        let expected: Vec<String> = (0..PER_THREAD).map(|i| i.to_string()).collect();
        assert_eq!(results, expected);
    }
}

/// Test that skipped sequences leave a gap the queries tolerate
#[test]
fn test_increment_sequence_gap() {
    let buffer = ObservationBuffer::new(10);
    buffer.add_observation(ObservationRecord::sample(key(1), 10, "1"));
    buffer.increment_sequence(5);
    let sequence = buffer.add_observation(ObservationRecord::sample(key(1), 11, "2"));
    assert_eq!(sequence, 7);

    let range = buffer.get_observations(&[key(1)], Some(2), None, 10);
    assert!(range.is_valid);
    assert_eq!(range.len(), 1);
    assert_eq!(range.observations[0].sequence, 7);
}
