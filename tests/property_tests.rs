//! Property-based tests for sequencing and current-value merging

use mtconnect_buffer::memory::current::merge_observation;
use mtconnect_buffer::memory::values::{data_set_key, parse_data_set_key, COUNT};
use mtconnect_buffer::types::{Category, Representation};
use mtconnect_buffer::{AssetRecord, AssetStore, BufferKey, ObservationBuffer, ObservationRecord};
use proptest::prelude::*;
use std::collections::BTreeSet;

fn data_set(entries: &[(String, String)]) -> ObservationRecord {
    entries.iter().fold(
        ObservationRecord::new(BufferKey::from_raw(1), Category::Event, Representation::DataSet, 1),
        |record, (k, v)| record.with_value(data_set_key(k), v.clone()),
    )
}

fn entries() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec(("[a-e]", "[0-9]{1,3}"), 1..6)
}

proptest! {
    /// Sequences are 1..=n in insertion order, and the ring keeps the newest `capacity`
    #[test]
    fn prop_sequences_contiguous(
        keys in prop::collection::vec(0u32..50, 1..200),
        capacity in 1usize..64,
    ) {
        let buffer = ObservationBuffer::new(capacity);

        for (i, raw) in keys.iter().enumerate() {
            let sequence = buffer.add_observation(ObservationRecord::sample(
                BufferKey::from_raw(*raw),
                1,
                i.to_string(),
            ));
            prop_assert_eq!(sequence, i as u64 + 1);
        }

        let stored = keys.len().min(capacity);
        prop_assert_eq!(buffer.len(), stored);

        let all = buffer.get_observations(&[], None, None, usize::MAX);
        prop_assert!(all.is_valid);
        prop_assert_eq!(all.len(), stored);
        prop_assert_eq!(all.first_observation_sequence, (keys.len() - stored) as u64 + 1);
        prop_assert_eq!(all.last_observation_sequence, keys.len() as u64);
    }

    /// Merging the same DataSet update twice gives the same entries as merging it once
    #[test]
    fn prop_data_set_merge_idempotent(base in entries(), update in entries()) {
        let previous = merge_observation(&data_set(&[]), &data_set(&base));
        let incoming = data_set(&update);

        let once = merge_observation(&previous, &incoming);
        let twice = merge_observation(&once, &incoming);
        prop_assert_eq!(&once.values, &twice.values);

        let active: BTreeSet<&str> = once
            .values
            .iter()
            .filter_map(|v| parse_data_set_key(&v.key))
            .collect();
        let count = active.len().to_string();
        prop_assert_eq!(once.value(COUNT), Some(count.as_str()));
    }

    /// The store never exceeds capacity and always keeps the newest ids
    #[test]
    fn prop_asset_store_keeps_newest(
        ids in prop::collection::vec(0u8..20, 1..100),
        capacity in 1usize..10,
    ) {
        let store = AssetStore::new(capacity);
        for id in &ids {
            store.add_asset(AssetRecord::new(id.to_string(), "T", "d", serde_json::Value::Null));
        }

        prop_assert!(store.asset_count() <= capacity);

        // The most recently touched distinct ids, newest first
        let mut expected = Vec::new();
        for id in ids.iter().rev() {
            let id = id.to_string();
            if !expected.contains(&id) {
                expected.push(id);
            }
        }
        expected.truncate(capacity);

        let actual: Vec<String> = store
            .get_assets(None, None, true, usize::MAX)
            .into_iter()
            .map(|a| a.asset_id)
            .collect();
        prop_assert_eq!(actual, expected);
    }
}
