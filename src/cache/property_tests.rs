//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the store's byte accounting and the envelope codec.

use proptest::prelude::*;
use std::time::Duration;

use crate::cache::{validate_segment_name, Envelope, Key, Store};
use crate::error::CacheError;

// == Strategies ==
fn segment_strategy() -> impl Strategy<Value = String> {
    "[a-c]{1,2}"
}

fn id_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9]{1,4}"
}

fn value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{0,64}"
}

#[derive(Debug, Clone)]
enum StoreOp {
    Insert { key: Key, value: String },
    Remove { key: Key },
}

fn key_strategy() -> impl Strategy<Value = Key> {
    (segment_strategy(), id_strategy()).prop_map(|(segment, id)| Key::new(segment, id))
}

fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        3 => (key_strategy(), value_strategy())
            .prop_map(|(key, value)| StoreOp::Insert { key, value }),
        1 => key_strategy().prop_map(|key| StoreOp::Remove { key }),
    ]
}

fn summed_size(store: &Store) -> u64 {
    store
        .iter()
        .map(|(_, envelope)| envelope.accounted_size())
        .sum()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Running total equals the sum of live envelope sizes after every operation
    #[test]
    fn prop_byte_total_matches_live_entries(
        ops in prop::collection::vec(store_op_strategy(), 1..80),
        limit in prop_oneof![Just(0u64), 200u64..2000],
    ) {
        let mut store = Store::new();

        for op in ops {
            match op {
                StoreOp::Insert { key, value } => {
                    let envelope = Envelope::encode(&key, &value, Duration::from_secs(60), true).unwrap();
                    let before = store.get(&key).cloned();

                    match store.insert(&key, envelope, limit) {
                        Ok(_) => {}
                        Err(CacheError::CapacityExceeded { .. }) => {
                            // Rejected writes keep whatever was there
                            prop_assert_eq!(store.get(&key).cloned(), before);
                        }
                        Err(e) => prop_assert!(false, "unexpected error: {}", e),
                    }
                }
                StoreOp::Remove { key } => {
                    store.remove(&key);
                }
            }

            prop_assert_eq!(store.byte_size(), summed_size(&store));
            if limit > 0 {
                prop_assert!(store.byte_size() <= limit, "{} exceeds {}", store.byte_size(), limit);
            }
        }
    }

    // Restoring a serialized store reproduces entries and byte total
    #[test]
    fn prop_document_restore_preserves_totals(
        entries in prop::collection::vec((key_strategy(), value_strategy()), 0..30),
    ) {
        let mut store = Store::new();
        for (key, value) in entries {
            let envelope = Envelope::encode(&key, &value, Duration::from_secs(60), true).unwrap();
            store.insert(&key, envelope, 0).unwrap();
        }

        let restored = Store::from_json(&store.to_json().unwrap()).unwrap();

        prop_assert_eq!(restored.len(), store.len());
        prop_assert_eq!(restored.byte_size(), store.byte_size());
        for (key, envelope) in store.iter() {
            prop_assert_eq!(restored.get(&key), Some(envelope));
        }
    }

    // Decoding an encoded value returns the original
    #[test]
    fn prop_codec_returns_written_value(
        key in key_strategy(),
        text in any::<String>(),
        numbers in prop::collection::vec(any::<i64>(), 0..16),
    ) {
        let value = (text, numbers);
        let envelope = Envelope::encode(&key, &value, Duration::from_millis(100), false).unwrap();
        let decoded: (String, Vec<i64>) = envelope.decode(&key).unwrap();
        prop_assert_eq!(decoded, value);
    }

    // Sized envelopes cost overhead plus payload, segment and id bytes
    #[test]
    fn prop_byte_size_formula(key in key_strategy(), value in value_strategy()) {
        let envelope = Envelope::encode(&key, &value, Duration::from_secs(1), true).unwrap();
        let expected = 53 + envelope.item.len() + key.segment.len() + key.id.len();
        prop_assert_eq!(envelope.byte_size, Some(expected as u64));
    }

    #[test]
    fn prop_segment_names_without_nul_are_valid(name in "[^\\x00]{1,32}") {
        prop_assert!(validate_segment_name(&name).is_ok());
    }

    #[test]
    fn prop_segment_names_with_nul_are_invalid(prefix in "[a-z]{0,8}", suffix in "[a-z]{0,8}") {
        let name = format!("{}\0{}", prefix, suffix);
        prop_assert!(validate_segment_name(&name).is_err());
    }
}
