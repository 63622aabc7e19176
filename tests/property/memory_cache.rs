//! Property tests for the in-memory cache.
//!
//! Invariants tested:
//! - The entry count never exceeds max_size
//! - The most recent write to a key is the value read back

use bulwark_cache::MemoryCache;
use bytes::Bytes;
use proptest::prelude::*;
use std::collections::HashMap;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    /// Property: len() <= max_size for any sequence of inserts
    #[test]
    fn size_is_bounded(
        max_size in 1usize..=50,
        keys in prop::collection::vec(0u16..200, 1..300),
    ) {
        let cache = MemoryCache::builder()
            .max_size(max_size)
            .shards(1)
            .build()
            .unwrap();

        for key in keys {
            cache.insert(&key.to_string(), Bytes::from(key.to_le_bytes().to_vec()), None);
            prop_assert!(cache.len() <= max_size);
        }
    }

    /// Property: with room for every key, the last write wins
    #[test]
    fn last_write_wins(
        writes in prop::collection::vec((0u8..20, any::<u32>()), 1..100),
    ) {
        let cache = MemoryCache::builder()
            .max_size(64)
            .shards(1)
            .build()
            .unwrap();
        let mut expected = HashMap::new();

        for (key, value) in writes {
            let value = Bytes::from(value.to_be_bytes().to_vec());
            cache.insert(&key.to_string(), value.clone(), None);
            expected.insert(key, value);
        }

        for (key, value) in expected {
            let entry = cache.get_entry(&key.to_string());
            prop_assert_eq!(entry.map(|entry| entry.value), Some(value));
        }
    }
}
