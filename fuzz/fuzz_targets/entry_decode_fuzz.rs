//! Fuzz test for cache entry decoding
//!
//! Cache entries come back from an external transport and may be
//! truncated, corrupted or written by a different release. Decoding must
//! return `Ok` or `Err` for any bytes, never panic.
//!
//! Run with: cargo +nightly fuzz run entry_decode_fuzz -- -max_total_time=60

#![no_main]

use idcache_core::PrimaryKey;
use idcache_storage::{CacheEntry, CACHED_NIL};
use libfuzzer_sys::fuzz_target;
use serde::de::IgnoredAny;

fuzz_target!(|data: &[u8]| {
    let envelope = CacheEntry::<IgnoredAny>::decode(data);
    let index_entry = CacheEntry::<PrimaryKey>::decode(data);
    let blob_entry = CacheEntry::<serde_json::Value>::decode(data);

    // A body that decodes fully also decodes as a bare envelope.
    if let Ok(entry) = &blob_entry {
        let envelope = envelope.as_ref().expect("full decode implies envelope decode");
        assert_eq!(entry.is_present(), envelope.is_present());
    }

    // Only the negative marker decodes as Absent, and it round-trips.
    if let Ok(CacheEntry::Absent) = index_entry {
        let encoded = CacheEntry::<PrimaryKey>::Absent.encode().expect("Absent encodes");
        assert_eq!(encoded, CACHED_NIL);
    }
    if let Ok(CacheEntry::Present(pk)) = index_entry {
        let encoded = CacheEntry::Present(pk.clone()).encode().expect("primary key encodes");
        let decoded = CacheEntry::<PrimaryKey>::decode(&encoded).expect("re-decode succeeds");
        assert_eq!(decoded, CacheEntry::Present(pk));
    }
});
