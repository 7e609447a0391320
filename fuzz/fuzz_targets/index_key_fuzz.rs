//! Fuzz test for index key derivation
//!
//! Arbitrary attribute values must always produce a well-formed index key:
//! a fixed prefix, the declared attribute list, and a 64-character hex
//! digest, regardless of what the values contain.
//!
//! Run with: cargo +nightly fuzz run index_key_fuzz -- -max_total_time=60

#![no_main]

use std::sync::Arc;

use idcache_core::{AttrValue, AttributeType, CacheConfig, EntitySchema};
use idcache_storage::KeyGenerator;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let mut parts = input.splitn(2, '\u{1f}');
    let first = parts.next().unwrap_or_default();
    let second = parts.next().unwrap_or_default();

    let schema = EntitySchema::builder("Record")
        .attribute("id", AttributeType::Integer)
        .attribute("title", AttributeType::String)
        .attribute("slug", AttributeType::String)
        .cache_index(&["title", "slug"])
        .build()
        .expect("fixed schema is valid");
    let keys = KeyGenerator::new(Arc::new(CacheConfig::default()));
    let index = &schema.cache_indexes()[0];

    let values = [AttrValue::from(first), AttrValue::from(second)];
    let key = keys.index_key(&schema, index, &values);

    let digest = key
        .strip_prefix("IDC:index:Record:title,slug:")
        .expect("key carries the fixed prefix");
    assert_eq!(digest.len(), 64);
    assert!(digest.bytes().all(|b| b.is_ascii_hexdigit()));

    // Deterministic for identical input.
    assert_eq!(key, keys.index_key(&schema, index, &values));
});
