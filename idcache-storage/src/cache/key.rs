//! Cache key derivation.
//!
//! Blob keys: `{namespace}blob:{entity_type}:{schema_fingerprint}:{primary_key}`
//!
//! Index keys: `{namespace}index:{entity_type}:{attribute_names}:{values_hash}`
//!
//! Both are pure functions of their inputs, the entity type's fingerprint,
//! and the namespace. The namespace is resolved on every call.

use std::sync::Arc;

use idcache_core::{cache_hash, AttrValue, CacheConfig, CacheIndex, EntitySchema, PrimaryKey};

/// Separator between values before the index tuple is hashed.
const VALUE_SEPARATOR: &str = "/";

/// Stand-in for `Null` in the hashed tuple. Escaping keeps it out of every
/// non-null fragment.
const NULL_FRAGMENT: &str = "\u{0}";

/// Derives blob and index keys for any registered entity type.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    config: Arc<CacheConfig>,
}

impl KeyGenerator {
    pub fn new(config: Arc<CacheConfig>) -> Self {
        Self { config }
    }

    /// Key of the slot holding a record (or a negative marker) by primary key.
    pub fn blob_key(&self, schema: &EntitySchema, primary_key: &PrimaryKey) -> String {
        format!(
            "{}blob:{}:{}:{}",
            self.config.namespace_for(schema),
            schema.name(),
            schema.fingerprint(),
            primary_key
        )
    }

    /// Key of the slot mapping an index value tuple to a primary key.
    ///
    /// `values` must already be in the index's declared attribute order.
    pub fn index_key(&self, schema: &EntitySchema, index: &CacheIndex, values: &[AttrValue]) -> String {
        format!(
            "{}index:{}:{}:{}",
            self.config.namespace_for(schema),
            schema.name(),
            index.key_fragment(),
            Self::values_hash(values)
        )
    }

    /// Hash of an index value tuple.
    ///
    /// Each fragment has `\`, `/` and NUL backslash-escaped, so distinct
    /// tuples never join to the same text. A single plain string hashes as
    /// itself.
    pub fn values_hash(values: &[AttrValue]) -> String {
        let joined = values
            .iter()
            .map(Self::hash_fragment)
            .collect::<Vec<_>>()
            .join(VALUE_SEPARATOR);
        cache_hash(&joined)
    }

    fn hash_fragment(value: &AttrValue) -> String {
        if value.is_null() {
            return NULL_FRAGMENT.to_string();
        }
        let fragment = value.cache_fragment();
        let mut escaped = String::with_capacity(fragment.len());
        for c in fragment.chars() {
            match c {
                '\\' => escaped.push_str("\\\\"),
                '/' => escaped.push_str("\\/"),
                '\u{0}' => escaped.push_str("\\0"),
                other => escaped.push(other),
            }
        }
        escaped
    }
}
