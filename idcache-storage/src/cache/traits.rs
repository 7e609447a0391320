//! Cache transport and cacheable entity traits.
//!
//! This module defines what the cache layer consumes from the outside: a
//! key/value transport with `read`/`write`/`delete` semantics, and entities
//! that know their primary key and attribute values.

use async_trait::async_trait;
use idcache_core::{AttrValue, PrimaryKey, TransportError};
use serde::{de::DeserializeOwned, Serialize};

/// Marker trait for types that can be cached.
///
/// # Implementation Requirements
///
/// - `primary_key()` must return the key the store finds the record by
/// - `attribute()` must return the current value of every attribute that
///   participates in a declared cache index, or the cache cannot derive the
///   index keys to invalidate
/// - Implementations must be `Clone`, `Serialize`, and `DeserializeOwned` for cache storage
/// - Implementations must be `Send + Sync + 'static` for async compatibility
pub trait CacheableEntity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Get the primary key of this record.
    fn primary_key(&self) -> PrimaryKey;

    /// Get the current value of a named attribute.
    fn attribute(&self, name: &str) -> Option<AttrValue>;
}

/// Key/value cache transport.
///
/// This trait abstracts over the external cache service (LMDB, memcached,
/// Redis, in-memory). It is treated as best-effort storage, never as a
/// source of truth: no ordering is assumed between operations on different
/// keys.
#[async_trait]
pub trait CacheTransport: Send + Sync {
    /// Read the raw bytes stored at `key`, or `None` if the key is absent.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, TransportError>;

    /// Read several keys at once. Results line up with `keys`.
    ///
    /// The default implementation issues one `read` per key; transports with
    /// a native multi-get should override it.
    async fn read_multi(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, TransportError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.read(key).await?);
        }
        Ok(values)
    }

    /// Store `value` at `key`, replacing whatever was there.
    async fn write(&self, key: &str, value: &[u8]) -> Result<(), TransportError>;

    /// Remove `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), TransportError>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
