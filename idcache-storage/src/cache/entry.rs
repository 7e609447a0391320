//! Tagged cache entries.
//!
//! A key that is absent from the transport means "not cached, ask the
//! store". A key holding [`CacheEntry::Absent`] means "the store was asked
//! and had nothing". The two states must never collapse into one.

use idcache_core::CodecError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Encoded form of [`CacheEntry::Absent`], the negative marker.
pub const CACHED_NIL: &[u8] = b"\"Absent\"";

/// A cached value or a cached confirmation that nothing exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheEntry<V> {
    Present(V),
    Absent,
}

impl<V> CacheEntry<V> {
    /// Build an entry from a store lookup result.
    pub fn from_option(value: Option<V>) -> Self {
        match value {
            Some(v) => CacheEntry::Present(v),
            None => CacheEntry::Absent,
        }
    }

    pub fn into_option(self) -> Option<V> {
        match self {
            CacheEntry::Present(v) => Some(v),
            CacheEntry::Absent => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, CacheEntry::Present(_))
    }
}

impl<V: Serialize> CacheEntry<V> {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(|e| CodecError::Encode {
            reason: e.to_string(),
        })
    }
}

impl<V: DeserializeOwned> CacheEntry<V> {
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            reason: e.to_string(),
        })
    }
}
