//! In-process cache transport.
//!
//! Backed by a `tokio::sync::RwLock<HashMap>`. No eviction; suitable for
//! tests and single-process deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use idcache_core::TransportError;
use tokio::sync::RwLock;

use super::traits::CacheTransport;

/// In-memory key/value transport.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw bytes stored at `key`.
    pub async fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// All stored keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl CacheTransport for InMemoryTransport {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn read_multi(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, TransportError> {
        let entries = self.entries.read().await;
        Ok(keys.iter().map(|key| entries.get(key).cloned()).collect())
    }

    async fn write(&self, key: &str, value: &[u8]) -> Result<(), TransportError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), TransportError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
