//! Transport adapter with fail-open reads and fail-closed invalidation.
//!
//! Reads and population writes absorb transport and codec faults: the worst
//! outcome is a slower fetch that goes to the store. Invalidation deletes
//! are retried and then surfaced, since a dropped delete can leave stale
//! data in the cache indefinitely.

use std::sync::Arc;

use idcache_core::{CacheConfig, IdCacheResult};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, warn};

use super::entry::CacheEntry;
use super::traits::CacheTransport;

/// Wraps a [`CacheTransport`] with the cache layer's fault policy.
pub struct TransportAdapter<C: CacheTransport> {
    transport: Arc<C>,
    config: Arc<CacheConfig>,
}

impl<C: CacheTransport> TransportAdapter<C> {
    pub fn new(transport: Arc<C>, config: Arc<CacheConfig>) -> Self {
        Self { transport, config }
    }

    /// Get a reference to the underlying transport.
    pub fn transport(&self) -> &C {
        &self.transport
    }

    /// Read and decode the entry at `key`.
    ///
    /// Returns `None` when the key is absent, when the transport fails, or
    /// when the stored bytes do not decode. All three mean "go to the store".
    pub async fn read_entry<V: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<V>> {
        match self.transport.read(key).await {
            Ok(Some(bytes)) => Self::decode(key, &bytes),
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, falling back to store");
                None
            }
        }
    }

    /// Read and decode several entries. Results line up with `keys`.
    pub async fn read_entries<V: DeserializeOwned>(&self, keys: &[String]) -> Vec<Option<CacheEntry<V>>> {
        match self.transport.read_multi(keys).await {
            Ok(values) => keys
                .iter()
                .zip(values)
                .map(|(key, bytes)| bytes.and_then(|b| Self::decode(key, &b)))
                .collect(),
            Err(e) => {
                warn!(keys = keys.len(), error = %e, "Cache multi-read failed, falling back to store");
                keys.iter().map(|_| None).collect()
            }
        }
    }

    /// Populate `key` with `entry`.
    ///
    /// Skipped in readonly mode. Failures are logged and dropped: a missing
    /// population only costs the next reader a store query.
    pub async fn write_entry<V: Serialize>(&self, key: &str, entry: &CacheEntry<V>) {
        if self.config.readonly {
            debug!(key = %key, "Readonly cache, skipping population");
            return;
        }

        let bytes = match entry.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode cache entry");
                return;
            }
        };

        match self.transport.write(key, &bytes).await {
            Ok(()) => debug!(key = %key, present = entry.is_present(), "Populated cache entry"),
            Err(e) => warn!(key = %key, error = %e, "Cache population write failed"),
        }
    }

    /// Delete `key`, retrying up to `invalidation_retries` extra times.
    ///
    /// Deleting an absent key succeeds, so repeated invalidation is a no-op.
    pub async fn invalidate(&self, key: &str) -> IdCacheResult<()> {
        let attempts = self.config.invalidation_retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            match self.transport.delete(key).await {
                Ok(()) => {
                    debug!(key = %key, "Invalidated cache entry");
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    warn!(key = %key, attempt, error = %e, "Cache invalidation failed, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    error!(key = %key, attempts, error = %e, "Cache invalidation failed");
                    return Err(e.into());
                }
            }
        }
    }

    /// Invalidate every key, attempting all of them even if one fails.
    ///
    /// Returns the first error encountered.
    pub async fn invalidate_all(&self, keys: &[String]) -> IdCacheResult<()> {
        let mut first_error = None;
        for key in keys {
            if let Err(e) = self.invalidate(key).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn decode<V: DeserializeOwned>(key: &str, bytes: &[u8]) -> Option<CacheEntry<V>> {
        match CacheEntry::decode(bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(key = %key, error = %e, "Undecodable cache entry, treating as miss");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::CACHED_NIL;
    use async_trait::async_trait;
    use idcache_core::{IdCacheError, PrimaryKey, TransportError};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Transport whose operations can be made to fail.
    #[derive(Default)]
    struct FlakyTransport {
        entries: Mutex<HashMap<String, Vec<u8>>>,
        fail_reads: bool,
        fail_writes: bool,
        delete_failures: AtomicU32,
        delete_calls: AtomicU32,
    }

    fn unavailable() -> TransportError {
        TransportError::Unavailable {
            reason: "connection refused".to_string(),
        }
    }

    #[async_trait]
    impl CacheTransport for FlakyTransport {
        async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, TransportError> {
            if self.fail_reads {
                return Err(unavailable());
            }
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        async fn write(&self, key: &str, value: &[u8]) -> Result<(), TransportError> {
            if self.fail_writes {
                return Err(unavailable());
            }
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_vec());
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), TransportError> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.delete_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.delete_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(unavailable());
            }
            self.entries.lock().unwrap().remove(key);
            Ok(())
        }
    }

    fn adapter(transport: FlakyTransport, config: CacheConfig) -> TransportAdapter<FlakyTransport> {
        TransportAdapter::new(Arc::new(transport), Arc::new(config))
    }

    #[tokio::test]
    async fn test_write_then_read_entry() {
        let adapter = adapter(FlakyTransport::default(), CacheConfig::default());
        adapter
            .write_entry("k", &CacheEntry::Present(PrimaryKey::from(1i64)))
            .await;

        let entry: Option<CacheEntry<PrimaryKey>> = adapter.read_entry("k").await;
        assert_eq!(entry, Some(CacheEntry::Present(PrimaryKey::from(1i64))));
    }

    #[tokio::test]
    async fn test_read_failure_is_a_miss() {
        let transport = FlakyTransport {
            fail_reads: true,
            ..Default::default()
        };
        let adapter = adapter(transport, CacheConfig::default());

        let entry: Option<CacheEntry<PrimaryKey>> = adapter.read_entry("k").await;
        assert!(entry.is_none());

        let entries: Vec<Option<CacheEntry<PrimaryKey>>> =
            adapter.read_entries(&["a".to_string(), "b".to_string()]).await;
        assert_eq!(entries, vec![None, None]);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let transport = FlakyTransport::default();
        transport
            .entries
            .lock()
            .unwrap()
            .insert("k".to_string(), b"{not json".to_vec());
        let adapter = adapter(transport, CacheConfig::default());

        let entry: Option<CacheEntry<PrimaryKey>> = adapter.read_entry("k").await;
        assert!(entry.is_none());
    }

    #[tokio::test]
    async fn test_write_failure_is_absorbed() {
        let transport = FlakyTransport {
            fail_writes: true,
            ..Default::default()
        };
        let adapter = adapter(transport, CacheConfig::default());
        adapter.write_entry::<PrimaryKey>("k", &CacheEntry::Absent).await;

        assert!(adapter.transport().entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_readonly_skips_population() {
        let adapter = adapter(
            FlakyTransport::default(),
            CacheConfig::new().with_readonly(true),
        );
        adapter.write_entry::<PrimaryKey>("k", &CacheEntry::Absent).await;

        assert!(adapter.transport().entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_negative_marker_bytes() {
        let adapter = adapter(FlakyTransport::default(), CacheConfig::default());
        adapter.write_entry::<PrimaryKey>("k", &CacheEntry::Absent).await;

        let stored = adapter.transport().entries.lock().unwrap().get("k").cloned();
        assert_eq!(stored.as_deref(), Some(CACHED_NIL));
    }

    #[tokio::test]
    async fn test_invalidate_retries_then_succeeds() {
        let transport = FlakyTransport {
            delete_failures: AtomicU32::new(2),
            ..Default::default()
        };
        let adapter = adapter(transport, CacheConfig::new().with_invalidation_retries(2));

        adapter.invalidate("k").await.expect("third attempt succeeds");
        assert_eq!(adapter.transport().delete_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_invalidate_surfaces_persistent_failure() {
        let transport = FlakyTransport {
            delete_failures: AtomicU32::new(10),
            ..Default::default()
        };
        let adapter = adapter(transport, CacheConfig::new().with_invalidation_retries(1));

        let err = adapter.invalidate("k").await.unwrap_err();
        assert!(matches!(err, IdCacheError::Transport(_)));
        assert_eq!(adapter.transport().delete_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_all_attempts_every_key() {
        let transport = FlakyTransport {
            delete_failures: AtomicU32::new(1),
            ..Default::default()
        };
        let adapter = adapter(transport, CacheConfig::new().with_invalidation_retries(0));

        let keys = vec!["a".to_string(), "b".to_string()];
        assert!(adapter.invalidate_all(&keys).await.is_err());
        assert_eq!(adapter.transport().delete_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_absent_key_is_noop() {
        let adapter = adapter(FlakyTransport::default(), CacheConfig::default());
        adapter.invalidate("missing").await.unwrap();
        adapter.invalidate("missing").await.unwrap();
    }
}
