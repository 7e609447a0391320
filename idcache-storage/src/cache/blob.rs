//! Blob cache: records (or negative markers) keyed by primary key.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use idcache_core::{CacheConfig, EntitySchema, IdCacheError, IdCacheResult, PrimaryKey};
use serde::de::IgnoredAny;
use tracing::debug;

use super::adapter::TransportAdapter;
use super::entry::CacheEntry;
use super::key::KeyGenerator;
use super::telemetry::FetchInstrumentation;
use super::traits::{CacheTransport, CacheableEntity};
use crate::RecordStore;

/// Caches fully materialized records of one entity type.
///
/// A lookup for a primary key the store does not know caches the negative
/// marker, so repeated lookups for a missing id stop reaching the store.
pub struct BlobCache<T, C, S>
where
    T: CacheableEntity,
    C: CacheTransport,
    S: RecordStore<T>,
{
    schema: Arc<EntitySchema>,
    config: Arc<CacheConfig>,
    keys: KeyGenerator,
    adapter: Arc<TransportAdapter<C>>,
    store: Arc<S>,
    instrumentation: FetchInstrumentation,
    _entity: PhantomData<fn() -> T>,
}

impl<T, C, S> BlobCache<T, C, S>
where
    T: CacheableEntity,
    C: CacheTransport,
    S: RecordStore<T>,
{
    pub fn new(
        schema: Arc<EntitySchema>,
        config: Arc<CacheConfig>,
        adapter: Arc<TransportAdapter<C>>,
        store: Arc<S>,
        instrumentation: FetchInstrumentation,
    ) -> Self {
        Self {
            keys: KeyGenerator::new(Arc::clone(&config)),
            schema,
            config,
            adapter,
            store,
            instrumentation,
            _entity: PhantomData,
        }
    }

    /// Blob key for `primary_key`.
    pub fn key(&self, primary_key: &PrimaryKey) -> String {
        self.keys.blob_key(&self.schema, primary_key)
    }

    /// Fetch a record, populating the cache from the store on a miss.
    pub async fn fetch(&self, primary_key: &PrimaryKey) -> IdCacheResult<Option<T>> {
        if !self.config.enabled {
            self.record(primary_key, false);
            return self.store.find_by_primary_key(primary_key).await;
        }

        let key = self.key(primary_key);
        match self.adapter.read_entry::<T>(&key).await {
            Some(CacheEntry::Present(record)) => {
                self.record(primary_key, true);
                Ok(Some(record))
            }
            Some(CacheEntry::Absent) => {
                self.record(primary_key, true);
                debug!(key = %key, "Cached negative result");
                Ok(None)
            }
            None => {
                self.record(primary_key, false);
                self.populate(&key, primary_key).await
            }
        }
    }

    /// Like [`fetch`](Self::fetch), but absence is an error.
    pub async fn fetch_strict(&self, primary_key: &PrimaryKey) -> IdCacheResult<T> {
        self.fetch(primary_key)
            .await?
            .ok_or_else(|| self.not_found(primary_key))
    }

    /// Check whether a record exists, consulting the same slot as `fetch`.
    ///
    /// On a hit only the entry envelope is decoded, not the record body.
    pub async fn exists(&self, primary_key: &PrimaryKey) -> IdCacheResult<bool> {
        if !self.config.enabled {
            self.record(primary_key, false);
            return Ok(self.store.find_by_primary_key(primary_key).await?.is_some());
        }

        let key = self.key(primary_key);
        match self.adapter.read_entry::<IgnoredAny>(&key).await {
            Some(entry) => {
                self.record(primary_key, true);
                Ok(entry.is_present())
            }
            None => {
                self.record(primary_key, false);
                Ok(self.populate(&key, primary_key).await?.is_some())
            }
        }
    }

    /// Fetch several records with one transport round trip.
    ///
    /// Results follow the order of `primary_keys`; keys with no record are
    /// left out. Only the misses are queried from the store.
    pub async fn fetch_multi(&self, primary_keys: &[PrimaryKey]) -> IdCacheResult<Vec<T>> {
        if !self.config.enabled {
            for primary_key in primary_keys {
                self.record(primary_key, false);
            }
            return self.store.find_by_primary_keys(primary_keys).await;
        }

        let keys: Vec<String> = primary_keys.iter().map(|pk| self.key(pk)).collect();
        let entries = self.adapter.read_entries::<T>(&keys).await;

        let mut resolved: Vec<Option<CacheEntry<T>>> = Vec::with_capacity(entries.len());
        let mut misses: Vec<PrimaryKey> = Vec::new();
        for (primary_key, entry) in primary_keys.iter().zip(entries) {
            self.record(primary_key, entry.is_some());
            if entry.is_none() {
                misses.push(primary_key.clone());
            }
            resolved.push(entry);
        }

        let mut loaded: HashMap<PrimaryKey, T> = HashMap::new();
        if !misses.is_empty() {
            debug!(
                entity_type = %self.schema.name(),
                misses = misses.len(),
                "Loading blob misses from store"
            );
            for record in self.store.find_by_primary_keys(&misses).await? {
                loaded.insert(record.primary_key(), record);
            }
            for primary_key in &misses {
                let entry = CacheEntry::from_option(loaded.get(primary_key));
                self.adapter.write_entry(&self.key(primary_key), &entry).await;
            }
        }

        Ok(primary_keys
            .iter()
            .zip(resolved)
            .filter_map(|(primary_key, entry)| match entry {
                Some(entry) => entry.into_option(),
                None => loaded.get(primary_key).cloned(),
            })
            .collect())
    }

    /// Delete the blob slot for `primary_key`.
    pub async fn invalidate(&self, primary_key: &PrimaryKey) -> IdCacheResult<()> {
        self.adapter.invalidate(&self.key(primary_key)).await
    }

    /// Write a committed `record` into its blob slot.
    ///
    /// Only call with state the store has already committed. Population
    /// rules apply: nothing is written when the cache is disabled or
    /// readonly, and a failed write is absorbed.
    pub async fn prime(&self, record: &T) {
        if !self.config.enabled {
            return;
        }
        let key = self.key(&record.primary_key());
        self.adapter
            .write_entry(&key, &CacheEntry::Present(record))
            .await;
    }

    async fn populate(&self, key: &str, primary_key: &PrimaryKey) -> IdCacheResult<Option<T>> {
        let found = self.store.find_by_primary_key(primary_key).await?;
        self.adapter
            .write_entry(key, &CacheEntry::from_option(found.as_ref()))
            .await;
        Ok(found)
    }

    fn record(&self, primary_key: &PrimaryKey, hit: bool) {
        self.instrumentation
            .record(self.schema.name(), primary_key, hit);
    }

    fn not_found(&self, primary_key: &PrimaryKey) -> IdCacheError {
        IdCacheError::NotFound {
            entity_type: self.schema.name().to_string(),
            key: primary_key.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::CACHED_NIL;
    use crate::cache::memory_backend::InMemoryTransport;
    use crate::MockRecordStore;
    use idcache_core::{AttrValue, AttributeType};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        id: i64,
        sku: String,
    }

    impl CacheableEntity for Widget {
        fn primary_key(&self) -> PrimaryKey {
            PrimaryKey::from(self.id)
        }

        fn attribute(&self, name: &str) -> Option<AttrValue> {
            match name {
                "id" => Some(self.id.into()),
                "sku" => Some(self.sku.clone().into()),
                _ => None,
            }
        }
    }

    struct Harness {
        blobs: BlobCache<Widget, InMemoryTransport, MockRecordStore<Widget>>,
        transport: Arc<InMemoryTransport>,
        store: Arc<MockRecordStore<Widget>>,
        instrumentation: FetchInstrumentation,
    }

    fn harness(config: CacheConfig) -> Harness {
        let schema = EntitySchema::builder("Widget")
            .attribute("id", AttributeType::Integer)
            .attribute("sku", AttributeType::String)
            .build()
            .unwrap();
        let config = Arc::new(config);
        let transport = Arc::new(InMemoryTransport::new());
        let store = Arc::new(MockRecordStore::new("Widget"));
        let instrumentation = FetchInstrumentation::new(16);
        let adapter = Arc::new(TransportAdapter::new(
            Arc::clone(&transport),
            Arc::clone(&config),
        ));
        let blobs = BlobCache::new(
            schema,
            config,
            adapter,
            Arc::clone(&store),
            instrumentation.clone(),
        );
        Harness {
            blobs,
            transport,
            store,
            instrumentation,
        }
    }

    fn widget(id: i64) -> Widget {
        Widget {
            id,
            sku: format!("sku-{}", id),
        }
    }

    #[tokio::test]
    async fn test_miss_populates_then_hits() {
        let h = harness(CacheConfig::default());
        h.store.insert(widget(1)).unwrap();
        let pk = PrimaryKey::from(1i64);

        assert_eq!(h.blobs.fetch(&pk).await.unwrap(), Some(widget(1)));
        assert_eq!(h.blobs.fetch(&pk).await.unwrap(), Some(widget(1)));

        assert_eq!(h.store.primary_key_queries(), 1);
        assert!(h.transport.contains(&h.blobs.key(&pk)).await);
        let stats = h.instrumentation.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_missing_record_caches_negative_marker() {
        let h = harness(CacheConfig::default());
        let pk = PrimaryKey::from(10i64);

        assert_eq!(h.blobs.fetch(&pk).await.unwrap(), None);
        assert_eq!(
            h.transport.get_raw(&h.blobs.key(&pk)).await.as_deref(),
            Some(CACHED_NIL)
        );
        assert_eq!(h.blobs.fetch(&pk).await.unwrap(), None);
        assert_eq!(h.store.primary_key_queries(), 1);
    }

    #[tokio::test]
    async fn test_fetch_strict_not_found() {
        let h = harness(CacheConfig::default());
        let err = h
            .blobs
            .fetch_strict(&PrimaryKey::from(10i64))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_exists_shares_slot_with_fetch() {
        let h = harness(CacheConfig::default());
        h.store.insert(widget(1)).unwrap();

        assert!(h.blobs.exists(&PrimaryKey::from(1i64)).await.unwrap());
        assert!(!h.blobs.exists(&PrimaryKey::from(2i64)).await.unwrap());
        assert_eq!(h.store.primary_key_queries(), 2);

        // Both slots are now warm for fetch.
        assert_eq!(
            h.blobs.fetch(&PrimaryKey::from(1i64)).await.unwrap(),
            Some(widget(1))
        );
        assert_eq!(h.blobs.fetch(&PrimaryKey::from(2i64)).await.unwrap(), None);
        assert_eq!(h.store.primary_key_queries(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_clears_negative_marker() {
        let h = harness(CacheConfig::default());
        let pk = PrimaryKey::from(1i64);

        assert_eq!(h.blobs.fetch(&pk).await.unwrap(), None);
        h.store.insert(widget(1)).unwrap();
        h.blobs.invalidate(&pk).await.unwrap();
        h.blobs.invalidate(&pk).await.unwrap();

        assert_eq!(h.blobs.fetch(&pk).await.unwrap(), Some(widget(1)));
    }

    #[tokio::test]
    async fn test_prime_serves_without_store() {
        let h = harness(CacheConfig::default());
        h.blobs.prime(&widget(1)).await;

        assert_eq!(
            h.blobs.fetch(&PrimaryKey::from(1i64)).await.unwrap(),
            Some(widget(1))
        );
        assert_eq!(h.store.primary_key_queries(), 0);
    }

    #[tokio::test]
    async fn test_prime_respects_readonly() {
        let h = harness(CacheConfig::new().with_readonly(true));
        h.blobs.prime(&widget(1)).await;
        assert!(h.transport.is_empty().await);
    }

    #[tokio::test]
    async fn test_fetch_multi_mixes_hits_and_misses() {
        let h = harness(CacheConfig::default());
        for id in [1, 2, 3] {
            h.store.insert(widget(id)).unwrap();
        }
        h.blobs.fetch(&PrimaryKey::from(2i64)).await.unwrap();
        h.store.reset_counters();

        let keys = [3i64, 2, 4, 1].map(PrimaryKey::from);
        let records = h.blobs.fetch_multi(&keys).await.unwrap();

        assert_eq!(records, vec![widget(3), widget(2), widget(1)]);
        assert_eq!(h.store.primary_key_queries(), 3);

        // Everything, including the missing id, is cached now.
        h.store.reset_counters();
        let records = h.blobs.fetch_multi(&keys).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(h.store.primary_key_queries(), 0);
    }

    #[tokio::test]
    async fn test_disabled_cache_bypasses_transport() {
        let h = harness(CacheConfig::new().with_enabled(false));
        h.store.insert(widget(1)).unwrap();
        let pk = PrimaryKey::from(1i64);

        assert_eq!(h.blobs.fetch(&pk).await.unwrap(), Some(widget(1)));
        assert_eq!(h.blobs.fetch(&pk).await.unwrap(), Some(widget(1)));

        assert_eq!(h.store.primary_key_queries(), 2);
        assert_eq!(h.transport.len().await, 0);
    }

    #[tokio::test]
    async fn test_store_fault_propagates() {
        let h = harness(CacheConfig::default());
        h.store.set_unavailable(true);

        let err = h.blobs.fetch(&PrimaryKey::from(1i64)).await.unwrap_err();
        assert!(matches!(err, IdCacheError::Store(_)));
        assert_eq!(h.transport.len().await, 0);
    }
}
