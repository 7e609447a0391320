//! Read-through identity cache.
//!
//! [`IdentityCache`] is the entry point for one entity type. It composes a
//! [`BlobCache`] and an [`IndexCache`] over a shared transport adapter and
//! exposes the lifecycle hooks the store integration calls after every
//! committed mutation.

use std::sync::Arc;

use idcache_core::{
    AttrValue, CacheConfig, Changes, EntitySchema, IdCacheResult, PrimaryKey,
};
use tokio::sync::broadcast;
use tracing::debug;

use super::adapter::TransportAdapter;
use super::blob::BlobCache;
use super::index::IndexCache;
use super::telemetry::{FetchEvent, FetchInstrumentation};
use super::traits::{CacheStats, CacheTransport, CacheableEntity};
use crate::RecordStore;

/// Read-through cache for records of one entity type.
///
/// # Type Parameters
///
/// - `T`: The cached entity
/// - `C`: The cache transport holding blobs and index entries
/// - `S`: The backing record store consulted on a miss
///
/// # Example
///
/// ```ignore
/// let cache = IdentityCache::new(schema, transport, store, CacheConfig::default());
///
/// let record = cache.fetch(1).await?;
/// let by_title = cache.fetch_by(&["title"], &["bob".into()]).await?;
///
/// store.save(&updated).await?;
/// cache.on_updated(&updated, &changes).await?;
/// ```
pub struct IdentityCache<T, C, S>
where
    T: CacheableEntity,
    C: CacheTransport,
    S: RecordStore<T>,
{
    schema: Arc<EntitySchema>,
    config: Arc<CacheConfig>,
    adapter: Arc<TransportAdapter<C>>,
    blobs: Arc<BlobCache<T, C, S>>,
    indexes: Arc<IndexCache<T, C, S>>,
    instrumentation: FetchInstrumentation,
}

impl<T, C, S> IdentityCache<T, C, S>
where
    T: CacheableEntity,
    C: CacheTransport,
    S: RecordStore<T>,
{
    /// Create a cache with its own instrumentation sink.
    pub fn new(
        schema: Arc<EntitySchema>,
        transport: Arc<C>,
        store: Arc<S>,
        config: impl Into<Arc<CacheConfig>>,
    ) -> Self {
        let config = config.into();
        let instrumentation = FetchInstrumentation::new(config.telemetry_capacity);
        Self::instrumented(schema, transport, store, config, instrumentation)
    }

    /// Create a cache that reports into an existing instrumentation sink,
    /// so several entity types can share one event stream.
    pub fn instrumented(
        schema: Arc<EntitySchema>,
        transport: Arc<C>,
        store: Arc<S>,
        config: impl Into<Arc<CacheConfig>>,
        instrumentation: FetchInstrumentation,
    ) -> Self {
        let config = config.into();
        let adapter = Arc::new(TransportAdapter::new(transport, Arc::clone(&config)));
        let blobs = Arc::new(BlobCache::new(
            Arc::clone(&schema),
            Arc::clone(&config),
            Arc::clone(&adapter),
            Arc::clone(&store),
            instrumentation.clone(),
        ));
        let indexes = Arc::new(IndexCache::new(
            Arc::clone(&schema),
            Arc::clone(&config),
            Arc::clone(&adapter),
            store,
            Arc::clone(&blobs),
            instrumentation.clone(),
        ));
        Self {
            schema,
            config,
            adapter,
            blobs,
            indexes,
            instrumentation,
        }
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Blob key for `primary_key`.
    pub fn blob_key(&self, primary_key: impl Into<PrimaryKey>) -> String {
        self.blobs.key(&primary_key.into())
    }

    /// Index key for `attributes` = `values`.
    pub fn index_key(&self, attributes: &[&str], values: &[AttrValue]) -> IdCacheResult<String> {
        self.indexes.key(attributes, values)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Fetch a record by primary key. `Ok(None)` when it does not exist.
    pub async fn fetch(&self, primary_key: impl Into<PrimaryKey>) -> IdCacheResult<Option<T>> {
        self.blobs.fetch(&primary_key.into()).await
    }

    /// Fetch a record by primary key, failing with `NotFound` when absent.
    pub async fn fetch_strict(&self, primary_key: impl Into<PrimaryKey>) -> IdCacheResult<T> {
        self.blobs.fetch_strict(&primary_key.into()).await
    }

    /// Whether a record with `primary_key` exists.
    pub async fn exists(&self, primary_key: impl Into<PrimaryKey>) -> IdCacheResult<bool> {
        self.blobs.exists(&primary_key.into()).await
    }

    /// Fetch several records by primary key, in request order.
    pub async fn fetch_multi(&self, primary_keys: &[PrimaryKey]) -> IdCacheResult<Vec<T>> {
        self.blobs.fetch_multi(primary_keys).await
    }

    /// Fetch a record through a declared unique index.
    pub async fn fetch_by(&self, attributes: &[&str], values: &[AttrValue]) -> IdCacheResult<Option<T>> {
        self.indexes.fetch_by(attributes, values).await
    }

    /// Fetch a record through a declared unique index, failing with
    /// `NotFound` when absent.
    pub async fn fetch_by_strict(&self, attributes: &[&str], values: &[AttrValue]) -> IdCacheResult<T> {
        self.indexes.fetch_by_strict(attributes, values).await
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    /// Delete the blob slot for `primary_key`.
    pub async fn invalidate(&self, primary_key: impl Into<PrimaryKey>) -> IdCacheResult<()> {
        self.blobs.invalidate(&primary_key.into()).await
    }

    /// Call after a record has been committed to the store.
    ///
    /// Deletes any negative marker at the blob slot and at every index slot
    /// matching the new record's values, then primes the blob slot with
    /// the record. Priming is skipped if any delete failed or an index key
    /// could not be derived.
    pub async fn on_created(&self, record: &T) -> IdCacheResult<()> {
        let mut keys = vec![self.blobs.key(&record.primary_key())];
        let derived = self.indexes.extend_keys_for(record, &mut keys);
        debug!(entity_type = %self.schema.name(), id = %record.primary_key(), keys = keys.len(), "Record created");
        self.adapter.invalidate_all(&keys).await?;
        derived?;
        self.blobs.prime(record).await;
        Ok(())
    }

    /// Call after an update to `record` has been committed to the store.
    ///
    /// `record` carries the new values; `changes` the previous ones for
    /// every attribute that changed.
    pub async fn on_updated(&self, record: &T, changes: &Changes) -> IdCacheResult<()> {
        let primary_key = record.primary_key();
        let mut keys = vec![self.blobs.key(&primary_key)];

        let previous_key = changes
            .previous(self.schema.primary_key_attribute())
            .and_then(PrimaryKey::from_attr)
            .filter(|previous| *previous != primary_key);
        if let Some(previous) = previous_key {
            keys.push(self.blobs.key(&previous));
        }

        let derived = self.indexes.extend_keys_for_changes(record, changes, &mut keys);
        debug!(
            entity_type = %self.schema.name(),
            id = %primary_key,
            changed = changes.names().count(),
            keys = keys.len(),
            "Record updated"
        );
        self.adapter.invalidate_all(&keys).await?;
        derived
    }

    /// Call after `record` has been deleted from the store.
    pub async fn on_destroyed(&self, record: &T) -> IdCacheResult<()> {
        let mut keys = vec![self.blobs.key(&record.primary_key())];
        let derived = self.indexes.extend_keys_for(record, &mut keys);
        debug!(entity_type = %self.schema.name(), id = %record.primary_key(), keys = keys.len(), "Record destroyed");
        self.adapter.invalidate_all(&keys).await?;
        derived
    }

    // ========================================================================
    // Telemetry
    // ========================================================================

    /// Subscribe to blob-level fetch events.
    pub fn subscribe(&self) -> broadcast::Receiver<FetchEvent> {
        self.instrumentation.subscribe()
    }

    /// Hit/miss counters since creation.
    pub fn stats(&self) -> CacheStats {
        self.instrumentation.stats()
    }
}

impl<T, C, S> Clone for IdentityCache<T, C, S>
where
    T: CacheableEntity,
    C: CacheTransport,
    S: RecordStore<T>,
{
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            config: Arc::clone(&self.config),
            adapter: Arc::clone(&self.adapter),
            blobs: Arc::clone(&self.blobs),
            indexes: Arc::clone(&self.indexes),
            instrumentation: self.instrumentation.clone(),
        }
    }
}
