//! IDCACHE Storage - Read-Through Identity Cache
//!
//! Caches records by primary key (blobs) and by declared unique attribute
//! tuples (indexes) in front of a backing record store. The backing store
//! and the cache transport are both external collaborators; this crate owns
//! key derivation, negative caching, population and invalidation.

pub mod cache;

// Re-export cache types for integration
pub use cache::{
    BlobCache, CacheEntry, CacheStats, CacheTransport, CacheableEntity, FetchEvent,
    FetchInstrumentation, IdentityCache, InMemoryTransport, IndexCache, KeyGenerator,
    LmdbTransport, LmdbTransportError, TransportAdapter, CACHED_NIL, FETCH_EVENT,
};

use async_trait::async_trait;
use idcache_core::{AttrValue, IdCacheResult, PrimaryKey, StoreError};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

// ============================================================================
// RECORD STORE TRAIT
// ============================================================================

/// Backing store queries the cache issues on a miss.
///
/// Implementations must only return committed state. Errors propagate to
/// the caller unchanged.
#[async_trait]
pub trait RecordStore<T: CacheableEntity>: Send + Sync {
    /// Find a record by primary key.
    async fn find_by_primary_key(&self, key: &PrimaryKey) -> IdCacheResult<Option<T>>;

    /// Find the primary key of the record whose `attributes` equal `values`.
    ///
    /// Equivalent to `SELECT pk WHERE a = ? AND b = ? LIMIT 1`.
    async fn find_primary_key_by_attributes(
        &self,
        attributes: &[String],
        values: &[AttrValue],
    ) -> IdCacheResult<Option<PrimaryKey>>;

    /// Find several records by primary key. Missing keys are skipped.
    async fn find_by_primary_keys(&self, keys: &[PrimaryKey]) -> IdCacheResult<Vec<T>> {
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = self.find_by_primary_key(key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

// ============================================================================
// MOCK STORE
// ============================================================================

/// In-memory record store for testing.
///
/// Counts every query so tests can assert how often the cache went to the
/// store.
#[derive(Debug)]
pub struct MockRecordStore<T: CacheableEntity> {
    entity_type: String,
    records: RwLock<HashMap<PrimaryKey, T>>,
    primary_key_queries: AtomicU64,
    attribute_queries: AtomicU64,
    unavailable: AtomicBool,
    _entity: PhantomData<fn() -> T>,
}

impl<T: CacheableEntity> MockRecordStore<T> {
    /// Create an empty mock store for `entity_type`.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            records: RwLock::new(HashMap::new()),
            primary_key_queries: AtomicU64::new(0),
            attribute_queries: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
            _entity: PhantomData,
        }
    }

    /// Insert or replace a record.
    pub fn insert(&self, record: T) -> IdCacheResult<()> {
        let mut records = self.records.write().map_err(|_| self.poisoned())?;
        records.insert(record.primary_key(), record);
        Ok(())
    }

    /// Remove a record, returning it if present.
    pub fn remove(&self, key: &PrimaryKey) -> IdCacheResult<Option<T>> {
        let mut records = self.records.write().map_err(|_| self.poisoned())?;
        Ok(records.remove(key))
    }

    /// Get count of stored records.
    pub fn record_count(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Number of primary key lookups served so far.
    pub fn primary_key_queries(&self) -> u64 {
        self.primary_key_queries.load(Ordering::SeqCst)
    }

    /// Number of attribute lookups served so far.
    pub fn attribute_queries(&self) -> u64 {
        self.attribute_queries.load(Ordering::SeqCst)
    }

    /// Total queries of any kind.
    pub fn total_queries(&self) -> u64 {
        self.primary_key_queries() + self.attribute_queries()
    }

    pub fn reset_counters(&self) {
        self.primary_key_queries.store(0, Ordering::SeqCst);
        self.attribute_queries.store(0, Ordering::SeqCst);
    }

    /// Make every subsequent query fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> IdCacheResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: format!("{} store is down", self.entity_type),
            }
            .into());
        }
        Ok(())
    }

    fn poisoned(&self) -> StoreError {
        StoreError::QueryFailed {
            entity_type: self.entity_type.clone(),
            reason: "lock poisoned".to_string(),
        }
    }
}

#[async_trait]
impl<T: CacheableEntity> RecordStore<T> for MockRecordStore<T> {
    async fn find_by_primary_key(&self, key: &PrimaryKey) -> IdCacheResult<Option<T>> {
        self.primary_key_queries.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let records = self.records.read().map_err(|_| self.poisoned())?;
        Ok(records.get(key).cloned())
    }

    async fn find_primary_key_by_attributes(
        &self,
        attributes: &[String],
        values: &[AttrValue],
    ) -> IdCacheResult<Option<PrimaryKey>> {
        self.attribute_queries.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let records = self.records.read().map_err(|_| self.poisoned())?;
        let mut matches: Vec<PrimaryKey> = records
            .values()
            .filter(|record| {
                attributes
                    .iter()
                    .zip(values)
                    .all(|(name, value)| record.attribute(name).as_ref() == Some(value))
            })
            .map(|record| record.primary_key())
            .collect();
        // LIMIT 1 with a stable pick
        matches.sort();
        Ok(matches.into_iter().next())
    }
}
