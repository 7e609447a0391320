//! Index cache: unique attribute tuples mapped to primary keys.
//!
//! An index fetch resolves the primary key first and then delegates to the
//! [`BlobCache`] for the record, so one blob slot stays canonical no matter
//! how many indexes point at it.

use std::sync::Arc;

use idcache_core::{
    AttrValue, CacheConfig, CacheIndex, Changes, DeclarationError, EntitySchema, IdCacheError,
    IdCacheResult, PrimaryKey,
};
use tracing::debug;

use super::adapter::TransportAdapter;
use super::blob::BlobCache;
use super::entry::CacheEntry;
use super::key::KeyGenerator;
use super::telemetry::FetchInstrumentation;
use super::traits::{CacheTransport, CacheableEntity};
use crate::RecordStore;

/// Caches the primary key behind each declared unique index value tuple.
pub struct IndexCache<T, C, S>
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
    blobs: Arc<BlobCache<T, C, S>>,
    instrumentation: FetchInstrumentation,
}

impl<T, C, S> IndexCache<T, C, S>
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
        blobs: Arc<BlobCache<T, C, S>>,
        instrumentation: FetchInstrumentation,
    ) -> Self {
        Self {
            keys: KeyGenerator::new(Arc::clone(&config)),
            schema,
            config,
            adapter,
            store,
            blobs,
            instrumentation,
        }
    }

    /// Index key for `attributes` = `values`, validated against the
    /// declared indexes.
    pub fn key(&self, attributes: &[&str], values: &[AttrValue]) -> IdCacheResult<String> {
        let resolved = self.schema.resolve_index(attributes)?;
        let values = resolved.arrange(values)?;
        Ok(self.keys.index_key(&self.schema, resolved.index(), &values))
    }

    /// Fetch the record whose `attributes` equal `values`.
    ///
    /// `attributes` must name a declared unique cache index.
    pub async fn fetch_by(
        &self,
        attributes: &[&str],
        values: &[AttrValue],
    ) -> IdCacheResult<Option<T>> {
        let resolved = self.schema.resolve_index(attributes)?;
        let values = resolved.arrange(values)?;
        let index = resolved.index();

        if !self.config.enabled {
            let found = self.lookup_primary_key(index, &values).await?;
            self.record(index, found.as_ref(), false);
            return match found {
                Some(primary_key) => self.blobs.fetch(&primary_key).await,
                None => Ok(None),
            };
        }

        let key = self.keys.index_key(&self.schema, index, &values);
        let primary_key = match self.adapter.read_entry::<PrimaryKey>(&key).await {
            Some(CacheEntry::Present(primary_key)) => {
                debug!(key = %key, id = %primary_key, "Index hit");
                self.record(index, Some(&primary_key), true);
                primary_key
            }
            Some(CacheEntry::Absent) => {
                debug!(key = %key, "Index hit, cached negative result");
                self.record(index, None, true);
                return Ok(None);
            }
            None => {
                debug!(key = %key, "Index miss");
                let found = self.lookup_primary_key(index, &values).await?;
                self.record(index, found.as_ref(), false);
                self.adapter
                    .write_entry(&key, &CacheEntry::from_option(found.as_ref()))
                    .await;
                match found {
                    Some(primary_key) => primary_key,
                    None => return Ok(None),
                }
            }
        };

        self.blobs.fetch(&primary_key).await
    }

    /// Like [`fetch_by`](Self::fetch_by), but absence is an error.
    pub async fn fetch_by_strict(&self, attributes: &[&str], values: &[AttrValue]) -> IdCacheResult<T> {
        self.fetch_by(attributes, values).await?.ok_or_else(|| {
            let pairs: Vec<String> = attributes
                .iter()
                .zip(values)
                .map(|(name, value)| format!("{}={}", name, value.cache_fragment()))
                .collect();
            IdCacheError::NotFound {
                entity_type: self.schema.name().to_string(),
                key: pairs.join(","),
            }
        })
    }

    /// Every index key derived from `record`'s current values.
    pub fn keys_for(&self, record: &T) -> IdCacheResult<Vec<String>> {
        let mut keys = Vec::new();
        self.extend_keys_for(record, &mut keys)?;
        Ok(keys)
    }

    /// Push every index key derivable from `record` onto `keys`.
    ///
    /// An index whose values cannot be read is skipped and the rest are
    /// still pushed; the first such failure is returned afterwards.
    pub fn extend_keys_for(&self, record: &T, keys: &mut Vec<String>) -> IdCacheResult<()> {
        let mut first_error = None;
        for index in self.schema.cache_indexes() {
            match self.current_values(index, record) {
                Ok(values) => keys.push(self.keys.index_key(&self.schema, index, &values)),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Index keys an update makes stale.
    ///
    /// For each index touching a changed attribute, both the key for the
    /// previous values (now pointing at the wrong record) and the key for
    /// the new values (possibly holding a negative marker) are returned.
    /// A primary key change touches every index, since each one maps to
    /// the old primary key.
    pub fn keys_for_changes(&self, record: &T, changes: &Changes) -> IdCacheResult<Vec<String>> {
        let mut keys = Vec::new();
        self.extend_keys_for_changes(record, changes, &mut keys)?;
        Ok(keys)
    }

    /// Best-effort form of [`keys_for_changes`](Self::keys_for_changes),
    /// with the same skipping rule as [`extend_keys_for`](Self::extend_keys_for).
    pub fn extend_keys_for_changes(
        &self,
        record: &T,
        changes: &Changes,
        keys: &mut Vec<String>,
    ) -> IdCacheResult<()> {
        let primary_key_changed = changes.contains(self.schema.primary_key_attribute());
        let mut first_error = None;
        for index in self.schema.cache_indexes() {
            if !primary_key_changed && !index.intersects(changes.names()) {
                continue;
            }
            let current = match self.current_values(index, record) {
                Ok(values) => values,
                Err(e) => {
                    first_error.get_or_insert(e);
                    continue;
                }
            };
            let previous: Vec<AttrValue> = index
                .attributes()
                .iter()
                .zip(&current)
                .map(|(name, value)| changes.previous(name).unwrap_or(value).clone())
                .collect();

            let new_key = self.keys.index_key(&self.schema, index, &current);
            let old_key = self.keys.index_key(&self.schema, index, &previous);
            if old_key != new_key {
                keys.push(old_key);
            }
            keys.push(new_key);
        }
        first_error.map_or(Ok(()), Err)
    }

    fn record(&self, index: &CacheIndex, primary_key: Option<&PrimaryKey>, hit: bool) {
        self.instrumentation
            .record_index(self.schema.name(), &index.key_fragment(), primary_key, hit);
    }

    async fn lookup_primary_key(
        &self,
        index: &CacheIndex,
        values: &[AttrValue],
    ) -> IdCacheResult<Option<PrimaryKey>> {
        self.store
            .find_primary_key_by_attributes(index.attributes(), values)
            .await
    }

    fn current_values(&self, index: &CacheIndex, record: &T) -> IdCacheResult<Vec<AttrValue>> {
        index
            .attributes()
            .iter()
            .map(|name| {
                record.attribute(name).ok_or_else(|| {
                    IdCacheError::from(DeclarationError::MissingAttributeValue {
                        entity_type: self.schema.name().to_string(),
                        attribute: name.clone(),
                    })
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::CACHED_NIL;
    use crate::cache::memory_backend::InMemoryTransport;
    use crate::MockRecordStore;
    use idcache_core::AttributeType;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Account {
        id: i64,
        email: String,
        region: String,
    }

    impl CacheableEntity for Account {
        fn primary_key(&self) -> PrimaryKey {
            PrimaryKey::from(self.id)
        }

        fn attribute(&self, name: &str) -> Option<AttrValue> {
            match name {
                "id" => Some(self.id.into()),
                "email" => Some(self.email.clone().into()),
                "region" => Some(self.region.clone().into()),
                _ => None,
            }
        }
    }

    type Indexes = IndexCache<Account, InMemoryTransport, MockRecordStore<Account>>;

    fn setup() -> (Indexes, Arc<InMemoryTransport>, Arc<MockRecordStore<Account>>) {
        let schema = EntitySchema::builder("Account")
            .attribute("id", AttributeType::Integer)
            .attribute("email", AttributeType::String)
            .attribute("region", AttributeType::String)
            .cache_index(&["email"])
            .cache_index(&["region", "email"])
            .build()
            .unwrap();
        let config = Arc::new(CacheConfig::default());
        let transport = Arc::new(InMemoryTransport::new());
        let store = Arc::new(MockRecordStore::new("Account"));
        let adapter = Arc::new(TransportAdapter::new(
            Arc::clone(&transport),
            Arc::clone(&config),
        ));
        let instrumentation = FetchInstrumentation::new(16);
        let blobs = Arc::new(BlobCache::new(
            Arc::clone(&schema),
            Arc::clone(&config),
            Arc::clone(&adapter),
            Arc::clone(&store),
            instrumentation.clone(),
        ));
        let indexes = IndexCache::new(
            schema,
            config,
            adapter,
            Arc::clone(&store),
            blobs,
            instrumentation,
        );
        (indexes, transport, store)
    }

    fn account(id: i64, email: &str, region: &str) -> Account {
        Account {
            id,
            email: email.to_string(),
            region: region.to_string(),
        }
    }

    #[tokio::test]
    async fn test_index_miss_then_hit() {
        let (indexes, _, store) = setup();
        store.insert(account(1, "a@x.io", "eu")).unwrap();

        let found = indexes.fetch_by(&["email"], &["a@x.io".into()]).await.unwrap();
        assert_eq!(found, Some(account(1, "a@x.io", "eu")));
        assert_eq!(store.attribute_queries(), 1);
        assert_eq!(store.primary_key_queries(), 1);

        let found = indexes.fetch_by(&["email"], &["a@x.io".into()]).await.unwrap();
        assert_eq!(found, Some(account(1, "a@x.io", "eu")));
        assert_eq!(store.total_queries(), 2);
    }

    #[tokio::test]
    async fn test_index_negative_result_skips_blob() {
        let (indexes, transport, store) = setup();

        for _ in 0..3 {
            assert_eq!(
                indexes.fetch_by(&["email"], &["nobody".into()]).await.unwrap(),
                None
            );
        }
        assert_eq!(store.attribute_queries(), 1);
        assert_eq!(store.primary_key_queries(), 0);

        let key = indexes.key(&["email"], &["nobody".into()]).unwrap();
        assert_eq!(transport.get_raw(&key).await.as_deref(), Some(CACHED_NIL));
    }

    #[tokio::test]
    async fn test_index_miss_emits_index_and_blob_events() {
        let (indexes, _, store) = setup();
        store.insert(account(1, "a@x.io", "eu")).unwrap();
        let mut rx = indexes.instrumentation.subscribe();

        indexes.fetch_by(&["email"], &["a@x.io".into()]).await.unwrap();

        let index_event = rx.recv().await.unwrap();
        assert_eq!(index_event.index.as_deref(), Some("email"));
        assert!(!index_event.hit);
        assert_eq!(index_event.id, Some(PrimaryKey::from(1i64)));

        let blob_event = rx.recv().await.unwrap();
        assert!(!blob_event.is_index());
        assert!(!blob_event.hit);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_composite_index_any_order() {
        let (indexes, _, store) = setup();
        store.insert(account(2, "b@x.io", "us")).unwrap();

        let a = indexes
            .fetch_by(&["region", "email"], &["us".into(), "b@x.io".into()])
            .await
            .unwrap();
        let b = indexes
            .fetch_by(&["email", "region"], &["b@x.io".into(), "us".into()])
            .await
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(store.attribute_queries(), 1);
    }

    #[tokio::test]
    async fn test_undeclared_index_fails_fast() {
        let (indexes, transport, store) = setup();

        let err = indexes.fetch_by(&["region"], &["eu".into()]).await.unwrap_err();
        assert!(matches!(
            err,
            IdCacheError::Declaration(DeclarationError::UndeclaredIndex { .. })
        ));
        assert_eq!(store.total_queries(), 0);
        assert!(transport.is_empty().await);

        let err = indexes.fetch_by(&["email"], &[]).await.unwrap_err();
        assert!(matches!(
            err,
            IdCacheError::Declaration(DeclarationError::ArityMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_repeated_attribute_name_fails_fast() {
        let (indexes, transport, store) = setup();

        let err = indexes
            .fetch_by(&["email", "email"], &["a@x.io".into(), "a@x.io".into()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IdCacheError::Declaration(DeclarationError::UndeclaredIndex { .. })
        ));
        let err = indexes
            .fetch_by(&["email", "email"], &["a@x.io".into()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IdCacheError::Declaration(DeclarationError::UndeclaredIndex { .. })
        ));
        assert_eq!(store.total_queries(), 0);
        assert!(transport.is_empty().await);
    }

    #[tokio::test]
    async fn test_separator_in_values_keeps_records_apart() {
        let (indexes, _, store) = setup();
        store.insert(account(1, "b", "a/")).unwrap();
        store.insert(account(2, "/b", "a")).unwrap();

        let first = indexes
            .fetch_by(&["region", "email"], &["a/".into(), "b".into()])
            .await
            .unwrap();
        let second = indexes
            .fetch_by(&["region", "email"], &["a".into(), "/b".into()])
            .await
            .unwrap();

        assert_eq!(first.map(|a| a.id), Some(1));
        assert_eq!(second.map(|a| a.id), Some(2));
        assert_eq!(store.attribute_queries(), 2);
    }

    #[tokio::test]
    async fn test_fetch_by_strict_not_found() {
        let (indexes, _, _) = setup();
        let err = indexes
            .fetch_by_strict(&["email"], &["nobody".into()])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("email=nobody"));
    }

    #[test]
    fn test_keys_for_changes_covers_old_and_new_values() {
        let (indexes, _, _) = setup();
        let updated = account(1, "new@x.io", "eu");
        let changes = Changes::new().with("email", "old@x.io", "new@x.io");

        let keys = indexes.keys_for_changes(&updated, &changes).unwrap();
        let expected = vec![
            indexes.key(&["email"], &["old@x.io".into()]).unwrap(),
            indexes.key(&["email"], &["new@x.io".into()]).unwrap(),
            indexes
                .key(&["region", "email"], &["eu".into(), "old@x.io".into()])
                .unwrap(),
            indexes
                .key(&["region", "email"], &["eu".into(), "new@x.io".into()])
                .unwrap(),
        ];
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_keys_for_changes_ignores_unrelated_attributes() {
        let (indexes, _, _) = setup();
        let updated = account(1, "a@x.io", "eu");
        let changes = Changes::new().with("nickname", "al", "alf");

        assert!(indexes.keys_for_changes(&updated, &changes).unwrap().is_empty());
    }

    #[test]
    fn test_primary_key_change_touches_every_index() {
        let (indexes, _, _) = setup();
        let moved = account(2, "a@x.io", "eu");
        let changes = Changes::new().with("id", 1i64, 2i64);

        let keys = indexes.keys_for_changes(&moved, &changes).unwrap();
        assert_eq!(keys, indexes.keys_for(&moved).unwrap());
    }

    #[test]
    fn test_keys_for_record() {
        let (indexes, _, _) = setup();
        let keys = indexes.keys_for(&account(1, "a@x.io", "eu")).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0], indexes.key(&["email"], &["a@x.io".into()]).unwrap());
    }
}
