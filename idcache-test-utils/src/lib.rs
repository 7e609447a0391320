//! IDCACHE Test Utilities
//!
//! Centralized test infrastructure for the identity cache workspace:
//! - A `Record` fixture entity and its schema
//! - Transports that record or inject faults
//! - Proptest generators for keys, values and records
//! - Custom assertions for cache-specific errors

// Re-export mock store from its source crate
pub use idcache_storage::MockRecordStore;

// Re-export core types for convenience
pub use idcache_core::{
    AttrValue, AttributeType, CacheConfig, Changes, CodecError, DeclarationError, EntitySchema,
    IdCacheError, IdCacheResult, Namespace, PrimaryKey, StoreError, TransportError,
};
pub use idcache_storage::{
    CacheTransport, CacheableEntity, FetchEvent, IdentityCache, InMemoryTransport, CACHED_NIL,
};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// RECORD FIXTURE ENTITY
// ============================================================================

/// Entity used throughout the cache tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub title: String,
    pub record_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: title.into(),
            record_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl CacheableEntity for Record {
    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::from(self.id)
    }

    fn attribute(&self, name: &str) -> Option<AttrValue> {
        match name {
            "id" => Some(self.id.into()),
            "title" => Some(self.title.clone().into()),
            "record_id" => Some(self.record_id.into()),
            "created_at" => Some(self.created_at.into()),
            "updated_at" => Some(self.updated_at.into()),
            _ => None,
        }
    }
}

/// Cache wired to a recording transport and a counting store.
pub type RecordCache = IdentityCache<Record, RecordingTransport, MockRecordStore<Record>>;

/// Everything a cache test needs, sharing one transport and one store.
pub struct CacheHarness {
    pub cache: RecordCache,
    pub transport: Arc<RecordingTransport>,
    pub store: Arc<MockRecordStore<Record>>,
}

impl CacheHarness {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_schema(fixtures::record_schema(), config)
    }

    pub fn with_schema(schema: Arc<EntitySchema>, config: CacheConfig) -> Self {
        let transport = Arc::new(RecordingTransport::new());
        let store = Arc::new(MockRecordStore::new(schema.name()));
        let cache = IdentityCache::new(schema, Arc::clone(&transport), Arc::clone(&store), config);
        Self {
            cache,
            transport,
            store,
        }
    }

    /// Insert `record` into the store and run the create hook.
    pub async fn create(&self, record: Record) -> IdCacheResult<Record> {
        self.store.insert(record.clone())?;
        self.cache.on_created(&record).await?;
        Ok(record)
    }

    /// Forget recorded transport operations and store query counts.
    pub fn reset(&self) {
        self.transport.clear_ops();
        self.store.reset_counters();
    }
}

impl Default for CacheHarness {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

// ============================================================================
// TRANSPORTS
// ============================================================================

/// One operation observed by a [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOp {
    Read(String),
    ReadMulti(Vec<String>),
    Write(String),
    Delete(String),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory transport that logs every operation in order.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    inner: InMemoryTransport,
    ops: Mutex<Vec<TransportOp>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// The backing in-memory transport.
    pub fn inner(&self) -> &InMemoryTransport {
        &self.inner
    }

    /// Operations observed since creation or the last clear.
    pub fn ops(&self) -> Vec<TransportOp> {
        lock(&self.ops).clone()
    }

    pub fn clear_ops(&self) {
        lock(&self.ops).clear();
    }

    pub fn read_count(&self) -> usize {
        self.count(|op| matches!(op, TransportOp::Read(_) | TransportOp::ReadMulti(_)))
    }

    pub fn write_count(&self) -> usize {
        self.count(|op| matches!(op, TransportOp::Write(_)))
    }

    pub fn delete_count(&self) -> usize {
        self.count(|op| matches!(op, TransportOp::Delete(_)))
    }

    fn count(&self, pred: impl Fn(&TransportOp) -> bool) -> usize {
        lock(&self.ops).iter().filter(|op| pred(op)).count()
    }

    fn log(&self, op: TransportOp) {
        lock(&self.ops).push(op);
    }
}

#[async_trait]
impl CacheTransport for RecordingTransport {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, TransportError> {
        self.log(TransportOp::Read(key.to_string()));
        self.inner.read(key).await
    }

    async fn read_multi(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, TransportError> {
        self.log(TransportOp::ReadMulti(keys.to_vec()));
        self.inner.read_multi(keys).await
    }

    async fn write(&self, key: &str, value: &[u8]) -> Result<(), TransportError> {
        self.log(TransportOp::Write(key.to_string()));
        self.inner.write(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), TransportError> {
        self.log(TransportOp::Delete(key.to_string()));
        self.inner.delete(key).await
    }
}

/// In-memory transport whose reads, writes and deletes can be switched
/// to fail with `TransportError::Unavailable`.
#[derive(Debug, Default)]
pub struct FaultyTransport {
    inner: InMemoryTransport,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
    delete_attempts: AtomicU64,
}

impl FaultyTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &InMemoryTransport {
        &self.inner
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Number of delete calls, failed or not.
    pub fn delete_attempts(&self) -> u64 {
        self.delete_attempts.load(Ordering::SeqCst)
    }

    fn check(&self, flag: &AtomicBool, op: &str) -> Result<(), TransportError> {
        if flag.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable {
                reason: format!("injected {} fault", op),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CacheTransport for FaultyTransport {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, TransportError> {
        self.check(&self.fail_reads, "read")?;
        self.inner.read(key).await
    }

    async fn read_multi(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, TransportError> {
        self.check(&self.fail_reads, "read")?;
        self.inner.read_multi(keys).await
    }

    async fn write(&self, key: &str, value: &[u8]) -> Result<(), TransportError> {
        self.check(&self.fail_writes, "write")?;
        self.inner.write(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), TransportError> {
        self.delete_attempts.fetch_add(1, Ordering::SeqCst);
        self.check(&self.fail_deletes, "delete")?;
        self.inner.delete(key).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache keys, values and records.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Generate a timestamp within 2020-2030, truncated to whole seconds.
    pub fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    pub fn arb_primary_key() -> impl Strategy<Value = PrimaryKey> {
        prop_oneof![
            any::<i64>().prop_map(PrimaryKey::Integer),
            arb_uuid().prop_map(PrimaryKey::Uuid),
            "[a-z0-9-]{1,24}".prop_map(PrimaryKey::String),
        ]
    }

    /// Generate an attribute value of any variant except `Json`.
    pub fn arb_attr_value() -> impl Strategy<Value = AttrValue> {
        prop_oneof![
            Just(AttrValue::Null),
            any::<i64>().prop_map(AttrValue::Integer),
            any::<bool>().prop_map(AttrValue::Boolean),
            ".{0,32}".prop_map(AttrValue::String),
            arb_timestamp().prop_map(AttrValue::DateTime),
            arb_uuid().prop_map(AttrValue::Uuid),
        ]
    }

    pub fn arb_title() -> impl Strategy<Value = String> {
        "[a-z]{1,12}( [a-z]{1,12}){0,3}"
    }

    pub fn arb_record() -> impl Strategy<Value = Record> {
        (
            1i64..1_000_000,
            arb_title(),
            proptest::option::of(1i64..1_000_000),
            arb_timestamp(),
            arb_timestamp(),
        )
            .prop_map(|(id, title, record_id, created_at, updated_at)| Record {
                id,
                title,
                record_id,
                created_at,
                updated_at,
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common cache scenarios.

    use super::*;

    /// Schema for [`Record`] with unique cache indexes on `title` and on
    /// `(id, title)`.
    ///
    /// The schema is valid by construction; a failure here is a bug in
    /// the fixture itself.
    pub fn record_schema() -> Arc<EntitySchema> {
        record_schema_builder()
            .build()
            .unwrap_or_else(|e| panic!("record fixture schema is invalid: {}", e))
    }

    /// Builder for the [`Record`] schema, for tests that add a namespace.
    pub fn record_schema_builder() -> idcache_core::EntitySchemaBuilder {
        EntitySchema::builder("Record")
            .attribute("id", AttributeType::Integer)
            .attribute("title", AttributeType::String)
            .attribute("record_id", AttributeType::Integer)
            .attribute("created_at", AttributeType::DateTime)
            .attribute("updated_at", AttributeType::DateTime)
            .cache_index(&["title"])
            .cache_index(&["id", "title"])
    }

    pub fn bob() -> Record {
        Record::new(1, "bob")
    }

    pub fn fred() -> Record {
        Record::new(2, "fred")
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for identity cache error variants.

    use super::*;

    /// Assert that a result is a `NotFound` error for `entity_type`.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &IdCacheResult<T>, entity_type: &str) {
        match result {
            Err(IdCacheError::NotFound { entity_type: et, .. }) => {
                assert_eq!(et, entity_type, "Wrong entity type in NotFound error");
            }
            other => panic!("Expected NotFound error for {}, got: {:?}", entity_type, other),
        }
    }

    /// Assert that a result is an `UndeclaredIndex` declaration error.
    #[track_caller]
    pub fn assert_undeclared_index<T: std::fmt::Debug>(result: &IdCacheResult<T>) {
        match result {
            Err(IdCacheError::Declaration(DeclarationError::UndeclaredIndex { .. })) => {}
            other => panic!("Expected UndeclaredIndex error, got: {:?}", other),
        }
    }

    /// Assert that a result is a transport error.
    #[track_caller]
    pub fn assert_transport_error<T: std::fmt::Debug>(result: &IdCacheResult<T>) {
        match result {
            Err(IdCacheError::Transport(_)) => {}
            other => panic!("Expected Transport error, got: {:?}", other),
        }
    }

    /// Assert that a result is a store error.
    #[track_caller]
    pub fn assert_store_error<T: std::fmt::Debug>(result: &IdCacheResult<T>) {
        match result {
            Err(IdCacheError::Store(_)) => {}
            other => panic!("Expected Store error, got: {:?}", other),
        }
    }
}
