//! LMDB-backed cache transport.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key/value store shared by every process that opens the same directory.
//! Keys are the UTF-8 bytes of the cache key; values are stored as given.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The transport uses:
//! - Read transactions for `read` and `read_multi`
//! - Write transactions for `write`, `delete` and `delete_prefix`

use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use idcache_core::TransportError;

use super::traits::CacheTransport;

/// Error type for LMDB transport operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbTransportError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbTransportError> for TransportError {
    fn from(e: LmdbTransportError) -> Self {
        match e {
            LmdbTransportError::EnvOpen(_) | LmdbTransportError::Io(_) => {
                TransportError::Unavailable {
                    reason: e.to_string(),
                }
            }
            _ => TransportError::Backend {
                reason: e.to_string(),
            },
        }
    }
}

fn txn_error(e: heed::Error) -> LmdbTransportError {
    LmdbTransportError::Transaction(e.to_string())
}

/// LMDB-backed cache transport.
///
/// # Example
///
/// ```ignore
/// use idcache_storage::{IdentityCache, LmdbTransport};
///
/// let transport = Arc::new(LmdbTransport::new("/var/cache/idcache", 256)?);
/// let cache = IdentityCache::new(schema, transport, store, CacheConfig::from_env());
/// ```
pub struct LmdbTransport {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbTransport {
    /// Open (or create) an LMDB transport.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbTransportError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbTransportError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbTransportError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_error)?;

        Ok(Self { env, db })
    }

    /// Number of stored entries.
    pub fn entry_count(&self) -> Result<u64, LmdbTransportError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        self.db.len(&rtxn).map_err(txn_error)
    }

    /// Delete every entry whose key starts with `prefix`, e.g. a whole
    /// namespace. Returns how many entries were removed.
    pub fn delete_prefix(&self, prefix: &str) -> Result<u64, LmdbTransportError> {
        let keys = self.collect_keys_with_prefix(prefix.as_bytes())?;

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let mut deleted = 0u64;
        for key in &keys {
            if self.db.delete(&mut wtxn, key).map_err(txn_error)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_error)?;

        Ok(deleted)
    }

    fn collect_keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, LmdbTransportError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let mut keys = Vec::new();
        for result in self.db.iter(&rtxn).map_err(txn_error)? {
            let (key, _) = result.map_err(txn_error)?;
            if key.starts_with(prefix) {
                keys.push(key.to_vec());
            }
        }
        Ok(keys)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, LmdbTransportError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let value = self.db.get(&rtxn, key.as_bytes()).map_err(txn_error)?;
        Ok(value.map(<[u8]>::to_vec))
    }
}

#[async_trait]
impl CacheTransport for LmdbTransport {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.get(key)?)
    }

    async fn read_multi(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, TransportError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let value = self.db.get(&rtxn, key.as_bytes()).map_err(txn_error)?;
            values.push(value.map(<[u8]>::to_vec));
        }
        Ok(values)
    }

    async fn write(&self, key: &str, value: &[u8]) -> Result<(), TransportError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), value)
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), TransportError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }
}
