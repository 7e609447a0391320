//! IDCACHE Core - Schema, Key and Value Types
//!
//! Pure data structures shared by the cache layer. Nothing in this crate
//! performs I/O: schemas are declared once, fingerprinted, and then treated
//! as immutable process-wide state for the lifetime of the entity type.

pub mod config;
pub mod error;
pub mod schema;
pub mod value;

pub use config::{CacheConfig, Namespace, DEFAULT_NAMESPACE};
pub use error::{
    CodecError, DeclarationError, IdCacheError, IdCacheResult, StoreError, TransportError,
};
pub use schema::{
    AttributeDecl, AttributeType, CacheIndex, EntitySchema, EntitySchemaBuilder, ResolvedIndex,
    SchemaFingerprint,
};
pub use value::{AttrValue, Changes, PrimaryKey};

use sha2::{Digest, Sha256};

/// Hash an arbitrary string into the hex digest used inside cache keys.
///
/// Used both for schema fingerprints and for index value tuples, so the
/// output must stay stable across processes and releases.
pub fn cache_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
