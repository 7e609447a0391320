//! Identity cache layer.
//!
//! This module provides read-through caching of records by primary key and
//! by declared unique attribute tuples:
//!
//! - **Key generation**: namespaced, schema-fingerprinted blob and index keys
//! - **Negative caching**: a confirmed "not found" is cached as a tagged entry,
//!   distinct from an absent key
//! - **Two-stage fetch**: index lookups resolve a primary key, then delegate
//!   to the blob cache
//! - **Lifecycle invalidation**: explicit hooks delete every key a committed
//!   mutation makes stale
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       IdentityCache                          │
//! │  ┌──────────────┐  delegates  ┌──────────────┐               │
//! │  │  IndexCache  │ ──────────► │  BlobCache   │ ──► telemetry │
//! │  └──────┬───────┘             └──────┬───────┘               │
//! │         └──────────┬─────────────────┘                       │
//! │            ┌───────▼─────────┐      ┌──────────────┐         │
//! │            │TransportAdapter │      │ RecordStore  │         │
//! │            └───────┬─────────┘      └──────────────┘         │
//! └────────────────────┼─────────────────────────────────────────┘
//!                      ▼
//!        CacheTransport (InMemory / LMDB / ...)
//! ```

pub mod adapter;
pub mod blob;
pub mod entry;
pub mod index;
pub mod key;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod read_through;
pub mod telemetry;
pub mod traits;

pub use adapter::TransportAdapter;
pub use blob::BlobCache;
pub use entry::{CacheEntry, CACHED_NIL};
pub use index::IndexCache;
pub use key::KeyGenerator;
pub use lmdb_backend::{LmdbTransport, LmdbTransportError};
pub use memory_backend::InMemoryTransport;
pub use read_through::IdentityCache;
pub use telemetry::{FetchEvent, FetchInstrumentation, FETCH_EVENT};
pub use traits::{CacheStats, CacheTransport, CacheableEntity};
