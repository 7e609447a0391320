//! Fetch telemetry.
//!
//! Every blob-level fetch emits one [`FetchEvent`] on a broadcast channel
//! and bumps the hit/miss counters. An index fetch emits its own event for
//! the index lookup, and the blob fetch it delegates to emits another, so
//! an index-driven fetch that finds a record produces two events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use idcache_core::PrimaryKey;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::traits::CacheStats;

/// Name carried by every fetch event.
pub const FETCH_EVENT: &str = "fetch";

/// Outcome of a single cache lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchEvent {
    pub name: &'static str,
    pub entity_type: String,
    pub hit: bool,
    /// Primary key fetched, or resolved by an index lookup. `None` when an
    /// index lookup found nothing.
    pub id: Option<PrimaryKey>,
    /// Comma-joined index attributes for index lookups, `None` for blobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
}

impl FetchEvent {
    pub fn is_index(&self) -> bool {
        self.index.is_some()
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Shared sink for fetch events. Cheap to clone.
#[derive(Debug, Clone)]
pub struct FetchInstrumentation {
    tx: broadcast::Sender<FetchEvent>,
    counters: Arc<Counters>,
}

impl FetchInstrumentation {
    /// Create an instrumentation sink buffering up to `capacity` events
    /// per slow subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Record one blob-level fetch.
    ///
    /// Having no subscribers is fine; the event is dropped.
    pub fn record(&self, entity_type: &str, id: &PrimaryKey, hit: bool) {
        self.emit(FetchEvent {
            name: FETCH_EVENT,
            entity_type: entity_type.to_string(),
            hit,
            id: Some(id.clone()),
            index: None,
        });
    }

    /// Record one index lookup on `index` (comma-joined attribute names).
    pub fn record_index(&self, entity_type: &str, index: &str, id: Option<&PrimaryKey>, hit: bool) {
        self.emit(FetchEvent {
            name: FETCH_EVENT,
            entity_type: entity_type.to_string(),
            hit,
            id: id.cloned(),
            index: Some(index.to_string()),
        });
    }

    fn emit(&self, event: FetchEvent) {
        let counter = if event.hit {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let entity_type = event.entity_type.clone();
        let hit = event.hit;
        let index = event.index.clone().unwrap_or_default();
        match self.tx.send(event) {
            Ok(receivers) => debug!(entity_type = %entity_type, index = %index, hit, receivers, "Fetch"),
            Err(_) => trace!(entity_type = %entity_type, index = %index, hit, "Fetch (no subscribers)"),
        }
    }

    /// Subscribe to future fetch events.
    pub fn subscribe(&self) -> broadcast::Receiver<FetchEvent> {
        self.tx.subscribe()
    }

    /// Snapshot of the hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for FetchInstrumentation {
    fn default() -> Self {
        Self::new(1024)
    }
}
