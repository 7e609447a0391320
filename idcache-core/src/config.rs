//! Cache configuration.
//!
//! Configuration is an explicit value handed to the cache at construction
//! time. Namespaces are resolved on every key derivation, so a computed
//! namespace can follow per-tenant state without a restart.

use std::fmt;
use std::sync::Arc;

use crate::schema::EntitySchema;

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "IDC:";

type NamespaceFn = dyn Fn(&EntitySchema) -> String + Send + Sync;

/// Prefix prepended to every cache key.
#[derive(Clone)]
pub enum Namespace {
    /// The same prefix for every entity type.
    Static(String),
    /// A prefix computed from the entity type at key derivation time.
    Computed(Arc<NamespaceFn>),
}

impl Namespace {
    pub fn fixed(prefix: impl Into<String>) -> Self {
        Namespace::Static(prefix.into())
    }

    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&EntitySchema) -> String + Send + Sync + 'static,
    {
        Namespace::Computed(Arc::new(f))
    }

    /// Resolve the prefix for `schema`.
    pub fn resolve(&self, schema: &EntitySchema) -> String {
        match self {
            Namespace::Static(prefix) => prefix.clone(),
            Namespace::Computed(f) => f(schema),
        }
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Namespace::Static(DEFAULT_NAMESPACE.to_string())
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Static(prefix) => f.debug_tuple("Static").field(prefix).finish(),
            Namespace::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Configuration for the identity cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Prefix for every key, unless the entity type overrides it.
    pub namespace: Namespace,
    /// When false, reads go straight to the store and nothing is cached.
    pub enabled: bool,
    /// When true, cache reads happen but population writes are skipped.
    pub readonly: bool,
    /// Extra delete attempts before an invalidation fault is surfaced.
    pub invalidation_retries: u32,
    /// Capacity of the fetch telemetry broadcast channel.
    pub telemetry_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: Namespace::default(),
            enabled: true,
            readonly: false,
            invalidation_retries: 2,
            telemetry_capacity: 1024,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a CacheConfig from environment variables.
    ///
    /// Environment variables:
    /// - `IDCACHE_NAMESPACE`: Static key prefix (default: "IDC:")
    /// - `IDCACHE_ENABLED`: "true" or "false" (default: true)
    /// - `IDCACHE_READONLY`: "true" or "false" (default: false)
    /// - `IDCACHE_INVALIDATION_RETRIES`: Extra delete attempts (default: 2)
    /// - `IDCACHE_TELEMETRY_CAPACITY`: Broadcast buffer size (default: 1024)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let namespace = std::env::var("IDCACHE_NAMESPACE")
            .ok()
            .map(Namespace::Static)
            .unwrap_or(defaults.namespace);

        let enabled = std::env::var("IDCACHE_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(defaults.enabled);

        let readonly = std::env::var("IDCACHE_READONLY")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(defaults.readonly);

        let invalidation_retries = std::env::var("IDCACHE_INVALIDATION_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.invalidation_retries);

        let telemetry_capacity = std::env::var("IDCACHE_TELEMETRY_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|c: &usize| *c > 0)
            .unwrap_or(defaults.telemetry_capacity);

        Self {
            namespace,
            enabled,
            readonly,
            invalidation_retries,
            telemetry_capacity,
        }
    }

    /// Set a static namespace.
    pub fn with_namespace(mut self, prefix: impl Into<String>) -> Self {
        self.namespace = Namespace::Static(prefix.into());
        self
    }

    /// Set a namespace computed from the entity type.
    pub fn with_computed_namespace<F>(mut self, f: F) -> Self
    where
        F: Fn(&EntitySchema) -> String + Send + Sync + 'static,
    {
        self.namespace = Namespace::computed(f);
        self
    }

    /// Enable or disable caching.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Enable or disable readonly mode.
    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    /// Set the invalidation retry count.
    pub fn with_invalidation_retries(mut self, retries: u32) -> Self {
        self.invalidation_retries = retries;
        self
    }

    /// Set the telemetry channel capacity.
    pub fn with_telemetry_capacity(mut self, capacity: usize) -> Self {
        self.telemetry_capacity = capacity.max(1);
        self
    }

    /// Namespace for `schema`: its own override first, then the global one.
    pub fn namespace_for(&self, schema: &EntitySchema) -> String {
        schema
            .namespace_override()
            .unwrap_or(&self.namespace)
            .resolve(schema)
    }
}
