//! Error types for identity cache operations

use thiserror::Error;

/// Backing store errors.
///
/// These propagate to the caller unchanged; the cache layer never retries
/// a store query on its own.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Query failed for {entity_type}: {reason}")]
    QueryFailed { entity_type: String, reason: String },

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Cache transport errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Cache transport unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache backend error: {reason}")]
    Backend { reason: String },
}

/// Declaration errors. These are programming errors, never cache misses.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeclarationError {
    #[error("{entity_type} has no unique cache index on ({})", attributes.join(", "))]
    UndeclaredIndex {
        entity_type: String,
        attributes: Vec<String>,
    },

    #[error("Index ({}) on {entity_type} takes {expected} values, got {got}", attributes.join(", "))]
    ArityMismatch {
        entity_type: String,
        attributes: Vec<String>,
        expected: usize,
        got: usize,
    },

    #[error("Unknown attribute {attribute} on {entity_type}")]
    UnknownAttribute {
        entity_type: String,
        attribute: String,
    },

    #[error("Attribute {attribute} declared twice on {entity_type}")]
    DuplicateAttribute {
        entity_type: String,
        attribute: String,
    },

    #[error("Cache index on {entity_type} must name at least one attribute")]
    EmptyIndex { entity_type: String },

    #[error("Primary key attribute {attribute} is not declared on {entity_type}")]
    MissingPrimaryKey {
        entity_type: String,
        attribute: String,
    },

    #[error("Record of {entity_type} has no value for attribute {attribute}")]
    MissingAttributeValue {
        entity_type: String,
        attribute: String,
    },
}

/// Cache entry codec errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Failed to encode cache entry: {reason}")]
    Encode { reason: String },

    #[error("Failed to decode cache entry: {reason}")]
    Decode { reason: String },
}

/// Master error type for all identity cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdCacheError {
    #[error("{entity_type} not found for {key}")]
    NotFound { entity_type: String, key: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Declaration error: {0}")]
    Declaration(#[from] DeclarationError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl IdCacheError {
    /// Returns true for the not-found condition raised by strict fetches.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type alias for identity cache operations.
pub type IdCacheResult<T> = Result<T, IdCacheError>;

// =============================================================================
// TESTS
// =============================================================================
