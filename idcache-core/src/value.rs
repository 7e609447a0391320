//! Attribute values, primary keys and change sets.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::schema::AttributeType;

/// A single attribute value as seen by the cache layer.
///
/// Only used to derive index keys and to detect primary key changes; the
/// record body itself is serialized by the entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Null,
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Uuid(Uuid),
    Json(serde_json::Value),
}

impl AttrValue {
    /// Canonical text form hashed into index keys.
    pub fn cache_fragment(&self) -> String {
        match self {
            AttrValue::Null => String::new(),
            AttrValue::Integer(v) => v.to_string(),
            AttrValue::Float(v) => v.to_string(),
            AttrValue::String(v) => v.clone(),
            AttrValue::Boolean(v) => v.to_string(),
            AttrValue::DateTime(v) => v.to_rfc3339_opts(SecondsFormat::Micros, true),
            AttrValue::Uuid(v) => v.hyphenated().to_string(),
            AttrValue::Json(v) => v.to_string(),
        }
    }

    /// The declared type this value satisfies, or `None` for `Null`.
    pub fn attribute_type(&self) -> Option<AttributeType> {
        match self {
            AttrValue::Null => None,
            AttrValue::Integer(_) => Some(AttributeType::Integer),
            AttrValue::Float(_) => Some(AttributeType::Float),
            AttrValue::String(_) => Some(AttributeType::String),
            AttrValue::Boolean(_) => Some(AttributeType::Boolean),
            AttrValue::DateTime(_) => Some(AttributeType::DateTime),
            AttrValue::Uuid(_) => Some(AttributeType::Uuid),
            AttrValue::Json(_) => Some(AttributeType::Json),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttrValue::Null)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Integer(v)
    }
}

impl From<i32> for AttrValue {
    fn from(v: i32) -> Self {
        AttrValue::Integer(i64::from(v))
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Boolean(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::String(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::String(v)
    }
}

impl From<DateTime<Utc>> for AttrValue {
    fn from(v: DateTime<Utc>) -> Self {
        AttrValue::DateTime(v)
    }
}

impl From<Uuid> for AttrValue {
    fn from(v: Uuid) -> Self {
        AttrValue::Uuid(v)
    }
}

impl<T: Into<AttrValue>> From<Option<T>> for AttrValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(AttrValue::Null)
    }
}

/// Primary key of a cached record.
///
/// The `Display` form is what appears at the end of a blob key, so
/// `PrimaryKey::Integer(1)` lands in `...:1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrimaryKey {
    Integer(i64),
    Uuid(Uuid),
    String(String),
}

impl PrimaryKey {
    /// Interpret an attribute value as a primary key.
    pub fn from_attr(value: &AttrValue) -> Option<Self> {
        match value {
            AttrValue::Integer(v) => Some(PrimaryKey::Integer(*v)),
            AttrValue::Uuid(v) => Some(PrimaryKey::Uuid(*v)),
            AttrValue::String(v) => Some(PrimaryKey::String(v.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryKey::Integer(v) => write!(f, "{}", v),
            PrimaryKey::Uuid(v) => write!(f, "{}", v.hyphenated()),
            PrimaryKey::String(v) => f.write_str(v),
        }
    }
}

impl From<i64> for PrimaryKey {
    fn from(v: i64) -> Self {
        PrimaryKey::Integer(v)
    }
}

impl From<i32> for PrimaryKey {
    fn from(v: i32) -> Self {
        PrimaryKey::Integer(i64::from(v))
    }
}

impl From<Uuid> for PrimaryKey {
    fn from(v: Uuid) -> Self {
        PrimaryKey::Uuid(v)
    }
}

impl From<&str> for PrimaryKey {
    fn from(v: &str) -> Self {
        PrimaryKey::String(v.to_string())
    }
}

impl From<String> for PrimaryKey {
    fn from(v: String) -> Self {
        PrimaryKey::String(v)
    }
}

impl From<PrimaryKey> for AttrValue {
    fn from(v: PrimaryKey) -> Self {
        match v {
            PrimaryKey::Integer(v) => AttrValue::Integer(v),
            PrimaryKey::Uuid(v) => AttrValue::Uuid(v),
            PrimaryKey::String(v) => AttrValue::String(v),
        }
    }
}

/// Attribute changes applied by an update, keyed by attribute name.
///
/// Each entry holds the value before and after the write. The names are
/// what `on_updated` cross-references against declared cache indexes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    entries: BTreeMap<String, (AttrValue, AttrValue)>,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `name` changed from `before` to `after`.
    pub fn with(
        mut self,
        name: impl Into<String>,
        before: impl Into<AttrValue>,
        after: impl Into<AttrValue>,
    ) -> Self {
        self.record(name, before, after);
        self
    }

    pub fn record(
        &mut self,
        name: impl Into<String>,
        before: impl Into<AttrValue>,
        after: impl Into<AttrValue>,
    ) {
        self.entries
            .insert(name.into(), (before.into(), after.into()));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Value before the update, if `name` changed.
    pub fn previous(&self, name: &str) -> Option<&AttrValue> {
        self.entries.get(name).map(|(before, _)| before)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
