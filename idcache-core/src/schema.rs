//! Entity schemas, fingerprints and cache index declarations.
//!
//! An [`EntitySchema`] is built once per entity type and shared behind an
//! `Arc`. Its fingerprint is folded into every blob key, so changing the
//! attribute set makes previously cached blobs unreachable without any
//! explicit purge.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::config::Namespace;
use crate::error::DeclarationError;
use crate::value::AttrValue;
use crate::cache_hash;

/// Declared type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    Integer,
    Float,
    String,
    Boolean,
    DateTime,
    Uuid,
    Json,
}

impl AttributeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::Integer => "integer",
            AttributeType::Float => "float",
            AttributeType::String => "string",
            AttributeType::Boolean => "boolean",
            AttributeType::DateTime => "datetime",
            AttributeType::Uuid => "uuid",
            AttributeType::Json => "json",
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, typed attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDecl {
    pub name: String,
    pub attr_type: AttributeType,
}

/// Content hash over the sorted `name:type` pairs of an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaFingerprint(String);

impl SchemaFingerprint {
    /// Compute the fingerprint for a set of attribute declarations.
    ///
    /// Declaration order does not matter.
    pub fn compute(attributes: &[AttributeDecl]) -> Self {
        let mut pairs: Vec<String> = attributes
            .iter()
            .map(|a| format!("{}:{}", a.name, a.attr_type))
            .collect();
        pairs.sort();
        Self(cache_hash(&pairs.join(",")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SchemaFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A declared unique cache index: an ordered set of attribute names whose
/// value tuple identifies at most one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheIndex {
    attributes: Vec<String>,
}

impl CacheIndex {
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// Attribute names joined by comma, as they appear in the index key.
    pub fn key_fragment(&self) -> String {
        self.attributes.join(",")
    }

    /// True when any of `names` participates in this index.
    pub fn intersects<'a>(&self, mut names: impl Iterator<Item = &'a str>) -> bool {
        names.any(|n| self.attributes.iter().any(|a| a == n))
    }

    fn same_set(&self, names: &[&str]) -> bool {
        let requested: BTreeSet<&str> = names.iter().copied().collect();
        requested.len() == names.len()
            && requested.len() == self.attributes.len()
            && self.attributes.iter().all(|a| requested.contains(a.as_str()))
    }
}

impl fmt::Display for CacheIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UNIQUE ({})", self.attributes.join(", "))
    }
}

/// A declared index matched against the attribute names a caller used.
#[derive(Debug, Clone)]
pub struct ResolvedIndex<'a> {
    entity_type: &'a str,
    index: &'a CacheIndex,
    /// For each declared attribute, its position in the caller's list.
    positions: Vec<usize>,
}

impl<'a> ResolvedIndex<'a> {
    pub fn index(&self) -> &'a CacheIndex {
        self.index
    }

    /// Reorder the caller's values into declared attribute order.
    pub fn arrange(&self, values: &[AttrValue]) -> Result<Vec<AttrValue>, DeclarationError> {
        if values.len() != self.positions.len() {
            return Err(DeclarationError::ArityMismatch {
                entity_type: self.entity_type.to_string(),
                attributes: self.index.attributes.clone(),
                expected: self.positions.len(),
                got: values.len(),
            });
        }
        Ok(self.positions.iter().map(|&p| values[p].clone()).collect())
    }
}

/// Schema of a cacheable entity type.
#[derive(Debug)]
pub struct EntitySchema {
    name: String,
    collection: String,
    primary_key: String,
    attributes: Vec<AttributeDecl>,
    fingerprint: SchemaFingerprint,
    indexes: Vec<CacheIndex>,
    namespace: Option<Namespace>,
}

impl EntitySchema {
    /// Start declaring an entity type.
    pub fn builder(name: impl Into<String>) -> EntitySchemaBuilder {
        EntitySchemaBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table or collection name, available to computed namespaces.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn primary_key_attribute(&self) -> &str {
        &self.primary_key
    }

    pub fn attributes(&self) -> &[AttributeDecl] {
        &self.attributes
    }

    pub fn attribute_type(&self, name: &str) -> Option<AttributeType> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.attr_type)
    }

    pub fn fingerprint(&self) -> &SchemaFingerprint {
        &self.fingerprint
    }

    pub fn cache_indexes(&self) -> &[CacheIndex] {
        &self.indexes
    }

    /// Per-type namespace override, if one was declared.
    pub fn namespace_override(&self) -> Option<&Namespace> {
        self.namespace.as_ref()
    }

    /// Find the declared unique index covering exactly `names`.
    ///
    /// The names may be given in any order. Asking for an undeclared set
    /// is a programming error.
    pub fn resolve_index(&self, names: &[&str]) -> Result<ResolvedIndex<'_>, DeclarationError> {
        let undeclared = || DeclarationError::UndeclaredIndex {
            entity_type: self.name.clone(),
            attributes: names.iter().map(|n| n.to_string()).collect(),
        };
        let index = self
            .indexes
            .iter()
            .find(|idx| idx.same_set(names))
            .ok_or_else(undeclared)?;

        let positions = index
            .attributes
            .iter()
            .map(|attr| names.iter().position(|n| *n == attr.as_str()))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(undeclared)?;

        Ok(ResolvedIndex {
            entity_type: &self.name,
            index,
            positions,
        })
    }
}

/// Builder for [`EntitySchema`]. Validation happens in [`build`](Self::build).
#[derive(Debug)]
pub struct EntitySchemaBuilder {
    name: String,
    collection: Option<String>,
    primary_key: String,
    attributes: Vec<AttributeDecl>,
    indexes: Vec<Vec<String>>,
    namespace: Option<Namespace>,
}

impl EntitySchemaBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: None,
            primary_key: "id".to_string(),
            attributes: Vec::new(),
            indexes: Vec::new(),
            namespace: None,
        }
    }

    pub fn attribute(mut self, name: impl Into<String>, attr_type: AttributeType) -> Self {
        self.attributes.push(AttributeDecl {
            name: name.into(),
            attr_type,
        });
        self
    }

    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = name.into();
        self
    }

    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    /// Declare a unique cache index over `attributes`.
    pub fn cache_index(mut self, attributes: &[&str]) -> Self {
        self.indexes
            .push(attributes.iter().map(|a| a.to_string()).collect());
        self
    }

    pub fn namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = Some(namespace);
        self
    }

    /// Validate the declarations and freeze them.
    pub fn build(self) -> Result<Arc<EntitySchema>, DeclarationError> {
        for (i, attr) in self.attributes.iter().enumerate() {
            if self.attributes[..i].iter().any(|a| a.name == attr.name) {
                return Err(DeclarationError::DuplicateAttribute {
                    entity_type: self.name.clone(),
                    attribute: attr.name.clone(),
                });
            }
        }

        let declared = |name: &str| self.attributes.iter().any(|a| a.name == name);

        if !declared(self.primary_key.as_str()) {
            return Err(DeclarationError::MissingPrimaryKey {
                entity_type: self.name.clone(),
                attribute: self.primary_key.clone(),
            });
        }

        let mut indexes: Vec<CacheIndex> = Vec::with_capacity(self.indexes.len());
        for attributes in &self.indexes {
            if attributes.is_empty() {
                return Err(DeclarationError::EmptyIndex {
                    entity_type: self.name.clone(),
                });
            }
            if let Some(unknown) = attributes.iter().find(|a| !declared(a.as_str())) {
                return Err(DeclarationError::UnknownAttribute {
                    entity_type: self.name.clone(),
                    attribute: unknown.clone(),
                });
            }
            let index = CacheIndex {
                attributes: attributes.clone(),
            };
            let names: Vec<&str> = attributes.iter().map(String::as_str).collect();
            if !indexes.iter().any(|existing| existing.same_set(&names)) {
                indexes.push(index);
            }
        }

        let fingerprint = SchemaFingerprint::compute(&self.attributes);
        let collection = self
            .collection
            .unwrap_or_else(|| format!("{}s", self.name.to_lowercase()));

        Ok(Arc::new(EntitySchema {
            name: self.name,
            collection,
            primary_key: self.primary_key,
            attributes: self.attributes,
            fingerprint,
            indexes,
            namespace: self.namespace,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record_schema() -> Arc<EntitySchema> {
        EntitySchema::builder("Record")
            .attribute("id", AttributeType::Integer)
            .attribute("title", AttributeType::String)
            .attribute("record_id", AttributeType::Integer)
            .attribute("created_at", AttributeType::DateTime)
            .attribute("updated_at", AttributeType::DateTime)
            .cache_index(&["title"])
            .cache_index(&["id", "title"])
            .build()
            .expect("record schema should build")
    }

    #[test]
    fn test_fingerprint_matches_sorted_declarations() {
        let schema = record_schema();
        let expected = cache_hash(
            "created_at:datetime,id:integer,record_id:integer,title:string,updated_at:datetime",
        );
        assert_eq!(schema.fingerprint().as_str(), expected);
    }

    #[test]
    fn test_fingerprint_changes_with_type() {
        let a = SchemaFingerprint::compute(&[AttributeDecl {
            name: "id".into(),
            attr_type: AttributeType::Integer,
        }]);
        let b = SchemaFingerprint::compute(&[AttributeDecl {
            name: "id".into(),
            attr_type: AttributeType::String,
        }]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_default_collection_and_primary_key() {
        let schema = record_schema();
        assert_eq!(schema.collection(), "records");
        assert_eq!(schema.primary_key_attribute(), "id");
        assert_eq!(schema.attribute_type("title"), Some(AttributeType::String));
        assert_eq!(schema.cache_indexes().len(), 2);
    }

    #[test]
    fn test_resolve_index_any_order() {
        let schema = record_schema();
        let resolved = schema
            .resolve_index(&["title", "id"])
            .expect("index should resolve");
        assert_eq!(resolved.index().key_fragment(), "id,title");

        let values = resolved
            .arrange(&[AttrValue::from("bob"), AttrValue::from(1i64)])
            .expect("arity matches");
        assert_eq!(values, vec![AttrValue::from(1i64), AttrValue::from("bob")]);
    }

    #[test]
    fn test_resolve_undeclared_index_fails() {
        let schema = record_schema();
        let err = schema.resolve_index(&["record_id"]).unwrap_err();
        assert!(matches!(err, DeclarationError::UndeclaredIndex { .. }));

        let err = schema.resolve_index(&["title", "record_id"]).unwrap_err();
        assert!(matches!(err, DeclarationError::UndeclaredIndex { .. }));
    }

    #[test]
    fn test_resolve_rejects_repeated_names() {
        let schema = record_schema();
        let err = schema.resolve_index(&["title", "title"]).unwrap_err();
        assert!(matches!(err, DeclarationError::UndeclaredIndex { .. }));

        let err = schema.resolve_index(&["id", "id"]).unwrap_err();
        assert!(matches!(err, DeclarationError::UndeclaredIndex { .. }));
    }

    #[test]
    fn test_resolve_rejects_partial_set() {
        let schema = record_schema();
        let err = schema.resolve_index(&["id"]).unwrap_err();
        assert!(matches!(err, DeclarationError::UndeclaredIndex { .. }));

        let err = schema.resolve_index(&["id", "title", "title"]).unwrap_err();
        assert!(matches!(err, DeclarationError::UndeclaredIndex { .. }));
    }

    #[test]
    fn test_arrange_rejects_wrong_arity() {
        let schema = record_schema();
        let resolved = schema.resolve_index(&["title"]).unwrap();
        let err = resolved.arrange(&[]).unwrap_err();
        assert!(matches!(
            err,
            DeclarationError::ArityMismatch {
                expected: 1,
                got: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_build_rejects_bad_declarations() {
        let err = EntitySchema::builder("Record")
            .attribute("title", AttributeType::String)
            .build()
            .unwrap_err();
        assert!(matches!(err, DeclarationError::MissingPrimaryKey { .. }));

        let err = EntitySchema::builder("Record")
            .attribute("id", AttributeType::Integer)
            .attribute("id", AttributeType::String)
            .build()
            .unwrap_err();
        assert!(matches!(err, DeclarationError::DuplicateAttribute { .. }));

        let err = EntitySchema::builder("Record")
            .attribute("id", AttributeType::Integer)
            .cache_index(&["slug"])
            .build()
            .unwrap_err();
        assert!(matches!(err, DeclarationError::UnknownAttribute { .. }));

        let err = EntitySchema::builder("Record")
            .attribute("id", AttributeType::Integer)
            .cache_index(&[])
            .build()
            .unwrap_err();
        assert!(matches!(err, DeclarationError::EmptyIndex { .. }));
    }

    #[test]
    fn test_duplicate_index_declarations_collapse() {
        let schema = EntitySchema::builder("Record")
            .attribute("id", AttributeType::Integer)
            .attribute("title", AttributeType::String)
            .cache_index(&["id", "title"])
            .cache_index(&["title", "id"])
            .build()
            .unwrap();
        assert_eq!(schema.cache_indexes().len(), 1);
    }

    #[test]
    fn test_index_intersects_changed_names() {
        let schema = record_schema();
        let title = &schema.cache_indexes()[0];
        assert!(title.intersects(["updated_at", "title"].into_iter()));
        assert!(!title.intersects(["updated_at"].into_iter()));
    }

    fn arb_attr_type() -> impl Strategy<Value = AttributeType> {
        prop_oneof![
            Just(AttributeType::Integer),
            Just(AttributeType::Float),
            Just(AttributeType::String),
            Just(AttributeType::Boolean),
            Just(AttributeType::DateTime),
            Just(AttributeType::Uuid),
            Just(AttributeType::Json),
        ]
    }

    proptest! {
        /// Fingerprints depend on the declarations, not their order.
        #[test]
        fn prop_fingerprint_order_independent(
            decls in prop::collection::btree_map("[a-z_]{1,12}", arb_attr_type(), 1..8)
        ) {
            let forward: Vec<AttributeDecl> = decls
                .iter()
                .map(|(name, t)| AttributeDecl { name: name.clone(), attr_type: *t })
                .collect();
            let mut reversed = forward.clone();
            reversed.reverse();

            prop_assert_eq!(
                SchemaFingerprint::compute(&forward),
                SchemaFingerprint::compute(&reversed)
            );
        }
    }
}
