//! Collection definitions consumed by adapters.
//!
//! Only what the query core needs is modelled here: attribute types (to tell
//! array membership from substring match and to hydrate rows) and indexes.

use serde::{Deserialize, Serialize};

use crate::types::{DbError, Result};

/// Reserved collection holding collection metadata. Under shared tables its
/// documents with a null tenant remain visible to every tenant.
pub const METADATA_COLLECTION: &str = "_metadata";

/// Scalar type of an attribute.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    /// UTF-8 string.
    String,
    /// Signed 64-bit integer.
    Integer,
    /// 64-bit float.
    Float,
    /// Boolean.
    Boolean,
    /// Timestamp string.
    Datetime,
}

/// A typed attribute of a collection.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute key.
    pub key: String,
    /// Scalar type.
    #[serde(rename = "type")]
    pub kind: AttributeKind,
    /// Whether the attribute holds a list of values.
    #[serde(default)]
    pub array: bool,
}

impl Attribute {
    /// Scalar attribute.
    pub fn new(key: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            key: key.into(),
            kind,
            array: false,
        }
    }

    /// Array attribute.
    pub fn array(key: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            key: key.into(),
            kind,
            array: true,
        }
    }
}

/// Index flavour.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Plain lookup index.
    Key,
    /// Uniqueness constraint.
    Unique,
    /// Full-text index.
    Fulltext,
}

/// Index definition.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Index {
    /// Index identifier.
    pub id: String,
    /// Flavour.
    #[serde(rename = "type")]
    pub kind: IndexKind,
    /// Indexed attribute keys.
    pub attributes: Vec<String>,
}

impl Index {
    /// Builds an index definition.
    pub fn new(id: impl Into<String>, kind: IndexKind, attributes: &[&str]) -> Self {
        Self {
            id: id.into(),
            kind,
            attributes: attributes.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Collection definition.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    /// Collection identifier.
    #[serde(rename = "$id")]
    pub id: String,
    /// Typed attributes.
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    /// Indexes.
    #[serde(default)]
    pub indexes: Vec<Index>,
}

impl Collection {
    /// Creates an empty collection definition.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Schema of the metadata collection: one document per collection, with
    /// the attribute and index lists stored as JSON text.
    pub fn metadata() -> Self {
        Collection::new(METADATA_COLLECTION)
            .with_attribute(Attribute::new("name", AttributeKind::String))
            .with_attribute(Attribute::new("attributes", AttributeKind::String))
            .with_attribute(Attribute::new("indexes", AttributeKind::String))
    }

    /// Builder-style attribute registration.
    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Builder-style index registration.
    pub fn with_index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    /// Looks up an attribute by key.
    pub fn attribute(&self, key: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.key == key)
    }

    /// Whether the attribute is declared as an array.
    pub fn is_array(&self, key: &str) -> bool {
        self.attribute(key).map(|a| a.array).unwrap_or(false)
    }

    /// Whether this is the reserved metadata collection.
    pub fn is_metadata(&self) -> bool {
        self.id == METADATA_COLLECTION
    }

    /// Attributes covered by a full-text index.
    pub fn fulltext_attributes(&self) -> Vec<&str> {
        self.indexes
            .iter()
            .filter(|i| i.kind == IndexKind::Fulltext)
            .flat_map(|i| i.attributes.iter().map(String::as_str))
            .collect()
    }

    /// Checks identifiers so they can be used as physical names.
    pub fn validate(&self) -> Result<()> {
        validate_key(&self.id)?;
        for attribute in &self.attributes {
            validate_key(&attribute.key)?;
            if attribute.key.starts_with('_') {
                return Err(DbError::invalid_query(format!(
                    "attribute '{}' uses the reserved '_' prefix",
                    attribute.key
                )));
            }
        }
        for index in &self.indexes {
            validate_key(&index.id)?;
            for key in &index.attributes {
                if self.attribute(key).is_none() && !key.starts_with('$') {
                    return Err(DbError::not_found(format!(
                        "index '{}' references unknown attribute '{key}'",
                        index.id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Keys are limited to `[A-Za-z0-9_]` (with a leading `_` allowed for
/// reserved collections) so they can be embedded in identifiers safely.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > 255 {
        return Err(DbError::invalid_query(format!("invalid key '{key}'")));
    }
    if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DbError::invalid_query(format!(
            "key '{key}' may only contain [A-Za-z0-9_]"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_lookup() {
        let c = Collection::new("movies")
            .with_attribute(Attribute::new("title", AttributeKind::String))
            .with_attribute(Attribute::array("tags", AttributeKind::String));
        assert!(c.is_array("tags"));
        assert!(!c.is_array("title"));
        assert!(!c.is_array("unknown"));
    }

    #[test]
    fn validation_rejects_unsafe_keys() {
        assert!(Collection::new("movies; DROP").validate().is_err());
        let c = Collection::new("movies").with_attribute(Attribute::new("_uid", AttributeKind::String));
        assert!(c.validate().is_err());
        let c = Collection::new("movies").with_index(Index::new("idx", IndexKind::Key, &["nope"]));
        assert_eq!(c.validate().unwrap_err().kind(), crate::types::ErrorKind::NotFound);
    }

    #[test]
    fn schema_json_form() {
        let c: Collection = serde_json::from_str(
            r#"{"$id":"movies","attributes":[{"key":"tags","type":"string","array":true}]}"#,
        )
        .unwrap();
        assert!(c.is_array("tags"));
        assert!(c.indexes.is_empty());
    }
}
