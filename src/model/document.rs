//! Documents: an attribute bag plus identity and access metadata.

use std::collections::BTreeMap;

use time::macros::format_description;
use time::OffsetDateTime;

use crate::model::permission::{Permission, PermissionType};
use crate::model::value::Value;
use crate::types::{DbError, Result};

/// Reserved attribute: external, user-facing identifier.
pub const ATTR_ID: &str = "$id";
/// Reserved attribute: backend-assigned ordinal.
pub const ATTR_SEQUENCE: &str = "$sequence";
/// Reserved attribute: owning collection.
pub const ATTR_COLLECTION: &str = "$collection";
/// Reserved attribute: owning tenant.
pub const ATTR_TENANT: &str = "$tenant";
/// Reserved attribute: creation timestamp.
pub const ATTR_CREATED_AT: &str = "$createdAt";
/// Reserved attribute: last update timestamp.
pub const ATTR_UPDATED_AT: &str = "$updatedAt";
/// Reserved attribute: permission list.
pub const ATTR_PERMISSIONS: &str = "$permissions";

/// All reserved metadata attribute names.
pub const RESERVED_ATTRIBUTES: [&str; 7] = [
    ATTR_ID,
    ATTR_SEQUENCE,
    ATTR_COLLECTION,
    ATTR_TENANT,
    ATTR_CREATED_AT,
    ATTR_UPDATED_AT,
    ATTR_PERMISSIONS,
];

/// A permissioned document.
///
/// Documents are plain values: created by the caller or hydrated from a
/// backend row, then dropped. Nothing in the crate caches them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Document {
    /// External identifier, unique within collection and tenant.
    pub id: String,
    /// Backend-assigned ordinal; immutable once assigned.
    pub sequence: Option<String>,
    /// Owning collection.
    pub collection: Option<String>,
    /// Owning tenant (shared-tables mode).
    pub tenant: Option<i64>,
    /// Creation timestamp.
    pub created_at: Option<String>,
    /// Last update timestamp.
    pub updated_at: Option<String>,
    /// Ordered permission list.
    pub permissions: Vec<Permission>,
    /// User attributes.
    pub attributes: BTreeMap<String, Value>,
}

impl Document {
    /// Creates an empty document with the given identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Builder-style attribute setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Builder-style permission setter.
    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }

    /// Builder-style tenant setter.
    pub fn with_tenant(mut self, tenant: Option<i64>) -> Self {
        self.tenant = tenant;
        self
    }

    /// Reads a user attribute.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Sets a user attribute.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Reads an attribute by its neutral name, including reserved metadata.
    pub fn value_of(&self, attribute: &str) -> Option<Value> {
        match attribute {
            ATTR_ID => Some(Value::String(self.id.clone())),
            ATTR_SEQUENCE => self.sequence.clone().map(Value::String),
            ATTR_COLLECTION => self.collection.clone().map(Value::String),
            ATTR_TENANT => self.tenant.map(Value::Int),
            ATTR_CREATED_AT => self.created_at.clone().map(Value::String),
            ATTR_UPDATED_AT => self.updated_at.clone().map(Value::String),
            ATTR_PERMISSIONS => Some(Value::Array(
                self.permissions
                    .iter()
                    .map(|p| Value::String(p.to_string()))
                    .collect(),
            )),
            other => self.attributes.get(other).cloned(),
        }
    }

    /// Roles holding the given permission type, in document order.
    pub fn roles_for(&self, kind: PermissionType) -> Vec<&str> {
        self.permissions
            .iter()
            .filter(|p| p.kind() == kind)
            .map(|p| p.role())
            .collect()
    }

    /// Keeps only the selected user attributes; metadata is always kept.
    pub fn project(&mut self, selections: &[String]) {
        if selections.iter().any(|s| s == "*") {
            return;
        }
        self.attributes.retain(|key, _| selections.iter().any(|s| s == key));
    }

    /// JSON wire form using `$`-prefixed metadata keys.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert(ATTR_ID.into(), self.id.clone().into());
        if let Some(sequence) = &self.sequence {
            map.insert(ATTR_SEQUENCE.into(), sequence.clone().into());
        }
        if let Some(collection) = &self.collection {
            map.insert(ATTR_COLLECTION.into(), collection.clone().into());
        }
        map.insert(
            ATTR_TENANT.into(),
            self.tenant.map(serde_json::Value::from).unwrap_or_default(),
        );
        if let Some(created) = &self.created_at {
            map.insert(ATTR_CREATED_AT.into(), created.clone().into());
        }
        if let Some(updated) = &self.updated_at {
            map.insert(ATTR_UPDATED_AT.into(), updated.clone().into());
        }
        map.insert(
            ATTR_PERMISSIONS.into(),
            serde_json::Value::Array(
                self.permissions
                    .iter()
                    .map(|p| serde_json::Value::String(p.to_string()))
                    .collect(),
            ),
        );
        for (key, value) in &self.attributes {
            map.insert(key.clone(), value.to_json());
        }
        serde_json::Value::Object(map)
    }

    /// Parses the JSON wire form produced by [`Document::to_json`].
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let obj = json
            .as_object()
            .ok_or_else(|| DbError::invalid_query("document must be a JSON object"))?;
        let mut doc = Document::default();
        for (key, value) in obj {
            match key.as_str() {
                ATTR_ID => doc.id = json_string(key, value)?.unwrap_or_default(),
                ATTR_SEQUENCE => doc.sequence = json_sequence(value)?,
                ATTR_COLLECTION => doc.collection = json_string(key, value)?,
                ATTR_TENANT => {
                    doc.tenant = match value {
                        serde_json::Value::Null => None,
                        other => Some(other.as_i64().ok_or_else(|| {
                            DbError::invalid_query("$tenant must be an integer or null")
                        })?),
                    }
                }
                ATTR_CREATED_AT => doc.created_at = json_string(key, value)?,
                ATTR_UPDATED_AT => doc.updated_at = json_string(key, value)?,
                ATTR_PERMISSIONS => {
                    let items = value
                        .as_array()
                        .ok_or_else(|| DbError::invalid_query("$permissions must be an array"))?;
                    doc.permissions = items
                        .iter()
                        .map(|item| {
                            item.as_str()
                                .ok_or_else(|| DbError::invalid_query("permission must be a string"))
                                .and_then(Permission::parse)
                        })
                        .collect::<Result<Vec<_>>>()?;
                }
                other if other.starts_with('$') => {
                    return Err(DbError::invalid_query(format!(
                        "unknown reserved attribute '{other}'"
                    )))
                }
                other => {
                    doc.attributes.insert(other.to_string(), Value::from_json(value));
                }
            }
        }
        Ok(doc)
    }
}

fn json_string(key: &str, value: &serde_json::Value) -> Result<Option<String>> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s.clone())),
        _ => Err(DbError::invalid_query(format!("{key} must be a string"))),
    }
}

fn json_sequence(value: &serde_json::Value) -> Result<Option<String>> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s.clone())),
        serde_json::Value::Number(n) => Ok(Some(n.to_string())),
        _ => Err(DbError::invalid_query("$sequence must be a string or number")),
    }
}

/// Current UTC time in millisecond precision, `YYYY-MM-DDTHH:MM:SS.mmm+00:00`.
pub fn now_timestamp() -> Result<String> {
    let format = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3][offset_hour sign:mandatory]:[offset_minute]"
    );
    OffsetDateTime::now_utc()
        .format(&format)
        .map_err(|err| DbError::backend(format!("timestamp formatting failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        let mut doc = Document::new("movie-1")
            .with("title", "Arrival")
            .with("year", 2016)
            .with("tags", vec!["sci-fi", "drama"])
            .with_permission(Permission::read("any").unwrap())
            .with_permission(Permission::update("user:1").unwrap())
            .with_tenant(Some(3));
        doc.sequence = Some("17".into());
        doc.collection = Some("movies".into());
        doc.created_at = Some("2024-01-01T00:00:00.000+00:00".into());
        doc.updated_at = Some("2024-01-02T00:00:00.000+00:00".into());
        doc
    }

    #[test]
    fn json_wire_roundtrip() {
        let doc = sample();
        let back = Document::from_json(&doc.to_json()).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn value_of_resolves_reserved_names() {
        let doc = sample();
        assert_eq!(doc.value_of("$id"), Some(Value::from("movie-1")));
        assert_eq!(doc.value_of("$sequence"), Some(Value::from("17")));
        assert_eq!(doc.value_of("$tenant"), Some(Value::Int(3)));
        assert_eq!(doc.value_of("year"), Some(Value::Int(2016)));
        assert_eq!(doc.value_of("missing"), None);
    }

    #[test]
    fn numeric_sequence_is_accepted() {
        let doc = Document::from_json(&serde_json::json!({"$id": "a", "$sequence": 5})).unwrap();
        assert_eq!(doc.sequence.as_deref(), Some("5"));
    }

    #[test]
    fn unknown_reserved_key_is_rejected() {
        let err = Document::from_json(&serde_json::json!({"$id": "a", "$secret": 1})).unwrap_err();
        assert_eq!(err.kind(), crate::types::ErrorKind::InvalidQuery);
    }

    #[test]
    fn projection_keeps_selected_attributes() {
        let mut doc = sample();
        doc.project(&["title".to_string()]);
        assert_eq!(doc.attributes.len(), 1);
        assert_eq!(doc.id, "movie-1");
    }

    #[test]
    fn timestamp_has_millisecond_precision() {
        let ts = now_timestamp().unwrap();
        assert_eq!(ts.len(), "2024-01-01T00:00:00.000+00:00".len());
        assert!(ts.ends_with("+00:00"));
    }
}
