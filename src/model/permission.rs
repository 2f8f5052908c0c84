//! Permission entries attached to documents.
//!
//! A permission binds an action type to a role string and travels on the wire
//! as `type("role")`, e.g. `read("user:42")`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::{DbError, Result};

/// Action a permission grants.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum PermissionType {
    /// Read access.
    Read,
    /// Create access.
    Create,
    /// Update access.
    Update,
    /// Delete access.
    Delete,
}

impl PermissionType {
    /// All permission types in canonical order.
    pub const ALL: [PermissionType; 4] = [
        PermissionType::Read,
        PermissionType::Create,
        PermissionType::Update,
        PermissionType::Delete,
    ];

    /// Wire name of the type.
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionType::Read => "read",
            PermissionType::Create => "create",
            PermissionType::Update => "update",
            PermissionType::Delete => "delete",
        }
    }
}

impl fmt::Display for PermissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "read" => Ok(PermissionType::Read),
            "create" => Ok(PermissionType::Create),
            "update" => Ok(PermissionType::Update),
            "delete" => Ok(PermissionType::Delete),
            other => Err(DbError::invalid_query(format!(
                "unknown permission type '{other}'"
            ))),
        }
    }
}

/// A `(type, role)` access-control entry.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Permission {
    kind: PermissionType,
    role: String,
}

impl Permission {
    /// Builds a permission after normalizing and validating the role.
    pub fn new(kind: PermissionType, role: impl AsRef<str>) -> Result<Self> {
        let role = normalize_role(role.as_ref())?;
        Ok(Self { kind, role })
    }

    /// `read(role)`.
    pub fn read(role: impl AsRef<str>) -> Result<Self> {
        Self::new(PermissionType::Read, role)
    }

    /// `create(role)`.
    pub fn create(role: impl AsRef<str>) -> Result<Self> {
        Self::new(PermissionType::Create, role)
    }

    /// `update(role)`.
    pub fn update(role: impl AsRef<str>) -> Result<Self> {
        Self::new(PermissionType::Update, role)
    }

    /// `delete(role)`.
    pub fn delete(role: impl AsRef<str>) -> Result<Self> {
        Self::new(PermissionType::Delete, role)
    }

    /// Parses either `type("role")` or `type(role)`.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let malformed = || DbError::invalid_query(format!("malformed permission '{input}'"));
        let open = input.find('(').ok_or_else(malformed)?;
        if !input.ends_with(')') {
            return Err(malformed());
        }
        let kind: PermissionType = input[..open].trim().parse()?;
        let role = &input[open + 1..input.len() - 1];
        Self::new(kind, role)
    }

    /// Permission type.
    pub fn kind(&self) -> PermissionType {
        self.kind
    }

    /// Normalized role string.
    pub fn role(&self) -> &str {
        &self.role
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(\"{}\")", self.kind, self.role)
    }
}

impl FromStr for Permission {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        Permission::parse(s)
    }
}

impl Serialize for Permission {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Permission::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Normalizes a role string: surrounding whitespace and one layer of quotes
/// are stripped. Matching after normalization is exact.
pub fn normalize_role(role: &str) -> Result<String> {
    let mut role = role.trim();
    if role.len() >= 2 && role.starts_with('"') && role.ends_with('"') {
        role = role[1..role.len() - 1].trim();
    }
    if role.is_empty() {
        return Err(DbError::invalid_query("role must not be empty"));
    }
    if role
        .chars()
        .any(|c| matches!(c, '"' | '(' | ')') || c.is_control())
    {
        return Err(DbError::invalid_query(format!(
            "role '{role}' contains reserved characters"
        )));
    }
    Ok(role.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_and_bare_forms() {
        let quoted = Permission::parse(r#"read("user:42")"#).unwrap();
        let bare = Permission::parse("read(user:42)").unwrap();
        assert_eq!(quoted, bare);
        assert_eq!(quoted.kind(), PermissionType::Read);
        assert_eq!(quoted.role(), "user:42");
        assert_eq!(quoted.to_string(), r#"read("user:42")"#);
    }

    #[test]
    fn normalization_trims_whitespace_and_quotes() {
        let p = Permission::parse(r#" update( " team:7/owner " ) "#).unwrap();
        assert_eq!(p.role(), "team:7/owner");
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(Permission::parse("read").is_err());
        assert!(Permission::parse("write(any)").is_err());
        assert!(Permission::parse("read()").is_err());
        assert!(Permission::parse(r#"read("a"b")"#).is_err());
    }

    #[test]
    fn serde_uses_wire_string() {
        let p = Permission::delete("any").unwrap();
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#""delete(\"any\")""#);
        let back: Permission = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
