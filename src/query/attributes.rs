//! Neutral-to-internal attribute name mapping.
//!
//! Every translator resolves attribute names through [`internal_attribute`].
//! Reserved `$` names map to their storage columns, user attributes are
//! validated and passed through, and anything that could address a storage
//! column directly (a leading `_`) is refused.

use std::borrow::Cow;

use crate::model::document::{
    ATTR_COLLECTION, ATTR_CREATED_AT, ATTR_ID, ATTR_PERMISSIONS, ATTR_SEQUENCE, ATTR_TENANT,
    ATTR_UPDATED_AT,
};
use crate::model::Value;
use crate::types::{DbError, Result};

/// Storage column for the external identifier.
pub const COL_UID: &str = "_uid";
/// Storage column for the sequence.
pub const COL_SEQUENCE: &str = "_id";
/// Storage column for the tenant.
pub const COL_TENANT: &str = "_tenant";
/// Storage column for the creation timestamp.
pub const COL_CREATED_AT: &str = "_createdAt";
/// Storage column for the update timestamp.
pub const COL_UPDATED_AT: &str = "_updatedAt";
/// Storage column for the permission list.
pub const COL_PERMISSIONS: &str = "_permissions";

/// Maps a neutral attribute name to its storage name.
pub fn internal_attribute(attribute: &str) -> Result<Cow<'_, str>> {
    let mapped = match attribute {
        ATTR_ID => COL_UID,
        ATTR_SEQUENCE => COL_SEQUENCE,
        ATTR_TENANT => COL_TENANT,
        ATTR_CREATED_AT => COL_CREATED_AT,
        ATTR_UPDATED_AT => COL_UPDATED_AT,
        ATTR_PERMISSIONS => COL_PERMISSIONS,
        ATTR_COLLECTION => {
            return Err(DbError::invalid_query(
                "$collection is implied by the target collection and cannot be queried",
            ))
        }
        other => {
            validate_user_attribute(other)?;
            return Ok(Cow::Borrowed(other));
        }
    };
    Ok(Cow::Borrowed(mapped))
}

/// Rejects names that are empty, reserved-looking or contain characters that
/// cannot be embedded in an identifier or document path.
pub fn validate_user_attribute(attribute: &str) -> Result<()> {
    if attribute.is_empty() {
        return Err(DbError::invalid_query("attribute name must not be empty"));
    }
    if attribute.starts_with('$') {
        return Err(DbError::invalid_query(format!(
            "unknown reserved attribute '{attribute}'"
        )));
    }
    if attribute.starts_with('_') {
        return Err(DbError::invalid_query(format!(
            "attribute '{attribute}' addresses an internal column"
        )));
    }
    if !attribute
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(DbError::invalid_query(format!(
            "attribute '{attribute}' may only contain [A-Za-z0-9_]"
        )));
    }
    Ok(())
}

/// Whether a storage column holds a list.
pub fn is_internal_array(column: &str) -> bool {
    column == COL_PERMISSIONS
}

/// Normalizes a query value for an internal column: sequences and tenants
/// are integers in storage even though documents expose sequences as opaque
/// strings.
pub fn coerce_value(column: &str, value: &Value) -> Value {
    match column {
        COL_SEQUENCE | COL_TENANT => match value.as_i64() {
            Some(v) => Value::Int(v),
            None => value.clone(),
        },
        _ => value.clone(),
    }
}
