//! Keyset pagination.
//!
//! Given the caller's order attributes, a cursor taken from a previously
//! returned document, and a direction, [`build_page_constraint`] produces a
//! backend-neutral predicate plus the effective sort order. Both query
//! families translate the predicate through their own condition translator.
//!
//! `$sequence` is always the final sort key. It is unique and immutable, so
//! the effective order is total and consecutive pages neither overlap nor
//! skip rows even when every other order attribute is duplicated.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::model::document::ATTR_SEQUENCE;
use crate::model::{CursorDirection, Document, OrderBy, OrderDirection, Query, Value};
use crate::types::{DbError, Result};

/// Keyset boundary: the order attribute values and `$sequence` of the last
/// (or first) document of a page. Callers round-trip it unchanged.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Cursor {
    values: BTreeMap<String, Value>,
}

impl Cursor {
    /// Empty cursor; fetches the first page.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style value setter.
    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(attribute.into(), value.into());
        self
    }

    /// Captures the boundary values of `document` for the given order.
    pub fn from_document(document: &Document, order_attributes: &[String]) -> Result<Self> {
        let mut cursor = Cursor::new();
        for attribute in order_attributes {
            let value = document.value_of(attribute).unwrap_or(Value::Null);
            cursor.values.insert(attribute.clone(), value);
        }
        let sequence = document
            .sequence
            .clone()
            .ok_or_else(|| DbError::invalid_query("invalid cursor: document has no $sequence"))?;
        cursor
            .values
            .insert(ATTR_SEQUENCE.to_string(), Value::String(sequence));
        Ok(cursor)
    }

    /// Boundary value for an attribute.
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.values.get(attribute)
    }

    /// Whether the cursor carries no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// JSON object form.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Parses the JSON object form.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let obj = json
            .as_object()
            .ok_or_else(|| DbError::invalid_query("invalid cursor: expected a JSON object"))?;
        Ok(Self {
            values: obj
                .iter()
                .map(|(k, v)| (k.clone(), Value::from_json(v)))
                .collect(),
        })
    }

    /// Opaque token form.
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_json().to_string())
    }

    /// Parses a token produced by [`Cursor::encode`].
    pub fn decode(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|err| DbError::invalid_query(format!("invalid cursor: {err}")))?;
        let json: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|err| DbError::invalid_query(format!("invalid cursor: {err}")))?;
        Self::from_json(&json)
    }
}

/// Extra predicate and effective order for one page.
#[derive(Clone, Debug, PartialEq)]
pub struct PageConstraint {
    /// Keyset predicate; `None` on the first page.
    pub predicate: Option<Query>,
    /// Sort order to fetch with, `$sequence` last.
    pub order: Vec<OrderBy>,
    /// Whether the fetched rows must be reversed before they are returned.
    pub reverse: bool,
}

impl PageConstraint {
    /// Restores caller order on a fetched page.
    pub fn finish<T>(&self, mut rows: Vec<T>) -> Vec<T> {
        if self.reverse {
            rows.reverse();
        }
        rows
    }
}

/// Builds the keyset predicate and effective order.
///
/// Order directions missing from `order_types` default to ascending. For
/// [`CursorDirection::Before`] every direction is inverted and
/// [`PageConstraint::reverse`] is set so the page comes back in caller order.
pub fn build_page_constraint(
    order_attributes: &[String],
    order_types: &[OrderDirection],
    cursor: Option<&Cursor>,
    direction: CursorDirection,
) -> Result<PageConstraint> {
    let mut order: Vec<OrderBy> = Vec::with_capacity(order_attributes.len() + 1);
    for (i, attribute) in order_attributes.iter().enumerate() {
        if order.iter().any(|o| &o.attribute == attribute) {
            continue;
        }
        let dir = order_types.get(i).copied().unwrap_or_default();
        order.push(OrderBy::new(attribute.clone(), dir));
    }
    if !order.iter().any(|o| o.attribute == ATTR_SEQUENCE) {
        let dir = if order_attributes.is_empty() {
            order_types.first().copied().unwrap_or_default()
        } else {
            OrderDirection::Asc
        };
        order.push(OrderBy::new(ATTR_SEQUENCE, dir));
    }

    let reverse = direction == CursorDirection::Before;
    if reverse {
        for entry in &mut order {
            entry.direction = entry.direction.flip();
        }
    }

    let predicate = match cursor.filter(|c| !c.is_empty()) {
        None => None,
        Some(cursor) => Some(keyset_predicate(&order, cursor)?),
    };

    Ok(PageConstraint {
        predicate,
        order,
        reverse,
    })
}

/// `(a0 op c0) OR (a0 = c0 AND a1 op c1) OR ...` over the effective order.
fn keyset_predicate(order: &[OrderBy], cursor: &Cursor) -> Result<Query> {
    let mut boundaries = Vec::with_capacity(order.len());
    for entry in order {
        match cursor.get(&entry.attribute) {
            Some(value) if !value.is_null() => boundaries.push(value.clone()),
            _ => {
                return Err(DbError::invalid_query(format!(
                    "invalid cursor: no value for order attribute '{}'",
                    entry.attribute
                )))
            }
        }
    }

    let mut branches = Vec::with_capacity(order.len());
    for (i, entry) in order.iter().enumerate() {
        let mut conjuncts: Vec<Query> = order[..i]
            .iter()
            .zip(&boundaries)
            .map(|(prior, value)| Query::equal(&prior.attribute, vec![value.clone()]))
            .collect();
        let boundary = boundaries[i].clone();
        conjuncts.push(match entry.direction {
            OrderDirection::Asc => Query::greater_than(&entry.attribute, boundary),
            OrderDirection::Desc => Query::less_than(&entry.attribute, boundary),
        });
        branches.push(if conjuncts.len() == 1 {
            conjuncts.remove(0)
        } else {
            Query::and(conjuncts)
        });
    }

    Ok(if branches.len() == 1 {
        branches.remove(0)
    } else {
        Query::or(branches)
    })
}
