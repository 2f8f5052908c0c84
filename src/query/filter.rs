//! Document-store rendition of the condition translator.
//!
//! Queries become BSON-style filter documents (`{"year": {"$in": [1, 2]}}`).
//! Every comparison is emitted through an explicit operator so a caller's
//! value is always an operand and never parsed as an operator itself; object
//! values carrying `$`-prefixed keys are refused outright.

use serde_json::{json, Value as Json};

use crate::model::{Collection, Method, OrderBy, OrderDirection, Query, Value};
use crate::query::attributes::{coerce_value, internal_attribute, is_internal_array};
use crate::query::escape::{escape_regex, search_terms};
use crate::query::sql::{range_values, single_value, value_text};
use crate::types::{DbError, Result};

/// Translates neutral queries into filter documents for one collection.
#[derive(Clone, Debug)]
pub struct FilterTranslator<'c> {
    collection: &'c Collection,
    native_search: bool,
}

impl<'c> FilterTranslator<'c> {
    /// Translator for `collection`. With `native_search` off, `search` is
    /// evaluated as a case-insensitive term regex and loses relevance ranking.
    pub fn new(collection: &'c Collection, native_search: bool) -> Self {
        Self {
            collection,
            native_search,
        }
    }

    /// Translates a list of queries combined with `$and`. Returns `None` when
    /// nothing constrains the result.
    pub fn translate_all(&self, queries: &[Query]) -> Result<Option<Json>> {
        let mut parts = Vec::new();
        for query in queries {
            if let Some(filter) = self.translate(query)? {
                parts.push(filter);
            }
        }
        Ok(combine("$and", parts))
    }

    /// Translates one query. `select` and empty logical queries yield `None`.
    pub fn translate(&self, query: &Query) -> Result<Option<Json>> {
        match query.method() {
            Method::Select => Ok(None),
            Method::And | Method::Or => {
                let op = if query.method() == Method::And { "$and" } else { "$or" };
                let mut parts = Vec::new();
                for child in query.queries() {
                    if let Some(filter) = self.translate(child)? {
                        parts.push(filter);
                    }
                }
                Ok(combine(op, parts))
            }
            _ => self.translate_leaf(query).map(Some),
        }
    }

    fn translate_leaf(&self, query: &Query) -> Result<Json> {
        let internal = internal_attribute(query.attribute())?;
        let field = internal.as_ref();
        let is_array = is_internal_array(field) || self.collection.is_array(field);
        let values = query
            .values()
            .iter()
            .map(|v| operand(field, v))
            .collect::<Result<Vec<_>>>()?;
        let method = query.method();

        if is_array
            && !matches!(
                method,
                Method::Contains | Method::NotContains | Method::IsNull | Method::IsNotNull
            )
        {
            return Err(DbError::invalid_query(format!(
                "{method} is not supported on array attribute '{}'",
                query.attribute()
            )));
        }
        if values.is_empty() && !method.is_null_check() {
            return Err(DbError::invalid_query(format!(
                "{method} on '{}' requires at least one value",
                query.attribute()
            )));
        }

        let filter = match method {
            Method::Equal => membership(field, "$eq", "$in", values),
            Method::NotEqual => membership(field, "$ne", "$nin", values),
            Method::LessThan => comparisons(field, "$lt", values),
            Method::LessThanEqual => comparisons(field, "$lte", values),
            Method::GreaterThan => comparisons(field, "$gt", values),
            Method::GreaterThanEqual => comparisons(field, "$gte", values),
            Method::Between => {
                let (low, high) = range_values(query, query.values().to_vec())?;
                json!({ field: { "$gte": operand(field, &low)?, "$lte": operand(field, &high)? } })
            }
            Method::NotBetween => {
                let (low, high) = range_values(query, query.values().to_vec())?;
                json!({ "$or": [
                    { field: { "$lt": operand(field, &low)? } },
                    { field: { "$gt": operand(field, &high)? } },
                ] })
            }
            Method::Contains | Method::NotContains => {
                let positive = if is_array {
                    json!({ field: { "$in": values } })
                } else {
                    let parts = query
                        .values()
                        .iter()
                        .map(|v| regex(field, format!(".*{}.*", escape_regex(&value_text(v)))))
                        .collect();
                    combine_required("$or", parts)
                };
                negate_if(method == Method::NotContains, positive)
            }
            Method::StartsWith | Method::NotStartsWith => {
                let pattern = format!("^{}", escape_regex(&value_text(single_value(query)?)));
                negate_if(method == Method::NotStartsWith, regex(field, pattern))
            }
            Method::EndsWith | Method::NotEndsWith => {
                let pattern = format!("{}$", escape_regex(&value_text(single_value(query)?)));
                negate_if(method == Method::NotEndsWith, regex(field, pattern))
            }
            Method::Search | Method::NotSearch => {
                let positive = self.search(field, &value_text(single_value(query)?))?;
                negate_if(method == Method::NotSearch, positive)
            }
            Method::IsNull => json!({ field: { "$eq": Json::Null } }),
            Method::IsNotNull => json!({ field: { "$ne": Json::Null } }),
            Method::Select | Method::And | Method::Or => {
                return Err(DbError::invalid_query(format!("{method} is not a leaf query")))
            }
        };
        Ok(filter)
    }

    fn search(&self, field: &str, text: &str) -> Result<Json> {
        let terms = search_terms(text);
        if terms.is_empty() {
            return Err(DbError::invalid_query("search requires at least one term"));
        }
        if self.native_search {
            return Ok(json!({ "$text": { "$search": terms.join(" ") } }));
        }
        let pattern = terms
            .iter()
            .map(|t| escape_regex(t))
            .collect::<Vec<_>>()
            .join("|");
        Ok(regex(field, pattern))
    }

    /// Sort specification (`[("year", -1), ("_id", 1)]`) for an effective
    /// order. Kept as a list since key order is significant.
    pub fn sort(&self, order: &[OrderBy]) -> Result<Vec<(String, i32)>> {
        order
            .iter()
            .map(|entry| {
                let field = internal_attribute(&entry.attribute)?;
                let direction = match entry.direction {
                    OrderDirection::Asc => 1,
                    OrderDirection::Desc => -1,
                };
                Ok((field.into_owned(), direction))
            })
            .collect()
    }
}

/// Converts a query value into a filter operand, refusing operator-shaped
/// objects.
fn operand(field: &str, value: &Value) -> Result<Json> {
    reject_operator_keys(value)?;
    Ok(coerce_value(field, value).to_json())
}

fn reject_operator_keys(value: &Value) -> Result<()> {
    match value {
        Value::Object(map) => {
            if let Some(key) = map.keys().find(|k| k.starts_with('$')) {
                return Err(DbError::invalid_query(format!(
                    "operator key '{key}' is not allowed inside a query value"
                )));
            }
            map.values().try_for_each(reject_operator_keys)
        }
        Value::Array(items) => items.iter().try_for_each(reject_operator_keys),
        _ => Ok(()),
    }
}

fn membership(field: &str, single: &str, multi: &str, mut values: Vec<Json>) -> Json {
    if values.len() == 1 {
        let value = values.remove(0);
        json!({ field: { single: value } })
    } else {
        json!({ field: { multi: values } })
    }
}

fn comparisons(field: &str, op: &str, values: Vec<Json>) -> Json {
    let parts = values
        .into_iter()
        .map(|v| json!({ field: { op: v } }))
        .collect();
    combine_required("$or", parts)
}

/// Pattern filters ignore case, matching `LIKE` on the SQL side.
fn regex(field: &str, pattern: String) -> Json {
    json!({ field: { "$regex": pattern, "$options": "i" } })
}

fn negate_if(negate: bool, positive: Json) -> Json {
    if negate {
        json!({ "$nor": [positive] })
    } else {
        positive
    }
}

/// Joins filters under a logical operator; a single filter is returned as-is.
pub fn combine(op: &str, parts: Vec<Json>) -> Option<Json> {
    if parts.is_empty() {
        None
    } else {
        Some(combine_required(op, parts))
    }
}

fn combine_required(op: &str, mut parts: Vec<Json>) -> Json {
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        json!({ op: parts })
    }
}
