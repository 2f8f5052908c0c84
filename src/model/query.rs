//! Backend-neutral query values.
//!
//! A [`Query`] is a method, an attribute and a list of values. Logical
//! queries (`and`/`or`) carry child queries instead of scalar values. The JSON
//! form is `{"method": "equal", "attribute": "year", "values": [2019]}` with
//! nested queries appearing as objects inside `values`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::value::Value;
use crate::types::{DbError, Result};

/// Query method.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    /// `attr == v` (set membership for several values).
    Equal,
    /// `attr != v` (set exclusion for several values).
    NotEqual,
    /// `attr < v`.
    LessThan,
    /// `attr <= v`.
    LessThanEqual,
    /// `attr > v`.
    GreaterThan,
    /// `attr >= v`.
    GreaterThanEqual,
    /// `low <= attr <= high`.
    Between,
    /// `attr < low OR attr > high`.
    NotBetween,
    /// Array membership or substring match.
    Contains,
    /// Negated [`Method::Contains`].
    NotContains,
    /// Prefix match.
    StartsWith,
    /// Negated prefix match.
    NotStartsWith,
    /// Suffix match.
    EndsWith,
    /// Negated suffix match.
    NotEndsWith,
    /// Full-text search.
    Search,
    /// Negated full-text search.
    NotSearch,
    /// `attr IS NULL`.
    IsNull,
    /// `attr IS NOT NULL`.
    IsNotNull,
    /// Projection of the listed attributes.
    Select,
    /// Conjunction of child queries.
    And,
    /// Disjunction of child queries.
    Or,
}

impl Method {
    /// Wire name of the method.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Equal => "equal",
            Method::NotEqual => "notEqual",
            Method::LessThan => "lessThan",
            Method::LessThanEqual => "lessThanEqual",
            Method::GreaterThan => "greaterThan",
            Method::GreaterThanEqual => "greaterThanEqual",
            Method::Between => "between",
            Method::NotBetween => "notBetween",
            Method::Contains => "contains",
            Method::NotContains => "notContains",
            Method::StartsWith => "startsWith",
            Method::NotStartsWith => "notStartsWith",
            Method::EndsWith => "endsWith",
            Method::NotEndsWith => "notEndsWith",
            Method::Search => "search",
            Method::NotSearch => "notSearch",
            Method::IsNull => "isNull",
            Method::IsNotNull => "isNotNull",
            Method::Select => "select",
            Method::And => "and",
            Method::Or => "or",
        }
    }

    /// `and`/`or`.
    pub fn is_logical(self) -> bool {
        matches!(self, Method::And | Method::Or)
    }

    /// Methods that do not take values.
    pub fn is_null_check(self) -> bool {
        matches!(self, Method::IsNull | Method::IsNotNull)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| DbError::invalid_query(format!("unknown query method '{s}'")))
    }
}

/// Limits enforced by [`Query::validate`].
#[derive(Clone, Copy, Debug)]
pub struct QueryLimits {
    /// Maximum nesting depth of logical queries.
    pub max_depth: usize,
    /// Maximum number of values a single query may carry.
    pub max_values: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_depth: 8,
            max_values: 5_000,
        }
    }
}

/// A single backend-neutral query node.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    method: Method,
    attribute: String,
    values: Vec<Value>,
    queries: Vec<Query>,
}

impl Query {
    /// Builds a leaf query.
    pub fn new(method: Method, attribute: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            method,
            attribute: attribute.into(),
            values,
            queries: Vec::new(),
        }
    }

    fn leaf<V: Into<Value>>(method: Method, attribute: &str, values: Vec<V>) -> Self {
        Self::new(method, attribute, values.into_iter().map(Into::into).collect())
    }

    /// `equal(attribute, values)`.
    pub fn equal<V: Into<Value>>(attribute: &str, values: Vec<V>) -> Self {
        Self::leaf(Method::Equal, attribute, values)
    }

    /// `notEqual(attribute, values)`.
    pub fn not_equal<V: Into<Value>>(attribute: &str, values: Vec<V>) -> Self {
        Self::leaf(Method::NotEqual, attribute, values)
    }

    /// `lessThan(attribute, value)`.
    pub fn less_than(attribute: &str, value: impl Into<Value>) -> Self {
        Self::new(Method::LessThan, attribute, vec![value.into()])
    }

    /// `lessThanEqual(attribute, value)`.
    pub fn less_than_equal(attribute: &str, value: impl Into<Value>) -> Self {
        Self::new(Method::LessThanEqual, attribute, vec![value.into()])
    }

    /// `greaterThan(attribute, value)`.
    pub fn greater_than(attribute: &str, value: impl Into<Value>) -> Self {
        Self::new(Method::GreaterThan, attribute, vec![value.into()])
    }

    /// `greaterThanEqual(attribute, value)`.
    pub fn greater_than_equal(attribute: &str, value: impl Into<Value>) -> Self {
        Self::new(Method::GreaterThanEqual, attribute, vec![value.into()])
    }

    /// `between(attribute, [low, high])`, inclusive.
    pub fn between(attribute: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::new(Method::Between, attribute, vec![low.into(), high.into()])
    }

    /// `notBetween(attribute, [low, high])`.
    pub fn not_between(attribute: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::new(Method::NotBetween, attribute, vec![low.into(), high.into()])
    }

    /// `contains(attribute, values)`.
    pub fn contains<V: Into<Value>>(attribute: &str, values: Vec<V>) -> Self {
        Self::leaf(Method::Contains, attribute, values)
    }

    /// `notContains(attribute, values)`.
    pub fn not_contains<V: Into<Value>>(attribute: &str, values: Vec<V>) -> Self {
        Self::leaf(Method::NotContains, attribute, values)
    }

    /// `startsWith(attribute, prefix)`.
    pub fn starts_with(attribute: &str, prefix: &str) -> Self {
        Self::new(Method::StartsWith, attribute, vec![prefix.into()])
    }

    /// `notStartsWith(attribute, prefix)`.
    pub fn not_starts_with(attribute: &str, prefix: &str) -> Self {
        Self::new(Method::NotStartsWith, attribute, vec![prefix.into()])
    }

    /// `endsWith(attribute, suffix)`.
    pub fn ends_with(attribute: &str, suffix: &str) -> Self {
        Self::new(Method::EndsWith, attribute, vec![suffix.into()])
    }

    /// `notEndsWith(attribute, suffix)`.
    pub fn not_ends_with(attribute: &str, suffix: &str) -> Self {
        Self::new(Method::NotEndsWith, attribute, vec![suffix.into()])
    }

    /// `search(attribute, terms)`.
    pub fn search(attribute: &str, terms: &str) -> Self {
        Self::new(Method::Search, attribute, vec![terms.into()])
    }

    /// `notSearch(attribute, terms)`.
    pub fn not_search(attribute: &str, terms: &str) -> Self {
        Self::new(Method::NotSearch, attribute, vec![terms.into()])
    }

    /// `isNull(attribute)`.
    pub fn is_null(attribute: &str) -> Self {
        Self::new(Method::IsNull, attribute, Vec::new())
    }

    /// `isNotNull(attribute)`.
    pub fn is_not_null(attribute: &str) -> Self {
        Self::new(Method::IsNotNull, attribute, Vec::new())
    }

    /// `select([attributes])`.
    pub fn select(attributes: &[&str]) -> Self {
        Self::new(
            Method::Select,
            "",
            attributes.iter().map(|a| Value::from(*a)).collect(),
        )
    }

    /// `and(queries)`.
    pub fn and(queries: Vec<Query>) -> Self {
        Self {
            method: Method::And,
            attribute: String::new(),
            values: Vec::new(),
            queries,
        }
    }

    /// `or(queries)`.
    pub fn or(queries: Vec<Query>) -> Self {
        Self {
            method: Method::Or,
            attribute: String::new(),
            values: Vec::new(),
            queries,
        }
    }

    /// Query method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Attribute name (empty for logical and select queries).
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Scalar values of a leaf query.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Child queries of a logical query.
    pub fn queries(&self) -> &[Query] {
        &self.queries
    }

    /// Checks the shape invariants: leaf queries carry at least one value
    /// (none for null checks, exactly one for pattern and search methods,
    /// exactly two for range methods) and logical
    /// queries carry only child queries.
    pub fn validate(&self, limits: &QueryLimits) -> Result<()> {
        self.validate_at(limits, 1)
    }

    fn validate_at(&self, limits: &QueryLimits, depth: usize) -> Result<()> {
        if depth > limits.max_depth {
            return Err(DbError::invalid_query(format!(
                "query nesting exceeds depth {}",
                limits.max_depth
            )));
        }
        if self.method.is_logical() {
            if !self.values.is_empty() {
                return Err(DbError::invalid_query(format!(
                    "{} query takes nested queries, not values",
                    self.method
                )));
            }
            for child in &self.queries {
                child.validate_at(limits, depth + 1)?;
            }
            return Ok(());
        }
        if !self.queries.is_empty() {
            return Err(DbError::invalid_query(format!(
                "{} query cannot nest queries",
                self.method
            )));
        }
        if self.method != Method::Select && self.attribute.is_empty() {
            return Err(DbError::invalid_query(format!(
                "{} query requires an attribute",
                self.method
            )));
        }
        if self.values.len() > limits.max_values {
            return Err(DbError::invalid_query(format!(
                "{} query exceeds {} values (got {})",
                self.method,
                limits.max_values,
                self.values.len()
            )));
        }
        match self.method {
            Method::IsNull | Method::IsNotNull => {
                if !self.values.is_empty() {
                    return Err(DbError::invalid_query(format!(
                        "{} query takes no values",
                        self.method
                    )));
                }
            }
            Method::StartsWith
            | Method::NotStartsWith
            | Method::EndsWith
            | Method::NotEndsWith
            | Method::Search
            | Method::NotSearch => {
                if self.values.len() != 1 {
                    return Err(DbError::invalid_query(format!(
                        "{} query requires exactly one value (got {})",
                        self.method,
                        self.values.len()
                    )));
                }
            }
            Method::Between | Method::NotBetween => {
                if self.values.len() != 2 {
                    return Err(DbError::invalid_query(format!(
                        "{} query requires exactly two values (got {})",
                        self.method,
                        self.values.len()
                    )));
                }
            }
            _ => {
                if self.values.is_empty() {
                    return Err(DbError::invalid_query(format!(
                        "{} query requires at least one value",
                        self.method
                    )));
                }
            }
        }
        if self.method == Method::Select && self.values.iter().any(|v| v.as_str().is_none()) {
            return Err(DbError::invalid_query("select values must be attribute names"));
        }
        Ok(())
    }

    /// JSON form of the query.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("method".into(), self.method.as_str().into());
        if !self.attribute.is_empty() {
            map.insert("attribute".into(), self.attribute.clone().into());
        }
        let values = if self.method.is_logical() {
            self.queries.iter().map(Query::to_json).collect()
        } else {
            self.values.iter().map(Value::to_json).collect()
        };
        map.insert("values".into(), serde_json::Value::Array(values));
        serde_json::Value::Object(map)
    }

    /// Parses a query from its JSON string form.
    pub fn parse(input: &str) -> Result<Self> {
        let json: serde_json::Value = serde_json::from_str(input)?;
        Self::from_json(&json)
    }

    /// Parses a query from a JSON value.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let obj = json
            .as_object()
            .ok_or_else(|| DbError::invalid_query("query must be a JSON object"))?;
        let method: Method = obj
            .get("method")
            .and_then(|m| m.as_str())
            .ok_or_else(|| DbError::invalid_query("query is missing 'method'"))?
            .parse()?;
        let attribute = match obj.get("attribute") {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(_) => return Err(DbError::invalid_query("query 'attribute' must be a string")),
        };
        let raw_values = match obj.get("values") {
            None => Vec::new(),
            Some(serde_json::Value::Array(items)) => items.clone(),
            Some(_) => return Err(DbError::invalid_query("query 'values' must be an array")),
        };
        if method.is_logical() {
            let queries = raw_values
                .iter()
                .map(Query::from_json)
                .collect::<Result<Vec<_>>>()?;
            return Ok(Query {
                method,
                attribute,
                values: Vec::new(),
                queries,
            });
        }
        Ok(Query::new(
            method,
            attribute,
            raw_values.iter().map(Value::from_json).collect(),
        ))
    }

    /// Attribute names requested by the `select` queries in the list, or
    /// `None` when nothing is selected (all attributes).
    pub fn selections(queries: &[Query]) -> Option<Vec<String>> {
        let selected: Vec<String> = queries
            .iter()
            .filter(|q| q.method == Method::Select)
            .flat_map(|q| q.values.iter().filter_map(|v| v.as_str().map(str::to_string)))
            .collect();
        if queries.iter().any(|q| q.method == Method::Select) {
            Some(selected)
        } else {
            None
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// Sort direction for an order attribute.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderDirection {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl OrderDirection {
    /// Opposite direction.
    pub fn flip(self) -> Self {
        match self {
            OrderDirection::Asc => OrderDirection::Desc,
            OrderDirection::Desc => OrderDirection::Asc,
        }
    }

    /// SQL keyword.
    pub fn as_sql(self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

/// Which side of the cursor a page is fetched from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CursorDirection {
    /// Documents after the cursor.
    #[default]
    After,
    /// Documents before the cursor.
    Before,
}

/// One entry of an effective sort order.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct OrderBy {
    /// Attribute name (neutral, `$`-prefixed for reserved names).
    pub attribute: String,
    /// Direction.
    pub direction: OrderDirection,
}

impl OrderBy {
    /// Builds an order entry.
    pub fn new(attribute: impl Into<String>, direction: OrderDirection) -> Self {
        Self {
            attribute: attribute.into(),
            direction,
        }
    }
}
