//! SQL rendition of the condition translator.
//!
//! A [`SqlTranslator`] lowers a [`Query`] tree into a boolean SQL fragment
//! whose user values are all pushed into a [`Binds`] sink; nothing a caller
//! supplies is ever spliced into the statement text. Dialects differ only in
//! quoting, placeholder syntax, array membership and full-text search.

use std::fmt;

use crate::model::{Collection, Method, OrderBy, Query, Value};
use crate::query::attributes::{coerce_value, internal_attribute, is_internal_array};
use crate::query::escape::{boolean_mode_value, escape_like, search_terms};
use crate::types::{DbError, Result};

/// SQL dialect spoken by a relational backend.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SqlDialect {
    /// SQLite: `"ident"`, `?N`, `json_each` membership, search degrades to `LIKE`.
    Sqlite,
    /// MariaDB/MySQL: `` `ident` ``, `?`, `JSON_CONTAINS`, `MATCH ... AGAINST`.
    MariaDb,
    /// PostgreSQL: `"ident"`, `$N`, `@>` on jsonb, `to_tsvector @@ websearch_to_tsquery`.
    Postgres,
}

impl SqlDialect {
    /// Quotes an identifier. Identifiers are validated before they get here,
    /// the quote character is doubled regardless.
    pub fn quote(self, ident: &str) -> String {
        match self {
            SqlDialect::MariaDb => format!("`{}`", ident.replace('`', "``")),
            SqlDialect::Sqlite | SqlDialect::Postgres => {
                format!("\"{}\"", ident.replace('"', "\"\""))
            }
        }
    }

    fn placeholder(self, position: usize) -> String {
        match self {
            SqlDialect::Sqlite => format!("?{position}"),
            SqlDialect::MariaDb => "?".to_string(),
            SqlDialect::Postgres => format!("${position}"),
        }
    }

    /// Pattern operator. Patterns match without regard to case; SQLite and
    /// MariaDB's default collations already fold case for `LIKE`.
    fn like_operator(self) -> &'static str {
        match self {
            SqlDialect::Postgres => "ILIKE",
            SqlDialect::Sqlite | SqlDialect::MariaDb => "LIKE",
        }
    }

    fn escape_clause(self) -> &'static str {
        match self {
            SqlDialect::MariaDb => "ESCAPE '\\\\'",
            SqlDialect::Sqlite | SqlDialect::Postgres => "ESCAPE '\\'",
        }
    }

    /// Equality that treats two NULLs as equal.
    pub fn null_safe_eq(self, left: &str, right: &str) -> String {
        match self {
            SqlDialect::Sqlite => format!("{left} IS {right}"),
            SqlDialect::MariaDb => format!("{left} <=> {right}"),
            SqlDialect::Postgres => format!("{left} IS NOT DISTINCT FROM {right}"),
        }
    }

    /// Whether the dialect has a native full-text operator. Without one,
    /// `search` degrades to term-wise `LIKE` matching and loses ranking.
    pub fn supports_fulltext(self) -> bool {
        !matches!(self, SqlDialect::Sqlite)
    }

    /// Attaches an in-statement deadline when the dialect has one. Dialects
    /// without one return the statement unchanged and rely on the adapter
    /// arming a connection-level deadline.
    pub fn apply_timeout(self, sql: &str, timeout_ms: u64) -> String {
        if timeout_ms == 0 {
            return sql.to_string();
        }
        match self {
            SqlDialect::MariaDb => {
                let seconds = timeout_ms as f64 / 1000.0;
                format!("SET STATEMENT max_statement_time = {seconds} FOR {sql}")
            }
            SqlDialect::Sqlite | SqlDialect::Postgres => sql.to_string(),
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SqlDialect::Sqlite => "sqlite",
            SqlDialect::MariaDb => "mariadb",
            SqlDialect::Postgres => "postgres",
        })
    }
}

/// Ordered bind-parameter sink.
#[derive(Clone, Debug)]
pub struct Binds {
    dialect: SqlDialect,
    values: Vec<Value>,
}

impl Binds {
    /// Empty sink for the dialect.
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            values: Vec::new(),
        }
    }

    /// Stores a value and returns its placeholder.
    pub fn push(&mut self, value: Value) -> String {
        self.values.push(value);
        self.dialect.placeholder(self.values.len())
    }

    /// Bound values in placeholder order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consumes the sink.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Number of bound values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing has been bound yet.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Translates neutral queries against one collection into SQL predicates.
#[derive(Clone, Debug)]
pub struct SqlTranslator<'c> {
    dialect: SqlDialect,
    collection: &'c Collection,
    alias: String,
}

impl<'c> SqlTranslator<'c> {
    /// Translator for `collection` addressed through `alias`.
    pub fn new(dialect: SqlDialect, collection: &'c Collection, alias: impl Into<String>) -> Self {
        Self {
            dialect,
            collection,
            alias: alias.into(),
        }
    }

    /// Dialect in use.
    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Fully qualified, quoted column for a neutral attribute name.
    pub fn column(&self, attribute: &str) -> Result<String> {
        let internal = internal_attribute(attribute)?;
        Ok(self.qualified(&internal))
    }

    /// Qualifies an already-internal column name.
    pub fn qualified(&self, column: &str) -> String {
        format!("{}.{}", self.dialect.quote(&self.alias), self.dialect.quote(column))
    }

    /// Translates a list of queries combined with `AND`. Returns `None` when
    /// nothing constrains the result.
    pub fn translate_all(&self, queries: &[Query], binds: &mut Binds) -> Result<Option<String>> {
        let mut parts = Vec::new();
        for query in queries {
            if let Some(fragment) = self.translate(query, binds)? {
                parts.push(fragment);
            }
        }
        Ok(join(parts, " AND "))
    }

    /// Translates one query. `select` and empty logical queries yield `None`.
    pub fn translate(&self, query: &Query, binds: &mut Binds) -> Result<Option<String>> {
        match query.method() {
            Method::Select => Ok(None),
            Method::And | Method::Or => {
                let glue = if query.method() == Method::And { " AND " } else { " OR " };
                let mut parts = Vec::new();
                for child in query.queries() {
                    if let Some(fragment) = self.translate(child, binds)? {
                        parts.push(fragment);
                    }
                }
                Ok(join(parts, glue))
            }
            _ => self.translate_leaf(query, binds).map(Some),
        }
    }

    fn translate_leaf(&self, query: &Query, binds: &mut Binds) -> Result<String> {
        let internal = internal_attribute(query.attribute())?;
        let column = self.qualified(&internal);
        let is_array = is_internal_array(&internal) || self.collection.is_array(&internal);
        let values: Vec<Value> = query
            .values()
            .iter()
            .map(|v| coerce_value(&internal, v))
            .collect();
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

        match method {
            Method::Equal | Method::NotEqual => {
                let negate = method == Method::NotEqual;
                require_values(query, &values, 1)?;
                let condition = if values.len() == 1 {
                    let ph = binds.push(values[0].clone());
                    let op = if negate { "!=" } else { "=" };
                    format!("{column} {op} {ph}")
                } else {
                    let list = values
                        .into_iter()
                        .map(|v| binds.push(v))
                        .collect::<Vec<_>>()
                        .join(", ");
                    let op = if negate { "NOT IN" } else { "IN" };
                    format!("{column} {op} ({list})")
                };
                Ok(if negate {
                    or_null(&column, condition)
                } else {
                    condition
                })
            }
            Method::LessThan
            | Method::LessThanEqual
            | Method::GreaterThan
            | Method::GreaterThanEqual => {
                require_values(query, &values, 1)?;
                let op = match method {
                    Method::LessThan => "<",
                    Method::LessThanEqual => "<=",
                    Method::GreaterThan => ">",
                    _ => ">=",
                };
                let parts = values
                    .into_iter()
                    .map(|v| format!("{column} {op} {}", binds.push(v)))
                    .collect();
                Ok(join_required(parts, " OR "))
            }
            Method::Between => {
                let (low, high) = range_values(query, values)?;
                let low = binds.push(low);
                let high = binds.push(high);
                Ok(format!("{column} BETWEEN {low} AND {high}"))
            }
            Method::NotBetween => {
                let (low, high) = range_values(query, values)?;
                let low = binds.push(low);
                let high = binds.push(high);
                Ok(format!("({column} < {low} OR {column} > {high})"))
            }
            Method::Contains | Method::NotContains => {
                require_values(query, &values, 1)?;
                let positive = if is_array {
                    self.array_membership(&column, values, binds)?
                } else {
                    let parts = values
                        .iter()
                        .map(|v| {
                            let pattern = format!("%{}%", escape_like(&value_text(v)));
                            self.like(&column, pattern, binds)
                        })
                        .collect();
                    join_required(parts, " OR ")
                };
                Ok(negate_if(method == Method::NotContains, &column, positive))
            }
            Method::StartsWith | Method::NotStartsWith => {
                let pattern = format!("{}%", escape_like(&value_text(single_value(query)?)));
                let positive = self.like(&column, pattern, binds);
                Ok(negate_if(method == Method::NotStartsWith, &column, positive))
            }
            Method::EndsWith | Method::NotEndsWith => {
                let pattern = format!("%{}", escape_like(&value_text(single_value(query)?)));
                let positive = self.like(&column, pattern, binds);
                Ok(negate_if(method == Method::NotEndsWith, &column, positive))
            }
            Method::Search | Method::NotSearch => {
                let positive = self.search(&column, &value_text(single_value(query)?), binds)?;
                Ok(negate_if(method == Method::NotSearch, &column, positive))
            }
            Method::IsNull => Ok(format!("{column} IS NULL")),
            Method::IsNotNull => Ok(format!("{column} IS NOT NULL")),
            Method::Select | Method::And | Method::Or => Err(DbError::invalid_query(format!(
                "{method} is not a leaf query"
            ))),
        }
    }

    fn like(&self, column: &str, pattern: String, binds: &mut Binds) -> String {
        let ph = binds.push(Value::String(pattern));
        format!(
            "{column} {} {ph} {}",
            self.dialect.like_operator(),
            self.dialect.escape_clause()
        )
    }

    fn array_membership(
        &self,
        column: &str,
        values: Vec<Value>,
        binds: &mut Binds,
    ) -> Result<String> {
        match self.dialect {
            SqlDialect::Sqlite => {
                let list = values
                    .into_iter()
                    .map(|v| binds.push(v))
                    .collect::<Vec<_>>()
                    .join(", ");
                Ok(format!(
                    "EXISTS (SELECT 1 FROM json_each({column}) WHERE json_each.value IN ({list}))"
                ))
            }
            SqlDialect::MariaDb => {
                let parts = values
                    .into_iter()
                    .map(|v| {
                        let json = serde_json::to_string(&vec![v.to_json()])?;
                        Ok(format!("JSON_CONTAINS({column}, {})", binds.push(Value::String(json))))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(join_required(parts, " OR "))
            }
            SqlDialect::Postgres => {
                let parts = values
                    .into_iter()
                    .map(|v| {
                        let json = serde_json::to_string(&vec![v.to_json()])?;
                        Ok(format!("{column} @> {}::jsonb", binds.push(Value::String(json))))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(join_required(parts, " OR "))
            }
        }
    }

    fn search(&self, column: &str, text: &str, binds: &mut Binds) -> Result<String> {
        match self.dialect {
            SqlDialect::MariaDb => {
                let value = boolean_mode_value(text);
                if value.is_empty() {
                    return Err(DbError::invalid_query("search requires at least one term"));
                }
                let ph = binds.push(Value::String(value));
                Ok(format!("MATCH({column}) AGAINST ({ph} IN BOOLEAN MODE)"))
            }
            SqlDialect::Postgres => {
                let ph = binds.push(Value::String(text.to_string()));
                Ok(format!(
                    "to_tsvector(regexp_replace({column}, '[^\\w]+', ' ', 'g')) @@ websearch_to_tsquery({ph})"
                ))
            }
            SqlDialect::Sqlite => {
                let terms = search_terms(text);
                if terms.is_empty() {
                    return Err(DbError::invalid_query("search requires at least one term"));
                }
                let parts = terms
                    .iter()
                    .map(|term| self.like(column, format!("%{}%", escape_like(term)), binds))
                    .collect();
                Ok(join_required(parts, " OR "))
            }
        }
    }

    /// Renders an `ORDER BY` list (without the keyword).
    pub fn order_clause(&self, order: &[OrderBy]) -> Result<String> {
        order
            .iter()
            .map(|o| Ok(format!("{} {}", self.column(&o.attribute)?, o.direction.as_sql())))
            .collect::<Result<Vec<_>>>()
            .map(|parts| parts.join(", "))
    }
}

/// Pieces of a `SELECT` over one collection table.
#[derive(Clone, Debug, Default)]
pub struct SqlSelect {
    /// Quoted table name.
    pub table: String,
    /// Quoted alias.
    pub alias: String,
    /// Projected expressions.
    pub columns: Vec<String>,
    /// Predicates combined with `AND`.
    pub conditions: Vec<String>,
    /// Rendered `ORDER BY` list.
    pub order: Option<String>,
    /// Row limit placeholder.
    pub limit: Option<String>,
    /// Row offset placeholder.
    pub offset: Option<String>,
}

impl SqlSelect {
    /// Renders the statement text.
    pub fn render(&self) -> String {
        let mut sql = format!(
            "SELECT {} FROM {} AS {}",
            if self.columns.is_empty() {
                "*".to_string()
            } else {
                self.columns.join(", ")
            },
            self.table,
            self.alias
        );
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }
        if let Some(order) = &self.order {
            if !order.is_empty() {
                sql.push_str(" ORDER BY ");
                sql.push_str(order);
            }
        }
        if let Some(limit) = &self.limit {
            sql.push_str(" LIMIT ");
            sql.push_str(limit);
        }
        if let Some(offset) = &self.offset {
            sql.push_str(" OFFSET ");
            sql.push_str(offset);
        }
        sql
    }
}

fn require_values(query: &Query, values: &[Value], min: usize) -> Result<()> {
    if values.len() < min {
        return Err(DbError::invalid_query(format!(
            "{} on '{}' requires at least {min} value(s)",
            query.method(),
            query.attribute()
        )));
    }
    Ok(())
}

pub(crate) fn range_values(query: &Query, values: Vec<Value>) -> Result<(Value, Value)> {
    let mut iter = values.into_iter();
    match (iter.next(), iter.next(), iter.next()) {
        (Some(low), Some(high), None) => Ok((low, high)),
        _ => Err(DbError::invalid_query(format!(
            "{} on '{}' requires exactly two values",
            query.method(),
            query.attribute()
        ))),
    }
}

/// Text form of a value placed inside a pattern.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_json().to_string(),
    }
}

/// The single operand of a pattern or search query.
pub(crate) fn single_value(query: &Query) -> Result<&Value> {
    match query.values() {
        [value] => Ok(value),
        values => Err(DbError::invalid_query(format!(
            "{} on '{}' requires exactly one value (got {})",
            query.method(),
            query.attribute(),
            values.len()
        ))),
    }
}

/// Negations hold for rows where the attribute is NULL, the way a missing
/// field satisfies `$ne` in a document store.
fn negate_if(negate: bool, column: &str, positive: String) -> String {
    if negate {
        or_null(column, format!("NOT ({positive})"))
    } else {
        positive
    }
}

fn or_null(column: &str, condition: String) -> String {
    format!("({column} IS NULL OR {condition})")
}

fn join(parts: Vec<String>, glue: &str) -> Option<String> {
    if parts.is_empty() {
        None
    } else {
        Some(join_required(parts, glue))
    }
}

fn join_required(parts: Vec<String>, glue: &str) -> String {
    if parts.len() == 1 {
        parts.into_iter().next().unwrap_or_default()
    } else {
        format!("({})", parts.join(glue))
    }
}
