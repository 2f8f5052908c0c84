//! Evaluation of BSON-style filter documents against stored documents.
//!
//! A filter is compiled once into a [`Matcher`] tree (regexes included) and
//! then applied to every candidate. Field semantics follow the document-store
//! conventions: a missing field equals `null`, an array field matches when
//! any element does, and range operators only compare values of the same
//! type class.

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value as Json};

use crate::adapter::memory::engine::{codes, EngineError};
use crate::model::{compare_values, Value};

/// Compiled filter.
#[derive(Debug, Clone)]
pub(crate) enum Matcher {
    /// Every child matches (`$and`, or several keys in one object).
    All(Vec<Matcher>),
    /// At least one child matches (`$or`).
    Any(Vec<Matcher>),
    /// No child matches (`$nor`).
    NoneOf(Vec<Matcher>),
    /// Conditions on a single field.
    Field { path: String, ops: Vec<FieldOp> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RangeOp {
    Lt,
    Lte,
    Gt,
    Gte,
}

impl RangeOp {
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            RangeOp::Lt => ordering == Ordering::Less,
            RangeOp::Lte => ordering != Ordering::Greater,
            RangeOp::Gt => ordering == Ordering::Greater,
            RangeOp::Gte => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum FieldOp {
    Eq(Value),
    Ne(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Range(RangeOp, Value),
    Regex(Regex),
}

impl Matcher {
    /// Compiles a filter document.
    pub(crate) fn compile(filter: &Json) -> Result<Self, EngineError> {
        let object = filter
            .as_object()
            .ok_or_else(|| bad_value("filter must be an object"))?;
        let mut clauses = Vec::with_capacity(object.len());
        for (key, value) in object {
            clauses.push(match key.as_str() {
                "$and" => Matcher::All(compile_list(key, value)?),
                "$or" => Matcher::Any(compile_list(key, value)?),
                "$nor" => Matcher::NoneOf(compile_list(key, value)?),
                "$text" => {
                    return Err(bad_value("text search requires a native text index"));
                }
                other if other.starts_with('$') => {
                    return Err(bad_value(format!("unknown top level operator: {other}")));
                }
                field => Matcher::Field {
                    path: field.to_string(),
                    ops: compile_field(value)?,
                },
            });
        }
        Ok(if clauses.len() == 1 {
            clauses.remove(0)
        } else {
            Matcher::All(clauses)
        })
    }

    /// Whether `document` satisfies the filter.
    pub(crate) fn matches(&self, document: &Map<String, Json>) -> bool {
        match self {
            Matcher::All(children) => children.iter().all(|c| c.matches(document)),
            Matcher::Any(children) => children.iter().any(|c| c.matches(document)),
            Matcher::NoneOf(children) => !children.iter().any(|c| c.matches(document)),
            Matcher::Field { path, ops } => {
                let field = document.get(path).map(Value::from_json).unwrap_or(Value::Null);
                ops.iter().all(|op| op.matches(&field))
            }
        }
    }
}

impl FieldOp {
    fn matches(&self, field: &Value) -> bool {
        match self {
            FieldOp::Eq(expected) => equals(field, expected),
            FieldOp::Ne(expected) => !equals(field, expected),
            FieldOp::In(expected) => expected.iter().any(|e| equals(field, e)),
            FieldOp::Nin(expected) => !expected.iter().any(|e| equals(field, e)),
            FieldOp::Range(op, bound) => any_element(field, |v| {
                same_class(v, bound) && op.accepts(compare_values(v, bound))
            }),
            FieldOp::Regex(regex) => any_element(field, |v| {
                v.as_str().map(|s| regex.is_match(s)).unwrap_or(false)
            }),
        }
    }
}

fn compile_list(op: &str, value: &Json) -> Result<Vec<Matcher>, EngineError> {
    let items = value
        .as_array()
        .ok_or_else(|| bad_value(format!("{op} argument must be an array")))?;
    if items.is_empty() {
        return Err(bad_value(format!("{op} argument must be a non-empty array")));
    }
    items.iter().map(Matcher::compile).collect()
}

fn compile_field(condition: &Json) -> Result<Vec<FieldOp>, EngineError> {
    let operators = match condition.as_object() {
        Some(map) if map.keys().any(|k| k.starts_with('$')) => map,
        _ => return Ok(vec![FieldOp::Eq(Value::from_json(condition))]),
    };
    let mut ops = Vec::with_capacity(operators.len());
    for (op, operand) in operators {
        ops.push(match op.as_str() {
            "$eq" => FieldOp::Eq(Value::from_json(operand)),
            "$ne" => FieldOp::Ne(Value::from_json(operand)),
            "$in" => FieldOp::In(operand_list(op, operand)?),
            "$nin" => FieldOp::Nin(operand_list(op, operand)?),
            "$lt" => FieldOp::Range(RangeOp::Lt, Value::from_json(operand)),
            "$lte" => FieldOp::Range(RangeOp::Lte, Value::from_json(operand)),
            "$gt" => FieldOp::Range(RangeOp::Gt, Value::from_json(operand)),
            "$gte" => FieldOp::Range(RangeOp::Gte, Value::from_json(operand)),
            "$regex" => FieldOp::Regex(compile_regex(operand, operators.get("$options"))?),
            "$options" if operators.contains_key("$regex") => continue,
            "$options" => return Err(bad_value("$options needs a $regex")),
            other => return Err(bad_value(format!("unknown operator: {other}"))),
        });
    }
    Ok(ops)
}

fn operand_list(op: &str, operand: &Json) -> Result<Vec<Value>, EngineError> {
    operand
        .as_array()
        .map(|items| items.iter().map(Value::from_json).collect())
        .ok_or_else(|| bad_value(format!("{op} needs an array")))
}

fn compile_regex(pattern: &Json, options: Option<&Json>) -> Result<Regex, EngineError> {
    let pattern = pattern
        .as_str()
        .ok_or_else(|| bad_value("$regex has to be a string"))?;
    let mut builder = RegexBuilder::new(pattern);
    if let Some(options) = options {
        let options = options
            .as_str()
            .ok_or_else(|| bad_value("$options has to be a string"))?;
        for flag in options.chars() {
            match flag {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                'x' => builder.ignore_whitespace(true),
                other => return Err(bad_value(format!("invalid flag in regex options: {other}"))),
            };
        }
    }
    builder
        .build()
        .map_err(|err| bad_value(format!("invalid regular expression: {err}")))
}

/// Equality with array semantics: an array field equals a scalar it contains
/// as well as an identical array.
fn equals(field: &Value, expected: &Value) -> bool {
    if let (Value::Object(_), Value::Object(_)) = (field, expected) {
        return field == expected;
    }
    if compare_values(field, expected) == Ordering::Equal && same_class(field, expected) {
        return true;
    }
    match field {
        Value::Array(items) => items
            .iter()
            .any(|item| same_class(item, expected) && compare_values(item, expected) == Ordering::Equal),
        _ => false,
    }
}

fn any_element(field: &Value, predicate: impl Fn(&Value) -> bool) -> bool {
    match field {
        Value::Array(items) => items.iter().any(predicate),
        other => predicate(other),
    }
}

fn same_class(left: &Value, right: &Value) -> bool {
    matches!(
        (left, right),
        (Value::Null, Value::Null)
            | (Value::Bool(_), Value::Bool(_))
            | (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_))
            | (Value::String(_), Value::String(_))
            | (Value::Array(_), Value::Array(_))
            | (Value::Object(_), Value::Object(_))
    )
}

fn bad_value(message: impl Into<String>) -> EngineError {
    EngineError::new(codes::BAD_VALUE, message)
}
