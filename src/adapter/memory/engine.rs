//! The document store behind [`MemoryStore`](super::MemoryStore).
//!
//! Namespaces hold JSON objects keyed by their `_id` sequence. The engine
//! speaks in numeric error codes like a document database server does; the
//! adapter translates them at its boundary. Every mutation hands back the
//! [`Undo`] entry that reverses it so a session can journal its writes.

use std::collections::BTreeMap;
use std::time::Instant;

use serde_json::{Map, Value as Json};
use thiserror::Error;
use tracing::{debug, trace};

use crate::adapter::memory::matcher::Matcher;
use crate::model::{compare_values, Value};
use crate::query::attributes::{COL_SEQUENCE, COL_TENANT, COL_UID};
use crate::retry::Probe;

/// Numeric error codes raised by the engine.
pub mod codes {
    /// Malformed filter, operator or option.
    pub const BAD_VALUE: i32 = 2;
    /// Namespace does not exist.
    pub const NAMESPACE_NOT_FOUND: i32 = 26;
    /// Index does not exist.
    pub const INDEX_NOT_FOUND: i32 = 27;
    /// Namespace already exists.
    pub const NAMESPACE_EXISTS: i32 = 48;
    /// Operation exceeded its time limit.
    pub const MAX_TIME_MS_EXPIRED: i32 = 50;
    /// Index with the same name already exists.
    pub const INDEX_ALREADY_EXISTS: i32 = 68;
    /// Commit or abort without an open session transaction.
    pub const NO_SUCH_TRANSACTION: i32 = 251;
    /// Unique key violated.
    pub const DUPLICATE_KEY: i32 = 11000;
}

/// Polls an index build needs before it validates existing documents.
pub(crate) const BUILD_STEPS: u32 = 1;

/// Failure reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code})")]
pub struct EngineError {
    /// Numeric code, see [`codes`].
    pub code: i32,
    /// Server-style message.
    pub message: String,
}

impl EngineError {
    /// Error with the given code.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

pub(crate) type Stored = Map<String, Json>;

#[derive(Debug, Clone, Default)]
pub(crate) struct Namespace {
    last_id: i64,
    documents: BTreeMap<i64, Stored>,
    indexes: Vec<UniqueIndex>,
}

#[derive(Debug, Clone)]
struct UniqueIndex {
    name: String,
    fields: Vec<String>,
    state: BuildState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BuildState {
    Building { remaining: u32 },
    Ready,
    Failed(EngineError),
}

impl UniqueIndex {
    fn enforced(&self) -> bool {
        !matches!(self.state, BuildState::Failed(_))
    }
}

/// Reverse of one mutation.
#[derive(Debug)]
pub(crate) enum Undo {
    Inserted { namespace: String, id: i64 },
    Replaced { namespace: String, id: i64, previous: Stored },
    Removed { namespace: String, id: i64, previous: Stored },
    Created { namespace: String },
    Dropped { namespace: String, data: Namespace },
    IndexAdded { namespace: String, index: String },
}

#[derive(Debug, Default)]
pub(crate) struct Engine {
    namespaces: BTreeMap<String, Namespace>,
}

impl Engine {
    pub(crate) fn has_namespace(&self, name: &str) -> bool {
        self.namespaces.contains_key(name)
    }

    pub(crate) fn create_namespace(&mut self, name: &str) -> Result<Undo, EngineError> {
        if self.has_namespace(name) {
            return Err(EngineError::new(
                codes::NAMESPACE_EXISTS,
                format!("Collection {name} already exists."),
            ));
        }
        self.namespaces.insert(name.to_string(), Namespace::default());
        debug!(namespace = name, "namespace created");
        Ok(Undo::Created {
            namespace: name.to_string(),
        })
    }

    /// Creates the namespace unless it exists; `None` when nothing changed.
    pub(crate) fn ensure_namespace(&mut self, name: &str) -> Option<Undo> {
        self.create_namespace(name).ok()
    }

    pub(crate) fn drop_namespace(&mut self, name: &str) -> Result<Undo, EngineError> {
        let data = self
            .namespaces
            .remove(name)
            .ok_or_else(|| not_found(name))?;
        debug!(namespace = name, documents = data.documents.len(), "namespace dropped");
        Ok(Undo::Dropped {
            namespace: name.to_string(),
            data,
        })
    }

    fn namespace(&self, name: &str) -> Result<&Namespace, EngineError> {
        self.namespaces.get(name).ok_or_else(|| not_found(name))
    }

    fn namespace_mut(&mut self, name: &str) -> Result<&mut Namespace, EngineError> {
        self.namespaces.get_mut(name).ok_or_else(|| not_found(name))
    }

    /// Inserts a document, assigning `_id` unless it carries one.
    pub(crate) fn insert(&mut self, name: &str, mut document: Stored) -> Result<(i64, Undo), EngineError> {
        let ns = self.namespace_mut(name)?;
        let id = match document.get(COL_SEQUENCE).and_then(Json::as_i64) {
            Some(id) => {
                if ns.documents.contains_key(&id) {
                    return Err(duplicate(name, "_id_", &[Value::Int(id)]));
                }
                id
            }
            None => ns.last_id + 1,
        };
        document.insert(COL_SEQUENCE.to_string(), Json::from(id));
        check_unique(name, ns, &document, None)?;
        ns.last_id = ns.last_id.max(id);
        ns.documents.insert(id, document);
        trace!(namespace = name, id, "document inserted");
        Ok((
            id,
            Undo::Inserted {
                namespace: name.to_string(),
                id,
            },
        ))
    }

    /// Replaces the document stored under `id`, keeping its `_id`.
    pub(crate) fn replace(&mut self, name: &str, id: i64, mut document: Stored) -> Result<Undo, EngineError> {
        let ns = self.namespace_mut(name)?;
        if !ns.documents.contains_key(&id) {
            return Err(EngineError::new(
                codes::BAD_VALUE,
                format!("no document with _id {id} in {name}"),
            ));
        }
        document.insert(COL_SEQUENCE.to_string(), Json::from(id));
        check_unique(name, ns, &document, Some(id))?;
        let previous = ns.documents.insert(id, document).unwrap_or_default();
        Ok(Undo::Replaced {
            namespace: name.to_string(),
            id,
            previous,
        })
    }

    pub(crate) fn remove(&mut self, name: &str, id: i64) -> Result<Undo, EngineError> {
        let ns = self.namespace_mut(name)?;
        let previous = ns.documents.remove(&id).ok_or_else(|| {
            EngineError::new(codes::BAD_VALUE, format!("no document with _id {id} in {name}"))
        })?;
        Ok(Undo::Removed {
            namespace: name.to_string(),
            id,
            previous,
        })
    }

    /// Documents matching `filter`, sorted, then windowed by `skip`/`limit`.
    /// Evaluation aborts with `MaxTimeMSExpired` once `deadline` passes.
    pub(crate) fn find(
        &self,
        name: &str,
        filter: Option<&Json>,
        sort: &[(String, i32)],
        skip: u64,
        limit: Option<u64>,
        deadline: Option<Instant>,
    ) -> Result<Vec<Stored>, EngineError> {
        let ns = self.namespace(name)?;
        let matcher = filter.map(Matcher::compile).transpose()?;
        check_deadline(deadline)?;
        let mut hits: Vec<(Vec<Value>, &Stored)> = Vec::new();
        for document in ns.documents.values() {
            check_deadline(deadline)?;
            if matcher.as_ref().map_or(true, |m| m.matches(document)) {
                let key = sort.iter().map(|(field, _)| field_value(document, field)).collect();
                hits.push((key, document));
            }
        }
        if !sort.is_empty() {
            hits.sort_by(|(a, _), (b, _)| {
                for ((left, right), (_, direction)) in a.iter().zip(b.iter()).zip(sort) {
                    let ordering = compare_values(left, right);
                    if ordering.is_ne() {
                        return if *direction < 0 { ordering.reverse() } else { ordering };
                    }
                }
                std::cmp::Ordering::Equal
            });
        }
        let skip = usize::try_from(skip).unwrap_or(usize::MAX);
        let take = limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        Ok(hits
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|(_, document)| document.clone())
            .collect())
    }

    pub(crate) fn has_index(&self, name: &str, index: &str) -> bool {
        self.namespaces
            .get(name)
            .map_or(false, |ns| ns.indexes.iter().any(|i| i.name == index))
    }

    /// Registers a unique index in the `Building` state. Writes are checked
    /// against it right away; existing documents are validated when the
    /// build completes.
    pub(crate) fn start_index_build(
        &mut self,
        name: &str,
        index: &str,
        fields: Vec<String>,
    ) -> Result<Undo, EngineError> {
        let ns = self.namespace_mut(name)?;
        if ns.indexes.iter().any(|i| i.name == index) {
            return Err(EngineError::new(
                codes::INDEX_ALREADY_EXISTS,
                format!("index {index} already exists on {name}"),
            ));
        }
        ns.indexes.push(UniqueIndex {
            name: index.to_string(),
            fields,
            state: BuildState::Building {
                remaining: BUILD_STEPS,
            },
        });
        debug!(namespace = name, index, "index build started");
        Ok(Undo::IndexAdded {
            namespace: name.to_string(),
            index: index.to_string(),
        })
    }

    /// Advances a build by one step and reports its state.
    pub(crate) fn poll_index(&mut self, name: &str, index: &str) -> Result<Probe, EngineError> {
        let ns = self.namespace_mut(name)?;
        let position = ns
            .indexes
            .iter()
            .position(|i| i.name == index)
            .ok_or_else(|| {
                EngineError::new(codes::INDEX_NOT_FOUND, format!("index not found with name [{index}]"))
            })?;
        let next = match &ns.indexes[position].state {
            BuildState::Ready => return Ok(Probe::Ready),
            BuildState::Failed(err) => return Ok(Probe::Failed(err.message.clone())),
            BuildState::Building { remaining } if *remaining > 0 => BuildState::Building {
                remaining: remaining - 1,
            },
            BuildState::Building { .. } => match validate_index(name, ns, &ns.indexes[position]) {
                Ok(()) => BuildState::Ready,
                Err(err) => BuildState::Failed(err),
            },
        };
        let probe = match &next {
            BuildState::Ready => Probe::Ready,
            BuildState::Failed(err) => Probe::Failed(err.message.clone()),
            BuildState::Building { .. } => Probe::Pending,
        };
        ns.indexes[position].state = next;
        Ok(probe)
    }

    /// Removes an index, returning the error it failed with, if any.
    pub(crate) fn discard_index(&mut self, name: &str, index: &str) -> Option<EngineError> {
        let ns = self.namespaces.get_mut(name)?;
        let position = ns.indexes.iter().position(|i| i.name == index)?;
        match ns.indexes.remove(position).state {
            BuildState::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Applies an undo entry. Entries whose target disappeared are skipped.
    pub(crate) fn undo(&mut self, undo: Undo) {
        match undo {
            Undo::Inserted { namespace, id } => {
                if let Some(ns) = self.namespaces.get_mut(&namespace) {
                    ns.documents.remove(&id);
                }
            }
            Undo::Replaced { namespace, id, previous } | Undo::Removed { namespace, id, previous } => {
                if let Some(ns) = self.namespaces.get_mut(&namespace) {
                    ns.documents.insert(id, previous);
                }
            }
            Undo::Created { namespace } => {
                self.namespaces.remove(&namespace);
            }
            Undo::Dropped { namespace, data } => {
                self.namespaces.insert(namespace, data);
            }
            Undo::IndexAdded { namespace, index } => {
                self.discard_index(&namespace, &index);
            }
        }
    }
}

fn not_found(name: &str) -> EngineError {
    EngineError::new(codes::NAMESPACE_NOT_FOUND, format!("ns not found: {name}"))
}

fn duplicate(name: &str, index: &str, key: &[Value]) -> EngineError {
    let key = key.iter().map(|v| v.to_json().to_string()).collect::<Vec<_>>().join(", ");
    EngineError::new(
        codes::DUPLICATE_KEY,
        format!("E11000 duplicate key error collection: {name} index: {index} dup key: {{ {key} }}"),
    )
}

fn check_deadline(deadline: Option<Instant>) -> Result<(), EngineError> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(EngineError::new(
            codes::MAX_TIME_MS_EXPIRED,
            "operation exceeded time limit",
        )),
        _ => Ok(()),
    }
}

fn field_value(document: &Stored, field: &str) -> Value {
    document.get(field).map(Value::from_json).unwrap_or(Value::Null)
}

/// Key of `document` under `fields`. `_tenant` may be null; any other
/// missing field leaves the document out of the index.
fn index_key(document: &Stored, fields: &[String]) -> Option<Vec<Value>> {
    fields
        .iter()
        .map(|field| {
            let value = field_value(document, field);
            if value.is_null() && field != COL_TENANT {
                None
            } else {
                Some(value)
            }
        })
        .collect()
}

fn identity_fields() -> [String; 2] {
    [COL_UID.to_string(), COL_TENANT.to_string()]
}

fn check_unique(name: &str, ns: &Namespace, document: &Stored, skip: Option<i64>) -> Result<(), EngineError> {
    let identity = identity_fields();
    let constraints = std::iter::once(("_uid_", &identity[..])).chain(
        ns.indexes
            .iter()
            .filter(|i| i.enforced())
            .map(|i| (i.name.as_str(), &i.fields[..])),
    );
    for (index, fields) in constraints {
        let Some(key) = index_key(document, fields) else {
            continue;
        };
        let clash = ns
            .documents
            .iter()
            .filter(|(id, _)| Some(**id) != skip)
            .any(|(_, other)| index_key(other, fields).as_ref() == Some(&key));
        if clash {
            return Err(duplicate(name, index, &key));
        }
    }
    Ok(())
}

fn validate_index(name: &str, ns: &Namespace, index: &UniqueIndex) -> Result<(), EngineError> {
    let mut seen: Vec<Vec<Value>> = Vec::new();
    for document in ns.documents.values() {
        if let Some(key) = index_key(document, &index.fields) {
            if seen.contains(&key) {
                return Err(duplicate(name, &index.name, &key));
            }
            seen.push(key);
        }
    }
    Ok(())
}
