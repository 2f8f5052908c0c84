//! Backend-agnostic document database adapter core.
//!
//! Callers describe reads and writes with neutral [`model::Query`] trees and
//! an [`auth::AuthContext`]; each [`adapter::Adapter`] renders them for its
//! backend family (SQL through [`query::SqlTranslator`], document stores
//! through [`query::FilterTranslator`]) together with keyset pagination,
//! row-level permissions, tenant isolation and nested transactions.

#![warn(missing_docs)]

pub mod adapter;
pub mod auth;
pub mod config;
pub mod model;
pub mod query;
pub mod retry;
pub mod tx;
pub mod types;

pub use adapter::{Adapter, AdapterPool, FindRequest, MemoryAdapter, MemoryStore, SqliteAdapter};
pub use auth::AuthContext;
pub use config::AdapterOptions;
pub use model::{Collection, Document, Permission, PermissionType, Query, Value};
pub use query::Cursor;
pub use tx::{Transactional, TxState};
pub use types::{DbError, ErrorKind, Result};
