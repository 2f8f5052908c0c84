#![forbid(unsafe_code)]

//! Condition translation and keyset pagination.
//!
//! Both query families share the attribute remapping and escaping helpers;
//! the SQL family renders through [`sql::SqlTranslator`], the document-store
//! family through [`filter::FilterTranslator`].

/// Neutral-to-internal attribute names.
///
/// The single place reserved `$` names are mapped to storage columns.
pub mod attributes;

/// Keyset pagination engine.
pub mod cursor;

/// Pattern escaping for `LIKE`, regex and full-text input.
pub mod escape;

/// BSON-style filter documents for the document-store family.
pub mod filter;

/// SQL predicates with bind parameters.
pub mod sql;

pub use cursor::{build_page_constraint, Cursor, PageConstraint};
pub use filter::FilterTranslator;
pub use sql::{Binds, SqlDialect, SqlSelect, SqlTranslator};
