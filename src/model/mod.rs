//! Document/query value model shared by every component.

pub mod collection;
pub mod document;
pub mod permission;
pub mod query;
pub mod value;

pub use collection::{Attribute, AttributeKind, Collection, Index, IndexKind, METADATA_COLLECTION};
pub use document::{now_timestamp, Document};
pub use permission::{Permission, PermissionType};
pub use query::{CursorDirection, Method, OrderBy, OrderDirection, Query, QueryLimits};
pub use value::{compare_values, Value};
