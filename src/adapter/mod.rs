//! The adapter contract and the logic every backend shares.
//!
//! Concrete adapters compose the free-standing query, auth and transaction
//! helpers; nothing is inherited. [`plan_find`] gathers the backend-neutral
//! pieces of a read (validated filters, tenant scope, permission restriction,
//! keyset page) so each backend only has to render and execute them.

use std::collections::BTreeSet;

use crate::auth::{restrict, AuthContext, Restriction};
use crate::config::AdapterOptions;
use crate::model::document::ATTR_SEQUENCE;
use crate::model::{
    now_timestamp, AttributeKind, Collection, CursorDirection, Document, Index, OrderDirection,
    PermissionType, Query,
};
use crate::query::attributes::validate_user_attribute;
use crate::query::{build_page_constraint, Cursor, PageConstraint};
use crate::tx::Transactional;
use crate::types::{DbError, Result};

/// In-memory document-store adapter.
pub mod memory;
/// Checkout pool of adapters.
pub mod pool;
/// SQLite adapter.
pub mod sqlite;

pub use memory::{MemoryAdapter, MemoryStore};
pub use pool::{AdapterPool, PooledAdapter};
pub use sqlite::SqliteAdapter;

/// Default page size of [`FindRequest`].
pub const DEFAULT_LIMIT: u64 = 25;

/// Parameters of [`Adapter::find`].
#[derive(Clone, Debug, PartialEq)]
pub struct FindRequest {
    /// Filter and `select` queries.
    pub queries: Vec<Query>,
    /// Maximum documents returned; `None` for no limit.
    pub limit: Option<u64>,
    /// Documents skipped before the page starts.
    pub offset: Option<u64>,
    /// Order attributes, most significant first.
    pub order_attributes: Vec<String>,
    /// Directions matching `order_attributes` (missing entries are ascending).
    pub order_types: Vec<OrderDirection>,
    /// Keyset boundary.
    pub cursor: Option<Cursor>,
    /// Side of the cursor to fetch.
    pub cursor_direction: CursorDirection,
    /// Permission type the caller must hold.
    pub for_permission: PermissionType,
}

impl Default for FindRequest {
    fn default() -> Self {
        Self {
            queries: Vec::new(),
            limit: Some(DEFAULT_LIMIT),
            offset: None,
            order_attributes: Vec::new(),
            order_types: Vec::new(),
            cursor: None,
            cursor_direction: CursorDirection::After,
            for_permission: PermissionType::Read,
        }
    }
}

impl FindRequest {
    /// Request with the given queries and default paging.
    pub fn new(queries: Vec<Query>) -> Self {
        Self {
            queries,
            ..Self::default()
        }
    }

    /// Sets the page size; `None` removes the limit.
    pub fn limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the offset.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Appends an order attribute.
    pub fn order(mut self, attribute: impl Into<String>, direction: OrderDirection) -> Self {
        self.order_attributes.push(attribute.into());
        self.order_types.push(direction);
        self
    }

    /// Sets the keyset cursor.
    pub fn cursor(mut self, cursor: Cursor, direction: CursorDirection) -> Self {
        self.cursor = Some(cursor);
        self.cursor_direction = direction;
        self
    }

    /// Sets the permission type required.
    pub fn for_permission(mut self, kind: PermissionType) -> Self {
        self.for_permission = kind;
        self
    }
}

/// Contract implemented by every backend.
///
/// One instance owns one connection or session and its transaction state;
/// it must not be shared between concurrent callers while a transaction is
/// open. Use [`AdapterPool`] to hand instances out per unit of work.
pub trait Adapter: Transactional {
    /// Options the adapter was opened with.
    fn options(&self) -> &AdapterOptions;

    /// Per-call deadline in milliseconds; 0 disables it.
    fn set_timeout(&mut self, timeout_ms: u64);

    /// Current deadline in milliseconds.
    fn timeout(&self) -> u64;

    /// Creates a collection with its attributes and indexes.
    fn create_collection(&mut self, ctx: &AuthContext, collection: &Collection) -> Result<()>;

    /// Deletes a collection and its documents.
    fn delete_collection(&mut self, ctx: &AuthContext, collection: &str) -> Result<()>;

    /// Adds an index to an existing collection.
    fn create_index(&mut self, ctx: &AuthContext, collection: &str, index: &Index) -> Result<()>;

    /// Fetches one document by id, honoring `select` queries.
    fn get_document(
        &self,
        ctx: &AuthContext,
        collection: &str,
        id: &str,
        queries: &[Query],
    ) -> Result<Option<Document>>;

    /// Finds documents.
    fn find(&self, ctx: &AuthContext, collection: &str, request: &FindRequest) -> Result<Vec<Document>>;

    /// Counts matching documents, stopping at `max` when given.
    fn count(
        &self,
        ctx: &AuthContext,
        collection: &str,
        queries: &[Query],
        max: Option<u64>,
    ) -> Result<u64>;

    /// Sums a numeric attribute over matching documents (at most `max`).
    fn sum(
        &self,
        ctx: &AuthContext,
        collection: &str,
        attribute: &str,
        queries: &[Query],
        max: Option<u64>,
    ) -> Result<f64>;

    /// Creates one document and returns it with its sequence assigned.
    fn create_document(
        &mut self,
        ctx: &AuthContext,
        collection: &str,
        document: Document,
    ) -> Result<Document> {
        let mut created = self.create_documents(ctx, collection, vec![document])?;
        created
            .pop()
            .ok_or_else(|| DbError::backend("create returned no document"))
    }

    /// Creates documents in order.
    fn create_documents(
        &mut self,
        ctx: &AuthContext,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<Vec<Document>>;

    /// Updates the document `id`. Attributes present in `document` are
    /// written (an explicit null clears one). A non-empty permission list
    /// replaces the stored one; an empty list keeps it.
    fn update_document(
        &mut self,
        ctx: &AuthContext,
        collection: &str,
        id: &str,
        document: Document,
    ) -> Result<Document>;

    /// Applies `patch` to every matching document the caller may update and
    /// returns how many changed.
    fn update_documents(
        &mut self,
        ctx: &AuthContext,
        collection: &str,
        patch: &Document,
        queries: &[Query],
    ) -> Result<u64>;

    /// Creates or updates documents by id. An existing document keeps its
    /// sequence and creation time.
    fn upsert_documents(
        &mut self,
        ctx: &AuthContext,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<Vec<Document>>;

    /// Deletes the document `id`; `false` when no visible document matched.
    fn delete_document(&mut self, ctx: &AuthContext, collection: &str, id: &str) -> Result<bool>;

    /// Deletes every matching document the caller may delete.
    fn delete_documents(
        &mut self,
        ctx: &AuthContext,
        collection: &str,
        queries: &[Query],
    ) -> Result<u64>;

    /// Fills in missing sequences by looking the documents up by id.
    fn get_sequences(
        &self,
        ctx: &AuthContext,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<Vec<Document>>;

    /// Tenant predicate applied to reads of `collection`, or to a batch
    /// lookup over documents owned by `tenants`.
    fn tenant_filters(
        &self,
        ctx: &AuthContext,
        collection: &str,
        tenants: &[Option<i64>],
    ) -> Result<Option<Query>> {
        let is_metadata = collection == crate::model::METADATA_COLLECTION;
        self.options()
            .tenant_scope()
            .batch_filter(ctx, tenants, is_metadata)
    }
}

/// Backend-neutral pieces of a `find`.
#[derive(Clone, Debug)]
pub struct FindPlan {
    /// Caller filters plus the tenant predicate.
    pub filters: Vec<Query>,
    /// Permission restriction.
    pub restriction: Restriction,
    /// Keyset predicate and effective order.
    pub page: PageConstraint,
    /// Projection, `None` for all attributes.
    pub selections: Option<Vec<String>>,
}

/// Validates a request and assembles its plan.
pub fn plan_find(
    options: &AdapterOptions,
    ctx: &AuthContext,
    collection: &Collection,
    request: &FindRequest,
) -> Result<FindPlan> {
    let limits = options.limits();
    for query in &request.queries {
        query.validate(&limits)?;
    }
    let filters = options
        .tenant_scope()
        .scope(ctx, &request.queries, collection.is_metadata())?;
    let restriction = restrict(ctx, request.for_permission)?;
    let page = build_page_constraint(
        &request.order_attributes,
        &request.order_types,
        request.cursor.as_ref(),
        request.cursor_direction,
    )?;
    let mut filters = filters;
    if let Some(predicate) = page.predicate.clone() {
        filters.push(predicate);
    }
    Ok(FindPlan {
        filters,
        restriction,
        page,
        selections: Query::selections(&request.queries),
    })
}

/// Validated filters for count/sum/bulk writes: caller queries plus tenant
/// predicate.
pub fn scoped_filters(
    options: &AdapterOptions,
    ctx: &AuthContext,
    collection: &Collection,
    queries: &[Query],
) -> Result<Vec<Query>> {
    let limits = options.limits();
    for query in queries {
        query.validate(&limits)?;
    }
    options
        .tenant_scope()
        .scope(ctx, queries, collection.is_metadata())
}

/// Filters selecting one document by id within the caller's tenant.
pub fn id_filters(
    options: &AdapterOptions,
    ctx: &AuthContext,
    collection: &Collection,
    id: &str,
) -> Result<Vec<Query>> {
    options.tenant_scope().scope(
        ctx,
        &[Query::equal(crate::model::document::ATTR_ID, vec![id])],
        collection.is_metadata(),
    )
}

/// Prepares a document for insertion: identifier and attribute checks,
/// tenant stamp, timestamps.
pub fn prepare_new(
    options: &AdapterOptions,
    ctx: &AuthContext,
    collection: &Collection,
    document: &mut Document,
) -> Result<()> {
    if document.id.is_empty() {
        return Err(DbError::invalid_query("document $id must not be empty"));
    }
    check_attributes(collection, document)?;
    if let Some(sequence) = &document.sequence {
        if sequence.parse::<i64>().map(|s| s <= 0).unwrap_or(true) {
            return Err(DbError::invalid_query(format!(
                "{ATTR_SEQUENCE} '{sequence}' is not a positive integer"
            )));
        }
    }
    options.tenant_scope().stamp(ctx, document)?;
    let now = now_timestamp()?;
    if document.created_at.is_none() {
        document.created_at = Some(now.clone());
    }
    if document.updated_at.is_none() {
        document.updated_at = Some(now);
    }
    document.collection = Some(collection.id.clone());
    Ok(())
}

/// Metadata document describing `collection`.
pub fn collection_document(collection: &Collection) -> Result<Document> {
    Ok(Document::new(collection.id.clone())
        .with("name", collection.id.clone())
        .with("attributes", serde_json::to_string(&collection.attributes)?)
        .with("indexes", serde_json::to_string(&collection.indexes)?))
}

/// Collection definition stored in a metadata document.
pub fn collection_from_document(document: &Document) -> Result<Collection> {
    let field = |key: &str| -> Result<&str> {
        document
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                DbError::backend(format!(
                    "metadata for collection '{}' lacks '{key}'",
                    document.id
                ))
            })
    };
    Ok(Collection {
        id: document.id.clone(),
        attributes: serde_json::from_str(field("attributes")?)?,
        indexes: serde_json::from_str(field("indexes")?)?,
    })
}

/// Rejects attributes the collection does not declare. Schemaless
/// collections (no attributes, memory store only) accept any valid name.
pub fn check_attributes(collection: &Collection, document: &Document) -> Result<()> {
    for key in document.attributes.keys() {
        validate_user_attribute(key)?;
        if !collection.attributes.is_empty() && collection.attribute(key).is_none() {
            return Err(DbError::invalid_query(format!(
                "unknown attribute '{key}' for collection '{}'",
                collection.id
            )));
        }
    }
    Ok(())
}

/// Under shared tables a collection defined without a tenant belongs to
/// every tenant, so no single tenant may delete it.
pub fn check_deletable(options: &AdapterOptions, meta_doc: &Document) -> Result<()> {
    if options.shared_tables && meta_doc.tenant.is_none() {
        return Err(DbError::invalid_query(format!(
            "collection '{}' is shared by every tenant and cannot be deleted by one",
            meta_doc.id
        )));
    }
    Ok(())
}

/// Checks that `attribute` can be summed.
pub fn check_summable(collection: &Collection, attribute: &str) -> Result<()> {
    if attribute == ATTR_SEQUENCE {
        return Ok(());
    }
    match collection.attribute(attribute) {
        Some(a) if !a.array && matches!(a.kind, AttributeKind::Integer | AttributeKind::Float) => Ok(()),
        Some(_) => Err(DbError::invalid_query(format!(
            "attribute '{attribute}' is not numeric"
        ))),
        None if collection.attributes.is_empty() => validate_user_attribute(attribute),
        None => Err(DbError::invalid_query(format!(
            "unknown attribute '{attribute}'"
        ))),
    }
}

/// Checks that the index references declared attributes and is not a
/// duplicate of an existing one.
pub fn check_new_index(collection: &Collection, index: &Index) -> Result<()> {
    crate::model::collection::validate_key(&index.id)?;
    if collection.indexes.iter().any(|i| i.id == index.id) {
        return Err(DbError::duplicate(format!(
            "index '{}' already exists on '{}'",
            index.id, collection.id
        )));
    }
    if index.attributes.is_empty() {
        return Err(DbError::invalid_query("index needs at least one attribute"));
    }
    let mut seen = BTreeSet::new();
    for key in &index.attributes {
        if !seen.insert(key) {
            return Err(DbError::invalid_query(format!("attribute '{key}' indexed twice")));
        }
        if !key.starts_with('$') && collection.attribute(key).is_none() {
            return Err(DbError::not_found(format!(
                "index '{}' references unknown attribute '{key}'",
                index.id
            )));
        }
    }
    Ok(())
}

/// Merges an update into the stored document. A null attribute removes it;
/// a non-empty permission list replaces the stored one.
pub fn merge_update(stored: &Document, update: Document) -> Result<Document> {
    let mut merged = stored.clone();
    if !update.id.is_empty() {
        merged.id = update.id;
    }
    for (key, value) in update.attributes {
        if value.is_null() {
            merged.attributes.remove(&key);
        } else {
            merged.attributes.insert(key, value);
        }
    }
    if !update.permissions.is_empty() {
        merged.permissions = update.permissions;
    }
    merged.updated_at = Some(match update.updated_at {
        Some(ts) => ts,
        None => now_timestamp()?,
    });
    Ok(merged)
}
