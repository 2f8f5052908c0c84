//! In-memory adapter (document-store family).
//!
//! Queries go through the same [`FilterTranslator`] a document database
//! client would use and the resulting filter documents are evaluated by a
//! small matcher. Documents are JSON objects with the internal field names
//! (`_uid`, `_tenant`, `_permissions`, ...), one namespace per collection.
//!
//! Several adapters can share one [`MemoryStore`]. Transactions are
//! session-style: with `transactions` enabled an adapter journals its writes
//! and undoes them on rollback; nested levels only move the counter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{json, Value as Json};
use tracing::{debug, info, warn};

use crate::adapter::{
    check_attributes, check_deletable, check_new_index, check_summable, collection_document,
    collection_from_document, id_filters, merge_update, plan_find, prepare_new, scoped_filters,
    Adapter, FindRequest,
};
use crate::auth::{restrict, AuthContext, Restriction};
use crate::config::AdapterOptions;
use crate::model::collection::validate_key;
use crate::model::document::{ATTR_ID, ATTR_SEQUENCE, ATTR_TENANT};
use crate::model::{
    Collection, Document, Index, IndexKind, Method, OrderBy, OrderDirection, Permission,
    PermissionType, Query, Value, METADATA_COLLECTION,
};
use crate::query::attributes::{
    internal_attribute, COL_CREATED_AT, COL_PERMISSIONS, COL_SEQUENCE, COL_TENANT, COL_UID,
    COL_UPDATED_AT,
};
use crate::query::filter::combine;
use crate::query::FilterTranslator;
use crate::retry::{wait_for, Backoff};
use crate::tx::{TransactionBackend, TransactionManager, Transactional, TxState};
use crate::types::{DbError, ErrorKind, Result};

pub mod engine;
mod matcher;

use engine::{codes, Engine, EngineError, Stored, Undo};

/// Store shared by every adapter connected to it.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    engine: Arc<Mutex<Engine>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adapter over this store.
    pub fn connect(&self, options: AdapterOptions) -> Result<MemoryAdapter> {
        MemoryAdapter::open(self.clone(), options)
    }
}

/// Adapter over one session of a [`MemoryStore`].
pub struct MemoryAdapter {
    store: MemoryStore,
    options: AdapterOptions,
    tx: TransactionManager,
    journal: Option<Vec<Undo>>,
    timeout_ms: u64,
}

impl std::fmt::Debug for MemoryAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAdapter")
            .field("namespace", &self.options.namespace)
            .field("depth", &self.tx.depth())
            .field("journaled", &self.journal.as_ref().map(Vec::len))
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl MemoryAdapter {
    /// Adapter over a private, empty store.
    pub fn new(options: AdapterOptions) -> Result<Self> {
        Self::open(MemoryStore::new(), options)
    }

    /// Adapter over `store`.
    pub fn open(store: MemoryStore, options: AdapterOptions) -> Result<Self> {
        options
            .validate()
            .map_err(|err| DbError::invalid_query(err.to_string()))?;
        let metadata = format!("{}_{}", options.namespace, METADATA_COLLECTION);
        store.engine.lock().ensure_namespace(&metadata);
        info!(
            namespace = %options.namespace,
            shared_tables = options.shared_tables,
            sessions = options.transactions,
            "memory adapter opened"
        );
        Ok(Self {
            store,
            timeout_ms: options.timeout_ms,
            options,
            tx: TransactionManager::new(),
            journal: None,
        })
    }

    /// Store this adapter is connected to.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    fn table(&self, collection: &str) -> String {
        format!("{}_{}", self.options.namespace, collection)
    }

    fn deadline(&self) -> Option<Instant> {
        (self.timeout_ms > 0).then(|| Instant::now() + Duration::from_millis(self.timeout_ms))
    }

    fn record(&mut self, undo: Undo) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(undo);
        }
    }

    /// Runs one engine mutation and journals its undo entry.
    fn apply<T>(
        &mut self,
        op: impl FnOnce(&mut Engine) -> std::result::Result<(T, Undo), EngineError>,
    ) -> Result<T> {
        let (value, undo) = op(&mut self.store.engine.lock())?;
        self.record(undo);
        Ok(value)
    }

    fn scan(
        &self,
        table: &str,
        filter: Option<&Json>,
        sort: &[(String, i32)],
        skip: u64,
        limit: Option<u64>,
    ) -> Result<Vec<Stored>> {
        debug!(namespace = table, filter = ?filter, sort = ?sort, skip, limit, "find");
        let deadline = self.deadline();
        Ok(self
            .store
            .engine
            .lock()
            .find(table, filter, sort, skip, limit, deadline)?)
    }

    fn select(
        &self,
        collection: &Collection,
        filters: &[Query],
        restriction: &Restriction,
        order: &[OrderBy],
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<Document>> {
        let translator = FilterTranslator::new(collection, false);
        let mut parts = Vec::with_capacity(2);
        if let Some(filter) = translator.translate_all(filters)? {
            parts.push(filter);
        }
        if let Some(filter) = restriction.to_filter() {
            parts.push(filter);
        }
        let filter = combine("$and", parts);
        let sort = translator.sort(order)?;
        self.scan(
            &self.table(&collection.id),
            filter.as_ref(),
            &sort,
            offset.unwrap_or(0),
            limit,
        )?
        .iter()
        .map(|stored| hydrate(collection, stored))
        .collect()
    }

    fn load_metadata(&self, ctx: &AuthContext, id: &str) -> Result<(Collection, Document)> {
        validate_key(id)?;
        let meta = Collection::metadata();
        let filters = id_filters(&self.options, ctx, &meta, id)?;
        let order = [OrderBy::new(ATTR_TENANT, OrderDirection::Desc)];
        let document = self
            .select(&meta, &filters, &Restriction::Unrestricted, &order, Some(1), None)?
            .pop()
            .ok_or_else(|| DbError::not_found(format!("collection '{id}' not found")))?;
        Ok((collection_from_document(&document)?, document))
    }

    fn load_collection(&self, ctx: &AuthContext, id: &str) -> Result<Collection> {
        if id == METADATA_COLLECTION {
            return Ok(Collection::metadata());
        }
        self.load_metadata(ctx, id).map(|(collection, _)| collection)
    }

    fn find_visible(
        &self,
        ctx: &AuthContext,
        collection: &Collection,
        id: &str,
        kind: PermissionType,
    ) -> Result<Option<Document>> {
        let restriction = restrict(ctx, kind)?;
        let filters = id_filters(&self.options, ctx, collection, id)?;
        Ok(self
            .select(collection, &filters, &restriction, &[], Some(1), None)?
            .pop())
    }

    fn insert_document(
        &mut self,
        ctx: &AuthContext,
        collection: &Collection,
        mut document: Document,
    ) -> Result<Document> {
        prepare_new(&self.options, ctx, collection, &mut document)?;
        let table = self.table(&collection.id);
        let stored = to_stored(&document)?;
        let sequence = self.apply(|engine| engine.insert(&table, stored))?;
        document.sequence = Some(sequence.to_string());
        Ok(document)
    }

    fn rewrite(&mut self, collection: &Collection, stored: &Document, merged: &Document) -> Result<()> {
        let table = self.table(&collection.id);
        let id = sequence_of(stored)?;
        let replacement = to_stored(merged)?;
        self.apply(|engine| engine.replace(&table, id, replacement).map(|undo| ((), undo)))
    }

    fn remove(&mut self, collection: &Collection, stored: &Document) -> Result<()> {
        let table = self.table(&collection.id);
        let id = sequence_of(stored)?;
        self.apply(|engine| engine.remove(&table, id).map(|undo| ((), undo)))
    }

    /// Builds a unique index and waits for the build to be confirmed. An
    /// index another tenant already built is reused.
    fn build_index(&mut self, collection: &Collection, index: &Index) -> Result<()> {
        let table = self.table(&collection.id);
        if self.store.engine.lock().has_index(&table, &index.id) {
            debug!(namespace = %table, index = %index.id, "unique index already present");
            return Ok(());
        }
        let mut fields = Vec::with_capacity(index.attributes.len() + 1);
        if self.options.shared_tables {
            fields.push(COL_TENANT.to_string());
        }
        for attribute in &index.attributes {
            fields.push(internal_attribute(attribute)?.into_owned());
        }
        self.apply(|engine| engine.start_index_build(&table, &index.id, fields).map(|undo| ((), undo)))?;

        let backoff = Backoff::new(
            Duration::from_millis(self.options.index_build_backoff_ms),
            self.options.index_build_retries,
        );
        let engine = &self.store.engine;
        let outcome = wait_for(&format!("index '{}'", index.id), backoff, || {
            Ok(engine.lock().poll_index(&table, &index.id)?)
        });
        if let Err(err) = outcome {
            let failure = engine.lock().discard_index(&table, &index.id);
            return Err(failure.map(DbError::from).unwrap_or(err));
        }
        info!(namespace = %table, index = %index.id, "unique index ready");
        Ok(())
    }

    fn create_indexes(&mut self, collection: &Collection, index: &Index) -> Result<()> {
        match index.kind {
            IndexKind::Unique => self.build_index(collection, index),
            IndexKind::Key => {
                debug!(collection = %collection.id, index = %index.id, "key index recorded");
                Ok(())
            }
            IndexKind::Fulltext => {
                warn!(
                    collection = %collection.id,
                    index = %index.id,
                    "no native text search in memory store; search degrades to regex"
                );
                Ok(())
            }
        }
    }
}

/// Session operations on behalf of the transaction manager.
struct Session<'a> {
    engine: &'a Mutex<Engine>,
    journal: &'a mut Option<Vec<Undo>>,
    enabled: bool,
}

impl Session<'_> {
    fn close(&mut self) -> Result<Vec<Undo>> {
        self.journal.take().ok_or_else(|| {
            DbError::from(EngineError::new(
                codes::NO_SUCH_TRANSACTION,
                "Transaction has been aborted or committed",
            ))
        })
    }
}

impl TransactionBackend for Session<'_> {
    fn begin(&mut self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if let Some(stale) = self.journal.replace(Vec::new()) {
            warn!(entries = stale.len(), "stale session journal discarded");
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let entries = self.close()?;
        debug!(entries = entries.len(), "session committed");
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.enabled {
            warn!("sessions disabled; writes of the aborted transaction remain");
            return Ok(());
        }
        let entries = self.close()?;
        debug!(entries = entries.len(), "undoing session writes");
        let mut engine = self.engine.lock();
        for undo in entries.into_iter().rev() {
            engine.undo(undo);
        }
        Ok(())
    }
}

impl Transactional for MemoryAdapter {
    fn start_transaction(&mut self) -> Result<bool> {
        self.tx.start(&mut Session {
            engine: &self.store.engine,
            journal: &mut self.journal,
            enabled: self.options.transactions,
        })
    }

    fn commit_transaction(&mut self) -> Result<bool> {
        self.tx.commit(&mut Session {
            engine: &self.store.engine,
            journal: &mut self.journal,
            enabled: self.options.transactions,
        })
    }

    fn rollback_transaction(&mut self) -> Result<bool> {
        self.tx.rollback(&mut Session {
            engine: &self.store.engine,
            journal: &mut self.journal,
            enabled: self.options.transactions,
        })
    }

    fn transaction_state(&self) -> TxState {
        self.tx.state()
    }
}

impl Adapter for MemoryAdapter {
    fn options(&self) -> &AdapterOptions {
        &self.options
    }

    fn set_timeout(&mut self, timeout_ms: u64) {
        self.timeout_ms = timeout_ms;
    }

    fn timeout(&self) -> u64 {
        self.timeout_ms
    }

    fn create_collection(&mut self, ctx: &AuthContext, collection: &Collection) -> Result<()> {
        collection.validate()?;
        if collection.id.starts_with('_') {
            return Err(DbError::invalid_query(format!(
                "collection id '{}' is reserved",
                collection.id
            )));
        }
        let meta = Collection::metadata();
        self.with_transaction(|adapter| {
            let table = adapter.table(&collection.id);
            let created = adapter.store.engine.lock().ensure_namespace(&table);
            if let Some(undo) = created {
                adapter.record(undo);
            }
            adapter
                .insert_document(ctx, &meta, collection_document(collection)?)
                .map_err(|err| match err.kind() {
                    ErrorKind::Duplicate => DbError::duplicate(format!(
                        "collection '{}' already exists",
                        collection.id
                    ))
                    .with_native_code(err.native_code().unwrap_or_default()),
                    _ => err,
                })?;
            for index in &collection.indexes {
                adapter.create_indexes(collection, index)?;
            }
            Ok(())
        })?;
        info!(collection = %collection.id, tenant = ?ctx.tenant(), "collection created");
        Ok(())
    }

    fn delete_collection(&mut self, ctx: &AuthContext, id: &str) -> Result<()> {
        let (collection, meta_doc) = self.load_metadata(ctx, id)?;
        check_deletable(&self.options, &meta_doc)?;
        let tenant = self.options.tenant_scope().require(ctx)?;
        let table = self.table(id);
        self.with_transaction(|adapter| {
            if adapter.options.shared_tables {
                let owned = adapter.scan(&table, Some(&json!({ COL_TENANT: { "$eq": tenant } })), &[], 0, None)?;
                for row in owned {
                    let id = row
                        .get(COL_SEQUENCE)
                        .and_then(Json::as_i64)
                        .ok_or_else(|| DbError::backend("stored document lacks _id"))?;
                    adapter.apply(|engine| engine.remove(&table, id).map(|undo| ((), undo)))?;
                }
            } else {
                adapter.apply(|engine| engine.drop_namespace(&table).map(|undo| ((), undo)))?;
            }
            adapter.remove(&Collection::metadata(), &meta_doc)
        })?;
        info!(collection = %collection.id, tenant = ?tenant, "collection deleted");
        Ok(())
    }

    fn create_index(&mut self, ctx: &AuthContext, collection: &str, index: &Index) -> Result<()> {
        let (mut definition, meta_doc) = self.load_metadata(ctx, collection)?;
        check_new_index(&definition, index)?;
        definition.indexes.push(index.clone());
        let meta = Collection::metadata();
        self.with_transaction(|adapter| {
            adapter.create_indexes(&definition, index)?;
            let mut updated = meta_doc.clone();
            updated.set("indexes", serde_json::to_string(&definition.indexes)?);
            adapter.rewrite(&meta, &meta_doc, &updated)
        })?;
        info!(collection, index = %index.id, kind = ?index.kind, "index created");
        Ok(())
    }

    fn get_document(
        &self,
        ctx: &AuthContext,
        collection: &str,
        id: &str,
        queries: &[Query],
    ) -> Result<Option<Document>> {
        let collection = self.load_collection(ctx, collection)?;
        let mut document = self.find_visible(ctx, &collection, id, PermissionType::Read)?;
        if let (Some(doc), Some(selections)) = (document.as_mut(), Query::selections(queries)) {
            doc.project(&selections);
        }
        Ok(document)
    }

    fn find(&self, ctx: &AuthContext, collection: &str, request: &FindRequest) -> Result<Vec<Document>> {
        let collection = self.load_collection(ctx, collection)?;
        let plan = plan_find(&self.options, ctx, &collection, request)?;
        let documents = self.select(
            &collection,
            &plan.filters,
            &plan.restriction,
            &plan.page.order,
            request.limit,
            request.offset,
        )?;
        let mut documents = plan.page.finish(documents);
        if let Some(selections) = &plan.selections {
            for document in &mut documents {
                document.project(selections);
            }
        }
        Ok(documents)
    }

    fn count(
        &self,
        ctx: &AuthContext,
        collection: &str,
        queries: &[Query],
        max: Option<u64>,
    ) -> Result<u64> {
        let collection = self.load_collection(ctx, collection)?;
        let filters = scoped_filters(&self.options, ctx, &collection, queries)?;
        let restriction = restrict(ctx, PermissionType::Read)?;
        let matched = self.select(&collection, &filters, &restriction, &[], max, None)?;
        Ok(matched.len() as u64)
    }

    fn sum(
        &self,
        ctx: &AuthContext,
        collection: &str,
        attribute: &str,
        queries: &[Query],
        max: Option<u64>,
    ) -> Result<f64> {
        let collection = self.load_collection(ctx, collection)?;
        check_summable(&collection, attribute)?;
        let filters = scoped_filters(&self.options, ctx, &collection, queries)?;
        let restriction = restrict(ctx, PermissionType::Read)?;
        let matched = self.select(&collection, &filters, &restriction, &[], max, None)?;
        Ok(matched
            .iter()
            .filter_map(|document| {
                if attribute == ATTR_SEQUENCE {
                    document.sequence.as_deref().and_then(|s| s.parse::<f64>().ok())
                } else {
                    document.get(attribute).and_then(Value::as_f64)
                }
            })
            .sum())
    }

    fn create_documents(
        &mut self,
        ctx: &AuthContext,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<Vec<Document>> {
        let collection = self.load_collection(ctx, collection)?;
        self.with_transaction(|adapter| {
            documents
                .into_iter()
                .map(|document| adapter.insert_document(ctx, &collection, document))
                .collect()
        })
    }

    fn update_document(
        &mut self,
        ctx: &AuthContext,
        collection: &str,
        id: &str,
        document: Document,
    ) -> Result<Document> {
        let collection = self.load_collection(ctx, collection)?;
        check_attributes(&collection, &document)?;
        let stored = self
            .find_visible(ctx, &collection, id, PermissionType::Update)?
            .ok_or_else(|| DbError::not_found(format!("document '{id}' not found")))?;
        let merged = merge_update(&stored, document)?;
        self.with_transaction(|adapter| adapter.rewrite(&collection, &stored, &merged))?;
        Ok(merged)
    }

    fn update_documents(
        &mut self,
        ctx: &AuthContext,
        collection: &str,
        patch: &Document,
        queries: &[Query],
    ) -> Result<u64> {
        let collection = self.load_collection(ctx, collection)?;
        check_attributes(&collection, patch)?;
        let filters = scoped_filters(&self.options, ctx, &collection, queries)?;
        let restriction = restrict(ctx, PermissionType::Update)?;
        let matched = self.select(&collection, &filters, &restriction, &[], None, None)?;
        let mut patch = patch.clone();
        patch.id = String::new();
        self.with_transaction(|adapter| {
            for stored in &matched {
                let merged = merge_update(stored, patch.clone())?;
                adapter.rewrite(&collection, stored, &merged)?;
            }
            Ok(matched.len() as u64)
        })
    }

    fn upsert_documents(
        &mut self,
        ctx: &AuthContext,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<Vec<Document>> {
        let collection = self.load_collection(ctx, collection)?;
        let restriction = restrict(ctx, PermissionType::Update)?;
        self.with_transaction(|adapter| {
            let mut out = Vec::with_capacity(documents.len());
            for mut document in documents {
                adapter.options.tenant_scope().stamp(ctx, &mut document)?;
                let lookup = ctx.clone().with_tenant(document.tenant.or(ctx.tenant()));
                let filters = id_filters(&adapter.options, &lookup, &collection, &document.id)?;
                let existing = adapter
                    .select(&collection, &filters, &Restriction::Unrestricted, &[], Some(1), None)?
                    .pop();
                match existing {
                    Some(stored) => {
                        if !restriction.allows(&stored.permissions) {
                            return Err(DbError::not_found(format!(
                                "document '{}' not found",
                                stored.id
                            )));
                        }
                        check_attributes(&collection, &document)?;
                        document.sequence = None;
                        let merged = merge_update(&stored, document)?;
                        adapter.rewrite(&collection, &stored, &merged)?;
                        out.push(merged);
                    }
                    None => out.push(adapter.insert_document(ctx, &collection, document)?),
                }
            }
            Ok(out)
        })
    }

    fn delete_document(&mut self, ctx: &AuthContext, collection: &str, id: &str) -> Result<bool> {
        let collection = self.load_collection(ctx, collection)?;
        let Some(stored) = self.find_visible(ctx, &collection, id, PermissionType::Delete)? else {
            return Ok(false);
        };
        self.with_transaction(|adapter| adapter.remove(&collection, &stored))?;
        Ok(true)
    }

    fn delete_documents(
        &mut self,
        ctx: &AuthContext,
        collection: &str,
        queries: &[Query],
    ) -> Result<u64> {
        let collection = self.load_collection(ctx, collection)?;
        let filters = scoped_filters(&self.options, ctx, &collection, queries)?;
        let restriction = restrict(ctx, PermissionType::Delete)?;
        let matched = self.select(&collection, &filters, &restriction, &[], None, None)?;
        self.with_transaction(|adapter| {
            for stored in &matched {
                adapter.remove(&collection, stored)?;
            }
            Ok(matched.len() as u64)
        })
    }

    fn get_sequences(
        &self,
        ctx: &AuthContext,
        collection: &str,
        mut documents: Vec<Document>,
    ) -> Result<Vec<Document>> {
        let missing: Vec<&Document> = documents.iter().filter(|d| d.sequence.is_none()).collect();
        if missing.is_empty() {
            return Ok(documents);
        }
        let definition = self.load_collection(ctx, collection)?;
        let ids: Vec<Value> = missing.iter().map(|d| Value::String(d.id.clone())).collect();
        let tenants: Vec<Option<i64>> = missing.iter().map(|d| d.tenant).collect();
        let mut filters = vec![Query::new(Method::Equal, ATTR_ID, ids)];
        if let Some(tenant_filter) = self.tenant_filters(ctx, collection, &tenants)? {
            filters.push(tenant_filter);
        }
        let found = self.select(&definition, &filters, &Restriction::Unrestricted, &[], None, None)?;
        let shared = self.options.shared_tables;
        let key = |id: &str, tenant: Option<i64>| (id.to_string(), if shared { tenant } else { None });
        let sequences: HashMap<(String, Option<i64>), String> = found
            .into_iter()
            .filter_map(|d| d.sequence.clone().map(|s| (key(&d.id, d.tenant), s)))
            .collect();
        for document in documents.iter_mut().filter(|d| d.sequence.is_none()) {
            let tenant = document.tenant.or(ctx.tenant());
            document.sequence = sequences.get(&key(&document.id, tenant)).cloned();
        }
        Ok(documents)
    }
}

/// Maps an engine failure onto the error taxonomy. This is the only place
/// engine codes are inspected.
pub fn translate_backend_error(err: EngineError) -> DbError {
    let kind = match err.code {
        codes::DUPLICATE_KEY | codes::NAMESPACE_EXISTS | codes::INDEX_ALREADY_EXISTS => {
            ErrorKind::Duplicate
        }
        codes::MAX_TIME_MS_EXPIRED => ErrorKind::Timeout,
        codes::NO_SUCH_TRANSACTION => ErrorKind::Transaction,
        codes::NAMESPACE_NOT_FOUND | codes::INDEX_NOT_FOUND => ErrorKind::NotFound,
        codes::BAD_VALUE => ErrorKind::InvalidQuery,
        _ => ErrorKind::Backend,
    };
    if kind == ErrorKind::Timeout {
        warn!(code = err.code, "operation aborted by deadline");
    } else {
        debug!(%kind, code = err.code, "translated engine error");
    }
    DbError::new(kind, err.message).with_native_code(err.code)
}

impl From<EngineError> for DbError {
    fn from(err: EngineError) -> Self {
        translate_backend_error(err)
    }
}

fn sequence_of(document: &Document) -> Result<i64> {
    document
        .sequence
        .as_deref()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| DbError::backend(format!("document '{}' has no sequence", document.id)))
}

fn to_stored(document: &Document) -> Result<Stored> {
    let mut stored = Stored::new();
    if let Some(sequence) = &document.sequence {
        let id = sequence.parse::<i64>().map_err(|_| {
            DbError::invalid_query(format!("{ATTR_SEQUENCE} '{sequence}' is not an integer"))
        })?;
        stored.insert(COL_SEQUENCE.into(), Json::from(id));
    }
    stored.insert(COL_UID.into(), Json::from(document.id.clone()));
    stored.insert(COL_TENANT.into(), document.tenant.map(Json::from).unwrap_or_default());
    stored.insert(COL_CREATED_AT.into(), document.created_at.clone().map(Json::from).unwrap_or_default());
    stored.insert(COL_UPDATED_AT.into(), document.updated_at.clone().map(Json::from).unwrap_or_default());
    stored.insert(
        COL_PERMISSIONS.into(),
        Json::Array(
            document
                .permissions
                .iter()
                .map(|p| Json::String(p.to_string()))
                .collect(),
        ),
    );
    for (key, value) in &document.attributes {
        if !value.is_null() {
            stored.insert(key.clone(), value.to_json());
        }
    }
    Ok(stored)
}

fn hydrate(collection: &Collection, stored: &Stored) -> Result<Document> {
    let mut document = Document {
        collection: Some(collection.id.clone()),
        ..Document::default()
    };
    let text = |value: &Json| value.as_str().map(str::to_string);
    for (key, value) in stored {
        match key.as_str() {
            COL_SEQUENCE => document.sequence = value.as_i64().map(|id| id.to_string()),
            COL_UID => document.id = text(value).unwrap_or_default(),
            COL_TENANT => document.tenant = value.as_i64(),
            COL_CREATED_AT => document.created_at = text(value),
            COL_UPDATED_AT => document.updated_at = text(value),
            COL_PERMISSIONS => {
                document.permissions = value
                    .as_array()
                    .map(Vec::as_slice)
                    .unwrap_or_default()
                    .iter()
                    .map(|p| {
                        p.as_str()
                            .ok_or_else(|| DbError::backend("corrupt permission entry"))
                            .and_then(Permission::parse)
                    })
                    .collect::<Result<Vec<_>>>()?;
            }
            internal if internal.starts_with('_') => {}
            attribute => {
                if !value.is_null() {
                    document.attributes.insert(attribute.to_string(), Value::from_json(value));
                }
            }
        }
    }
    Ok(document)
}
