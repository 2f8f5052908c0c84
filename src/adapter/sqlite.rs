//! SQLite adapter (SQL family).
//!
//! Each collection is a table `{namespace}_{collection}` with the reserved
//! columns (`_id` sequence, `_uid`, `_tenant`, timestamps, `_permissions`
//! JSON) plus one typed column per attribute. Permissions are mirrored into
//! `{namespace}_{collection}_perms` rows, which the read filter joins against.
//! Collection definitions live as documents in the `_metadata` collection.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{ffi, params_from_iter, Connection, ErrorCode, Row};
use tracing::{debug, info, warn};

use crate::adapter::{
    check_attributes, check_deletable, check_new_index, check_summable, collection_document,
    collection_from_document, id_filters, merge_update, plan_find, prepare_new, scoped_filters,
    Adapter, FindRequest,
};
use crate::auth::{diff, restrict, AuthContext, PermissionDelta, Restriction};
use crate::config::AdapterOptions;
use crate::model::collection::validate_key;
use crate::model::document::{ATTR_ID, ATTR_TENANT};
use crate::model::{
    Attribute, AttributeKind, Collection, Document, Index, IndexKind, OrderBy, OrderDirection,
    Permission, PermissionType, Query, Value, METADATA_COLLECTION,
};
use crate::query::attributes::{
    internal_attribute, COL_CREATED_AT, COL_PERMISSIONS, COL_SEQUENCE, COL_TENANT, COL_UID,
    COL_UPDATED_AT,
};
use crate::query::{Binds, SqlDialect, SqlSelect, SqlTranslator};
use crate::tx::{TransactionBackend, TransactionManager, Transactional, TxState};
use crate::types::{DbError, ErrorKind, Result};

const DIALECT: SqlDialect = SqlDialect::Sqlite;
const ALIAS: &str = "doc";
/// VM instructions between deadline checks.
const PROGRESS_STEPS: i32 = 1_000;

/// Adapter over one SQLite connection.
pub struct SqliteAdapter {
    conn: Connection,
    options: AdapterOptions,
    tx: TransactionManager,
    timeout_ms: u64,
}

impl std::fmt::Debug for SqliteAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteAdapter")
            .field("namespace", &self.options.namespace)
            .field("depth", &self.tx.depth())
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl SqliteAdapter {
    /// Opens (or creates) a database file.
    pub fn open(path: impl AsRef<Path>, options: AdapterOptions) -> Result<Self> {
        options
            .validate()
            .map_err(|err| DbError::invalid_query(err.to_string()))?;
        let conn = Connection::open(path.as_ref())?;
        Self::with_connection(conn, options)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory(options: AdapterOptions) -> Result<Self> {
        options
            .validate()
            .map_err(|err| DbError::invalid_query(err.to_string()))?;
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, options)
    }

    fn with_connection(conn: Connection, options: AdapterOptions) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        let adapter = Self {
            conn,
            timeout_ms: options.timeout_ms,
            options,
            tx: TransactionManager::new(),
        };
        adapter.create_tables(&Collection::metadata())?;
        info!(
            namespace = %adapter.options.namespace,
            shared_tables = adapter.options.shared_tables,
            "sqlite adapter opened"
        );
        Ok(adapter)
    }

    fn table(&self, collection: &str) -> String {
        format!("{}_{}", self.options.namespace, collection)
    }

    fn quoted_table(&self, collection: &str) -> String {
        DIALECT.quote(&self.table(collection))
    }

    fn quoted_perms(&self, collection: &str) -> String {
        DIALECT.quote(&format!("{}_perms", self.table(collection)))
    }

    fn create_tables(&self, collection: &Collection) -> Result<()> {
        let table = self.table(&collection.id);
        let mut columns = vec![
            format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", DIALECT.quote(COL_SEQUENCE)),
            format!("{} TEXT NOT NULL", DIALECT.quote(COL_UID)),
            format!("{} INTEGER DEFAULT NULL", DIALECT.quote(COL_TENANT)),
            format!("{} TEXT DEFAULT NULL", DIALECT.quote(COL_CREATED_AT)),
            format!("{} TEXT DEFAULT NULL", DIALECT.quote(COL_UPDATED_AT)),
            format!("{} TEXT NOT NULL DEFAULT '[]'", DIALECT.quote(COL_PERMISSIONS)),
        ];
        for attribute in &collection.attributes {
            columns.push(format!(
                "{} {}",
                DIALECT.quote(&attribute.key),
                column_type(attribute)
            ));
        }
        let perms = format!("{table}_perms");
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {t} ({cols});
             CREATE UNIQUE INDEX IF NOT EXISTS {uid_idx} ON {t} ({uid}, IFNULL({tenant}, -1));
             CREATE TABLE IF NOT EXISTS {p} (
                 {seq} INTEGER PRIMARY KEY AUTOINCREMENT,
                 {ptype} TEXT NOT NULL,
                 {perm} TEXT NOT NULL,
                 {pdoc} TEXT NOT NULL,
                 {tenant} INTEGER DEFAULT NULL
             );
             CREATE UNIQUE INDEX IF NOT EXISTS {perm_idx} ON {p} ({pdoc}, IFNULL({tenant}, -1), {ptype}, {perm});",
            t = DIALECT.quote(&table),
            cols = columns.join(", "),
            uid_idx = DIALECT.quote(&format!("{table}_uid")),
            uid = DIALECT.quote(COL_UID),
            tenant = DIALECT.quote(COL_TENANT),
            p = DIALECT.quote(&perms),
            seq = DIALECT.quote(COL_SEQUENCE),
            ptype = DIALECT.quote("_type"),
            perm = DIALECT.quote("_permission"),
            pdoc = DIALECT.quote("_document"),
            perm_idx = DIALECT.quote(&format!("{perms}_index")),
        );
        debug!(table = %table, "creating tables");
        self.conn.execute_batch(&ddl)?;
        Ok(())
    }

    fn index_sql(&self, collection: &Collection, index: &Index) -> Result<Option<String>> {
        let table = self.table(&collection.id);
        let mut columns = Vec::with_capacity(index.attributes.len() + 1);
        if index.kind == IndexKind::Unique && self.options.shared_tables {
            columns.push(format!("IFNULL({}, -1)", DIALECT.quote(COL_TENANT)));
        }
        for attribute in &index.attributes {
            columns.push(DIALECT.quote(&internal_attribute(attribute)?));
        }
        let name = DIALECT.quote(&format!("{table}_{}", index.id));
        Ok(match index.kind {
            IndexKind::Key => Some(format!(
                "CREATE INDEX {name} ON {} ({})",
                DIALECT.quote(&table),
                columns.join(", ")
            )),
            IndexKind::Unique => Some(format!(
                "CREATE UNIQUE INDEX {name} ON {} ({})",
                DIALECT.quote(&table),
                columns.join(", ")
            )),
            IndexKind::Fulltext => None,
        })
    }

    /// Collection definition plus the metadata document it came from. A
    /// tenant's own definition wins over a tenant-less one.
    fn load_metadata(&self, ctx: &AuthContext, id: &str) -> Result<(Collection, Document)> {
        validate_key(id)?;
        let meta = Collection::metadata();
        let filters = id_filters(&self.options, ctx, &meta, id)?;
        let order = [OrderBy::new(ATTR_TENANT, OrderDirection::Desc)];
        let document = self
            .select_documents(&meta, &filters, &Restriction::Unrestricted, &order, Some(1), None)?
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

    #[allow(clippy::too_many_arguments)]
    fn build_select(
        &self,
        collection: &Collection,
        columns: Vec<String>,
        filters: &[Query],
        restriction: &Restriction,
        order: &[OrderBy],
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<(String, Binds)> {
        let alias = DIALECT.quote(ALIAS);
        let translator = SqlTranslator::new(DIALECT, collection, ALIAS);
        let mut binds = Binds::new(DIALECT);
        let mut select = SqlSelect {
            table: self.quoted_table(&collection.id),
            alias: alias.clone(),
            columns,
            ..SqlSelect::default()
        };
        if let Some(condition) = translator.translate_all(filters, &mut binds)? {
            select.conditions.push(condition);
        }
        if let Some(condition) = restriction.to_sql(
            DIALECT,
            &self.quoted_perms(&collection.id),
            &alias,
            self.options.shared_tables,
            &mut binds,
        ) {
            select.conditions.push(condition);
        }
        if !order.is_empty() {
            select.order = Some(translator.order_clause(order)?);
        }
        match (limit, offset) {
            (Some(limit), _) => select.limit = Some(binds.push(Value::Int(to_i64(limit)))),
            (None, Some(_)) => select.limit = Some("-1".to_string()),
            (None, None) => {}
        }
        if let Some(offset) = offset {
            select.offset = Some(binds.push(Value::Int(to_i64(offset))));
        }
        Ok((select.render(), binds))
    }

    fn select_documents(
        &self,
        collection: &Collection,
        filters: &[Query],
        restriction: &Restriction,
        order: &[OrderBy],
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<Document>> {
        let columns = vec![format!("{}.*", DIALECT.quote(ALIAS))];
        let (sql, binds) =
            self.build_select(collection, columns, filters, restriction, order, limit, offset)?;
        self.query_documents(collection, &sql, binds.values())
    }

    fn query_documents(&self, collection: &Collection, sql: &str, values: &[Value]) -> Result<Vec<Document>> {
        debug!(collection = %collection.id, sql, binds = values.len(), "select");
        let _deadline = Deadline::arm(&self.conn, self.timeout_ms);
        let mut stmt = self.conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
        let mut rows = stmt.query(params_from_iter(values.iter().map(Bind)))?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            documents.push(hydrate(collection, &names, row)?);
        }
        Ok(documents)
    }

    fn execute(&self, sql: &str, values: &[Value]) -> Result<usize> {
        debug!(sql, binds = values.len(), "execute");
        let _deadline = Deadline::arm(&self.conn, self.timeout_ms);
        Ok(self.conn.execute(sql, params_from_iter(values.iter().map(Bind)))?)
    }

    fn scalar_f64(&self, sql: &str, values: &[Value]) -> Result<f64> {
        debug!(sql, binds = values.len(), "scalar");
        let _deadline = Deadline::arm(&self.conn, self.timeout_ms);
        Ok(self
            .conn
            .query_row(sql, params_from_iter(values.iter().map(Bind)), |row| {
                row.get::<_, f64>(0)
            })?)
    }

    fn insert_row(&self, collection: &Collection, document: &Document) -> Result<i64> {
        let mut columns: Vec<&str> = vec![COL_UID, COL_TENANT, COL_CREATED_AT, COL_UPDATED_AT, COL_PERMISSIONS];
        let mut values = vec![
            Value::String(document.id.clone()),
            Value::from(document.tenant),
            Value::from(document.created_at.clone()),
            Value::from(document.updated_at.clone()),
            Value::String(permissions_json(&document.permissions)?),
        ];
        if let Some(sequence) = &document.sequence {
            columns.push(COL_SEQUENCE);
            values.push(Value::from(sequence.as_str()).as_i64().map(Value::Int).unwrap_or(Value::Null));
        }
        for (key, value) in &document.attributes {
            columns.push(key);
            values.push(value.clone());
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quoted_table(&collection.id),
            columns.iter().map(|c| DIALECT.quote(c)).collect::<Vec<_>>().join(", "),
            (1..=values.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ")
        );
        self.execute(&sql, &values)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn rewrite_row(&self, collection: &Collection, stored: &Document, merged: &Document) -> Result<()> {
        let mut assignments = vec![
            format!("{} = ?1", DIALECT.quote(COL_UID)),
            format!("{} = ?2", DIALECT.quote(COL_UPDATED_AT)),
            format!("{} = ?3", DIALECT.quote(COL_PERMISSIONS)),
        ];
        let mut values = vec![
            Value::String(merged.id.clone()),
            Value::from(merged.updated_at.clone()),
            Value::String(permissions_json(&merged.permissions)?),
        ];
        for attribute in &collection.attributes {
            values.push(merged.get(&attribute.key).cloned().unwrap_or(Value::Null));
            assignments.push(format!("{} = ?{}", DIALECT.quote(&attribute.key), values.len()));
        }
        values.push(sequence_value(stored)?);
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            self.quoted_table(&collection.id),
            assignments.join(", "),
            DIALECT.quote(COL_SEQUENCE),
            values.len()
        );
        self.execute(&sql, &values)?;

        if merged.id != stored.id {
            let sql = format!(
                "UPDATE {} SET {doc} = ?1 WHERE {doc} = ?2 AND {} IS ?3",
                self.quoted_perms(&collection.id),
                DIALECT.quote(COL_TENANT),
                doc = DIALECT.quote("_document"),
            );
            self.execute(
                &sql,
                &[
                    Value::String(merged.id.clone()),
                    Value::String(stored.id.clone()),
                    Value::from(stored.tenant),
                ],
            )?;
        }
        let delta = diff(&stored.permissions, &merged.permissions);
        self.write_permissions(collection, &merged.id, merged.tenant, &delta)
    }

    fn delete_row(&self, collection: &Collection, stored: &Document) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            self.quoted_table(&collection.id),
            DIALECT.quote(COL_SEQUENCE)
        );
        self.execute(&sql, &[sequence_value(stored)?])?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1 AND {} IS ?2",
            self.quoted_perms(&collection.id),
            DIALECT.quote("_document"),
            DIALECT.quote(COL_TENANT)
        );
        self.execute(&sql, &[Value::String(stored.id.clone()), Value::from(stored.tenant)])?;
        Ok(())
    }

    fn write_permissions(
        &self,
        collection: &Collection,
        uid: &str,
        tenant: Option<i64>,
        delta: &PermissionDelta,
    ) -> Result<()> {
        if delta.is_empty() {
            return Ok(());
        }
        let perms = self.quoted_perms(&collection.id);
        let (ptype, perm, pdoc, ptenant) = (
            DIALECT.quote("_type"),
            DIALECT.quote("_permission"),
            DIALECT.quote("_document"),
            DIALECT.quote(COL_TENANT),
        );
        let remove = format!(
            "DELETE FROM {perms} WHERE {pdoc} = ?1 AND {ptenant} IS ?2 AND {ptype} = ?3 AND {perm} = ?4"
        );
        for (kind, role) in delta.removed_pairs() {
            self.execute(
                &remove,
                &[uid.into(), Value::from(tenant), kind.as_str().into(), role.into()],
            )?;
        }
        let add = format!(
            "INSERT INTO {perms} ({ptype}, {perm}, {pdoc}, {ptenant}) VALUES (?1, ?2, ?3, ?4)"
        );
        for (kind, role) in delta.added_pairs() {
            self.execute(
                &add,
                &[kind.as_str().into(), role.into(), uid.into(), Value::from(tenant)],
            )?;
        }
        debug!(
            collection = %collection.id,
            document = uid,
            added = delta.added_pairs().count(),
            removed = delta.removed_pairs().count(),
            "permissions written"
        );
        Ok(())
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
            .select_documents(collection, &filters, &restriction, &[], Some(1), None)?
            .pop())
    }

    fn insert_document(
        &self,
        ctx: &AuthContext,
        collection: &Collection,
        mut document: Document,
    ) -> Result<Document> {
        prepare_new(&self.options, ctx, collection, &mut document)?;
        let sequence = self.insert_row(collection, &document)?;
        self.write_permissions(
            collection,
            &document.id,
            document.tenant,
            &diff(&[], &document.permissions),
        )?;
        document.sequence = Some(sequence.to_string());
        Ok(document)
    }
}

impl Transactional for SqliteAdapter {
    fn start_transaction(&mut self) -> Result<bool> {
        self.tx.start(&mut Session(&self.conn))
    }

    fn commit_transaction(&mut self) -> Result<bool> {
        self.tx.commit(&mut Session(&self.conn))
    }

    fn rollback_transaction(&mut self) -> Result<bool> {
        self.tx.rollback(&mut Session(&self.conn))
    }

    fn transaction_state(&self) -> TxState {
        self.tx.state()
    }
}

impl Adapter for SqliteAdapter {
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
        if collection.attributes.is_empty() {
            return Err(DbError::invalid_query(format!(
                "collection '{}' declares no attributes; sqlite stores each attribute in its own column",
                collection.id
            )));
        }
        let meta = Collection::metadata();
        self.with_transaction(|adapter| {
            adapter.create_tables(collection)?;
            for index in &collection.indexes {
                if let Some(sql) = adapter.index_sql(collection, index)? {
                    adapter.conn.execute_batch(&sql.replace("INDEX ", "INDEX IF NOT EXISTS "))?;
                }
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
            Ok(())
        })?;
        info!(collection = %collection.id, tenant = ?ctx.tenant(), "collection created");
        Ok(())
    }

    fn delete_collection(&mut self, ctx: &AuthContext, id: &str) -> Result<()> {
        let (collection, meta_doc) = self.load_metadata(ctx, id)?;
        check_deletable(&self.options, &meta_doc)?;
        let tenant = self.options.tenant_scope().require(ctx)?;
        self.with_transaction(|adapter| {
            if adapter.options.shared_tables {
                for table in [adapter.quoted_table(id), adapter.quoted_perms(id)] {
                    adapter.execute(
                        &format!("DELETE FROM {table} WHERE {} IS ?1", DIALECT.quote(COL_TENANT)),
                        &[Value::from(tenant)],
                    )?;
                }
            } else {
                adapter.conn.execute_batch(&format!(
                    "DROP TABLE IF EXISTS {}; DROP TABLE IF EXISTS {};",
                    adapter.quoted_table(id),
                    adapter.quoted_perms(id)
                ))?;
            }
            adapter.delete_row(&Collection::metadata(), &meta_doc)
        })?;
        info!(collection = %collection.id, tenant = ?tenant, "collection deleted");
        Ok(())
    }

    fn create_index(&mut self, ctx: &AuthContext, collection: &str, index: &Index) -> Result<()> {
        let (mut definition, meta_doc) = self.load_metadata(ctx, collection)?;
        check_new_index(&definition, index)?;
        let sql = self.index_sql(&definition, index)?;
        if sql.is_none() {
            warn!(
                collection,
                index = %index.id,
                "fulltext indexes are not native to sqlite; search degrades to LIKE"
            );
        }
        definition.indexes.push(index.clone());
        let meta = Collection::metadata();
        self.with_transaction(|adapter| {
            if let Some(sql) = &sql {
                adapter.execute(sql, &[])?;
            }
            let mut updated = meta_doc.clone();
            updated.set("indexes", serde_json::to_string(&definition.indexes)?);
            adapter.rewrite_row(&meta, &meta_doc, &updated)
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
        let documents = self.select_documents(
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
        let (inner, binds) = self.build_select(
            &collection,
            vec!["1".to_string()],
            &filters,
            &restriction,
            &[],
            max,
            None,
        )?;
        let sql = format!("SELECT COUNT(1) FROM ({inner}) AS {}", DIALECT.quote("sub"));
        Ok(self.scalar_f64(&sql, binds.values())? as u64)
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
        let column = SqlTranslator::new(DIALECT, &collection, ALIAS).column(attribute)?;
        let (inner, binds) = self.build_select(
            &collection,
            vec![format!("{column} AS {}", DIALECT.quote("value"))],
            &filters,
            &restriction,
            &[],
            max,
            None,
        )?;
        let sql = format!(
            "SELECT TOTAL({}) FROM ({inner}) AS {}",
            DIALECT.quote("value"),
            DIALECT.quote("sub")
        );
        self.scalar_f64(&sql, binds.values())
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
        self.with_transaction(|adapter| adapter.rewrite_row(&collection, &stored, &merged))?;
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
        let matched = self.select_documents(&collection, &filters, &restriction, &[], None, None)?;
        let mut patch = patch.clone();
        patch.id = String::new();
        self.with_transaction(|adapter| {
            for stored in &matched {
                let merged = merge_update(stored, patch.clone())?;
                adapter.rewrite_row(&collection, stored, &merged)?;
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
                    .select_documents(&collection, &filters, &Restriction::Unrestricted, &[], Some(1), None)?
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
                        adapter.rewrite_row(&collection, &stored, &merged)?;
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
        self.with_transaction(|adapter| adapter.delete_row(&collection, &stored))?;
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
        let matched = self.select_documents(&collection, &filters, &restriction, &[], None, None)?;
        self.with_transaction(|adapter| {
            for stored in &matched {
                adapter.delete_row(&collection, stored)?;
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
        let mut filters = vec![Query::new(crate::model::Method::Equal, ATTR_ID, ids)];
        if let Some(tenant_filter) = self.tenant_filters(ctx, collection, &tenants)? {
            filters.push(tenant_filter);
        }
        let found = self.select_documents(
            &definition,
            &filters,
            &Restriction::Unrestricted,
            &[],
            None,
            None,
        )?;
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

/// Maps a rusqlite failure onto the error taxonomy. This is the only place
/// native SQLite codes are inspected.
pub fn translate_backend_error(err: rusqlite::Error) -> DbError {
    let mapped = match &err {
        rusqlite::Error::SqliteFailure(native, message) => {
            let text = message.clone().unwrap_or_else(|| native.to_string());
            let kind = match native.code {
                ErrorCode::ConstraintViolation
                    if matches!(
                        native.extended_code,
                        ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    ) =>
                {
                    ErrorKind::Duplicate
                }
                ErrorCode::OperationInterrupted => ErrorKind::Timeout,
                _ if text.contains("no such table") => ErrorKind::NotFound,
                _ if text.contains("already exists") => ErrorKind::Duplicate,
                _ if text.contains("no transaction is active") || text.contains("no such savepoint") => {
                    ErrorKind::Transaction
                }
                _ => ErrorKind::Backend,
            };
            DbError::new(kind, text).with_native_code(native.extended_code)
        }
        rusqlite::Error::QueryReturnedNoRows => DbError::not_found("query returned no rows"),
        other => DbError::backend(other.to_string()),
    };
    if mapped.kind() == ErrorKind::Timeout {
        warn!(error = %mapped, "statement aborted by deadline");
    } else {
        debug!(kind = %mapped.kind(), native = ?mapped.native_code(), "translated sqlite error");
    }
    mapped
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        translate_backend_error(err)
    }
}

/// Native transaction operations on the connection.
struct Session<'c>(&'c Connection);

impl TransactionBackend for Session<'_> {
    fn begin(&mut self) -> Result<()> {
        if !self.0.is_autocommit() {
            warn!("stale transaction found on connection; rolling it back");
            self.0.execute_batch("ROLLBACK")?;
        }
        self.0.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.0.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.0.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn supports_savepoints(&self) -> bool {
        true
    }

    fn savepoint(&mut self, name: &str) -> Result<()> {
        self.0.execute_batch(&format!("SAVEPOINT {}", DIALECT.quote(name)))?;
        Ok(())
    }

    fn rollback_to(&mut self, name: &str) -> Result<()> {
        self.0
            .execute_batch(&format!("ROLLBACK TO SAVEPOINT {}", DIALECT.quote(name)))?;
        Ok(())
    }
}

/// Arms the progress handler for the lifetime of one statement.
struct Deadline<'c> {
    conn: &'c Connection,
    armed: bool,
}

impl<'c> Deadline<'c> {
    fn arm(conn: &'c Connection, timeout_ms: u64) -> Self {
        if timeout_ms == 0 {
            return Self { conn, armed: false };
        }
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        conn.progress_handler(PROGRESS_STEPS, Some(move || Instant::now() >= deadline));
        Self { conn, armed: true }
    }
}

impl Drop for Deadline<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.conn.progress_handler(0, None::<fn() -> bool>);
        }
    }
}

/// Binds a [`Value`]; booleans as integers, lists and objects as JSON text.
struct Bind<'a>(&'a Value);

impl ToSql for Bind<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Value::Int(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Value::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            other => ToSqlOutput::Owned(SqlValue::Text(other.to_json().to_string())),
        })
    }
}

fn column_type(attribute: &Attribute) -> &'static str {
    if attribute.array {
        return "TEXT";
    }
    match attribute.kind {
        AttributeKind::String | AttributeKind::Datetime => "TEXT",
        AttributeKind::Integer | AttributeKind::Boolean => "INTEGER",
        AttributeKind::Float => "REAL",
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn sequence_value(document: &Document) -> Result<Value> {
    document
        .sequence
        .as_deref()
        .and_then(|s| s.parse::<i64>().ok())
        .map(Value::Int)
        .ok_or_else(|| DbError::backend(format!("document '{}' has no sequence", document.id)))
}

fn permissions_json(permissions: &[Permission]) -> Result<String> {
    Ok(serde_json::to_string(permissions)?)
}

fn hydrate(collection: &Collection, names: &[String], row: &Row<'_>) -> Result<Document> {
    let mut document = Document {
        collection: Some(collection.id.clone()),
        ..Document::default()
    };
    for (i, name) in names.iter().enumerate() {
        let raw = row.get_ref(i)?;
        match name.as_str() {
            COL_SEQUENCE => document.sequence = integer(raw).map(|s| s.to_string()),
            COL_UID => document.id = text(raw)?.unwrap_or_default(),
            COL_TENANT => document.tenant = integer(raw),
            COL_CREATED_AT => document.created_at = text(raw)?,
            COL_UPDATED_AT => document.updated_at = text(raw)?,
            COL_PERMISSIONS => {
                let json = text(raw)?.unwrap_or_else(|| "[]".to_string());
                let wire: Vec<String> = serde_json::from_str(&json)
                    .map_err(|err| DbError::backend(format!("corrupt permissions column: {err}")))?;
                document.permissions = wire
                    .iter()
                    .map(|p| Permission::parse(p))
                    .collect::<Result<Vec<_>>>()?;
            }
            other => {
                if let Some(attribute) = collection.attribute(other) {
                    let value = column_value(raw, attribute)?;
                    if !value.is_null() {
                        document.attributes.insert(other.to_string(), value);
                    }
                }
            }
        }
    }
    Ok(document)
}

fn integer(raw: ValueRef<'_>) -> Option<i64> {
    match raw {
        ValueRef::Integer(i) => Some(i),
        ValueRef::Real(f) => Some(f as i64),
        _ => None,
    }
}

fn text(raw: ValueRef<'_>) -> Result<Option<String>> {
    match raw {
        ValueRef::Null => Ok(None),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => std::str::from_utf8(bytes)
            .map(|s| Some(s.to_string()))
            .map_err(|err| DbError::backend(format!("invalid utf-8 in column: {err}"))),
        ValueRef::Integer(i) => Ok(Some(i.to_string())),
        ValueRef::Real(f) => Ok(Some(f.to_string())),
    }
}

fn column_value(raw: ValueRef<'_>, attribute: &Attribute) -> Result<Value> {
    if attribute.array {
        return match text(raw)? {
            None => Ok(Value::Null),
            Some(json) => {
                let parsed: serde_json::Value = serde_json::from_str(&json).map_err(|err| {
                    DbError::backend(format!("corrupt array column '{}': {err}", attribute.key))
                })?;
                Ok(Value::from_json(&parsed))
            }
        };
    }
    Ok(match raw {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => match attribute.kind {
            AttributeKind::Boolean => Value::Bool(i != 0),
            AttributeKind::Float => Value::Float(i as f64),
            _ => Value::Int(i),
        },
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(_) | ValueRef::Blob(_) => Value::from(text(raw)?),
    })
}
