#![allow(missing_docs)]

mod common;

use common::scenarios;
use docbase::{Adapter, AdapterOptions, AuthContext, MemoryStore, Query, Result, SqliteAdapter};
use tempfile::TempDir;

#[test]
fn sqlite_tenants_are_isolated() -> Result<()> {
    common::init_tracing();
    scenarios::tenants_are_isolated(SqliteAdapter::open_in_memory)
}

#[test]
fn memory_tenants_are_isolated() -> Result<()> {
    common::init_tracing();
    let store = MemoryStore::new();
    scenarios::tenants_are_isolated(|options| store.connect(options))
}

#[test]
fn sqlite_metadata_without_tenant_is_visible_to_all() -> Result<()> {
    common::init_tracing();
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("tenancy.db");
    scenarios::metadata_without_tenant_is_visible_to_all(|options| SqliteAdapter::open(&path, options))
}

#[test]
fn memory_metadata_without_tenant_is_visible_to_all() -> Result<()> {
    common::init_tracing();
    let store = MemoryStore::new();
    scenarios::metadata_without_tenant_is_visible_to_all(|options| store.connect(options))
}

#[test]
fn tenant_filters_cover_batches() -> Result<()> {
    common::init_tracing();
    let options = AdapterOptions {
        shared_tables: true,
        tenant_per_document: true,
        ..AdapterOptions::default()
    };
    let adapter = SqliteAdapter::open_in_memory(options)?;
    let ctx = AuthContext::new(["any"]).with_tenant(Some(1));

    assert_eq!(
        adapter.tenant_filters(&ctx, "notes", &[])?,
        Some(Query::equal("$tenant", vec![1i64]))
    );
    assert_eq!(
        adapter.tenant_filters(&ctx, "notes", &[Some(3), None, Some(2)])?,
        Some(Query::equal("$tenant", vec![1i64, 2, 3]))
    );
    assert_eq!(
        adapter.tenant_filters(&ctx, "_metadata", &[])?,
        Some(Query::or(vec![
            Query::equal("$tenant", vec![1i64]),
            Query::is_null("$tenant"),
        ]))
    );

    let plain = SqliteAdapter::open_in_memory(AdapterOptions::default())?;
    assert_eq!(plain.tenant_filters(&ctx, "notes", &[])?, None);
    Ok(())
}

#[test]
fn documents_may_carry_their_own_tenant() -> Result<()> {
    common::init_tracing();
    let options = AdapterOptions {
        shared_tables: true,
        tenant_per_document: true,
        ..AdapterOptions::default()
    };
    let store = MemoryStore::new();
    let mut adapter = store.connect(options)?;
    let one = AuthContext::new(["any"]).with_tenant(Some(1));
    let five = AuthContext::new(["any"]).with_tenant(Some(5));
    let notes = docbase::Collection::new("notes").with_attribute(docbase::model::Attribute::new(
        "body",
        docbase::model::AttributeKind::String,
    ));
    adapter.create_collection(&one, &notes)?;
    adapter.create_collection(&five, &notes)?;

    let note = docbase::Document::new("n1")
        .with("body", "filed for five")
        .with_tenant(Some(5))
        .with_permission(docbase::Permission::read("any")?);
    let created = adapter.create_document(&one, "notes", note)?;
    assert_eq!(created.tenant, Some(5));
    assert_eq!(adapter.count(&one, "notes", &[], None)?, 0);
    assert_eq!(adapter.count(&five, "notes", &[], None)?, 1);
    Ok(())
}
