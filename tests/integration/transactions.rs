#![allow(missing_docs)]

mod common;

use docbase::model::{Attribute, AttributeKind};
use docbase::{
    Adapter, AdapterOptions, AuthContext, Collection, DbError, Document, ErrorKind, MemoryAdapter,
    Permission, Result, SqliteAdapter, Transactional, TxState,
};

fn notes() -> Collection {
    Collection::new("notes").with_attribute(Attribute::new("body", AttributeKind::String))
}

fn note(id: &str) -> Document {
    Document::new(id)
        .with("body", id)
        .with_permission(Permission::read("any").unwrap())
}

fn ctx() -> AuthContext {
    AuthContext::new(["any"])
}

fn prepared<A: Adapter>(mut adapter: A) -> Result<A> {
    common::init_tracing();
    adapter.create_collection(&ctx(), &notes())?;
    Ok(adapter)
}

fn present<A: Adapter>(adapter: &A, id: &str) -> Result<bool> {
    Ok(adapter.get_document(&ctx(), "notes", id, &[])?.is_some())
}

#[test]
fn sqlite_nested_rollback_keeps_outer_work() -> Result<()> {
    let mut adapter = prepared(SqliteAdapter::open_in_memory(AdapterOptions::default())?)?;

    assert!(adapter.start_transaction()?);
    adapter.create_document(&ctx(), "notes", note("outer"))?;
    assert!(adapter.start_transaction()?);
    assert_eq!(adapter.transaction_state(), TxState::Active { depth: 2 });
    adapter.create_document(&ctx(), "notes", note("inner"))?;
    assert!(adapter.rollback_transaction()?);
    assert_eq!(adapter.transaction_depth(), 1);
    assert!(adapter.commit_transaction()?);
    assert_eq!(adapter.transaction_state(), TxState::Idle);

    assert!(present(&adapter, "outer")?);
    assert!(!present(&adapter, "inner")?);
    Ok(())
}

#[test]
fn sqlite_outer_rollback_discards_everything() -> Result<()> {
    let mut adapter = prepared(SqliteAdapter::open_in_memory(AdapterOptions::default())?)?;

    adapter.start_transaction()?;
    adapter.create_document(&ctx(), "notes", note("outer"))?;
    adapter.start_transaction()?;
    adapter.create_document(&ctx(), "notes", note("inner"))?;
    assert!(adapter.commit_transaction()?);
    assert!(adapter.rollback_transaction()?);

    assert!(!present(&adapter, "outer")?);
    assert!(!present(&adapter, "inner")?);
    Ok(())
}

#[test]
fn idle_commit_and_rollback_report_false() -> Result<()> {
    let mut adapter = SqliteAdapter::open_in_memory(AdapterOptions::default())?;
    assert!(!adapter.commit_transaction()?);
    assert!(!adapter.rollback_transaction()?);
    assert_eq!(adapter.transaction_state(), TxState::Idle);
    Ok(())
}

#[test]
fn with_transaction_returns_the_body_error() -> Result<()> {
    let mut adapter = prepared(SqliteAdapter::open_in_memory(AdapterOptions::default())?)?;

    let err = adapter
        .with_transaction(|inner| -> Result<()> {
            inner.create_document(&ctx(), "notes", note("doomed"))?;
            Err(DbError::invalid_query("boom"))
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidQuery);
    assert_eq!(err.message(), "boom");
    assert_eq!(adapter.transaction_depth(), 0);
    assert!(!present(&adapter, "doomed")?);

    let id = adapter.with_transaction(|inner| {
        inner
            .create_document(&ctx(), "notes", note("kept"))
            .map(|doc| doc.id)
    })?;
    assert_eq!(id, "kept");
    assert!(present(&adapter, "kept")?);
    Ok(())
}

#[test]
fn memory_sessions_roll_back_every_level() -> Result<()> {
    let mut adapter = prepared(MemoryAdapter::new(AdapterOptions::default())?)?;

    adapter.start_transaction()?;
    adapter.create_document(&ctx(), "notes", note("outer"))?;
    adapter.start_transaction()?;
    adapter.create_document(&ctx(), "notes", note("inner"))?;
    assert!(adapter.rollback_transaction()?);
    assert_eq!(adapter.transaction_depth(), 1);
    assert!(present(&adapter, "inner")?);
    assert!(adapter.rollback_transaction()?);

    assert!(!present(&adapter, "outer")?);
    assert!(!present(&adapter, "inner")?);
    Ok(())
}

#[test]
fn memory_without_sessions_only_counts() -> Result<()> {
    let options = AdapterOptions {
        transactions: false,
        ..AdapterOptions::default()
    };
    let mut adapter = prepared(MemoryAdapter::new(options)?)?;

    assert!(adapter.start_transaction()?);
    adapter.create_document(&ctx(), "notes", note("written"))?;
    assert!(adapter.rollback_transaction()?);
    assert_eq!(adapter.transaction_state(), TxState::Idle);
    assert!(present(&adapter, "written")?);
    Ok(())
}
