#![allow(missing_docs)]

mod common;

use common::scenarios;
use docbase::{AdapterOptions, Result, SqliteAdapter};
use tempfile::TempDir;

fn open() -> SqliteAdapter {
    common::init_tracing();
    SqliteAdapter::open_in_memory(AdapterOptions::default()).expect("open in-memory sqlite")
}

#[test]
fn movies_filters_and_aggregates() -> Result<()> {
    scenarios::filters_and_aggregates(&mut open())
}

#[test]
fn patterns_ignore_case_and_negations_keep_nulls() -> Result<()> {
    scenarios::patterns_ignore_case_and_negations_keep_nulls(&mut open())
}

#[test]
fn document_round_trip() -> Result<()> {
    scenarios::document_round_trip(&mut open())
}

#[test]
fn permissions_filter_reads() -> Result<()> {
    scenarios::permissions_filter_reads(&mut open())
}

#[test]
fn updates_upserts_and_deletes() -> Result<()> {
    scenarios::updates_upserts_and_deletes(&mut open())
}

#[test]
fn duplicates_are_rejected() -> Result<()> {
    scenarios::duplicates_are_rejected(&mut open())
}

#[test]
fn documents_survive_reopen() -> Result<()> {
    common::init_tracing();
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("movies.db");
    {
        let mut adapter = SqliteAdapter::open(&path, AdapterOptions::default())?;
        common::seed_movies(&mut adapter)?;
    }
    let adapter = SqliteAdapter::open(&path, AdapterOptions::default())?;
    let ctx = common::reader();
    assert_eq!(docbase::Adapter::count(&adapter, &ctx, "movies", &[], None)?, 5);
    Ok(())
}

#[test]
fn namespaces_do_not_share_collections() -> Result<()> {
    common::init_tracing();
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("namespaces.db");
    let mut first = SqliteAdapter::open(&path, AdapterOptions::default())?;
    common::seed_movies(&mut first)?;
    let other = AdapterOptions {
        namespace: "other".to_string(),
        ..AdapterOptions::default()
    };
    let second = SqliteAdapter::open(&path, other)?;
    let err = docbase::Adapter::count(&second, &common::reader(), "movies", &[], None).unwrap_err();
    assert_eq!(err.kind(), docbase::ErrorKind::NotFound);
    Ok(())
}
