#![allow(missing_docs)]

mod common;

use common::scenarios;
use docbase::{Adapter, AdapterOptions, MemoryAdapter, MemoryStore, Result};

fn open() -> MemoryAdapter {
    common::init_tracing();
    MemoryAdapter::new(AdapterOptions::default()).expect("open memory adapter")
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
fn connections_share_one_store() -> Result<()> {
    common::init_tracing();
    let store = MemoryStore::new();
    let mut writer = store.connect(AdapterOptions::default())?;
    common::seed_movies(&mut writer)?;
    let reader = store.connect(AdapterOptions::default())?;
    assert_eq!(reader.count(&common::reader(), "movies", &[], None)?, 5);
    Ok(())
}

#[test]
fn deadline_of_zero_is_disabled() -> Result<()> {
    let mut adapter = open();
    adapter.set_timeout(0);
    assert_eq!(adapter.timeout(), 0);
    common::seed_movies(&mut adapter)?;
    assert_eq!(adapter.count(&common::reader(), "movies", &[], None)?, 5);
    Ok(())
}
