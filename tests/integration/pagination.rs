#![allow(missing_docs)]

mod common;

use common::scenarios;
use docbase::{AdapterOptions, MemoryAdapter, Result, SqliteAdapter};

fn sqlite() -> SqliteAdapter {
    common::init_tracing();
    SqliteAdapter::open_in_memory(AdapterOptions::default()).expect("open in-memory sqlite")
}

fn memory() -> MemoryAdapter {
    common::init_tracing();
    MemoryAdapter::new(AdapterOptions::default()).expect("open memory adapter")
}

#[test]
fn sqlite_pages_cover_everything_once() -> Result<()> {
    scenarios::keyset_pages_cover_everything_once(&mut sqlite())
}

#[test]
fn memory_pages_cover_everything_once() -> Result<()> {
    scenarios::keyset_pages_cover_everything_once(&mut memory())
}

#[test]
fn sqlite_before_mirrors_after() -> Result<()> {
    scenarios::before_cursor_mirrors_after(&mut sqlite())
}

#[test]
fn memory_before_mirrors_after() -> Result<()> {
    scenarios::before_cursor_mirrors_after(&mut memory())
}
