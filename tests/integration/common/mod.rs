#![allow(dead_code)]

use std::sync::Once;

pub mod scenarios;

use docbase::model::{Attribute, AttributeKind, Index, IndexKind};
use docbase::{Adapter, AuthContext, Collection, Document, Permission, Result, Value};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("docbase=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

pub fn movies() -> Collection {
    Collection::new("movies")
        .with_attribute(Attribute::new("name", AttributeKind::String))
        .with_attribute(Attribute::new("director", AttributeKind::String))
        .with_attribute(Attribute::new("year", AttributeKind::Integer))
        .with_attribute(Attribute::new("price", AttributeKind::Float))
        .with_attribute(Attribute::new("active", AttributeKind::Boolean))
        .with_attribute(Attribute::array("genres", AttributeKind::String))
        .with_index(Index::new("name_unique", IndexKind::Unique, &["name"]))
        .with_index(Index::new("year_key", IndexKind::Key, &["year"]))
}

/// Caller that can read every fixture document.
pub fn reader() -> AuthContext {
    AuthContext::new(["any", "user:1"])
}

fn genres(items: &[&str]) -> Value {
    Value::Array(items.iter().map(|g| Value::from(*g)).collect())
}

fn movie(id: &str, name: &str, director: &str, year: i64, price: f64, tags: &[&str]) -> Document {
    Document::new(id)
        .with("name", name)
        .with("director", director)
        .with("year", year)
        .with("price", price)
        .with("active", true)
        .with("genres", genres(tags))
}

/// Five movies; four readable by `any`, one only by `user:1`. Years sum
/// to 10087 and 2019 appears twice.
pub fn movie_documents() -> Vec<Document> {
    let public = |doc: Document| {
        doc.with_permission(Permission::read("any").unwrap())
            .with_permission(Permission::update("any").unwrap())
            .with_permission(Permission::delete("any").unwrap())
    };
    vec![
        public(movie("frozen", "Frozen", "Chris Buck & Jennifer Lee", 2013, 39.5, &["animation", "kids"])),
        public(movie("frozen-ii", "Frozen II", "Chris Buck & Jennifer Lee", 2019, 39.25, &["animation", "kids"])),
        public(movie(
            "captain-marvel",
            "Captain Marvel",
            "Anna Boden & Ryan Fleck",
            2019,
            25.99,
            &["science fiction", "action", "comics"],
        )),
        public(movie("hugo", "Hugo", "Martin Scorsese", 2011, 12.0, &["drama"])),
        movie("work-in-progress", "Work in Progress", "TBD", 2025, 420.5, &["animation", "kids"])
            .with_permission(Permission::read("user:1").unwrap())
            .with_permission(Permission::update("user:1").unwrap()),
    ]
}

pub fn seed_movies<A: Adapter>(adapter: &mut A) -> Result<()> {
    let ctx = reader();
    adapter.create_collection(&ctx, &movies())?;
    adapter.create_documents(&ctx, "movies", movie_documents())?;
    Ok(())
}

pub fn ids(documents: &[Document]) -> Vec<String> {
    documents.iter().map(|d| d.id.clone()).collect()
}

pub fn sorted_ids(documents: &[Document]) -> Vec<String> {
    let mut ids = ids(documents);
    ids.sort();
    ids
}
