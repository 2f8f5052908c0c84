//! Behaviors every adapter must share, run against each backend.

use docbase::model::{Attribute, AttributeKind, CursorDirection, Index, IndexKind, OrderDirection, PermissionType};
use docbase::{
    Adapter, AdapterOptions, AuthContext, Collection, Cursor, Document, ErrorKind, FindRequest,
    Permission, Query, Result, Value,
};

use super::{ids, movies, reader, seed_movies, sorted_ids};

fn count<A: Adapter>(adapter: &A, ctx: &AuthContext, queries: Vec<Query>) -> Result<u64> {
    adapter.count(ctx, "movies", &queries, None)
}

pub fn filters_and_aggregates<A: Adapter>(adapter: &mut A) -> Result<()> {
    seed_movies(adapter)?;
    let ctx = reader();

    assert_eq!(count(adapter, &ctx, vec![])?, 5);
    assert_eq!(count(adapter, &ctx, vec![Query::equal("year", vec![2019])])?, 2);
    assert_eq!(count(adapter, &ctx, vec![Query::equal("year", vec![2019, 2013])])?, 3);
    assert_eq!(count(adapter, &ctx, vec![Query::not_equal("year", vec![2019])])?, 3);
    assert_eq!(count(adapter, &ctx, vec![Query::between("year", 2013, 2019)])?, 3);
    assert_eq!(count(adapter, &ctx, vec![Query::not_between("year", 2013, 2019)])?, 2);
    assert_eq!(count(adapter, &ctx, vec![Query::greater_than("price", 30.0)])?, 3);
    assert_eq!(count(adapter, &ctx, vec![Query::less_than_equal("price", 25.99)])?, 2);
    assert_eq!(count(adapter, &ctx, vec![Query::contains("genres", vec!["comics"])])?, 1);
    assert_eq!(count(adapter, &ctx, vec![Query::contains("genres", vec!["kids", "drama"])])?, 4);
    assert_eq!(count(adapter, &ctx, vec![Query::not_contains("genres", vec!["kids"])])?, 2);
    assert_eq!(count(adapter, &ctx, vec![Query::starts_with("name", "Frozen")])?, 2);
    assert_eq!(count(adapter, &ctx, vec![Query::not_starts_with("name", "Frozen")])?, 3);
    assert_eq!(count(adapter, &ctx, vec![Query::ends_with("name", "II")])?, 1);
    assert_eq!(count(adapter, &ctx, vec![Query::search("name", "marvel")])?, 1);
    assert_eq!(count(adapter, &ctx, vec![Query::is_null("director")])?, 0);
    assert_eq!(count(adapter, &ctx, vec![Query::is_not_null("director")])?, 5);
    assert_eq!(
        count(
            adapter,
            &ctx,
            vec![Query::or(vec![
                Query::equal("year", vec![2011]),
                Query::starts_with("name", "Captain"),
            ])]
        )?,
        2
    );
    assert_eq!(
        count(
            adapter,
            &ctx,
            vec![Query::and(vec![
                Query::equal("year", vec![2019]),
                Query::greater_than("price", 30.0),
            ])]
        )?,
        1
    );
    assert_eq!(adapter.count(&ctx, "movies", &[], Some(3))?, 3);

    assert_eq!(adapter.sum(&ctx, "movies", "year", &[], None)?, 10087.0);
    assert_eq!(
        adapter.sum(&ctx, "movies", "year", &[Query::equal("year", vec![2019])], None)?,
        4038.0
    );
    let err = adapter.sum(&ctx, "movies", "name", &[], None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidQuery);

    let request = FindRequest::new(vec![]).order("year", OrderDirection::Desc).limit(None);
    let found = adapter.find(&ctx, "movies", &request)?;
    assert_eq!(
        ids(&found),
        ["work-in-progress", "frozen-ii", "captain-marvel", "frozen", "hugo"]
    );
    Ok(())
}

/// Pattern methods ignore case and negated methods keep documents whose
/// attribute is null.
pub fn patterns_ignore_case_and_negations_keep_nulls<A: Adapter>(adapter: &mut A) -> Result<()> {
    seed_movies(adapter)?;
    let ctx = reader();

    assert_eq!(count(adapter, &ctx, vec![Query::starts_with("name", "frozen")])?, 2);
    assert_eq!(count(adapter, &ctx, vec![Query::contains("name", vec!["MARVEL"])])?, 1);
    assert_eq!(count(adapter, &ctx, vec![Query::ends_with("name", "ii")])?, 1);
    assert_eq!(count(adapter, &ctx, vec![Query::not_starts_with("name", "FROZEN")])?, 3);

    let cleared = adapter.update_document(
        &ctx,
        "movies",
        "hugo",
        Document::new("hugo").with("director", Value::Null),
    )?;
    assert_eq!(cleared.get("director"), None);
    assert_eq!(cleared.permissions.len(), 3);
    assert!(adapter.get_document(&AuthContext::new(["any"]), "movies", "hugo", &[])?.is_some());

    assert_eq!(count(adapter, &ctx, vec![Query::is_null("director")])?, 1);
    assert_eq!(count(adapter, &ctx, vec![Query::not_equal("director", vec!["TBD"])])?, 4);
    assert_eq!(
        count(
            adapter,
            &ctx,
            vec![Query::not_equal("director", vec!["TBD", "Anna Boden & Ryan Fleck"])]
        )?,
        3
    );
    assert_eq!(count(adapter, &ctx, vec![Query::not_contains("director", vec!["buck"])])?, 3);
    assert_eq!(count(adapter, &ctx, vec![Query::not_ends_with("director", "LEE")])?, 3);
    assert_eq!(count(adapter, &ctx, vec![Query::not_search("director", "scorsese")])?, 5);

    let err = count(
        adapter,
        &ctx,
        vec![Query::new(
            docbase::model::Method::StartsWith,
            "name",
            vec![Value::from("Frozen"), Value::from("Hugo")],
        )],
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidQuery);
    Ok(())
}

pub fn document_round_trip<A: Adapter>(adapter: &mut A) -> Result<()> {
    seed_movies(adapter)?;
    let ctx = reader();

    let doc = adapter
        .get_document(&ctx, "movies", "captain-marvel", &[])?
        .expect("captain-marvel exists");
    assert_eq!(doc.get("name"), Some(&Value::from("Captain Marvel")));
    assert_eq!(doc.get("year"), Some(&Value::Int(2019)));
    assert_eq!(doc.get("price"), Some(&Value::Float(25.99)));
    assert_eq!(doc.get("active"), Some(&Value::Bool(true)));
    assert_eq!(
        doc.get("genres"),
        Some(&Value::Array(vec![
            Value::from("science fiction"),
            Value::from("action"),
            Value::from("comics"),
        ]))
    );
    assert!(doc.sequence.is_some());
    assert!(doc.created_at.is_some());
    assert_eq!(doc.collection.as_deref(), Some("movies"));
    assert_eq!(doc.permissions.len(), 3);
    assert_eq!(doc.roles_for(PermissionType::Read), ["any"]);

    let projected = adapter
        .get_document(&ctx, "movies", "captain-marvel", &[Query::select(&["name", "year"])])?
        .expect("captain-marvel exists");
    assert_eq!(projected.attributes.keys().collect::<Vec<_>>(), ["name", "year"]);
    assert_eq!(projected.id, "captain-marvel");

    assert!(adapter.get_document(&ctx, "movies", "missing", &[])?.is_none());

    let hugo = adapter.get_document(&ctx, "movies", "hugo", &[])?.expect("hugo exists");
    let filled = adapter.get_sequences(
        &ctx,
        "movies",
        vec![Document::new("hugo"), Document::new("captain-marvel")],
    )?;
    assert_eq!(filled[0].sequence, hugo.sequence);
    assert_eq!(filled[1].sequence, doc.sequence);

    let err = adapter
        .create_document(&ctx, "movies", Document::new("bad").with("rating", 5))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidQuery);
    Ok(())
}

pub fn permissions_filter_reads<A: Adapter>(adapter: &mut A) -> Result<()> {
    seed_movies(adapter)?;
    let owner = AuthContext::new(["user:1"]);
    let stranger = AuthContext::new(["user:2"]);
    let anyone = AuthContext::new(["any"]);
    let unchecked = AuthContext::new(["user:2"]).skip_authorization();

    assert_eq!(count(adapter, &owner, vec![])?, 1);
    assert_eq!(count(adapter, &stranger, vec![])?, 0);
    assert_eq!(count(adapter, &anyone, vec![])?, 4);
    assert_eq!(count(adapter, &unchecked, vec![])?, 5);
    assert!(adapter.get_document(&stranger, "movies", "work-in-progress", &[])?.is_none());
    assert!(adapter.get_document(&owner, "movies", "work-in-progress", &[])?.is_some());
    assert_eq!(adapter.sum(&anyone, "movies", "year", &[], None)?, 8062.0);

    let updatable = FindRequest::new(vec![])
        .for_permission(PermissionType::Update)
        .limit(None);
    assert_eq!(
        sorted_ids(&adapter.find(&owner, "movies", &updatable)?),
        ["work-in-progress"]
    );
    assert_eq!(adapter.find(&anyone, "movies", &updatable)?.len(), 4);

    let err = adapter
        .update_document(&stranger, "movies", "work-in-progress", Document::new("work-in-progress").with("year", 2030))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(!adapter.delete_document(&owner, "movies", "work-in-progress")?);
    Ok(())
}

pub fn updates_upserts_and_deletes<A: Adapter>(adapter: &mut A) -> Result<()> {
    seed_movies(adapter)?;
    let ctx = reader();
    let public = |doc: Document| {
        doc.with_permission(Permission::read("any").unwrap())
            .with_permission(Permission::update("any").unwrap())
            .with_permission(Permission::delete("any").unwrap())
    };

    let before = adapter.get_document(&ctx, "movies", "hugo", &[])?.expect("hugo exists");
    let updated = adapter.update_document(&ctx, "movies", "hugo", public(Document::new("hugo").with("price", 15.5)))?;
    assert_eq!(updated.get("price"), Some(&Value::Float(15.5)));
    assert_eq!(updated.get("year"), Some(&Value::Int(2011)));
    assert_eq!(updated.sequence, before.sequence);
    let reread = adapter.get_document(&ctx, "movies", "hugo", &[])?.expect("hugo exists");
    assert_eq!(reread.get("price"), Some(&Value::Float(15.5)));

    let err = adapter
        .update_document(&ctx, "movies", "nope", Document::new("nope").with("year", 1))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let patched = adapter.update_documents(
        &ctx,
        "movies",
        &Document::default().with("active", false),
        &[Query::equal("year", vec![2019])],
    )?;
    assert_eq!(patched, 2);
    assert_eq!(count(adapter, &ctx, vec![Query::equal("active", vec![false])])?, 2);
    let kept = adapter.get_document(&ctx, "movies", "frozen-ii", &[])?.expect("frozen-ii exists");
    assert_eq!(kept.permissions.len(), 3);

    let upserted = adapter.upsert_documents(
        &ctx,
        "movies",
        vec![
            public(Document::new("hugo").with("year", 2012)),
            public(Document::new("up").with("name", "Up").with("year", 2009)),
        ],
    )?;
    assert_eq!(upserted.len(), 2);
    let hugo = adapter.get_document(&ctx, "movies", "hugo", &[])?.expect("hugo exists");
    assert_eq!(hugo.sequence, before.sequence);
    assert_eq!(hugo.get("year"), Some(&Value::Int(2012)));
    assert_eq!(count(adapter, &ctx, vec![])?, 6);

    assert!(adapter.delete_document(&ctx, "movies", "up")?);
    assert!(!adapter.delete_document(&ctx, "movies", "up")?);
    assert_eq!(
        adapter.delete_documents(&ctx, "movies", &[Query::less_than("year", 2013)])?,
        1
    );
    assert_eq!(count(adapter, &ctx, vec![])?, 4);

    adapter.delete_collection(&ctx, "movies")?;
    let err = count(adapter, &ctx, vec![]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

pub fn duplicates_are_rejected<A: Adapter>(adapter: &mut A) -> Result<()> {
    seed_movies(adapter)?;
    let ctx = reader();
    let read_any = || Permission::read("any").unwrap();

    let err = adapter
        .create_document(&ctx, "movies", Document::new("frozen").with("name", "Frozen III").with_permission(read_any()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Duplicate);

    let err = adapter
        .create_document(&ctx, "movies", Document::new("frozen-copy").with("name", "Frozen").with_permission(read_any()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Duplicate);

    let err = adapter
        .create_documents(
            &ctx,
            "movies",
            vec![
                Document::new("brand-new").with("name", "Brand New").with_permission(read_any()),
                Document::new("hugo").with("name", "Hugo Again").with_permission(read_any()),
            ],
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Duplicate);
    assert!(adapter.get_document(&ctx, "movies", "brand-new", &[])?.is_none());

    let err = adapter.create_collection(&ctx, &movies()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Duplicate);

    let err = adapter
        .create_index(&ctx, "movies", &Index::new("name_unique", IndexKind::Unique, &["name"]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Duplicate);

    let err = adapter
        .create_index(&ctx, "movies", &Index::new("director_unique", IndexKind::Unique, &["director"]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Duplicate);
    adapter.create_index(&ctx, "movies", &Index::new("price_key", IndexKind::Key, &["price"]))?;
    Ok(())
}

fn scores() -> Collection {
    Collection::new("scores").with_attribute(Attribute::new("value", AttributeKind::Integer))
}

/// Seeds `a..e` with values `[3, 1, 3, 2, 3]` in that insertion order.
pub fn seed_scores<A: Adapter>(adapter: &mut A) -> Result<()> {
    let ctx = AuthContext::new(["any"]);
    adapter.create_collection(&ctx, &scores())?;
    let documents = [("a", 3), ("b", 1), ("c", 3), ("d", 2), ("e", 3)]
        .into_iter()
        .map(|(id, value)| {
            Document::new(id)
                .with("value", value)
                .with_permission(Permission::read("any").unwrap())
        })
        .collect();
    adapter.create_documents(&ctx, "scores", documents)?;
    Ok(())
}

fn walk_pages<A: Adapter>(adapter: &A, direction: OrderDirection, page_size: u64) -> Result<Vec<String>> {
    let ctx = AuthContext::new(["any"]);
    let base = FindRequest::new(vec![]).order("value", direction).limit(Some(page_size));
    let mut seen = Vec::new();
    let mut request = base.clone();
    loop {
        let page = adapter.find(&ctx, "scores", &request)?;
        seen.extend(ids(&page));
        let Some(last) = page.last() else { break };
        if (page.len() as u64) < page_size {
            break;
        }
        let token = Cursor::from_document(last, &base.order_attributes)?.encode();
        request = base.clone().cursor(Cursor::decode(&token)?, CursorDirection::After);
    }
    Ok(seen)
}

pub fn keyset_pages_cover_everything_once<A: Adapter>(adapter: &mut A) -> Result<()> {
    seed_scores(adapter)?;
    assert_eq!(walk_pages(adapter, OrderDirection::Asc, 2)?, ["b", "d", "a", "c", "e"]);
    assert_eq!(walk_pages(adapter, OrderDirection::Asc, 1)?, ["b", "d", "a", "c", "e"]);
    assert_eq!(walk_pages(adapter, OrderDirection::Desc, 2)?, ["a", "c", "e", "d", "b"]);
    assert_eq!(walk_pages(adapter, OrderDirection::Desc, 5)?, ["a", "c", "e", "d", "b"]);
    Ok(())
}

pub fn before_cursor_mirrors_after<A: Adapter>(adapter: &mut A) -> Result<()> {
    seed_scores(adapter)?;
    let ctx = AuthContext::new(["any"]);
    let base = FindRequest::new(vec![]).order("value", OrderDirection::Asc).limit(Some(2));
    let everything = adapter.find(&ctx, "scores", &base.clone().limit(None))?;
    let e = everything.iter().find(|d| d.id == "e").expect("e exists");
    let d = everything.iter().find(|d| d.id == "d").expect("d exists");

    let before_e = base
        .clone()
        .cursor(Cursor::from_document(e, &base.order_attributes)?, CursorDirection::Before);
    assert_eq!(ids(&adapter.find(&ctx, "scores", &before_e)?), ["a", "c"]);

    let after_d = base
        .clone()
        .cursor(Cursor::from_document(d, &base.order_attributes)?, CursorDirection::After);
    assert_eq!(ids(&adapter.find(&ctx, "scores", &after_d)?), ["a", "c"]);

    let offset = base.clone().offset(1);
    assert_eq!(ids(&adapter.find(&ctx, "scores", &offset)?), ["d", "a"]);

    let incomplete = Cursor::new().with("$sequence", "1");
    let err = adapter
        .find(&ctx, "scores", &base.clone().cursor(incomplete, CursorDirection::After))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidQuery);
    Ok(())
}

fn notes() -> Collection {
    Collection::new("notes").with_attribute(Attribute::new("body", AttributeKind::String))
}

fn note(id: &str, body: &str) -> Document {
    Document::new(id)
        .with("body", body)
        .with_permission(Permission::read("any").unwrap())
}

fn shared() -> AdapterOptions {
    AdapterOptions {
        shared_tables: true,
        ..AdapterOptions::default()
    }
}

fn tenant(id: i64) -> AuthContext {
    AuthContext::new(["any"]).with_tenant(Some(id))
}

pub fn tenants_are_isolated<A, F>(open: F) -> Result<()>
where
    A: Adapter,
    F: Fn(AdapterOptions) -> Result<A>,
{
    let mut adapter = open(shared())?;
    let (one, two) = (tenant(1), tenant(2));
    adapter.create_collection(&one, &notes())?;
    adapter.create_collection(&two, &notes())?;
    adapter.create_document(&one, "notes", note("n1", "tenant one"))?;
    adapter.create_document(&two, "notes", note("n1", "tenant two"))?;
    adapter.create_document(&two, "notes", note("n2", "tenant two again"))?;

    assert_eq!(adapter.count(&one, "notes", &[], None)?, 1);
    assert_eq!(adapter.count(&two, "notes", &[], None)?, 2);
    let doc = adapter.get_document(&two, "notes", "n1", &[])?.expect("n1 exists");
    assert_eq!(doc.get("body"), Some(&Value::from("tenant two")));
    assert_eq!(doc.tenant, Some(2));
    assert!(adapter.get_document(&one, "notes", "n2", &[])?.is_none());

    let err = adapter
        .count(&AuthContext::new(["any"]), "notes", &[], None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidQuery);

    adapter.delete_collection(&one, "notes")?;
    assert_eq!(adapter.count(&two, "notes", &[], None)?, 2);
    let err = adapter.count(&one, "notes", &[], None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

pub fn metadata_without_tenant_is_visible_to_all<A, F>(open: F) -> Result<()>
where
    A: Adapter,
    F: Fn(AdapterOptions) -> Result<A>,
{
    {
        let mut plain = open(AdapterOptions::default())?;
        plain.create_collection(&AuthContext::new(["any"]), &notes())?;
    }
    let mut adapter = open(shared())?;
    adapter.create_document(&tenant(7), "notes", note("n1", "hello"))?;
    assert_eq!(adapter.count(&tenant(7), "notes", &[], None)?, 1);
    assert_eq!(adapter.count(&tenant(8), "notes", &[], None)?, 0);

    let err = adapter.delete_collection(&tenant(7), "notes").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidQuery);
    assert_eq!(adapter.count(&tenant(7), "notes", &[], None)?, 1);
    adapter.create_document(&tenant(8), "notes", note("n2", "still here"))?;
    assert_eq!(adapter.count(&tenant(8), "notes", &[], None)?, 1);
    Ok(())
}
