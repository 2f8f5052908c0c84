#![allow(missing_docs)]

mod common;

use docbase::model::{Attribute, AttributeKind, OrderDirection};
use docbase::{
    Adapter, AdapterOptions, AuthContext, Collection, Cursor, Document, FindRequest,
    MemoryAdapter, Permission, Query, SqliteAdapter,
};
use proptest::prelude::*;

fn seeded<A: Adapter>(mut adapter: A, values: &[i64]) -> A {
    let ctx = AuthContext::new(["any"]);
    adapter
        .create_collection(
            &ctx,
            &Collection::new("items").with_attribute(Attribute::new("value", AttributeKind::Integer)),
        )
        .unwrap();
    let documents = values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            Document::new(format!("item-{i}"))
                .with("value", *v)
                .with_permission(Permission::read("any").unwrap())
        })
        .collect();
    adapter.create_documents(&ctx, "items", documents).unwrap();
    adapter
}

fn adapters(values: &[i64]) -> (SqliteAdapter, MemoryAdapter) {
    common::init_tracing();
    (
        seeded(SqliteAdapter::open_in_memory(AdapterOptions::default()).unwrap(), values),
        seeded(MemoryAdapter::new(AdapterOptions::default()).unwrap(), values),
    )
}

fn paged_ids<A: Adapter>(adapter: &A, direction: OrderDirection, page_size: u64) -> Vec<String> {
    let ctx = AuthContext::new(["any"]);
    let base = FindRequest::new(vec![]).order("value", direction).limit(Some(page_size));
    let mut request = base.clone();
    let mut seen = Vec::new();
    loop {
        let page = adapter.find(&ctx, "items", &request).unwrap();
        seen.extend(page.iter().map(|d| d.id.clone()));
        match page.last() {
            Some(last) if page.len() as u64 == page_size => {
                let cursor = Cursor::from_document(last, &base.order_attributes).unwrap();
                request = base.clone().cursor(cursor, docbase::model::CursorDirection::After);
            }
            _ => break,
        }
    }
    seen
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_multi_value_equal_is_a_disjunction(
        values in prop::collection::vec(0i64..6, 0..12),
        v1 in 0i64..6,
        v2 in 0i64..6,
    ) {
        let (sqlite, memory) = adapters(&values);
        let ctx = AuthContext::new(["any"]);
        let set = [Query::equal("value", vec![v1, v2])];
        let disjunction = [Query::or(vec![
            Query::equal("value", vec![v1]),
            Query::equal("value", vec![v2]),
        ])];
        let expected = values.iter().filter(|v| **v == v1 || **v == v2).count() as u64;
        prop_assert_eq!(sqlite.count(&ctx, "items", &set, None).unwrap(), expected);
        prop_assert_eq!(sqlite.count(&ctx, "items", &disjunction, None).unwrap(), expected);
        prop_assert_eq!(memory.count(&ctx, "items", &set, None).unwrap(), expected);
        prop_assert_eq!(memory.count(&ctx, "items", &disjunction, None).unwrap(), expected);
    }

    #[test]
    fn prop_keyset_pages_partition_the_result(
        values in prop::collection::vec(0i64..4, 0..15),
        page_size in 1u64..5,
        descending in any::<bool>(),
    ) {
        let (sqlite, memory) = adapters(&values);
        let direction = if descending { OrderDirection::Desc } else { OrderDirection::Asc };

        let mut expected: Vec<(i64, usize)> = values.iter().copied().zip(0..).collect();
        expected.sort_by(|a, b| match direction {
            OrderDirection::Asc => a.0.cmp(&b.0).then(a.1.cmp(&b.1)),
            OrderDirection::Desc => b.0.cmp(&a.0).then(a.1.cmp(&b.1)),
        });
        let expected: Vec<String> = expected.iter().map(|(_, i)| format!("item-{i}")).collect();

        prop_assert_eq!(&paged_ids(&sqlite, direction, page_size), &expected);
        prop_assert_eq!(&paged_ids(&memory, direction, page_size), &expected);
    }
}
