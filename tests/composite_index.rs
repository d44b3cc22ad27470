//! Composite-index substitution and lookups.

use kitedb::{Context, IndexDef, IndexType, KeyValueKind, Namespace};

fn ns_ab() -> Namespace {
    let ns = Namespace::new("pairs", 0, Default::default(), Default::default());
    let ctx = Context::new();
    ns.add_index(IndexDef::new("id", KeyValueKind::Int, IndexType::Hash).pk(), &ctx)
        .unwrap();
    ns.add_index(IndexDef::new("a", KeyValueKind::Int, IndexType::Hash), &ctx)
        .unwrap();
    ns.add_index(IndexDef::new("b", KeyValueKind::Int, IndexType::Hash), &ctx)
        .unwrap();
    ns.add_index(IndexDef::new("a+b", KeyValueKind::Composite, IndexType::Hash), &ctx)
        .unwrap();
    for (id, a, b) in [(1, 1, 2), (2, 1, 3), (3, 2, 2), (4, 1, 2)] {
        let mut item = ns.new_item();
        item.from_json(&format!(r#"{{"id": {id}, "a": {a}, "b": {b}}}"#)).unwrap();
        ns.upsert(&mut item, &Context::new()).unwrap();
    }
    ns
}

#[test]
fn and_equalities_use_the_composite() {
    let ns = ns_ab();
    let ctx = Context::new();
    let mut query = kitedb::query::sql::parse("SELECT * FROM pairs WHERE a = 1 AND b = 2").unwrap();
    query.explain = true;
    let results = ns.select(&query, &ctx).unwrap();

    let mut ids: Vec<i64> = (0..results.len())
        .map(|i| results.to_json(i).unwrap()["id"].as_i64().unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 4]);

    let explain = results.explain.as_deref().unwrap_or("");
    assert!(explain.contains("a+b"), "composite index should drive: {explain}");
}

#[test]
fn partial_coverage_keeps_single_indexes() {
    let ns = ns_ab();
    let ctx = Context::new();
    let results = ns
        .select_sql("SELECT * FROM pairs WHERE a = 1", &ctx)
        .unwrap();
    assert_eq!(results.len(), 3);

    let results = ns
        .select_sql("SELECT * FROM pairs WHERE a = 1 AND b > 2", &ctx)
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results.to_json(0).unwrap()["id"], 2);
}

#[test]
fn composite_tracks_updates_and_deletes() {
    let ns = ns_ab();
    let ctx = Context::new();

    let mut changed = ns.new_item();
    changed.from_json(r#"{"id": 1, "a": 9, "b": 9}"#).unwrap();
    ns.upsert(&mut changed, &ctx).unwrap();

    let results = ns
        .select_sql("SELECT * FROM pairs WHERE a = 1 AND b = 2", &ctx)
        .unwrap();
    let ids: Vec<i64> = (0..results.len())
        .map(|i| results.to_json(i).unwrap()["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![4]);

    let results = ns
        .select_sql("SELECT * FROM pairs WHERE a = 9 AND b = 9", &ctx)
        .unwrap();
    assert_eq!(results.len(), 1);
}
