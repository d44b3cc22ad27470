//! Ordered-index behavior: ranges, ORDER BY with and without built sort
//! orders, limit/offset.

use kitedb::{Context, IndexDef, IndexType, KeyValueKind, Namespace, OptimizationState};

fn priced() -> Namespace {
    let ns = Namespace::new("goods", 0, Default::default(), Default::default());
    let ctx = Context::new();
    ns.add_index(IndexDef::new("id", KeyValueKind::Int, IndexType::Hash).pk(), &ctx)
        .unwrap();
    ns.add_index(IndexDef::new("price", KeyValueKind::Int, IndexType::Tree), &ctx)
        .unwrap();
    for price in 1..=10 {
        let mut item = ns.new_item();
        item.from_json(&format!(r#"{{"id": {price}, "price": {price}}}"#))
            .unwrap();
        ns.upsert(&mut item, &ctx).unwrap();
    }
    ns
}

fn prices(results: &kitedb::QueryResults) -> Vec<i64> {
    (0..results.len())
        .map(|i| results.to_json(i).unwrap()["price"].as_i64().unwrap())
        .collect()
}

#[test]
fn range_with_order_and_limit() {
    let ns = priced();
    let ctx = Context::new();
    let results = ns
        .select_sql(
            "SELECT * FROM goods WHERE price > 3 AND price <= 7 ORDER BY price DESC LIMIT 2",
            &ctx,
        )
        .unwrap();
    assert_eq!(prices(&results), vec![7, 6]);
}

#[test]
fn index_driven_order_matches_value_sort() {
    let ns = priced();
    let ctx = Context::new();
    let before = ns
        .select_sql("SELECT * FROM goods WHERE price >= 2 ORDER BY price", &ctx)
        .unwrap();

    // Build sort orders, then the same query must use the index stream.
    ns.background_routine(&ctx).unwrap();
    assert_eq!(ns.optimization_state(), OptimizationState::OptimizationCompleted);
    let after = ns
        .select_sql("SELECT * FROM goods WHERE price >= 2 ORDER BY price", &ctx)
        .unwrap();

    assert_eq!(prices(&before), (2..=10).collect::<Vec<i64>>());
    assert_eq!(prices(&before), prices(&after));
}

#[test]
fn mutation_invalidates_built_sort_orders() {
    let ns = priced();
    let ctx = Context::new();
    ns.background_routine(&ctx).unwrap();
    assert_eq!(ns.optimization_state(), OptimizationState::OptimizationCompleted);

    let mut item = ns.new_item();
    item.from_json(r#"{"id": 11, "price": 0}"#).unwrap();
    ns.upsert(&mut item, &ctx).unwrap();
    assert_eq!(ns.optimization_state(), OptimizationState::NotOptimized);

    // Unsorted fallback still returns correct order.
    let results = ns
        .select_sql("SELECT * FROM goods ORDER BY price LIMIT 3", &ctx)
        .unwrap();
    assert_eq!(prices(&results), vec![0, 1, 2]);
}

#[test]
fn between_and_offset() {
    let ns = priced();
    let ctx = Context::new();
    let results = ns
        .select_sql(
            "SELECT * FROM goods WHERE price BETWEEN 2 AND 9 ORDER BY price LIMIT 3 OFFSET 2",
            &ctx,
        )
        .unwrap();
    assert_eq!(prices(&results), vec![4, 5, 6]);
    assert_eq!(results.total_count, 8);
}

#[test]
fn multi_key_sort_breaks_ties() {
    let ns = Namespace::new("multi", 0, Default::default(), Default::default());
    let ctx = Context::new();
    ns.add_index(IndexDef::new("id", KeyValueKind::Int, IndexType::Hash).pk(), &ctx)
        .unwrap();
    ns.add_index(IndexDef::new("group", KeyValueKind::Int, IndexType::Tree), &ctx)
        .unwrap();
    for (id, group, rank) in [(1, 1, 5), (2, 1, 3), (3, 2, 9), (4, 2, 1)] {
        let mut item = ns.new_item();
        item.from_json(&format!(r#"{{"id": {id}, "group": {group}, "rank": {rank}}}"#))
            .unwrap();
        ns.upsert(&mut item, &ctx).unwrap();
    }

    let results = ns
        .select_sql("SELECT * FROM multi ORDER BY group, rank DESC", &ctx)
        .unwrap();
    let ids: Vec<i64> = (0..results.len())
        .map(|i| results.to_json(i).unwrap()["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
}
