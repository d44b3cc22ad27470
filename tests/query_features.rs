//! Planner surface: OR/NOT, aggregations, joins, merges, geometry,
//! UPDATE/DELETE by query, explain.

use kitedb::query::{CondType, JoinEntry, JoinType, OpType};
use kitedb::selector::JoinPreSelect;
use kitedb::{Context, IndexDef, IndexType, KeyValueKind, Namespace, Query};
use serde_json::json;

fn shop() -> Namespace {
    let ns = Namespace::new("goods", 0, Default::default(), Default::default());
    let ctx = Context::new();
    ns.add_index(IndexDef::new("id", KeyValueKind::Int, IndexType::Hash).pk(), &ctx)
        .unwrap();
    ns.add_index(IndexDef::new("price", KeyValueKind::Int, IndexType::Tree), &ctx)
        .unwrap();
    ns.add_index(IndexDef::new("genre", KeyValueKind::String, IndexType::Hash), &ctx)
        .unwrap();
    let rows = [
        (1, 10, "sf"),
        (2, 20, "sf"),
        (3, 30, "fantasy"),
        (4, 40, "fantasy"),
        (5, 50, "manual"),
    ];
    for (id, price, genre) in rows {
        let mut item = ns.new_item();
        item.from_json(&format!(r#"{{"id": {id}, "price": {price}, "genre": "{genre}"}}"#))
            .unwrap();
        ns.upsert(&mut item, &ctx).unwrap();
    }
    ns
}

fn ids(results: &kitedb::QueryResults) -> Vec<i64> {
    let mut out: Vec<i64> = (0..results.len())
        .map(|i| results.to_json(i).unwrap()["id"].as_i64().unwrap())
        .collect();
    out.sort_unstable();
    out
}

#[test]
fn or_and_not_combine() {
    let ns = shop();
    let ctx = Context::new();
    let results = ns
        .select_sql("SELECT * FROM goods WHERE genre = 'sf' OR genre = 'manual'", &ctx)
        .unwrap();
    assert_eq!(ids(&results), vec![1, 2, 5]);

    let results = ns
        .select_sql("SELECT * FROM goods WHERE price > 15 AND NOT genre = 'fantasy'", &ctx)
        .unwrap();
    assert_eq!(ids(&results), vec![2, 5]);

    let results = ns
        .select_sql(
            "SELECT * FROM goods WHERE (genre = 'sf' OR genre = 'fantasy') AND price >= 30",
            &ctx,
        )
        .unwrap();
    assert_eq!(ids(&results), vec![3, 4]);
}

#[test]
fn aggregations_compute_over_full_match_set() {
    let ns = shop();
    let ctx = Context::new();
    let results = ns
        .select_sql(
            "SELECT COUNT(*), SUM(price), AVG(price), MIN(price), MAX(price) FROM goods WHERE price > 10",
            &ctx,
        )
        .unwrap();
    let agg = &results.aggregations;
    assert_eq!(agg[0].value, Some(4.0));
    assert_eq!(agg[1].value, Some(140.0));
    assert_eq!(agg[2].value, Some(35.0));
    assert_eq!(agg[3].value, Some(20.0));
    assert_eq!(agg[4].value, Some(50.0));
}

#[test]
fn facet_and_distinct() {
    let ns = shop();
    let ctx = Context::new();
    let results = ns
        .select_sql("SELECT FACET(genre), DISTINCT(genre) FROM goods", &ctx)
        .unwrap();
    let facet = &results.aggregations[0];
    assert_eq!(facet.facets.len(), 3);
    assert_eq!(facet.facets[0].count, 2); // sf and fantasy tie at 2

    let distinct = &results.aggregations[1];
    assert_eq!(distinct.distincts.len(), 3);
}

#[test]
fn update_and_delete_by_query() {
    let ns = shop();
    let ctx = Context::new();

    let updated = ns
        .select_sql("UPDATE goods SET price = 99 WHERE genre = 'sf'", &ctx)
        .unwrap();
    assert_eq!(updated.len(), 2);
    let results = ns
        .select_sql("SELECT * FROM goods WHERE price = 99", &ctx)
        .unwrap();
    assert_eq!(ids(&results), vec![1, 2]);

    let deleted = ns
        .select_sql("DELETE FROM goods WHERE genre = 'fantasy'", &ctx)
        .unwrap();
    assert_eq!(deleted.len(), 2);
    assert_eq!(ns.items_count(), 3);
    assert!(ns
        .select_sql("SELECT * FROM goods WHERE genre = 'fantasy'", &ctx)
        .unwrap()
        .is_empty());
}

#[test]
fn update_drop_removes_the_field() {
    let ns = shop();
    let ctx = Context::new();
    ns.select_sql("UPDATE goods DROP genre WHERE id = 1", &ctx).unwrap();
    let doc = ns
        .select_sql("SELECT * FROM goods WHERE id = 1", &ctx)
        .unwrap()
        .to_json(0)
        .unwrap();
    assert_eq!(doc, json!({"id": 1, "price": 10}));
}

#[test]
fn explain_names_the_chosen_index() {
    let ns = shop();
    let ctx = Context::new();
    let mut query = kitedb::query::sql::parse("SELECT * FROM goods WHERE price > 30").unwrap();
    query.explain = true;
    let results = ns.select(&query, &ctx).unwrap();
    let explain = results.explain.unwrap();
    assert!(explain.contains("price"), "{explain}");
    assert!(explain.contains("index"), "{explain}");
}

#[test]
fn inner_and_left_joins_against_preselect() {
    let ns = shop();
    let authors = Namespace::new("authors", 0, Default::default(), Default::default());
    let ctx = Context::new();
    authors
        .add_index(IndexDef::new("id", KeyValueKind::Int, IndexType::Hash).pk(), &ctx)
        .unwrap();
    authors
        .add_index(IndexDef::new("good_id", KeyValueKind::Int, IndexType::Hash), &ctx)
        .unwrap();
    for (id, good_id, name) in [(1, 1, "ada"), (2, 3, "kay")] {
        let mut item = authors.new_item();
        item.from_json(&format!(r#"{{"id": {id}, "good_id": {good_id}, "name": "{name}"}}"#))
            .unwrap();
        authors.upsert(&mut item, &ctx).unwrap();
    }

    let preselect = authors.select(&Query::new("authors"), &ctx).unwrap();
    let on = vec![JoinEntry {
        op: OpType::And,
        left_field: "id".to_string(),
        right_field: "good_id".to_string(),
        cond: CondType::Eq,
    }];

    let inner = JoinPreSelect {
        join_type: JoinType::Inner,
        on: on.clone(),
        preselect,
    };
    let results = ns
        .select_with_joins(&Query::new("goods"), std::slice::from_ref(&inner), &ctx)
        .unwrap();
    assert_eq!(ids(&results), vec![1, 3]);
    let doc = results.to_json(0).unwrap();
    assert_eq!(doc["joined_authors"][0]["name"], "ada");

    let preselect = authors.select(&Query::new("authors"), &ctx).unwrap();
    let left = JoinPreSelect { join_type: JoinType::Left, on, preselect };
    let results = ns
        .select_with_joins(&Query::new("goods"), &[left], &ctx)
        .unwrap();
    assert_eq!(results.len(), 5, "left join keeps unmatched rows");
}

#[test]
fn merge_unions_same_namespace_queries() {
    let ns = shop();
    let ctx = Context::new();
    let query = Query::new("goods")
        .where_eq("genre", "sf")
        .merge(Query::new("goods").where_eq("genre", "manual"));
    let results = ns.select(&query, &ctx).unwrap();
    assert_eq!(ids(&results), vec![1, 2, 5]);
}

#[test]
fn dwithin_uses_the_rtree() {
    let ns = Namespace::new("places", 0, Default::default(), Default::default());
    let ctx = Context::new();
    ns.add_index(IndexDef::new("id", KeyValueKind::Int, IndexType::Hash).pk(), &ctx)
        .unwrap();
    ns.add_index(IndexDef::new("spot", KeyValueKind::Point, IndexType::Rtree), &ctx)
        .unwrap();
    for (id, x, y) in [(1, 0.0, 0.0), (2, 3.0, 4.0), (3, 50.0, 50.0)] {
        let mut item = ns.new_item();
        item.from_json(&format!(r#"{{"id": {id}, "spot": [{x}, {y}]}}"#)).unwrap();
        ns.upsert(&mut item, &ctx).unwrap();
    }

    let near = ns
        .select_sql("SELECT * FROM places WHERE DWITHIN(spot, 0.0, 0.0, 5.0)", &ctx)
        .unwrap();
    assert_eq!(ids(&near), vec![1, 2]);

    // Same answer after the background pass packs the tree.
    ns.background_routine(&ctx).unwrap();
    let near = ns
        .select_sql("SELECT * FROM places WHERE DWITHIN(spot, 0.0, 0.0, 5.0)", &ctx)
        .unwrap();
    assert_eq!(ids(&near), vec![1, 2]);
}

#[test]
fn ttl_index_evicts_expired_rows() {
    let ns = Namespace::new("sessions", 0, Default::default(), Default::default());
    let ctx = Context::new();
    ns.add_index(IndexDef::new("id", KeyValueKind::Int, IndexType::Hash).pk(), &ctx)
        .unwrap();
    let mut ttl = IndexDef::new("seen_at", KeyValueKind::Int64, IndexType::Tree);
    ttl.opts.expire_after = Some(60);
    ns.add_index(ttl, &ctx).unwrap();

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    for (id, seen_at) in [(1, now - 3600), (2, now)] {
        let mut item = ns.new_item();
        item.from_json(&format!(r#"{{"id": {id}, "seen_at": {seen_at}}}"#)).unwrap();
        ns.upsert(&mut item, &ctx).unwrap();
    }

    ns.background_routine(&ctx).unwrap();
    assert_eq!(ns.items_count(), 1);
    let results = ns.select_sql("SELECT * FROM sessions", &ctx).unwrap();
    assert_eq!(results.to_json(0).unwrap()["id"], 2);
}
