//! Array-index semantics: one entry per element, cleanup on delete.

use kitedb::{Context, IndexDef, IndexType, KeyValueKind, Namespace};

fn ns_with_tags() -> Namespace {
    let ns = Namespace::new("tagged", 0, Default::default(), Default::default());
    let ctx = Context::new();
    ns.add_index(IndexDef::new("id", KeyValueKind::Int, IndexType::Hash).pk(), &ctx)
        .unwrap();
    ns.add_index(
        IndexDef::new("tags", KeyValueKind::String, IndexType::Hash).array(),
        &ctx,
    )
    .unwrap();
    ns
}

#[test]
fn every_element_is_findable() {
    let ns = ns_with_tags();
    let ctx = Context::new();
    let mut item = ns.new_item();
    item.from_json(r#"{"id": 1, "tags": ["x", "y"]}"#).unwrap();
    ns.upsert(&mut item, &ctx).unwrap();

    for tag in ["x", "y"] {
        let results = ns
            .select_sql(&format!("SELECT * FROM tagged WHERE tags = '{tag}'"), &ctx)
            .unwrap();
        assert_eq!(results.len(), 1, "tag {tag}");
        assert_eq!(results.items[0].id, 0);
    }
    assert!(ns
        .select_sql("SELECT * FROM tagged WHERE tags = 'z'", &ctx)
        .unwrap()
        .is_empty());
}

#[test]
fn delete_clears_all_element_entries() {
    let ns = ns_with_tags();
    let ctx = Context::new();
    let mut item = ns.new_item();
    item.from_json(r#"{"id": 1, "tags": ["x", "y"]}"#).unwrap();
    ns.upsert(&mut item, &ctx).unwrap();

    let mut to_delete = ns.new_item();
    to_delete.from_json(r#"{"id": 1}"#).unwrap();
    ns.delete_item(&mut to_delete, &ctx).unwrap();

    for tag in ["x", "y"] {
        let results = ns
            .select_sql(&format!("SELECT * FROM tagged WHERE tags = '{tag}'"), &ctx)
            .unwrap();
        assert!(results.is_empty(), "tag {tag} must be gone");
    }
}

#[test]
fn update_reindexes_changed_elements() {
    let ns = ns_with_tags();
    let ctx = Context::new();
    let mut item = ns.new_item();
    item.from_json(r#"{"id": 1, "tags": ["x", "y"]}"#).unwrap();
    ns.upsert(&mut item, &ctx).unwrap();

    let mut changed = ns.new_item();
    changed.from_json(r#"{"id": 1, "tags": ["y", "z"]}"#).unwrap();
    ns.upsert(&mut changed, &ctx).unwrap();

    assert!(ns.select_sql("SELECT * FROM tagged WHERE tags = 'x'", &ctx).unwrap().is_empty());
    assert_eq!(ns.select_sql("SELECT * FROM tagged WHERE tags = 'z'", &ctx).unwrap().len(), 1);
}

#[test]
fn allset_requires_every_value() {
    let ns = ns_with_tags();
    let ctx = Context::new();
    let mut item = ns.new_item();
    item.from_json(r#"{"id": 1, "tags": ["x", "y"]}"#).unwrap();
    ns.upsert(&mut item, &ctx).unwrap();

    let hit = ns
        .select_sql("SELECT * FROM tagged WHERE ALLSET(tags, 'x', 'y')", &ctx)
        .unwrap();
    assert_eq!(hit.len(), 1);

    let miss = ns
        .select_sql("SELECT * FROM tagged WHERE ALLSET(tags, 'x', 'q')", &ctx)
        .unwrap();
    assert!(miss.is_empty());
}

#[test]
fn empty_condition_finds_rows_without_values() {
    let ns = ns_with_tags();
    let ctx = Context::new();
    for json in [r#"{"id": 1, "tags": ["x"]}"#, r#"{"id": 2}"#] {
        let mut item = ns.new_item();
        item.from_json(json).unwrap();
        ns.upsert(&mut item, &ctx).unwrap();
    }

    let empties = ns
        .select_sql("SELECT * FROM tagged WHERE tags IS NULL", &ctx)
        .unwrap();
    assert_eq!(empties.len(), 1);
    assert_eq!(empties.to_json(0).unwrap()["id"], 2);

    let non_empty = ns
        .select_sql("SELECT * FROM tagged WHERE tags IS NOT NULL", &ctx)
        .unwrap();
    assert_eq!(non_empty.len(), 1);
    assert_eq!(non_empty.to_json(0).unwrap()["id"], 1);
}
