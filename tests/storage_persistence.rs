//! Storage hydration, sys-record round-trips, and the read-only
//! transition on storage failure.

use kitedb::{
    Context, IndexDef, IndexType, KeyValueKind, MemStorage, Namespace, NamespaceConfigData,
};
use std::sync::Arc;

fn populated(storage: Arc<MemStorage>) -> Namespace {
    let ns = Namespace::new("books", 0, NamespaceConfigData::default(), Default::default());
    let ctx = Context::new();
    ns.enable_storage(storage, &ctx).unwrap();
    ns.add_index(IndexDef::new("id", KeyValueKind::Int, IndexType::Hash).pk(), &ctx)
        .unwrap();
    ns.add_index(IndexDef::new("price", KeyValueKind::Int, IndexType::Tree), &ctx)
        .unwrap();
    for (id, price) in [(1, 10), (2, 20), (3, 30)] {
        let mut item = ns.new_item();
        item.from_json(&format!(r#"{{"id": {id}, "price": {price}}}"#)).unwrap();
        ns.upsert(&mut item, &ctx).unwrap();
    }
    ns.set_schema(r#"{"type":"object"}"#, &ctx).unwrap();
    ns.put_meta("owner", "tests", &ctx).unwrap();
    ns.flush_storage(&ctx).unwrap();
    ns
}

#[test]
fn namespace_hydrates_from_storage() {
    let storage = MemStorage::new();
    let original = populated(storage.clone());
    assert_eq!(
        original
            .select_sql("SELECT * FROM books WHERE id = 1", &Context::new())
            .unwrap()
            .len(),
        1
    );
    drop(original);

    let restored = Namespace::new("books", 0, NamespaceConfigData::default(), Default::default());
    let ctx = Context::new();
    restored.enable_storage(storage, &ctx).unwrap();

    assert_eq!(restored.items_count(), 3);
    assert_eq!(restored.index_definitions().len(), 2);
    assert_eq!(restored.get_schema().as_deref(), Some(r#"{"type":"object"}"#));
    assert_eq!(restored.get_meta("owner").unwrap().as_deref(), Some("tests"));

    // Indexes were rebuilt: both point and range queries work.
    let results = restored
        .select_sql("SELECT * FROM books WHERE id = 2", &ctx)
        .unwrap();
    assert_eq!(results.to_json(0).unwrap()["price"], 20);
    let results = restored
        .select_sql("SELECT * FROM books WHERE price > 15 ORDER BY price", &ctx)
        .unwrap();
    assert_eq!(results.len(), 2);
}

#[test]
fn deleted_rows_stay_deleted_across_restart() {
    let storage = MemStorage::new();
    let ns = populated(storage.clone());
    let ctx = Context::new();
    let mut item = ns.new_item();
    item.from_json(r#"{"id": 2}"#).unwrap();
    ns.delete_item(&mut item, &ctx).unwrap();
    ns.flush_storage(&ctx).unwrap();

    let restored = Namespace::new("books", 0, NamespaceConfigData::default(), Default::default());
    restored.enable_storage(storage, &ctx).unwrap();
    assert_eq!(restored.items_count(), 2);
    assert!(restored
        .select_sql("SELECT * FROM books WHERE id = 2", &ctx)
        .unwrap()
        .is_empty());
}

#[test]
fn lsns_survive_restart_and_keep_increasing() {
    let storage = MemStorage::new();
    let ns = populated(storage.clone());
    let ctx = Context::new();
    let last_before = ns.last_lsn();
    ns.flush_storage(&ctx).unwrap();

    let restored = Namespace::new("books", 0, NamespaceConfigData::default(), Default::default());
    restored.enable_storage(storage, &ctx).unwrap();
    let mut item = restored.new_item();
    item.from_json(r#"{"id": 9, "price": 90}"#).unwrap();
    restored.upsert(&mut item, &ctx).unwrap();
    assert!(restored.last_lsn().raw() > last_before.raw());
}

#[test]
fn storage_failure_flips_namespace_read_only() {
    let storage = MemStorage::new();
    let ns = populated(storage.clone());
    let ctx = Context::new();

    let mut item = ns.new_item();
    item.from_json(r#"{"id": 4, "price": 40}"#).unwrap();
    ns.upsert(&mut item, &ctx).unwrap();

    storage.set_fail_writes(true);
    assert!(ns.flush_storage(&ctx).is_err());

    // Writes now fail with errNamespaceInvalidated; reads keep working.
    let mut item = ns.new_item();
    item.from_json(r#"{"id": 5, "price": 50}"#).unwrap();
    let err = ns.upsert(&mut item, &ctx).unwrap_err();
    assert_eq!(
        kitedb::Error::code_of(&err),
        kitedb::ErrorCode::NamespaceInvalidated
    );
    assert_eq!(
        ns.select_sql("SELECT * FROM books WHERE id = 1", &ctx).unwrap().len(),
        1
    );
}

#[test]
fn sys_records_version_forward() {
    let storage = MemStorage::new();
    let ns = populated(storage.clone());
    let ctx = Context::new();

    // Another schema write must supersede, not duplicate.
    ns.set_schema(r#"{"type":"object","title":"v2"}"#, &ctx).unwrap();
    ns.flush_storage(&ctx).unwrap();

    let restored = Namespace::new("books", 0, NamespaceConfigData::default(), Default::default());
    restored.enable_storage(storage, &ctx).unwrap();
    assert_eq!(
        restored.get_schema().as_deref(),
        Some(r#"{"type":"object","title":"v2"}"#)
    );
}
