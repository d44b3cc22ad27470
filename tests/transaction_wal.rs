//! Transaction commit semantics and WAL framing, observed through the
//! subscription stream.

use kitedb::wal::{WalEntry, WalRecordKind};
use kitedb::{
    Context, ErrorCode, IndexDef, IndexType, KeyValueKind, Namespace, NamespaceConfigData,
    UpdatesFilters, UpdatesObserver, UpdatesObservers,
};
use parking_lot::Mutex;
use std::sync::Arc;

struct Capture {
    records: Mutex<Vec<(WalRecordKind, bool)>>,
}

impl UpdatesObserver for Capture {
    fn on_wal_record(&self, _namespace: &str, entry: &WalEntry) {
        self.records.lock().push((entry.record.kind(), entry.in_transaction));
    }
}

fn ns_with_observer(config: NamespaceConfigData) -> (Namespace, Arc<Capture>) {
    let observers = UpdatesObservers::new();
    let capture = Arc::new(Capture { records: Mutex::new(Vec::new()) });
    observers.add(
        capture.clone(),
        UpdatesFilters { namespaces: None, kinds: None, client_version: 3 },
    );
    let ns = Namespace::new("books", 0, config, observers);
    let ctx = Context::new();
    ns.add_index(IndexDef::new("id", KeyValueKind::Int, IndexType::Hash).pk(), &ctx)
        .unwrap();
    (ns, capture)
}

#[test]
fn partial_commit_keeps_applied_prefix_and_framing() {
    let (ns, capture) = ns_with_observer(NamespaceConfigData::default());
    let ctx = Context::new();

    let mut tx = ns.new_transaction(&ctx).unwrap();
    let mut first = tx.new_item();
    first.from_json(r#"{"id": 1}"#).unwrap();
    tx.insert(first);
    let mut dup = tx.new_item();
    dup.from_json(r#"{"id": 1}"#).unwrap();
    tx.insert(dup);

    let err = ns.commit_transaction(&mut tx, &ctx).unwrap_err();
    assert_eq!(kitedb::Error::code_of(&err), ErrorCode::Conflict);

    // First step persisted and visible.
    let results = ns.select_sql("SELECT * FROM books WHERE id = 1", &ctx).unwrap();
    assert_eq!(results.len(), 1);

    // Stream shows Init, exactly one Upsert, then Commit.
    let records = capture.records.lock();
    let tail: Vec<_> = records
        .iter()
        .skip_while(|(kind, _)| *kind != WalRecordKind::InitTransaction)
        .collect();
    assert_eq!(tail[0].0, WalRecordKind::InitTransaction);
    assert_eq!(tail[1].0, WalRecordKind::ItemUpsert);
    assert_eq!(tail[2].0, WalRecordKind::CommitTransaction);
    assert_eq!(tail.len(), 3);
    assert!(tail.iter().all(|(_, in_tx)| *in_tx));
}

#[test]
fn strict_mode_applies_nothing_on_failure() {
    let config = NamespaceConfigData { tx_partial_commit: false, ..Default::default() };
    let (ns, capture) = ns_with_observer(config);
    let ctx = Context::new();

    let mut tx = ns.new_transaction(&ctx).unwrap();
    let mut first = tx.new_item();
    first.from_json(r#"{"id": 1}"#).unwrap();
    tx.insert(first);
    let mut dup = tx.new_item();
    dup.from_json(r#"{"id": 1}"#).unwrap();
    tx.insert(dup);

    let err = ns.commit_transaction(&mut tx, &ctx).unwrap_err();
    assert_eq!(kitedb::Error::code_of(&err), ErrorCode::Conflict);

    assert_eq!(ns.items_count(), 0);
    let records = capture.records.lock();
    assert!(records
        .iter()
        .all(|(kind, _)| *kind != WalRecordKind::InitTransaction));
}

#[test]
fn successful_commit_frames_every_step() {
    let (ns, capture) = ns_with_observer(NamespaceConfigData::default());
    let ctx = Context::new();

    let mut tx = ns.new_transaction(&ctx).unwrap();
    for id in 1..=3 {
        let mut item = tx.new_item();
        item.from_json(&format!(r#"{{"id": {id}}}"#)).unwrap();
        tx.insert(item);
    }
    ns.commit_transaction(&mut tx, &ctx).unwrap();
    assert_eq!(ns.items_count(), 3);

    let records = capture.records.lock();
    let kinds: Vec<WalRecordKind> = records
        .iter()
        .skip_while(|(kind, _)| *kind != WalRecordKind::InitTransaction)
        .map(|(kind, _)| *kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            WalRecordKind::InitTransaction,
            WalRecordKind::ItemUpsert,
            WalRecordKind::ItemUpsert,
            WalRecordKind::ItemUpsert,
            WalRecordKind::CommitTransaction,
        ]
    );
}

#[test]
fn wal_lsns_strictly_increase_and_replication_tracks_them() {
    let (ns, _) = ns_with_observer(NamespaceConfigData::default());
    let ctx = Context::new();
    for id in 1..=5 {
        let mut item = ns.new_item();
        item.from_json(&format!(r#"{{"id": {id}}}"#)).unwrap();
        ns.upsert(&mut item, &ctx).unwrap();
    }
    let entries = ns.wal_read_from(kitedb::Lsn::EMPTY).unwrap();
    let mut last = -1i64;
    for entry in &entries {
        assert!(entry.lsn.raw() > last);
        last = entry.lsn.raw();
    }
    assert_eq!(ns.replication_state().last_lsn, ns.last_lsn());
}

#[test]
fn rolled_out_wal_window_requests_full_resync() {
    let config = NamespaceConfigData { wal_size: 4, ..Default::default() };
    let (ns, _) = ns_with_observer(config);
    let ctx = Context::new();
    for id in 1..=20 {
        let mut item = ns.new_item();
        item.from_json(&format!(r#"{{"id": {id}}}"#)).unwrap();
        ns.upsert(&mut item, &ctx).unwrap();
    }
    let from_start = ns.wal_read_from(kitedb::Lsn::new(0, 0));
    assert!(from_start.is_none(), "rotated-out LSN must force resync");

    let tail_lsn = ns.last_lsn();
    let tail = ns.wal_read_from(tail_lsn).unwrap();
    assert_eq!(tail.len(), 1);
}

#[test]
fn rollback_discards_everything() {
    let (ns, capture) = ns_with_observer(NamespaceConfigData::default());
    let ctx = Context::new();
    let mut tx = ns.new_transaction(&ctx).unwrap();
    let mut item = tx.new_item();
    item.from_json(r#"{"id": 1}"#).unwrap();
    tx.insert(item);
    tx.rollback();

    assert_eq!(ns.items_count(), 0);
    assert!(capture
        .records
        .lock()
        .iter()
        .all(|(kind, _)| *kind != WalRecordKind::InitTransaction));
}

#[test]
fn update_query_inside_transaction() {
    let (ns, _) = ns_with_observer(NamespaceConfigData::default());
    let ctx = Context::new();
    for id in 1..=3 {
        let mut item = ns.new_item();
        item.from_json(&format!(r#"{{"id": {id}, "flag": 0}}"#)).unwrap();
        ns.upsert(&mut item, &ctx).unwrap();
    }

    let mut tx = ns.new_transaction(&ctx).unwrap();
    tx.modify(kitedb::query::sql::parse("UPDATE books SET flag = 1 WHERE id >= 2").unwrap())
        .unwrap();
    ns.commit_transaction(&mut tx, &ctx).unwrap();

    let flagged = ns
        .select_sql("SELECT * FROM books WHERE flag = 1", &ctx)
        .unwrap();
    assert_eq!(flagged.len(), 2);
}
