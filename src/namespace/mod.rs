//! # Namespace
//!
//! The integration point of the engine: one collection of items with its
//! schema, indexes, WAL ring and storage handle. Owns:
//!
//! - the index vector (dense, then sparse, then composite) plus the
//!   name → position map
//! - the item slot vector with its free list (`items.len()` is the
//!   watermark; a slot is free iff it is `None`)
//! - the tags matcher and payload type, snapshotted into items and
//!   query results
//! - the WAL ring, replication state and subscription observers
//! - the storage handle with pending-write buffering and versioned
//!   sys-records
//!
//! ## Locking
//!
//! One reader-writer lock guards the whole mutable core; a separate
//! storage mutex serializes flushes; an atomic read-only flag turns every
//! later write attempt into `errNamespaceInvalidated` (set on storage
//! failure or teardown). The optimization state machine
//! (`NotOptimized → OptimizingIndexes → OptimizingSortOrders →
//! OptimizationCompleted`) advances on the background routine and resets
//! on any mutation.

mod background;
mod core;
mod persistence;
mod pool;
mod stats;

pub use stats::{NamespaceMemStat, NamespacePerfStat};

use self::core::NamespaceCore;
use self::pool::SyncPool;
use self::stats::PerfCounters;
use crate::config::NamespaceConfigData;
use crate::ctx::Context;
use crate::error::{Error, ErrorCode};
use crate::idset::RowId;
use crate::index::IndexDef;
use crate::item::{Item, ItemModifyMode};
use crate::query::{Query, QueryType, UpdateMode};
use crate::results::{ItemRef, QueryResults, ResultContext};
use crate::selector::{JoinPreSelect, SelectView, Selecter};
use crate::storage::StorageRef;
use crate::txn::{Transaction, TxStep};
use crate::types::Variant;
use crate::wal::{Lsn, ReplicationState, ReplicationStatus, UpdatesObservers, WalEntry, WalRecord};
use eyre::Result;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

const ITEM_POOL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptimizationState {
    NotOptimized = 0,
    OptimizingIndexes = 1,
    OptimizingSortOrders = 2,
    OptimizationCompleted = 3,
}

impl OptimizationState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => OptimizationState::OptimizingIndexes,
            2 => OptimizationState::OptimizingSortOrders,
            3 => OptimizationState::OptimizationCompleted,
            _ => OptimizationState::NotOptimized,
        }
    }
}

pub struct Namespace {
    core: RwLock<NamespaceCore>,
    storage_mtx: Mutex<()>,
    readonly: AtomicBool,
    optimization_state: AtomicU8,
    cancel_commit: Arc<AtomicBool>,
    perf: PerfCounters,
    observers: UpdatesObservers,
    item_pool: SyncPool<Item>,
}

impl Namespace {
    pub fn new(
        name: &str,
        server_id: i16,
        config: NamespaceConfigData,
        observers: UpdatesObservers,
    ) -> Self {
        Self {
            core: RwLock::new(NamespaceCore::new(name.to_string(), config, server_id)),
            storage_mtx: Mutex::new(()),
            readonly: AtomicBool::new(false),
            optimization_state: AtomicU8::new(OptimizationState::NotOptimized as u8),
            cancel_commit: Arc::new(AtomicBool::new(false)),
            perf: PerfCounters::default(),
            observers,
            item_pool: SyncPool::new(ITEM_POOL_CAPACITY),
        }
    }

    pub fn name(&self) -> String {
        self.core.read().name.clone()
    }

    pub fn is_system(&self) -> bool {
        self.core.read().name.starts_with('#')
    }

    pub fn items_count(&self) -> usize {
        self.core.read().live_count()
    }

    pub fn optimization_state(&self) -> OptimizationState {
        OptimizationState::from_u8(self.optimization_state.load(Ordering::Acquire))
    }

    /// Attaches storage and hydrates payload type, indexes, replication
    /// state, rows, meta and schema from it.
    pub fn enable_storage(&self, storage: StorageRef, ctx: &Context) -> Result<()> {
        ctx.check()?;
        let mut core = self.write_lock()?;
        core.storage = Some(storage);
        core.load_from_storage()?;
        Ok(())
    }

    /// Marks the namespace read-only and drops the storage handle. Reads
    /// keep working on the in-memory state.
    pub fn close_storage(&self, ctx: &Context) -> Result<()> {
        ctx.check()?;
        let _storage_guard = self.storage_mtx.lock();
        let mut core = self.core.write();
        if core.repl.last_lsn != core.persisted_repl_lsn {
            core.save_replication_state();
            core.persisted_repl_lsn = core.repl.last_lsn;
        }
        let flush_result = core.flush_pending();
        core.storage = None;
        self.readonly.store(true, Ordering::Release);
        flush_result
    }

    // ---- locking ------------------------------------------------------

    fn write_lock(&self) -> Result<RwLockWriteGuard<'_, NamespaceCore>> {
        if self.readonly.load(Ordering::Acquire) {
            return Err(Error::namespace_invalidated().into());
        }
        Ok(self.core.write())
    }

    fn read_lock(&self) -> RwLockReadGuard<'_, NamespaceCore> {
        self.core.read()
    }

    /// Any mutation invalidates built sort orders and cancels an
    /// in-flight optimization pass.
    fn mark_updated(&self) {
        self.optimization_state
            .store(OptimizationState::NotOptimized as u8, Ordering::Release);
        self.cancel_commit.store(true, Ordering::Release);
    }

    fn publish(&self, namespace: &str, entry: &WalEntry) {
        self.observers.publish(namespace, entry);
    }

    fn wal_append(
        &self,
        core: &mut NamespaceCore,
        record: WalRecord,
        in_transaction: bool,
    ) -> Lsn {
        let lsn = core.wal.add(record.clone(), in_transaction);
        core.repl.last_lsn = lsn;
        if !core.scratch {
            let entry = WalEntry { lsn, in_transaction, record };
            self.publish(&core.name.clone(), &entry);
        }
        lsn
    }

    // ---- items --------------------------------------------------------

    /// An item bound to the current payload type and tags matcher,
    /// recycled through the namespace pool.
    pub fn new_item(&self) -> Item {
        let core = self.read_lock();
        match self.item_pool.get() {
            Some(mut item) => {
                item.reset(core.payload_type.clone(), core.tags_matcher.clone());
                item
            }
            None => Item::new(core.payload_type.clone(), core.tags_matcher.clone()),
        }
    }

    pub fn to_pool(&self, item: Item) {
        self.item_pool.put(item);
    }

    pub fn insert(&self, item: &mut Item, ctx: &Context) -> Result<RowId> {
        ctx.check()?;
        let mut core = self.write_lock()?;
        let id = self
            .do_modify_item(&mut core, item, ItemModifyMode::Insert, false)?
            .expect("insert always yields an id");
        Ok(id)
    }

    pub fn update(&self, item: &mut Item, ctx: &Context) -> Result<Option<RowId>> {
        ctx.check()?;
        let mut core = self.write_lock()?;
        self.do_modify_item(&mut core, item, ItemModifyMode::Update, false)
    }

    pub fn upsert(&self, item: &mut Item, ctx: &Context) -> Result<RowId> {
        ctx.check()?;
        let mut core = self.write_lock()?;
        let id = self
            .do_modify_item(&mut core, item, ItemModifyMode::Upsert, false)?
            .expect("upsert always yields an id");
        Ok(id)
    }

    pub fn delete_item(&self, item: &mut Item, ctx: &Context) -> Result<Option<RowId>> {
        ctx.check()?;
        let mut core = self.write_lock()?;
        self.do_modify_item(&mut core, item, ItemModifyMode::Delete, false)
    }

    fn do_modify_item(
        &self,
        core: &mut NamespaceCore,
        item: &mut Item,
        mode: ItemModifyMode,
        in_transaction: bool,
    ) -> Result<Option<RowId>> {
        // Fold tags the item created into the namespace matcher; a foreign
        // epoch surfaces as errTagsMissmatch for the caller to rebuild.
        if core.tags_matcher.try_merge(item.tags_snapshot())? {
            core.save_tags_matcher();
        }
        self.apply_precepts(core, item)?;

        let doc = item
            .doc()
            .cloned()
            .ok_or_else(|| Error::logic("item holds no document"))?;
        let tuple = item.payload().tuple().to_vec();
        let columns = crate::cjson::extract_payload_fields(&doc, &core.payload_type)?;
        let mut payload =
            crate::payload::PayloadValue::new(core.payload_type.num_fields(), tuple.clone());
        for (idx, values) in columns.into_iter().enumerate().skip(1) {
            payload.set_field(idx, values);
        }

        let existing = core.find_by_pk(&payload)?;

        match mode {
            ItemModifyMode::Insert => {
                if existing.is_some() {
                    return Err(Error::conflict(format!(
                        "document with the same PK already exists in '{}'",
                        core.name
                    ))
                    .into());
                }
            }
            ItemModifyMode::Update | ItemModifyMode::Delete => {
                if existing.is_none() {
                    return Ok(None);
                }
            }
            ItemModifyMode::Upsert => {}
        }

        if mode == ItemModifyMode::Delete {
            let id = existing.expect("checked above");
            self.do_delete(core, id, in_transaction)?;
            return Ok(Some(id));
        }

        let id = existing.unwrap_or_else(|| core.create_item_slot());
        let old = core.items[id as usize].clone();
        let old_doc = match &old {
            Some(old_payload) => Some(crate::cjson::decode(old_payload.tuple(), &core.tags_matcher)?),
            None => None,
        };

        core.update_indexes(
            id,
            old.as_ref().zip(old_doc.as_ref()),
            &mut payload,
            &doc,
        )?;

        let lsn = self.wal_append(core, WalRecord::ItemUpsert { cjson: tuple }, in_transaction);
        payload.set_lsn(lsn.raw());
        core.queue_item_write(id, &payload);
        core.items[id as usize] = Some(payload);

        if !core.scratch {
            self.perf.hit_update();
            self.mark_updated();
        }
        Ok(Some(id))
    }

    fn do_delete(&self, core: &mut NamespaceCore, id: RowId, in_transaction: bool) -> Result<()> {
        let Some(payload) = core.items[id as usize].clone() else {
            return Ok(());
        };
        core.unindex(id)?;
        core.items[id as usize] = None;
        core.free.push(id);
        core.queue_item_delete(id);
        self.wal_append(
            core,
            WalRecord::ItemDelete { cjson: payload.tuple().to_vec() },
            in_transaction,
        );
        if !core.scratch {
            self.perf.hit_update();
            self.mark_updated();
        }
        Ok(())
    }

    fn apply_precepts(&self, core: &mut NamespaceCore, item: &mut Item) -> Result<()> {
        if item.precepts().is_empty() {
            return Ok(());
        }
        let precepts = item.precepts().to_vec();
        for precept in precepts {
            let Some((field, func)) = precept.split_once('=') else {
                return Err(Error::params(format!("malformed precept '{precept}'")).into());
            };
            let value = match func.trim() {
                "serial()" => serde_json::Value::from(self.serial_next(core, field.trim())),
                "now()" => serde_json::Value::from(unix_now_secs()),
                other => {
                    return Err(Error::params(format!("unknown precept function '{other}'")).into())
                }
            };
            item.patch_field(field.trim(), value)?;
        }
        if core.tags_matcher.try_merge(item.tags_snapshot())? {
            core.save_tags_matcher();
        }
        Ok(())
    }

    fn serial_next(&self, core: &mut NamespaceCore, field: &str) -> i64 {
        let key = format!("_SERIAL_{field}");
        let next = core
            .meta_cache
            .get(&key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0)
            + 1;
        core.meta_cache.insert(key.clone(), next.to_string());
        core.queue_meta_write(&key, &next.to_string());
        next
    }

    /// Monotonic per-field counter backed by meta storage.
    pub fn get_serial(&self, field: &str) -> Result<i64> {
        let mut core = self.write_lock()?;
        Ok(self.serial_next(&mut core, field))
    }

    // ---- queries ------------------------------------------------------

    pub fn select_sql(&self, sql: &str, ctx: &Context) -> Result<QueryResults> {
        let query = crate::query::sql::parse(sql)?;
        self.select(&query, ctx)
    }

    pub fn select(&self, query: &Query, ctx: &Context) -> Result<QueryResults> {
        self.select_with_joins(query, &[], ctx)
    }

    pub fn select_with_joins(
        &self,
        query: &Query,
        joins: &[JoinPreSelect],
        ctx: &Context,
    ) -> Result<QueryResults> {
        match query.query_type {
            QueryType::Select => self.do_select(query, joins, ctx),
            QueryType::Update => self.update_by_query(query, ctx),
            QueryType::Delete => self.delete_by_query(query, ctx),
            QueryType::Truncate => {
                self.truncate(ctx)?;
                Ok(QueryResults::new())
            }
        }
    }

    fn do_select(
        &self,
        query: &Query,
        joins: &[JoinPreSelect],
        ctx: &Context,
    ) -> Result<QueryResults> {
        ctx.check()?;
        self.ensure_fulltext_built(query, ctx)?;

        let core = self.read_lock();
        let view = self.view_of(&core);
        let mut results = Selecter::select(&view, query, joins, ctx)?;

        // UNION ALL sub-queries on the same namespace; cross-namespace
        // merges are stitched by the serving layer via `merge_from`.
        for merge in &query.merges {
            if merge.namespace != core.name {
                return Err(Error::params(format!(
                    "merge query targets '{}'; merge across namespaces is assembled by the caller",
                    merge.namespace
                ))
                .into());
            }
            let sub = Selecter::select(&view, merge, &[], ctx)?;
            results.merge_from(sub);
        }
        self.perf.hit_select();
        Ok(results)
    }

    /// FT engines build lazily: a select that needs an uncommitted FT
    /// index upgrades to the write lock and commits it first.
    fn ensure_fulltext_built(&self, query: &Query, ctx: &Context) -> Result<()> {
        let pending: Vec<usize> = {
            let core = self.read_lock();
            query
                .condition_fields()
                .into_iter()
                .filter_map(|f| core.index_by_name.get(f).copied())
                .filter(|&pos| core.indexes[pos].fulltext_needs_commit())
                .collect()
        };
        if pending.is_empty() {
            return Ok(());
        }
        let mut core = self.write_lock()?;
        for pos in pending {
            core.indexes[pos].commit(ctx)?;
        }
        Ok(())
    }

    fn view_of<'a>(&self, core: &'a NamespaceCore) -> SelectView<'a> {
        SelectView {
            namespace: &core.name,
            payload_type: &core.payload_type,
            tags_matcher: &core.tags_matcher,
            indexes: &core.indexes,
            index_by_name: &core.index_by_name,
            items: &core.items,
            schema: core.schema.as_deref(),
            sort_orders_built: self.optimization_state()
                == OptimizationState::OptimizationCompleted,
        }
    }

    fn update_by_query(&self, query: &Query, ctx: &Context) -> Result<QueryResults> {
        ctx.check()?;
        // Plan under the read lock, apply under the write lock. The
        // upgrade is non-atomic; liveness is rechecked per row.
        let ids: Vec<RowId> = {
            let core = self.read_lock();
            let view = self.view_of(&core);
            let mut probe = query.clone();
            probe.query_type = QueryType::Select;
            Selecter::select(&view, &probe, &[], ctx)?
                .iter()
                .map(|item| item.id)
                .collect()
        };

        let mut core = self.write_lock()?;
        self.wal_append(
            &mut core,
            WalRecord::UpdateQuery { query: query.serialize() },
            false,
        );
        let mut results = QueryResults::new();
        let nsid = results.add_context(self.result_context(&core, query));
        for id in ids {
            ctx.check()?;
            if !core.exists(id) {
                continue;
            }
            self.apply_update_entries(&mut core, id, query)?;
            if let Some(payload) = &core.items[id as usize] {
                results.items.push(ItemRef {
                    id,
                    nsid,
                    rank: 0.0,
                    value: payload.clone(),
                    joined: Vec::new(),
                });
            }
        }
        results.total_count = results.items.len();
        Ok(results)
    }

    fn apply_update_entries(
        &self,
        core: &mut NamespaceCore,
        id: RowId,
        query: &Query,
    ) -> Result<()> {
        let old = core.items[id as usize]
            .clone()
            .ok_or_else(|| Error::logic("row vanished during update"))?;
        let old_doc = crate::cjson::decode(old.tuple(), &core.tags_matcher)?;

        let mut doc = old_doc.clone();
        {
            let serde_json::Value::Object(map) = &mut doc else {
                return Err(Error::logic("row tuple is not an object").into());
            };
            for entry in &query.update_fields {
                match entry.mode {
                    UpdateMode::SetField => {
                        map.insert(entry.field.clone(), values_to_json(&entry.values));
                    }
                    UpdateMode::DropField => {
                        map.remove(&entry.field);
                    }
                }
            }
        }

        let tuple = crate::cjson::encode(&doc, &mut core.tags_matcher)?;
        let columns = crate::cjson::extract_payload_fields(&doc, &core.payload_type)?;
        let mut payload =
            crate::payload::PayloadValue::new(core.payload_type.num_fields(), tuple.clone());
        for (idx, values) in columns.into_iter().enumerate().skip(1) {
            payload.set_field(idx, values);
        }

        core.update_indexes(id, Some((&old, &old_doc)), &mut payload, &doc)?;
        let lsn = self.wal_append(core, WalRecord::ItemUpsert { cjson: tuple }, false);
        payload.set_lsn(lsn.raw());
        core.queue_item_write(id, &payload);
        core.items[id as usize] = Some(payload);
        if !core.scratch {
            self.perf.hit_update();
            self.mark_updated();
        }
        Ok(())
    }

    fn delete_by_query(&self, query: &Query, ctx: &Context) -> Result<QueryResults> {
        ctx.check()?;
        let ids: Vec<RowId> = {
            let core = self.read_lock();
            let view = self.view_of(&core);
            let mut probe = query.clone();
            probe.query_type = QueryType::Select;
            Selecter::select(&view, &probe, &[], ctx)?
                .iter()
                .map(|item| item.id)
                .collect()
        };

        let mut core = self.write_lock()?;
        self.wal_append(
            &mut core,
            WalRecord::UpdateQuery { query: query.serialize() },
            false,
        );
        let mut results = QueryResults::new();
        let nsid = results.add_context(self.result_context(&core, query));
        for id in ids {
            ctx.check()?;
            if !core.exists(id) {
                continue;
            }
            if let Some(payload) = &core.items[id as usize] {
                results.items.push(ItemRef {
                    id,
                    nsid,
                    rank: 0.0,
                    value: payload.clone(),
                    joined: Vec::new(),
                });
            }
            self.do_delete(&mut core, id, false)?;
        }
        results.total_count = results.items.len();
        Ok(results)
    }

    fn result_context(&self, core: &NamespaceCore, query: &Query) -> ResultContext {
        ResultContext {
            namespace: core.name.clone(),
            payload_type: core.payload_type.clone(),
            tags_matcher: core.tags_matcher.clone(),
            fields_filter: query.select_filter.clone(),
            schema: core.schema.clone(),
        }
    }

    pub fn truncate(&self, ctx: &Context) -> Result<()> {
        ctx.check()?;
        let mut core = self.write_lock()?;
        let ids: Vec<RowId> = (0..core.items.len() as RowId).filter(|&id| core.exists(id)).collect();
        for id in ids {
            core.queue_item_delete(id);
        }
        core.items.clear();
        core.free.clear();
        let defs: Vec<IndexDef> = core
            .indexes
            .iter()
            .skip(1)
            .map(|idx| idx.def().clone())
            .collect();
        core.indexes.truncate(1);
        core.sparse_count = 0;
        core.payload_type = crate::payload::PayloadType::new();
        for def in defs {
            core.add_index_definition(def)?;
        }
        self.wal_append(&mut core, WalRecord::Truncate, false);
        self.mark_updated();
        Ok(())
    }

    /// Bulk replace: drop every row, then apply the given items.
    pub fn refill(&self, items: Vec<Item>, ctx: &Context) -> Result<()> {
        self.truncate(ctx)?;
        let mut core = self.write_lock()?;
        for mut item in items {
            ctx.check()?;
            self.do_modify_item(&mut core, &mut item, ItemModifyMode::Upsert, false)?;
        }
        Ok(())
    }

    // ---- DDL ----------------------------------------------------------

    pub fn add_index(&self, def: IndexDef, ctx: &Context) -> Result<()> {
        ctx.check()?;
        def.validate()?;
        let mut core = self.write_lock()?;
        if let Some(&pos) = core.index_by_name.get(&def.name) {
            if *core.indexes[pos].def() == def {
                return Ok(());
            }
            return Err(Error::conflict(format!(
                "index '{}' already exists with different settings",
                def.name
            ))
            .into());
        }
        self.do_add_index(&mut core, def.clone())?;
        self.wal_append(&mut core, WalRecord::IndexAdd { def }, false);
        core.save_indexes();
        self.mark_updated();
        Ok(())
    }

    pub fn update_index(&self, def: IndexDef, ctx: &Context) -> Result<()> {
        ctx.check()?;
        def.validate()?;
        let mut core = self.write_lock()?;
        let Some(&pos) = core.index_by_name.get(&def.name) else {
            return Err(Error::not_found(format!("index '{}' not found", def.name)).into());
        };
        if *core.indexes[pos].def() == def {
            return Ok(());
        }
        self.do_drop_index(&mut core, &def.name)?;
        self.do_add_index(&mut core, def.clone())?;
        self.wal_append(&mut core, WalRecord::IndexUpdate { def }, false);
        core.save_indexes();
        self.mark_updated();
        Ok(())
    }

    pub fn drop_index(&self, name: &str, ctx: &Context) -> Result<()> {
        ctx.check()?;
        let mut core = self.write_lock()?;
        let def = {
            let Some(&pos) = core.index_by_name.get(name) else {
                return Err(Error::not_found(format!("index '{name}' not found")).into());
            };
            core.indexes[pos].def().clone()
        };
        self.do_drop_index(&mut core, name)?;
        self.wal_append(&mut core, WalRecord::IndexDrop { def }, false);
        core.save_indexes();
        self.mark_updated();
        Ok(())
    }

    /// Adds and backfills an index; all-or-nothing. Every row's keys are
    /// extracted and converted before any state changes, so a type
    /// mismatch or PK duplicate leaves the namespace untouched.
    fn do_add_index(&self, core: &mut NamespaceCore, def: IndexDef) -> Result<()> {
        if def.is_composite() {
            for component in &def.json_paths {
                if core.payload_type.field_by_json_path(component).is_none() {
                    return Err(Error::params(format!(
                        "composite index '{}' component '{}' is not an indexed field",
                        def.name, component
                    ))
                    .into());
                }
            }
            let pos = core.add_index_definition(def)?;
            for id in 0..core.items.len() as RowId {
                if let Some(payload) = core.items[id as usize].clone() {
                    let key = core.composite_key(&payload, pos);
                    core.indexes[pos].upsert(&key, id)?;
                }
            }
            return Ok(());
        }

        // Validation pass over every live row.
        let index = crate::index::Index::new(def.clone())?;
        let path = def.json_paths.first().cloned().unwrap_or_else(|| def.name.clone());
        let mut extracted: Vec<(RowId, crate::types::VariantArray)> = Vec::new();
        let mut pk_seen = hashbrown::HashSet::new();
        for id in 0..core.items.len() as RowId {
            let Some(payload) = &core.items[id as usize] else { continue };
            let doc = crate::cjson::decode(payload.tuple(), &core.tags_matcher)?;
            let values =
                crate::cjson::extract_field_values(&doc, &path, def.field_type, def.opts.array)?;
            let values = index.prepare_keys(&values)?;
            if def.opts.pk {
                let Some(key) = values.first() else {
                    return Err(Error::params(format!(
                        "row {id} has no value for PK index '{}'",
                        def.name
                    ))
                    .into());
                };
                if !pk_seen.insert(key.clone()) {
                    return Err(Error::conflict(format!(
                        "PK index '{}' would not be unique",
                        def.name
                    ))
                    .into());
                }
            }
            extracted.push((id, values));
        }

        // Apply.
        let sparse = def.opts.sparse;
        let array = def.opts.array;
        let pos = core.add_index_definition(def)?;
        if !sparse {
            for slot in core.items.iter_mut().flatten() {
                slot.resize_fields(core.payload_type.num_fields());
            }
        }
        for (id, values) in extracted {
            let stored = core.indexes[pos].upsert_array(&values, id, sparse || array)?;
            if !sparse {
                if let Some(payload) = core.items[id as usize].as_mut() {
                    payload.set_field(pos, if stored.is_empty() { values } else { stored });
                }
            }
        }
        Ok(())
    }

    fn do_drop_index(&self, core: &mut NamespaceCore, name: &str) -> Result<()> {
        let pos = *core
            .index_by_name
            .get(name)
            .ok_or_else(|| Error::not_found(format!("index '{name}' not found")))?;
        if pos == 0 {
            return Err(Error::logic("can't drop the tuple index").into());
        }
        let first_sparse = core.first_sparse_pos();
        let first_composite = core.first_composite_pos();

        for composite in &core.indexes[first_composite..] {
            if composite.def().json_paths.iter().any(|p| p == name) {
                return Err(Error::logic(format!(
                    "index '{name}' is referenced by composite index '{}'",
                    composite.name()
                ))
                .into());
            }
        }

        if pos < first_sparse {
            core.payload_type.drop_field(name)?;
            for slot in core.items.iter_mut().flatten() {
                slot.remove_field(pos);
            }
        } else if pos < first_composite {
            core.sparse_count -= 1;
        }
        core.indexes.remove(pos);
        core.reindex_names();
        Ok(())
    }

    // ---- schema & meta ------------------------------------------------

    /// Stores the user schema blob byte-for-byte.
    pub fn set_schema(&self, schema: &str, ctx: &Context) -> Result<()> {
        ctx.check()?;
        let mut core = self.write_lock()?;
        core.schema = Some(schema.to_string());
        core.save_schema();
        self.wal_append(&mut core, WalRecord::SetSchema { schema: schema.to_string() }, false);
        Ok(())
    }

    pub fn get_schema(&self) -> Option<String> {
        self.read_lock().schema.clone()
    }

    pub fn put_meta(&self, key: &str, value: &str, ctx: &Context) -> Result<()> {
        ctx.check()?;
        let mut core = self.write_lock()?;
        core.meta_cache.insert(key.to_string(), value.to_string());
        core.queue_meta_write(key, value);
        self.wal_append(
            &mut core,
            WalRecord::PutMeta { key: key.to_string(), value: value.to_string() },
            false,
        );
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let core = self.read_lock();
        if let Some(value) = core.meta_cache.get(key) {
            return Ok(Some(value.clone()));
        }
        if let Some(storage) = &core.storage {
            let raw = storage.read(format!("M{key}").as_bytes())?;
            return Ok(raw.map(|v| String::from_utf8_lossy(&v).into_owned()));
        }
        Ok(None)
    }

    pub fn enum_meta(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read_lock().meta_cache.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn rename(&self, to: &str, ctx: &Context) -> Result<()> {
        ctx.check()?;
        let mut core = self.write_lock()?;
        core.name = to.to_string();
        self.wal_append(&mut core, WalRecord::Rename { to: to.to_string() }, false);
        Ok(())
    }

    // ---- transactions -------------------------------------------------

    pub fn new_transaction(&self, ctx: &Context) -> Result<Transaction> {
        ctx.check()?;
        let core = self.read_lock();
        Ok(Transaction::new(
            core.name.clone(),
            core.payload_type.clone(),
            core.tags_matcher.clone(),
        ))
    }

    /// Applies the staged steps under one write-lock critical section,
    /// framed by `InitTransaction` / `CommitTransaction` WAL records.
    ///
    /// With `tx_partial_commit` (the default) a failing step aborts the
    /// remainder but keeps the applied prefix; the WAL framing stays
    /// balanced either way. With the flag off, the whole transaction is
    /// validated against a scratch copy of the namespace first, so a
    /// failing transaction applies nothing and emits nothing.
    pub fn commit_transaction(&self, tx: &mut Transaction, ctx: &Context) -> Result<()> {
        ctx.check()?;
        if tx.namespace() != self.read_lock().name {
            return Err(Error::params("transaction belongs to another namespace").into());
        }
        let mut core = self.write_lock()?;
        let mut steps = tx.take_steps();

        if !core.config.tx_partial_commit {
            self.validate_transaction(&core, &mut steps, ctx)?;
        }

        self.wal_append(&mut core, WalRecord::InitTransaction, true);
        let mut first_error = None;
        for step in &mut steps {
            if let Err(err) = ctx.check() {
                first_error = Some(err);
                break;
            }
            let result = match step {
                TxStep::ModifyItem { mode, item } => {
                    let mut res = self.do_modify_item(&mut core, item, *mode, true).map(|_| ());
                    // Stale tags snapshots rebuild transparently.
                    let stale_tags = matches!(
                        &res,
                        Err(err) if Error::code_of(err) == ErrorCode::TagsMismatch
                    );
                    if stale_tags
                        && item
                            .rebuild_with(core.payload_type.clone(), core.tags_matcher.clone())
                            .is_ok()
                    {
                        res = self.do_modify_item(&mut core, item, *mode, true).map(|_| ());
                    }
                    res
                }
                TxStep::ModifyQuery { query } => self.apply_query_in_tx(&mut core, query, ctx),
            };
            if let Err(err) = result {
                first_error = Some(err);
                break;
            }
        }
        self.wal_append(&mut core, WalRecord::CommitTransaction, true);
        core.save_replication_state();

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Dry run against a deep copy of the namespace state; errors surface
    /// before anything real is touched.
    fn validate_transaction(
        &self,
        core: &NamespaceCore,
        steps: &mut [TxStep],
        ctx: &Context,
    ) -> Result<()> {
        let mut scratch = core.scratch_copy();
        for step in steps.iter_mut() {
            ctx.check()?;
            match step {
                TxStep::ModifyItem { mode, item } => {
                    let mut probe = item.clone();
                    self.do_modify_item(&mut scratch, &mut probe, *mode, true)?;
                }
                TxStep::ModifyQuery { query } => {
                    self.apply_query_in_tx(&mut scratch, query, ctx)?;
                }
            }
        }
        Ok(())
    }

    fn apply_query_in_tx(
        &self,
        core: &mut NamespaceCore,
        query: &Query,
        ctx: &Context,
    ) -> Result<()> {
        let ids: Vec<RowId> = {
            let view = self.view_of(core);
            let mut probe = query.clone();
            probe.query_type = QueryType::Select;
            Selecter::select(&view, &probe, &[], ctx)?
                .iter()
                .map(|item| item.id)
                .collect()
        };
        self.wal_append(core, WalRecord::UpdateQuery { query: query.serialize() }, true);
        for id in ids {
            if !core.exists(id) {
                continue;
            }
            match query.query_type {
                QueryType::Update => self.apply_update_entries(core, id, query)?,
                QueryType::Delete => self.do_delete(core, id, true)?,
                _ => return Err(Error::params("only UPDATE/DELETE run inside transactions").into()),
            }
        }
        Ok(())
    }

    // ---- replication --------------------------------------------------

    pub fn replication_state(&self) -> ReplicationState {
        self.read_lock().repl.clone()
    }

    pub fn set_slave_mode(&self, slave: bool, ctx: &Context) -> Result<()> {
        ctx.check()?;
        let mut core = self.write_lock()?;
        core.repl.slave_mode = slave;
        core.save_replication_state();
        Ok(())
    }

    pub fn set_replication_status(
        &self,
        status: ReplicationStatus,
        error: Option<String>,
        ctx: &Context,
    ) -> Result<()> {
        ctx.check()?;
        let mut core = self.write_lock()?;
        core.repl.status = status;
        core.repl.error = error;
        core.save_replication_state();
        Ok(())
    }

    /// WAL records from `from` forward, or `None` when the slave must
    /// full-resync because the ring rotated past its LSN.
    pub fn wal_read_from(&self, from: Lsn) -> Option<Vec<WalEntry>> {
        self.read_lock().wal.read_from(from)
    }

    pub fn last_lsn(&self) -> Lsn {
        self.read_lock().wal.last_lsn()
    }

    // ---- stats --------------------------------------------------------

    pub fn mem_stat(&self) -> NamespaceMemStat {
        let core = self.read_lock();
        let data_size = core
            .items
            .iter()
            .flatten()
            .map(crate::payload::PayloadValue::heap_size)
            .sum();
        NamespaceMemStat {
            name: core.name.clone(),
            items_count: core.live_count(),
            items_capacity: core.items.len(),
            data_size,
            wal_records: core.wal.len(),
            indexes: core.indexes.iter().skip(1).map(|idx| idx.mem_stat()).collect(),
        }
    }

    pub fn perf_stat(&self) -> NamespacePerfStat {
        self.perf.snapshot()
    }

    pub fn reset_perf_stat(&self) {
        self.perf.reset();
    }

    pub fn index_definitions(&self) -> Vec<IndexDef> {
        self.read_lock()
            .indexes
            .iter()
            .skip(1)
            .map(|idx| idx.def().clone())
            .collect()
    }

    pub fn config(&self) -> NamespaceConfigData {
        self.read_lock().config.clone()
    }

    pub fn set_config(&self, config: NamespaceConfigData) -> Result<()> {
        let mut core = self.write_lock()?;
        if config.wal_size != core.config.wal_size {
            core.wal.resize(config.wal_size);
        }
        core.config = config;
        Ok(())
    }
}

fn values_to_json(values: &crate::types::VariantArray) -> serde_json::Value {
    fn one(v: &Variant) -> serde_json::Value {
        match v {
            Variant::Null => serde_json::Value::Null,
            Variant::Bool(b) => serde_json::Value::from(*b),
            Variant::Int(i) => serde_json::Value::from(*i),
            Variant::Int64(i) => serde_json::Value::from(*i),
            Variant::Double(d) => serde_json::Value::from(*d),
            Variant::String(s) => serde_json::Value::from(s.as_str()),
            Variant::Point(p) => serde_json::Value::from(vec![p.x, p.y]),
            Variant::Composite(parts) => {
                serde_json::Value::Array(parts.iter().map(one).collect())
            }
        }
    }
    match values.len() {
        0 => serde_json::Value::Null,
        1 => one(&values[0]),
        _ => serde_json::Value::Array(values.iter().map(one).collect()),
    }
}

fn unix_now_secs() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
