//! Mutable namespace state and the item modification protocol. Everything
//! here runs under the namespace write lock; the public wrappers live in
//! the module root.

use crate::config::NamespaceConfigData;
use crate::ctx::Context;
use crate::error::Error;
use crate::idset::RowId;
use crate::index::{Index, IndexDef, SelectKeyResult, SelectOpts};
use crate::payload::{PayloadType, PayloadValue};
use crate::tags::TagsMatcher;
use crate::types::{KeyValueKind, Variant, VariantArray};
use crate::wal::{ReplicationState, WalTracker};
use eyre::Result;
use hashbrown::HashMap;

pub(crate) enum StorageOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SysRecordVersions {
    pub indexes: u64,
    pub tags: u64,
    pub replication: u64,
    pub schema: u64,
}

pub(crate) struct NamespaceCore {
    pub name: String,
    pub payload_type: PayloadType,
    pub tags_matcher: TagsMatcher,
    /// Position `i < payload_type.num_fields()` is the dense index of
    /// payload field `i` (position 0 is the tuple placeholder); sparse
    /// indexes follow, composite indexes last.
    pub indexes: Vec<Index>,
    pub index_by_name: HashMap<String, usize>,
    pub sparse_count: usize,
    pub items: Vec<Option<PayloadValue>>,
    pub free: Vec<RowId>,
    pub meta_cache: HashMap<String, String>,
    pub schema: Option<String>,
    pub wal: WalTracker,
    pub repl: ReplicationState,
    pub storage: Option<crate::storage::StorageRef>,
    pub pending: Vec<StorageOp>,
    pub sys_versions: SysRecordVersions,
    pub config: NamespaceConfigData,
    /// Last LSN the replication sys-record was persisted with; flush
    /// rewrites the record only when the WAL advanced past it.
    pub persisted_repl_lsn: crate::wal::Lsn,
    /// Set on dry-run copies used for transaction validation; suppresses
    /// observer publishing and perf accounting.
    pub scratch: bool,
}

impl NamespaceCore {
    pub fn new(name: String, config: NamespaceConfigData, server_id: i16) -> Self {
        let payload_type = PayloadType::new();
        let tuple_index = Index::new(IndexDef::new(
            crate::payload::TUPLE_FIELD,
            KeyValueKind::String,
            crate::index::IndexType::Store,
        ))
        .expect("tuple index definition is static");
        let mut index_by_name = HashMap::new();
        index_by_name.insert(tuple_index.name().to_string(), 0);
        Self {
            name,
            payload_type,
            tags_matcher: TagsMatcher::new(),
            indexes: vec![tuple_index],
            index_by_name,
            sparse_count: 0,
            items: Vec::new(),
            free: Vec::new(),
            meta_cache: HashMap::new(),
            schema: None,
            wal: WalTracker::new(config.wal_size, server_id),
            repl: ReplicationState::default(),
            storage: None,
            pending: Vec::new(),
            sys_versions: SysRecordVersions::default(),
            config,
            persisted_repl_lsn: crate::wal::Lsn::EMPTY,
            scratch: false,
        }
    }

    /// Deep copy of the mutable state for transaction dry runs. Storage is
    /// detached and the WAL is a throwaway ring, so nothing the copy does
    /// leaks out.
    pub fn scratch_copy(&self) -> NamespaceCore {
        NamespaceCore {
            name: self.name.clone(),
            payload_type: self.payload_type.clone(),
            tags_matcher: self.tags_matcher.clone(),
            indexes: self.indexes.clone(),
            index_by_name: self.index_by_name.clone(),
            sparse_count: self.sparse_count,
            items: self.items.clone(),
            free: self.free.clone(),
            meta_cache: self.meta_cache.clone(),
            schema: self.schema.clone(),
            wal: WalTracker::new(64, self.wal.server_id()),
            repl: self.repl.clone(),
            storage: None,
            pending: Vec::new(),
            sys_versions: SysRecordVersions::default(),
            config: self.config.clone(),
            persisted_repl_lsn: crate::wal::Lsn::EMPTY,
            scratch: true,
        }
    }

    pub fn first_sparse_pos(&self) -> usize {
        self.payload_type.num_fields()
    }

    pub fn first_composite_pos(&self) -> usize {
        self.payload_type.num_fields() + self.sparse_count
    }

    pub fn live_count(&self) -> usize {
        self.items.len() - self.free.len()
    }

    pub fn exists(&self, id: RowId) -> bool {
        self.items
            .get(id as usize)
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    pub fn pk_pos(&self) -> Option<usize> {
        self.indexes.iter().position(|idx| idx.def().opts.pk)
    }

    /// Allocates a row slot, reusing the free list before growing the
    /// watermark.
    pub fn create_item_slot(&mut self) -> RowId {
        match self.free.pop() {
            Some(id) => id,
            None => {
                self.items.push(None);
                (self.items.len() - 1) as RowId
            }
        }
    }

    pub fn find_by_pk(&self, payload: &PayloadValue) -> Result<Option<RowId>> {
        let Some(pk_pos) = self.pk_pos() else {
            return Err(Error::params(format!("namespace '{}' has no PK index", self.name)).into());
        };
        let keys = payload.field(pk_pos);
        if keys.len() != 1 {
            return Err(Error::params(format!(
                "PK field '{}' must hold exactly one value, got {}",
                self.indexes[pk_pos].name(),
                keys.len()
            ))
            .into());
        }
        let opts = SelectOpts { items_count: self.live_count(), ..Default::default() };
        match self.indexes[pk_pos].select_key(
            keys,
            crate::query::CondType::Eq,
            opts,
            &Context::new(),
        )? {
            SelectKeyResult::Ids(sets) => {
                Ok(sets.iter().flat_map(|s| s.iter()).next().copied())
            }
            _ => Err(Error::logic("PK index did not produce id sets").into()),
        }
    }

    /// Sparse index keys of a row, extracted from the document by json
    /// path and converted to the index key kind.
    pub fn sparse_keys(
        &self,
        doc: &serde_json::Value,
        index_pos: usize,
    ) -> Result<VariantArray> {
        let index = &self.indexes[index_pos];
        let path = index
            .def()
            .json_paths
            .first()
            .map(String::as_str)
            .unwrap_or_else(|| index.name());
        let mut cur = doc;
        for seg in path.split('.') {
            match cur.as_object().and_then(|m| m.get(seg)) {
                Some(next) => cur = next,
                None => return Ok(VariantArray::new()),
            }
        }
        let mut out = VariantArray::new();
        collect_sparse(cur, index.key_kind(), &mut out)?;
        Ok(out)
    }

    /// Composite tuple of a row, built from the dense payload columns.
    /// Missing components become `Null` so every row stays indexed.
    pub fn composite_key(&self, payload: &PayloadValue, index_pos: usize) -> Variant {
        let parts: Vec<Variant> = self.indexes[index_pos]
            .def()
            .json_paths
            .iter()
            .map(|f| {
                self.payload_type
                    .field_by_json_path(f)
                    .and_then(|pos| payload.field(pos).first().cloned())
                    .unwrap_or(Variant::Null)
            })
            .collect();
        Variant::Composite(parts.into_boxed_slice())
    }

    /// The full index-maintenance pass for one row: deletes the old keys
    /// and inserts the new ones, index by index. Key conversion is
    /// validated up front so the pass itself cannot fail half-way.
    pub fn update_indexes(
        &mut self,
        id: RowId,
        old: Option<(&PayloadValue, &serde_json::Value)>,
        payload: &mut PayloadValue,
        doc: &serde_json::Value,
    ) -> Result<()> {
        let first_sparse = self.first_sparse_pos();
        let first_composite = self.first_composite_pos();

        // Validation phase: convert every new key before touching state.
        let mut new_dense: Vec<VariantArray> = Vec::with_capacity(first_sparse);
        for pos in 1..first_sparse {
            new_dense.push(self.indexes[pos].prepare_keys(payload.field(pos))?);
        }
        let mut new_sparse: Vec<VariantArray> = Vec::with_capacity(self.sparse_count);
        for pos in first_sparse..first_composite {
            new_sparse.push(self.sparse_keys(doc, pos)?);
        }

        // Apply phase.
        for pos in 1..first_sparse {
            let keys = &new_dense[pos - 1];
            if let Some((old_payload, _)) = old {
                self.indexes[pos].delete_array(old_payload.field(pos), id)?;
            }
            let need_empty =
                self.indexes[pos].def().opts.sparse || self.indexes[pos].def().opts.array;
            let stored = self.indexes[pos].upsert_array(keys, id, need_empty)?;
            payload.set_field(pos, if stored.is_empty() { keys.clone() } else { stored });
        }
        for (n, pos) in (first_sparse..first_composite).enumerate() {
            if let Some((_, old_doc)) = old {
                let old_keys = self.sparse_keys(old_doc, pos)?;
                self.indexes[pos].delete_array(&old_keys, id)?;
            }
            self.indexes[pos].upsert_array(&new_sparse[n], id, true)?;
        }
        for pos in first_composite..self.indexes.len() {
            if let Some((old_payload, _)) = old {
                let old_key = self.composite_key(old_payload, pos);
                self.indexes[pos].delete(&old_key, id)?;
            }
            let key = self.composite_key(payload, pos);
            self.indexes[pos].upsert(&key, id)?;
        }
        Ok(())
    }

    /// Removes every index entry of a row prior to freeing its slot.
    pub fn unindex(&mut self, id: RowId) -> Result<()> {
        let Some(payload) = self.items[id as usize].clone() else {
            return Ok(());
        };
        let doc = crate::cjson::decode(payload.tuple(), &self.tags_matcher)?;
        let first_sparse = self.first_sparse_pos();
        let first_composite = self.first_composite_pos();

        for pos in 1..first_sparse {
            self.indexes[pos].delete_array(payload.field(pos), id)?;
        }
        for pos in first_sparse..first_composite {
            let keys = self.sparse_keys(&doc, pos)?;
            self.indexes[pos].delete_array(&keys, id)?;
        }
        for pos in first_composite..self.indexes.len() {
            let key = self.composite_key(&payload, pos);
            self.indexes[pos].delete(&key, id)?;
        }
        Ok(())
    }

    /// Rebuilds `index_by_name` after an insertion or removal shifted
    /// index positions.
    pub fn reindex_names(&mut self) {
        self.index_by_name.clear();
        for (pos, index) in self.indexes.iter().enumerate() {
            self.index_by_name.insert(index.name().to_string(), pos);
        }
    }
}

fn collect_sparse(value: &serde_json::Value, kind: KeyValueKind, out: &mut VariantArray) -> Result<()> {
    match value {
        serde_json::Value::Null => {}
        serde_json::Value::Array(items) => {
            for item in items {
                collect_sparse(item, kind, out)?;
            }
        }
        serde_json::Value::Bool(b) => out.push(Variant::Bool(*b).convert(kind)?),
        serde_json::Value::Number(n) => {
            let v = if let Some(i) = n.as_i64() {
                Variant::Int64(i)
            } else {
                Variant::Double(n.as_f64().unwrap_or(f64::NAN))
            };
            out.push(v.convert(kind)?);
        }
        serde_json::Value::String(s) => out.push(Variant::from(s.as_str()).convert(kind)?),
        serde_json::Value::Object(_) => {
            return Err(Error::params("sparse index path points at an object").into());
        }
    }
    Ok(())
}
