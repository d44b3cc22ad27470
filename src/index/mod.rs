//! # Index Family
//!
//! Typed secondary indexes over payload fields. One [`Index`] instance
//! covers one field (or a composite of fields) and is dispatched over the
//! concrete kinds:
//!
//! | Kind | Structure | Conditions served |
//! |------|-----------|-------------------|
//! | `Store` | dense column keyed by row id | comparator scans only |
//! | `Tree` | ordered map key → id set | ranges, ORDER BY, equality |
//! | `Hash` | hash map key → id set | equality / IN |
//! | `FtFast` | tokenized engine, BM25 + position + typo scoring | full-text match with ranks |
//! | `FtFuzzy` | n-gram engine | approximate full-text match |
//! | `Rtree` | bulk-loaded rectangle tree over points | DWithin |
//!
//! Shared behavior (interned-string lifecycle, empty-ids tracking for
//! sparse/array fields, memory stats) lives in helpers, not a base type.
//! Indexes never hold a reference back to their namespace: everything they
//! need arrives through `upsert`/`delete` keys and select parameters.
//!
//! ## Key interning
//!
//! String keys are [`KeyString`]s shared between the map, payloads and
//! query results. Deleting the last id of a key drops the map entry, but
//! the string moves to an `expired_strings` list instead of being freed,
//! so deallocation happens outside the namespace lock in
//! `remove_expired_strings`.

mod comparator;
mod geometry;
mod hash;
mod store;
mod tree;

pub use comparator::{Comparator, ComparatorField};
pub use geometry::RtreeIndex;
pub use hash::HashIndex;
pub use store::StoreIndex;
pub use tree::TreeIndex;

use crate::config::{FtFastConfig, FtFuzzyConfig};
use crate::ctx::Context;
use crate::error::Error;
use crate::fulltext::{FastTextIndex, FuzzyTextIndex};
use crate::idset::{IdSet, IdSetRef, RowId};
use crate::query::CondType;
use crate::types::{KeyValueKind, Variant, VariantArray};
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Structural kind of an index, as written in an index definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexType {
    #[serde(rename = "hash")]
    Hash,
    #[serde(rename = "tree")]
    Tree,
    #[serde(rename = "-")]
    Store,
    #[serde(rename = "text")]
    FtFast,
    #[serde(rename = "fuzzytext")]
    FtFuzzy,
    #[serde(rename = "rtree")]
    Rtree,
}

impl IndexType {
    pub fn is_fulltext(self) -> bool {
        matches!(self, IndexType::FtFast | IndexType::FtFuzzy)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexOpts {
    pub pk: bool,
    pub array: bool,
    pub sparse: bool,
    pub dense: bool,
    /// TTL in seconds for `tree` indexes over int64 timestamps; the
    /// background routine evicts rows older than `now - expire_after`.
    pub expire_after: Option<i64>,
    /// JSON blob with the full-text engine configuration.
    pub config: Option<String>,
}

/// Declarative index definition: what the DDL surface speaks and what the
/// sys-record persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    #[serde(default)]
    pub json_paths: Vec<String>,
    pub field_type: KeyValueKind,
    pub index_type: IndexType,
    #[serde(default)]
    pub opts: IndexOpts,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, field_type: KeyValueKind, index_type: IndexType) -> Self {
        let name = name.into();
        let json_paths = if name.contains('+') {
            name.split('+').map(str::to_string).collect()
        } else {
            vec![name.clone()]
        };
        Self { name, json_paths, field_type, index_type, opts: IndexOpts::default() }
    }

    pub fn pk(mut self) -> Self {
        self.opts.pk = true;
        self
    }

    pub fn array(mut self) -> Self {
        self.opts.array = true;
        self
    }

    pub fn sparse(mut self) -> Self {
        self.opts.sparse = true;
        self
    }

    pub fn is_composite(&self) -> bool {
        self.field_type == KeyValueKind::Composite
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::params("index name can't be empty").into());
        }
        match self.index_type {
            IndexType::FtFast | IndexType::FtFuzzy => {
                if self.field_type != KeyValueKind::String && !self.is_composite() {
                    return Err(Error::params(format!(
                        "fulltext index '{}' requires a string field",
                        self.name
                    ))
                    .into());
                }
                if self.opts.pk {
                    return Err(Error::params("fulltext index can't be PK").into());
                }
            }
            IndexType::Rtree => {
                if self.field_type != KeyValueKind::Point {
                    return Err(Error::params(format!(
                        "rtree index '{}' requires a point field",
                        self.name
                    ))
                    .into());
                }
            }
            IndexType::Store => {
                if self.opts.pk {
                    return Err(Error::params("store index can't be PK").into());
                }
            }
            IndexType::Hash | IndexType::Tree => {}
        }
        if self.opts.pk && (self.opts.array || self.opts.sparse) {
            return Err(Error::params("PK index can't be array or sparse").into());
        }
        if self.opts.expire_after.is_some()
            && !(self.index_type == IndexType::Tree && self.field_type == KeyValueKind::Int64)
        {
            return Err(Error::params("TTL requires an int64 tree index").into());
        }
        Ok(())
    }
}

/// Select-time hints passed down from the planner.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectOpts {
    pub items_count: usize,
    /// Serve the condition with a comparator even if the index could
    /// answer it; used when a better index already drives iteration.
    pub force_comparator: bool,
    /// Sorted streams are unavailable (sort orders not built yet).
    pub unbuilt_sort_orders: bool,
}

/// What an index hands back for one condition: id sets to merge, a
/// rank-ordered id list (full-text), or a request to fall back to a
/// comparator scan; the selecter builds the [`Comparator`] because only
/// it knows the field's payload column.
#[derive(Debug)]
pub enum SelectKeyResult {
    Ids(Vec<IdSetRef>),
    Ranked(Vec<(RowId, f32)>),
    Scan,
}

impl SelectKeyResult {
    /// Upper bound of matching rows, for selectivity ordering.
    pub fn max_iterations(&self, items_count: usize) -> usize {
        match self {
            SelectKeyResult::Ids(sets) => sets.iter().map(|s| s.len()).sum(),
            SelectKeyResult::Ranked(ids) => ids.len(),
            SelectKeyResult::Scan => items_count,
        }
    }
}

/// Memory accounting of one index.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexMemStat {
    pub name: String,
    pub unique_keys_count: usize,
    pub data_size: usize,
    pub expired_strings_count: usize,
}

/// One secondary index. Enum dispatch over the concrete kinds; shared
/// contract is documented on the module.
#[derive(Clone)]
pub enum Index {
    Store(StoreIndex),
    Tree(TreeIndex),
    Hash(HashIndex),
    FtFast(FastTextIndex),
    FtFuzzy(FuzzyTextIndex),
    Rtree(RtreeIndex),
}

impl Index {
    pub fn new(def: IndexDef) -> Result<Index> {
        def.validate()?;
        Ok(match def.index_type {
            IndexType::Store => Index::Store(StoreIndex::new(def)),
            IndexType::Tree => Index::Tree(TreeIndex::new(def)),
            IndexType::Hash => Index::Hash(HashIndex::new(def)),
            IndexType::Rtree => Index::Rtree(RtreeIndex::new(def)),
            IndexType::FtFast => {
                let config = match &def.opts.config {
                    Some(json) => FtFastConfig::parse(json)?,
                    None => FtFastConfig::default(),
                };
                Index::FtFast(FastTextIndex::new(def, config))
            }
            IndexType::FtFuzzy => {
                let config = match &def.opts.config {
                    Some(json) => FtFuzzyConfig::parse(json)?,
                    None => FtFuzzyConfig::default(),
                };
                Index::FtFuzzy(FuzzyTextIndex::new(def, config))
            }
        })
    }

    pub fn def(&self) -> &IndexDef {
        match self {
            Index::Store(i) => &i.def,
            Index::Tree(i) => &i.def,
            Index::Hash(i) => &i.def,
            Index::FtFast(i) => &i.def,
            Index::FtFuzzy(i) => &i.def,
            Index::Rtree(i) => &i.def,
        }
    }

    pub fn name(&self) -> &str {
        &self.def().name
    }

    pub fn key_kind(&self) -> KeyValueKind {
        self.def().field_type
    }

    pub fn is_ordered(&self) -> bool {
        matches!(self, Index::Tree(_))
    }

    pub fn is_fulltext(&self) -> bool {
        matches!(self, Index::FtFast(_) | Index::FtFuzzy(_))
    }

    /// True for a full-text index whose search engine lags the key map;
    /// the select path commits it lazily under the write lock.
    pub fn fulltext_needs_commit(&self) -> bool {
        match self {
            Index::FtFast(i) => !i.is_built(),
            Index::FtFuzzy(i) => !i.is_built(),
            _ => false,
        }
    }

    /// Unique key count; used for selectivity estimates.
    pub fn size(&self) -> usize {
        match self {
            Index::Store(i) => i.size(),
            Index::Tree(i) => i.size(),
            Index::Hash(i) => i.size(),
            Index::FtFast(i) => i.size(),
            Index::FtFuzzy(i) => i.size(),
            Index::Rtree(i) => i.size(),
        }
    }

    /// Inserts one key for `id`, returning the canonical stored variant
    /// (interned string, converted numeric). Upserting a second key for
    /// the same id on a non-array index replaces nothing here; the caller
    /// deletes old keys first, matching the namespace modify protocol.
    pub fn upsert(&mut self, key: &Variant, id: RowId) -> Result<Variant> {
        let key = self.convert_key(key)?;
        match self {
            Index::Store(i) => i.upsert(key, id),
            Index::Tree(i) => i.upsert(key, id),
            Index::Hash(i) => i.upsert(key, id),
            Index::FtFast(i) => i.upsert(key, id),
            Index::FtFuzzy(i) => i.upsert(key, id),
            Index::Rtree(i) => i.upsert(key, id),
        }
    }

    /// Array-aware upsert: one entry per element. With `need_empty`, an
    /// empty `keys` records the id in the empty-ids set so `CondEmpty`
    /// stays an index hit for sparse/array fields.
    pub fn upsert_array(
        &mut self,
        keys: &VariantArray,
        id: RowId,
        need_empty: bool,
    ) -> Result<VariantArray> {
        let mut stored = VariantArray::new();
        if keys.is_empty() && need_empty {
            self.add_empty(id);
            return Ok(stored);
        }
        for key in keys {
            stored.push(self.upsert(key, id)?);
        }
        Ok(stored)
    }

    /// Idempotent delete; silent when the key is missing.
    pub fn delete(&mut self, key: &Variant, id: RowId) -> Result<()> {
        let key = self.convert_key(key)?;
        match self {
            Index::Store(i) => i.delete(key, id),
            Index::Tree(i) => i.delete(key, id),
            Index::Hash(i) => i.delete(key, id),
            Index::FtFast(i) => i.delete(key, id),
            Index::FtFuzzy(i) => i.delete(key, id),
            Index::Rtree(i) => i.delete(key, id),
        }
        Ok(())
    }

    pub fn delete_array(&mut self, keys: &VariantArray, id: RowId) -> Result<()> {
        if keys.is_empty() {
            self.remove_empty(id);
            return Ok(());
        }
        for key in keys {
            self.delete(key, id)?;
        }
        Ok(())
    }

    /// Answers one condition. `CondEmpty`/`CondAny` on a non-array,
    /// non-sparse index is `errParams`: such fields always hold a value.
    pub fn select_key(
        &self,
        keys: &VariantArray,
        cond: CondType,
        opts: SelectOpts,
        ctx: &Context,
    ) -> Result<SelectKeyResult> {
        ctx.check()?;
        if matches!(cond, CondType::Empty | CondType::Any)
            && !self.def().opts.array
            && !self.def().opts.sparse
        {
            return Err(Error::params(format!(
                "condition {:?} is invalid for non-array non-sparse index '{}'",
                cond,
                self.name()
            ))
            .into());
        }
        let keys = self.convert_keys(keys, cond)?;
        match self {
            Index::Store(i) => i.select_key(&keys, cond, opts),
            Index::Tree(i) => i.select_key(&keys, cond, opts),
            Index::Hash(i) => i.select_key(&keys, cond, opts),
            Index::FtFast(i) => i.select_key(&keys, cond, opts, ctx),
            Index::FtFuzzy(i) => i.select_key(&keys, cond, opts, ctx),
            Index::Rtree(i) => i.select_key(&keys, cond, opts),
        }
    }

    /// Materializes whatever the kind defers: sort orders for ordered
    /// indexes, the token/n-gram engines for full-text. Cancellable at
    /// document granularity through `ctx`.
    pub fn commit(&mut self, ctx: &Context) -> Result<()> {
        match self {
            Index::Tree(i) => i.commit(ctx),
            Index::FtFast(i) => i.commit(ctx),
            Index::FtFuzzy(i) => i.commit(ctx),
            Index::Rtree(i) => i.commit(ctx),
            Index::Store(_) | Index::Hash(_) => Ok(()),
        }
    }

    /// Sorted id stream of an ordered index, valid after `commit`.
    pub fn sort_orders(&self) -> Option<&[RowId]> {
        match self {
            Index::Tree(i) => i.sort_orders(),
            _ => None,
        }
    }

    pub fn mem_stat(&self) -> IndexMemStat {
        match self {
            Index::Store(i) => i.mem_stat(),
            Index::Tree(i) => i.mem_stat(),
            Index::Hash(i) => i.mem_stat(),
            Index::FtFast(i) => i.mem_stat(),
            Index::FtFuzzy(i) => i.mem_stat(),
            Index::Rtree(i) => i.mem_stat(),
        }
    }

    /// Frees interned strings whose last reference was dropped by earlier
    /// deletes. Runs outside the namespace write-critical path.
    pub fn remove_expired_strings(&mut self) {
        match self {
            Index::Store(i) => i.expired_strings.clear(),
            Index::Tree(i) => i.expired_strings.clear(),
            Index::Hash(i) => i.expired_strings.clear(),
            Index::FtFast(i) => i.clear_expired(),
            Index::FtFuzzy(i) => i.clear_expired(),
            Index::Rtree(_) => {}
        }
    }

    fn add_empty(&mut self, id: RowId) {
        match self {
            Index::Store(i) => i.empty_ids_mut().add(id),
            Index::Tree(i) => i.empty_ids_mut().add(id),
            Index::Hash(i) => i.empty_ids_mut().add(id),
            Index::FtFast(_) | Index::FtFuzzy(_) | Index::Rtree(_) => {}
        }
    }

    fn remove_empty(&mut self, id: RowId) {
        match self {
            Index::Store(i) => i.empty_ids_mut().erase(id),
            Index::Tree(i) => i.empty_ids_mut().erase(id),
            Index::Hash(i) => i.empty_ids_mut().erase(id),
            Index::FtFast(_) | Index::FtFuzzy(_) | Index::Rtree(_) => return,
        };
    }

    /// Converts keys to the index kind without inserting; the namespace
    /// validates a whole row's keys before mutating any index so a
    /// conversion failure never leaves indexes half-updated.
    pub fn prepare_keys(&self, keys: &VariantArray) -> Result<VariantArray> {
        let mut out = VariantArray::new();
        for key in keys {
            out.push(self.convert_key(key)?);
        }
        Ok(out)
    }

    fn convert_key(&self, key: &Variant) -> Result<Variant> {
        if self.is_fulltext() || self.def().is_composite() {
            // FT keys stay strings; composite keys are prebuilt tuples.
            return Ok(key.clone());
        }
        key.convert(self.key_kind())
    }

    fn convert_keys(&self, keys: &VariantArray, cond: CondType) -> Result<VariantArray> {
        // DWithin carries [x, y, distance] literals, not index keys.
        if cond == CondType::DWithin || self.is_fulltext() || self.def().is_composite() {
            return Ok(keys.clone());
        }
        let mut out = VariantArray::new();
        for key in keys {
            out.push(key.convert(self.key_kind())?);
        }
        Ok(out)
    }
}

/// Key → ids map entry shared by the ordered and hashed kinds. The id set
/// is handed to select results as-is; mutation goes through `make_mut`, so
/// in-flight readers keep the pre-mutation set.
#[derive(Debug, Clone, Default)]
pub struct KeyEntry {
    pub ids: IdSetRef,
}

impl KeyEntry {
    pub fn new() -> Self {
        Self { ids: Arc::new(IdSet::new()) }
    }

    pub fn add(&mut self, id: RowId) {
        Arc::make_mut(&mut self.ids).add(id);
    }

    /// Returns true when the entry became empty.
    pub fn erase(&mut self, id: RowId) -> bool {
        let set = Arc::make_mut(&mut self.ids);
        set.erase(id);
        set.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use smallvec::smallvec;

    fn ctx() -> Context {
        Context::new()
    }

    #[test]
    fn empty_cond_on_plain_index_is_params_error() {
        let idx = Index::new(IndexDef::new("id", KeyValueKind::Int, IndexType::Hash)).unwrap();
        let err = idx
            .select_key(&VariantArray::new(), CondType::Empty, SelectOpts::default(), &ctx())
            .unwrap_err();
        assert_eq!(Error::code_of(&err), ErrorCode::Params);
    }

    #[test]
    fn keys_are_converted_to_index_kind() {
        let mut idx = Index::new(IndexDef::new("id", KeyValueKind::Int, IndexType::Hash)).unwrap();
        idx.upsert(&Variant::Int64(5), 0).unwrap();
        let res = idx
            .select_key(&smallvec![Variant::from("5")], CondType::Eq, SelectOpts::default(), &ctx())
            .unwrap();
        match res {
            SelectKeyResult::Ids(sets) => {
                assert_eq!(sets.iter().map(|s| s.len()).sum::<usize>(), 1)
            }
            _ => panic!("expected id sets"),
        }
    }

    #[test]
    fn ttl_validation_requires_int64_tree() {
        let mut def = IndexDef::new("ts", KeyValueKind::Int, IndexType::Hash);
        def.opts.expire_after = Some(60);
        assert!(Index::new(def).is_err());

        let mut def = IndexDef::new("ts", KeyValueKind::Int64, IndexType::Tree);
        def.opts.expire_after = Some(60);
        assert!(Index::new(def).is_ok());
    }

    #[test]
    fn composite_def_splits_json_paths() {
        let def = IndexDef::new("a+b", KeyValueKind::Composite, IndexType::Hash);
        assert_eq!(def.json_paths, vec!["a".to_string(), "b".to_string()]);
    }
}
