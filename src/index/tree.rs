//! Ordered index: a B-tree map from key to id set. Serves equality, `IN`,
//! and all range conditions directly, and materializes a sorted id stream
//! (`sort_orders`) at commit time for index-driven ORDER BY.

use super::{IndexDef, IndexMemStat, KeyEntry, SelectKeyResult, SelectOpts};
use crate::ctx::Context;
use crate::idset::{IdSet, RowId};
use crate::query::CondType;
use crate::types::{KeyString, Variant, VariantArray};
use eyre::Result;
use std::collections::BTreeMap;
use std::ops::Bound;

/// `Variant` under its total order, so doubles (NaN included) can live in
/// a `BTreeMap` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct MapKey(pub Variant);

impl PartialOrd for MapKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MapKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

pub struct TreeIndex {
    pub def: IndexDef,
    idx_map: BTreeMap<MapKey, KeyEntry>,
    empty_ids: IdSet,
    pub expired_strings: Vec<KeyString>,
    sort_orders: Vec<RowId>,
    sort_built: bool,
}

impl Clone for TreeIndex {
    fn clone(&self) -> Self {
        Self {
            def: self.def.clone(),
            idx_map: self.idx_map.clone(),
            empty_ids: self.empty_ids.clone(),
            expired_strings: Vec::new(),
            sort_orders: self.sort_orders.clone(),
            sort_built: self.sort_built,
        }
    }
}

impl TreeIndex {
    pub fn new(def: IndexDef) -> Self {
        Self {
            def,
            idx_map: BTreeMap::new(),
            empty_ids: IdSet::new(),
            expired_strings: Vec::new(),
            sort_orders: Vec::new(),
            sort_built: false,
        }
    }

    pub fn size(&self) -> usize {
        self.idx_map.len()
    }

    pub(super) fn empty_ids_mut(&mut self) -> &mut IdSet {
        &mut self.empty_ids
    }

    pub fn upsert(&mut self, key: Variant, id: RowId) -> Result<Variant> {
        self.sort_built = false;
        self.empty_ids.erase(id);
        let map_key = MapKey(key);
        if let Some((stored, _)) = self.idx_map.get_key_value(&map_key) {
            let canonical = stored.0.clone();
            self.idx_map.get_mut(&map_key).unwrap().add(id);
            return Ok(canonical);
        }
        let canonical = map_key.0.clone();
        let mut entry = KeyEntry::new();
        entry.add(id);
        self.idx_map.insert(map_key, entry);
        Ok(canonical)
    }

    pub fn delete(&mut self, key: Variant, id: RowId) {
        self.sort_built = false;
        let map_key = MapKey(key);
        if let Some(entry) = self.idx_map.get_mut(&map_key) {
            if entry.erase(id) {
                if let Some((stored, _)) = self.idx_map.remove_entry(&map_key) {
                    if let Variant::String(s) = stored.0 {
                        self.expired_strings.push(s);
                    }
                }
            }
        }
    }

    pub fn select_key(
        &self,
        keys: &VariantArray,
        cond: CondType,
        _opts: SelectOpts,
    ) -> Result<SelectKeyResult> {
        let mut sets = Vec::new();
        match cond {
            CondType::Eq | CondType::Set => {
                for key in keys {
                    if let Some(entry) = self.idx_map.get(&MapKey(key.clone())) {
                        sets.push(entry.ids.clone());
                    }
                }
            }
            CondType::Lt | CondType::Le | CondType::Gt | CondType::Ge | CondType::Range => {
                let Some(first) = keys.first() else {
                    return Err(crate::error::Error::params("range condition without keys").into());
                };
                let range: (Bound<MapKey>, Bound<MapKey>) = match cond {
                    CondType::Lt => (Bound::Unbounded, Bound::Excluded(MapKey(first.clone()))),
                    CondType::Le => (Bound::Unbounded, Bound::Included(MapKey(first.clone()))),
                    CondType::Gt => (Bound::Excluded(MapKey(first.clone())), Bound::Unbounded),
                    CondType::Ge => (Bound::Included(MapKey(first.clone())), Bound::Unbounded),
                    CondType::Range => {
                        let Some(second) = keys.get(1) else {
                            return Err(crate::error::Error::params(
                                "range condition needs two keys",
                            )
                            .into());
                        };
                        (
                            Bound::Included(MapKey(first.clone())),
                            Bound::Included(MapKey(second.clone())),
                        )
                    }
                    _ => unreachable!(),
                };
                for (_, entry) in self.idx_map.range(range) {
                    sets.push(entry.ids.clone());
                }
            }
            CondType::Empty => {
                sets.push(std::sync::Arc::new(self.empty_ids.clone()));
            }
            CondType::Any | CondType::Like | CondType::AllSet => {
                return Ok(SelectKeyResult::Scan);
            }
            CondType::DWithin => {
                return Err(crate::error::Error::params(format!(
                    "DWithin is invalid for index '{}'",
                    self.def.name
                ))
                .into());
            }
        }
        Ok(SelectKeyResult::Ids(sets))
    }

    /// Rebuilds the sorted id stream. Checked against the context every
    /// few keys so a concurrent writer can abort the pass.
    pub fn commit(&mut self, ctx: &Context) -> Result<()> {
        if self.sort_built {
            return Ok(());
        }
        let mut orders = Vec::new();
        for (i, entry) in self.idx_map.values().enumerate() {
            if i % 256 == 0 {
                ctx.check()?;
            }
            orders.extend_from_slice(entry.ids.as_slice());
        }
        self.sort_orders = orders;
        self.sort_built = true;
        Ok(())
    }

    pub fn sort_orders(&self) -> Option<&[RowId]> {
        self.sort_built.then_some(self.sort_orders.as_slice())
    }

    /// Ids whose key is strictly below `cutoff`; drives TTL eviction.
    pub fn ids_below(&self, cutoff: &Variant) -> Vec<RowId> {
        let mut out = Vec::new();
        for (_, entry) in self
            .idx_map
            .range((Bound::Unbounded, Bound::Excluded(MapKey(cutoff.clone()))))
        {
            out.extend_from_slice(entry.ids.as_slice());
        }
        out
    }

    pub fn mem_stat(&self) -> IndexMemStat {
        let data_size = self
            .idx_map
            .iter()
            .map(|(k, e)| {
                let key_size = match &k.0 {
                    Variant::String(s) => s.heap_size(),
                    _ => std::mem::size_of::<Variant>(),
                };
                key_size + e.ids.len() * std::mem::size_of::<RowId>()
            })
            .sum();
        IndexMemStat {
            name: self.def.name.clone(),
            unique_keys_count: self.idx_map.len(),
            data_size,
            expired_strings_count: self.expired_strings.len(),
        }
    }
}
