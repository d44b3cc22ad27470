//! Hashed index: key → id set. Equality and `IN` only; everything else
//! falls back to a comparator scan.

use super::{IndexDef, IndexMemStat, KeyEntry, SelectKeyResult, SelectOpts};
use crate::idset::{IdSet, RowId};
use crate::query::CondType;
use crate::types::{KeyString, Variant, VariantArray};
use eyre::Result;
use hashbrown::HashMap;

pub struct HashIndex {
    pub def: IndexDef,
    idx_map: HashMap<Variant, KeyEntry>,
    empty_ids: IdSet,
    pub expired_strings: Vec<KeyString>,
}

impl Clone for HashIndex {
    fn clone(&self) -> Self {
        Self {
            def: self.def.clone(),
            idx_map: self.idx_map.clone(),
            empty_ids: self.empty_ids.clone(),
            expired_strings: Vec::new(),
        }
    }
}

impl HashIndex {
    pub fn new(def: IndexDef) -> Self {
        Self {
            def,
            idx_map: HashMap::new(),
            empty_ids: IdSet::new(),
            expired_strings: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.idx_map.len()
    }

    pub(super) fn empty_ids_mut(&mut self) -> &mut IdSet {
        &mut self.empty_ids
    }

    /// Ids stored under exactly `key`; the PK lookup path.
    pub fn get(&self, key: &Variant) -> Option<&KeyEntry> {
        self.idx_map.get(key)
    }

    pub fn upsert(&mut self, key: Variant, id: RowId) -> Result<Variant> {
        self.empty_ids.erase(id);
        if let Some((stored, _)) = self.idx_map.get_key_value(&key) {
            let canonical = stored.clone();
            self.idx_map.get_mut(&key).unwrap().add(id);
            return Ok(canonical);
        }
        let mut entry = KeyEntry::new();
        entry.add(id);
        let canonical = key.clone();
        self.idx_map.insert(key, entry);
        Ok(canonical)
    }

    pub fn delete(&mut self, key: Variant, id: RowId) {
        if let Some(entry) = self.idx_map.get_mut(&key) {
            if entry.erase(id) {
                if let Some((stored, _)) = self.idx_map.remove_entry(&key) {
                    if let Variant::String(s) = stored {
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
        opts: SelectOpts,
    ) -> Result<SelectKeyResult> {
        if opts.force_comparator {
            return Ok(SelectKeyResult::Scan);
        }
        match cond {
            CondType::Eq | CondType::Set => {
                let mut sets = Vec::new();
                for key in keys {
                    if let Some(entry) = self.idx_map.get(key) {
                        sets.push(entry.ids.clone());
                    }
                }
                Ok(SelectKeyResult::Ids(sets))
            }
            CondType::Empty => {
                Ok(SelectKeyResult::Ids(vec![std::sync::Arc::new(self.empty_ids.clone())]))
            }
            CondType::DWithin => Err(crate::error::Error::params(format!(
                "DWithin is invalid for index '{}'",
                self.def.name
            ))
            .into()),
            _ => Ok(SelectKeyResult::Scan),
        }
    }

    pub fn mem_stat(&self) -> IndexMemStat {
        let data_size = self
            .idx_map
            .iter()
            .map(|(k, e)| {
                let key_size = match k {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexType;
    use crate::types::KeyValueKind;
    use smallvec::smallvec;

    fn hash() -> HashIndex {
        HashIndex::new(IndexDef::new("id", KeyValueKind::Int, IndexType::Hash))
    }

    #[test]
    fn set_condition_unions_key_hits() {
        let mut idx = hash();
        idx.upsert(Variant::Int(1), 10).unwrap();
        idx.upsert(Variant::Int(2), 20).unwrap();
        idx.upsert(Variant::Int(2), 21).unwrap();

        let res = idx
            .select_key(
                &smallvec![Variant::Int(2), Variant::Int(3)],
                CondType::Set,
                SelectOpts::default(),
            )
            .unwrap();
        match res {
            SelectKeyResult::Ids(sets) => {
                let total: usize = sets.iter().map(|s| s.len()).sum();
                assert_eq!(total, 2);
            }
            _ => panic!("expected ids"),
        }
    }

    #[test]
    fn range_falls_back_to_scan() {
        let idx = hash();
        let res = idx
            .select_key(&smallvec![Variant::Int(1)], CondType::Gt, SelectOpts::default())
            .unwrap();
        assert!(matches!(res, SelectKeyResult::Scan));
    }

    #[test]
    fn shared_idset_survives_index_mutation() {
        let mut idx = hash();
        idx.upsert(Variant::Int(1), 10).unwrap();
        let res = idx
            .select_key(&smallvec![Variant::Int(1)], CondType::Eq, SelectOpts::default())
            .unwrap();
        let pinned = match res {
            SelectKeyResult::Ids(mut sets) => sets.pop().unwrap(),
            _ => panic!(),
        };
        idx.upsert(Variant::Int(1), 11).unwrap();
        // The reader's snapshot is unchanged.
        assert_eq!(pinned.as_slice(), &[10]);
        assert_eq!(idx.get(&Variant::Int(1)).unwrap().ids.len(), 2);
    }
}
