//! Store ("column") index: a dense value array keyed by row id with no
//! inverted map. It cannot answer conditions itself (every select falls
//! back to a comparator scan) but it feeds comparators and projections
//! without touching the tuple, and it interns string values so equal
//! strings share one allocation across the column.

use super::{IndexDef, IndexMemStat, SelectKeyResult, SelectOpts};
use crate::idset::{IdSet, RowId};
use crate::query::CondType;
use crate::types::{KeyString, Variant, VariantArray};
use eyre::Result;
use hashbrown::HashMap;

pub struct StoreIndex {
    pub def: IndexDef,
    column: Vec<VariantArray>,
    /// Interned string → live use count.
    str_map: HashMap<KeyString, usize>,
    pub expired_strings: Vec<KeyString>,
    empty_ids: IdSet,
}

// The deferred-release list stays with the original; a clone starts with
// nothing to reclaim.
impl Clone for StoreIndex {
    fn clone(&self) -> Self {
        Self {
            def: self.def.clone(),
            column: self.column.clone(),
            str_map: self.str_map.clone(),
            expired_strings: Vec::new(),
            empty_ids: self.empty_ids.clone(),
        }
    }
}

impl StoreIndex {
    pub fn new(def: IndexDef) -> Self {
        Self {
            def,
            column: Vec::new(),
            str_map: HashMap::new(),
            expired_strings: Vec::new(),
            empty_ids: IdSet::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.str_map.len()
    }

    pub fn values(&self, id: RowId) -> Option<&VariantArray> {
        self.column.get(id as usize)
    }

    pub(super) fn empty_ids_mut(&mut self) -> &mut IdSet {
        &mut self.empty_ids
    }

    pub fn upsert(&mut self, key: Variant, id: RowId) -> Result<Variant> {
        let key = self.intern(key);
        let slot = id as usize;
        if slot >= self.column.len() {
            self.column.resize(slot + 1, VariantArray::new());
        }
        self.empty_ids.erase(id);
        self.column[slot].push(key.clone());
        Ok(key)
    }

    pub fn delete(&mut self, key: Variant, id: RowId) {
        let Some(values) = self.column.get_mut(id as usize) else {
            return;
        };
        if let Some(pos) = values.iter().position(|v| *v == key) {
            values.remove(pos);
            self.release(&key);
        }
    }

    pub fn select_key(
        &self,
        _keys: &VariantArray,
        cond: CondType,
        _opts: SelectOpts,
    ) -> Result<SelectKeyResult> {
        if cond == CondType::Empty && !self.empty_ids.is_empty() {
            return Ok(SelectKeyResult::Ids(vec![std::sync::Arc::new(self.empty_ids.clone())]));
        }
        Ok(SelectKeyResult::Scan)
    }

    pub fn mem_stat(&self) -> IndexMemStat {
        let data_size = self.column.len() * std::mem::size_of::<VariantArray>()
            + self.str_map.keys().map(KeyString::heap_size).sum::<usize>();
        IndexMemStat {
            name: self.def.name.clone(),
            unique_keys_count: self.str_map.len(),
            data_size,
            expired_strings_count: self.expired_strings.len(),
        }
    }

    fn intern(&mut self, key: Variant) -> Variant {
        let Variant::String(s) = key else { return key };
        match self.str_map.get_key_value(s.as_str()) {
            Some((canonical, _)) => {
                let canonical = canonical.clone();
                *self.str_map.get_mut(canonical.as_str()).unwrap() += 1;
                Variant::String(canonical)
            }
            None => {
                self.str_map.insert(s.clone(), 1);
                Variant::String(s)
            }
        }
    }

    fn release(&mut self, key: &Variant) {
        let Variant::String(s) = key else { return };
        if let Some(count) = self.str_map.get_mut(s.as_str()) {
            *count -= 1;
            if *count == 0 {
                if let Some((canonical, _)) = self.str_map.remove_entry(s.as_str()) {
                    self.expired_strings.push(canonical);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexType;
    use crate::types::KeyValueKind;

    fn store() -> StoreIndex {
        StoreIndex::new(IndexDef::new("payload", KeyValueKind::String, IndexType::Store))
    }

    #[test]
    fn equal_strings_are_interned_once() {
        let mut idx = store();
        let a = idx.upsert(Variant::from("shared"), 0).unwrap();
        let b = idx.upsert(Variant::from("shared"), 1).unwrap();
        match (&a, &b) {
            (Variant::String(x), Variant::String(y)) => {
                assert!(std::ptr::eq(x.as_str().as_ptr(), y.as_str().as_ptr()));
            }
            _ => panic!("expected strings"),
        }
        assert_eq!(idx.size(), 1);
    }

    #[test]
    fn last_delete_moves_string_to_expired() {
        let mut idx = store();
        idx.upsert(Variant::from("gone"), 0).unwrap();
        idx.upsert(Variant::from("gone"), 1).unwrap();

        idx.delete(Variant::from("gone"), 0);
        assert!(idx.expired_strings.is_empty());

        idx.delete(Variant::from("gone"), 1);
        assert_eq!(idx.expired_strings.len(), 1);
        assert_eq!(idx.size(), 0);
        // Idempotent on missing key.
        idx.delete(Variant::from("gone"), 1);
        assert_eq!(idx.expired_strings.len(), 1);
    }

    #[test]
    fn selects_always_fall_back_to_scan() {
        let mut idx = store();
        idx.upsert(Variant::from("x"), 3).unwrap();
        let res = idx
            .select_key(&VariantArray::new(), CondType::Eq, SelectOpts::default())
            .unwrap();
        assert!(matches!(res, SelectKeyResult::Scan));
        assert_eq!(idx.values(3).unwrap()[0].as_str(), Some("x"));
    }
}
