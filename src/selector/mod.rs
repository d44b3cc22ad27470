//! # Selecter
//!
//! Rule-based planner and executor over the index family. No cost model:
//!
//! 1. Composite conditions collapse into their composite index.
//! 2. Within an AND group, index hits are ordered by estimated
//!    selectivity (smallest id-set first) and intersected.
//! 3. An ordered index that matches the requested ORDER BY drives
//!    iteration when its sort orders are built.
//! 4. Conditions without a usable index become comparators applied after
//!    candidate emission.
//! 5. OR branches evaluate independently and union.
//! 6. Joins bind as pre-selected right-hand results (materialized
//!    [`JoinPreSelect`]) and restrict, extend or decorate the candidates
//!    depending on the join type.
//! 7. A full-text condition dominates its group: it drives iteration,
//!    provides ranks, and demotes every sibling condition to a comparator.

mod aggregator;
mod joined;
mod preprocessor;
mod selecter;

pub use joined::JoinPreSelect;
pub use selecter::Selecter;

use crate::idset::RowId;
use crate::index::Index;
use crate::payload::{PayloadType, PayloadValue};
use crate::tags::TagsMatcher;
use hashbrown::HashMap;

/// Read-locked view of the namespace state the selecter runs against.
/// Index position `i < payload_type.num_fields()` is the dense index of
/// payload field `i`; sparse and composite indexes follow.
pub struct SelectView<'a> {
    pub namespace: &'a str,
    pub payload_type: &'a PayloadType,
    pub tags_matcher: &'a TagsMatcher,
    pub indexes: &'a [Index],
    pub index_by_name: &'a HashMap<String, usize>,
    pub items: &'a [Option<PayloadValue>],
    pub schema: Option<&'a str>,
    /// Sort orders of ordered indexes are usable (optimization finished).
    pub sort_orders_built: bool,
}

impl<'a> SelectView<'a> {
    pub fn payload(&self, id: RowId) -> Option<&PayloadValue> {
        self.items.get(id as usize).and_then(Option::as_ref)
    }

    pub fn live_count(&self) -> usize {
        self.items.iter().filter(|slot| slot.is_some()).count()
    }

    /// All live row ids in slot order.
    pub fn all_ids(&self) -> Vec<RowId> {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|_| id as RowId))
            .collect()
    }

    pub fn index_of_field(&self, field: &str) -> Option<(usize, &Index)> {
        let pos = self.index_by_name.get(field).copied()?;
        Some((pos, &self.indexes[pos]))
    }
}
