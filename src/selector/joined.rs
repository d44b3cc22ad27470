//! Join execution against materialized pre-results.
//!
//! The caller runs the right-hand query on its namespace first and hands
//! the resulting rows in as a [`JoinPreSelect`]. The selecter then treats
//! the join as a synthetic condition on the outer namespace:
//!
//! - `Inner`: outer candidates shrink to rows with at least one match.
//! - `Left`: candidates are untouched; matches are attached.
//! - `OrInner`: rows with a match union into the candidates even when the
//!   rest of the filter rejected them.

use super::SelectView;
use crate::query::{CondType, JoinEntry, JoinType};
use crate::results::{ItemRef, QueryResults};
use crate::idset::RowId;
use crate::types::Variant;
use std::cmp::Ordering;

pub struct JoinPreSelect {
    pub join_type: JoinType,
    pub on: Vec<JoinEntry>,
    /// Fully materialized right-hand rows with their own contexts.
    pub preselect: QueryResults,
}

impl JoinPreSelect {
    /// Right-hand rows matching the outer row `id`, rendered as item refs
    /// whose `nsid` points into the *merged* context list; the caller
    /// rebases `nsid` by `ctx_offset`.
    pub fn matches_for(
        &self,
        view: &SelectView<'_>,
        id: RowId,
        ctx_offset: usize,
    ) -> Vec<ItemRef> {
        let Some(outer) = view.payload(id) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for item in self.preselect.iter() {
            let all = self.on.iter().all(|entry| {
                let left = view
                    .payload_type
                    .field_by_json_path(&entry.left_field)
                    .map(|pos| outer.field(pos).clone())
                    .unwrap_or_default();
                let right_ctx = &self.preselect.contexts[item.nsid];
                let right = right_ctx
                    .payload_type
                    .field_by_json_path(&entry.right_field)
                    .map(|pos| item.value.field(pos).clone())
                    .unwrap_or_default();
                join_entry_matches(entry.cond, &left, &right)
            });
            if all {
                let mut joined = item.clone();
                joined.nsid += ctx_offset;
                out.push(joined);
            }
        }
        out
    }

    pub fn has_match(&self, view: &SelectView<'_>, id: RowId) -> bool {
        let Some(outer) = view.payload(id) else { return false };
        self.preselect.iter().any(|item| {
            self.on.iter().all(|entry| {
                let left = view
                    .payload_type
                    .field_by_json_path(&entry.left_field)
                    .map(|pos| outer.field(pos).clone())
                    .unwrap_or_default();
                let right_ctx = &self.preselect.contexts[item.nsid];
                let right = right_ctx
                    .payload_type
                    .field_by_json_path(&entry.right_field)
                    .map(|pos| item.value.field(pos).clone())
                    .unwrap_or_default();
                join_entry_matches(entry.cond, &left, &right)
            })
        })
    }
}

fn join_entry_matches(cond: CondType, left: &[Variant], right: &[Variant]) -> bool {
    left.iter().any(|l| {
        right.iter().any(|r| match l.relaxed_cmp(r) {
            Some(ord) => match cond {
                CondType::Eq | CondType::Set => ord == Ordering::Equal,
                CondType::Lt => ord == Ordering::Less,
                CondType::Le => ord != Ordering::Greater,
                CondType::Gt => ord == Ordering::Greater,
                CondType::Ge => ord != Ordering::Less,
                _ => false,
            },
            None => false,
        })
    })
}
