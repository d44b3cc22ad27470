//! Query preprocessing: composite-index substitution.
//!
//! When a top-level AND run contains single-value `Eq` conditions that
//! exactly cover a composite index's fields, those conditions fold into
//! one `Eq` on the composite index with a tuple key. Fields referenced
//! with other operators, under `OR`/`NOT`, or only partially covering the
//! composite stay as they are.

use super::SelectView;
use crate::query::{CondType, FilterItem, FilterNode, OpType, QueryEntry};
use crate::types::Variant;
use smallvec::smallvec;

pub fn substitute_composite_indexes(items: &[FilterItem], view: &SelectView<'_>) -> Vec<FilterItem> {
    let composites: Vec<(usize, &crate::index::Index)> = view
        .indexes
        .iter()
        .enumerate()
        .filter(|(_, idx)| idx.def().is_composite())
        .collect();
    if composites.is_empty() {
        return items.to_vec();
    }

    // Positions of AND-connected single-value Eq conditions, by field.
    let mut eq_positions: Vec<(usize, &QueryEntry)> = Vec::new();
    for (pos, item) in items.iter().enumerate() {
        let and_connected = item.op == OpType::And
            && items.get(pos + 1).map(|next| next.op != OpType::Or).unwrap_or(true);
        if !and_connected {
            continue;
        }
        if let FilterNode::Cond(entry) = &item.node {
            if entry.cond == CondType::Eq && entry.values.len() == 1 {
                eq_positions.push((pos, entry));
            }
        }
    }

    for (_, composite) in &composites {
        let fields = &composite.def().json_paths;
        let covered: Vec<&(usize, &QueryEntry)> = fields
            .iter()
            .filter_map(|f| eq_positions.iter().find(|(_, e)| e.field == *f))
            .collect();
        if covered.len() != fields.len() {
            continue;
        }
        // Build the tuple key in composite field order, each part converted
        // to its component field's key kind so it equals the stored tuples.
        let mut key = Vec::with_capacity(fields.len());
        let mut convertible = true;
        for f in fields {
            let (_, entry) = *eq_positions.iter().find(|(_, e)| e.field == *f).unwrap();
            let part = match view.index_of_field(f) {
                Some((_, idx)) => match entry.values[0].convert(idx.key_kind()) {
                    Ok(v) => v,
                    Err(_) => {
                        convertible = false;
                        break;
                    }
                },
                None => entry.values[0].clone(),
            };
            key.push(part);
        }
        if !convertible {
            continue;
        }
        let drop_positions: Vec<usize> = covered.iter().map(|(pos, _)| *pos).collect();

        let mut out = Vec::with_capacity(items.len());
        let mut inserted = false;
        for (pos, item) in items.iter().enumerate() {
            if drop_positions.contains(&pos) {
                if !inserted {
                    out.push(FilterItem {
                        op: OpType::And,
                        node: FilterNode::Cond(QueryEntry {
                            field: composite.def().name.clone(),
                            cond: CondType::Eq,
                            values: smallvec![Variant::Composite(key.clone().into_boxed_slice())],
                        }),
                    });
                    inserted = true;
                }
                continue;
            }
            out.push(item.clone());
        }
        return out;
    }
    items.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{Index, IndexDef, IndexType};
    use crate::payload::PayloadType;
    use crate::tags::TagsMatcher;
    use crate::types::KeyValueKind;
    use hashbrown::HashMap;

    #[test]
    fn folds_covering_eq_conditions() {
        let indexes = vec![
            Index::new(IndexDef::new("a", KeyValueKind::Int, IndexType::Hash)).unwrap(),
            Index::new(IndexDef::new("b", KeyValueKind::Int, IndexType::Hash)).unwrap(),
            Index::new(IndexDef::new("a+b", KeyValueKind::Composite, IndexType::Hash)).unwrap(),
        ];
        let mut by_name = HashMap::new();
        by_name.insert("a".to_string(), 0);
        by_name.insert("b".to_string(), 1);
        by_name.insert("a+b".to_string(), 2);
        let pt = PayloadType::new();
        let tm = TagsMatcher::new();
        let view = SelectView {
            namespace: "ns",
            payload_type: &pt,
            tags_matcher: &tm,
            indexes: &indexes,
            index_by_name: &by_name,
            items: &[],
            schema: None,
            sort_orders_built: false,
        };

        let q = crate::query::Query::new("ns").where_eq("a", 1).where_eq("b", 2);
        let folded = substitute_composite_indexes(&q.entries, &view);
        assert_eq!(folded.len(), 1);
        match &folded[0].node {
            FilterNode::Cond(e) => {
                assert_eq!(e.field, "a+b");
                match &e.values[0] {
                    Variant::Composite(parts) => assert_eq!(parts.len(), 2),
                    other => panic!("expected composite key, got {other:?}"),
                }
            }
            _ => panic!("expected condition"),
        }

        // OR-connected conditions stay untouched.
        let q = crate::query::Query::new("ns")
            .where_eq("a", 1)
            .where_eq("b", 2)
            .op(OpType::Or);
        let kept = substitute_composite_indexes(&q.entries, &view);
        assert_eq!(kept.len(), 2);
    }
}
