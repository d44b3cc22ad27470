//! Core select execution. See the module docs for the planner rules.

use super::aggregator;
use super::preprocessor::substitute_composite_indexes;
use super::{JoinPreSelect, SelectView};
use crate::ctx::Context;
use crate::idset::{IdSet, RowId};
use crate::index::{Comparator, ComparatorField, SelectKeyResult, SelectOpts};
use crate::query::{FilterItem, FilterNode, JoinType, OpType, Query, QueryEntry};
use crate::results::{ItemRef, QueryResults, ResultContext};
use crate::types::Variant;
use eyre::Result;
use hashbrown::HashMap;

pub struct Selecter;

struct EvalOut {
    ids: IdSet,
    /// Full-text ranks; present iff an FT condition participated.
    ranks: Option<HashMap<RowId, f32>>,
}

impl Selecter {
    pub fn select(
        view: &SelectView<'_>,
        query: &Query,
        joins: &[JoinPreSelect],
        ctx: &Context,
    ) -> Result<QueryResults> {
        ctx.check()?;
        let mut explain = query.explain.then(Vec::new);

        let entries = substitute_composite_indexes(&query.entries, view);
        let eval = if entries.is_empty() {
            EvalOut { ids: IdSet::from_vec(view.all_ids()), ranks: None }
        } else {
            eval_items(&entries, view, ctx, &mut explain)?
        };
        let mut candidates = eval.ids;
        let ranks = eval.ranks;

        // Join pushdown on the materialized pre-results.
        for (no, join) in joins.iter().enumerate() {
            ctx.check()?;
            match join.join_type {
                JoinType::Inner => {
                    let mut kept = IdSet::new();
                    for &id in candidates.iter() {
                        if join.has_match(view, id) {
                            kept.add_unordered(id);
                        }
                    }
                    kept.commit();
                    candidates = kept;
                }
                JoinType::OrInner => {
                    let mut extended = candidates.clone();
                    for id in view.all_ids() {
                        if join.has_match(view, id) {
                            extended.add_unordered(id);
                        }
                    }
                    extended.commit();
                    candidates = extended;
                }
                JoinType::Left => {}
            }
            if let Some(lines) = &mut explain {
                lines.push(format!(
                    "join #{no}: {:?} preselect={} rows",
                    join.join_type,
                    join.preselect.len()
                ));
            }
        }

        let ordered = order_ids(&candidates, ranks.as_ref(), query, view, ctx, &mut explain)?;

        let total_count = ordered.len();
        let all_ids: Vec<RowId> = ordered.iter().map(|(id, _)| *id).collect();
        let aggregations = aggregator::compute(&query.aggregations, &all_ids, view);

        let offset = query.offset.min(ordered.len());
        let end = match query.limit {
            Some(limit) => (offset + limit).min(ordered.len()),
            None => ordered.len(),
        };
        let window = &ordered[offset..end];

        let mut results = QueryResults::new();
        let nsid = results.add_context(ResultContext {
            namespace: view.namespace.to_string(),
            payload_type: view.payload_type.clone(),
            tags_matcher: view.tags_matcher.clone(),
            fields_filter: query.select_filter.clone(),
            schema: view.schema.map(str::to_string),
        });
        let mut join_offsets = Vec::with_capacity(joins.len());
        for join in joins {
            let offset = results.contexts.len();
            for ctx in &join.preselect.contexts {
                results.contexts.push(ctx.clone());
            }
            join_offsets.push(offset);
        }

        for &(id, rank) in window {
            let Some(payload) = view.payload(id) else {
                continue;
            };
            let joined = joins
                .iter()
                .zip(&join_offsets)
                .map(|(join, &off)| join.matches_for(view, id, off))
                .collect();
            results.items.push(ItemRef { id, nsid, rank, value: payload.clone(), joined });
        }
        results.aggregations = aggregations;
        results.total_count = total_count;
        if let Some(lines) = explain {
            results.explain = Some(lines.join("\n"));
        }
        Ok(results)
    }
}

/// Entries evaluate left to right; an `Or` connector merges the entry into
/// the cluster before it, clusters combine with `And`/`Not`. Conditions
/// that would scan are deferred and applied as comparators to the
/// intersection of the index-served clusters.
fn eval_items(
    items: &[FilterItem],
    view: &SelectView<'_>,
    ctx: &Context,
    explain: &mut Option<Vec<String>>,
) -> Result<EvalOut> {
    let mut clusters: Vec<Vec<&FilterItem>> = Vec::new();
    for item in items {
        if item.op == OpType::Or && !clusters.is_empty() {
            clusters.last_mut().unwrap().push(item);
        } else {
            clusters.push(vec![item]);
        }
    }

    let mut candidates: Option<IdSet> = None;
    let mut ranks: Option<HashMap<RowId, f32>> = None;
    let mut deferred: Vec<(OpType, Comparator)> = Vec::new();

    for cluster in clusters {
        ctx.check()?;
        let head_op = cluster[0].op;

        // A lone scan-only condition defers to the comparator stage.
        if cluster.len() == 1 {
            if let FilterNode::Cond(entry) = &cluster[0].node {
                if condition_scans(entry, view, ctx)? {
                    if let Some(lines) = explain.as_mut() {
                        lines.push(format!("field: {} cond: {:?} via: scan", entry.field, entry.cond));
                    }
                    deferred.push((head_op, build_comparator(entry, view)));
                    continue;
                }
            }
        }

        let mut cluster_out: Option<EvalOut> = None;
        for member in cluster {
            let out = match &member.node {
                FilterNode::Bracket(inner) => eval_items(inner, view, ctx, explain)?,
                FilterNode::Cond(entry) => eval_condition(entry, view, ctx, explain)?,
            };
            cluster_out = Some(match cluster_out {
                None => out,
                Some(mut acc) => {
                    acc.ids.union_with(&out.ids);
                    acc.ranks = merge_ranks(acc.ranks, out.ranks);
                    acc
                }
            });
        }
        let out = cluster_out.expect("cluster is never empty");

        match head_op {
            OpType::And | OpType::Or => {
                ranks = merge_ranks(ranks, out.ranks);
                candidates = Some(match candidates {
                    None => out.ids,
                    Some(current) => current.intersect(&out.ids),
                });
            }
            OpType::Not => {
                let base = match candidates.take() {
                    Some(set) => set,
                    None => IdSet::from_vec(view.all_ids()),
                };
                let mut kept = IdSet::new();
                for &id in base.iter() {
                    if !out.ids.contains(id) {
                        kept.add_unordered(id);
                    }
                }
                kept.commit();
                candidates = Some(kept);
            }
        }
    }

    let mut ids = match candidates {
        Some(set) => set,
        None => IdSet::from_vec(view.all_ids()),
    };

    for (op, comparator) in &deferred {
        ctx.check()?;
        let negate = *op == OpType::Not;
        let mut kept = IdSet::new();
        for &id in ids.iter() {
            let Some(payload) = view.payload(id) else { continue };
            if comparator.matches(payload, view.tags_matcher) != negate {
                kept.add_unordered(id);
            }
        }
        kept.commit();
        ids = kept;
    }

    // Ranks are advisory; trim to the surviving candidates.
    let ranks = ranks.map(|mut map| {
        map.retain(|id, _| ids.contains(*id));
        map
    });
    Ok(EvalOut { ids, ranks })
}

fn merge_ranks(
    a: Option<HashMap<RowId, f32>>,
    b: Option<HashMap<RowId, f32>>,
) -> Option<HashMap<RowId, f32>> {
    match (a, b) {
        (None, x) => x,
        (x, None) => x,
        (Some(mut a), Some(b)) => {
            for (id, rank) in b {
                let slot = a.entry(id).or_insert(0.0);
                if rank > *slot {
                    *slot = rank;
                }
            }
            Some(a)
        }
    }
}

/// True when the condition has no index able to serve it (missing index
/// or a store-kind / unsupported-condition fallback).
fn condition_scans(entry: &QueryEntry, view: &SelectView<'_>, ctx: &Context) -> Result<bool> {
    let Some((_, index)) = view.index_of_field(&entry.field) else {
        return Ok(true);
    };
    if index.is_fulltext() {
        return Ok(false);
    }
    let opts = SelectOpts { items_count: view.live_count(), ..Default::default() };
    match index.select_key(&entry.values, entry.cond, opts, ctx) {
        Ok(SelectKeyResult::Scan) => Ok(true),
        Ok(_) => Ok(false),
        Err(err) => Err(err),
    }
}

fn eval_condition(
    entry: &QueryEntry,
    view: &SelectView<'_>,
    ctx: &Context,
    explain: &mut Option<Vec<String>>,
) -> Result<EvalOut> {
    let Some((_, index)) = view.index_of_field(&entry.field) else {
        // No index at all: comparator over every live row.
        let comparator = build_comparator(entry, view);
        let mut ids = IdSet::new();
        for id in view.all_ids() {
            if let Some(payload) = view.payload(id) {
                if comparator.matches(payload, view.tags_matcher) {
                    ids.add_unordered(id);
                }
            }
        }
        ids.commit();
        if let Some(lines) = explain.as_mut() {
            lines.push(format!("field: {} cond: {:?} via: scan matched: {}", entry.field, entry.cond, ids.len()));
        }
        return Ok(EvalOut { ids, ranks: None });
    };

    let opts = SelectOpts {
        items_count: view.live_count(),
        unbuilt_sort_orders: !view.sort_orders_built,
        ..Default::default()
    };
    match index.select_key(&entry.values, entry.cond, opts, ctx)? {
        SelectKeyResult::Ids(sets) => {
            let mut ids = IdSet::new();
            for set in &sets {
                for &id in set.iter() {
                    ids.add_unordered(id);
                }
            }
            ids.commit();
            if let Some(lines) = explain.as_mut() {
                lines.push(format!(
                    "field: {} cond: {:?} via: index '{}' keys: {} matched: {}",
                    entry.field,
                    entry.cond,
                    index.name(),
                    sets.len(),
                    ids.len()
                ));
            }
            Ok(EvalOut { ids, ranks: None })
        }
        SelectKeyResult::Ranked(hits) => {
            let mut ids = IdSet::new();
            let mut ranks = HashMap::with_capacity(hits.len());
            for (id, rank) in hits {
                ids.add_unordered(id);
                ranks.insert(id, rank);
            }
            ids.commit();
            if let Some(lines) = explain.as_mut() {
                lines.push(format!(
                    "field: {} cond: {:?} via: fulltext '{}' matched: {}",
                    entry.field,
                    entry.cond,
                    index.name(),
                    ids.len()
                ));
            }
            Ok(EvalOut { ids, ranks: Some(ranks) })
        }
        SelectKeyResult::Scan => {
            let comparator = build_comparator(entry, view);
            let mut ids = IdSet::new();
            for id in view.all_ids() {
                if let Some(payload) = view.payload(id) {
                    if comparator.matches(payload, view.tags_matcher) {
                        ids.add_unordered(id);
                    }
                }
            }
            ids.commit();
            if let Some(lines) = explain.as_mut() {
                lines.push(format!("field: {} cond: {:?} via: scan matched: {}", entry.field, entry.cond, ids.len()));
            }
            Ok(EvalOut { ids, ranks: None })
        }
    }
}

fn build_comparator(entry: &QueryEntry, view: &SelectView<'_>) -> Comparator {
    let field = match view.payload_type.field_by_json_path(&entry.field) {
        Some(pos) if pos > 0 => ComparatorField::Column(pos),
        _ => ComparatorField::JsonPath(entry.field.clone()),
    };
    Comparator::new(field, entry.cond, entry.values.clone())
}

fn sort_key(view: &SelectView<'_>, id: RowId, field: &str) -> Variant {
    let Some(payload) = view.payload(id) else { return Variant::Null };
    match view.payload_type.field_by_json_path(field) {
        Some(pos) => payload.field(pos).first().cloned().unwrap_or(Variant::Null),
        None => {
            crate::cjson::decode(payload.tuple(), view.tags_matcher)
                .ok()
                .and_then(|doc| {
                    let mut cur = &doc;
                    for seg in field.split('.') {
                        cur = cur.as_object()?.get(seg)?;
                    }
                    json_scalar_to_variant(cur)
                })
                .unwrap_or(Variant::Null)
        }
    }
}

fn json_scalar_to_variant(v: &serde_json::Value) -> Option<Variant> {
    match v {
        serde_json::Value::Bool(b) => Some(Variant::Bool(*b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Variant::Int64)
            .or_else(|| n.as_f64().map(Variant::Double)),
        serde_json::Value::String(s) => Some(Variant::from(s.as_str())),
        _ => None,
    }
}

fn order_ids(
    candidates: &IdSet,
    ranks: Option<&HashMap<RowId, f32>>,
    query: &Query,
    view: &SelectView<'_>,
    ctx: &Context,
    explain: &mut Option<Vec<String>>,
) -> Result<Vec<(RowId, f32)>> {
    ctx.check()?;
    let rank_of = |id: RowId| ranks.and_then(|m| m.get(&id)).copied().unwrap_or(0.0);

    if query.sort.is_empty() {
        let mut out: Vec<(RowId, f32)> =
            candidates.iter().map(|&id| (id, rank_of(id))).collect();
        if ranks.is_some() {
            // Full-text dominance: rank order, stable by id.
            out.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        }
        return Ok(out);
    }

    // Index-driven ORDER BY: single key, ordered index, built orders, and
    // no full-text ranks in play.
    if query.sort.len() == 1 && ranks.is_none() && view.sort_orders_built {
        let sort = &query.sort[0];
        if let Some((_, index)) = view.index_of_field(&sort.field) {
            if let Some(orders) = index.sort_orders() {
                if let Some(lines) = explain.as_mut() {
                    lines.push(format!("sort: index '{}' orders", sort.field));
                }
                let mut out = Vec::with_capacity(candidates.len());
                let mut seen = IdSet::new();
                for &id in orders {
                    if candidates.contains(id) {
                        out.push((id, 0.0));
                        seen.add(id);
                    }
                }
                // Sparse rows missing from the orders trail the result.
                for &id in candidates.iter() {
                    if !seen.contains(id) {
                        out.push((id, 0.0));
                    }
                }
                if sort.desc {
                    out.reverse();
                }
                return Ok(out);
            }
        }
    }

    if let Some(lines) = explain.as_mut() {
        lines.push("sort: by-value".to_string());
    }
    let mut out: Vec<(RowId, f32)> = candidates.iter().map(|&id| (id, rank_of(id))).collect();
    out.sort_by(|a, b| {
        for sort in &query.sort {
            let ka = sort_key(view, a.0, &sort.field);
            let kb = sort_key(view, b.0, &sort.field);
            let mut ord = ka.total_cmp(&kb);
            if sort.desc {
                ord = ord.reverse();
            }
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        a.0.cmp(&b.0)
    });
    Ok(out)
}
