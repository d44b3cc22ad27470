//! Online aggregation over the candidate row stream.

use super::SelectView;
use crate::idset::RowId;
use crate::query::{AggType, AggregateEntry};
use crate::results::{AggregationResult, FacetResult};
use crate::types::Variant;
use hashbrown::HashMap;

pub fn compute(
    entries: &[AggregateEntry],
    ids: &[RowId],
    view: &SelectView<'_>,
) -> Vec<AggregationResult> {
    entries.iter().map(|entry| compute_one(entry, ids, view)).collect()
}

fn field_values(view: &SelectView<'_>, id: RowId, field: &str) -> Vec<Variant> {
    let Some(payload) = view.payload(id) else { return Vec::new() };
    match view.payload_type.field_by_json_path(field) {
        Some(pos) => payload.field(pos).to_vec(),
        None => Vec::new(),
    }
}

fn compute_one(entry: &AggregateEntry, ids: &[RowId], view: &SelectView<'_>) -> AggregationResult {
    let mut result = AggregationResult::new(entry.agg_type, entry.fields.clone());
    match entry.agg_type {
        AggType::Count => {
            result.value = Some(ids.len() as f64);
        }
        AggType::Sum | AggType::Avg => {
            let mut sum = 0.0;
            let mut count = 0usize;
            for &id in ids {
                for field in &entry.fields {
                    for v in field_values(view, id, field) {
                        if let Some(x) = v.as_double() {
                            sum += x;
                            count += 1;
                        }
                    }
                }
            }
            result.value = Some(if entry.agg_type == AggType::Sum {
                sum
            } else if count > 0 {
                sum / count as f64
            } else {
                0.0
            });
        }
        AggType::Min | AggType::Max => {
            let mut best: Option<f64> = None;
            for &id in ids {
                for field in &entry.fields {
                    for v in field_values(view, id, field) {
                        if let Some(x) = v.as_double() {
                            best = Some(match best {
                                None => x,
                                Some(b) if entry.agg_type == AggType::Min => b.min(x),
                                Some(b) => b.max(x),
                            });
                        }
                    }
                }
            }
            result.value = best;
        }
        AggType::Facet => {
            let mut counts: HashMap<Vec<String>, usize> = HashMap::new();
            for &id in ids {
                let combo: Vec<String> = entry
                    .fields
                    .iter()
                    .map(|f| {
                        field_values(view, id, f)
                            .first()
                            .map(|v| v.to_string())
                            .unwrap_or_default()
                    })
                    .collect();
                *counts.entry(combo).or_insert(0) += 1;
            }
            let mut facets: Vec<FacetResult> = counts
                .into_iter()
                .map(|(values, count)| FacetResult { values, count })
                .collect();
            facets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.values.cmp(&b.values)));
            if let Some(limit) = entry.limit {
                facets.truncate(limit);
            }
            result.facets = facets;
        }
        AggType::Distinct => {
            let mut seen: Vec<String> = Vec::new();
            for &id in ids {
                for field in &entry.fields {
                    for v in field_values(view, id, field) {
                        let s = v.to_string();
                        if !seen.contains(&s) {
                            seen.push(s);
                        }
                    }
                }
            }
            result.distincts = seen;
        }
    }
    result
}
