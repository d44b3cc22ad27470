//! # Query Results
//!
//! Cursor over the rows a select produced. Each [`ItemRef`] pins its
//! [`PayloadValue`] through the refcount, so results stay readable after
//! the namespace reuses the row slot. Per-namespace context (payload type
//! and tags matcher snapshots, projection filter, schema) rides along so
//! items can be rendered to JSON or CJSON without touching the namespace
//! again. Results are immutable once the selecter hands them out.

use crate::cjson;
use crate::error::Error;
use crate::idset::RowId;
use crate::payload::{PayloadType, PayloadValue};
use crate::query::AggType;
use crate::tags::TagsMatcher;
use crate::types::Variant;
use eyre::Result;
use serde::Serialize;

/// Snapshot of one namespace's rendering state.
#[derive(Clone)]
pub struct ResultContext {
    pub namespace: String,
    pub payload_type: PayloadType,
    pub tags_matcher: TagsMatcher,
    pub fields_filter: Vec<String>,
    pub schema: Option<String>,
}

#[derive(Clone)]
pub struct ItemRef {
    pub id: RowId,
    /// Index into [`QueryResults::contexts`].
    pub nsid: usize,
    /// Full-text rank; 0 outside FT queries.
    pub rank: f32,
    pub value: PayloadValue,
    /// Joined sub-rows, one bucket per join in query order.
    pub joined: Vec<Vec<ItemRef>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FacetResult {
    pub values: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregationResult {
    #[serde(rename = "type")]
    pub agg_type: String,
    pub fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub facets: Vec<FacetResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub distincts: Vec<String>,
}

impl AggregationResult {
    pub fn new(agg_type: AggType, fields: Vec<String>) -> Self {
        let name = match agg_type {
            AggType::Sum => "sum",
            AggType::Avg => "avg",
            AggType::Min => "min",
            AggType::Max => "max",
            AggType::Count => "count",
            AggType::Facet => "facet",
            AggType::Distinct => "distinct",
        };
        Self {
            agg_type: name.to_string(),
            fields,
            value: None,
            facets: Vec::new(),
            distincts: Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct QueryResults {
    pub items: Vec<ItemRef>,
    pub contexts: Vec<ResultContext>,
    pub aggregations: Vec<AggregationResult>,
    pub explain: Option<String>,
    /// Total matches ignoring limit/offset; filled when requested.
    pub total_count: usize,
}

impl QueryResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn add_context(&mut self, ctx: ResultContext) -> usize {
        self.contexts.push(ctx);
        self.contexts.len() - 1
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ItemRef> {
        self.items.iter()
    }

    /// Renders item `idx` as a JSON document, applying the projection
    /// filter and inlining joined rows as `joined_<namespace>` arrays.
    pub fn to_json(&self, idx: usize) -> Result<serde_json::Value> {
        let item = self
            .items
            .get(idx)
            .ok_or_else(|| Error::params(format!("item index {idx} out of range")))?;
        self.render_item(item)
    }

    fn render_item(&self, item: &ItemRef) -> Result<serde_json::Value> {
        let ctx = &self.contexts[item.nsid];
        let mut doc = cjson::decode(item.value.tuple(), &ctx.tags_matcher)?;

        if !ctx.fields_filter.is_empty() {
            if let serde_json::Value::Object(map) = &mut doc {
                map.retain(|k, _| ctx.fields_filter.iter().any(|f| f == k));
            }
        }
        if !item.joined.is_empty() {
            if let serde_json::Value::Object(map) = &mut doc {
                for bucket in &item.joined {
                    let Some(first) = bucket.first() else { continue };
                    let joined_ns = self.contexts[first.nsid].namespace.clone();
                    let rows: Result<Vec<_>> =
                        bucket.iter().map(|j| self.render_item(j)).collect();
                    map.insert(format!("joined_{joined_ns}"), serde_json::Value::Array(rows?));
                }
            }
        }
        Ok(doc)
    }

    /// Raw CJSON bytes of item `idx`, valid against the context's tags
    /// matcher snapshot (clients check the state token).
    pub fn to_cjson(&self, idx: usize) -> Result<&[u8]> {
        let item = self
            .items
            .get(idx)
            .ok_or_else(|| Error::params(format!("item index {idx} out of range")))?;
        Ok(item.value.tuple())
    }

    /// UNION ALL: appends another result set, rebasing its namespace
    /// contexts into this one.
    pub fn merge_from(&mut self, other: QueryResults) {
        let offset = self.contexts.len();
        self.contexts.extend(other.contexts);
        for mut item in other.items {
            item.nsid += offset;
            for bucket in &mut item.joined {
                for joined in bucket {
                    joined.nsid += offset;
                }
            }
            self.items.push(item);
        }
        self.aggregations.extend(other.aggregations);
        self.total_count += other.total_count;
    }

    /// Typed field access without JSON materialization.
    pub fn field_value(&self, idx: usize, field: &str) -> Option<Variant> {
        let item = self.items.get(idx)?;
        let ctx = &self.contexts[item.nsid];
        let pos = ctx.payload_type.field_by_json_path(field)?;
        item.value.field(pos).first().cloned()
    }
}
