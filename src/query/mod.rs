//! # Query Model
//!
//! The query AST consumed by the planner: a tree of field conditions glued
//! by logical operators and brackets, plus the modifiers: sort entries,
//! aggregations, joins, merges, limit/offset and the UPDATE/DELETE payload.
//!
//! Queries arrive three ways: built programmatically with the fluent
//! methods on [`Query`], parsed from the SQL subset ([`sql::parse`]), or
//! deserialized from the versioned binary wire form ([`Query::serialize`] /
//! [`Query::deserialize`]).

pub mod sql;

mod wire;

use crate::types::{Variant, VariantArray};
use smallvec::smallvec;

/// Condition operator of one query entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CondType {
    /// Field has any non-null value.
    Any,
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    /// Inclusive range over two values.
    Range,
    /// Matches any of the supplied values.
    Set,
    /// Array field contains all supplied values.
    AllSet,
    /// Field is absent or null.
    Empty,
    /// SQL LIKE with `%` wildcards.
    Like,
    /// Point within distance: values are `[x, y, distance]`.
    DWithin,
}

/// Logical connector preceding an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpType {
    #[default]
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryEntry {
    pub field: String,
    pub cond: CondType,
    pub values: VariantArray,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    Cond(QueryEntry),
    Bracket(Vec<FilterItem>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterItem {
    pub op: OpType,
    pub node: FilterNode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Select,
    Update,
    Delete,
    Truncate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortingEntry {
    pub field: String,
    pub desc: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggType {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Facet,
    Distinct,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateEntry {
    pub agg_type: AggType,
    pub fields: Vec<String>,
    /// Facet result cap; unlimited when `None`.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    /// Inner join whose matches OR into the parent filter instead of
    /// restricting it.
    OrInner,
}

/// One field-to-field equation of a join's ON clause.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinEntry {
    pub op: OpType,
    pub left_field: String,
    pub right_field: String,
    pub cond: CondType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinedQuery {
    pub join_type: JoinType,
    pub query: Query,
    pub on: Vec<JoinEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    SetField,
    DropField,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEntry {
    pub field: String,
    pub values: VariantArray,
    pub mode: UpdateMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub namespace: String,
    pub query_type: QueryType,
    pub entries: Vec<FilterItem>,
    pub sort: Vec<SortingEntry>,
    pub aggregations: Vec<AggregateEntry>,
    pub joins: Vec<JoinedQuery>,
    pub merges: Vec<Query>,
    pub update_fields: Vec<UpdateEntry>,
    /// Projection: empty means all fields.
    pub select_filter: Vec<String>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub explain: bool,
    /// Also compute the total count ignoring limit/offset.
    pub req_total: bool,
}

impl Query {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            query_type: QueryType::Select,
            entries: Vec::new(),
            sort: Vec::new(),
            aggregations: Vec::new(),
            joins: Vec::new(),
            merges: Vec::new(),
            update_fields: Vec::new(),
            select_filter: Vec::new(),
            limit: None,
            offset: 0,
            explain: false,
            req_total: false,
        }
    }

    pub fn where_(mut self, field: impl Into<String>, cond: CondType, values: VariantArray) -> Self {
        self.entries.push(FilterItem {
            op: OpType::And,
            node: FilterNode::Cond(QueryEntry { field: field.into(), cond, values }),
        });
        self
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Variant>) -> Self {
        self.where_(field, CondType::Eq, smallvec![value.into()])
    }

    pub fn op(mut self, op: OpType) -> Self {
        if let Some(last) = self.entries.last_mut() {
            last.op = op;
        }
        self
    }

    /// Re-tags the most recent entry's connector; used by builders that
    /// append first and learn the connector afterwards.
    pub fn open_bracket(mut self, op: OpType, items: Vec<FilterItem>) -> Self {
        self.entries.push(FilterItem { op, node: FilterNode::Bracket(items) });
        self
    }

    pub fn sort(mut self, field: impl Into<String>, desc: bool) -> Self {
        self.sort.push(SortingEntry { field: field.into(), desc });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn aggregate(mut self, agg_type: AggType, fields: Vec<String>) -> Self {
        self.aggregations.push(AggregateEntry { agg_type, fields, limit: None });
        self
    }

    pub fn join(mut self, join_type: JoinType, query: Query, on: Vec<JoinEntry>) -> Self {
        self.joins.push(JoinedQuery { join_type, query, on });
        self
    }

    pub fn merge(mut self, other: Query) -> Self {
        self.merges.push(other);
        self
    }

    pub fn set_field(mut self, field: impl Into<String>, values: VariantArray) -> Self {
        self.query_type = QueryType::Update;
        self.update_fields.push(UpdateEntry {
            field: field.into(),
            values,
            mode: UpdateMode::SetField,
        });
        self
    }

    pub fn drop_field(mut self, field: impl Into<String>) -> Self {
        self.query_type = QueryType::Update;
        self.update_fields.push(UpdateEntry {
            field: field.into(),
            values: VariantArray::new(),
            mode: UpdateMode::DropField,
        });
        self
    }

    pub fn explain(mut self) -> Self {
        self.explain = true;
        self
    }

    /// Fields referenced anywhere in the filter tree, joins included.
    pub fn condition_fields(&self) -> Vec<&str> {
        fn walk<'a>(items: &'a [FilterItem], out: &mut Vec<&'a str>) {
            for item in items {
                match &item.node {
                    FilterNode::Cond(e) => out.push(&e.field),
                    FilterNode::Bracket(inner) => walk(inner, out),
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.entries, &mut out);
        out
    }
}
