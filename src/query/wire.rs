//! Versioned binary wire form of the query AST.
//!
//! The server's RPC layer ships queries in this form; field names travel as
//! strings (payload field ids are a namespace-local concept and queries
//! must survive DDL between client and server).

use super::{
    AggType, AggregateEntry, CondType, FilterItem, FilterNode, JoinEntry, JoinType, JoinedQuery,
    OpType, Query, QueryEntry, QueryType, SortingEntry, UpdateEntry, UpdateMode,
};
use crate::encoding::{Reader, Writer};
use crate::error::Error;
use crate::types::{KeyString, Point, Variant, VariantArray};
use eyre::Result;

const WIRE_VERSION: u64 = 1;

impl Query {
    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(128);
        w.put_uvarint(WIRE_VERSION);
        put_query(&mut w, self);
        w.into_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Query> {
        let mut r = Reader::new(bytes);
        let version = r.get_uvarint()?;
        if version != WIRE_VERSION {
            return Err(Error::params(format!("unsupported query wire version {version}")).into());
        }
        get_query(&mut r)
    }
}

fn put_query(w: &mut Writer, q: &Query) {
    w.put_vstring(&q.namespace);
    w.put_uvarint(q.query_type as u64);
    put_filter_items(w, &q.entries);

    w.put_uvarint(q.sort.len() as u64);
    for s in &q.sort {
        w.put_vstring(&s.field);
        w.put_uvarint(u64::from(s.desc));
    }

    w.put_uvarint(q.aggregations.len() as u64);
    for a in &q.aggregations {
        w.put_uvarint(a.agg_type as u64);
        w.put_uvarint(a.fields.len() as u64);
        for f in &a.fields {
            w.put_vstring(f);
        }
        w.put_uvarint(a.limit.map(|l| l as u64 + 1).unwrap_or(0));
    }

    w.put_uvarint(q.joins.len() as u64);
    for j in &q.joins {
        w.put_uvarint(j.join_type as u64);
        w.put_uvarint(j.on.len() as u64);
        for e in &j.on {
            w.put_uvarint(e.op as u64);
            w.put_vstring(&e.left_field);
            w.put_vstring(&e.right_field);
            w.put_uvarint(e.cond as u64);
        }
        put_query(w, &j.query);
    }

    w.put_uvarint(q.merges.len() as u64);
    for m in &q.merges {
        put_query(w, m);
    }

    w.put_uvarint(q.update_fields.len() as u64);
    for u in &q.update_fields {
        w.put_vstring(&u.field);
        w.put_uvarint(u.mode as u64);
        put_values(w, &u.values);
    }

    w.put_uvarint(q.select_filter.len() as u64);
    for f in &q.select_filter {
        w.put_vstring(f);
    }

    w.put_uvarint(q.limit.map(|l| l as u64 + 1).unwrap_or(0));
    w.put_uvarint(q.offset as u64);
    w.put_uvarint(u64::from(q.explain));
    w.put_uvarint(u64::from(q.req_total));
}

fn get_query(r: &mut Reader<'_>) -> Result<Query> {
    let namespace = r.get_vstring()?.to_string();
    let query_type = match r.get_uvarint()? {
        0 => QueryType::Select,
        1 => QueryType::Update,
        2 => QueryType::Delete,
        3 => QueryType::Truncate,
        other => return Err(Error::params(format!("bad query type {other}")).into()),
    };
    let entries = get_filter_items(r)?;

    let mut q = Query::new(namespace);
    q.query_type = query_type;
    q.entries = entries;

    for _ in 0..r.get_uvarint()? {
        q.sort.push(SortingEntry {
            field: r.get_vstring()?.to_string(),
            desc: r.get_uvarint()? != 0,
        });
    }

    for _ in 0..r.get_uvarint()? {
        let agg_type = decode_agg(r.get_uvarint()?)?;
        let mut fields = Vec::new();
        for _ in 0..r.get_uvarint()? {
            fields.push(r.get_vstring()?.to_string());
        }
        let limit = match r.get_uvarint()? {
            0 => None,
            n => Some(n as usize - 1),
        };
        q.aggregations.push(AggregateEntry { agg_type, fields, limit });
    }

    for _ in 0..r.get_uvarint()? {
        let join_type = match r.get_uvarint()? {
            0 => JoinType::Inner,
            1 => JoinType::Left,
            2 => JoinType::OrInner,
            other => return Err(Error::params(format!("bad join type {other}")).into()),
        };
        let mut on = Vec::new();
        for _ in 0..r.get_uvarint()? {
            on.push(JoinEntry {
                op: decode_op(r.get_uvarint()?)?,
                left_field: r.get_vstring()?.to_string(),
                right_field: r.get_vstring()?.to_string(),
                cond: decode_cond(r.get_uvarint()?)?,
            });
        }
        let query = get_query(r)?;
        q.joins.push(JoinedQuery { join_type, query, on });
    }

    for _ in 0..r.get_uvarint()? {
        q.merges.push(get_query(r)?);
    }

    for _ in 0..r.get_uvarint()? {
        let field = r.get_vstring()?.to_string();
        let mode = match r.get_uvarint()? {
            0 => UpdateMode::SetField,
            1 => UpdateMode::DropField,
            other => return Err(Error::params(format!("bad update mode {other}")).into()),
        };
        let values = get_values(r)?;
        q.update_fields.push(UpdateEntry { field, values, mode });
    }

    for _ in 0..r.get_uvarint()? {
        q.select_filter.push(r.get_vstring()?.to_string());
    }

    q.limit = match r.get_uvarint()? {
        0 => None,
        n => Some(n as usize - 1),
    };
    q.offset = r.get_uvarint()? as usize;
    q.explain = r.get_uvarint()? != 0;
    q.req_total = r.get_uvarint()? != 0;
    Ok(q)
}

fn put_filter_items(w: &mut Writer, items: &[FilterItem]) {
    w.put_uvarint(items.len() as u64);
    for item in items {
        w.put_uvarint(item.op as u64);
        match &item.node {
            FilterNode::Cond(e) => {
                w.put_uvarint(0);
                w.put_vstring(&e.field);
                w.put_uvarint(e.cond as u64);
                put_values(w, &e.values);
            }
            FilterNode::Bracket(inner) => {
                w.put_uvarint(1);
                put_filter_items(w, inner);
            }
        }
    }
}

fn get_filter_items(r: &mut Reader<'_>) -> Result<Vec<FilterItem>> {
    let count = r.get_uvarint()? as usize;
    let mut out = Vec::with_capacity(count.min(256));
    for _ in 0..count {
        let op = decode_op(r.get_uvarint()?)?;
        let node = match r.get_uvarint()? {
            0 => FilterNode::Cond(QueryEntry {
                field: r.get_vstring()?.to_string(),
                cond: decode_cond(r.get_uvarint()?)?,
                values: get_values(r)?,
            }),
            1 => FilterNode::Bracket(get_filter_items(r)?),
            other => return Err(Error::params(format!("bad filter node kind {other}")).into()),
        };
        out.push(FilterItem { op, node });
    }
    Ok(out)
}

fn put_values(w: &mut Writer, values: &VariantArray) {
    w.put_uvarint(values.len() as u64);
    for v in values {
        put_variant(w, v);
    }
}

fn get_values(r: &mut Reader<'_>) -> Result<VariantArray> {
    let count = r.get_uvarint()? as usize;
    let mut out = VariantArray::new();
    for _ in 0..count {
        out.push(get_variant(r)?);
    }
    Ok(out)
}

fn put_variant(w: &mut Writer, v: &Variant) {
    match v {
        Variant::Null => w.put_uvarint(0),
        Variant::Bool(b) => {
            w.put_uvarint(1);
            w.put_uvarint(u64::from(*b));
        }
        Variant::Int(i) => {
            w.put_uvarint(2);
            w.put_varint(i64::from(*i));
        }
        Variant::Int64(i) => {
            w.put_uvarint(3);
            w.put_varint(*i);
        }
        Variant::Double(d) => {
            w.put_uvarint(4);
            w.put_double(*d);
        }
        Variant::String(s) => {
            w.put_uvarint(5);
            w.put_vstring(s);
        }
        Variant::Point(p) => {
            w.put_uvarint(6);
            w.put_double(p.x);
            w.put_double(p.y);
        }
        Variant::Composite(parts) => {
            w.put_uvarint(7);
            w.put_uvarint(parts.len() as u64);
            for p in parts.iter() {
                put_variant(w, p);
            }
        }
    }
}

fn get_variant(r: &mut Reader<'_>) -> Result<Variant> {
    Ok(match r.get_uvarint()? {
        0 => Variant::Null,
        1 => Variant::Bool(r.get_uvarint()? != 0),
        2 => Variant::Int(i32::try_from(r.get_varint()?).map_err(|_| Error::params("int overflow"))?),
        3 => Variant::Int64(r.get_varint()?),
        4 => Variant::Double(r.get_double()?),
        5 => Variant::String(KeyString::new(r.get_vstring()?)),
        6 => Variant::Point(Point::new(r.get_double()?, r.get_double()?)),
        7 => {
            let count = r.get_uvarint()? as usize;
            let mut parts = Vec::with_capacity(count.min(16));
            for _ in 0..count {
                parts.push(get_variant(r)?);
            }
            Variant::Composite(parts.into_boxed_slice())
        }
        other => return Err(Error::params(format!("bad variant kind {other}")).into()),
    })
}

fn decode_cond(v: u64) -> Result<CondType> {
    Ok(match v {
        0 => CondType::Any,
        1 => CondType::Eq,
        2 => CondType::Lt,
        3 => CondType::Le,
        4 => CondType::Gt,
        5 => CondType::Ge,
        6 => CondType::Range,
        7 => CondType::Set,
        8 => CondType::AllSet,
        9 => CondType::Empty,
        10 => CondType::Like,
        11 => CondType::DWithin,
        other => return Err(Error::params(format!("bad condition type {other}")).into()),
    })
}

fn decode_op(v: u64) -> Result<OpType> {
    Ok(match v {
        0 => OpType::And,
        1 => OpType::Or,
        2 => OpType::Not,
        other => return Err(Error::params(format!("bad op type {other}")).into()),
    })
}

fn decode_agg(v: u64) -> Result<AggType> {
    Ok(match v {
        0 => AggType::Sum,
        1 => AggType::Avg,
        2 => AggType::Min,
        3 => AggType::Max,
        4 => AggType::Count,
        5 => AggType::Facet,
        6 => AggType::Distinct,
        other => return Err(Error::params(format!("bad aggregation type {other}")).into()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn query_wire_round_trip() {
        let inner = Query::new("authors").where_eq("name", "k");
        let q = Query::new("books")
            .where_eq("id", 2)
            .open_bracket(
                OpType::Or,
                vec![FilterItem {
                    op: OpType::And,
                    node: FilterNode::Cond(QueryEntry {
                        field: "price".into(),
                        cond: CondType::Range,
                        values: smallvec![Variant::Int(1), Variant::Int(10)],
                    }),
                }],
            )
            .sort("price", true)
            .aggregate(AggType::Facet, vec!["genre".into()])
            .join(
                JoinType::Left,
                inner,
                vec![JoinEntry {
                    op: OpType::And,
                    left_field: "author_id".into(),
                    right_field: "id".into(),
                    cond: CondType::Eq,
                }],
            )
            .limit(10)
            .offset(2);

        let bytes = q.serialize();
        let back = Query::deserialize(&bytes).unwrap();
        assert_eq!(back, q);
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut bytes = Query::new("x").serialize();
        bytes[0] = 99;
        assert!(Query::deserialize(&bytes).is_err());
    }
}
