//! # CJSON Codec
//!
//! Compact binary JSON: every node is prefixed with a varint *ctag* packing
//! the field's numeric tag (via the namespace [`TagsMatcher`]) and a 3-bit
//! type:
//!
//! ```text
//! ctag    = (name_tag << 3) | type
//! type    = End=0 | Null=1 | Bool=2 | Varint=3 | Double=4 |
//!           String=5 | Array=6 | Object=7
//! ```
//!
//! A ctag of `0` (tag 0, type `End`) terminates the enclosing object, so an
//! empty document is the single byte `0x00` inside its object frame.
//!
//! Arrays carry an *atag* after the ctag: `(count << 3) | elem_type`. When
//! `elem_type` is a scalar the elements follow raw, without per-element
//! ctags; heterogeneous and object arrays use `elem_type = Object` and each
//! element carries its own ctag with name 0.
//!
//! Integers are zigzag varints; doubles are little-endian IEEE; strings are
//! length-prefixed UTF-8. Documents encoded against an older matcher decode
//! fine with any newer version of the same epoch, because tags are stable.

mod decoder;
mod encoder;

pub use decoder::decode;
pub use encoder::encode;

use crate::error::Error;
use crate::payload::PayloadType;
use crate::types::{KeyValueKind, Point, Variant, VariantArray};
use eyre::Result;

pub(crate) const TAG_END: u32 = 0;
pub(crate) const TAG_NULL: u32 = 1;
pub(crate) const TAG_BOOL: u32 = 2;
pub(crate) const TAG_VARINT: u32 = 3;
pub(crate) const TAG_DOUBLE: u32 = 4;
pub(crate) const TAG_STRING: u32 = 5;
pub(crate) const TAG_ARRAY: u32 = 6;
pub(crate) const TAG_OBJECT: u32 = 7;

pub(crate) const TYPE_BITS: u32 = 3;
pub(crate) const TYPE_MASK: u64 = 0x7;

/// Pulls the values for every non-tuple payload field out of a decoded
/// document, converted to the field's key kind. Missing fields yield an
/// empty array (sparse semantics); scalar fields reject JSON arrays and
/// vice versa.
pub fn extract_payload_fields(
    doc: &serde_json::Value,
    payload_type: &PayloadType,
) -> Result<Vec<VariantArray>> {
    let mut out = Vec::with_capacity(payload_type.num_fields());
    out.push(VariantArray::new()); // tuple slot stays empty
    for idx in 1..payload_type.num_fields() {
        let field = payload_type.field(idx);
        let path = field.json_paths.first().map(String::as_str).unwrap_or(&field.name);
        let value = lookup_path(doc, path);
        out.push(json_to_field_values(value, field.kind, field.is_array, &field.name)?);
    }
    Ok(out)
}

/// Extraction for a single field, used when DDL backfills a new index
/// from existing documents.
pub fn extract_field_values(
    doc: &serde_json::Value,
    path: &str,
    kind: KeyValueKind,
    is_array: bool,
) -> Result<VariantArray> {
    json_to_field_values(lookup_path(doc, path), kind, is_array, path)
}

fn lookup_path<'a>(doc: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut cur = doc;
    for seg in path.split('.') {
        cur = cur.as_object()?.get(seg)?;
    }
    Some(cur)
}

fn json_to_field_values(
    value: Option<&serde_json::Value>,
    kind: KeyValueKind,
    is_array: bool,
    field: &str,
) -> Result<VariantArray> {
    let mut out = VariantArray::new();
    let Some(value) = value else {
        return Ok(out);
    };
    match value {
        serde_json::Value::Null => {}
        serde_json::Value::Array(items) => {
            if !is_array && kind != KeyValueKind::Point {
                return Err(Error::params(format!(
                    "field '{field}' is scalar but document holds an array"
                ))
                .into());
            }
            if kind == KeyValueKind::Point && !is_array {
                out.push(json_point(items, field)?);
                return Ok(out);
            }
            for item in items {
                out.push(json_scalar(item, kind, field)?);
            }
        }
        // A bare scalar lands in an array field as a one-element array.
        other => out.push(json_scalar(other, kind, field)?),
    }
    Ok(out)
}

fn json_point(items: &[serde_json::Value], field: &str) -> Result<Variant> {
    if items.len() != 2 {
        return Err(Error::params(format!("field '{field}': point needs [x, y]")).into());
    }
    let x = items[0]
        .as_f64()
        .ok_or_else(|| Error::params(format!("field '{field}': point x is not a number")))?;
    let y = items[1]
        .as_f64()
        .ok_or_else(|| Error::params(format!("field '{field}': point y is not a number")))?;
    Ok(Variant::Point(Point::new(x, y)))
}

fn json_scalar(value: &serde_json::Value, kind: KeyValueKind, field: &str) -> Result<Variant> {
    let raw = match value {
        serde_json::Value::Bool(b) => Variant::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Variant::Int64(i)
            } else if let Some(f) = n.as_f64() {
                Variant::Double(f)
            } else {
                return Err(Error::params(format!("field '{field}': unrepresentable number")).into());
            }
        }
        serde_json::Value::String(s) => Variant::from(s.as_str()),
        serde_json::Value::Null => Variant::Null,
        _ => {
            return Err(Error::params(format!(
                "field '{field}': expected scalar, got {value}"
            ))
            .into())
        }
    };
    raw.convert(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::TagsMatcher;
    use serde_json::json;

    #[test]
    fn decode_encode_is_identity() {
        let mut tm = TagsMatcher::new();
        let doc = json!({
            "id": 7,
            "title": "hello",
            "price": -2.5,
            "tags": ["x", "y"],
            "nested": {"flag": true, "vals": [1, 2, 3]},
            "nothing": null,
            "mixed": [1, "two", {"deep": false}]
        });
        let bytes = encode(&doc, &mut tm).unwrap();
        let back = decode(&bytes, &tm).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn newer_matcher_version_still_decodes() {
        let mut tm = TagsMatcher::new();
        let doc = json!({"a": 1});
        let bytes = encode(&doc, &mut tm).unwrap();
        tm.name2tag("later_field", true);
        assert_eq!(decode(&bytes, &tm).unwrap(), doc);
    }

    #[test]
    fn extracts_typed_field_values() {
        let mut pt = PayloadType::new();
        pt.add_field("id", KeyValueKind::Int, false, vec!["id".into()]).unwrap();
        pt.add_field("tags", KeyValueKind::String, true, vec!["tags".into()]).unwrap();
        pt.add_field("spot", KeyValueKind::Point, false, vec!["spot".into()]).unwrap();

        let doc = json!({"id": 3, "tags": ["a", "b"], "spot": [1.0, 2.0]});
        let cols = extract_payload_fields(&doc, &pt).unwrap();
        assert_eq!(cols[1].as_slice(), &[Variant::Int(3)]);
        assert_eq!(cols[2].len(), 2);
        assert_eq!(cols[3][0].as_point().unwrap(), Point::new(1.0, 2.0));
    }

    #[test]
    fn scalar_field_rejects_array_value() {
        let mut pt = PayloadType::new();
        pt.add_field("id", KeyValueKind::Int, false, vec!["id".into()]).unwrap();
        let doc = json!({"id": [1, 2]});
        assert!(extract_payload_fields(&doc, &pt).is_err());
    }

    #[test]
    fn missing_field_extracts_empty() {
        let mut pt = PayloadType::new();
        pt.add_field("id", KeyValueKind::Int, false, vec!["id".into()]).unwrap();
        let cols = extract_payload_fields(&json!({}), &pt).unwrap();
        assert!(cols[1].is_empty());
    }
}
