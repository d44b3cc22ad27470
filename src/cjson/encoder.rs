use super::{TAG_ARRAY, TAG_BOOL, TAG_DOUBLE, TAG_END, TAG_NULL, TAG_OBJECT, TAG_STRING, TAG_VARINT, TYPE_BITS};
use crate::encoding::Writer;
use crate::error::Error;
use crate::tags::TagsMatcher;
use eyre::Result;
use serde_json::Value;

/// Encodes a JSON document to CJSON, creating tags for unseen paths. The
/// document root must be an object.
pub fn encode(doc: &Value, tm: &mut TagsMatcher) -> Result<Vec<u8>> {
    let Value::Object(map) = doc else {
        return Err(Error::parse_json("document root must be an object").into());
    };
    let mut w = Writer::with_capacity(128);
    encode_object_body(map, tm, &mut w)?;
    Ok(w.into_bytes())
}

fn put_ctag(w: &mut Writer, tag: u32, typ: u32) {
    w.put_uvarint(u64::from(tag) << TYPE_BITS | u64::from(typ));
}

fn encode_object_body(
    map: &serde_json::Map<String, Value>,
    tm: &mut TagsMatcher,
    w: &mut Writer,
) -> Result<()> {
    for (name, value) in map {
        let tag = tm
            .name2tag(name, true)
            .ok_or_else(|| Error::parse_json(format!("can't allocate tag for '{name}'")))?;
        encode_value(value, tag, tm, w)?;
    }
    put_ctag(w, 0, TAG_END);
    Ok(())
}

fn encode_value(value: &Value, tag: u32, tm: &mut TagsMatcher, w: &mut Writer) -> Result<()> {
    match value {
        Value::Null => put_ctag(w, tag, TAG_NULL),
        Value::Bool(b) => {
            put_ctag(w, tag, TAG_BOOL);
            w.put_uvarint(u64::from(*b));
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                put_ctag(w, tag, TAG_VARINT);
                w.put_varint(i);
            } else if let Some(f) = n.as_f64() {
                put_ctag(w, tag, TAG_DOUBLE);
                w.put_double(f);
            } else {
                return Err(Error::parse_json("unrepresentable JSON number").into());
            }
        }
        Value::String(s) => {
            put_ctag(w, tag, TAG_STRING);
            w.put_vstring(s);
        }
        Value::Array(items) => {
            put_ctag(w, tag, TAG_ARRAY);
            encode_array(items, tm, w)?;
        }
        Value::Object(map) => {
            put_ctag(w, tag, TAG_OBJECT);
            encode_object_body(map, tm, w)?;
        }
    }
    Ok(())
}

fn scalar_type(value: &Value) -> Option<u32> {
    match value {
        Value::Bool(_) => Some(TAG_BOOL),
        Value::Number(n) if n.as_i64().is_some() => Some(TAG_VARINT),
        Value::Number(_) => Some(TAG_DOUBLE),
        Value::String(_) => Some(TAG_STRING),
        Value::Null => Some(TAG_NULL),
        _ => None,
    }
}

fn encode_array(items: &[Value], tm: &mut TagsMatcher, w: &mut Writer) -> Result<()> {
    // Homogeneous scalar arrays pack raw element values; anything else
    // falls back to per-element ctags with name 0.
    let elem_type = match items.split_first() {
        Some((first, rest)) => match scalar_type(first) {
            Some(t) if rest.iter().all(|v| scalar_type(v) == Some(t)) => t,
            _ => TAG_OBJECT,
        },
        None => TAG_NULL,
    };
    w.put_uvarint((items.len() as u64) << TYPE_BITS | u64::from(elem_type));

    if elem_type == TAG_OBJECT {
        for item in items {
            encode_value(item, 0, tm, w)?;
        }
        return Ok(());
    }
    for item in items {
        match item {
            Value::Bool(b) => w.put_uvarint(u64::from(*b)),
            Value::Number(n) => {
                if elem_type == TAG_VARINT {
                    w.put_varint(n.as_i64().unwrap());
                } else {
                    w.put_double(n.as_f64().unwrap());
                }
            }
            Value::String(s) => w.put_vstring(s),
            Value::Null => {}
            _ => unreachable!("non-scalar in scalar array"),
        }
    }
    Ok(())
}
