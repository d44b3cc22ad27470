use super::{TAG_ARRAY, TAG_BOOL, TAG_DOUBLE, TAG_END, TAG_NULL, TAG_OBJECT, TAG_STRING, TAG_VARINT, TYPE_BITS, TYPE_MASK};
use crate::encoding::Reader;
use crate::error::Error;
use crate::tags::TagsMatcher;
use eyre::Result;
use serde_json::{Map, Value};

/// Decodes CJSON back into a JSON document using the namespace matcher.
/// Fails with `errTagsMissmatch` when the bytes reference a tag the
/// matcher does not know, which signals an epoch mismatch.
pub fn decode(bytes: &[u8], tm: &TagsMatcher) -> Result<Value> {
    let mut r = Reader::new(bytes);
    let map = decode_object_body(&mut r, tm)?;
    Ok(Value::Object(map))
}

fn decode_object_body(r: &mut Reader<'_>, tm: &TagsMatcher) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    loop {
        let ctag = r.get_uvarint()?;
        let typ = (ctag & TYPE_MASK) as u32;
        let tag = (ctag >> TYPE_BITS) as u32;
        if typ == TAG_END {
            return Ok(map);
        }
        let name = tm.tag2name(tag)?;
        let value = decode_value(typ, r, tm)?;
        map.insert(name.to_string(), value);
    }
}

fn decode_value(typ: u32, r: &mut Reader<'_>, tm: &TagsMatcher) -> Result<Value> {
    Ok(match typ {
        TAG_NULL => Value::Null,
        TAG_BOOL => Value::Bool(r.get_uvarint()? != 0),
        TAG_VARINT => Value::from(r.get_varint()?),
        TAG_DOUBLE => json_double(r.get_double()?)?,
        TAG_STRING => Value::from(r.get_vstring()?),
        TAG_ARRAY => decode_array(r, tm)?,
        TAG_OBJECT => Value::Object(decode_object_body(r, tm)?),
        other => return Err(Error::params(format!("bad cjson type tag {other}")).into()),
    })
}

fn decode_array(r: &mut Reader<'_>, tm: &TagsMatcher) -> Result<Value> {
    let atag = r.get_uvarint()?;
    let elem_type = (atag & TYPE_MASK) as u32;
    let count = (atag >> TYPE_BITS) as usize;
    let mut items = Vec::with_capacity(count.min(4096));

    if elem_type == TAG_OBJECT {
        for _ in 0..count {
            let ctag = r.get_uvarint()?;
            let typ = (ctag & TYPE_MASK) as u32;
            items.push(decode_value(typ, r, tm)?);
        }
        return Ok(Value::Array(items));
    }
    for _ in 0..count {
        items.push(match elem_type {
            TAG_BOOL => Value::Bool(r.get_uvarint()? != 0),
            TAG_VARINT => Value::from(r.get_varint()?),
            TAG_DOUBLE => json_double(r.get_double()?)?,
            TAG_STRING => Value::from(r.get_vstring()?),
            TAG_NULL => Value::Null,
            other => return Err(Error::params(format!("bad cjson array element tag {other}")).into()),
        });
    }
    Ok(Value::Array(items))
}

fn json_double(v: f64) -> Result<Value> {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .ok_or_else(|| Error::params("non-finite double in cjson").into())
}
