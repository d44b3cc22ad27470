//! # Binary Encoding Primitives
//!
//! Shared low-level serialization used by the CJSON codec, sys-records and
//! the WAL: base-128 varints plus a cursor-style reader/writer pair.

mod serializer;
mod varint;

pub use serializer::{Reader, Writer};
pub use varint::{decode_uvarint, encode_uvarint, uvarint_len, zigzag_decode, zigzag_encode};
