//! Cursor-style binary reader/writer over the varint primitives.
//!
//! `Writer` appends to an owned buffer; `Reader` walks a borrowed slice and
//! reports truncation as `errParams` rather than panicking, since the bytes
//! may come from storage or from a remote peer.

use super::varint::{decode_uvarint, encode_uvarint, zigzag_decode, zigzag_encode};
use crate::error::Error;
use eyre::Result;

#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self { buf: Vec::with_capacity(cap) }
    }

    pub fn put_uvarint(&mut self, v: u64) {
        encode_uvarint(v, &mut self.buf);
    }

    pub fn put_varint(&mut self, v: i64) {
        encode_uvarint(zigzag_encode(v), &mut self.buf);
    }

    pub fn put_double(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_vstring(&mut self, s: &str) {
        self.put_uvarint(s.len() as u64);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn put_vbytes(&mut self, b: &[u8]) {
        self.put_uvarint(b.len() as u64);
        self.buf.extend_from_slice(b);
    }

    pub fn put_raw(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn get_uvarint(&mut self) -> Result<u64> {
        let (v, n) = decode_uvarint(&self.buf[self.pos..])?;
        self.pos += n;
        Ok(v)
    }

    pub fn get_varint(&mut self) -> Result<i64> {
        Ok(zigzag_decode(self.get_uvarint()?))
    }

    pub fn get_double(&mut self) -> Result<f64> {
        let bytes = self.take(8)?;
        Ok(f64::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn get_vstring(&mut self) -> Result<&'a str> {
        let len = self.get_uvarint()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map_err(|e| Error::params(format!("invalid UTF-8 in string: {e}")).into())
    }

    pub fn get_vbytes(&mut self) -> Result<&'a [u8]> {
        let len = self.get_uvarint()? as usize;
        self.take(len)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(Error::params(format!(
                "buffer underflow: need {len} bytes, {} left",
                self.remaining()
            ))
            .into());
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }
}
