//! # Item
//!
//! A staged row: the decoded document plus the CJSON tuple and typed
//! columns, built against a *snapshot* of the namespace's tags matcher and
//! payload type. The snapshot may grow new tags while the item is encoded;
//! the namespace folds them back in at apply time (`try_merge`). If the
//! namespace's matcher was replaced in between (epoch change), the merge
//! fails with `errTagsMissmatch` and the item must be rebuilt from its raw
//! JSON; the transaction path does that automatically.

use crate::cjson;
use crate::error::Error;
use crate::payload::{PayloadType, PayloadValue};
use crate::tags::TagsMatcher;
use eyre::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemModifyMode {
    Insert,
    Update,
    Upsert,
    Delete,
}

#[derive(Clone)]
pub struct Item {
    payload_type: PayloadType,
    tags_snapshot: TagsMatcher,
    raw_json: Option<String>,
    doc: Option<serde_json::Value>,
    payload: PayloadValue,
    precepts: Vec<String>,
}

impl Item {
    pub fn new(payload_type: PayloadType, tags_snapshot: TagsMatcher) -> Self {
        let fields = payload_type.num_fields();
        Self {
            payload_type,
            tags_snapshot,
            raw_json: None,
            doc: None,
            payload: PayloadValue::new(fields, Vec::new()),
            precepts: Vec::new(),
        }
    }

    /// Resets the item for reuse from the namespace pool.
    pub fn reset(&mut self, payload_type: PayloadType, tags_snapshot: TagsMatcher) {
        let fields = payload_type.num_fields();
        self.payload_type = payload_type;
        self.tags_snapshot = tags_snapshot;
        self.raw_json = None;
        self.doc = None;
        self.payload = PayloadValue::new(fields, Vec::new());
        self.precepts.clear();
    }

    pub fn from_json(&mut self, json: &str) -> Result<()> {
        let doc: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| Error::parse_json(format!("item json: {e}")))?;
        self.raw_json = Some(json.to_string());
        self.set_doc(doc)
    }

    pub fn from_doc(&mut self, doc: serde_json::Value) -> Result<()> {
        self.raw_json = None;
        self.set_doc(doc)
    }

    /// Decodes CJSON produced against this namespace's matcher. A foreign
    /// state token fails with `errTagsMissmatch`.
    pub fn from_cjson(&mut self, bytes: &[u8], state_token: u32) -> Result<()> {
        if state_token != self.tags_snapshot.state_token() {
            return Err(Error::state_invalidated(format!(
                "state token {state_token:#x} does not match namespace {:#x}",
                self.tags_snapshot.state_token()
            ))
            .into());
        }
        let doc = cjson::decode(bytes, &self.tags_snapshot)?;
        self.raw_json = None;
        self.set_doc(doc)
    }

    fn set_doc(&mut self, doc: serde_json::Value) -> Result<()> {
        let tuple = cjson::encode(&doc, &mut self.tags_snapshot)?;
        let columns = cjson::extract_payload_fields(&doc, &self.payload_type)?;
        let mut payload = PayloadValue::new(self.payload_type.num_fields(), tuple);
        for (idx, values) in columns.into_iter().enumerate().skip(1) {
            payload.set_field(idx, values);
        }
        self.payload = payload;
        self.doc = Some(doc);
        Ok(())
    }

    /// Re-encodes from the original JSON against a fresh snapshot; the
    /// recovery path for `errTagsMissmatch`.
    pub fn rebuild_with(&mut self, payload_type: PayloadType, tags_snapshot: TagsMatcher) -> Result<()> {
        let raw = self
            .raw_json
            .clone()
            .ok_or_else(|| Error::state_invalidated("item has no source json to rebuild from"))?;
        let precepts = std::mem::take(&mut self.precepts);
        self.reset(payload_type, tags_snapshot);
        self.precepts = precepts;
        self.from_json(&raw)
    }

    pub fn doc(&self) -> Option<&serde_json::Value> {
        self.doc.as_ref()
    }

    pub fn payload(&self) -> &PayloadValue {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut PayloadValue {
        &mut self.payload
    }

    pub fn tags_snapshot(&self) -> &TagsMatcher {
        &self.tags_snapshot
    }

    pub fn payload_type(&self) -> &PayloadType {
        &self.payload_type
    }

    /// Precepts like `id=serial()` or `updated=now()`, applied by the
    /// namespace before indexing.
    pub fn set_precepts(&mut self, precepts: Vec<String>) {
        self.precepts = precepts;
    }

    pub fn precepts(&self) -> &[String] {
        &self.precepts
    }

    /// Patches one document field and re-encodes; used by precepts.
    pub fn patch_field(&mut self, field: &str, value: serde_json::Value) -> Result<()> {
        let mut doc = self
            .doc
            .take()
            .ok_or_else(|| Error::logic("item holds no document"))?;
        if let serde_json::Value::Object(map) = &mut doc {
            map.insert(field.to_string(), value);
        }
        self.set_doc(doc)
    }
}
