use crate::error::Error;
use crate::types::KeyValueKind;
use eyre::Result;
use hashbrown::HashMap;
use std::sync::Arc;

/// Reserved name of field 0 holding the CJSON document body.
pub const TUPLE_FIELD: &str = "-tuple";

#[derive(Debug, Clone, PartialEq)]
pub struct PayloadFieldType {
    pub name: String,
    pub kind: KeyValueKind,
    pub is_array: bool,
    /// JSON paths feeding this field. Usually one path equal to the field
    /// name; composite helpers may register several.
    pub json_paths: Vec<String>,
}

#[derive(Debug, Clone)]
struct Inner {
    fields: Vec<PayloadFieldType>,
    by_name: HashMap<String, usize>,
}

/// Ordered, append-only field schema. Cheap to clone; query results keep a
/// snapshot while DDL swaps the namespace's copy.
#[derive(Debug, Clone)]
pub struct PayloadType {
    inner: Arc<Inner>,
}

impl PayloadType {
    pub fn new() -> Self {
        let tuple = PayloadFieldType {
            name: TUPLE_FIELD.to_string(),
            kind: KeyValueKind::String,
            is_array: false,
            json_paths: Vec::new(),
        };
        let mut by_name = HashMap::new();
        by_name.insert(TUPLE_FIELD.to_string(), 0);
        Self { inner: Arc::new(Inner { fields: vec![tuple], by_name }) }
    }

    pub fn num_fields(&self) -> usize {
        self.inner.fields.len()
    }

    pub fn field(&self, idx: usize) -> &PayloadFieldType {
        &self.inner.fields[idx]
    }

    pub fn field_by_name(&self, name: &str) -> Option<usize> {
        self.inner.by_name.get(name).copied()
    }

    pub fn field_by_json_path(&self, path: &str) -> Option<usize> {
        if let Some(idx) = self.field_by_name(path) {
            return Some(idx);
        }
        self.inner
            .fields
            .iter()
            .position(|f| f.json_paths.iter().any(|p| p == path))
    }

    pub fn fields(&self) -> &[PayloadFieldType] {
        &self.inner.fields
    }

    /// Appends a field. The schema is append-only; a duplicate name is
    /// `errConflict`.
    pub fn add_field(
        &mut self,
        name: &str,
        kind: KeyValueKind,
        is_array: bool,
        json_paths: Vec<String>,
    ) -> Result<usize> {
        if self.inner.by_name.contains_key(name) {
            return Err(Error::conflict(format!("field '{name}' already exists")).into());
        }
        if name.is_empty() || name.starts_with('-') {
            return Err(Error::params(format!("invalid field name '{name}'")).into());
        }
        let inner = Arc::make_mut(&mut self.inner);
        let idx = inner.fields.len();
        inner.by_name.insert(name.to_string(), idx);
        inner.fields.push(PayloadFieldType {
            name: name.to_string(),
            kind,
            is_array,
            json_paths,
        });
        Ok(idx)
    }

    /// Removes a field by name, shifting later field positions down. The
    /// caller (namespace DDL) rebuilds every row and index afterwards.
    pub fn drop_field(&mut self, name: &str) -> Result<usize> {
        let idx = self
            .field_by_name(name)
            .ok_or_else(|| Error::not_found(format!("field '{name}' not found")))?;
        if idx == 0 {
            return Err(Error::logic("can't drop the tuple field").into());
        }
        let inner = Arc::make_mut(&mut self.inner);
        inner.fields.remove(idx);
        inner.by_name.clear();
        for (i, f) in inner.fields.iter().enumerate() {
            inner.by_name.insert(f.name.clone(), i);
        }
        Ok(idx)
    }
}

impl Default for PayloadType {
    fn default() -> Self {
        Self::new()
    }
}
