//! # Tags Matcher
//!
//! Per-namespace bijection between JSON field paths and small integer tags.
//! CJSON stores tags instead of field names, so the matcher is the schema
//! glue of the whole payload layer.
//!
//! Two counters guard staleness:
//!
//! - `version` increases monotonically on every newly created tag. It never
//!   decreases for the lifetime of a namespace.
//! - `state_token` is a 32-bit token identifying the matcher *epoch*. It is
//!   regenerated when the mapping is replaced wholesale (e.g. namespace
//!   refill or replication snapshot), at which point clients holding CJSON
//!   encoded against the old epoch must refetch (`errTagsMissmatch`).
//!
//! Tag 0 is reserved: it terminates an object in CJSON.

use crate::encoding::{Reader, Writer};
use crate::error::Error;
use eyre::Result;
use hashbrown::HashMap;

pub type TagId = u32;

#[derive(Debug, Clone)]
pub struct TagsMatcher {
    names2tags: HashMap<String, TagId>,
    tags2names: Vec<String>,
    version: u32,
    state_token: u32,
}

impl TagsMatcher {
    pub fn new() -> Self {
        Self {
            names2tags: HashMap::new(),
            tags2names: Vec::new(),
            version: 0,
            state_token: generate_state_token(),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn state_token(&self) -> u32 {
        self.state_token
    }

    pub fn size(&self) -> usize {
        self.tags2names.len()
    }

    /// Resolves `path` to its tag. With `create`, an unknown path is
    /// assigned the next tag and the version is bumped.
    pub fn name2tag(&mut self, path: &str, create: bool) -> Option<TagId> {
        if let Some(&tag) = self.names2tags.get(path) {
            return Some(tag);
        }
        if !create {
            return None;
        }
        let tag = self.tags2names.len() as TagId + 1;
        self.tags2names.push(path.to_string());
        self.names2tags.insert(path.to_string(), tag);
        self.version += 1;
        Some(tag)
    }

    pub fn lookup(&self, path: &str) -> Option<TagId> {
        self.names2tags.get(path).copied()
    }

    pub fn tag2name(&self, tag: TagId) -> Result<&str> {
        if tag == 0 || tag as usize > self.tags2names.len() {
            return Err(Error::tags_mismatch(format!("unknown tag {tag}")).into());
        }
        Ok(&self.tags2names[tag as usize - 1])
    }

    /// Replaces the whole mapping, regenerating the state token. Version is
    /// forced past the previous one so it stays monotonic.
    pub fn replace(&mut self, other: TagsMatcher) {
        let floor = self.version.max(other.version) + 1;
        *self = other;
        self.version = floor;
        self.state_token = generate_state_token();
    }

    /// Folds tags created by an item decoded against a snapshot of this
    /// matcher back in. Fails with `errTagsMissmatch` when the snapshot
    /// belongs to a different epoch or disagrees on an existing tag.
    pub fn try_merge(&mut self, snapshot: &TagsMatcher) -> Result<bool> {
        if snapshot.state_token != self.state_token {
            return Err(Error::tags_mismatch(format!(
                "tags state token mismatch: {:#08x} vs {:#08x}",
                snapshot.state_token, self.state_token
            ))
            .into());
        }
        let mut changed = false;
        for (idx, name) in snapshot.tags2names.iter().enumerate() {
            let tag = idx as TagId + 1;
            match self.tags2names.get(idx) {
                Some(existing) if existing == name => {}
                Some(existing) => {
                    return Err(Error::tags_mismatch(format!(
                        "tag {tag} maps to '{existing}' here but '{name}' in item"
                    ))
                    .into());
                }
                None => {
                    debug_assert_eq!(idx, self.tags2names.len());
                    self.tags2names.push(name.clone());
                    self.names2tags.insert(name.clone(), tag);
                    self.version += 1;
                    changed = true;
                }
            }
        }
        Ok(changed)
    }

    pub fn serialize(&self, w: &mut Writer) {
        w.put_uvarint(u64::from(self.version));
        w.put_uvarint(u64::from(self.state_token));
        w.put_uvarint(self.tags2names.len() as u64);
        for name in &self.tags2names {
            w.put_vstring(name);
        }
    }

    pub fn deserialize(r: &mut Reader<'_>) -> Result<Self> {
        let version = r.get_uvarint()? as u32;
        let state_token = r.get_uvarint()? as u32;
        let count = r.get_uvarint()? as usize;
        let mut tags2names = Vec::with_capacity(count);
        let mut names2tags = HashMap::with_capacity(count);
        for i in 0..count {
            let name = r.get_vstring()?.to_string();
            names2tags.insert(name.clone(), i as TagId + 1);
            tags2names.push(name);
        }
        Ok(Self { names2tags, tags2names, version, state_token })
    }
}

impl Default for TagsMatcher {
    fn default() -> Self {
        Self::new()
    }
}

// Clock nanos alone can collide for matchers created in the same tick, so
// a process-wide counter is folded in; two epochs never share a token.
fn generate_state_token() -> u32 {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::SystemTime;
    static EPOCH_COUNTER: AtomicU32 = AtomicU32::new(0);
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let salt = EPOCH_COUNTER
        .fetch_add(1, Ordering::Relaxed)
        .wrapping_mul(0x9E37_79B9);
    ((nanos as u32) ^ ((nanos >> 32) as u32) ^ salt) | 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn creation_bumps_version_once_per_path() {
        let mut tm = TagsMatcher::new();
        assert_eq!(tm.version(), 0);
        let id = tm.name2tag("title", true).unwrap();
        assert_eq!(tm.version(), 1);
        assert_eq!(tm.name2tag("title", true).unwrap(), id);
        assert_eq!(tm.version(), 1);
        assert_eq!(tm.tag2name(id).unwrap(), "title");
    }

    #[test]
    fn lookup_without_create_returns_none() {
        let tm = TagsMatcher::new();
        assert_eq!(tm.lookup("missing"), None);
    }

    #[test]
    fn merge_accepts_superset_snapshot() {
        let mut tm = TagsMatcher::new();
        tm.name2tag("id", true);

        let mut snapshot = tm.clone();
        snapshot.name2tag("title", true);

        assert!(tm.try_merge(&snapshot).unwrap());
        assert_eq!(tm.lookup("title"), Some(2));
        assert_eq!(tm.version(), 2);
    }

    #[test]
    fn merge_rejects_foreign_epoch() {
        let mut tm = TagsMatcher::new();
        let foreign = TagsMatcher::new();
        let err = tm.try_merge(&foreign).unwrap_err();
        assert_eq!(Error::code_of(&err), ErrorCode::TagsMismatch);
    }

    #[test]
    fn replace_keeps_version_monotonic() {
        let mut tm = TagsMatcher::new();
        for i in 0..10 {
            tm.name2tag(&format!("f{i}"), true);
        }
        let v = tm.version();
        tm.replace(TagsMatcher::new());
        assert!(tm.version() > v);
    }

    #[test]
    fn serialization_round_trips() {
        let mut tm = TagsMatcher::new();
        tm.name2tag("id", true);
        tm.name2tag("nested.path", true);

        let mut w = Writer::new();
        tm.serialize(&mut w);
        let bytes = w.into_bytes();
        let restored = TagsMatcher::deserialize(&mut Reader::new(&bytes)).unwrap();

        assert_eq!(restored.version(), tm.version());
        assert_eq!(restored.state_token(), tm.state_token());
        assert_eq!(restored.lookup("nested.path"), Some(2));
    }
}
