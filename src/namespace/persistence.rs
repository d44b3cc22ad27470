//! Storage layout of a namespace: versioned sys-records, item records and
//! meta records over the opaque ordered KV.
//!
//! Sys-records are written newest-version-first: the writer picks
//! `max_existing + 1`, writes the new record, then reclaims the prior
//! version. A reader takes the highest version that parses, so a crash
//! between the two writes is harmless.

use super::core::{NamespaceCore, StorageOp};
use crate::encoding::{Reader, Writer};
use crate::error::Error;
use crate::idset::RowId;
use crate::index::{Index, IndexDef};
use crate::payload::PayloadValue;
use crate::tags::TagsMatcher;
use crate::wal::{Lsn, ReplicationState};
use crc::{Crc, CRC_64_ECMA_182};
use eyre::{Result, WrapErr};
use zerocopy::{FromBytes, Immutable, IntoBytes};

const SYS_INDEXES: &str = "indexes";
const SYS_TAGS: &str = "tags";
const SYS_REPLICATION: &str = "replication";
const SYS_SCHEMA: &str = "schema";

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// Fixed prefix of every `I<row_id>` record: the row LSN plus a CRC-64
/// over LSN and tuple bytes. A record failing its checksum is rejected at
/// load rather than decoded into garbage.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, FromBytes, Immutable)]
struct ItemRecordHeader {
    lsn: i64,
    checksum: u64,
}

fn item_checksum(lsn: i64, tuple: &[u8]) -> u64 {
    let mut digest = CRC64.digest();
    digest.update(&lsn.to_le_bytes());
    digest.update(tuple);
    digest.finalize()
}

fn sys_key(tag: &str, version: u64) -> Vec<u8> {
    format!("S{tag}.{version:020}").into_bytes()
}

fn item_key(id: RowId) -> Vec<u8> {
    format!("I{id:010}").into_bytes()
}

fn meta_key(key: &str) -> Vec<u8> {
    format!("M{key}").into_bytes()
}

impl NamespaceCore {
    /// Queues a versioned sys-record write plus the reclaim of the prior
    /// version.
    fn queue_sys_record(&mut self, tag: &str, version: &mut u64, data: Vec<u8>) {
        let prior = *version;
        *version += 1;
        self.pending.push(StorageOp::Put(sys_key(tag, *version), data));
        if prior > 0 {
            self.pending.push(StorageOp::Delete(sys_key(tag, prior)));
        }
    }

    pub fn save_indexes(&mut self) {
        if self.storage.is_none() {
            return;
        }
        let defs: Vec<IndexDef> = self
            .indexes
            .iter()
            .skip(1)
            .map(|idx| idx.def().clone())
            .collect();
        let data = serde_json::to_vec(&defs).expect("index defs always serialize");
        let mut version = self.sys_versions.indexes;
        self.queue_sys_record(SYS_INDEXES, &mut version, data);
        self.sys_versions.indexes = version;
    }

    pub fn save_tags_matcher(&mut self) {
        if self.storage.is_none() {
            return;
        }
        let mut w = Writer::new();
        self.tags_matcher.serialize(&mut w);
        let mut version = self.sys_versions.tags;
        self.queue_sys_record(SYS_TAGS, &mut version, w.into_bytes());
        self.sys_versions.tags = version;
    }

    pub fn save_replication_state(&mut self) {
        if self.storage.is_none() {
            return;
        }
        let data = serde_json::to_vec(&self.repl).expect("replication state always serializes");
        let mut version = self.sys_versions.replication;
        self.queue_sys_record(SYS_REPLICATION, &mut version, data);
        self.sys_versions.replication = version;
    }

    pub fn save_schema(&mut self) {
        let Some(schema) = &self.schema else { return };
        if self.storage.is_none() {
            return;
        }
        let data = schema.clone().into_bytes();
        let mut version = self.sys_versions.schema;
        self.queue_sys_record(SYS_SCHEMA, &mut version, data);
        self.sys_versions.schema = version;
    }

    /// Queues one item record: checksummed header, then the CJSON tuple.
    pub fn queue_item_write(&mut self, id: RowId, payload: &PayloadValue) {
        if self.storage.is_none() {
            return;
        }
        let header = ItemRecordHeader {
            lsn: payload.lsn(),
            checksum: item_checksum(payload.lsn(), payload.tuple()),
        };
        let mut value = Vec::with_capacity(std::mem::size_of::<ItemRecordHeader>() + payload.tuple().len());
        value.extend_from_slice(header.as_bytes());
        value.extend_from_slice(payload.tuple());
        self.pending.push(StorageOp::Put(item_key(id), value));
    }

    pub fn queue_item_delete(&mut self, id: RowId) {
        if self.storage.is_none() {
            return;
        }
        self.pending.push(StorageOp::Delete(item_key(id)));
    }

    pub fn queue_meta_write(&mut self, key: &str, value: &str) {
        if self.storage.is_none() {
            return;
        }
        self.pending
            .push(StorageOp::Put(meta_key(key), value.as_bytes().to_vec()));
    }

    /// Highest sys-record version whose payload actually parses. Versions
    /// are tried newest first; a crash between writing `version + 1` and
    /// reclaiming `version` leaves a truncated newest record, and the
    /// reader must recover with the prior one.
    fn load_latest_sys_record<T>(
        &self,
        tag: &str,
        parse: impl Fn(&[u8]) -> Result<T>,
    ) -> Result<Option<(u64, T)>> {
        let Some(storage) = &self.storage else { return Ok(None) };
        let prefix = format!("S{tag}.").into_bytes();
        let mut records = storage.read_range(&prefix)?;
        records.sort_by(|a, b| b.0.cmp(&a.0));
        for (key, value) in records {
            let version_part = &key[prefix.len()..];
            let Ok(version) = std::str::from_utf8(version_part).unwrap_or("").parse::<u64>()
            else {
                continue;
            };
            match parse(&value) {
                Ok(parsed) => return Ok(Some((version, parsed))),
                Err(_) => continue,
            }
        }
        Ok(None)
    }

    /// Hydrates schema state and rows. Index definitions come first so
    /// the payload type exists before rows are decoded.
    pub fn load_from_storage(&mut self) -> Result<()> {
        if self.storage.is_none() {
            return Ok(());
        }

        if let Some((version, tm)) = self.load_latest_sys_record(SYS_TAGS, |data| {
            TagsMatcher::deserialize(&mut Reader::new(data))
        })? {
            self.tags_matcher = tm;
            self.sys_versions.tags = version;
        }
        if let Some((version, defs)) = self.load_latest_sys_record(SYS_INDEXES, |data| {
            serde_json::from_slice::<Vec<IndexDef>>(data)
                .map_err(|e| Error::params(format!("indexes sys-record: {e}")).into())
        })? {
            for def in defs {
                self.add_index_definition(def)?;
            }
            self.sys_versions.indexes = version;
        }
        if let Some((version, repl)) = self.load_latest_sys_record(SYS_REPLICATION, |data| {
            serde_json::from_slice::<ReplicationState>(data)
                .map_err(|e| Error::params(format!("replication sys-record: {e}")).into())
        })? {
            self.repl = repl;
            self.sys_versions.replication = version;
            self.persisted_repl_lsn = self.repl.last_lsn;
            self.wal.init_from(self.repl.last_lsn);
        }
        if let Some((version, schema)) = self.load_latest_sys_record(SYS_SCHEMA, |data| {
            String::from_utf8(data.to_vec())
                .map_err(|e| Error::params(format!("schema sys-record: {e}")).into())
        })? {
            self.schema = Some(schema);
            self.sys_versions.schema = version;
        }

        self.load_items()?;
        self.load_meta()?;
        Ok(())
    }

    fn load_items(&mut self) -> Result<()> {
        let Some(storage) = &self.storage else { return Ok(()) };
        let rows = storage.read_range(b"I")?;
        let mut max_lsn = Lsn::EMPTY;
        for (key, value) in rows {
            let id: RowId = std::str::from_utf8(&key[1..])
                .unwrap_or("")
                .parse()
                .map_err(|_| Error::params("malformed item key in storage"))?;
            let (header, tuple) = ItemRecordHeader::read_from_prefix(&value)
                .map_err(|_| Error::params(format!("item {id} record too short")))?;
            if header.checksum != item_checksum(header.lsn, tuple) {
                return Err(Error::params(format!("item {id} record checksum mismatch")).into());
            }
            let lsn = header.lsn;
            let tuple = tuple.to_vec();

            let doc = crate::cjson::decode(&tuple, &self.tags_matcher)
                .wrap_err_with(|| format!("item {id} tuple"))?;
            let columns = crate::cjson::extract_payload_fields(&doc, &self.payload_type)?;
            let mut payload = PayloadValue::new(self.payload_type.num_fields(), tuple);
            for (idx, values) in columns.into_iter().enumerate().skip(1) {
                payload.set_field(idx, values);
            }
            payload.set_lsn(lsn);

            let slot = id as usize;
            if slot >= self.items.len() {
                self.items.resize(slot + 1, None);
            }
            self.update_indexes(id, None, &mut payload, &doc)?;
            self.items[slot] = Some(payload);
            if lsn > max_lsn.raw() {
                max_lsn = Lsn::from_raw(lsn);
            }
        }
        // Slots absent from storage below the watermark are free.
        for (slot, item) in self.items.iter().enumerate() {
            if item.is_none() {
                self.free.push(slot as RowId);
            }
        }
        self.wal.init_from(max_lsn);
        Ok(())
    }

    fn load_meta(&mut self) -> Result<()> {
        let Some(storage) = &self.storage else { return Ok(()) };
        for (key, value) in storage.read_range(b"M")? {
            let name = String::from_utf8_lossy(&key[1..]).into_owned();
            self.meta_cache
                .insert(name, String::from_utf8_lossy(&value).into_owned());
        }
        Ok(())
    }

    /// Applies one index definition during hydration (no WAL, no sys-record
    /// writes). Returns the position the index landed at.
    pub fn add_index_definition(&mut self, def: IndexDef) -> Result<usize> {
        let index = Index::new(def.clone())?;
        let pos = if def.is_composite() {
            self.indexes.push(index);
            self.indexes.len() - 1
        } else if def.opts.sparse {
            let pos = self.first_composite_pos();
            self.indexes.insert(pos, index);
            self.sparse_count += 1;
            pos
        } else {
            let field = self.payload_type.add_field(
                &def.name,
                def.field_type,
                def.opts.array,
                def.json_paths.clone(),
            )?;
            self.indexes.insert(field, index);
            field
        };
        self.reindex_names();
        Ok(pos)
    }

    /// Drains the pending ops into storage. Called under the storage
    /// mutex; a failed write bubbles up so the caller can mark the
    /// namespace read-only.
    pub fn flush_pending(&mut self) -> Result<()> {
        let Some(storage) = self.storage.clone() else {
            self.pending.clear();
            return Ok(());
        };
        for op in self.pending.drain(..) {
            match op {
                StorageOp::Put(key, value) => storage.write(&key, &value)?,
                StorageOp::Delete(key) => storage.delete(&key)?,
            }
        }
        storage.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Datastorage;

    #[test]
    fn sys_keys_sort_by_version() {
        assert!(sys_key("indexes", 2) > sys_key("indexes", 1));
        assert!(sys_key("indexes", 10) > sys_key("indexes", 9));
    }

    #[test]
    fn item_keys_sort_numerically() {
        assert!(item_key(10) > item_key(9));
        assert!(item_key(100) > item_key(99));
    }

    #[test]
    fn corrupt_newest_sys_record_falls_back_to_prior_version() {
        let storage = crate::storage::MemStorage::new();

        let mut tm = TagsMatcher::new();
        tm.name2tag("title", true);
        let mut w = Writer::new();
        tm.serialize(&mut w);
        storage.write(&sys_key(SYS_TAGS, 1), w.as_slice()).unwrap();
        // A crash between writing the new version and reclaiming the old
        // one leaves a truncated newest record.
        storage.write(&sys_key(SYS_TAGS, 2), &[0xFF]).unwrap();

        let mut core = NamespaceCore::new("ns".to_string(), Default::default(), 0);
        core.storage = Some(storage);
        core.load_from_storage().unwrap();

        assert_eq!(core.tags_matcher.lookup("title"), Some(1));
        assert_eq!(core.sys_versions.tags, 1);
    }

    #[test]
    fn unparseable_sys_records_yield_nothing() {
        let storage = crate::storage::MemStorage::new();
        storage.write(&sys_key(SYS_INDEXES, 1), b"not json").unwrap();

        let mut core = NamespaceCore::new("ns".to_string(), Default::default(), 0);
        core.storage = Some(storage);
        core.load_from_storage().unwrap();
        assert_eq!(core.indexes.len(), 1, "only the tuple placeholder");
    }
}
