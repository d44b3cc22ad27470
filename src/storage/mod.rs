//! # Storage Collaborator
//!
//! The engine persists through an opaque ordered byte KV. The real server
//! plugs a disk engine in; tests and embedded use get [`MemStorage`].
//!
//! Key space used by the namespace layer:
//!
//! ```text
//! S<tag>.<version>   sys-records: index defs, tags matcher, replication
//!                    state, schema; versioned, newest parsing wins
//! I<row_id>          payload bytes prefixed with the row LSN
//! M<key>             user meta
//! ```
//!
//! Writers are serialized by the namespace's storage mutex; a failed write
//! flips the namespace read-only instead of retrying.

use eyre::Result;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub trait Datastorage: Send + Sync {
    fn write(&self, key: &[u8], value: &[u8]) -> Result<()>;
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn delete(&self, key: &[u8]) -> Result<()>;
    fn flush(&self) -> Result<()>;
    /// All pairs whose key starts with `prefix`, in key order.
    fn read_range(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

pub type StorageRef = Arc<dyn Datastorage>;

/// Ordered in-memory KV. Shared across namespace restarts through its
/// `Arc`, which is what the hydration tests rely on. `fail_writes` lets
/// tests exercise the storage-failure path.
#[derive(Default)]
pub struct MemStorage {
    map: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Datastorage for MemStorage {
    fn write(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(crate::error::Error::logic("storage write failed").into());
        }
        self.map.lock().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.lock().get(key).cloned())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.map.lock().remove(key);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(crate::error::Error::logic("storage flush failed").into());
        }
        Ok(())
    }

    fn read_range(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.map.lock();
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_scan_respects_prefix() {
        let storage = MemStorage::new();
        storage.write(b"I1", b"one").unwrap();
        storage.write(b"I2", b"two").unwrap();
        storage.write(b"Mkey", b"meta").unwrap();

        let items = storage.read_range(b"I").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].0, b"I1");

        storage.delete(b"I1").unwrap();
        assert_eq!(storage.read_range(b"I").unwrap().len(), 1);
        assert_eq!(storage.read(b"Mkey").unwrap().unwrap(), b"meta");
    }

    #[test]
    fn failing_writes_surface_errors() {
        let storage = MemStorage::new();
        storage.set_fail_writes(true);
        assert!(storage.write(b"k", b"v").is_err());
        assert!(storage.flush().is_err());
        storage.set_fail_writes(false);
        assert!(storage.write(b"k", b"v").is_ok());
    }
}
