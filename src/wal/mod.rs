//! # Write-Ahead Log
//!
//! Bounded in-memory ring of LSN-tagged records describing every mutation
//! and schema event of one namespace. The ring feeds two consumers:
//!
//! - **Replication**: a slave asks for records starting at an LSN. If the
//!   LSN is still inside the ring the master streams forward from there;
//!   if it already rotated out, the slave is told to run a full resync.
//! - **Subscription**: registered observers receive every record as it is
//!   appended, filtered by namespace and record kind. Observers below the
//!   first protocol version that understood transaction framing get the
//!   records with the in-transaction flag coarsened away.
//!
//! ## LSN layout
//!
//! An LSN is an `i64`: the originating server id lives in the high 15
//! bits, a monotonically increasing sequence in the low 48. `-1` marks
//! "no LSN". Sequence comparison therefore works across restarts of the
//! same server but never across servers.

use crate::index::IndexDef;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const SEQ_BITS: u32 = 48;
const SEQ_MASK: i64 = (1 << SEQ_BITS) - 1;

/// First subscription protocol version that understands the
/// in-transaction flag; older clients get coarsened records.
pub const MIN_TX_AWARE_SUBSCRIBER_VERSION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lsn(i64);

impl Lsn {
    pub const EMPTY: Lsn = Lsn(-1);

    pub fn new(server_id: i16, seq: i64) -> Self {
        debug_assert!(seq <= SEQ_MASK);
        Lsn((i64::from(server_id) << SEQ_BITS) | (seq & SEQ_MASK))
    }

    pub fn from_raw(raw: i64) -> Self {
        Lsn(raw)
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 < 0
    }

    pub fn seq(self) -> i64 {
        self.0 & SEQ_MASK
    }

    pub fn server_id(self) -> i16 {
        (self.0 >> SEQ_BITS) as i16
    }
}

impl Default for Lsn {
    fn default() -> Self {
        Lsn::EMPTY
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WalRecord {
    ItemUpsert { cjson: Vec<u8> },
    ItemDelete { cjson: Vec<u8> },
    IndexAdd { def: IndexDef },
    IndexUpdate { def: IndexDef },
    IndexDrop { def: IndexDef },
    PutMeta { key: String, value: String },
    SetSchema { schema: String },
    /// Serialized query of an UPDATE/DELETE applied as a statement.
    UpdateQuery { query: Vec<u8> },
    InitTransaction,
    CommitTransaction,
    Rename { to: String },
    Truncate,
}

/// Kind tag for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WalRecordKind {
    ItemUpsert,
    ItemDelete,
    IndexAdd,
    IndexUpdate,
    IndexDrop,
    PutMeta,
    SetSchema,
    UpdateQuery,
    InitTransaction,
    CommitTransaction,
    Rename,
    Truncate,
}

impl WalRecord {
    pub fn kind(&self) -> WalRecordKind {
        match self {
            WalRecord::ItemUpsert { .. } => WalRecordKind::ItemUpsert,
            WalRecord::ItemDelete { .. } => WalRecordKind::ItemDelete,
            WalRecord::IndexAdd { .. } => WalRecordKind::IndexAdd,
            WalRecord::IndexUpdate { .. } => WalRecordKind::IndexUpdate,
            WalRecord::IndexDrop { .. } => WalRecordKind::IndexDrop,
            WalRecord::PutMeta { .. } => WalRecordKind::PutMeta,
            WalRecord::SetSchema { .. } => WalRecordKind::SetSchema,
            WalRecord::UpdateQuery { .. } => WalRecordKind::UpdateQuery,
            WalRecord::InitTransaction => WalRecordKind::InitTransaction,
            WalRecord::CommitTransaction => WalRecordKind::CommitTransaction,
            WalRecord::Rename { .. } => WalRecordKind::Rename,
            WalRecord::Truncate => WalRecordKind::Truncate,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WalEntry {
    pub lsn: Lsn,
    pub in_transaction: bool,
    pub record: WalRecord,
}

/// The bounded ring. Not internally locked; it lives under the
/// namespace's write lock like the rest of the mutable state. Memory is
/// proportional to the records actually held, so a large configured
/// window costs nothing until mutations fill it.
#[derive(Debug)]
pub struct WalTracker {
    ring: std::collections::VecDeque<WalEntry>,
    capacity: usize,
    next_seq: i64,
    server_id: i16,
}

impl WalTracker {
    pub fn new(capacity: usize, server_id: i16) -> Self {
        Self {
            ring: std::collections::VecDeque::new(),
            capacity: capacity.max(1),
            next_seq: 0,
            server_id,
        }
    }

    pub fn server_id(&self) -> i16 {
        self.server_id
    }

    /// Continues numbering after `lsn`, used when hydrating from storage.
    pub fn init_from(&mut self, lsn: Lsn) {
        if !lsn.is_empty() {
            self.next_seq = self.next_seq.max(lsn.seq() + 1);
        }
    }

    pub fn last_lsn(&self) -> Lsn {
        if self.next_seq == 0 {
            Lsn::EMPTY
        } else {
            Lsn::new(self.server_id, self.next_seq - 1)
        }
    }

    /// Appends a record, returning its LSN. Strictly increasing within
    /// the namespace; the oldest record rotates out when the window is
    /// full.
    pub fn add(&mut self, record: WalRecord, in_transaction: bool) -> Lsn {
        let lsn = Lsn::new(self.server_id, self.next_seq);
        if self.ring.len() == self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(WalEntry { lsn, in_transaction, record });
        self.next_seq += 1;
        lsn
    }

    /// Oldest sequence still inside the ring.
    fn first_seq(&self) -> i64 {
        self.next_seq - self.ring.len() as i64
    }

    pub fn is_available(&self, lsn: Lsn) -> bool {
        !lsn.is_empty() && lsn.seq() >= self.first_seq() && lsn.seq() < self.next_seq
    }

    /// Records from `from` (inclusive) forward, or `None` when the LSN
    /// already rotated out and the slave must full-resync.
    pub fn read_from(&self, from: Lsn) -> Option<Vec<WalEntry>> {
        let start = if from.is_empty() { 0 } else { from.seq() };
        if start < self.first_seq() {
            return None;
        }
        let skip = (start - self.first_seq()) as usize;
        Some(self.ring.iter().skip(skip).cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Shrinks or widens the window, dropping the oldest records when
    /// shrinking.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.ring.len() > self.capacity {
            self.ring.pop_front();
        }
    }
}

/// Replication-facing state of a namespace, persisted as a sys-record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationState {
    pub last_lsn: Lsn,
    pub slave_mode: bool,
    pub temporary: bool,
    pub incarnation_counter: i64,
    pub status: ReplicationStatus,
    pub error: Option<String>,
}

impl Default for ReplicationState {
    fn default() -> Self {
        Self {
            last_lsn: Lsn::EMPTY,
            slave_mode: false,
            temporary: false,
            incarnation_counter: 0,
            status: ReplicationStatus::None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationStatus {
    None,
    Idle,
    Syncing,
    Error,
    Fatal,
}

/// Per-observer delivery filter.
#[derive(Debug, Clone, Default)]
pub struct UpdatesFilters {
    /// Only these namespaces; `None` means all.
    pub namespaces: Option<Vec<String>>,
    /// Only these record kinds; `None` means all.
    pub kinds: Option<Vec<WalRecordKind>>,
    /// Subscription protocol version of the client.
    pub client_version: u32,
}

impl UpdatesFilters {
    pub fn accepts(&self, namespace: &str, kind: WalRecordKind) -> bool {
        if let Some(namespaces) = &self.namespaces {
            if !namespaces.iter().any(|n| n == namespace) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&kind) {
                return false;
            }
        }
        true
    }

    /// Old clients never learned the in-transaction flag.
    pub fn coarsens_tx(&self) -> bool {
        self.client_version < MIN_TX_AWARE_SUBSCRIBER_VERSION
    }
}

pub trait UpdatesObserver: Send + Sync {
    fn on_wal_record(&self, namespace: &str, entry: &WalEntry);
}

/// Registry of subscription observers, shared between namespaces.
#[derive(Clone, Default)]
pub struct UpdatesObservers {
    inner: Arc<RwLock<Vec<(Arc<dyn UpdatesObserver>, UpdatesFilters)>>>,
}

impl UpdatesObservers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: Arc<dyn UpdatesObserver>, filters: UpdatesFilters) {
        self.inner.write().push((observer, filters));
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn publish(&self, namespace: &str, entry: &WalEntry) {
        let observers = self.inner.read();
        for (observer, filters) in observers.iter() {
            if !filters.accepts(namespace, entry.record.kind()) {
                continue;
            }
            if filters.coarsens_tx() && entry.in_transaction {
                let coarse = WalEntry { in_transaction: false, ..entry.clone() };
                observer.on_wal_record(namespace, &coarse);
            } else {
                observer.on_wal_record(namespace, entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn lsn_packs_server_and_sequence() {
        let lsn = Lsn::new(5, 123_456);
        assert_eq!(lsn.server_id(), 5);
        assert_eq!(lsn.seq(), 123_456);
        assert!(!lsn.is_empty());
        assert!(Lsn::EMPTY.is_empty());
    }

    #[test]
    fn lsns_are_strictly_increasing() {
        let mut wal = WalTracker::new(16, 1);
        let mut last = Lsn::EMPTY;
        for _ in 0..40 {
            let lsn = wal.add(WalRecord::Truncate, false);
            assert!(lsn.raw() > last.raw());
            last = lsn;
        }
    }

    #[test]
    fn rotated_out_lsn_forces_resync() {
        let mut wal = WalTracker::new(4, 0);
        for i in 0..10 {
            wal.add(WalRecord::PutMeta { key: format!("k{i}"), value: String::new() }, false);
        }
        assert!(wal.read_from(Lsn::new(0, 0)).is_none());
        let tail = wal.read_from(Lsn::new(0, 7)).unwrap();
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].lsn.seq(), 7);
    }

    struct Capture {
        seen: Mutex<Vec<(String, bool, WalRecordKind)>>,
    }

    impl UpdatesObserver for Capture {
        fn on_wal_record(&self, namespace: &str, entry: &WalEntry) {
            self.seen.lock().push((
                namespace.to_string(),
                entry.in_transaction,
                entry.record.kind(),
            ));
        }
    }

    #[test]
    fn observers_filter_and_coarsen() {
        let observers = UpdatesObservers::new();
        let modern = Arc::new(Capture { seen: Mutex::new(Vec::new()) });
        let legacy = Arc::new(Capture { seen: Mutex::new(Vec::new()) });

        observers.add(
            modern.clone(),
            UpdatesFilters {
                namespaces: Some(vec!["books".into()]),
                kinds: None,
                client_version: MIN_TX_AWARE_SUBSCRIBER_VERSION,
            },
        );
        observers.add(
            legacy.clone(),
            UpdatesFilters { namespaces: None, kinds: None, client_version: 1 },
        );

        let entry = WalEntry {
            lsn: Lsn::new(0, 1),
            in_transaction: true,
            record: WalRecord::ItemUpsert { cjson: vec![0] },
        };
        observers.publish("books", &entry);
        observers.publish("other", &entry);

        let modern_seen = modern.seen.lock();
        assert_eq!(modern_seen.len(), 1);
        assert!(modern_seen[0].1, "tx flag preserved for modern client");

        let legacy_seen = legacy.seen.lock();
        assert_eq!(legacy_seen.len(), 2);
        assert!(!legacy_seen[0].1, "tx flag coarsened for legacy client");
    }
}
