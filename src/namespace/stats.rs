//! Memory and performance accounting surfaced to the stats endpoints.

use crate::index::IndexMemStat;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Clone, Serialize)]
pub struct NamespaceMemStat {
    pub name: String,
    pub items_count: usize,
    pub items_capacity: usize,
    pub data_size: usize,
    pub wal_records: usize,
    pub indexes: Vec<IndexMemStat>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct NamespacePerfStat {
    pub selects_count: u64,
    pub updates_count: u64,
    pub last_select_unix_ms: i64,
    pub last_update_unix_ms: i64,
}

/// Lock-free counters updated on the hot paths.
#[derive(Default)]
pub struct PerfCounters {
    selects: AtomicU64,
    updates: AtomicU64,
    last_select: AtomicI64,
    last_update: AtomicI64,
}

impl PerfCounters {
    pub fn hit_select(&self) {
        self.selects.fetch_add(1, Ordering::Relaxed);
        self.last_select.store(now_ms(), Ordering::Relaxed);
    }

    pub fn hit_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
        self.last_update.store(now_ms(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> NamespacePerfStat {
        NamespacePerfStat {
            selects_count: self.selects.load(Ordering::Relaxed),
            updates_count: self.updates.load(Ordering::Relaxed),
            last_select_unix_ms: self.last_select.load(Ordering::Relaxed),
            last_update_unix_ms: self.last_update.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.selects.store(0, Ordering::Relaxed);
        self.updates.store(0, Ordering::Relaxed);
    }
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
