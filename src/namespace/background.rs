//! Background maintenance: index optimization, TTL eviction, storage
//! flush and deferred string release. The hosting server calls
//! [`Namespace::background_routine`] on a periodic tick.

use super::{Namespace, OptimizationState};
use crate::ctx::Context;
use crate::error::{Error, ErrorCode};
use crate::idset::RowId;
use crate::types::Variant;
use eyre::Result;
use std::sync::atomic::Ordering;

impl Namespace {
    pub fn background_routine(&self, ctx: &Context) -> Result<()> {
        self.optimize_indexes(ctx)?;
        self.remove_expired_items(ctx)?;
        self.flush_storage(ctx)?;
        self.remove_expired_strings();
        Ok(())
    }

    /// Commits every index that defers work (sort orders, FT engines,
    /// rtree packing), advancing the optimization state machine. A
    /// concurrent mutation resets the state to `NotOptimized`, which also
    /// cancels the pass through the shared cancel token.
    pub fn optimize_indexes(&self, ctx: &Context) -> Result<()> {
        if self.optimization_state() == OptimizationState::OptimizationCompleted {
            return Ok(());
        }
        self.cancel_commit.store(false, Ordering::Release);
        let commit_ctx = ctx.clone().with_cancel(self.cancel_commit.clone());

        self.optimization_state
            .store(OptimizationState::OptimizingIndexes as u8, Ordering::Release);
        let mut core = match self.write_lock() {
            Ok(core) => core,
            Err(err) => {
                self.optimization_state
                    .store(OptimizationState::NotOptimized as u8, Ordering::Release);
                return Err(err);
            }
        };

        let result = (|| -> Result<()> {
            let positions: Vec<usize> = (1..core.indexes.len()).collect();
            for &pos in &positions {
                if !core.indexes[pos].is_ordered() {
                    core.indexes[pos].commit(&commit_ctx)?;
                }
            }
            self.optimization_state
                .store(OptimizationState::OptimizingSortOrders as u8, Ordering::Release);
            for &pos in &positions {
                if core.indexes[pos].is_ordered() {
                    core.indexes[pos].commit(&commit_ctx)?;
                }
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.optimization_state
                    .store(OptimizationState::OptimizationCompleted as u8, Ordering::Release);
                Ok(())
            }
            Err(err) if Error::code_of(&err) == ErrorCode::Canceled => {
                // A writer invalidated the pass; try again next tick.
                self.optimization_state
                    .store(OptimizationState::NotOptimized as u8, Ordering::Release);
                Ok(())
            }
            Err(err) => {
                self.optimization_state
                    .store(OptimizationState::NotOptimized as u8, Ordering::Release);
                Err(err)
            }
        }
    }

    /// Evicts rows whose TTL index timestamp fell behind
    /// `now - expire_after`.
    pub fn remove_expired_items(&self, ctx: &Context) -> Result<()> {
        ctx.check()?;
        let mut core = match self.write_lock() {
            Ok(core) => core,
            // Read-only namespaces simply stop evicting.
            Err(_) => return Ok(()),
        };
        let now = super::unix_now_secs();
        let ttl_positions: Vec<(usize, i64)> = core
            .indexes
            .iter()
            .enumerate()
            .filter_map(|(pos, idx)| idx.def().opts.expire_after.map(|ttl| (pos, ttl)))
            .collect();
        for (pos, ttl) in ttl_positions {
            let cutoff = Variant::Int64(now - ttl);
            let expired: Vec<RowId> = match &core.indexes[pos] {
                crate::index::Index::Tree(tree) => tree.ids_below(&cutoff),
                _ => continue,
            };
            for id in expired {
                ctx.check()?;
                self.do_delete(&mut core, id, false)?;
            }
        }
        Ok(())
    }

    /// Drains buffered storage writes under the storage mutex. A failed
    /// write marks the namespace read-only; in-memory state stays valid
    /// for readers.
    pub fn flush_storage(&self, ctx: &Context) -> Result<()> {
        ctx.check()?;
        let _storage_guard = self.storage_mtx.lock();
        if self.readonly.load(Ordering::Acquire) {
            return Err(Error::namespace_invalidated().into());
        }
        let mut core = self.core.write();
        // The replication sys-record carries the last LSN; keeping it
        // current is what lets numbering continue after a restart.
        if core.repl.last_lsn != core.persisted_repl_lsn {
            core.save_replication_state();
            core.persisted_repl_lsn = core.repl.last_lsn;
        }
        if core.pending.is_empty() {
            return Ok(());
        }
        if let Err(err) = core.flush_pending() {
            self.readonly.store(true, Ordering::Release);
            return Err(err);
        }
        Ok(())
    }

    /// Frees interned strings whose last index reference dropped.
    pub fn remove_expired_strings(&self) {
        let Ok(mut core) = self.write_lock() else { return };
        for index in &mut core.indexes {
            index.remove_expired_strings();
        }
    }
}
