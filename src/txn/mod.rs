//! # Transactions
//!
//! A transaction is an ordered list of staged steps (item modifications
//! and UPDATE/DELETE queries) applied atomically with respect to the
//! namespace write lock at commit. WAL framing wraps the steps in one
//! `InitTransaction` / `CommitTransaction` pair.
//!
//! By default a failing step aborts the remainder but leaves the prior
//! steps applied. The stricter all-or-nothing mode
//! (`tx_partial_commit = false` in the namespace config) validates the
//! whole transaction first, so a failing one applies nothing.
//!
//! Transactions are cheap containers; nothing touches the namespace until
//! commit. `rollback` simply drops the staged steps. The serving edge
//! bounds concurrent transactions per client and reaps idle ones by
//! calling rollback; see [`MAX_CLIENT_TRANSACTIONS`].

use crate::error::Error;
use crate::item::{Item, ItemModifyMode};
use crate::payload::PayloadType;
use crate::query::{Query, QueryType};
use crate::tags::TagsMatcher;
use eyre::Result;
use std::time::Instant;

/// Upper bound of open transactions one client may hold.
pub const MAX_CLIENT_TRANSACTIONS: usize = 1024;

pub enum TxStep {
    ModifyItem { mode: ItemModifyMode, item: Item },
    ModifyQuery { query: Query },
}

pub struct Transaction {
    namespace: String,
    payload_type: PayloadType,
    tags_snapshot: TagsMatcher,
    steps: Vec<TxStep>,
    started_at: Instant,
}

impl Transaction {
    pub fn new(namespace: String, payload_type: PayloadType, tags_snapshot: TagsMatcher) -> Self {
        Self {
            namespace,
            payload_type,
            tags_snapshot,
            steps: Vec::new(),
            started_at: Instant::now(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// A fresh item bound to the tags-matcher snapshot this transaction
    /// was opened with.
    pub fn new_item(&self) -> Item {
        Item::new(self.payload_type.clone(), self.tags_snapshot.clone())
    }

    pub fn insert(&mut self, item: Item) {
        self.steps.push(TxStep::ModifyItem { mode: ItemModifyMode::Insert, item });
    }

    pub fn update(&mut self, item: Item) {
        self.steps.push(TxStep::ModifyItem { mode: ItemModifyMode::Update, item });
    }

    pub fn upsert(&mut self, item: Item) {
        self.steps.push(TxStep::ModifyItem { mode: ItemModifyMode::Upsert, item });
    }

    pub fn delete(&mut self, item: Item) {
        self.steps.push(TxStep::ModifyItem { mode: ItemModifyMode::Delete, item });
    }

    /// Stages an UPDATE or DELETE query step.
    pub fn modify(&mut self, query: Query) -> Result<()> {
        if !matches!(query.query_type, QueryType::Update | QueryType::Delete) {
            return Err(Error::params("transactions take UPDATE or DELETE queries only").into());
        }
        if query.namespace != self.namespace {
            return Err(Error::params(format!(
                "query targets '{}' but the transaction is on '{}'",
                query.namespace, self.namespace
            ))
            .into());
        }
        self.steps.push(TxStep::ModifyQuery { query });
        Ok(())
    }

    /// Discards every staged step without applying anything.
    pub fn rollback(mut self) {
        self.steps.clear();
    }

    pub(crate) fn take_steps(&mut self) -> Vec<TxStep> {
        std::mem::take(&mut self.steps)
    }
}
