//! # kitedb - Embedded Document Database Core
//!
//! kitedb is an in-process, schema-flexible document database engine:
//! namespaces (collections) of JSON documents with typed secondary
//! indexes, a rule-based query planner with full-text and geometric
//! search, per-namespace transactions, and a WAL ring for replication and
//! change subscription.
//!
//! ## Quick Start
//!
//! ```ignore
//! use kitedb::{Context, IndexDef, IndexType, KeyValueKind, Namespace};
//!
//! let ns = Namespace::new("books", 0, Default::default(), Default::default());
//! let ctx = Context::new();
//!
//! ns.add_index(IndexDef::new("id", KeyValueKind::Int, IndexType::Hash).pk(), &ctx)?;
//! ns.add_index(IndexDef::new("title", KeyValueKind::String, IndexType::FtFast), &ctx)?;
//!
//! let mut item = ns.new_item();
//! item.from_json(r#"{"id": 1, "title": "a dance of queries"}"#)?;
//! ns.upsert(&mut item, &ctx)?;
//!
//! let found = ns.select_sql("SELECT * FROM books WHERE id = 1", &ctx)?;
//! assert_eq!(found.len(), 1);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │        Namespace (public surface)          │
//! ├──────────────┬────────────────────────────┤
//! │ SQL subset   │  Query AST / wire form      │
//! ├──────────────┴────────────────────────────┤
//! │  Selecter (rule-based planner, joins,      │
//! │  aggregations, comparators)                │
//! ├───────────────────────────────────────────┤
//! │  Index family: store / tree / hash /       │
//! │  fulltext fast / fulltext fuzzy / rtree    │
//! ├───────────────────────────────────────────┤
//! │  Payload (CJSON tuple + typed columns),    │
//! │  TagsMatcher, Variant, IdSet               │
//! ├───────────────────────────────────────────┤
//! │  WAL ring / replication / subscription     │
//! ├───────────────────────────────────────────┤
//! │  Storage collaborator (opaque ordered KV)  │
//! └───────────────────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`namespace`]: the integration point: items, locks, DDL, queries,
//!   transactions, background maintenance
//! - [`index`]: the index family and scan-fallback comparators
//! - [`fulltext`]: tokenizer plus the fast (BM25) and fuzzy (n-gram)
//!   engines
//! - [`selector`]: rule-based planner and execution
//! - [`query`]: AST, SQL subset parser, binary wire form
//! - [`payload`] / [`tags`] / [`cjson`]: the row representation
//! - [`wal`]: LSN-tagged mutation log, replication state, subscriptions
//! - [`storage`]: ordered-KV collaborator trait and the in-memory engine

pub mod cjson;
pub mod config;
pub mod ctx;
pub mod encoding;
pub mod error;
pub mod fulltext;
pub mod idset;
pub mod index;
pub mod item;
pub mod namespace;
pub mod payload;
pub mod query;
pub mod results;
pub mod selector;
pub mod storage;
pub mod tags;
pub mod txn;
pub mod types;
pub mod wal;

pub use config::NamespaceConfigData;
pub use ctx::Context;
pub use error::{Error, ErrorCode};
pub use idset::{IdSet, RowId};
pub use index::{Index, IndexDef, IndexOpts, IndexType};
pub use item::{Item, ItemModifyMode};
pub use namespace::{Namespace, OptimizationState};
pub use query::{CondType, OpType, Query, QueryType};
pub use results::QueryResults;
pub use selector::JoinPreSelect;
pub use storage::{Datastorage, MemStorage};
pub use tags::TagsMatcher;
pub use txn::Transaction;
pub use types::{KeyValueKind, Point, Variant, VariantArray};
pub use wal::{Lsn, ReplicationState, UpdatesFilters, UpdatesObserver, UpdatesObservers, WalRecord};
