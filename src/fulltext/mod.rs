//! # Full-Text Engines
//!
//! Two full-text index kinds share this module:
//!
//! - [`FastTextIndex`]: tokenized engine with BM25, term-position and
//!   term-length scoring, prefix and typo matching. The index of record is
//!   a plain text → id-set map kept current on every upsert/delete; the
//!   search structures (virtual document table, token postings) are
//!   rebuilt lazily at [commit] in bounded steps.
//! - [`FuzzyTextIndex`]: n-gram candidate engine. Query and document grams
//!   are matched positionally-blind; scores are normalized so the best
//!   match caps at 100 and results under `min_ok_percent` are dropped.
//!
//! Query strings use a minimal DSL: terms split on whitespace, `term*`
//! enables prefix matching, `+term` is required, `-term` excludes
//! documents containing the term.

mod dsl;
mod fast;
mod fuzzy;
mod tokenizer;

pub use dsl::{DslTerm, parse_dsl};
pub use fast::FastTextIndex;
pub use fuzzy::FuzzyTextIndex;
pub use tokenizer::{tokenize, Token};

use crate::types::Variant;

/// Flattens an FT key (string or composite of strings) into per-field
/// texts. Composite FT indexes carry one entry per source field.
pub(crate) fn key_texts(key: &Variant) -> Vec<String> {
    match key {
        Variant::String(s) => vec![s.as_str().to_string()],
        Variant::Composite(parts) => parts
            .iter()
            .map(|p| p.as_str().unwrap_or_default().to_string())
            .collect(),
        _ => Vec::new(),
    }
}
