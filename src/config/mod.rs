//! # Namespace & Index Configuration
//!
//! Config objects the core consumes. The surrounding server parses these
//! out of its own config sources and hands them down; everything here is
//! serde-friendly so index configs can also arrive as JSON attached to an
//! index definition.

use serde::{Deserialize, Serialize};

/// Per-namespace tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceConfigData {
    /// Capacity of the WAL ring, in records.
    pub wal_size: usize,
    /// Background index optimization gives up its slice after this long.
    pub optimization_timeout_ms: u64,
    /// Pending storage updates that force a flush on the next background
    /// tick even if the tick's flush budget was already spent.
    pub sync_storage_flush_limit: usize,
    /// With partial commits (the default), a failing transaction step
    /// keeps the prior steps applied. Turning this off validates the whole
    /// transaction up front so a failing one applies nothing.
    pub tx_partial_commit: bool,
}

impl Default for NamespaceConfigData {
    fn default() -> Self {
        Self {
            wal_size: 4_000_000,
            optimization_timeout_ms: 800,
            sync_storage_flush_limit: 20_000,
            tx_partial_commit: true,
        }
    }
}

/// Per-field scoring weights of the fast full-text engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FtFastFieldConfig {
    pub bm25_boost: f64,
    pub bm25_weight: f64,
    pub term_len_boost: f64,
    pub term_len_weight: f64,
    pub position_boost: f64,
    pub position_weight: f64,
}

impl Default for FtFastFieldConfig {
    fn default() -> Self {
        Self {
            bm25_boost: 1.0,
            bm25_weight: 0.1,
            term_len_boost: 1.0,
            term_len_weight: 0.3,
            position_boost: 1.0,
            position_weight: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FtFastConfig {
    pub full_match_boost: f64,
    /// Relevancy step of a partial match:
    /// `rank = 100 - partial_match_decrease * unmatched / matched`.
    pub partial_match_decrease: i32,
    pub min_relevancy: f64,
    pub max_typos_in_word: usize,
    /// Words shorter than this never match with typos.
    pub max_typo_len: usize,
    pub max_rebuild_steps: usize,
    pub max_step_size: usize,
    pub merge_limit: usize,
    /// Symbols treated as word characters in addition to alphanumerics.
    pub extra_word_symbols: String,
    pub stemmers: Vec<String>,
    pub stop_words: Vec<String>,
    pub fields: Vec<FtFastFieldConfig>,
}

impl Default for FtFastConfig {
    fn default() -> Self {
        Self {
            full_match_boost: 1.1,
            partial_match_decrease: 15,
            min_relevancy: 0.05,
            max_typos_in_word: 1,
            max_typo_len: 15,
            max_rebuild_steps: 50,
            max_step_size: 4000,
            merge_limit: 20_000,
            extra_word_symbols: "+-/".to_string(),
            stemmers: vec!["english".to_string()],
            stop_words: Vec::new(),
            fields: Vec::new(),
        }
    }
}

impl FtFastConfig {
    pub fn parse(json: &str) -> eyre::Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| crate::error::Error::params(format!("ft config: {e}")).into())
    }

    pub fn field(&self, idx: usize) -> FtFastFieldConfig {
        self.fields.get(idx).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FtFuzzyConfig {
    /// n-gram width of the candidate engine.
    pub gram_size: usize,
    /// Results below this normalized rank are dropped.
    pub min_ok_percent: f64,
    pub merge_limit: usize,
    pub extra_word_symbols: String,
}

impl Default for FtFuzzyConfig {
    fn default() -> Self {
        Self {
            gram_size: 3,
            min_ok_percent: 10.0,
            merge_limit: 20_000,
            extra_word_symbols: "+-/".to_string(),
        }
    }
}

impl FtFuzzyConfig {
    pub fn parse(json: &str) -> eyre::Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| crate::error::Error::params(format!("ft fuzzy config: {e}")).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ft_config_parses_partial_json() {
        let cfg = FtFastConfig::parse(r#"{"max_typos_in_word": 2, "stemmers": []}"#).unwrap();
        assert_eq!(cfg.max_typos_in_word, 2);
        assert!(cfg.stemmers.is_empty());
        assert_eq!(cfg.partial_match_decrease, 15);
    }

    #[test]
    fn unknown_field_config_falls_back_to_default() {
        let cfg = FtFastConfig::default();
        assert_eq!(cfg.field(3).bm25_weight, 0.1);
    }
}
