//! Fuzzy full-text engine: n-gram candidate matching.
//!
//! Documents and queries are decomposed into character n-grams (word
//! boundaries padded). A document's raw score is the dice coefficient of
//! the two gram multisets scaled to percent; the merged result set is
//! normalized so the best score caps at 100, then filtered by
//! `min_ok_percent`.

use super::key_texts;
use super::tokenizer::tokenize;
use crate::config::FtFuzzyConfig;
use crate::ctx::Context;
use crate::idset::RowId;
use crate::index::{IndexDef, IndexMemStat, KeyEntry, SelectKeyResult, SelectOpts};
use crate::query::CondType;
use crate::types::{KeyString, Variant, VariantArray};
use eyre::Result;
use hashbrown::HashMap;

#[derive(Clone, Default)]
struct Engine {
    /// gram → (vdoc, occurrences in vdoc)
    grams: HashMap<String, Vec<(u32, u32)>>,
    /// total grams per vdoc
    vdoc_grams: Vec<u32>,
    vdoc_ids: Vec<crate::idset::IdSetRef>,
}

pub struct FuzzyTextIndex {
    pub def: IndexDef,
    config: FtFuzzyConfig,
    idx_map: HashMap<Variant, KeyEntry>,
    expired_strings: Vec<KeyString>,
    engine: Engine,
    is_built: bool,
}

impl Clone for FuzzyTextIndex {
    fn clone(&self) -> Self {
        Self {
            def: self.def.clone(),
            config: self.config.clone(),
            idx_map: self.idx_map.clone(),
            expired_strings: Vec::new(),
            engine: self.engine.clone(),
            is_built: self.is_built,
        }
    }
}

impl FuzzyTextIndex {
    pub fn new(def: IndexDef, config: FtFuzzyConfig) -> Self {
        Self {
            def,
            config,
            idx_map: HashMap::new(),
            expired_strings: Vec::new(),
            engine: Engine::default(),
            is_built: false,
        }
    }

    pub fn size(&self) -> usize {
        self.idx_map.len()
    }

    pub fn is_built(&self) -> bool {
        self.is_built
    }

    pub fn clear_expired(&mut self) {
        self.expired_strings.clear();
    }

    pub fn upsert(&mut self, key: Variant, id: RowId) -> Result<Variant> {
        self.is_built = false;
        if let Some((stored, _)) = self.idx_map.get_key_value(&key) {
            let canonical = stored.clone();
            self.idx_map.get_mut(&key).unwrap().add(id);
            return Ok(canonical);
        }
        let mut entry = KeyEntry::new();
        entry.add(id);
        let canonical = key.clone();
        self.idx_map.insert(key, entry);
        Ok(canonical)
    }

    pub fn delete(&mut self, key: Variant, id: RowId) {
        self.is_built = false;
        if let Some(entry) = self.idx_map.get_mut(&key) {
            if entry.erase(id) {
                if let Some((stored, _)) = self.idx_map.remove_entry(&key) {
                    if let Variant::String(s) = stored {
                        self.expired_strings.push(s);
                    }
                }
            }
        }
    }

    pub fn commit(&mut self, ctx: &Context) -> Result<()> {
        if self.is_built {
            return Ok(());
        }
        let mut engine = Engine::default();
        for (i, (key, entry)) in self.idx_map.iter().enumerate() {
            if i % 1024 == 0 {
                ctx.check()?;
            }
            let vdoc = engine.vdoc_ids.len() as u32;
            let mut count = 0u32;
            let mut local: HashMap<String, u32> = HashMap::new();
            for text in key_texts(key) {
                for gram in self.doc_grams(&text) {
                    *local.entry(gram).or_insert(0) += 1;
                    count += 1;
                }
            }
            for (gram, occurrences) in local {
                engine.grams.entry(gram).or_default().push((vdoc, occurrences));
            }
            engine.vdoc_grams.push(count);
            engine.vdoc_ids.push(entry.ids.clone());
        }
        self.engine = engine;
        self.is_built = true;
        Ok(())
    }

    pub fn select_key(
        &self,
        keys: &VariantArray,
        cond: CondType,
        _opts: SelectOpts,
        ctx: &Context,
    ) -> Result<SelectKeyResult> {
        if !matches!(cond, CondType::Eq | CondType::Set | CondType::Like) {
            return Err(crate::error::Error::params(format!(
                "fulltext index '{}' supports match conditions only",
                self.def.name
            ))
            .into());
        }
        if !self.is_built {
            return Err(crate::error::Error::logic(format!(
                "fulltext index '{}' is not committed",
                self.def.name
            ))
            .into());
        }
        let Some(query) = keys.first().and_then(Variant::as_str) else {
            return Err(crate::error::Error::params("fulltext query must be a string").into());
        };
        ctx.check()?;

        let query_grams = self.doc_grams(query);
        if query_grams.is_empty() {
            return Ok(SelectKeyResult::Ranked(Vec::new()));
        }
        let mut matched: HashMap<u32, u32> = HashMap::new();
        let mut query_counts: HashMap<&str, u32> = HashMap::new();
        for gram in &query_grams {
            *query_counts.entry(gram.as_str()).or_insert(0) += 1;
        }
        for (gram, want) in &query_counts {
            if let Some(postings) = self.engine.grams.get(*gram) {
                for (vdoc, have) in postings {
                    *matched.entry(*vdoc).or_insert(0) += (*have).min(*want);
                }
            }
        }

        // Dice coefficient in percent, then normalize the batch to <= 100.
        let mut scored: Vec<(u32, f64)> = matched
            .into_iter()
            .map(|(vdoc, shared)| {
                let doc_total = self.engine.vdoc_grams[vdoc as usize];
                let score = 200.0 * f64::from(shared)
                    / f64::from(doc_total + query_grams.len() as u32).max(1.0);
                (vdoc, score)
            })
            .collect();
        let max_score = scored.iter().map(|(_, s)| *s).fold(0.0f64, f64::max);
        if max_score > 100.0 {
            let coef = 100.0 / max_score;
            for (_, s) in &mut scored {
                *s *= coef;
            }
        }
        scored.retain(|(_, s)| *s >= self.config.min_ok_percent);
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(self.config.merge_limit);

        let mut out: Vec<(RowId, f32)> = Vec::new();
        let mut seen: HashMap<RowId, usize> = HashMap::new();
        for (vdoc, score) in scored {
            for &id in self.engine.vdoc_ids[vdoc as usize].iter() {
                match seen.get(&id) {
                    Some(&pos) => {
                        if out[pos].1 < score as f32 {
                            out[pos].1 = score as f32;
                        }
                    }
                    None => {
                        seen.insert(id, out.len());
                        out.push((id, score as f32));
                    }
                }
            }
        }
        out.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(SelectKeyResult::Ranked(out))
    }

    /// Word-padded n-grams of a text: each token is wrapped in `\x02` /
    /// `\x03` sentinels so word starts and ends carry weight.
    fn doc_grams(&self, text: &str) -> Vec<String> {
        let gram = self.config.gram_size.max(2);
        let mut out = Vec::new();
        for token in tokenize(text, &self.config.extra_word_symbols, &[], &[]) {
            let padded: Vec<char> = std::iter::once('\x02')
                .chain(token.term.chars())
                .chain(std::iter::once('\x03'))
                .collect();
            if padded.len() < gram {
                out.push(padded.iter().collect());
                continue;
            }
            for window in padded.windows(gram) {
                out.push(window.iter().collect());
            }
        }
        out
    }

    pub fn mem_stat(&self) -> IndexMemStat {
        let data_size = self
            .engine
            .grams
            .iter()
            .map(|(g, p)| g.len() + p.len() * std::mem::size_of::<(u32, u32)>())
            .sum::<usize>();
        IndexMemStat {
            name: self.def.name.clone(),
            unique_keys_count: self.idx_map.len(),
            data_size,
            expired_strings_count: self.expired_strings.len(),
        }
    }
}
