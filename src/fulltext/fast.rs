//! Fast full-text engine.
//!
//! The index of record is `idx_map`: raw text key → id set, maintained
//! synchronously like any other index. Search runs against a built engine
//! (virtual documents, token postings, BM25 statistics) rebuilt at
//! commit in bounded chunks so a concurrent writer can cancel the pass.
//!
//! ## Ranking
//!
//! Per matched term and document, the base relevancy starts at 100 for an
//! exact token match. Partial (prefix) matches decay by
//! `partial_match_decrease * unmatched / matched`, typo matches by
//! `partial_match_decrease` per edit. The base is then weighted:
//!
//! ```text
//! rank = base * (1 - Σw + w_bm25 * boost_bm25 * bm25_norm
//!                      + w_len  * boost_len  * len_norm
//!                      + w_pos  * boost_pos  * pos_norm)
//! ```
//!
//! with per-field weights/boosts from [`FtFastConfig`]. A document whose
//! token count equals the query's term count with every match exact gets
//! the `full_match_boost`. Documents scoring under `min_relevancy * 100`
//! are dropped, and at most `merge_limit` documents merge into the result.

use super::dsl::{parse_dsl, DslTerm};
use super::key_texts;
use super::tokenizer::tokenize;
use crate::config::FtFastConfig;
use crate::ctx::Context;
use crate::idset::{IdSetRef, RowId};
use crate::index::{IndexDef, IndexMemStat, KeyEntry, SelectKeyResult, SelectOpts};
use crate::query::CondType;
use crate::types::{KeyString, Variant, VariantArray};
use eyre::Result;
use hashbrown::HashMap;
use std::collections::BTreeMap;

const BM25_K1: f64 = 2.0;
const BM25_B: f64 = 0.75;

#[derive(Debug, Clone)]
struct Posting {
    vdoc: u32,
    field: u32,
    positions: Vec<u32>,
}

#[derive(Debug, Clone, Default)]
struct WordEntry {
    postings: Vec<Posting>,
}

#[derive(Debug, Clone)]
struct VDoc {
    ids: IdSetRef,
    /// Kept tokens per field; the BM25 document length.
    token_count: usize,
}

#[derive(Clone, Default)]
struct Engine {
    words: BTreeMap<String, WordEntry>,
    vdocs: Vec<VDoc>,
    avg_len: f64,
}

pub struct FastTextIndex {
    pub def: IndexDef,
    config: FtFastConfig,
    idx_map: HashMap<Variant, KeyEntry>,
    expired_strings: Vec<KeyString>,
    engine: Engine,
    is_built: bool,
}

impl Clone for FastTextIndex {
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

impl FastTextIndex {
    pub fn new(def: IndexDef, config: FtFastConfig) -> Self {
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

    /// Rebuilds the virtual-document table and postings. Documents are
    /// processed in `max_step_size` chunks with a cancellation check
    /// between chunks.
    pub fn commit(&mut self, ctx: &Context) -> Result<()> {
        if self.is_built {
            return Ok(());
        }
        let mut engine = Engine::default();
        let step = self.config.max_step_size.max(1);
        let mut total_tokens = 0usize;

        for (processed, (key, entry)) in self.idx_map.iter().enumerate() {
            if processed % step == 0 {
                ctx.check()?;
            }
            let vdoc_id = engine.vdocs.len() as u32;
            let mut token_count = 0usize;
            for (field, text) in key_texts(key).iter().enumerate() {
                let tokens = tokenize(
                    text,
                    &self.config.extra_word_symbols,
                    &self.config.stop_words,
                    &self.config.stemmers,
                );
                token_count += tokens.len();
                for token in tokens {
                    let word = engine.words.entry(token.term).or_default();
                    match word
                        .postings
                        .iter_mut()
                        .find(|p| p.vdoc == vdoc_id && p.field == field as u32)
                    {
                        Some(posting) => posting.positions.push(token.position),
                        None => word.postings.push(Posting {
                            vdoc: vdoc_id,
                            field: field as u32,
                            positions: vec![token.position],
                        }),
                    }
                }
            }
            total_tokens += token_count;
            engine.vdocs.push(VDoc { ids: entry.ids.clone(), token_count });
        }
        engine.avg_len = if engine.vdocs.is_empty() {
            0.0
        } else {
            total_tokens as f64 / engine.vdocs.len() as f64
        };
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

        let terms = parse_dsl(query, &self.config.extra_word_symbols, &self.config.stemmers);
        let mut ranks: HashMap<u32, DocScore> = HashMap::new();
        let positive_terms = terms.iter().filter(|t| !t.excluded).count();

        for (term_no, term) in terms.iter().enumerate() {
            ctx.check()?;
            for matched in self.matching_words(term) {
                let word = &self.engine.words[&matched.word];
                for posting in &word.postings {
                    let score = self.posting_score(&matched, word, posting);
                    let doc = ranks.entry(posting.vdoc).or_default();
                    if term.excluded {
                        doc.excluded = true;
                    } else {
                        doc.add_term(term_no, score, matched.exact);
                    }
                }
            }
        }

        let mut scored: Vec<(u32, f64)> = Vec::new();
        for (vdoc, doc) in ranks {
            if doc.excluded || doc.matched_terms() == 0 {
                continue;
            }
            let required_matched = terms
                .iter()
                .enumerate()
                .filter(|(_, t)| t.required)
                .all(|(no, _)| doc.has_term(no));
            if !required_matched {
                continue;
            }
            let mut rank = doc.score_sum() / positive_terms.max(1) as f64;
            let full_match = doc.all_exact()
                && doc.matched_terms() == positive_terms
                && self.engine.vdocs[vdoc as usize].token_count == positive_terms;
            if full_match {
                rank *= self.config.full_match_boost;
            }
            if rank < self.config.min_relevancy * 100.0 {
                continue;
            }
            scored.push((vdoc, rank));
        }
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(self.config.merge_limit);

        let mut out: Vec<(RowId, f32)> = Vec::new();
        let mut seen: HashMap<RowId, usize> = HashMap::new();
        for (vdoc, rank) in scored {
            for &id in self.engine.vdocs[vdoc as usize].ids.iter() {
                match seen.get(&id) {
                    Some(&pos) => {
                        if out[pos].1 < rank as f32 {
                            out[pos].1 = rank as f32;
                        }
                    }
                    None => {
                        seen.insert(id, out.len());
                        out.push((id, rank as f32));
                    }
                }
            }
        }
        out.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(SelectKeyResult::Ranked(out))
    }

    fn matching_words(&self, term: &DslTerm) -> Vec<MatchedWord> {
        let mut out = Vec::new();
        if let Some(_entry) = self.engine.words.get(&term.term) {
            out.push(MatchedWord { word: term.term.clone(), exact: true, base: 100.0 });
        }
        if term.prefix {
            // Partial matching is symmetric: `termin*` hits "terminator"
            // (word extends the pattern) and "term" (word is a stem of the
            // pattern). Relevancy decays with the unmatched tail:
            // 100 - decrease * unmatched / matched.
            for (word, _) in &self.engine.words {
                if *word == term.term {
                    continue;
                }
                let term_len = term.term.chars().count();
                let word_len = word.chars().count();
                let overlap = if word.starts_with(&term.term) {
                    term_len
                } else if term.term.starts_with(word.as_str()) {
                    word_len
                } else {
                    continue;
                };
                let unmatched = term_len.max(word_len) - overlap;
                let base = 100.0
                    - f64::from(self.config.partial_match_decrease) * unmatched as f64
                        / overlap.max(1) as f64;
                out.push(MatchedWord { word: word.clone(), exact: false, base: base.max(1.0) });
            }
        }
        let typos = self.config.max_typos_in_word;
        if typos > 0 && !term.prefix && term.term.chars().count() <= self.config.max_typo_len {
            let term_len = term.term.chars().count();
            for (word, _) in &self.engine.words {
                if *word == term.term {
                    continue;
                }
                let word_len = word.chars().count();
                if word_len.abs_diff(term_len) > typos {
                    continue;
                }
                if let Some(dist) = edit_distance_within(&term.term, word, typos) {
                    let base =
                        100.0 - f64::from(self.config.partial_match_decrease) * dist as f64;
                    out.push(MatchedWord { word: word.clone(), exact: false, base: base.max(1.0) });
                }
            }
        }
        out
    }

    fn posting_score(&self, matched: &MatchedWord, word: &WordEntry, posting: &Posting) -> f64 {
        let cfg = self.config.field(posting.field as usize);
        let vdoc = &self.engine.vdocs[posting.vdoc as usize];
        let docs_with_word = word.postings.len() as f64;
        let total_docs = self.engine.vdocs.len() as f64;

        let idf = ((total_docs - docs_with_word + 0.5) / (docs_with_word + 0.5) + 1.0).ln();
        let tf = posting.positions.len() as f64;
        let len_ratio = if self.engine.avg_len > 0.0 {
            vdoc.token_count as f64 / self.engine.avg_len
        } else {
            1.0
        };
        let bm25 = idf * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * len_ratio));
        let bm25_norm = bm25 / (1.0 + bm25);

        let matched_len = matched.word.chars().count().max(1) as f64;
        let len_norm = if matched.exact {
            1.0
        } else {
            (matched_len - 1.0).max(0.0) / matched_len
        };
        let first_pos = posting.positions.first().copied().unwrap_or(0);
        let pos_norm = 1.0 / (1.0 + f64::from(first_pos) * 0.1);

        let weight_rest = (1.0
            - cfg.bm25_weight
            - cfg.term_len_weight
            - cfg.position_weight)
            .max(0.0);
        matched.base
            * (weight_rest
                + cfg.bm25_weight * cfg.bm25_boost * bm25_norm
                + cfg.term_len_weight * cfg.term_len_boost * len_norm
                + cfg.position_weight * cfg.position_boost * pos_norm)
    }

    pub fn mem_stat(&self) -> IndexMemStat {
        let data_size = self
            .engine
            .words
            .iter()
            .map(|(w, e)| w.len() + e.postings.len() * std::mem::size_of::<Posting>())
            .sum::<usize>();
        IndexMemStat {
            name: self.def.name.clone(),
            unique_keys_count: self.idx_map.len(),
            data_size,
            expired_strings_count: self.expired_strings.len(),
        }
    }
}

#[derive(Debug)]
struct MatchedWord {
    word: String,
    exact: bool,
    base: f64,
}

#[derive(Debug, Default)]
struct DocScore {
    /// Best score per matched query term.
    terms: smallvec::SmallVec<[(u16, f64, bool); 4]>,
    excluded: bool,
}

impl DocScore {
    fn add_term(&mut self, term_no: usize, score: f64, exact: bool) {
        let term_no = term_no as u16;
        match self.terms.iter_mut().find(|(no, _, _)| *no == term_no) {
            Some(slot) => {
                if score > slot.1 {
                    slot.1 = score;
                }
                slot.2 |= exact;
            }
            None => self.terms.push((term_no, score, exact)),
        }
    }

    fn matched_terms(&self) -> usize {
        self.terms.len()
    }

    fn score_sum(&self) -> f64 {
        self.terms.iter().map(|(_, s, _)| s).sum()
    }

    fn all_exact(&self) -> bool {
        self.terms.iter().all(|(_, _, e)| *e)
    }

    fn has_term(&self, term_no: usize) -> bool {
        self.terms.iter().any(|(no, _, _)| *no == term_no as u16)
    }
}

/// Levenshtein distance if it is `<= max`, else `None`. Banded rows keep
/// the scan cheap for the tiny `max` values the config allows.
fn edit_distance_within(a: &str, b: &str, max: usize) -> Option<usize> {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.len().abs_diff(b.len()) > max {
        return None;
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        cur[0] = i;
        let mut row_min = cur[0];
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            cur[j] = (prev[j] + 1).min(cur[j - 1] + 1).min(prev[j - 1] + cost);
            row_min = row_min.min(cur[j]);
        }
        if row_min > max {
            return None;
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    (prev[b.len()] <= max).then_some(prev[b.len()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexType;
    use crate::types::KeyValueKind;
    use smallvec::smallvec;

    fn ft_with(docs: &[(&str, RowId)]) -> FastTextIndex {
        let def = IndexDef::new("text", KeyValueKind::String, IndexType::FtFast);
        let mut idx = FastTextIndex::new(def, FtFastConfig { stemmers: vec![], ..Default::default() });
        for (text, id) in docs {
            idx.upsert(Variant::from(*text), *id).unwrap();
        }
        idx.commit(&Context::new()).unwrap();
        idx
    }

    fn search(idx: &FastTextIndex, query: &str) -> Vec<(RowId, f32)> {
        match idx
            .select_key(
                &smallvec![Variant::from(query)],
                CondType::Eq,
                SelectOpts::default(),
                &Context::new(),
            )
            .unwrap()
        {
            SelectKeyResult::Ranked(hits) => hits,
            _ => panic!("expected ranked result"),
        }
    }

    #[test]
    fn prefix_matches_all_and_exact_ranks_highest() {
        let idx = ft_with(&[("terminator", 0), ("terminate", 1), ("term", 2)]);

        let hits = search(&idx, "termin*");
        let ids: Vec<RowId> = hits.iter().map(|h| h.0).collect();
        assert_eq!(ids.len(), 3, "termin* matches all three: {ids:?}");

        let hits = search(&idx, "terminator");
        assert_eq!(hits[0].0, 0);
        if hits.len() > 1 {
            assert!(hits[0].1 > hits[1].1);
        }
    }

    #[test]
    fn term_prefix_matches_all_three() {
        let idx = ft_with(&[("terminator", 0), ("terminate", 1), ("term", 2)]);
        let hits = search(&idx, "term*");
        assert_eq!(hits.len(), 3);
        // Exact "term" outranks the partial matches.
        assert_eq!(hits[0].0, 2);
    }

    #[test]
    fn typo_within_budget_matches() {
        let idx = ft_with(&[("terminator", 0)]);
        let hits = search(&idx, "terminater");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 0);
        assert!(hits[0].1 < 100.0);
    }

    #[test]
    fn excluded_and_required_terms() {
        let idx = ft_with(&[("quick brown fox", 0), ("quick red fox", 1)]);
        let hits = search(&idx, "quick -brown");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 1);

        let hits = search(&idx, "+brown fox");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 0);
    }

    #[test]
    fn uncommitted_select_is_a_logic_error() {
        let def = IndexDef::new("text", KeyValueKind::String, IndexType::FtFast);
        let mut idx = FastTextIndex::new(def, FtFastConfig::default());
        idx.upsert(Variant::from("doc"), 0).unwrap();
        assert!(idx
            .select_key(
                &smallvec![Variant::from("doc")],
                CondType::Eq,
                SelectOpts::default(),
                &Context::new(),
            )
            .is_err());
    }

    #[test]
    fn edit_distance_bands() {
        assert_eq!(edit_distance_within("cat", "cat", 1), Some(0));
        assert_eq!(edit_distance_within("cat", "cut", 1), Some(1));
        assert_eq!(edit_distance_within("cat", "dog", 1), None);
        assert_eq!(edit_distance_within("abcd", "ab", 1), None);
    }
}
