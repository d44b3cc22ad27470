//! Word splitting shared by both engines: unicode word boundaries with the
//! configured extra symbols glued into words, lowercased, stop words
//! dropped, and optionally stemmed.

use rust_stemmers::{Algorithm, Stemmer};
use unicode_segmentation::UnicodeSegmentation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub term: String,
    /// Word position within the field, counting kept tokens.
    pub position: u32,
}

pub fn tokenize(
    text: &str,
    extra_symbols: &str,
    stop_words: &[String],
    stemmers: &[String],
) -> Vec<Token> {
    let stemmer = stemmers.first().and_then(|name| stemmer_for(name));
    let mut out = Vec::new();
    let mut position = 0u32;

    // split_word_bounds keeps punctuation as separate "words"; merge runs
    // of word-chars and configured extra symbols into one token.
    let mut current = String::new();
    let mut flush = |current: &mut String, out: &mut Vec<Token>, position: &mut u32| {
        if current.is_empty() {
            return;
        }
        let lowered = current.to_lowercase();
        current.clear();
        if stop_words.iter().any(|w| *w == lowered) {
            return;
        }
        let term = match &stemmer {
            Some(s) => s.stem(&lowered).into_owned(),
            None => lowered,
        };
        out.push(Token { term, position: *position });
        *position += 1;
    };

    for piece in text.split_word_bounds() {
        let is_wordy = piece
            .chars()
            .all(|c| c.is_alphanumeric() || extra_symbols.contains(c));
        if is_wordy && !piece.trim().is_empty() {
            current.push_str(piece);
        } else {
            flush(&mut current, &mut out, &mut position);
        }
    }
    flush(&mut current, &mut out, &mut position);
    out
}

fn stemmer_for(name: &str) -> Option<Stemmer> {
    let algorithm = match name {
        "english" | "en" => Algorithm::English,
        "russian" | "ru" => Algorithm::Russian,
        "german" | "de" => Algorithm::German,
        "french" | "fr" => Algorithm::French,
        "spanish" | "es" => Algorithm::Spanish,
        _ => return None,
    };
    Some(Stemmer::create(algorithm))
}
