//! Query DSL of the full-text conditions: whitespace-separated terms with
//! `+` (required), `-` (excluded) and a trailing `*` (prefix) modifier.

use super::tokenizer::tokenize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DslTerm {
    pub term: String,
    pub prefix: bool,
    pub required: bool,
    pub excluded: bool,
}

pub fn parse_dsl(query: &str, extra_symbols: &str, stemmers: &[String]) -> Vec<DslTerm> {
    let mut out = Vec::new();
    for raw in query.split_whitespace() {
        let mut term = raw;
        let mut required = false;
        let mut excluded = false;
        let mut prefix = false;

        if let Some(rest) = term.strip_prefix('+') {
            required = true;
            term = rest;
        } else if let Some(rest) = term.strip_prefix('-') {
            excluded = true;
            term = rest;
        }
        if let Some(rest) = term.strip_suffix('*') {
            prefix = true;
            term = rest;
        }
        if term.is_empty() {
            continue;
        }
        // Prefix terms skip stemming: the user asked for a literal stem.
        let normalized = if prefix {
            term.to_lowercase()
        } else {
            match tokenize(term, extra_symbols, &[], stemmers).into_iter().next() {
                Some(token) => token.term,
                None => continue,
            }
        };
        out.push(DslTerm { term: normalized, prefix, required, excluded });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modifiers() {
        let terms = parse_dsl("+must -not may*", "", &[]);
        assert_eq!(terms.len(), 3);
        assert!(terms[0].required);
        assert!(terms[1].excluded);
        assert!(terms[2].prefix);
        assert_eq!(terms[2].term, "may");
    }

    #[test]
    fn empty_modifiers_are_skipped() {
        assert!(parse_dsl("+ - *", "", &[]).is_empty());
    }
}
