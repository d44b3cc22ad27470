//! # SQL Subset Parser
//!
//! Hand-written lexer and recursive-descent parser for the SQL surface the
//! engine supports:
//!
//! ```sql
//! SELECT * | fields | COUNT(*) | SUM(f) | ... FROM ns
//!     [WHERE <expr>] [ORDER BY f [ASC|DESC], ...] [LIMIT n] [OFFSET n]
//! UPDATE ns SET f = <lit>, ... [WHERE <expr>]
//! UPDATE ns DROP f [WHERE <expr>]
//! DELETE FROM ns [WHERE <expr>]
//! TRUNCATE ns
//! ```
//!
//! `<expr>` supports `AND`/`OR`/`NOT`, parentheses, the comparison
//! operators, `IN (...)`, `BETWEEN a AND b`, `LIKE`, `IS [NOT] NULL`,
//! `ALLSET(f, ...)`, `DWITHIN(f, x, y, dist)` and the full-text match
//! operator `field @@ 'query'` (an `Eq` condition that the planner routes
//! to the field's full-text index).
//!
//! The tokenizer borrows from the input; nothing is allocated until the
//! AST is built.

use super::{AggType, CondType, FilterItem, FilterNode, OpType, Query, QueryEntry, QueryType, SortingEntry, UpdateMode};
use crate::error::Error;
use crate::types::{Variant, VariantArray};
use eyre::Result;
use smallvec::smallvec;

pub fn parse(input: &str) -> Result<Query> {
    let tokens = tokenize(input)?;
    let mut p = Parser { tokens, pos: 0, input };
    let q = p.parse_statement()?;
    p.expect_end()?;
    Ok(q)
}

#[derive(Debug, Clone, PartialEq)]
enum Tok<'a> {
    Ident(&'a str),
    Str(&'a str),
    Int(i64),
    Float(f64),
    Sym(&'a str),
}

fn tokenize(input: &str) -> Result<Vec<Tok<'_>>> {
    let bytes = input.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' | ')' | ',' | '*' | '=' => {
                out.push(Tok::Sym(&input[i..i + 1]));
                i += 1;
            }
            '<' | '>' => {
                let two = input.get(i..i + 2);
                if matches!(two, Some("<=") | Some(">=") | Some("<>")) {
                    out.push(Tok::Sym(two.unwrap()));
                    i += 2;
                } else {
                    out.push(Tok::Sym(&input[i..i + 1]));
                    i += 1;
                }
            }
            '@' => {
                if input.get(i..i + 2) == Some("@@") {
                    out.push(Tok::Sym("@@"));
                    i += 2;
                } else {
                    return Err(Error::parse_sql(format!("unexpected '@' at {i}")).into());
                }
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut j = start;
                while j < bytes.len() && bytes[j] as char != quote {
                    j += 1;
                }
                if j >= bytes.len() {
                    return Err(Error::parse_sql("unterminated string literal").into());
                }
                out.push(Tok::Str(&input[start..j]));
                i = j + 1;
            }
            '-' | '0'..='9' => {
                let start = i;
                i += 1;
                let mut is_float = false;
                while i < bytes.len() {
                    match bytes[i] as char {
                        '0'..='9' => i += 1,
                        '.' | 'e' | 'E' => {
                            is_float = true;
                            i += 1;
                        }
                        '-' | '+' if is_float => i += 1,
                        _ => break,
                    }
                }
                let text = &input[start..i];
                if is_float {
                    let v = text
                        .parse()
                        .map_err(|_| Error::parse_sql(format!("bad number '{text}'")))?;
                    out.push(Tok::Float(v));
                } else {
                    let v = text
                        .parse()
                        .map_err(|_| Error::parse_sql(format!("bad number '{text}'")))?;
                    out.push(Tok::Int(v));
                }
            }
            _ if c.is_alphabetic() || c == '_' || c == '#' => {
                let start = i;
                while i < bytes.len() {
                    let c = bytes[i] as char;
                    if c.is_alphanumeric() || c == '_' || c == '.' || c == '#' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                out.push(Tok::Ident(&input[start..i]));
            }
            other => return Err(Error::parse_sql(format!("unexpected character '{other}'")).into()),
        }
    }
    Ok(out)
}

struct Parser<'a> {
    tokens: Vec<Tok<'a>>,
    pos: usize,
    input: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Tok<'a>> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok<'a>> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if let Some(Tok::Ident(id)) = self.peek() {
            if id.eq_ignore_ascii_case(kw) {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    fn peek_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(id)) if id.eq_ignore_ascii_case(kw))
    }

    fn eat_sym(&mut self, sym: &str) -> bool {
        if let Some(Tok::Sym(s)) = self.peek() {
            if *s == sym {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    fn expect_kw(&mut self, kw: &str) -> Result<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.err(format!("expected {kw}")))
        }
    }

    fn expect_sym(&mut self, sym: &str) -> Result<()> {
        if self.eat_sym(sym) {
            Ok(())
        } else {
            Err(self.err(format!("expected '{sym}'")))
        }
    }

    fn expect_ident(&mut self) -> Result<&'a str> {
        match self.next() {
            Some(Tok::Ident(id)) => Ok(id),
            _ => Err(self.err("expected identifier")),
        }
    }

    fn expect_end(&self) -> Result<()> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(self.err("trailing tokens after statement"))
        }
    }

    fn err(&self, msg: impl Into<String>) -> eyre::Report {
        Error::parse_sql(format!("{} in query '{}'", msg.into(), self.input)).into()
    }

    fn parse_statement(&mut self) -> Result<Query> {
        if self.eat_kw("SELECT") {
            self.parse_select()
        } else if self.eat_kw("UPDATE") {
            self.parse_update()
        } else if self.eat_kw("DELETE") {
            self.expect_kw("FROM")?;
            let mut q = Query::new(self.expect_ident()?);
            q.query_type = QueryType::Delete;
            self.parse_tail(&mut q)?;
            Ok(q)
        } else if self.eat_kw("TRUNCATE") {
            let mut q = Query::new(self.expect_ident()?);
            q.query_type = QueryType::Truncate;
            Ok(q)
        } else {
            Err(self.err("expected SELECT, UPDATE, DELETE or TRUNCATE"))
        }
    }

    fn parse_select(&mut self) -> Result<Query> {
        let mut projections = Vec::new();
        let mut aggregations = Vec::new();
        loop {
            if self.eat_sym("*") {
            } else if let Some(Tok::Ident(id)) = self.peek().cloned() {
                if let Some(agg) = agg_from_name(id) {
                    self.pos += 1;
                    self.expect_sym("(")?;
                    let mut fields = Vec::new();
                    if !self.eat_sym("*") {
                        loop {
                            fields.push(self.expect_ident()?.to_string());
                            if !self.eat_sym(",") {
                                break;
                            }
                        }
                    }
                    self.expect_sym(")")?;
                    aggregations.push(super::AggregateEntry { agg_type: agg, fields, limit: None });
                } else {
                    self.pos += 1;
                    projections.push(id.to_string());
                }
            } else {
                return Err(self.err("expected projection"));
            }
            if !self.eat_sym(",") {
                break;
            }
        }
        self.expect_kw("FROM")?;
        let mut q = Query::new(self.expect_ident()?);
        q.select_filter = projections;
        q.aggregations = aggregations;
        self.parse_tail(&mut q)?;
        Ok(q)
    }

    fn parse_update(&mut self) -> Result<Query> {
        let mut q = Query::new(self.expect_ident()?);
        q.query_type = QueryType::Update;
        if self.eat_kw("SET") {
            loop {
                let field = self.expect_ident()?.to_string();
                self.expect_sym("=")?;
                let values = self.parse_value_or_list()?;
                q.update_fields.push(super::UpdateEntry {
                    field,
                    values,
                    mode: UpdateMode::SetField,
                });
                if !self.eat_sym(",") {
                    break;
                }
            }
        } else if self.eat_kw("DROP") {
            let field = self.expect_ident()?.to_string();
            q.update_fields.push(super::UpdateEntry {
                field,
                values: VariantArray::new(),
                mode: UpdateMode::DropField,
            });
        } else {
            return Err(self.err("expected SET or DROP"));
        }
        self.parse_tail(&mut q)?;
        Ok(q)
    }

    fn parse_tail(&mut self, q: &mut Query) -> Result<()> {
        if self.eat_kw("WHERE") {
            q.entries = self.parse_expr()?;
        }
        if self.eat_kw("ORDER") {
            self.expect_kw("BY")?;
            loop {
                let field = self.expect_ident()?.to_string();
                let desc = if self.eat_kw("DESC") {
                    true
                } else {
                    self.eat_kw("ASC");
                    false
                };
                q.sort.push(SortingEntry { field, desc });
                if !self.eat_sym(",") {
                    break;
                }
            }
        }
        if self.eat_kw("LIMIT") {
            match self.next() {
                Some(Tok::Int(n)) if n >= 0 => q.limit = Some(n as usize),
                _ => return Err(self.err("expected LIMIT count")),
            }
        }
        if self.eat_kw("OFFSET") {
            match self.next() {
                Some(Tok::Int(n)) if n >= 0 => q.offset = n as usize,
                _ => return Err(self.err("expected OFFSET count")),
            }
        }
        Ok(())
    }

    /// expr := term (AND|OR term)*, with NOT and parentheses inside term.
    fn parse_expr(&mut self) -> Result<Vec<FilterItem>> {
        let mut items = Vec::new();
        let mut op = OpType::And;
        loop {
            let mut this_op = op;
            if self.eat_kw("NOT") {
                this_op = OpType::Not;
            }
            let node = if self.eat_sym("(") {
                let inner = self.parse_expr()?;
                self.expect_sym(")")?;
                FilterNode::Bracket(inner)
            } else {
                FilterNode::Cond(self.parse_condition()?)
            };
            items.push(FilterItem { op: this_op, node });

            if self.eat_kw("AND") {
                op = OpType::And;
            } else if self.eat_kw("OR") {
                op = OpType::Or;
            } else {
                return Ok(items);
            }
        }
    }

    fn parse_condition(&mut self) -> Result<QueryEntry> {
        // Function-style conditions first.
        if self.peek_kw("ALLSET") {
            self.pos += 1;
            self.expect_sym("(")?;
            let field = self.expect_ident()?.to_string();
            let mut values = VariantArray::new();
            while self.eat_sym(",") {
                values.push(self.parse_value()?);
            }
            self.expect_sym(")")?;
            return Ok(QueryEntry { field, cond: CondType::AllSet, values });
        }
        if self.peek_kw("DWITHIN") {
            self.pos += 1;
            self.expect_sym("(")?;
            let field = self.expect_ident()?.to_string();
            let mut values = VariantArray::new();
            for _ in 0..3 {
                self.expect_sym(",")?;
                values.push(self.parse_value()?);
            }
            self.expect_sym(")")?;
            return Ok(QueryEntry { field, cond: CondType::DWithin, values });
        }

        let field = self.expect_ident()?.to_string();

        if self.eat_kw("IS") {
            let negated = self.eat_kw("NOT");
            self.expect_kw("NULL")?;
            let cond = if negated { CondType::Any } else { CondType::Empty };
            return Ok(QueryEntry { field, cond, values: VariantArray::new() });
        }
        if self.eat_kw("IN") {
            self.expect_sym("(")?;
            let mut values = VariantArray::new();
            loop {
                values.push(self.parse_value()?);
                if !self.eat_sym(",") {
                    break;
                }
            }
            self.expect_sym(")")?;
            return Ok(QueryEntry { field, cond: CondType::Set, values });
        }
        if self.eat_kw("BETWEEN") {
            let low = self.parse_value()?;
            self.expect_kw("AND")?;
            let high = self.parse_value()?;
            return Ok(QueryEntry { field, cond: CondType::Range, values: smallvec![low, high] });
        }
        if self.eat_kw("LIKE") {
            let value = self.parse_value()?;
            return Ok(QueryEntry { field, cond: CondType::Like, values: smallvec![value] });
        }

        let cond = match self.next() {
            Some(Tok::Sym("=")) | Some(Tok::Sym("@@")) => CondType::Eq,
            Some(Tok::Sym("<")) => CondType::Lt,
            Some(Tok::Sym("<=")) => CondType::Le,
            Some(Tok::Sym(">")) => CondType::Gt,
            Some(Tok::Sym(">=")) => CondType::Ge,
            _ => return Err(self.err(format!("expected operator after '{field}'"))),
        };
        let value = self.parse_value()?;
        Ok(QueryEntry { field, cond, values: smallvec![value] })
    }

    fn parse_value_or_list(&mut self) -> Result<VariantArray> {
        if self.eat_sym("(") {
            let mut values = VariantArray::new();
            loop {
                values.push(self.parse_value()?);
                if !self.eat_sym(",") {
                    break;
                }
            }
            self.expect_sym(")")?;
            Ok(values)
        } else {
            Ok(smallvec![self.parse_value()?])
        }
    }

    fn parse_value(&mut self) -> Result<Variant> {
        match self.next() {
            Some(Tok::Int(v)) => Ok(if let Ok(small) = i32::try_from(v) {
                Variant::Int(small)
            } else {
                Variant::Int64(v)
            }),
            Some(Tok::Float(v)) => Ok(Variant::Double(v)),
            Some(Tok::Str(s)) => Ok(Variant::from(s)),
            Some(Tok::Ident(id)) if id.eq_ignore_ascii_case("true") => Ok(Variant::Bool(true)),
            Some(Tok::Ident(id)) if id.eq_ignore_ascii_case("false") => Ok(Variant::Bool(false)),
            Some(Tok::Ident(id)) if id.eq_ignore_ascii_case("null") => Ok(Variant::Null),
            _ => Err(self.err("expected literal value")),
        }
    }
}

fn agg_from_name(name: &str) -> Option<AggType> {
    if name.eq_ignore_ascii_case("SUM") {
        Some(AggType::Sum)
    } else if name.eq_ignore_ascii_case("AVG") {
        Some(AggType::Avg)
    } else if name.eq_ignore_ascii_case("MIN") {
        Some(AggType::Min)
    } else if name.eq_ignore_ascii_case("MAX") {
        Some(AggType::Max)
    } else if name.eq_ignore_ascii_case("COUNT") {
        Some(AggType::Count)
    } else if name.eq_ignore_ascii_case("FACET") {
        Some(AggType::Facet)
    } else if name.eq_ignore_ascii_case("DISTINCT") {
        Some(AggType::Distinct)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn parses_select_with_range_and_order() {
        let q = parse("SELECT * FROM books WHERE price > 3 AND price <= 7 ORDER BY price DESC LIMIT 2").unwrap();
        assert_eq!(q.namespace, "books");
        assert_eq!(q.entries.len(), 2);
        assert_eq!(q.sort.len(), 1);
        assert!(q.sort[0].desc);
        assert_eq!(q.limit, Some(2));
    }

    #[test]
    fn parses_in_between_like_and_null_checks() {
        let q = parse("SELECT * FROM ns WHERE a IN (1, 2, 3) OR b BETWEEN 5 AND 9 AND c LIKE 'x%' AND d IS NULL AND e IS NOT NULL").unwrap();
        let conds: Vec<_> = q
            .entries
            .iter()
            .map(|i| match &i.node {
                FilterNode::Cond(c) => c.cond,
                _ => panic!("bracket"),
            })
            .collect();
        assert_eq!(
            conds,
            vec![CondType::Set, CondType::Range, CondType::Like, CondType::Empty, CondType::Any]
        );
        assert_eq!(q.entries[1].op, OpType::Or);
    }

    #[test]
    fn parses_fulltext_match_operator() {
        let q = parse("SELECT * FROM docs WHERE text @@ 'termin*'").unwrap();
        match &q.entries[0].node {
            FilterNode::Cond(c) => {
                assert_eq!(c.cond, CondType::Eq);
                assert_eq!(c.values[0].as_str(), Some("termin*"));
            }
            _ => panic!("expected condition"),
        }
    }

    #[test]
    fn parses_brackets_and_not() {
        let q = parse("SELECT * FROM ns WHERE NOT a = 1 AND (b = 2 OR c = 3)").unwrap();
        assert_eq!(q.entries[0].op, OpType::Not);
        assert!(matches!(q.entries[1].node, FilterNode::Bracket(_)));
    }

    #[test]
    fn parses_update_and_delete() {
        let q = parse("UPDATE books SET price = 10, title = 'x' WHERE id = 1").unwrap();
        assert_eq!(q.query_type, QueryType::Update);
        assert_eq!(q.update_fields.len(), 2);

        let q = parse("UPDATE books DROP stale WHERE id = 2").unwrap();
        assert_eq!(q.update_fields[0].mode, UpdateMode::DropField);

        let q = parse("DELETE FROM books WHERE id = 3").unwrap();
        assert_eq!(q.query_type, QueryType::Delete);

        let q = parse("TRUNCATE books").unwrap();
        assert_eq!(q.query_type, QueryType::Truncate);
    }

    #[test]
    fn parses_aggregations() {
        let q = parse("SELECT COUNT(*), SUM(price), FACET(genre) FROM books").unwrap();
        assert_eq!(q.aggregations.len(), 3);
        assert_eq!(q.aggregations[0].agg_type, AggType::Count);
        assert!(q.aggregations[0].fields.is_empty());
        assert_eq!(q.aggregations[1].fields, vec!["price".to_string()]);
    }

    #[test]
    fn reports_parse_errors_with_code() {
        let err = parse("SELEKT oops").unwrap_err();
        assert_eq!(Error::code_of(&err), ErrorCode::ParseSql);
        assert!(parse("SELECT * FROM ns WHERE a = ").is_err());
        assert!(parse("SELECT * FROM ns WHERE a = 'unterminated").is_err());
    }

    #[test]
    fn parses_dwithin_and_allset() {
        let q = parse("SELECT * FROM ns WHERE DWITHIN(spot, 1.0, 2.0, 0.5) AND ALLSET(tags, 'a', 'b')").unwrap();
        match &q.entries[0].node {
            FilterNode::Cond(c) => {
                assert_eq!(c.cond, CondType::DWithin);
                assert_eq!(c.values.len(), 3);
            }
            _ => panic!(),
        }
        match &q.entries[1].node {
            FilterNode::Cond(c) => assert_eq!(c.cond, CondType::AllSet),
            _ => panic!(),
        }
    }
}
