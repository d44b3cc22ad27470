//! Scan-fallback condition evaluation.
//!
//! When the planner can't (or shouldn't) serve a condition from an index,
//! the condition becomes a [`Comparator`]: a predicate applied to every
//! candidate row after the driving id stream emits it. Values come either
//! from a typed payload column or, for non-indexed fields, from the CJSON
//! tuple by path.

use crate::cjson;
use crate::payload::PayloadValue;
use crate::query::CondType;
use crate::tags::TagsMatcher;
use crate::types::{Variant, VariantArray};
use std::cmp::Ordering;

#[derive(Debug, Clone)]
pub enum ComparatorField {
    /// Typed payload column of an indexed field.
    Column(usize),
    /// JSON path into the document tuple.
    JsonPath(String),
}

#[derive(Debug, Clone)]
pub struct Comparator {
    pub field: ComparatorField,
    pub cond: CondType,
    pub values: VariantArray,
}

impl Comparator {
    pub fn new(field: ComparatorField, cond: CondType, values: VariantArray) -> Self {
        Self { field, cond, values }
    }

    /// Evaluates the condition against one row. Array fields match if any
    /// element satisfies the condition (`AllSet` requires every requested
    /// value to be present).
    pub fn matches(&self, payload: &PayloadValue, tm: &TagsMatcher) -> bool {
        let values = self.row_values(payload, tm);
        match self.cond {
            CondType::Empty => values.iter().all(Variant::is_null) || values.is_empty(),
            CondType::Any => values.iter().any(|v| !v.is_null()),
            CondType::AllSet => self
                .values
                .iter()
                .all(|want| values.iter().any(|have| have == want)),
            _ => values.iter().any(|v| self.matches_value(v)),
        }
    }

    fn matches_value(&self, value: &Variant) -> bool {
        match self.cond {
            CondType::Eq => self.cmp_first(value) == Some(Ordering::Equal),
            CondType::Lt => self.cmp_first(value) == Some(Ordering::Less),
            CondType::Le => matches!(
                self.cmp_first(value),
                Some(Ordering::Less) | Some(Ordering::Equal)
            ),
            CondType::Gt => self.cmp_first(value) == Some(Ordering::Greater),
            CondType::Ge => matches!(
                self.cmp_first(value),
                Some(Ordering::Greater) | Some(Ordering::Equal)
            ),
            CondType::Range => {
                if self.values.len() != 2 {
                    return false;
                }
                let low = value.relaxed_cmp(&self.values[0]);
                let high = value.relaxed_cmp(&self.values[1]);
                matches!(low, Some(Ordering::Greater) | Some(Ordering::Equal))
                    && matches!(high, Some(Ordering::Less) | Some(Ordering::Equal))
            }
            CondType::Set => self
                .values
                .iter()
                .any(|want| value.relaxed_cmp(want) == Some(Ordering::Equal)),
            CondType::Like => match (value.as_str(), self.values.first().and_then(Variant::as_str)) {
                (Some(text), Some(pattern)) => like_match(text, pattern),
                _ => false,
            },
            CondType::DWithin => {
                let Some(point) = value.as_point() else { return false };
                if self.values.len() != 3 {
                    return false;
                }
                match (
                    self.values[0].as_double(),
                    self.values[1].as_double(),
                    self.values[2].as_double(),
                ) {
                    (Some(x), Some(y), Some(dist)) => {
                        point.dwithin(&crate::types::Point::new(x, y), dist)
                    }
                    _ => false,
                }
            }
            CondType::Any | CondType::Empty | CondType::AllSet => unreachable!("handled in matches"),
        }
    }

    fn cmp_first(&self, value: &Variant) -> Option<Ordering> {
        value.relaxed_cmp(self.values.first()?)
    }

    fn row_values(&self, payload: &PayloadValue, tm: &TagsMatcher) -> VariantArray {
        match &self.field {
            ComparatorField::Column(idx) => payload.field(*idx).clone(),
            ComparatorField::JsonPath(path) => {
                let mut out = VariantArray::new();
                let Ok(doc) = cjson::decode(payload.tuple(), tm) else {
                    return out;
                };
                let mut cur = &doc;
                for seg in path.split('.') {
                    match cur.as_object().and_then(|m| m.get(seg)) {
                        Some(next) => cur = next,
                        None => return out,
                    }
                }
                collect_json_values(cur, &mut out);
                out
            }
        }
    }
}

fn collect_json_values(value: &serde_json::Value, out: &mut VariantArray) {
    match value {
        serde_json::Value::Null => out.push(Variant::Null),
        serde_json::Value::Bool(b) => out.push(Variant::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push(Variant::Int64(i));
            } else if let Some(f) = n.as_f64() {
                out.push(Variant::Double(f));
            }
        }
        serde_json::Value::String(s) => out.push(Variant::from(s.as_str())),
        serde_json::Value::Array(items) => {
            for item in items {
                collect_json_values(item, out);
            }
        }
        serde_json::Value::Object(_) => {}
    }
}

/// SQL LIKE: `%` matches any run, `_` matches one character.
pub fn like_match(text: &str, pattern: &str) -> bool {
    fn inner(text: &[char], pattern: &[char]) -> bool {
        match pattern.split_first() {
            None => text.is_empty(),
            Some((&'%', rest)) => (0..=text.len()).any(|skip| inner(&text[skip..], rest)),
            Some((&'_', rest)) => match text.split_first() {
                Some((_, tail)) => inner(tail, rest),
                None => false,
            },
            Some((&c, rest)) => match text.split_first() {
                Some((&t, tail)) if t == c => inner(tail, rest),
                _ => false,
            },
        }
    }
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    inner(&text, &pattern)
}
