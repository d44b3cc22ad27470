//! # Variant
//!
//! Tagged scalar union used as the universal key and field value. A
//! `Variant` is what an index stores, what a condition carries, and what a
//! payload field reads back as.
//!
//! ## Comparison Semantics
//!
//! Two orderings exist on purpose:
//!
//! - [`Variant::total_cmp`]: total order over all kinds, used by ordered
//!   index maps and sort execution. Numeric kinds compare by value across
//!   `Int`/`Int64`/`Double`; `NaN` sorts greatest; kinds otherwise order by
//!   a fixed rank (`Null < Bool < numeric < String < Point < Composite`).
//! - [`Variant::relaxed_cmp`]: comparator semantics for query conditions.
//!   Returns `None` when the kinds are not comparable (e.g. string vs
//!   point), which a comparator treats as a non-match.
//!
//! Equality and hashing are strict per-kind so that hashed index maps stay
//! consistent; callers convert keys to the index key kind first via
//! [`Variant::convert`].

use super::{KeyString, Point};
use crate::error::Error;
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Scalar kind of a payload field or index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyValueKind {
    Null,
    Bool,
    Int,
    Int64,
    Double,
    String,
    Point,
    Composite,
}

impl KeyValueKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, KeyValueKind::Int | KeyValueKind::Int64 | KeyValueKind::Double)
    }
}

#[derive(Debug, Clone)]
pub enum Variant {
    Null,
    Bool(bool),
    Int(i32),
    Int64(i64),
    Double(f64),
    String(KeyString),
    Point(Point),
    /// Tuple key of a composite index.
    Composite(Box<[Variant]>),
}

impl Variant {
    pub fn kind(&self) -> KeyValueKind {
        match self {
            Variant::Null => KeyValueKind::Null,
            Variant::Bool(_) => KeyValueKind::Bool,
            Variant::Int(_) => KeyValueKind::Int,
            Variant::Int64(_) => KeyValueKind::Int64,
            Variant::Double(_) => KeyValueKind::Double,
            Variant::String(_) => KeyValueKind::String,
            Variant::Point(_) => KeyValueKind::Point,
            Variant::Composite(_) => KeyValueKind::Composite,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Variant::Null)
    }

    pub fn as_int64(&self) -> Option<i64> {
        match self {
            Variant::Int(v) => Some(i64::from(*v)),
            Variant::Int64(v) => Some(*v),
            Variant::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Variant::Int(v) => Some(f64::from(*v)),
            Variant::Int64(v) => Some(*v as f64),
            Variant::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_point(&self) -> Option<Point> {
        match self {
            Variant::Point(p) => Some(*p),
            _ => None,
        }
    }

    /// Converts the value to `target`, failing with `errParams` when the
    /// conversion would lose information. `Null` passes through untouched
    /// so sparse fields keep their absence marker.
    pub fn convert(&self, target: KeyValueKind) -> Result<Variant> {
        if self.kind() == target || self.is_null() {
            return Ok(self.clone());
        }
        let out = match (self, target) {
            (Variant::Int(v), KeyValueKind::Int64) => Some(Variant::Int64(i64::from(*v))),
            (Variant::Int(v), KeyValueKind::Double) => Some(Variant::Double(f64::from(*v))),
            (Variant::Int(v), KeyValueKind::Bool) => Some(Variant::Bool(*v != 0)),
            (Variant::Int(v), KeyValueKind::String) => {
                Some(Variant::String(KeyString::from(v.to_string())))
            }
            (Variant::Int64(v), KeyValueKind::Int) => {
                i32::try_from(*v).ok().map(Variant::Int)
            }
            (Variant::Int64(v), KeyValueKind::Double) => Some(Variant::Double(*v as f64)),
            (Variant::Int64(v), KeyValueKind::Bool) => Some(Variant::Bool(*v != 0)),
            (Variant::Int64(v), KeyValueKind::String) => {
                Some(Variant::String(KeyString::from(v.to_string())))
            }
            (Variant::Double(v), KeyValueKind::Int) => {
                if v.fract() == 0.0 && *v >= f64::from(i32::MIN) && *v <= f64::from(i32::MAX) {
                    Some(Variant::Int(*v as i32))
                } else {
                    None
                }
            }
            (Variant::Double(v), KeyValueKind::Int64) => {
                if v.fract() == 0.0 && v.abs() < 9.007_199_254_740_992e15 {
                    Some(Variant::Int64(*v as i64))
                } else {
                    None
                }
            }
            (Variant::Double(v), KeyValueKind::String) => {
                Some(Variant::String(KeyString::from(v.to_string())))
            }
            (Variant::Bool(v), KeyValueKind::Int) => Some(Variant::Int(i32::from(*v))),
            (Variant::Bool(v), KeyValueKind::Int64) => Some(Variant::Int64(i64::from(*v))),
            (Variant::String(s), KeyValueKind::Int) => s.trim().parse().ok().map(Variant::Int),
            (Variant::String(s), KeyValueKind::Int64) => s.trim().parse().ok().map(Variant::Int64),
            (Variant::String(s), KeyValueKind::Double) => {
                s.trim().parse().ok().map(Variant::Double)
            }
            (Variant::String(s), KeyValueKind::Bool) => match s.trim() {
                "true" | "1" => Some(Variant::Bool(true)),
                "false" | "0" => Some(Variant::Bool(false)),
                _ => None,
            },
            _ => None,
        };
        out.ok_or_else(|| {
            Error::params(format!(
                "can't convert {:?} value '{}' to {:?}",
                self.kind(),
                self,
                target
            ))
            .into()
        })
    }

    /// Total order over all kinds; see the module docs.
    pub fn total_cmp(&self, other: &Variant) -> Ordering {
        use Variant::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(_) | Int64(_) | Double(_), Int(_) | Int64(_) | Double(_)) => {
                cmp_numeric(self, other)
            }
            (String(a), String(b)) => a.cmp(b),
            (Point(a), Point(b)) => (a.x, a.y)
                .partial_cmp(&(b.x, b.y))
                .unwrap_or(Ordering::Equal),
            (Composite(a), Composite(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }

    /// Comparator semantics: `None` when the kinds are not comparable.
    pub fn relaxed_cmp(&self, other: &Variant) -> Option<Ordering> {
        use Variant::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Null, _) | (_, Null) => None,
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Int(_) | Int64(_) | Double(_), Int(_) | Int64(_) | Double(_)) => {
                Some(cmp_numeric(self, other))
            }
            (String(a), String(b)) => Some(a.cmp(b)),
            (Composite(_), Composite(_)) => Some(self.total_cmp(other)),
            _ => None,
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Variant::Null => 0,
            Variant::Bool(_) => 1,
            Variant::Int(_) | Variant::Int64(_) | Variant::Double(_) => 2,
            Variant::String(_) => 3,
            Variant::Point(_) => 4,
            Variant::Composite(_) => 5,
        }
    }
}

fn cmp_numeric(a: &Variant, b: &Variant) -> Ordering {
    // Two int64s stay exact; doubles fall back to IEEE total order.
    if let (Some(x), Some(y)) = (int_exact(a), int_exact(b)) {
        return x.cmp(&y);
    }
    let x = a.as_double().unwrap_or(f64::NAN);
    let y = b.as_double().unwrap_or(f64::NAN);
    x.total_cmp(&y)
}

fn int_exact(v: &Variant) -> Option<i64> {
    match v {
        Variant::Int(x) => Some(i64::from(*x)),
        Variant::Int64(x) => Some(*x),
        _ => None,
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        use Variant::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Int64(a), Int64(b)) => a == b,
            (Double(a), Double(b)) => normalize_bits(*a) == normalize_bits(*b),
            (String(a), String(b)) => a == b,
            (Point(a), Point(b)) => a == b,
            (Composite(a), Composite(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Variant {}

impl Hash for Variant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Variant::Null => {}
            Variant::Bool(v) => v.hash(state),
            Variant::Int(v) => v.hash(state),
            Variant::Int64(v) => v.hash(state),
            Variant::Double(v) => normalize_bits(*v).hash(state),
            Variant::String(v) => v.hash(state),
            Variant::Point(v) => {
                normalize_bits(v.x).hash(state);
                normalize_bits(v.y).hash(state);
            }
            Variant::Composite(v) => v.hash(state),
        }
    }
}

fn normalize_bits(v: f64) -> u64 {
    if v.is_nan() {
        f64::NAN.to_bits()
    } else if v == 0.0 {
        0.0f64.to_bits()
    } else {
        v.to_bits()
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Null => f.write_str("null"),
            Variant::Bool(v) => write!(f, "{v}"),
            Variant::Int(v) => write!(f, "{v}"),
            Variant::Int64(v) => write!(f, "{v}"),
            Variant::Double(v) => write!(f, "{v}"),
            Variant::String(v) => write!(f, "{v}"),
            Variant::Point(p) => write!(f, "({}, {})", p.x, p.y),
            Variant::Composite(parts) => {
                f.write_str("{")?;
                for (i, p) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{p}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Bool(v)
    }
}

impl From<i32> for Variant {
    fn from(v: i32) -> Self {
        Variant::Int(v)
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Variant::Int64(v)
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::Double(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(KeyString::new(v))
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Variant::String(KeyString::from(v))
    }
}

impl From<Point> for Variant {
    fn from(v: Point) -> Self {
        Variant::Point(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn numeric_total_order_crosses_kinds() {
        assert_eq!(
            Variant::Int(2).total_cmp(&Variant::Int64(2)),
            Ordering::Equal
        );
        assert_eq!(
            Variant::Double(1.5).total_cmp(&Variant::Int(2)),
            Ordering::Less
        );
        assert_eq!(
            Variant::Double(f64::NAN).total_cmp(&Variant::Double(1e300)),
            Ordering::Greater
        );
    }

    #[test]
    fn lossy_conversion_fails_with_params() {
        let err = Variant::Double(1.5).convert(KeyValueKind::Int).unwrap_err();
        assert_eq!(Error::code_of(&err), ErrorCode::Params);

        let err = Variant::Int64(i64::MAX).convert(KeyValueKind::Int).unwrap_err();
        assert_eq!(Error::code_of(&err), ErrorCode::Params);
    }

    #[test]
    fn string_round_trips_through_numeric() {
        let v = Variant::from("42").convert(KeyValueKind::Int).unwrap();
        assert_eq!(v, Variant::Int(42));
        let back = v.convert(KeyValueKind::String).unwrap();
        assert_eq!(back.as_str(), Some("42"));
    }

    #[test]
    fn relaxed_cmp_rejects_foreign_kinds() {
        assert!(Variant::from("a")
            .relaxed_cmp(&Variant::Point(Point::new(0.0, 0.0)))
            .is_none());
        assert_eq!(
            Variant::Int(3).relaxed_cmp(&Variant::Double(3.0)),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn null_never_matches_values() {
        assert!(Variant::Null.relaxed_cmp(&Variant::Int(0)).is_none());
    }
}
