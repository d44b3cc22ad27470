//! # Scalar Value Types
//!
//! This module defines the universal scalar value used throughout the
//! engine: [`Variant`] is the key type of every index, the field value of
//! every payload, and the literal type of every query condition.
//!
//! - [`Variant`]: tagged union over the supported scalar kinds plus `Null`
//! - [`VariantArray`]: small inline vector of variants (array fields, keys)
//! - [`KeyString`]: refcounted immutable string shared between payloads,
//!   index maps and query results
//! - [`Point`]: 2D point for geometric indexes

mod key_string;
mod point;
mod value;

pub use key_string::KeyString;
pub use point::Point;
pub use value::{KeyValueKind, Variant};

use smallvec::SmallVec;

/// Small inline vector of variants. Two inline slots cover the dominant
/// case of scalar fields and two-field composite keys without allocating.
pub type VariantArray = SmallVec<[Variant; 2]>;
