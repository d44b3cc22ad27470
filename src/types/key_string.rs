//! Refcounted immutable string.
//!
//! Index maps intern their string keys; payloads, query results and the
//! expired-strings list share the same allocation through the refcount.
//! `KeyString::refs()` exposes the strong count so the interning maps can
//! defer deallocation until no reader holds the string.

use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyString(Arc<str>);

impl KeyString {
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of live handles to this string, including this one.
    pub fn refs(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Heap bytes held by the string payload.
    pub fn heap_size(&self) -> usize {
        self.0.len()
    }
}

impl Deref for KeyString {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for KeyString {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for KeyString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for KeyString {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Debug for KeyString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for KeyString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_allocation() {
        let a = KeyString::new("terminator");
        let b = a.clone();
        assert_eq!(a.refs(), 2);
        assert_eq!(b.as_str(), "terminator");
        drop(b);
        assert_eq!(a.refs(), 1);
    }

    #[test]
    fn borrows_as_str_for_map_lookup() {
        let mut map = hashbrown::HashMap::new();
        map.insert(KeyString::new("title"), 1);
        assert_eq!(map.get("title"), Some(&1));
    }
}
