// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::UserKey;

/// A key range in the format of [min, max] (inclusive on both sides)
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct KeyRange(UserKey, UserKey);

impl KeyRange {
    /// Creates a new key range.
    ///
    /// # Panics
    ///
    /// Panics (in debug builds) if `min > max`.
    #[must_use]
    pub fn new((min, max): (UserKey, UserKey)) -> Self {
        debug_assert!(min <= max, "key range is inverted");
        Self(min, max)
    }

    /// Returns the lower bound.
    #[must_use]
    pub fn min(&self) -> &UserKey {
        &self.0
    }

    /// Returns the upper bound.
    #[must_use]
    pub fn max(&self) -> &UserKey {
        &self.1
    }

    /// Returns `true` if the key falls within this key range.
    #[must_use]
    pub fn contains_key(&self, key: &[u8]) -> bool {
        key >= &*self.0 && key <= &*self.1
    }

    /// Returns `true` if the other range is fully contained in this range.
    #[must_use]
    pub fn contains_range(&self, other: &Self) -> bool {
        self.0 <= other.0 && self.1 >= other.1
    }

    /// Returns `true` if the ranges share at least one key.
    #[must_use]
    pub fn overlaps_with_key_range(&self, other: &Self) -> bool {
        self.0 <= other.1 && self.1 >= other.0
    }

    /// Returns the smallest range covering both ranges.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let min = if self.0 <= other.0 { &self.0 } else { &other.0 };
        let max = if self.1 >= other.1 { &self.1 } else { &other.1 };
        Self(min.clone(), max.clone())
    }

    /// Aggregates a key range.
    ///
    /// Returns `None` for an empty iterator.
    pub fn aggregate<'a>(mut iter: impl Iterator<Item = &'a Self>) -> Option<Self> {
        let first = iter.next()?.clone();
        Some(iter.fold(first, |acc, range| acc.union(range)))
    }
}

impl std::fmt::Display for KeyRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}<=>{}]",
            String::from_utf8_lossy(&self.0),
            String::from_utf8_lossy(&self.1)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn string_key_range(a: &str, b: &str) -> KeyRange {
        KeyRange::new((a.as_bytes().into(), b.as_bytes().into()))
    }

    #[test]
    fn key_range_aggregate() {
        let ranges = [
            string_key_range("a", "f"),
            string_key_range("d", "k"),
            string_key_range("c", "d"),
        ];
        let aggregated = KeyRange::aggregate(ranges.iter()).expect("should exist");
        assert_eq!(string_key_range("a", "k"), aggregated);

        assert!(KeyRange::aggregate(std::iter::empty()).is_none());
    }

    #[test]
    fn key_range_overlap_inclusive() {
        let a = string_key_range("a", "c");
        let b = string_key_range("c", "f");
        let c = string_key_range("d", "f");

        assert!(a.overlaps_with_key_range(&b));
        assert!(b.overlaps_with_key_range(&a));
        assert!(!a.overlaps_with_key_range(&c));
        assert!(!c.overlaps_with_key_range(&a));
    }

    #[test]
    fn key_range_contains() {
        let outer = string_key_range("a", "z");
        let inner = string_key_range("c", "f");

        assert!(outer.contains_range(&inner));
        assert!(!inner.contains_range(&outer));
        assert!(outer.contains_key(b"z"));
        assert!(!inner.contains_key(b"g"));
    }
}
