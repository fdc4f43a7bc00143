// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{key_range::KeyRange, value::InternalKey};

/// Table file ID
pub type FileId = u64;

/// Weight given to a deletion when estimating the space it frees
const DELETION_WEIGHT: u64 = 2;

/// Metadata of a table file
///
/// The picker only reads file metadata. Whether a file is currently part of
/// a compaction is tracked by the storage state, not by the file itself.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileMetadata {
    /// File ID
    pub id: FileId,

    /// File size in bytes
    pub file_size: u64,

    /// Smallest internal key in the file
    pub smallest: InternalKey,

    /// Largest internal key in the file
    pub largest: InternalKey,

    /// Number of items (including tombstones)
    pub item_count: u64,

    /// Number of tombstones
    pub tombstone_count: u64,

    /// Creation time as unix timestamp (in seconds)
    ///
    /// 0 means unknown.
    pub created_at: u64,

    /// Set by auxiliary heuristics to request a delete-triggered compaction
    pub marked_for_compaction: bool,

    /// Set to request a periodic rewrite
    pub marked_for_periodic_compaction: bool,
}

impl FileMetadata {
    /// Creates file metadata without any statistics.
    ///
    /// # Panics
    ///
    /// Panics if `smallest > largest`.
    #[must_use]
    pub fn new(id: FileId, file_size: u64, smallest: InternalKey, largest: InternalKey) -> Self {
        assert!(
            smallest.user_key <= largest.user_key,
            "file key range is inverted"
        );

        Self {
            id,
            file_size,
            smallest,
            largest,
            item_count: 0,
            tombstone_count: 0,
            created_at: 0,
            marked_for_compaction: false,
            marked_for_periodic_compaction: false,
        }
    }

    /// Sets the item and tombstone counts.
    #[must_use]
    pub fn with_counts(mut self, item_count: u64, tombstone_count: u64) -> Self {
        self.item_count = item_count;
        self.tombstone_count = tombstone_count;
        self
    }

    /// Sets the creation time (unix timestamp in seconds).
    #[must_use]
    pub fn with_created_at(mut self, secs: u64) -> Self {
        self.created_at = secs;
        self
    }

    /// Flags the file for delete-triggered compaction.
    #[must_use]
    pub fn mark_for_compaction(mut self) -> Self {
        self.marked_for_compaction = true;
        self
    }

    /// Flags the file for periodic compaction.
    #[must_use]
    pub fn mark_for_periodic_compaction(mut self) -> Self {
        self.marked_for_periodic_compaction = true;
        self
    }

    /// Returns the user key range of the file.
    #[must_use]
    pub fn key_range(&self) -> KeyRange {
        KeyRange::new((self.smallest.user_key.clone(), self.largest.user_key.clone()))
    }

    /// Returns the ratio of tombstones to items, 0.0 if there are no items.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn tombstone_ratio(&self) -> f64 {
        if self.item_count == 0 {
            return 0.0;
        }
        self.tombstone_count as f64 / self.item_count as f64
    }

    /// Returns the file size adjusted upwards for the space its
    /// tombstones are expected to free once compacted.
    ///
    /// Deletions only add weight when they make up at least half of
    /// the file's items. The result is never 0.
    #[must_use]
    pub fn compensated_file_size(&self) -> u64 {
        let mut size = self.file_size;

        if self.item_count > 0 && self.tombstone_count.saturating_mul(2) >= self.item_count {
            let average_value_size = self.file_size / self.item_count;
            let excess_deletions = self.tombstone_count.saturating_mul(2) - self.item_count;

            size = size.saturating_add(
                excess_deletions
                    .saturating_mul(average_value_size)
                    .saturating_mul(DELETION_WEIGHT),
            );
        }

        size.max(1)
    }
}

impl std::fmt::Display for FileMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}({}B, {})", self.id, self.file_size, self.key_range())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ValueType;
    use test_log::test;

    fn file(size: u64) -> FileMetadata {
        FileMetadata::new(
            1,
            size,
            InternalKey::new("a", 1, ValueType::Value),
            InternalKey::new("b", 1, ValueType::Value),
        )
    }

    #[test]
    fn compensated_size_no_stats() {
        assert_eq!(100, file(100).compensated_file_size());
    }

    #[test]
    fn compensated_size_never_zero() {
        assert_eq!(1, file(0).compensated_file_size());
    }

    #[test]
    fn compensated_size_few_tombstones() {
        let f = file(1_000).with_counts(100, 49);
        assert_eq!(1_000, f.compensated_file_size());
    }

    #[test]
    fn compensated_size_many_tombstones() {
        // avg value size = 10, excess deletions = 160 - 100 = 60
        let f = file(1_000).with_counts(100, 80);
        assert_eq!(1_000 + 60 * 10 * 2, f.compensated_file_size());
    }

    #[test]
    fn tombstone_ratio() {
        assert!((file(10).tombstone_ratio() - 0.0).abs() < f64::EPSILON);
        assert!((file(10).with_counts(4, 1).tombstone_ratio() - 0.25).abs() < f64::EPSILON);
    }
}
