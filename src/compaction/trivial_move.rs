// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::CompactionInputFiles;
use crate::file::FileMetadata;
use std::{cmp::Ordering, collections::BinaryHeap, sync::Arc};

/// Heap entry: a file and its position in its input group
struct Entry<'a> {
    group: usize,
    index: usize,
    file: &'a Arc<FileMetadata>,
}

impl PartialEq for Entry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry<'_> {}

impl PartialOrd for Entry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry<'_> {
    // NOTE: Reversed, so the max-heap pops the smallest key first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .file
            .smallest
            .user_key
            .cmp(&self.file.smallest.user_key)
            .then_with(|| other.group.cmp(&self.group))
            .then_with(|| other.index.cmp(&self.index))
    }
}

/// Returns `true` if no two input files share a user key.
///
/// Such inputs can be moved into the output level without merging.
/// Level 0 groups contribute every file up front, other groups are
/// walked file by file as they are already sorted and disjoint.
#[must_use]
pub fn is_input_files_non_overlapping(inputs: &[CompactionInputFiles]) -> bool {
    let mut heap = BinaryHeap::new();

    for (group_idx, group) in inputs.iter().enumerate() {
        if group.level == 0 {
            heap.extend(group.files.iter().enumerate().map(|(index, file)| Entry {
                group: group_idx,
                index,
                file,
            }));
        } else if let Some(file) = group.files.first() {
            heap.push(Entry {
                group: group_idx,
                index: 0,
                file,
            });
        }
    }

    let mut prev: Option<&Arc<FileMetadata>> = None;

    while let Some(curr) = heap.pop() {
        if let Some(prev) = prev {
            if prev.largest.user_key >= curr.file.smallest.user_key {
                return false;
            }
        }

        prev = Some(curr.file);

        let Some(group) = inputs.get(curr.group) else {
            continue;
        };

        if group.level > 0 {
            if let Some(file) = group.files.get(curr.index + 1) {
                heap.push(Entry {
                    group: curr.group,
                    index: curr.index + 1,
                    file,
                });
            }
        }
    }

    true
}
