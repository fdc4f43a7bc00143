// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Key range and overlap operations over a storage state
//!
//! All ranges are inclusive user key ranges.

use super::StorageStateView;
use crate::{compaction::CompactionInputFiles, file::FileMetadata, Config, KeyRange};
use std::sync::Arc;

/// Returns the user key range covered by the given files.
#[must_use]
pub fn get_range(files: &[Arc<FileMetadata>]) -> Option<KeyRange> {
    let ranges = files.iter().map(|f| f.key_range()).collect::<Vec<_>>();
    KeyRange::aggregate(ranges.iter())
}

/// Returns the user key range covered by all files of the given groups.
#[must_use]
pub fn get_range_of_groups(groups: &[&CompactionInputFiles]) -> Option<KeyRange> {
    let ranges = groups
        .iter()
        .flat_map(|group| group.files.iter())
        .map(|f| f.key_range())
        .collect::<Vec<_>>();

    KeyRange::aggregate(ranges.iter())
}

/// Returns the summed size of the given files.
#[must_use]
pub fn total_file_size(files: &[Arc<FileMetadata>]) -> u64 {
    files.iter().map(|f| f.file_size).sum()
}

/// Returns `true` if any of the given files is being compacted.
pub fn are_files_in_compaction<V: StorageStateView + ?Sized>(
    view: &V,
    files: &[Arc<FileMetadata>],
) -> bool {
    files.iter().any(|f| view.is_being_compacted(f.id))
}

/// Returns the files of a level that overlap the given range.
///
/// In level 0 the range grows with every overlapping file until it is
/// stable, so the result covers all level 0 files transitively overlapping
/// the range. Level 0 order is kept.
pub fn get_overlapping_inputs<V: StorageStateView + ?Sized>(
    view: &V,
    level: usize,
    range: &KeyRange,
) -> Vec<Arc<FileMetadata>> {
    let files = view.level_files(level);

    if level > 0 {
        let start = files.partition_point(|f| &f.largest.user_key < range.min());

        return files
            .iter()
            .skip(start)
            .take_while(|f| &f.smallest.user_key <= range.max())
            .cloned()
            .collect();
    }

    let mut range = range.clone();

    'restart: loop {
        let mut overlapping = Vec::new();

        for file in files {
            let file_range = file.key_range();

            if !file_range.overlaps_with_key_range(&range) {
                continue;
            }

            if !range.contains_range(&file_range) {
                // NOTE: Previously skipped files may overlap the grown range
                range = range.union(&file_range);
                continue 'restart;
            }

            overlapping.push(file.clone());
        }

        return overlapping;
    }
}

/// Returns the files of a level that lie fully within the given range,
/// and the index of the first of them in the level.
///
/// In levels > 0 the selection is shrunk until its boundary files do not
/// share a user key with an unselected neighbour.
pub fn get_overlapping_inputs_within<V: StorageStateView + ?Sized>(
    view: &V,
    level: usize,
    range: &KeyRange,
) -> (Vec<Arc<FileMetadata>>, Option<usize>) {
    let files = view.level_files(level);

    if level == 0 {
        let first = files
            .iter()
            .position(|f| range.contains_range(&f.key_range()));

        let within = files
            .iter()
            .filter(|f| range.contains_range(&f.key_range()))
            .cloned()
            .collect();

        return (within, first);
    }

    let mut start = files.partition_point(|f| &f.smallest.user_key < range.min());
    let mut end = start
        + files
            .iter()
            .skip(start)
            .take_while(|f| range.contains_range(&f.key_range()))
            .count();

    let shares_user_key = |left: Option<&Arc<FileMetadata>>, right: Option<&Arc<FileMetadata>>| {
        matches!((left, right), (Some(l), Some(r)) if l.largest.user_key == r.smallest.user_key)
    };

    while start < end && start > 0 && shares_user_key(files.get(start - 1), files.get(start)) {
        start += 1;
    }

    while end > start && shares_user_key(files.get(end - 1), files.get(end)) {
        end -= 1;
    }

    match files.get(start..end) {
        Some(within) if !within.is_empty() => (within.to_vec(), Some(start)),
        _ => (Vec::new(), None),
    }
}

/// Expands the inputs so no unselected file of the same level
/// overlaps their range.
///
/// Returns `false` if the expanded inputs contain a file that is
/// being compacted. Level 0 inputs are left as they are.
pub fn expand_inputs_to_clean_cut<V: StorageStateView + ?Sized>(
    view: &V,
    inputs: &mut CompactionInputFiles,
) -> bool {
    debug_assert!(!inputs.is_empty(), "cannot expand empty inputs");

    if inputs.level == 0 {
        return true;
    }

    loop {
        let old_len = inputs.len();

        let Some(range) = inputs.key_range() else {
            return false;
        };

        inputs.files = get_overlapping_inputs(view, inputs.level, &range);

        if inputs.len() <= old_len || inputs.is_empty() {
            break;
        }
    }

    !are_files_in_compaction(view, &inputs.files)
}

/// Selects the files of the output level that overlap the inputs.
///
/// Afterwards tries to grow the inputs within the combined range, as long as
/// that pulls in no additional output level files and stays within
/// `max_compaction_bytes`.
///
/// Returns `false` if an overlapping output level file is being compacted.
pub fn setup_other_inputs<V: StorageStateView + ?Sized>(
    view: &V,
    config: &Config,
    inputs: &mut CompactionInputFiles,
    output_inputs: &mut CompactionInputFiles,
) -> bool {
    if inputs.level == output_inputs.level {
        return true;
    }

    let Some(range) = inputs.key_range() else {
        return false;
    };

    output_inputs.files = get_overlapping_inputs(view, output_inputs.level, &range);

    if are_files_in_compaction(view, &output_inputs.files) {
        return false;
    }

    if output_inputs.is_empty() {
        return true;
    }

    if !expand_inputs_to_clean_cut(view, output_inputs) {
        return false;
    }

    let limit = config.get_max_compaction_bytes();
    let output_size = output_inputs.size();

    let Some(all_range) = get_range_of_groups(&[&*inputs, &*output_inputs]) else {
        return true;
    };

    let mut expanded = CompactionInputFiles {
        level: inputs.level,
        files: get_overlapping_inputs(view, inputs.level, &all_range),
    };

    let mut expand = false;

    if !expanded.is_empty()
        && expand_inputs_to_clean_cut(view, &mut expanded)
        && expanded.len() > inputs.len()
        && output_size.saturating_add(expanded.size()) < limit
        && !are_files_in_compaction(view, &expanded.files)
    {
        if let Some(new_range) = expanded.key_range() {
            let mut expanded_output = CompactionInputFiles {
                level: output_inputs.level,
                files: get_overlapping_inputs(view, output_inputs.level, &new_range),
            };

            expand = !expanded_output.is_empty()
                && !are_files_in_compaction(view, &expanded_output.files)
                && expand_inputs_to_clean_cut(view, &mut expanded_output)
                && expanded_output.len() == output_inputs.len();
        }
    }

    if !expand {
        let (within, _) = get_overlapping_inputs_within(view, inputs.level, &all_range);

        expanded = CompactionInputFiles {
            level: inputs.level,
            files: within,
        };

        expand = expanded.len() > inputs.len()
            && output_size.saturating_add(expanded.size()) < limit
            && !are_files_in_compaction(view, &expanded.files);
    }

    if expand {
        log::trace!(
            "Expanding L{} inputs from {} to {} files",
            inputs.level,
            inputs.len(),
            expanded.len(),
        );
        inputs.files = expanded.files;
    }

    true
}

/// Returns the files of the first level below the output level that
/// overlap the compaction.
pub fn get_grandparents<V: StorageStateView + ?Sized>(
    view: &V,
    inputs: &CompactionInputFiles,
    output_inputs: &CompactionInputFiles,
) -> Vec<Arc<FileMetadata>> {
    let Some(range) = get_range_of_groups(&[inputs, output_inputs]) else {
        return Vec::new();
    };

    ((output_inputs.level + 1)..view.level_count())
        .map(|level| get_overlapping_inputs(view, level, &range))
        .find(|files| !files.is_empty())
        .unwrap_or_default()
}

/// Returns `true` if any file of the level overlapping the range is being compacted.
pub fn is_range_in_compaction<V: StorageStateView + ?Sized>(
    view: &V,
    range: &KeyRange,
    level: usize,
) -> bool {
    are_files_in_compaction(view, &get_overlapping_inputs(view, level, range))
}

/// Returns `true` if a running compaction writing into the given level
/// overlaps the range of the given groups.
pub fn files_range_overlap_with_compaction<V: StorageStateView + ?Sized>(
    view: &V,
    groups: &[CompactionInputFiles],
    level: usize,
) -> bool {
    let Some(range) = get_range_of_groups(&groups.iter().collect::<Vec<_>>()) else {
        return false;
    };

    view.in_flight_compactions()
        .iter()
        .any(|c| c.output_level == level && c.key_range.overlaps_with_key_range(&range))
}

/// Replaces the level 0 inputs by all level 0 files overlapping them.
///
/// Returns `false` if the resulting range overlaps a file that is
/// being compacted in the output level.
pub fn get_overlapping_l0_files<V: StorageStateView + ?Sized>(
    view: &V,
    start_inputs: &mut CompactionInputFiles,
    output_level: usize,
) -> bool {
    debug_assert_eq!(0, start_inputs.level);

    let Some(range) = start_inputs.key_range() else {
        return false;
    };

    start_inputs.files = get_overlapping_inputs(view, 0, &range);

    if are_files_in_compaction(view, &start_inputs.files) {
        return false;
    }

    let Some(range) = start_inputs.key_range() else {
        return false;
    };

    !is_range_in_compaction(view, &range, output_level)
}

/// Picks one file marked for compaction, expanded to a clean cut.
///
/// Marked files are tried in order. Level 0 files are skipped while
/// a compaction starting in level 0 is running, files deeper than
/// `max_level` are skipped as well.
pub fn pick_files_marked_for_compaction<V: StorageStateView + ?Sized>(
    view: &V,
    max_level: usize,
) -> Option<CompactionInputFiles> {
    let l0_busy = view.level0_compactions_in_progress();

    view.files_marked_for_compaction()
        .iter()
        .filter(|(level, _)| *level <= max_level)
        .filter(|(_, file)| !view.is_being_compacted(file.id))
        .filter(|(level, _)| *level > 0 || !l0_busy)
        .find_map(|(level, file)| {
            let mut inputs = CompactionInputFiles {
                level: *level,
                files: vec![file.clone()],
            };

            expand_inputs_to_clean_cut(view, &mut inputs).then_some(inputs)
        })
}
