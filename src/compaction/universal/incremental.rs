// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Incremental picks
//!
//! Instead of merging whole sorted runs, these picks move a key range
//! of a few files at a time into lower levels, bounded by the
//! compaction byte budget.

use super::{as_f64, PickContext};
use crate::{
    compaction::{Compaction, CompactionInputFiles, CompactionReason},
    file::{FileId, FileMetadata},
    version::{
        overlap::{
            are_files_in_compaction, expand_inputs_to_clean_cut,
            files_range_overlap_with_compaction, get_overlapping_inputs,
            get_overlapping_inputs_within, get_range, setup_other_inputs, total_file_size,
        },
        StorageStateView,
    },
    HashMap, KeyRange,
};
use std::sync::Arc;

/// The size amplification window may span `max_compaction_bytes / WINDOW_BUDGET_DIVISOR`
const WINDOW_BUDGET_DIVISOR: u64 = 2;

/// Sizes of a window of the second oldest run and of the oldest run files it overlaps
///
/// Returns `None` if an overlapping file of the oldest run is being compacted.
fn measure_window<V: StorageStateView + ?Sized>(
    view: &V,
    window: &[Arc<FileMetadata>],
    bottom_level: usize,
) -> Option<(u64, u64)> {
    let range = get_range(window)?;
    let bottom = get_overlapping_inputs(view, bottom_level, &range);

    if are_files_in_compaction(view, &bottom) {
        return None;
    }

    Some((total_file_size(window), total_file_size(&bottom)))
}

/// Reduces size amplification by merging a key range of the second
/// oldest sorted run into the oldest one.
///
/// Slides a window over the second oldest run and takes the one that
/// rewrites the least oldest run data per byte. Files of newer runs
/// that lie within the window are taken along.
///
/// Falls back to [`pick_deepest_level_file`] if no window qualifies.
pub(super) fn pick_for_reduce_size_amp<V: StorageStateView + ?Sized>(
    ctx: &PickContext<'_, V>,
    fanout_threshold: f64,
) -> Option<Compaction> {
    let view = ctx.view;
    let reason = CompactionReason::UniversalSizeAmplification;

    let [.., second_last_run, bottom_run] = ctx.sorted_runs else {
        return None;
    };

    if bottom_run.is_level0() || second_last_run.is_level0() {
        log::warn!(
            "[{}] Universal: incremental size amp needs the two oldest sorted runs in levels > 0",
            ctx.cf_name
        );
        return None;
    }

    let start_level = second_last_run.level;
    let bottom_level = bottom_run.level;
    let files = view.level_files(start_level);
    let size_threshold = ctx.config.get_max_compaction_bytes() / WINDOW_BUDGET_DIVISOR;

    let mut best: Option<(usize, usize, f64)> = None;
    let mut start = 0;
    let mut end = 0;

    while end < files.len() {
        if files.get(end).is_some_and(|f| view.is_being_compacted(f.id)) {
            end += 1;
            start = end;
            continue;
        }

        end += 1;

        let Some((non_bottom_size, bottom_size)) =
            measure_window(view, files.get(start..end)?, bottom_level)
        else {
            start = end;
            continue;
        };

        if non_bottom_size.saturating_add(bottom_size) <= size_threshold && end < files.len() {
            continue;
        }

        let fanout = as_f64(bottom_size) / as_f64(non_bottom_size);

        if best.map_or(true, |(_, _, best_fanout)| fanout < best_fanout) {
            best = Some((start, end, fanout));
        }

        while start < end {
            match measure_window(view, files.get(start..end)?, bottom_level) {
                Some((non_bottom_size, bottom_size))
                    if non_bottom_size.saturating_add(bottom_size) <= size_threshold =>
                {
                    break
                }
                _ => start += 1,
            }
        }
    }

    let Some((start, end, window_fanout)) = best else {
        log::trace!(
            "[{}] Universal: no incremental size amp window in L{start_level}",
            ctx.cf_name
        );
        return pick_deepest_level_file(ctx, reason);
    };

    log::trace!(
        "[{}] Universal: incremental size amp window L{start_level}[{start}..{end}] with fanout {window_fanout:.2}",
        ctx.cf_name
    );

    let mut start_inputs = CompactionInputFiles {
        level: start_level,
        files: files.get(start..end)?.to_vec(),
    };
    let mut bottom_inputs = CompactionInputFiles::new(bottom_level);

    if !expand_inputs_to_clean_cut(view, &mut start_inputs)
        || !setup_other_inputs(view, ctx.config, &mut start_inputs, &mut bottom_inputs)
    {
        log::trace!(
            "[{}] Universal: incremental size amp window is blocked",
            ctx.cf_name
        );
        return pick_deepest_level_file(ctx, reason);
    }

    let range = start_inputs.key_range()?;
    let upper_inputs = pick_files_up(ctx, ctx.sorted_runs.len() - 2, &range);

    let non_bottom_size = upper_inputs
        .iter()
        .map(CompactionInputFiles::size)
        .fold(start_inputs.size(), u64::saturating_add);

    let fanout = as_f64(bottom_inputs.size()) / as_f64(non_bottom_size);

    if fanout > fanout_threshold {
        log::trace!(
            "[{}] Universal: incremental size amp fanout {fanout:.2} exceeds {fanout_threshold:.2}",
            ctx.cf_name
        );
        return pick_deepest_level_file(ctx, reason);
    }

    let top_level = upper_inputs
        .iter()
        .map(|group| group.level)
        .min()
        .unwrap_or(start_level);

    let mut inputs = (top_level..=bottom_level)
        .map(CompactionInputFiles::new)
        .collect::<Vec<_>>();

    for group in upper_inputs
        .into_iter()
        .chain([start_inputs, bottom_inputs])
    {
        if let Some(slot) = inputs.get_mut(group.level - top_level) {
            *slot = group;
        }
    }

    if files_range_overlap_with_compaction(view, &inputs, bottom_level) {
        log::trace!(
            "[{}] Universal: incremental size amp overlaps running compaction",
            ctx.cf_name
        );
        return None;
    }

    let mut compaction = ctx.new_compaction(inputs, bottom_level, reason);
    compaction.max_grandparent_overlap_bytes = ctx.config.max_grandparent_overlap_bytes();

    Some(compaction)
}

/// Collects files of sorted runs newer than `run_index` that lie within the range.
///
/// Walks from older to newer runs and stops at the first run that overlaps
/// the range with a file that can not be taken, as every newer run would
/// then end up below older data.
fn pick_files_up<V: StorageStateView + ?Sized>(
    ctx: &PickContext<'_, V>,
    run_index: usize,
    range: &KeyRange,
) -> Vec<CompactionInputFiles> {
    let view = ctx.view;

    let mut groups = Vec::new();
    let mut level0 = CompactionInputFiles::new(0);

    for run in ctx.sorted_runs.iter().take(run_index).rev() {
        if let Some(file) = &run.file {
            let file_range = file.key_range();

            if !file_range.overlaps_with_key_range(range) {
                continue;
            }

            if run.being_compacted || !range.contains_range(&file_range) {
                break;
            }

            level0.files.insert(0, file.clone());
        } else {
            let overlapping = get_overlapping_inputs(view, run.level, range);

            if overlapping.is_empty() {
                continue;
            }

            let (within, _) = get_overlapping_inputs_within(view, run.level, range);

            if within.len() != overlapping.len() || are_files_in_compaction(view, &within) {
                break;
            }

            groups.push(CompactionInputFiles {
                level: run.level,
                files: within,
            });
        }
    }

    if !level0.is_empty() {
        groups.push(level0);
    }

    groups
}

/// Counts, per file of a level > 0, the longest chain of overlapping
/// files in the levels below it.
fn count_sorted_runs_underneath<V: StorageStateView + ?Sized>(
    view: &V,
    max_level: usize,
) -> HashMap<FileId, usize> {
    let mut counts = HashMap::default();

    for level in (1..=max_level).rev() {
        for file in view.level_files(level) {
            let range = file.key_range();

            let count = ((level + 1)..=max_level)
                .flat_map(|lower| get_overlapping_inputs(view, lower, &range))
                .map(|lower_file| counts.get(&lower_file.id).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);

            counts.insert(file.id, count);
        }
    }

    counts
}

/// Walks the levels below the start inputs, adding every overlapping file
/// with a clean cut.
///
/// Returns the input groups and output level, or `None` if nothing below
/// can be taken. Without a budget, a level with a busy overlapping file
/// fails the pick. With a budget, the walk stops above such a level or
/// above the level that would exceed the budget.
fn push_down<V: StorageStateView + ?Sized>(
    view: &V,
    start_inputs: CompactionInputFiles,
    max_level: usize,
    budget: u64,
) -> Option<(Vec<CompactionInputFiles>, usize)> {
    let start_level = start_inputs.level;
    let mut range = start_inputs.key_range()?;
    let mut total_size = start_inputs.size();

    if total_size > budget {
        return None;
    }

    let mut output_level = start_level;
    let mut inputs = vec![start_inputs];

    for level in (start_level + 1)..=max_level {
        let mut group = CompactionInputFiles {
            level,
            files: get_overlapping_inputs(view, level, &range),
        };

        if !group.is_empty() {
            if !expand_inputs_to_clean_cut(view, &mut group) {
                if budget == u64::MAX {
                    return None;
                }
                break;
            }

            let group_size = group.size();

            if total_size.saturating_add(group_size) > budget {
                break;
            }

            range = range.union(&group.key_range()?);
            total_size = total_size.saturating_add(group_size);
            output_level = level;
        }

        inputs.push(group);
    }

    if output_level == start_level {
        return None;
    }

    inputs.truncate(output_level - start_level + 1);

    Some((inputs, output_level))
}

/// Picks the file with the most sorted runs underneath it and merges it
/// down through every level it overlaps.
pub(super) fn pick_deepest_level_file<V: StorageStateView + ?Sized>(
    ctx: &PickContext<'_, V>,
    reason: CompactionReason,
) -> Option<Compaction> {
    let view = ctx.view;
    let max_level = ctx.max_output_level;
    let counts = count_sorted_runs_underneath(view, max_level);

    let mut best: Option<(usize, &Arc<FileMetadata>, usize)> = None;

    for level in 1..=max_level {
        for file in view.level_files(level) {
            if view.is_being_compacted(file.id) {
                continue;
            }

            let count = counts.get(&file.id).copied().unwrap_or_default();

            if count > best.map_or(0, |(_, _, best_count)| best_count) {
                best = Some((level, file, count));
            }
        }
    }

    let Some((level, file, count)) = best else {
        log::trace!(
            "[{}] Universal: no file with sorted runs underneath",
            ctx.cf_name
        );
        return None;
    };

    let mut start_inputs = CompactionInputFiles {
        level,
        files: vec![file.clone()],
    };

    if !expand_inputs_to_clean_cut(view, &mut start_inputs) {
        log::trace!(
            "[{}] Universal: file #{} in L{level} can not be cut cleanly",
            ctx.cf_name,
            file.id
        );
        return None;
    }

    let (inputs, output_level) = push_down(view, start_inputs, max_level, u64::MAX)?;

    if files_range_overlap_with_compaction(view, &inputs, output_level) {
        return None;
    }

    log::trace!(
        "[{}] Universal: picked file #{} in L{level} with {count} sorted runs underneath",
        ctx.cf_name,
        file.id
    );

    let mut compaction = ctx.new_compaction(inputs, output_level, reason);
    compaction.max_grandparent_overlap_bytes = ctx.config.max_grandparent_overlap_bytes();

    Some(compaction)
}

/// Reduces the sorted run count by pushing single files of newer
/// levels down, within the compaction byte budget.
///
/// Falls back to [`pick_deepest_level_file`] if no file can be pushed down.
pub(super) fn pick_for_sorted_run_num<V: StorageStateView + ?Sized>(
    ctx: &PickContext<'_, V>,
) -> Option<Compaction> {
    let view = ctx.view;
    let reason = CompactionReason::UniversalSortedRunNum;
    let budget = ctx.config.get_max_compaction_bytes();

    let last_level = ctx.sorted_runs.last()?.level;

    for run in ctx
        .sorted_runs
        .iter()
        .filter(|run| !run.is_level0() && !run.being_compacted && run.level < last_level)
    {
        for file in view.level_files(run.level) {
            if view.is_being_compacted(file.id) {
                continue;
            }

            let mut start_inputs = CompactionInputFiles {
                level: run.level,
                files: vec![file.clone()],
            };

            if !expand_inputs_to_clean_cut(view, &mut start_inputs) {
                continue;
            }

            let Some((inputs, output_level)) =
                push_down(view, start_inputs, ctx.max_output_level, budget)
            else {
                continue;
            };

            if files_range_overlap_with_compaction(view, &inputs, output_level) {
                continue;
            }

            log::trace!(
                "[{}] Universal: pushing file #{} from L{} down to L{output_level}",
                ctx.cf_name,
                file.id,
                run.level
            );

            return Some(ctx.new_compaction(inputs, output_level, reason));
        }
    }

    pick_deepest_level_file(ctx, reason)
}
