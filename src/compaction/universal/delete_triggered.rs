// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::PickContext;
use crate::{
    compaction::{path::get_path_id, Compaction, CompactionInputFiles, CompactionReason},
    version::{
        overlap::{
            files_range_overlap_with_compaction, get_grandparents, get_overlapping_l0_files,
            pick_files_marked_for_compaction, setup_other_inputs, total_file_size,
        },
        StorageStateView,
    },
    FileMetadata, HashSet,
};
use std::sync::Arc;

/// Compacts files marked for compaction, usually because they are
/// dominated by tombstones.
pub(super) fn pick<V: StorageStateView + ?Sized>(ctx: &PickContext<'_, V>) -> Option<Compaction> {
    let view = ctx.view;

    let (inputs, output_level, grandparents) = if view.level_count() == 1 {
        (pick_single_level(ctx)?, 0, Vec::new())
    } else {
        pick_multi_level(ctx)?
    };

    let estimated_total_size = total_file_size(view.level_files(output_level));

    let mut compaction = ctx.new_compaction(
        inputs,
        output_level,
        CompactionReason::FilesMarkedForCompaction,
    );
    compaction.output_path_id = get_path_id(ctx.config, estimated_total_size);
    compaction.max_grandparent_overlap_bytes = ctx.config.max_grandparent_overlap_bytes();
    compaction.grandparents = grandparents;

    Some(compaction)
}

/// With a single level all files are level 0 runs.
///
/// Starts at the newest idle marked file and adds every older run until
/// one is being compacted. A marked oldest file on its own is skipped.
fn pick_single_level<V: StorageStateView + ?Sized>(
    ctx: &PickContext<'_, V>,
) -> Option<Vec<CompactionInputFiles>> {
    let runs = ctx.sorted_runs;

    let marked = ctx
        .view
        .files_marked_for_compaction()
        .iter()
        .map(|(_, file)| file.id)
        .collect::<HashSet<_>>();

    let start_index = runs
        .iter()
        .take(runs.len().saturating_sub(1))
        .position(|run| {
            !run.being_compacted
                && run
                    .file
                    .as_ref()
                    .is_some_and(|file| marked.contains(&file.id))
        })?;

    let mut start_inputs = CompactionInputFiles::new(0);

    for run in runs.iter().skip(start_index) {
        if run.being_compacted {
            break;
        }

        if let Some(file) = &run.file {
            start_inputs.files.push(file.clone());
        }
    }

    if start_inputs.len() <= 1 {
        log::trace!(
            "[{}] Universal: only a single marked file, skipping",
            ctx.cf_name
        );
        return None;
    }

    Some(vec![start_inputs])
}

/// Input groups, output level and grandparents
type MultiLevelPick = (Vec<CompactionInputFiles>, usize, Vec<Arc<FileMetadata>>);

/// Pushes a marked file (and whatever overlaps it) into the next level
/// that has data.
fn pick_multi_level<V: StorageStateView + ?Sized>(
    ctx: &PickContext<'_, V>,
) -> Option<MultiLevelPick> {
    let view = ctx.view;

    let mut start_inputs = pick_files_marked_for_compaction(view, ctx.max_output_level)?;
    let start_level = start_inputs.level;

    let output_level = match ((start_level + 1)..view.level_count())
        .find(|&level| view.num_level_files(level) > 0)
    {
        Some(level) => level,
        None if start_level == 0 => view.level_count() - 1,
        None => {
            log::trace!(
                "[{}] Universal: marked file is in the last level with data, skipping",
                ctx.cf_name
            );
            return None;
        }
    };

    // NOTE: The level reserved for ingestion is never written to
    let output_level = output_level.min(ctx.max_output_level);

    if output_level == start_level {
        return Some((vec![start_inputs], output_level, Vec::new()));
    }

    if start_level == 0 && !get_overlapping_l0_files(view, &mut start_inputs, output_level) {
        log::trace!(
            "[{}] Universal: level 0 files overlapping marked file are busy",
            ctx.cf_name
        );
        return None;
    }

    let mut output_inputs = CompactionInputFiles::new(output_level);

    if !setup_other_inputs(view, ctx.config, &mut start_inputs, &mut output_inputs) {
        log::trace!(
            "[{}] Universal: L{output_level} files overlapping marked file are busy",
            ctx.cf_name
        );
        return None;
    }

    let grandparents = get_grandparents(view, &start_inputs, &output_inputs);

    let mut inputs = Vec::with_capacity(output_level - start_level + 1);
    inputs.push(start_inputs);
    inputs.extend(((start_level + 1)..output_level).map(CompactionInputFiles::new));
    inputs.push(output_inputs);

    if files_range_overlap_with_compaction(view, &inputs, output_level) {
        log::trace!(
            "[{}] Universal: marked file overlaps running compaction into L{output_level}",
            ctx.cf_name
        );
        return None;
    }

    Some((inputs, output_level, grandparents))
}
