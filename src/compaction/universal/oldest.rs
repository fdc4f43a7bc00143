// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::PickContext;
use crate::{
    compaction::{path::get_path_id, Compaction, CompactionReason},
    version::StorageStateView,
};

/// Merges all sorted runs from `start_index` to the oldest one into the
/// deepest output level.
pub(super) fn pick_compaction_to_oldest<V: StorageStateView + ?Sized>(
    ctx: &PickContext<'_, V>,
    start_index: usize,
    reason: CompactionReason,
) -> Option<Compaction> {
    let runs = ctx.sorted_runs.get(start_index..)?;
    let start_level = runs.first()?.level;
    let output_level = ctx.max_output_level;

    let estimated_total_size = runs
        .iter()
        .map(|run| run.size)
        .fold(0, u64::saturating_add);

    for run in runs {
        log::trace!("[{}] Universal: {reason} picking {run}", ctx.cf_name);
    }

    let inputs = ctx.groups_for_runs(start_level, output_level, runs);

    let mut compaction = ctx.new_compaction(inputs, output_level, reason);
    compaction.output_path_id = get_path_id(ctx.config, estimated_total_size);

    Some(compaction)
}
