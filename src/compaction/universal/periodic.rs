// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{oldest::pick_compaction_to_oldest, PickContext};
use crate::{
    compaction::{Compaction, CompactionReason},
    version::StorageStateView,
    HashSet,
};

/// Rewrites old data by merging the longest idle suffix of sorted runs
/// into the deepest level.
///
/// Older data usually lives in older runs, so a full merge of the oldest
/// runs covers the files that are due. If only the oldest run is idle it
/// is only rewritten when it actually contains a due file.
pub(super) fn pick<V: StorageStateView + ?Sized>(ctx: &PickContext<'_, V>) -> Option<Compaction> {
    let runs = ctx.sorted_runs;

    let start_index = runs
        .iter()
        .rposition(|run| run.being_compacted)
        .map_or(0, |idx| idx + 1);

    if start_index == runs.len() {
        log::trace!(
            "[{}] Universal: oldest sorted run is being compacted, skipping periodic compaction",
            ctx.cf_name
        );
        return None;
    }

    if start_index + 1 == runs.len() {
        let due = ctx
            .view
            .files_marked_for_periodic_compaction()
            .iter()
            .map(|(_, file)| file.id)
            .collect::<HashSet<_>>();

        let last = runs.last()?;

        if !last.contains_any_of(ctx.view, &due) {
            log::trace!(
                "[{}] Universal: {last} is the only idle sorted run, but has no file due for periodic compaction",
                ctx.cf_name
            );
            return None;
        }
    }

    pick_compaction_to_oldest(ctx, start_index, CompactionReason::PeriodicCompaction)
}
