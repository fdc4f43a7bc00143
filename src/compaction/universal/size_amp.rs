// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{as_f64, incremental, oldest::pick_compaction_to_oldest, PickContext};
use crate::{
    compaction::{Compaction, CompactionReason},
    version::StorageStateView,
};

/// Fanout allowance of incremental size amplification picks
///
/// Incremental picks may write up to this factor more than a full
/// merge would per byte of newer data.
const INCREMENTAL_FANOUT_PENALTY: f64 = 1.8;

/// Merges everything into the oldest sorted run when the newer runs
/// grew too large compared to it.
pub(super) fn pick<V: StorageStateView + ?Sized>(ctx: &PickContext<'_, V>) -> Option<Compaction> {
    let options = &ctx.config.universal;
    let runs = ctx.sorted_runs;

    let [candidates @ .., last] = runs else {
        return None;
    };

    if last.being_compacted {
        log::trace!(
            "[{}] Universal: oldest {last} is being compacted, skipping size amp",
            ctx.cf_name
        );
        return None;
    }

    let start_index = candidates.iter().position(|run| !run.being_compacted)?;

    if let Some(busy) = candidates
        .iter()
        .skip(start_index)
        .find(|run| run.being_compacted)
    {
        log::trace!(
            "[{}] Universal: {busy} is being compacted, skipping size amp",
            ctx.cf_name
        );
        return None;
    }

    let candidate_size = candidates
        .iter()
        .skip(start_index)
        .map(|run| run.compensated_size)
        .fold(0, u64::saturating_add);

    let base_size = last.size;
    let max_amp = u64::from(options.max_size_amplification_percent);

    if candidate_size.saturating_mul(100) < max_amp.saturating_mul(base_size) {
        log::trace!(
            "[{}] Universal: size amp not needed, newer runs {candidate_size}B, oldest run {base_size}B",
            ctx.cf_name
        );
        return None;
    }

    log::debug!(
        "[{}] Universal: size amp needed, newer runs {candidate_size}B, oldest run {base_size}B",
        ctx.cf_name
    );

    if options.incremental {
        let fanout_threshold =
            as_f64(base_size) / as_f64(candidate_size) * INCREMENTAL_FANOUT_PENALTY;

        if let Some(compaction) = incremental::pick_for_reduce_size_amp(ctx, fanout_threshold) {
            return Some(compaction);
        }

        log::trace!(
            "[{}] Universal: no incremental size amp compaction, merging all runs",
            ctx.cf_name
        );
    }

    pick_compaction_to_oldest(ctx, start_index, CompactionReason::UniversalSizeAmplification)
}
