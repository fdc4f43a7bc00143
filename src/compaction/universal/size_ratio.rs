// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{as_f64, inflate, PickContext};
use crate::{
    compaction::{path::get_path_id, Compaction, CompactionReason},
    config::StopStyle,
    version::StorageStateView,
};

/// Picks a range of consecutive, newest sorted runs of similar size.
///
/// `size_ratio` is the percentage by which a run may be larger than the
/// runs picked so far, `max_runs` caps the amount of picked runs.
///
/// An unbounded `max_runs` is a regular size ratio pick, a bounded one
/// forces the sorted run count down.
pub(super) fn pick<V: StorageStateView + ?Sized>(
    ctx: &PickContext<'_, V>,
    size_ratio: u32,
    max_runs: u32,
) -> Option<Compaction> {
    let options = &ctx.config.universal;
    let runs = ctx.sorted_runs;

    let min_merge_width = usize::try_from(options.min_merge_width.max(2)).unwrap_or(usize::MAX);
    let max_files_to_compact =
        usize::try_from(options.max_merge_width.min(max_runs)).unwrap_or(usize::MAX);
    let max_compaction_bytes = ctx.config.get_max_compaction_bytes();

    let mut picked = None;
    let mut next_start = 0;

    while next_start < runs.len() {
        let Some((start, first)) = runs.iter().enumerate().skip(next_start).find(|(_, run)| {
            if run.being_compacted {
                log::trace!("[{}] Universal: {run} is being compacted, skipping", ctx.cf_name);
            }
            !run.being_compacted
        }) else {
            break;
        };

        let mut candidate_count = 1;
        let mut candidate_size = first.compensated_size;
        let mut total_size = first.size;
        let mut exceeded_budget = false;

        for succ in runs.iter().skip(start + 1) {
            if candidate_count >= max_files_to_compact || succ.being_compacted {
                break;
            }

            // The successor may not be much larger than what was picked so far
            if inflate(candidate_size, size_ratio) < as_f64(succ.size) {
                break;
            }

            let next_candidate_size = match options.stop_style {
                StopStyle::SimilarSize => {
                    // ...and the last picked run may not be much larger than the successor
                    if inflate(succ.size, size_ratio) < as_f64(candidate_size) {
                        break;
                    }
                    succ.compensated_size
                }
                StopStyle::TotalSize => candidate_size.saturating_add(succ.compensated_size),
            };

            if succ.level > 0 && total_size.saturating_add(succ.size) > max_compaction_bytes {
                exceeded_budget = true;
                break;
            }

            candidate_size = next_candidate_size;
            total_size = total_size.saturating_add(succ.size);
            candidate_count += 1;
        }

        if exceeded_budget {
            let l0_count = runs
                .iter()
                .skip(start)
                .take(candidate_count)
                .take_while(|run| run.is_level0())
                .count();

            if l0_count >= 2 {
                log::trace!(
                    "[{}] Universal: compaction budget exceeded, limiting to {l0_count} level 0 runs",
                    ctx.cf_name
                );
                picked = Some((start, l0_count));
                break;
            }
        } else if candidate_count >= min_merge_width {
            picked = Some((start, candidate_count));
            break;
        }

        for run in runs.iter().skip(start).take(candidate_count) {
            log::trace!(
                "[{}] Universal: skipping {run}, only {candidate_count} candidates",
                ctx.cf_name
            );
        }

        next_start = start + 1;
    }

    let (start, count) = picked?;
    debug_assert!(count >= 2);

    let first_index_after = start + count;
    let start_level = runs.get(start)?.level;

    let mut enable_compression = true;

    if let Ok(ratio_to_compress) = u64::try_from(options.compression_size_percent) {
        let total_size = runs
            .iter()
            .map(|run| run.compensated_size)
            .fold(0, u64::saturating_add);

        let mut older_size = 0u64;

        for run in runs.iter().skip(first_index_after).rev() {
            older_size = older_size.saturating_add(run.size);

            if older_size.saturating_mul(100) >= total_size.saturating_mul(ratio_to_compress) {
                enable_compression = false;
                break;
            }
        }
    }

    let estimated_total_size = runs
        .iter()
        .take(first_index_after)
        .map(|run| run.size)
        .fold(0, u64::saturating_add);

    let output_level = match runs.get(first_index_after) {
        None => ctx.max_output_level,
        Some(next) if next.is_level0() => 0,
        Some(next) => next.level - 1,
    };

    let picked_runs = runs.get(start..first_index_after)?;
    let inputs = ctx.groups_for_runs(start_level, output_level, picked_runs);

    let reason = if max_runs == u32::MAX {
        CompactionReason::UniversalSizeRatio
    } else {
        CompactionReason::UniversalSortedRunNum
    };

    log::debug!(
        "[{}] Universal: size ratio {size_ratio} picked {count} sorted runs from {start} ({estimated_total_size}B) into L{output_level}",
        ctx.cf_name,
    );

    let mut compaction = ctx.new_compaction(inputs, output_level, reason);
    compaction.output_path_id = get_path_id(ctx.config, estimated_total_size);
    compaction.compression = ctx.config.compression_for_level(
        start_level,
        ctx.view.num_non_empty_levels(),
        enable_compression,
    );

    Some(compaction)
}
