// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

mod delete_triggered;
mod incremental;
mod oldest;
mod periodic;
mod size_amp;
mod size_ratio;


use super::{
    is_input_files_non_overlapping, path::get_path_id, Compaction, CompactionInputFiles,
    CompactionPicker, CompactionReason,
};
use crate::{
    file::FileMetadata,
    sorted_run::{calculate_sorted_runs_up_to, SortedRun},
    version::{StorageState, StorageStateView},
    Config,
};
use std::sync::Arc;

/// Everything a single pick reads
///
/// Built once per pick and shared by all strategies.
struct PickContext<'a, V: StorageStateView + ?Sized> {
    cf_name: &'a str,
    config: &'a Config,
    view: &'a V,
    sorted_runs: &'a [SortedRun],

    /// Deepest level output may be written to
    max_output_level: usize,

    /// Level 0 score at the time of picking
    score: f64,
}

impl<V: StorageStateView + ?Sized> PickContext<'_, V> {
    /// Creates a compaction with default output settings.
    ///
    /// The output path is chosen by input size, compression is
    /// enabled for the output level, grandparent overlap is unbounded.
    fn new_compaction(
        &self,
        inputs: Vec<CompactionInputFiles>,
        output_level: usize,
        reason: CompactionReason,
    ) -> Compaction {
        let input_size = inputs.iter().map(CompactionInputFiles::size).sum();

        Compaction {
            inputs,
            output_level,
            max_output_file_size: self.config.max_file_size_for_level(output_level),
            max_grandparent_overlap_bytes: u64::MAX,
            output_path_id: get_path_id(self.config, input_size),
            compression: self.config.compression_for_level(
                output_level,
                self.view.num_non_empty_levels(),
                true,
            ),
            grandparents: Vec::new(),
            is_trivial_move: false,
            score: self.score,
            reason,
        }
    }

    /// Builds one input group per level from `start_level` to `output_level`
    /// out of the given sorted runs.
    ///
    /// A level 0 run contributes its file, every other run its whole level.
    fn groups_for_runs(
        &self,
        start_level: usize,
        output_level: usize,
        runs: &[SortedRun],
    ) -> Vec<CompactionInputFiles> {
        let mut groups = (start_level..=output_level)
            .map(CompactionInputFiles::new)
            .collect::<Vec<_>>();

        for run in runs {
            debug_assert!(run.level >= start_level && run.level <= output_level);

            let Some(group) = groups.get_mut(run.level - start_level) else {
                continue;
            };

            match &run.file {
                Some(file) => group.files.push(file.clone()),
                None => group.files = self.view.level_files(run.level).to_vec(),
            }
        }

        groups
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(n: u64) -> f64 {
    n as f64
}

/// Inflates a size by a percentage
fn inflate(size: u64, percent: u32) -> f64 {
    as_f64(size) * (100.0 + f64::from(percent)) / 100.0
}

/// Files marked in levels deeper than the max output level can never be compacted
fn has_marked_file(marked: &[(usize, Arc<FileMetadata>)], max_output_level: usize) -> bool {
    marked.iter().any(|(level, _)| *level <= max_output_level)
}

fn describe_runs(runs: &[SortedRun]) -> String {
    runs.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Universal compaction
///
/// Every level 0 file and every level > 0 is one sorted run. Sorted runs are
/// merged when they are of similar size, when there are too many of them,
/// when newer data grew too large compared to the oldest run, or when files
/// were marked for periodic or delete-triggered compaction.
///
/// More info here: <https://github.com/facebook/rocksdb/wiki/Universal-Compaction>
pub struct Strategy {
    config: Config,
}

impl Strategy {
    /// Creates a new universal compaction picker.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the deepest level compactions may write to.
    ///
    /// With ingest-behind the last level is reserved.
    fn max_output_level<V: StorageStateView + ?Sized>(&self, view: &V) -> usize {
        if self.config.allow_ingest_behind {
            view.level_count().saturating_sub(2)
        } else {
            view.level_count().saturating_sub(1)
        }
        .min(self.config.max_output_level())
    }

    /// Picks a compaction without claiming its inputs.
    fn pick<V: StorageStateView + ?Sized>(&self, cf_name: &str, view: &V) -> Option<Compaction> {
        let config = &self.config;
        let options = &config.universal;

        let max_output_level = self.max_output_level(view);

        let sorted_runs = calculate_sorted_runs_up_to(view, max_output_level);
        let trigger = usize::try_from(config.level0_file_num_compaction_trigger).unwrap_or(usize::MAX);

        let has_periodic =
            has_marked_file(view.files_marked_for_periodic_compaction(), max_output_level);
        let has_marked = has_marked_file(view.files_marked_for_compaction(), max_output_level);

        if sorted_runs.is_empty() || (!has_periodic && !has_marked && sorted_runs.len() < trigger)
        {
            log::trace!(
                "[{cf_name}] Universal: nothing to do, {} sorted runs",
                sorted_runs.len()
            );
            return None;
        }

        log::trace!(
            "[{cf_name}] Universal: {} sorted runs: {}",
            sorted_runs.len(),
            describe_runs(&sorted_runs)
        );

        let ctx = PickContext {
            cf_name,
            config,
            view,
            sorted_runs: &sorted_runs,
            max_output_level,
            score: view.compaction_score(0),
        };

        let mut compaction = None;

        if has_periodic {
            compaction = periodic::pick(&ctx);
        }

        if compaction.is_none() && sorted_runs.len() >= trigger {
            compaction = size_amp::pick(&ctx)
                .or_else(|| size_ratio::pick(&ctx, options.size_ratio, u32::MAX))
                .or_else(|| Self::pick_to_reduce_sorted_runs(&ctx, trigger));
        }

        if compaction.is_none() {
            compaction = delete_triggered::pick(&ctx);
        }

        let Some(mut compaction) = compaction else {
            log::trace!("[{cf_name}] Universal: no compaction picked");
            return None;
        };

        if options.allow_trivial_move && compaction.reason != CompactionReason::PeriodicCompaction
        {
            compaction.is_trivial_move = is_input_files_non_overlapping(&compaction.inputs);
        }

        debug_assert!(
            compaction.is_valid(view),
            "[{cf_name}] Universal: picked invalid compaction {compaction:?}"
        );

        log::debug!(
            "[{cf_name}] Universal: picked {} compaction of {} files ({}B) from L{} into L{}{}",
            compaction.reason,
            compaction.num_input_files(),
            compaction.total_input_size(),
            compaction.start_level(),
            compaction.output_level,
            if compaction.is_trivial_move {
                " (trivial move)"
            } else {
                ""
            },
        );

        Some(compaction)
    }

    /// Forces the sorted run count back under the trigger, ignoring size ratios.
    fn pick_to_reduce_sorted_runs<V: StorageStateView + ?Sized>(
        ctx: &PickContext<'_, V>,
        trigger: usize,
    ) -> Option<Compaction> {
        let idle_runs = ctx
            .sorted_runs
            .iter()
            .filter(|run| !run.being_compacted)
            .count();

        if idle_runs <= trigger {
            log::trace!(
                "[{}] Universal: {idle_runs} idle sorted runs do not exceed the trigger",
                ctx.cf_name
            );
            return None;
        }

        let num_files = u32::try_from(idle_runs - trigger + 1).unwrap_or(u32::MAX);

        size_ratio::pick(ctx, u32::MAX, num_files).or_else(|| {
            if ctx.config.universal.incremental {
                incremental::pick_for_sorted_run_num(ctx)
            } else {
                None
            }
        })
    }
}

impl CompactionPicker for Strategy {
    fn get_name(&self) -> &'static str {
        "UniversalCompaction"
    }

    fn needs_compaction(&self, view: &dyn StorageStateView) -> bool {
        let max_output_level = self.max_output_level(view);

        view.compaction_score(0) >= 1.0
            || has_marked_file(view.files_marked_for_periodic_compaction(), max_output_level)
            || has_marked_file(view.files_marked_for_compaction(), max_output_level)
    }

    fn pick_compaction(&self, cf_name: &str, state: &mut dyn StorageState) -> Option<Compaction> {
        let compaction = self.pick(cf_name, &*state)?;

        state.register_compaction(&compaction);
        state.compute_compaction_score(&self.config);

        Some(compaction)
    }
}
