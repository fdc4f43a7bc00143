// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    file::{FileId, FileMetadata},
    version::StorageStateView,
    HashSet,
};
use std::sync::Arc;

/// A sorted run: a single level 0 file, or a whole level > 0
#[derive(Clone, Debug)]
pub struct SortedRun {
    /// Level of the run
    pub level: usize,

    /// The file of a level 0 run, `None` for levels > 0
    pub file: Option<Arc<FileMetadata>>,

    /// Size in bytes
    pub size: u64,

    /// Size adjusted for reclaimable tombstones, never 0
    pub compensated_size: u64,

    /// `true` if any file of the run is being compacted
    pub being_compacted: bool,
}

impl SortedRun {
    /// Returns `true` if the run is a level 0 file.
    #[must_use]
    pub fn is_level0(&self) -> bool {
        self.level == 0
    }

    /// Returns `true` if the run is, or contains, one of the given files.
    pub(crate) fn contains_any_of<V: StorageStateView + ?Sized>(
        &self,
        view: &V,
        ids: &HashSet<FileId>,
    ) -> bool {
        match &self.file {
            Some(file) => ids.contains(&file.id),
            None => view
                .level_files(self.level)
                .iter()
                .any(|f| ids.contains(&f.id)),
        }
    }
}

impl std::fmt::Display for SortedRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.file {
            Some(file) => write!(
                f,
                "file #{}[{}B/{}B]{}",
                file.id,
                self.size,
                self.compensated_size,
                if self.being_compacted { "[compacting]" } else { "" },
            ),
            None => write!(
                f,
                "level {}[{}B/{}B]{}",
                self.level,
                self.size,
                self.compensated_size,
                if self.being_compacted { "[compacting]" } else { "" },
            ),
        }
    }
}

/// Computes the sorted runs of a storage state, newest first.
///
/// Every level 0 file is its own run, in level order. Every other level with
/// data is one run. A level > 0 counts as being compacted if any of its files is.
pub fn calculate_sorted_runs<V: StorageStateView + ?Sized>(view: &V) -> Vec<SortedRun> {
    calculate_sorted_runs_up_to(view, view.level_count().saturating_sub(1))
}

/// Computes the sorted runs of all levels up to and including `max_level`.
///
/// Levels below `max_level` (e.g. a level reserved for ingestion) are not
/// considered runs.
pub fn calculate_sorted_runs_up_to<V: StorageStateView + ?Sized>(
    view: &V,
    max_level: usize,
) -> Vec<SortedRun> {
    let mut runs = view
        .level_files(0)
        .iter()
        .map(|file| SortedRun {
            level: 0,
            file: Some(file.clone()),
            size: file.file_size,
            compensated_size: file.compensated_file_size(),
            being_compacted: view.is_being_compacted(file.id),
        })
        .collect::<Vec<_>>();

    for level in 1..=max_level.min(view.level_count().saturating_sub(1)) {
        let files = view.level_files(level);

        let compensated_size = files
            .iter()
            .map(|f| f.compensated_file_size())
            .fold(0, u64::saturating_add);

        if compensated_size == 0 {
            continue;
        }

        runs.push(SortedRun {
            level,
            file: None,
            size: files.iter().map(|f| f.file_size).sum(),
            compensated_size,
            being_compacted: files.iter().any(|f| view.is_being_compacted(f.id)),
        });
    }

    debug_assert!(
        runs.iter()
            .all(|run| run.compensated_size > 0 && run.is_level0() == run.file.is_some()),
        "sorted run invariant violated",
    );

    runs
}
