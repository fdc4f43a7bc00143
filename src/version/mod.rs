// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

mod hidden_set;
pub mod overlap;

pub use hidden_set::HiddenSet;

use crate::{
    compaction::Compaction, file::FileMetadata, time::unix_timestamp_secs, Config, FileId,
    HashSet, KeyRange,
};
use std::sync::Arc;

/// A compaction that was picked and not yet completed or released
#[derive(Clone, Debug)]
pub struct InFlightCompaction {
    /// Level of the newest input files
    pub start_level: usize,

    /// Level the output is written to
    pub output_level: usize,

    /// User key range covered by the inputs
    pub key_range: KeyRange,

    /// Claimed files
    pub file_ids: HashSet<FileId>,
}

/// Read access to the storage state of one column family
///
/// Every picking function reads file lists and claim flags through this
/// interface, so the picker can run against synthetic states.
pub trait StorageStateView {
    /// Returns the amount of levels (including empty ones).
    fn level_count(&self) -> usize;

    /// Returns the files of a level.
    ///
    /// Level 0 is ordered newest first, all other levels are
    /// ordered by key and do not overlap. Levels out of bounds are empty.
    fn level_files(&self, level: usize) -> &[Arc<FileMetadata>];

    /// Returns `true` if the file is claimed by a running compaction.
    fn is_being_compacted(&self, id: FileId) -> bool;

    /// Returns the compaction score of a level.
    ///
    /// Only level 0 carries a score in universal compaction.
    fn compaction_score(&self, level: usize) -> f64;

    /// Returns the (level, file) pairs marked for periodic compaction.
    fn files_marked_for_periodic_compaction(&self) -> &[(usize, Arc<FileMetadata>)];

    /// Returns the (level, file) pairs marked for delete-triggered compaction.
    fn files_marked_for_compaction(&self) -> &[(usize, Arc<FileMetadata>)];

    /// Returns the compactions currently in flight.
    fn in_flight_compactions(&self) -> &[InFlightCompaction];

    /// Returns the number of files in a level.
    fn num_level_files(&self, level: usize) -> usize {
        self.level_files(level).len()
    }

    /// Returns the number of levels up to and including the deepest non-empty level.
    fn num_non_empty_levels(&self) -> usize {
        (0..self.level_count())
            .rev()
            .find(|&level| self.num_level_files(level) > 0)
            .map_or(0, |level| level + 1)
    }

    /// Returns `true` if a compaction starting in level 0 is running.
    fn level0_compactions_in_progress(&self) -> bool {
        self.in_flight_compactions()
            .iter()
            .any(|c| c.start_level == 0)
    }
}

/// Mutable access to the storage state of one column family
///
/// Callers must serialize "read state, pick, claim" per column family.
pub trait StorageState: StorageStateView {
    /// Claims the input files of a compaction.
    fn register_compaction(&mut self, compaction: &Compaction);

    /// Releases the input files of a compaction, e.g. when it failed or was discarded.
    fn release_compaction(&mut self, compaction: &Compaction);

    /// Recomputes the compaction score and the marked file lists.
    ///
    /// Only levels up to [`Config::max_output_level`] are considered.
    fn compute_compaction_score(&mut self, config: &Config);
}

/// In-memory storage state of one column family
#[derive(Clone, Debug)]
pub struct VersionStorage {
    levels: Vec<Vec<Arc<FileMetadata>>>,

    /// Files that are being compacted
    hidden_set: HiddenSet,

    in_flight: Vec<InFlightCompaction>,

    level0_score: f64,

    marked_for_compaction: Vec<(usize, Arc<FileMetadata>)>,
    marked_for_periodic_compaction: Vec<(usize, Arc<FileMetadata>)>,

    /// Fixed clock, unix timestamp in seconds
    current_time: Option<u64>,
}

impl VersionStorage {
    /// Creates an empty storage state with the given amount of levels.
    ///
    /// # Panics
    ///
    /// Panics if `level_count` is 0.
    #[must_use]
    pub fn new(level_count: usize) -> Self {
        assert!(level_count > 0, "need at least one level");
        Self::from_levels((0..level_count).map(|_| Vec::new()).collect())
    }

    /// Creates a storage state from per-level file lists.
    ///
    /// Level 0 must be ordered newest first. Other levels are sorted by key.
    ///
    /// # Panics
    ///
    /// Panics if no level is given, or if files of a level > 0 overlap.
    #[must_use]
    pub fn from_levels(mut levels: Vec<Vec<Arc<FileMetadata>>>) -> Self {
        assert!(!levels.is_empty(), "need at least one level");

        for level in levels.iter_mut().skip(1) {
            level.sort_by(|a, b| a.smallest.cmp(&b.smallest));

            assert!(
                level
                    .windows(2)
                    .all(|w| matches!(w, [a, b] if a.largest.user_key < b.smallest.user_key)),
                "files of a level > 0 may not overlap",
            );
        }

        let mut storage = Self {
            levels,
            hidden_set: HiddenSet::default(),
            in_flight: Vec::new(),
            level0_score: 0.0,
            marked_for_compaction: Vec::new(),
            marked_for_periodic_compaction: Vec::new(),
            current_time: None,
        };

        storage.collect_flagged_files();
        storage
    }

    /// Pins the clock used for file ages, for deterministic tests.
    #[must_use]
    pub fn with_current_time(mut self, secs: u64) -> Self {
        self.current_time = Some(secs);
        self
    }

    /// Adds a freshly flushed file as the newest file of level 0.
    pub fn add_flushed_file(&mut self, file: Arc<FileMetadata>) {
        if let Some(l0) = self.levels.first_mut() {
            l0.insert(0, file);
        }
    }

    /// Returns the hidden set.
    #[must_use]
    pub fn hidden_set(&self) -> &HiddenSet {
        &self.hidden_set
    }

    /// Returns the total amount of files.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Returns the total size of all files in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.levels
            .iter()
            .flatten()
            .map(|f| f.file_size)
            .sum()
    }

    /// Returns an iterator over all files.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<FileMetadata>> {
        self.levels.iter().flatten()
    }

    /// Applies a finished compaction.
    ///
    /// The inputs are removed, the outputs are inserted into the output level
    /// and the claim is released. Level 0 outputs take the position of the
    /// newest input file of level 0. Removed files are dropped from the marked
    /// file lists.
    ///
    /// The compaction score should be recomputed afterwards, so that outputs
    /// can be marked.
    pub fn complete_compaction(&mut self, compaction: &Compaction, outputs: Vec<Arc<FileMetadata>>) {
        let input_ids = compaction.input_file_ids();

        let l0_position = self
            .levels
            .first()
            .and_then(|l0| l0.iter().position(|f| input_ids.contains(&f.id)));

        for level in &mut self.levels {
            level.retain(|f| !input_ids.contains(&f.id));
        }

        self.marked_for_compaction
            .retain(|(_, f)| !input_ids.contains(&f.id));
        self.marked_for_periodic_compaction
            .retain(|(_, f)| !input_ids.contains(&f.id));

        self.release_compaction(compaction);

        let output_level = compaction.output_level();

        let Some(level) = self.levels.get_mut(output_level) else {
            log::warn!("Output level {output_level} does not exist, dropping outputs");
            return;
        };

        if output_level == 0 {
            let position = l0_position.unwrap_or(0).min(level.len());

            for (offset, file) in outputs.into_iter().enumerate() {
                level.insert(position + offset, file);
            }
        } else {
            level.extend(outputs);
            level.sort_by(|a, b| a.smallest.cmp(&b.smallest));

            debug_assert!(
                level
                    .windows(2)
                    .all(|w| matches!(w, [a, b] if a.largest.user_key < b.smallest.user_key)),
                "compaction produced overlapping files in L{output_level}",
            );
        }
    }

    fn now(&self) -> u64 {
        self.current_time.unwrap_or_else(unix_timestamp_secs)
    }

    /// Collects explicitly flagged files that are not claimed.
    fn collect_flagged_files(&mut self) {
        self.compute_files_marked_for_compaction(None, usize::MAX);
        self.compute_files_marked_for_periodic_compaction(0, usize::MAX);
    }

    /// Rebuilds the list of files marked for delete-triggered compaction.
    ///
    /// Files are marked if explicitly flagged, or if their tombstone
    /// ratio reaches the given trigger. Claimed files and files deeper
    /// than `max_level` (e.g. in the level reserved for ingest-behind) are skipped.
    pub fn compute_files_marked_for_compaction(
        &mut self,
        tombstone_ratio_trigger: Option<f32>,
        max_level: usize,
    ) {
        let hidden_set = &self.hidden_set;

        self.marked_for_compaction = self
            .levels
            .iter()
            .take(max_level.saturating_add(1))
            .enumerate()
            .flat_map(|(level, files)| files.iter().map(move |f| (level, f)))
            .filter(|(_, f)| !hidden_set.is_hidden(f.id))
            .filter(|(_, f)| {
                f.marked_for_compaction
                    || tombstone_ratio_trigger.is_some_and(|trigger| {
                        f.tombstone_count > 0 && f.tombstone_ratio() >= f64::from(trigger)
                    })
            })
            .map(|(level, f)| (level, f.clone()))
            .collect();
    }

    /// Rebuilds the list of files marked for periodic compaction.
    ///
    /// Files are marked if explicitly flagged, or if they are older
    /// than the given period (0 disables the age check). Claimed files and
    /// files deeper than `max_level` are skipped.
    pub fn compute_files_marked_for_periodic_compaction(
        &mut self,
        period_secs: u64,
        max_level: usize,
    ) {
        let now = self.now();
        let hidden_set = &self.hidden_set;

        self.marked_for_periodic_compaction = self
            .levels
            .iter()
            .take(max_level.saturating_add(1))
            .enumerate()
            .flat_map(|(level, files)| files.iter().map(move |f| (level, f)))
            .filter(|(_, f)| !hidden_set.is_hidden(f.id))
            .filter(|(_, f)| {
                f.marked_for_periodic_compaction
                    || (period_secs > 0
                        && f.created_at > 0
                        && now.saturating_sub(f.created_at) > period_secs)
            })
            .map(|(level, f)| (level, f.clone()))
            .collect();
    }
}

impl StorageStateView for VersionStorage {
    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn level_files(&self, level: usize) -> &[Arc<FileMetadata>] {
        self.levels.get(level).map(Vec::as_slice).unwrap_or_default()
    }

    fn is_being_compacted(&self, id: FileId) -> bool {
        self.hidden_set.is_hidden(id)
    }

    fn compaction_score(&self, level: usize) -> f64 {
        if level == 0 {
            self.level0_score
        } else {
            0.0
        }
    }

    fn files_marked_for_periodic_compaction(&self) -> &[(usize, Arc<FileMetadata>)] {
        &self.marked_for_periodic_compaction
    }

    fn files_marked_for_compaction(&self) -> &[(usize, Arc<FileMetadata>)] {
        &self.marked_for_compaction
    }

    fn in_flight_compactions(&self) -> &[InFlightCompaction] {
        &self.in_flight
    }
}

impl StorageState for VersionStorage {
    fn register_compaction(&mut self, compaction: &Compaction) {
        let file_ids = compaction.input_file_ids();

        debug_assert!(
            !self.hidden_set.is_blocked(file_ids.iter().copied()),
            "compaction claims a file that is already being compacted",
        );

        self.hidden_set.hide(file_ids.iter().copied());

        if let Some(key_range) = compaction.key_range() {
            self.in_flight.push(InFlightCompaction {
                start_level: compaction.start_level(),
                output_level: compaction.output_level(),
                key_range,
                file_ids,
            });
        }
    }

    fn release_compaction(&mut self, compaction: &Compaction) {
        let file_ids = compaction.input_file_ids();

        self.hidden_set.show(file_ids.iter().copied());

        // NOTE: Claims are exclusive, so any shared file identifies the entry
        self.in_flight
            .retain(|c| c.file_ids.is_disjoint(&file_ids));
    }

    fn compute_compaction_score(&mut self, config: &Config) {
        let max_level = config.max_output_level();
        let mut num_sorted_runs = 0;

        for (idx, files) in self.levels.iter().enumerate().take(max_level + 1) {
            if idx == 0 {
                num_sorted_runs += files
                    .iter()
                    .filter(|f| !self.hidden_set.is_hidden(f.id))
                    .count();
            } else if !files.is_empty() && !self.hidden_set.is_blocked(files.iter().map(|f| f.id))
            {
                num_sorted_runs += 1;
            }
        }

        #[allow(clippy::cast_precision_loss)]
        {
            self.level0_score = num_sorted_runs as f64
                / f64::from(config.level0_file_num_compaction_trigger.max(1));
        }

        self.compute_files_marked_for_compaction(config.tombstone_ratio_trigger, max_level);
        self.compute_files_marked_for_periodic_compaction(
            config.periodic_compaction_seconds,
            max_level,
        );
    }
}
