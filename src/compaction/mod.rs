// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Contains the compaction plan and the universal compaction picker

pub mod manager;
pub(crate) mod path;
pub mod trivial_move;
pub mod universal;

pub use trivial_move::is_input_files_non_overlapping;

use crate::{
    config::CompressionType,
    file::{FileId, FileMetadata},
    version::{StorageState, StorageStateView},
    HashSet, KeyRange,
};
use std::sync::Arc;

/// Why a compaction was picked
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CompactionReason {
    /// Sorted runs of similar size were merged
    UniversalSizeRatio,

    /// Sorted runs were merged to get their count under the trigger
    UniversalSortedRunNum,

    /// Newer data grew too large relative to the oldest sorted run
    UniversalSizeAmplification,

    /// Files were marked, e.g. because they are dense with tombstones
    FilesMarkedForCompaction,

    /// Files were marked for periodic rewrite
    PeriodicCompaction,
}

impl std::fmt::Display for CompactionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::UniversalSizeRatio => "size ratio",
                Self::UniversalSortedRunNum => "sorted run num",
                Self::UniversalSizeAmplification => "size amplification",
                Self::FilesMarkedForCompaction => "files marked for compaction",
                Self::PeriodicCompaction => "periodic compaction",
            }
        )
    }
}

/// Input files of one level
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CompactionInputFiles {
    /// Level
    pub level: usize,

    /// Files, in level order
    pub files: Vec<Arc<FileMetadata>>,
}

impl CompactionInputFiles {
    /// Creates an empty group for the given level.
    #[must_use]
    pub fn new(level: usize) -> Self {
        Self {
            level,
            files: Vec::new(),
        }
    }

    /// Returns `true` if no file was selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Returns the amount of selected files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns the size of all selected files in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.files.iter().map(|f| f.file_size).sum()
    }

    /// Returns the user key range of the selected files.
    #[must_use]
    pub fn key_range(&self) -> Option<KeyRange> {
        let ranges = self.files.iter().map(|f| f.key_range()).collect::<Vec<_>>();
        KeyRange::aggregate(ranges.iter())
    }
}

/// A compaction plan
///
/// The picker claims the input files when it hands out a plan.
/// The caller must either complete or release it.
#[derive(Clone, Debug)]
pub struct Compaction {
    pub(crate) inputs: Vec<CompactionInputFiles>,
    pub(crate) output_level: usize,
    pub(crate) max_output_file_size: u64,
    pub(crate) max_grandparent_overlap_bytes: u64,
    pub(crate) output_path_id: usize,
    pub(crate) compression: CompressionType,
    pub(crate) grandparents: Vec<Arc<FileMetadata>>,
    pub(crate) is_trivial_move: bool,
    pub(crate) score: f64,
    pub(crate) reason: CompactionReason,
}

impl Compaction {
    /// Returns the input groups, one per level spanned, starting at the start level.
    #[must_use]
    pub fn inputs(&self) -> &[CompactionInputFiles] {
        &self.inputs
    }

    /// Returns the level of the newest inputs.
    #[must_use]
    pub fn start_level(&self) -> usize {
        self.inputs.first().map_or(0, |group| group.level)
    }

    /// Returns the level the output is written to.
    #[must_use]
    pub fn output_level(&self) -> usize {
        self.output_level
    }

    /// Returns the maximum size of an output file.
    #[must_use]
    pub fn max_output_file_size(&self) -> u64 {
        self.max_output_file_size
    }

    /// Returns the bytes an output file may overlap with grandparent files.
    #[must_use]
    pub fn max_grandparent_overlap_bytes(&self) -> u64 {
        self.max_grandparent_overlap_bytes
    }

    /// Returns the index of the storage path to write output files to.
    #[must_use]
    pub fn output_path_id(&self) -> usize {
        self.output_path_id
    }

    /// Returns the compression of output files.
    #[must_use]
    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    /// Returns the files below the output level that overlap the inputs.
    #[must_use]
    pub fn grandparents(&self) -> &[Arc<FileMetadata>] {
        &self.grandparents
    }

    /// Returns `true` if the inputs can be moved without merging.
    #[must_use]
    pub fn is_trivial_move(&self) -> bool {
        self.is_trivial_move
    }

    /// Returns the level 0 score at the time of picking.
    #[must_use]
    pub fn score(&self) -> f64 {
        self.score
    }

    /// Returns why the compaction was picked.
    #[must_use]
    pub fn reason(&self) -> CompactionReason {
        self.reason
    }

    /// Returns `false`, the picker never produces manual compactions.
    #[must_use]
    pub fn is_manual(&self) -> bool {
        false
    }

    /// Returns the amount of input files.
    #[must_use]
    pub fn num_input_files(&self) -> usize {
        self.inputs.iter().map(CompactionInputFiles::len).sum()
    }

    /// Returns the size of all input files in bytes.
    #[must_use]
    pub fn total_input_size(&self) -> u64 {
        self.inputs.iter().map(CompactionInputFiles::size).sum()
    }

    /// Returns an iterator over all input files.
    pub fn input_files(&self) -> impl Iterator<Item = &Arc<FileMetadata>> {
        self.inputs.iter().flat_map(|group| group.files.iter())
    }

    /// Returns the IDs of all input files.
    #[must_use]
    pub fn input_file_ids(&self) -> HashSet<FileId> {
        self.input_files().map(|f| f.id).collect()
    }

    /// Returns the user key range covered by all inputs.
    #[must_use]
    pub fn key_range(&self) -> Option<KeyRange> {
        let ranges = self.input_files().map(|f| f.key_range()).collect::<Vec<_>>();
        KeyRange::aggregate(ranges.iter())
    }

    /// Checks the plan against the storage state it was picked from.
    ///
    /// A valid plan has at least one input, claims no file that is already
    /// being compacted, claims no file twice, and its groups are ordered
    /// by level between the start and the output level.
    #[must_use]
    pub fn is_valid<V: StorageStateView + ?Sized>(&self, view: &V) -> bool {
        if self.num_input_files() == 0 {
            return false;
        }

        if self.input_files().any(|f| view.is_being_compacted(f.id)) {
            return false;
        }

        if self.input_file_ids().len() != self.num_input_files() {
            return false;
        }

        let start_level = self.start_level();

        self.inputs
            .windows(2)
            .all(|w| matches!(w, [a, b] if a.level < b.level))
            && self
                .inputs
                .iter()
                .all(|group| group.level >= start_level && group.level <= self.output_level)
    }
}

/// Trait for a compaction picker
///
/// The picker reads the storage state of a column family and either
/// emits a compaction, claiming its inputs, or nothing.
#[allow(clippy::module_name_repetitions)]
pub trait CompactionPicker {
    /// Gets the picker's name.
    fn get_name(&self) -> &'static str;

    /// Cheap check whether picking could produce a compaction.
    fn needs_compaction(&self, view: &dyn StorageStateView) -> bool;

    /// Picks a compaction and claims its input files.
    ///
    /// Returns `None` if nothing needs to be compacted right now.
    fn pick_compaction(&self, cf_name: &str, state: &mut dyn StorageState) -> Option<Compaction>;
}

#[cfg(test)]
pub(crate) fn test_fixture(inputs: Vec<CompactionInputFiles>, output_level: usize) -> Compaction {
    Compaction {
        inputs,
        output_level,
        max_output_file_size: u64::MAX,
        max_grandparent_overlap_bytes: u64::MAX,
        output_path_id: 0,
        compression: CompressionType::None,
        grandparents: Vec::new(),
        is_trivial_move: false,
        score: 0.0,
        reason: CompactionReason::UniversalSizeRatio,
    }
}
