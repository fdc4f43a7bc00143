// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{Error, Result};
use std::path::PathBuf;

/// Compression algorithm to use for output files
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CompressionType {
    /// No compression
    None,

    /// LZ4 compression
    Lz4,

    /// zlib/DEFLATE compression
    ///
    /// Compression level (0-10) can be adjusted.
    Miniz(u8),
}

impl std::fmt::Display for CompressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Lz4 => write!(f, "lz4"),
            Self::Miniz(level) => write!(f, "miniz({level})"),
        }
    }
}

/// Compression policy, one entry per level
///
/// Levels beyond the policy's length use the last entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompressionPolicy(Vec<CompressionType>);

impl std::ops::Deref for CompressionPolicy {
    type Target = [CompressionType];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl CompressionPolicy {
    /// Uses the same compression in every level.
    #[must_use]
    pub fn all(c: CompressionType) -> Self {
        Self(vec![c])
    }

    /// Constructs a custom policy.
    ///
    /// # Panics
    ///
    /// Panics if the policy is empty or contains more than 255 elements.
    #[must_use]
    pub fn new(policy: impl Into<Vec<CompressionType>>) -> Self {
        let policy = policy.into();
        assert!(!policy.is_empty(), "compression policy may not be empty");
        assert!(policy.len() <= 255, "compression policy is too large");
        Self(policy)
    }

    /// Returns the compression of the given policy index.
    ///
    /// Indexes past the end use the last entry.
    #[must_use]
    pub fn get(&self, idx: usize) -> CompressionType {
        self.0
            .get(idx)
            .or_else(|| self.0.last())
            .copied()
            .unwrap_or(CompressionType::None)
    }
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self::all(CompressionType::Lz4)
    }
}

/// Decides when the size-ratio scan stops growing a candidate range
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum StopStyle {
    /// Stops when the next sorted run is not similar in size to the
    /// previously picked one
    ///
    /// The accumulated size is reset to the last picked run.
    SimilarSize,

    /// Stops when the next sorted run is larger than the total
    /// size of the runs picked so far
    #[default]
    TotalSize,
}

/// Options that shape universal compaction
#[derive(Clone, Debug, Eq, PartialEq)]
#[allow(clippy::module_name_repetitions)]
pub struct UniversalOptions {
    /// Percentage flexibility while comparing sorted run sizes
    ///
    /// Defaults to 1.
    pub size_ratio: u32,

    /// Minimum number of sorted runs to merge in one compaction
    ///
    /// Values below 2 are treated as 2.
    pub min_merge_width: u32,

    /// Maximum number of sorted runs to merge in one compaction
    ///
    /// Defaults to unlimited.
    pub max_merge_width: u32,

    /// Size amplification, in percent, that triggers a compaction
    /// towards the oldest sorted run
    ///
    /// Defaults to 200.
    pub max_size_amplification_percent: u32,

    /// Skip compressing size-ratio outputs while the older data already
    /// makes up at least this percentage of the total size
    ///
    /// -1 (the default) always compresses.
    pub compression_size_percent: i32,

    /// Stop style of the size-ratio scan
    pub stop_style: StopStyle,

    /// Marks a compaction as trivial move if its inputs do not overlap
    pub allow_trivial_move: bool,

    /// Bounds size-amplification and sorted-run reduction by
    /// `max_compaction_bytes` instead of rewriting whole levels
    pub incremental: bool,
}

impl Default for UniversalOptions {
    fn default() -> Self {
        Self {
            size_ratio: 1,
            min_merge_width: 2,
            max_merge_width: u32::MAX,
            max_size_amplification_percent: 200,
            compression_size_percent: -1,
            stop_style: StopStyle::default(),
            allow_trivial_move: false,
            incremental: false,
        }
    }
}

/// A storage path output files may be placed in
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DbPath {
    /// Folder path
    pub path: PathBuf,

    /// Capacity this path should hold
    pub target_size: u64,
}

impl DbPath {
    /// Creates a new storage path.
    pub fn new<P: Into<PathBuf>>(path: P, target_size: u64) -> Self {
        Self {
            path: path.into(),
            target_size,
        }
    }
}

const DEFAULT_TARGET_FILE_SIZE_BASE: u64 = 64 * 1_024 * 1_024;

/// Picker configuration
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Amount of levels of the LSM tree (depth of tree)
    ///
    /// Defaults to 7, like `RocksDB`
    pub(crate) level_count: u8,

    /// Number of sorted runs that triggers compaction
    ///
    /// Defaults to 4
    pub(crate) level0_file_num_compaction_trigger: u32,

    /// Upper bound of bytes a single compaction should read
    ///
    /// 0 means unlimited. Defaults to 25 * `target_file_size_base`
    pub(crate) max_compaction_bytes: u64,

    /// Target size of output files in L1
    ///
    /// Defaults to 64 MiB
    pub(crate) target_file_size_base: u64,

    /// Growth factor of the target file size per level
    ///
    /// Defaults to 1
    pub(crate) target_file_size_multiplier: u32,

    /// Storage paths, in order of preference
    pub(crate) db_paths: Vec<DbPath>,

    /// Reserves the last level for files ingested behind all other data
    pub(crate) allow_ingest_behind: bool,

    /// Files older than this are rewritten, 0 disables periodic compaction
    pub(crate) periodic_compaction_seconds: u64,

    /// Files whose tombstone ratio reaches this value are marked for compaction
    ///
    /// Defaults to 0.5
    pub(crate) tombstone_ratio_trigger: Option<f32>,

    /// Compression per level
    pub(crate) compression: CompressionPolicy,

    /// Compression of the bottommost level, overrides the policy
    pub(crate) bottommost_compression: Option<CompressionType>,

    /// Universal compaction options
    pub(crate) universal: UniversalOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level_count: 7,
            level0_file_num_compaction_trigger: 4,
            max_compaction_bytes: 25 * DEFAULT_TARGET_FILE_SIZE_BASE,
            target_file_size_base: DEFAULT_TARGET_FILE_SIZE_BASE,
            target_file_size_multiplier: 1,
            db_paths: vec![DbPath::new(".", u64::MAX)],
            allow_ingest_behind: false,
            periodic_compaction_seconds: 0,
            tombstone_ratio_trigger: Some(0.5),
            compression: CompressionPolicy::default(),
            bottommost_compression: None,
            universal: UniversalOptions::default(),
        }
    }
}

impl Config {
    /// Sets the amount of levels of the LSM tree (default: 7).
    #[must_use]
    pub fn level_count(mut self, n: u8) -> Self {
        self.level_count = n;
        self
    }

    /// Sets the number of sorted runs that triggers compaction (default: 4).
    #[must_use]
    pub fn level0_file_num_compaction_trigger(mut self, n: u32) -> Self {
        self.level0_file_num_compaction_trigger = n;
        self
    }

    /// Sets the upper bound of bytes per compaction, 0 meaning unlimited.
    #[must_use]
    pub fn max_compaction_bytes(mut self, bytes: u64) -> Self {
        self.max_compaction_bytes = bytes;
        self
    }

    /// Sets the target output file size of L1 (default: 64 MiB).
    #[must_use]
    pub fn target_file_size_base(mut self, bytes: u64) -> Self {
        self.target_file_size_base = bytes;
        self
    }

    /// Sets the per-level growth factor of the target file size (default: 1).
    #[must_use]
    pub fn target_file_size_multiplier(mut self, n: u32) -> Self {
        self.target_file_size_multiplier = n;
        self
    }

    /// Sets the storage paths output files may be placed in.
    #[must_use]
    pub fn db_paths(mut self, paths: Vec<DbPath>) -> Self {
        self.db_paths = paths;
        self
    }

    /// Reserves the last level for ingested files.
    #[must_use]
    pub fn allow_ingest_behind(mut self, b: bool) -> Self {
        self.allow_ingest_behind = b;
        self
    }

    /// Sets the file age after which files are rewritten, 0 meaning never.
    #[must_use]
    pub fn periodic_compaction_seconds(mut self, secs: u64) -> Self {
        self.periodic_compaction_seconds = secs;
        self
    }

    /// Sets the tombstone ratio that marks a file for compaction.
    ///
    /// `None` only honors files that were explicitly marked.
    #[must_use]
    pub fn tombstone_ratio_trigger(mut self, ratio: Option<f32>) -> Self {
        self.tombstone_ratio_trigger = ratio;
        self
    }

    /// Sets the compression policy.
    #[must_use]
    pub fn compression(mut self, policy: CompressionPolicy) -> Self {
        self.compression = policy;
        self
    }

    /// Sets the compression of the bottommost level.
    #[must_use]
    pub fn bottommost_compression(mut self, c: Option<CompressionType>) -> Self {
        self.bottommost_compression = c;
        self
    }

    /// Sets the universal compaction options.
    #[must_use]
    pub fn universal(mut self, options: UniversalOptions) -> Self {
        self.universal = options;
        self
    }

    /// Returns the amount of levels.
    #[must_use]
    pub fn get_level_count(&self) -> usize {
        usize::from(self.level_count)
    }

    /// Returns the universal compaction options.
    #[must_use]
    pub fn get_universal(&self) -> &UniversalOptions {
        &self.universal
    }

    /// Returns the byte budget of a compaction, `u64::MAX` if unlimited.
    #[must_use]
    pub fn get_max_compaction_bytes(&self) -> u64 {
        if self.max_compaction_bytes == 0 {
            u64::MAX
        } else {
            self.max_compaction_bytes
        }
    }

    /// Returns the last level output may go to.
    ///
    /// This is the bottommost level, unless it is reserved for ingestion.
    #[must_use]
    pub fn max_output_level(&self) -> usize {
        let last_level = self.get_level_count().saturating_sub(1);

        if self.allow_ingest_behind {
            last_level.saturating_sub(1)
        } else {
            last_level
        }
    }

    /// Returns the maximum size of an output file in the given level.
    ///
    /// L0 output files are unbounded in universal compaction.
    #[must_use]
    pub fn max_file_size_for_level(&self, level: usize) -> u64 {
        if level == 0 {
            return u64::MAX;
        }

        let mut size = self.target_file_size_base;
        for _ in 1..level {
            size = size.saturating_mul(u64::from(self.target_file_size_multiplier));
        }
        size
    }

    /// Returns the bytes an output file may overlap in the level below
    /// the output level before a new file is started.
    #[must_use]
    pub fn max_grandparent_overlap_bytes(&self) -> u64 {
        if self.universal.incremental {
            self.target_file_size_base / 2 * 3
        } else {
            u64::MAX
        }
    }

    /// Returns the compression of output files in the given level.
    ///
    /// Returns [`CompressionType::None`] if compression is disabled.
    #[must_use]
    pub fn compression_for_level(
        &self,
        level: usize,
        non_empty_levels: usize,
        enable_compression: bool,
    ) -> CompressionType {
        if !enable_compression {
            return CompressionType::None;
        }

        if let Some(bottommost) = self.bottommost_compression {
            if level > 0 && level >= non_empty_levels.saturating_sub(1) {
                return bottommost;
            }
        }

        self.compression.get(level)
    }

    /// Checks the configuration for values the picker cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first offending value.
    pub fn validate(&self) -> Result<()> {
        if self.level_count == 0 {
            return Err(Error::InvalidConfig("level_count may not be 0"));
        }

        if self.level0_file_num_compaction_trigger == 0 {
            return Err(Error::InvalidConfig(
                "level0_file_num_compaction_trigger may not be 0",
            ));
        }

        if self.db_paths.is_empty() {
            return Err(Error::InvalidConfig("at least one db path is required"));
        }

        if self.allow_ingest_behind && self.level_count < 3 {
            return Err(Error::InvalidConfig(
                "allow_ingest_behind requires at least 3 levels",
            ));
        }

        if self.universal.max_merge_width < self.universal.min_merge_width.max(2) {
            return Err(Error::InvalidConfig(
                "max_merge_width may not be smaller than min_merge_width",
            ));
        }

        if self.target_file_size_base == 0 {
            return Err(Error::InvalidConfig("target_file_size_base may not be 0"));
        }

        if self
            .tombstone_ratio_trigger
            .is_some_and(|r| r.is_nan() || r <= 0.0 || r > 1.0)
        {
            return Err(Error::InvalidConfig(
                "tombstone_ratio_trigger must be in (0, 1]",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn config_default_is_valid() -> crate::Result<()> {
        Config::default().validate()
    }

    #[test]
    fn config_reject_zero_trigger() {
        let config = Config::default().level0_file_num_compaction_trigger(0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn config_reject_narrow_merge_width() {
        let config = Config::default().universal(UniversalOptions {
            min_merge_width: 4,
            max_merge_width: 3,
            ..Default::default()
        });
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn config_reject_ingest_behind_shallow() {
        let config = Config::default().level_count(2).allow_ingest_behind(true);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn config_max_file_size_for_level() {
        let config = Config::default()
            .target_file_size_base(100)
            .target_file_size_multiplier(10);

        assert_eq!(u64::MAX, config.max_file_size_for_level(0));
        assert_eq!(100, config.max_file_size_for_level(1));
        assert_eq!(1_000, config.max_file_size_for_level(2));
        assert_eq!(10_000, config.max_file_size_for_level(3));
    }

    #[test]
    fn config_max_output_level() {
        assert_eq!(6, Config::default().max_output_level());
        assert_eq!(5, Config::default().allow_ingest_behind(true).max_output_level());
        assert_eq!(0, Config::default().level_count(1).max_output_level());
    }

    #[test]
    fn config_grandparent_overlap() {
        let config = Config::default().target_file_size_base(100);
        assert_eq!(u64::MAX, config.max_grandparent_overlap_bytes());

        let config = config.universal(UniversalOptions {
            incremental: true,
            ..Default::default()
        });
        assert_eq!(150, config.max_grandparent_overlap_bytes());
    }

    #[test]
    fn config_compression_for_level() {
        let config = Config::default()
            .compression(CompressionPolicy::new([
                CompressionType::None,
                CompressionType::Lz4,
            ]))
            .bottommost_compression(Some(CompressionType::Miniz(6)));

        assert_eq!(CompressionType::None, config.compression_for_level(0, 4, true));
        assert_eq!(CompressionType::Lz4, config.compression_for_level(1, 4, true));
        assert_eq!(CompressionType::Lz4, config.compression_for_level(2, 4, true));
        assert_eq!(
            CompressionType::Miniz(6),
            config.compression_for_level(3, 4, true)
        );
        assert_eq!(
            CompressionType::None,
            config.compression_for_level(3, 4, false)
        );
    }
}
