// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A universal-style compaction picker for log-structured merge trees.
//!
//! Given the current set of on-disk files per level, the picker decides which
//! files should be merged next, into which level, and under which resource
//! constraints. It features:
//!
//! - Size-ratio merging of similarly sized sorted runs (read amplification)
//! - Size-amplification bounding, either full or incremental (space amplification)
//! - Delete-triggered compaction of files dense with tombstones
//! - Periodic compaction of old files
//! - Trivial move detection for non-overlapping inputs
//! - Multi-path output placement
//!
//! It is not:
//!
//! - a compaction executor: it never reads or writes table files
//! - a storage engine: file metadata is supplied by the caller
//!
//! Sorted runs are computed from the per-level file lists on every pick.
//! Level 0 files are each their own sorted run, every other level is one sorted run.
//!
//! ```
//! use universal_compaction::{
//!     CompactionPicker, CompactionReason, Config, FileMetadata, InternalKey, StorageState,
//!     Universal, UniversalOptions, ValueType, VersionStorage,
//! };
//! use std::sync::Arc;
//!
//! let config = Config::default()
//!     .level_count(1)
//!     .level0_file_num_compaction_trigger(4)
//!     .universal(UniversalOptions {
//!         max_size_amplification_percent: 1_000,
//!         ..Default::default()
//!     });
//!
//! // Four equally sized flushes in L0, newest first
//! let l0 = (0..4)
//!     .map(|id| {
//!         Arc::new(FileMetadata::new(
//!             id,
//!             100,
//!             InternalKey::new("a", 10 - id, ValueType::Value),
//!             InternalKey::new("z", 10 - id, ValueType::Value),
//!         ))
//!     })
//!     .collect();
//!
//! let mut state = VersionStorage::from_levels(vec![l0]);
//! state.compute_compaction_score(&config);
//!
//! let picker = Universal::new(config);
//! assert!(picker.needs_compaction(&state));
//!
//! let compaction = picker.pick_compaction("default", &mut state).expect("should pick");
//! assert_eq!(CompactionReason::UniversalSizeRatio, compaction.reason());
//! assert_eq!(4, compaction.num_input_files());
//! assert_eq!(0, compaction.output_level());
//!
//! // The inputs are now claimed, so nothing else can be picked
//! assert!(picker.pick_compaction("default", &mut state).is_none());
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, clippy::cargo)]
#![warn(missing_docs)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]

mod coding;
pub mod compaction;
mod config;
mod error;
mod file;
mod key_range;
mod sorted_run;
mod time;
mod value;
mod version;

pub(crate) type HashMap<K, V> = std::collections::HashMap<K, V, xxhash_rust::xxh3::Xxh3Builder>;
pub(crate) type HashSet<K> = std::collections::HashSet<K, xxhash_rust::xxh3::Xxh3Builder>;

pub use {
    coding::{DecodeConfig, DecodeError, EncodeConfig, KvPair},
    compaction::{
        manager::CompactionManager, universal::Strategy as Universal, Compaction,
        CompactionInputFiles, CompactionPicker, CompactionReason,
    },
    config::{CompressionPolicy, CompressionType, Config, DbPath, StopStyle, UniversalOptions},
    error::{Error, Result},
    file::{FileId, FileMetadata},
    key_range::KeyRange,
    sorted_run::{calculate_sorted_runs, calculate_sorted_runs_up_to, SortedRun},
    value::{InternalKey, SeqNo, UserKey, ValueType},
    version::{
        overlap, HiddenSet, InFlightCompaction, StorageState, StorageStateView, VersionStorage,
    },
};
