use std::{collections::HashSet, sync::Arc};
use test_log::test;
use universal_compaction::{
    Compaction, CompactionPicker, CompactionReason, Config, FileId, FileMetadata,
    InFlightCompaction, InternalKey, StorageState, StorageStateView, Universal, UniversalOptions,
    ValueType, VersionStorage,
};

fn file(id: FileId, size: u64) -> Arc<FileMetadata> {
    Arc::new(FileMetadata::new(
        id,
        size,
        InternalKey::new("a", id, ValueType::Value),
        InternalKey::new("z", id, ValueType::Value),
    ))
}

fn ids(compaction: &Compaction) -> Vec<FileId> {
    compaction.input_files().map(|f| f.id).collect()
}

/// Storage state where some files are claimed by someone else
struct ExternallyClaimed {
    inner: VersionStorage,
    claimed: HashSet<FileId>,
}

impl StorageStateView for ExternallyClaimed {
    fn level_count(&self) -> usize {
        self.inner.level_count()
    }

    fn level_files(&self, level: usize) -> &[Arc<FileMetadata>] {
        self.inner.level_files(level)
    }

    fn is_being_compacted(&self, id: FileId) -> bool {
        self.claimed.contains(&id) || self.inner.is_being_compacted(id)
    }

    fn compaction_score(&self, level: usize) -> f64 {
        self.inner.compaction_score(level)
    }

    fn files_marked_for_periodic_compaction(&self) -> &[(usize, Arc<FileMetadata>)] {
        self.inner.files_marked_for_periodic_compaction()
    }

    fn files_marked_for_compaction(&self) -> &[(usize, Arc<FileMetadata>)] {
        self.inner.files_marked_for_compaction()
    }

    fn in_flight_compactions(&self) -> &[InFlightCompaction] {
        self.inner.in_flight_compactions()
    }
}

impl StorageState for ExternallyClaimed {
    fn register_compaction(&mut self, compaction: &Compaction) {
        self.inner.register_compaction(compaction);
    }

    fn release_compaction(&mut self, compaction: &Compaction) {
        self.inner.release_compaction(compaction);
    }

    fn compute_compaction_score(&mut self, config: &Config) {
        self.inner.compute_compaction_score(config);
    }
}

#[test]
fn scenario_size_ratio_equal_l0_files() {
    for (level_count, expected_output) in [(1, 0), (7, 6)] {
        let config = Config::default()
            .level_count(level_count)
            .level0_file_num_compaction_trigger(4)
            .universal(UniversalOptions {
                size_ratio: 1,
                max_size_amplification_percent: 1_000,
                ..Default::default()
            });

        let mut levels = vec![(0..4).map(|id| file(id, 100)).collect::<Vec<_>>()];
        levels.resize(usize::from(level_count), Vec::new());

        let mut state = VersionStorage::from_levels(levels);
        state.compute_compaction_score(&config);

        let picker = Universal::new(config);
        let compaction = picker
            .pick_compaction("default", &mut state)
            .expect("should pick");

        assert_eq!(CompactionReason::UniversalSizeRatio, compaction.reason());
        assert_eq!(vec![0, 1, 2, 3], ids(&compaction));
        assert_eq!(expected_output, compaction.output_level());
    }
}

fn size_amp_state(oldest_size: u64) -> (Universal, VersionStorage) {
    let config = Config::default()
        .level0_file_num_compaction_trigger(2)
        .universal(UniversalOptions {
            max_size_amplification_percent: 25,
            ..Default::default()
        });

    let mut state = VersionStorage::from_levels(vec![
        vec![file(1, 10)],
        vec![],
        vec![],
        vec![],
        vec![],
        vec![],
        vec![file(2, oldest_size)],
    ]);
    state.compute_compaction_score(&config);

    (Universal::new(config), state)
}

#[test]
fn scenario_size_amp_not_needed() {
    let (picker, mut state) = size_amp_state(1_000);
    assert!(picker.pick_compaction("default", &mut state).is_none());
}

#[test]
fn scenario_size_amp_needed() {
    let (picker, mut state) = size_amp_state(30);

    let compaction = picker
        .pick_compaction("default", &mut state)
        .expect("should pick");

    assert_eq!(
        CompactionReason::UniversalSizeAmplification,
        compaction.reason()
    );
    assert_eq!(vec![1, 2], ids(&compaction));
    assert_eq!(0, compaction.start_level());
    assert_eq!(6, compaction.output_level());
}

#[test]
fn scenario_delete_triggered_single_level() {
    let config = Config::default()
        .level_count(1)
        .level0_file_num_compaction_trigger(10);

    let marked = Arc::new(
        FileMetadata::new(
            3,
            10,
            InternalKey::new("a", 3, ValueType::Value),
            InternalKey::new("z", 3, ValueType::Value),
        )
        .mark_for_compaction(),
    );

    // Newest first
    let l0 = vec![
        file(1, 10),
        file(2, 10),
        marked,
        file(4, 10),
        file(5, 10),
        file(6, 10),
        file(7, 10),
    ];

    let mut state = ExternallyClaimed {
        inner: VersionStorage::from_levels(vec![l0]),
        claimed: [1, 6].into_iter().collect(),
    };
    state.compute_compaction_score(&config);

    let picker = Universal::new(config);
    let compaction = picker
        .pick_compaction("default", &mut state)
        .expect("should pick");

    assert_eq!(CompactionReason::FilesMarkedForCompaction, compaction.reason());
    assert_eq!(vec![3, 4, 5], ids(&compaction));
    assert_eq!(0, compaction.output_level());

    state.claimed.clear();
    state.release_compaction(&compaction);
    state.compute_compaction_score(picker.config());

    let compaction = picker
        .pick_compaction("default", &mut state)
        .expect("should pick");
    assert_eq!(vec![3, 4, 5, 6, 7], ids(&compaction));
}

#[test]
fn scenario_periodic_before_size_amp() {
    let config = Config::default()
        .level0_file_num_compaction_trigger(2)
        .periodic_compaction_seconds(60)
        .universal(UniversalOptions {
            max_size_amplification_percent: 25,
            ..Default::default()
        });

    let old = Arc::new(
        FileMetadata::new(
            2,
            30,
            InternalKey::new("a", 1, ValueType::Value),
            InternalKey::new("z", 1, ValueType::Value),
        )
        .with_created_at(1_000),
    );

    let mut state = VersionStorage::from_levels(vec![
        vec![file(1, 10)],
        vec![],
        vec![],
        vec![],
        vec![],
        vec![],
        vec![old],
    ])
    .with_current_time(10_000);
    state.compute_compaction_score(&config);

    let picker = Universal::new(config);
    let compaction = picker
        .pick_compaction("default", &mut state)
        .expect("should pick");

    assert_eq!(CompactionReason::PeriodicCompaction, compaction.reason());
    assert_eq!(vec![1, 2], ids(&compaction));
}
