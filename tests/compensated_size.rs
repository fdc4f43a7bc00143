use rand::{Rng, SeedableRng};
use std::sync::Arc;
use test_log::test;
use universal_compaction::{
    calculate_sorted_runs, FileId, FileMetadata, InternalKey, ValueType, VersionStorage,
};

fn file(id: FileId, size: u64, items: u64, tombstones: u64) -> Arc<FileMetadata> {
    Arc::new(
        FileMetadata::new(
            id,
            size,
            InternalKey::new(format!("{id:05}"), 1, ValueType::Value),
            InternalKey::new(format!("{id:05}"), 1, ValueType::Value),
        )
        .with_counts(items, tombstones),
    )
}

#[test]
fn compensated_size_never_below_file_size() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);

    for id in 0..10_000 {
        let size = rng.random_range(0..1_000_000);
        let items = rng.random_range(0..1_000);
        let tombstones = rng.random_range(0..=items);

        let file = file(id, size, items, tombstones);
        let compensated = file.compensated_file_size();

        assert!(compensated >= 1);
        assert!(compensated >= size);

        if tombstones * 2 < items {
            assert_eq!(size.max(1), compensated);
        }
    }
}

#[test]
fn compensated_size_sorted_runs_positive() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(8);

    let l0 = (0..20)
        .map(|id| file(id, rng.random_range(0..100), 10, rng.random_range(0..=10)))
        .collect::<Vec<_>>();
    let l1 = (20..40)
        .map(|id| file(id, rng.random_range(0..100), 10, rng.random_range(0..=10)))
        .collect::<Vec<_>>();

    let state = VersionStorage::from_levels(vec![l0, l1]);
    let runs = calculate_sorted_runs(&state);

    assert_eq!(21, runs.len());

    for run in runs {
        assert!(run.compensated_size > 0, "{run} has no compensated size");
        assert!(run.compensated_size >= run.size);
        assert_eq!(run.is_level0(), run.file.is_some());
    }
}
