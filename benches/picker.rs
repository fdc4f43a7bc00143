use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::{hint::black_box, sync::Arc};
use universal_compaction::{
    calculate_sorted_runs, compaction::is_input_files_non_overlapping, CompactionPicker, Config,
    FileId, FileMetadata, InternalKey, StorageState, Universal, ValueType, VersionStorage,
};

fn file(id: FileId, min: u64, max: u64, size: u64) -> Arc<FileMetadata> {
    Arc::new(FileMetadata::new(
        id,
        size,
        InternalKey::new(format!("{min:08}"), id, ValueType::Value),
        InternalKey::new(format!("{max:08}"), id, ValueType::Value),
    ))
}

/// Builds a tree with `l0_count` overlapping L0 files on top of
/// six levels of disjoint files
fn tree(l0_count: u64) -> VersionStorage {
    let mut id = 0;
    let mut levels = vec![];

    levels.push(
        (0..l0_count)
            .map(|_| {
                id += 1;
                file(id, 0, 1_000_000, 64 * 1_024)
            })
            .collect::<Vec<_>>(),
    );

    for level in 1..7 {
        let count = 10u64.pow(level.min(4));
        let width = 1_000_000 / count;

        levels.push(
            (0..count)
                .map(|idx| {
                    id += 1;
                    file(id, idx * width, (idx + 1) * width - 1, 64 * 1_024 * 1_024)
                })
                .collect(),
        );
    }

    VersionStorage::from_levels(levels)
}

fn pick_compaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("pick compaction");

    for l0_count in [4, 20, 100] {
        let config = Config::default();
        let picker = Universal::new(config.clone());

        let mut state = tree(l0_count);
        state.compute_compaction_score(&config);

        group.bench_with_input(BenchmarkId::from_parameter(l0_count), &l0_count, |b, _| {
            b.iter(|| {
                if let Some(compaction) = picker.pick_compaction("default", &mut state) {
                    state.release_compaction(&compaction);
                    state.compute_compaction_score(&config);
                }
            });
        });
    }

    group.finish();
}

fn sorted_runs(c: &mut Criterion) {
    let state = tree(100);

    c.bench_function("calculate sorted runs", |b| {
        b.iter(|| calculate_sorted_runs(black_box(&state)));
    });
}

fn trivial_move_check(c: &mut Criterion) {
    let config = Config::default().level0_file_num_compaction_trigger(2);
    let picker = Universal::new(config.clone());

    let mut state = tree(10);
    state.compute_compaction_score(&config);

    let Some(compaction) = picker.pick_compaction("default", &mut state) else {
        return;
    };

    c.bench_function("input files non-overlapping", |b| {
        b.iter(|| is_input_files_non_overlapping(black_box(compaction.inputs())));
    });
}

criterion_group!(benches, pick_compaction, sorted_runs, trivial_move_check);
criterion_main!(benches);
