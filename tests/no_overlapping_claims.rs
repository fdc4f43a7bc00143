use rand::{Rng, SeedableRng};
use std::{collections::HashSet, sync::Arc};
use test_log::test;
use universal_compaction::{
    Compaction, CompactionPicker, Config, FileId, FileMetadata, InternalKey, StorageState,
    StorageStateView, Universal, UniversalOptions, ValueType, VersionStorage,
};

fn file(id: FileId, min: u32, max: u32, size: u64, tombstones: u64) -> Arc<FileMetadata> {
    Arc::new(
        FileMetadata::new(
            id,
            size,
            InternalKey::new(format!("{min:05}"), id, ValueType::Value),
            InternalKey::new(format!("{max:05}"), id, ValueType::Value),
        )
        .with_counts(100, tombstones),
    )
}

/// Completes a compaction with a single output file covering its key range
fn finish(state: &mut VersionStorage, compaction: &Compaction, next_id: &mut FileId) {
    let range = compaction.key_range().expect("inputs should not be empty");

    *next_id += 1;

    let output = Arc::new(FileMetadata::new(
        *next_id,
        compaction.total_input_size(),
        InternalKey::new(range.min().clone(), *next_id, ValueType::Value),
        InternalKey::new(range.max().clone(), *next_id, ValueType::Value),
    ));

    state.complete_compaction(compaction, vec![output]);
}

fn simulate(seed: u64, options: UniversalOptions) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);

    let config = Config::default()
        .level0_file_num_compaction_trigger(4)
        .universal(options);
    let picker = Universal::new(config.clone());

    let mut state = VersionStorage::new(7);
    let mut running: Vec<Compaction> = Vec::new();
    let mut next_id = 0;

    for _ in 0..300 {
        if rng.random_bool(0.6) {
            let min = rng.random_range(0..10_000);
            let max = min + rng.random_range(0..2_000);
            let tombstones = if rng.random_bool(0.1) { 90 } else { 0 };

            next_id += 1;
            state.add_flushed_file(file(next_id, min, max, rng.random_range(1..1_000), tombstones));
        }

        state.compute_compaction_score(&config);

        if let Some(compaction) = picker.pick_compaction("default", &mut state) {
            let claimed = running
                .iter()
                .flat_map(|c| c.input_files().map(|f| f.id))
                .collect::<HashSet<_>>();

            for f in compaction.input_files() {
                assert!(
                    !claimed.contains(&f.id),
                    "seed {seed}: file #{} claimed twice",
                    f.id
                );
                assert!(state.is_being_compacted(f.id));
            }

            running.push(compaction);
        }

        if !running.is_empty() && rng.random_bool(0.4) {
            let idx = rng.random_range(0..running.len());
            let compaction = running.swap_remove(idx);
            finish(&mut state, &compaction, &mut next_id);
        }
    }

    for compaction in running.drain(..) {
        finish(&mut state, &compaction, &mut next_id);
    }

    assert!(state.hidden_set().is_empty());
    assert!(state.in_flight_compactions().is_empty());
}

#[test]
fn no_overlapping_claims_default() {
    for seed in 0..20 {
        simulate(seed, UniversalOptions::default());
    }
}

#[test]
fn no_overlapping_claims_trivial_move() {
    for seed in 0..20 {
        simulate(
            seed,
            UniversalOptions {
                allow_trivial_move: true,
                max_size_amplification_percent: 400,
                ..Default::default()
            },
        );
    }
}
