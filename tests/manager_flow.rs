use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use test_log::test;
use universal_compaction::{
    CompactionManager, Config, FileId, FileMetadata, InternalKey, ValueType, VersionStorage,
};

fn file(id: FileId, size: u64) -> Arc<FileMetadata> {
    Arc::new(FileMetadata::new(
        id,
        size,
        InternalKey::new("a", id, ValueType::Value),
        InternalKey::new("z", id, ValueType::Value),
    ))
}

#[test]
fn manager_flush_and_compact() -> universal_compaction::Result<()> {
    let manager = CompactionManager::default();
    let next_id = AtomicU64::new(0);

    manager.register_column_family("default", Config::default(), VersionStorage::new(7))?;
    manager.register_column_family(
        "other",
        Config::default().level0_file_num_compaction_trigger(2),
        VersionStorage::new(7),
    )?;

    for _ in 0..4 {
        manager.with_state("default", |state| {
            state.add_flushed_file(file(next_id.fetch_add(1, Ordering::Relaxed), 100));
        })?;
        manager.notify("default");
    }

    let mut compactions = 0;

    while let Some(name) = manager.pop() {
        manager.wait_for();

        if !manager.needs_compaction(&name)? {
            continue;
        }

        if let Some(compaction) = manager.pick(&name)? {
            let output = file(next_id.fetch_add(1, Ordering::Relaxed), compaction.total_input_size());
            manager.complete(&name, &compaction, vec![output])?;
            compactions += 1;
        }
    }

    assert_eq!(1, compactions);

    let (file_count, size) = manager.with_state("default", |state| (state.file_count(), state.size()))?;
    assert_eq!(1, file_count);
    assert_eq!(400, size);

    let mut names = manager
        .column_family_names()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    names.sort();
    assert_eq!(vec!["default", "other"], names);

    Ok(())
}

#[test]
fn manager_worker_thread() -> universal_compaction::Result<()> {
    let manager = CompactionManager::default();
    manager.register_column_family("default", Config::default(), VersionStorage::new(7))?;

    let worker = {
        let manager = manager.clone();

        std::thread::spawn(move || -> universal_compaction::Result<usize> {
            let mut completed = 0;

            loop {
                manager.wait_for();

                let Some(name) = manager.pop() else {
                    // Shutdown signal
                    return Ok(completed);
                };

                while let Some(compaction) = manager.pick(&name)? {
                    let output = file(1_000 + completed as FileId, compaction.total_input_size());
                    manager.complete(&name, &compaction, vec![output])?;
                    completed += 1;
                }
            }
        })
    };

    for id in 0..8 {
        manager.with_state("default", |state| state.add_flushed_file(file(id, 100)))?;
        manager.notify("default");
    }

    manager.notify_empty();

    let completed = worker.join().expect("worker should not panic")?;
    assert!(completed >= 1);

    let (size, idle) = manager.with_state("default", |state| {
        (state.size(), state.hidden_set().is_empty())
    })?;
    assert_eq!(800, size);
    assert!(idle);

    Ok(())
}
