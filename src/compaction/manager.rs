// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{universal::Strategy, Compaction, CompactionPicker};
use crate::{
    file::FileMetadata,
    version::{StorageState, VersionStorage},
    Config, Error,
};
use byteview::StrView;
use dashmap::DashMap;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};
use std_semaphore::Semaphore;

/// A column family: its picker and its storage state
struct ColumnFamily {
    picker: Strategy,
    state: Mutex<VersionStorage>,
}

pub struct CompactionManagerInner {
    column_families: DashMap<StrView, Arc<ColumnFamily>, xxhash_rust::xxh3::Xxh3Builder>,
    queue: Mutex<VecDeque<StrView>>,
    semaphore: Semaphore,
}

impl Drop for CompactionManagerInner {
    fn drop(&mut self) {
        log::trace!("Dropping compaction manager");
    }
}

impl Default for CompactionManagerInner {
    fn default() -> Self {
        Self {
            column_families: DashMap::default(),
            queue: Mutex::new(VecDeque::with_capacity(10)),
            semaphore: Semaphore::new(0),
        }
    }
}

/// The compaction manager owns the storage state of every column family
/// and serializes picking per column family.
///
/// Column families that may need compaction (e.g. after a flush) are
/// queued in FIFO order. Its semaphore notifies compaction threads which
/// will wake up and consume the queue items.
#[derive(Clone, Default)]
#[allow(clippy::module_name_repetitions)]
pub struct CompactionManager(Arc<CompactionManagerInner>);

impl std::ops::Deref for CompactionManager {
    type Target = CompactionManagerInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl CompactionManager {
    fn get(&self, name: &str) -> crate::Result<Arc<ColumnFamily>> {
        self.column_families
            .get(name)
            .map(|cf| cf.value().clone())
            .ok_or_else(|| Error::UnknownColumnFamily(name.into()))
    }

    /// Registers a column family, replacing any with the same name.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub fn register_column_family(
        &self,
        name: &str,
        config: Config,
        mut state: VersionStorage,
    ) -> crate::Result<()> {
        config.validate()?;

        state.compute_compaction_score(&config);

        log::debug!(
            "Registering column family {name:?} with {} files",
            state.file_count()
        );

        self.column_families.insert(
            name.into(),
            Arc::new(ColumnFamily {
                picker: Strategy::new(config),
                state: Mutex::new(state),
            }),
        );

        Ok(())
    }

    /// Removes a column family and its queue entries.
    ///
    /// Returns `false` if the column family did not exist.
    #[allow(clippy::expect_used)]
    pub fn remove_column_family(&self, name: &str) -> bool {
        let mut lock = self.queue.lock().expect("lock is poisoned");
        lock.retain(|x| &**x != name);

        self.column_families.remove(name).is_some()
    }

    /// Returns the names of all registered column families.
    #[must_use]
    pub fn column_family_names(&self) -> Vec<StrView> {
        self.column_families
            .iter()
            .map(|cf| cf.key().clone())
            .collect()
    }

    #[allow(clippy::expect_used)]
    pub fn clear(&self) {
        self.queue.lock().expect("lock is poisoned").clear();
    }

    pub fn wait_for(&self) {
        self.semaphore.acquire();
    }

    /// Queues a column family for compaction and wakes up a waiting thread.
    #[allow(clippy::expect_used)]
    pub fn notify(&self, name: &str) {
        let mut lock = self.queue.lock().expect("lock is poisoned");
        lock.push_back(name.into());
        self.semaphore.release();
    }

    pub fn notify_empty(&self) {
        self.semaphore.release();
    }

    #[allow(clippy::expect_used)]
    pub fn pop(&self) -> Option<StrView> {
        let mut lock = self.queue.lock().expect("lock is poisoned");
        lock.pop_front()
    }

    /// Returns `true` if the column family may need a compaction.
    ///
    /// # Errors
    ///
    /// Returns error if the column family does not exist.
    #[allow(clippy::expect_used)]
    pub fn needs_compaction(&self, name: &str) -> crate::Result<bool> {
        let cf = self.get(name)?;
        let state = cf.state.lock().expect("lock is poisoned");
        Ok(cf.picker.needs_compaction(&*state))
    }

    /// Picks a compaction for the column family and claims its inputs.
    ///
    /// # Errors
    ///
    /// Returns error if the column family does not exist.
    #[allow(clippy::expect_used)]
    pub fn pick(&self, name: &str) -> crate::Result<Option<Compaction>> {
        let cf = self.get(name)?;
        let mut state = cf.state.lock().expect("lock is poisoned");
        Ok(cf.picker.pick_compaction(name, &mut *state))
    }

    /// Releases the inputs of a compaction that was not executed.
    ///
    /// # Errors
    ///
    /// Returns error if the column family does not exist.
    #[allow(clippy::expect_used)]
    pub fn release(&self, name: &str, compaction: &Compaction) -> crate::Result<()> {
        let cf = self.get(name)?;
        let mut state = cf.state.lock().expect("lock is poisoned");

        log::trace!(
            "[{name}] Releasing {} compaction of {} files",
            compaction.reason(),
            compaction.num_input_files()
        );

        state.release_compaction(compaction);
        state.compute_compaction_score(cf.picker.config());

        Ok(())
    }

    /// Applies a finished compaction, replacing its inputs by the outputs.
    ///
    /// # Errors
    ///
    /// Returns error if the column family does not exist.
    #[allow(clippy::expect_used)]
    pub fn complete(
        &self,
        name: &str,
        compaction: &Compaction,
        outputs: Vec<Arc<FileMetadata>>,
    ) -> crate::Result<()> {
        let cf = self.get(name)?;
        let mut state = cf.state.lock().expect("lock is poisoned");

        log::trace!(
            "[{name}] Completing {} compaction, {} files -> {} files in L{}",
            compaction.reason(),
            compaction.num_input_files(),
            outputs.len(),
            compaction.output_level(),
        );

        state.complete_compaction(compaction, outputs);
        state.compute_compaction_score(cf.picker.config());

        Ok(())
    }

    /// Runs a function on the storage state of the column family,
    /// e.g. to add flushed files.
    ///
    /// The compaction score is recomputed afterwards.
    ///
    /// # Errors
    ///
    /// Returns error if the column family does not exist.
    #[allow(clippy::expect_used)]
    pub fn with_state<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut VersionStorage) -> R,
    ) -> crate::Result<R> {
        let cf = self.get(name)?;
        let mut state = cf.state.lock().expect("lock is poisoned");

        let result = f(&mut state);
        state.compute_compaction_score(cf.picker.config());

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FileId, InternalKey, StorageStateView, ValueType};
    use test_log::test;

    fn file(id: FileId, size: u64) -> Arc<FileMetadata> {
        Arc::new(FileMetadata::new(
            id,
            size,
            InternalKey::new("a", id, ValueType::Value),
            InternalKey::new("z", id, ValueType::Value),
        ))
    }

    #[test]
    fn manager_queue_fifo() {
        let manager = CompactionManager::default();

        manager.notify("a");
        manager.notify("b");
        manager.notify("a");

        assert_eq!(Some("a"), manager.pop().as_deref());
        assert_eq!(Some("b"), manager.pop().as_deref());

        manager.clear();
        assert!(manager.pop().is_none());
    }

    #[test]
    fn manager_remove_column_family() -> crate::Result<()> {
        let manager = CompactionManager::default();
        manager.register_column_family("a", Config::default(), VersionStorage::new(7))?;

        manager.notify("a");
        manager.notify("b");

        assert!(manager.remove_column_family("a"));
        assert!(!manager.remove_column_family("a"));

        assert_eq!(Some("b"), manager.pop().as_deref());
        assert!(manager.pop().is_none());

        Ok(())
    }

    #[test]
    fn manager_unknown_column_family() {
        let manager = CompactionManager::default();

        assert!(matches!(
            manager.pick("nope"),
            Err(Error::UnknownColumnFamily(name)) if name == "nope"
        ));
    }

    #[test]
    fn manager_rejects_invalid_config() {
        let manager = CompactionManager::default();

        let result = manager.register_column_family(
            "a",
            Config::default().level0_file_num_compaction_trigger(0),
            VersionStorage::new(7),
        );

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        assert!(manager.column_family_names().is_empty());
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn manager_pick_complete() -> crate::Result<()> {
        let manager = CompactionManager::default();
        manager.register_column_family("default", Config::default(), VersionStorage::new(7))?;

        manager.with_state("default", |state| {
            for id in 0..4 {
                state.add_flushed_file(file(id, 100));
            }
        })?;
        assert!(manager.needs_compaction("default")?);

        let compaction = manager.pick("default")?.expect("should pick");
        assert_eq!(4, compaction.num_input_files());
        assert!(manager.pick("default")?.is_none());

        manager.complete("default", &compaction, vec![file(10, 400)])?;
        assert!(!manager.needs_compaction("default")?);

        let files = manager.with_state("default", |state| {
            state.iter().map(|f| f.id).collect::<Vec<_>>()
        })?;
        assert_eq!(vec![10], files);

        Ok(())
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn manager_release() -> crate::Result<()> {
        let manager = CompactionManager::default();
        manager.register_column_family("default", Config::default(), VersionStorage::new(7))?;

        manager.with_state("default", |state| {
            for id in 0..4 {
                state.add_flushed_file(file(id, 100));
            }
        })?;

        let compaction = manager.pick("default")?.expect("should pick");
        manager.release("default", &compaction)?;

        let claimed = manager.with_state("default", |state| {
            (0..4).any(|id| state.is_being_compacted(id))
        })?;
        assert!(!claimed);

        assert!(manager.pick("default")?.is_some());

        Ok(())
    }

    #[test]
    fn manager_wakes_up_waiter() {
        let manager = CompactionManager::default();

        let waiter = {
            let manager = manager.clone();

            std::thread::spawn(move || {
                manager.wait_for();
                manager.pop()
            })
        };

        manager.notify("default");

        let popped = waiter.join().ok().flatten();
        assert_eq!(Some("default"), popped.as_deref());
    }
}
