// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{FileId, HashSet};

/// The hidden set keeps track of which files are currently being compacted
///
/// When a file is hidden (being compacted), no other compaction may use it.
/// Claims are exclusive: hiding a file twice is a bug.
#[derive(Clone, Debug, Default)]
pub struct HiddenSet {
    set: HashSet<FileId>,
}

impl HiddenSet {
    /// Hides the given files.
    pub fn hide<T: IntoIterator<Item = FileId>>(&mut self, ids: T) {
        for id in ids {
            let inserted = self.set.insert(id);
            debug_assert!(inserted, "file #{id} was claimed twice");
        }
    }

    /// Makes the given files visible again.
    pub fn show<T: IntoIterator<Item = FileId>>(&mut self, ids: T) {
        for id in ids {
            self.set.remove(&id);
        }
    }

    /// Returns `true` if the file is hidden.
    #[must_use]
    pub fn is_hidden(&self, id: FileId) -> bool {
        self.set.contains(&id)
    }

    /// Returns `true` if any of the given files is hidden.
    pub fn is_blocked<T: IntoIterator<Item = FileId>>(&self, ids: T) -> bool {
        ids.into_iter().any(|id| self.is_hidden(id))
    }

    /// Returns the amount of hidden files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.set.len()
    }

    /// Returns `true` if no file is hidden.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn hidden_set_hide_show() {
        let mut set = HiddenSet::default();
        assert!(set.is_empty());

        set.hide([1, 2, 3]);
        assert_eq!(3, set.len());
        assert!(set.is_hidden(2));
        assert!(set.is_blocked([7, 3]));
        assert!(!set.is_blocked([7, 8]));

        set.show([1, 2, 3]);
        assert!(set.is_empty());
        assert!(!set.is_hidden(2));
    }
}
