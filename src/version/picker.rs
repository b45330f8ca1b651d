//! Level-by-level file selection for a single-key lookup.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::InternalKeyComparator;
use crate::version::file_indexer::LEVEL_MAX_INDEX;
use crate::version::file_meta::FileMetaData;
use crate::version::storage_info::VersionStorageInfo;

/// A file handed out by a picker, with where it sits in the version.
#[derive(Debug, Clone, Copy)]
pub struct PickedFile<'a> {
    pub file: &'a Arc<FileMetaData>,
    pub level: usize,
    /// The file is the last one of its level.
    pub last_in_level: bool,
}

/// First file in `files[left..right]` whose largest key is `>= key`, or
/// `right` when there is none.
pub fn find_file_in_range(
    icmp: &InternalKeyComparator,
    files: &[Arc<FileMetaData>],
    key: &[u8],
    left: usize,
    right: usize,
) -> usize {
    let right = right.min(files.len());
    if left >= right {
        return right;
    }
    left + files[left..right]
        .partition_point(|f| icmp.compare(f.largest.encode(), key) == Ordering::Less)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PickerState {
    /// Walking `level`, next candidate at `curr_index`.
    Searching {
        level: usize,
        start_index: usize,
        curr_index: usize,
    },
    Exhausted,
}

/// Yields the files that may hold `user_key`, level 0 first (newest file
/// first), then one candidate run per sorted level.
///
/// Bounds learned at level `L` through the file indexer restrict the binary
/// search at `L+1`.
pub struct FilePicker<'a> {
    storage: &'a VersionStorageInfo,
    num_levels: usize,
    user_key: &'a [u8],
    ikey: &'a [u8],
    state: PickerState,
    search_left_bound: i32,
    search_right_bound: i32,
}

impl<'a> FilePicker<'a> {
    /// Picker over the first `num_levels` levels of `storage`.
    pub fn new(
        storage: &'a VersionStorageInfo,
        num_levels: usize,
        user_key: &'a [u8],
        ikey: &'a [u8],
    ) -> Self {
        let mut picker = FilePicker {
            storage,
            num_levels: num_levels.min(storage.num_levels()),
            user_key,
            ikey,
            state: PickerState::Exhausted,
            search_left_bound: 0,
            search_right_bound: LEVEL_MAX_INDEX,
        };
        picker.state = picker.prepare_level(0);
        picker
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == PickerState::Exhausted
    }

    /// Level currently being searched, if any.
    pub fn current_level(&self) -> Option<usize> {
        match self.state {
            PickerState::Searching { level, .. } => Some(level),
            PickerState::Exhausted => None,
        }
    }

    /// Next file that may contain the key, or `None` once every level is done.
    pub fn next_file(&mut self) -> Option<PickedFile<'a>> {
        loop {
            let PickerState::Searching {
                level,
                start_index,
                curr_index,
            } = self.state
            else {
                return None;
            };
            match self.step(level, start_index, curr_index) {
                Some(picked) => return Some(picked),
                None => continue,
            }
        }
    }

    // One transition: either returns a file (moving the cursor past it) or
    // moves on to the next file or level.
    fn step(&mut self, level: usize, start_index: usize, curr_index: usize) -> Option<PickedFile<'a>> {
        let storage = self.storage;
        let files = storage.level_files(level);
        if curr_index >= files.len() {
            self.state = self.prepare_level(level + 1);
            return None;
        }
        let file = &files[curr_index];
        let last_in_level = curr_index == files.len() - 1;
        let mut cmp_largest = Ordering::Less;

        // With one level of at most three files, comparing ranges costs more
        // than probing every file.
        if self.num_levels > 1 || files.len() > 3 {
            let ucmp = storage.user_comparator();
            debug_assert!(
                level == 0
                    || curr_index == start_index
                    || ucmp.compare_without_timestamp(self.user_key, file.smallest.user_key())
                        != Ordering::Greater
            );
            let cmp_smallest =
                ucmp.compare_without_timestamp(self.user_key, file.smallest.user_key());
            if cmp_smallest != Ordering::Less {
                cmp_largest =
                    ucmp.compare_without_timestamp(self.user_key, file.largest.user_key());
            }
            if level > 0 {
                let (left, right) = storage.file_indexer().next_level_index(
                    level,
                    curr_index,
                    cmp_smallest,
                    cmp_largest,
                );
                self.search_left_bound = left;
                self.search_right_bound = right;
            }
            if cmp_smallest == Ordering::Less || cmp_largest == Ordering::Greater {
                self.state = if level == 0 {
                    PickerState::Searching {
                        level,
                        start_index,
                        curr_index: curr_index + 1,
                    }
                } else {
                    self.prepare_level(level + 1)
                };
                return None;
            }
        }

        self.state = if level > 0 && cmp_largest == Ordering::Less {
            // Key is strictly inside this file; no later file of the level
            // can hold it.
            self.prepare_level(level + 1)
        } else {
            PickerState::Searching {
                level,
                start_index,
                curr_index: curr_index + 1,
            }
        };
        Some(PickedFile {
            file,
            level,
            last_in_level,
        })
    }

    // Positions the search at the first level >= `level` that may hold the key.
    fn prepare_level(&mut self, mut level: usize) -> PickerState {
        let storage = self.storage;
        while level < self.num_levels {
            let files = storage.level_files(level);
            if files.is_empty() {
                self.search_left_bound = 0;
                self.search_right_bound = LEVEL_MAX_INDEX;
                level += 1;
                continue;
            }

            let start_index = if level == 0 {
                0
            } else if self.search_left_bound <= self.search_right_bound {
                if self.search_right_bound == LEVEL_MAX_INDEX {
                    self.search_right_bound = files.len() as i32 - 1;
                }
                // The bound came from user keys only, so the key may still
                // sort after the rightmost candidate; search one past it.
                let limit = self.search_right_bound as usize + 1;
                let start = find_file_in_range(
                    storage.internal_comparator(),
                    files,
                    self.ikey,
                    self.search_left_bound as usize,
                    limit,
                );
                if start >= limit || start >= files.len() {
                    self.search_left_bound = 0;
                    self.search_right_bound = LEVEL_MAX_INDEX;
                    level += 1;
                    continue;
                }
                start
            } else {
                self.search_left_bound = 0;
                self.search_right_bound = LEVEL_MAX_INDEX;
                level += 1;
                continue;
            };

            return PickerState::Searching {
                level,
                start_index,
                curr_index: start_index,
            };
        }
        PickerState::Exhausted
    }
}
