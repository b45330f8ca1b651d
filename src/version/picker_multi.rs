//! Level-by-level file selection for a batch of sorted keys.
//!
//! All keys of a batch walk the levels together. Within a level, consecutive
//! keys that land in the same file are handed to the table in one call; keys
//! outside the file are skipped for that call only.

use std::cmp::Ordering;

use crate::types::LookupKey;
use crate::version::batch::{BatchRange, MAX_BATCH_SIZE};
use crate::version::file_indexer::LEVEL_MAX_INDEX;
use crate::version::picker::{PickedFile, find_file_in_range};
use crate::version::storage_info::VersionStorageInfo;

/// Per-key search position within the current level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FilePickerContext {
    search_left_bound: i32,
    search_right_bound: i32,
    curr_index_in_curr_level: usize,
    start_index_in_curr_level: usize,
}

impl FilePickerContext {
    fn full_range() -> Self {
        FilePickerContext {
            search_left_bound: 0,
            search_right_bound: LEVEL_MAX_INDEX,
            curr_index_in_curr_level: 0,
            start_index_in_curr_level: 0,
        }
    }

    fn reset_bounds(&mut self) {
        self.search_left_bound = 0;
        self.search_right_bound = LEVEL_MAX_INDEX;
    }
}

pub struct FilePickerMultiGet<'a, 's> {
    storage: &'a VersionStorageInfo,
    num_levels: usize,
    keys: &'a [LookupKey],
    /// Keys still wanted by the caller; skips added here apply from the next
    /// level on.
    range: &'a BatchRange<'s>,
    contexts: [FilePickerContext; MAX_BATCH_SIZE],
    curr_level: Option<usize>,
    exhausted: bool,
    // Cursor over `current_level_range`; sits at or just past the last key
    // found in the previously returned file.
    batch_iter: usize,
    // Start of the key range for the next file.
    batch_iter_prev: usize,
    // One past the last key of the returned file.
    upper_key: usize,
    // The last key of the returned file equals that file's largest key; it
    // may need the next file too unless the lookup finished it.
    maybe_repeat_key: bool,
    current_level_range: BatchRange<'s>,
    current_file_range: BatchRange<'s>,
}

impl<'a, 's> FilePickerMultiGet<'a, 's> {
    /// `keys[i]` is the lookup for batch slot `i`; slots must be sorted by
    /// user key.
    pub fn new(
        storage: &'a VersionStorageInfo,
        num_levels: usize,
        keys: &'a [LookupKey],
        range: &'a BatchRange<'s>,
    ) -> Self {
        let begin = range.begin();
        let mut picker = FilePickerMultiGet {
            storage,
            num_levels: num_levels.min(storage.num_levels()),
            keys,
            range,
            contexts: [FilePickerContext::full_range(); MAX_BATCH_SIZE],
            curr_level: None,
            exhausted: false,
            batch_iter: begin,
            batch_iter_prev: begin,
            upper_key: begin,
            maybe_repeat_key: false,
            current_level_range: range.narrow(range.start(), range.end()),
            current_file_range: range.narrow(range.start(), range.end()),
        };
        picker.exhausted = !picker.prepare_next_level();
        picker
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn current_level(&self) -> Option<usize> {
        if self.exhausted { None } else { self.curr_level }
    }

    /// Keys to look up in the file last returned by [`Self::next_file`].
    pub fn current_file_range(&self) -> &BatchRange<'s> {
        &self.current_file_range
    }

    /// Next file holding at least one of the remaining keys.
    pub fn next_file(&mut self) -> Option<PickedFile<'a>> {
        while !self.exhausted {
            let Some(level) = self.curr_level else {
                self.exhausted = true;
                break;
            };
            let end = self.current_level_range.end();
            if self.batch_iter == end {
                self.exhausted = !self.prepare_next_level();
                continue;
            }
            if self.maybe_repeat_key {
                self.maybe_repeat_key = false;
                // Level 0 files are all probed for every pending key, so the
                // cursor always moves on there.
                if self.current_level_range.is_done(self.batch_iter) || level == 0 {
                    self.batch_iter = self.upper_key;
                }
            }
            self.batch_iter_prev = self.batch_iter;

            let storage = self.storage;
            let files = storage.level_files(level);
            let next_file_range = self.current_level_range.narrow(self.batch_iter_prev, end);
            let mut file_index = if self.batch_iter != end {
                self.contexts[self.batch_iter].curr_index_in_curr_level
            } else {
                files.len()
            };

            match self.next_file_in_level_with_keys(level, &next_file_range, &mut file_index) {
                None => self.exhausted = !self.prepare_next_level(),
                Some((file_pos, is_last_key_in_file)) => {
                    if is_last_key_in_file {
                        // `batch_iter` still points at the last key in the
                        // file; every key up to `upper_key` moves to the
                        // next file.
                        let mut pos = self.batch_iter;
                        while pos < self.upper_key {
                            self.contexts[pos].curr_index_in_curr_level += 1;
                            pos = self.current_level_range.advance(pos);
                        }
                        self.maybe_repeat_key = true;
                    }
                    self.current_file_range =
                        next_file_range.narrow(self.batch_iter_prev, self.upper_key);
                    return Some(PickedFile {
                        file: &files[file_pos],
                        level,
                        last_in_level: file_index == files.len() - 1,
                    });
                }
            }
        }
        None
    }

    // Walks keys from `batch_iter` until it finds a file holding one of them,
    // then extends over every following key of that file. Returns the file's
    // position and whether the last key matched the file's largest key.
    fn next_file_in_level_with_keys(
        &mut self,
        level: usize,
        next_file_range: &BatchRange<'s>,
        file_index: &mut usize,
    ) -> Option<(usize, bool)> {
        let storage = self.storage;
        let keys = self.keys;
        let files = storage.level_files(level);
        let ucmp = storage.user_comparator();
        let end = self.current_level_range.end();
        let mut curr_file_index = *file_index;

        if curr_file_index >= files.len() {
            // The pending key was a duplicate of the last key of the level's
            // last file; nothing left in this level for the rest.
            if self.batch_iter != end {
                self.batch_iter = self.current_level_range.advance(self.batch_iter);
                while self.batch_iter != end {
                    self.contexts[self.batch_iter].reset_bounds();
                    self.batch_iter = self.current_level_range.advance(self.batch_iter);
                }
            }
            return None;
        }

        let mut picked = None;
        let mut file_hit = false;
        let mut cmp_largest = Ordering::Less;
        while self.batch_iter != end
            && (self.contexts[self.batch_iter].curr_index_in_curr_level == curr_file_index
                || !file_hit)
        {
            let slot = self.batch_iter;
            let file_pos = self.contexts[slot].curr_index_in_curr_level;
            let Some(file) = files.get(file_pos) else {
                break;
            };
            picked = Some(file_pos);
            let user_key = keys[slot].user_key();

            if self.num_levels > 1 || files.len() > 3 {
                let cmp_smallest = ucmp.compare_without_timestamp(user_key, file.smallest.user_key());
                debug_assert!(
                    level == 0
                        || file_pos == self.contexts[slot].start_index_in_curr_level
                        || cmp_smallest != Ordering::Greater
                );
                cmp_largest = if cmp_smallest != Ordering::Less {
                    ucmp.compare_without_timestamp(user_key, file.largest.user_key())
                } else {
                    Ordering::Less
                };
                if level > 0 {
                    let (left, right) = storage.file_indexer().next_level_index(
                        level,
                        file_pos,
                        cmp_smallest,
                        cmp_largest,
                    );
                    self.contexts[slot].search_left_bound = left;
                    self.contexts[slot].search_right_bound = right;
                }
                if cmp_smallest == Ordering::Less || cmp_largest == Ordering::Greater {
                    next_file_range.skip_key(slot);
                } else {
                    file_hit = true;
                }
            } else {
                file_hit = true;
            }

            if cmp_largest == Ordering::Equal {
                // No later key of the batch is in this file, but duplicates of
                // this key are. `batch_iter` stays on the key in case the
                // file only held merge operands for it.
                self.upper_key = self.current_level_range.advance(slot);
                while self.upper_key != end
                    && ucmp.compare_without_timestamp(user_key, keys[self.upper_key].user_key())
                        == Ordering::Equal
                {
                    self.upper_key = self.current_level_range.advance(self.upper_key);
                }
                break;
            }
            if level == 0 {
                self.contexts[slot].curr_index_in_curr_level += 1;
            }
            self.batch_iter = self.current_level_range.advance(slot);
            if !file_hit {
                curr_file_index = if self.batch_iter != end {
                    self.contexts[self.batch_iter].curr_index_in_curr_level
                } else {
                    files.len()
                };
            }
        }

        *file_index = curr_file_index;
        let is_last_key_in_file = cmp_largest == Ordering::Equal;
        if !is_last_key_in_file {
            self.upper_key = self.batch_iter;
        }
        if file_hit {
            picked.map(|pos| (pos, is_last_key_in_file))
        } else {
            None
        }
    }

    // Moves to the next level holding any remaining key. Level 0 is revisited
    // while its first pending key still has files left there.
    fn prepare_next_level(&mut self) -> bool {
        let storage = self.storage;
        let keys = self.keys;
        if self.curr_level == Some(0) {
            let begin = self.current_level_range.begin();
            if begin < self.current_level_range.end()
                && self.contexts[begin].curr_index_in_curr_level < storage.num_level_files(0)
            {
                self.batch_iter_prev = begin;
                self.upper_key = begin;
                self.batch_iter = begin;
                return true;
            }
        }

        let mut level = self.curr_level.map_or(0, |l| l + 1);
        while level < self.num_levels {
            self.curr_level = Some(level);
            let files = storage.level_files(level);
            if files.is_empty() {
                let mut pos = self.current_level_range.begin();
                while pos < self.current_level_range.end() {
                    self.contexts[pos].reset_bounds();
                    pos = self.current_level_range.advance(pos);
                }
                level += 1;
                while level < self.num_levels && storage.num_level_files(level) == 0 {
                    level += 1;
                }
                continue;
            }

            let mut level_contains_keys = false;
            self.current_level_range = self.range.narrow(self.range.start(), self.range.end());
            let end = self.current_level_range.end();
            let mut pos = self.current_level_range.begin();
            while pos < end {
                let slot = pos;
                pos = self.current_level_range.advance(pos);
                let ctx = &mut self.contexts[slot];
                let start_index = if level == 0 {
                    level_contains_keys = true;
                    0
                } else if ctx.search_left_bound <= ctx.search_right_bound {
                    if ctx.search_right_bound == LEVEL_MAX_INDEX {
                        ctx.search_right_bound = files.len() as i32 - 1;
                    }
                    let limit = ctx.search_right_bound as usize + 1;
                    let start = find_file_in_range(
                        storage.internal_comparator(),
                        files,
                        keys[slot].internal_key(),
                        ctx.search_left_bound as usize,
                        limit,
                    );
                    if start >= limit || start >= files.len() {
                        // Key sorts after every candidate of this level.
                        ctx.reset_bounds();
                        self.current_level_range.skip_key(slot);
                        continue;
                    }
                    level_contains_keys = true;
                    start
                } else {
                    ctx.reset_bounds();
                    self.current_level_range.skip_key(slot);
                    continue;
                };
                ctx.start_index_in_curr_level = start_index;
                ctx.curr_index_in_curr_level = start_index;
            }
            if level_contains_keys {
                let begin = self.current_level_range.begin();
                self.batch_iter_prev = begin;
                self.upper_key = begin;
                self.batch_iter = begin;
                return true;
            }
            level += 1;
        }
        self.curr_level = Some(level);
        false
    }
}
