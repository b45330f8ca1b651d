//! Fixed-size key batches for multi-key lookups.
//!
//! A lookup batch holds at most [`MAX_BATCH_SIZE`] keys, sorted by user key.
//! Every sub-range handed to the level walk shares one *done* mask (a key
//! served anywhere is served everywhere) and carries its own *skip* mask,
//! copied when a range is narrowed.

use std::cell::Cell;

/// Upper bound on keys in one lookup batch.
pub const MAX_BATCH_SIZE: usize = 32;

/// Bitset over batch slot indices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyMask(u64);

impl KeyMask {
    pub const fn empty() -> Self {
        KeyMask(0)
    }

    pub fn contains(self, index: usize) -> bool {
        index < 64 && self.0 & (1u64 << index) != 0
    }

    pub fn insert(&mut self, index: usize) {
        debug_assert!(index < MAX_BATCH_SIZE);
        self.0 |= 1u64 << index;
    }

    pub fn union(self, other: KeyMask) -> KeyMask {
        KeyMask(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }
}

/// State shared by every range of one batch.
#[derive(Debug)]
pub struct BatchState {
    num_keys: usize,
    done: Cell<KeyMask>,
    value_size: Cell<u64>,
}

impl BatchState {
    pub fn new(num_keys: usize) -> Self {
        assert!(
            num_keys <= MAX_BATCH_SIZE,
            "batch of {num_keys} keys exceeds {MAX_BATCH_SIZE}"
        );
        BatchState {
            num_keys,
            done: Cell::new(KeyMask::empty()),
            value_size: Cell::new(0),
        }
    }

    pub fn num_keys(&self) -> usize {
        self.num_keys
    }

    /// Range covering every key of the batch with nothing skipped.
    pub fn root_range(&self) -> BatchRange<'_> {
        BatchRange {
            state: self,
            start: 0,
            end: self.num_keys,
            skip: Cell::new(KeyMask::empty()),
        }
    }

    pub fn is_done(&self, index: usize) -> bool {
        self.done.get().contains(index)
    }

    pub fn done_mask(&self) -> KeyMask {
        self.done.get()
    }

    pub fn value_size(&self) -> u64 {
        self.value_size.get()
    }
}

/// Contiguous slice `[start, end)` of a batch.
///
/// Iteration yields indices not set in `skip | done`, ascending. Masks are
/// read at each step, so keys marked while iterating are not revisited.
#[derive(Debug)]
pub struct BatchRange<'a> {
    state: &'a BatchState,
    start: usize,
    end: usize,
    skip: Cell<KeyMask>,
}

impl Clone for BatchRange<'_> {
    fn clone(&self) -> Self {
        BatchRange {
            state: self.state,
            start: self.start,
            end: self.end,
            skip: Cell::new(self.skip.get()),
        }
    }
}

impl<'a> BatchRange<'a> {
    /// Sub-range `[start, end)` inheriting this range's skip mask.
    pub fn narrow(&self, start: usize, end: usize) -> BatchRange<'a> {
        debug_assert!(self.start <= start && start <= end && end <= self.end);
        BatchRange {
            state: self.state,
            start,
            end,
            skip: Cell::new(self.skip.get()),
        }
    }

    pub fn state(&self) -> &'a BatchState {
        self.state
    }

    pub fn start(&self) -> usize {
        self.start
    }

    /// One past the last slot of the range; also the exhausted cursor value.
    pub fn end(&self) -> usize {
        self.end
    }

    pub fn is_masked(&self, index: usize) -> bool {
        self.skip.get().union(self.state.done.get()).contains(index)
    }

    /// First unmasked slot at or after `pos`, or `end()`.
    pub fn seek(&self, pos: usize) -> usize {
        let mut pos = pos.max(self.start);
        while pos < self.end && self.is_masked(pos) {
            pos += 1;
        }
        pos.min(self.end)
    }

    pub fn begin(&self) -> usize {
        self.seek(self.start)
    }

    /// First unmasked slot after `pos`, or `end()`.
    pub fn advance(&self, pos: usize) -> usize {
        self.seek(pos + 1)
    }

    pub fn iter(&self) -> BatchRangeIter<'_, 'a> {
        BatchRangeIter {
            range: self,
            pos: self.start,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.begin() == self.end
    }

    /// Unmasked keys remaining in the range.
    pub fn keys_in_range(&self) -> usize {
        self.iter().count()
    }

    /// Marks a key as served for every range of the batch.
    pub fn mark_done(&self, index: usize) {
        let mut done = self.state.done.get();
        done.insert(index);
        self.state.done.set(done);
    }

    pub fn is_done(&self, index: usize) -> bool {
        self.state.is_done(index)
    }

    /// Excludes a key from this range only.
    pub fn skip_key(&self, index: usize) {
        let mut skip = self.skip.get();
        skip.insert(index);
        self.skip.set(skip);
    }

    pub fn skip_mask(&self) -> KeyMask {
        self.skip.get()
    }

    /// Merges another range's skips into this one.
    pub fn add_skips_from(&self, other: &BatchRange<'_>) {
        self.skip.set(self.skip.get().union(other.skip.get()));
    }

    pub fn add_value_size(&self, size: u64) {
        self.state
            .value_size
            .set(self.state.value_size.get().saturating_add(size));
    }

    pub fn value_size(&self) -> u64 {
        self.state.value_size.get()
    }
}

pub struct BatchRangeIter<'r, 'a> {
    range: &'r BatchRange<'a>,
    pos: usize,
}

impl Iterator for BatchRangeIter<'_, '_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let pos = self.range.seek(self.pos);
        if pos >= self.range.end {
            self.pos = pos;
            return None;
        }
        self.pos = pos + 1;
        Some(pos)
    }
}
