use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::version::file_meta::FileMetaData;

/// Right bound meaning "up to the last file of the level".
pub const LEVEL_MAX_INDEX: i32 = i32::MAX;

/// Bounds into level `L+1` for one file of level `L`.
///
/// For a key compared against the file's smallest and largest user keys, the
/// matching file in the next level (if any) lies within
/// `[*_lb, *_rb]` of the corresponding comparison outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IndexUnit {
    // first next-level file whose largest >= this file's smallest
    smallest_lb: i32,
    // first next-level file whose largest >= this file's largest
    largest_lb: i32,
    // last next-level file whose smallest <= this file's smallest
    smallest_rb: i32,
    // last next-level file whose smallest <= this file's largest
    largest_rb: i32,
}

impl Default for IndexUnit {
    fn default() -> Self {
        IndexUnit {
            smallest_lb: 0,
            largest_lb: 0,
            smallest_rb: -1,
            largest_rb: -1,
        }
    }
}

/// Precomputed cross-level search bounds (fractional cascading).
///
/// Once a lookup has compared its key with a file at level `L`, the
/// candidate range at `L+1` shrinks to the bounds stored for that file, so
/// the next level's binary search runs over a fraction of the files.
#[derive(Debug, Clone, Default)]
pub struct FileIndexer {
    num_levels: usize,
    next_level_index: Vec<Vec<IndexUnit>>,
    level_rb: Vec<i32>,
}

impl FileIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    /// Rebuilds the index from the files of every level.
    ///
    /// Level 0 gets no units; its files overlap and are searched in full.
    pub fn update_index(&mut self, ucmp: &dyn Comparator, files: &[Vec<Arc<FileMetaData>>]) {
        let num_levels = files.len();
        self.num_levels = num_levels;
        self.next_level_index = vec![Vec::new(); num_levels];
        self.level_rb = vec![-1; num_levels];
        if num_levels == 0 {
            return;
        }

        for level in 1..num_levels.saturating_sub(1) {
            let upper = &files[level];
            let lower = &files[level + 1];
            self.level_rb[level] = upper.len() as i32 - 1;
            if upper.is_empty() {
                continue;
            }
            let mut units = vec![IndexUnit::default(); upper.len()];

            calculate_lb(
                upper,
                lower,
                &mut units,
                |u, l| ucmp.compare_without_timestamp(u.smallest.user_key(), l.largest.user_key()),
                |unit, idx| unit.smallest_lb = idx,
            );
            calculate_lb(
                upper,
                lower,
                &mut units,
                |u, l| ucmp.compare_without_timestamp(u.largest.user_key(), l.largest.user_key()),
                |unit, idx| unit.largest_lb = idx,
            );
            calculate_rb(
                upper,
                lower,
                &mut units,
                |u, l| ucmp.compare_without_timestamp(u.smallest.user_key(), l.smallest.user_key()),
                |unit, idx| unit.smallest_rb = idx,
            );
            calculate_rb(
                upper,
                lower,
                &mut units,
                |u, l| ucmp.compare_without_timestamp(u.largest.user_key(), l.smallest.user_key()),
                |unit, idx| unit.largest_rb = idx,
            );
            self.next_level_index[level] = units;
        }
        self.level_rb[num_levels - 1] = files[num_levels - 1].len() as i32 - 1;
    }

    /// Search bounds `(left, right)` into `level + 1` after comparing the key
    /// with file `file_index` of `level`.
    ///
    /// `cmp_smallest`/`cmp_largest` are the key's comparison with the file's
    /// smallest and largest user keys. The last level yields an empty range;
    /// missing index data yields the full range.
    pub fn next_level_index(
        &self,
        level: usize,
        file_index: usize,
        cmp_smallest: Ordering,
        cmp_largest: Ordering,
    ) -> (i32, i32) {
        if self.num_levels == 0 || level + 1 >= self.num_levels {
            return (0, -1);
        }
        let units = &self.next_level_index[level];
        let Some(unit) = units.get(file_index) else {
            return (0, LEVEL_MAX_INDEX);
        };
        let next_level_rb = self.level_rb[level + 1];

        match (cmp_smallest, cmp_largest) {
            (Ordering::Less, _) => {
                let left = if level > 0 && file_index > 0 {
                    units[file_index - 1].largest_lb
                } else {
                    0
                };
                (left, unit.smallest_rb)
            }
            (Ordering::Equal, _) => (unit.smallest_lb, unit.smallest_rb),
            (Ordering::Greater, Ordering::Less) => (unit.smallest_lb, unit.largest_rb),
            (Ordering::Greater, Ordering::Equal) => (unit.largest_lb, next_level_rb),
            (Ordering::Greater, Ordering::Greater) => (unit.largest_lb, next_level_rb),
        }
    }

    /// Index of the last file in `level`, or -1 when it is empty.
    pub fn level_right_bound(&self, level: usize) -> i32 {
        self.level_rb.get(level).copied().unwrap_or(-1)
    }
}

// Forward merge: for each upper file, the first lower file not ordered
// strictly before it.
fn calculate_lb<C, S>(
    upper: &[Arc<FileMetaData>],
    lower: &[Arc<FileMetaData>],
    units: &mut [IndexUnit],
    cmp: C,
    set: S,
) where
    C: Fn(&FileMetaData, &FileMetaData) -> Ordering,
    S: Fn(&mut IndexUnit, i32),
{
    let (mut upper_idx, mut lower_idx) = (0usize, 0usize);
    while upper_idx < upper.len() && lower_idx < lower.len() {
        match cmp(&upper[upper_idx], &lower[lower_idx]) {
            Ordering::Greater => lower_idx += 1,
            _ => {
                set(&mut units[upper_idx], lower_idx as i32);
                upper_idx += 1;
            }
        }
    }
    while upper_idx < upper.len() {
        set(&mut units[upper_idx], lower.len() as i32);
        upper_idx += 1;
    }
}

// Backward merge: for each upper file, the last lower file not ordered
// strictly after it.
fn calculate_rb<C, S>(
    upper: &[Arc<FileMetaData>],
    lower: &[Arc<FileMetaData>],
    units: &mut [IndexUnit],
    cmp: C,
    set: S,
) where
    C: Fn(&FileMetaData, &FileMetaData) -> Ordering,
    S: Fn(&mut IndexUnit, i32),
{
    let mut upper_idx = upper.len() as i64 - 1;
    let mut lower_idx = lower.len() as i64 - 1;
    while upper_idx >= 0 && lower_idx >= 0 {
        match cmp(&upper[upper_idx as usize], &lower[lower_idx as usize]) {
            Ordering::Less => lower_idx -= 1,
            _ => {
                set(&mut units[upper_idx as usize], lower_idx as i32);
                upper_idx -= 1;
            }
        }
    }
    while upper_idx >= 0 {
        set(&mut units[upper_idx as usize], -1);
        upper_idx -= 1;
    }
}
