use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::options::{CompactionPri, CompactionStyle, ImmutableCfOptions, MutableCfOptions};
use crate::types::{InternalKey, MAX_SEQUENCE_NUMBER, SequenceNumber, VALUE_TYPE_FOR_SEEK};
use crate::version::file_indexer::FileIndexer;
use crate::version::file_meta::{BlobFileMetaData, FileMetaData};

/// Files considered when ordering a level by compensated size.
pub const NUMBER_FILES_TO_SORT: usize = 50;

const DELETION_WEIGHT_ON_COMPACTION: u64 = 2;

/// Level and position of a file inside a `VersionStorageInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileLocation {
    pub level: usize,
    pub position: usize,
}

/// File reference paired with its level, as reported by the marked-file sets.
pub type LevelFile = (usize, Arc<FileMetaData>);

/// The leveled file layout of one `Version` plus everything derived from it.
///
/// Built by `VersionBuilder`, completed by `prepare_apply`, scored by
/// `compute_compaction_score` and then frozen with `set_finalized`.
pub struct VersionStorageInfo {
    pub(super) icmp: InternalKeyComparator,
    pub(super) num_levels: usize,
    pub(super) num_non_empty_levels: usize,
    pub(super) compaction_style: CompactionStyle,
    pub(super) files: Vec<Vec<Arc<FileMetaData>>>,
    pub(super) file_locations: HashMap<u64, FileLocation>,
    pub(super) blob_files: BTreeMap<u64, Arc<BlobFileMetaData>>,
    pub(super) file_indexer: FileIndexer,

    pub(super) files_by_compaction_pri: Vec<Vec<usize>>,
    pub(super) next_file_to_compact_by_size: Vec<usize>,
    pub(super) level0_non_overlapping: bool,

    pub(super) bottommost_files: Vec<LevelFile>,
    pub(super) bottommost_files_marked_for_compaction: Vec<LevelFile>,
    pub(super) bottommost_files_mark_threshold: SequenceNumber,
    pub(super) oldest_snapshot_seqnum: SequenceNumber,

    pub(super) compaction_score: Vec<f64>,
    pub(super) compaction_level: Vec<usize>,
    pub(super) l0_delay_trigger_count: usize,
    pub(super) files_marked_for_compaction: Vec<LevelFile>,
    pub(super) expired_ttl_files: Vec<LevelFile>,
    pub(super) files_marked_for_periodic_compaction: Vec<LevelFile>,
    pub(super) files_marked_for_forced_blob_gc: Vec<LevelFile>,

    pub(super) base_level: i32,
    pub(super) level_multiplier: f64,
    pub(super) level_max_bytes: Vec<u64>,

    pub(super) accumulated_file_size: u64,
    pub(super) accumulated_raw_key_size: u64,
    pub(super) accumulated_raw_value_size: u64,
    pub(super) accumulated_num_non_deletions: u64,
    pub(super) accumulated_num_deletions: u64,
    pub(super) current_num_non_deletions: u64,
    pub(super) current_num_deletions: u64,
    pub(super) current_num_samples: u64,

    pub(super) estimated_compaction_needed_bytes: u64,
    pub(super) finalized: bool,
    pub(super) force_consistency_checks: bool,
}

impl std::fmt::Debug for VersionStorageInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionStorageInfo").finish_non_exhaustive()
    }
}

impl VersionStorageInfo {
    /// Empty layout; entry statistics carry over from `base`.
    pub fn new(
        icmp: InternalKeyComparator,
        num_levels: usize,
        compaction_style: CompactionStyle,
        base: Option<&VersionStorageInfo>,
        force_consistency_checks: bool,
    ) -> Self {
        let mut info = VersionStorageInfo {
            icmp,
            num_levels,
            num_non_empty_levels: num_levels,
            compaction_style,
            files: vec![Vec::new(); num_levels],
            file_locations: HashMap::new(),
            blob_files: BTreeMap::new(),
            file_indexer: FileIndexer::new(),
            files_by_compaction_pri: vec![Vec::new(); num_levels],
            next_file_to_compact_by_size: vec![0; num_levels],
            level0_non_overlapping: false,
            bottommost_files: Vec::new(),
            bottommost_files_marked_for_compaction: Vec::new(),
            bottommost_files_mark_threshold: MAX_SEQUENCE_NUMBER,
            oldest_snapshot_seqnum: 0,
            compaction_score: vec![0.0; num_levels],
            compaction_level: (0..num_levels).collect(),
            l0_delay_trigger_count: 0,
            files_marked_for_compaction: Vec::new(),
            expired_ttl_files: Vec::new(),
            files_marked_for_periodic_compaction: Vec::new(),
            files_marked_for_forced_blob_gc: Vec::new(),
            base_level: if compaction_style == CompactionStyle::Level {
                1
            } else {
                -1
            },
            level_multiplier: 0.0,
            level_max_bytes: vec![0; num_levels],
            accumulated_file_size: 0,
            accumulated_raw_key_size: 0,
            accumulated_raw_value_size: 0,
            accumulated_num_non_deletions: 0,
            accumulated_num_deletions: 0,
            current_num_non_deletions: 0,
            current_num_deletions: 0,
            current_num_samples: 0,
            estimated_compaction_needed_bytes: 0,
            finalized: false,
            force_consistency_checks,
        };
        if let Some(base) = base {
            info.accumulated_file_size = base.accumulated_file_size;
            info.accumulated_raw_key_size = base.accumulated_raw_key_size;
            info.accumulated_raw_value_size = base.accumulated_raw_value_size;
            info.accumulated_num_non_deletions = base.accumulated_num_non_deletions;
            info.accumulated_num_deletions = base.accumulated_num_deletions;
            info.current_num_non_deletions = base.current_num_non_deletions;
            info.current_num_deletions = base.current_num_deletions;
            info.current_num_samples = base.current_num_samples;
            info.oldest_snapshot_seqnum = base.oldest_snapshot_seqnum;
        }
        info
    }

    pub fn internal_comparator(&self) -> &InternalKeyComparator {
        &self.icmp
    }

    pub fn user_comparator(&self) -> &dyn Comparator {
        self.icmp.user_comparator().as_ref()
    }

    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    pub fn num_non_empty_levels(&self) -> usize {
        debug_assert!(self.finalized);
        self.num_non_empty_levels
    }

    pub fn compaction_style(&self) -> CompactionStyle {
        self.compaction_style
    }

    pub fn force_consistency_checks(&self) -> bool {
        self.force_consistency_checks
    }

    pub fn finalized(&self) -> bool {
        self.finalized
    }

    pub fn level_files(&self, level: usize) -> &[Arc<FileMetaData>] {
        &self.files[level]
    }

    pub fn num_level_files(&self, level: usize) -> usize {
        self.files[level].len()
    }

    pub fn file_indexer(&self) -> &FileIndexer {
        &self.file_indexer
    }

    pub fn file_location(&self, file_number: u64) -> Option<FileLocation> {
        self.file_locations.get(&file_number).copied()
    }

    pub fn file_by_number(&self, file_number: u64) -> Option<(usize, &Arc<FileMetaData>)> {
        let location = self.file_location(file_number)?;
        Some((location.level, &self.files[location.level][location.position]))
    }

    pub fn blob_files(&self) -> &BTreeMap<u64, Arc<BlobFileMetaData>> {
        &self.blob_files
    }

    pub fn blob_file(&self, number: u64) -> Option<&Arc<BlobFileMetaData>> {
        self.blob_files.get(&number)
    }

    /// Appends a file to `level`. Files must arrive in the level's final order.
    pub fn add_file(&mut self, level: usize, file: Arc<FileMetaData>) {
        debug_assert!(level < self.num_levels);
        let position = self.files[level].len();
        self.file_locations
            .insert(file.number, FileLocation { level, position });
        self.files[level].push(file);
    }

    pub fn add_blob_file(&mut self, blob_file: Arc<BlobFileMetaData>) {
        self.blob_files.insert(blob_file.number, blob_file);
    }

    pub fn set_finalized(&mut self) {
        self.finalized = true;
        debug_assert!(
            self.num_non_empty_levels == self.num_levels
                || self.files[self.num_non_empty_levels..]
                    .iter()
                    .all(Vec::is_empty)
        );
    }

    pub fn update_num_non_empty_levels(&mut self) {
        self.num_non_empty_levels = self.num_levels;
        for level in (0..self.num_levels).rev() {
            if !self.files[level].is_empty() {
                return;
            }
            self.num_non_empty_levels = level;
        }
    }

    pub fn generate_file_indexer(&mut self) {
        let ucmp = self.icmp.user_comparator().clone();
        self.file_indexer.update_index(ucmp.as_ref(), &self.files);
    }

    // ---- entry statistics --------------------------------------------------

    /// Folds a file's entry counts into the running totals, once per file.
    pub fn update_accumulated_stats(&mut self, file: &FileMetaData) {
        if !file.claim_stats_init() {
            return;
        }
        self.accumulated_file_size += file.file_size;
        self.accumulated_raw_key_size += file.raw_key_size;
        self.accumulated_raw_value_size += file.raw_value_size;
        let non_deletions = file.num_entries.saturating_sub(file.num_deletions);
        self.accumulated_num_non_deletions += non_deletions;
        self.accumulated_num_deletions += file.num_deletions;
        self.current_num_non_deletions += non_deletions;
        self.current_num_deletions += file.num_deletions;
        self.current_num_samples += 1;
    }

    /// Removes a dropped file's contribution to the current-key estimates.
    pub fn remove_current_stats(&mut self, file: &FileMetaData) {
        if !file.stats_initialized() {
            return;
        }
        self.current_num_non_deletions = self
            .current_num_non_deletions
            .saturating_sub(file.num_entries.saturating_sub(file.num_deletions));
        self.current_num_deletions = self.current_num_deletions.saturating_sub(file.num_deletions);
        self.current_num_samples = self.current_num_samples.saturating_sub(1);
    }

    pub fn average_value_size(&self) -> u64 {
        if self.accumulated_num_non_deletions == 0 {
            return 0;
        }
        let raw_total = self.accumulated_raw_key_size + self.accumulated_raw_value_size;
        if raw_total == 0 {
            return 0;
        }
        (self.accumulated_raw_value_size / self.accumulated_num_non_deletions)
            .saturating_mul(self.accumulated_file_size)
            / raw_total
    }

    /// Inflates the size of deletion-heavy files so they are compacted sooner.
    ///
    /// Computed once per file; later versions reuse the stored value.
    pub fn compute_compensated_sizes(&mut self) {
        let average_value_size = self.average_value_size();
        for level in &self.files {
            for file in level {
                if file.compensated_file_size() != 0 {
                    continue;
                }
                let mut compensated = file.file_size;
                if file.num_deletions * 2 >= file.num_entries {
                    compensated += (file.num_deletions * 2 - file.num_entries)
                        * average_value_size
                        * DELETION_WEIGHT_ON_COMPACTION;
                }
                file.set_compensated_file_size(compensated);
            }
        }
    }

    /// Estimated number of live keys, scaled up when not every file was sampled.
    pub fn estimated_active_keys(&self) -> u64 {
        if self.current_num_samples == 0 {
            return 0;
        }
        if self.current_num_non_deletions <= self.current_num_deletions {
            return 0;
        }
        let estimate = self.current_num_non_deletions - self.current_num_deletions;
        let file_count: u64 = self.files.iter().map(|l| l.len() as u64).sum();
        if self.current_num_samples < file_count {
            (estimate as f64 * file_count as f64 / self.current_num_samples as f64) as u64
        } else {
            estimate
        }
    }

    // ---- level targets -----------------------------------------------------

    pub fn base_level(&self) -> i32 {
        self.base_level
    }

    pub fn level_multiplier(&self) -> f64 {
        self.level_multiplier
    }

    pub fn max_bytes_for_level(&self, level: usize) -> u64 {
        self.level_max_bytes[level]
    }

    pub fn l0_delay_trigger_count(&self) -> usize {
        self.l0_delay_trigger_count
    }

    /// Computes per-level byte targets and the base level.
    ///
    /// Static targets grow by the multiplier from `max_bytes_for_level_base`.
    /// With dynamic level bytes the last level's actual size anchors the
    /// targets and L0 compacts into the first level that needs data.
    pub fn calculate_base_bytes(&mut self, ioptions: &ImmutableCfOptions, options: &MutableCfOptions) {
        let mut num_l0_count = self.files[0].len();
        if self.compaction_style == CompactionStyle::Universal {
            num_l0_count += (1..self.num_levels)
                .filter(|&i| !self.files[i].is_empty())
                .count();
        }
        self.l0_delay_trigger_count = num_l0_count;

        let num_levels = self.num_levels;
        self.level_max_bytes = vec![0; num_levels];
        if !ioptions.level_compaction_dynamic_level_bytes {
            self.base_level = if ioptions.compaction_style == CompactionStyle::Level {
                1
            } else {
                -1
            };
            for i in 0..num_levels {
                self.level_max_bytes[i] =
                    if i == 0 && ioptions.compaction_style == CompactionStyle::Universal {
                        options.max_bytes_for_level_base
                    } else if i > 1 {
                        multiply_check_overflow(
                            multiply_check_overflow(
                                self.level_max_bytes[i - 1],
                                options.max_bytes_for_level_multiplier,
                            ),
                            options.max_bytes_multiplier_additional(i - 1) as f64,
                        )
                    } else {
                        options.max_bytes_for_level_base
                    };
            }
            return;
        }

        let mut max_level_size = 0u64;
        let mut first_non_empty_level: Option<usize> = None;
        for i in 1..num_levels {
            let total: u64 = self.files[i].iter().map(|f| f.file_size).sum();
            if total > 0 && first_non_empty_level.is_none() {
                first_non_empty_level = Some(i);
            }
            max_level_size = max_level_size.max(total);
        }

        for target in self.level_max_bytes.iter_mut() {
            *target = u64::MAX;
        }

        let Some(first_non_empty_level) = first_non_empty_level.filter(|_| max_level_size > 0) else {
            // Nothing below L0: it compacts straight into the last level.
            self.base_level = num_levels as i32 - 1;
            return;
        };

        let multiplier = options.max_bytes_for_level_multiplier;
        let l0_size: u64 = self.files[0].iter().map(|f| f.file_size).sum();
        let base_bytes_max = options.max_bytes_for_level_base.max(l0_size);
        let base_bytes_min = (base_bytes_max as f64 / multiplier) as u64;

        let mut cur_level_size = max_level_size;
        let mut i = num_levels as i64 - 2;
        while i >= first_non_empty_level as i64 {
            cur_level_size = (cur_level_size as f64 / multiplier) as u64;
            i -= 1;
        }

        let mut base_level_size;
        if cur_level_size <= base_bytes_min {
            base_level_size = base_bytes_min + 1;
            self.base_level = first_non_empty_level as i32;
            log::info!(
                "more existing levels than needed, level multiplier may not be guaranteed"
            );
        } else {
            self.base_level = first_non_empty_level as i32;
            while self.base_level > 1 && cur_level_size > base_bytes_max {
                self.base_level -= 1;
                cur_level_size = (cur_level_size as f64 / multiplier) as u64;
            }
            base_level_size = if cur_level_size > base_bytes_max {
                base_bytes_max
            } else {
                cur_level_size
            };
        }

        self.level_multiplier = multiplier;
        if l0_size > base_level_size
            && (l0_size > options.max_bytes_for_level_base
                || self.files[0].len() / 2 >= options.level0_file_num_compaction_trigger)
        {
            base_level_size = l0_size;
            if self.base_level as usize == num_levels - 1 {
                self.level_multiplier = 1.0;
            } else {
                self.level_multiplier = (max_level_size as f64 / base_level_size as f64)
                    .powf(1.0 / (num_levels as f64 - self.base_level as f64 - 1.0));
            }
        }

        let mut level_size = base_level_size;
        for i in self.base_level as usize..num_levels {
            if i > self.base_level as usize {
                level_size = multiply_check_overflow(level_size, self.level_multiplier);
            }
            self.level_max_bytes[i] = level_size.max(base_bytes_max);
        }
    }

    // ---- derived orderings -------------------------------------------------

    /// Orders each non-last level's files for the compaction picker.
    pub fn update_files_by_compaction_pri(&mut self, compaction_pri: CompactionPri) {
        if matches!(
            self.compaction_style,
            CompactionStyle::None | CompactionStyle::Fifo | CompactionStyle::Universal
        ) {
            return;
        }
        for level in 0..self.num_levels.saturating_sub(1) {
            let files = &self.files[level];
            let mut order: Vec<usize> = (0..files.len()).collect();
            match compaction_pri {
                CompactionPri::ByCompensatedSize => {
                    let num = NUMBER_FILES_TO_SORT.min(order.len());
                    let by_size_desc = |a: &usize, b: &usize| {
                        files[*b]
                            .compensated_file_size()
                            .cmp(&files[*a].compensated_file_size())
                    };
                    if num > 0 && num < order.len() {
                        order.select_nth_unstable_by(num - 1, by_size_desc);
                    }
                    order[..num].sort_by(by_size_desc);
                }
                CompactionPri::OldestLargestSeqFirst => {
                    order.sort_by_key(|&i| files[i].largest_seqno);
                }
                CompactionPri::OldestSmallestSeqFirst => {
                    order.sort_by_key(|&i| files[i].smallest_seqno);
                }
                CompactionPri::MinOverlappingRatio => {
                    let ratios = overlapping_ratios(&self.icmp, files, &self.files[level + 1]);
                    order.sort_by_key(|&i| ratios[i]);
                }
            }
            self.files_by_compaction_pri[level] = order;
            self.next_file_to_compact_by_size[level] = 0;
        }
    }

    pub fn files_by_compaction_pri(&self, level: usize) -> &[usize] {
        &self.files_by_compaction_pri[level]
    }

    pub fn next_compaction_index(&self, level: usize) -> usize {
        self.next_file_to_compact_by_size[level]
    }

    pub fn set_next_compaction_index(&mut self, level: usize, index: usize) {
        self.next_file_to_compact_by_size[level] = index;
    }

    /// Records whether level-0 files happen to be pairwise disjoint.
    pub fn generate_level0_non_overlapping(&mut self) {
        self.level0_non_overlapping = true;
        let mut sorted: Vec<&Arc<FileMetaData>> = self.files[0].iter().collect();
        sorted.sort_by(|a, b| self.icmp.compare(a.smallest.encode(), b.smallest.encode()));
        for pair in sorted.windows(2) {
            if self
                .icmp
                .compare(pair[0].largest.encode(), pair[1].smallest.encode())
                != Ordering::Less
            {
                self.level0_non_overlapping = false;
                break;
            }
        }
    }

    pub fn level0_non_overlapping(&self) -> bool {
        self.level0_non_overlapping
    }

    /// Collects files with no older data overlapping their key range.
    pub fn generate_bottommost_files(&mut self) {
        let mut bottommost = Vec::new();
        for level in 0..self.num_levels {
            for (idx, file) in self.files[level].iter().enumerate() {
                let l0_idx = (level == 0).then_some(idx);
                if !self.range_might_exist_after_sorted_run(
                    file.smallest.user_key(),
                    file.largest.user_key(),
                    level,
                    l0_idx,
                ) {
                    bottommost.push((level, file.clone()));
                }
            }
        }
        self.bottommost_files = bottommost;
    }

    pub fn bottommost_files(&self) -> &[LevelFile] {
        &self.bottommost_files
    }

    /// Whether keys in `[smallest, largest]` may also live below the sorted
    /// run `last_level` (and, on L0, below file `last_l0_idx`).
    pub fn range_might_exist_after_sorted_run(
        &self,
        smallest_user_key: &[u8],
        largest_user_key: &[u8],
        last_level: usize,
        last_l0_idx: Option<usize>,
    ) -> bool {
        debug_assert_eq!(last_l0_idx.is_some(), last_level == 0);
        if last_level == 0 && last_l0_idx != Some(self.files[0].len().saturating_sub(1)) {
            return true;
        }
        for level in last_level + 1..self.num_levels {
            if !self.files[level].is_empty()
                && (last_level == 0
                    || self.overlap_in_level(level, Some(smallest_user_key), Some(largest_user_key)))
            {
                return true;
            }
        }
        false
    }

    // ---- overlap queries ---------------------------------------------------

    pub fn overlap_in_level(
        &self,
        level: usize,
        smallest_user_key: Option<&[u8]>,
        largest_user_key: Option<&[u8]>,
    ) -> bool {
        if level >= self.num_non_empty_levels {
            return false;
        }
        some_file_overlaps_range(
            &self.icmp,
            level > 0,
            &self.files[level],
            smallest_user_key,
            largest_user_key,
        )
    }

    /// Files of `level` overlapping `[begin, end]` (unbounded when `None`).
    ///
    /// On L0 the range grows to cover every overlapping file, so the result is
    /// closed under overlap. On sorted levels a binary search locates one
    /// overlapping file and the result is extended around it.
    pub fn get_overlapping_inputs(
        &self,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Vec<Arc<FileMetaData>> {
        if level >= self.num_non_empty_levels {
            return Vec::new();
        }
        if level > 0 {
            return self.get_overlapping_inputs_binary_search(level, begin, end);
        }

        let ucmp = self.user_comparator();
        let mut user_begin = begin.map(|k| k.user_key().to_vec());
        let mut user_end = end.map(|k| k.user_key().to_vec());
        let mut remaining: Vec<usize> = (0..self.files[0].len()).collect();
        let mut inputs = Vec::new();

        loop {
            let mut found = false;
            let mut i = 0;
            while i < remaining.len() {
                let file = &self.files[0][remaining[i]];
                let file_start = file.smallest.user_key();
                let file_limit = file.largest.user_key();
                let before = user_begin
                    .as_deref()
                    .is_some_and(|b| ucmp.compare_without_timestamp(file_limit, b) == Ordering::Less);
                let after = user_end
                    .as_deref()
                    .is_some_and(|e| ucmp.compare_without_timestamp(file_start, e) == Ordering::Greater);
                if before || after {
                    i += 1;
                    continue;
                }
                inputs.push(file.clone());
                found = true;
                remaining.remove(i);
                if let Some(b) = user_begin.as_mut() {
                    if ucmp.compare_without_timestamp(file_start, b) == Ordering::Less {
                        *b = file_start.to_vec();
                    }
                }
                if let Some(e) = user_end.as_mut() {
                    if ucmp.compare_without_timestamp(file_limit, e) == Ordering::Greater {
                        *e = file_limit.to_vec();
                    }
                }
            }
            if !found || remaining.is_empty() {
                break;
            }
        }
        inputs
    }

    fn get_overlapping_inputs_binary_search(
        &self,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Vec<Arc<FileMetaData>> {
        let files = &self.files[level];
        let ucmp = self.user_comparator();
        let begin_key = begin.map(InternalKey::user_key);
        let end_key = end.map(InternalKey::user_key);
        let after_begin = |f: &FileMetaData| {
            begin_key.is_none_or(|b| ucmp.compare(b, f.largest.user_key()) != Ordering::Greater)
        };
        let before_end = |f: &FileMetaData| {
            end_key.is_none_or(|e| ucmp.compare(f.smallest.user_key(), e) != Ordering::Greater)
        };

        let (mut min, mut max) = (0i64, files.len() as i64 - 1);
        let mut found = None;
        while min <= max {
            let mid = (min + max) / 2;
            let file = &files[mid as usize];
            if !after_begin(file) {
                min = mid + 1;
            } else if !before_end(file) {
                max = mid - 1;
            } else {
                found = Some(mid as usize);
                break;
            }
        }
        let Some(mid) = found else {
            return Vec::new();
        };

        let mut start = mid;
        while start > 0 && after_begin(&files[start - 1]) {
            start -= 1;
        }
        let mut last = mid;
        while last + 1 < files.len() && before_end(&files[last + 1]) {
            last += 1;
        }
        files[start..=last].to_vec()
    }

    pub fn num_level_bytes(&self, level: usize) -> u64 {
        self.files[level].iter().map(|f| f.file_size).sum()
    }

    /// Total size of files with no overlap in the same or an older sorted run.
    pub fn estimate_live_data_size(&self) -> u64 {
        // (largest, smallest) of included files, ordered by largest
        let mut ranges: Vec<(&InternalKey, &InternalKey)> = Vec::new();
        let mut size = 0;
        for level in (0..self.num_levels).rev() {
            let mut found_end = false;
            for file in &self.files[level] {
                let lb = if found_end && level != 0 {
                    ranges.len()
                } else {
                    ranges.partition_point(|(largest, _)| {
                        self.icmp.compare(largest.encode(), file.smallest.encode()) == Ordering::Less
                    })
                };
                found_end = lb == ranges.len();
                if found_end
                    || self.icmp.compare(file.largest.encode(), ranges[lb].1.encode())
                        == Ordering::Less
                {
                    ranges.insert(lb, (&file.largest, &file.smallest));
                    size += file.file_size;
                }
            }
        }
        size
    }

    /// One-line layout summary: base level, file counts, top score.
    pub fn level_summary(&self) -> String {
        let mut out = String::new();
        if self.compaction_style == CompactionStyle::Level
            && self.num_levels > 1
            && self.level_multiplier != 0.0
            && self.base_level >= 0
        {
            out.push_str(&format!(
                "base level {} level multiplier {:.2} max bytes base {} ",
                self.base_level, self.level_multiplier, self.level_max_bytes[self.base_level as usize]
            ));
        }
        let counts: Vec<String> = self.files.iter().map(|l| l.len().to_string()).collect();
        out.push_str(&format!(
            "files[{}] max score {:.2}",
            counts.join(" "),
            self.compaction_score.first().copied().unwrap_or(0.0)
        ));
        if !self.files_marked_for_compaction.is_empty() {
            out.push_str(&format!(
                " ({} files need compaction)",
                self.files_marked_for_compaction.len()
            ));
        }
        out
    }

    /// File numbers of every table in this layout.
    pub fn live_file_numbers(&self) -> Vec<u64> {
        self.files
            .iter()
            .flat_map(|level| level.iter().map(|f| f.number))
            .collect()
    }
}

/// Index of the first file whose largest key is `>= key`.
pub fn find_file(icmp: &InternalKeyComparator, files: &[Arc<FileMetaData>], key: &[u8]) -> usize {
    files.partition_point(|f| icmp.compare(f.largest.encode(), key) == Ordering::Less)
}

/// Whether any file of a level overlaps `[smallest, largest]` user keys.
pub fn some_file_overlaps_range(
    icmp: &InternalKeyComparator,
    disjoint_sorted_files: bool,
    files: &[Arc<FileMetaData>],
    smallest_user_key: Option<&[u8]>,
    largest_user_key: Option<&[u8]>,
) -> bool {
    let ucmp = icmp.user_comparator();
    let after_file = |f: &FileMetaData| {
        smallest_user_key.is_some_and(|k| {
            ucmp.compare_without_timestamp(k, f.largest.user_key()) == Ordering::Greater
        })
    };
    let before_file = |f: &FileMetaData| {
        largest_user_key.is_some_and(|k| {
            ucmp.compare_without_timestamp(k, f.smallest.user_key()) == Ordering::Less
        })
    };

    if !disjoint_sorted_files {
        return files.iter().any(|f| !after_file(f) && !before_file(f));
    }

    let index = match smallest_user_key {
        Some(k) => {
            let small = InternalKey::new(k, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
            find_file(icmp, files, small.encode())
        }
        None => 0,
    };
    if index >= files.len() {
        return false;
    }
    !before_file(&files[index])
}

fn overlapping_ratios(
    icmp: &InternalKeyComparator,
    files: &[Arc<FileMetaData>],
    next_level_files: &[Arc<FileMetaData>],
) -> Vec<u64> {
    let mut next = 0;
    let mut ratios = Vec::with_capacity(files.len());
    for file in files {
        let mut overlapping_bytes = 0u64;
        while next < next_level_files.len()
            && icmp.compare(next_level_files[next].largest.encode(), file.smallest.encode())
                == Ordering::Less
        {
            next += 1;
        }
        while next < next_level_files.len()
            && icmp.compare(next_level_files[next].smallest.encode(), file.largest.encode())
                == Ordering::Less
        {
            overlapping_bytes += next_level_files[next].file_size;
            if icmp.compare(next_level_files[next].largest.encode(), file.largest.encode())
                == Ordering::Greater
            {
                break;
            }
            next += 1;
        }
        let compensated = file.compensated_file_size().max(1);
        ratios.push(overlapping_bytes * 1024 / compensated);
    }
    ratios
}

/// `op1 * op2`, or `op1` unchanged when the product would overflow.
pub fn multiply_check_overflow(op1: u64, op2: f64) -> u64 {
    if op1 == 0 || op2 <= 0.0 {
        return 0;
    }
    if ((u64::MAX / op1) as f64) < op2 {
        return op1;
    }
    (op1 as f64 * op2) as u64
}
