//! Compaction-priority scoring and the marked-for-compaction file sets.
//!
//! A score of 1.0 or more means the level needs compaction. After scoring,
//! levels are ranked so `compaction_level(0)` is the most urgent input level.

use crate::filename::table_file_name;
use crate::options::{CompactionStyle, ImmutableCfOptions, MutableCfOptions};
use crate::types::{MAX_SEQUENCE_NUMBER, SequenceNumber};
use crate::version::file_meta::{FileMetaData, UNKNOWN_TIME};
use crate::version::storage_info::{LevelFile, VersionStorageInfo};
use std::sync::Arc;

impl VersionStorageInfo {
    /// Highest level that may be picked as a compaction input, if any.
    pub fn max_input_level(&self) -> Option<usize> {
        if self.compaction_style == CompactionStyle::Level {
            self.num_levels.checked_sub(2)
        } else {
            Some(0)
        }
    }

    pub fn compaction_score(&self, index: usize) -> f64 {
        self.compaction_score[index]
    }

    pub fn compaction_score_level(&self, index: usize) -> usize {
        self.compaction_level[index]
    }

    /// Score computed for `level`, wherever it ranks.
    pub fn score_for_level(&self, level: usize) -> f64 {
        self.compaction_level
            .iter()
            .position(|&l| l == level)
            .map_or(0.0, |i| self.compaction_score[i])
    }

    pub fn files_marked_for_compaction(&self) -> &[LevelFile] {
        &self.files_marked_for_compaction
    }

    pub fn expired_ttl_files(&self) -> &[LevelFile] {
        &self.expired_ttl_files
    }

    pub fn files_marked_for_periodic_compaction(&self) -> &[LevelFile] {
        &self.files_marked_for_periodic_compaction
    }

    pub fn files_marked_for_forced_blob_gc(&self) -> &[LevelFile] {
        &self.files_marked_for_forced_blob_gc
    }

    pub fn bottommost_files_marked_for_compaction(&self) -> &[LevelFile] {
        &self.bottommost_files_marked_for_compaction
    }

    pub fn estimated_compaction_needed_bytes(&self) -> u64 {
        self.estimated_compaction_needed_bytes
    }

    /// Scores every input level, ranks them and refreshes the marked sets.
    pub fn compute_compaction_score(
        &mut self,
        ioptions: &ImmutableCfOptions,
        options: &MutableCfOptions,
    ) {
        if let Some(max_input_level) = self.max_input_level() {
            for level in 0..=max_input_level.min(self.num_levels.saturating_sub(1)) {
                let score = if level == 0 {
                    self.level0_score(ioptions, options)
                } else {
                    let bytes: u64 = self.files[level]
                        .iter()
                        .filter(|f| !f.being_compacted())
                        .map(|f| f.compensated_file_size())
                        .sum();
                    bytes as f64 / self.max_bytes_for_level(level) as f64
                };
                self.compaction_level[level] = level;
                self.compaction_score[level] = score;
            }
        }

        // Bubble sort: highest score first; the level count is tiny.
        let n = self.num_levels;
        for i in 0..n.saturating_sub(2) {
            for j in i + 1..n - 1 {
                if self.compaction_score[i] < self.compaction_score[j] {
                    self.compaction_score.swap(i, j);
                    self.compaction_level.swap(i, j);
                }
            }
        }

        self.compute_files_marked_for_compaction();
        self.compute_bottommost_files_marked_for_compaction();
        if options.ttl > 0 {
            self.compute_expired_ttl_files(ioptions, options.ttl);
        }
        if options.periodic_compaction_seconds > 0 {
            self.compute_files_marked_for_periodic_compaction(
                ioptions,
                options.periodic_compaction_seconds,
            );
        }
        if options.enable_blob_garbage_collection
            && options.blob_garbage_collection_age_cutoff > 0.0
            && options.blob_garbage_collection_force_threshold < 1.0
        {
            self.compute_files_marked_for_forced_blob_gc(
                options.blob_garbage_collection_age_cutoff,
                options.blob_garbage_collection_force_threshold,
            );
        }
        self.estimate_compaction_bytes_needed(options);
    }

    fn level0_score(&self, ioptions: &ImmutableCfOptions, options: &MutableCfOptions) -> f64 {
        let mut num_sorted_runs = 0usize;
        let mut total_size = 0u64;
        for file in &self.files[0] {
            if !file.being_compacted() {
                total_size += file.compensated_file_size();
                num_sorted_runs += 1;
            }
        }
        if self.compaction_style == CompactionStyle::Universal {
            // each non-empty lower level is one more sorted run
            num_sorted_runs += (1..self.num_levels)
                .filter(|&i| self.files[i].first().is_some_and(|f| !f.being_compacted()))
                .count();
        }

        let trigger = options.level0_file_num_compaction_trigger.max(1) as f64;
        if self.compaction_style == CompactionStyle::Fifo {
            let fifo = &options.compaction_options_fifo;
            let mut score = total_size as f64 / fifo.max_table_files_size.max(1) as f64;
            if fifo.allow_compaction || fifo.age_for_warm > 0 {
                score = score.max(num_sorted_runs as f64 / trigger);
            }
            if options.ttl > 0 {
                let expired = expired_ttl_files_count(ioptions, options.ttl, &self.files[0]);
                score = score.max(expired as f64);
            }
            return score;
        }

        let mut score = num_sorted_runs as f64 / trigger;
        if self.compaction_style == CompactionStyle::Level && self.num_levels > 1 {
            // Oversized L0 files from intra-L0 compaction also count.
            let mut l0_target_size = options.max_bytes_for_level_base;
            if ioptions.level_compaction_dynamic_level_bytes
                && self.level_multiplier != 0.0
                && self.base_level >= 0
            {
                l0_target_size = l0_target_size.max(
                    (self.level_max_bytes[self.base_level as usize] as f64 / self.level_multiplier)
                        as u64,
                );
            }
            score = score.max(total_size as f64 / l0_target_size.max(1) as f64);
        }
        score
    }

    /// Marked files, excluding the last level holding data.
    fn compute_files_marked_for_compaction(&mut self) {
        let mut last_qualify_level = 0;
        for level in (1..self.num_levels).rev() {
            if !self.files[level].is_empty() {
                last_qualify_level = level - 1;
                break;
            }
        }
        self.files_marked_for_compaction = (0..=last_qualify_level.min(self.num_levels.saturating_sub(1)))
            .flat_map(|level| {
                self.files[level]
                    .iter()
                    .filter(|f| !f.being_compacted() && f.marked_for_compaction)
                    .map(move |f| (level, f.clone()))
            })
            .collect();
    }

    /// Bottommost files whose newest entry is older than every snapshot;
    /// files still visible to a snapshot lower the re-check threshold.
    pub(super) fn compute_bottommost_files_marked_for_compaction(&mut self) {
        self.bottommost_files_marked_for_compaction.clear();
        self.bottommost_files_mark_threshold = MAX_SEQUENCE_NUMBER;
        for (level, file) in &self.bottommost_files {
            if file.being_compacted() || file.largest_seqno == 0 || file.num_deletions <= 1 {
                continue;
            }
            if file.largest_seqno < self.oldest_snapshot_seqnum {
                self.bottommost_files_marked_for_compaction
                    .push((*level, file.clone()));
            } else {
                self.bottommost_files_mark_threshold =
                    self.bottommost_files_mark_threshold.min(file.largest_seqno);
            }
        }
    }

    /// Advances the oldest live snapshot; bottommost marks are recomputed
    /// when it passes the threshold.
    pub fn update_oldest_snapshot(&mut self, seqnum: SequenceNumber) {
        debug_assert!(seqnum >= self.oldest_snapshot_seqnum);
        self.oldest_snapshot_seqnum = seqnum;
        if self.oldest_snapshot_seqnum > self.bottommost_files_mark_threshold {
            self.compute_bottommost_files_marked_for_compaction();
        }
    }

    pub fn bottommost_files_mark_threshold(&self) -> SequenceNumber {
        self.bottommost_files_mark_threshold
    }

    fn compute_expired_ttl_files(&mut self, ioptions: &ImmutableCfOptions, ttl: u64) {
        self.expired_ttl_files.clear();
        let now = match ioptions.env.now_secs() {
            Ok(now) => now,
            Err(e) => {
                log::warn!("cannot read clock for ttl compaction: {e}");
                return;
            }
        };
        let cutoff = now.saturating_sub(ttl);
        for level in 0..self.num_levels.saturating_sub(1) {
            for file in &self.files[level] {
                if file.being_compacted() {
                    continue;
                }
                let oldest = file.try_get_oldest_ancester_time();
                if oldest > 0 && oldest < cutoff {
                    self.expired_ttl_files.push((level, file.clone()));
                }
            }
        }
    }

    fn compute_files_marked_for_periodic_compaction(
        &mut self,
        ioptions: &ImmutableCfOptions,
        periodic_compaction_seconds: u64,
    ) {
        self.files_marked_for_periodic_compaction.clear();
        let now = match ioptions.env.now_secs() {
            Ok(now) => now,
            Err(e) => {
                log::warn!("cannot read clock for periodic compaction: {e}");
                return;
            }
        };
        if periodic_compaction_seconds > now {
            return;
        }
        let allowed_time_limit = now - periodic_compaction_seconds;

        for level in 0..self.num_levels {
            for file in &self.files[level] {
                if file.being_compacted() {
                    continue;
                }
                let mut modification_time = file.try_get_file_creation_time();
                if modification_time == UNKNOWN_TIME {
                    modification_time = file.try_get_oldest_ancester_time();
                }
                if modification_time == UNKNOWN_TIME {
                    let path = table_file_name(&ioptions.cf_paths, file.number, file.path_id);
                    match ioptions.env.file_modification_time(&path) {
                        Ok(mtime) => modification_time = mtime,
                        Err(e) => {
                            log::warn!(
                                "cannot get modification time of {}: {e}",
                                path.display()
                            );
                            continue;
                        }
                    }
                }
                if modification_time > 0 && modification_time < allowed_time_limit {
                    self.files_marked_for_periodic_compaction
                        .push((level, file.clone()));
                }
            }
        }
    }

    /// Marks the tables keeping the oldest blob batch alive once that batch's
    /// garbage ratio reaches `force_threshold`.
    fn compute_files_marked_for_forced_blob_gc(&mut self, age_cutoff: f64, force_threshold: f64) {
        self.files_marked_for_forced_blob_gc.clear();
        if self.blob_files.is_empty() {
            return;
        }
        let cutoff_count =
            ((age_cutoff * self.blob_files.len() as f64) as usize).min(self.blob_files.len());
        if cutoff_count == 0 {
            return;
        }

        let blob_files: Vec<_> = self.blob_files.values().collect();
        let oldest = blob_files[0];
        if oldest.linked_ssts.is_empty() {
            return;
        }

        // The oldest batch is the oldest file plus the following files no
        // table links to directly.
        let mut count = 1;
        let mut sum_total = oldest.total_blob_bytes;
        let mut sum_garbage = oldest.garbage_blob_bytes;
        while count < cutoff_count {
            let meta = blob_files[count];
            if !meta.linked_ssts.is_empty() {
                break;
            }
            sum_total += meta.total_blob_bytes;
            sum_garbage += meta.garbage_blob_bytes;
            count += 1;
        }
        if count < blob_files.len() && blob_files[count].linked_ssts.is_empty() {
            // batch extends beyond the age cutoff
            return;
        }
        if (sum_garbage as f64) < force_threshold * sum_total as f64 {
            return;
        }

        let mut marked = Vec::new();
        for sst in &oldest.linked_ssts {
            let Some(location) = self.file_location(*sst) else {
                continue;
            };
            let file = &self.files[location.level][location.position];
            if file.being_compacted() {
                continue;
            }
            marked.push((location.level, file.clone()));
        }
        self.files_marked_for_forced_blob_gc = marked;
    }

    /// Bytes that compactions must rewrite to bring every level under target.
    pub fn estimate_compaction_bytes_needed(&mut self, options: &MutableCfOptions) {
        if self.compaction_style != CompactionStyle::Level {
            self.estimated_compaction_needed_bytes = 0;
            return;
        }

        let mut bytes_compact_to_next_level = 0u64;
        let mut level_size: u64 = self.files[0].iter().map(|f| f.file_size).sum();
        let level0_compact_triggered = self.files[0].len()
            >= options.level0_file_num_compaction_trigger
            || level_size >= options.max_bytes_for_level_base;
        if level0_compact_triggered {
            self.estimated_compaction_needed_bytes = level_size;
            bytes_compact_to_next_level = level_size;
        } else {
            self.estimated_compaction_needed_bytes = 0;
        }

        let (Some(max_input_level), true) = (self.max_input_level(), self.base_level >= 0) else {
            return;
        };
        let mut bytes_next_level = 0u64;
        for level in self.base_level as usize..=max_input_level {
            if bytes_next_level > 0 {
                level_size = bytes_next_level;
                bytes_next_level = 0;
            } else {
                level_size = self.files[level].iter().map(|f| f.file_size).sum();
            }
            if level == self.base_level as usize && level0_compact_triggered {
                self.estimated_compaction_needed_bytes += level_size;
            }
            level_size += bytes_compact_to_next_level;
            bytes_compact_to_next_level = 0;
            let level_target = self.max_bytes_for_level(level);
            if level_size > level_target {
                bytes_compact_to_next_level = level_size - level_target;
                if level + 1 < self.num_levels {
                    bytes_next_level = self.files[level + 1].iter().map(|f| f.file_size).sum();
                }
                if bytes_next_level > 0 {
                    let fan_out = bytes_next_level as f64 / level_size as f64 + 1.0;
                    self.estimated_compaction_needed_bytes +=
                        (bytes_compact_to_next_level as f64 * fan_out) as u64;
                }
            }
        }
    }
}

/// Files whose oldest ancestor predates `now - ttl`.
fn expired_ttl_files_count(
    ioptions: &ImmutableCfOptions,
    ttl: u64,
    files: &[Arc<FileMetaData>],
) -> usize {
    let Ok(now) = ioptions.env.now_secs() else {
        return 0;
    };
    let cutoff = now.saturating_sub(ttl);
    files
        .iter()
        .filter(|f| !f.being_compacted())
        .filter(|f| {
            let oldest = f.try_get_oldest_ancester_time();
            oldest != 0 && oldest < cutoff
        })
        .count()
}
