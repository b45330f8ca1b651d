//! Applies a sequence of `VersionEdit`s to a base version and saves the
//! result as a new file layout.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::comparator::InternalKeyComparator;
use crate::error::{Error, Result};
use crate::manifest::edit::{BlobFileAddition, BlobFileGarbage, VersionEdit};
use crate::version::Version;
use crate::version::file_meta::{BlobFileMetaData, FileMetaData, INVALID_BLOB_FILE_NUMBER};
use crate::version::storage_info::VersionStorageInfo;

/// Level 0 order: newest data first.
pub fn newest_first_by_seqno(a: &FileMetaData, b: &FileMetaData) -> Ordering {
    b.largest_seqno
        .cmp(&a.largest_seqno)
        .then(b.smallest_seqno.cmp(&a.smallest_seqno))
        .then(b.number.cmp(&a.number))
}

/// Order of the sorted levels.
pub fn by_smallest_key(icmp: &InternalKeyComparator, a: &FileMetaData, b: &FileMetaData) -> Ordering {
    icmp.compare(a.smallest.encode(), b.smallest.encode())
        .then(a.number.cmp(&b.number))
}

#[derive(Default)]
struct LevelState {
    deleted_files: HashSet<u64>,
    added_files: HashMap<u64, Arc<FileMetaData>>,
}

/// A blob file as changed by the edits applied so far.
struct MutableBlobFile {
    number: u64,
    total_blob_count: u64,
    total_blob_bytes: u64,
    garbage_blob_count: u64,
    garbage_blob_bytes: u64,
    linked_ssts: BTreeSet<u64>,
}

impl MutableBlobFile {
    fn from_meta(meta: &BlobFileMetaData) -> Self {
        MutableBlobFile {
            number: meta.number,
            total_blob_count: meta.total_blob_count,
            total_blob_bytes: meta.total_blob_bytes,
            garbage_blob_count: meta.garbage_blob_count,
            garbage_blob_bytes: meta.garbage_blob_bytes,
            linked_ssts: meta.linked_ssts.clone(),
        }
    }

    fn add_garbage(&mut self, count: u64, bytes: u64) -> bool {
        let (Some(new_count), Some(new_bytes)) = (
            self.garbage_blob_count.checked_add(count),
            self.garbage_blob_bytes.checked_add(bytes),
        ) else {
            return false;
        };
        if new_count > self.total_blob_count || new_bytes > self.total_blob_bytes {
            return false;
        }
        self.garbage_blob_count = new_count;
        self.garbage_blob_bytes = new_bytes;
        true
    }

    fn to_meta(&self) -> BlobFileMetaData {
        BlobFileMetaData {
            number: self.number,
            total_blob_count: self.total_blob_count,
            total_blob_bytes: self.total_blob_bytes,
            garbage_blob_count: self.garbage_blob_count,
            garbage_blob_bytes: self.garbage_blob_bytes,
            linked_ssts: self.linked_ssts.clone(),
        }
    }
}

/// Accumulates edits on top of `base` without touching it.
///
/// Files may be added to levels beyond the configured count while
/// recovering a manifest written with more levels, as long as later edits
/// remove them again; [`VersionBuilder::check_consistency_for_num_levels`]
/// reports whether any remain.
pub struct VersionBuilder {
    base: Arc<Version>,
    icmp: InternalKeyComparator,
    num_levels: usize,
    levels: Vec<LevelState>,
    invalid_level_sizes: HashMap<usize, usize>,
    has_invalid_levels: bool,
    // Level each file touched by an edit now lives on; `None` once deleted.
    table_file_levels: HashMap<u64, Option<usize>>,
    mutable_blob_files: BTreeMap<u64, MutableBlobFile>,
}

impl VersionBuilder {
    pub fn new(base: Arc<Version>) -> Self {
        let icmp = base.internal_comparator().clone();
        let num_levels = base.storage_info().num_levels();
        VersionBuilder {
            base,
            icmp,
            num_levels,
            levels: (0..num_levels).map(|_| LevelState::default()).collect(),
            invalid_level_sizes: HashMap::new(),
            has_invalid_levels: false,
            table_file_levels: HashMap::new(),
            mutable_blob_files: BTreeMap::new(),
        }
    }

    pub fn base(&self) -> &Arc<Version> {
        &self.base
    }

    /// False if some file still sits on a level the column family does not
    /// have.
    pub fn check_consistency_for_num_levels(&self) -> bool {
        !self.has_invalid_levels && self.invalid_level_sizes.values().all(|&n| n == 0)
    }

    pub fn apply(&mut self, edit: &VersionEdit) -> Result<()> {
        // Blob files first: table additions link against them.
        for addition in &edit.blob_file_additions {
            self.apply_blob_file_addition(addition)?;
        }
        for garbage in &edit.blob_file_garbages {
            self.apply_blob_file_garbage(garbage)?;
        }
        for &(level, number) in &edit.deleted_files {
            self.apply_file_deletion(level, number)?;
        }
        for (level, file) in &edit.new_files {
            self.apply_file_addition(*level, file)?;
        }
        Ok(())
    }

    fn current_level_for_table_file(&self, number: u64) -> Option<usize> {
        match self.table_file_levels.get(&number) {
            Some(level) => *level,
            None => self
                .base
                .storage_info()
                .file_location(number)
                .map(|location| location.level),
        }
    }

    fn is_blob_file_in_version(&self, number: u64) -> bool {
        self.mutable_blob_files.contains_key(&number)
            || self.base.storage_info().blob_file(number).is_some()
    }

    fn mutable_blob_file(&mut self, number: u64) -> Option<&mut MutableBlobFile> {
        if !self.mutable_blob_files.contains_key(&number) {
            let meta = self.base.storage_info().blob_file(number)?;
            self.mutable_blob_files
                .insert(number, MutableBlobFile::from_meta(meta));
        }
        self.mutable_blob_files.get_mut(&number)
    }

    fn apply_blob_file_addition(&mut self, addition: &BlobFileAddition) -> Result<()> {
        let number = addition.blob_file_number;
        if self.is_blob_file_in_version(number) {
            return Err(Error::Corruption(format!(
                "VersionBuilder: Blob file #{number} already added"
            )));
        }
        self.mutable_blob_files.insert(
            number,
            MutableBlobFile {
                number,
                total_blob_count: addition.total_blob_count,
                total_blob_bytes: addition.total_blob_bytes,
                garbage_blob_count: 0,
                garbage_blob_bytes: 0,
                linked_ssts: BTreeSet::new(),
            },
        );
        Ok(())
    }

    fn apply_blob_file_garbage(&mut self, garbage: &BlobFileGarbage) -> Result<()> {
        let number = garbage.blob_file_number;
        let Some(meta) = self.mutable_blob_file(number) else {
            return Err(Error::Corruption(format!(
                "VersionBuilder: Blob file #{number} not found"
            )));
        };
        if !meta.add_garbage(garbage.garbage_blob_count, garbage.garbage_blob_bytes) {
            return Err(Error::Corruption(format!(
                "VersionBuilder: Garbage overflow for blob file #{number}"
            )));
        }
        Ok(())
    }

    fn oldest_blob_file_for_table_file(&self, level: usize, number: u64) -> u64 {
        if let Some(file) = self.levels[level].added_files.get(&number) {
            return file.oldest_blob_file_number;
        }
        self.base
            .storage_info()
            .file_by_number(number)
            .map_or(INVALID_BLOB_FILE_NUMBER, |(_, f)| f.oldest_blob_file_number)
    }

    fn apply_file_deletion(&mut self, level: usize, number: u64) -> Result<()> {
        let current_level = self.current_level_for_table_file(number);
        if current_level != Some(level) {
            if level >= self.num_levels {
                self.has_invalid_levels = true;
            }
            let location = match current_level {
                Some(l) => format!("on level {l}"),
                None => "not in the LSM tree".to_string(),
            };
            return Err(Error::Corruption(format!(
                "VersionBuilder: Cannot delete table file #{number} from level {level} since it is {location}"
            )));
        }

        if level >= self.num_levels {
            if let Some(size) = self.invalid_level_sizes.get_mut(&level) {
                *size = size.saturating_sub(1);
            }
            self.table_file_levels.insert(number, None);
            return Ok(());
        }

        let blob_file_number = self.oldest_blob_file_for_table_file(level, number);
        if blob_file_number != INVALID_BLOB_FILE_NUMBER {
            if let Some(meta) = self.mutable_blob_file(blob_file_number) {
                meta.linked_ssts.remove(&number);
            }
        }

        let state = &mut self.levels[level];
        state.added_files.remove(&number);
        state.deleted_files.insert(number);
        self.table_file_levels.insert(number, None);
        Ok(())
    }

    fn apply_file_addition(&mut self, level: usize, file: &Arc<FileMetaData>) -> Result<()> {
        let number = file.number;
        if let Some(current) = self.current_level_for_table_file(number) {
            if level >= self.num_levels {
                self.has_invalid_levels = true;
            }
            return Err(Error::Corruption(format!(
                "VersionBuilder: Cannot add table file #{number} to level {level} since it is already in the LSM tree on level {current}"
            )));
        }

        if level >= self.num_levels {
            *self.invalid_level_sizes.entry(level).or_insert(0) += 1;
            self.table_file_levels.insert(number, Some(level));
            return Ok(());
        }

        let state = &mut self.levels[level];
        state.deleted_files.remove(&number);
        state.added_files.insert(number, Arc::clone(file));

        if file.oldest_blob_file_number != INVALID_BLOB_FILE_NUMBER {
            if let Some(meta) = self.mutable_blob_file(file.oldest_blob_file_number) {
                meta.linked_ssts.insert(number);
            }
        }
        self.table_file_levels.insert(number, Some(level));
        Ok(())
    }

    /// Writes base plus edits into `storage`, which must be empty.
    pub fn save_to(&self, storage: &mut VersionStorageInfo) -> Result<()> {
        self.save_table_files_to(storage);
        self.save_blob_files_to(storage);
        check_consistency(storage)
    }

    fn save_table_files_to(&self, storage: &mut VersionStorageInfo) {
        let base = self.base.storage_info();
        for level in 0..self.num_levels {
            let state = &self.levels[level];
            let mut files: Vec<Arc<FileMetaData>> = Vec::new();
            for f in base.level_files(level) {
                if state.deleted_files.contains(&f.number) {
                    storage.remove_current_stats(f);
                } else if let Some(added) = state.added_files.get(&f.number) {
                    // The added metadata supersedes the base record.
                    if !Arc::ptr_eq(added, f) {
                        storage.remove_current_stats(f);
                    }
                } else {
                    files.push(Arc::clone(f));
                }
            }
            files.extend(state.added_files.values().cloned());
            if level == 0 {
                files.sort_by(|a, b| newest_first_by_seqno(a, b));
            } else {
                files.sort_by(|a, b| by_smallest_key(&self.icmp, a, b));
            }
            for f in files {
                storage.add_file(level, f);
            }
        }
    }

    fn save_blob_files_to(&self, storage: &mut VersionStorageInfo) {
        let base = self.base.storage_info();
        let mut merged: BTreeMap<u64, Arc<BlobFileMetaData>> = base.blob_files().clone();
        for (number, meta) in &self.mutable_blob_files {
            merged.insert(*number, Arc::new(meta.to_meta()));
        }

        let oldest_with_linked_ssts = merged
            .values()
            .find(|meta| !meta.linked_ssts.is_empty())
            .map_or(INVALID_BLOB_FILE_NUMBER, |meta| meta.number);

        for meta in merged.into_values() {
            if meta.linked_ssts.is_empty()
                && (meta.number < oldest_with_linked_ssts
                    || meta.garbage_blob_count >= meta.total_blob_count)
            {
                continue;
            }
            storage.add_blob_file(meta);
        }
    }
}

/// Verifies level ordering and blob links. Skipped in release builds
/// unless the column family forces the checks.
pub fn check_consistency(storage: &VersionStorageInfo) -> Result<()> {
    if !cfg!(debug_assertions) && !storage.force_consistency_checks() {
        return Ok(());
    }
    let icmp = storage.internal_comparator();
    let mut expected_linked_ssts: HashMap<u64, BTreeSet<u64>> = HashMap::new();

    for level in 0..storage.num_levels() {
        let files = storage.level_files(level);
        for pair in files.windows(2) {
            let (lhs, rhs) = (&pair[0], &pair[1]);
            if level == 0 {
                if newest_first_by_seqno(lhs, rhs) != Ordering::Less {
                    return Err(Error::Corruption(format!(
                        "VersionBuilder: L0 files are not sorted properly: file #{} vs. file #{}",
                        lhs.number, rhs.number
                    )));
                }
            } else if icmp.compare(lhs.largest.encode(), rhs.smallest.encode()) != Ordering::Less
            {
                return Err(Error::Corruption(format!(
                    "VersionBuilder: L{level} has overlapping ranges: file #{} largest key: {:?} vs. file #{} smallest key: {:?}",
                    lhs.number,
                    lhs.largest.user_key(),
                    rhs.number,
                    rhs.smallest.user_key()
                )));
            }
        }
        for f in files {
            if f.oldest_blob_file_number != INVALID_BLOB_FILE_NUMBER {
                expected_linked_ssts
                    .entry(f.oldest_blob_file_number)
                    .or_default()
                    .insert(f.number);
            }
        }
    }

    let empty = BTreeSet::new();
    for meta in storage.blob_files().values() {
        if meta.garbage_blob_count >= meta.total_blob_count {
            return Err(Error::Corruption(format!(
                "VersionBuilder: Blob file #{} consists entirely of garbage",
                meta.number
            )));
        }
        let expected = expected_linked_ssts.get(&meta.number).unwrap_or(&empty);
        if &meta.linked_ssts != expected {
            return Err(Error::Corruption(format!(
                "VersionBuilder: Links are inconsistent between table files and blob file #{}",
                meta.number
            )));
        }
    }
    Ok(())
}
