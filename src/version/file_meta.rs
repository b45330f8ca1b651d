use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::types::{InternalKey, SequenceNumber};

/// Sentinel for "no blob file referenced".
pub const INVALID_BLOB_FILE_NUMBER: u64 = 0;

/// Sentinel for unknown ancestor/creation times.
pub const UNKNOWN_TIME: u64 = 0;

/// Metadata for one sorted table file.
///
/// Shared by every `Version` that contains the file. Everything except the
/// compaction bookkeeping flags is immutable once the file is added.
#[derive(Debug)]
pub struct FileMetaData {
    pub number: u64,
    pub path_id: u32,
    pub file_size: u64,
    pub smallest: InternalKey,
    pub largest: InternalKey,
    pub smallest_seqno: SequenceNumber,
    pub largest_seqno: SequenceNumber,
    pub num_entries: u64,
    pub num_deletions: u64,
    pub raw_key_size: u64,
    pub raw_value_size: u64,
    pub marked_for_compaction: bool,
    pub oldest_blob_file_number: u64,
    pub oldest_ancester_time: u64,
    pub file_creation_time: u64,
    /// `file_size` inflated for deletion density; 0 until computed.
    compensated_file_size: AtomicU64,
    being_compacted: AtomicBool,
    /// Set once the file has contributed to a version's accumulated stats.
    init_stats_from_file: AtomicBool,
}

impl FileMetaData {
    pub fn new(
        number: u64,
        file_size: u64,
        smallest: InternalKey,
        largest: InternalKey,
        smallest_seqno: SequenceNumber,
        largest_seqno: SequenceNumber,
    ) -> Self {
        FileMetaData {
            number,
            path_id: 0,
            file_size,
            smallest,
            largest,
            smallest_seqno,
            largest_seqno,
            num_entries: 0,
            num_deletions: 0,
            raw_key_size: 0,
            raw_value_size: 0,
            marked_for_compaction: false,
            oldest_blob_file_number: INVALID_BLOB_FILE_NUMBER,
            oldest_ancester_time: UNKNOWN_TIME,
            file_creation_time: UNKNOWN_TIME,
            compensated_file_size: AtomicU64::new(0),
            being_compacted: AtomicBool::new(false),
            init_stats_from_file: AtomicBool::new(false),
        }
    }

    pub fn with_entry_stats(
        mut self,
        num_entries: u64,
        num_deletions: u64,
        raw_key_size: u64,
        raw_value_size: u64,
    ) -> Self {
        self.num_entries = num_entries;
        self.num_deletions = num_deletions;
        self.raw_key_size = raw_key_size;
        self.raw_value_size = raw_value_size;
        self
    }

    pub fn with_oldest_blob_file_number(mut self, number: u64) -> Self {
        self.oldest_blob_file_number = number;
        self
    }

    pub fn with_times(mut self, oldest_ancester_time: u64, file_creation_time: u64) -> Self {
        self.oldest_ancester_time = oldest_ancester_time;
        self.file_creation_time = file_creation_time;
        self
    }

    pub fn with_path_id(mut self, path_id: u32) -> Self {
        self.path_id = path_id;
        self
    }

    pub fn marked(mut self, marked_for_compaction: bool) -> Self {
        self.marked_for_compaction = marked_for_compaction;
        self
    }

    /// Copy of the persistent fields, with fresh bookkeeping flags.
    pub fn duplicate(&self) -> Self {
        FileMetaData {
            number: self.number,
            path_id: self.path_id,
            file_size: self.file_size,
            smallest: self.smallest.clone(),
            largest: self.largest.clone(),
            smallest_seqno: self.smallest_seqno,
            largest_seqno: self.largest_seqno,
            num_entries: self.num_entries,
            num_deletions: self.num_deletions,
            raw_key_size: self.raw_key_size,
            raw_value_size: self.raw_value_size,
            marked_for_compaction: self.marked_for_compaction,
            oldest_blob_file_number: self.oldest_blob_file_number,
            oldest_ancester_time: self.oldest_ancester_time,
            file_creation_time: self.file_creation_time,
            compensated_file_size: AtomicU64::new(0),
            being_compacted: AtomicBool::new(false),
            init_stats_from_file: AtomicBool::new(false),
        }
    }

    pub fn compensated_file_size(&self) -> u64 {
        self.compensated_file_size.load(Ordering::Relaxed)
    }

    pub(crate) fn set_compensated_file_size(&self, size: u64) {
        self.compensated_file_size.store(size, Ordering::Relaxed);
    }

    pub fn being_compacted(&self) -> bool {
        self.being_compacted.load(Ordering::Relaxed)
    }

    /// Set by the compaction picker while the file is an input of a running job.
    pub fn set_being_compacted(&self, value: bool) {
        self.being_compacted.store(value, Ordering::Relaxed);
    }

    pub(crate) fn stats_initialized(&self) -> bool {
        self.init_stats_from_file.load(Ordering::Relaxed)
    }

    /// Returns true the first time it is called for this file.
    pub(crate) fn claim_stats_init(&self) -> bool {
        !self.init_stats_from_file.swap(true, Ordering::Relaxed)
    }

    /// Oldest ancestor time, falling back to `UNKNOWN_TIME`.
    pub fn try_get_oldest_ancester_time(&self) -> u64 {
        self.oldest_ancester_time
    }

    pub fn try_get_file_creation_time(&self) -> u64 {
        self.file_creation_time
    }
}

/// Metadata for one blob file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobFileMetaData {
    pub number: u64,
    pub total_blob_count: u64,
    pub total_blob_bytes: u64,
    pub garbage_blob_count: u64,
    pub garbage_blob_bytes: u64,
    /// Table files whose oldest referenced blob file is this one.
    pub linked_ssts: BTreeSet<u64>,
}

impl BlobFileMetaData {
    pub fn new(number: u64, total_blob_count: u64, total_blob_bytes: u64) -> Self {
        BlobFileMetaData {
            number,
            total_blob_count,
            total_blob_bytes,
            garbage_blob_count: 0,
            garbage_blob_bytes: 0,
            linked_ssts: BTreeSet::new(),
        }
    }

    /// All blobs are garbage and no table refers to the file.
    pub fn is_obsolete(&self) -> bool {
        self.linked_ssts.is_empty() && self.garbage_blob_count >= self.total_blob_count
    }
}
