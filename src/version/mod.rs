//! Immutable snapshots of a column family's file layout and the read path
//! over them.

pub mod batch;
pub mod builder;
pub mod file_indexer;
pub mod file_meta;
pub mod get_context;
pub mod picker;
pub mod picker_multi;
mod score;
pub mod storage_info;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use log::error;

use crate::blob::{BlobIndex, BlobReadRequest, is_valid_blob_offset};
use crate::comparator::InternalKeyComparator;
use crate::error::{Error, Result};
use crate::merge::MergeContext;
use crate::options::{ImmutableCfOptions, MutableCfOptions, ReadOptions, ReadTier};
use crate::statistics::{Histogram, Ticker};
use crate::types::{LookupKey, MAX_SEQUENCE_NUMBER, SequenceNumber};
use crate::version::batch::{BatchRange, BatchState, MAX_BATCH_SIZE};
use crate::version::file_meta::FileMetaData;
use crate::version::get_context::{BlobFetcher, GetContext, GetState, KeyContext};
use crate::version::picker::FilePicker;
use crate::version::picker_multi::FilePickerMultiGet;
use crate::version::storage_info::VersionStorageInfo;

const UNEXPECTED_BLOB_INDEX: &str =
    "Encounter unexpected blob index. Please open DB with BlobDB instead.";

/// One immutable layout of a column family.
///
/// Readers share a `Version` through an `Arc` and never lock: after
/// [`Version::finalize`] nothing reachable from it changes except the
/// compaction flags on file metadata.
pub struct Version {
    cf_id: u32,
    version_number: u64,
    storage: VersionStorageInfo,
    ioptions: Arc<ImmutableCfOptions>,
    mutable_options: MutableCfOptions,
}

impl std::fmt::Debug for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Version")
            .field("cf_id", &self.cf_id)
            .field("version_number", &self.version_number)
            .field("summary", &self.storage.level_summary())
            .finish()
    }
}

impl Version {
    pub fn new(
        cf_id: u32,
        version_number: u64,
        storage: VersionStorageInfo,
        ioptions: Arc<ImmutableCfOptions>,
        mutable_options: MutableCfOptions,
    ) -> Self {
        Version {
            cf_id,
            version_number,
            storage,
            ioptions,
            mutable_options,
        }
    }

    pub fn cf_id(&self) -> u32 {
        self.cf_id
    }

    pub fn version_number(&self) -> u64 {
        self.version_number
    }

    pub fn storage_info(&self) -> &VersionStorageInfo {
        &self.storage
    }

    pub fn ioptions(&self) -> &Arc<ImmutableCfOptions> {
        &self.ioptions
    }

    pub fn mutable_options(&self) -> &MutableCfOptions {
        &self.mutable_options
    }

    pub fn internal_comparator(&self) -> &InternalKeyComparator {
        self.storage.internal_comparator()
    }

    /// Derives the lookup and compaction structures from the file lists.
    pub fn prepare_apply(&mut self) {
        let files: Vec<Arc<FileMetaData>> = (0..self.storage.num_levels())
            .flat_map(|level| self.storage.level_files(level).to_vec())
            .collect();
        for file in &files {
            self.storage.update_accumulated_stats(file);
        }
        self.storage.compute_compensated_sizes();
        self.storage.update_num_non_empty_levels();
        self.storage
            .calculate_base_bytes(&self.ioptions, &self.mutable_options);
        self.storage
            .update_files_by_compaction_pri(self.ioptions.compaction_pri);
        self.storage.generate_file_indexer();
        self.storage.generate_level0_non_overlapping();
        self.storage.generate_bottommost_files();
    }

    /// Scores the layout and freezes it. Runs once, just before install.
    pub fn finalize(&mut self) {
        self.storage
            .compute_compaction_score(&self.ioptions, &self.mutable_options);
        self.storage.set_finalized();
    }

    /// Whether filters can be bypassed for a file on `level`: lookups that
    /// reach the last non-empty level are expected to hit.
    fn is_filter_skipped(&self, level: usize, is_file_last_in_level: bool) -> bool {
        self.ioptions.optimize_filters_for_hits
            && (level > 0 || is_file_last_in_level)
            && level + 1 == self.storage.num_non_empty_levels()
    }

    fn record_tick(&self, ticker: Ticker) {
        if let Some(stats) = &self.ioptions.statistics {
            stats.record_tick(ticker, 1);
        }
    }

    fn record_in_histogram(&self, histogram: Histogram, value: u64) {
        if let Some(stats) = &self.ioptions.statistics {
            stats.record_in_histogram(histogram, value);
        }
    }

    fn record_hit_level(&self, level: usize) {
        match level {
            0 => self.record_tick(Ticker::GetHitL0),
            1 => self.record_tick(Ticker::GetHitL1),
            _ => self.record_tick(Ticker::GetHitL2AndUp),
        }
    }

    // ---- point lookup -------------------------------------------------------

    /// Looks `key` up across every level.
    ///
    /// `merge_context` carries operands already collected from newer data;
    /// `max_covering_tombstone_seq` is both the newest range tombstone known
    /// to cover the key and, on return, the newest one seen in this version.
    /// A missing or deleted key is `Err(Error::NotFound)`.
    pub fn get(
        &self,
        read_options: &ReadOptions,
        key: &LookupKey,
        merge_context: MergeContext,
        max_covering_tombstone_seq: &mut SequenceNumber,
    ) -> Result<Vec<u8>> {
        let user_key = key.user_key();
        let ikey = key.internal_key();
        let blob_fetcher = VersionBlobFetcher {
            version: self,
            read_options,
        };
        let mut get_context = GetContext::new(
            self.storage.user_comparator(),
            self.ioptions.merge_operator.as_deref(),
            user_key,
            merge_context,
            *max_covering_tombstone_seq,
        )
        .with_blob_fetcher(&blob_fetcher);

        let result = self.get_with_context(read_options, ikey, &mut get_context);
        *max_covering_tombstone_seq = get_context.max_covering_tombstone_seq();
        result
    }

    /// [`Version::get`] over a caller-built context, which is left holding
    /// the lookup's final state (for example whether the key may exist when
    /// a blob read needed I/O).
    pub fn get_with_context(
        &self,
        read_options: &ReadOptions,
        ikey: &[u8],
        get_context: &mut GetContext<'_>,
    ) -> Result<Vec<u8>> {
        let user_key = get_context.user_key().to_vec();
        let table_cache = &self.ioptions.table_cache;
        let mut picker = FilePicker::new(
            &self.storage,
            self.storage.num_non_empty_levels(),
            &user_key,
            ikey,
        );
        if !picker.is_exhausted() {
            for file in self.storage.level_files(0) {
                table_cache.prepare(file, ikey);
            }
        }

        while let Some(picked) = picker.next_file() {
            if get_context.max_covering_tombstone_seq() > 0 {
                // Everything in lower files is covered.
                break;
            }
            table_cache.get(
                read_options,
                picked.file,
                ikey,
                get_context,
                self.is_filter_skipped(picked.level, picked.last_in_level),
            )?;

            match get_context.state() {
                GetState::NotFound | GetState::Merge => {}
                GetState::Found => {
                    self.record_hit_level(picked.level);
                    let value = get_context.take_value();
                    if get_context.is_blob_index() {
                        return self
                            .get_blob(read_options, &user_key, &value)
                            .inspect_err(|e| {
                                if e.is_incomplete() {
                                    get_context.mark_key_may_exist();
                                }
                            });
                    }
                    return Ok(value);
                }
                GetState::Deleted => return Err(Error::NotFound),
                GetState::Corrupt => {
                    return Err(get_context
                        .take_merge_error()
                        .unwrap_or_else(|| corrupted_key(&user_key)));
                }
                GetState::UnexpectedBlobIndex => {
                    error!("Encounter unexpected blob index.");
                    return Err(Error::NotSupported(UNEXPECTED_BLOB_INDEX.into()));
                }
            }
        }

        if get_context.state() == GetState::Merge {
            // Reached the start of the key's history: merge onto nothing.
            return get_context.finish_merge();
        }
        Err(Error::NotFound)
    }

    /// Latest visible value of `user_key`, `None` when absent or deleted.
    pub fn lookup(&self, read_options: &ReadOptions, user_key: &[u8]) -> Result<Option<Vec<u8>>> {
        let snapshot = read_options.snapshot.unwrap_or(MAX_SEQUENCE_NUMBER);
        let key = LookupKey::new(user_key, snapshot);
        let mut max_covering_tombstone_seq = 0;
        match self.get(read_options, &key, MergeContext::new(), &mut max_covering_tombstone_seq) {
            Ok(value) => Ok(Some(value)),
            Err(Error::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ---- blob values --------------------------------------------------------

    /// Reads the value a blob index points at.
    pub fn get_blob(
        &self,
        read_options: &ReadOptions,
        user_key: &[u8],
        blob_index: &[u8],
    ) -> Result<Vec<u8>> {
        if read_options.read_tier == ReadTier::BlockCacheTier {
            return Err(Error::Incomplete(
                "Cannot read blob: no disk I/O allowed".into(),
            ));
        }
        let blob_index = BlobIndex::decode(blob_index)?;
        self.get_blob_by_index(read_options, user_key, &blob_index)
    }

    fn get_blob_by_index(
        &self,
        read_options: &ReadOptions,
        user_key: &[u8],
        blob_index: &BlobIndex,
    ) -> Result<Vec<u8>> {
        if blob_index.has_ttl() || blob_index.is_inlined() {
            return Err(Error::Corruption("Unexpected TTL/inlined blob index".into()));
        }
        let file_number = blob_index.file_number();
        if self.storage.blob_file(file_number).is_none() {
            return Err(Error::Corruption("Invalid blob file number".into()));
        }
        let reader = self.blob_file_cache()?.get_blob_file_reader(file_number)?;
        if !is_valid_blob_offset(
            blob_index.offset(),
            user_key.len() as u64,
            blob_index.size(),
            reader.file_size(),
        ) {
            return Err(Error::Corruption("Invalid blob offset".into()));
        }
        if blob_index.compression() != reader.compression() {
            return Err(Error::Corruption(
                "Compression type mismatch when reading a blob".into(),
            ));
        }
        reader.get_blob(read_options, user_key, blob_index.offset(), blob_index.size())
    }

    fn blob_file_cache(&self) -> Result<&Arc<dyn crate::blob::BlobFileCache>> {
        self.ioptions
            .blob_file_cache
            .as_ref()
            .ok_or_else(|| Error::NotSupported("no blob file cache configured".into()))
    }

    // ---- batched lookup -----------------------------------------------------

    /// Serves every unmasked key of `range`; `keys[i]` is batch slot `i`,
    /// sorted by user key.
    ///
    /// On return every key of the range is done. A key's outcome is its
    /// `status` (`None` means the value in its `GetContext` is the answer).
    pub fn multi_get_range(
        &self,
        read_options: &ReadOptions,
        range: &BatchRange<'_>,
        keys: &mut [KeyContext<'_>],
    ) {
        let lookups: Vec<LookupKey> = keys.iter().map(|k| k.lookup.clone()).collect();
        let table_cache = &self.ioptions.table_cache;
        let file_picker_range = range.narrow(range.start(), range.end());
        let mut picker = FilePickerMultiGet::new(
            &self.storage,
            self.storage.num_non_empty_levels(),
            &lookups,
            &file_picker_range,
        );
        if !picker.is_exhausted() {
            for file in self.storage.level_files(0) {
                for idx in range.iter() {
                    table_cache.prepare(file, lookups[idx].internal_key());
                }
            }
        }

        let mut status: Result<()> = Ok(());
        let mut blob_requests: BTreeMap<u64, Vec<(BlobIndex, usize)>> = BTreeMap::new();
        let (mut num_index_read, mut num_filter_read) = (0u64, 0u64);
        let (mut num_data_read, mut num_sst_read) = (0u64, 0u64);

        while let Some(picked) = picker.next_file() {
            let file_range = picker.current_file_range().clone();
            if let Err(e) = table_cache.multi_get(
                read_options,
                picked.file,
                &file_range,
                keys,
                self.is_filter_skipped(picked.level, picked.last_in_level),
            ) {
                for idx in file_range.iter() {
                    keys[idx].status = Some(e.clone());
                    file_range.mark_done(idx);
                }
                for idx in range.iter() {
                    keys[idx].status = Some(Error::Incomplete(
                        "batch stopped before this key was served".into(),
                    ));
                    range.mark_done(idx);
                }
                return;
            }

            let mut batch_size = 0u64;
            let mut pos = file_range.begin();
            while status.is_ok() && pos < file_range.end() {
                let idx = pos;
                pos = file_range.advance(pos);
                let key = &mut keys[idx];
                // A reader error on this key takes precedence over its state.
                debug_assert!(!key.status.as_ref().is_some_and(Error::is_not_found));
                if key.status.is_some() {
                    file_range.mark_done(idx);
                    continue;
                }

                batch_size += 1;
                let stats = std::mem::take(&mut key.get_context.stats);
                num_index_read += stats.num_index_read;
                num_filter_read += stats.num_filter_read;
                num_data_read += stats.num_data_read;
                num_sst_read += stats.num_sst_read;

                let state = key.get_context.state();
                if matches!(state, GetState::NotFound | GetState::Merge)
                    && key.get_context.max_covering_tombstone_seq() > 0
                {
                    // Lower files only hold covered entries for this key.
                    file_picker_range.skip_key(idx);
                }
                match state {
                    GetState::NotFound | GetState::Merge => {}
                    GetState::Found => {
                        self.record_hit_level(picked.level);
                        file_range.mark_done(idx);
                        if key.get_context.is_blob_index() {
                            match BlobIndex::decode(key.get_context.value()) {
                                Ok(blob_index) => blob_requests
                                    .entry(blob_index.file_number())
                                    .or_default()
                                    .push((blob_index, idx)),
                                Err(e) => key.status = Some(e),
                            }
                        } else {
                            file_range.add_value_size(key.get_context.value().len() as u64);
                            if file_range.value_size() > read_options.value_size_soft_limit {
                                status = Err(Error::Aborted(String::new()));
                            }
                        }
                    }
                    GetState::Deleted => {
                        key.status = Some(Error::NotFound);
                        file_range.mark_done(idx);
                    }
                    GetState::Corrupt => {
                        let e = key
                            .get_context
                            .take_merge_error()
                            .unwrap_or_else(|| corrupted_key(key.lookup.user_key()));
                        key.status = Some(e);
                        file_range.mark_done(idx);
                    }
                    GetState::UnexpectedBlobIndex => {
                        error!("Encounter unexpected blob index.");
                        key.status = Some(Error::NotSupported(UNEXPECTED_BLOB_INDEX.into()));
                        file_range.mark_done(idx);
                    }
                }
            }

            if picked.last_in_level {
                self.record_in_histogram(
                    Histogram::NumIndexAndFilterBlocksReadPerLevel,
                    num_index_read + num_filter_read,
                );
                self.record_in_histogram(Histogram::NumDataBlocksReadPerLevel, num_data_read);
                self.record_in_histogram(Histogram::NumSstReadPerLevel, num_sst_read);
                num_index_read = 0;
                num_filter_read = 0;
                num_data_read = 0;
                num_sst_read = 0;
            }
            self.record_in_histogram(Histogram::SstBatchSize, batch_size);
            if status.is_err() || file_picker_range.is_empty() {
                break;
            }
        }

        if status.is_ok() && !blob_requests.is_empty() {
            self.multi_get_blob(read_options, range, keys, blob_requests);
        }

        // Keys no file answered.
        let mut pos = range.begin();
        while status.is_ok() && pos < range.end() {
            let idx = pos;
            pos = range.advance(pos);
            let key = &mut keys[idx];
            if key.get_context.state() != GetState::Merge {
                range.mark_done(idx);
                key.status = Some(Error::NotFound);
                continue;
            }
            if self.ioptions.merge_operator.is_none() {
                key.status = Some(Error::InvalidArgument(
                    "merge_operator is not properly initialized.".into(),
                ));
                range.mark_done(idx);
                continue;
            }
            match key.get_context.finish_merge() {
                Ok(merged) => {
                    range.add_value_size(merged.len() as u64);
                    range.mark_done(idx);
                    if range.value_size() > read_options.value_size_soft_limit {
                        status = Err(Error::Aborted(String::new()));
                    }
                }
                Err(e) => {
                    key.status = Some(e);
                    range.mark_done(idx);
                }
            }
        }

        let status = status.err();
        for idx in range.iter() {
            range.mark_done(idx);
            keys[idx].status = status.clone();
        }
    }

    /// Resolves the blob indexes found by a batched lookup, one blob file at
    /// a time, reading each file's blobs in offset order.
    fn multi_get_blob(
        &self,
        read_options: &ReadOptions,
        range: &BatchRange<'_>,
        keys: &mut [KeyContext<'_>],
        blob_requests: BTreeMap<u64, Vec<(BlobIndex, usize)>>,
    ) {
        if read_options.read_tier == ReadTier::BlockCacheTier {
            for (_, idx) in blob_requests.into_values().flatten() {
                let key = &mut keys[idx];
                debug_assert!(key.status.is_none());
                key.status = Some(Error::Incomplete(
                    "Cannot read blob(s): no disk I/O allowed".into(),
                ));
                key.get_context.mark_key_may_exist();
            }
            return;
        }

        for (file_number, mut blobs_in_file) in blob_requests {
            if self.storage.blob_file(file_number).is_none() {
                for (_, idx) in blobs_in_file {
                    keys[idx].status = Some(Error::Corruption("Invalid blob file number".into()));
                }
                continue;
            }
            let reader = match self
                .blob_file_cache()
                .and_then(|cache| cache.get_blob_file_reader(file_number))
            {
                Ok(reader) => reader,
                Err(e) => {
                    for (_, idx) in blobs_in_file {
                        keys[idx].status = Some(e.clone());
                    }
                    continue;
                }
            };
            let file_size = reader.file_size();
            let compression = reader.compression();

            blobs_in_file.sort_by_key(|(blob_index, _)| blob_index.offset());

            let mut slots = Vec::with_capacity(blobs_in_file.len());
            let mut user_keys = Vec::with_capacity(blobs_in_file.len());
            for (blob_index, idx) in &blobs_in_file {
                let key = &mut keys[*idx];
                if blob_index.has_ttl() || blob_index.is_inlined() {
                    key.status = Some(Error::Corruption("Unexpected TTL/inlined blob index".into()));
                    continue;
                }
                if !is_valid_blob_offset(
                    blob_index.offset(),
                    key.user_key().len() as u64,
                    blob_index.size(),
                    file_size,
                ) {
                    key.status = Some(Error::Corruption("Invalid blob offset".into()));
                    continue;
                }
                if blob_index.compression() != compression {
                    key.status = Some(Error::Corruption(
                        "Compression type mismatch when reading a blob".into(),
                    ));
                    continue;
                }
                slots.push((*idx, blob_index.offset(), blob_index.size()));
                user_keys.push(key.user_key().to_vec());
            }

            let requests: Vec<BlobReadRequest<'_>> = slots
                .iter()
                .zip(&user_keys)
                .map(|(&(_, offset, value_size), user_key)| BlobReadRequest {
                    user_key,
                    offset,
                    value_size,
                })
                .collect();
            let results = reader.multi_get_blob(read_options, &requests);

            for ((idx, _, _), result) in slots.iter().zip(results) {
                let key = &mut keys[*idx];
                match result {
                    Ok(value) => {
                        range.add_value_size(value.len() as u64);
                        key.get_context.set_value(value);
                        key.get_context.clear_blob_index();
                        if range.value_size() > read_options.value_size_soft_limit {
                            key.status = Some(Error::Aborted(String::new()));
                        }
                    }
                    Err(e) => key.status = Some(e),
                }
            }
        }
    }

    /// Looks up many keys at once.
    ///
    /// Keys are sorted internally and served in batches of
    /// [`MAX_BATCH_SIZE`]; results come back in caller order. Absent keys
    /// are `Ok(None)`.
    pub fn multi_get(
        &self,
        read_options: &ReadOptions,
        user_keys: &[&[u8]],
    ) -> Vec<Result<Option<Vec<u8>>>> {
        let snapshot = read_options.snapshot.unwrap_or(MAX_SEQUENCE_NUMBER);
        let ucmp = self.storage.user_comparator();
        let merge_operator = self.ioptions.merge_operator.as_deref();
        let blob_fetcher = VersionBlobFetcher {
            version: self,
            read_options,
        };

        let mut order: Vec<usize> = (0..user_keys.len()).collect();
        order.sort_by(|&a, &b| ucmp.compare(user_keys[a], user_keys[b]));

        let mut results: Vec<Result<Option<Vec<u8>>>> =
            (0..user_keys.len()).map(|_| Ok(None)).collect();
        for chunk in order.chunks(MAX_BATCH_SIZE) {
            let mut keys: Vec<KeyContext<'_>> = chunk
                .iter()
                .map(|&i| {
                    let get_context =
                        GetContext::new(ucmp, merge_operator, user_keys[i], MergeContext::new(), 0)
                            .with_blob_fetcher(&blob_fetcher);
                    KeyContext::new(LookupKey::new(user_keys[i], snapshot), get_context)
                })
                .collect();
            let state = BatchState::new(keys.len());
            self.multi_get_range(read_options, &state.root_range(), &mut keys);

            for (key, &i) in keys.iter_mut().zip(chunk) {
                results[i] = match key.status.take() {
                    None => Ok(Some(key.get_context.take_value())),
                    Some(Error::NotFound) => Ok(None),
                    Some(e) => Err(e),
                };
            }
        }
        results
    }

    // ---- size estimates ----------------------------------------------------

    /// Approximate bytes of table data between internal keys `start` and
    /// `end`, summed over every level.
    pub fn approximate_size(&self, start: &[u8], end: &[u8]) -> Result<u64> {
        let icmp = self.internal_comparator();
        let mut total = 0;
        for level in 0..self.storage.num_non_empty_levels() {
            for file in self.storage.level_files(level) {
                if icmp.compare(file.largest.encode(), start) == Ordering::Less {
                    continue;
                }
                if icmp.compare(file.smallest.encode(), end) != Ordering::Less {
                    if level > 0 {
                        break;
                    }
                    continue;
                }
                let covers_start = icmp.compare(start, file.smallest.encode()) != Ordering::Greater;
                let covers_end = icmp.compare(file.largest.encode(), end) == Ordering::Less;
                if covers_start && covers_end {
                    total += file.file_size;
                    continue;
                }
                let table = self.ioptions.table_cache.find_table(file)?;
                let from = if covers_start {
                    0
                } else {
                    table.approximate_offset_of(start)
                };
                let to = if covers_end {
                    file.file_size
                } else {
                    table.approximate_offset_of(end)
                };
                total += to.saturating_sub(from);
            }
        }
        Ok(total)
    }

    /// Every entry of `file`, in internal-key order.
    pub fn read_file_entries(&self, file: &FileMetaData) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let table = self.ioptions.table_cache.find_table(file)?;
        let mut iter = table.new_iterator();
        iter.seek_to_first()?;
        let mut entries = Vec::new();
        while iter.is_valid() {
            entries.push((iter.key().to_vec(), iter.value().to_vec()));
            iter.next()?;
        }
        Ok(entries)
    }

    /// Multi-line description of every file, level by level.
    pub fn debug_string(&self) -> String {
        let mut out = format!("--- version {} (cf {}) ---\n", self.version_number, self.cf_id);
        for level in 0..self.storage.num_levels() {
            let files = self.storage.level_files(level);
            out.push_str(&format!("--- level {level} --- version# {}\n", self.version_number));
            for file in files {
                out.push_str(&format!(
                    " {}:{}[{} .. {}]\n",
                    file.number,
                    file.file_size,
                    String::from_utf8_lossy(file.smallest.user_key()),
                    String::from_utf8_lossy(file.largest.user_key()),
                ));
            }
        }
        out
    }
}

fn corrupted_key(user_key: &[u8]) -> Error {
    Error::Corruption(format!(
        "corrupted key for {}",
        String::from_utf8_lossy(user_key)
    ))
}

/// Resolves blob indexes met while merging, through the version that holds
/// the blob files.
struct VersionBlobFetcher<'v> {
    version: &'v Version,
    read_options: &'v ReadOptions,
}

impl BlobFetcher for VersionBlobFetcher<'_> {
    fn fetch_blob(&self, user_key: &[u8], blob_index: &[u8]) -> Result<Vec<u8>> {
        self.version
            .get_blob(self.read_options, user_key, blob_index)
    }
}
