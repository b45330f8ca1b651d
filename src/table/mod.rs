//! Table access seams used by the read path.
//!
//! The table file format lives outside this crate; versions only need to
//! ask "which table holds this key" and hand the lookup state to a reader.

pub mod mem;

use std::sync::Arc;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::options::ReadOptions;
use crate::version::batch::BatchRange;
use crate::version::file_meta::FileMetaData;
use crate::version::get_context::{GetContext, KeyContext};

/// An opened table file.
pub trait TableReader: Send + Sync {
    /// Feeds every entry for the lookup key at or below its sequence into
    /// `get_context`, newest first, until it asks to stop.
    fn get(
        &self,
        read_options: &ReadOptions,
        internal_key: &[u8],
        get_context: &mut GetContext<'_>,
        skip_filters: bool,
    ) -> Result<()>;

    /// Serves every unmasked key of `range`.
    ///
    /// Per-key failures go to `KeyContext::status`; an `Err` return means the
    /// whole file could not be read.
    fn multi_get(
        &self,
        read_options: &ReadOptions,
        range: &BatchRange<'_>,
        keys: &mut [KeyContext<'_>],
        skip_filters: bool,
    ) -> Result<()> {
        for idx in range.iter() {
            let key = &mut keys[idx];
            if let Err(e) = self.get(
                read_options,
                key.lookup.internal_key(),
                &mut key.get_context,
                skip_filters,
            ) {
                key.status = Some(e);
            }
        }
        Ok(())
    }

    /// Hint that a lookup for `internal_key` is coming.
    fn prepare(&self, _internal_key: &[u8]) {}

    fn new_iterator(&self) -> Box<dyn StorageIterator + '_>;

    /// Approximate byte offset of `internal_key` within the file.
    fn approximate_offset_of(&self, internal_key: &[u8]) -> u64;

    fn approximate_size(&self, start: &[u8], end: &[u8]) -> u64 {
        self.approximate_offset_of(end)
            .saturating_sub(self.approximate_offset_of(start))
    }
}

/// Opens (and caches) table readers by file.
pub trait TableCache: Send + Sync {
    fn find_table(&self, file: &FileMetaData) -> Result<Arc<dyn TableReader>>;

    fn get(
        &self,
        read_options: &ReadOptions,
        file: &FileMetaData,
        internal_key: &[u8],
        get_context: &mut GetContext<'_>,
        skip_filters: bool,
    ) -> Result<()> {
        let table = self.find_table(file)?;
        get_context.stats.num_sst_read += 1;
        table.get(read_options, internal_key, get_context, skip_filters)
    }

    fn multi_get(
        &self,
        read_options: &ReadOptions,
        file: &FileMetaData,
        range: &BatchRange<'_>,
        keys: &mut [KeyContext<'_>],
        skip_filters: bool,
    ) -> Result<()> {
        let table = self.find_table(file)?;
        for idx in range.iter() {
            keys[idx].get_context.stats.num_sst_read += 1;
        }
        table.multi_get(read_options, range, keys, skip_filters)
    }

    fn prepare(&self, file: &FileMetaData, internal_key: &[u8]) {
        if let Ok(table) = self.find_table(file) {
            table.prepare(internal_key);
        }
    }
}
