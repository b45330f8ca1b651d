//! In-memory sorted table with the same lookup shape as an on-disk table:
//! a bloom filter over user keys, an index of block boundaries and blocks
//! of sorted entries, plus range tombstones.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use parking_lot::RwLock;

use crate::bloom::BloomFilter;
use crate::bloom::builder::BloomFilterBuilder;
use crate::comparator::InternalKeyComparator;
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;
use crate::options::ReadOptions;
use crate::table::{TableCache, TableReader};
use crate::types::{InternalKey, ParsedInternalKey, SequenceNumber, ValueType};
use crate::version::file_meta::FileMetaData;
use crate::version::get_context::GetContext;

/// Entries per block.
const BLOCK_ENTRIES: usize = 16;

/// Deletes every user key in `[start, end)` written at or before `seq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeTombstone {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
    pub seq: SequenceNumber,
}

/// Block location within the entry array, keyed by the block's last key.
#[derive(Debug, Clone)]
struct IndexEntry {
    last_key: Vec<u8>,
    start: usize,
    end: usize,
}

/// Immutable sorted table kept in memory.
pub struct InMemoryTable {
    icmp: InternalKeyComparator,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    index: Vec<IndexEntry>,
    range_tombstones: Vec<RangeTombstone>,
    filter: BloomFilter,
    // cumulative encoded size at the start of each entry
    offsets: Vec<u64>,
    data_size: u64,
}

impl InMemoryTable {
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    /// Index of the first block whose last key is >= `internal_key`.
    fn find_block(&self, internal_key: &[u8]) -> usize {
        self.index
            .partition_point(|b| self.icmp.compare(&b.last_key, internal_key) == Ordering::Less)
    }

    fn covering_tombstone_seq(&self, user_key: &[u8], snapshot: SequenceNumber) -> SequenceNumber {
        let ucmp = self.icmp.user_comparator();
        self.range_tombstones
            .iter()
            .filter(|t| t.seq <= snapshot)
            .filter(|t| {
                ucmp.compare(&t.start, user_key) != Ordering::Greater
                    && ucmp.compare(user_key, &t.end) == Ordering::Less
            })
            .map(|t| t.seq)
            .max()
            .unwrap_or(0)
    }
}

impl TableReader for InMemoryTable {
    fn get(
        &self,
        _read_options: &ReadOptions,
        internal_key: &[u8],
        get_context: &mut GetContext<'_>,
        skip_filters: bool,
    ) -> Result<()> {
        let lookup = ParsedInternalKey::parse(internal_key)?;

        let covering = self.covering_tombstone_seq(lookup.user_key, lookup.sequence);
        if covering > 0 {
            get_context.set_max_covering_tombstone_seq(covering);
        }

        if !skip_filters {
            get_context.stats.num_filter_read += 1;
            if !self.filter.may_contain(lookup.user_key) {
                return Ok(());
            }
        }

        get_context.stats.num_index_read += 1;
        let mut block = self.find_block(internal_key);
        if block >= self.index.len() {
            return Ok(());
        }

        get_context.stats.num_data_read += 1;
        let first = self.index[block].start
            + self.entries[self.index[block].start..self.index[block].end]
                .partition_point(|(k, _)| self.icmp.compare(k, internal_key) == Ordering::Less);
        for pos in first..self.entries.len() {
            if pos >= self.index[block].end {
                block += 1;
                get_context.stats.num_data_read += 1;
            }
            let (key, value) = &self.entries[pos];
            let parsed = ParsedInternalKey::parse(key)?;
            if !get_context.save_value(&parsed, value) {
                break;
            }
        }
        Ok(())
    }

    fn new_iterator(&self) -> Box<dyn StorageIterator + '_> {
        Box::new(InMemoryTableIterator {
            table: self,
            pos: 0,
        })
    }

    fn approximate_offset_of(&self, internal_key: &[u8]) -> u64 {
        let pos = self
            .entries
            .partition_point(|(k, _)| self.icmp.compare(k, internal_key) == Ordering::Less);
        self.offsets.get(pos).copied().unwrap_or(self.data_size)
    }
}

struct InMemoryTableIterator<'t> {
    table: &'t InMemoryTable,
    pos: usize,
}

impl StorageIterator for InMemoryTableIterator<'_> {
    fn key(&self) -> &[u8] {
        &self.table.entries[self.pos].0
    }

    fn value(&self) -> &[u8] {
        &self.table.entries[self.pos].1
    }

    fn is_valid(&self) -> bool {
        self.pos < self.table.entries.len()
    }

    fn next(&mut self) -> Result<()> {
        if self.is_valid() {
            self.pos += 1;
        }
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.pos = self
            .table
            .entries
            .partition_point(|(k, _)| self.table.icmp.compare(k, key) == Ordering::Less);
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }
}

/// Builds an [`InMemoryTable`] and the matching `FileMetaData`.
pub struct InMemoryTableBuilder {
    icmp: InternalKeyComparator,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    range_tombstones: Vec<RangeTombstone>,
}

impl InMemoryTableBuilder {
    pub fn new(icmp: InternalKeyComparator) -> Self {
        InMemoryTableBuilder {
            icmp,
            entries: Vec::new(),
            range_tombstones: Vec::new(),
        }
    }

    /// Adds an entry; entries may arrive in any order.
    pub fn add(mut self, user_key: &[u8], seq: SequenceNumber, value_type: ValueType, value: &[u8]) -> Self {
        let key = InternalKey::new(user_key, seq, value_type);
        self.entries.push((key.encode().to_vec(), value.to_vec()));
        self
    }

    pub fn put(self, user_key: &[u8], seq: SequenceNumber, value: &[u8]) -> Self {
        self.add(user_key, seq, ValueType::Value, value)
    }

    pub fn delete(self, user_key: &[u8], seq: SequenceNumber) -> Self {
        self.add(user_key, seq, ValueType::Deletion, b"")
    }

    pub fn merge(self, user_key: &[u8], seq: SequenceNumber, operand: &[u8]) -> Self {
        self.add(user_key, seq, ValueType::Merge, operand)
    }

    pub fn delete_range(mut self, start: &[u8], end: &[u8], seq: SequenceNumber) -> Self {
        self.range_tombstones.push(RangeTombstone {
            start: start.to_vec(),
            end: end.to_vec(),
            seq,
        });
        self
    }

    /// Finishes the table and describes it as file `number`.
    pub fn finish(mut self, number: u64) -> Result<(InMemoryTable, FileMetaData)> {
        if self.entries.is_empty() && self.range_tombstones.is_empty() {
            return Err(Error::InvalidArgument("cannot build an empty table".into()));
        }
        let icmp = self.icmp.clone();
        self.entries.sort_by(|a, b| icmp.compare(&a.0, &b.0));

        let mut filter = BloomFilterBuilder::new(0.01);
        let mut offsets = Vec::with_capacity(self.entries.len());
        let mut data_size = 0u64;
        let (mut num_deletions, mut raw_key_size, mut raw_value_size) = (0u64, 0u64, 0u64);
        let (mut smallest_seqno, mut largest_seqno) = (SequenceNumber::MAX, 0);
        for (key, value) in &self.entries {
            let parsed = ParsedInternalKey::parse(key)?;
            filter.add_key(parsed.user_key);
            offsets.push(data_size);
            data_size += (key.len() + value.len() + 8) as u64;
            raw_key_size += key.len() as u64;
            raw_value_size += value.len() as u64;
            if matches!(parsed.value_type, ValueType::Deletion | ValueType::SingleDeletion) {
                num_deletions += 1;
            }
            smallest_seqno = smallest_seqno.min(parsed.sequence);
            largest_seqno = largest_seqno.max(parsed.sequence);
        }

        let index = self
            .entries
            .chunks(BLOCK_ENTRIES)
            .enumerate()
            .map(|(i, chunk)| IndexEntry {
                last_key: chunk[chunk.len() - 1].0.clone(),
                start: i * BLOCK_ENTRIES,
                end: i * BLOCK_ENTRIES + chunk.len(),
            })
            .collect();

        let mut smallest = self.entries.first().map(|(k, _)| k.clone());
        let mut largest = self.entries.last().map(|(k, _)| k.clone());
        for t in &self.range_tombstones {
            smallest_seqno = smallest_seqno.min(t.seq);
            largest_seqno = largest_seqno.max(t.seq);
            num_deletions += 1;
            let start = InternalKey::new(&t.start, t.seq, ValueType::RangeDeletion);
            if smallest
                .as_ref()
                .is_none_or(|s| icmp.compare(start.encode(), s) == Ordering::Less)
            {
                smallest = Some(start.encode().to_vec());
            }
            let end = InternalKey::new(&t.end, t.seq, ValueType::RangeDeletion);
            if largest
                .as_ref()
                .is_none_or(|l| icmp.compare(end.encode(), l) == Ordering::Greater)
            {
                largest = Some(end.encode().to_vec());
            }
        }
        let smallest = InternalKey::decode_from(&smallest.unwrap_or_default())?;
        let largest = InternalKey::decode_from(&largest.unwrap_or_default())?;
        let num_entries = (self.entries.len() + self.range_tombstones.len()) as u64;

        let meta = FileMetaData::new(
            number,
            data_size.max(1),
            smallest,
            largest,
            smallest_seqno,
            largest_seqno,
        )
        .with_entry_stats(num_entries, num_deletions, raw_key_size, raw_value_size);

        let table = InMemoryTable {
            icmp,
            entries: self.entries,
            index,
            range_tombstones: self.range_tombstones,
            filter: filter.build(),
            offsets,
            data_size,
        };
        Ok((table, meta))
    }
}

/// Table cache over in-memory tables, with probe counting and fault injection.
#[derive(Default)]
pub struct InMemoryTableCache {
    tables: RwLock<HashMap<u64, Arc<InMemoryTable>>>,
    failures: RwLock<HashMap<u64, Error>>,
    probes: AtomicUsize,
}

impl InMemoryTableCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, number: u64, table: InMemoryTable) {
        self.tables.write().insert(number, Arc::new(table));
    }

    /// Every later read of `number` fails with `error`.
    pub fn fail_file(&self, number: u64, error: Error) {
        self.failures.write().insert(number, error);
    }

    /// Number of table lookups served so far.
    pub fn probes(&self) -> usize {
        self.probes.load(AtomicOrdering::Relaxed)
    }

    pub fn reset_probes(&self) {
        self.probes.store(0, AtomicOrdering::Relaxed);
    }
}

impl TableCache for InMemoryTableCache {
    fn find_table(&self, file: &FileMetaData) -> Result<Arc<dyn TableReader>> {
        self.probes.fetch_add(1, AtomicOrdering::Relaxed);
        if let Some(e) = self.failures.read().get(&file.number) {
            return Err(e.clone());
        }
        self.tables
            .read()
            .get(&file.number)
            .cloned()
            .map(|t| t as Arc<dyn TableReader>)
            .ok_or_else(|| Error::Corruption(format!("table #{} not found", file.number)))
    }

    fn prepare(&self, _file: &FileMetaData, _internal_key: &[u8]) {}
}
