//! Per-key lookup state carried across the tables a point lookup visits.

use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::merge::{MergeContext, MergeOperator};
use crate::types::{LookupKey, ParsedInternalKey, SequenceNumber, ValueType};

/// Outcome of a point lookup so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetState {
    NotFound,
    Found,
    Deleted,
    Corrupt,
    /// Merge operands seen, still looking for a base value.
    Merge,
    /// A blob index turned up where blob values are not allowed.
    UnexpectedBlobIndex,
}

/// Block reads made while serving one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetContextStats {
    pub num_index_read: u64,
    pub num_filter_read: u64,
    pub num_data_read: u64,
    pub num_sst_read: u64,
}

/// Resolves a blob index to the value it points at.
pub trait BlobFetcher {
    fn fetch_blob(&self, user_key: &[u8], blob_index: &[u8]) -> Result<Vec<u8>>;
}

/// Per-key lookup state fed by table readers.
///
/// Readers call [`GetContext::save_value`] for each entry of the key, newest
/// first, until it returns `false`.
pub struct GetContext<'a> {
    ucmp: &'a dyn Comparator,
    merge_operator: Option<&'a dyn MergeOperator>,
    blob_fetcher: Option<&'a dyn BlobFetcher>,
    state: GetState,
    user_key: Vec<u8>,
    value: Vec<u8>,
    merge_context: MergeContext,
    max_covering_tombstone_seq: SequenceNumber,
    allow_blob_index: bool,
    is_blob_index: bool,
    key_may_exist: bool,
    merge_error: Option<Error>,
    pub stats: GetContextStats,
}

impl<'a> GetContext<'a> {
    /// Starts in `Merge` when `merge_context` already holds operands.
    pub fn new(
        ucmp: &'a dyn Comparator,
        merge_operator: Option<&'a dyn MergeOperator>,
        user_key: &[u8],
        merge_context: MergeContext,
        max_covering_tombstone_seq: SequenceNumber,
    ) -> Self {
        let state = if merge_context.is_empty() {
            GetState::NotFound
        } else {
            GetState::Merge
        };
        GetContext {
            ucmp,
            merge_operator,
            blob_fetcher: None,
            state,
            user_key: user_key.to_vec(),
            value: Vec::new(),
            merge_context,
            max_covering_tombstone_seq,
            allow_blob_index: true,
            is_blob_index: false,
            key_may_exist: false,
            merge_error: None,
            stats: GetContextStats::default(),
        }
    }

    pub fn with_blob_fetcher(mut self, fetcher: &'a dyn BlobFetcher) -> Self {
        self.blob_fetcher = Some(fetcher);
        self
    }

    /// Rejects blob indexes with `UnexpectedBlobIndex`.
    pub fn disallow_blob_index(mut self) -> Self {
        self.allow_blob_index = false;
        self
    }

    pub fn state(&self) -> GetState {
        self.state
    }

    pub fn user_key(&self) -> &[u8] {
        &self.user_key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn take_value(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.value)
    }

    pub(crate) fn set_value(&mut self, value: Vec<u8>) {
        self.value = value;
    }

    pub fn merge_context(&self) -> &MergeContext {
        &self.merge_context
    }

    pub fn is_blob_index(&self) -> bool {
        self.is_blob_index
    }

    pub(crate) fn clear_blob_index(&mut self) {
        self.is_blob_index = false;
    }

    pub fn max_covering_tombstone_seq(&self) -> SequenceNumber {
        self.max_covering_tombstone_seq
    }

    /// Raises the newest range tombstone covering this key.
    pub fn set_max_covering_tombstone_seq(&mut self, seq: SequenceNumber) {
        self.max_covering_tombstone_seq = self.max_covering_tombstone_seq.max(seq);
    }

    pub fn mark_key_may_exist(&mut self) {
        self.key_may_exist = true;
    }

    pub fn key_may_exist(&self) -> bool {
        self.key_may_exist
    }

    pub(crate) fn take_merge_error(&mut self) -> Option<Error> {
        self.merge_error.take()
    }

    /// Feeds one entry; returns whether the reader should keep scanning.
    pub fn save_value(&mut self, parsed_key: &ParsedInternalKey<'_>, value: &[u8]) -> bool {
        if !self
            .ucmp
            .equal_without_timestamp(parsed_key.user_key, &self.user_key)
        {
            return false;
        }

        let mut value_type = parsed_key.value_type;
        if matches!(
            value_type,
            ValueType::Value | ValueType::Merge | ValueType::BlobIndex
        ) && self.max_covering_tombstone_seq > parsed_key.sequence
        {
            value_type = ValueType::RangeDeletion;
        }

        match value_type {
            ValueType::Value | ValueType::BlobIndex => {
                debug_assert!(matches!(self.state, GetState::NotFound | GetState::Merge));
                let is_blob = value_type == ValueType::BlobIndex;
                if is_blob && !self.allow_blob_index {
                    self.state = GetState::UnexpectedBlobIndex;
                    return false;
                }
                if self.state == GetState::NotFound {
                    self.state = GetState::Found;
                    self.is_blob_index = is_blob;
                    self.value = value.to_vec();
                } else if self.state == GetState::Merge {
                    if is_blob {
                        let base = match self.blob_fetcher {
                            Some(fetcher) => fetcher.fetch_blob(&self.user_key, value),
                            None => Err(Error::NotSupported("no blob fetcher".into())),
                        };
                        match base {
                            Ok(base) => self.merge(Some(&base)),
                            Err(e) => {
                                self.state = GetState::Corrupt;
                                self.merge_error = Some(e);
                            }
                        }
                    } else {
                        self.merge(Some(value));
                    }
                }
                false
            }
            ValueType::Deletion | ValueType::SingleDeletion | ValueType::RangeDeletion => {
                debug_assert!(matches!(self.state, GetState::NotFound | GetState::Merge));
                if self.state == GetState::NotFound {
                    self.state = GetState::Deleted;
                } else if self.state == GetState::Merge {
                    self.merge(None);
                }
                false
            }
            ValueType::Merge => {
                debug_assert!(matches!(self.state, GetState::NotFound | GetState::Merge));
                self.state = GetState::Merge;
                self.merge_context.push_operand(value);
                if let Some(op) = self.merge_operator {
                    if op.should_merge(self.merge_context.operands_newest_first()) {
                        self.merge(None);
                        return false;
                    }
                }
                true
            }
        }
    }

    /// Folds the collected operands onto `base`, moving to `Found`.
    fn merge(&mut self, base: Option<&[u8]>) {
        let Some(op) = self.merge_operator else {
            self.state = GetState::Corrupt;
            self.merge_error = Some(Error::InvalidArgument(
                "merge_operator is not properly initialized.".into(),
            ));
            return;
        };
        match op.full_merge(&self.user_key, base, &self.merge_context.operands()) {
            Ok(merged) => {
                self.state = GetState::Found;
                self.is_blob_index = false;
                self.value = merged;
            }
            Err(e) => {
                self.state = GetState::Corrupt;
                self.merge_error = Some(e);
            }
        }
    }

    /// Final merge once every file is exhausted without a base value.
    pub(crate) fn finish_merge(&mut self) -> Result<Vec<u8>> {
        let Some(op) = self.merge_operator else {
            return Err(Error::InvalidArgument(
                "merge_operator is not properly initialized.".into(),
            ));
        };
        let merged = op.full_merge(&self.user_key, None, &self.merge_context.operands())?;
        self.state = GetState::Found;
        self.value = merged.clone();
        Ok(merged)
    }
}

/// One key of a batched lookup.
pub struct KeyContext<'a> {
    pub lookup: LookupKey,
    /// Per-key error set by readers or the level walk; `None` while healthy.
    pub status: Option<Error>,
    pub get_context: GetContext<'a>,
}

impl<'a> KeyContext<'a> {
    pub fn new(lookup: LookupKey, get_context: GetContext<'a>) -> Self {
        KeyContext {
            lookup,
            status: None,
            get_context,
        }
    }

    pub fn user_key(&self) -> &[u8] {
        self.lookup.user_key()
    }
}
