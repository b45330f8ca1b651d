use std::path::PathBuf;
use std::sync::Arc;

use crate::blob::BlobFileCache;
use crate::comparator::{BytewiseComparator, Comparator};
use crate::env::{Env, PosixEnv};
use crate::merge::MergeOperator;
use crate::statistics::Statistics;
use crate::table::TableCache;
use crate::table::mem::InMemoryTableCache;
use crate::types::SequenceNumber;

/// Name of the column family every database has.
pub const DEFAULT_COLUMN_FAMILY_NAME: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStyle {
    Level,
    Universal,
    Fifo,
    /// Compaction is driven externally; levels are scored like `Level`
    /// but only level 0 is ever an input.
    None,
}

/// Order in which files of a level are offered to the compaction picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionPri {
    ByCompensatedSize,
    OldestLargestSeqFirst,
    OldestSmallestSeqFirst,
    MinOverlappingRatio,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FifoCompactionOptions {
    /// Total size at which the oldest files are dropped.
    pub max_table_files_size: u64,
    /// Allows intra-L0 compaction once the file count reaches the trigger.
    pub allow_compaction: bool,
    /// Files older than this many seconds migrate to warm storage. 0 disables.
    pub age_for_warm: u64,
}

impl Default for FifoCompactionOptions {
    fn default() -> Self {
        FifoCompactionOptions {
            max_table_files_size: 1024 * 1024 * 1024,
            allow_compaction: false,
            age_for_warm: 0,
        }
    }
}

/// Column family settings fixed for the lifetime of the column family.
#[derive(Clone)]
pub struct ImmutableCfOptions {
    pub user_comparator: Arc<dyn Comparator>,
    pub merge_operator: Option<Arc<dyn MergeOperator>>,
    pub table_cache: Arc<dyn TableCache>,
    pub blob_file_cache: Option<Arc<dyn BlobFileCache>>,
    pub env: Arc<dyn Env>,
    pub statistics: Option<Arc<Statistics>>,
    pub num_levels: usize,
    pub compaction_style: CompactionStyle,
    pub compaction_pri: CompactionPri,
    pub level_compaction_dynamic_level_bytes: bool,
    /// Directories table files live in, indexed by `FileMetaData::path_id`.
    pub cf_paths: Vec<PathBuf>,
    /// Verify level ordering of every new version, not only in debug builds.
    pub force_consistency_checks: bool,
    /// Skip filters on the last level, where most lookups are expected to hit.
    pub optimize_filters_for_hits: bool,
}

impl Default for ImmutableCfOptions {
    fn default() -> Self {
        ImmutableCfOptions {
            user_comparator: Arc::new(BytewiseComparator),
            merge_operator: None,
            table_cache: Arc::new(InMemoryTableCache::new()),
            blob_file_cache: None,
            env: Arc::new(PosixEnv),
            statistics: None,
            num_levels: 7,
            compaction_style: CompactionStyle::Level,
            compaction_pri: CompactionPri::MinOverlappingRatio,
            level_compaction_dynamic_level_bytes: false,
            cf_paths: Vec::new(),
            force_consistency_checks: true,
            optimize_filters_for_hits: false,
        }
    }
}

/// Column family settings that may change between versions.
#[derive(Debug, Clone, PartialEq)]
pub struct MutableCfOptions {
    pub level0_file_num_compaction_trigger: usize,
    pub max_bytes_for_level_base: u64,
    pub max_bytes_for_level_multiplier: f64,
    pub max_bytes_for_level_multiplier_additional: Vec<i32>,
    /// Files whose data is older than this many seconds are compacted. 0 disables.
    pub ttl: u64,
    pub periodic_compaction_seconds: u64,
    pub compaction_options_fifo: FifoCompactionOptions,
    pub enable_blob_garbage_collection: bool,
    /// Fraction of the oldest blob files eligible for garbage collection.
    pub blob_garbage_collection_age_cutoff: f64,
    /// Garbage ratio of the oldest blob batch that forces compaction.
    pub blob_garbage_collection_force_threshold: f64,
}

impl Default for MutableCfOptions {
    fn default() -> Self {
        MutableCfOptions {
            level0_file_num_compaction_trigger: 4,
            max_bytes_for_level_base: 256 * 1024 * 1024,
            max_bytes_for_level_multiplier: 10.0,
            max_bytes_for_level_multiplier_additional: Vec::new(),
            ttl: 0,
            periodic_compaction_seconds: 0,
            compaction_options_fifo: FifoCompactionOptions::default(),
            enable_blob_garbage_collection: false,
            blob_garbage_collection_age_cutoff: 0.25,
            blob_garbage_collection_force_threshold: 1.0,
        }
    }
}

impl MutableCfOptions {
    pub fn max_bytes_multiplier_additional(&self, level: usize) -> i32 {
        self.max_bytes_for_level_multiplier_additional
            .get(level)
            .copied()
            .unwrap_or(1)
    }
}

/// Both halves of a column family's configuration.
#[derive(Clone, Default)]
pub struct ColumnFamilyOptions {
    pub immutable: ImmutableCfOptions,
    pub mutable: MutableCfOptions,
}

/// Name plus options supplied when opening or creating a column family.
#[derive(Clone)]
pub struct ColumnFamilyDescriptor {
    pub name: String,
    pub options: ColumnFamilyOptions,
}

impl ColumnFamilyDescriptor {
    pub fn new(name: impl Into<String>, options: ColumnFamilyOptions) -> Self {
        ColumnFamilyDescriptor {
            name: name.into(),
            options,
        }
    }
}

/// Which storage tiers a read may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTier {
    ReadAllTier,
    /// Only data already in memory; any read needing disk I/O is `Incomplete`.
    BlockCacheTier,
}

#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Read as of this sequence number; latest when `None`.
    pub snapshot: Option<SequenceNumber>,
    pub read_tier: ReadTier,
    /// Once the values returned by one batched lookup exceed this many bytes,
    /// the remaining keys are aborted.
    pub value_size_soft_limit: u64,
    pub verify_checksums: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            snapshot: None,
            read_tier: ReadTier::ReadAllTier,
            value_size_soft_limit: u64::MAX,
            verify_checksums: true,
        }
    }
}

/// Settings for the version set and its manifest.
#[derive(Clone)]
pub struct VersionSetOptions {
    pub db_path: PathBuf,
    /// A new manifest is started once the current one exceeds this size.
    pub max_manifest_file_size: u64,
    pub create_if_missing: bool,
    pub env: Arc<dyn Env>,
}

impl VersionSetOptions {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        VersionSetOptions {
            db_path: db_path.into(),
            max_manifest_file_size: 1024 * 1024 * 1024,
            create_if_missing: true,
            env: Arc::new(PosixEnv),
        }
    }
}
