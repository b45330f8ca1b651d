use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::comparator::InternalKeyComparator;
use crate::options::{ImmutableCfOptions, MutableCfOptions};
use crate::version::Version;
use crate::version::storage_info::VersionStorageInfo;
use crate::version_set::registry::VersionRef;

/// Per column family state owned by the version set.
pub struct ColumnFamilyData {
    id: u32,
    name: String,
    ioptions: Arc<ImmutableCfOptions>,
    mutable_options: MutableCfOptions,
    current: VersionRef,
    log_number: u64,
}

impl ColumnFamilyData {
    pub(crate) fn new(
        id: u32,
        name: String,
        ioptions: Arc<ImmutableCfOptions>,
        mutable_options: MutableCfOptions,
        current: VersionRef,
        log_number: u64,
    ) -> Self {
        ColumnFamilyData {
            id,
            name,
            ioptions,
            mutable_options,
            current,
            log_number,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ioptions(&self) -> &Arc<ImmutableCfOptions> {
        &self.ioptions
    }

    pub fn mutable_options(&self) -> &MutableCfOptions {
        &self.mutable_options
    }

    pub fn current(&self) -> &VersionRef {
        &self.current
    }

    /// Installs `version` as current; the previous one loses this pin.
    pub(crate) fn set_current(&mut self, version: VersionRef) {
        self.current = version;
    }

    /// Oldest write-ahead log still holding data of this column family.
    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    pub(crate) fn set_log_number(&mut self, log_number: u64) {
        self.log_number = log_number;
    }
}

/// Column families by id, with a name index.
#[derive(Default)]
pub struct ColumnFamilySet {
    by_id: BTreeMap<u32, ColumnFamilyData>,
    by_name: HashMap<String, u32>,
    max_column_family: u32,
}

impl ColumnFamilySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u32) -> Option<&ColumnFamilyData> {
        self.by_id.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut ColumnFamilyData> {
        self.by_id.get_mut(&id)
    }

    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn insert(&mut self, cfd: ColumnFamilyData) {
        self.max_column_family = self.max_column_family.max(cfd.id);
        self.by_name.insert(cfd.name.clone(), cfd.id);
        self.by_id.insert(cfd.id, cfd);
    }

    /// Drops the column family; its current version loses this pin.
    pub fn remove(&mut self, id: u32) -> Option<ColumnFamilyData> {
        let cfd = self.by_id.remove(&id)?;
        self.by_name.remove(&cfd.name);
        Some(cfd)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnFamilyData> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn max_column_family(&self) -> u32 {
        self.max_column_family
    }

    pub fn update_max_column_family(&mut self, id: u32) {
        self.max_column_family = self.max_column_family.max(id);
    }
}

/// A finalized version with no files, the base of a new column family.
pub(crate) fn new_empty_version(
    cf_id: u32,
    version_number: u64,
    ioptions: Arc<ImmutableCfOptions>,
    mutable_options: MutableCfOptions,
) -> Version {
    let storage = empty_storage(&ioptions, None);
    let mut version = Version::new(cf_id, version_number, storage, ioptions, mutable_options);
    version.prepare_apply();
    version.finalize();
    version
}

pub(crate) fn empty_storage(
    ioptions: &ImmutableCfOptions,
    base: Option<&VersionStorageInfo>,
) -> VersionStorageInfo {
    VersionStorageInfo::new(
        InternalKeyComparator::new(Arc::clone(&ioptions.user_comparator)),
        ioptions.num_levels,
        ioptions.compaction_style,
        base,
        ioptions.force_consistency_checks,
    )
}
