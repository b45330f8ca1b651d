//! Live versions, their pins, and the files they keep alive.

use std::collections::{BTreeMap, HashMap};
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;
use parking_lot::Mutex;

use crate::version::Version;
use crate::version::file_meta::FileMetaData;

/// A table file no live version references any more.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObsoleteFileInfo {
    pub number: u64,
    pub path_id: u32,
    pub file_size: u64,
}

struct VersionEntry {
    version: Arc<Version>,
    pins: AtomicUsize,
}

#[derive(Default)]
struct RegistryInner {
    // Per column family, ordered by version number.
    live: BTreeMap<(u32, u64), Arc<VersionEntry>>,
    file_refs: HashMap<u64, usize>,
    blob_file_refs: HashMap<u64, usize>,
    obsolete_files: Vec<ObsoleteFileInfo>,
    obsolete_blob_files: Vec<u64>,
}

/// Tracks every version still pinned by a reader or by its column family.
///
/// A table file stays live while at least one registered version contains
/// it; the last release moves it to the obsolete queue.
#[derive(Default)]
pub struct VersionRegistry {
    inner: Mutex<RegistryInner>,
}

impl VersionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Links a finalized version and returns its first pin.
    pub fn register(self: &Arc<Self>, version: Version) -> VersionRef {
        debug_assert!(version.storage_info().finalized());
        let version = Arc::new(version);
        let entry = Arc::new(VersionEntry {
            version: Arc::clone(&version),
            pins: AtomicUsize::new(1),
        });
        let mut inner = self.inner.lock();
        let storage = version.storage_info();
        for level in 0..storage.num_levels() {
            for f in storage.level_files(level) {
                *inner.file_refs.entry(f.number).or_insert(0) += 1;
            }
        }
        for number in storage.blob_files().keys() {
            *inner.blob_file_refs.entry(*number).or_insert(0) += 1;
        }
        inner
            .live
            .insert((version.cf_id(), version.version_number()), Arc::clone(&entry));
        VersionRef {
            entry,
            registry: Arc::clone(self),
        }
    }

    fn release(&self, entry: &VersionEntry) {
        let version = &entry.version;
        let mut inner = self.inner.lock();
        inner
            .live
            .remove(&(version.cf_id(), version.version_number()));
        let storage = version.storage_info();
        for level in 0..storage.num_levels() {
            for f in storage.level_files(level) {
                if release_ref(&mut inner.file_refs, f.number) {
                    inner.obsolete_files.push(ObsoleteFileInfo {
                        number: f.number,
                        path_id: f.path_id,
                        file_size: f.file_size,
                    });
                }
            }
        }
        for number in storage.blob_files().keys() {
            if release_ref(&mut inner.blob_file_refs, *number) {
                inner.obsolete_blob_files.push(*number);
            }
        }
        debug!(
            "released version {} of column family {}",
            version.version_number(),
            version.cf_id()
        );
    }

    pub fn num_live_versions(&self, cf_id: u32) -> usize {
        self.inner
            .lock()
            .live
            .range((cf_id, 0)..=(cf_id, u64::MAX))
            .count()
    }

    /// Version numbers of the live versions of `cf_id`, oldest first.
    pub fn live_version_numbers(&self, cf_id: u32) -> Vec<u64> {
        self.inner
            .lock()
            .live
            .range((cf_id, 0)..=(cf_id, u64::MAX))
            .map(|((_, number), _)| *number)
            .collect()
    }

    /// Table and blob file numbers referenced by any live version.
    pub fn live_files(&self) -> (Vec<u64>, Vec<u64>) {
        let inner = self.inner.lock();
        let mut tables: Vec<u64> = inner.file_refs.keys().copied().collect();
        let mut blobs: Vec<u64> = inner.blob_file_refs.keys().copied().collect();
        tables.sort_unstable();
        blobs.sort_unstable();
        (tables, blobs)
    }

    pub fn is_file_live(&self, number: u64) -> bool {
        self.inner.lock().file_refs.contains_key(&number)
    }

    /// Total size of the distinct table files of every live version.
    pub fn total_sst_files_size(&self) -> u64 {
        let inner = self.inner.lock();
        let mut seen: HashMap<u64, u64> = HashMap::new();
        for entry in inner.live.values() {
            let storage = entry.version.storage_info();
            for level in 0..storage.num_levels() {
                for f in storage.level_files(level) {
                    seen.insert(f.number, f.file_size);
                }
            }
        }
        seen.values().sum()
    }

    /// Any live version's record of table file `number`.
    pub fn find_file(&self, number: u64) -> Option<Arc<FileMetaData>> {
        let inner = self.inner.lock();
        inner.live.values().find_map(|entry| {
            entry
                .version
                .storage_info()
                .file_by_number(number)
                .map(|(_, f)| Arc::clone(f))
        })
    }

    /// Removes and returns the obsolete table files numbered below
    /// `min_pending_output`, and every obsolete blob file.
    pub fn take_obsolete_files(&self, min_pending_output: u64) -> (Vec<ObsoleteFileInfo>, Vec<u64>) {
        let mut inner = self.inner.lock();
        let (ready, pending): (Vec<_>, Vec<_>) = inner
            .obsolete_files
            .drain(..)
            .partition(|f| f.number < min_pending_output);
        inner.obsolete_files = pending;
        let blobs = std::mem::take(&mut inner.obsolete_blob_files);
        (ready, blobs)
    }
}

fn release_ref(refs: &mut HashMap<u64, usize>, number: u64) -> bool {
    let Some(count) = refs.get_mut(&number) else {
        return false;
    };
    *count = count.saturating_sub(1);
    if *count == 0 {
        refs.remove(&number);
        return true;
    }
    false
}

/// A pin on a live version. Reads go through it without locking; the
/// version is unlinked once the last pin drops.
pub struct VersionRef {
    entry: Arc<VersionEntry>,
    registry: Arc<VersionRegistry>,
}

impl VersionRef {
    pub fn version(&self) -> &Arc<Version> {
        &self.entry.version
    }

    /// Pins currently held on this version.
    pub fn pin_count(&self) -> usize {
        self.entry.pins.load(Ordering::Acquire)
    }
}

impl Deref for VersionRef {
    type Target = Version;

    fn deref(&self) -> &Version {
        &self.entry.version
    }
}

impl Clone for VersionRef {
    fn clone(&self) -> Self {
        self.entry.pins.fetch_add(1, Ordering::AcqRel);
        VersionRef {
            entry: Arc::clone(&self.entry),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl Drop for VersionRef {
    fn drop(&mut self) {
        if self.entry.pins.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.registry.release(&self.entry);
        }
    }
}

impl std::fmt::Debug for VersionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionRef")
            .field("version", &self.entry.version)
            .field("pins", &self.pin_count())
            .finish()
    }
}
