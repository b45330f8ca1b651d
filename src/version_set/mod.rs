//! The set of live versions of every column family and the manifest that
//! makes their evolution durable.
//!
//! Writers submit `VersionEdit`s through [`VersionSet::log_and_apply`]. A
//! single committer thread folds concurrent submissions into one manifest
//! write, builds the new versions, syncs the log and only then installs the
//! versions as current. Readers pin the current version of a column family
//! with [`VersionSet::current`] and read it without further locking.

pub mod atomic_group;
pub mod column_family;
mod committer;
pub mod registry;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use log::{error, info, warn};
use parking_lot::Mutex;

use crate::env::Env;
use crate::error::{Error, Result};
use crate::filename::{
    FileType, current_file_name, descriptor_base_name, descriptor_file_name, parse_file_name,
    temp_file_name,
};
use crate::manifest::edit::VersionEdit;
use crate::manifest::reader::LogReader;
use crate::manifest::record::RecordType;
use crate::manifest::writer::LogWriter;
use crate::options::{
    ColumnFamilyDescriptor, DEFAULT_COLUMN_FAMILY_NAME, ImmutableCfOptions, MutableCfOptions,
    VersionSetOptions,
};
use crate::types::{InternalKey, MAX_SEQUENCE_NUMBER, SequenceNumber, VALUE_TYPE_FOR_SEEK};
use crate::version::Version;
use crate::version::builder::VersionBuilder;
use crate::version::file_meta::FileMetaData;

use self::atomic_group::AtomicGroupReadBuffer;
use self::column_family::{ColumnFamilyData, ColumnFamilySet, empty_storage, new_empty_version};
use self::committer::{Committer, ManifestWriteRequest, ManifestWriter};
use self::registry::{ObsoleteFileInfo, VersionRef, VersionRegistry};

/// Id of the column family every database has.
pub const DEFAULT_COLUMN_FAMILY_ID: u32 = 0;

/// State changed only by the committer, read by everyone under the mutex.
pub(crate) struct VersionSetState {
    pub(crate) column_families: ColumnFamilySet,
    pub(crate) manifest_file_number: u64,
    pub(crate) prev_log_number: u64,
    pub(crate) min_log_number_to_keep: u64,
    /// Last sequence recorded in the manifest.
    pub(crate) descriptor_last_sequence: SequenceNumber,
    pub(crate) obsolete_manifests: Vec<String>,
}

pub(crate) struct Shared {
    pub(crate) db_path: PathBuf,
    pub(crate) env: Arc<dyn Env>,
    pub(crate) max_manifest_file_size: u64,
    pub(crate) registry: Arc<VersionRegistry>,
    pub(crate) state: Mutex<VersionSetState>,
    pub(crate) next_file_number: AtomicU64,
    pub(crate) last_sequence: AtomicU64,
    pub(crate) next_version_number: AtomicU64,
}

/// Files no live version needs any more, ready to be deleted.
#[derive(Debug, Default)]
pub struct ObsoleteFiles {
    pub table_files: Vec<ObsoleteFileInfo>,
    pub blob_files: Vec<u64>,
    /// Bare names of manifests superseded by a newer one.
    pub manifests: Vec<String>,
}

/// Where a live table file sits.
#[derive(Debug, Clone)]
pub struct FileLocationInfo {
    pub cf_id: u32,
    pub level: usize,
    pub file: Arc<FileMetaData>,
}

pub struct VersionSet {
    shared: Arc<Shared>,
    sender: Option<Sender<ManifestWriteRequest>>,
    committer: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for VersionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionSet").finish_non_exhaustive()
    }
}

impl VersionSet {
    /// Opens the database at `options.db_path`, creating it when `CURRENT`
    /// is missing and `create_if_missing` is set, and recovers every column
    /// family in `column_families` from the manifest.
    pub fn open(options: VersionSetOptions, column_families: Vec<ColumnFamilyDescriptor>) -> Result<Self> {
        let env = Arc::clone(&options.env);
        let db_path = options.db_path.clone();
        env.create_dir_all(&db_path)?;

        if !env.file_exists(&current_file_name(&db_path)) {
            if !options.create_if_missing {
                return Err(Error::InvalidArgument(format!(
                    "{}: does not exist (create_if_missing is false)",
                    db_path.display()
                )));
            }
            let comparator = column_families
                .iter()
                .find(|cf| cf.name == DEFAULT_COLUMN_FAMILY_NAME)
                .map(|cf| cf.options.immutable.user_comparator.name().to_string())
                .ok_or_else(|| Error::InvalidArgument("Default column family not specified".into()))?;
            new_db(env.as_ref(), &db_path, &comparator)?;
        }

        let registry = VersionRegistry::new();
        let recovered = recover(env.as_ref(), &db_path, &column_families, &registry)?;

        let shared = Arc::new(Shared {
            db_path,
            env,
            max_manifest_file_size: options.max_manifest_file_size,
            registry,
            state: Mutex::new(VersionSetState {
                column_families: recovered.column_families,
                manifest_file_number: recovered.manifest_file_number,
                prev_log_number: recovered.prev_log_number,
                min_log_number_to_keep: recovered.min_log_number_to_keep,
                descriptor_last_sequence: recovered.last_sequence,
                obsolete_manifests: Vec::new(),
            }),
            next_file_number: AtomicU64::new(recovered.next_file_number),
            last_sequence: AtomicU64::new(recovered.last_sequence),
            next_version_number: AtomicU64::new(recovered.next_version_number),
        });

        let (sender, receiver) = crossbeam_channel::unbounded();
        let committer = Committer::spawn(Arc::clone(&shared), receiver)?;
        Ok(VersionSet {
            shared,
            sender: Some(sender),
            committer: Some(committer),
        })
    }

    /// Names of the column families recorded in the manifest `CURRENT`
    /// points to, ordered by id.
    pub fn list_column_families(env: &dyn Env, db_path: &Path) -> Result<Vec<String>> {
        let (manifest_name, _) = read_current_file(env, db_path)?;
        let reader = LogReader::open(env, &db_path.join(&manifest_name))?;
        let mut names: BTreeMap<u32, String> = BTreeMap::new();
        names.insert(DEFAULT_COLUMN_FAMILY_ID, DEFAULT_COLUMN_FAMILY_NAME.to_string());
        for record in reader.iter() {
            let edit = VersionEdit::decode(&record?.payload)?;
            if let Some(name) = &edit.column_family_add {
                if names.contains_key(&edit.column_family) {
                    return Err(Error::Corruption(format!(
                        "Manifest adding the same column family twice: {name}"
                    )));
                }
                names.insert(edit.column_family, name.clone());
            } else if edit.is_column_family_drop && names.remove(&edit.column_family).is_none() {
                return Err(Error::Corruption(
                    "Manifest - dropping non-existing column family".into(),
                ));
            }
        }
        Ok(names.into_values().collect())
    }

    fn submit(&self, writers: Vec<ManifestWriter>) -> Result<()> {
        let stopped = || Error::Aborted("manifest committer stopped".into());
        let sender = self.sender.as_ref().ok_or_else(stopped)?;
        let (reply, result) = crossbeam_channel::bounded(1);
        sender
            .send(ManifestWriteRequest { writers, reply })
            .map_err(|_| stopped())?;
        result.recv().map_err(|_| stopped())?
    }

    fn check_column_family(&self, cf_id: u32) -> Result<()> {
        if self.shared.state.lock().column_families.get(cf_id).is_none() {
            return Err(Error::ColumnFamilyDropped);
        }
        Ok(())
    }

    /// Records `edit` in the manifest and installs the resulting version of
    /// `cf_id`. Blocks until the manifest write is durable.
    pub fn log_and_apply(&self, cf_id: u32, edit: VersionEdit) -> Result<()> {
        self.log_and_apply_edits(cf_id, vec![edit])
    }

    pub fn log_and_apply_edits(&self, cf_id: u32, edits: Vec<VersionEdit>) -> Result<()> {
        if edits.iter().any(VersionEdit::is_column_family_manipulation) {
            return Err(Error::InvalidArgument(
                "column families are created and dropped through their own calls".into(),
            ));
        }
        self.check_column_family(cf_id)?;
        self.submit(vec![ManifestWriter {
            cf_id,
            edits,
            cf_options: None,
        }])
    }

    /// Commits edits across column families as one atomic group: recovery
    /// applies either all of them or none.
    pub fn log_and_apply_atomic(&self, edits: Vec<(u32, VersionEdit)>) -> Result<()> {
        let total = edits.len() as u32;
        let mut writers: Vec<ManifestWriter> = Vec::new();
        for (i, (cf_id, mut edit)) in edits.into_iter().enumerate() {
            if edit.is_column_family_manipulation() {
                return Err(Error::InvalidArgument(
                    "column family creation cannot be part of an atomic group".into(),
                ));
            }
            edit.mark_atomic_group(total - 1 - i as u32);
            match writers.last_mut() {
                Some(w) if w.cf_id == cf_id => w.edits.push(edit),
                _ => writers.push(ManifestWriter {
                    cf_id,
                    edits: vec![edit],
                    cf_options: None,
                }),
            }
        }
        if writers.is_empty() {
            return Ok(());
        }
        self.submit(writers)
    }

    /// Creates a column family and returns its id.
    pub fn create_column_family(&self, descriptor: ColumnFamilyDescriptor) -> Result<u32> {
        let (id, log_number) = {
            let mut state = self.shared.state.lock();
            if state.column_families.id_of(&descriptor.name).is_some() {
                return Err(Error::InvalidArgument(format!(
                    "Column family already exists: {}",
                    descriptor.name
                )));
            }
            let id = state.column_families.max_column_family() + 1;
            state.column_families.update_max_column_family(id);
            let log_number = state
                .column_families
                .get(DEFAULT_COLUMN_FAMILY_ID)
                .map_or(0, ColumnFamilyData::log_number);
            (id, log_number)
        };
        let mut edit = VersionEdit::for_column_family(id);
        edit.add_column_family(descriptor.name.clone());
        edit.set_comparator_name(descriptor.options.immutable.user_comparator.name());
        edit.set_max_column_family(id);
        edit.set_log_number(log_number);
        self.submit(vec![ManifestWriter {
            cf_id: id,
            edits: vec![edit],
            cf_options: Some(descriptor.options),
        }])?;
        Ok(id)
    }

    pub fn drop_column_family(&self, cf_id: u32) -> Result<()> {
        if cf_id == DEFAULT_COLUMN_FAMILY_ID {
            return Err(Error::InvalidArgument("Can't drop default column family".into()));
        }
        self.check_column_family(cf_id)?;
        let mut edit = VersionEdit::for_column_family(cf_id);
        edit.drop_column_family();
        self.submit(vec![ManifestWriter {
            cf_id,
            edits: vec![edit],
            cf_options: None,
        }])
    }

    pub fn column_family_id(&self, name: &str) -> Option<u32> {
        self.shared.state.lock().column_families.id_of(name)
    }

    /// `(id, name)` of every live column family.
    pub fn column_families(&self) -> Vec<(u32, String)> {
        self.shared
            .state
            .lock()
            .column_families
            .iter()
            .map(|cfd| (cfd.id(), cfd.name().to_string()))
            .collect()
    }

    /// Pins the current version of `cf_id`.
    pub fn current(&self, cf_id: u32) -> Result<VersionRef> {
        self.shared
            .state
            .lock()
            .column_families
            .get(cf_id)
            .map(|cfd| cfd.current().clone())
            .ok_or(Error::ColumnFamilyDropped)
    }

    pub fn column_family_log_number(&self, cf_id: u32) -> Result<u64> {
        self.shared
            .state
            .lock()
            .column_families
            .get(cf_id)
            .map(ColumnFamilyData::log_number)
            .ok_or(Error::ColumnFamilyDropped)
    }

    pub fn new_file_number(&self) -> u64 {
        self.shared.next_file_number.fetch_add(1, AtomicOrdering::SeqCst)
    }

    /// Reserves `count` consecutive file numbers and returns the first.
    pub fn fetch_add_file_number(&self, count: u64) -> u64 {
        self.shared
            .next_file_number
            .fetch_add(count, AtomicOrdering::SeqCst)
    }

    /// The number the next `new_file_number` call returns.
    pub fn current_next_file_number(&self) -> u64 {
        self.shared.next_file_number.load(AtomicOrdering::SeqCst)
    }

    /// Makes sure `number` is never handed out again.
    pub fn mark_file_number_used(&self, number: u64) {
        self.shared
            .next_file_number
            .fetch_max(number + 1, AtomicOrdering::SeqCst);
    }

    pub fn last_sequence(&self) -> SequenceNumber {
        self.shared.last_sequence.load(AtomicOrdering::Acquire)
    }

    pub fn set_last_sequence(&self, seq: SequenceNumber) {
        debug_assert!(seq >= self.last_sequence());
        self.shared.last_sequence.store(seq, AtomicOrdering::Release);
    }

    /// Last sequence durably recorded in the manifest.
    pub fn descriptor_last_sequence(&self) -> SequenceNumber {
        self.shared.state.lock().descriptor_last_sequence
    }

    pub fn manifest_file_number(&self) -> u64 {
        self.shared.state.lock().manifest_file_number
    }

    pub fn prev_log_number(&self) -> u64 {
        self.shared.state.lock().prev_log_number
    }

    /// Oldest write-ahead log any column family still needs.
    pub fn min_log_number_with_unflushed_data(&self) -> u64 {
        self.shared
            .state
            .lock()
            .column_families
            .iter()
            .map(ColumnFamilyData::log_number)
            .min()
            .unwrap_or(0)
    }

    pub fn min_log_number_to_keep(&self) -> u64 {
        self.shared.state.lock().min_log_number_to_keep
    }

    /// Takes the files that became obsolete since the last call. Table
    /// files numbered at or above `min_pending_output` may still be written
    /// by a running job and stay queued.
    pub fn get_obsolete_files(&self, min_pending_output: u64) -> ObsoleteFiles {
        let (table_files, blob_files) = self.shared.registry.take_obsolete_files(min_pending_output);
        let manifests = std::mem::take(&mut self.shared.state.lock().obsolete_manifests);
        if !table_files.is_empty() || !manifests.is_empty() {
            info!(
                "{} obsolete table files, {} obsolete manifests",
                table_files.len(),
                manifests.len()
            );
        }
        ObsoleteFiles {
            table_files,
            blob_files,
            manifests,
        }
    }

    /// Table and blob file numbers referenced by any live version.
    pub fn live_files(&self) -> (Vec<u64>, Vec<u64>) {
        self.shared.registry.live_files()
    }

    pub fn num_live_versions(&self, cf_id: u32) -> usize {
        self.shared.registry.num_live_versions(cf_id)
    }

    pub fn total_sst_files_size(&self) -> u64 {
        self.shared.registry.total_sst_files_size()
    }

    pub fn registry(&self) -> &Arc<VersionRegistry> {
        &self.shared.registry
    }

    /// Estimated bytes of `cf_id` holding user keys in `[start, end)`.
    pub fn approximate_size(&self, cf_id: u32, start: &[u8], end: &[u8]) -> Result<u64> {
        let version = self.current(cf_id)?;
        let start = InternalKey::new(start, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
        let end = InternalKey::new(end, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
        version.approximate_size(start.encode(), end.encode())
    }

    /// Finds table file `number` in the current version of any column family.
    pub fn get_metadata_for_file(&self, number: u64) -> Result<FileLocationInfo> {
        let state = self.shared.state.lock();
        for cfd in state.column_families.iter() {
            if let Some((level, file)) = cfd.current().storage_info().file_by_number(number) {
                return Ok(FileLocationInfo {
                    cf_id: cfd.id(),
                    level,
                    file: Arc::clone(file),
                });
            }
        }
        Err(Error::NotFound)
    }

    pub fn db_path(&self) -> &Path {
        &self.shared.db_path
    }
}

impl Drop for VersionSet {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.committer.take()
            && handle.join().is_err()
        {
            error!("manifest committer panicked");
        }
    }
}

/// Points `CURRENT` at manifest `manifest_number` through a synced temp
/// file and a rename.
pub(crate) fn set_current_file(env: &dyn Env, db_path: &Path, manifest_number: u64) -> Result<()> {
    let contents = format!("{}\n", descriptor_base_name(manifest_number));
    let tmp = temp_file_name(db_path, manifest_number);
    let result = (|| -> Result<()> {
        let mut file = env.new_writable_file(&tmp)?;
        file.append(contents.as_bytes())?;
        file.sync()?;
        env.rename_file(&tmp, &current_file_name(db_path))?;
        env.sync_dir(db_path)
    })();
    if result.is_err() && env.file_exists(&tmp) {
        if let Err(e) = env.remove_file(&tmp) {
            warn!("could not remove {}: {e}", tmp.display());
        }
    }
    result
}

/// Bare manifest name and number recorded in `CURRENT`.
pub fn read_current_file(env: &dyn Env, db_path: &Path) -> Result<(String, u64)> {
    let data = env.read_file(&current_file_name(db_path))?;
    let text = String::from_utf8(data)
        .map_err(|_| Error::Corruption("CURRENT file is not valid UTF-8".into()))?;
    let Some(name) = text.strip_suffix('\n') else {
        return Err(Error::Corruption("CURRENT file does not end with newline".into()));
    };
    match parse_file_name(name) {
        Some((FileType::Descriptor, number)) => Ok((name.to_string(), number)),
        _ => Err(Error::Corruption(format!("CURRENT file corrupted: {name:?}"))),
    }
}

fn new_db(env: &dyn Env, db_path: &Path, comparator: &str) -> Result<()> {
    const MANIFEST_NUMBER: u64 = 1;
    let mut edit = VersionEdit::new();
    edit.set_comparator_name(comparator);
    edit.set_log_number(0);
    edit.set_next_file(MANIFEST_NUMBER + 1);
    edit.set_last_sequence(0);

    info!("creating new database at {}", db_path.display());
    let path = descriptor_file_name(db_path, MANIFEST_NUMBER);
    let result = (|| -> Result<()> {
        let mut log = LogWriter::new(env.new_writable_file(&path)?, MANIFEST_NUMBER);
        log.add_record(RecordType::Snapshot, edit.encode()?)?;
        log.sync()?;
        set_current_file(env, db_path, MANIFEST_NUMBER)
    })();
    if result.is_err() && env.file_exists(&path) {
        if let Err(e) = env.remove_file(&path) {
            warn!("could not remove {}: {e}", path.display());
        }
    }
    result
}

struct RecoveringColumnFamily {
    name: String,
    ioptions: Arc<ImmutableCfOptions>,
    mutable_options: MutableCfOptions,
    builder: VersionBuilder,
    log_number: u64,
}

#[derive(Default)]
struct ManifestFields {
    log_number: Option<u64>,
    prev_log_number: Option<u64>,
    next_file_number: Option<u64>,
    last_sequence: Option<SequenceNumber>,
    max_column_family: u32,
    min_log_number_to_keep: u64,
}

struct Recovered {
    column_families: ColumnFamilySet,
    manifest_file_number: u64,
    next_file_number: u64,
    last_sequence: SequenceNumber,
    prev_log_number: u64,
    min_log_number_to_keep: u64,
    next_version_number: u64,
}

struct Recovery<'a> {
    requested: HashMap<&'a str, &'a ColumnFamilyDescriptor>,
    building: BTreeMap<u32, RecoveringColumnFamily>,
    not_opened: BTreeMap<u32, String>,
    fields: ManifestFields,
    next_version_number: u64,
}

impl<'a> Recovery<'a> {
    fn new(column_families: &'a [ColumnFamilyDescriptor]) -> Result<Self> {
        let requested: HashMap<&str, &ColumnFamilyDescriptor> = column_families
            .iter()
            .map(|cf| (cf.name.as_str(), cf))
            .collect();
        let mut recovery = Recovery {
            requested,
            building: BTreeMap::new(),
            not_opened: BTreeMap::new(),
            fields: ManifestFields::default(),
            next_version_number: 1,
        };
        let default = recovery
            .requested
            .get(DEFAULT_COLUMN_FAMILY_NAME)
            .copied()
            .ok_or_else(|| Error::InvalidArgument("Default column family not specified".into()))?;
        recovery.start_column_family(DEFAULT_COLUMN_FAMILY_ID, default);
        Ok(recovery)
    }

    fn start_column_family(&mut self, cf_id: u32, descriptor: &ColumnFamilyDescriptor) {
        let ioptions = Arc::new(descriptor.options.immutable.clone());
        let mutable_options = descriptor.options.mutable.clone();
        let base = new_empty_version(
            cf_id,
            self.next_version_number,
            Arc::clone(&ioptions),
            mutable_options.clone(),
        );
        self.next_version_number += 1;
        self.building.insert(
            cf_id,
            RecoveringColumnFamily {
                name: descriptor.name.clone(),
                ioptions,
                mutable_options,
                builder: VersionBuilder::new(Arc::new(base)),
                log_number: 0,
            },
        );
    }

    fn apply(&mut self, edit: &VersionEdit) -> Result<()> {
        let cf_id = edit.column_family;
        if let Some(name) = &edit.column_family_add {
            if self.building.contains_key(&cf_id) || self.not_opened.contains_key(&cf_id) {
                return Err(Error::Corruption(format!(
                    "Manifest adding the same column family twice: {name}"
                )));
            }
            match self.requested.get(name.as_str()).copied() {
                Some(descriptor) => self.start_column_family(cf_id, descriptor),
                None => {
                    self.not_opened.insert(cf_id, name.clone());
                }
            }
        } else if edit.is_column_family_drop {
            if self.building.remove(&cf_id).is_none() && self.not_opened.remove(&cf_id).is_none() {
                return Err(Error::Corruption(
                    "Manifest - dropping non-existing column family".into(),
                ));
            }
        }

        if !edit.is_column_family_drop && !self.not_opened.contains_key(&cf_id) {
            let Some(cf) = self.building.get_mut(&cf_id) else {
                return Err(Error::Corruption(format!(
                    "Manifest record referencing unknown column family {cf_id}"
                )));
            };
            if let Some(comparator) = &edit.comparator {
                let ours = cf.ioptions.user_comparator.name();
                if comparator != ours {
                    return Err(Error::InvalidArgument(format!(
                        "{ours}: does not match existing comparator {comparator}"
                    )));
                }
            }
            cf.builder.apply(edit)?;
            if let Some(number) = edit.log_number {
                cf.log_number = number;
            }
        }

        let fields = &mut self.fields;
        if edit.log_number.is_some() {
            fields.log_number = edit.log_number;
        }
        if edit.prev_log_number.is_some() {
            fields.prev_log_number = edit.prev_log_number;
        }
        if edit.next_file_number.is_some() {
            fields.next_file_number = edit.next_file_number;
        }
        if edit.last_sequence.is_some() {
            fields.last_sequence = edit.last_sequence;
        }
        if let Some(id) = edit.max_column_family {
            fields.max_column_family = fields.max_column_family.max(id);
        }
        if let Some(number) = edit.min_log_number_to_keep {
            fields.min_log_number_to_keep = fields.min_log_number_to_keep.max(number);
        }
        Ok(())
    }
}

fn recover(
    env: &dyn Env,
    db_path: &Path,
    column_families: &[ColumnFamilyDescriptor],
    registry: &Arc<VersionRegistry>,
) -> Result<Recovered> {
    let (manifest_name, manifest_file_number) = read_current_file(env, db_path)?;
    let reader = LogReader::open(env, &db_path.join(&manifest_name))?;
    let mut recovery = Recovery::new(column_families)?;

    let mut buffer = AtomicGroupReadBuffer::new();
    let mut recovered_edits = 0usize;
    for record in reader.iter() {
        let edit = VersionEdit::decode(&record?.payload)?;
        buffer.add_edit(&edit)?;
        if edit.is_in_atomic_group() {
            if buffer.is_full() {
                for grouped in buffer.take() {
                    recovery.apply(&grouped)?;
                    recovered_edits += 1;
                }
            }
        } else {
            recovery.apply(&edit)?;
            recovered_edits += 1;
        }
    }
    if !buffer.is_empty() {
        warn!("{manifest_name} ends inside an atomic group; ignoring the incomplete group");
        buffer.clear();
    }

    let fields = &recovery.fields;
    let Some(next_file_number) = fields.next_file_number else {
        return Err(Error::Corruption("no meta-nextfile entry in descriptor".into()));
    };
    let Some(log_number) = fields.log_number else {
        return Err(Error::Corruption("no meta-lognumber entry in descriptor".into()));
    };
    let Some(last_sequence) = fields.last_sequence else {
        return Err(Error::Corruption("no last-sequence-number entry in descriptor".into()));
    };
    let prev_log_number = fields.prev_log_number.unwrap_or(0);

    if !recovery.not_opened.is_empty() {
        let names: Vec<&str> = recovery.not_opened.values().map(String::as_str).collect();
        return Err(Error::InvalidArgument(format!(
            "Column families not opened: {}",
            names.join(", ")
        )));
    }
    for cf in column_families {
        if !recovery.building.values().any(|b| b.name == cf.name) {
            return Err(Error::InvalidArgument(format!(
                "Column family not found: {}",
                cf.name
            )));
        }
    }

    let mut set = ColumnFamilySet::new();
    set.update_max_column_family(fields.max_column_family);
    let max_column_family = fields.max_column_family;
    let min_log_number_to_keep = fields.min_log_number_to_keep;
    let mut next_version_number = recovery.next_version_number;
    for (cf_id, cf) in recovery.building {
        if !cf.builder.check_consistency_for_num_levels() {
            return Err(Error::InvalidArgument(format!(
                "db has more levels than options.num_levels in column family {}",
                cf.name
            )));
        }
        let mut storage = empty_storage(&cf.ioptions, None);
        cf.builder.save_to(&mut storage)?;
        let mut version = Version::new(
            cf_id,
            next_version_number,
            storage,
            Arc::clone(&cf.ioptions),
            cf.mutable_options.clone(),
        );
        next_version_number += 1;
        version.prepare_apply();
        version.finalize();
        let current = registry.register(version);
        set.insert(ColumnFamilyData::new(
            cf_id,
            cf.name,
            cf.ioptions,
            cf.mutable_options,
            current,
            cf.log_number,
        ));
    }

    let next_file_number = next_file_number
        .max(manifest_file_number + 1)
        .max(log_number + 1)
        .max(prev_log_number + 1);
    info!(
        "Recovered from manifest file:{manifest_name} succeeded,manifest_file_number is {manifest_file_number}, \
         next_file_number is {next_file_number}, last_sequence is {last_sequence}, log_number is {log_number},\
         prev_log_number is {prev_log_number},max_column_family is {max_column_family},\
         min_log_number_to_keep is {min_log_number_to_keep}, {recovered_edits} edits applied"
    );
    for cfd in set.iter() {
        info!(
            "Column family [{}] (ID {}), log number is {}",
            cfd.name(),
            cfd.id(),
            cfd.log_number()
        );
    }

    Ok(Recovered {
        column_families: set,
        manifest_file_number,
        next_file_number,
        last_sequence,
        prev_log_number,
        min_log_number_to_keep,
        next_version_number,
    })
}
