//! The manifest committer: a single thread that owns the manifest log and
//! turns queued write requests into new versions.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use log::{error, info, warn};

use crate::error::{Error, Result};
use crate::filename::{descriptor_base_name, descriptor_file_name};
use crate::manifest::edit::VersionEdit;
use crate::manifest::record::RecordType;
use crate::manifest::writer::LogWriter;
use crate::options::{ColumnFamilyOptions, ImmutableCfOptions, MutableCfOptions};
use crate::version::Version;
use crate::version::builder::VersionBuilder;
use crate::version_set::column_family::{ColumnFamilyData, empty_storage, new_empty_version};
use crate::version_set::{Shared, set_current_file};

/// Edits for one column family.
pub(crate) struct ManifestWriter {
    pub cf_id: u32,
    pub edits: Vec<VersionEdit>,
    /// Options of the column family a creating edit adds.
    pub cf_options: Option<ColumnFamilyOptions>,
}

impl ManifestWriter {
    fn is_column_family_add(&self) -> bool {
        self.edits.first().is_some_and(VersionEdit::is_column_family_add)
    }

    fn is_column_family_manipulation(&self) -> bool {
        self.edits
            .first()
            .is_some_and(VersionEdit::is_column_family_manipulation)
    }
}

/// One caller's submission; all its writers land in the same batch.
pub(crate) struct ManifestWriteRequest {
    pub writers: Vec<ManifestWriter>,
    pub reply: Sender<Result<()>>,
}

impl ManifestWriteRequest {
    fn is_column_family_manipulation(&self) -> bool {
        self.writers
            .iter()
            .any(ManifestWriter::is_column_family_manipulation)
    }
}

/// State of one column family as captured for a manifest snapshot.
struct SnapshotColumnFamily {
    id: u32,
    name: String,
    comparator: String,
    log_number: u64,
    version: Arc<Version>,
}

struct SnapshotState {
    column_families: Vec<SnapshotColumnFamily>,
    max_column_family: u32,
    min_log_number_to_keep: u64,
}

/// What a batch produces: the version to install for each column family it
/// touched, in apply order.
enum NewVersion {
    Existing(Version),
    Added {
        name: String,
        log_number: u64,
        version: Version,
    },
}

struct BuilderSlot {
    builder: VersionBuilder,
    ioptions: Arc<ImmutableCfOptions>,
    mutable_options: MutableCfOptions,
    added_name: Option<String>,
}

pub(crate) struct Committer {
    shared: Arc<Shared>,
    log: Option<LogWriter>,
    queue: VecDeque<ManifestWriteRequest>,
    // Manifests kept after a failed `CURRENT` switch. `CURRENT` may name
    // one of them until the next successful rotation.
    stranded_manifests: Vec<u64>,
}

impl Committer {
    pub(crate) fn spawn(
        shared: Arc<Shared>,
        requests: Receiver<ManifestWriteRequest>,
    ) -> io::Result<JoinHandle<()>> {
        let committer = Committer {
            shared,
            log: None,
            queue: VecDeque::new(),
            stranded_manifests: Vec::new(),
        };
        thread::Builder::new()
            .name("manifest-committer".into())
            .spawn(move || committer.run(requests))
    }

    fn run(mut self, requests: Receiver<ManifestWriteRequest>) {
        while let Ok(first) = requests.recv() {
            self.queue.push_back(first);
            self.queue.extend(requests.try_iter());
            while !self.queue.is_empty() {
                self.process_next_batch();
            }
        }
        info!("manifest committer stopped");
    }

    // The leader takes every following request up to the next column family
    // creation or drop, which always commits alone.
    fn next_batch(&mut self) -> Vec<ManifestWriteRequest> {
        let Some(leader) = self.queue.pop_front() else {
            return Vec::new();
        };
        let alone = leader.is_column_family_manipulation();
        let mut batch = vec![leader];
        if !alone {
            while self
                .queue
                .front()
                .is_some_and(|r| !r.is_column_family_manipulation())
            {
                if let Some(request) = self.queue.pop_front() {
                    batch.push(request);
                }
            }
        }
        batch
    }

    fn process_next_batch(&mut self) {
        let batch = self.next_batch();
        let results = self.process_manifest_writes(&batch);
        for (request, result) in batch.into_iter().zip(results) {
            let _ = request.reply.send(result);
        }
    }

    fn process_manifest_writes(&mut self, batch: &[ManifestWriteRequest]) -> Vec<Result<()>> {
        let shared = Arc::clone(&self.shared);
        let mut served = vec![false; batch.len()];
        let fail_all = |e: Error| batch.iter().map(|_| Err(e.clone())).collect::<Vec<_>>();

        let needs_new_manifest = self
            .log
            .as_ref()
            .is_none_or(|log| log.file_size() > shared.max_manifest_file_size);
        let new_manifest_number =
            needs_new_manifest.then(|| shared.next_file_number.fetch_add(1, AtomicOrdering::SeqCst));

        let mut batch_edits: Vec<VersionEdit> = Vec::new();
        let mut group_start: Option<usize> = None;
        let mut slots: BTreeMap<u32, BuilderSlot> = BTreeMap::new();
        let mut apply_order: Vec<u32> = Vec::new();
        let mut dropped_cf: Option<u32> = None;
        let snapshot;
        let old_manifest_number;
        {
            let state = shared.state.lock();
            old_manifest_number = state.manifest_file_number;
            snapshot = needs_new_manifest.then(|| SnapshotState {
                column_families: state
                    .column_families
                    .iter()
                    .map(|cfd| SnapshotColumnFamily {
                        id: cfd.id(),
                        name: cfd.name().to_string(),
                        comparator: cfd.ioptions().user_comparator.name().to_string(),
                        log_number: cfd.log_number(),
                        version: Arc::clone(cfd.current().version()),
                    })
                    .collect(),
                max_column_family: state.column_families.max_column_family(),
                min_log_number_to_keep: state.min_log_number_to_keep,
            });

            for (index, request) in batch.iter().enumerate() {
                for writer in &request.writers {
                    if writer.edits.is_empty() {
                        continue;
                    }
                    let cfd = state.column_families.get(writer.cf_id);
                    let is_add = writer.is_column_family_add();
                    if cfd.is_none() && !is_add {
                        // Edits of a dropped column family are not written;
                        // the rest of their atomic group shrinks to match.
                        if let Some(start) = group_start
                            && batch_edits
                                .last()
                                .and_then(|e| e.remaining_entries)
                                .is_some_and(|r| r > 0)
                        {
                            let skipped = entries_in_current_group(&writer.edits);
                            for edit in &mut batch_edits[start..] {
                                if let Some(remaining) = edit.remaining_entries.as_mut() {
                                    *remaining = remaining.saturating_sub(skipped);
                                }
                            }
                        }
                        continue;
                    }
                    served[index] = true;

                    if is_add {
                        let Some(name) = writer.edits[0].column_family_add.clone() else {
                            continue;
                        };
                        if state.column_families.id_of(&name).is_some() {
                            return fail_all(Error::InvalidArgument(format!(
                                "Column family already exists: {name}"
                            )));
                        }
                        let Some(options) = &writer.cf_options else {
                            return fail_all(Error::InvalidArgument(format!(
                                "no options given for new column family {name}"
                            )));
                        };
                        let ioptions = Arc::new(options.immutable.clone());
                        let base = new_empty_version(
                            writer.cf_id,
                            shared.next_version_number.fetch_add(1, AtomicOrdering::SeqCst),
                            Arc::clone(&ioptions),
                            options.mutable.clone(),
                        );
                        slots.insert(
                            writer.cf_id,
                            BuilderSlot {
                                builder: VersionBuilder::new(Arc::new(base)),
                                ioptions,
                                mutable_options: options.mutable.clone(),
                                added_name: Some(name),
                            },
                        );
                        apply_order.push(writer.cf_id);
                    } else if writer.edits[0].is_column_family_drop {
                        dropped_cf = Some(writer.cf_id);
                    } else if let Some(cfd) = cfd
                        && !slots.contains_key(&writer.cf_id)
                    {
                        slots.insert(
                            writer.cf_id,
                            BuilderSlot {
                                builder: VersionBuilder::new(Arc::clone(cfd.current().version())),
                                ioptions: Arc::clone(cfd.ioptions()),
                                mutable_options: cfd.mutable_options().clone(),
                                added_name: None,
                            },
                        );
                        apply_order.push(writer.cf_id);
                    }

                    for edit in &writer.edits {
                        let mut edit = edit.clone();
                        edit.column_family = writer.cf_id;
                        if edit.is_in_atomic_group() {
                            let starts_group = batch_edits
                                .last()
                                .is_none_or(|last| last.remaining_entries.is_none_or(|r| r == 0));
                            if starts_group {
                                group_start = Some(batch_edits.len());
                            }
                        } else {
                            group_start = None;
                        }
                        if edit.prev_log_number.is_none() {
                            edit.set_prev_log_number(state.prev_log_number);
                        }
                        edit.set_next_file(shared.next_file_number.load(AtomicOrdering::SeqCst));
                        edit.set_last_sequence(shared.last_sequence.load(AtomicOrdering::SeqCst));
                        if !edit.is_column_family_drop
                            && let Some(slot) = slots.get_mut(&writer.cf_id)
                            && let Err(e) = slot.builder.apply(&edit)
                        {
                            error!("applying version edit failed: {e}");
                            return fail_all(e);
                        }
                        batch_edits.push(edit);
                    }
                }
            }
        }

        if batch_edits.is_empty() {
            return served
                .iter()
                .map(|&s| if s { Ok(()) } else { Err(Error::ColumnFamilyDropped) })
                .collect();
        }

        let mut new_versions = Vec::with_capacity(apply_order.len());
        for cf_id in &apply_order {
            let Some(slot) = slots.remove(cf_id) else {
                continue;
            };
            match build_version(&shared, *cf_id, slot, &batch_edits) {
                Ok(v) => new_versions.push((*cf_id, v)),
                Err(e) => {
                    error!("building version for column family {cf_id} failed: {e}");
                    return fail_all(e);
                }
            }
        }

        let manifest_io = self.write_manifest(new_manifest_number, snapshot.as_ref(), &batch_edits);
        let manifest_io_ok = manifest_io.is_ok();
        let committed = manifest_io.and_then(|()| match new_manifest_number {
            Some(number) => set_current_file(shared.env.as_ref(), &shared.db_path, number),
            None => Ok(()),
        });
        if let Err(e) = committed {
            error!("MANIFEST write failed: {e}");
            self.log = None;
            if let Some(number) = new_manifest_number {
                let path = descriptor_file_name(&shared.db_path, number);
                if manifest_io_ok {
                    // The rename may have landed, so CURRENT can already name it.
                    warn!("keeping manifest {} after failed CURRENT update", path.display());
                    self.stranded_manifests.push(number);
                } else if let Err(remove_err) = shared.env.remove_file(&path) {
                    warn!("could not remove failed manifest {}: {remove_err}", path.display());
                }
            }
            return fail_all(e);
        }

        let mut released = Vec::new();
        {
            let mut state = shared.state.lock();
            if let Some(number) = new_manifest_number {
                if old_manifest_number != 0 && old_manifest_number != number {
                    state
                        .obsolete_manifests
                        .push(descriptor_base_name(old_manifest_number));
                }
                for stranded in self.stranded_manifests.drain(..) {
                    if stranded != number && stranded != old_manifest_number {
                        state.obsolete_manifests.push(descriptor_base_name(stranded));
                    }
                }
                state.manifest_file_number = number;
            }
            for (cf_id, new_version) in new_versions {
                match new_version {
                    NewVersion::Existing(mut version) => {
                        version.finalize();
                        let current = shared.registry.register(version);
                        if let Some(cfd) = state.column_families.get_mut(cf_id) {
                            cfd.set_current(current);
                        }
                    }
                    NewVersion::Added {
                        name,
                        log_number,
                        mut version,
                    } => {
                        version.finalize();
                        let ioptions = Arc::clone(version.ioptions());
                        let mutable = version.mutable_options().clone();
                        let current = shared.registry.register(version);
                        info!("column family [{name}] (ID {cf_id}) created");
                        state.column_families.insert(ColumnFamilyData::new(
                            cf_id, name, ioptions, mutable, current, log_number,
                        ));
                    }
                }
            }
            for edit in &batch_edits {
                if let Some(number) = edit.log_number
                    && let Some(cfd) = state.column_families.get_mut(edit.column_family)
                {
                    cfd.set_log_number(number);
                }
                if let Some(number) = edit.prev_log_number {
                    state.prev_log_number = number;
                }
                if let Some(id) = edit.max_column_family {
                    state.column_families.update_max_column_family(id);
                }
                if let Some(number) = edit.min_log_number_to_keep {
                    state.min_log_number_to_keep = state.min_log_number_to_keep.max(number);
                }
                if let Some(seq) = edit.last_sequence {
                    state.descriptor_last_sequence = state.descriptor_last_sequence.max(seq);
                }
            }
            if let Some(cf_id) = dropped_cf
                && let Some(cfd) = state.column_families.remove(cf_id)
            {
                info!("column family [{}] (ID {cf_id}) dropped", cfd.name());
                released.push(cfd);
            }
        }
        // Dropped column families release their versions outside the lock.
        drop(released);

        served
            .iter()
            .map(|&s| if s { Ok(()) } else { Err(Error::ColumnFamilyDropped) })
            .collect()
    }

    fn write_manifest(
        &mut self,
        new_manifest_number: Option<u64>,
        snapshot: Option<&SnapshotState>,
        batch_edits: &[VersionEdit],
    ) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        if let Some(number) = new_manifest_number {
            info!("creating manifest {number}");
            let path = descriptor_file_name(&shared.db_path, number);
            let file = shared.env.new_writable_file(&path)?;
            let mut log = LogWriter::new(file, number);
            if let Some(snapshot) = snapshot {
                write_snapshot(&mut log, snapshot)?;
            }
            self.log = Some(log);
        }
        let log = self
            .log
            .as_mut()
            .ok_or_else(|| Error::Corruption("no manifest open for writing".into()))?;
        for edit in batch_edits {
            log.add_record(RecordType::Edit, edit.encode()?)?;
        }
        log.sync()
    }
}

// Edits of `edits` that belong to the atomic group in progress.
fn entries_in_current_group(edits: &[VersionEdit]) -> u32 {
    let mut count = 0;
    for edit in edits {
        match edit.remaining_entries {
            None => break,
            Some(0) => {
                count += 1;
                break;
            }
            Some(_) => count += 1,
        }
    }
    count
}

fn build_version(
    shared: &Shared,
    cf_id: u32,
    slot: BuilderSlot,
    batch_edits: &[VersionEdit],
) -> Result<NewVersion> {
    let base = slot.builder.base();
    let mut storage = empty_storage(&slot.ioptions, Some(base.storage_info()));
    slot.builder.save_to(&mut storage)?;
    let mut version = Version::new(
        cf_id,
        shared.next_version_number.fetch_add(1, AtomicOrdering::SeqCst),
        storage,
        slot.ioptions,
        slot.mutable_options,
    );
    version.prepare_apply();
    Ok(match slot.added_name {
        Some(name) => {
            let log_number = batch_edits
                .iter()
                .filter(|e| e.column_family == cf_id)
                .filter_map(|e| e.log_number)
                .next_back()
                .unwrap_or(0);
            NewVersion::Added {
                name,
                log_number,
                version,
            }
        }
        None => NewVersion::Existing(version),
    })
}

/// Writes the full state as the first records of a new manifest: per
/// column family, its identity and then its files.
fn write_snapshot(log: &mut LogWriter, snapshot: &SnapshotState) -> Result<()> {
    for cf in &snapshot.column_families {
        let mut identity = VersionEdit::for_column_family(cf.id);
        if cf.id != 0 {
            identity.add_column_family(cf.name.clone());
        }
        identity.set_comparator_name(cf.comparator.clone());
        identity.set_max_column_family(snapshot.max_column_family);
        if snapshot.min_log_number_to_keep > 0 {
            identity.set_min_log_number_to_keep(snapshot.min_log_number_to_keep);
        }
        log.add_record(RecordType::Snapshot, identity.encode()?)?;

        let mut files = VersionEdit::for_column_family(cf.id);
        let storage = cf.version.storage_info();
        for meta in storage.blob_files().values() {
            files.add_blob_file(meta.number, meta.total_blob_count, meta.total_blob_bytes);
            if meta.garbage_blob_count > 0 {
                files.add_blob_file_garbage(
                    meta.number,
                    meta.garbage_blob_count,
                    meta.garbage_blob_bytes,
                );
            }
        }
        for level in 0..storage.num_levels() {
            for f in storage.level_files(level) {
                files.add_shared_file(level, Arc::clone(f));
            }
        }
        files.set_log_number(cf.log_number);
        log.add_record(RecordType::Snapshot, files.encode()?)?;
    }
    Ok(())
}
