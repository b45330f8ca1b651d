// VersionSet: manifest commits, recovery, column families and file lifetime.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering as AtomicOrdering};

use lsm_version::comparator::{BytewiseComparator, Comparator, InternalKeyComparator};
use lsm_version::env::{Env, PosixEnv, WritableFile};
use lsm_version::filename::{current_file_name, descriptor_file_name};
use lsm_version::manifest::record::RecordType;
use lsm_version::manifest::writer::LogWriter;
use lsm_version::options::{ColumnFamilyDescriptor, ColumnFamilyOptions, ImmutableCfOptions};
use lsm_version::table::TableCache;
use lsm_version::table::mem::{InMemoryTableBuilder, InMemoryTableCache};
use lsm_version::types::{InternalKey, SequenceNumber, ValueType};
use lsm_version::version::file_meta::FileMetaData;
use lsm_version::{DEFAULT_COLUMN_FAMILY_ID, Error, VersionEdit, VersionSet, VersionSetOptions};

fn table(number: u64, lo: &str, hi: &str, seq: SequenceNumber) -> FileMetaData {
    FileMetaData::new(
        number,
        4096,
        InternalKey::new(lo.as_bytes(), seq, ValueType::Value),
        InternalKey::new(hi.as_bytes(), seq, ValueType::Value),
        seq,
        seq,
    )
}

fn cf(name: &str) -> ColumnFamilyDescriptor {
    ColumnFamilyDescriptor::new(name, ColumnFamilyOptions::default())
}

fn open(path: &Path, names: &[&str]) -> lsm_version::Result<VersionSet> {
    VersionSet::open(
        VersionSetOptions::new(path),
        names.iter().map(|n| cf(n)).collect(),
    )
}

fn level_numbers(vs: &VersionSet, cf_id: u32, level: usize) -> Vec<u64> {
    vs.current(cf_id)
        .unwrap()
        .storage_info()
        .level_files(level)
        .iter()
        .map(|f| f.number)
        .collect()
}

fn manifests_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("MANIFEST-"))
        .collect();
    names.sort();
    names
}

// =============================================================================
// Creating and reopening a database
// =============================================================================
#[test]
fn open_creates_a_new_database() {
    let dir = tempfile::tempdir().unwrap();
    let vs = open(dir.path(), &["default"]).unwrap();

    assert!(current_file_name(dir.path()).exists());
    assert_eq!(
        std::fs::read_to_string(current_file_name(dir.path())).unwrap(),
        "MANIFEST-000001\n"
    );
    assert_eq!(vs.manifest_file_number(), 1);
    assert_eq!(vs.last_sequence(), 0);
    assert_eq!(vs.column_families(), vec![(0, "default".to_string())]);
    assert!(vs.current(DEFAULT_COLUMN_FAMILY_ID).unwrap().storage_info().level_files(0).is_empty());
}

#[test]
fn open_without_create_if_missing_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = VersionSetOptions::new(dir.path().join("db"));
    options.create_if_missing = false;

    let err = VersionSet::open(options, vec![cf("default")]).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
}

#[test]
fn default_column_family_is_required() {
    let dir = tempfile::tempdir().unwrap();
    let err = open(dir.path(), &["other"]).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
}

#[test]
fn committed_edits_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let (f1, f2) = {
        let vs = open(dir.path(), &["default"]).unwrap();
        let f1 = vs.new_file_number();
        let f2 = vs.new_file_number();
        vs.set_last_sequence(42);

        let mut edit = VersionEdit::new();
        edit.add_file(0, table(f1, "a", "k", 40));
        edit.add_file(1, table(f2, "b", "z", 10));
        edit.set_log_number(7);
        vs.log_and_apply(DEFAULT_COLUMN_FAMILY_ID, edit).unwrap();

        assert_eq!(level_numbers(&vs, 0, 0), vec![f1]);
        assert_eq!(vs.descriptor_last_sequence(), 42);
        (f1, f2)
    };

    let vs = open(dir.path(), &["default"]).unwrap();
    assert_eq!(level_numbers(&vs, 0, 0), vec![f1]);
    assert_eq!(level_numbers(&vs, 0, 1), vec![f2]);
    assert_eq!(vs.last_sequence(), 42);
    assert_eq!(vs.column_family_log_number(0).unwrap(), 7);
    assert!(vs.current_next_file_number() > f2.max(7));
    let meta = vs.get_metadata_for_file(f2).unwrap();
    assert_eq!(meta.level, 1);
    assert_eq!(meta.file.smallest.user_key(), b"b");
    assert!(vs.get_metadata_for_file(9999).unwrap_err().is_not_found());
}

#[test]
fn current_without_newline_is_corruption() {
    let dir = tempfile::tempdir().unwrap();
    drop(open(dir.path(), &["default"]).unwrap());
    std::fs::write(current_file_name(dir.path()), "MANIFEST-000001").unwrap();

    let err = open(dir.path(), &["default"]).unwrap_err();
    assert!(err.to_string().contains("does not end with newline"), "{err}");
}

#[derive(Debug)]
struct ReverseComparator;

impl Comparator for ReverseComparator {
    fn name(&self) -> &str {
        "test.ReverseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        b.cmp(a)
    }
}

#[test]
fn reopening_with_another_comparator_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    drop(open(dir.path(), &["default"]).unwrap());

    let mut options = ColumnFamilyOptions::default();
    options.immutable.user_comparator = Arc::new(ReverseComparator);
    let err = VersionSet::open(
        VersionSetOptions::new(dir.path()),
        vec![ColumnFamilyDescriptor::new("default", options)],
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(err.to_string().contains("does not match existing comparator"), "{err}");
}

// =============================================================================
// Column families
// =============================================================================
#[test]
fn column_families_are_created_dropped_and_recovered() {
    let dir = tempfile::tempdir().unwrap();
    {
        let vs = open(dir.path(), &["default"]).unwrap();
        let hot = vs.create_column_family(cf("hot")).unwrap();
        let cold = vs.create_column_family(cf("cold")).unwrap();
        assert_eq!((hot, cold), (1, 2));
        assert!(vs.create_column_family(cf("hot")).is_err());

        let mut edit = VersionEdit::new();
        edit.add_file(1, table(vs.new_file_number(), "a", "b", 1));
        vs.log_and_apply(hot, edit).unwrap();

        vs.drop_column_family(cold).unwrap();
        assert!(matches!(vs.current(cold), Err(Error::ColumnFamilyDropped)));
        assert!(matches!(
            vs.log_and_apply(cold, VersionEdit::new()),
            Err(Error::ColumnFamilyDropped)
        ));
        assert!(matches!(
            vs.drop_column_family(DEFAULT_COLUMN_FAMILY_ID),
            Err(Error::InvalidArgument(_))
        ));
    }

    let names = VersionSet::list_column_families(&PosixEnv, dir.path()).unwrap();
    assert_eq!(names, vec!["default".to_string(), "hot".to_string()]);

    let vs = open(dir.path(), &["default", "hot"]).unwrap();
    let hot = vs.column_family_id("hot").unwrap();
    assert_eq!(level_numbers(&vs, hot, 1).len(), 1);
    assert_eq!(vs.column_family_id("cold"), None);
    // Ids are never reused.
    assert_eq!(vs.create_column_family(cf("warm")).unwrap(), 3);
}

#[test]
fn every_recorded_column_family_must_be_opened() {
    let dir = tempfile::tempdir().unwrap();
    {
        let vs = open(dir.path(), &["default"]).unwrap();
        vs.create_column_family(cf("extra")).unwrap();
    }

    let err = open(dir.path(), &["default"]).unwrap_err();
    assert!(err.to_string().contains("Column families not opened: extra"), "{err}");

    let err = open(dir.path(), &["default", "extra", "ghost"]).unwrap_err();
    assert!(err.to_string().contains("Column family not found: ghost"), "{err}");
}

#[test]
fn atomic_group_spans_column_families() {
    let dir = tempfile::tempdir().unwrap();
    {
        let vs = open(dir.path(), &["default"]).unwrap();
        let other = vs.create_column_family(cf("other")).unwrap();
        let mut a = VersionEdit::new();
        a.add_file(1, table(vs.new_file_number(), "a", "c", 3));
        let mut b = VersionEdit::new();
        b.add_file(1, table(vs.new_file_number(), "x", "z", 4));
        vs.log_and_apply_atomic(vec![(0, a), (other, b)]).unwrap();
    }

    let vs = open(dir.path(), &["default", "other"]).unwrap();
    assert_eq!(level_numbers(&vs, 0, 1).len(), 1);
    assert_eq!(level_numbers(&vs, 1, 1).len(), 1);
}

// =============================================================================
// Hand-written manifests
// =============================================================================
fn write_manifest(dir: &Path, number: u64, edits: &[VersionEdit]) {
    let env = PosixEnv;
    let path = descriptor_file_name(dir, number);
    let mut log = LogWriter::new(env.new_writable_file(&path).unwrap(), number);
    let mut base = VersionEdit::new();
    base.set_comparator_name(BytewiseComparator.name());
    base.set_log_number(0);
    base.set_next_file(100);
    base.set_last_sequence(5);
    log.add_record(RecordType::Snapshot, base.encode().unwrap()).unwrap();
    for edit in edits {
        log.add_record(RecordType::Edit, edit.encode().unwrap()).unwrap();
    }
    log.sync().unwrap();
    std::fs::write(current_file_name(dir), format!("MANIFEST-{number:06}\n")).unwrap();
}

#[test]
fn incomplete_trailing_atomic_group_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let mut complete = VersionEdit::new();
    complete.add_file(1, table(10, "a", "b", 1));
    let mut partial = VersionEdit::new();
    partial.add_file(1, table(11, "m", "n", 2));
    partial.mark_atomic_group(1);
    write_manifest(dir.path(), 5, &[complete, partial]);

    let vs = open(dir.path(), &["default"]).unwrap();
    assert_eq!(level_numbers(&vs, 0, 1), vec![10]);
    assert_eq!(vs.last_sequence(), 5);
    assert_eq!(vs.current_next_file_number(), 100);
}

#[test]
fn normal_edit_inside_atomic_group_is_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let mut grouped = VersionEdit::new();
    grouped.add_file(1, table(10, "a", "b", 1));
    grouped.mark_atomic_group(1);
    let mut normal = VersionEdit::new();
    normal.add_file(1, table(11, "m", "n", 2));
    write_manifest(dir.path(), 5, &[grouped, normal]);

    let err = open(dir.path(), &["default"]).unwrap_err();
    assert!(err.is_corruption(), "{err}");
}

#[test]
fn manifest_without_next_file_is_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let path = descriptor_file_name(dir.path(), 3);
    let mut log = LogWriter::new(PosixEnv.new_writable_file(&path).unwrap(), 3);
    let mut edit = VersionEdit::new();
    edit.set_comparator_name(BytewiseComparator.name());
    edit.set_log_number(0);
    edit.set_last_sequence(0);
    log.add_record(RecordType::Snapshot, edit.encode().unwrap()).unwrap();
    log.sync().unwrap();
    std::fs::write(current_file_name(dir.path()), "MANIFEST-000003\n").unwrap();

    let err = open(dir.path(), &["default"]).unwrap_err();
    assert!(err.to_string().contains("no meta-nextfile entry"), "{err}");
}

// =============================================================================
// Manifest rotation and obsolete files
// =============================================================================
#[test]
fn oversized_manifest_is_rotated_with_a_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let mut numbers = Vec::new();
    {
        let mut options = VersionSetOptions::new(dir.path());
        options.max_manifest_file_size = 1;
        let vs = VersionSet::open(options, vec![cf("default")]).unwrap();
        for i in 0..3 {
            let number = vs.new_file_number();
            numbers.push(number);
            let mut edit = VersionEdit::new();
            let lo = format!("k{i}a");
            let hi = format!("k{i}z");
            edit.add_file(1, table(number, &lo, &hi, i + 1));
            vs.log_and_apply(0, edit).unwrap();
        }
        let obsolete = vs.get_obsolete_files(u64::MAX);
        // The manifest from open plus every rotated-away one.
        assert_eq!(obsolete.manifests.len(), 3);
        assert!(obsolete.manifests.contains(&"MANIFEST-000001".to_string()));
    }

    let vs = open(dir.path(), &["default"]).unwrap();
    assert_eq!(level_numbers(&vs, 0, 1), numbers);
    assert!(manifests_in(dir.path()).len() >= 2);
}

#[test]
fn files_become_obsolete_once_unpinned() {
    let dir = tempfile::tempdir().unwrap();
    let vs = open(dir.path(), &["default"]).unwrap();
    let old = vs.new_file_number();
    let mut edit = VersionEdit::new();
    edit.add_file(1, table(old, "a", "z", 1));
    vs.log_and_apply(0, edit).unwrap();

    let pinned = vs.current(0).unwrap();
    let new = vs.new_file_number();
    let mut edit = VersionEdit::new();
    edit.delete_file(1, old);
    edit.add_file(2, table(new, "a", "z", 1));
    vs.log_and_apply(0, edit).unwrap();

    assert_eq!(vs.num_live_versions(0), 2);
    assert_eq!(vs.live_files().0, {
        let mut live = vec![old, new];
        live.sort_unstable();
        live
    });
    assert!(vs.get_obsolete_files(u64::MAX).table_files.is_empty());

    drop(pinned);
    assert_eq!(vs.num_live_versions(0), 1);
    let obsolete = vs.get_obsolete_files(u64::MAX);
    let numbers: Vec<u64> = obsolete.table_files.iter().map(|f| f.number).collect();
    assert_eq!(numbers, vec![old]);
    assert_eq!(vs.live_files().0, vec![new]);
}

#[test]
fn pending_outputs_stay_queued() {
    let dir = tempfile::tempdir().unwrap();
    let vs = open(dir.path(), &["default"]).unwrap();
    let number = vs.new_file_number();
    let mut edit = VersionEdit::new();
    edit.add_file(1, table(number, "a", "z", 1));
    vs.log_and_apply(0, edit).unwrap();
    let mut edit = VersionEdit::new();
    edit.delete_file(1, number);
    vs.log_and_apply(0, edit).unwrap();

    assert!(vs.get_obsolete_files(number).table_files.is_empty());
    assert_eq!(vs.get_obsolete_files(number + 1).table_files.len(), 1);
}

#[test]
fn rejected_edit_leaves_the_version_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let vs = open(dir.path(), &["default"]).unwrap();
    let before = vs.current(0).unwrap().version_number();

    let mut edit = VersionEdit::new();
    edit.delete_file(1, 12345);
    let err = vs.log_and_apply(0, edit).unwrap_err();
    assert!(err.is_corruption());
    assert_eq!(vs.current(0).unwrap().version_number(), before);

    let mut edit = VersionEdit::new();
    edit.add_file(1, table(vs.new_file_number(), "a", "b", 1));
    vs.log_and_apply(0, edit).unwrap();
    assert_ne!(vs.current(0).unwrap().version_number(), before);
}

// =============================================================================
// Group commit
// =============================================================================
#[test]
fn concurrent_writers_all_commit() {
    let dir = tempfile::tempdir().unwrap();
    let vs = open(dir.path(), &["default"]).unwrap();

    std::thread::scope(|s| {
        for t in 0..8u64 {
            let vs = &vs;
            s.spawn(move || {
                for i in 0..5u64 {
                    let number = vs.new_file_number();
                    let seq = 1 + t * 100 + i;
                    let mut edit = VersionEdit::new();
                    edit.add_file(0, table(number, "a", "z", seq));
                    vs.log_and_apply(0, edit).unwrap();
                }
            });
        }
    });
    assert_eq!(level_numbers(&vs, 0, 0).len(), 40);
    drop(vs);

    let vs = open(dir.path(), &["default"]).unwrap();
    let l0 = vs.current(0).unwrap();
    let files = l0.storage_info().level_files(0);
    assert_eq!(files.len(), 40);
    assert!(files.windows(2).all(|w| w[0].largest_seqno > w[1].largest_seqno));
}

// =============================================================================
// Manifest I/O failures
// =============================================================================

/// Step of a manifest commit that the environment makes fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Fault {
    Nothing = 0,
    ManifestAppend,
    ManifestSync,
    CurrentTempWrite,
    CurrentRename,
    DirSync,
}

const COMMIT_STEPS: [Fault; 5] = [
    Fault::ManifestAppend,
    Fault::ManifestSync,
    Fault::CurrentTempWrite,
    Fault::CurrentRename,
    Fault::DirSync,
];

#[derive(Clone, Default)]
struct FaultSwitch(Arc<AtomicU8>);

impl FaultSwitch {
    fn set(&self, fault: Fault) {
        self.0.store(fault as u8, AtomicOrdering::SeqCst);
    }

    fn is(&self, fault: Fault) -> bool {
        self.0.load(AtomicOrdering::SeqCst) == fault as u8
    }

    fn injected(&self, fault: Fault) -> lsm_version::Result<()> {
        if self.is(fault) {
            return Err(std::io::Error::other(format!("injected {fault:?} failure")).into());
        }
        Ok(())
    }
}

struct FailingEnv {
    inner: PosixEnv,
    switch: FaultSwitch,
}

struct FailingFile {
    inner: Box<dyn WritableFile>,
    switch: FaultSwitch,
    append_fault: Fault,
    sync_fault: Fault,
}

impl WritableFile for FailingFile {
    fn append(&mut self, data: &[u8]) -> lsm_version::Result<()> {
        self.switch.injected(self.append_fault)?;
        self.inner.append(data)
    }

    fn sync(&mut self) -> lsm_version::Result<()> {
        self.switch.injected(self.sync_fault)?;
        self.inner.sync()
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }
}

impl Env for FailingEnv {
    fn now_secs(&self) -> lsm_version::Result<u64> {
        self.inner.now_secs()
    }

    fn file_modification_time(&self, path: &Path) -> lsm_version::Result<u64> {
        self.inner.file_modification_time(path)
    }

    fn new_writable_file(&self, path: &Path) -> lsm_version::Result<Box<dyn WritableFile>> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (append_fault, sync_fault) = if name.starts_with("MANIFEST-") {
            (Fault::ManifestAppend, Fault::ManifestSync)
        } else if name.ends_with(".dbtmp") {
            (Fault::CurrentTempWrite, Fault::CurrentTempWrite)
        } else {
            (Fault::Nothing, Fault::Nothing)
        };
        Ok(Box::new(FailingFile {
            inner: self.inner.new_writable_file(path)?,
            switch: self.switch.clone(),
            append_fault,
            sync_fault,
        }))
    }

    fn read_file(&self, path: &Path) -> lsm_version::Result<Vec<u8>> {
        self.inner.read_file(path)
    }

    fn rename_file(&self, from: &Path, to: &Path) -> lsm_version::Result<()> {
        if to.file_name().is_some_and(|n| n == "CURRENT") {
            self.switch.injected(Fault::CurrentRename)?;
        }
        self.inner.rename_file(from, to)
    }

    fn remove_file(&self, path: &Path) -> lsm_version::Result<()> {
        self.inner.remove_file(path)
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.inner.file_exists(path)
    }

    fn create_dir_all(&self, path: &Path) -> lsm_version::Result<()> {
        self.inner.create_dir_all(path)
    }

    fn sync_dir(&self, dir: &Path) -> lsm_version::Result<()> {
        self.switch.injected(Fault::DirSync)?;
        self.inner.sync_dir(dir)
    }

    fn list_dir(&self, dir: &Path) -> lsm_version::Result<Vec<PathBuf>> {
        self.inner.list_dir(dir)
    }
}

/// Options that rotate the manifest on every commit.
fn rotating_options(path: &Path, env: Arc<dyn Env>) -> VersionSetOptions {
    let mut options = VersionSetOptions::new(path);
    options.max_manifest_file_size = 1;
    options.env = env;
    options
}

fn open_failing(path: &Path) -> (VersionSet, FaultSwitch) {
    let switch = FaultSwitch::default();
    let env = Arc::new(FailingEnv {
        inner: PosixEnv,
        switch: switch.clone(),
    });
    let vs = VersionSet::open(rotating_options(path, env), vec![cf("default")]).unwrap();
    (vs, switch)
}

fn add_level1(vs: &VersionSet, lo: &str, hi: &str) -> (u64, lsm_version::Result<()>) {
    let number = vs.new_file_number();
    let mut edit = VersionEdit::new();
    edit.add_file(1, table(number, lo, hi, 1));
    (number, vs.log_and_apply(0, edit))
}

fn manifest_named_by_current(dir: &Path) -> String {
    let current = std::fs::read_to_string(current_file_name(dir)).unwrap();
    current.trim_end().to_string()
}

/// Deletes the manifests the version set retired and checks that the one
/// `CURRENT` names is all that is left.
fn retire_manifests(vs: &VersionSet, dir: &Path) {
    for name in vs.get_obsolete_files(u64::MAX).manifests {
        std::fs::remove_file(dir.join(name)).unwrap();
    }
    assert_eq!(manifests_in(dir), vec![manifest_named_by_current(dir)]);
}

#[test]
fn failed_manifest_write_installs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let switch = FaultSwitch::default();
    let mut options = VersionSetOptions::new(dir.path());
    options.env = Arc::new(FailingEnv {
        inner: PosixEnv,
        switch: switch.clone(),
    });
    let vs = VersionSet::open(options, vec![cf("default")]).unwrap();

    switch.set(Fault::ManifestSync);
    let (_, result) = add_level1(&vs, "a", "b");
    let err = result.unwrap_err();
    assert!(err.is_io(), "{err}");
    assert!(level_numbers(&vs, 0, 1).is_empty());
    // The half-written manifest is gone; CURRENT still names the old one.
    assert_eq!(manifests_in(dir.path()), vec!["MANIFEST-000001".to_string()]);
    assert_eq!(vs.manifest_file_number(), 1);

    switch.set(Fault::Nothing);
    let (number, result) = add_level1(&vs, "a", "b");
    result.unwrap();
    assert_eq!(level_numbers(&vs, 0, 1), vec![number]);
    drop(vs);

    let vs = open(dir.path(), &["default"]).unwrap();
    assert_eq!(level_numbers(&vs, 0, 1), vec![number]);
}

#[test]
fn every_failed_commit_step_leaves_a_reopenable_database() {
    for fault in COMMIT_STEPS {
        let dir = tempfile::tempdir().unwrap();
        let (vs, switch) = open_failing(dir.path());
        let (first, result) = add_level1(&vs, "a", "c");
        result.unwrap();

        switch.set(fault);
        let (second, result) = add_level1(&vs, "d", "f");
        let err = result.unwrap_err();
        assert!(err.is_io(), "{fault:?}: {err}");
        assert_eq!(level_numbers(&vs, 0, 1), vec![first], "{fault:?}");
        switch.set(Fault::Nothing);

        let named = manifest_named_by_current(dir.path());
        assert!(manifests_in(dir.path()).contains(&named), "{fault:?}: {named} is missing");
        drop(vs);

        let env: Arc<dyn Env> = Arc::new(PosixEnv);
        let vs = VersionSet::open(rotating_options(dir.path(), env), vec![cf("default")])
            .unwrap_or_else(|e| panic!("{fault:?}: reopen failed: {e}"));
        // Once the rename lands, the new manifest holds the failed edit.
        let expected = if fault == Fault::DirSync {
            vec![first, second]
        } else {
            vec![first]
        };
        assert_eq!(level_numbers(&vs, 0, 1), expected, "{fault:?}");

        let (third, result) = add_level1(&vs, "g", "i");
        result.unwrap();
        let named = manifest_named_by_current(dir.path());
        assert!(manifests_in(dir.path()).contains(&named), "{fault:?}: {named} is missing");
        drop(vs);

        let vs = open(dir.path(), &["default"]).unwrap();
        assert!(level_numbers(&vs, 0, 1).contains(&third), "{fault:?}");
    }
}

#[test]
fn manifest_kept_after_failed_current_update_is_retired_by_next_rotation() {
    for fault in [Fault::CurrentTempWrite, Fault::CurrentRename, Fault::DirSync] {
        let dir = tempfile::tempdir().unwrap();
        let (vs, switch) = open_failing(dir.path());
        let (first, result) = add_level1(&vs, "a", "c");
        result.unwrap();
        let installed = vs.manifest_file_number();

        switch.set(fault);
        assert!(add_level1(&vs, "d", "f").1.is_err());
        switch.set(Fault::Nothing);
        // The manifest written before the CURRENT update stays on disk.
        assert_eq!(manifests_in(dir.path()).len(), 3, "{fault:?}");
        assert_eq!(vs.manifest_file_number(), installed);

        let (third, result) = add_level1(&vs, "g", "i");
        result.unwrap();
        retire_manifests(&vs, dir.path());
        drop(vs);

        let vs = open(dir.path(), &["default"]).unwrap();
        assert_eq!(level_numbers(&vs, 0, 1), vec![first, third], "{fault:?}");
    }
}

// =============================================================================
// Size estimates through the column family's tables
// =============================================================================
#[test]
fn approximate_size_reads_table_offsets() {
    let dir = tempfile::tempdir().unwrap();
    let tables = Arc::new(InMemoryTableCache::new());
    let mut options = ColumnFamilyOptions::default();
    options.immutable = ImmutableCfOptions {
        table_cache: Arc::clone(&tables) as Arc<dyn TableCache>,
        ..ImmutableCfOptions::default()
    };
    let vs = VersionSet::open(
        VersionSetOptions::new(dir.path()),
        vec![ColumnFamilyDescriptor::new("default", options)],
    )
    .unwrap();

    let icmp = InternalKeyComparator::new(Arc::new(BytewiseComparator));
    let mut edit = VersionEdit::new();
    for (lo, hi) in [("a", "f"), ("g", "p")] {
        let number = vs.new_file_number();
        let mut builder = InMemoryTableBuilder::new(icmp.clone());
        for c in lo.as_bytes()[0]..=hi.as_bytes()[0] {
            builder = builder.put(&[c], 1, &[b'v'; 100]);
        }
        let (t, meta) = builder.finish(number).unwrap();
        tables.insert(number, t);
        edit.add_file(1, meta);
    }
    vs.log_and_apply(0, edit).unwrap();

    let whole = vs.approximate_size(0, b"a", b"zz").unwrap();
    let first_half = vs.approximate_size(0, b"a", b"g").unwrap();
    let middle = vs.approximate_size(0, b"c", b"j").unwrap();
    assert_eq!(whole, vs.total_sst_files_size());
    assert!(first_half > 0 && first_half < whole);
    assert!(middle > 0 && middle < whole);
    assert_eq!(vs.approximate_size(0, b"q", b"z").unwrap(), 0);
}
