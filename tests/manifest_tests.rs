// Manifest logs on disk: framing, torn tails and damaged records.

use std::fs::OpenOptions;
use std::path::Path;

use lsm_version::env::{Env, PosixEnv};
use lsm_version::filename::descriptor_file_name;
use lsm_version::manifest::reader::LogReader;
use lsm_version::manifest::record::RecordType;
use lsm_version::manifest::writer::LogWriter;
use lsm_version::options::{ColumnFamilyDescriptor, ColumnFamilyOptions};
use lsm_version::types::{InternalKey, ValueType};
use lsm_version::version::file_meta::FileMetaData;
use lsm_version::{VersionEdit, VersionSet, VersionSetOptions};

fn table(number: u64, lo: &[u8], hi: &[u8]) -> FileMetaData {
    FileMetaData::new(
        number,
        512,
        InternalKey::new(lo, 9, ValueType::Value),
        InternalKey::new(hi, 9, ValueType::Value),
        9,
        9,
    )
    .with_entry_stats(3, 1, 30, 300)
    .with_times(1_700_000_000, 1_700_000_100)
}

fn open(path: &Path) -> lsm_version::Result<VersionSet> {
    VersionSet::open(
        VersionSetOptions::new(path),
        vec![ColumnFamilyDescriptor::new("default", ColumnFamilyOptions::default())],
    )
}

#[test]
fn edits_survive_a_round_trip_through_a_log_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = descriptor_file_name(dir.path(), 7);
    let env = PosixEnv;

    let mut first = VersionEdit::new();
    first.set_comparator_name("leveldb.BytewiseComparator");
    first.set_next_file(40);
    first.set_last_sequence(9);
    let mut second = VersionEdit::new();
    second.add_file(2, table(31, b"apple", b"melon"));
    second.delete_file(1, 12);
    second.add_blob_file(33, 10, 4096);
    second.mark_atomic_group(0);

    let mut log = LogWriter::new(env.new_writable_file(&path).unwrap(), 7);
    log.add_record(RecordType::Snapshot, first.encode().unwrap()).unwrap();
    log.add_record(RecordType::Edit, second.encode().unwrap()).unwrap();
    log.sync().unwrap();
    assert_eq!(log.file_size(), std::fs::metadata(&path).unwrap().len());

    let reader = LogReader::open(&env, &path).unwrap();
    let records: Vec<_> = reader.iter().collect::<lsm_version::Result<_>>().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].record_type, RecordType::Snapshot);
    assert_eq!(records[1].record_type, RecordType::Edit);

    let decoded = VersionEdit::decode(&records[1].payload).unwrap();
    assert_eq!(decoded.remaining_entries, Some(0));
    assert!(decoded.deleted_files.contains(&(1, 12)));
    let (level, file) = &decoded.new_files[0];
    assert_eq!(*level, 2);
    assert_eq!(file.number, 31);
    assert_eq!(file.largest.user_key(), b"melon");
    assert_eq!((file.num_entries, file.num_deletions), (3, 1));
    assert_eq!(file.file_creation_time, 1_700_000_100);
    assert_eq!(decoded.blob_file_additions[0].total_blob_bytes, 4096);
}

/// Commits two edits and returns the path of the manifest holding them.
fn two_commits(dir: &Path) -> std::path::PathBuf {
    let vs = open(dir).unwrap();
    let mut edit = VersionEdit::new();
    edit.add_file(1, table(20, b"a", b"f"));
    vs.log_and_apply(0, edit).unwrap();
    let mut edit = VersionEdit::new();
    edit.add_file(1, table(21, b"g", b"p"));
    vs.log_and_apply(0, edit).unwrap();
    descriptor_file_name(dir, vs.manifest_file_number())
}

fn level1(vs: &VersionSet) -> Vec<u64> {
    vs.current(0)
        .unwrap()
        .storage_info()
        .level_files(1)
        .iter()
        .map(|f| f.number)
        .collect()
}

#[test]
fn torn_final_record_is_dropped_on_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = two_commits(dir.path());
    let len = std::fs::metadata(&manifest).unwrap().len();
    OpenOptions::new()
        .write(true)
        .open(&manifest)
        .unwrap()
        .set_len(len - 3)
        .unwrap();

    let vs = open(dir.path()).unwrap();
    assert_eq!(level1(&vs), vec![20]);
}

#[test]
fn damaged_record_fails_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = two_commits(dir.path());
    let mut data = std::fs::read(&manifest).unwrap();
    let last = data.len() - 1;
    data[last] ^= 0x5A;
    std::fs::write(&manifest, data).unwrap();

    let err = open(dir.path()).unwrap_err();
    assert!(err.is_corruption(), "{err}");
}

#[test]
fn missing_manifest_named_by_current_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = two_commits(dir.path());
    std::fs::remove_file(&manifest).unwrap();

    assert!(open(dir.path()).is_err());
}
