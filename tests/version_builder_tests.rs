// VersionBuilder: folding edits onto a base version.

mod common;

use std::sync::Arc;

use common::{Fixture, icmp};
use lsm_version::VersionEdit;
use lsm_version::options::CompactionStyle;
use lsm_version::types::{InternalKey, SequenceNumber, ValueType};
use lsm_version::version::builder::VersionBuilder;
use lsm_version::version::file_meta::FileMetaData;
use lsm_version::version::storage_info::VersionStorageInfo;

fn meta(number: u64, lo: &str, hi: &str, seqs: (SequenceNumber, SequenceNumber)) -> FileMetaData {
    FileMetaData::new(
        number,
        1000,
        InternalKey::new(lo.as_bytes(), seqs.0, ValueType::Value),
        InternalKey::new(hi.as_bytes(), seqs.1, ValueType::Value),
        seqs.0,
        seqs.1,
    )
}

fn builder_on(fx: &Fixture) -> VersionBuilder {
    VersionBuilder::new(Arc::new(fx.version()))
}

fn save(builder: &VersionBuilder) -> lsm_version::Result<VersionStorageInfo> {
    let base = builder.base().storage_info();
    let mut storage = VersionStorageInfo::new(
        icmp(),
        base.num_levels(),
        CompactionStyle::Level,
        Some(base),
        true,
    );
    builder.save_to(&mut storage)?;
    Ok(storage)
}

fn numbers(storage: &VersionStorageInfo, level: usize) -> Vec<u64> {
    storage.level_files(level).iter().map(|f| f.number).collect()
}

#[test]
fn saved_levels_are_ordered() {
    let fx = Fixture::new();
    let mut builder = builder_on(&fx);
    let mut edit = VersionEdit::new();
    edit.add_file(0, meta(1, "a", "z", (1, 10)));
    edit.add_file(0, meta(2, "c", "d", (11, 20)));
    edit.add_file(0, meta(3, "b", "y", (5, 30)));
    edit.add_file(1, meta(4, "m", "p", (1, 1)));
    edit.add_file(1, meta(5, "a", "c", (2, 2)));
    builder.apply(&edit).unwrap();

    let storage = save(&builder).unwrap();
    assert_eq!(numbers(&storage, 0), vec![3, 2, 1]);
    assert_eq!(numbers(&storage, 1), vec![5, 4]);
}

#[test]
fn deletions_and_moves_between_levels() {
    let mut fx = Fixture::new();
    let kept = fx.add_table(1, |t| t.put(b"a", 1, b"v"));
    let moved = fx.add_table(1, |t| t.put(b"m", 2, b"v"));
    let mut builder = builder_on(&fx);

    let moved_meta = Arc::clone(&fx.files(1)[1]);
    let mut edit = VersionEdit::new();
    edit.delete_file(1, moved);
    edit.add_shared_file(2, moved_meta);
    builder.apply(&edit).unwrap();

    let storage = save(&builder).unwrap();
    assert_eq!(numbers(&storage, 1), vec![kept]);
    assert_eq!(numbers(&storage, 2), vec![moved]);
}

#[test]
fn deleting_an_unknown_file_is_corruption() {
    let mut fx = Fixture::new();
    let number = fx.add_table(1, |t| t.put(b"a", 1, b"v"));
    let mut builder = builder_on(&fx);

    let mut edit = VersionEdit::new();
    edit.delete_file(1, 999);
    let err = builder.apply(&edit).unwrap_err();
    assert!(err.to_string().contains("not in the LSM tree"), "{err}");

    let mut edit = VersionEdit::new();
    edit.delete_file(2, number);
    let err = builder.apply(&edit).unwrap_err();
    assert!(err.to_string().contains("on level 1"), "{err}");
}

#[test]
fn adding_a_file_twice_is_corruption() {
    let mut fx = Fixture::new();
    fx.add_table(1, |t| t.put(b"a", 1, b"v"));
    let existing = Arc::clone(&fx.files(1)[0]);
    let mut builder = builder_on(&fx);

    let mut edit = VersionEdit::new();
    edit.add_shared_file(3, existing);
    let err = builder.apply(&edit).unwrap_err();
    assert!(err.is_corruption());
    assert!(err.to_string().contains("already in the LSM tree on level 1"), "{err}");
}

#[test]
fn overlapping_sorted_level_fails_the_save() {
    let fx = Fixture::new();
    let mut builder = builder_on(&fx);
    let mut edit = VersionEdit::new();
    edit.add_file(1, meta(1, "a", "m", (1, 1)));
    edit.add_file(1, meta(2, "k", "z", (2, 2)));
    builder.apply(&edit).unwrap();

    let err = save(&builder).unwrap_err();
    assert!(err.to_string().contains("overlapping ranges"), "{err}");
}

#[test]
fn files_beyond_the_configured_levels_are_reported() {
    let fx = Fixture::new();
    let mut builder = builder_on(&fx);

    let mut edit = VersionEdit::new();
    edit.add_file(9, meta(1, "a", "b", (1, 1)));
    builder.apply(&edit).unwrap();
    assert!(!builder.check_consistency_for_num_levels());

    let mut edit = VersionEdit::new();
    edit.delete_file(9, 1);
    builder.apply(&edit).unwrap();
    assert!(builder.check_consistency_for_num_levels());
}

#[test]
fn blob_files_follow_their_linked_tables() {
    let fx = Fixture::new();
    let mut builder = builder_on(&fx);

    let mut edit = VersionEdit::new();
    edit.add_blob_file(50, 10, 1000);
    edit.add_blob_file(51, 10, 1000);
    edit.add_file(1, meta(60, "a", "c", (1, 1)).with_oldest_blob_file_number(51));
    builder.apply(&edit).unwrap();
    let storage = save(&builder).unwrap();

    // #50 is older than every blob file still referenced.
    assert!(storage.blob_file(50).is_none());
    let linked = storage.blob_file(51).unwrap();
    assert!(linked.linked_ssts.contains(&60));
}

#[test]
fn fully_garbage_unlinked_blob_file_is_dropped() {
    let fx = Fixture::new();
    let mut builder = builder_on(&fx);

    let mut edit = VersionEdit::new();
    edit.add_blob_file(50, 2, 200);
    edit.add_blob_file(51, 2, 200);
    edit.add_file(1, meta(60, "a", "c", (1, 1)).with_oldest_blob_file_number(50));
    builder.apply(&edit).unwrap();

    let mut edit = VersionEdit::new();
    edit.add_blob_file_garbage(51, 2, 200);
    builder.apply(&edit).unwrap();
    let storage = save(&builder).unwrap();

    assert!(storage.blob_file(50).is_some());
    assert!(storage.blob_file(51).is_none());
}

#[test]
fn blob_garbage_errors() {
    let fx = Fixture::new();
    let mut builder = builder_on(&fx);

    let mut edit = VersionEdit::new();
    edit.add_blob_file_garbage(77, 1, 1);
    assert!(builder.apply(&edit).unwrap_err().to_string().contains("not found"));

    let mut edit = VersionEdit::new();
    edit.add_blob_file(77, 1, 10);
    builder.apply(&edit).unwrap();
    let mut edit = VersionEdit::new();
    edit.add_blob_file_garbage(77, 2, 1);
    assert!(builder.apply(&edit).unwrap_err().to_string().contains("Garbage overflow"));

    let mut edit = VersionEdit::new();
    edit.add_blob_file(77, 1, 10);
    assert!(builder.apply(&edit).unwrap_err().to_string().contains("already added"));
}
