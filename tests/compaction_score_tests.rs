// Compaction scoring, level targets and the derived file orderings.

mod common;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use common::icmp;
use lsm_version::options::{CompactionPri, CompactionStyle, ImmutableCfOptions, MutableCfOptions};
use lsm_version::types::{InternalKey, MAX_SEQUENCE_NUMBER, SequenceNumber, VALUE_TYPE_FOR_SEEK, ValueType};
use lsm_version::version::builder::{by_smallest_key, newest_first_by_seqno};
use lsm_version::version::file_meta::{BlobFileMetaData, FileMetaData};
use lsm_version::version::storage_info::VersionStorageInfo;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn meta(number: u64, lo: &str, hi: &str, seq: SequenceNumber, size: u64) -> FileMetaData {
    FileMetaData::new(
        number,
        size,
        InternalKey::new(lo.as_bytes(), seq, ValueType::Value),
        InternalKey::new(hi.as_bytes(), seq, ValueType::Value),
        seq,
        seq,
    )
}

fn options(num_levels: usize) -> (ImmutableCfOptions, MutableCfOptions) {
    let ioptions = ImmutableCfOptions {
        num_levels,
        ..ImmutableCfOptions::default()
    };
    let mutable = MutableCfOptions {
        max_bytes_for_level_base: 1000,
        ..MutableCfOptions::default()
    };
    (ioptions, mutable)
}

/// Lays out `files`, derives everything a version derives, and scores it.
fn scored(
    ioptions: &ImmutableCfOptions,
    mutable: &MutableCfOptions,
    files: Vec<(usize, Arc<FileMetaData>)>,
) -> VersionStorageInfo {
    scored_with_blobs(ioptions, mutable, files, Vec::new())
}

fn scored_with_blobs(
    ioptions: &ImmutableCfOptions,
    mutable: &MutableCfOptions,
    files: Vec<(usize, Arc<FileMetaData>)>,
    blob_files: Vec<BlobFileMetaData>,
) -> VersionStorageInfo {
    let icmp = icmp();
    let mut storage = VersionStorageInfo::new(
        icmp.clone(),
        ioptions.num_levels,
        ioptions.compaction_style,
        None,
        false,
    );
    let mut levels = vec![Vec::new(); ioptions.num_levels];
    for (level, file) in files {
        levels[level].push(file);
    }
    for (level, mut files) in levels.into_iter().enumerate() {
        if level == 0 {
            files.sort_by(|a, b| newest_first_by_seqno(a, b));
        } else {
            files.sort_by(|a, b| by_smallest_key(&icmp, a, b));
        }
        for file in files {
            storage.update_accumulated_stats(&file);
            storage.add_file(level, file);
        }
    }
    for blob in blob_files {
        storage.add_blob_file(Arc::new(blob));
    }
    storage.compute_compensated_sizes();
    storage.update_num_non_empty_levels();
    storage.calculate_base_bytes(ioptions, mutable);
    storage.update_files_by_compaction_pri(ioptions.compaction_pri);
    storage.generate_file_indexer();
    storage.generate_level0_non_overlapping();
    storage.generate_bottommost_files();
    storage.compute_compaction_score(ioptions, mutable);
    storage
}

fn numbers(files: &[(usize, Arc<FileMetaData>)]) -> Vec<u64> {
    let mut numbers: Vec<u64> = files.iter().map(|(_, f)| f.number).collect();
    numbers.sort_unstable();
    numbers
}

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

// =============================================================================
// Scores
// =============================================================================
#[test]
fn level0_score_counts_files_against_the_trigger() {
    let (ioptions, mutable) = options(4);
    let two = scored(
        &ioptions,
        &mutable,
        vec![
            (0, Arc::new(meta(1, "a", "z", 2, 100))),
            (0, Arc::new(meta(2, "a", "z", 3, 100))),
        ],
    );
    assert_eq!(two.score_for_level(0), 0.5);

    let eight = scored(
        &ioptions,
        &mutable,
        (0..8).map(|i| (0, Arc::new(meta(i + 1, "a", "z", i + 1, 10)))).collect(),
    );
    assert_eq!(eight.score_for_level(0), 2.0);
    assert_eq!(eight.compaction_score_level(0), 0);
}

#[test]
fn sorted_level_score_is_bytes_over_target() {
    let (ioptions, mutable) = options(4);
    let storage = scored(
        &ioptions,
        &mutable,
        vec![
            (1, Arc::new(meta(1, "a", "b", 1, 1000))),
            (1, Arc::new(meta(2, "c", "d", 2, 1000))),
            (1, Arc::new(meta(3, "e", "f", 3, 1000))),
            (2, Arc::new(meta(4, "a", "z", 4, 5000))),
        ],
    );
    assert_eq!(storage.max_bytes_for_level(1), 1000);
    assert_eq!(storage.max_bytes_for_level(2), 10_000);
    assert_eq!(storage.score_for_level(1), 3.0);
    assert_eq!(storage.score_for_level(2), 0.5);

    // Ranked most urgent first.
    assert_eq!(storage.compaction_score_level(0), 1);
    assert_eq!(storage.compaction_score_level(1), 2);
    assert!(storage.compaction_score(0) >= storage.compaction_score(1));
    assert!(storage.compaction_score(1) >= storage.compaction_score(2));
}

#[test]
fn files_being_compacted_do_not_count() {
    let (ioptions, mutable) = options(4);
    let busy = Arc::new(meta(1, "a", "b", 1, 1000));
    busy.set_being_compacted(true);
    let storage = scored(
        &ioptions,
        &mutable,
        vec![
            (1, busy),
            (1, Arc::new(meta(2, "c", "d", 2, 1000))),
            (1, Arc::new(meta(3, "e", "f", 3, 1000))),
        ],
    );
    assert_eq!(storage.score_for_level(1), 2.0);
}

#[test]
fn adding_files_never_lowers_a_level_score() {
    let (ioptions, mutable) = options(5);
    let mut rng = StdRng::seed_from_u64(7);
    let mut files = Vec::new();
    let mut previous = 0.0;
    for i in 0..40u64 {
        let lo = format!("k{:04}", i * 2);
        let hi = format!("k{:04}", i * 2 + 1);
        files.push((2, Arc::new(meta(i + 1, &lo, &hi, i + 1, rng.gen_range(1..5000)))));
        let storage = scored(&ioptions, &mutable, files.clone());
        let score = storage.score_for_level(2);
        assert!(score >= previous, "score fell from {previous} to {score}");
        previous = score;
    }
}

#[test]
fn deletion_heavy_files_are_compensated() {
    let (ioptions, mutable) = options(4);
    let plain = Arc::new(meta(1, "a", "b", 1, 1000).with_entry_stats(100, 0, 1000, 10_000));
    let tombstones = Arc::new(meta(2, "c", "d", 2, 1000).with_entry_stats(100, 90, 1000, 0));
    scored(
        &ioptions,
        &mutable,
        vec![(1, Arc::clone(&plain)), (1, Arc::clone(&tombstones))],
    );
    assert_eq!(plain.compensated_file_size(), 1000);
    assert!(tombstones.compensated_file_size() > 1000);
}

// =============================================================================
// Marked file sets
// =============================================================================
#[test]
fn marked_files_skip_the_last_non_empty_level() {
    let (ioptions, mutable) = options(4);
    let storage = scored(
        &ioptions,
        &mutable,
        vec![
            (1, Arc::new(meta(1, "a", "b", 5, 100).marked(true))),
            (1, Arc::new(meta(2, "c", "d", 6, 100))),
            (2, Arc::new(meta(3, "a", "z", 1, 100).marked(true))),
        ],
    );
    assert_eq!(numbers(storage.files_marked_for_compaction()), vec![1]);
}

#[test]
fn bottommost_files_are_marked_once_no_snapshot_sees_them() {
    let (ioptions, mutable) = options(4);
    let bottom = meta(3, "a", "k", 20, 100).with_entry_stats(10, 5, 100, 100);
    let mut storage = scored(
        &ioptions,
        &mutable,
        vec![
            (1, Arc::new(meta(1, "a", "c", 50, 100).with_entry_stats(10, 5, 100, 100))),
            (2, Arc::new(bottom)),
            (2, Arc::new(meta(4, "m", "z", 30, 100).with_entry_stats(10, 1, 100, 100))),
        ],
    );
    let bottommost: Vec<u64> = numbers(storage.bottommost_files());
    assert_eq!(bottommost, vec![3, 4]);
    assert!(storage.bottommost_files_marked_for_compaction().is_empty());
    assert_eq!(storage.bottommost_files_mark_threshold(), 20);

    storage.update_oldest_snapshot(21);
    assert_eq!(numbers(storage.bottommost_files_marked_for_compaction()), vec![3]);
    assert_eq!(storage.bottommost_files_mark_threshold(), MAX_SEQUENCE_NUMBER);
}

#[test]
fn ttl_expiry_uses_the_oldest_ancestor_time() {
    let (ioptions, mut mutable) = options(4);
    mutable.ttl = 3600;
    let now = now();
    let storage = scored(
        &ioptions,
        &mutable,
        vec![
            (1, Arc::new(meta(1, "a", "b", 1, 100).with_times(now - 7200, now - 7200))),
            (1, Arc::new(meta(2, "c", "d", 2, 100).with_times(now, now))),
        ],
    );
    assert_eq!(numbers(storage.expired_ttl_files()), vec![1]);
}

#[test]
fn periodic_compaction_prefers_the_creation_time() {
    let (ioptions, mut mutable) = options(4);
    mutable.periodic_compaction_seconds = 3600;
    let now = now();
    let storage = scored(
        &ioptions,
        &mutable,
        vec![
            (1, Arc::new(meta(1, "a", "b", 1, 100).with_times(now, now - 7200))),
            (2, Arc::new(meta(2, "c", "d", 2, 100).with_times(now - 7200, now))),
        ],
    );
    assert_eq!(numbers(storage.files_marked_for_periodic_compaction()), vec![1]);
}

// =============================================================================
// Level targets and pending bytes
// =============================================================================
#[test]
fn dynamic_level_bytes_anchor_on_the_last_level() {
    let (mut ioptions, mutable) = options(7);
    ioptions.level_compaction_dynamic_level_bytes = true;
    let mutable = MutableCfOptions {
        max_bytes_for_level_base: 10_000,
        ..mutable
    };
    let storage = scored(
        &ioptions,
        &mutable,
        vec![(6, Arc::new(meta(1, "a", "z", 1, 10_000_000)))],
    );
    assert_eq!(storage.base_level(), 3);
    assert_eq!(storage.max_bytes_for_level(3), 10_000);
    assert_eq!(storage.max_bytes_for_level(4), 100_000);
    assert_eq!(storage.max_bytes_for_level(5), 1_000_000);
    assert_eq!(storage.max_bytes_for_level(6), 10_000_000);
}

#[test]
fn empty_tree_with_dynamic_bytes_compacts_into_the_last_level() {
    let (mut ioptions, mutable) = options(7);
    ioptions.level_compaction_dynamic_level_bytes = true;
    let storage = scored(
        &ioptions,
        &mutable,
        vec![(0, Arc::new(meta(1, "a", "z", 1, 100)))],
    );
    assert_eq!(storage.base_level(), 6);
}

#[test]
fn estimated_bytes_follow_the_level0_trigger() {
    let (ioptions, mutable) = options(4);
    let mut files: Vec<(usize, Arc<FileMetaData>)> = (0..4)
        .map(|i| (0, Arc::new(meta(10 + i, "a", "z", 10 + i, 100))))
        .collect();
    files.push((1, Arc::new(meta(1, "a", "z", 1, 1000))));
    let storage = scored(&ioptions, &mutable, files);
    // L0 moves into L1, which then spills 400 bytes into an empty L2.
    assert_eq!(storage.estimated_compaction_needed_bytes(), 1400);

    let quiet = scored(
        &ioptions,
        &mutable,
        vec![(0, Arc::new(meta(1, "a", "z", 1, 100)))],
    );
    assert_eq!(quiet.estimated_compaction_needed_bytes(), 0);
}

#[test]
fn universal_style_has_no_pending_estimate() {
    let (mut ioptions, mutable) = options(4);
    ioptions.compaction_style = CompactionStyle::Universal;
    let storage = scored(
        &ioptions,
        &mutable,
        (0..6).map(|i| (0, Arc::new(meta(i + 1, "a", "z", i + 1, 100)))).collect(),
    );
    assert_eq!(storage.estimated_compaction_needed_bytes(), 0);
    assert_eq!(storage.max_input_level(), Some(0));
    assert_eq!(storage.score_for_level(0), 1.5);
}

// =============================================================================
// Overlap queries and orderings
// =============================================================================
fn seek_key(user_key: &str) -> InternalKey {
    InternalKey::new(user_key.as_bytes(), MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK)
}

#[test]
fn level0_overlap_grows_to_a_closed_set() {
    let (ioptions, mutable) = options(4);
    let storage = scored(
        &ioptions,
        &mutable,
        vec![
            (0, Arc::new(meta(1, "a", "c", 4, 10))),
            (0, Arc::new(meta(2, "b", "f", 3, 10))),
            (0, Arc::new(meta(3, "e", "h", 2, 10))),
            (0, Arc::new(meta(4, "x", "z", 1, 10))),
        ],
    );
    let mut found: Vec<u64> = storage
        .get_overlapping_inputs(0, Some(&seek_key("a")), Some(&seek_key("b")))
        .iter()
        .map(|f| f.number)
        .collect();
    found.sort_unstable();
    assert_eq!(found, vec![1, 2, 3]);
    assert!(!storage.level0_non_overlapping());
}

#[test]
fn sorted_level_overlap_uses_the_key_order() {
    let (ioptions, mutable) = options(4);
    let storage = scored(
        &ioptions,
        &mutable,
        vec![
            (1, Arc::new(meta(10, "a", "b", 1, 10))),
            (1, Arc::new(meta(11, "c", "d", 2, 10))),
            (1, Arc::new(meta(12, "e", "f", 3, 10))),
            (1, Arc::new(meta(13, "g", "h", 4, 10))),
        ],
    );
    let found: Vec<u64> = storage
        .get_overlapping_inputs(1, Some(&seek_key("c")), Some(&seek_key("e")))
        .iter()
        .map(|f| f.number)
        .collect();
    assert_eq!(found, vec![11, 12]);
    assert!(
        storage
            .get_overlapping_inputs(1, Some(&seek_key("bb")), Some(&seek_key("bc")))
            .is_empty()
    );
    assert_eq!(storage.get_overlapping_inputs(1, None, None).len(), 4);
    assert!(storage.overlap_in_level(1, Some(b"h"), None));
    assert!(!storage.overlap_in_level(1, Some(b"i"), Some(b"z")));
}

#[test]
fn disjoint_level0_is_detected() {
    let (ioptions, mutable) = options(4);
    let storage = scored(
        &ioptions,
        &mutable,
        vec![
            (0, Arc::new(meta(1, "a", "b", 2, 10))),
            (0, Arc::new(meta(2, "c", "d", 1, 10))),
        ],
    );
    assert!(storage.level0_non_overlapping());
}

#[test]
fn compaction_priority_orders_the_level() {
    let (mut ioptions, mutable) = options(4);
    ioptions.compaction_pri = CompactionPri::OldestLargestSeqFirst;
    let files = vec![
        (1, Arc::new(meta(1, "a", "b", 30, 10))),
        (1, Arc::new(meta(2, "c", "d", 10, 10))),
        (1, Arc::new(meta(3, "e", "f", 20, 10))),
    ];
    let storage = scored(&ioptions, &mutable, files.clone());
    assert_eq!(storage.files_by_compaction_pri(1), &[1, 2, 0]);

    ioptions.compaction_pri = CompactionPri::MinOverlappingRatio;
    let mut files = vec![
        (1, Arc::new(meta(1, "a", "c", 30, 100))),
        (1, Arc::new(meta(2, "m", "n", 31, 100))),
    ];
    files.push((2, Arc::new(meta(3, "a", "b", 1, 5000))));
    let storage = scored(&ioptions, &mutable, files);
    // The file with nothing beneath it is the cheapest to push down.
    assert_eq!(storage.files_by_compaction_pri(1), &[1, 0]);
}

fn blob(number: u64, garbage_bytes: u64, linked: &[u64]) -> BlobFileMetaData {
    let mut meta = BlobFileMetaData::new(number, 10, 1000);
    meta.garbage_blob_count = garbage_bytes / 100;
    meta.garbage_blob_bytes = garbage_bytes;
    meta.linked_ssts = linked.iter().copied().collect();
    meta
}

fn blob_gc_options(age_cutoff: f64) -> (ImmutableCfOptions, MutableCfOptions) {
    let (ioptions, mut mutable) = options(7);
    mutable.enable_blob_garbage_collection = true;
    mutable.blob_garbage_collection_age_cutoff = age_cutoff;
    mutable.blob_garbage_collection_force_threshold = 0.5;
    (ioptions, mutable)
}

#[test]
fn forced_blob_gc_marks_tables_of_a_garbage_heavy_oldest_batch() {
    let (ioptions, mutable) = blob_gc_options(0.5);
    let files = vec![(1, Arc::new(meta(7, "a", "c", 5, 100))), (1, Arc::new(meta(8, "d", "f", 6, 100)))];
    let blobs = vec![blob(1, 900, &[7]), blob(2, 0, &[8]), blob(3, 0, &[])];
    let storage = scored_with_blobs(&ioptions, &mutable, files, blobs);
    assert_eq!(numbers(storage.files_marked_for_forced_blob_gc()), vec![7]);
}

#[test]
fn age_cutoff_above_one_covers_every_blob_file() {
    let (ioptions, mutable) = blob_gc_options(2.0);
    let files = vec![(1, Arc::new(meta(7, "a", "c", 5, 100)))];
    let blobs = vec![blob(1, 900, &[7]), blob(2, 1000, &[]), blob(3, 1000, &[])];
    let storage = scored_with_blobs(&ioptions, &mutable, files, blobs);
    assert_eq!(numbers(storage.files_marked_for_forced_blob_gc()), vec![7]);

    let files = vec![(1, Arc::new(meta(7, "a", "c", 5, 100)))];
    let blobs = vec![blob(1, 100, &[7]), blob(2, 0, &[]), blob(3, 0, &[])];
    let storage = scored_with_blobs(&ioptions, &mutable, files, blobs);
    assert!(storage.files_marked_for_forced_blob_gc().is_empty());
}
