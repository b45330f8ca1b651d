// Shared fixtures: versions assembled directly from in-memory tables.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use lsm_version::blob::{BlobFileCache, InMemoryBlobFile, InMemoryBlobFileCache};
use lsm_version::comparator::{BytewiseComparator, InternalKeyComparator};
use lsm_version::options::{ImmutableCfOptions, MutableCfOptions};
use lsm_version::table::TableCache;
use lsm_version::table::mem::{InMemoryTableBuilder, InMemoryTableCache};
use lsm_version::types::SequenceNumber;
use lsm_version::version::Version;
use lsm_version::version::builder::{by_smallest_key, newest_first_by_seqno};
use lsm_version::version::file_meta::{BlobFileMetaData, FileMetaData};
use lsm_version::version::storage_info::VersionStorageInfo;
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

pub fn icmp() -> InternalKeyComparator {
    InternalKeyComparator::new(Arc::new(BytewiseComparator))
}

/// Tables plus the level each one sits on.
pub struct Fixture {
    pub tables: Arc<InMemoryTableCache>,
    pub blobs: Arc<InMemoryBlobFileCache>,
    pub ioptions: ImmutableCfOptions,
    pub mutable: MutableCfOptions,
    levels: Vec<Vec<Arc<FileMetaData>>>,
    blob_files: Vec<Arc<BlobFileMetaData>>,
    next_file_number: u64,
}

impl Fixture {
    pub fn new() -> Self {
        let tables = Arc::new(InMemoryTableCache::new());
        let blobs = Arc::new(InMemoryBlobFileCache::new());
        let ioptions = ImmutableCfOptions {
            table_cache: Arc::clone(&tables) as Arc<dyn TableCache>,
            blob_file_cache: Some(Arc::clone(&blobs) as Arc<dyn BlobFileCache>),
            ..ImmutableCfOptions::default()
        };
        let levels = vec![Vec::new(); ioptions.num_levels];
        Fixture {
            tables,
            blobs,
            ioptions,
            mutable: MutableCfOptions::default(),
            levels,
            blob_files: Vec::new(),
            next_file_number: 10,
        }
    }

    /// Builds a table on `level` and returns its file number.
    pub fn add_table(
        &mut self,
        level: usize,
        build: impl FnOnce(InMemoryTableBuilder) -> InMemoryTableBuilder,
    ) -> u64 {
        let number = self.next_file_number;
        self.next_file_number += 1;
        let (table, meta) = build(InMemoryTableBuilder::new(icmp()))
            .finish(number)
            .unwrap();
        self.tables.insert(number, table);
        self.levels[level].push(Arc::new(meta));
        number
    }

    /// Registers a blob file and returns its number.
    pub fn add_blob_file(&mut self, build: impl FnOnce(u64, &mut InMemoryBlobFile)) -> u64 {
        let number = self.next_file_number;
        self.next_file_number += 1;
        let mut file = InMemoryBlobFile::new(lsm_version::blob::CompressionType::None);
        build(number, &mut file);
        self.blob_files.push(Arc::new(BlobFileMetaData::new(
            number,
            file.blob_count(),
            file.blob_bytes(),
        )));
        self.blobs.insert(number, file);
        number
    }

    pub fn files(&self, level: usize) -> &[Arc<FileMetaData>] {
        &self.levels[level]
    }

    pub fn storage(&self) -> VersionStorageInfo {
        let icmp = icmp();
        let mut storage = VersionStorageInfo::new(
            icmp.clone(),
            self.ioptions.num_levels,
            self.ioptions.compaction_style,
            None,
            self.ioptions.force_consistency_checks,
        );
        for (level, files) in self.levels.iter().enumerate() {
            let mut files = files.clone();
            if level == 0 {
                files.sort_by(|a, b| newest_first_by_seqno(a, b));
            } else {
                files.sort_by(|a, b| by_smallest_key(&icmp, a, b));
            }
            for file in files {
                storage.add_file(level, file);
            }
        }
        for blob in &self.blob_files {
            storage.add_blob_file(Arc::clone(blob));
        }
        storage
    }

    pub fn version(&self) -> Version {
        let mut version = Version::new(
            0,
            1,
            self.storage(),
            Arc::new(self.ioptions.clone()),
            self.mutable.clone(),
        );
        version.prepare_apply();
        version.finalize();
        version
    }
}

pub fn key(i: usize) -> Vec<u8> {
    format!("key{i:05}").into_bytes()
}

/// Every write of one key: (sequence, value or tombstone).
pub type Model = BTreeMap<Vec<u8>, Vec<(SequenceNumber, Option<Vec<u8>>)>>;

pub fn expected(model: &Model, user_key: &[u8], snapshot: SequenceNumber) -> Option<Vec<u8>> {
    model
        .get(user_key)?
        .iter()
        .filter(|(seq, _)| *seq <= snapshot)
        .max_by_key(|(seq, _)| *seq)
        .and_then(|(_, value)| value.clone())
}

/// Fills the bottom levels first so that sequence numbers grow upwards.
pub fn random_layout(rng: &mut StdRng, key_space: usize) -> (Fixture, Model, SequenceNumber) {
    let mut fx = Fixture::new();
    let mut model = Model::new();
    let mut seq: SequenceNumber = 1;

    for level in [3usize, 2, 1] {
        let mut keys: Vec<usize> = (0..key_space).filter(|_| rng.gen_bool(0.4)).collect();
        keys.sort_unstable();
        for chunk in keys.chunks(rng.gen_range(3..12)) {
            let mut entries = Vec::new();
            for &k in chunk {
                let value = (!rng.gen_bool(0.15)).then(|| format!("L{level}-{k}-{seq}").into_bytes());
                entries.push((key(k), seq, value));
                seq += 1;
            }
            for (k, s, v) in &entries {
                model.entry(k.clone()).or_default().push((*s, v.clone()));
            }
            fx.add_table(level, move |mut t| {
                for (k, s, v) in &entries {
                    t = match v {
                        Some(v) => t.put(k, *s, v),
                        None => t.delete(k, *s),
                    };
                }
                t
            });
        }
    }

    for _ in 0..rng.gen_range(1..5) {
        let mut keys: Vec<usize> = (0..key_space).collect();
        keys.shuffle(rng);
        keys.truncate(rng.gen_range(1..key_space / 4));
        let mut entries = Vec::new();
        for k in keys {
            let value = (!rng.gen_bool(0.2)).then(|| format!("L0-{k}-{seq}").into_bytes());
            entries.push((key(k), seq, value));
            seq += 1;
        }
        for (k, s, v) in &entries {
            model.entry(k.clone()).or_default().push((*s, v.clone()));
        }
        fx.add_table(0, move |mut t| {
            for (k, s, v) in &entries {
                t = match v {
                    Some(v) => t.put(k, *s, v),
                    None => t.delete(k, *s),
                };
            }
            t
        });
    }
    (fx, model, seq)
}
