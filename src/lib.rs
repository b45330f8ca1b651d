//! # LSM-Tree Version Management
//!
//! The part of an LSM-tree engine that knows which table files make up the
//! database at any moment, and how to find a key in them.
//!
//! ## Core idea
//! A *version* is an immutable snapshot of the files of one column family,
//! level by level. Flushes and compactions never modify a version; they log
//! a `VersionEdit` to the manifest and install a new version built from the
//! old one plus the edit. Readers pin a version and search it without locks:
//! L0 files newest first, then one file per sorted level, narrowing each
//! level's search with the fractional-cascading bounds of the level above.
//!
//! Batched lookups (`Version::multi_get`) walk the levels once for the whole
//! batch, grouping keys that fall into the same file.

pub mod blob;
pub mod bloom;
pub mod comparator;
pub mod env;
pub mod error;
pub mod filename;
pub mod iterator;
pub mod manifest;
pub mod merge;
pub mod options;
pub mod statistics;
pub mod table;
pub mod types;
pub mod version;
pub mod version_set;

// Public re-exports for the top-level API
pub use error::{Error, Result};
pub use manifest::edit::VersionEdit;
pub use options::{
    ColumnFamilyDescriptor, ColumnFamilyOptions, ReadOptions, VersionSetOptions,
};
pub use version::Version;
pub use version_set::registry::VersionRef;
pub use version_set::{DEFAULT_COLUMN_FAMILY_ID, VersionSet};
