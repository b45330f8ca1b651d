//! The manifest: an append-only log of `VersionEdit`s, framed with CRC32.

pub mod edit;
pub mod reader;
pub mod record;
pub mod writer;

pub use edit::{BlobFileAddition, BlobFileGarbage, VersionEdit};
pub use reader::LogReader;
pub use record::{LogRecord, RecordType};
pub use writer::LogWriter;
