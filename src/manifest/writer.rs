use crate::env::WritableFile;
use crate::error::Result;
use crate::manifest::record::{LogRecord, RecordType};

/// Appends framed records to a manifest file.
///
/// Records reach the file on `add_record`; they are durable only after
/// `sync`.
pub struct LogWriter {
    file: Box<dyn WritableFile>,
    manifest_number: u64,
}

impl LogWriter {
    pub fn new(file: Box<dyn WritableFile>, manifest_number: u64) -> Self {
        LogWriter {
            file,
            manifest_number,
        }
    }

    pub fn manifest_number(&self) -> u64 {
        self.manifest_number
    }

    pub fn add_record(&mut self, record_type: RecordType, payload: Vec<u8>) -> Result<()> {
        let record = LogRecord::new(record_type, payload);
        self.file.append(&record.encode())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync()
    }

    /// Bytes written to the manifest so far.
    pub fn file_size(&self) -> u64 {
        self.file.size()
    }
}
