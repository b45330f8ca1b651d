use std::path::Path;

use crate::env::Env;
use crate::error::Result;
use crate::manifest::record::LogRecord;

/// Reads every record of a manifest file.
///
/// The whole file is loaded, then walked record by record. A record cut
/// short by the end of the file ends the log; a checksum mismatch anywhere
/// is reported as corruption.
pub struct LogReader {
    data: Vec<u8>,
}

impl LogReader {
    pub fn open(env: &dyn Env, path: &Path) -> Result<Self> {
        Ok(LogReader {
            data: env.read_file(path)?,
        })
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        LogReader { data }
    }

    pub fn iter(&self) -> LogIterator<'_> {
        LogIterator {
            data: &self.data,
            offset: 0,
            failed: false,
        }
    }
}

pub struct LogIterator<'a> {
    data: &'a [u8],
    offset: usize,
    failed: bool,
}

impl LogIterator<'_> {
    /// Bytes of complete records consumed so far.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl Iterator for LogIterator<'_> {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.data.len() {
            return None;
        }
        match LogRecord::decode(&self.data[self.offset..]) {
            Ok(Some(record)) => {
                self.offset += record.encoded_size();
                Some(Ok(record))
            }
            Ok(None) => {
                log::warn!(
                    "manifest ends with {} bytes of an incomplete record",
                    self.data.len() - self.offset
                );
                self.offset = self.data.len();
                None
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
