use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// Append-only file handle used for manifest logs and `CURRENT` temp files.
pub trait WritableFile: Send {
    fn append(&mut self, data: &[u8]) -> Result<()>;

    /// Flushes buffered bytes and makes them durable.
    fn sync(&mut self) -> Result<()>;

    /// Bytes appended so far.
    fn size(&self) -> u64;
}

/// Operating-system services the version set depends on.
///
/// Everything that touches the clock or the filesystem goes through here so
/// that tests can inject failures and fixed times.
pub trait Env: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now_secs(&self) -> Result<u64>;

    /// Last modification time of `path`, in seconds since the Unix epoch.
    fn file_modification_time(&self, path: &Path) -> Result<u64>;

    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>>;

    fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    fn rename_file(&self, from: &Path, to: &Path) -> Result<()>;

    fn remove_file(&self, path: &Path) -> Result<()>;

    fn file_exists(&self, path: &Path) -> bool;

    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Makes a rename inside `dir` durable.
    fn sync_dir(&self, dir: &Path) -> Result<()>;

    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>>;
}

/// `Env` backed by `std::fs` and the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixEnv;

struct PosixWritableFile {
    writer: BufWriter<File>,
    size: u64,
}

impl WritableFile for PosixWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.size += data.len() as u64;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }
}

impl Env for PosixEnv {
    fn now_secs(&self) -> Result<u64> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .map_err(|e| Error::Io(std::sync::Arc::new(std::io::Error::other(e))))
    }

    fn file_modification_time(&self, path: &Path) -> Result<u64> {
        let modified = fs::metadata(path)?.modified()?;
        Ok(modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0))
    }

    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Box::new(PosixWritableFile {
            writer: BufWriter::new(file),
            size: 0,
        }))
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(fs::read(path)?)
    }

    fn rename_file(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to)?;
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn sync_dir(&self, dir: &Path) -> Result<()> {
        File::open(dir)?.sync_all()?;
        Ok(())
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(dir)? {
            out.push(entry?.path());
        }
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_dir_reports_a_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        PosixEnv.sync_dir(dir.path()).unwrap();
        let err = PosixEnv.sync_dir(&dir.path().join("gone")).unwrap_err();
        assert!(err.is_io(), "{err}");
    }
}
