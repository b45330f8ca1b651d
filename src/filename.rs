use std::path::{Path, PathBuf};

/// Kinds of files a database directory holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Current,
    Descriptor,
    Table,
    Temp,
}

pub fn current_file_name(db_path: &Path) -> PathBuf {
    db_path.join("CURRENT")
}

/// Bare manifest name as recorded in `CURRENT`.
pub fn descriptor_base_name(number: u64) -> String {
    format!("MANIFEST-{number:06}")
}

pub fn descriptor_file_name(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(descriptor_base_name(number))
}

pub fn temp_file_name(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(format!("{number:06}.dbtmp"))
}

pub fn table_file_name(cf_paths: &[PathBuf], number: u64, path_id: u32) -> PathBuf {
    let dir = cf_paths
        .get(path_id as usize)
        .or_else(|| cf_paths.first())
        .map(PathBuf::as_path)
        .unwrap_or_else(|| Path::new("."));
    dir.join(format!("{number:06}.sst"))
}

/// Splits a file name into its type and number (0 for `CURRENT`).
pub fn parse_file_name(name: &str) -> Option<(FileType, u64)> {
    if name == "CURRENT" {
        return Some((FileType::Current, 0));
    }
    if let Some(rest) = name.strip_prefix("MANIFEST-") {
        return rest.parse().ok().map(|n| (FileType::Descriptor, n));
    }
    let (stem, ext) = name.split_once('.')?;
    let number = stem.parse().ok()?;
    match ext {
        "sst" => Some((FileType::Table, number)),
        "dbtmp" => Some((FileType::Temp, number)),
        _ => None,
    }
}
