//! The unit of change recorded in the manifest.

use std::collections::BTreeSet;
use std::io::{self, Cursor, Read};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::types::{InternalKey, SequenceNumber};
use crate::version::file_meta::FileMetaData;

const TAG_COMPARATOR: u8 = 1;
const TAG_LOG_NUMBER: u8 = 2;
const TAG_NEXT_FILE_NUMBER: u8 = 3;
const TAG_LAST_SEQUENCE: u8 = 4;
const TAG_DELETED_FILE: u8 = 6;
const TAG_NEW_FILE: u8 = 7;
const TAG_PREV_LOG_NUMBER: u8 = 9;
const TAG_MIN_LOG_NUMBER_TO_KEEP: u8 = 10;
const TAG_BLOB_FILE_ADDITION: u8 = 20;
const TAG_BLOB_FILE_GARBAGE: u8 = 21;
const TAG_COLUMN_FAMILY: u8 = 30;
const TAG_COLUMN_FAMILY_ADD: u8 = 31;
const TAG_COLUMN_FAMILY_DROP: u8 = 32;
const TAG_MAX_COLUMN_FAMILY: u8 = 33;
const TAG_IN_ATOMIC_GROUP: u8 = 40;

/// A new blob file and its totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobFileAddition {
    pub blob_file_number: u64,
    pub total_blob_count: u64,
    pub total_blob_bytes: u64,
}

/// Garbage newly found in an existing blob file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobFileGarbage {
    pub blob_file_number: u64,
    pub garbage_blob_count: u64,
    pub garbage_blob_bytes: u64,
}

/// A delta against the previous state of one column family, plus the
/// database-wide counters it carries.
///
/// Every field is optional on the wire; only those set are encoded.
#[derive(Debug, Clone, Default)]
pub struct VersionEdit {
    pub comparator: Option<String>,
    pub log_number: Option<u64>,
    pub prev_log_number: Option<u64>,
    pub next_file_number: Option<u64>,
    pub last_sequence: Option<SequenceNumber>,
    pub min_log_number_to_keep: Option<u64>,
    pub max_column_family: Option<u32>,

    pub column_family: u32,
    /// Name of the column family this edit creates.
    pub column_family_add: Option<String>,
    pub is_column_family_drop: bool,

    pub deleted_files: BTreeSet<(usize, u64)>,
    pub new_files: Vec<(usize, Arc<FileMetaData>)>,
    pub blob_file_additions: Vec<BlobFileAddition>,
    pub blob_file_garbages: Vec<BlobFileGarbage>,

    /// Number of edits of the same atomic group that follow this one.
    pub remaining_entries: Option<u32>,
}

impl VersionEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_column_family(column_family: u32) -> Self {
        VersionEdit {
            column_family,
            ..Self::default()
        }
    }

    pub fn set_comparator_name(&mut self, name: impl Into<String>) {
        self.comparator = Some(name.into());
    }

    pub fn set_log_number(&mut self, number: u64) {
        self.log_number = Some(number);
    }

    pub fn set_prev_log_number(&mut self, number: u64) {
        self.prev_log_number = Some(number);
    }

    pub fn set_next_file(&mut self, number: u64) {
        self.next_file_number = Some(number);
    }

    pub fn set_last_sequence(&mut self, seq: SequenceNumber) {
        self.last_sequence = Some(seq);
    }

    pub fn set_min_log_number_to_keep(&mut self, number: u64) {
        self.min_log_number_to_keep = Some(number);
    }

    pub fn set_max_column_family(&mut self, id: u32) {
        self.max_column_family = Some(id);
    }

    pub fn add_column_family(&mut self, name: impl Into<String>) {
        self.column_family_add = Some(name.into());
    }

    pub fn drop_column_family(&mut self) {
        self.is_column_family_drop = true;
    }

    pub fn is_column_family_add(&self) -> bool {
        self.column_family_add.is_some()
    }

    /// Creates or drops a column family; such edits are never batched.
    pub fn is_column_family_manipulation(&self) -> bool {
        self.is_column_family_add() || self.is_column_family_drop
    }

    pub fn add_file(&mut self, level: usize, file: FileMetaData) {
        self.new_files.push((level, Arc::new(file)));
    }

    pub fn add_shared_file(&mut self, level: usize, file: Arc<FileMetaData>) {
        self.new_files.push((level, file));
    }

    pub fn delete_file(&mut self, level: usize, number: u64) {
        self.deleted_files.insert((level, number));
    }

    pub fn add_blob_file(&mut self, blob_file_number: u64, total_blob_count: u64, total_blob_bytes: u64) {
        self.blob_file_additions.push(BlobFileAddition {
            blob_file_number,
            total_blob_count,
            total_blob_bytes,
        });
    }

    pub fn add_blob_file_garbage(
        &mut self,
        blob_file_number: u64,
        garbage_blob_count: u64,
        garbage_blob_bytes: u64,
    ) {
        self.blob_file_garbages.push(BlobFileGarbage {
            blob_file_number,
            garbage_blob_count,
            garbage_blob_bytes,
        });
    }

    pub fn is_in_atomic_group(&self) -> bool {
        self.remaining_entries.is_some()
    }

    pub fn mark_atomic_group(&mut self, remaining_entries: u32) {
        self.remaining_entries = Some(remaining_entries);
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(name) = &self.comparator {
            buf.write_u8(TAG_COMPARATOR)?;
            write_bytes(&mut buf, name.as_bytes())?;
        }
        for (tag, value) in [
            (TAG_LOG_NUMBER, self.log_number),
            (TAG_PREV_LOG_NUMBER, self.prev_log_number),
            (TAG_NEXT_FILE_NUMBER, self.next_file_number),
            (TAG_LAST_SEQUENCE, self.last_sequence),
            (TAG_MIN_LOG_NUMBER_TO_KEEP, self.min_log_number_to_keep),
        ] {
            if let Some(value) = value {
                buf.write_u8(tag)?;
                buf.write_u64::<BigEndian>(value)?;
            }
        }
        if let Some(max) = self.max_column_family {
            buf.write_u8(TAG_MAX_COLUMN_FAMILY)?;
            buf.write_u32::<BigEndian>(max)?;
        }
        if self.column_family != 0 {
            buf.write_u8(TAG_COLUMN_FAMILY)?;
            buf.write_u32::<BigEndian>(self.column_family)?;
        }
        if let Some(name) = &self.column_family_add {
            buf.write_u8(TAG_COLUMN_FAMILY_ADD)?;
            write_bytes(&mut buf, name.as_bytes())?;
        }
        if self.is_column_family_drop {
            buf.write_u8(TAG_COLUMN_FAMILY_DROP)?;
        }
        for &(level, number) in &self.deleted_files {
            buf.write_u8(TAG_DELETED_FILE)?;
            buf.write_u32::<BigEndian>(level as u32)?;
            buf.write_u64::<BigEndian>(number)?;
        }
        for (level, file) in &self.new_files {
            buf.write_u8(TAG_NEW_FILE)?;
            buf.write_u32::<BigEndian>(*level as u32)?;
            encode_file(&mut buf, file)?;
        }
        for addition in &self.blob_file_additions {
            buf.write_u8(TAG_BLOB_FILE_ADDITION)?;
            buf.write_u64::<BigEndian>(addition.blob_file_number)?;
            buf.write_u64::<BigEndian>(addition.total_blob_count)?;
            buf.write_u64::<BigEndian>(addition.total_blob_bytes)?;
        }
        for garbage in &self.blob_file_garbages {
            buf.write_u8(TAG_BLOB_FILE_GARBAGE)?;
            buf.write_u64::<BigEndian>(garbage.blob_file_number)?;
            buf.write_u64::<BigEndian>(garbage.garbage_blob_count)?;
            buf.write_u64::<BigEndian>(garbage.garbage_blob_bytes)?;
        }
        if let Some(remaining) = self.remaining_entries {
            buf.write_u8(TAG_IN_ATOMIC_GROUP)?;
            buf.write_u32::<BigEndian>(remaining)?;
        }
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(buf);
        let mut edit = VersionEdit::new();
        while (cursor.position() as usize) < buf.len() {
            let tag = cursor.read_u8().map_err(truncated)?;
            match tag {
                TAG_COMPARATOR => edit.comparator = Some(read_string(&mut cursor)?),
                TAG_LOG_NUMBER => edit.log_number = Some(read_u64(&mut cursor)?),
                TAG_PREV_LOG_NUMBER => edit.prev_log_number = Some(read_u64(&mut cursor)?),
                TAG_NEXT_FILE_NUMBER => edit.next_file_number = Some(read_u64(&mut cursor)?),
                TAG_LAST_SEQUENCE => edit.last_sequence = Some(read_u64(&mut cursor)?),
                TAG_MIN_LOG_NUMBER_TO_KEEP => {
                    edit.min_log_number_to_keep = Some(read_u64(&mut cursor)?)
                }
                TAG_MAX_COLUMN_FAMILY => edit.max_column_family = Some(read_u32(&mut cursor)?),
                TAG_COLUMN_FAMILY => edit.column_family = read_u32(&mut cursor)?,
                TAG_COLUMN_FAMILY_ADD => edit.column_family_add = Some(read_string(&mut cursor)?),
                TAG_COLUMN_FAMILY_DROP => edit.is_column_family_drop = true,
                TAG_DELETED_FILE => {
                    let level = read_u32(&mut cursor)? as usize;
                    let number = read_u64(&mut cursor)?;
                    edit.deleted_files.insert((level, number));
                }
                TAG_NEW_FILE => {
                    let level = read_u32(&mut cursor)? as usize;
                    let file = decode_file(&mut cursor)?;
                    edit.new_files.push((level, Arc::new(file)));
                }
                TAG_BLOB_FILE_ADDITION => edit.blob_file_additions.push(BlobFileAddition {
                    blob_file_number: read_u64(&mut cursor)?,
                    total_blob_count: read_u64(&mut cursor)?,
                    total_blob_bytes: read_u64(&mut cursor)?,
                }),
                TAG_BLOB_FILE_GARBAGE => edit.blob_file_garbages.push(BlobFileGarbage {
                    blob_file_number: read_u64(&mut cursor)?,
                    garbage_blob_count: read_u64(&mut cursor)?,
                    garbage_blob_bytes: read_u64(&mut cursor)?,
                }),
                TAG_IN_ATOMIC_GROUP => edit.remaining_entries = Some(read_u32(&mut cursor)?),
                _ => {
                    return Err(Error::Corruption(format!(
                        "VersionEdit: unknown tag {tag}"
                    )));
                }
            }
        }
        Ok(edit)
    }

    /// Human-readable dump, one field per line.
    pub fn debug_string(&self) -> String {
        let mut out = String::from("VersionEdit {");
        if let Some(name) = &self.comparator {
            out.push_str(&format!("\n  Comparator: {name}"));
        }
        if let Some(n) = self.log_number {
            out.push_str(&format!("\n  LogNumber: {n}"));
        }
        if let Some(n) = self.prev_log_number {
            out.push_str(&format!("\n  PrevLogNumber: {n}"));
        }
        if let Some(n) = self.next_file_number {
            out.push_str(&format!("\n  NextFileNumber: {n}"));
        }
        if let Some(n) = self.last_sequence {
            out.push_str(&format!("\n  LastSeq: {n}"));
        }
        for (level, number) in &self.deleted_files {
            out.push_str(&format!("\n  DeleteFile: {level} {number}"));
        }
        for (level, file) in &self.new_files {
            out.push_str(&format!(
                "\n  AddFile: {level} {} {} {:?} .. {:?}",
                file.number,
                file.file_size,
                file.smallest.user_key(),
                file.largest.user_key()
            ));
        }
        for addition in &self.blob_file_additions {
            out.push_str(&format!("\n  BlobFileAddition: {addition:?}"));
        }
        for garbage in &self.blob_file_garbages {
            out.push_str(&format!("\n  BlobFileGarbage: {garbage:?}"));
        }
        out.push_str(&format!("\n  ColumnFamily: {}", self.column_family));
        if let Some(name) = &self.column_family_add {
            out.push_str(&format!("\n  ColumnFamilyAdd: {name}"));
        }
        if self.is_column_family_drop {
            out.push_str("\n  ColumnFamilyDrop");
        }
        if let Some(remaining) = self.remaining_entries {
            out.push_str(&format!("\n  AtomicGroup: {remaining} entries remains"));
        }
        out.push_str("\n}\n");
        out
    }
}

fn encode_file(buf: &mut Vec<u8>, file: &FileMetaData) -> Result<()> {
    buf.write_u64::<BigEndian>(file.number)?;
    buf.write_u32::<BigEndian>(file.path_id)?;
    buf.write_u64::<BigEndian>(file.file_size)?;
    write_bytes(buf, file.smallest.encode())?;
    write_bytes(buf, file.largest.encode())?;
    buf.write_u64::<BigEndian>(file.smallest_seqno)?;
    buf.write_u64::<BigEndian>(file.largest_seqno)?;
    buf.write_u64::<BigEndian>(file.num_entries)?;
    buf.write_u64::<BigEndian>(file.num_deletions)?;
    buf.write_u64::<BigEndian>(file.raw_key_size)?;
    buf.write_u64::<BigEndian>(file.raw_value_size)?;
    buf.write_u8(u8::from(file.marked_for_compaction))?;
    buf.write_u64::<BigEndian>(file.oldest_blob_file_number)?;
    buf.write_u64::<BigEndian>(file.oldest_ancester_time)?;
    buf.write_u64::<BigEndian>(file.file_creation_time)?;
    Ok(())
}

fn decode_file(cursor: &mut Cursor<&[u8]>) -> Result<FileMetaData> {
    let number = read_u64(cursor)?;
    let path_id = read_u32(cursor)?;
    let file_size = read_u64(cursor)?;
    let smallest = InternalKey::decode_from(&read_bytes(cursor)?)?;
    let largest = InternalKey::decode_from(&read_bytes(cursor)?)?;
    let smallest_seqno = read_u64(cursor)?;
    let largest_seqno = read_u64(cursor)?;
    let num_entries = read_u64(cursor)?;
    let num_deletions = read_u64(cursor)?;
    let raw_key_size = read_u64(cursor)?;
    let raw_value_size = read_u64(cursor)?;
    let marked = cursor.read_u8().map_err(truncated)? != 0;
    let oldest_blob_file_number = read_u64(cursor)?;
    let oldest_ancester_time = read_u64(cursor)?;
    let file_creation_time = read_u64(cursor)?;
    Ok(FileMetaData::new(
        number,
        file_size,
        smallest,
        largest,
        smallest_seqno,
        largest_seqno,
    )
    .with_path_id(path_id)
    .with_entry_stats(num_entries, num_deletions, raw_key_size, raw_value_size)
    .marked(marked)
    .with_oldest_blob_file_number(oldest_blob_file_number)
    .with_times(oldest_ancester_time, file_creation_time))
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    buf.write_u32::<BigEndian>(bytes.len() as u32)?;
    buf.extend_from_slice(bytes);
    Ok(())
}

fn truncated(e: io::Error) -> Error {
    Error::Corruption(format!("VersionEdit: truncated field ({e})"))
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    cursor.read_u32::<BigEndian>().map_err(truncated)
}

fn read_u64(cursor: &mut Cursor<&[u8]>) -> Result<u64> {
    cursor.read_u64::<BigEndian>().map_err(truncated)
}

fn read_bytes(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    let len = read_u32(cursor)? as usize;
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(Error::Corruption(format!(
            "VersionEdit: field of {len} bytes with {remaining} left"
        )));
    }
    let mut out = vec![0u8; len];
    cursor.read_exact(&mut out).map_err(truncated)?;
    Ok(out)
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    String::from_utf8(read_bytes(cursor)?)
        .map_err(|_| Error::Corruption("VersionEdit: name is not UTF-8".into()))
}
