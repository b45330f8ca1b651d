//! Blob indirection: indexes stored in tables that point into blob files.

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::options::ReadOptions;

/// Size of a blob file header.
pub const BLOB_LOG_HEADER_SIZE: u64 = 30;
/// Size of the header preceding each blob record's key.
pub const BLOB_LOG_RECORD_HEADER_SIZE: u64 = 32;
pub const BLOB_LOG_FOOTER_SIZE: u64 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionType {
    None = 0,
    Snappy = 1,
    Lz4 = 4,
    Zstd = 7,
}

impl CompressionType {
    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Snappy),
            4 => Ok(CompressionType::Lz4),
            7 => Ok(CompressionType::Zstd),
            _ => Err(Error::Corruption(format!("invalid compression type: {byte}"))),
        }
    }
}

const TYPE_INLINED_TTL: u8 = 0;
const TYPE_BLOB: u8 = 1;
const TYPE_BLOB_TTL: u8 = 2;

/// Decoded blob index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobIndex {
    /// Small value stored inline with an expiration.
    InlinedTtl { expiration: u64, value: Vec<u8> },
    Blob {
        file_number: u64,
        offset: u64,
        size: u64,
        compression: CompressionType,
    },
    BlobTtl {
        expiration: u64,
        file_number: u64,
        offset: u64,
        size: u64,
        compression: CompressionType,
    },
}

impl BlobIndex {
    pub fn blob(file_number: u64, offset: u64, size: u64, compression: CompressionType) -> Self {
        BlobIndex::Blob {
            file_number,
            offset,
            size,
            compression,
        }
    }

    pub fn has_ttl(&self) -> bool {
        matches!(self, BlobIndex::InlinedTtl { .. } | BlobIndex::BlobTtl { .. })
    }

    pub fn is_inlined(&self) -> bool {
        matches!(self, BlobIndex::InlinedTtl { .. })
    }

    pub fn file_number(&self) -> u64 {
        match self {
            BlobIndex::InlinedTtl { .. } => 0,
            BlobIndex::Blob { file_number, .. } | BlobIndex::BlobTtl { file_number, .. } => {
                *file_number
            }
        }
    }

    pub fn offset(&self) -> u64 {
        match self {
            BlobIndex::InlinedTtl { .. } => 0,
            BlobIndex::Blob { offset, .. } | BlobIndex::BlobTtl { offset, .. } => *offset,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            BlobIndex::InlinedTtl { value, .. } => value.len() as u64,
            BlobIndex::Blob { size, .. } | BlobIndex::BlobTtl { size, .. } => *size,
        }
    }

    pub fn compression(&self) -> CompressionType {
        match self {
            BlobIndex::InlinedTtl { .. } => CompressionType::None,
            BlobIndex::Blob { compression, .. } | BlobIndex::BlobTtl { compression, .. } => {
                *compression
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(34);
        // writes into a Vec cannot fail
        let _ = self.encode_into(&mut buf);
        buf
    }

    fn encode_into(&self, buf: &mut Vec<u8>) -> std::io::Result<()> {
        match self {
            BlobIndex::InlinedTtl { expiration, value } => {
                buf.write_u8(TYPE_INLINED_TTL)?;
                buf.write_u64::<BigEndian>(*expiration)?;
                buf.extend_from_slice(value);
            }
            BlobIndex::Blob {
                file_number,
                offset,
                size,
                compression,
            } => {
                buf.write_u8(TYPE_BLOB)?;
                buf.write_u64::<BigEndian>(*file_number)?;
                buf.write_u64::<BigEndian>(*offset)?;
                buf.write_u64::<BigEndian>(*size)?;
                buf.write_u8(*compression as u8)?;
            }
            BlobIndex::BlobTtl {
                expiration,
                file_number,
                offset,
                size,
                compression,
            } => {
                buf.write_u8(TYPE_BLOB_TTL)?;
                buf.write_u64::<BigEndian>(*expiration)?;
                buf.write_u64::<BigEndian>(*file_number)?;
                buf.write_u64::<BigEndian>(*offset)?;
                buf.write_u64::<BigEndian>(*size)?;
                buf.write_u8(*compression as u8)?;
            }
        }
        Ok(())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let corrupt = |_| Error::Corruption("Error while decoding blob index".into());
        let mut cur = Cursor::new(data);
        let kind = cur.read_u8().map_err(corrupt)?;
        match kind {
            TYPE_INLINED_TTL => {
                let expiration = cur.read_u64::<BigEndian>().map_err(corrupt)?;
                let mut value = Vec::new();
                cur.read_to_end(&mut value).map_err(corrupt)?;
                Ok(BlobIndex::InlinedTtl { expiration, value })
            }
            TYPE_BLOB | TYPE_BLOB_TTL => {
                let expiration = if kind == TYPE_BLOB_TTL {
                    Some(cur.read_u64::<BigEndian>().map_err(corrupt)?)
                } else {
                    None
                };
                let file_number = cur.read_u64::<BigEndian>().map_err(corrupt)?;
                let offset = cur.read_u64::<BigEndian>().map_err(corrupt)?;
                let size = cur.read_u64::<BigEndian>().map_err(corrupt)?;
                let compression = CompressionType::from_u8(cur.read_u8().map_err(corrupt)?)?;
                Ok(match expiration {
                    Some(expiration) => BlobIndex::BlobTtl {
                        expiration,
                        file_number,
                        offset,
                        size,
                        compression,
                    },
                    None => BlobIndex::Blob {
                        file_number,
                        offset,
                        size,
                        compression,
                    },
                })
            }
            other => Err(Error::Corruption(format!("unknown blob index type: {other}"))),
        }
    }
}

/// Whether a blob of `value_size` bytes at `offset` fits inside the file,
/// after its record header and key and before the footer.
pub fn is_valid_blob_offset(offset: u64, key_size: u64, value_size: u64, file_size: u64) -> bool {
    if offset < BLOB_LOG_HEADER_SIZE + BLOB_LOG_RECORD_HEADER_SIZE + key_size {
        return false;
    }
    offset
        .checked_add(value_size)
        .and_then(|end| end.checked_add(BLOB_LOG_FOOTER_SIZE))
        .is_some_and(|end| end <= file_size)
}

/// A read request against one blob file.
#[derive(Debug, Clone)]
pub struct BlobReadRequest<'k> {
    pub user_key: &'k [u8],
    pub offset: u64,
    pub value_size: u64,
}

/// Reader for a single open blob file.
pub trait BlobFileReader: Send + Sync {
    fn file_size(&self) -> u64;

    fn compression(&self) -> CompressionType;

    fn get_blob(
        &self,
        read_options: &ReadOptions,
        user_key: &[u8],
        offset: u64,
        value_size: u64,
    ) -> Result<Vec<u8>>;

    /// Reads several blobs; requests arrive sorted by offset.
    fn multi_get_blob(
        &self,
        read_options: &ReadOptions,
        requests: &[BlobReadRequest<'_>],
    ) -> Vec<Result<Vec<u8>>> {
        requests
            .iter()
            .map(|r| self.get_blob(read_options, r.user_key, r.offset, r.value_size))
            .collect()
    }
}

/// Opens blob file readers by file number.
pub trait BlobFileCache: Send + Sync {
    fn get_blob_file_reader(&self, file_number: u64) -> Result<Arc<dyn BlobFileReader>>;
}

/// Blob file kept entirely in memory, laid out like an on-disk blob log.
#[derive(Debug)]
pub struct InMemoryBlobFile {
    compression: CompressionType,
    // offset -> (key, value)
    records: BTreeMap<u64, (Vec<u8>, Vec<u8>)>,
    next_offset: u64,
}

impl InMemoryBlobFile {
    pub fn new(compression: CompressionType) -> Self {
        InMemoryBlobFile {
            compression,
            records: BTreeMap::new(),
            next_offset: BLOB_LOG_HEADER_SIZE,
        }
    }

    /// Appends a record and returns the index that locates its value.
    pub fn add(&mut self, file_number: u64, key: &[u8], value: &[u8]) -> BlobIndex {
        let value_offset = self.next_offset + BLOB_LOG_RECORD_HEADER_SIZE + key.len() as u64;
        self.records
            .insert(value_offset, (key.to_vec(), value.to_vec()));
        self.next_offset = value_offset + value.len() as u64;
        BlobIndex::blob(file_number, value_offset, value.len() as u64, self.compression)
    }

    pub fn blob_count(&self) -> u64 {
        self.records.len() as u64
    }

    pub fn blob_bytes(&self) -> u64 {
        self.records.values().map(|(_, v)| v.len() as u64).sum()
    }
}

impl BlobFileReader for InMemoryBlobFile {
    fn file_size(&self) -> u64 {
        self.next_offset + BLOB_LOG_FOOTER_SIZE
    }

    fn compression(&self) -> CompressionType {
        self.compression
    }

    fn get_blob(
        &self,
        _read_options: &ReadOptions,
        user_key: &[u8],
        offset: u64,
        value_size: u64,
    ) -> Result<Vec<u8>> {
        match self.records.get(&offset) {
            Some((key, value)) if key.as_slice() == user_key && value.len() as u64 == value_size => {
                Ok(value.clone())
            }
            Some(_) => Err(Error::Corruption("Error while reading blob record".into())),
            None => Err(Error::Corruption("Invalid blob offset".into())),
        }
    }
}

/// Registry of in-memory blob files.
#[derive(Default)]
pub struct InMemoryBlobFileCache {
    files: RwLock<HashMap<u64, Arc<InMemoryBlobFile>>>,
}

impl InMemoryBlobFileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, file_number: u64, file: InMemoryBlobFile) {
        self.files.write().insert(file_number, Arc::new(file));
    }
}

impl BlobFileCache for InMemoryBlobFileCache {
    fn get_blob_file_reader(&self, file_number: u64) -> Result<Arc<dyn BlobFileReader>> {
        self.files
            .read()
            .get(&file_number)
            .cloned()
            .map(|f| f as Arc<dyn BlobFileReader>)
            .ok_or_else(|| Error::Io(Arc::new(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("blob file #{file_number} not found"),
            ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_index_encodes_and_decodes() {
        let index = BlobIndex::blob(12, 4096, 77, CompressionType::Lz4);
        assert_eq!(BlobIndex::decode(&index.encode()).unwrap(), index);
        assert!(BlobIndex::decode(&[TYPE_BLOB, 1, 2]).unwrap_err().is_corruption());
    }

    #[test]
    fn offsets_outside_file_are_invalid() {
        let mut file = InMemoryBlobFile::new(CompressionType::None);
        let index = file.add(5, b"key", b"value");
        let size = file.file_size();
        assert!(is_valid_blob_offset(index.offset(), 3, 5, size));
        assert!(!is_valid_blob_offset(10, 3, 5, size));
        assert!(!is_valid_blob_offset(index.offset(), 3, 500, size));
    }
}
