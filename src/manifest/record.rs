use crate::error::{Error, Result};

/// Kind of payload a manifest record carries. Both hold an encoded
/// `VersionEdit`; snapshot records together describe the full state a
/// manifest starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Snapshot = 0x01,
    Edit = 0x02,
}

impl RecordType {
    fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(RecordType::Snapshot),
            0x02 => Ok(RecordType::Edit),
            _ => Err(Error::Corruption(format!("invalid manifest record type: {byte}"))),
        }
    }
}

/// One framed record of a manifest log.
///
/// On-disk format:
/// ```text
/// ┌──────────┬──────────┬──────────┬───────────────┐
/// │ CRC (4B) │ Len (4B) │ Type(1B) │ Payload (Len) │
/// └──────────┴──────────┴──────────┴───────────────┘
/// ```
///
/// CRC covers everything after the CRC field itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub record_type: RecordType,
    pub payload: Vec<u8>,
}

const CRC_SIZE: usize = 4;
const LEN_SIZE: usize = 4;
const TYPE_SIZE: usize = 1;
pub const HEADER_SIZE: usize = CRC_SIZE + LEN_SIZE + TYPE_SIZE;

impl LogRecord {
    pub fn new(record_type: RecordType, payload: Vec<u8>) -> Self {
        LogRecord {
            record_type,
            payload,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size());
        buf.extend_from_slice(&[0u8; CRC_SIZE]);
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.push(self.record_type as u8);
        buf.extend_from_slice(&self.payload);

        let crc = crc32fast::hash(&buf[CRC_SIZE..]);
        buf[0..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes the record at the start of `data`.
    ///
    /// `Ok(None)` means `data` ends inside the record: the tail of a log
    /// whose last append never completed. A complete record whose checksum
    /// does not match is `Corruption`.
    pub fn decode(data: &[u8]) -> Result<Option<Self>> {
        if data.len() < HEADER_SIZE {
            return Ok(None);
        }
        let stored_crc = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let payload_len = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let total_len = HEADER_SIZE + payload_len;
        if data.len() < total_len {
            return Ok(None);
        }

        let computed_crc = crc32fast::hash(&data[CRC_SIZE..total_len]);
        if stored_crc != computed_crc {
            return Err(Error::Corruption("manifest record checksum mismatch".into()));
        }
        let record_type = RecordType::from_u8(data[CRC_SIZE + LEN_SIZE])?;
        Ok(Some(LogRecord {
            record_type,
            payload: data[HEADER_SIZE..total_len].to_vec(),
        }))
    }

    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}
