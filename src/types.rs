use crate::error::{Error, Result};

/// Monotonically increasing counter assigned to every write.
pub type SequenceNumber = u64;

/// Largest representable sequence number (56 bits, the low byte holds the type).
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1u64 << 56) - 1;

/// Size of the packed `(sequence << 8) | type` trailer of an internal key.
pub const INTERNAL_KEY_TRAILER_SIZE: usize = 8;

/// Kind of entry an internal key tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Deletion = 0x00,
    Value = 0x01,
    Merge = 0x02,
    SingleDeletion = 0x07,
    RangeDeletion = 0x0F,
    /// The value is a `BlobIndex` pointing into a blob file.
    BlobIndex = 0x11,
}

/// Type used in lookup keys: sorts before every real entry with the same
/// user key and sequence.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::BlobIndex;

impl ValueType {
    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(ValueType::Deletion),
            0x01 => Ok(ValueType::Value),
            0x02 => Ok(ValueType::Merge),
            0x07 => Ok(ValueType::SingleDeletion),
            0x0F => Ok(ValueType::RangeDeletion),
            0x11 => Ok(ValueType::BlobIndex),
            _ => Err(Error::Corruption(format!("invalid value type: {byte}"))),
        }
    }
}

fn pack_sequence_and_type(sequence: SequenceNumber, value_type: ValueType) -> u64 {
    debug_assert!(sequence <= MAX_SEQUENCE_NUMBER);
    (sequence << 8) | value_type as u64
}

/// Encoded internal key: user key followed by the little-endian packed trailer.
///
/// Ordering (see `InternalKeyComparator`): user key ascending, then sequence
/// descending, so the newest version of a key sorts first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct InternalKey {
    rep: Vec<u8>,
}

impl InternalKey {
    pub fn new(user_key: &[u8], sequence: SequenceNumber, value_type: ValueType) -> Self {
        let mut rep = Vec::with_capacity(user_key.len() + INTERNAL_KEY_TRAILER_SIZE);
        rep.extend_from_slice(user_key);
        rep.extend_from_slice(&pack_sequence_and_type(sequence, value_type).to_le_bytes());
        InternalKey { rep }
    }

    /// Wraps already-encoded bytes, validating the trailer.
    pub fn decode_from(encoded: &[u8]) -> Result<Self> {
        ParsedInternalKey::parse(encoded)?;
        Ok(InternalKey {
            rep: encoded.to_vec(),
        })
    }

    pub fn encode(&self) -> &[u8] {
        &self.rep
    }

    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.rep)
    }

    pub fn sequence(&self) -> SequenceNumber {
        extract_trailer(&self.rep) >> 8
    }

    pub fn is_empty(&self) -> bool {
        self.rep.is_empty()
    }
}

/// Decoded view over an encoded internal key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

impl<'a> ParsedInternalKey<'a> {
    pub fn parse(internal_key: &'a [u8]) -> Result<Self> {
        if internal_key.len() < INTERNAL_KEY_TRAILER_SIZE {
            return Err(Error::Corruption(format!(
                "internal key too short: {} bytes",
                internal_key.len()
            )));
        }
        let trailer = extract_trailer(internal_key);
        Ok(ParsedInternalKey {
            user_key: extract_user_key(internal_key),
            sequence: trailer >> 8,
            value_type: ValueType::from_u8((trailer & 0xff) as u8)?,
        })
    }
}

/// User-key portion of an encoded internal key.
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    debug_assert!(internal_key.len() >= INTERNAL_KEY_TRAILER_SIZE);
    &internal_key[..internal_key.len().saturating_sub(INTERNAL_KEY_TRAILER_SIZE)]
}

fn extract_trailer(internal_key: &[u8]) -> u64 {
    let n = internal_key.len();
    if n < INTERNAL_KEY_TRAILER_SIZE {
        return 0;
    }
    let mut buf = [0u8; INTERNAL_KEY_TRAILER_SIZE];
    buf.copy_from_slice(&internal_key[n - INTERNAL_KEY_TRAILER_SIZE..]);
    u64::from_le_bytes(buf)
}

/// Key used to probe files for a point lookup at a snapshot.
#[derive(Debug, Clone)]
pub struct LookupKey {
    internal_key: InternalKey,
}

impl LookupKey {
    pub fn new(user_key: &[u8], snapshot: SequenceNumber) -> Self {
        LookupKey {
            internal_key: InternalKey::new(user_key, snapshot, VALUE_TYPE_FOR_SEEK),
        }
    }

    pub fn internal_key(&self) -> &[u8] {
        self.internal_key.encode()
    }

    pub fn user_key(&self) -> &[u8] {
        self.internal_key.user_key()
    }

    pub fn sequence(&self) -> SequenceNumber {
        self.internal_key.sequence()
    }
}
