//! WAL record format implementation.
//!
//! Each record consists of:
//! - Checksum (4 bytes): CRC32 of type and data
//! - Length (2 bytes): Length of the data
//! - Type (1 byte): Record type (Full, First, Middle, Last)
//! - Data (variable): One fragment of an encoded batch

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc32fast::Hasher;

/// Maximum size of a single record's data portion
pub const MAX_RECORD_SIZE: usize = 32 * 1024; // 32KB

/// Size of the record header (checksum + length + type)
pub const HEADER_SIZE: usize = 7;

/// Record types for batches that span multiple records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Complete batch in a single record
    Full = 1,
    /// First fragment of a batch
    First = 2,
    /// Middle fragment of a batch
    Middle = 3,
    /// Last fragment of a batch
    Last = 4,
}

impl RecordType {
    /// Convert from u8 to RecordType
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(RecordType::Full),
            2 => Ok(RecordType::First),
            3 => Ok(RecordType::Middle),
            4 => Ok(RecordType::Last),
            _ => Err(Error::corruption(format!("Invalid record type: {}", value))),
        }
    }

    /// Picks the fragment type for the chunk at `offset` of a `total` byte payload.
    pub fn for_fragment(offset: usize, chunk: usize, total: usize) -> Self {
        match (offset == 0, offset + chunk >= total) {
            (true, true) => RecordType::Full,
            (true, false) => RecordType::First,
            (false, true) => RecordType::Last,
            (false, false) => RecordType::Middle,
        }
    }
}

/// A WAL record
#[derive(Debug, Clone)]
pub struct Record {
    /// Type of the record
    pub record_type: RecordType,
    /// Data payload
    pub data: Bytes,
}

impl Record {
    /// Create a new record
    pub fn new(record_type: RecordType, data: impl Into<Bytes>) -> Self {
        Self { record_type, data: data.into() }
    }

    /// Append the encoded record to `buf`.
    ///
    /// Format: [checksum: u32][length: u16][type: u8][data: bytes]
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_size());
        buf.put_u32_le(checksum(self.record_type as u8, &self.data));
        buf.put_u16_le(self.data.len() as u16);
        buf.put_u8(self.record_type as u8);
        buf.put_slice(&self.data);
    }

    /// Encode the record into a fresh buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_size());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Decode one record from the front of `data`.
    ///
    /// A record whose header claims more bytes than `data` holds is reported
    /// as [`Error::Corruption`]; a record that is complete but damaged is
    /// reported as [`Error::ChecksumMismatch`].
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::corruption(format!("Record too short: {} bytes", data.len())));
        }

        let mut header = &data[..HEADER_SIZE];
        let expected = header.get_u32_le();
        let length = header.get_u16_le() as usize;
        let raw_type = header.get_u8();

        let body = &data[HEADER_SIZE..];
        if body.len() < length {
            return Err(Error::corruption(format!(
                "Incomplete record: expected {} bytes, got {}",
                length,
                body.len()
            )));
        }

        let payload = &body[..length];
        let actual = checksum(raw_type, payload);
        if actual != expected {
            return Err(Error::ChecksumMismatch { expected, actual });
        }

        let record_type = RecordType::from_u8(raw_type)?;
        Ok(Record { record_type, data: Bytes::copy_from_slice(payload) })
    }

    /// Get the total size of the encoded record
    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + self.data.len()
    }
}

/// Length of the record starting at the front of `data`, if its header is
/// complete.
pub(crate) fn peek_length(data: &[u8]) -> Option<usize> {
    if data.len() < HEADER_SIZE {
        return None;
    }
    Some(HEADER_SIZE + u16::from_le_bytes([data[4], data[5]]) as usize)
}

fn checksum(record_type: u8, data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[record_type]);
    hasher.update(data);
    hasher.finalize()
}
