//! Segment footer implementation.
//!
//! The footer is a fixed-size (56 bytes) structure at the end of a segment
//! that points at the filter, properties and index blocks.

use super::{FOOTER_SIZE, MAGIC};
use crate::error::{Error, Result};
use bytes::{Buf, BufMut};

/// BlockHandle represents a pointer to a stored block, trailer included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    /// Offset of the block in the segment
    pub offset: u64,
    /// Size of the block in bytes
    pub size: u64,
}

impl BlockHandle {
    /// Create a new BlockHandle
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Encode the BlockHandle (16 bytes: 8 for offset + 8 for size)
    pub fn encode_into(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.offset);
        buf.put_u64_le(self.size);
    }

    /// Decode a BlockHandle from the front of `buf`
    pub fn decode_from(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < 16 {
            return Err(Error::corruption("BlockHandle too short"));
        }
        Ok(Self { offset: buf.get_u64_le(), size: buf.get_u64_le() })
    }

    /// True for the handle of an absent block.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Footer is the last 56 bytes of a segment.
///
/// Format:
/// ```text
/// [filter_handle: 16 bytes]
/// [properties_handle: 16 bytes]
/// [index_handle: 16 bytes]
/// [magic: 8 bytes]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    /// Handle to the bloom filter block, empty when filters are disabled
    pub filter: BlockHandle,
    /// Handle to the properties block
    pub properties: BlockHandle,
    /// Handle to the index block
    pub index: BlockHandle,
}

impl Footer {
    /// Encode the footer to bytes (56 bytes)
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FOOTER_SIZE);
        self.filter.encode_into(&mut buf);
        self.properties.encode_into(&mut buf);
        self.index.encode_into(&mut buf);
        buf.put_u64_le(MAGIC);
        buf
    }

    /// Decode the footer from the last bytes of a segment
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != FOOTER_SIZE {
            return Err(Error::corruption(format!("Footer must be {} bytes", FOOTER_SIZE)));
        }

        let mut buf = data;
        let filter = BlockHandle::decode_from(&mut buf)?;
        let properties = BlockHandle::decode_from(&mut buf)?;
        let index = BlockHandle::decode_from(&mut buf)?;
        let magic = buf.get_u64_le();
        if magic != MAGIC {
            return Err(Error::corruption(format!("Invalid segment magic: {:#x}", magic)));
        }

        Ok(Self { filter, properties, index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_footer_roundtrip() {
        let footer = Footer {
            filter: BlockHandle::new(100, 20),
            properties: BlockHandle::new(120, 40),
            index: BlockHandle::new(160, 64),
        };
        let encoded = footer.encode();
        assert_eq!(encoded.len(), FOOTER_SIZE);
        assert_eq!(Footer::decode(&encoded).unwrap(), footer);
    }

    #[test]
    fn test_footer_bad_magic() {
        let footer = Footer {
            filter: BlockHandle::default(),
            properties: BlockHandle::new(0, 1),
            index: BlockHandle::new(1, 1),
        };
        let mut encoded = footer.encode();
        encoded[FOOTER_SIZE - 1] ^= 0xFF;
        assert!(Footer::decode(&encoded).unwrap_err().is_corruption());
        assert!(Footer::decode(&encoded[..10]).is_err());
        assert!(footer.filter.is_empty());
    }
}
