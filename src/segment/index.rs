//! Index block implementation for segments.
//!
//! The index maps the last key of every data block to the block's handle.

use super::footer::BlockHandle;
use crate::error::{Error, Result};
use crate::order::KeyOrder;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::cmp::Ordering;

/// IndexEntry represents a single entry in the index block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// The largest key in the data block
    pub last_key: Bytes,
    /// Handle to the data block
    pub handle: BlockHandle,
}

/// Decoded index of one segment.
#[derive(Debug, Clone, Default)]
pub struct IndexBlock {
    entries: Vec<IndexEntry>,
}

impl IndexBlock {
    /// Encodes index entries as `[key_len: u32][key][handle]` records.
    pub fn encode(entries: &[IndexEntry]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32_le(entries.len() as u32);
        for entry in entries {
            buf.put_u32_le(entry.last_key.len() as u32);
            buf.put_slice(&entry.last_key);
            entry.handle.encode_into(&mut buf);
        }
        buf.freeze()
    }

    /// Decodes raw index block data.
    pub fn decode(data: Bytes) -> Result<Self> {
        let mut buf = data;
        if buf.remaining() < 4 {
            return Err(Error::corruption("Index block too short"));
        }
        let count = buf.get_u32_le() as usize;
        let mut entries = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            if buf.remaining() < 4 {
                return Err(Error::corruption("Truncated index entry"));
            }
            let key_len = buf.get_u32_le() as usize;
            if buf.remaining() < key_len {
                return Err(Error::corruption("Truncated index key"));
            }
            let last_key = buf.split_to(key_len);
            let handle = BlockHandle::decode_from(&mut buf)?;
            entries.push(IndexEntry { last_key, handle });
        }
        Ok(Self { entries })
    }

    /// Index of the first block whose last key is `>= key`.
    pub fn find(&self, key: &[u8], order: &KeyOrder) -> Option<usize> {
        let position = self
            .entries
            .partition_point(|entry| order.compare(&entry.last_key, key) == Ordering::Less);
        (position < self.entries.len()).then_some(position)
    }

    /// Handle of block `index`.
    pub fn handle(&self, index: usize) -> Option<BlockHandle> {
        self.entries.get(index).map(|entry| entry.handle)
    }

    /// Number of data blocks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the segment has no data blocks.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
