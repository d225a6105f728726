//! Data block format for segments.
//!
//! A block contains multiple entries and uses restart points for binary
//! search and prefix compression.

use crate::entry::{Value, TAG_DUPLICATE};
use crate::error::{Error, Result};
use crate::order::KeyOrder;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::cmp::Ordering;

/// Entries between two restart points.
pub(crate) const RESTART_INTERVAL: usize = 16;

/// Block stores entries with prefix compression.
///
/// Format:
/// ```text
/// [Entry 1]
/// ...
/// [Entry N]
/// [Restart Point 1: u32]
/// ...
/// [Restart Point M: u32]
/// [Num Restarts: u32]
/// ```
///
/// Each entry format:
/// ```text
/// [shared_key_len: u32]     // Length of shared prefix with previous key
/// [unshared_key_len: u32]   // Length of unshared key suffix
/// [value_len: u32]          // Length of the encoded value
/// [unshared_key: bytes]     // Key suffix
/// [value: bytes]            // Encoded value, or a single duplicate marker
/// ```
///
/// Entries at a restart point store their full key and never a duplicate
/// marker, so decoding can start at any restart point.
#[derive(Debug, Clone)]
pub struct Block {
    data: Bytes,
    restart_offset: usize,
    num_restarts: u32,
}

impl Block {
    /// Create a new Block from raw (decompressed) data
    pub fn new(data: Bytes) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::corruption("Block too small"));
        }

        let num_restarts = read_u32(&data, data.len() - 4)?;
        let restart_offset = (data.len() - 4)
            .checked_sub(num_restarts as usize * 4)
            .ok_or_else(|| Error::corruption("Invalid restart offset"))?;

        Ok(Self { data, restart_offset, num_restarts })
    }

    /// Get the number of restart points
    pub fn num_restarts(&self) -> u32 {
        self.num_restarts
    }

    fn restart_point(&self, index: u32) -> Result<usize> {
        Ok(read_u32(&self.data, self.restart_offset + index as usize * 4)? as usize)
    }

    /// Decodes every entry of the block in order.
    pub fn entries(&self) -> Result<Vec<(Bytes, Value)>> {
        let mut cursor = EntryCursor::new(self, 0);
        let mut entries = Vec::new();
        while let Some(entry) = cursor.next_entry()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Finds the value stored for `key`.
    pub fn seek(&self, key: &[u8], order: &KeyOrder) -> Result<Option<Value>> {
        // Last restart point whose key is <= `key`.
        let mut left = 0u32;
        let mut right = self.num_restarts;
        while left < right {
            let mid = left + (right - left) / 2;
            let restart_key = self.restart_key(mid)?;
            if order.compare(&restart_key, key) == Ordering::Greater {
                right = mid;
            } else {
                left = mid + 1;
            }
        }
        if left == 0 {
            return Ok(None);
        }

        let mut cursor = EntryCursor::new(self, self.restart_point(left - 1)?);
        let end = if left < self.num_restarts {
            self.restart_point(left)?
        } else {
            self.restart_offset
        };
        while cursor.offset < end {
            let Some((entry_key, value)) = cursor.next_entry()? else {
                break;
            };
            match order.compare(&entry_key, key) {
                Ordering::Equal => return Ok(Some(value)),
                Ordering::Greater => return Ok(None),
                Ordering::Less => {}
            }
        }
        Ok(None)
    }

    fn restart_key(&self, index: u32) -> Result<Bytes> {
        let offset = self.restart_point(index)?;
        let (shared, unshared, _) = self.entry_header(offset)?;
        if shared != 0 {
            return Err(Error::corruption("Restart entry with a shared prefix"));
        }
        let start = offset + 12;
        self.slice(start, unshared)
    }

    fn entry_header(&self, offset: usize) -> Result<(usize, usize, usize)> {
        Ok((
            read_u32(&self.data, offset)? as usize,
            read_u32(&self.data, offset + 4)? as usize,
            read_u32(&self.data, offset + 8)? as usize,
        ))
    }

    fn slice(&self, start: usize, len: usize) -> Result<Bytes> {
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.restart_offset)
            .ok_or_else(|| Error::corruption("Entry runs past the block"))?;
        Ok(self.data.slice(start..end))
    }
}

/// Sequential decoder from a restart point.
struct EntryCursor<'a> {
    block: &'a Block,
    offset: usize,
    last_key: BytesMut,
    last_value: Option<Value>,
}

impl<'a> EntryCursor<'a> {
    fn new(block: &'a Block, offset: usize) -> Self {
        Self { block, offset, last_key: BytesMut::new(), last_value: None }
    }

    fn next_entry(&mut self) -> Result<Option<(Bytes, Value)>> {
        if self.offset >= self.block.restart_offset {
            return Ok(None);
        }

        let (shared, unshared, value_len) = self.block.entry_header(self.offset)?;
        if shared > self.last_key.len() {
            return Err(Error::corruption("Shared prefix longer than previous key"));
        }
        let suffix = self.block.slice(self.offset + 12, unshared)?;
        let encoded = self.block.slice(self.offset + 12 + unshared, value_len)?;
        self.offset += 12 + unshared + value_len;

        self.last_key.truncate(shared);
        self.last_key.put_slice(&suffix);
        let key = Bytes::copy_from_slice(&self.last_key);

        let value = if encoded.as_ref() == [TAG_DUPLICATE] {
            self.last_value
                .clone()
                .ok_or_else(|| Error::corruption("Duplicate marker without a previous value"))?
        } else {
            Value::decode(&encoded)?
        };
        self.last_value = Some(value.clone());
        Ok(Some((key, value)))
    }
}

/// BlockBuilder builds a block with prefix compression.
pub struct BlockBuilder {
    buffer: BytesMut,
    restarts: Vec<u32>,
    counter: usize,
    last_key: Vec<u8>,
    last_value: Option<Bytes>,
    compress_duplicates: bool,
    entries: usize,
}

impl BlockBuilder {
    /// Create a new BlockBuilder
    pub fn new(compress_duplicates: bool) -> Self {
        Self {
            buffer: BytesMut::new(),
            restarts: vec![0],
            counter: 0,
            last_key: Vec::new(),
            last_value: None,
            compress_duplicates,
            entries: 0,
        }
    }

    /// Add an entry to the block. Keys must arrive in key order.
    pub fn add(&mut self, key: &[u8], value: &Value) {
        let mut shared = 0;
        if self.counter >= RESTART_INTERVAL {
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
            self.last_key.clear();
            self.last_value = None;
        } else {
            shared = shared_prefix_len(&self.last_key, key);
        }

        let encoded = value.encode();
        let duplicate = self.compress_duplicates && self.last_value.as_ref() == Some(&encoded);
        let stored: &[u8] = if duplicate { &[TAG_DUPLICATE] } else { &encoded };

        self.buffer.put_u32_le(shared as u32);
        self.buffer.put_u32_le((key.len() - shared) as u32);
        self.buffer.put_u32_le(stored.len() as u32);
        self.buffer.put_slice(&key[shared..]);
        self.buffer.put_slice(stored);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.last_value = Some(encoded);
        self.counter += 1;
        self.entries += 1;
    }

    /// Finish building and return the raw block data
    pub fn finish(mut self) -> Bytes {
        for restart in &self.restarts {
            self.buffer.put_u32_le(*restart);
        }
        self.buffer.put_u32_le(self.restarts.len() as u32);
        self.buffer.freeze()
    }

    /// Get the current size of the block
    pub fn current_size(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    /// Check if the block is empty
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    let mut slice = data
        .get(offset..offset + 4)
        .ok_or_else(|| Error::corruption("Block offset out of range"))?;
    Ok(slice.get_u32_le())
}
