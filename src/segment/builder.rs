//! Segment builder.
//!
//! Entries must be added in key order; the builder lays out data blocks,
//! then the filter, properties and index blocks, then the footer.

use super::block::BlockBuilder;
use super::compression::encode_block;
use super::footer::{BlockHandle, Footer};
use super::index::{IndexBlock, IndexEntry};
use super::SegmentProperties;
use crate::config::{CompressionType, Options};
use crate::entry::{earliest, Deadline, Value};
use crate::error::{Error, Result};
use crate::filter::{BloomFilter, Filter};
use crate::order::KeyOrder;
use bytes::{Bytes, BytesMut};

/// Layout settings for one segment.
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    /// Target raw size of a data block.
    pub block_size: usize,
    /// Block compression.
    pub compression: CompressionType,
    /// Replace repeated values with a duplicate marker.
    pub compress_duplicate_values: bool,
    /// False-positive rate of the bloom filter, `None` to skip the filter.
    pub bloom_filter_fp_rate: Option<f64>,
    /// Key comparator the entries are sorted by.
    pub order: KeyOrder,
}

impl SegmentConfig {
    /// Layout for a segment written into `level`; the last level honours the
    /// grouping strategy.
    pub fn for_level(options: &Options, last_level: bool) -> Self {
        let (block_size, compression) = match (&options.last_level_grouping, last_level) {
            (Some(grouping), true) => (grouping.block_size, grouping.compression),
            _ => (options.block_size, options.compression),
        };
        Self {
            block_size,
            compression,
            compress_duplicate_values: options.compress_duplicate_values,
            bloom_filter_fp_rate: options.use_bloom_filter.then_some(options.bloom_filter_fp_rate),
            order: options.key_order.clone(),
        }
    }
}

/// Builds one segment in memory.
pub struct SegmentBuilder {
    config: SegmentConfig,
    buffer: BytesMut,
    block: BlockBuilder,
    index: Vec<IndexEntry>,
    keys: Vec<Bytes>,
    last_key: Option<Bytes>,
    properties: SegmentProperties,
}

impl SegmentBuilder {
    /// Create a new, empty builder
    pub fn new(config: SegmentConfig) -> Self {
        let block = BlockBuilder::new(config.compress_duplicate_values);
        Self {
            config,
            buffer: BytesMut::new(),
            block,
            index: Vec::new(),
            keys: Vec::new(),
            last_key: None,
            properties: SegmentProperties::default(),
        }
    }

    /// Adds an entry. Keys must be strictly increasing under the key order.
    pub fn add(&mut self, key: Bytes, value: &Value) -> Result<()> {
        if let Some(last) = &self.last_key {
            if !self.config.order.lt(last, &key) {
                return Err(Error::internal("Segment keys must be added in key order"));
            }
        }

        self.block.add(&key, value);

        if self.properties.entry_count == 0 {
            self.properties.min_key = key.to_vec();
        }
        self.properties.entry_count += 1;
        if value.is_shadow() {
            self.properties.shadow_entries += 1;
        }
        if let Some(deadline) = value.put_deadline() {
            let nearest = self.properties.nearest_deadline.map(Deadline::from_nanos);
            self.properties.nearest_deadline = earliest(nearest, Some(deadline)).map(|d| d.as_nanos());
        }

        if self.config.bloom_filter_fp_rate.is_some() {
            self.keys.push(key.clone());
        }
        self.last_key = Some(key);

        if self.block.current_size() >= self.config.block_size {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }
        let Some(last_key) = self.last_key.clone() else {
            return Ok(());
        };

        let block = std::mem::replace(&mut self.block, BlockBuilder::new(self.config.compress_duplicate_values));
        let offset = self.buffer.len() as u64;
        let size = encode_block(&block.finish(), self.config.compression, &mut self.buffer)?;
        self.index.push(IndexEntry { last_key, handle: BlockHandle::new(offset, size as u64) });
        Ok(())
    }

    /// Bytes written so far plus the pending block.
    pub fn estimated_size(&self) -> usize {
        self.buffer.len() + self.block.current_size()
    }

    /// Number of entries added.
    pub fn entry_count(&self) -> u64 {
        self.properties.entry_count
    }

    /// True if nothing was added.
    pub fn is_empty(&self) -> bool {
        self.properties.entry_count == 0
    }

    /// Finishes the segment and returns its bytes.
    pub fn finish(mut self) -> Result<Bytes> {
        self.flush_block()?;
        if let Some(last) = &self.last_key {
            self.properties.max_key = last.to_vec();
        }

        let filter = match self.config.bloom_filter_fp_rate {
            Some(rate) if !self.keys.is_empty() => {
                let bloom = BloomFilter::build(self.keys.iter().map(|k| &k[..]), rate);
                let offset = self.buffer.len() as u64;
                let size = encode_block(&bloom.encode(), CompressionType::None, &mut self.buffer)?;
                BlockHandle::new(offset, size as u64)
            }
            _ => BlockHandle::default(),
        };

        let offset = self.buffer.len() as u64;
        let size = encode_block(&bincode::serialize(&self.properties)?, CompressionType::None, &mut self.buffer)?;
        let properties = BlockHandle::new(offset, size as u64);

        let offset = self.buffer.len() as u64;
        let size = encode_block(&IndexBlock::encode(&self.index), CompressionType::None, &mut self.buffer)?;
        let index = BlockHandle::new(offset, size as u64);

        self.buffer.extend_from_slice(&Footer { filter, properties, index }.encode());
        Ok(self.buffer.freeze())
    }
}
