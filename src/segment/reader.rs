//! Segment reader implementation.
//!
//! Reads entries from a persistent or memory segment through the shared
//! block cache.

use super::block::Block;
use super::compression::decode_block;
use super::footer::{BlockHandle, Footer};
use super::index::IndexBlock;
use super::storage::SegmentSource;
use super::{SegmentProperties, FOOTER_SIZE};
use crate::cache::{BlockCache, CacheKey};
use crate::entry::{Deadline, Value};
use crate::error::{Error, Result};
use crate::filter::{BloomFilter, Filter};
use crate::order::KeyOrder;
use bytes::Bytes;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An immutable, sorted run of entries.
///
/// Usage:
/// ```
/// use std::sync::Arc;
/// use swaykv::cache::BlockCache;
/// use swaykv::segment::{Segment, SegmentBuilder, SegmentConfig};
/// use swaykv::{Options, Value};
///
/// let mut builder = SegmentBuilder::new(SegmentConfig::for_level(&Options::default(), false));
/// builder.add("key1".into(), &Value::put("value1")).unwrap();
/// let data = builder.finish().unwrap();
///
/// let segment = Segment::from_bytes(1, data, Default::default(), Arc::new(BlockCache::new(0))).unwrap();
/// assert_eq!(segment.get(b"key1").unwrap(), Some(Value::put("value1")));
/// ```
pub struct Segment {
    id: u64,
    source: SegmentSource,
    index: IndexBlock,
    filter: Option<BloomFilter>,
    properties: SegmentProperties,
    min_key: Bytes,
    max_key: Bytes,
    size: u64,
    order: KeyOrder,
    cache: Arc<BlockCache>,
    obsolete: AtomicBool,
}

impl Segment {
    /// Opens a segment file. The handle stays open until the sweeper closes
    /// it; later reads reopen it on demand.
    pub fn open(id: u64, path: PathBuf, mmap: bool, order: KeyOrder, cache: Arc<BlockCache>) -> Result<Self> {
        let size = std::fs::metadata(&path)?.len();
        Self::load(id, SegmentSource::file(path, mmap), size, order, cache)
    }

    /// Wraps the bytes of a memory segment.
    pub fn from_bytes(id: u64, data: Bytes, order: KeyOrder, cache: Arc<BlockCache>) -> Result<Self> {
        let size = data.len() as u64;
        Self::load(id, SegmentSource::Memory(data), size, order, cache)
    }

    fn load(id: u64, source: SegmentSource, size: u64, order: KeyOrder, cache: Arc<BlockCache>) -> Result<Self> {
        if size < FOOTER_SIZE as u64 {
            return Err(Error::corruption(format!("Segment {} too small", id)));
        }

        let footer = Footer::decode(&source.read(size - FOOTER_SIZE as u64, FOOTER_SIZE)?)?;
        let index = IndexBlock::decode(read_stored(&source, footer.index, size)?)?;
        let properties: SegmentProperties =
            bincode::deserialize(&read_stored(&source, footer.properties, size)?)
                .map_err(|e| Error::corruption(format!("Bad properties in segment {}: {}", id, e)))?;
        let filter = if footer.filter.is_empty() {
            None
        } else {
            Some(BloomFilter::decode(&read_stored(&source, footer.filter, size)?)?)
        };

        Ok(Self {
            id,
            source,
            index,
            filter,
            min_key: Bytes::from(properties.min_key.clone()),
            max_key: Bytes::from(properties.max_key.clone()),
            properties,
            size,
            order,
            cache,
            obsolete: AtomicBool::new(false),
        })
    }

    /// Looks up the value stored for `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Value>> {
        if !self.might_contain(key) {
            return Ok(None);
        }
        match self.index.find(key, &self.order) {
            Some(block) => self.read_block(block)?.seek(key, &self.order),
            None => Ok(None),
        }
    }

    /// False only if the key is definitely not in this segment.
    pub fn might_contain(&self, key: &[u8]) -> bool {
        if !self.order.in_range(key, &self.min_key, &self.max_key) {
            return false;
        }
        self.filter.as_ref().map_or(true, |filter| filter.might_contain(key))
    }

    /// Loads data block `index`, through the block cache.
    pub fn read_block(&self, index: usize) -> Result<Block> {
        let handle = self
            .index
            .handle(index)
            .ok_or_else(|| Error::internal(format!("Segment {} has no block {}", self.id, index)))?;

        let key = CacheKey::new(self.id, handle.offset);
        if let Some(data) = self.cache.get(&key) {
            return Block::new(data);
        }

        let data = read_stored(&self.source, handle, self.size)?;
        self.cache.insert(key, data.clone());
        Block::new(data)
    }

    /// Decodes every entry, in key order.
    pub fn entries(&self) -> Result<Vec<(Bytes, Value)>> {
        let mut entries = Vec::with_capacity(self.properties.entry_count as usize);
        for block in 0..self.block_count() {
            entries.extend(self.read_block(block)?.entries()?);
        }
        Ok(entries)
    }

    /// Index of the first block that may hold keys `>= key`.
    pub(crate) fn find_block(&self, key: &[u8]) -> Option<usize> {
        self.index.find(key, &self.order)
    }

    /// Number of data blocks.
    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Segment id, also its file number.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Smallest key.
    pub fn min_key(&self) -> &Bytes {
        &self.min_key
    }

    /// Largest key.
    pub fn max_key(&self) -> &Bytes {
        &self.max_key
    }

    /// Properties recorded when the segment was built.
    pub fn properties(&self) -> &SegmentProperties {
        &self.properties
    }

    /// Earliest deadline of any Put in the segment.
    pub fn nearest_deadline(&self) -> Option<Deadline> {
        self.properties.nearest_deadline.map(Deadline::from_nanos)
    }

    /// True if a rewrite can drop or change entries: the segment holds
    /// shadowing entries or values with a deadline.
    pub fn carries_shadows(&self) -> bool {
        self.properties.shadow_entries > 0 || self.properties.nearest_deadline.is_some()
    }

    /// True if the key ranges of the two segments intersect.
    pub fn overlaps(&self, other: &Segment) -> bool {
        self.order.overlaps(&self.min_key, &self.max_key, &other.min_key, &other.max_key)
    }

    /// Path of the segment file, `None` for memory segments.
    pub fn path(&self) -> Option<&Path> {
        self.source.path()
    }

    /// Closes the file handle if it is open.
    pub(crate) fn close_handle(&self) -> bool {
        self.source.close()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.source.is_open()
    }

    pub(crate) fn last_access(&self) -> u64 {
        self.source.last_access()
    }

    /// Deletes the file once the last reference is dropped.
    pub(crate) fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if !self.obsolete.load(Ordering::Acquire) {
            return;
        }
        self.cache.remove_segment(self.id);
        self.source.close();
        if let Some(path) = self.source.path() {
            match std::fs::remove_file(path) {
                Ok(()) => log::debug!("Deleted segment {:?}", path),
                Err(e) => log::warn!("Failed to delete segment {:?}: {}", path, e),
            }
        }
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("entries", &self.properties.entry_count)
            .field("min_key", &self.min_key)
            .field("max_key", &self.max_key)
            .finish()
    }
}

fn read_stored(source: &SegmentSource, handle: BlockHandle, size: u64) -> Result<Bytes> {
    if handle.offset.saturating_add(handle.size) > size {
        return Err(Error::corruption("Block handle points past the segment"));
    }
    decode_block(&source.read(handle.offset, handle.size as usize)?)
}
