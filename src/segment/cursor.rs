//! Ordered cursor over the segments of one level.

use super::reader::Segment;
use crate::entry::Value;
use crate::error::Result;
use crate::iterator::Direction;
use crate::order::KeyOrder;
use bytes::Bytes;
use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::Arc;

/// Walks a list of non-overlapping, sorted segments in either direction,
/// one decoded block at a time.
pub struct LevelCursor {
    segments: Vec<Arc<Segment>>,
    order: KeyOrder,
    direction: Direction,
    segment: usize,
    block: usize,
    entries: Vec<(Bytes, Value)>,
    /// Forward: index of the next entry. Reverse: entries left to yield.
    position: usize,
    exhausted: bool,
}

impl LevelCursor {
    /// Positions a cursor at the first key past `start` in `direction`.
    pub fn new(
        segments: Vec<Arc<Segment>>,
        order: KeyOrder,
        direction: Direction,
        start: Bound<&[u8]>,
    ) -> Result<Self> {
        let mut cursor = Self {
            segments,
            order,
            direction,
            segment: 0,
            block: 0,
            entries: Vec::new(),
            position: 0,
            exhausted: false,
        };
        match direction {
            Direction::Forward => cursor.seek_forward(start)?,
            Direction::Reverse => cursor.seek_reverse(start)?,
        }
        Ok(cursor)
    }

    fn seek_forward(&mut self, start: Bound<&[u8]>) -> Result<()> {
        let key = match start {
            Bound::Unbounded => return self.load(0, 0, true),
            Bound::Included(key) | Bound::Excluded(key) => key,
        };

        let order = &self.order;
        let segment = self
            .segments
            .partition_point(|s| order.compare(s.max_key(), key) == Ordering::Less);
        let Some(block) = self.segments.get(segment).and_then(|s| s.find_block(key)) else {
            self.exhausted = true;
            return Ok(());
        };
        self.load(segment, block, true)?;

        let order = &self.order;
        self.position = self.entries.partition_point(|(k, _)| match start {
            Bound::Excluded(_) => order.compare(k, key) != Ordering::Greater,
            _ => order.compare(k, key) == Ordering::Less,
        });
        Ok(())
    }

    fn seek_reverse(&mut self, start: Bound<&[u8]>) -> Result<()> {
        let key = match start {
            Bound::Unbounded => {
                let Some(last) = self.segments.len().checked_sub(1) else {
                    self.exhausted = true;
                    return Ok(());
                };
                let block = self.segments[last].block_count().saturating_sub(1);
                return self.load(last, block, false);
            }
            Bound::Included(key) | Bound::Excluded(key) => key,
        };

        let order = &self.order;
        let candidates = self
            .segments
            .partition_point(|s| order.compare(s.min_key(), key) != Ordering::Greater);
        let Some(segment) = candidates.checked_sub(1) else {
            self.exhausted = true;
            return Ok(());
        };
        let blocks = self.segments[segment].block_count();
        let block = self.segments[segment]
            .find_block(key)
            .unwrap_or(blocks.saturating_sub(1));
        self.load(segment, block, false)?;

        let order = &self.order;
        self.position = self.entries.partition_point(|(k, _)| match start {
            Bound::Excluded(_) => order.compare(k, key) == Ordering::Less,
            _ => order.compare(k, key) != Ordering::Greater,
        });
        Ok(())
    }

    fn load(&mut self, segment: usize, block: usize, forward: bool) -> Result<()> {
        let Some(source) = self.segments.get(segment) else {
            self.exhausted = true;
            return Ok(());
        };
        self.entries = if block < source.block_count() {
            source.read_block(block)?.entries()?
        } else {
            Vec::new()
        };
        self.segment = segment;
        self.block = block;
        self.position = if forward { 0 } else { self.entries.len() };
        Ok(())
    }

    fn advance_block(&mut self) -> Result<bool> {
        match self.direction {
            Direction::Forward => {
                let blocks = self.segments[self.segment].block_count();
                if self.block + 1 < blocks {
                    self.load(self.segment, self.block + 1, true)?;
                } else if self.segment + 1 < self.segments.len() {
                    self.load(self.segment + 1, 0, true)?;
                } else {
                    self.exhausted = true;
                }
            }
            Direction::Reverse => {
                if self.block > 0 {
                    self.load(self.segment, self.block - 1, false)?;
                } else if self.segment > 0 {
                    let previous = self.segment - 1;
                    let blocks = self.segments[previous].block_count();
                    self.load(previous, blocks.saturating_sub(1), false)?;
                } else {
                    self.exhausted = true;
                }
            }
        }
        Ok(!self.exhausted)
    }

    /// Next entry in cursor direction.
    pub fn next_entry(&mut self) -> Result<Option<(Bytes, Value)>> {
        while !self.exhausted {
            match self.direction {
                Direction::Forward if self.position < self.entries.len() => {
                    self.position += 1;
                    return Ok(Some(self.entries[self.position - 1].clone()));
                }
                Direction::Reverse if self.position > 0 => {
                    self.position -= 1;
                    return Ok(Some(self.entries[self.position].clone()));
                }
                _ => {
                    if !self.advance_block()? {
                        break;
                    }
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BlockCache;
    use crate::config::Options;
    use crate::segment::{SegmentBuilder, SegmentConfig};

    fn segment(id: u64, keys: std::ops::Range<u32>) -> Arc<Segment> {
        let options = Options::default().block_size(128);
        let mut builder = SegmentBuilder::new(SegmentConfig::for_level(&options, false));
        for i in keys {
            builder.add(Bytes::from(format!("{:04}", i)), &Value::put(i.to_string())).unwrap();
        }
        Arc::new(
            Segment::from_bytes(id, builder.finish().unwrap(), KeyOrder::default(), Arc::new(BlockCache::new(1 << 20)))
                .unwrap(),
        )
    }

    fn level() -> Vec<Arc<Segment>> {
        vec![segment(1, 0..50), segment(2, 60..100)]
    }

    fn collect(direction: Direction, start: Bound<&[u8]>) -> Vec<u32> {
        let mut cursor = LevelCursor::new(level(), KeyOrder::default(), direction, start).unwrap();
        let mut keys = Vec::new();
        while let Some((key, _)) = cursor.next_entry().unwrap() {
            keys.push(std::str::from_utf8(&key).unwrap().parse().unwrap());
        }
        keys
    }

    #[test]
    fn test_forward_scan() {
        let all = collect(Direction::Forward, Bound::Unbounded);
        let expected: Vec<u32> = (0..50).chain(60..100).collect();
        assert_eq!(all, expected);

        assert_eq!(collect(Direction::Forward, Bound::Included(b"0048"))[..3], [48, 49, 60]);
        assert_eq!(collect(Direction::Forward, Bound::Excluded(b"0049"))[0], 60);
        assert_eq!(collect(Direction::Forward, Bound::Included(b"0055"))[0], 60);
        assert!(collect(Direction::Forward, Bound::Excluded(b"0099")).is_empty());
    }

    #[test]
    fn test_reverse_scan() {
        let all = collect(Direction::Reverse, Bound::Unbounded);
        let expected: Vec<u32> = (0..50).chain(60..100).rev().collect();
        assert_eq!(all, expected);

        assert_eq!(collect(Direction::Reverse, Bound::Included(b"0061"))[..3], [61, 60, 49]);
        assert_eq!(collect(Direction::Reverse, Bound::Excluded(b"0060"))[0], 49);
        assert_eq!(collect(Direction::Reverse, Bound::Included(b"0055"))[0], 49);
        assert_eq!(collect(Direction::Reverse, Bound::Included(b"9999"))[0], 99);
        assert!(collect(Direction::Reverse, Bound::Excluded(b"0000")).is_empty());
    }
}
