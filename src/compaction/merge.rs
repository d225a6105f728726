//! Compaction output: drains a merging iterator into new segments.
//!
//! Each merged value passes through the compaction drop rules before it is
//! written. Output is split into segments of roughly `segment_size` bytes.

use crate::entry::Deadline;
use crate::error::Result;
use crate::iterator::MergingIterator;
use crate::segment::{Segment, SegmentBuilder, SegmentConfig};
use bytes::Bytes;
use std::sync::Arc;

/// Turns finished segment bytes into a live segment.
///
/// The database implements this by allocating a file number and either
/// persisting the bytes under a storage directory or keeping them in memory.
pub trait SegmentSink {
    /// Stores a finished segment and opens it.
    fn create(&self, data: Bytes) -> Result<Arc<Segment>>;
}

/// Writes the output of one merge.
pub struct SegmentWriter<'a> {
    sink: &'a dyn SegmentSink,
    config: SegmentConfig,
    segment_size: usize,
    /// Whether older data for these keys exists below the output level.
    data_below: bool,
    now: Deadline,
    builder: Option<SegmentBuilder>,
    written: Vec<Arc<Segment>>,
    dropped: u64,
}

impl<'a> SegmentWriter<'a> {
    /// Create a new writer
    pub fn new(
        sink: &'a dyn SegmentSink,
        config: SegmentConfig,
        segment_size: usize,
        data_below: bool,
        now: Deadline,
    ) -> Self {
        Self { sink, config, segment_size, data_below, now, builder: None, written: Vec::new(), dropped: 0 }
    }

    /// Writes every entry of `merged`.
    pub fn write_all(mut self, merged: MergingIterator) -> Result<(Vec<Arc<Segment>>, u64)> {
        match self.drain(merged) {
            Ok(()) => Ok((self.written, self.dropped)),
            Err(e) => {
                // Nothing references the partial output yet.
                for segment in &self.written {
                    segment.mark_obsolete();
                }
                Err(e)
            }
        }
    }

    fn drain(&mut self, merged: MergingIterator) -> Result<()> {
        for entry in merged {
            let (key, value) = entry?;
            let Some(value) = value.compact(self.data_below, self.now) else {
                self.dropped += 1;
                continue;
            };

            let builder = self
                .builder
                .get_or_insert_with(|| SegmentBuilder::new(self.config.clone()));
            builder.add(key, &value)?;
            if builder.estimated_size() >= self.segment_size {
                self.finish_segment()?;
            }
        }
        self.finish_segment()
    }

    fn finish_segment(&mut self) -> Result<()> {
        if let Some(builder) = self.builder.take() {
            if !builder.is_empty() {
                let segment = self.sink.create(builder.finish()?)?;
                self.written.push(segment);
            }
        }
        Ok(())
    }
}
