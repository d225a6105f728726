//! Compaction: flushing Level Zero and merging segments down the levels.
//!
//! ## Levels
//!
//! - Level 0: the memtables (may overlap, ordered by recency)
//! - Level 1+: non-overlapping segments, each level with a size budget of
//!   `level_one_size * level_size_multiplier^(n - 1)`
//!
//! ## Process
//!
//! 1. Pick a task (picker.rs)
//! 2. Merge the inputs with the multi-way merging iterator
//! 3. Apply the drop rules and write new segments (merge.rs)
//! 4. Describe the result as a [`LevelChange`] (version.rs), which the
//!    database records in the appendix (appendix.rs) and installs
//! 5. Reclaim superseded segments once no reader holds them

pub mod appendix;
pub mod merge;
pub mod picker;
pub mod version;

pub use appendix::{Appendix, CatalogState, SegmentRecord, VersionEdit};
pub use merge::{SegmentSink, SegmentWriter};
pub use picker::{CompactionPicker, CompactionTask};
pub use version::{LevelChange, Version};

use crate::config::Options;
use crate::entry::Deadline;
use crate::error::Result;
use crate::function::FunctionRegistry;
use crate::iterator::{Direction, MergingIterator, Source};
use crate::memtable::MemTable;
use crate::segment::{LevelCursor, Segment, SegmentConfig};
use std::ops::Bound;
use std::sync::Arc;

/// Compaction job that executes flushes and compaction tasks
pub struct CompactionJob<'a> {
    options: &'a Options,
    functions: Arc<FunctionRegistry>,
    sink: &'a dyn SegmentSink,
    now: Deadline,
}

impl<'a> CompactionJob<'a> {
    /// Create a new compaction job
    pub fn new(
        options: &'a Options,
        functions: Arc<FunctionRegistry>,
        sink: &'a dyn SegmentSink,
        now: Deadline,
    ) -> Self {
        Self { options, functions, sink, now }
    }

    /// Merges a sealed memtable into Level 1.
    ///
    /// Fails with `FunctionNotFound` if the memtable applies a function that
    /// is not registered yet; the memtable stays in Level Zero.
    pub fn flush(&self, memtable: &MemTable, version: &Version) -> Result<LevelChange> {
        let entries = memtable.entries(&self.functions, self.now)?;
        let (Some((min, _)), Some((max, _))) = (entries.first(), entries.last()) else {
            return Ok(LevelChange::default());
        };
        let (min, max) = (min.clone(), max.clone());

        let overlapping = version.overlapping(1, &min, &max);
        let data_below = version.has_data_below(1, &min, &max);
        let sources = vec![
            Source::Entries(entries.into_iter()),
            Source::Level(LevelCursor::new(
                overlapping.clone(),
                self.options.key_order.clone(),
                Direction::Forward,
                Bound::Unbounded,
            )?),
        ];

        let (added, dropped) = self.write(sources, 1, version.max_levels() == 1, data_below)?;
        log::info!(
            "Flushed memtable {} into {} segments at level 1 ({} entries dropped, {} segments replaced)",
            memtable.id(),
            added.len(),
            dropped,
            overlapping.len()
        );

        Ok(LevelChange {
            added: added.into_iter().map(|s| (1, s)).collect(),
            removed: overlapping.into_iter().map(|s| (1, s)).collect(),
        })
    }

    /// Executes a task picked by the [`CompactionPicker`].
    pub fn run(&self, task: &CompactionTask, version: &Version) -> Result<LevelChange> {
        let last = version.max_levels();
        match task {
            CompactionTask::Move { level, segment } => {
                log::info!("Moving segment {} from level {} to level {}", segment.id(), level, level + 1);
                Ok(LevelChange {
                    added: vec![(level + 1, Arc::clone(segment))],
                    removed: vec![(*level, Arc::clone(segment))],
                })
            }
            CompactionTask::Merge { level, segment, overlapping } => {
                let order = &self.options.key_order;
                let (mut min, mut max) = (segment.min_key().clone(), segment.max_key().clone());
                if let (Some(first), Some(last_overlap)) = (overlapping.first(), overlapping.last()) {
                    if order.lt(first.min_key(), &min) {
                        min = first.min_key().clone();
                    }
                    if order.lt(&max, last_overlap.max_key()) {
                        max = last_overlap.max_key().clone();
                    }
                }

                let target = level + 1;
                let data_below = version.has_data_below(target, &min, &max);
                let sources = vec![
                    self.cursor(vec![Arc::clone(segment)])?,
                    self.cursor(overlapping.clone())?,
                ];
                let (added, dropped) = self.write(sources, target, target == last, data_below)?;
                log::info!(
                    "Compacted segment {} with {} segments into {} segments at level {} ({} entries dropped)",
                    segment.id(),
                    overlapping.len(),
                    added.len(),
                    target,
                    dropped
                );

                let mut removed = vec![(*level, Arc::clone(segment))];
                removed.extend(overlapping.iter().map(|s| (target, Arc::clone(s))));
                Ok(LevelChange { added: added.into_iter().map(|s| (target, s)).collect(), removed })
            }
            CompactionTask::Collapse { level, segment } => {
                let data_below = version.has_data_below(*level, segment.min_key(), segment.max_key());
                let sources = vec![self.cursor(vec![Arc::clone(segment)])?];
                let (added, dropped) = self.write(sources, *level, *level == last, data_below)?;
                log::info!(
                    "Collapsed segment {} at level {} into {} segments ({} entries dropped)",
                    segment.id(),
                    level,
                    added.len(),
                    dropped
                );

                Ok(LevelChange {
                    added: added.into_iter().map(|s| (*level, s)).collect(),
                    removed: vec![(*level, Arc::clone(segment))],
                })
            }
        }
    }

    fn cursor(&self, segments: Vec<Arc<Segment>>) -> Result<Source> {
        Ok(Source::Level(LevelCursor::new(
            segments,
            self.options.key_order.clone(),
            Direction::Forward,
            Bound::Unbounded,
        )?))
    }

    fn write(
        &self,
        sources: Vec<Source>,
        level: usize,
        last_level: bool,
        data_below: bool,
    ) -> Result<(Vec<Arc<Segment>>, u64)> {
        let merged = MergingIterator::new(
            sources,
            self.options.key_order.clone(),
            Direction::Forward,
            Arc::clone(&self.functions),
            self.now,
        )?;
        log::debug!("Writing merge output to level {} (data below: {})", level, data_below);

        SegmentWriter::new(
            self.sink,
            SegmentConfig::for_level(self.options, last_level),
            self.options.segment_size,
            data_below,
            self.now,
        )
        .write_all(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BlockCache;
    use crate::entry::Value;
    use crate::function::FunctionOutput;
    use crate::order::KeyOrder;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct MemorySink {
        next_id: AtomicU64,
        cache: Arc<BlockCache>,
    }

    impl SegmentSink for MemorySink {
        fn create(&self, data: Bytes) -> Result<Arc<Segment>> {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            Ok(Arc::new(Segment::from_bytes(id, data, KeyOrder::default(), Arc::clone(&self.cache))?))
        }
    }

    fn sink() -> MemorySink {
        MemorySink { next_id: AtomicU64::new(100), cache: Arc::new(BlockCache::new(1 << 20)) }
    }

    fn memtable(entries: &[(&str, Value)]) -> MemTable {
        let table = MemTable::new(1, 1 << 20, KeyOrder::default());
        for (seq, (key, value)) in entries.iter().enumerate() {
            table.insert(Bytes::copy_from_slice(key.as_bytes()), value.clone(), seq as u64 + 1);
        }
        table
    }

    fn values(version: &Version, level: usize) -> Vec<(Bytes, Value)> {
        version.level(level).iter().flat_map(|s| s.entries().unwrap()).collect()
    }

    #[test]
    fn test_flush_then_flush_merges_level_one() {
        let options = Options::default();
        let functions = Arc::new(FunctionRegistry::new());
        let sink = sink();
        let job = CompactionJob::new(&options, functions, &sink, Deadline::now());

        let version = Version::new(options.max_levels, KeyOrder::default());
        let change = job.flush(&memtable(&[("a", Value::put("1")), ("b", Value::put("2"))]), &version).unwrap();
        let version = version.apply(&change).unwrap();
        assert_eq!(version.level(1).len(), 1);

        let change = job
            .flush(&memtable(&[("b", Value::tombstone()), ("c", Value::put("3"))]), &version)
            .unwrap();
        assert_eq!(change.removed.len(), 1);
        let version = version.apply(&change).unwrap();

        // Nothing below level 1, so the tombstone is dropped.
        assert_eq!(
            values(&version, 1),
            vec![(Bytes::from_static(b"a"), Value::put("1")), (Bytes::from_static(b"c"), Value::put("3"))]
        );
    }

    #[test]
    fn test_flush_fails_on_unregistered_function() {
        let options = Options::default();
        let functions = Arc::new(FunctionRegistry::new());
        let sink = sink();
        let job = CompactionJob::new(&options, Arc::clone(&functions), &sink, Deadline::now());
        let version = Version::new(options.max_levels, KeyOrder::default());

        let table = memtable(&[("n", Value::put("1")), ("n", Value::Function { id: Bytes::from_static(b"inc") })]);
        assert!(matches!(job.flush(&table, &version), Err(crate::Error::FunctionNotFound(_))));

        functions.register(b"inc", |v| FunctionOutput::Update([v, b"+1"].concat()));
        let change = job.flush(&table, &version).unwrap();
        let version = version.apply(&change).unwrap();
        assert_eq!(values(&version, 1), vec![(Bytes::from_static(b"n"), Value::put("1+1"))]);
    }

    #[test]
    fn test_merge_keeps_tombstone_with_data_below() {
        let options = Options::default().max_levels(3);
        let functions = Arc::new(FunctionRegistry::new());
        let sink = sink();
        let job = CompactionJob::new(&options, functions, &sink, Deadline::now());

        let empty = Version::new(3, KeyOrder::default());
        let bottom = job.flush(&memtable(&[("k", Value::put("old"))]), &empty).unwrap();
        let top = job.flush(&memtable(&[("k", Value::tombstone())]), &empty).unwrap();
        let version = empty
            .apply(&LevelChange {
                added: vec![(1, top.added[0].1.clone()), (3, bottom.added[0].1.clone())],
                removed: Vec::new(),
            })
            .unwrap();

        let task = CompactionTask::Merge { level: 1, segment: version.level(1)[0].clone(), overlapping: Vec::new() };
        let version = version.apply(&job.run(&task, &version).unwrap()).unwrap();
        assert_eq!(values(&version, 2), vec![(Bytes::from_static(b"k"), Value::tombstone())]);

        let task = CompactionTask::Merge {
            level: 2,
            segment: version.level(2)[0].clone(),
            overlapping: version.level(3).to_vec(),
        };
        let version = version.apply(&job.run(&task, &version).unwrap()).unwrap();
        assert_eq!(version.segment_count(), 0);
    }

    #[test]
    fn test_move_relinks_segment() {
        let options = Options::default();
        let sink = sink();
        let job = CompactionJob::new(&options, Arc::new(FunctionRegistry::new()), &sink, Deadline::now());
        let empty = Version::new(options.max_levels, KeyOrder::default());
        let version = empty.apply(&job.flush(&memtable(&[("a", Value::put("1"))]), &empty).unwrap()).unwrap();

        let segment = version.level(1)[0].clone();
        let task = CompactionTask::Move { level: 1, segment: segment.clone() };
        let version = version.apply(&job.run(&task, &version).unwrap()).unwrap();
        assert!(version.level(1).is_empty());
        assert_eq!(version.level(2)[0].id(), segment.id());
    }
}
