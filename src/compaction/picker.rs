//! Compaction task picker.
//!
//! Selects the next job for the compactor thread:
//!
//! 1. A level over its size budget pushes one segment into the next level,
//!    round-robin over the level's key range. Segments that overlap nothing
//!    below are moved without rewriting, unless the target is the last level
//!    and the segment still carries entries a rewrite would drop.
//! 2. Otherwise, a segment whose nearest Put deadline has passed is
//!    collapsed in place so expired values stop occupying space.

use super::version::Version;
use crate::config::Options;
use crate::entry::Deadline;
use crate::order::KeyOrder;
use crate::segment::Segment;
use bytes::Bytes;
use std::cmp::Ordering;
use std::sync::Arc;

/// A compaction task selected by the picker
#[derive(Debug, Clone)]
pub enum CompactionTask {
    /// Merge `segment` with the overlapping segments of `level + 1`.
    Merge {
        /// Source level
        level: usize,
        /// Segment leaving the source level
        segment: Arc<Segment>,
        /// Segments of the target level it overlaps
        overlapping: Vec<Arc<Segment>>,
    },
    /// Relink `segment` into `level + 1` without rewriting it.
    Move {
        /// Source level
        level: usize,
        /// Segment to move
        segment: Arc<Segment>,
    },
    /// Rewrite `segment` in its own level, dropping expired entries.
    Collapse {
        /// Level of the segment
        level: usize,
        /// Segment to rewrite
        segment: Arc<Segment>,
    },
}

impl CompactionTask {
    /// Level the task reads from.
    pub fn level(&self) -> usize {
        match self {
            CompactionTask::Merge { level, .. }
            | CompactionTask::Move { level, .. }
            | CompactionTask::Collapse { level, .. } => *level,
        }
    }
}

/// Picker for selecting segments to compact
pub struct CompactionPicker {
    /// Max key of the segment last pushed out of each level.
    cursors: Vec<Option<Bytes>>,
    order: KeyOrder,
}

impl CompactionPicker {
    /// Create a new compaction picker
    pub fn new(max_levels: usize, order: KeyOrder) -> Self {
        Self { cursors: vec![None; max_levels + 1], order }
    }

    /// Pick the next task, or `None` if every level is within budget and
    /// nothing has expired.
    pub fn pick(&mut self, version: &Version, options: &Options, now: Deadline) -> Option<CompactionTask> {
        let last = version.max_levels();

        for level in 1..last {
            let size = version.level_size(level);
            let budget = options.level_budget(level);
            if size <= budget || version.level(level).is_empty() {
                continue;
            }

            let segment = self.next_in_rotation(version, level)?;
            log::debug!(
                "Level {} over budget ({} > {} bytes), pushing segment {}",
                level,
                size,
                budget,
                segment.id()
            );

            let overlapping = version.overlapping(level + 1, segment.min_key(), segment.max_key());
            let into_last = level + 1 == last;
            return Some(if overlapping.is_empty() && !(into_last && segment.carries_shadows()) {
                CompactionTask::Move { level, segment }
            } else {
                CompactionTask::Merge { level, segment, overlapping }
            });
        }

        for level in 1..=last {
            let expired = version
                .level(level)
                .iter()
                .find(|s| s.nearest_deadline().is_some_and(|d| d.is_overdue_at(now)));
            if let Some(segment) = expired {
                log::debug!("Segment {} in level {} holds expired values", segment.id(), level);
                return Some(CompactionTask::Collapse { level, segment: Arc::clone(segment) });
            }
        }

        None
    }

    fn next_in_rotation(&mut self, version: &Version, level: usize) -> Option<Arc<Segment>> {
        let segments = version.level(level);
        let order = &self.order;
        let start = match &self.cursors[level] {
            Some(cursor) => segments.partition_point(|s| order.compare(s.min_key(), cursor) != Ordering::Greater),
            None => 0,
        };
        let segment = segments.get(start).or_else(|| segments.first())?.clone();
        self.cursors[level] = Some(segment.max_key().clone());
        Some(segment)
    }
}
