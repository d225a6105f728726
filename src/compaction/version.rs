//! Versions of the level chain.
//!
//! A [`Version`] is an immutable snapshot of which segments make up Levels
//! 1..N. Flushes and compactions never modify a version; they describe their
//! result as a [`LevelChange`] and install `version.apply(&change)` as the
//! new current version. Readers holding an older version keep its segments
//! alive through their `Arc`s.

use crate::error::{Error, Result};
use crate::order::KeyOrder;
use crate::segment::Segment;
use std::cmp::Ordering;
use std::sync::Arc;

/// Segments added to and removed from levels by one job.
#[derive(Debug, Default, Clone)]
pub struct LevelChange {
    /// New segments and the level they go into.
    pub added: Vec<(usize, Arc<Segment>)>,
    /// Superseded segments and the level they leave.
    pub removed: Vec<(usize, Arc<Segment>)>,
}

impl LevelChange {
    /// True if the change does nothing.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// A version represents the set of segments at a point in time
#[derive(Debug, Clone)]
pub struct Version {
    /// `levels[0]` is Level 1. Each level is sorted by key range.
    levels: Vec<Vec<Arc<Segment>>>,
    order: KeyOrder,
}

impl Version {
    /// Create a new empty version
    pub fn new(max_levels: usize, order: KeyOrder) -> Self {
        Self { levels: vec![Vec::new(); max_levels], order }
    }

    /// Builds a version from recovered segments, checking that no level has
    /// overlapping key ranges.
    pub fn from_segments(max_levels: usize, order: KeyOrder, segments: Vec<(usize, Arc<Segment>)>) -> Result<Self> {
        let change = LevelChange { added: segments, removed: Vec::new() };
        let version = Self::new(max_levels, order).apply(&change)?;

        for (index, level) in version.levels.iter().enumerate() {
            for pair in level.windows(2) {
                if pair[0].overlaps(&pair[1]) {
                    return Err(Error::corruption(format!(
                        "Segments {} and {} overlap in level {}",
                        pair[0].id(),
                        pair[1].id(),
                        index + 1
                    )));
                }
            }
        }
        Ok(version)
    }

    /// Apply a change to create a new version
    pub fn apply(&self, change: &LevelChange) -> Result<Self> {
        let mut version = self.clone();

        for (level, segment) in &change.removed {
            let segments = version.level_mut(*level)?;
            let before = segments.len();
            segments.retain(|s| s.id() != segment.id());
            if segments.len() == before {
                return Err(Error::internal(format!("Segment {} is not in level {}", segment.id(), level)));
            }
        }
        for (level, segment) in &change.added {
            version.level_mut(*level)?.push(Arc::clone(segment));
        }

        let order = version.order.clone();
        for segments in &mut version.levels {
            segments.sort_by(|a, b| order.compare(a.min_key(), b.min_key()));
        }
        Ok(version)
    }

    fn level_mut(&mut self, number: usize) -> Result<&mut Vec<Arc<Segment>>> {
        number
            .checked_sub(1)
            .and_then(|index| self.levels.get_mut(index))
            .ok_or_else(|| Error::internal(format!("Level {} does not exist", number)))
    }

    /// Number of levels below Level Zero.
    pub fn max_levels(&self) -> usize {
        self.levels.len()
    }

    /// Segments of level `number` (1-based), sorted by key range.
    pub fn level(&self, number: usize) -> &[Arc<Segment>] {
        number
            .checked_sub(1)
            .and_then(|index| self.levels.get(index))
            .map(|level| level.as_slice())
            .unwrap_or(&[])
    }

    /// Total size of a level in bytes.
    pub fn level_size(&self, number: usize) -> u64 {
        self.level(number).iter().map(|s| s.size()).sum()
    }

    /// Get the total size of all segments
    pub fn total_size(&self) -> u64 {
        self.segments().map(|s| s.size()).sum()
    }

    /// Get the total number of segments
    pub fn segment_count(&self) -> usize {
        self.levels.iter().map(|level| level.len()).sum()
    }

    /// Every segment, Level 1 first.
    pub fn segments(&self) -> impl Iterator<Item = &Arc<Segment>> {
        self.levels.iter().flatten()
    }

    /// The segment of level `number` whose range holds `key`.
    pub fn find(&self, number: usize, key: &[u8]) -> Option<&Arc<Segment>> {
        let level = self.level(number);
        let index = level.partition_point(|s| self.order.compare(s.max_key(), key) == Ordering::Less);
        level
            .get(index)
            .filter(|s| self.order.compare(s.min_key(), key) != Ordering::Greater)
    }

    /// Segments of level `number` intersecting `[min, max]`.
    pub fn overlapping(&self, number: usize, min: &[u8], max: &[u8]) -> Vec<Arc<Segment>> {
        self.level(number)
            .iter()
            .filter(|s| self.order.overlaps(s.min_key(), s.max_key(), min, max))
            .cloned()
            .collect()
    }

    /// True if any level below `number` holds keys in `[min, max]`.
    pub fn has_data_below(&self, number: usize, min: &[u8], max: &[u8]) -> bool {
        (number + 1..=self.max_levels()).any(|below| {
            self.level(below)
                .iter()
                .any(|s| self.order.overlaps(s.min_key(), s.max_key(), min, max))
        })
    }
}
