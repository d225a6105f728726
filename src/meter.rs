//! Level meters and the commit accelerator.
//!
//! The accelerator is a policy hook: it looks at Level Zero before each commit
//! and may grow the next memtable or slow the committing thread down when
//! flushes fall behind. It never rejects a commit.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Snapshot of Level Zero (the memtables) at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelZeroMeter {
    /// Configured `map_size`.
    pub default_map_size: usize,
    /// Flush threshold of the active memtable.
    pub current_map_size: usize,
    /// Bytes buffered in the active memtable.
    pub used_map_size: usize,
    /// Active plus sealed memtables waiting for flush.
    pub maps_count: usize,
}

/// Snapshot of one level of segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelMeter {
    /// Level number, starting at 1.
    pub level_number: usize,
    /// Number of segments in the level.
    pub segments_count: usize,
    /// Segments whose file handle is currently open.
    pub open_segments: usize,
    /// Total bytes of the level's segments.
    pub level_size: u64,
    /// Size above which the level is compacted.
    pub budget: u64,
}

/// Delay applied to a commit before it enters the write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Brake {
    /// How long the committing thread sleeps.
    pub delay: Duration,
}

/// Decision returned by an [`AccelerationPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accelerator {
    /// Flush threshold for the next memtable.
    pub next_map_size: usize,
    /// Optional throttle for the current commit.
    pub brake: Option<Brake>,
}

impl Accelerator {
    /// Keeps the configured map size and never throttles.
    pub fn no_brakes(meter: &LevelZeroMeter) -> Self {
        Accelerator { next_map_size: meter.default_map_size, brake: None }
    }

    /// Throttles commits once more than `max_maps` memtables are buffered.
    /// The delay grows by `step` per extra memtable up to `max_delay`.
    pub fn brake_after(
        meter: &LevelZeroMeter,
        max_maps: usize,
        step: Duration,
        max_delay: Duration,
    ) -> Self {
        let brake = if meter.maps_count > max_maps {
            let extra = (meter.maps_count - max_maps) as u32;
            Some(Brake { delay: step.saturating_mul(extra).min(max_delay) })
        } else {
            None
        };
        Accelerator { next_map_size: meter.default_map_size, brake }
    }
}

type AccelerateFn = dyn Fn(&LevelZeroMeter) -> Accelerator + Send + Sync;

/// Backpressure policy, a function of the Level Zero meter.
#[derive(Clone)]
pub struct AccelerationPolicy(Arc<AccelerateFn>);

impl AccelerationPolicy {
    /// Wraps a custom policy function.
    pub fn new<F>(policy: F) -> Self
    where
        F: Fn(&LevelZeroMeter) -> Accelerator + Send + Sync + 'static,
    {
        AccelerationPolicy(Arc::new(policy))
    }

    /// See [`Accelerator::no_brakes`].
    pub fn no_brakes() -> Self {
        Self::new(Accelerator::no_brakes)
    }

    /// See [`Accelerator::brake_after`].
    pub fn brake_after(max_maps: usize, step: Duration, max_delay: Duration) -> Self {
        Self::new(move |meter| Accelerator::brake_after(meter, max_maps, step, max_delay))
    }

    pub(crate) fn accelerate(&self, meter: &LevelZeroMeter) -> Accelerator {
        let mut accelerator = (self.0)(meter);
        if accelerator.next_map_size == 0 {
            accelerator.next_map_size = meter.default_map_size;
        }
        accelerator
    }
}

impl Default for AccelerationPolicy {
    fn default() -> Self {
        Self::no_brakes()
    }
}

impl fmt::Debug for AccelerationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccelerationPolicy(..)")
    }
}
