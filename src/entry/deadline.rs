//! Wall-clock expiry deadlines.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The instant after which an entry is treated as absent.
///
/// Stored as nanoseconds since the UNIX epoch so it survives restarts.
/// An entry with deadline `d` is visible while `now < d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Deadline(u64);

impl Deadline {
    /// Deadline at a raw nanosecond timestamp.
    pub const fn from_nanos(nanos: u64) -> Self {
        Deadline(nanos)
    }

    /// The current instant.
    pub fn now() -> Self {
        Self::at(SystemTime::now())
    }

    /// A deadline `duration` from now.
    pub fn after(duration: Duration) -> Self {
        let now = Self::now();
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        Deadline(now.0.saturating_add(nanos))
    }

    /// A deadline at the given wall-clock time. Times before the epoch clamp
    /// to zero, which is always overdue.
    pub fn at(time: SystemTime) -> Self {
        let nanos = time
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Deadline(nanos)
    }

    /// Nanoseconds since the UNIX epoch.
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    /// The deadline as a wall-clock time.
    pub fn to_system_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.0)
    }

    /// Returns true once the current time has reached the deadline.
    pub fn is_overdue(&self) -> bool {
        self.is_overdue_at(Deadline::now())
    }

    /// Returns true if `now` has reached the deadline.
    #[inline]
    pub fn is_overdue_at(&self, now: Deadline) -> bool {
        now.0 >= self.0
    }

    /// Time remaining until the deadline, zero if already passed.
    pub fn time_left(&self) -> Duration {
        self.time_left_at(Deadline::now())
    }

    pub(crate) fn time_left_at(&self, now: Deadline) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(now.0))
    }
}

/// Returns the earlier of two optional deadlines.
pub(crate) fn earliest(a: Option<Deadline>, b: Option<Deadline>) -> Option<Deadline> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
