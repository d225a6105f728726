//! Snapshot implementation for point-in-time consistent reads.
//!
//! A snapshot pins the memtables, the level version and the sequence number
//! current at creation. Later commits and compactions do not change what it
//! sees, and the segments it references stay readable until it is dropped.

use crate::entry::merge::merge_optional;
use crate::entry::{Deadline, Value};
use crate::error::Result;
use crate::function::FunctionRegistry;
use crate::iterator::{Direction, MemCursor, MergingIterator, Source};
use crate::memtable::MemTable;
use crate::compaction::Version;
use crate::order::KeyOrder;
use crate::segment::LevelCursor;
use crate::stream::Stream;
use bytes::Bytes;
use std::ops::Bound;
use std::sync::Arc;

/// Everything a reader needs, frozen at one sequence.
pub(crate) struct ReadView {
    /// Newest first.
    pub(crate) memtables: Vec<Arc<MemTable>>,
    pub(crate) version: Arc<Version>,
    pub(crate) sequence: u64,
    pub(crate) functions: Arc<FunctionRegistry>,
    pub(crate) order: KeyOrder,
}

impl ReadView {
    /// Folds the versions of `key` from Level Zero down, stopping at the
    /// first fixed value. The result is not resolved.
    pub(crate) fn lookup(&self, key: &[u8], now: Deadline) -> Result<Option<Value>> {
        let mut acc: Option<Value> = None;

        for table in &self.memtables {
            if let Some(value) = table.get(key, self.sequence, &self.functions, now)? {
                let merged = merge_optional(acc, value, &self.functions, now)?;
                if merged.is_fixed() {
                    return Ok(Some(merged));
                }
                acc = Some(merged);
            }
        }

        for level in 1..=self.version.max_levels() {
            let Some(segment) = self.version.find(level, key) else {
                continue;
            };
            if let Some(value) = segment.get(key)? {
                let merged = merge_optional(acc, value, &self.functions, now)?;
                if merged.is_fixed() {
                    return Ok(Some(merged));
                }
                acc = Some(merged);
            }
        }

        Ok(acc)
    }

    /// The live value of `key` and its deadline.
    pub(crate) fn get(&self, key: &[u8], now: Deadline) -> Result<Option<(Bytes, Option<Deadline>)>> {
        Ok(self.lookup(key, now)?.and_then(|value| value.resolve(now)))
    }

    /// True if Level Zero holds `key` or a bloom filter of its segment might.
    pub(crate) fn might_contain(&self, key: &[u8]) -> bool {
        self.memtables.iter().any(|table| table.contains_key(key))
            || (1..=self.version.max_levels())
                .any(|level| self.version.find(level, key).is_some_and(|s| s.might_contain(key)))
    }

    /// Merges every memtable and level from `start` in `direction`.
    pub(crate) fn merged(&self, direction: Direction, start: Bound<&[u8]>, now: Deadline) -> Result<MergingIterator> {
        let mut sources = Vec::with_capacity(self.memtables.len() + self.version.max_levels());
        for table in &self.memtables {
            sources.push(Source::Memory(MemCursor::new(
                Arc::clone(table),
                self.sequence,
                direction,
                start,
                Arc::clone(&self.functions),
                now,
            )));
        }
        for level in 1..=self.version.max_levels() {
            let segments = self.version.level(level);
            if segments.is_empty() {
                continue;
            }
            sources.push(Source::Level(LevelCursor::new(
                segments.to_vec(),
                self.order.clone(),
                direction,
                start,
            )?));
        }

        MergingIterator::new(sources, self.order.clone(), direction, Arc::clone(&self.functions), now)
    }

    /// Live entries from `start` in `direction`.
    pub(crate) fn entries(&self, direction: Direction, start: Bound<&[u8]>, now: Deadline) -> Result<Entries> {
        Ok(Entries { merged: self.merged(direction, start, now)?, now })
    }
}

/// Resolves merged values, skipping absent and expired keys.
pub(crate) struct Entries {
    merged: MergingIterator,
    now: Deadline,
}

impl Iterator for Entries {
    type Item = Result<(Bytes, Bytes, Option<Deadline>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.merged.next_merged() {
                Err(e) => return Some(Err(e)),
                Ok(None) => return None,
                Ok(Some((key, value))) => {
                    if let Some((value, deadline)) = value.resolve(self.now) {
                        return Some(Ok((key, value, deadline)));
                    }
                }
            }
        }
    }
}

/// A snapshot represents a point-in-time view of the database.
///
/// # Example
///
/// ```rust,no_run
/// use swaykv::{DB, Options};
///
/// # fn main() -> Result<(), swaykv::Error> {
/// let db = DB::open("./data", Options::default())?;
///
/// db.put(b"key1", b"value1")?;
/// let snapshot = db.snapshot()?;
/// db.put(b"key1", b"value2")?;
///
/// assert_eq!(snapshot.get(b"key1")?.as_deref(), Some(&b"value1"[..]));
/// assert_eq!(db.get(b"key1")?.as_deref(), Some(&b"value2"[..]));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Snapshot {
    view: Arc<ReadView>,
}

impl Snapshot {
    pub(crate) fn new(view: Arc<ReadView>) -> Self {
        Self { view }
    }

    /// Retrieves the value associated with a key as it existed at snapshot
    /// time. Deadlines are checked against the current time.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.view.get(key, Deadline::now())?.map(|(value, _)| value))
    }

    /// Like [`Snapshot::get`], also returning the deadline.
    pub fn get_with_deadline(&self, key: &[u8]) -> Result<Option<(Bytes, Option<Deadline>)>> {
        self.view.get(key, Deadline::now())
    }

    /// Returns true if the key was present at snapshot time.
    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get_with_deadline(key)?.is_some())
    }

    /// A stream over the snapshot's entries.
    pub fn stream(&self) -> Stream {
        Stream::pinned(Arc::clone(&self.view))
    }

    /// Returns the sequence number of this snapshot.
    pub fn sequence(&self) -> u64 {
        self.view.sequence
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("sequence", &self.view.sequence)
            .field("memtables", &self.view.memtables.len())
            .field("segments", &self.view.version.segment_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{Options, DB};
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_isolation() {
        let tmp_dir = TempDir::new().unwrap();
        let db = DB::open(tmp_dir.path(), Options::default()).unwrap();

        db.put(b"key1", b"value1").unwrap();
        let snapshot = db.snapshot().unwrap();

        db.put(b"key1", b"value2").unwrap();
        db.put(b"key2", b"value2").unwrap();

        assert_eq!(snapshot.get(b"key1").unwrap().as_deref(), Some(&b"value1"[..]));
        assert_eq!(snapshot.get(b"key2").unwrap(), None);

        assert_eq!(db.get(b"key1").unwrap().as_deref(), Some(&b"value2"[..]));
        assert_eq!(db.get(b"key2").unwrap().as_deref(), Some(&b"value2"[..]));
    }

    #[test]
    fn test_snapshot_survives_flush() {
        let db = DB::open_in_memory(Options::default().map_size(1024)).unwrap();
        for i in 0..50u32 {
            db.put(format!("key{:03}", i).as_bytes(), b"v1").unwrap();
        }
        let snapshot = db.snapshot().unwrap();

        for i in 0..50u32 {
            db.put(format!("key{:03}", i).as_bytes(), b"v2").unwrap();
        }
        db.flush().unwrap();

        assert_eq!(snapshot.get(b"key007").unwrap().as_deref(), Some(&b"v1"[..]));
        assert_eq!(snapshot.stream().count().unwrap(), 50);
        assert!(snapshot
            .stream()
            .materialize()
            .unwrap()
            .iter()
            .all(|(_, v)| v.as_ref() == b"v1"));
    }

    #[test]
    fn test_snapshot_sees_remove_as_of_creation() {
        let db = DB::open_in_memory(Options::default()).unwrap();
        db.put(b"a", b"1").unwrap();
        let before = db.snapshot().unwrap();
        db.remove(b"a").unwrap();
        let after = db.snapshot().unwrap();

        assert!(before.contains_key(b"a").unwrap());
        assert!(!after.contains_key(b"a").unwrap());
        assert!(after.sequence() > before.sequence());
    }
}
