//! # MemTable - Level Zero
//!
//! The MemTable is the in-memory write buffer that receives every committed
//! batch. It uses a SkipList so readers never block writers.
//!
//! ## Design
//!
//! - Based on crossbeam-skiplist for lock-free concurrent access
//! - Every write is kept as its own `(key, sequence)` version, which is how
//!   batches stay invisible until their whole sequence range is published
//! - Reads fold the versions visible at a sequence with the entry merge rules
//! - Tracks size against its own flush threshold (`map_size`), which the
//!   accelerator may choose per memtable

mod internal_key;

pub use internal_key::InternalKey;

use crate::entry::merge::fold_versions;
use crate::entry::{Deadline, Value};
use crate::error::Result;
use crate::function::FunctionRegistry;
use crate::order::KeyOrder;
use bytes::Bytes;
use crossbeam_skiplist::SkipMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Per-entry bookkeeping overhead counted towards the memtable size.
const ENTRY_OVERHEAD: usize = 16;

/// MemTable stores recent writes in memory using a SkipList.
///
/// # Example
///
/// ```rust
/// use swaykv::memtable::MemTable;
/// use swaykv::{KeyOrder, Value};
///
/// let memtable = MemTable::new(1, 1024, KeyOrder::default());
/// memtable.insert(b"key1".to_vec().into(), Value::put("value1"), 1);
/// assert_eq!(memtable.versions(b"key1", 2), vec![Value::put("value1")]);
/// ```
pub struct MemTable {
    /// The underlying SkipList storing InternalKey -> Value
    data: SkipMap<InternalKey, Value>,

    /// Approximate size in bytes (keys + encoded values)
    size: AtomicUsize,

    /// File number of this memtable's write-ahead log
    id: u64,

    /// Size at which this memtable is sealed
    map_size: usize,

    order: KeyOrder,
}

impl MemTable {
    /// Creates a new empty MemTable.
    ///
    /// # Arguments
    ///
    /// * `id` - File number shared with the memtable's log file
    /// * `map_size` - Flush threshold in bytes
    /// * `order` - Key comparator
    pub fn new(id: u64, map_size: usize, order: KeyOrder) -> Self {
        Self { data: SkipMap::new(), size: AtomicUsize::new(0), id, map_size, order }
    }

    /// Inserts one version of a key.
    pub fn insert(&self, key: Bytes, value: Value, sequence: u64) {
        let entry_size = key.len() + value.encoded_len() + ENTRY_OVERHEAD;
        self.data.insert(InternalKey::new(key, sequence, self.order.clone()), value);
        self.size.fetch_add(entry_size, Ordering::Relaxed);
    }

    /// Returns the versions of `key` with sequence `<= max_sequence`, newest
    /// first.
    pub fn versions(&self, key: &[u8], max_sequence: u64) -> Vec<Value> {
        let lower = InternalKey::new(Bytes::copy_from_slice(key), max_sequence, self.order.clone());
        let upper = InternalKey::oldest(key, &self.order);

        self.data.range(lower..=upper).map(|entry| entry.value().clone()).collect()
    }

    /// Folds the versions of `key` visible at `max_sequence` into one value.
    ///
    /// Returns `None` if the memtable holds no visible version. The result
    /// may be partial when no fixed value was found in this memtable.
    pub fn get(
        &self,
        key: &[u8],
        max_sequence: u64,
        functions: &FunctionRegistry,
        now: Deadline,
    ) -> Result<Option<Value>> {
        fold_versions(self.versions(key, max_sequence), functions, now)
    }

    /// Returns true if any version of `key` was written here.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.data
            .lower_bound(Bound::Included(&InternalKey::newest(key, &self.order)))
            .is_some_and(|entry| self.order.compare(entry.key().user_key(), key).is_eq())
    }

    /// Smallest user key satisfying `bound` as a lower bound.
    pub fn next_key(&self, bound: Bound<&[u8]>) -> Option<Bytes> {
        let entry = match bound {
            Bound::Unbounded => self.data.front(),
            Bound::Included(key) => {
                self.data.lower_bound(Bound::Included(&InternalKey::newest(key, &self.order)))
            }
            Bound::Excluded(key) => {
                self.data.lower_bound(Bound::Excluded(&InternalKey::oldest(key, &self.order)))
            }
        };
        entry.map(|e| e.key().user_key_bytes())
    }

    /// Largest user key satisfying `bound` as an upper bound.
    pub fn prev_key(&self, bound: Bound<&[u8]>) -> Option<Bytes> {
        let entry = match bound {
            Bound::Unbounded => self.data.back(),
            Bound::Included(key) => {
                self.data.upper_bound(Bound::Included(&InternalKey::oldest(key, &self.order)))
            }
            Bound::Excluded(key) => {
                self.data.upper_bound(Bound::Excluded(&InternalKey::newest(key, &self.order)))
            }
        };
        entry.map(|e| e.key().user_key_bytes())
    }

    /// Folds every key into its final value, in key order.
    ///
    /// Used when the memtable is flushed; all versions are visible.
    pub fn entries(&self, functions: &FunctionRegistry, now: Deadline) -> Result<Vec<(Bytes, Value)>> {
        let mut entries = Vec::new();
        let mut current: Option<Bytes> = None;
        let mut versions: Vec<Value> = Vec::new();

        for entry in self.data.iter() {
            let key = entry.key().user_key();
            let same_key = current
                .as_ref()
                .is_some_and(|c| self.order.compare(c, key).is_eq());

            if !same_key {
                if let Some(done) = current.take() {
                    if let Some(value) = fold_versions(versions.drain(..), functions, now)? {
                        entries.push((done, value));
                    }
                }
                current = Some(entry.key().user_key_bytes());
            }
            versions.push(entry.value().clone());
        }

        if let Some(done) = current {
            if let Some(value) = fold_versions(versions, functions, now)? {
                entries.push((done, value));
            }
        }

        Ok(entries)
    }

    /// Returns the approximate size of the MemTable in bytes.
    pub fn approximate_size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Returns true once the memtable has reached its flush threshold.
    pub fn should_seal(&self) -> bool {
        self.approximate_size() >= self.map_size
    }

    /// Returns the number of versions in the MemTable.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the MemTable contains no entries.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// File number of the memtable's log.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Flush threshold in bytes.
    pub fn map_size(&self) -> usize {
        self.map_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FunctionOutput;
    use std::sync::Arc;

    fn memtable() -> MemTable {
        MemTable::new(1, 1024 * 1024, KeyOrder::default())
    }

    fn put(memtable: &MemTable, key: &str, value: &str, seq: u64) {
        memtable.insert(Bytes::copy_from_slice(key.as_bytes()), Value::put(value.to_string()), seq);
    }

    fn read(memtable: &MemTable, key: &str, seq: u64) -> Option<Bytes> {
        let functions = FunctionRegistry::new();
        memtable
            .get(key.as_bytes(), seq, &functions, Deadline::now())
            .unwrap()
            .and_then(|v| v.resolve(Deadline::now()))
            .map(|(v, _)| v)
    }

    #[test]
    fn test_memtable_new() {
        let memtable = MemTable::new(7, 100, KeyOrder::default());
        assert_eq!(memtable.id(), 7);
        assert_eq!(memtable.map_size(), 100);
        assert!(memtable.is_empty());
        assert_eq!(memtable.len(), 0);
    }

    #[test]
    fn test_memtable_put_and_get() {
        let memtable = memtable();
        put(&memtable, "key1", "value1", 1);
        put(&memtable, "key2", "value2", 2);

        assert_eq!(read(&memtable, "key1", 100), Some(Bytes::from("value1")));
        assert_eq!(read(&memtable, "key2", 100), Some(Bytes::from("value2")));
        assert_eq!(read(&memtable, "key3", 100), None);
        assert!(memtable.contains_key(b"key1"));
        assert!(!memtable.contains_key(b"key"));
    }

    #[test]
    fn test_memtable_remove() {
        let memtable = memtable();
        put(&memtable, "key1", "value1", 1);
        memtable.insert(Bytes::from("key1"), Value::tombstone(), 2);

        assert_eq!(read(&memtable, "key1", 100), None);
        assert_eq!(read(&memtable, "key1", 1), Some(Bytes::from("value1")));
        assert_eq!(memtable.len(), 2);
    }

    #[test]
    fn test_memtable_mvcc() {
        let memtable = memtable();
        put(&memtable, "key1", "value1", 1);
        put(&memtable, "key1", "value2", 2);
        put(&memtable, "key1", "value3", 3);

        assert_eq!(read(&memtable, "key1", 1), Some(Bytes::from("value1")));
        assert_eq!(read(&memtable, "key1", 2), Some(Bytes::from("value2")));
        assert_eq!(read(&memtable, "key1", 100), Some(Bytes::from("value3")));
        assert_eq!(read(&memtable, "key1", 0), None);
    }

    #[test]
    fn test_memtable_folds_functions() {
        let memtable = memtable();
        let functions = FunctionRegistry::new();
        functions.register(b"append", |v| {
            let mut out = v.to_vec();
            out.push(b'!');
            FunctionOutput::Update(out)
        });

        put(&memtable, "k", "hi", 1);
        memtable.insert(Bytes::from("k"), Value::Function { id: Bytes::from("append") }, 2);
        memtable.insert(Bytes::from("k"), Value::Function { id: Bytes::from("append") }, 3);

        let folded = memtable.get(b"k", 10, &functions, Deadline::now()).unwrap();
        assert_eq!(folded, Some(Value::put("hi!!")));
    }

    #[test]
    fn test_memtable_size() {
        let memtable = MemTable::new(1, 64, KeyOrder::default());
        assert_eq!(memtable.approximate_size(), 0);

        put(&memtable, "key1", "value1", 1);
        let size_after_first = memtable.approximate_size();
        assert!(size_after_first > 0);
        assert!(!memtable.should_seal());

        for i in 0..10 {
            put(&memtable, "key2", "value2", 2 + i);
        }
        assert!(memtable.approximate_size() > size_after_first);
        assert!(memtable.should_seal());
    }

    #[test]
    fn test_memtable_navigation() {
        let memtable = memtable();
        put(&memtable, "b", "1", 1);
        put(&memtable, "d", "2", 2);
        put(&memtable, "d", "3", 3);
        put(&memtable, "f", "4", 4);

        assert_eq!(memtable.next_key(Bound::Unbounded), Some(Bytes::from("b")));
        assert_eq!(memtable.next_key(Bound::Included(b"d")), Some(Bytes::from("d")));
        assert_eq!(memtable.next_key(Bound::Excluded(b"d")), Some(Bytes::from("f")));
        assert_eq!(memtable.next_key(Bound::Included(b"c")), Some(Bytes::from("d")));
        assert_eq!(memtable.next_key(Bound::Excluded(b"f")), None);

        assert_eq!(memtable.prev_key(Bound::Unbounded), Some(Bytes::from("f")));
        assert_eq!(memtable.prev_key(Bound::Included(b"d")), Some(Bytes::from("d")));
        assert_eq!(memtable.prev_key(Bound::Excluded(b"d")), Some(Bytes::from("b")));
        assert_eq!(memtable.prev_key(Bound::Included(b"e")), Some(Bytes::from("d")));
        assert_eq!(memtable.prev_key(Bound::Excluded(b"b")), None);
    }

    #[test]
    fn test_memtable_entries() {
        let memtable = memtable();
        put(&memtable, "key2", "old", 1);
        put(&memtable, "key1", "value1", 2);
        put(&memtable, "key2", "new", 3);
        memtable.insert(Bytes::from("key3"), Value::tombstone(), 4);

        let entries = memtable.entries(&FunctionRegistry::new(), Deadline::now()).unwrap();
        assert_eq!(
            entries,
            vec![
                (Bytes::from("key1"), Value::put("value1")),
                (Bytes::from("key2"), Value::put("new")),
                (Bytes::from("key3"), Value::tombstone()),
            ]
        );
    }

    #[test]
    fn test_memtable_concurrent_access() {
        use std::thread;

        let memtable = Arc::new(memtable());
        let mut handles = vec![];

        for i in 0..10 {
            let mt = memtable.clone();
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = format!("key{}", i * 100 + j);
                    let value = format!("value{}", i * 100 + j);
                    put(&mt, &key, &value, (i * 100 + j + 1) as u64);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(memtable.len(), 1000);

        let mut handles = vec![];
        for i in 0..10 {
            let mt = memtable.clone();
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = format!("key{}", i * 100 + j);
                    let expected = format!("value{}", i * 100 + j);
                    assert_eq!(read(&mt, &key, u64::MAX), Some(Bytes::from(expected)));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
