//! Multi-way merge over memtables and levels.
//!
//! Every source yields `(key, value)` in key order (or reverse key order).
//! The merging iterator pops the smallest key from a heap, folds the values
//! of every source holding that key from newest to oldest, and yields one
//! merged value per key. Sources are indexed newest first, so on equal keys
//! the lower index wins.

use crate::entry::merge::fold_versions;
use crate::entry::{Deadline, Value};
use crate::error::Result;
use crate::function::FunctionRegistry;
use crate::memtable::MemTable;
use crate::order::KeyOrder;
use crate::segment::LevelCursor;
use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::ops::Bound;
use std::sync::Arc;

/// Iteration direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Ascending key order.
    #[default]
    Forward,
    /// Descending key order.
    Reverse,
}

/// Owned bound, converted back with [`borrow_bound`].
pub(crate) fn own_bound(bound: Bound<&[u8]>) -> Bound<Bytes> {
    match bound {
        Bound::Included(key) => Bound::Included(Bytes::copy_from_slice(key)),
        Bound::Excluded(key) => Bound::Excluded(Bytes::copy_from_slice(key)),
        Bound::Unbounded => Bound::Unbounded,
    }
}

pub(crate) fn borrow_bound(bound: &Bound<Bytes>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(key) => Bound::Included(key),
        Bound::Excluded(key) => Bound::Excluded(key),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// Steps through one memtable by key, folding the versions visible at the
/// cursor's sequence.
pub(crate) struct MemCursor {
    table: Arc<MemTable>,
    sequence: u64,
    direction: Direction,
    next: Bound<Bytes>,
    functions: Arc<FunctionRegistry>,
    now: Deadline,
}

impl MemCursor {
    pub(crate) fn new(
        table: Arc<MemTable>,
        sequence: u64,
        direction: Direction,
        start: Bound<&[u8]>,
        functions: Arc<FunctionRegistry>,
        now: Deadline,
    ) -> Self {
        Self { table, sequence, direction, next: own_bound(start), functions, now }
    }

    fn next_entry(&mut self) -> Result<Option<(Bytes, Value)>> {
        loop {
            let key = match self.direction {
                Direction::Forward => self.table.next_key(borrow_bound(&self.next)),
                Direction::Reverse => self.table.prev_key(borrow_bound(&self.next)),
            };
            let Some(key) = key else {
                return Ok(None);
            };
            self.next = Bound::Excluded(key.clone());

            if let Some(value) = self.table.get(&key, self.sequence, &self.functions, self.now)? {
                return Ok(Some((key, value)));
            }
        }
    }
}

/// One input of a [`MergingIterator`].
pub(crate) enum Source {
    Memory(MemCursor),
    Level(LevelCursor),
    Entries(std::vec::IntoIter<(Bytes, Value)>),
}

impl Source {
    fn next_entry(&mut self) -> Result<Option<(Bytes, Value)>> {
        match self {
            Source::Memory(cursor) => cursor.next_entry(),
            Source::Level(cursor) => cursor.next_entry(),
            Source::Entries(entries) => Ok(entries.next()),
        }
    }
}

/// Entry in the merge heap
struct HeapEntry {
    key: Bytes,
    value: Value,
    source: usize,
    order: KeyOrder,
    direction: Direction,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        let keys = self.order.compare(&self.key, &other.key);
        // BinaryHeap pops the greatest entry: invert for ascending scans.
        let keys = match self.direction {
            Direction::Forward => keys.reverse(),
            Direction::Reverse => keys,
        };
        keys.then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges sources into one ordered stream of folded values.
///
/// Values are not resolved: a key may come out as a tombstone or as a
/// partial value with no base, which readers treat as absent and compaction
/// keeps or drops by its own rules.
pub struct MergingIterator {
    sources: Vec<Source>,
    heap: BinaryHeap<HeapEntry>,
    order: KeyOrder,
    direction: Direction,
    functions: Arc<FunctionRegistry>,
    now: Deadline,
}

impl MergingIterator {
    pub(crate) fn new(
        sources: Vec<Source>,
        order: KeyOrder,
        direction: Direction,
        functions: Arc<FunctionRegistry>,
        now: Deadline,
    ) -> Result<Self> {
        let mut iter = Self {
            sources,
            heap: BinaryHeap::new(),
            order,
            direction,
            functions,
            now,
        };
        for index in 0..iter.sources.len() {
            iter.advance(index)?;
        }
        Ok(iter)
    }

    /// Advance the source at the given index and add its next entry to the heap
    fn advance(&mut self, index: usize) -> Result<()> {
        if let Some((key, value)) = self.sources[index].next_entry()? {
            self.heap.push(HeapEntry {
                key,
                value,
                source: index,
                order: self.order.clone(),
                direction: self.direction,
            });
        }
        Ok(())
    }

    /// The next key and its value folded across every source.
    pub fn next_merged(&mut self) -> Result<Option<(Bytes, Value)>> {
        let Some(top) = self.heap.pop() else {
            return Ok(None);
        };
        self.advance(top.source)?;

        let key = top.key;
        let mut versions = vec![top.value];
        while let Some(peek) = self.heap.peek() {
            if !self.order.compare(&peek.key, &key).is_eq() {
                break;
            }
            if let Some(entry) = self.heap.pop() {
                self.advance(entry.source)?;
                versions.push(entry.value);
            }
        }

        let merged = match versions.len() {
            1 => versions.pop(),
            _ => fold_versions(versions, &self.functions, self.now)?,
        };
        Ok(merged.map(|value| (key, value)))
    }
}

impl Iterator for MergingIterator {
    type Item = Result<(Bytes, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_merged().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FunctionOutput;

    fn entries(pairs: &[(&str, Value)]) -> Source {
        let list: Vec<(Bytes, Value)> =
            pairs.iter().map(|(k, v)| (Bytes::copy_from_slice(k.as_bytes()), v.clone())).collect();
        Source::Entries(list.into_iter())
    }

    fn merge(sources: Vec<Source>, direction: Direction) -> Vec<(String, Value)> {
        let functions = FunctionRegistry::new();
        functions.register(b"double", |v| {
            let mut out = v.to_vec();
            out.extend_from_slice(v);
            FunctionOutput::Update(out)
        });
        MergingIterator::new(sources, KeyOrder::default(), direction, Arc::new(functions), Deadline::now())
            .unwrap()
            .map(|r| {
                let (k, v) = r.unwrap();
                (String::from_utf8(k.to_vec()).unwrap(), v)
            })
            .collect()
    }

    #[test]
    fn test_newer_source_wins() {
        let newer = entries(&[("b", Value::put("b2")), ("d", Value::tombstone())]);
        let older = entries(&[("a", Value::put("a1")), ("b", Value::put("b1")), ("d", Value::put("d1"))]);

        let merged = merge(vec![newer, older], Direction::Forward);
        assert_eq!(
            merged,
            vec![
                ("a".to_string(), Value::put("a1")),
                ("b".to_string(), Value::put("b2")),
                ("d".to_string(), Value::tombstone()),
            ]
        );
    }

    #[test]
    fn test_partial_values_fold_across_sources() {
        let newest = entries(&[("k", Value::Function { id: Bytes::from_static(b"double") })]);
        let middle = entries(&[("k", Value::Update { value: Bytes::from_static(b"ab"), deadline: None })]);
        let oldest = entries(&[("k", Value::put("zz"))]);

        let merged = merge(vec![newest, middle, oldest], Direction::Forward);
        assert_eq!(merged, vec![("k".to_string(), Value::put("abab"))]);
    }

    #[test]
    fn test_reverse_merge() {
        let first = entries(&[("c", Value::put("c")), ("a", Value::put("a"))]);
        let second = entries(&[("d", Value::put("d")), ("b", Value::put("b"))]);

        let keys: Vec<String> = merge(vec![first, second], Direction::Reverse).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["d", "c", "b", "a"]);
    }

    #[test]
    fn test_memtable_source_respects_sequence() {
        let table = Arc::new(MemTable::new(1, 1 << 20, KeyOrder::default()));
        table.insert(Bytes::from_static(b"a"), Value::put("1"), 1);
        table.insert(Bytes::from_static(b"b"), Value::put("2"), 5);
        table.insert(Bytes::from_static(b"a"), Value::put("3"), 6);

        let functions = Arc::new(FunctionRegistry::new());
        let cursor = MemCursor::new(table, 4, Direction::Forward, Bound::Unbounded, functions.clone(), Deadline::now());
        let merged: Vec<_> = MergingIterator::new(
            vec![Source::Memory(cursor)],
            KeyOrder::default(),
            Direction::Forward,
            functions,
            Deadline::now(),
        )
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();

        assert_eq!(merged, vec![(Bytes::from_static(b"a"), Value::put("1"))]);
    }
}
