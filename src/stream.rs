//! Lazy, restartable streams over the database.
//!
//! A [`Stream`] is a description: where to start, which direction to walk
//! and a pipeline of stages. Nothing is read until a terminal operation such
//! as [`Stream::materialize`] or [`Stream::iter`] runs. Each run takes a fresh
//! read view (or reuses the pinned view of a [`Snapshot`](crate::Snapshot)),
//! so a stream can be cloned and executed any number of times.
//!
//! # Example
//!
//! ```rust,no_run
//! use swaykv::{DB, Options};
//!
//! # fn main() -> Result<(), swaykv::Error> {
//! let db = DB::open_in_memory(Options::default())?;
//! for i in 1..=100u32 {
//!     db.put(format!("{:03}", i).as_bytes(), b"value")?;
//! }
//!
//! let batch = db
//!     .stream()
//!     .from(b"010")
//!     .take_while(|key, _| key <= &b"090"[..])
//!     .map(|_, value| [value, b"_updated"].concat())
//!     .to_batch()?;
//! db.commit(batch)?;
//! # Ok(())
//! # }
//! ```

use crate::db::Core;
use crate::entry::Deadline;
use crate::error::Result;
use crate::iterator::Direction;
use crate::snapshot::{Entries, ReadView};
use crate::write_batch::{Prepare, WriteBatch};
use bytes::Bytes;
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

type Predicate = Arc<dyn Fn(&[u8], &[u8]) -> bool + Send + Sync>;
type Mapper = Arc<dyn Fn(&[u8], &[u8]) -> Vec<u8> + Send + Sync>;

#[derive(Clone)]
enum ViewSource {
    /// Reads the database as of each run.
    Live(Arc<Core>),
    /// Reads a snapshot.
    Pinned(Arc<ReadView>),
}

impl ViewSource {
    fn view(&self) -> Result<Arc<ReadView>> {
        match self {
            ViewSource::Live(core) => core.read_view(),
            ViewSource::Pinned(view) => Ok(Arc::clone(view)),
        }
    }
}

/// Where a stream begins.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Start {
    /// The first key in the stream's direction.
    Edge,
    /// Exactly this key; the stream is empty if it is absent.
    From(Bytes),
    /// This key, or the nearest key after it.
    FromOrAfter(Bytes),
    /// This key, or the nearest key before it.
    FromOrBefore(Bytes),
    /// The nearest key strictly after this one.
    After(Bytes),
    /// The nearest key strictly before this one.
    Before(Bytes),
}

#[derive(Clone)]
enum Stage {
    Take(usize),
    TakeWhile(Predicate),
    Drop(usize),
    DropWhile(Predicate),
    Filter(Predicate),
    Map(Mapper),
}

/// A lazy query over key-value entries.
#[derive(Clone)]
pub struct Stream {
    source: ViewSource,
    start: Start,
    direction: Direction,
    stages: Vec<Stage>,
}

impl Stream {
    pub(crate) fn live(core: Arc<Core>) -> Self {
        Self::new(ViewSource::Live(core))
    }

    pub(crate) fn pinned(view: Arc<ReadView>) -> Self {
        Self::new(ViewSource::Pinned(view))
    }

    fn new(source: ViewSource) -> Self {
        Self { source, start: Start::Edge, direction: Direction::Forward, stages: Vec::new() }
    }

    /// Starts at `key`. The stream is empty if `key` is absent.
    pub fn from(mut self, key: &[u8]) -> Self {
        self.start = Start::From(Bytes::copy_from_slice(key));
        self
    }

    /// Starts at `key`, or at the nearest key after it if absent.
    pub fn from_or_after(mut self, key: &[u8]) -> Self {
        self.start = Start::FromOrAfter(Bytes::copy_from_slice(key));
        self
    }

    /// Starts at `key`, or at the nearest key before it if absent.
    pub fn from_or_before(mut self, key: &[u8]) -> Self {
        self.start = Start::FromOrBefore(Bytes::copy_from_slice(key));
        self
    }

    /// Starts at the nearest key after `key`.
    pub fn after(mut self, key: &[u8]) -> Self {
        self.start = Start::After(Bytes::copy_from_slice(key));
        self
    }

    /// Starts at the nearest key before `key`.
    pub fn before(mut self, key: &[u8]) -> Self {
        self.start = Start::Before(Bytes::copy_from_slice(key));
        self
    }

    /// Walks keys in descending order from the start position.
    pub fn reverse(mut self) -> Self {
        self.direction = match self.direction {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        };
        self
    }

    /// Yields at most `n` entries.
    pub fn take(mut self, n: usize) -> Self {
        self.stages.push(Stage::Take(n));
        self
    }

    /// Yields entries until `predicate` first returns false.
    pub fn take_while<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&[u8], &[u8]) -> bool + Send + Sync + 'static,
    {
        self.stages.push(Stage::TakeWhile(Arc::new(predicate)));
        self
    }

    /// Skips the first `n` entries.
    pub fn drop(mut self, n: usize) -> Self {
        self.stages.push(Stage::Drop(n));
        self
    }

    /// Skips entries while `predicate` returns true.
    pub fn drop_while<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&[u8], &[u8]) -> bool + Send + Sync + 'static,
    {
        self.stages.push(Stage::DropWhile(Arc::new(predicate)));
        self
    }

    /// Keeps entries for which `predicate` returns true.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&[u8], &[u8]) -> bool + Send + Sync + 'static,
    {
        self.stages.push(Stage::Filter(Arc::new(predicate)));
        self
    }

    /// Replaces each value with `f(key, value)`.
    pub fn map<F>(mut self, f: F) -> Self
    where
        F: Fn(&[u8], &[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        self.stages.push(Stage::Map(Arc::new(f)));
        self
    }

    /// Runs the stream, returning an iterator over `(key, value)`.
    pub fn iter(&self) -> Result<StreamIter> {
        self.run().map(|inner| StreamIter { inner })
    }

    /// Calls `f` for every entry.
    pub fn foreach<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]),
    {
        for entry in self.iter()? {
            let (key, value) = entry?;
            f(&key, &value);
        }
        Ok(())
    }

    /// Collects every entry.
    pub fn materialize(&self) -> Result<Vec<(Bytes, Bytes)>> {
        self.iter()?.collect()
    }

    /// The first entry.
    pub fn head(&self) -> Result<Option<(Bytes, Bytes)>> {
        self.iter()?.next().transpose()
    }

    /// The last entry.
    pub fn last(&self) -> Result<Option<(Bytes, Bytes)>> {
        let mut last = None;
        for entry in self.iter()? {
            last = Some(entry?);
        }
        Ok(last)
    }

    /// Number of entries.
    pub fn count(&self) -> Result<usize> {
        let mut count = 0;
        for entry in self.iter()? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Collects the entries into a batch of puts, keeping each entry's
    /// deadline, ready to be committed back atomically.
    pub fn to_batch(&self) -> Result<WriteBatch> {
        let mut batch = WriteBatch::new();
        for entry in self.run()? {
            let (key, value, deadline) = entry?;
            batch.push(Prepare::Put { key: key.to_vec(), value: value.to_vec(), deadline });
        }
        Ok(batch)
    }

    fn run(&self) -> Result<Pipeline> {
        let view = self.source.view()?;
        let now = Deadline::now();
        let direction = self.direction;

        let entries = match &self.start {
            Start::Edge => Some(view.entries(direction, Bound::Unbounded, now)?),
            Start::From(key) => match view.get(key, now)? {
                Some(_) => Some(view.entries(direction, Bound::Included(&key[..]), now)?),
                None => None,
            },
            Start::FromOrAfter(key) => self.seek(&view, Direction::Forward, Bound::Included(&key[..]), now)?,
            Start::FromOrBefore(key) => self.seek(&view, Direction::Reverse, Bound::Included(&key[..]), now)?,
            Start::After(key) => self.seek(&view, Direction::Forward, Bound::Excluded(&key[..]), now)?,
            Start::Before(key) => self.seek(&view, Direction::Reverse, Bound::Excluded(&key[..]), now)?,
        };

        Ok(Pipeline {
            entries,
            stages: self.stages.iter().cloned().map(StageState::from).collect(),
            done: false,
        })
    }

    /// Finds the first live key from `bound` walking `seek`, then opens the
    /// stream's own direction at that key.
    fn seek(&self, view: &ReadView, seek: Direction, bound: Bound<&[u8]>, now: Deadline) -> Result<Option<Entries>> {
        let mut first = view.entries(seek, bound, now)?;
        if seek == self.direction {
            return Ok(Some(first));
        }
        match first.next().transpose()? {
            Some((key, _, _)) => Ok(Some(view.entries(self.direction, Bound::Included(&key[..]), now)?)),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("start", &self.start)
            .field("direction", &self.direction)
            .field("stages", &self.stages.len())
            .finish()
    }
}

enum StageState {
    Take(usize),
    TakeWhile(Predicate),
    Drop(usize),
    DropWhile { predicate: Predicate, dropping: bool },
    Filter(Predicate),
    Map(Mapper),
}

impl From<Stage> for StageState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Take(n) => StageState::Take(n),
            Stage::TakeWhile(p) => StageState::TakeWhile(p),
            Stage::Drop(n) => StageState::Drop(n),
            Stage::DropWhile(p) => StageState::DropWhile { predicate: p, dropping: true },
            Stage::Filter(p) => StageState::Filter(p),
            Stage::Map(f) => StageState::Map(f),
        }
    }
}

/// What a stage did with an entry.
enum Flow {
    Pass,
    Skip,
    /// Nothing after this point can pass; the stream is over.
    Stop,
}

struct Pipeline {
    entries: Option<Entries>,
    stages: Vec<StageState>,
    done: bool,
}

impl Pipeline {
    fn apply(&mut self, key: &[u8], value: &mut Bytes) -> Flow {
        for stage in &mut self.stages {
            match stage {
                StageState::Take(remaining) => {
                    if *remaining == 0 {
                        return Flow::Stop;
                    }
                    *remaining -= 1;
                }
                StageState::TakeWhile(predicate) => {
                    if !predicate(key, value) {
                        return Flow::Stop;
                    }
                }
                StageState::Drop(remaining) => {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Flow::Skip;
                    }
                }
                StageState::DropWhile { predicate, dropping } => {
                    if *dropping {
                        if predicate(key, value) {
                            return Flow::Skip;
                        }
                        *dropping = false;
                    }
                }
                StageState::Filter(predicate) => {
                    if !predicate(key, value) {
                        return Flow::Skip;
                    }
                }
                StageState::Map(f) => {
                    *value = Bytes::from(f(key, value));
                }
            }
        }
        Flow::Pass
    }

    /// True once a `take` stage has nothing left to give.
    fn exhausted(&self) -> bool {
        self.stages.iter().any(|stage| matches!(stage, StageState::Take(0)))
    }
}

impl Iterator for Pipeline {
    type Item = Result<(Bytes, Bytes, Option<Deadline>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.exhausted() {
            return None;
        }
        loop {
            let (key, mut value, deadline) = match self.entries.as_mut()?.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            match self.apply(&key, &mut value) {
                Flow::Pass => return Some(Ok((key, value, deadline))),
                Flow::Skip => continue,
                Flow::Stop => {
                    self.done = true;
                    return None;
                }
            }
        }
    }
}

/// Iterator returned by [`Stream::iter`].
pub struct StreamIter {
    inner: Pipeline,
}

impl Iterator for StreamIter {
    type Item = Result<(Bytes, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|entry| entry.map(|(key, value, _)| (key, value)))
    }
}
