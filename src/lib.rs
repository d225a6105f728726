//! # SwayKV - An Embeddable LSM-Tree Key-Value Store
//!
//! SwayKV is an ordered key-value storage engine with Map and Set semantics,
//! per-entry expiry, atomic multi-operation batches and lazily applied value
//! functions. It runs either persistently on disk or entirely in memory.
//!
//! ## Architecture
//!
//! The storage engine consists of several key components:
//!
//! - **Level Zero**: skip-list memtables holding recent writes, sealed and
//!   flushed once they reach `map_size`
//! - **Log**: write-ahead log replayed into Level Zero on open
//! - **Segments**: immutable sorted files with a bloom filter, arranged in
//!   non-overlapping levels `1..=max_levels`
//! - **Appendix**: catalog of which segment lives in which level
//! - **Compaction**: background merges that push data down the levels and
//!   drop tombstones and expired entries once nothing older can resurface
//! - **Streams**: ordered, lazy range iteration over every level
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use swaykv::{Deadline, FunctionOutput, Options, DB};
//!
//! # fn main() -> Result<(), swaykv::Error> {
//! let db = DB::open("./data", Options::default())?;
//!
//! db.put(b"key1", b"value1")?;
//! db.put_with_deadline(b"session", b"token", Deadline::after(Duration::from_secs(60)))?;
//!
//! if let Some(value) = db.get(b"key1")? {
//!     println!("Found: {:?}", value);
//! }
//!
//! db.register_function(b"clear", |_: &[u8]| FunctionOutput::Update(Vec::new()));
//! db.apply_function(b"key1", b"clear")?;
//!
//! for (key, value) in db.stream().from(b"key").take(10).materialize()? {
//!     println!("{:?} => {:?}", key, value);
//! }
//!
//! db.remove(b"key1")?;
//! db.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod cache;
pub mod compaction;
pub mod config;
mod db;
pub mod entry;
pub mod error;
pub mod filter;
pub mod function;
pub mod iterator;
pub mod memtable;
pub mod meter;
pub mod order;
pub mod queue;
mod scheduler;
pub mod segment;
pub mod snapshot;
pub mod stream;
pub mod wal;
pub mod write_batch;

// Re-exports
pub use config::{CompressionType, GroupingStrategy, MmapOptions, Options, RecoveryMode};
pub use entry::{Deadline, Value};
pub use error::{Error, Result};
pub use function::FunctionOutput;
pub use iterator::Direction;
pub use meter::{AccelerationPolicy, Accelerator, Brake, LevelMeter, LevelZeroMeter};
pub use order::KeyOrder;
pub use queue::Queue;
pub use snapshot::Snapshot;
pub use stream::{Stream, StreamIter};
pub use write_batch::{Prepare, WriteBatch};

use bytes::Bytes;
use crossbeam::channel::{self, Receiver};
use db::Core;
use parking_lot::Mutex;
use scheduler::{Scheduler, Signal};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// The main database handle.
///
/// Every operation is synchronous and returns a [`Result`]. Reads never
/// block on writers or on background compaction.
///
/// # Thread Safety
///
/// `DB` is designed to be thread-safe and can be safely shared across threads
/// using `Arc<DB>`.
pub struct DB {
    core: Arc<Core>,

    /// Background compactor and sweeper; `None` once closed.
    scheduler: Mutex<Option<Scheduler>>,
}

impl DB {
    /// Opens a database at the specified path with the given options.
    ///
    /// If the database does not exist, it will be created. If it exists,
    /// its segments are reopened from the appendix and unflushed writes are
    /// replayed from the log.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The options are invalid
    /// - The path is inaccessible, or exists while `error_if_exists` is set
    /// - Recovery finds corruption under [`RecoveryMode::ReportFailure`]
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use swaykv::{DB, Options};
    ///
    /// # fn main() -> Result<(), swaykv::Error> {
    /// let db = DB::open("./my_database", Options::default().map_size(1 << 20))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        let (core, signals) = Core::open(path.as_ref(), options)?;
        Self::start(core, signals)
    }

    /// Opens a database whose segments live in memory. Nothing is written
    /// to disk and the contents are lost on close.
    ///
    /// # Example
    ///
    /// ```
    /// use swaykv::{DB, Options};
    ///
    /// let db = DB::open_in_memory(Options::default()).unwrap();
    /// db.put(b"k", b"v").unwrap();
    /// assert_eq!(db.get(b"k").unwrap().as_deref(), Some(&b"v"[..]));
    /// ```
    pub fn open_in_memory(options: Options) -> Result<Self> {
        let (core, signals) = Core::open_in_memory(options)?;
        Self::start(core, signals)
    }

    fn start(core: Arc<Core>, signals: Receiver<Signal>) -> Result<Self> {
        let scheduler = Scheduler::start(Arc::clone(&core), signals)?;
        Ok(DB { core, scheduler: Mutex::new(Some(scheduler)) })
    }

    // ===== Writes =====

    /// Inserts or replaces a value.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.core.commit_one(Prepare::Put { key: key.to_vec(), value: value.to_vec(), deadline: None })
    }

    /// Inserts or replaces a value that expires at `deadline`.
    pub fn put_with_deadline(&self, key: &[u8], value: &[u8], deadline: Deadline) -> Result<()> {
        self.core.commit_one(Prepare::Put { key: key.to_vec(), value: value.to_vec(), deadline: Some(deadline) })
    }

    /// Writes every pair in one atomic batch.
    pub fn put_all<I, K, V>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut batch = WriteBatch::new();
        for (key, value) in entries {
            batch.put(key.as_ref(), value.as_ref());
        }
        self.commit(batch)
    }

    /// Updates every pair in one atomic batch. Absent keys stay absent.
    pub fn update_all<I, K, V>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut batch = WriteBatch::new();
        for (key, value) in entries {
            batch.update(key.as_ref(), value.as_ref());
        }
        self.commit(batch)
    }

    /// Removes a key.
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        self.core.commit_one(Prepare::Remove { key: key.to_vec() })
    }

    /// Atomically removes every key in `[from, to]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `to` orders before `from`.
    pub fn remove_range(&self, from: &[u8], to: &[u8]) -> Result<()> {
        self.core.commit_one(Prepare::RemoveRange { from: from.to_vec(), to: to.to_vec() })
    }

    /// Replaces the value of an existing key, keeping its deadline. Does
    /// nothing if the key is absent.
    pub fn update(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.core.commit_one(Prepare::Update { key: key.to_vec(), value: value.to_vec() })
    }

    /// Sets the deadline of an existing key. A past deadline removes it.
    pub fn expire(&self, key: &[u8], deadline: Deadline) -> Result<()> {
        self.core.commit_one(Prepare::Expire { key: key.to_vec(), deadline })
    }

    /// Adds a set member.
    pub fn add(&self, key: &[u8]) -> Result<()> {
        self.core.commit_one(Prepare::Add { key: key.to_vec(), deadline: None })
    }

    /// Adds a set member that expires at `deadline`.
    pub fn add_with_deadline(&self, key: &[u8], deadline: Deadline) -> Result<()> {
        self.core.commit_one(Prepare::Add { key: key.to_vec(), deadline: Some(deadline) })
    }

    /// Removes every key.
    pub fn clear(&self) -> Result<()> {
        self.core.clear()
    }

    /// Removes, in one batch, every entry for which `keep` returns false.
    pub fn retain<F>(&self, keep: F) -> Result<()>
    where
        F: Fn(&[u8], &[u8]) -> bool,
    {
        let mut batch = WriteBatch::new();
        self.stream().foreach(|key, value| {
            if !keep(key, value) {
                batch.remove(key);
            }
        })?;
        self.commit(batch)
    }

    /// Applies all operations in a batch atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BatchAborted`] naming the first malformed operation;
    /// nothing in the batch is applied.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use swaykv::{DB, Options, WriteBatch};
    ///
    /// # fn main() -> Result<(), swaykv::Error> {
    /// let db = DB::open("./data", Options::default())?;
    ///
    /// let mut batch = WriteBatch::new();
    /// batch.put(b"key1", b"value1").put(b"key2", b"value2").remove(b"key3");
    ///
    /// db.commit(batch)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn commit(&self, batch: WriteBatch) -> Result<()> {
        self.core.commit(batch)
    }

    /// Commits a batch on a worker thread. The receiver yields the result
    /// once the batch is visible or has been rejected.
    pub fn commit_async(&self, batch: WriteBatch) -> Receiver<Result<()>> {
        let (tx, rx) = channel::bounded(1);
        let fallback = tx.clone();
        let core = Arc::clone(&self.core);

        let spawned = std::thread::Builder::new()
            .name("swaykv-commit".to_string())
            .spawn(move || {
                let _ = tx.send(core.commit(batch));
            });
        if let Err(e) = spawned {
            let _ = fallback.send(Err(Error::Io(e)));
        }
        rx
    }

    // ===== Functions =====

    /// Registers a value function under `id` and returns the id.
    ///
    /// Registrations are not persisted: reopen a database and register its
    /// functions again before reading keys that have pending applications.
    pub fn register_function<F>(&self, id: &[u8], function: F) -> Vec<u8>
    where
        F: Fn(&[u8]) -> FunctionOutput + Send + Sync + 'static,
    {
        let id = self.core.functions().register(id, function);
        // Flushes postponed on this function can run now.
        self.core.signal(Signal::Flush);
        id
    }

    /// Queues function `id` for `key`. The function runs on the next read of
    /// the key or when compaction reaches it.
    pub fn apply_function(&self, key: &[u8], id: &[u8]) -> Result<()> {
        self.core.commit_one(Prepare::ApplyFunction { key: key.to_vec(), function: id.to_vec() })
    }

    // ===== Reads =====

    /// Retrieves the value of a key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.core.get(key)?.map(|(value, _)| value))
    }

    /// Retrieves the value of a key together with its deadline.
    pub fn get_with_deadline(&self, key: &[u8]) -> Result<Option<(Bytes, Option<Deadline>)>> {
        self.core.get(key)
    }

    /// Returns true if the key is present.
    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.core.get(key)?.is_some())
    }

    /// Returns false only if the key is certainly absent.
    pub fn might_contain(&self, key: &[u8]) -> Result<bool> {
        self.core.might_contain(key)
    }

    /// The deadline of a key, if it is present and has one.
    pub fn expiration(&self, key: &[u8]) -> Result<Option<Deadline>> {
        Ok(self.core.get(key)?.and_then(|(_, deadline)| deadline))
    }

    /// Time until a key expires, if it is present and has a deadline.
    pub fn time_left(&self, key: &[u8]) -> Result<Option<Duration>> {
        Ok(self.expiration(key)?.map(|deadline| deadline.time_left()))
    }

    /// The first entry in key order.
    pub fn head(&self) -> Result<Option<(Bytes, Bytes)>> {
        self.stream().head()
    }

    /// The last entry in key order.
    pub fn last(&self) -> Result<Option<(Bytes, Bytes)>> {
        self.stream().reverse().head()
    }

    /// The first key in key order.
    pub fn keys_head(&self) -> Result<Option<Bytes>> {
        Ok(self.head()?.map(|(key, _)| key))
    }

    /// The last key in key order.
    pub fn keys_last(&self) -> Result<Option<Bytes>> {
        Ok(self.last()?.map(|(key, _)| key))
    }

    /// Every key, in order.
    pub fn keys(&self) -> Result<Vec<Bytes>> {
        Ok(self.entries()?.into_iter().map(|(key, _)| key).collect())
    }

    /// Every value, in key order.
    pub fn values(&self) -> Result<Vec<Bytes>> {
        Ok(self.entries()?.into_iter().map(|(_, value)| value).collect())
    }

    /// Every entry, in key order.
    pub fn entries(&self) -> Result<Vec<(Bytes, Bytes)>> {
        self.stream().materialize()
    }

    /// Number of live entries. Walks the whole keyspace.
    pub fn size(&self) -> Result<usize> {
        self.stream().count()
    }

    /// Returns true if there are no live entries.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.head()?.is_none())
    }

    /// Returns true if there is at least one live entry.
    pub fn non_empty(&self) -> Result<bool> {
        Ok(!self.is_empty()?)
    }

    /// Pins the current state for repeatable reads.
    pub fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot::new(self.core.read_view()?))
    }

    /// A lazy stream over the live entries. Each terminal operation reads
    /// the state current when it starts.
    pub fn stream(&self) -> Stream {
        Stream::live(Arc::clone(&self.core))
    }

    // ===== Meters =====

    /// Size and count of the Level Zero memtables.
    pub fn level_zero_meter(&self) -> LevelZeroMeter {
        self.core.level_zero_meter()
    }

    /// Segments and size of level `level`, or `None` outside
    /// `1..=max_levels`.
    pub fn level_meter(&self, level: usize) -> Option<LevelMeter> {
        self.core.level_meter(level)
    }

    /// Total size of all segments in bytes.
    pub fn size_of_segments(&self) -> u64 {
        self.core.size_of_segments()
    }

    // ===== Maintenance =====

    /// Seals the active memtable and writes all of Level Zero to level 1
    /// before returning.
    pub fn flush(&self) -> Result<()> {
        self.core.flush()
    }

    /// Flushes Level Zero and runs compaction until every level is within
    /// its budget.
    pub fn compact(&self) -> Result<()> {
        self.core.compact()
    }

    /// Closes the database.
    ///
    /// Waits for in-flight commits, flushes Level Zero (persistent mode),
    /// stops the background threads and syncs the log. Later operations fail
    /// with [`Error::Closed`]. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let sealed = self.core.begin_close();
        if matches!(sealed, Ok(false)) {
            return Ok(());
        }

        if let Some(mut scheduler) = self.scheduler.lock().take() {
            scheduler.shutdown(self.core.options().close_timeout);
        }
        sealed?;
        self.core.finish_close()
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("Error closing database during drop: {}", e);
        }
    }
}

impl std::fmt::Debug for DB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DB")
            .field("persistent", &self.core.is_persistent())
            .field("level_zero", &self.core.level_zero_meter())
            .field("size_of_segments", &self.core.size_of_segments())
            .finish()
    }
}
