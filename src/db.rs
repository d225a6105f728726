//! The storage engine behind [`DB`](crate::DB).
//!
//! ## State
//!
//! Readers never lock against writers. The current memtable, the sealed
//! memtables and the level [`Version`] live together in one immutable
//! [`DbState`] that is swapped as a whole:
//!
//! - a commit inserts into the active memtable and publishes its sequence
//!   range with one store to `visible_sequence`
//! - sealing swaps in a fresh memtable and appends the old one to
//!   `immutables`
//! - a flush or compaction swaps in a new version (and drops the flushed
//!   memtable) after recording the change in the appendix
//!
//! A reader loads the visible sequence first and the state second, so every
//! write at or below that sequence is in a memtable or segment it can see.
//!
//! ## Files
//!
//! ```text
//! <root>/log/NNNNNN.log          write-ahead log, one per memtable
//! <root>/appendix/MANIFEST       segment catalog
//! <dir>/segments/NNNNNN.seg      segments, for <dir> in [root] ++ other_dirs
//! ```

use crate::cache::BlockCache;
use crate::compaction::appendix::APPENDIX_DIR;
use crate::compaction::{
    Appendix, CatalogState, CompactionJob, CompactionPicker, LevelChange, SegmentSink, Version,
    VersionEdit,
};
use crate::config::{Options, RecoveryMode};
use crate::entry::{Deadline, Value};
use crate::error::{Error, Result};
use crate::function::FunctionRegistry;
use crate::iterator::{borrow_bound, Direction};
use crate::memtable::MemTable;
use crate::meter::{LevelMeter, LevelZeroMeter};
use crate::order::KeyOrder;
use crate::scheduler::Signal;
use crate::segment::{parse_segment_filename, persist, segment_path, Segment, SEGMENTS_DIR};
use crate::snapshot::ReadView;
use crate::wal::{self, list_logs, log_filename, LogBatch, LogWriter, LOG_DIR};
use crate::write_batch::{Prepare, WriteBatch};
use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering as KeyOrdering;
use std::collections::HashSet;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Level Zero and the level chain, swapped as one unit.
pub(crate) struct DbState {
    memtable: Arc<MemTable>,
    /// Sealed memtables waiting for flush, oldest first.
    immutables: Vec<Arc<MemTable>>,
    version: Arc<Version>,
}

struct WriterState {
    log: Option<LogWriter>,
}

struct JobState {
    picker: CompactionPicker,
}

/// A write after validation.
enum Op {
    Write(Bytes, Value),
    /// Tombstones every key in the range at commit time.
    RemoveRange(Bound<Bytes>, Bound<Bytes>),
}

impl Op {
    fn from_prepare(prepare: Prepare, order: &KeyOrder) -> std::result::Result<Op, String> {
        let (key, value) = match prepare {
            Prepare::Put { key, value, deadline } => (key, Value::Put { value: value.into(), deadline }),
            Prepare::Remove { key } => (key, Value::tombstone()),
            Prepare::Update { key, value } => (key, Value::Update { value: value.into(), deadline: None }),
            Prepare::Expire { key, deadline } => (key, Value::Remove { deadline: Some(deadline) }),
            Prepare::ApplyFunction { key, function } => {
                if function.is_empty() {
                    return Err("empty function id".to_string());
                }
                (key, Value::Function { id: function.into() })
            }
            Prepare::Add { key, deadline } => (key, Value::Put { value: Bytes::new(), deadline }),
            Prepare::RemoveRange { from, to } => {
                check_key(&from)?;
                check_key(&to)?;
                if order.lt(&to, &from) {
                    return Err("range start is after range end".to_string());
                }
                return Ok(Op::RemoveRange(Bound::Included(from.into()), Bound::Included(to.into())));
            }
        };
        check_key(&key)?;
        Ok(Op::Write(key.into(), value))
    }
}

fn check_key(key: &[u8]) -> std::result::Result<(), String> {
    if key.is_empty() {
        return Err("empty key".to_string());
    }
    Ok(())
}

fn above_lower(order: &KeyOrder, key: &[u8], lower: &Bound<Bytes>) -> bool {
    match lower {
        Bound::Included(b) => order.compare(key, b) != KeyOrdering::Less,
        Bound::Excluded(b) => order.compare(key, b) == KeyOrdering::Greater,
        Bound::Unbounded => true,
    }
}

fn below_upper(order: &KeyOrder, key: &[u8], upper: &Bound<Bytes>) -> bool {
    match upper {
        Bound::Included(b) => order.compare(key, b) != KeyOrdering::Greater,
        Bound::Excluded(b) => order.compare(key, b) == KeyOrdering::Less,
        Bound::Unbounded => true,
    }
}

/// Shared engine state, referenced by the handle and its background threads.
pub(crate) struct Core {
    /// Database directory; `None` for in-memory databases.
    root: Option<PathBuf>,
    /// Segment placement directories, `[root] ++ other_dirs`.
    dirs: Vec<PathBuf>,
    options: Options,
    state: RwLock<Arc<DbState>>,
    writer: Mutex<WriterState>,
    jobs: Mutex<JobState>,
    appendix: Mutex<Option<Appendix>>,
    visible_sequence: AtomicU64,
    next_file_number: AtomicU64,
    next_dir: AtomicUsize,
    functions: Arc<FunctionRegistry>,
    cache: Arc<BlockCache>,
    /// Superseded segments waiting for their last reader.
    reclaim: Mutex<Vec<Arc<Segment>>>,
    signals: Sender<Signal>,
    closed: AtomicBool,
}

impl Core {
    /// Opens or creates a persistent database, recovering the appendix and
    /// replaying unflushed logs.
    pub(crate) fn open(path: &Path, options: Options) -> Result<(Arc<Self>, Receiver<Signal>)> {
        options.validate()?;

        if !path.exists() {
            if options.create_if_missing {
                std::fs::create_dir_all(path)?;
            } else {
                return Err(Error::NotFound(format!("Database directory does not exist: {:?}", path)));
            }
        } else if options.error_if_exists {
            return Err(Error::AlreadyExists(format!("Database already exists: {:?}", path)));
        }
        log::info!("Opening database at {:?}", path);

        let mut dirs = vec![path.to_path_buf()];
        dirs.extend(options.other_dirs.iter().cloned());
        for dir in &dirs {
            std::fs::create_dir_all(dir.join(SEGMENTS_DIR))?;
        }
        let log_dir = path.join(LOG_DIR);
        std::fs::create_dir_all(&log_dir)?;

        let appendix = Appendix::open(
            &path.join(APPENDIX_DIR),
            options.mmap.appendix,
            options.appendix_flush_checkpoint_size,
        )?;
        let catalog = appendix.state().clone();
        let cache = Arc::new(BlockCache::new(options.cache_size));

        let version = open_segments(&catalog, &options, &cache)?;
        let mut next_number = catalog.next_file_number;
        for dir in &dirs {
            next_number = next_number.max(remove_orphans(dir, &catalog)?);
        }

        // Replay every log the appendix has not marked as flushed into one
        // memtable, which becomes the first sealed memtable.
        let logs = list_logs(&log_dir)?;
        let recovered_id = logs.last().map(|(number, _)| *number).unwrap_or(0);
        let recovered = MemTable::new(recovered_id, options.map_size, options.key_order.clone());
        let mut last_sequence = 0u64;
        let mut replayed = Vec::new();
        let mut dropped = 0usize;

        for (number, log_path) in logs {
            next_number = next_number.max(number + 1);
            if number <= catalog.logs_flushed {
                std::fs::remove_file(&log_path)?;
                log::debug!("Removed flushed log {:?}", log_path);
                continue;
            }

            let replay = wal::replay(&log_path, options.recovery_mode, options.mmap.maps)?;
            dropped += replay.dropped;
            for batch in replay.batches {
                let Some(entries) = decode_batch(&batch, options.recovery_mode)? else {
                    dropped += 1;
                    continue;
                };
                for (offset, (key, value)) in entries.into_iter().enumerate() {
                    recovered.insert(key, value, batch.sequence + offset as u64);
                }
                last_sequence = last_sequence.max(batch.last_sequence());
            }
            replayed.push(log_path);
        }

        if dropped > 0 {
            log::warn!("Dropped {} corrupt log records during recovery", dropped);
        }
        let immutables = if recovered.is_empty() {
            for log_path in replayed {
                std::fs::remove_file(&log_path)?;
            }
            Vec::new()
        } else {
            log::info!(
                "Recovered {} entries from the log up to sequence {}",
                recovered.len(),
                last_sequence
            );
            vec![Arc::new(recovered)]
        };

        let active = next_number;
        let log = if options.use_wal {
            Some(LogWriter::new(log_dir.join(log_filename(active)))?)
        } else {
            None
        };
        log::info!(
            "Opened database with {} segments ({} bytes)",
            version.segment_count(),
            version.total_size()
        );

        Ok(Self::assemble(
            Some(path.to_path_buf()),
            dirs,
            options,
            Some(appendix),
            cache,
            version,
            immutables,
            last_sequence,
            active,
            log,
        ))
    }

    /// Opens a database that keeps its segments in memory.
    pub(crate) fn open_in_memory(options: Options) -> Result<(Arc<Self>, Receiver<Signal>)> {
        options.validate()?;
        let cache = Arc::new(BlockCache::new(options.cache_size));
        let version = Version::new(options.max_levels, options.key_order.clone());
        log::info!("Opening in-memory database");
        Ok(Self::assemble(None, Vec::new(), options, None, cache, version, Vec::new(), 0, 1, None))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        root: Option<PathBuf>,
        dirs: Vec<PathBuf>,
        options: Options,
        appendix: Option<Appendix>,
        cache: Arc<BlockCache>,
        version: Version,
        immutables: Vec<Arc<MemTable>>,
        sequence: u64,
        active: u64,
        log: Option<LogWriter>,
    ) -> (Arc<Self>, Receiver<Signal>) {
        let (signals, receiver) = channel::unbounded();
        if !immutables.is_empty() {
            let _ = signals.send(Signal::Flush);
        }

        let memtable = Arc::new(MemTable::new(active, options.map_size, options.key_order.clone()));
        let picker = CompactionPicker::new(options.max_levels, options.key_order.clone());
        let core = Core {
            root,
            dirs,
            state: RwLock::new(Arc::new(DbState { memtable, immutables, version: Arc::new(version) })),
            writer: Mutex::new(WriterState { log }),
            jobs: Mutex::new(JobState { picker }),
            appendix: Mutex::new(appendix),
            visible_sequence: AtomicU64::new(sequence),
            next_file_number: AtomicU64::new(active + 1),
            next_dir: AtomicUsize::new(0),
            functions: Arc::new(FunctionRegistry::new()),
            cache,
            reclaim: Mutex::new(Vec::new()),
            signals,
            closed: AtomicBool::new(false),
            options,
        };
        (Arc::new(core), receiver)
    }

    pub(crate) fn options(&self) -> &Options {
        &self.options
    }

    pub(crate) fn cache(&self) -> &BlockCache {
        &self.cache
    }

    pub(crate) fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub(crate) fn is_persistent(&self) -> bool {
        self.root.is_some()
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Wakes the compactor. Ignored once the scheduler has stopped.
    pub(crate) fn signal(&self, signal: Signal) {
        let _ = self.signals.send(signal);
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Pins the current state at the visible sequence.
    pub(crate) fn read_view(&self) -> Result<Arc<ReadView>> {
        self.check_open()?;
        Ok(Arc::new(self.current_view()))
    }

    pub(crate) fn current_view(&self) -> ReadView {
        let sequence = self.visible_sequence.load(Ordering::Acquire);
        let state = Arc::clone(&self.state.read());

        let mut memtables = Vec::with_capacity(state.immutables.len() + 1);
        memtables.push(Arc::clone(&state.memtable));
        memtables.extend(state.immutables.iter().rev().cloned());

        ReadView {
            memtables,
            version: Arc::clone(&state.version),
            sequence,
            functions: Arc::clone(&self.functions),
            order: self.options.key_order.clone(),
        }
    }

    pub(crate) fn get(&self, key: &[u8]) -> Result<Option<(Bytes, Option<Deadline>)>> {
        self.check_open()?;
        self.current_view().get(key, Deadline::now())
    }

    pub(crate) fn might_contain(&self, key: &[u8]) -> Result<bool> {
        self.check_open()?;
        Ok(self.current_view().might_contain(key))
    }

    // ---------------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------------

    /// Validates and commits a batch.
    pub(crate) fn commit(&self, batch: WriteBatch) -> Result<()> {
        let order = &self.options.key_order;
        let ops = batch
            .into_operations()
            .into_iter()
            .enumerate()
            .map(|(index, prepare)| {
                Op::from_prepare(prepare, order).map_err(|reason| Error::BatchAborted { index, reason })
            })
            .collect::<Result<Vec<_>>>()?;
        self.write(ops)
    }

    /// Validates a single operation and commits it on its own.
    pub(crate) fn commit_one(&self, prepare: Prepare) -> Result<()> {
        let op = Op::from_prepare(prepare, &self.options.key_order).map_err(Error::invalid_argument)?;
        self.write(vec![op])
    }

    /// Removes every key.
    pub(crate) fn clear(&self) -> Result<()> {
        self.write(vec![Op::RemoveRange(Bound::Unbounded, Bound::Unbounded)])
    }

    /// Logs `ops` as one record, inserts them under consecutive sequence
    /// numbers and publishes the range at once.
    fn write(&self, ops: Vec<Op>) -> Result<()> {
        self.check_open()?;
        if ops.is_empty() {
            return Ok(());
        }
        self.brake();

        let mut writer = self.writer.lock();
        self.check_open()?;

        let entries = self.expand(ops)?;
        if entries.is_empty() {
            return Ok(());
        }

        let first = self.visible_sequence.load(Ordering::Acquire) + 1;
        let last = first + entries.len() as u64 - 1;

        if let Some(log) = writer.log.as_mut() {
            let batch = LogBatch {
                sequence: first,
                entries: entries.iter().map(|(k, v)| (k.to_vec(), v.encode().to_vec())).collect(),
            };
            log.append(&batch.encode()?)?;
            if self.options.sync_wal {
                log.sync()?;
            } else {
                log.flush()?;
            }
        }

        let memtable = Arc::clone(&self.state.read().memtable);
        for (offset, (key, value)) in entries.into_iter().enumerate() {
            memtable.insert(key, value, first + offset as u64);
        }
        self.visible_sequence.store(last, Ordering::Release);

        if memtable.should_seal() {
            self.seal(&mut writer, false)?;
        }
        Ok(())
    }

    /// Turns range removals into tombstones for every key present in the
    /// range, including keys written earlier in the same batch.
    fn expand(&self, ops: Vec<Op>) -> Result<Vec<(Bytes, Value)>> {
        let mut entries: Vec<(Bytes, Value)> = Vec::with_capacity(ops.len());
        let order = &self.options.key_order;

        for op in ops {
            match op {
                Op::Write(key, value) => entries.push((key, value)),
                Op::RemoveRange(lower, upper) => {
                    let mut doomed: Vec<Bytes> = entries
                        .iter()
                        .filter(|(k, _)| above_lower(order, k, &lower) && below_upper(order, k, &upper))
                        .map(|(k, _)| k.clone())
                        .collect();

                    let view = self.current_view();
                    let merged = view.merged(Direction::Forward, borrow_bound(&lower), Deadline::now())?;
                    for entry in merged {
                        let (key, value) = entry?;
                        if !below_upper(order, &key, &upper) {
                            break;
                        }
                        if value != Value::tombstone() {
                            doomed.push(key);
                        }
                    }

                    log::debug!("Range removal covers {} keys", doomed.len());
                    entries.extend(doomed.into_iter().map(|key| (key, Value::tombstone())));
                }
            }
        }
        Ok(entries)
    }

    /// Sleeps the caller if the acceleration policy asks for a brake.
    fn brake(&self) {
        let accelerator = self.options.acceleration.accelerate(&self.level_zero_meter());
        if let Some(brake) = accelerator.brake {
            log::trace!("Braking commit for {:?}", brake.delay);
            std::thread::sleep(brake.delay);
        }
    }

    /// Seals the active memtable and starts a new one with its own log.
    fn seal(&self, writer: &mut WriterState, closing: bool) -> Result<()> {
        let meter = self.level_zero_meter();
        if meter.used_map_size == 0 {
            return Ok(());
        }
        let accelerator = self.options.acceleration.accelerate(&meter);
        let number = self.next_file_number.fetch_add(1, Ordering::SeqCst);

        if let Some(log) = writer.log.as_mut() {
            log.sync()?;
        }
        writer.log = match (&self.root, closing || !self.options.use_wal) {
            (Some(root), false) => Some(LogWriter::new(root.join(LOG_DIR).join(log_filename(number)))?),
            _ => None,
        };

        let fresh = Arc::new(MemTable::new(number, accelerator.next_map_size, self.options.key_order.clone()));
        let sealed = {
            let mut state = self.state.write();
            let mut immutables = state.immutables.clone();
            immutables.push(Arc::clone(&state.memtable));
            let next = DbState { memtable: fresh, immutables, version: Arc::clone(&state.version) };
            std::mem::replace(&mut *state, Arc::new(next))
        };
        log::debug!(
            "Sealed memtable {} ({} bytes), {} memtables waiting for flush",
            sealed.memtable.id(),
            meter.used_map_size,
            sealed.immutables.len() + 1
        );

        self.signal(Signal::Flush);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Background jobs
    // ---------------------------------------------------------------------

    /// Flushes every sealed memtable, then runs compaction tasks until the
    /// picker finds nothing to do.
    pub(crate) fn run_jobs(&self) -> Result<()> {
        let mut jobs = self.jobs.lock();
        self.flush_immutables()?;

        loop {
            let version = Arc::clone(&self.state.read().version);
            let now = Deadline::now();
            let Some(task) = jobs.picker.pick(&version, &self.options, now) else {
                break;
            };
            let change = CompactionJob::new(&self.options, Arc::clone(&self.functions), self, now)
                .run(&task, &version)?;
            self.install(change, None)?;
        }
        Ok(())
    }

    /// Seals the active memtable and flushes Level Zero on the calling thread.
    pub(crate) fn flush(&self) -> Result<()> {
        self.check_open()?;
        {
            let mut writer = self.writer.lock();
            self.seal(&mut writer, false)?;
        }
        let _jobs = self.jobs.lock();
        self.flush_immutables()
    }

    /// Runs flushes and compactions on the calling thread.
    pub(crate) fn compact(&self) -> Result<()> {
        self.check_open()?;
        self.run_jobs()
    }

    /// Callers hold the jobs lock.
    fn flush_immutables(&self) -> Result<()> {
        loop {
            let (table, version) = {
                let state = self.state.read();
                match state.immutables.first() {
                    Some(table) => (Arc::clone(table), Arc::clone(&state.version)),
                    None => return Ok(()),
                }
            };
            let change = CompactionJob::new(&self.options, Arc::clone(&self.functions), self, Deadline::now())
                .flush(&table, &version)?;
            self.install(change, Some(&table))?;
        }
    }

    /// Records a change in the appendix, then makes it visible.
    fn install(&self, change: LevelChange, flushed: Option<&Arc<MemTable>>) -> Result<()> {
        let current = Arc::clone(&self.state.read().version);
        let version = Arc::new(current.apply(&change)?);

        let removed_ids: HashSet<u64> = change.removed.iter().map(|(_, s)| s.id()).collect();
        let added_ids: HashSet<u64> = change.added.iter().map(|(_, s)| s.id()).collect();

        if let Err(e) = self.record(&change, flushed) {
            for (_, segment) in &change.added {
                if !removed_ids.contains(&segment.id()) {
                    segment.mark_obsolete();
                }
            }
            return Err(e);
        }

        {
            let mut state = self.state.write();
            let mut immutables = state.immutables.clone();
            if let Some(table) = flushed {
                immutables.retain(|t| !Arc::ptr_eq(t, table));
            }
            let next = DbState { memtable: Arc::clone(&state.memtable), immutables, version };
            *state = Arc::new(next);
        }

        for (_, segment) in change.removed {
            if !added_ids.contains(&segment.id()) {
                self.retire(segment);
            }
        }
        if let Some(table) = flushed {
            self.delete_logs(table.id());
        }
        Ok(())
    }

    fn record(&self, change: &LevelChange, flushed: Option<&Arc<MemTable>>) -> Result<()> {
        let mut appendix = self.appendix.lock();
        let Some(appendix) = appendix.as_mut() else {
            return Ok(());
        };

        let mut edits = Vec::with_capacity(change.added.len() + change.removed.len() + 2);
        for (level, segment) in &change.removed {
            edits.push(VersionEdit::RemoveSegment { level: *level, id: segment.id() });
        }
        for (level, segment) in &change.added {
            let dir = segment
                .path()
                .and_then(Path::parent)
                .and_then(Path::parent)
                .ok_or_else(|| Error::internal(format!("Segment {} has no file", segment.id())))?;
            edits.push(VersionEdit::AddSegment {
                level: *level,
                id: segment.id(),
                dir: dir.to_path_buf(),
                size: segment.size(),
                min_key: segment.min_key().to_vec(),
                max_key: segment.max_key().to_vec(),
            });
        }
        edits.push(VersionEdit::NextFileNumber(self.next_file_number.load(Ordering::SeqCst)));
        if let Some(table) = flushed {
            edits.push(VersionEdit::LogsFlushed(table.id()));
        }
        appendix.append(&edits)
    }

    fn retire(&self, segment: Arc<Segment>) {
        if self.options.delete_segments_eventually {
            self.reclaim.lock().push(segment);
        } else {
            segment.mark_obsolete();
        }
    }

    /// Deletes queued segments no reader holds anymore.
    pub(crate) fn reclaim_segments(&self) -> usize {
        let mut queue = self.reclaim.lock();
        let before = queue.len();
        queue.retain(|segment| {
            if Arc::strong_count(segment) > 1 {
                return true;
            }
            segment.mark_obsolete();
            false
        });
        before - queue.len()
    }

    fn delete_logs(&self, up_to: u64) {
        let Some(root) = &self.root else {
            return;
        };
        let logs = match list_logs(&root.join(LOG_DIR)) {
            Ok(logs) => logs,
            Err(e) => {
                log::warn!("Failed to list logs: {}", e);
                return;
            }
        };
        for (number, path) in logs.into_iter().filter(|(number, _)| *number <= up_to) {
            match std::fs::remove_file(&path) {
                Ok(()) => log::debug!("Removed flushed log {}", number),
                Err(e) => log::warn!("Failed to remove log {:?}: {}", path, e),
            }
        }
    }

    /// Closes the least recently used segment handles beyond
    /// `max_open_segments` and reclaims superseded segments.
    pub(crate) fn sweep_segments(&self) {
        let version = Arc::clone(&self.state.read().version);
        let mut open: Vec<&Arc<Segment>> = version.segments().filter(|s| s.is_open()).collect();

        let limit = self.options.max_open_segments;
        if open.len() > limit {
            open.sort_by_key(|s| s.last_access());
            let excess = open.len() - limit;
            let closed = open[..excess].iter().filter(|s| s.close_handle()).count();
            log::debug!("Closed {} idle segment handles", closed);
        }

        let reclaimed = self.reclaim_segments();
        if reclaimed > 0 {
            log::debug!("Reclaimed {} superseded segments", reclaimed);
        }
    }

    // ---------------------------------------------------------------------
    // Meters
    // ---------------------------------------------------------------------

    pub(crate) fn level_zero_meter(&self) -> LevelZeroMeter {
        let state = self.state.read();
        LevelZeroMeter {
            default_map_size: self.options.map_size,
            current_map_size: state.memtable.map_size(),
            used_map_size: state.memtable.approximate_size(),
            maps_count: state.immutables.len() + 1,
        }
    }

    pub(crate) fn level_meter(&self, level: usize) -> Option<LevelMeter> {
        if level == 0 || level > self.options.max_levels {
            return None;
        }
        let version = Arc::clone(&self.state.read().version);
        Some(LevelMeter {
            level_number: level,
            segments_count: version.level(level).len(),
            open_segments: version.level(level).iter().filter(|s| s.is_open()).count(),
            level_size: version.level_size(level),
            budget: self.options.level_budget(level),
        })
    }

    pub(crate) fn size_of_segments(&self) -> u64 {
        self.state.read().version.total_size()
    }

    // ---------------------------------------------------------------------
    // Shutdown
    // ---------------------------------------------------------------------

    /// Rejects new operations, waits for in-flight commits and seals the
    /// active memtable. Returns false if the database was already closed.
    pub(crate) fn begin_close(&self) -> Result<bool> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        let mut writer = self.writer.lock();
        if self.is_persistent() {
            self.seal(&mut writer, true)?;
        }
        Ok(true)
    }

    /// Flushes Level Zero (persistent mode) and drains the reclamation
    /// queue. Runs after the background threads have stopped or been
    /// detached. A job still running after `close_timeout` keeps Level Zero
    /// unflushed; its logs are replayed on the next open.
    pub(crate) fn finish_close(&self) -> Result<()> {
        if self.is_persistent() {
            match self.jobs.try_lock_for(self.options.close_timeout) {
                Some(_jobs) => match self.flush_immutables() {
                    Ok(()) => {}
                    Err(Error::FunctionNotFound(id)) => {
                        log::warn!("Function {} is not registered; unflushed entries stay in the log", id);
                    }
                    Err(e) => return Err(e),
                },
                None => log::warn!(
                    "A background job is still running after {:?}; unflushed entries stay in the log",
                    self.options.close_timeout
                ),
            }
            if let Some(log) = self.writer.lock().log.as_mut() {
                log.sync()?;
            }
        }

        for segment in self.reclaim.lock().drain(..) {
            segment.mark_obsolete();
        }
        log::info!("Database closed");
        Ok(())
    }
}

impl SegmentSink for Core {
    fn create(&self, data: Bytes) -> Result<Arc<Segment>> {
        let id = self.next_file_number.fetch_add(1, Ordering::SeqCst);
        let order = self.options.key_order.clone();

        let segment = if self.dirs.is_empty() {
            Segment::from_bytes(id, data, order, Arc::clone(&self.cache))?
        } else {
            let dir = &self.dirs[self.next_dir.fetch_add(1, Ordering::Relaxed) % self.dirs.len()];
            let path = segment_path(dir, id);
            persist(&path, &data)?;
            Segment::open(id, path, self.options.mmap.segments, order, Arc::clone(&self.cache))?
        };
        log::debug!("Created segment {} ({} bytes)", id, segment.size());
        Ok(Arc::new(segment))
    }
}

/// Opens every segment the appendix lists.
fn open_segments(catalog: &CatalogState, options: &Options, cache: &Arc<BlockCache>) -> Result<Version> {
    let mut segments = Vec::with_capacity(catalog.segments.len());
    for (id, record) in &catalog.segments {
        if record.level == 0 || record.level > options.max_levels {
            return Err(Error::corruption(format!(
                "Segment {} is in level {}, outside 1..={}",
                id, record.level, options.max_levels
            )));
        }
        let path = segment_path(&record.dir, *id);
        if !path.exists() {
            return Err(Error::corruption(format!("Segment file missing: {:?}", path)));
        }
        let segment = Segment::open(*id, path, options.mmap.segments, options.key_order.clone(), Arc::clone(cache))?;
        segments.push((record.level, Arc::new(segment)));
    }
    Version::from_segments(options.max_levels, options.key_order.clone(), segments)
}

/// Deletes segment files the appendix does not reference. Returns the file
/// number after the highest one seen.
fn remove_orphans(dir: &Path, catalog: &CatalogState) -> Result<u64> {
    let mut next = 0;
    for entry in std::fs::read_dir(dir.join(SEGMENTS_DIR))? {
        let entry = entry?;
        let Some(id) = entry.file_name().to_str().and_then(parse_segment_filename) else {
            continue;
        };
        next = next.max(id + 1);

        if !catalog.segments.contains_key(&id) {
            log::warn!("Removing orphan segment {:?}", entry.path());
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(next)
}

/// Decodes the values of a logged batch. A batch with an undecodable value
/// is dropped whole under `DropCorruptedTailEntries`.
fn decode_batch(batch: &LogBatch, mode: RecoveryMode) -> Result<Option<Vec<(Bytes, Value)>>> {
    let mut entries = Vec::with_capacity(batch.entries.len());
    for (key, value) in &batch.entries {
        match Value::decode(&Bytes::copy_from_slice(value)) {
            Ok(value) => entries.push((Bytes::copy_from_slice(key), value)),
            Err(e) => match mode {
                RecoveryMode::ReportFailure => return Err(e),
                RecoveryMode::DropCorruptedTailEntries => {
                    log::warn!("Dropping log batch at sequence {}: {}", batch.sequence, e);
                    return Ok(None);
                }
            },
        }
    }
    Ok(Some(entries))
}
