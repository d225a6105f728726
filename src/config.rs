//! Configuration options for the SwayKV storage engine.

use crate::meter::AccelerationPolicy;
use crate::order::KeyOrder;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration options for opening a database.
#[derive(Debug, Clone)]
pub struct Options {
    /// Create the database if it doesn't exist.
    /// Default: true
    pub create_if_missing: bool,

    /// Error if the database already exists.
    /// Default: false
    pub error_if_exists: bool,

    /// Size threshold at which the active memtable is sealed and flushed
    /// into Level 1 (in bytes).
    /// Default: 4MB
    pub map_size: usize,

    /// Target size of a segment file produced by flush or compaction.
    /// Default: 2MB
    pub segment_size: usize,

    /// Size budget of Level 1 (in bytes).
    /// Default: 10MB
    pub level_one_size: u64,

    /// Size multiplier between levels.
    /// Default: 10 (Level N+1 is 10x larger than Level N)
    pub level_size_multiplier: u64,

    /// Number of segment levels below Level Zero.
    /// Default: 7
    pub max_levels: usize,

    /// Block size for segments (in bytes).
    /// Default: 4KB
    pub block_size: usize,

    /// Block cache size (in bytes).
    /// Set to 0 to disable caching.
    /// Default: 8MB
    pub cache_size: usize,

    /// Maximum number of segment file handles kept open.
    /// Default: 1000
    pub max_open_segments: usize,

    /// Enable bloom filters for segments.
    /// Default: true
    pub use_bloom_filter: bool,

    /// Bloom filter false positive rate.
    /// Default: 0.01 (1%)
    pub bloom_filter_fp_rate: f64,

    /// Store a marker instead of a value equal to the previous value in the
    /// same block.
    /// Default: true
    pub compress_duplicate_values: bool,

    /// Compression algorithm for segments.
    /// Default: CompressionType::Snappy
    pub compression: CompressionType,

    /// Overrides block size and compression for segments written to the
    /// last level.
    /// Default: None
    pub last_level_grouping: Option<GroupingStrategy>,

    /// Queue superseded segments and delete them from the sweeper once no
    /// reader holds them, instead of as soon as the last reader drops them.
    /// Default: false
    pub delete_segments_eventually: bool,

    /// Memory-mapping toggles.
    /// Default: all enabled
    pub mmap: MmapOptions,

    /// How log replay treats corrupt records.
    /// Default: RecoveryMode::ReportFailure
    pub recovery_mode: RecoveryMode,

    /// Additional directories for segment placement. Segments are spread
    /// round-robin over the database directory and these.
    /// Default: empty
    pub other_dirs: Vec<PathBuf>,

    /// Appendix size after which it is rewritten as a checkpoint.
    /// Default: 2MB
    pub appendix_flush_checkpoint_size: u64,

    /// Interval of the block cache sweeper.
    /// Default: 5s
    pub cache_check_delay: Duration,

    /// Interval of the open segment handle sweeper.
    /// Default: 5s
    pub segments_open_check_delay: Duration,

    /// How often the compactor wakes up without a signal, to retry failed
    /// flushes and collapse expired segments.
    /// Default: 1s
    pub compaction_check_delay: Duration,

    /// Backpressure policy.
    /// Default: AccelerationPolicy::no_brakes()
    pub acceleration: AccelerationPolicy,

    /// Key comparator.
    /// Default: KeyOrder::Lexicographic
    pub key_order: KeyOrder,

    /// Enable write-ahead log (WAL).
    /// Disabling reduces durability but increases performance.
    /// Default: true
    pub use_wal: bool,

    /// Sync WAL writes to disk.
    /// Default: true
    pub sync_wal: bool,

    /// How long `close` waits for each background thread.
    /// Default: 10s
    pub close_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            map_size: 4 * 1000 * 1000, // 4MB
            segment_size: 2 * 1024 * 1024,
            level_one_size: 10 * 1024 * 1024, // 10MB
            level_size_multiplier: 10,
            max_levels: 7,
            block_size: 4 * 1024,        // 4KB
            cache_size: 8 * 1024 * 1024, // 8MB
            max_open_segments: 1000,
            use_bloom_filter: true,
            bloom_filter_fp_rate: 0.01,
            compress_duplicate_values: true,
            compression: CompressionType::default(),
            last_level_grouping: None,
            delete_segments_eventually: false,
            mmap: MmapOptions::default(),
            recovery_mode: RecoveryMode::ReportFailure,
            other_dirs: Vec::new(),
            appendix_flush_checkpoint_size: 2 * 1024 * 1024,
            cache_check_delay: Duration::from_secs(5),
            segments_open_check_delay: Duration::from_secs(5),
            compaction_check_delay: Duration::from_secs(1),
            acceleration: AccelerationPolicy::default(),
            key_order: KeyOrder::default(),
            use_wal: true,
            sync_wal: true,
            close_timeout: Duration::from_secs(10),
        }
    }
}

/// Compression algorithms supported by SwayKV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionType {
    /// No compression.
    None = 0,

    /// Snappy compression (fast, moderate compression ratio).
    #[cfg(feature = "snappy")]
    Snappy = 1,

    /// LZ4 compression (very fast, lower compression ratio).
    #[cfg(feature = "lz4-compression")]
    Lz4 = 2,
}

impl CompressionType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CompressionType::None),
            #[cfg(feature = "snappy")]
            1 => Some(CompressionType::Snappy),
            #[cfg(feature = "lz4-compression")]
            2 => Some(CompressionType::Lz4),
            _ => None,
        }
    }
}

impl Default for CompressionType {
    fn default() -> Self {
        #[cfg(feature = "snappy")]
        return CompressionType::Snappy;

        #[cfg(not(feature = "snappy"))]
        CompressionType::None
    }
}

/// How the write-ahead log is replayed on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryMode {
    /// Fail `open` on the first corrupt record.
    #[default]
    ReportFailure,

    /// Skip records that fail their checksum and stop at a truncated tail.
    DropCorruptedTailEntries,
}

/// Memory-mapping toggles for the three kinds of persisted files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmapOptions {
    /// Map write-ahead log files while replaying them.
    pub maps: bool,
    /// Map the appendix while replaying it.
    pub appendix: bool,
    /// Map segment files for reads.
    pub segments: bool,
}

impl MmapOptions {
    /// Plain file I/O everywhere.
    pub fn disabled() -> Self {
        MmapOptions { maps: false, appendix: false, segments: false }
    }
}

impl Default for MmapOptions {
    fn default() -> Self {
        MmapOptions { maps: true, appendix: true, segments: true }
    }
}

/// Block layout used for segments of the last level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupingStrategy {
    /// Block size for last level segments.
    pub block_size: usize,
    /// Compression for last level segments.
    pub compression: CompressionType,
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if it doesn't exist.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether opening an existing database is an error.
    pub fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets the memtable flush threshold.
    pub fn map_size(mut self, size: usize) -> Self {
        self.map_size = size;
        self
    }

    /// Sets the target segment size.
    pub fn segment_size(mut self, size: usize) -> Self {
        self.segment_size = size;
        self
    }

    /// Sets the Level 1 size budget.
    pub fn level_one_size(mut self, size: u64) -> Self {
        self.level_one_size = size;
        self
    }

    /// Sets the number of segment levels.
    pub fn max_levels(mut self, levels: usize) -> Self {
        self.max_levels = levels;
        self
    }

    /// Sets the block size for segments.
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the block cache size.
    pub fn cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    /// Sets the open segment handle limit.
    pub fn max_open_segments(mut self, count: usize) -> Self {
        self.max_open_segments = count;
        self
    }

    /// Sets the bloom filter false positive rate.
    pub fn bloom_filter_fp_rate(mut self, rate: f64) -> Self {
        self.bloom_filter_fp_rate = rate;
        self
    }

    /// Enables or disables duplicate value compression.
    pub fn compress_duplicate_values(mut self, value: bool) -> Self {
        self.compress_duplicate_values = value;
        self
    }

    /// Sets the compression algorithm.
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Sets the last level grouping strategy.
    pub fn last_level_grouping(mut self, grouping: GroupingStrategy) -> Self {
        self.last_level_grouping = Some(grouping);
        self
    }

    /// Enables deferred segment deletion.
    pub fn delete_segments_eventually(mut self, value: bool) -> Self {
        self.delete_segments_eventually = value;
        self
    }

    /// Sets the memory-mapping toggles.
    pub fn mmap(mut self, mmap: MmapOptions) -> Self {
        self.mmap = mmap;
        self
    }

    /// Sets the log recovery mode.
    pub fn recovery_mode(mut self, mode: RecoveryMode) -> Self {
        self.recovery_mode = mode;
        self
    }

    /// Adds a directory for segment placement.
    pub fn other_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.other_dirs.push(dir.into());
        self
    }

    /// Sets the appendix checkpoint threshold.
    pub fn appendix_flush_checkpoint_size(mut self, size: u64) -> Self {
        self.appendix_flush_checkpoint_size = size;
        self
    }

    /// Sets the block cache sweep interval.
    pub fn cache_check_delay(mut self, delay: Duration) -> Self {
        self.cache_check_delay = delay;
        self
    }

    /// Sets the open segment sweep interval.
    pub fn segments_open_check_delay(mut self, delay: Duration) -> Self {
        self.segments_open_check_delay = delay;
        self
    }

    /// Sets the idle wake-up interval of the compactor.
    pub fn compaction_check_delay(mut self, delay: Duration) -> Self {
        self.compaction_check_delay = delay;
        self
    }

    /// Sets the backpressure policy.
    pub fn acceleration(mut self, policy: AccelerationPolicy) -> Self {
        self.acceleration = policy;
        self
    }

    /// Sets the key comparator.
    pub fn key_order(mut self, order: KeyOrder) -> Self {
        self.key_order = order;
        self
    }

    /// Enables or disables the write-ahead log.
    pub fn use_wal(mut self, value: bool) -> Self {
        self.use_wal = value;
        self
    }

    /// Enables or disables fsync after each commit.
    pub fn sync_wal(mut self, value: bool) -> Self {
        self.sync_wal = value;
        self
    }

    /// Sets how long `close` waits for each background thread.
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.map_size == 0 {
            return Err(crate::Error::invalid_argument("map_size must be > 0"));
        }
        if self.segment_size == 0 {
            return Err(crate::Error::invalid_argument("segment_size must be > 0"));
        }
        if self.block_size == 0 {
            return Err(crate::Error::invalid_argument("block_size must be > 0"));
        }
        if let Some(grouping) = &self.last_level_grouping {
            if grouping.block_size == 0 {
                return Err(crate::Error::invalid_argument(
                    "last_level_grouping.block_size must be > 0",
                ));
            }
        }
        if self.max_levels == 0 {
            return Err(crate::Error::invalid_argument("max_levels must be > 0"));
        }
        if self.level_size_multiplier == 0 {
            return Err(crate::Error::invalid_argument("level_size_multiplier must be > 0"));
        }
        if self.max_open_segments == 0 {
            return Err(crate::Error::invalid_argument("max_open_segments must be > 0"));
        }
        if self.bloom_filter_fp_rate <= 0.0 || self.bloom_filter_fp_rate >= 1.0 {
            return Err(crate::Error::invalid_argument(
                "bloom_filter_fp_rate must be between 0 and 1",
            ));
        }
        if self.cache_check_delay.is_zero()
            || self.segments_open_check_delay.is_zero()
            || self.compaction_check_delay.is_zero()
        {
            return Err(crate::Error::invalid_argument("sweep intervals must be > 0"));
        }
        Ok(())
    }

    /// Size budget of a level, `level_one_size * multiplier^(level - 1)`.
    pub fn level_budget(&self, level: usize) -> u64 {
        let exp = level.saturating_sub(1) as u32;
        self.level_one_size
            .saturating_mul(self.level_size_multiplier.saturating_pow(exp))
    }
}
