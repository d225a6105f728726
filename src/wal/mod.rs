//! Write-Ahead Log (WAL) implementation.
//!
//! Every committed batch is appended to the log of the active memtable before
//! it becomes visible. On open, logs that were not yet flushed into a segment
//! are replayed to rebuild Level Zero.
//!
//! ## Architecture
//!
//! - **Record Format**: Each batch is encoded as records with CRC32 checksums
//! - **Fragmentation**: Large batches are split into multiple records
//! - **Recovery**: [`RecoveryMode`] decides whether damage aborts the open or
//!   is skipped
//! - **Reclamation**: A log is deleted once its memtable has been flushed
//!
//! ## Usage
//!
//! ```rust,no_run
//! use swaykv::wal::{self, LogBatch, LogWriter};
//! use swaykv::RecoveryMode;
//!
//! # fn main() -> Result<(), swaykv::Error> {
//! let mut writer = LogWriter::new("000001.log")?;
//! let batch = LogBatch { sequence: 1, entries: vec![(b"key1".to_vec(), b"\x00\x00v".to_vec())] };
//! writer.append(&batch.encode()?)?;
//! writer.sync()?;
//!
//! let replay = wal::replay("000001.log", RecoveryMode::ReportFailure, false)?;
//! assert_eq!(replay.batches.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod reader;
pub mod record;
pub mod writer;

pub use reader::{LogBytes, LogReader};
pub use record::{Record, RecordType};
pub use writer::LogWriter;

/// Name of the log directory inside the database directory.
pub const LOG_DIR: &str = "log";

use crate::config::RecoveryMode;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One committed batch as stored in the log.
///
/// Entry `i` carries sequence `sequence + i`; values are encoded
/// [`Value`](crate::Value)s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogBatch {
    /// Sequence of the first entry.
    pub sequence: u64,
    /// Key and encoded value per operation, in commit order.
    pub entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl LogBatch {
    /// Serializes the batch for [`LogWriter::append`].
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Parses a payload produced by [`LogBatch::encode`].
    pub fn decode(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| Error::corruption(format!("Bad log batch: {}", e)))
    }

    /// Sequence of the last entry.
    pub fn last_sequence(&self) -> u64 {
        self.sequence + self.entries.len().saturating_sub(1) as u64
    }
}

/// Batches recovered from one log file.
#[derive(Debug, Default)]
pub struct Replay {
    /// Intact batches in commit order.
    pub batches: Vec<LogBatch>,
    /// Records or payloads skipped as corrupt.
    pub dropped: usize,
}

/// Replays a log file under the given recovery mode.
pub fn replay<P: AsRef<Path>>(path: P, mode: RecoveryMode, mmap: bool) -> Result<Replay> {
    let bytes = LogBytes::load(path, mmap)?;
    let mut reader = LogReader::new(&bytes, mode);
    let mut batches = Vec::new();

    while let Some(payload) = reader.read_next()? {
        match LogBatch::decode(&payload) {
            Ok(batch) => batches.push(batch),
            Err(e) => reader.skip(e)?,
        }
    }

    Ok(Replay { batches, dropped: reader.dropped() })
}

/// Generate a log filename for a given file number
pub fn log_filename(number: u64) -> String {
    format!("{:06}.log", number)
}

/// Parse a log filename to extract the file number
pub fn parse_log_filename(filename: &str) -> Option<u64> {
    filename.strip_suffix(".log")?.parse().ok()
}

/// Lists the log files in `dir`, ordered by file number.
pub fn list_logs(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut logs = Vec::new();
    if !dir.exists() {
        return Ok(logs);
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(number) = entry.file_name().to_str().and_then(parse_log_filename) {
            logs.push((number, entry.path()));
        }
    }
    logs.sort_by_key(|(number, _)| *number);
    Ok(logs)
}
