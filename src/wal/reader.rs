//! WAL reader implementation for recovery.

use super::record::{peek_length, Record, RecordType};
use crate::config::RecoveryMode;
use crate::error::{Error, Result};
use memmap2::Mmap;
use std::fs::File;
use std::ops::Deref;
use std::path::Path;

/// Bytes of a log file, mapped or read into memory.
pub enum LogBytes {
    /// Read-only memory map.
    Mapped(Mmap),
    /// Plain read.
    Owned(Vec<u8>),
}

impl LogBytes {
    /// Loads a whole file, mapping it when `mmap` is set.
    pub fn load<P: AsRef<Path>>(path: P, mmap: bool) -> Result<Self> {
        let path = path.as_ref();
        if !mmap {
            return Ok(LogBytes::Owned(std::fs::read(path)?));
        }

        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(LogBytes::Owned(Vec::new()));
        }
        // SAFETY: replay only reads, and no writer appends to a log while it
        // is being replayed during open.
        let map = unsafe { Mmap::map(&file)? };
        Ok(LogBytes::Mapped(map))
    }
}

impl Deref for LogBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            LogBytes::Mapped(map) => map,
            LogBytes::Owned(bytes) => bytes,
        }
    }
}

/// Reads complete payloads back out of a log, reassembling fragments.
pub struct LogReader<'a> {
    data: &'a [u8],
    position: usize,
    mode: RecoveryMode,
    dropped: usize,
}

impl<'a> LogReader<'a> {
    /// Reader over the raw bytes of one log file.
    pub fn new(data: &'a [u8], mode: RecoveryMode) -> Self {
        Self { data, position: 0, mode, dropped: 0 }
    }

    /// Read the next complete payload, or `None` at the end of the log.
    pub fn read_next(&mut self) -> Result<Option<Vec<u8>>> {
        let mut assembled: Option<Vec<u8>> = None;

        loop {
            let rest = &self.data[self.position..];
            if rest.is_empty() {
                if assembled.is_some() {
                    return self.truncated_tail("log ends inside a fragmented batch");
                }
                return Ok(None);
            }

            let length = match peek_length(rest) {
                Some(length) if length <= rest.len() => length,
                _ => return self.truncated_tail("log ends inside a record"),
            };

            let record = Record::decode(&rest[..length]);
            self.position += length;
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    self.skip(e)?;
                    assembled = None;
                    continue;
                }
            };

            match record.record_type {
                RecordType::Full => {
                    if assembled.take().is_some() {
                        self.skip(Error::corruption("fragmented batch interrupted"))?;
                    }
                    return Ok(Some(record.data.to_vec()));
                }
                RecordType::First => {
                    if assembled.is_some() {
                        self.skip(Error::corruption("fragmented batch interrupted"))?;
                    }
                    assembled = Some(record.data.to_vec());
                }
                RecordType::Middle | RecordType::Last => {
                    let Some(mut buf) = assembled.take() else {
                        self.skip(Error::corruption("continuation without a first fragment"))?;
                        continue;
                    };
                    buf.extend_from_slice(&record.data);
                    if record.record_type == RecordType::Last {
                        return Ok(Some(buf));
                    }
                    assembled = Some(buf);
                }
            }
        }
    }

    /// Applies the recovery mode to a damaged record or payload.
    pub fn skip(&mut self, error: Error) -> Result<()> {
        match self.mode {
            RecoveryMode::ReportFailure => Err(error),
            RecoveryMode::DropCorruptedTailEntries => {
                log::warn!("Dropping corrupt log entry before offset {}: {}", self.position, error);
                self.dropped += 1;
                Ok(())
            }
        }
    }

    fn truncated_tail(&mut self, reason: &str) -> Result<Option<Vec<u8>>> {
        let error = Error::corruption(format!("{} at offset {}", reason, self.position));
        self.position = self.data.len();
        self.skip(error)?;
        Ok(None)
    }

    /// Number of records or payloads skipped so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Get the current read position
    pub fn position(&self) -> usize {
        self.position
    }
}
