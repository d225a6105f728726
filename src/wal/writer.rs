//! WAL writer implementation.

use super::record::{Record, RecordType, MAX_RECORD_SIZE};
use crate::error::Result;
use bytes::{Bytes, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Appends records to one log file.
pub struct LogWriter {
    /// Path to the log file
    path: PathBuf,
    /// Buffered writer for efficient I/O
    writer: BufWriter<File>,
    /// Current file size
    file_size: u64,
}

impl LogWriter {
    /// Opens the log file in append mode, creating it if it doesn't exist.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let file_size = file.metadata()?.len();

        Ok(Self { path, writer: BufWriter::new(file), file_size })
    }

    /// Appends one payload, split into fragments of at most
    /// [`MAX_RECORD_SIZE`] bytes.
    pub fn append(&mut self, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Ok(());
        }

        let payload = Bytes::copy_from_slice(payload);
        let mut encoded = BytesMut::new();
        let mut offset = 0;
        while offset < payload.len() {
            let chunk = (payload.len() - offset).min(MAX_RECORD_SIZE);
            let record_type = RecordType::for_fragment(offset, chunk, payload.len());
            Record::new(record_type, payload.slice(offset..offset + chunk)).encode_into(&mut encoded);
            offset += chunk;
        }

        // One write call per batch so a crash tears at most the tail batch.
        self.writer.write_all(&encoded)?;
        self.file_size += encoded.len() as u64;
        Ok(())
    }

    /// Pushes buffered records to the OS without fsync.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flushes and fsyncs the log.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Get the current file size
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Get the path to the log file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            log::warn!("Failed to flush log {:?} on drop: {}", self.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::record::HEADER_SIZE;
    use tempfile::TempDir;

    #[test]
    fn test_writer_append_small() {
        let dir = TempDir::new().unwrap();
        let mut writer = LogWriter::new(dir.path().join("000001.log")).unwrap();

        writer.append(b"hello").unwrap();
        writer.sync().unwrap();
        assert_eq!(writer.file_size(), (HEADER_SIZE + 5) as u64);
        assert_eq!(std::fs::metadata(writer.path()).unwrap().len(), writer.file_size());
    }

    #[test]
    fn test_writer_fragments_large_payload() {
        let dir = TempDir::new().unwrap();
        let mut writer = LogWriter::new(dir.path().join("000001.log")).unwrap();

        let payload = vec![7u8; MAX_RECORD_SIZE * 2 + 10];
        writer.append(&payload).unwrap();
        assert_eq!(writer.file_size(), (payload.len() + 3 * HEADER_SIZE) as u64);
    }

    #[test]
    fn test_writer_reopen_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000001.log");
        {
            let mut writer = LogWriter::new(&path).unwrap();
            writer.append(b"one").unwrap();
        }
        let writer = LogWriter::new(&path).unwrap();
        assert_eq!(writer.file_size(), (HEADER_SIZE + 3) as u64);
    }
}
