//! Where a segment's bytes live.
//!
//! Persistent segments open their file lazily on first read and can be
//! closed again by the segment sweeper; memory segments hold their bytes.

use crate::error::{Error, Result};
use bytes::Bytes;
use memmap2::Mmap;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const MAX_OPEN_RETRIES: u32 = 6;
const INITIAL_BACKOFF: Duration = Duration::from_millis(2);

/// Recency clock shared by all file sources.
static ACCESS_CLOCK: AtomicU64 = AtomicU64::new(1);

enum Handle {
    Mapped(Mmap),
    Plain(File),
}

/// A segment file opened on demand.
pub(crate) struct FileSource {
    path: PathBuf,
    mmap: bool,
    /// Only guards opening and closing; reads run on a cloned handle.
    handle: Mutex<Option<Arc<Handle>>>,
    last_access: AtomicU64,
}

/// Backing storage of a segment.
pub(crate) enum SegmentSource {
    Memory(Bytes),
    File(FileSource),
}

impl SegmentSource {
    pub(crate) fn file(path: PathBuf, mmap: bool) -> Self {
        SegmentSource::File(FileSource {
            path,
            mmap,
            handle: Mutex::new(None),
            last_access: AtomicU64::new(0),
        })
    }

    /// Reads `len` bytes at `offset`.
    pub(crate) fn read(&self, offset: u64, len: usize) -> Result<Bytes> {
        match self {
            SegmentSource::Memory(bytes) => {
                let start = offset as usize;
                let end = start
                    .checked_add(len)
                    .filter(|end| *end <= bytes.len())
                    .ok_or_else(|| Error::corruption("Read past the end of a segment"))?;
                Ok(bytes.slice(start..end))
            }
            SegmentSource::File(source) => source.read(offset, len),
        }
    }

    /// Closes an open file handle. Returns true if one was open.
    pub(crate) fn close(&self) -> bool {
        match self {
            SegmentSource::Memory(_) => false,
            SegmentSource::File(source) => source.handle.lock().take().is_some(),
        }
    }

    /// True if reads will not have to open the file first.
    pub(crate) fn is_open(&self) -> bool {
        match self {
            SegmentSource::Memory(_) => false,
            SegmentSource::File(source) => source.handle.lock().is_some(),
        }
    }

    /// Recency stamp of the last read, 0 if never read.
    pub(crate) fn last_access(&self) -> u64 {
        match self {
            SegmentSource::Memory(_) => 0,
            SegmentSource::File(source) => source.last_access.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn path(&self) -> Option<&Path> {
        match self {
            SegmentSource::Memory(_) => None,
            SegmentSource::File(source) => Some(&source.path),
        }
    }
}

impl FileSource {
    fn read(&self, offset: u64, len: usize) -> Result<Bytes> {
        self.last_access
            .store(ACCESS_CLOCK.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);

        let handle = {
            let mut guard = self.handle.lock();
            match guard.as_ref() {
                Some(handle) => Arc::clone(handle),
                None => {
                    let handle = Arc::new(self.open_with_retry()?);
                    *guard = Some(Arc::clone(&handle));
                    handle
                }
            }
        };

        match handle.as_ref() {
            Handle::Mapped(map) => {
                let start = offset as usize;
                let end = start
                    .checked_add(len)
                    .filter(|end| *end <= map.len())
                    .ok_or_else(|| Error::corruption(format!("Read past the end of {:?}", self.path)))?;
                Ok(Bytes::copy_from_slice(&map[start..end]))
            }
            Handle::Plain(file) => {
                let mut buf = vec![0u8; len];
                read_exact_at(file, &mut buf, offset)?;
                Ok(Bytes::from(buf))
            }
        }
    }

    fn open_with_retry(&self) -> Result<Handle> {
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 0;
        loop {
            match self.open() {
                Err(e) if e.is_handle_exhaustion() && attempt < MAX_OPEN_RETRIES => {
                    log::warn!("Out of file handles opening {:?}, retrying in {:?}", self.path, backoff);
                    std::thread::sleep(backoff);
                    backoff *= 2;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn open(&self) -> Result<Handle> {
        let file = File::open(&self.path)?;
        if self.mmap {
            // SAFETY: segment files are immutable once written and are only
            // deleted after every reader has dropped the segment.
            let map = unsafe { Mmap::map(&file)? };
            Ok(Handle::Mapped(map))
        } else {
            Ok(Handle::Plain(file))
        }
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    std::os::unix::fs::FileExt::read_exact_at(file, buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset)? {
            0 => return Err(std::io::ErrorKind::UnexpectedEof.into()),
            n => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
        }
    }
    Ok(())
}

/// Writes a finished segment to `path` and syncs it.
pub(crate) fn persist(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}
