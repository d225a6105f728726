//! Appendix: the persistent segment catalog.
//!
//! The appendix records every change to the level chain as a JSON line. One
//! line holds one group of edits, written with a single `write_all` and
//! synced, so a flush or compaction install is atomic. Once the file grows
//! past the checkpoint size it is rewritten as a single group describing the
//! live state.

use crate::error::{Error, Result};
use crate::wal::LogBytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Name of the appendix directory inside the database directory.
pub const APPENDIX_DIR: &str = "appendix";

const MANIFEST: &str = "MANIFEST";
const MANIFEST_TMP: &str = "MANIFEST.tmp";

/// One change to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionEdit {
    /// A segment joined a level.
    AddSegment {
        /// Level the segment is in
        level: usize,
        /// Segment id
        id: u64,
        /// Storage directory holding `segments/<id>.seg`
        dir: PathBuf,
        /// Size of the segment in bytes
        size: u64,
        /// Smallest key in the segment
        min_key: Vec<u8>,
        /// Largest key in the segment
        max_key: Vec<u8>,
    },
    /// A segment left a level.
    RemoveSegment {
        /// Level the segment was in
        level: usize,
        /// Segment id
        id: u64,
    },
    /// Set the next file number
    NextFileNumber(u64),
    /// Every log up to and including this file number has been flushed.
    LogsFlushed(u64),
}

/// Catalog entry of a live segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRecord {
    /// Level the segment is in
    pub level: usize,
    /// Storage directory
    pub dir: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Smallest key
    pub min_key: Vec<u8>,
    /// Largest key
    pub max_key: Vec<u8>,
}

/// Catalog state rebuilt from the appendix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogState {
    /// Live segments by id.
    pub segments: BTreeMap<u64, SegmentRecord>,
    /// Next unused file number.
    pub next_file_number: u64,
    /// Highest flushed log file number.
    pub logs_flushed: u64,
}

impl CatalogState {
    fn apply(&mut self, edit: &VersionEdit) -> Result<()> {
        match edit {
            VersionEdit::AddSegment { level, id, dir, size, min_key, max_key } => {
                self.segments.insert(
                    *id,
                    SegmentRecord {
                        level: *level,
                        dir: dir.clone(),
                        size: *size,
                        min_key: min_key.clone(),
                        max_key: max_key.clone(),
                    },
                );
            }
            VersionEdit::RemoveSegment { level, id } => match self.segments.remove(id) {
                Some(record) if record.level == *level => {}
                _ => {
                    return Err(Error::corruption(format!(
                        "Appendix removes segment {} from level {} where it is not",
                        id, level
                    )))
                }
            },
            VersionEdit::NextFileNumber(number) => {
                self.next_file_number = self.next_file_number.max(*number);
            }
            VersionEdit::LogsFlushed(number) => {
                self.logs_flushed = self.logs_flushed.max(*number);
            }
        }
        Ok(())
    }

    /// The live state as a single edit group.
    fn checkpoint(&self) -> Vec<VersionEdit> {
        let mut edits: Vec<VersionEdit> = self
            .segments
            .iter()
            .map(|(id, record)| VersionEdit::AddSegment {
                level: record.level,
                id: *id,
                dir: record.dir.clone(),
                size: record.size,
                min_key: record.min_key.clone(),
                max_key: record.max_key.clone(),
            })
            .collect();
        edits.push(VersionEdit::NextFileNumber(self.next_file_number));
        edits.push(VersionEdit::LogsFlushed(self.logs_flushed));
        edits
    }
}

/// Appends edit groups to the catalog file.
#[derive(Debug)]
pub struct Appendix {
    dir: PathBuf,
    file: File,
    size: u64,
    checkpoint_size: u64,
    state: CatalogState,
}

impl Appendix {
    /// Opens (or creates) the appendix in `dir` and replays it.
    pub fn open(dir: &Path, mmap: bool, checkpoint_size: u64) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(MANIFEST);

        let (state, intact) = if path.exists() {
            log::info!("Recovering appendix: {:?}", path);
            replay(&path, mmap)?
        } else {
            log::info!("Creating new appendix: {:?}", path);
            (CatalogState { next_file_number: 1, ..CatalogState::default() }, 0)
        };

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        if file.metadata()?.len() > intact {
            file.set_len(intact)?;
        }
        let size = intact;
        Ok(Self { dir: dir.to_path_buf(), file, size, checkpoint_size, state })
    }

    /// Durably records one group of edits.
    pub fn append(&mut self, edits: &[VersionEdit]) -> Result<()> {
        if edits.is_empty() {
            return Ok(());
        }

        let mut next = self.state.clone();
        for edit in edits {
            next.apply(edit)?;
        }

        let mut line = serde_json::to_vec(edits)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.sync_data()?;
        self.size += line.len() as u64;
        self.state = next;

        if self.size > self.checkpoint_size {
            self.checkpoint()?;
        }
        Ok(())
    }

    /// Rewrites the appendix as one group holding the live state.
    pub fn checkpoint(&mut self) -> Result<()> {
        let tmp = self.dir.join(MANIFEST_TMP);
        let path = self.dir.join(MANIFEST);

        let mut line = serde_json::to_vec(&self.state.checkpoint())?;
        line.push(b'\n');
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&line)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &path)?;

        self.file = OpenOptions::new().append(true).open(&path)?;
        self.size = line.len() as u64;
        log::debug!("Appendix checkpointed: {} segments, {} bytes", self.state.segments.len(), self.size);
        Ok(())
    }

    /// Current catalog state.
    pub fn state(&self) -> &CatalogState {
        &self.state
    }

    /// Size of the appendix file in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Replays the appendix. Returns the state and the length of the intact
/// prefix of the file.
fn replay(path: &Path, mmap: bool) -> Result<(CatalogState, u64)> {
    let bytes = LogBytes::load(path, mmap)?;
    let mut state = CatalogState { next_file_number: 1, ..CatalogState::default() };
    let mut offset = 0usize;

    while offset < bytes.len() {
        let rest = &bytes[offset..];
        let Some(end) = rest.iter().position(|b| *b == b'\n') else {
            // A crash mid-append leaves a torn, unterminated last line; the
            // group it held was never acknowledged.
            log::warn!("Ignoring torn appendix tail of {} bytes", rest.len());
            break;
        };

        let line = &rest[..end];
        if !line.is_empty() {
            let group: Vec<VersionEdit> = serde_json::from_slice(line)
                .map_err(|e| Error::corruption(format!("Failed to parse appendix entry: {}", e)))?;
            for edit in &group {
                state.apply(edit)?;
            }
        }
        offset += end + 1;
    }

    log::info!("Recovered {} segments from appendix", state.segments.len());
    Ok((state, offset as u64))
}
