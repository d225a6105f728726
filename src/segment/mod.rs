//! Segments: immutable, sorted and indexed runs of entries.
//!
//! A segment is written once by a flush or a compaction and never modified.
//! It lives in a file under `<dir>/segments/` or, for memory databases, in a
//! shared byte buffer.
//!
//! ## File Format
//!
//! ```text
//! [Data Block 1]
//! ...
//! [Data Block N]
//! [Filter Block]      // Bloom filter over every key (optional)
//! [Properties Block]  // Entry count, key range, nearest deadline, shadows
//! [Index Block]       // Last key and handle of every data block
//! [Footer: 56B]       // Handles of the three blocks above
//! ```
//!
//! Every block ends with a one byte compression tag and a CRC32 checksum.
//! Data blocks prefix-compress keys between restart points, and a value equal
//! to the previous entry's value can be stored as a duplicate marker.

pub mod block;
pub mod builder;
mod compression;
pub mod cursor;
pub mod footer;
pub mod index;
pub mod reader;
mod storage;

pub use block::{Block, BlockBuilder};
pub use builder::{SegmentBuilder, SegmentConfig};
pub use cursor::LevelCursor;
pub use footer::{BlockHandle, Footer};
pub use index::{IndexBlock, IndexEntry};
pub use reader::Segment;

pub(crate) use storage::persist;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Footer size in bytes (fixed)
pub const FOOTER_SIZE: usize = 56;

/// Magic number closing every segment ("SWAYSEGM")
pub const MAGIC: u64 = 0x5357_4159_5345_474d;

/// Compression tag plus checksum after every stored block.
pub(crate) const BLOCK_TRAILER_SIZE: usize = 5;

/// Name of the directory holding segment files inside a storage directory.
pub const SEGMENTS_DIR: &str = "segments";

/// Summary stored in every segment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentProperties {
    /// Number of entries.
    pub entry_count: u64,
    /// Smallest key.
    pub min_key: Vec<u8>,
    /// Largest key.
    pub max_key: Vec<u8>,
    /// Earliest Put deadline, in nanoseconds since the epoch.
    pub nearest_deadline: Option<u64>,
    /// Entries that are not Puts: removes, updates and function applies.
    pub shadow_entries: u64,
}

/// Generate a segment filename for a given id
pub fn segment_filename(id: u64) -> String {
    format!("{:06}.seg", id)
}

/// Parse a segment filename to extract its id
pub fn parse_segment_filename(filename: &str) -> Option<u64> {
    filename.strip_suffix(".seg")?.parse().ok()
}

/// Path of segment `id` inside storage directory `dir`.
pub fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(SEGMENTS_DIR).join(segment_filename(id))
}
