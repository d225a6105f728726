//! Block cache for segment data blocks.
//!
//! One cache is shared by all segments of a database and trimmed by the
//! memory sweeper.

mod lru;

pub use lru::{BlockCache, CacheKey, CacheStats};
