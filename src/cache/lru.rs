//! LRU (Least Recently Used) cache for segment data blocks.
//!
//! Lookups and inserts only stamp entries with a logical clock. Eviction
//! happens in [`BlockCache::sweep`], which the memory sweeper runs every
//! `cache_check_delay`; an insert evicts inline only once the cache has grown
//! past twice its capacity.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// A unique identifier for a cached block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Segment id
    pub segment_id: u64,
    /// Block offset in the segment
    pub offset: u64,
}

impl CacheKey {
    /// Create a new cache key
    pub fn new(segment_id: u64, offset: u64) -> Self {
        Self { segment_id, offset }
    }
}

/// Statistics for cache performance monitoring.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Total number of cache lookups
    pub lookups: u64,
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of insertions
    pub insertions: u64,
    /// Number of evictions
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
}

#[derive(Debug)]
struct Slot {
    block: Bytes,
    last_used: u64,
}

/// Thread-safe LRU cache shared by every segment of a database.
#[derive(Debug)]
pub struct BlockCache {
    /// Maximum cache capacity in bytes
    capacity: usize,
    /// Current cache size in bytes
    current_size: AtomicUsize,
    /// Logical clock for recency
    clock: AtomicU64,
    slots: Mutex<HashMap<CacheKey, Slot>>,
    counters: Counters,
}

impl BlockCache {
    /// Create a new BlockCache with the specified capacity in bytes.
    /// A capacity of 0 disables caching.
    ///
    /// # Examples
    ///
    /// ```
    /// use swaykv::cache::BlockCache;
    ///
    /// let cache = BlockCache::new(8 * 1024 * 1024);
    /// assert!(cache.is_empty());
    /// ```
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            current_size: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
            slots: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Get a block from the cache, marking it as recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Bytes> {
        if self.capacity == 0 {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let now = self.clock.fetch_add(1, Ordering::Relaxed);
        let mut slots = self.slots.lock();
        match slots.get_mut(key) {
            Some(slot) => {
                slot.last_used = now;
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(slot.block.clone())
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a block into the cache.
    pub fn insert(&self, key: CacheKey, block: Bytes) {
        if self.capacity == 0 || block.len() > self.capacity {
            return;
        }

        let now = self.clock.fetch_add(1, Ordering::Relaxed);
        let size = block.len();
        let mut slots = self.slots.lock();
        if let Some(old) = slots.insert(key, Slot { block, last_used: now }) {
            self.current_size.fetch_sub(old.block.len(), Ordering::Relaxed);
        }
        self.current_size.fetch_add(size, Ordering::Relaxed);
        self.counters.insertions.fetch_add(1, Ordering::Relaxed);

        if self.current_size.load(Ordering::Relaxed) > self.capacity.saturating_mul(2) {
            self.evict_locked(&mut slots);
        }
    }

    /// Evicts least recently used blocks until the cache fits its capacity.
    /// Returns the number of evicted blocks.
    pub fn sweep(&self) -> usize {
        let mut slots = self.slots.lock();
        self.evict_locked(&mut slots)
    }

    fn evict_locked(&self, slots: &mut HashMap<CacheKey, Slot>) -> usize {
        if self.current_size.load(Ordering::Relaxed) <= self.capacity {
            return 0;
        }

        let mut by_age: Vec<(u64, CacheKey)> =
            slots.iter().map(|(key, slot)| (slot.last_used, *key)).collect();
        by_age.sort_unstable_by_key(|(last_used, _)| *last_used);

        let mut evicted = 0;
        for (_, key) in by_age {
            if self.current_size.load(Ordering::Relaxed) <= self.capacity {
                break;
            }
            if let Some(slot) = slots.remove(&key) {
                self.current_size.fetch_sub(slot.block.len(), Ordering::Relaxed);
                evicted += 1;
            }
        }

        self.counters.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    /// Drops every cached block of a segment.
    pub fn remove_segment(&self, segment_id: u64) {
        let mut slots = self.slots.lock();
        slots.retain(|key, slot| {
            if key.segment_id == segment_id {
                self.current_size.fetch_sub(slot.block.len(), Ordering::Relaxed);
                false
            } else {
                true
            }
        });
    }

    /// Get current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        CacheStats {
            lookups: hits + misses,
            hits,
            misses,
            insertions: self.counters.insertions.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    /// Clear all entries from the cache.
    pub fn clear(&self) {
        self.slots.lock().clear();
        self.current_size.store(0, Ordering::Relaxed);
    }

    /// Get the current size of cached data in bytes.
    pub fn size(&self) -> usize {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Get the cache capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of entries in the cache.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
