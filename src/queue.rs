//! A FIFO queue stored in its own database.
//!
//! Every push is keyed by a big-endian `u64` taken from a counter, so the
//! lexicographic key order is the push order. Pushed elements can carry a
//! deadline; expired elements are skipped by `pop` like any expired entry.

use crate::entry::Deadline;
use crate::error::{Error, Result};
use crate::order::KeyOrder;
use crate::{Options, DB};
use bytes::Bytes;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A persistent or in-memory FIFO queue.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use swaykv::{Options, Queue};
///
/// let queue = Queue::open_in_memory(Options::default()).unwrap();
/// queue.push(b"1").unwrap();
/// queue.push_after(b"2", Duration::ZERO).unwrap();
/// queue.push(b"3").unwrap();
///
/// assert_eq!(queue.pop().unwrap().as_deref(), Some(&b"1"[..]));
/// assert_eq!(queue.pop().unwrap().as_deref(), Some(&b"3"[..]));
/// assert_eq!(queue.pop().unwrap(), None);
/// ```
pub struct Queue {
    db: DB,
    next_push: AtomicU64,
    /// Serializes the read-then-remove of `pop`.
    pop_lock: Mutex<()>,
}

impl Queue {
    /// Opens a queue stored at `path`. The key order is always
    /// lexicographic.
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        Self::with_db(DB::open(path, Self::queue_options(options))?)
    }

    /// Opens a queue held in memory.
    pub fn open_in_memory(options: Options) -> Result<Self> {
        Self::with_db(DB::open_in_memory(Self::queue_options(options))?)
    }

    fn queue_options(options: Options) -> Options {
        options.key_order(KeyOrder::default())
    }

    fn with_db(db: DB) -> Result<Self> {
        let next_push = match db.keys_last()? {
            Some(key) => decode_id(&key)? + 1,
            None => 0,
        };
        log::debug!("Opened queue, next element id {}", next_push);
        Ok(Self { db, next_push: AtomicU64::new(next_push), pop_lock: Mutex::new(()) })
    }

    /// Appends `value` to the tail.
    pub fn push(&self, value: &[u8]) -> Result<()> {
        self.db.put(&self.next_id(), value)
    }

    /// Appends `value`; it is dropped unpopped once `deadline` passes.
    pub fn push_with_deadline(&self, value: &[u8], deadline: Deadline) -> Result<()> {
        self.db.put_with_deadline(&self.next_id(), value, deadline)
    }

    /// Appends `value` for `ttl` from now.
    pub fn push_after(&self, value: &[u8], ttl: Duration) -> Result<()> {
        self.push_with_deadline(value, Deadline::after(ttl))
    }

    /// Removes and returns the oldest live element.
    pub fn pop(&self) -> Result<Option<Bytes>> {
        let _guard = self.pop_lock.lock();
        match self.db.head()? {
            Some((key, value)) => {
                self.db.remove(&key)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// The oldest live element, left in place.
    pub fn peek(&self) -> Result<Option<Bytes>> {
        Ok(self.db.head()?.map(|(_, value)| value))
    }

    /// Number of live elements.
    pub fn len(&self) -> Result<usize> {
        self.db.size()
    }

    /// True if no live element is queued.
    pub fn is_empty(&self) -> Result<bool> {
        self.db.is_empty()
    }

    /// Closes the underlying database.
    pub fn close(&self) -> Result<()> {
        self.db.close()
    }

    fn next_id(&self) -> [u8; 8] {
        self.next_push.fetch_add(1, Ordering::SeqCst).to_be_bytes()
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("next_push", &self.next_push.load(Ordering::Relaxed))
            .field("db", &self.db)
            .finish()
    }
}

fn decode_id(key: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| Error::corruption(format!("Queue key of {} bytes", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn test_pop_in_push_order() {
        let queue = Queue::open_in_memory(Options::default()).unwrap();
        for i in 0..300u32 {
            queue.push(&i.to_be_bytes()).unwrap();
        }
        assert_eq!(queue.len().unwrap(), 300);
        assert_eq!(queue.peek().unwrap().as_deref(), Some(&0u32.to_be_bytes()[..]));

        for i in 0..300u32 {
            assert_eq!(queue.pop().unwrap().as_deref(), Some(&i.to_be_bytes()[..]));
        }
        assert!(queue.is_empty().unwrap());
        assert_eq!(queue.pop().unwrap(), None);
    }

    #[test]
    fn test_expired_elements_are_skipped() {
        let queue = Queue::open_in_memory(Options::default()).unwrap();
        queue.push(b"a").unwrap();
        queue.push_with_deadline(b"b", Deadline::from_nanos(0)).unwrap();
        queue.push_after(b"c", Duration::from_secs(60)).unwrap();

        assert_eq!(queue.len().unwrap(), 2);
        assert_eq!(queue.pop().unwrap().as_deref(), Some(&b"a"[..]));
        assert_eq!(queue.pop().unwrap().as_deref(), Some(&b"c"[..]));
        assert_eq!(queue.pop().unwrap(), None);
    }

    #[test]
    fn test_custom_key_order_is_ignored() {
        let options = Options::default().key_order(KeyOrder::reverse_lexicographic());
        let queue = Queue::open_in_memory(options).unwrap();
        queue.push(b"first").unwrap();
        queue.push(b"second").unwrap();
        assert_eq!(queue.pop().unwrap().as_deref(), Some(&b"first"[..]));
    }

    #[test]
    fn test_queue_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let queue = Queue::open(dir.path(), Options::default()).unwrap();
            for value in [b"one", b"two", b"six"] {
                queue.push(value).unwrap();
            }
            assert_eq!(queue.pop().unwrap().as_deref(), Some(&b"one"[..]));
            queue.close().unwrap();
        }

        let queue = Queue::open(dir.path(), Options::default()).unwrap();
        queue.push(b"ten").unwrap();
        let drained: Vec<Bytes> = std::iter::from_fn(|| queue.pop().unwrap()).collect();
        assert_eq!(drained, vec!["two", "six", "ten"]);
    }

    #[test]
    fn test_concurrent_pops_take_each_element_once() {
        let queue = Arc::new(Queue::open_in_memory(Options::default().map_size(4096)).unwrap());
        for i in 0..1000u32 {
            queue.push(&i.to_be_bytes()).unwrap();
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut popped = Vec::new();
                    while let Some(value) = queue.pop().unwrap() {
                        popped.push(u32::from_be_bytes(value[..].try_into().unwrap()));
                    }
                    popped
                })
            })
            .collect();

        let mut all: Vec<u32> = Vec::new();
        for handle in handles {
            let popped = handle.join().unwrap();
            assert!(popped.windows(2).all(|pair| pair[0] < pair[1]));
            all.extend(popped);
        }
        all.sort_unstable();
        assert_eq!(all, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn test_foreign_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        {
            let db = DB::open(dir.path(), Options::default()).unwrap();
            db.put(b"not-a-queue-key", b"v").unwrap();
            db.close().unwrap();
        }
        assert!(Queue::open(dir.path(), Options::default()).unwrap_err().is_corruption());
    }
}
