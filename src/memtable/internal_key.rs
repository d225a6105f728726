//! # Internal Key Format
//!
//! Memtable entries are keyed by `(user_key, sequence)` so every write keeps
//! its own version until the memtable is flushed.
//!
//! ## Ordering
//!
//! InternalKeys are ordered by:
//! 1. user_key, through the database's [`KeyOrder`]
//! 2. sequence (descending - newer first)

use crate::order::KeyOrder;
use bytes::Bytes;
use std::cmp::Ordering;

/// Internal key used in the MemTable.
#[derive(Debug, Clone)]
pub struct InternalKey {
    user_key: Bytes,
    sequence: u64,
    order: KeyOrder,
}

impl InternalKey {
    /// Creates a new InternalKey.
    ///
    /// # Example
    ///
    /// ```rust
    /// use swaykv::memtable::InternalKey;
    /// use swaykv::KeyOrder;
    ///
    /// let key = InternalKey::new(b"user_key".to_vec().into(), 42, KeyOrder::default());
    /// assert_eq!(key.sequence(), 42);
    /// ```
    pub fn new(user_key: Bytes, sequence: u64, order: KeyOrder) -> Self {
        Self { user_key, sequence, order }
    }

    /// Search key that sorts before every version of `user_key`.
    pub(crate) fn newest(user_key: &[u8], order: &KeyOrder) -> Self {
        Self::new(Bytes::copy_from_slice(user_key), u64::MAX, order.clone())
    }

    /// Search key that sorts after every version of `user_key`.
    pub(crate) fn oldest(user_key: &[u8], order: &KeyOrder) -> Self {
        Self::new(Bytes::copy_from_slice(user_key), 0, order.clone())
    }

    /// Returns the user key.
    pub fn user_key(&self) -> &[u8] {
        &self.user_key
    }

    /// Returns a shared handle to the user key.
    pub fn user_key_bytes(&self) -> Bytes {
        self.user_key.clone()
    }

    /// Returns the sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl PartialEq for InternalKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for InternalKey {}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order
            .compare(&self.user_key, &other.user_key)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}
