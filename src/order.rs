//! Key ordering.
//!
//! Every sorted structure in the engine (memtables, segment blocks, segment
//! indexes, levels and merge iterators) compares user keys through a single
//! [`KeyOrder`] carried in [`Options`](crate::Options).

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

type CompareFn = dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync;

/// Total order over user keys.
///
/// A custom order must return [`Ordering::Equal`] only for byte-identical
/// keys, since bloom filters hash raw key bytes.
#[derive(Clone, Default)]
pub enum KeyOrder {
    /// Unsigned lexicographic byte order.
    #[default]
    Lexicographic,

    /// A caller supplied comparator.
    Custom(Arc<CompareFn>),
}

impl KeyOrder {
    /// Creates a custom order from a comparator.
    pub fn custom<F>(compare: F) -> Self
    where
        F: Fn(&[u8], &[u8]) -> Ordering + Send + Sync + 'static,
    {
        KeyOrder::Custom(Arc::new(compare))
    }

    /// Descending byte order.
    pub fn reverse_lexicographic() -> Self {
        Self::custom(|a, b| b.cmp(a))
    }

    /// Compares two user keys.
    #[inline]
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            KeyOrder::Lexicographic => a.cmp(b),
            KeyOrder::Custom(compare) => compare(a, b),
        }
    }

    /// Returns true if `a` sorts strictly before `b`.
    #[inline]
    pub fn lt(&self, a: &[u8], b: &[u8]) -> bool {
        self.compare(a, b) == Ordering::Less
    }

    /// Returns the smaller of two keys.
    pub fn min<'a>(&self, a: &'a [u8], b: &'a [u8]) -> &'a [u8] {
        if self.compare(b, a) == Ordering::Less {
            b
        } else {
            a
        }
    }

    /// Returns the larger of two keys.
    pub fn max<'a>(&self, a: &'a [u8], b: &'a [u8]) -> &'a [u8] {
        if self.compare(b, a) == Ordering::Greater {
            b
        } else {
            a
        }
    }

    /// Returns true if `[a_min, a_max]` and `[b_min, b_max]` share any key.
    pub fn overlaps(&self, a_min: &[u8], a_max: &[u8], b_min: &[u8], b_max: &[u8]) -> bool {
        self.compare(a_min, b_max) != Ordering::Greater
            && self.compare(b_min, a_max) != Ordering::Greater
    }

    /// Returns true if `key` lies within `[min, max]`.
    pub fn in_range(&self, key: &[u8], min: &[u8], max: &[u8]) -> bool {
        self.compare(key, min) != Ordering::Less && self.compare(key, max) != Ordering::Greater
    }
}

impl fmt::Debug for KeyOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyOrder::Lexicographic => write!(f, "Lexicographic"),
            KeyOrder::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}
