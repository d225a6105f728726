//! WriteBatch provides atomic batch write operations.
//!
//! A batch is an ordered list of [`Prepare`] operations. Committing it logs
//! the whole list as one record and publishes it with a single sequence
//! update, so readers see either every operation or none. Operations apply
//! in list order: a later operation on the same key overrides an earlier one.
//!
//! # Example
//!
//! ```rust,no_run
//! use swaykv::{DB, Options, WriteBatch};
//!
//! # fn main() -> Result<(), swaykv::Error> {
//! let db = DB::open("./data", Options::default())?;
//! let mut batch = WriteBatch::new();
//!
//! batch.put(b"key1", b"value1");
//! batch.put(b"key2", b"value2");
//! batch.remove(b"key3");
//!
//! db.commit(batch)?;
//! # Ok(())
//! # }
//! ```

use crate::entry::Deadline;

/// One operation of a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prepare {
    /// Insert or replace a value.
    Put {
        /// Key to write
        key: Vec<u8>,
        /// New value
        value: Vec<u8>,
        /// Optional expiry
        deadline: Option<Deadline>,
    },
    /// Remove a key.
    Remove {
        /// Key to remove
        key: Vec<u8>,
    },
    /// Remove every key in `[from, to]`.
    RemoveRange {
        /// First key of the range (inclusive)
        from: Vec<u8>,
        /// Last key of the range (inclusive)
        to: Vec<u8>,
    },
    /// Replace the value of an existing key, keeping its deadline.
    Update {
        /// Key to update
        key: Vec<u8>,
        /// Replacement value
        value: Vec<u8>,
    },
    /// Set the deadline of an existing key.
    Expire {
        /// Key to expire
        key: Vec<u8>,
        /// New deadline
        deadline: Deadline,
    },
    /// Apply a registered function to the existing value.
    ApplyFunction {
        /// Key to transform
        key: Vec<u8>,
        /// Registered function id
        function: Vec<u8>,
    },
    /// Insert a set member (a key with an empty value).
    Add {
        /// Member to insert
        key: Vec<u8>,
        /// Optional expiry
        deadline: Option<Deadline>,
    },
}

impl Prepare {
    fn approximate_size(&self) -> usize {
        match self {
            Prepare::Put { key, value, .. } | Prepare::Update { key, value } => key.len() + value.len() + 8,
            Prepare::RemoveRange { from, to } => from.len() + to.len() + 8,
            Prepare::ApplyFunction { key, function } => key.len() + function.len() + 8,
            Prepare::Remove { key } | Prepare::Expire { key, .. } | Prepare::Add { key, .. } => key.len() + 8,
        }
    }
}

/// WriteBatch accumulates operations to be committed atomically.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriteBatch {
    operations: Vec<Prepare>,
    approximate_size: usize,
}

impl WriteBatch {
    /// Creates a new empty WriteBatch.
    ///
    /// # Example
    ///
    /// ```
    /// use swaykv::WriteBatch;
    ///
    /// let batch = WriteBatch::new();
    /// assert!(batch.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an operation.
    pub fn push(&mut self, op: Prepare) -> &mut Self {
        self.approximate_size += op.approximate_size();
        self.operations.push(op);
        self
    }

    /// Adds a Put operation to the batch.
    ///
    /// # Example
    ///
    /// ```
    /// use swaykv::WriteBatch;
    ///
    /// let mut batch = WriteBatch::new();
    /// batch.put(b"key", b"value");
    /// assert_eq!(batch.len(), 1);
    /// ```
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> &mut Self {
        self.push(Prepare::Put { key: key.to_vec(), value: value.to_vec(), deadline: None })
    }

    /// Adds a Put operation that expires at `deadline`.
    pub fn put_with_deadline(&mut self, key: &[u8], value: &[u8], deadline: Deadline) -> &mut Self {
        self.push(Prepare::Put { key: key.to_vec(), value: value.to_vec(), deadline: Some(deadline) })
    }

    /// Adds a Remove operation to the batch.
    pub fn remove(&mut self, key: &[u8]) -> &mut Self {
        self.push(Prepare::Remove { key: key.to_vec() })
    }

    /// Removes every key in `[from, to]`.
    pub fn remove_range(&mut self, from: &[u8], to: &[u8]) -> &mut Self {
        self.push(Prepare::RemoveRange { from: from.to_vec(), to: to.to_vec() })
    }

    /// Adds an Update operation to the batch.
    pub fn update(&mut self, key: &[u8], value: &[u8]) -> &mut Self {
        self.push(Prepare::Update { key: key.to_vec(), value: value.to_vec() })
    }

    /// Adds an Expire operation to the batch.
    pub fn expire(&mut self, key: &[u8], deadline: Deadline) -> &mut Self {
        self.push(Prepare::Expire { key: key.to_vec(), deadline })
    }

    /// Applies a registered function to `key`.
    pub fn apply_function(&mut self, key: &[u8], function: &[u8]) -> &mut Self {
        self.push(Prepare::ApplyFunction { key: key.to_vec(), function: function.to_vec() })
    }

    /// Adds a set member.
    pub fn add(&mut self, key: &[u8]) -> &mut Self {
        self.push(Prepare::Add { key: key.to_vec(), deadline: None })
    }

    /// Adds a set member that expires at `deadline`.
    pub fn add_with_deadline(&mut self, key: &[u8], deadline: Deadline) -> &mut Self {
        self.push(Prepare::Add { key: key.to_vec(), deadline: Some(deadline) })
    }

    /// Clears all operations from the batch.
    pub fn clear(&mut self) {
        self.operations.clear();
        self.approximate_size = 0;
    }

    /// Returns the number of operations in the batch.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if the batch contains no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Returns the approximate size of the batch in bytes.
    pub fn approximate_size(&self) -> usize {
        self.approximate_size
    }

    /// Iterates over the operations in commit order.
    pub fn iter(&self) -> std::slice::Iter<'_, Prepare> {
        self.operations.iter()
    }

    pub(crate) fn into_operations(self) -> Vec<Prepare> {
        self.operations
    }
}

impl FromIterator<Prepare> for WriteBatch {
    fn from_iter<I: IntoIterator<Item = Prepare>>(iter: I) -> Self {
        let mut batch = WriteBatch::new();
        batch.extend(iter);
        batch
    }
}

impl Extend<Prepare> for WriteBatch {
    fn extend<I: IntoIterator<Item = Prepare>>(&mut self, iter: I) {
        for op in iter {
            self.push(op);
        }
    }
}

impl IntoIterator for WriteBatch {
    type Item = Prepare;
    type IntoIter = std::vec::IntoIter<Prepare>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.into_iter()
    }
}

impl<'a> IntoIterator for &'a WriteBatch {
    type Item = &'a Prepare;
    type IntoIter = std::slice::Iter<'a, Prepare>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_batch_new() {
        let batch = WriteBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
        assert_eq!(batch.approximate_size(), 0);
    }

    #[test]
    fn test_write_batch_operations_keep_order() {
        let mut batch = WriteBatch::new();
        batch
            .put(b"key1", b"value1")
            .remove(b"key2")
            .update(b"key1", b"value2")
            .expire(b"key1", Deadline::from_nanos(5))
            .apply_function(b"key1", b"inc")
            .add(b"member")
            .remove_range(b"a", b"c");

        assert_eq!(batch.len(), 7);
        let ops: Vec<&Prepare> = batch.iter().collect();
        assert_eq!(
            ops[0],
            &Prepare::Put { key: b"key1".to_vec(), value: b"value1".to_vec(), deadline: None }
        );
        assert_eq!(ops[2], &Prepare::Update { key: b"key1".to_vec(), value: b"value2".to_vec() });
        assert_eq!(ops[6], &Prepare::RemoveRange { from: b"a".to_vec(), to: b"c".to_vec() });
    }

    #[test]
    fn test_write_batch_clear() {
        let mut batch = WriteBatch::new();
        batch.put(b"key1", b"value1");
        batch.put(b"key2", b"value2");
        assert!(batch.approximate_size() > 0);

        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.approximate_size(), 0);
    }

    #[test]
    fn test_write_batch_from_iter() {
        let batch: WriteBatch = (0..3u8)
            .map(|i| Prepare::Add { key: vec![i], deadline: None })
            .collect();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.into_operations()[2], Prepare::Add { key: vec![2], deadline: None });
    }
}
