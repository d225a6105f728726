//! Registered value functions.
//!
//! `apply_function` only writes a function marker. The registered closure runs
//! when a read or a compaction folds the marker onto an older value, so many
//! applies to the same key collapse into a single pass. Registrations live in
//! the open handle and are not persisted.

use crate::entry::Deadline;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// What a registered function does to the value it is applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionOutput {
    /// Replace the value, keeping its deadline.
    Update(Vec<u8>),
    /// Keep the value and set its deadline.
    Expire(Deadline),
    /// Delete the key.
    Remove,
    /// Leave the value untouched.
    Nothing,
}

impl From<Vec<u8>> for FunctionOutput {
    fn from(value: Vec<u8>) -> Self {
        FunctionOutput::Update(value)
    }
}

type ValueFunction = dyn Fn(&[u8]) -> FunctionOutput + Send + Sync;

/// Lookup table from function id to closure.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: RwLock<HashMap<Vec<u8>, Arc<ValueFunction>>>,
}

impl FunctionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `function` under `id`, replacing any earlier registration.
    pub fn register<F>(&self, id: &[u8], function: F) -> Vec<u8>
    where
        F: Fn(&[u8]) -> FunctionOutput + Send + Sync + 'static,
    {
        let previous = self.functions.write().insert(id.to_vec(), Arc::new(function));
        if previous.is_some() {
            log::debug!("Replaced function {:?}", String::from_utf8_lossy(id));
        }
        id.to_vec()
    }

    /// Returns true if `id` is registered.
    pub fn contains(&self, id: &[u8]) -> bool {
        self.functions.read().contains_key(id)
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.functions.read().len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.functions.read().is_empty()
    }

    /// Runs the function registered under `id` on `value`.
    pub fn apply(&self, id: &[u8], value: &[u8]) -> Result<FunctionOutput> {
        // Clone the Arc so the closure runs without holding the lock.
        let function = self
            .functions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::function_not_found(id))?;
        Ok(function(value))
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry").field("functions", &self.len()).finish()
    }
}
