//! Folding newer entries onto older ones.
//!
//! The same rules serve point lookups, merge iteration, memtable flushes and
//! level compaction, so every path agrees on the visible value of a key.

use super::{Deadline, Value};
use crate::error::Result;
use crate::function::{FunctionOutput, FunctionRegistry};
use bytes::Bytes;

impl Value {
    /// Applies `self` on top of `older`, producing the combined entry.
    pub(crate) fn merge_onto(
        self,
        older: Value,
        functions: &FunctionRegistry,
        now: Deadline,
    ) -> Result<Value> {
        if self.is_fixed() {
            return Ok(self);
        }

        match older {
            Value::Put { value, deadline } => {
                if deadline.is_some_and(|d| d.is_overdue_at(now)) {
                    return Ok(Value::tombstone());
                }
                self.apply_to_put(value, deadline, functions, now)
            }
            Value::Remove { deadline: None } => Ok(Value::tombstone()),
            partial => Ok(self.stack_onto(partial)),
        }
    }

    fn apply_to_put(
        self,
        value: Bytes,
        deadline: Option<Deadline>,
        functions: &FunctionRegistry,
        now: Deadline,
    ) -> Result<Value> {
        match self {
            Value::Remove { deadline: Some(d) } => Ok(Value::Put { value, deadline: Some(d) }),
            Value::Update { value: new, deadline: new_deadline } => {
                Ok(Value::Put { value: new, deadline: new_deadline.or(deadline) })
            }
            Value::Function { id } => Ok(match functions.apply(&id, &value)? {
                FunctionOutput::Update(new) => Value::Put { value: Bytes::from(new), deadline },
                FunctionOutput::Expire(d) => Value::Put { value, deadline: Some(d) },
                FunctionOutput::Remove => Value::tombstone(),
                FunctionOutput::Nothing => Value::Put { value, deadline },
            }),
            Value::Pending(applies) => {
                applies.into_iter().try_fold(Value::Put { value, deadline }, |acc, apply| {
                    apply.merge_onto(acc, functions, now)
                })
            }
            fixed => Ok(fixed),
        }
    }

    /// Combines two partial values without a base value to resolve against.
    fn stack_onto(self, older: Value) -> Value {
        match (older, self) {
            (Value::Remove { deadline: Some(_) }, Value::Remove { deadline: Some(d) }) => {
                Value::Remove { deadline: Some(d) }
            }
            (Value::Remove { deadline: Some(old) }, Value::Update { value, deadline }) => {
                Value::Update { value, deadline: deadline.or(Some(old)) }
            }
            (Value::Update { value, .. }, Value::Remove { deadline: Some(d) }) => {
                Value::Update { value, deadline: Some(d) }
            }
            (Value::Update { deadline: old, .. }, Value::Update { value, deadline }) => {
                Value::Update { value, deadline: deadline.or(old) }
            }
            (older, newer) => {
                let mut applies = older.into_applies();
                applies.extend(newer.into_applies());
                Value::Pending(applies)
            }
        }
    }

    /// Decides what survives a compaction. `data_below` is true when a deeper
    /// level may still hold older entries for the key.
    pub(crate) fn compact(self, data_below: bool, now: Deadline) -> Option<Value> {
        match self {
            Value::Put { deadline: Some(d), .. } if d.is_overdue_at(now) => {
                data_below.then(Value::tombstone)
            }
            Value::Put { .. } => Some(self),
            shadow => data_below.then_some(shadow),
        }
    }
}

/// Folds the versions of one key, newest first, stopping at the first fixed
/// value. Returns `None` when there are no versions.
pub(crate) fn fold_versions<I>(
    versions: I,
    functions: &FunctionRegistry,
    now: Deadline,
) -> Result<Option<Value>>
where
    I: IntoIterator<Item = Value>,
{
    let mut acc: Option<Value> = None;
    for older in versions {
        let merged = match acc {
            None => older,
            Some(newer) => newer.merge_onto(older, functions, now)?,
        };
        let fixed = merged.is_fixed();
        acc = Some(merged);
        if fixed {
            break;
        }
    }
    Ok(acc)
}

/// Folds `older` under an optional accumulated newer value.
pub(crate) fn merge_optional(
    newer: Option<Value>,
    older: Value,
    functions: &FunctionRegistry,
    now: Deadline,
) -> Result<Value> {
    match newer {
        None => Ok(older),
        Some(newer) => newer.merge_onto(older, functions, now),
    }
}
