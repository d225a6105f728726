//! Entry payloads and their binary encoding.
//!
//! Every key in a memtable or segment maps to a [`Value`]. A `Put` or a
//! deadline-less `Remove` is *fixed*: it fully determines the key's state and
//! shadows anything older. The other variants are *partial*: they describe a
//! change to whatever older value exists and are folded onto it lazily (see
//! [`merge`]).
//!
//! Encoding:
//!
//! ```text
//! Put      : [0][deadline][value bytes ...]
//! Remove   : [1][deadline]
//! Update   : [2][deadline][value bytes ...]
//! Function : [3][function id ...]
//! Pending  : [4][count: u32][len: u32][encoded value] ...
//!
//! deadline : [0] | [1][nanos: u64]
//! ```

mod deadline;
pub(crate) mod merge;

pub use deadline::Deadline;
pub(crate) use deadline::earliest;

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

const TAG_PUT: u8 = 0;
const TAG_REMOVE: u8 = 1;
const TAG_UPDATE: u8 = 2;
const TAG_FUNCTION: u8 = 3;
const TAG_PENDING: u8 = 4;

/// Marks a segment value that repeats the previous entry's value in the same
/// block.
pub(crate) const TAG_DUPLICATE: u8 = 5;

/// The payload stored for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A present value with an optional deadline.
    Put {
        /// The stored bytes.
        value: Bytes,
        /// When the value expires.
        deadline: Option<Deadline>,
    },

    /// A tombstone when `deadline` is `None`, otherwise an expiry applied to
    /// the existing value.
    Remove {
        /// New deadline for the existing value.
        deadline: Option<Deadline>,
    },

    /// Replaces an existing value, keeping its deadline unless `deadline` is
    /// set. Has no effect on absent keys.
    Update {
        /// The replacement bytes.
        value: Bytes,
        /// Deadline override.
        deadline: Option<Deadline>,
    },

    /// A registered function to run against the existing value.
    Function {
        /// Registered function id.
        id: Bytes,
    },

    /// Partial values waiting for an older fixed value, oldest first.
    Pending(Vec<Value>),
}

impl Value {
    /// A live value with no deadline.
    pub fn put(value: impl Into<Bytes>) -> Self {
        Value::Put { value: value.into(), deadline: None }
    }

    /// A tombstone.
    pub fn tombstone() -> Self {
        Value::Remove { deadline: None }
    }

    /// Returns true if the value shadows everything older.
    pub fn is_fixed(&self) -> bool {
        matches!(self, Value::Put { .. } | Value::Remove { deadline: None })
    }

    /// Returns true for tombstones and partial values.
    pub fn is_shadow(&self) -> bool {
        !matches!(self, Value::Put { .. })
    }

    /// The deadline of a `Put`, used to schedule expiry collapse.
    pub fn put_deadline(&self) -> Option<Deadline> {
        match self {
            Value::Put { deadline, .. } => *deadline,
            _ => None,
        }
    }

    /// Returns the live value and its deadline, or `None` if the value is
    /// absent at `now`.
    pub fn resolve(self, now: Deadline) -> Option<(Bytes, Option<Deadline>)> {
        match self {
            Value::Put { value, deadline } => match deadline {
                Some(d) if d.is_overdue_at(now) => None,
                _ => Some((value, deadline)),
            },
            _ => None,
        }
    }

    /// Exact number of bytes produced by [`Value::encode_into`].
    pub fn encoded_len(&self) -> usize {
        fn deadline_len(deadline: &Option<Deadline>) -> usize {
            if deadline.is_some() {
                9
            } else {
                1
            }
        }

        match self {
            Value::Put { value, deadline } | Value::Update { value, deadline } => {
                1 + deadline_len(deadline) + value.len()
            }
            Value::Remove { deadline } => 1 + deadline_len(deadline),
            Value::Function { id } => 1 + id.len(),
            Value::Pending(applies) => {
                5 + applies.iter().map(|a| 4 + a.encoded_len()).sum::<usize>()
            }
        }
    }

    /// Encodes the value into a fresh buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Appends the encoded value to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Value::Put { value, deadline } => {
                buf.put_u8(TAG_PUT);
                put_deadline(buf, deadline);
                buf.put_slice(value);
            }
            Value::Remove { deadline } => {
                buf.put_u8(TAG_REMOVE);
                put_deadline(buf, deadline);
            }
            Value::Update { value, deadline } => {
                buf.put_u8(TAG_UPDATE);
                put_deadline(buf, deadline);
                buf.put_slice(value);
            }
            Value::Function { id } => {
                buf.put_u8(TAG_FUNCTION);
                buf.put_slice(id);
            }
            Value::Pending(applies) => {
                buf.put_u8(TAG_PENDING);
                buf.put_u32_le(applies.len() as u32);
                for apply in applies {
                    buf.put_u32_le(apply.encoded_len() as u32);
                    apply.encode_into(buf);
                }
            }
        }
    }

    /// Decodes a value, sharing the value bytes with `data`.
    pub fn decode(data: &Bytes) -> Result<Self> {
        let mut buf = data.clone();
        if !buf.has_remaining() {
            return Err(Error::corruption("Empty entry payload"));
        }

        let tag = buf.get_u8();
        match tag {
            TAG_PUT => {
                let deadline = get_deadline(&mut buf)?;
                Ok(Value::Put { value: buf, deadline })
            }
            TAG_REMOVE => {
                let deadline = get_deadline(&mut buf)?;
                Ok(Value::Remove { deadline })
            }
            TAG_UPDATE => {
                let deadline = get_deadline(&mut buf)?;
                Ok(Value::Update { value: buf, deadline })
            }
            TAG_FUNCTION => Ok(Value::Function { id: buf }),
            TAG_PENDING => {
                if buf.remaining() < 4 {
                    return Err(Error::corruption("Truncated pending entry"));
                }
                let count = buf.get_u32_le() as usize;
                let mut applies = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    if buf.remaining() < 4 {
                        return Err(Error::corruption("Truncated pending entry"));
                    }
                    let len = buf.get_u32_le() as usize;
                    if buf.remaining() < len {
                        return Err(Error::corruption("Truncated pending entry"));
                    }
                    let apply = Value::decode(&buf.split_to(len))?;
                    if apply.is_fixed() {
                        return Err(Error::corruption("Fixed value inside pending entry"));
                    }
                    applies.push(apply);
                }
                Ok(Value::Pending(applies))
            }
            other => Err(Error::corruption(format!("Unknown entry tag: {}", other))),
        }
    }

    /// Splits a value into its list of partial applies.
    pub(crate) fn into_applies(self) -> Vec<Value> {
        match self {
            Value::Pending(applies) => applies,
            other => vec![other],
        }
    }
}

fn put_deadline(buf: &mut BytesMut, deadline: &Option<Deadline>) {
    match deadline {
        None => buf.put_u8(0),
        Some(d) => {
            buf.put_u8(1);
            buf.put_u64_le(d.as_nanos());
        }
    }
}

fn get_deadline(buf: &mut Bytes) -> Result<Option<Deadline>> {
    if !buf.has_remaining() {
        return Err(Error::corruption("Missing deadline flag"));
    }
    match buf.get_u8() {
        0 => Ok(None),
        1 => {
            if buf.remaining() < 8 {
                return Err(Error::corruption("Truncated deadline"));
            }
            Ok(Some(Deadline::from_nanos(buf.get_u64_le())))
        }
        flag => Err(Error::corruption(format!("Invalid deadline flag: {}", flag))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: Value) {
        let encoded = value.encode();
        assert_eq!(encoded.len(), value.encoded_len());
        assert_eq!(Value::decode(&encoded).unwrap(), value);
    }

    #[test]
    fn test_encode_variants() {
        roundtrip(Value::put("hello"));
        roundtrip(Value::Put { value: Bytes::new(), deadline: Some(Deadline::from_nanos(42)) });
        roundtrip(Value::tombstone());
        roundtrip(Value::Remove { deadline: Some(Deadline::from_nanos(7)) });
        roundtrip(Value::Update { value: Bytes::from_static(b"u"), deadline: None });
        roundtrip(Value::Function { id: Bytes::from_static(b"inc") });
        roundtrip(Value::Pending(vec![
            Value::Function { id: Bytes::from_static(b"inc") },
            Value::Update { value: Bytes::from_static(b"x"), deadline: None },
        ]));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Value::decode(&Bytes::new()).is_err());
        assert!(Value::decode(&Bytes::from_static(&[9])).is_err());
        assert!(Value::decode(&Bytes::from_static(&[TAG_PUT, 1, 0])).is_err());
        assert!(Value::decode(&Bytes::from_static(&[TAG_PENDING, 3, 0, 0, 0])).is_err());
    }

    #[test]
    fn test_fixed_and_shadow() {
        assert!(Value::put("a").is_fixed());
        assert!(Value::tombstone().is_fixed());
        assert!(!Value::Remove { deadline: Some(Deadline::from_nanos(1)) }.is_fixed());
        assert!(!Value::Function { id: Bytes::new() }.is_fixed());
        assert!(Value::tombstone().is_shadow());
        assert!(!Value::put("a").is_shadow());
    }

    #[test]
    fn test_resolve_expired() {
        let now = Deadline::from_nanos(100);
        let live = Value::Put { value: Bytes::from_static(b"v"), deadline: Some(Deadline::from_nanos(101)) };
        let dead = Value::Put { value: Bytes::from_static(b"v"), deadline: Some(Deadline::from_nanos(100)) };
        assert!(live.resolve(now).is_some());
        assert!(dead.resolve(now).is_none());
        assert!(Value::Update { value: Bytes::new(), deadline: None }.resolve(now).is_none());
    }
}
