//! Type Codecs
//!
//! Every key in the keyspace holds exactly one [`Value`] variant. This module
//! defines the tagged union and the concrete value types behind it; each
//! submodule owns one type and its operations.
//!
//! ```text
//!                    ┌──────────────────────┐
//!                    │        Value         │
//!                    └──────────┬───────────┘
//!   ┌──────┬──────┬─────┬───────┼──────┬─────────┬────────────┐
//!   ▼      ▼      ▼     ▼       ▼      ▼         ▼            ▼
//! String  List   Set   Hash  SortedSet Stream  BitString  HyperLogLog
//! (Bytes)                    (skiplist)
//! ```
//!
//! ## Design
//!
//! The codecs know nothing about locking, expiry or persistence. They are
//! plain data structures with methods; the keyspace hands out `&mut T` through
//! the [`TypedValue`] trait after checking the variant tag, so a mismatch is
//! always reported as [`EngineError::WrongType`](crate::EngineError::WrongType)
//! before any codec code runs.

pub mod bitmap;
pub mod hash;
pub mod hll;
pub mod list;
pub mod set;
pub mod stream;
pub mod string;
pub mod zset;

pub use bitmap::{BitString, BitfieldOp, FieldType, Overflow};
pub use hash::HashValue;
pub use hll::HyperLogLog;
pub use list::ListValue;
pub use set::SetValue;
pub use stream::{Stream, StreamId};
pub use zset::{ScoreBound, SortedSet};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed per-key bookkeeping overhead used by memory estimation.
pub const ENTRY_OVERHEAD: usize = 64;

/// A value stored under a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    String(Bytes),
    List(ListValue),
    Set(SetValue),
    Hash(HashValue),
    SortedSet(SortedSet),
    Stream(Stream),
    BitString(BitString),
    Cardinality(HyperLogLog),
}

/// The variant tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    String,
    List,
    Set,
    Hash,
    SortedSet,
    Stream,
    BitString,
    Cardinality,
}

impl ValueKind {
    /// The name reported by the TYPE command.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::List => "list",
            ValueKind::Set => "set",
            ValueKind::Hash => "hash",
            ValueKind::SortedSet => "zset",
            ValueKind::Stream => "stream",
            ValueKind::BitString => "bitmap",
            ValueKind::Cardinality => "hyperloglog",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::List(_) => ValueKind::List,
            Value::Set(_) => ValueKind::Set,
            Value::Hash(_) => ValueKind::Hash,
            Value::SortedSet(_) => ValueKind::SortedSet,
            Value::Stream(_) => ValueKind::Stream,
            Value::BitString(_) => ValueKind::BitString,
            Value::Cardinality(_) => ValueKind::Cardinality,
        }
    }

    /// Approximate heap footprint in bytes.
    ///
    /// Collections walk their elements, so this is O(n) for them.
    pub fn approx_size(&self) -> usize {
        match self {
            Value::String(b) => b.len(),
            Value::List(l) => l.approx_size(),
            Value::Set(s) => s.approx_size(),
            Value::Hash(h) => h.approx_size(),
            Value::SortedSet(z) => z.approx_size(),
            Value::Stream(s) => s.approx_size(),
            Value::BitString(b) => b.len(),
            Value::Cardinality(h) => h.approx_size(),
        }
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::String(b)
    }
}

/// A concrete value type that can be borrowed out of a [`Value`].
///
/// The keyspace's typed accessors are generic over this trait.
pub trait TypedValue: Default + Into<Value> {
    const KIND: ValueKind;

    fn from_ref(value: &Value) -> Option<&Self>;

    fn from_mut(value: &mut Value) -> Option<&mut Self>;

    /// Whether the key should be deleted once an operation leaves the
    /// value in this state. Collections vanish when empty.
    fn should_delete(&self) -> bool {
        false
    }
}

macro_rules! typed_value {
    ($ty:ty, $variant:ident, $kind:ident, $empty:expr) => {
        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        }

        impl TypedValue for $ty {
            const KIND: ValueKind = ValueKind::$kind;

            fn from_ref(value: &Value) -> Option<&Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn from_mut(value: &mut Value) -> Option<&mut Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn should_delete(&self) -> bool {
                let check: fn(&$ty) -> bool = $empty;
                check(self)
            }
        }
    };
}

typed_value!(ListValue, List, List, |v| v.is_empty());
typed_value!(SetValue, Set, Set, |v| v.is_empty());
typed_value!(HashValue, Hash, Hash, |v| v.is_empty());
typed_value!(SortedSet, SortedSet, SortedSet, |v| v.is_empty());
typed_value!(Stream, Stream, Stream, |_| false);
typed_value!(BitString, BitString, BitString, |_| false);
typed_value!(HyperLogLog, Cardinality, Cardinality, |_| false);

impl TypedValue for Bytes {
    const KIND: ValueKind = ValueKind::String;

    fn from_ref(value: &Value) -> Option<&Self> {
        match value {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    fn from_mut(value: &mut Value) -> Option<&mut Self> {
        match value {
            Value::String(v) => Some(v),
            _ => None,
        }
    }
}

/// Resolves a Redis-style inclusive `[start, stop]` range with negative
/// indices counted from the end.
///
/// Returns `None` when the range is empty after clamping.
pub fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    if len == 0 {
        return None;
    }

    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };

    if start > stop || start >= len {
        return None;
    }

    Some((start as usize, stop as usize))
}
