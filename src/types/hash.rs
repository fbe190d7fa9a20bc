//! Hash values with insertion order preserved.
//!
//! Fields map to a monotonically increasing sequence number; a `BTreeMap`
//! keyed by that number holds the field/value pairs in insertion order.
//! Overwriting a field keeps its original position, deleting it frees the
//! slot. A running size estimate is kept alongside.

use crate::error::{EngineError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<(Bytes, Bytes)>", into = "Vec<(Bytes, Bytes)>")]
pub struct HashValue {
    index: HashMap<Bytes, u64>,
    entries: BTreeMap<u64, (Bytes, Bytes)>,
    next_seq: u64,
    footprint: usize,
}

const PAIR_OVERHEAD: usize = 48;

impl HashValue {
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Sets a field.
    ///
    /// # Returns
    ///
    /// `true` if the field was newly created.
    pub fn set(&mut self, field: Bytes, value: Bytes) -> bool {
        if let Some(seq) = self.index.get(&field) {
            if let Some(slot) = self.entries.get_mut(seq) {
                self.footprint = self.footprint - slot.1.len() + value.len();
                slot.1 = value;
            }
            return false;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.footprint += field.len() + value.len() + PAIR_OVERHEAD;
        self.index.insert(field.clone(), seq);
        self.entries.insert(seq, (field, value));
        true
    }

    pub fn get(&self, field: &[u8]) -> Option<&Bytes> {
        let seq = self.index.get(field)?;
        self.entries.get(seq).map(|(_, v)| v)
    }

    pub fn contains(&self, field: &[u8]) -> bool {
        self.index.contains_key(field)
    }

    pub fn remove(&mut self, field: &[u8]) -> bool {
        match self.index.remove(field) {
            Some(seq) => {
                if let Some((f, v)) = self.entries.remove(&seq) {
                    self.footprint -= f.len() + v.len() + PAIR_OVERHEAD;
                }
                true
            }
            None => false,
        }
    }

    /// Adds `delta` to an integer field (absent counts as 0).
    pub fn incr_by(&mut self, field: Bytes, delta: i64) -> Result<i64> {
        let current = match self.get(&field) {
            Some(v) => std::str::from_utf8(v)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| {
                    EngineError::MalformedArgument("hash value is not an integer".to_string())
                })?,
            None => 0,
        };

        let next = current.checked_add(delta).ok_or_else(|| {
            EngineError::MalformedArgument("increment or decrement would overflow".to_string())
        })?;
        self.set(field, Bytes::from(next.to_string()));
        Ok(next)
    }

    /// Field/value pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &Bytes)> {
        self.entries.values().map(|(f, v)| (f, v))
    }

    pub(crate) fn approx_size(&self) -> usize {
        self.footprint
    }
}

impl PartialEq for HashValue {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl From<Vec<(Bytes, Bytes)>> for HashValue {
    fn from(pairs: Vec<(Bytes, Bytes)>) -> Self {
        let mut hash = HashValue::default();
        for (field, value) in pairs {
            hash.set(field, value);
        }
        hash
    }
}

impl From<HashValue> for Vec<(Bytes, Bytes)> {
    fn from(hash: HashValue) -> Self {
        hash.entries.into_values().collect()
    }
}
