//! List values.
//!
//! A list is a [`VecDeque`] of byte strings, giving O(1) push/pop at both
//! ends. Indices follow the usual convention: `0` is the head, `-1` the tail.
//!
//! The list keeps a running size estimate, updated on every insert and
//! removal, so memory accounting never walks the elements.

use super::normalize_range;
use crate::error::{EngineError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Per-element overhead added to the payload length in size estimates.
const ITEM_OVERHEAD: usize = 16;

fn item_size(item: &Bytes) -> usize {
    item.len() + ITEM_OVERHEAD
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "VecDeque<Bytes>", into = "VecDeque<Bytes>")]
pub struct ListValue {
    items: VecDeque<Bytes>,
    footprint: usize,
}

/// Which end of the list an operation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum End {
    Left,
    Right,
}

impl ListValue {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Pushes each value in turn, so `LPUSH k a b` leaves `b` at the head.
    ///
    /// # Returns
    ///
    /// The new list length.
    pub fn push(&mut self, end: End, values: &[Bytes]) -> usize {
        for value in values {
            self.footprint += item_size(value);
            match end {
                End::Left => self.items.push_front(value.clone()),
                End::Right => self.items.push_back(value.clone()),
            }
        }
        self.items.len()
    }

    /// Pops up to `count` values from one end.
    pub fn pop(&mut self, end: End, count: usize) -> Vec<Bytes> {
        let count = count.min(self.items.len());
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let item = match end {
                End::Left => self.items.pop_front(),
                End::Right => self.items.pop_back(),
            };
            match item {
                Some(item) => {
                    self.footprint -= item_size(&item);
                    out.push(item);
                }
                None => break,
            }
        }
        out
    }

    fn resolve_index(&self, index: i64) -> Option<usize> {
        let len = self.items.len() as i64;
        let idx = if index < 0 { len + index } else { index };
        if idx < 0 || idx >= len {
            None
        } else {
            Some(idx as usize)
        }
    }

    pub fn index(&self, index: i64) -> Option<&Bytes> {
        self.resolve_index(index).and_then(|i| self.items.get(i))
    }

    /// Returns the elements in the inclusive range `[start, stop]`.
    pub fn range(&self, start: i64, stop: i64) -> Vec<Bytes> {
        match normalize_range(start, stop, self.items.len()) {
            Some((s, e)) => self.items.range(s..=e).cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn set(&mut self, index: i64, value: Bytes) -> Result<()> {
        let idx = self
            .resolve_index(index)
            .ok_or_else(|| EngineError::OutOfRange("index out of range".to_string()))?;
        self.footprint += item_size(&value);
        let old = std::mem::replace(&mut self.items[idx], value);
        self.footprint -= item_size(&old);
        Ok(())
    }

    /// LREM semantics: `count > 0` removes from the head, `count < 0` from
    /// the tail, `0` removes all occurrences.
    pub fn remove(&mut self, count: i64, value: &[u8]) -> usize {
        let limit = if count == 0 {
            usize::MAX
        } else {
            count.unsigned_abs() as usize
        };
        let mut removed = 0;

        if count >= 0 {
            let mut i = 0;
            while i < self.items.len() && removed < limit {
                if self.items[i] == value {
                    self.unlink(i);
                    removed += 1;
                } else {
                    i += 1;
                }
            }
        } else {
            let mut i = self.items.len();
            while i > 0 && removed < limit {
                i -= 1;
                if self.items[i] == value {
                    self.unlink(i);
                    removed += 1;
                }
            }
        }

        removed
    }

    fn unlink(&mut self, index: usize) {
        if let Some(item) = self.items.remove(index) {
            self.footprint -= item_size(&item);
        }
    }

    /// Keeps only the inclusive range `[start, stop]`.
    pub fn trim(&mut self, start: i64, stop: i64) {
        match normalize_range(start, stop, self.items.len()) {
            Some((s, e)) => {
                let dropped: usize = self.items.drain(e + 1..).map(|i| item_size(&i)).sum();
                let front: usize = self.items.drain(..s).map(|i| item_size(&i)).sum();
                self.footprint -= dropped + front;
            }
            None => {
                self.items.clear();
                self.footprint = 0;
            }
        }
    }

    /// Inserts `value` before or after the first occurrence of `pivot`.
    ///
    /// # Returns
    ///
    /// The new length, or `None` when the pivot is not found.
    pub fn insert(&mut self, before: bool, pivot: &[u8], value: Bytes) -> Option<usize> {
        let pos = self.items.iter().position(|item| item == pivot)?;
        let at = if before { pos } else { pos + 1 };
        self.footprint += item_size(&value);
        self.items.insert(at, value);
        Some(self.items.len())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bytes> {
        self.items.iter()
    }

    pub(crate) fn approx_size(&self) -> usize {
        self.footprint
    }
}

impl From<VecDeque<Bytes>> for ListValue {
    fn from(items: VecDeque<Bytes>) -> Self {
        let footprint = items.iter().map(item_size).sum();
        Self { items, footprint }
    }
}

impl From<ListValue> for VecDeque<Bytes> {
    fn from(list: ListValue) -> Self {
        list.items
    }
}

impl FromIterator<Bytes> for ListValue {
    fn from_iter<I: IntoIterator<Item = Bytes>>(iter: I) -> Self {
        iter.into_iter().collect::<VecDeque<_>>().into()
    }
}
