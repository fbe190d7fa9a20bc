//! Eviction Policies
//!
//! When a memory ceiling is configured, the keyspace asks its policy for a
//! victim each time estimated usage goes over the limit, and keeps asking
//! until usage is back under it or the policy has nothing left to offer.
//!
//! ## Design
//!
//! Policies only track keys; they never touch values. The keyspace calls
//! [`EvictionPolicy::record_access`] on every read and write and
//! [`EvictionPolicy::forget`] whenever a key goes away for another reason
//! (delete, expiry, rename), so a policy never hands back a key that no
//! longer exists.
//!
//! - [`LruPolicy`]: recency order kept by an unbounded `lru::LruCache`.
//! - [`LfuPolicy`]: access counters in an ordered set of
//!   `(count, first_seen, key)`; the smallest count goes first and ties go to
//!   the key seen earliest.
//! - [`NoEviction`]: used when no ceiling is configured.

use bytes::Bytes;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// A pluggable victim-selection strategy.
pub trait EvictionPolicy: Send + fmt::Debug {
    /// Short name, as it appears in config files and logs.
    fn name(&self) -> &'static str;

    /// Notes a read or write of `key`.
    fn record_access(&mut self, key: &Bytes);

    /// Stops tracking `key`.
    fn forget(&mut self, key: &[u8]);

    /// Picks a victim and stops tracking it.
    fn evict(&mut self) -> Option<Bytes>;

    fn clear(&mut self);

    /// Number of keys tracked.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which policy to build, as named in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionKind {
    #[default]
    Lru,
    Lfu,
}

/// Memory ceiling and victim selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    /// Ceiling on estimated memory in bytes; `0` disables eviction.
    pub max_memory: usize,

    pub policy: EvictionKind,
}

impl EvictionKind {
    pub fn build(self) -> Box<dyn EvictionPolicy> {
        match self {
            EvictionKind::Lru => Box::new(LruPolicy::new()),
            EvictionKind::Lfu => Box::new(LfuPolicy::new()),
        }
    }
}

// ============================================================================
// LRU
// ============================================================================

/// Evicts the least recently touched key.
pub struct LruPolicy {
    order: LruCache<Bytes, ()>,
}

impl LruPolicy {
    pub fn new() -> Self {
        Self {
            order: LruCache::unbounded(),
        }
    }
}

impl Default for LruPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LruPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruPolicy")
            .field("tracked", &self.order.len())
            .finish()
    }
}

impl EvictionPolicy for LruPolicy {
    fn name(&self) -> &'static str {
        "lru"
    }

    fn record_access(&mut self, key: &Bytes) {
        // put() on an existing key also promotes it
        self.order.put(key.clone(), ());
    }

    fn forget(&mut self, key: &[u8]) {
        self.order.pop(key);
    }

    fn evict(&mut self) -> Option<Bytes> {
        self.order.pop_lru().map(|(key, _)| key)
    }

    fn clear(&mut self) {
        self.order.clear();
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

// ============================================================================
// LFU
// ============================================================================

/// Evicts the least frequently used key; ties go to the oldest.
#[derive(Debug, Default)]
pub struct LfuPolicy {
    counters: HashMap<Bytes, (u64, u64)>,
    order: BTreeSet<(u64, u64, Bytes)>,
    next_seq: u64,
}

impl LfuPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Access count for `key`, if tracked.
    pub fn frequency(&self, key: &[u8]) -> Option<u64> {
        self.counters.get(key).map(|(count, _)| *count)
    }
}

impl EvictionPolicy for LfuPolicy {
    fn name(&self) -> &'static str {
        "lfu"
    }

    fn record_access(&mut self, key: &Bytes) {
        match self.counters.get_mut(key) {
            Some((count, seq)) => {
                self.order.remove(&(*count, *seq, key.clone()));
                *count += 1;
                self.order.insert((*count, *seq, key.clone()));
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.counters.insert(key.clone(), (1, seq));
                self.order.insert((1, seq, key.clone()));
            }
        }
    }

    fn forget(&mut self, key: &[u8]) {
        if let Some((key, (count, seq))) = self.counters.remove_entry(key) {
            self.order.remove(&(count, seq, key));
        }
    }

    fn evict(&mut self) -> Option<Bytes> {
        let (_, _, key) = self.order.pop_first()?;
        self.counters.remove(&key);
        Some(key)
    }

    fn clear(&mut self) {
        self.counters.clear();
        self.order.clear();
    }

    fn len(&self) -> usize {
        self.counters.len()
    }
}

// ============================================================================
// No eviction
// ============================================================================

/// Tracks nothing and never evicts.
#[derive(Debug, Default)]
pub struct NoEviction;

impl EvictionPolicy for NoEviction {
    fn name(&self) -> &'static str {
        "noeviction"
    }

    fn record_access(&mut self, _key: &Bytes) {}

    fn forget(&mut self, _key: &[u8]) {}

    fn evict(&mut self) -> Option<Bytes> {
        None
    }

    fn clear(&mut self) {}

    fn len(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    #[test]
    fn test_lru_evicts_least_recent() {
        let mut lru = LruPolicy::new();
        lru.record_access(&b("a"));
        lru.record_access(&b("b"));
        lru.record_access(&b("c"));
        lru.record_access(&b("a"));

        assert_eq!(lru.evict(), Some(b("b")));
        assert_eq!(lru.evict(), Some(b("c")));
        assert_eq!(lru.evict(), Some(b("a")));
        assert_eq!(lru.evict(), None);
    }

    #[test]
    fn test_lru_forget() {
        let mut lru = LruPolicy::new();
        lru.record_access(&b("a"));
        lru.record_access(&b("b"));
        lru.forget(b"a");
        assert_eq!(lru.len(), 1);
        assert_eq!(lru.evict(), Some(b("b")));
    }

    #[test]
    fn test_lfu_evicts_least_frequent() {
        let mut lfu = LfuPolicy::new();
        for _ in 0..3 {
            lfu.record_access(&b("hot"));
        }
        lfu.record_access(&b("cold"));
        lfu.record_access(&b("warm"));
        lfu.record_access(&b("warm"));

        assert_eq!(lfu.frequency(b"hot"), Some(3));
        assert_eq!(lfu.evict(), Some(b("cold")));
        assert_eq!(lfu.evict(), Some(b("warm")));
        assert_eq!(lfu.evict(), Some(b("hot")));
        assert!(lfu.is_empty());
    }

    #[test]
    fn test_lfu_ties_break_by_first_seen() {
        let mut lfu = LfuPolicy::new();
        lfu.record_access(&b("z"));
        lfu.record_access(&b("a"));
        lfu.record_access(&b("m"));
        lfu.forget(b"z");

        assert_eq!(lfu.evict(), Some(b("a")));
        assert_eq!(lfu.evict(), Some(b("m")));
    }

    #[test]
    fn test_kind_builds_named_policy() {
        assert_eq!(EvictionKind::Lru.build().name(), "lru");
        assert_eq!(EvictionKind::Lfu.build().name(), "lfu");
        let parsed: EvictionKind = serde_json::from_str("\"lfu\"").unwrap();
        assert_eq!(parsed, EvictionKind::Lfu);
    }
}
