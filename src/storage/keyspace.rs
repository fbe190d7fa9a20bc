//! The Keyspace
//!
//! A single map from key to [`Value`], guarded by one mutex. Every command
//! takes the lock for the duration of one logical operation; a transaction
//! takes it once for its whole batch.
//!
//! ## Design
//!
//! ```text
//! ┌──────────────────────────────── Keyspace ─────────────────────────────┐
//! │  Mutex<Store>                                                         │
//! │  ┌──────────────────────────┐  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ entries: key -> Entry    │  │ ExpiryManager│  │ EvictionPolicy  │  │
//! │  │  (value, size estimate)  │  │ (own Mutex)  │  │ (LRU / LFU)     │  │
//! │  └──────────────────────────┘  └──────────────┘  └─────────────────┘  │
//! │  StatCounters (atomics, readable without the lock)                    │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`Keyspace::lock`] stamps the [`Store`] with the current wall-clock time,
//! and every accessor judges expiry against that stamp. Log replay uses
//! [`Keyspace::lock_at`] instead, so a replayed command sees the same clock it
//! saw when it first ran.
//!
//! Every accessor on [`Store`] runs the lazy-expiry check first: a key whose
//! deadline has passed is removed on the spot and reported as absent.
//! Removal is idempotent, so the background sweeper and the read path never
//! disagree about a key that is already gone.

use crate::error::{EngineError, Result};
use crate::storage::eviction::{EvictionConfig, EvictionPolicy, NoEviction};
use crate::storage::expiry::{unix_millis, ExpiryManager, Ttl};
use crate::types::{
    BitString, HashValue, HyperLogLog, ListValue, SetValue, SortedSet, Stream, TypedValue, Value,
    ValueKind, ENTRY_OVERHEAD,
};
use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// A stored value and its memory estimate.
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    /// Estimated footprint; zero while memory accounting is off.
    size: usize,
}

/// One key as it appears in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub key: Bytes,
    pub value: Value,
    /// Absolute deadline in unix milliseconds.
    pub expires_at_ms: Option<u64>,
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Default)]
pub struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    evicted: AtomicU64,
    commands: AtomicU64,
}

impl StatCounters {
    pub fn record_command(&self) {
        self.commands.fetch_add(1, Ordering::Relaxed);
    }
}

/// Keyspace statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    /// Reads that found a live key
    pub hits: u64,
    /// Reads of an absent or expired key
    pub misses: u64,
    /// Keys removed because their TTL passed
    pub expired: u64,
    /// Keys removed by the memory monitor
    pub evicted: u64,
    /// Commands executed through the engine
    pub commands: u64,
}

/// Memory usage information (approximate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub keys: usize,
    pub keys_with_ttl: usize,
    pub used_memory: usize,
    /// `0` means unlimited.
    pub max_memory: usize,
}

// ============================================================================
// Store: the state behind the lock
// ============================================================================

/// The keyspace contents. Only reachable through a [`Keyspace`] lock guard.
#[derive(Debug)]
pub struct Store {
    entries: HashMap<Bytes, Entry>,
    expiry: Arc<ExpiryManager>,
    eviction: Box<dyn EvictionPolicy>,
    max_memory: usize,
    used_memory: usize,
    now_ms: u64,
    replaying: bool,
    evicted: Vec<Bytes>,
    watched: HashMap<Bytes, usize>,
    touched: Vec<Bytes>,
    stats: Arc<StatCounters>,
}

impl Store {
    fn new(expiry: Arc<ExpiryManager>, config: &EvictionConfig, stats: Arc<StatCounters>) -> Self {
        let eviction: Box<dyn EvictionPolicy> = if config.max_memory == 0 {
            Box::new(NoEviction)
        } else {
            config.policy.build()
        };

        Self {
            entries: HashMap::new(),
            expiry,
            eviction,
            max_memory: config.max_memory,
            used_memory: 0,
            now_ms: 0,
            replaying: false,
            evicted: Vec::new(),
            watched: HashMap::new(),
            touched: Vec::new(),
            stats,
        }
    }

    /// The clock every expiry decision under this guard uses.
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub(crate) fn set_replaying(&mut self, replaying: bool) {
        self.replaying = replaying;
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    fn tracks_memory(&self) -> bool {
        self.max_memory > 0
    }

    // ------------------------------------------------------------------------
    // Bookkeeping
    // ------------------------------------------------------------------------

    /// Lazy expiry. Removes `key` if its deadline has passed.
    ///
    /// # Returns
    ///
    /// `true` if this call removed the key; `false` if it was live or
    /// already gone.
    pub(crate) fn expire_if_due(&mut self, key: &[u8]) -> bool {
        if !self.expiry.is_expired(key, self.now_ms) {
            return false;
        }

        self.expiry.clear_expiry(key);
        match self.entries.remove_entry(key) {
            Some((key, entry)) => {
                self.used_memory = self.used_memory.saturating_sub(entry.size);
                self.eviction.forget(&key);
                self.stats.expired.fetch_add(1, Ordering::Relaxed);
                self.mark_touched(&key);
                true
            }
            None => false,
        }
    }

    fn mark_touched(&mut self, key: &[u8]) {
        if let Some((key, _)) = self.watched.get_key_value(key) {
            self.touched.push(key.clone());
        }
    }

    /// Refreshes the size estimate of `key` and notes the access.
    ///
    /// Collection values maintain their own running size, so this is O(1)
    /// whatever the number of elements.
    fn account(&mut self, key: &Bytes) {
        if self.max_memory > 0 {
            if let Some(entry) = self.entries.get_mut(key) {
                let size = key.len() + entry.value.approx_size() + ENTRY_OVERHEAD;
                self.used_memory = self.used_memory.saturating_sub(entry.size) + size;
                entry.size = size;
            }
        }
        self.eviction.record_access(key);
    }

    fn insert(&mut self, key: Bytes, value: Value) {
        if let Some(old) = self.entries.insert(key.clone(), Entry { value, size: 0 }) {
            self.used_memory = self.used_memory.saturating_sub(old.size);
        }
        self.account(&key);
        self.mark_touched(&key);
    }

    fn remove(&mut self, key: &[u8]) -> Option<Value> {
        let (key, entry) = self.entries.remove_entry(key)?;
        self.expiry.clear_expiry(&key);
        self.eviction.forget(&key);
        self.used_memory = self.used_memory.saturating_sub(entry.size);
        self.mark_touched(&key);
        Some(entry.value)
    }

    /// Live value lookup with hit/miss accounting.
    fn lookup(&mut self, key: &[u8]) -> Option<&Value> {
        self.expire_if_due(key);
        match self.entries.get_key_value(key) {
            Some((key, entry)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                self.eviction.record_access(key);
                Some(&entry.value)
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    // ------------------------------------------------------------------------
    // Untyped access
    // ------------------------------------------------------------------------

    pub fn get(&mut self, key: &[u8]) -> Option<&Value> {
        self.lookup(key)
    }

    /// Stores `value` under `key`, replacing any value and clearing any TTL.
    pub fn set(&mut self, key: Bytes, value: Value) {
        self.expiry.clear_expiry(&key);
        self.insert(key, value);
    }

    /// Deletes `key`. Deleting an absent key is not an error.
    ///
    /// # Returns
    ///
    /// `true` if a live key was removed.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        self.expire_if_due(key);
        self.remove(key).is_some()
    }

    /// Removes and returns the value of `key`.
    pub fn take(&mut self, key: &[u8]) -> Option<Value> {
        self.expire_if_due(key);
        self.remove(key)
    }

    pub fn exists(&mut self, key: &[u8]) -> bool {
        self.expire_if_due(key);
        self.entries.contains_key(key)
    }

    pub fn key_type(&mut self, key: &[u8]) -> Option<ValueKind> {
        self.expire_if_due(key);
        self.entries.get(key).map(|entry| entry.value.kind())
    }

    // ------------------------------------------------------------------------
    // Typed access
    // ------------------------------------------------------------------------

    /// Runs `f` against the value of `key` as a `T`.
    ///
    /// # Returns
    ///
    /// `Ok(None)` if the key is absent, `Err(WrongType)` if it holds another
    /// variant.
    pub fn read<T: TypedValue, R>(&mut self, key: &[u8], f: impl FnOnce(&T) -> R) -> Result<Option<R>> {
        match self.lookup(key) {
            None => Ok(None),
            Some(value) => T::from_ref(value).map(|typed| Some(f(typed))).ok_or(EngineError::WrongType),
        }
    }

    /// Borrows the value of `key` as a `T` with no expiry check or access
    /// bookkeeping. Multi-key commands call [`Store::read`] on every key
    /// first, then hold several views at once.
    pub fn view<T: TypedValue>(&self, key: &[u8]) -> Option<&T> {
        self.entries.get(key).and_then(|entry| T::from_ref(&entry.value))
    }

    /// Runs `f` against the value of `key` as a mutable `T`.
    ///
    /// With `create`, an absent key starts out as `T::default()`; if `f`
    /// fails, the freshly created key is removed again. Collections left
    /// empty by `f` are deleted.
    ///
    /// # Returns
    ///
    /// `Ok(None)` if the key is absent and `create` is false.
    pub fn write<T: TypedValue, R>(
        &mut self,
        key: &Bytes,
        create: bool,
        f: impl FnOnce(&mut T) -> Result<R>,
    ) -> Result<Option<R>> {
        self.expire_if_due(key);

        let created = match self.entries.get(key) {
            Some(entry) if T::from_ref(&entry.value).is_none() => return Err(EngineError::WrongType),
            Some(_) => false,
            None if create => {
                self.entries.insert(
                    key.clone(),
                    Entry {
                        value: T::default().into(),
                        size: 0,
                    },
                );
                true
            }
            None => return Ok(None),
        };

        let (result, empty) = match self.entries.get_mut(key).and_then(|e| T::from_mut(&mut e.value)) {
            Some(typed) => {
                let result = f(&mut *typed);
                (result, typed.should_delete())
            }
            None => return Err(EngineError::WrongType),
        };

        match result {
            Err(err) => {
                if created {
                    self.entries.remove(key);
                }
                Err(err)
            }
            Ok(out) => {
                if empty {
                    self.remove(key);
                } else {
                    self.account(key);
                    self.mark_touched(key);
                }
                Ok(Some(out))
            }
        }
    }

    pub fn string_ops<R>(
        &mut self,
        key: &Bytes,
        create: bool,
        f: impl FnOnce(&mut Bytes) -> Result<R>,
    ) -> Result<Option<R>> {
        self.write(key, create, f)
    }

    pub fn list_ops<R>(
        &mut self,
        key: &Bytes,
        create: bool,
        f: impl FnOnce(&mut ListValue) -> Result<R>,
    ) -> Result<Option<R>> {
        self.write(key, create, f)
    }

    pub fn set_ops<R>(
        &mut self,
        key: &Bytes,
        create: bool,
        f: impl FnOnce(&mut SetValue) -> Result<R>,
    ) -> Result<Option<R>> {
        self.write(key, create, f)
    }

    pub fn hash_ops<R>(
        &mut self,
        key: &Bytes,
        create: bool,
        f: impl FnOnce(&mut HashValue) -> Result<R>,
    ) -> Result<Option<R>> {
        self.write(key, create, f)
    }

    pub fn zset_ops<R>(
        &mut self,
        key: &Bytes,
        create: bool,
        f: impl FnOnce(&mut SortedSet) -> Result<R>,
    ) -> Result<Option<R>> {
        self.write(key, create, f)
    }

    pub fn stream_ops<R>(
        &mut self,
        key: &Bytes,
        create: bool,
        f: impl FnOnce(&mut Stream) -> Result<R>,
    ) -> Result<Option<R>> {
        self.write(key, create, f)
    }

    pub fn bitfield_ops<R>(
        &mut self,
        key: &Bytes,
        create: bool,
        f: impl FnOnce(&mut BitString) -> Result<R>,
    ) -> Result<Option<R>> {
        self.write(key, create, f)
    }

    pub fn cardinality_ops<R>(
        &mut self,
        key: &Bytes,
        create: bool,
        f: impl FnOnce(&mut HyperLogLog) -> Result<R>,
    ) -> Result<Option<R>> {
        self.write(key, create, f)
    }

    // ------------------------------------------------------------------------
    // Expiration
    // ------------------------------------------------------------------------

    /// Sets an absolute deadline on an existing key.
    ///
    /// A deadline at or before the current clock deletes the key at once.
    ///
    /// # Returns
    ///
    /// `false` if the key does not exist; no key is created.
    pub fn set_expiry_at(&mut self, key: &Bytes, at_ms: u64) -> bool {
        if !self.exists(key) {
            return false;
        }
        if at_ms <= self.now_ms {
            self.remove(key);
            self.stats.expired.fetch_add(1, Ordering::Relaxed);
        } else {
            self.expiry.set_deadline(key, at_ms);
            self.mark_touched(key);
        }
        true
    }

    /// Sets a relative TTL on an existing key.
    pub fn set_expiry(&mut self, key: &Bytes, ttl: Duration) -> bool {
        let at_ms = self.now_ms.saturating_add(ttl.as_millis() as u64);
        self.set_expiry_at(key, at_ms)
    }

    pub fn ttl(&mut self, key: &[u8]) -> Ttl {
        if !self.exists(key) {
            return Ttl::Missing;
        }
        match self.expiry.deadline(key) {
            Some(at_ms) => Ttl::Remaining(at_ms.saturating_sub(self.now_ms)),
            None => Ttl::Persistent,
        }
    }

    /// Removes the TTL of `key`.
    ///
    /// # Returns
    ///
    /// `true` if the key existed and had a TTL.
    pub fn persist(&mut self, key: &[u8]) -> bool {
        if !self.exists(key) {
            return false;
        }
        let cleared = self.expiry.clear_expiry(key);
        if cleared {
            self.mark_touched(key);
        }
        cleared
    }

    // ------------------------------------------------------------------------
    // Whole-keyspace operations
    // ------------------------------------------------------------------------

    /// Live keys matching a glob pattern, sorted.
    ///
    /// Supported patterns:
    /// - `*` matches any run of bytes
    /// - `?` matches exactly one byte
    /// - `[ae]`, `[a-z]`, `[^a]` match one byte from (or not from) a class
    /// - `\x` matches `x` literally
    pub fn keys(&self, pattern: &[u8]) -> Vec<Bytes> {
        let glob = GlobPattern::new(pattern);
        let mut keys: Vec<Bytes> = self
            .entries
            .keys()
            .filter(|key| !self.expiry.is_expired(key, self.now_ms))
            .filter(|key| glob.matches(key))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Moves the value (and TTL) of `from` to `to`, replacing `to`.
    pub fn rename(&mut self, from: &Bytes, to: &Bytes) -> Result<()> {
        if !self.exists(from) {
            return Err(EngineError::NoSuchKey);
        }
        if from == to {
            return Ok(());
        }

        let deadline = self.expiry.deadline(from);
        let value = self.remove(from).ok_or(EngineError::NoSuchKey)?;
        self.delete(to);
        self.insert(to.clone(), value);
        if let Some(at_ms) = deadline {
            self.expiry.set_deadline(to, at_ms);
        }
        Ok(())
    }

    /// Physical entry count, including expired keys not yet removed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every key.
    pub fn flush(&mut self) {
        let removed = self.entries.len();
        self.entries.clear();
        self.expiry.clear();
        self.eviction.clear();
        self.used_memory = 0;
        let watched: Vec<Bytes> = self.watched.keys().cloned().collect();
        self.touched.extend(watched);
        info!(keys = removed, "Keyspace flushed");
    }

    pub fn memory_info(&self) -> MemoryInfo {
        let used_memory = if self.tracks_memory() {
            self.used_memory
        } else {
            self.entries
                .iter()
                .map(|(key, entry)| key.len() + entry.value.approx_size() + ENTRY_OVERHEAD)
                .sum()
        };

        MemoryInfo {
            keys: self.entries.len(),
            keys_with_ttl: self.expiry.len(),
            used_memory,
            max_memory: self.max_memory,
        }
    }

    // ------------------------------------------------------------------------
    // Memory monitor
    // ------------------------------------------------------------------------

    /// Evicts keys until estimated usage is back under the ceiling or the
    /// policy has nothing left. Does nothing during replay.
    ///
    /// # Returns
    ///
    /// The number of keys evicted.
    pub fn enforce_memory_limit(&mut self) -> usize {
        if !self.tracks_memory() || self.replaying {
            return 0;
        }

        let mut evicted = 0;
        while self.used_memory > self.max_memory {
            let Some(victim) = self.eviction.evict() else {
                break;
            };
            if let Some((key, entry)) = self.entries.remove_entry(&victim) {
                self.used_memory = self.used_memory.saturating_sub(entry.size);
                self.expiry.clear_expiry(&key);
                self.stats.evicted.fetch_add(1, Ordering::Relaxed);
                self.mark_touched(&key);
                self.evicted.push(key);
                evicted += 1;
            }
        }

        if evicted > 0 {
            debug!(
                evicted = evicted,
                used_memory = self.used_memory,
                max_memory = self.max_memory,
                policy = self.eviction.name(),
                "Evicted keys over memory ceiling"
            );
        }
        evicted
    }

    /// Keys evicted since the last call.
    pub fn take_evicted(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.evicted)
    }

    // ------------------------------------------------------------------------
    // Watch support
    // ------------------------------------------------------------------------

    /// Starts reporting modifications of `key` through [`Store::take_touched`].
    pub fn watch(&mut self, key: &Bytes) {
        *self.watched.entry(key.clone()).or_insert(0) += 1;
    }

    pub fn unwatch(&mut self, key: &[u8]) {
        if let Some(count) = self.watched.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                self.watched.remove(key);
            }
        }
    }

    /// Watched keys modified since the last call.
    pub fn take_touched(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.touched)
    }

    // ------------------------------------------------------------------------
    // Snapshot support
    // ------------------------------------------------------------------------

    /// A point-in-time copy of every live key, sorted by key.
    pub fn export(&self) -> Vec<KeyRecord> {
        let mut records: Vec<KeyRecord> = self
            .entries
            .iter()
            .filter_map(|(key, entry)| {
                let expires_at_ms = self.expiry.deadline(key);
                if expires_at_ms.is_some_and(|at| at <= self.now_ms) {
                    return None;
                }
                Some(KeyRecord {
                    key: key.clone(),
                    value: entry.value.clone(),
                    expires_at_ms,
                })
            })
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }

    /// Replaces the contents with `records`, skipping any already expired.
    pub fn import(&mut self, records: Vec<KeyRecord>) {
        self.entries.clear();
        self.expiry.clear();
        self.eviction.clear();
        self.used_memory = 0;

        for record in records {
            if record.expires_at_ms.is_some_and(|at| at <= self.now_ms) {
                continue;
            }
            self.insert(record.key.clone(), record.value);
            if let Some(at_ms) = record.expires_at_ms {
                self.expiry.set_deadline(&record.key, at_ms);
            }
        }
    }
}

// ============================================================================
// Keyspace: the shared handle
// ============================================================================

/// Thread-safe keyspace handle.
#[derive(Debug)]
pub struct Keyspace {
    store: Mutex<Store>,
    expiry: Arc<ExpiryManager>,
    stats: Arc<StatCounters>,
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Keyspace {
    /// Creates an unbounded keyspace.
    pub fn new() -> Self {
        Self::with_eviction(&EvictionConfig::default())
    }

    /// Creates a keyspace with a memory ceiling and eviction policy.
    pub fn with_eviction(config: &EvictionConfig) -> Self {
        let expiry = Arc::new(ExpiryManager::new());
        let stats = Arc::new(StatCounters::default());
        Self {
            store: Mutex::new(Store::new(Arc::clone(&expiry), config, Arc::clone(&stats))),
            expiry,
            stats,
        }
    }

    /// Acquires the keyspace lock with the clock set to now.
    pub fn lock(&self) -> MutexGuard<'_, Store> {
        self.lock_at(unix_millis())
    }

    /// Acquires the keyspace lock with the clock pinned to `now_ms`.
    pub fn lock_at(&self, now_ms: u64) -> MutexGuard<'_, Store> {
        let mut store = self.store.lock();
        store.now_ms = now_ms;
        store
    }

    pub fn expiry(&self) -> &ExpiryManager {
        &self.expiry
    }

    pub(crate) fn counters(&self) -> &StatCounters {
        &self.stats
    }

    /// Returns keyspace statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            expired: self.stats.expired.load(Ordering::Relaxed),
            evicted: self.stats.evicted.load(Ordering::Relaxed),
            commands: self.stats.commands.load(Ordering::Relaxed),
        }
    }

    pub fn memory_info(&self) -> MemoryInfo {
        self.lock().memory_info()
    }

    // One-shot conveniences; each takes the lock for a single operation.

    pub fn get(&self, key: &[u8]) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn set(&self, key: Bytes, value: Value) {
        let mut store = self.lock();
        store.set(key, value);
        store.enforce_memory_limit();
    }

    pub fn delete(&self, key: &[u8]) -> bool {
        self.lock().delete(key)
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.lock().exists(key)
    }

    pub fn set_expiry(&self, key: &[u8], ttl: Duration) -> bool {
        self.lock().set_expiry(&Bytes::copy_from_slice(key), ttl)
    }

    pub fn ttl(&self, key: &[u8]) -> Ttl {
        self.lock().ttl(key)
    }

    pub fn persist(&self, key: &[u8]) -> bool {
        self.lock().persist(key)
    }

    pub fn keys(&self, pattern: &[u8]) -> Vec<Bytes> {
        self.lock().keys(pattern)
    }

    /// Physical entry count (see [`Store::len`]).
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flush(&self) {
        self.lock().flush()
    }

    pub fn export(&self) -> Vec<KeyRecord> {
        self.lock().export()
    }

    /// Active expiry: removes up to `limit` keys whose deadline has passed.
    ///
    /// Due keys are collected under the expiry lock alone; each one is then
    /// re-checked under the keyspace lock, so a key whose TTL was refreshed
    /// in between survives.
    ///
    /// # Returns
    ///
    /// Returns the number of keys that were cleaned up.
    pub fn sweep_expired(&self, limit: usize) -> usize {
        let now_ms = unix_millis();
        let due = self.expiry.due(now_ms, limit);
        if due.is_empty() {
            return 0;
        }

        let mut store = self.lock_at(now_ms);
        due.iter().filter(|key| store.expire_if_due(key)).count()
    }
}

// ============================================================================
// Glob matching
// ============================================================================

/// Byte-wise glob matcher for the KEYS command.
struct GlobPattern<'a> {
    pattern: &'a [u8],
}

impl<'a> GlobPattern<'a> {
    fn new(pattern: &'a [u8]) -> Self {
        Self { pattern }
    }

    fn matches(&self, text: &[u8]) -> bool {
        Self::match_from(self.pattern, text)
    }

    fn match_from(pattern: &[u8], text: &[u8]) -> bool {
        let Some((&first, rest)) = pattern.split_first() else {
            return text.is_empty();
        };

        match first {
            b'*' => {
                // collapse runs of stars
                let rest = rest.iter().position(|&c| c != b'*').map_or(&rest[rest.len()..], |i| &rest[i..]);
                if rest.is_empty() {
                    return true;
                }
                (0..=text.len()).any(|i| Self::match_from(rest, &text[i..]))
            }
            b'?' => !text.is_empty() && Self::match_from(rest, &text[1..]),
            b'[' => {
                let Some((&c, text_rest)) = text.split_first() else {
                    return false;
                };
                match Self::match_class(rest, c) {
                    Some((matched, consumed)) => matched && Self::match_from(&rest[consumed..], text_rest),
                    None => false,
                }
            }
            b'\\' if !rest.is_empty() => {
                text.first() == Some(&rest[0]) && Self::match_from(&rest[1..], &text[1..])
            }
            literal => text.first() == Some(&literal) && Self::match_from(rest, &text[1..]),
        }
    }

    /// Matches `c` against a class body that follows `[`.
    ///
    /// Returns whether it matched and how many pattern bytes the class used
    /// (including the closing `]`), or `None` if the class is unterminated.
    fn match_class(class: &[u8], c: u8) -> Option<(bool, usize)> {
        let mut i = 0;
        let negate = class.first() == Some(&b'^');
        if negate {
            i += 1;
        }

        let mut matched = false;
        while i < class.len() && class[i] != b']' {
            let lo = if class[i] == b'\\' && i + 1 < class.len() {
                i += 1;
                class[i]
            } else {
                class[i]
            };

            if i + 2 < class.len() && class[i + 1] == b'-' && class[i + 2] != b']' {
                let hi = class[i + 2];
                let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                matched |= (lo..=hi).contains(&c);
                i += 3;
            } else {
                matched |= lo == c;
                i += 1;
            }
        }

        if i >= class.len() {
            return None;
        }
        Some((matched != negate, i + 1))
    }
}
