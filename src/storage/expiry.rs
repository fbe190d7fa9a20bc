//! Expiry Manager and Background Sweeper
//!
//! Keys with a TTL are removed in two ways:
//!
//! 1. **Lazy**: every keyspace accessor checks the key's deadline first and
//!    drops it on the spot if it has passed. This path is authoritative; an
//!    expired key is never visible.
//! 2. **Active**: a background task periodically pulls due keys from the
//!    deadline index and deletes them, reclaiming memory for keys nobody reads.
//!
//! ## Design
//!
//! ```text
//!        ┌────────────────────────── ExpiryManager (own Mutex) ─┐
//!        │ by_key:  HashMap<key, deadline_ms>                   │
//!        │ by_time: BTreeSet<(deadline_ms, key)>   ◀── sweep    │
//!        └──────────────────────────────────────────────────────┘
//!                 ▲ brief lookups
//!        ┌────────┴─────────┐
//!        │  Keyspace Store  │ (lock order: keyspace, then expiry)
//!        └──────────────────┘
//! ```
//!
//! Deadlines are absolute unix milliseconds, so they survive a snapshot and
//! replay unchanged. The sweeper reads due keys under the expiry lock only,
//! then re-checks each one under the keyspace lock before deleting it; a TTL
//! refreshed in between keeps the key alive. Deleting an already-deleted key
//! is a no-op, so the sweeper and lazy expiry can race freely.
//!
//! ## Adaptive Frequency
//!
//! If many keys are expiring, the sweeper runs more often; if nothing
//! expires, it backs off to save CPU.

use crate::storage::Keyspace;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Current wall-clock time in unix milliseconds.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

// ============================================================================
// TTL reporting
// ============================================================================

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The key does not exist.
    Missing,
    /// The key exists and never expires.
    Persistent,
    /// Milliseconds until the key expires.
    Remaining(u64),
}

impl Ttl {
    /// Seconds remaining, rounded to nearest; `-1` no TTL, `-2` absent.
    pub fn as_secs(&self) -> i64 {
        match self {
            Ttl::Missing => -2,
            Ttl::Persistent => -1,
            Ttl::Remaining(ms) => ((ms + 500) / 1000) as i64,
        }
    }

    /// Milliseconds remaining; `-1` no TTL, `-2` absent.
    pub fn as_millis(&self) -> i64 {
        match self {
            Ttl::Missing => -2,
            Ttl::Persistent => -1,
            Ttl::Remaining(ms) => *ms as i64,
        }
    }
}

// ============================================================================
// Deadline index
// ============================================================================

#[derive(Debug, Default)]
struct DeadlineIndex {
    by_key: HashMap<Bytes, u64>,
    by_time: BTreeSet<(u64, Bytes)>,
}

/// Tracks absolute expiration times, ordered by deadline.
#[derive(Debug, Default)]
pub struct ExpiryManager {
    index: Mutex<DeadlineIndex>,
}

impl ExpiryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets (or replaces) the deadline of `key`.
    ///
    /// Callers check that the key exists; the index itself does not know.
    pub fn set_deadline(&self, key: &Bytes, at_ms: u64) {
        let mut index = self.index.lock();
        if let Some(old) = index.by_key.insert(key.clone(), at_ms) {
            index.by_time.remove(&(old, key.clone()));
        }
        index.by_time.insert((at_ms, key.clone()));
    }

    /// Removes the deadline of `key`.
    ///
    /// # Returns
    ///
    /// `true` if the key had one.
    pub fn clear_expiry(&self, key: &[u8]) -> bool {
        let mut index = self.index.lock();
        match index.by_key.remove_entry(key) {
            Some((key, at_ms)) => {
                index.by_time.remove(&(at_ms, key));
                true
            }
            None => false,
        }
    }

    pub fn deadline(&self, key: &[u8]) -> Option<u64> {
        self.index.lock().by_key.get(key).copied()
    }

    pub fn is_expired(&self, key: &[u8], now_ms: u64) -> bool {
        self.deadline(key).is_some_and(|at| at <= now_ms)
    }

    /// Up to `limit` keys whose deadline is `<= now_ms`, earliest first.
    pub fn due(&self, now_ms: u64, limit: usize) -> Vec<Bytes> {
        let index = self.index.lock();
        index
            .by_time
            .iter()
            .take_while(|(at, _)| *at <= now_ms)
            .take(limit)
            .map(|(_, key)| key.clone())
            .collect()
    }

    /// Number of keys with a deadline.
    pub fn len(&self) -> usize {
        self.index.lock().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut index = self.index.lock();
        index.by_key.clear();
        index.by_time.clear();
    }
}

// ============================================================================
// Background sweeper
// ============================================================================

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpiryConfig {
    /// Base interval between sweeps, in milliseconds (default: 100)
    pub base_interval_ms: u64,

    /// Minimum interval between sweeps (default: 10)
    pub min_interval_ms: u64,

    /// Maximum interval between sweeps (default: 1000)
    pub max_interval_ms: u64,

    /// If this fraction of keys expired in one sweep, speed up
    pub speedup_threshold: f64,

    /// If this fraction of keys expired in one sweep, slow down
    pub slowdown_threshold: f64,

    /// Maximum keys removed per sweep
    pub sweep_batch: usize,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 100,
            min_interval_ms: 10,
            max_interval_ms: 1000,
            speedup_threshold: 0.25,
            slowdown_threshold: 0.01,
            sweep_batch: 1000,
        }
    }
}

impl ExpiryConfig {
    pub fn base_interval(&self) -> Duration {
        Duration::from_millis(self.base_interval_ms)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Starts the expiry sweeper as a background task.
    ///
    /// # Arguments
    ///
    /// * `keyspace` - The keyspace to sweep
    /// * `config` - Sweep interval and batch settings
    ///
    /// # Returns
    ///
    /// A handle that stops the sweeper when dropped.
    pub fn start(keyspace: Arc<Keyspace>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(keyspace, config, shutdown_rx));

        info!("Background expiry sweeper started");

        Self { shutdown_tx }
    }

    /// Stops the expiry sweeper.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        info!("Background expiry sweeper stopped");
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    keyspace: Arc<Keyspace>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut current_interval = config.base_interval();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(current_interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let keys_before = keyspace.len();
        let expired = keyspace.sweep_expired(config.sweep_batch);

        if keys_before > 0 {
            let expiry_rate = expired as f64 / keys_before as f64;

            if expiry_rate > config.speedup_threshold || expired >= config.sweep_batch {
                current_interval = (current_interval / 2).max(config.min_interval());
                debug!(
                    expired = expired,
                    rate = %format!("{:.2}%", expiry_rate * 100.0),
                    new_interval_ms = current_interval.as_millis(),
                    "High expiry rate, speeding up sweeper"
                );
            } else if expiry_rate < config.slowdown_threshold && expired == 0 {
                current_interval = (current_interval * 2).min(config.max_interval());
                trace!(
                    new_interval_ms = current_interval.as_millis(),
                    "Low expiry rate, slowing down sweeper"
                );
            }
        }

        if expired > 0 {
            debug!(
                expired = expired,
                keys_remaining = keyspace.len(),
                "Expired keys cleaned up"
            );
        }
    }
}
