//! Persistence Module
//!
//! Durability for the keyspace: a write-ahead log of applied mutations plus
//! periodic point-in-time snapshots.
//!
//! ## Architecture
//!
//! ```text
//!   command applied ──► PersistenceEngine::log_command ──► wal.log
//!                                                            │
//!   Snapshotter ──► create_snapshot ──► dump.snap (rename)   │
//!                           └──────────► compact ────────────┘
//!
//!   startup: dump.snap ──► import ──► replay wal.log (seq > last_seq)
//! ```
//!
//! ## Design
//!
//! - Records are appended while the keyspace lock is held, so the log order
//!   is the apply order.
//! - Snapshots clone the keyspace under its lock and do all encoding and
//!   file work after releasing it.
//! - A snapshot records the newest sequence number it covers; the log is
//!   then rewritten without those records. Because replay skips anything at
//!   or below `last_seq`, a crash between the two steps loses nothing.

pub mod engine;
pub mod snapshot;
pub mod tasks;
pub mod wal;

pub use engine::{PersistenceEngine, RecoveryReport, SnapshotInfo};
pub use snapshot::Snapshot;
pub use tasks::{Snapshotter, WalFlusher};
pub use wal::{WalRecord, WalWriter};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// When appended records reach the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// fsync after every record.
    Always,
    /// fsync once `max_pending` records are buffered (and on every
    /// background flush tick).
    Batched { max_pending: usize },
}

/// Configured fsync mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsyncMode {
    Always,
    #[default]
    Batched,
}

/// Configuration for the WAL and snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Turns the whole layer on or off (default: false)
    pub enabled: bool,

    /// Directory holding the log and snapshot files
    pub dir: PathBuf,

    pub wal_file: String,

    pub snapshot_file: String,

    pub fsync: FsyncMode,

    /// Records buffered before a batched fsync (default: 64)
    pub max_pending: usize,

    /// Background WAL flush period, in milliseconds (default: 1000)
    pub flush_interval_ms: u64,

    /// Time between snapshots in seconds; `0` disables timed snapshots
    pub snapshot_interval_secs: u64,

    /// Snapshot early after this many logged records; `0` disables
    pub snapshot_after_writes: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("data"),
            wal_file: "wal.log".to_string(),
            snapshot_file: "dump.snap".to_string(),
            fsync: FsyncMode::Batched,
            max_pending: 64,
            flush_interval_ms: 1000,
            snapshot_interval_secs: 300,
            snapshot_after_writes: 10_000,
        }
    }
}

impl PersistenceConfig {
    /// An enabled configuration rooted at `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            dir: dir.into(),
            ..Default::default()
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.dir.join(&self.wal_file)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(&self.snapshot_file)
    }

    pub fn fsync_policy(&self) -> FsyncPolicy {
        match self.fsync {
            FsyncMode::Always => FsyncPolicy::Always,
            FsyncMode::Batched => FsyncPolicy::Batched {
                max_pending: self.max_pending,
            },
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// `None` when timed snapshots are disabled.
    pub fn snapshot_interval(&self) -> Option<Duration> {
        (self.snapshot_interval_secs > 0).then(|| Duration::from_secs(self.snapshot_interval_secs))
    }
}
