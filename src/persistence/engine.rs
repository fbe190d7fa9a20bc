//! The persistence engine: logging, snapshots and recovery.

use super::snapshot::Snapshot;
use super::wal::{self, WalWriter};
use super::PersistenceConfig;
use crate::commands::Command;
use crate::error::{EngineError, Result};
use crate::storage::Keyspace;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

/// What [`PersistenceEngine::create_snapshot`] wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub keys: usize,
    pub last_seq: u64,
    pub bytes: u64,
    /// WAL records left after compaction.
    pub wal_records: usize,
}

/// What [`PersistenceEngine::restore`] found on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub snapshot_keys: usize,
    /// A snapshot existed but failed validation and was ignored.
    pub snapshot_corrupt: bool,
    pub replayed_records: usize,
    /// Records at or below the snapshot's sequence number.
    pub skipped_records: usize,
    /// Logged commands that failed again on replay.
    pub failed_commands: usize,
    pub torn_tail: bool,
}

/// Owns the WAL writer and the snapshot file.
#[derive(Debug)]
pub struct PersistenceEngine {
    config: PersistenceConfig,
    wal: Mutex<WalWriter>,
    writes_since_snapshot: AtomicU64,
    /// Serializes snapshot creation.
    snapshotting: Mutex<()>,
}

impl PersistenceEngine {
    /// Creates the data directory if needed and opens the log.
    pub fn open(config: PersistenceConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.dir)?;
        let wal = WalWriter::open(config.wal_path(), config.fsync_policy())?;

        info!(
            dir = %config.dir.display(),
            fsync = ?config.fsync,
            "Persistence engine opened"
        );

        Ok(Self {
            config,
            wal: Mutex::new(wal),
            writes_since_snapshot: AtomicU64::new(0),
            snapshotting: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// Appends the log form of one logical mutation.
    ///
    /// Callers hold the keyspace lock, so records land in apply order. A
    /// failure is returned but the mutation it describes stays applied.
    ///
    /// # Returns
    ///
    /// The record's sequence number.
    pub fn log_command(&self, time_ms: u64, commands: Vec<Command>) -> Result<u64> {
        let count = commands.len();
        let seq = self.wal.lock().append(time_ms, commands).map_err(|e| {
            error!(error = %e, commands = count, "Failed to append to write-ahead log");
            e
        })?;
        self.writes_since_snapshot.fetch_add(1, Ordering::Relaxed);
        Ok(seq)
    }

    /// Forces buffered records to disk.
    pub fn flush(&self) -> Result<()> {
        self.wal.lock().flush()
    }

    /// Records written but not yet fsynced.
    pub fn pending(&self) -> usize {
        self.wal.lock().pending()
    }

    pub fn last_seq(&self) -> u64 {
        self.wal.lock().last_seq()
    }

    pub fn writes_since_snapshot(&self) -> u64 {
        self.writes_since_snapshot.load(Ordering::Relaxed)
    }

    /// Writes a snapshot of `keyspace` and compacts the log behind it.
    ///
    /// The keyspace is copied under its lock; encoding and file I/O run
    /// after the lock is released. If writing fails the previous snapshot
    /// is left untouched.
    pub fn create_snapshot(&self, keyspace: &Keyspace) -> Result<SnapshotInfo> {
        let _guard = self.snapshotting.lock();

        let (entries, last_seq, created_at_ms, writes) = {
            let store = keyspace.lock();
            let writes = self.writes_since_snapshot.load(Ordering::Relaxed);
            (store.export(), self.wal.lock().last_seq(), store.now_ms(), writes)
        };
        let keys = entries.len();

        let snapshot = Snapshot::new(created_at_ms, last_seq, entries);
        let bytes = snapshot.write_to(&self.config.snapshot_path()).map_err(|e| {
            error!(error = %e, "Snapshot write failed; previous snapshot kept");
            e
        })?;
        self.writes_since_snapshot.fetch_sub(writes, Ordering::Relaxed);

        let wal_records = self.wal.lock().compact(last_seq)?;

        info!(
            keys = keys,
            bytes = bytes,
            last_seq = last_seq,
            wal_records = wal_records,
            "Snapshot written"
        );

        Ok(SnapshotInfo {
            keys,
            last_seq,
            bytes,
            wal_records,
        })
    }

    /// Rebuilds `keyspace` from the snapshot and the log.
    ///
    /// A missing snapshot starts from empty; a corrupt one is logged and
    /// also starts from empty. Each log record is then replayed with the
    /// clock pinned to the time it was first applied. Replay never writes
    /// to the log and never evicts.
    pub fn restore(&self, keyspace: &Keyspace) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let snapshot_path = self.config.snapshot_path();

        let last_seq = match Snapshot::read_from(&snapshot_path) {
            Ok(Some(snapshot)) => {
                report.snapshot_keys = snapshot.entries.len();
                let mut store = keyspace.lock_at(snapshot.created_at_ms);
                store.import(snapshot.entries);
                info!(
                    keys = report.snapshot_keys,
                    last_seq = snapshot.last_seq,
                    "Snapshot loaded"
                );
                snapshot.last_seq
            }
            Ok(None) => {
                debug!(path = %snapshot_path.display(), "No snapshot found");
                0
            }
            Err(e @ EngineError::StorageCorrupt(_)) => {
                warn!(
                    path = %snapshot_path.display(),
                    error = %e,
                    "Snapshot is corrupt; starting from an empty keyspace"
                );
                report.snapshot_corrupt = true;
                keyspace.flush();
                0
            }
            Err(e) => return Err(e),
        };

        let scan = wal::scan(&self.config.wal_path())?;
        report.torn_tail = scan.torn || self.wal.lock().truncated_on_open();

        for record in scan.records {
            if record.seq <= last_seq {
                report.skipped_records += 1;
                continue;
            }
            let mut store = keyspace.lock_at(record.time_ms);
            store.set_replaying(true);
            for command in &record.commands {
                if let Err(e) = command.apply(&mut store) {
                    report.failed_commands += 1;
                    debug!(seq = record.seq, error = %e, "Logged command failed on replay");
                }
            }
            store.set_replaying(false);
            store.take_touched();
            report.replayed_records += 1;
        }

        self.wal.lock().advance_seq(last_seq);

        info!(
            snapshot_keys = report.snapshot_keys,
            replayed = report.replayed_records,
            skipped = report.skipped_records,
            failed = report.failed_commands,
            keys = keyspace.len(),
            "Recovery complete"
        );
        Ok(report)
    }
}
