//! Background persistence tasks.
//!
//! Both tasks follow the same shape as the expiry sweeper: a tokio task
//! driven by a sleep/shutdown `select!`, owned by a handle that stops it on
//! drop. File work runs on the blocking pool.

use super::PersistenceEngine;
use crate::storage::Keyspace;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// How often the snapshotter checks its triggers.
const SNAPSHOT_POLL: Duration = Duration::from_millis(250);

/// Periodically snapshots the keyspace.
///
/// A snapshot is taken once `snapshot_interval` has elapsed since the last
/// one, or earlier once `snapshot_after_writes` records have been logged.
#[derive(Debug)]
pub struct Snapshotter {
    shutdown_tx: watch::Sender<bool>,
}

impl Snapshotter {
    pub fn start(persistence: Arc<PersistenceEngine>, keyspace: Arc<Keyspace>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(snapshot_loop(persistence, keyspace, shutdown_rx));
        info!("Background snapshotter started");
        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        info!("Background snapshotter stopped");
    }
}

impl Drop for Snapshotter {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn snapshot_loop(
    persistence: Arc<PersistenceEngine>,
    keyspace: Arc<Keyspace>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let interval = persistence.config().snapshot_interval();
    let after_writes = persistence.config().snapshot_after_writes;
    let mut last_snapshot = Instant::now();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(SNAPSHOT_POLL) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Snapshotter received shutdown signal");
                    return;
                }
            }
        }

        let writes = persistence.writes_since_snapshot();
        if writes == 0 {
            continue;
        }
        let due_by_time = interval.is_some_and(|every| last_snapshot.elapsed() >= every);
        let due_by_writes = after_writes > 0 && writes >= after_writes;
        if !due_by_time && !due_by_writes {
            continue;
        }

        debug!(writes = writes, by_time = due_by_time, "Snapshot triggered");
        let persistence = Arc::clone(&persistence);
        let keyspace = Arc::clone(&keyspace);
        let result =
            tokio::task::spawn_blocking(move || persistence.create_snapshot(&keyspace)).await;
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!(error = %e, "Background snapshot failed"),
            Err(e) => error!(error = %e, "Background snapshot task panicked"),
        }
        last_snapshot = Instant::now();
    }
}

/// Periodically fsyncs records buffered under the batched policy.
#[derive(Debug)]
pub struct WalFlusher {
    shutdown_tx: watch::Sender<bool>,
}

impl WalFlusher {
    pub fn start(persistence: Arc<PersistenceEngine>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(flush_loop(persistence, shutdown_rx));
        info!("Background WAL flusher started");
        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        info!("Background WAL flusher stopped");
    }
}

impl Drop for WalFlusher {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn flush_loop(persistence: Arc<PersistenceEngine>, mut shutdown_rx: watch::Receiver<bool>) {
    let interval = persistence.config().flush_interval().max(Duration::from_millis(1));

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("WAL flusher received shutdown signal");
                    return;
                }
            }
        }

        if persistence.pending() == 0 {
            continue;
        }
        let persistence = Arc::clone(&persistence);
        match tokio::task::spawn_blocking(move || persistence.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Background WAL flush failed"),
            Err(e) => error!(error = %e, "Background WAL flush task panicked"),
        }
    }
}
