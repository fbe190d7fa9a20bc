//! The Engine Facade
//!
//! [`Engine`] owns one keyspace and everything around it: command
//! execution, per-connection transactions, persistence and the background
//! tasks. A dispatcher (a network server, the bundled console, a test)
//! drives it through [`Engine::execute`].
//!
//! ```text
//!   execute(conn, name, args)
//!        │
//!        ├── MULTI / EXEC / DISCARD / WATCH / UNWATCH ──► TransactionManager
//!        │
//!        ├── queuing? ──► parse ──► queue ──► QUEUED
//!        │
//!        └── parse ──► lock ──► CommandHandler::run ──► invalidate watchers
//! ```

use crate::commands::{Args, Command, CommandHandler, Reply};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::persistence::{
    PersistenceEngine, RecoveryReport, SnapshotInfo, Snapshotter, WalFlusher,
};
use crate::storage::{ExpirySweeper, Keyspace, MemoryInfo, StorageStats};
use crate::txn::{ConnectionId, TransactionManager};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Handles of the running background tasks; dropping them stops the tasks.
#[derive(Debug, Default)]
struct BackgroundTasks {
    sweeper: Option<ExpirySweeper>,
    snapshotter: Option<Snapshotter>,
    flusher: Option<WalFlusher>,
}

/// One engine instance.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    keyspace: Arc<Keyspace>,
    persistence: Option<Arc<PersistenceEngine>>,
    handler: CommandHandler,
    transactions: TransactionManager,
    next_connection: AtomicU64,
    recovery: Option<RecoveryReport>,
    tasks: Mutex<BackgroundTasks>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::in_memory(EngineConfig::default())
    }
}

impl Engine {
    /// Creates an engine without persistence, whatever `config` says.
    pub fn in_memory(config: EngineConfig) -> Self {
        let keyspace = Arc::new(Keyspace::with_eviction(&config.eviction));
        Self::assemble(config, keyspace, None, None)
    }

    /// Opens an engine, restoring its state from disk when persistence is
    /// enabled.
    ///
    /// # Errors
    ///
    /// `StorageIo` if the data directory or log cannot be opened. A corrupt
    /// snapshot is not an error: recovery starts from an empty keyspace.
    pub fn open(config: EngineConfig) -> Result<Self> {
        if !config.persistence.enabled {
            return Ok(Self::in_memory(config));
        }

        let keyspace = Arc::new(Keyspace::with_eviction(&config.eviction));
        let persistence = Arc::new(PersistenceEngine::open(config.persistence.clone())?);
        let report = persistence.restore(&keyspace)?;

        Ok(Self::assemble(
            config,
            keyspace,
            Some(persistence),
            Some(report),
        ))
    }

    fn assemble(
        config: EngineConfig,
        keyspace: Arc<Keyspace>,
        persistence: Option<Arc<PersistenceEngine>>,
        recovery: Option<RecoveryReport>,
    ) -> Self {
        let handler = CommandHandler::new(Arc::clone(&keyspace), persistence.clone());
        info!(
            max_memory = config.eviction.max_memory,
            policy = ?config.eviction.policy,
            persistence = persistence.is_some(),
            keys = keyspace.len(),
            "Engine ready"
        );
        Self {
            config,
            keyspace,
            persistence,
            handler,
            transactions: TransactionManager::new(),
            next_connection: AtomicU64::new(1),
            recovery,
            tasks: Mutex::new(BackgroundTasks::default()),
        }
    }

    /// Allocates a fresh connection identity.
    pub fn connect(&self) -> ConnectionId {
        let conn = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));
        debug!(conn = %conn, "Connection opened");
        conn
    }

    /// Drops the connection's transaction and watches.
    pub fn disconnect(&self, conn: ConnectionId) {
        self.transactions.disconnect(conn, &self.keyspace);
        debug!(conn = %conn, "Connection closed");
    }

    /// Executes one command on behalf of `conn`.
    ///
    /// # Arguments
    ///
    /// * `conn` - The calling connection
    /// * `name` - Command name, any case
    /// * `args` - Arguments after the name
    ///
    /// # Returns
    ///
    /// The reply. Failures of the command itself come back as `Err`;
    /// failures inside an `EXEC` come back as `Reply::Error` entries.
    pub fn execute(&self, conn: ConnectionId, name: &str, args: &[Bytes]) -> Result<Reply> {
        let upper = name.to_ascii_uppercase();
        let parsed = Args::new(&upper, args);

        match upper.as_str() {
            "MULTI" => {
                parsed.exact(0)?;
                self.transactions.start(conn)?;
                Ok(Reply::Ok)
            }
            "EXEC" => {
                parsed.exact(0)?;
                self.transactions
                    .execute(conn, &self.keyspace, &self.handler)
            }
            "DISCARD" => {
                parsed.exact(0)?;
                self.transactions.discard(conn, &self.keyspace)?;
                Ok(Reply::Ok)
            }
            "WATCH" => {
                parsed.at_least(1)?;
                self.transactions.watch(conn, args, &self.keyspace)?;
                Ok(Reply::Ok)
            }
            "UNWATCH" => {
                parsed.exact(0)?;
                self.transactions.unwatch(conn, &self.keyspace);
                Ok(Reply::Ok)
            }
            _ => {
                let command = Command::parse(&upper, args)?;
                if self.transactions.is_queuing(conn) {
                    self.transactions.queue(conn, command)?;
                    return Ok(Reply::Queued);
                }
                self.run(command)
            }
        }
    }

    fn run(&self, command: Command) -> Result<Reply> {
        let mut store = self.keyspace.lock();
        let results = self.handler.run(&mut store, std::slice::from_ref(&command));
        self.transactions.invalidate(&store.take_touched());
        drop(store);

        results?.into_iter().next().unwrap_or(Ok(Reply::Nil))
    }

    /// Starts the expiry sweeper, and the snapshotter and WAL flusher when
    /// persistence is enabled. Must be called inside a tokio runtime.
    pub fn start_background_tasks(&self) {
        let mut tasks = self.tasks.lock();
        if tasks.sweeper.is_none() {
            tasks.sweeper = Some(ExpirySweeper::start(
                Arc::clone(&self.keyspace),
                self.config.expiry.clone(),
            ));
        }
        if let Some(persistence) = &self.persistence {
            if tasks.snapshotter.is_none() {
                tasks.snapshotter = Some(Snapshotter::start(
                    Arc::clone(persistence),
                    Arc::clone(&self.keyspace),
                ));
            }
            if tasks.flusher.is_none() {
                tasks.flusher = Some(WalFlusher::start(Arc::clone(persistence)));
            }
        }
    }

    /// Writes a snapshot now.
    ///
    /// # Returns
    ///
    /// `None` when persistence is disabled.
    pub fn snapshot(&self) -> Result<Option<SnapshotInfo>> {
        self.persistence
            .as_ref()
            .map(|p| p.create_snapshot(&self.keyspace))
            .transpose()
    }

    /// Forces buffered log records to disk.
    pub fn flush(&self) -> Result<()> {
        match &self.persistence {
            Some(persistence) => persistence.flush(),
            None => Ok(()),
        }
    }

    /// Stops the background tasks, then flushes the log and writes a final
    /// snapshot.
    pub fn shutdown(&self) -> Result<()> {
        *self.tasks.lock() = BackgroundTasks::default();

        if let Some(persistence) = &self.persistence {
            persistence.flush()?;
            persistence.create_snapshot(&self.keyspace)?;
        }
        info!(keys = self.keyspace.len(), "Engine shut down");
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn keyspace(&self) -> &Arc<Keyspace> {
        &self.keyspace
    }

    /// What startup recovery found; `None` without persistence.
    pub fn recovery(&self) -> Option<&RecoveryReport> {
        self.recovery.as_ref()
    }

    pub fn stats(&self) -> StorageStats {
        self.keyspace.stats()
    }

    pub fn memory_info(&self) -> MemoryInfo {
        self.keyspace.memory_info()
    }
}
