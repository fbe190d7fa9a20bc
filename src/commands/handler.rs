//! Command Execution
//!
//! [`CommandHandler`] runs validated commands against a locked [`Store`]
//! and turns what they changed into write-ahead log records.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler::run                     │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────────┐  │
//! │  │   apply()   │───>│ log_form()  │───>│ memory monitor  │  │
//! │  └─────────────┘    └─────────────┘    └────────┬────────┘  │
//! │                                                 │           │
//! │                                                 ▼           │
//! │                          PersistenceEngine::log_command     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A batch (a single command, or a whole `EXEC`) becomes one log record,
//! so replay applies all of it or none of it.

use super::command::Command;
use super::reply::Reply;
use crate::error::Result;
use crate::persistence::PersistenceEngine;
use crate::storage::{Keyspace, Store};
use std::sync::Arc;
use tracing::trace;

/// Applies commands and logs their effects.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    keyspace: Arc<Keyspace>,
    /// `None` when persistence is disabled
    persistence: Option<Arc<PersistenceEngine>>,
}

impl CommandHandler {
    pub fn new(keyspace: Arc<Keyspace>, persistence: Option<Arc<PersistenceEngine>>) -> Self {
        Self {
            keyspace,
            persistence,
        }
    }

    pub fn keyspace(&self) -> &Arc<Keyspace> {
        &self.keyspace
    }

    /// Runs `commands` in order against `store`.
    ///
    /// A failing command does not stop the batch; its error takes its slot
    /// in the result list. Writes that succeeded, and any keys the memory
    /// monitor evicted, are appended to the log as one record before the
    /// caller releases the lock.
    ///
    /// # Arguments
    ///
    /// * `store` - The locked keyspace
    /// * `commands` - Validated commands, in execution order
    ///
    /// # Returns
    ///
    /// One result per command, or `StorageIo` if the log append failed.
    /// The mutations stay applied in that case.
    pub fn run(&self, store: &mut Store, commands: &[Command]) -> Result<Vec<Result<Reply>>> {
        let mut replies = Vec::with_capacity(commands.len());
        let mut logged = Vec::new();

        for command in commands {
            self.keyspace.counters().record_command();
            let result = command.apply(store);

            if command.is_write() {
                if let Ok(reply) = &result {
                    if let Some(form) = command.log_form(reply) {
                        logged.push(form);
                    }
                    store.enforce_memory_limit();
                    let evicted = store.take_evicted();
                    if !evicted.is_empty() {
                        logged.push(Command::delete(evicted));
                    }
                }
            }

            trace!(command = ?command, ok = result.is_ok(), "Command applied");
            replies.push(result);
        }

        if let Some(persistence) = &self.persistence {
            if !logged.is_empty() && !store.is_replaying() {
                persistence.log_command(store.now_ms(), logged)?;
            }
        }

        Ok(replies)
    }
}
