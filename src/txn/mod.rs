//! Transaction Manager
//!
//! Per-connection `MULTI`/`EXEC` state and `WATCH`-based optimistic locking.
//!
//! ## State machine
//!
//! ```text
//!            start (MULTI)
//!   None ───────────────────► Queuing ──┐ queue (any other command)
//!    ▲                          │  ▲    │
//!    │   execute (EXEC)         │  └────┘
//!    └──────────────────────────┤
//!    │   discard (DISCARD)      │
//!    └──────────────────────────┘
//! ```
//!
//! ## Design
//!
//! - Sessions live in a `DashMap` keyed by [`ConnectionId`], so connections
//!   queuing at the same time never contend on one lock.
//! - `execute` holds the keyspace lock across the whole batch; no other
//!   connection observes a state between two queued commands.
//! - Errors inside a batch are collected and execution continues. Syntax
//!   errors never reach the queue: commands are parsed before queuing.
//! - A write to a watched key marks every watching session dirty; `EXEC`
//!   on a dirty session runs nothing and replies nil.
//!
//! Lock order is keyspace first, then the session maps. No session guard
//! is ever held while taking the keyspace lock.

use crate::commands::{Command, CommandHandler, Reply};
use crate::error::{Result, TransactionError};
use crate::storage::Keyspace;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// Identifies one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Session {
    queuing: bool,
    queue: Vec<Command>,
    watched: Vec<Bytes>,
    /// A watched key was modified since `WATCH`.
    dirty: bool,
}

/// Transaction state for every connection.
#[derive(Debug, Default)]
pub struct TransactionManager {
    sessions: DashMap<ConnectionId, Session>,
    /// Reverse index from watched key to watching connections.
    watchers: DashMap<Bytes, HashSet<ConnectionId>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while `conn` is between `MULTI` and `EXEC`/`DISCARD`.
    pub fn is_queuing(&self, conn: ConnectionId) -> bool {
        self.sessions.get(&conn).is_some_and(|s| s.queuing)
    }

    /// Handles `MULTI`.
    pub fn start(&self, conn: ConnectionId) -> Result<()> {
        let mut session = self.sessions.entry(conn).or_default();
        if session.queuing {
            return Err(TransactionError::NestedMulti.into());
        }
        session.queuing = true;
        debug!(conn = %conn, "Transaction started");
        Ok(())
    }

    /// Appends `command` to the open transaction.
    ///
    /// # Returns
    ///
    /// The queue length after appending.
    pub fn queue(&self, conn: ConnectionId, command: Command) -> Result<usize> {
        let mut session = self
            .sessions
            .get_mut(&conn)
            .filter(|s| s.queuing)
            .ok_or(TransactionError::QueueWithoutMulti)?;
        session.queue.push(command);
        Ok(session.queue.len())
    }

    /// Handles `EXEC`.
    ///
    /// Leaves the queuing state, then runs the queue under one keyspace
    /// lock. Watches are released either way.
    ///
    /// # Returns
    ///
    /// `Nil` if a watched key changed, otherwise an array with one reply
    /// per queued command (failures as `Reply::Error`).
    pub fn execute(
        &self,
        conn: ConnectionId,
        keyspace: &Keyspace,
        handler: &CommandHandler,
    ) -> Result<Reply> {
        let mut store = keyspace.lock();
        self.invalidate(&store.take_touched());

        let (queue, watched, dirty) = {
            let mut session = self
                .sessions
                .get_mut(&conn)
                .filter(|s| s.queuing)
                .ok_or(TransactionError::ExecWithoutMulti)?;
            session.queuing = false;
            let dirty = std::mem::take(&mut session.dirty);
            (
                std::mem::take(&mut session.queue),
                std::mem::take(&mut session.watched),
                dirty,
            )
        };
        for key in &watched {
            store.unwatch(key);
            self.remove_watcher(key, conn);
        }

        if dirty {
            debug!(conn = %conn, queued = queue.len(), "Transaction aborted by WATCH");
            return Ok(Reply::Nil);
        }

        let results = handler.run(&mut store, &queue);
        self.invalidate(&store.take_touched());
        drop(store);

        let replies = results?
            .into_iter()
            .map(|result| result.unwrap_or_else(|e| Reply::Error(e.to_string())))
            .collect::<Vec<_>>();
        debug!(conn = %conn, commands = replies.len(), "Transaction executed");
        Ok(Reply::Array(replies))
    }

    /// Handles `DISCARD`: drops the queue and releases watches.
    pub fn discard(&self, conn: ConnectionId, keyspace: &Keyspace) -> Result<()> {
        let watched = {
            let mut session = self
                .sessions
                .get_mut(&conn)
                .filter(|s| s.queuing)
                .ok_or(TransactionError::DiscardWithoutMulti)?;
            session.queuing = false;
            session.queue.clear();
            session.dirty = false;
            std::mem::take(&mut session.watched)
        };
        self.release(conn, &watched, keyspace);
        debug!(conn = %conn, "Transaction discarded");
        Ok(())
    }

    /// Handles `WATCH key...`.
    pub fn watch(&self, conn: ConnectionId, keys: &[Bytes], keyspace: &Keyspace) -> Result<()> {
        if self.is_queuing(conn) {
            return Err(TransactionError::WatchInsideMulti.into());
        }

        let mut store = keyspace.lock();
        // Writes that happened before this WATCH must not count against it.
        self.invalidate(&store.take_touched());

        let fresh: Vec<Bytes> = {
            let mut session = self.sessions.entry(conn).or_default();
            let mut fresh = Vec::new();
            for key in keys {
                if !session.watched.contains(key) && !fresh.contains(key) {
                    fresh.push(key.clone());
                }
            }
            session.watched.extend(fresh.iter().cloned());
            fresh
        };
        for key in &fresh {
            store.watch(key);
            self.watchers.entry(key.clone()).or_default().insert(conn);
        }
        Ok(())
    }

    /// Handles `UNWATCH`. Also clears a pending dirty flag.
    pub fn unwatch(&self, conn: ConnectionId, keyspace: &Keyspace) {
        let watched = match self.sessions.get_mut(&conn) {
            Some(mut session) => {
                session.dirty = false;
                std::mem::take(&mut session.watched)
            }
            None => return,
        };
        self.release(conn, &watched, keyspace);
    }

    /// Drops everything held for `conn`.
    pub fn disconnect(&self, conn: ConnectionId, keyspace: &Keyspace) {
        if let Some((_, session)) = self.sessions.remove(&conn) {
            self.release(conn, &session.watched, keyspace);
        }
    }

    /// Marks every session watching one of `keys` as dirty.
    pub fn invalidate(&self, keys: &[Bytes]) {
        for key in keys {
            let Some(conns) = self.watchers.get(key) else {
                continue;
            };
            for conn in conns.iter() {
                if let Some(mut session) = self.sessions.get_mut(conn) {
                    session.dirty = true;
                }
            }
        }
    }

    /// Number of open sessions.
    pub fn sessions(&self) -> usize {
        self.sessions.len()
    }

    fn release(&self, conn: ConnectionId, keys: &[Bytes], keyspace: &Keyspace) {
        if keys.is_empty() {
            return;
        }
        let mut store = keyspace.lock();
        for key in keys {
            store.unwatch(key);
            self.remove_watcher(key, conn);
        }
    }

    fn remove_watcher(&self, key: &Bytes, conn: ConnectionId) {
        self.watchers.remove_if_mut(key, |_, conns| {
            conns.remove(&conn);
            conns.is_empty()
        });
    }
}
