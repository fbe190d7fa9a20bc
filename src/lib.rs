//! # EmberKV - An In-Memory Typed Data Engine
//!
//! EmberKV is the storage core of a Redis-class server: a keyspace of typed
//! values with expiry, memory-bounded eviction, write-ahead logging with
//! snapshots, and per-connection transactions. It has no network layer of
//! its own; a dispatcher drives it through [`Engine::execute`].
//!
//! ## Features
//!
//! - **Typed values**: strings, lists, sets, insertion-ordered hashes,
//!   sorted sets, streams with consumer groups, bit strings and
//!   HyperLogLog cardinality estimators
//! - **TTL Support**: lazy expiry on access plus an adaptive background sweep
//! - **Eviction**: LRU or LFU once estimated memory passes a ceiling
//! - **Durability**: CRC-framed write-ahead log, atomic snapshots, replay
//!   with the clock pinned to each record's original time
//! - **Transactions**: `MULTI`/`EXEC` with `WATCH`-based optimistic locking
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                Engine                                   │
//! │                                                                         │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐     │
//! │  │ Command::parse   │──>│  CommandHandler  │──>│ PersistenceEngine│     │
//! │  └──────────────────┘   └────────┬─────────┘   │  WAL + snapshot  │     │
//! │  ┌──────────────────┐            │             └──────────────────┘     │
//! │  │TransactionManager│────────────┤                                      │
//! │  │ (DashMap/conn)   │            ▼                                      │
//! │  └──────────────────┘   ┌──────────────────────────────────────────┐    │
//! │                         │        Keyspace (Mutex<Store>)           │    │
//! │                         │  values · ExpiryManager · EvictionPolicy │    │
//! │                         └──────────────────────────────────────────┘    │
//! │                                         ▲                               │
//! │        ┌────────────────────────────────┼───────────────────────┐       │
//! │        │ ExpirySweeper      Snapshotter       WalFlusher        │       │
//! │        │              (Background Tokio Tasks)                  │       │
//! │        └────────────────────────────────────────────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use emberkv::{Engine, Reply};
//! use bytes::Bytes;
//!
//! let engine = Engine::default();
//! let conn = engine.connect();
//!
//! let args = [Bytes::from("k"), Bytes::from("a")];
//! engine.execute(conn, "LPUSH", &args).unwrap();
//! let len = engine.execute(conn, "LLEN", &args[..1]).unwrap();
//! assert_eq!(len, Reply::Integer(1));
//! ```
//!
//! ## Module Overview
//!
//! - [`types`]: the value variants and their algorithms
//! - [`storage`]: keyspace, expiry and eviction
//! - [`commands`]: command parsing and execution
//! - [`persistence`]: write-ahead log, snapshots and recovery
//! - [`txn`]: per-connection transactions
//! - [`config`]: JSON configuration
//!
//! ## Design Highlights
//!
//! ### One lock, many types
//!
//! Every command runs under a single keyspace mutex, so each command is
//! atomic and an `EXEC` batch is atomic as a whole. The expiry index and the
//! log writer have their own locks, always taken after the keyspace lock.
//!
//! ### Deterministic replay
//!
//! Each log record carries the time it was applied. Replay pins the clock
//! to that time, and commands with random or time-dependent results are
//! logged in a fixed form, so recovery rebuilds the exact same state.

pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod persistence;
pub mod storage;
pub mod txn;
pub mod types;

// Re-export commonly used types for convenience
pub use commands::{Command, CommandHandler, Reply};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result, TransactionError};
pub use persistence::{PersistenceConfig, PersistenceEngine, RecoveryReport, SnapshotInfo};
pub use storage::{ExpiryConfig, ExpirySweeper, Keyspace, StorageStats};
pub use txn::{ConnectionId, TransactionManager};
pub use types::{Value, ValueKind};

/// Version of EmberKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
