//! Storage Module
//!
//! The keyspace and the machinery that keeps it bounded in time and space.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Keyspace                             │
//! │        Mutex<Store>: key -> Value, memory accounting        │
//! │  ┌──────────────────────┐     ┌──────────────────────────┐  │
//! │  │    ExpiryManager     │     │     EvictionPolicy       │  │
//! │  │ deadline index (own  │     │  LRU / LFU victim pick   │  │
//! │  │ Mutex)               │     │  when over max_memory    │  │
//! │  └──────────────────────┘     └──────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │
//!              ┌─────────────┴─────────────┐
//!              │     ExpirySweeper         │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use emberkv::storage::{Keyspace, Ttl};
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! let keyspace = Keyspace::new();
//! keyspace.set(Bytes::from("session"), Bytes::from("token123").into());
//! assert!(keyspace.set_expiry(b"session", Duration::from_secs(3600)));
//! assert!(matches!(keyspace.ttl(b"session"), Ttl::Remaining(_)));
//! assert_eq!(keyspace.ttl(b"missing"), Ttl::Missing);
//! ```

pub mod eviction;
pub mod expiry;
pub mod keyspace;

pub use eviction::{EvictionConfig, EvictionKind, EvictionPolicy, LfuPolicy, LruPolicy};
pub use expiry::{unix_millis, ExpiryConfig, ExpiryManager, ExpirySweeper, Ttl};
pub use keyspace::{KeyRecord, Keyspace, MemoryInfo, StorageStats, Store};
