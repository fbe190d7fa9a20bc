//! Command Module
//!
//! This module implements the command layer of EmberKV. A command name and
//! its raw arguments are parsed once into a validated [`Command`], which is
//! then applied to a locked keyspace and, if it wrote anything, logged.
//!
//! ## Architecture
//!
//! ```text
//! name + args
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ Command::parse  │  (one family enum per data type)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (apply, log, memory monitor)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ Keyspace/Store  │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! ### Keys
//! - `DEL`, `EXISTS`, `TYPE`, `KEYS`, `RENAME`, `DBSIZE`, `FLUSHDB`, `PING`
//! - `EXPIRE`, `PEXPIRE`, `EXPIREAT`, `PEXPIREAT`, `TTL`, `PTTL`, `PERSIST`
//!
//! ### Strings
//! - `SET`, `GET`, `GETSET`, `GETDEL`, `SETNX`, `MSET`, `MGET`
//! - `APPEND`, `STRLEN`, `GETRANGE`, `SETRANGE`
//! - `INCR`, `INCRBY`, `DECR`, `DECRBY`, `INCRBYFLOAT`
//!
//! ### Collections
//! - Lists: `LPUSH`, `RPUSH`, `LPOP`, `RPOP`, `LLEN`, `LINDEX`, `LRANGE`,
//!   `LSET`, `LREM`, `LTRIM`, `LINSERT`
//! - Sets: `SADD`, `SREM`, `SMEMBERS`, `SISMEMBER`, `SCARD`, `SPOP`,
//!   `SINTER`, `SUNION`, `SDIFF`
//! - Hashes: `HSET`, `HSETNX`, `HGET`, `HMGET`, `HDEL`, `HEXISTS`, `HLEN`,
//!   `HKEYS`, `HVALS`, `HGETALL`, `HINCRBY`
//! - Sorted sets: `ZADD`, `ZREM`, `ZSCORE`, `ZINCRBY`, `ZCARD`, `ZRANK`,
//!   `ZREVRANK`, `ZRANGE`, `ZREVRANGE`, `ZRANGEBYSCORE`, `ZREVRANGEBYSCORE`,
//!   `ZCOUNT`, `ZPOPMIN`, `ZPOPMAX`, `ZREMRANGEBYRANK`, `ZREMRANGEBYSCORE`
//! - Streams: `XADD`, `XLEN`, `XRANGE`, `XREVRANGE`, `XDEL`, `XTRIM`,
//!   `XGROUP`, `XREADGROUP`, `XACK`, `XPENDING`
//!
//! ### Bits and cardinality
//! - `SETBIT`, `GETBIT`, `BITCOUNT`, `BITPOS`, `BITOP`, `BITFIELD`
//! - `PFADD`, `PFCOUNT`, `PFMERGE`
//!
//! Transaction commands (`MULTI`, `EXEC`, `DISCARD`, `WATCH`, `UNWATCH`) are
//! handled by [`crate::Engine`] and never reach this module.

pub mod args;
pub mod bits;
pub mod cardinality;
pub mod command;
pub mod handler;
pub mod hashes;
pub mod keys;
pub mod lists;
pub mod reply;
pub mod sets;
pub mod streams;
pub mod strings;
pub mod zsets;

pub use args::Args;
pub use command::Command;
pub use handler::CommandHandler;
pub use reply::Reply;
