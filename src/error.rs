//! Engine Error Types
//!
//! Every fallible operation in the engine returns [`EngineError`]. The display
//! strings follow the Redis reply convention (`ERR ...`, `WRONGTYPE ...`) so a
//! dispatcher sitting above the engine can forward them to clients unchanged.
//!
//! ## Taxonomy
//!
//! ```text
//! NoSuchKey          read of an absent/expired key where nil is not an answer
//! WrongType          key holds a different variant than the operation expects
//! OutOfRange         index, offset or bit width outside valid bounds
//! MalformedArgument  unparsable integer/float/keyword, wrong arity
//! StorageIo          WAL or snapshot read/write failure
//! StorageCorrupt     on-disk data failed validation
//! Transaction        MULTI/EXEC/DISCARD/WATCH misuse
//! ```

use thiserror::Error;

/// Errors that can occur while executing commands against the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The key does not exist (or has expired).
    #[error("ERR no such key")]
    NoSuchKey,

    /// Operation against a key holding the wrong kind of value.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// Index, offset or width outside the accepted bounds.
    #[error("ERR {0}")]
    OutOfRange(String),

    /// An argument could not be parsed, or the argument count is wrong.
    #[error("ERR {0}")]
    MalformedArgument(String),

    /// Failure reading or writing the WAL or snapshot.
    #[error("ERR storage I/O error: {0}")]
    StorageIo(#[from] std::io::Error),

    /// On-disk data failed its checksum or could not be decoded.
    #[error("ERR corrupt storage file: {0}")]
    StorageCorrupt(String),

    /// Transaction state machine misuse.
    #[error("ERR {0}")]
    Transaction(#[from] TransactionError),
}

/// Transaction state machine errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("MULTI calls can not be nested")]
    NestedMulti,

    #[error("EXEC without MULTI")]
    ExecWithoutMulti,

    #[error("DISCARD without MULTI")]
    DiscardWithoutMulti,

    #[error("WATCH inside MULTI is not allowed")]
    WatchInsideMulti,

    #[error("command queued without MULTI")]
    QueueWithoutMulti,
}

impl EngineError {
    /// Shorthand for a wrong-arity error.
    pub fn arity(command: &str) -> Self {
        EngineError::MalformedArgument(format!(
            "wrong number of arguments for '{}' command",
            command.to_ascii_lowercase()
        ))
    }

    /// Shorthand for the common "not an integer" error.
    pub fn not_integer() -> Self {
        EngineError::MalformedArgument("value is not an integer or out of range".to_string())
    }

    /// Shorthand for the common "not a float" error.
    pub fn not_float() -> Self {
        EngineError::MalformedArgument("value is not a valid float".to_string())
    }

    pub fn syntax() -> Self {
        EngineError::MalformedArgument("syntax error".to_string())
    }

    /// Returns true for the storage failure family.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            EngineError::StorageIo(_) | EngineError::StorageCorrupt(_)
        )
    }
}

impl From<bincode::Error> for EngineError {
    fn from(err: bincode::Error) -> Self {
        EngineError::StorageCorrupt(err.to_string())
    }
}

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, EngineError>;
