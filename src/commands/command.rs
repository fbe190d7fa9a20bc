//! The validated command enum.
//!
//! A [`Command`] is produced once from a name and raw arguments, after
//! which it is known to be well-formed: arity and argument types have been
//! checked, so applying it can only fail for reasons that depend on the
//! keyspace contents (wrong type, out of range, missing key).
//!
//! Commands are also the unit the write-ahead log stores, so every variant
//! is `serde`-serializable.

use super::args::Args;
use super::bits::BitCommand;
use super::cardinality::CardinalityCommand;
use super::hashes::HashCommand;
use super::keys::KeyCommand;
use super::lists::ListCommand;
use super::reply::Reply;
use super::sets::SetCommand;
use super::streams::StreamCommand;
use super::strings::StringCommand;
use super::zsets::ZSetCommand;
use crate::error::{EngineError, Result};
use crate::storage::Store;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Key(KeyCommand),
    String(StringCommand),
    List(ListCommand),
    Set(SetCommand),
    Hash(HashCommand),
    ZSet(ZSetCommand),
    Stream(StreamCommand),
    Bit(BitCommand),
    Cardinality(CardinalityCommand),
}

impl Command {
    /// Parses `name` (any case) and its arguments into a command.
    ///
    /// # Errors
    ///
    /// `MalformedArgument` for an unknown name, a wrong argument count or
    /// an unparsable argument.
    pub fn parse(name: &str, args: &[Bytes]) -> Result<Self> {
        let upper = name.to_ascii_uppercase();
        let name = upper.as_str();
        let mut args = Args::new(name, args);

        if let Some(cmd) = KeyCommand::parse(name, &mut args)? {
            return Ok(Command::Key(cmd));
        }
        if let Some(cmd) = StringCommand::parse(name, &mut args)? {
            return Ok(Command::String(cmd));
        }
        if let Some(cmd) = ListCommand::parse(name, &mut args)? {
            return Ok(Command::List(cmd));
        }
        if let Some(cmd) = SetCommand::parse(name, &mut args)? {
            return Ok(Command::Set(cmd));
        }
        if let Some(cmd) = HashCommand::parse(name, &mut args)? {
            return Ok(Command::Hash(cmd));
        }
        if let Some(cmd) = ZSetCommand::parse(name, &mut args)? {
            return Ok(Command::ZSet(cmd));
        }
        if let Some(cmd) = StreamCommand::parse(name, &mut args)? {
            return Ok(Command::Stream(cmd));
        }
        if let Some(cmd) = BitCommand::parse(name, &mut args)? {
            return Ok(Command::Bit(cmd));
        }
        if let Some(cmd) = CardinalityCommand::parse(name, &mut args)? {
            return Ok(Command::Cardinality(cmd));
        }

        Err(EngineError::MalformedArgument(format!(
            "unknown command '{}'",
            name.to_ascii_lowercase()
        )))
    }

    /// Whether the command may modify the keyspace (and so is logged).
    pub fn is_write(&self) -> bool {
        match self {
            Command::Key(cmd) => cmd.is_write(),
            Command::String(cmd) => cmd.is_write(),
            Command::List(cmd) => cmd.is_write(),
            Command::Set(cmd) => cmd.is_write(),
            Command::Hash(cmd) => cmd.is_write(),
            Command::ZSet(cmd) => cmd.is_write(),
            Command::Stream(cmd) => cmd.is_write(),
            Command::Bit(cmd) => cmd.is_write(),
            Command::Cardinality(cmd) => cmd.is_write(),
        }
    }

    /// Runs the command against a locked keyspace.
    pub fn apply(&self, store: &mut Store) -> Result<Reply> {
        match self {
            Command::Key(cmd) => cmd.apply(store),
            Command::String(cmd) => cmd.apply(store),
            Command::List(cmd) => cmd.apply(store),
            Command::Set(cmd) => cmd.apply(store),
            Command::Hash(cmd) => cmd.apply(store),
            Command::ZSet(cmd) => cmd.apply(store),
            Command::Stream(cmd) => cmd.apply(store),
            Command::Bit(cmd) => cmd.apply(store),
            Command::Cardinality(cmd) => cmd.apply(store),
        }
    }

    /// The deterministic form of an applied write, as it goes into the log.
    ///
    /// `None` means nothing needs logging (for example an SPOP that found
    /// the set empty).
    pub fn log_form(&self, reply: &Reply) -> Option<Command> {
        match self {
            Command::Set(cmd) => cmd.log_form(reply).map(Command::Set),
            Command::Stream(cmd) => cmd.log_form(reply).map(Command::Stream),
            other => Some(other.clone()),
        }
    }

    /// A `DEL` of `keys`, used to log evictions.
    pub fn delete(keys: Vec<Bytes>) -> Self {
        Command::Key(KeyCommand::Del(keys))
    }
}
