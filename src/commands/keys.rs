//! Keyspace commands: existence, type, expiry, renaming and housekeeping.

use super::args::Args;
use super::reply::Reply;
use crate::error::{EngineError, Result};
use crate::storage::Store;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KeyCommand {
    Ping(Option<Bytes>),
    Del(Vec<Bytes>),
    Exists(Vec<Bytes>),
    Type(Bytes),
    /// EXPIRE, PEXPIRE, EXPIREAT and PEXPIREAT.
    Expire {
        key: Bytes,
        amount: i64,
        millis: bool,
        absolute: bool,
    },
    Ttl {
        key: Bytes,
        millis: bool,
    },
    Persist(Bytes),
    Keys(Bytes),
    Rename {
        from: Bytes,
        to: Bytes,
    },
    DbSize,
    FlushDb,
}

impl KeyCommand {
    pub fn parse(name: &str, args: &mut Args<'_>) -> Result<Option<Self>> {
        let command = match name {
            "PING" => {
                if args.len() > 1 {
                    return Err(EngineError::arity(name));
                }
                KeyCommand::Ping(if args.is_empty() { None } else { Some(args.bytes()?) })
            }
            "DEL" | "EXISTS" => {
                args.at_least(1)?;
                let keys = args.rest();
                if name == "DEL" {
                    KeyCommand::Del(keys)
                } else {
                    KeyCommand::Exists(keys)
                }
            }
            "TYPE" => {
                args.exact(1)?;
                KeyCommand::Type(args.bytes()?)
            }
            "EXPIRE" | "PEXPIRE" | "EXPIREAT" | "PEXPIREAT" => {
                args.exact(2)?;
                KeyCommand::Expire {
                    key: args.bytes()?,
                    amount: args.int()?,
                    millis: name.starts_with('P'),
                    absolute: name.ends_with("AT"),
                }
            }
            "TTL" | "PTTL" => {
                args.exact(1)?;
                KeyCommand::Ttl {
                    key: args.bytes()?,
                    millis: name == "PTTL",
                }
            }
            "PERSIST" => {
                args.exact(1)?;
                KeyCommand::Persist(args.bytes()?)
            }
            "KEYS" => {
                args.exact(1)?;
                KeyCommand::Keys(args.bytes()?)
            }
            "RENAME" => {
                args.exact(2)?;
                KeyCommand::Rename {
                    from: args.bytes()?,
                    to: args.bytes()?,
                }
            }
            "DBSIZE" => {
                args.exact(0)?;
                KeyCommand::DbSize
            }
            "FLUSHDB" | "FLUSHALL" => {
                args.exact(0)?;
                KeyCommand::FlushDb
            }
            _ => return Ok(None),
        };
        Ok(Some(command))
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            KeyCommand::Del(_)
                | KeyCommand::Expire { .. }
                | KeyCommand::Persist(_)
                | KeyCommand::Rename { .. }
                | KeyCommand::FlushDb
        )
    }

    pub fn apply(&self, store: &mut Store) -> Result<Reply> {
        match self {
            KeyCommand::Ping(None) => Ok(Reply::status("PONG")),
            KeyCommand::Ping(Some(message)) => Ok(Reply::Bulk(message.clone())),
            KeyCommand::Del(keys) => {
                let removed = keys.iter().filter(|key| store.delete(key)).count();
                Ok(Reply::integer(removed))
            }
            KeyCommand::Exists(keys) => {
                let found = keys.iter().filter(|key| store.exists(key)).count();
                Ok(Reply::integer(found))
            }
            KeyCommand::Type(key) => Ok(Reply::status(
                store.key_type(key).map_or("none", |kind| kind.as_str()),
            )),
            KeyCommand::Expire {
                key,
                amount,
                millis,
                absolute,
            } => {
                let at_ms = deadline(store.now_ms(), *amount, *millis, *absolute)?;
                Ok(Reply::integer(store.set_expiry_at(key, at_ms) as i64))
            }
            KeyCommand::Ttl { key, millis } => {
                let ttl = store.ttl(key);
                Ok(Reply::Integer(if *millis { ttl.as_millis() } else { ttl.as_secs() }))
            }
            KeyCommand::Persist(key) => Ok(Reply::integer(store.persist(key) as i64)),
            KeyCommand::Keys(pattern) => Ok(Reply::bulks(store.keys(pattern))),
            KeyCommand::Rename { from, to } => {
                store.rename(from, to)?;
                Ok(Reply::Ok)
            }
            KeyCommand::DbSize => Ok(Reply::integer(store.len())),
            KeyCommand::FlushDb => {
                store.flush();
                Ok(Reply::Ok)
            }
        }
    }
}

/// Absolute deadline in unix milliseconds for an EXPIRE-family argument.
/// Past deadlines clamp to zero, which deletes the key.
fn deadline(now_ms: u64, amount: i64, millis: bool, absolute: bool) -> Result<u64> {
    let invalid = || EngineError::MalformedArgument("invalid expire time".to_string());
    let amount_ms = if millis {
        amount as i128
    } else {
        (amount as i128).checked_mul(1000).ok_or_else(invalid)?
    };
    let at = if absolute {
        amount_ms
    } else {
        now_ms as i128 + amount_ms
    };
    if at > u64::MAX as i128 {
        return Err(invalid());
    }
    Ok(at.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline() {
        assert_eq!(deadline(1_000, 5, false, false).unwrap(), 6_000);
        assert_eq!(deadline(1_000, 5, true, false).unwrap(), 1_005);
        assert_eq!(deadline(1_000, 7, false, true).unwrap(), 7_000);
        assert_eq!(deadline(1_000, -50, false, false).unwrap(), 0);
    }

    #[test]
    fn test_parse_expire_family() {
        let raw = vec![Bytes::from("k"), Bytes::from("10")];
        let cmd = KeyCommand::parse("PEXPIREAT", &mut Args::new("PEXPIREAT", &raw))
            .unwrap()
            .unwrap();
        assert_eq!(
            cmd,
            KeyCommand::Expire {
                key: Bytes::from("k"),
                amount: 10,
                millis: true,
                absolute: true
            }
        );
        assert!(cmd.is_write());
    }
}
