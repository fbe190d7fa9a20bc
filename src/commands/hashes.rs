//! Hash commands. Field order in replies is insertion order.

use super::args::Args;
use super::reply::Reply;
use crate::error::Result;
use crate::storage::Store;
use crate::types::HashValue;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// What HKEYS / HVALS / HGETALL return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashView {
    Keys,
    Values,
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HashCommand {
    Set {
        key: Bytes,
        pairs: Vec<(Bytes, Bytes)>,
    },
    SetNx {
        key: Bytes,
        field: Bytes,
        value: Bytes,
    },
    Get {
        key: Bytes,
        field: Bytes,
    },
    MGet {
        key: Bytes,
        fields: Vec<Bytes>,
    },
    Del {
        key: Bytes,
        fields: Vec<Bytes>,
    },
    Exists {
        key: Bytes,
        field: Bytes,
    },
    Len(Bytes),
    View {
        key: Bytes,
        view: HashView,
    },
    IncrBy {
        key: Bytes,
        field: Bytes,
        delta: i64,
    },
}

impl HashCommand {
    pub fn parse(name: &str, args: &mut Args<'_>) -> Result<Option<Self>> {
        let command = match name {
            "HSET" | "HMSET" => {
                args.at_least(3)?;
                HashCommand::Set {
                    key: args.bytes()?,
                    pairs: args.pairs()?,
                }
            }
            "HSETNX" => {
                args.exact(3)?;
                HashCommand::SetNx {
                    key: args.bytes()?,
                    field: args.bytes()?,
                    value: args.bytes()?,
                }
            }
            "HGET" | "HEXISTS" => {
                args.exact(2)?;
                let key = args.bytes()?;
                let field = args.bytes()?;
                if name == "HGET" {
                    HashCommand::Get { key, field }
                } else {
                    HashCommand::Exists { key, field }
                }
            }
            "HMGET" | "HDEL" => {
                args.at_least(2)?;
                let key = args.bytes()?;
                let fields = args.rest();
                if name == "HMGET" {
                    HashCommand::MGet { key, fields }
                } else {
                    HashCommand::Del { key, fields }
                }
            }
            "HLEN" => {
                args.exact(1)?;
                HashCommand::Len(args.bytes()?)
            }
            "HKEYS" | "HVALS" | "HGETALL" => {
                args.exact(1)?;
                let view = match name {
                    "HKEYS" => HashView::Keys,
                    "HVALS" => HashView::Values,
                    _ => HashView::All,
                };
                HashCommand::View {
                    key: args.bytes()?,
                    view,
                }
            }
            "HINCRBY" => {
                args.exact(3)?;
                HashCommand::IncrBy {
                    key: args.bytes()?,
                    field: args.bytes()?,
                    delta: args.int()?,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(command))
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            HashCommand::Set { .. }
                | HashCommand::SetNx { .. }
                | HashCommand::Del { .. }
                | HashCommand::IncrBy { .. }
        )
    }

    pub fn apply(&self, store: &mut Store) -> Result<Reply> {
        match self {
            HashCommand::Set { key, pairs } => {
                let added = store.hash_ops(key, true, |hash| {
                    Ok(pairs
                        .iter()
                        .filter(|(field, value)| hash.set(field.clone(), value.clone()))
                        .count())
                })?;
                Ok(Reply::integer(added.unwrap_or(0)))
            }
            HashCommand::SetNx { key, field, value } => {
                let added = store.hash_ops(key, true, |hash| {
                    if hash.contains(field) {
                        Ok(false)
                    } else {
                        Ok(hash.set(field.clone(), value.clone()))
                    }
                })?;
                Ok(Reply::integer(added.unwrap_or(false) as i64))
            }
            HashCommand::Get { key, field } => {
                let value = store.read::<HashValue, _>(key, |hash| hash.get(field).cloned())?;
                Ok(Reply::optional(value.flatten()))
            }
            HashCommand::MGet { key, fields } => {
                let values = store.read::<HashValue, _>(key, |hash| {
                    fields
                        .iter()
                        .map(|field| Reply::optional(hash.get(field).cloned()))
                        .collect::<Vec<_>>()
                })?;
                Ok(Reply::Array(
                    values.unwrap_or_else(|| vec![Reply::Nil; fields.len()]),
                ))
            }
            HashCommand::Del { key, fields } => {
                let removed = store.hash_ops(key, false, |hash| {
                    Ok(fields.iter().filter(|field| hash.remove(field)).count())
                })?;
                Ok(Reply::integer(removed.unwrap_or(0)))
            }
            HashCommand::Exists { key, field } => {
                let found = store.read::<HashValue, _>(key, |hash| hash.contains(field))?;
                Ok(Reply::integer(found.unwrap_or(false) as i64))
            }
            HashCommand::Len(key) => {
                let len = store.read::<HashValue, _>(key, HashValue::len)?;
                Ok(Reply::integer(len.unwrap_or(0)))
            }
            HashCommand::View { key, view } => {
                let items = store.read::<HashValue, _>(key, |hash| {
                    let mut out = Vec::new();
                    for (field, value) in hash.iter() {
                        match view {
                            HashView::Keys => out.push(field.clone()),
                            HashView::Values => out.push(value.clone()),
                            HashView::All => {
                                out.push(field.clone());
                                out.push(value.clone());
                            }
                        }
                    }
                    out
                })?;
                Ok(Reply::bulks(items.unwrap_or_default()))
            }
            HashCommand::IncrBy { key, field, delta } => {
                let value = store.hash_ops(key, true, |hash| hash.incr_by(field.clone(), *delta))?;
                Ok(Reply::Integer(value.unwrap_or(0)))
            }
        }
    }
}
