//! List commands.

use super::args::Args;
use super::reply::Reply;
use crate::error::{EngineError, Result};
use crate::storage::Store;
use crate::types::list::End;
use crate::types::ListValue;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ListCommand {
    Push {
        key: Bytes,
        end: End,
        values: Vec<Bytes>,
    },
    Pop {
        key: Bytes,
        end: End,
        count: Option<usize>,
    },
    Len(Bytes),
    Index {
        key: Bytes,
        index: i64,
    },
    Range {
        key: Bytes,
        start: i64,
        stop: i64,
    },
    Set {
        key: Bytes,
        index: i64,
        value: Bytes,
    },
    Rem {
        key: Bytes,
        count: i64,
        value: Bytes,
    },
    Trim {
        key: Bytes,
        start: i64,
        stop: i64,
    },
    Insert {
        key: Bytes,
        before: bool,
        pivot: Bytes,
        value: Bytes,
    },
}

impl ListCommand {
    pub fn parse(name: &str, args: &mut Args<'_>) -> Result<Option<Self>> {
        let command = match name {
            "LPUSH" | "RPUSH" => {
                args.at_least(2)?;
                ListCommand::Push {
                    key: args.bytes()?,
                    end: if name == "LPUSH" { End::Left } else { End::Right },
                    values: args.rest(),
                }
            }
            "LPOP" | "RPOP" => {
                if !(1..=2).contains(&args.len()) {
                    return Err(EngineError::arity(name));
                }
                let key = args.bytes()?;
                let count = if args.remaining() > 0 {
                    Some(args.count()?)
                } else {
                    None
                };
                ListCommand::Pop {
                    key,
                    end: if name == "LPOP" { End::Left } else { End::Right },
                    count,
                }
            }
            "LLEN" => {
                args.exact(1)?;
                ListCommand::Len(args.bytes()?)
            }
            "LINDEX" => {
                args.exact(2)?;
                ListCommand::Index {
                    key: args.bytes()?,
                    index: args.int()?,
                }
            }
            "LRANGE" | "LTRIM" => {
                args.exact(3)?;
                let key = args.bytes()?;
                let start = args.int()?;
                let stop = args.int()?;
                if name == "LRANGE" {
                    ListCommand::Range { key, start, stop }
                } else {
                    ListCommand::Trim { key, start, stop }
                }
            }
            "LSET" => {
                args.exact(3)?;
                ListCommand::Set {
                    key: args.bytes()?,
                    index: args.int()?,
                    value: args.bytes()?,
                }
            }
            "LREM" => {
                args.exact(3)?;
                ListCommand::Rem {
                    key: args.bytes()?,
                    count: args.int()?,
                    value: args.bytes()?,
                }
            }
            "LINSERT" => {
                args.exact(4)?;
                let key = args.bytes()?;
                let before = match args.keyword()?.as_slice() {
                    b"BEFORE" => true,
                    b"AFTER" => false,
                    _ => return Err(EngineError::syntax()),
                };
                ListCommand::Insert {
                    key,
                    before,
                    pivot: args.bytes()?,
                    value: args.bytes()?,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(command))
    }

    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            ListCommand::Len(_) | ListCommand::Index { .. } | ListCommand::Range { .. }
        )
    }

    pub fn apply(&self, store: &mut Store) -> Result<Reply> {
        match self {
            ListCommand::Push { key, end, values } => {
                let len = store.list_ops(key, true, |list| Ok(list.push(*end, values)))?;
                Ok(Reply::integer(len.unwrap_or(0)))
            }
            ListCommand::Pop { key, end, count } => {
                let n = count.unwrap_or(1);
                let popped = store.list_ops(key, false, |list| Ok(list.pop(*end, n)))?;
                Ok(match (popped, count) {
                    (None, _) => Reply::Nil,
                    (Some(items), Some(_)) => Reply::bulks(items),
                    (Some(items), None) => Reply::optional(items.into_iter().next()),
                })
            }
            ListCommand::Len(key) => {
                let len = store.read::<ListValue, _>(key, ListValue::len)?;
                Ok(Reply::integer(len.unwrap_or(0)))
            }
            ListCommand::Index { key, index } => {
                let item = store.read::<ListValue, _>(key, |list| list.index(*index).cloned())?;
                Ok(Reply::optional(item.flatten()))
            }
            ListCommand::Range { key, start, stop } => {
                let items = store.read::<ListValue, _>(key, |list| list.range(*start, *stop))?;
                Ok(Reply::bulks(items.unwrap_or_default()))
            }
            ListCommand::Set { key, index, value } => {
                store
                    .list_ops(key, false, |list| list.set(*index, value.clone()))?
                    .ok_or(EngineError::NoSuchKey)?;
                Ok(Reply::Ok)
            }
            ListCommand::Rem { key, count, value } => {
                let removed = store.list_ops(key, false, |list| Ok(list.remove(*count, value)))?;
                Ok(Reply::integer(removed.unwrap_or(0)))
            }
            ListCommand::Trim { key, start, stop } => {
                store.list_ops(key, false, |list| {
                    list.trim(*start, *stop);
                    Ok(())
                })?;
                Ok(Reply::Ok)
            }
            ListCommand::Insert {
                key,
                before,
                pivot,
                value,
            } => {
                let len = store.list_ops(key, false, |list| {
                    Ok(list.insert(*before, pivot, value.clone()))
                })?;
                Ok(match len {
                    None => Reply::Integer(0),
                    Some(None) => Reply::Integer(-1),
                    Some(Some(len)) => Reply::integer(len),
                })
            }
        }
    }
}
