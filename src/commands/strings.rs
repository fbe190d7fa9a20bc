//! String commands.

use super::args::Args;
use super::reply::Reply;
use crate::error::{EngineError, Result};
use crate::storage::Store;
use crate::types::string;
use crate::types::Value;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// SET's NX / XX condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetCondition {
    #[default]
    Always,
    IfAbsent,
    IfPresent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StringCommand {
    Set {
        key: Bytes,
        value: Bytes,
        ttl_ms: Option<u64>,
        condition: SetCondition,
    },
    Get(Bytes),
    GetSet {
        key: Bytes,
        value: Bytes,
    },
    GetDel(Bytes),
    SetNx {
        key: Bytes,
        value: Bytes,
    },
    MSet(Vec<(Bytes, Bytes)>),
    MGet(Vec<Bytes>),
    Append {
        key: Bytes,
        value: Bytes,
    },
    StrLen(Bytes),
    /// INCR, DECR, INCRBY and DECRBY.
    IncrBy {
        key: Bytes,
        delta: i64,
    },
    IncrByFloat {
        key: Bytes,
        delta: f64,
    },
    GetRange {
        key: Bytes,
        start: i64,
        end: i64,
    },
    SetRange {
        key: Bytes,
        offset: usize,
        value: Bytes,
    },
}

fn parse_set(args: &mut Args<'_>) -> Result<StringCommand> {
    args.at_least(2)?;
    let key = args.bytes()?;
    let value = args.bytes()?;
    let mut ttl_ms = None;
    let mut condition = SetCondition::Always;

    while args.remaining() > 0 {
        let option = args.keyword()?;
        match option.as_slice() {
            b"EX" | b"PX" => {
                if ttl_ms.is_some() {
                    return Err(EngineError::syntax());
                }
                let amount = args.int()?;
                if amount <= 0 {
                    return Err(EngineError::MalformedArgument(
                        "invalid expire time in 'set' command".to_string(),
                    ));
                }
                let ms = if option == b"EX" {
                    (amount as u64).checked_mul(1000).ok_or_else(EngineError::not_integer)?
                } else {
                    amount as u64
                };
                ttl_ms = Some(ms);
            }
            b"NX" if condition != SetCondition::IfPresent => condition = SetCondition::IfAbsent,
            b"XX" if condition != SetCondition::IfAbsent => condition = SetCondition::IfPresent,
            _ => return Err(EngineError::syntax()),
        }
    }

    Ok(StringCommand::Set {
        key,
        value,
        ttl_ms,
        condition,
    })
}

impl StringCommand {
    pub fn parse(name: &str, args: &mut Args<'_>) -> Result<Option<Self>> {
        let command = match name {
            "SET" => parse_set(args)?,
            "GET" | "GETDEL" | "STRLEN" => {
                args.exact(1)?;
                let key = args.bytes()?;
                match name {
                    "GET" => StringCommand::Get(key),
                    "GETDEL" => StringCommand::GetDel(key),
                    _ => StringCommand::StrLen(key),
                }
            }
            "GETSET" | "SETNX" | "APPEND" => {
                args.exact(2)?;
                let key = args.bytes()?;
                let value = args.bytes()?;
                match name {
                    "GETSET" => StringCommand::GetSet { key, value },
                    "SETNX" => StringCommand::SetNx { key, value },
                    _ => StringCommand::Append { key, value },
                }
            }
            "MSET" => StringCommand::MSet(args.pairs()?),
            "MGET" => {
                args.at_least(1)?;
                StringCommand::MGet(args.rest())
            }
            "INCR" | "DECR" => {
                args.exact(1)?;
                StringCommand::IncrBy {
                    key: args.bytes()?,
                    delta: if name == "INCR" { 1 } else { -1 },
                }
            }
            "INCRBY" | "DECRBY" => {
                args.exact(2)?;
                let key = args.bytes()?;
                let delta = args.int()?;
                let delta = if name == "INCRBY" {
                    delta
                } else {
                    delta.checked_neg().ok_or_else(EngineError::not_integer)?
                };
                StringCommand::IncrBy { key, delta }
            }
            "INCRBYFLOAT" => {
                args.exact(2)?;
                StringCommand::IncrByFloat {
                    key: args.bytes()?,
                    delta: args.float()?,
                }
            }
            "GETRANGE" => {
                args.exact(3)?;
                StringCommand::GetRange {
                    key: args.bytes()?,
                    start: args.int()?,
                    end: args.int()?,
                }
            }
            "SETRANGE" => {
                args.exact(3)?;
                let key = args.bytes()?;
                let offset = usize::try_from(args.int()?)
                    .map_err(|_| EngineError::OutOfRange("offset is out of range".to_string()))?;
                StringCommand::SetRange {
                    key,
                    offset,
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
            StringCommand::Get(_)
                | StringCommand::MGet(_)
                | StringCommand::StrLen(_)
                | StringCommand::GetRange { .. }
        )
    }

    pub fn apply(&self, store: &mut Store) -> Result<Reply> {
        match self {
            StringCommand::Set {
                key,
                value,
                ttl_ms,
                condition,
            } => {
                let proceed = match condition {
                    SetCondition::Always => true,
                    SetCondition::IfAbsent => !store.exists(key),
                    SetCondition::IfPresent => store.exists(key),
                };
                if !proceed {
                    return Ok(Reply::Nil);
                }
                store.set(key.clone(), Value::String(value.clone()));
                if let Some(ms) = ttl_ms {
                    store.set_expiry(key, Duration::from_millis(*ms));
                }
                Ok(Reply::Ok)
            }
            StringCommand::Get(key) => Ok(store.read::<Bytes, _>(key, Bytes::clone)?.into()),
            StringCommand::GetSet { key, value } => {
                let old = store.read::<Bytes, _>(key, Bytes::clone)?;
                store.set(key.clone(), Value::String(value.clone()));
                Ok(old.into())
            }
            StringCommand::GetDel(key) => {
                let old = store.read::<Bytes, _>(key, Bytes::clone)?;
                if old.is_some() {
                    store.delete(key);
                }
                Ok(old.into())
            }
            StringCommand::SetNx { key, value } => {
                if store.exists(key) {
                    return Ok(Reply::Integer(0));
                }
                store.set(key.clone(), Value::String(value.clone()));
                Ok(Reply::Integer(1))
            }
            StringCommand::MSet(pairs) => {
                for (key, value) in pairs {
                    store.set(key.clone(), Value::String(value.clone()));
                }
                Ok(Reply::Ok)
            }
            StringCommand::MGet(keys) => {
                let values = keys
                    .iter()
                    .map(|key| match store.get(key) {
                        Some(Value::String(value)) => Reply::Bulk(value.clone()),
                        _ => Reply::Nil,
                    })
                    .collect();
                Ok(Reply::Array(values))
            }
            StringCommand::Append { key, value } => {
                let len = store.string_ops(key, true, |current| {
                    *current = string::append(Some(&*current), value)?;
                    Ok(current.len())
                })?;
                Ok(Reply::integer(len.unwrap_or(0)))
            }
            StringCommand::StrLen(key) => {
                let len = store.read::<Bytes, _>(key, |value| value.len())?;
                Ok(Reply::integer(len.unwrap_or(0)))
            }
            StringCommand::IncrBy { key, delta } => {
                let existed = store.exists(key);
                let result = store.string_ops(key, true, |current| {
                    let next = string::incr_by(existed.then_some(&*current), *delta)?;
                    *current = Bytes::from(next.to_string());
                    Ok(next)
                })?;
                Ok(Reply::Integer(result.unwrap_or(0)))
            }
            StringCommand::IncrByFloat { key, delta } => {
                let existed = store.exists(key);
                let result = store.string_ops(key, true, |current| {
                    let next = string::incr_by_float(existed.then_some(&*current), *delta)?;
                    *current = Bytes::from(string::format_float(next));
                    Ok(next)
                })?;
                Ok(result.map_or(Reply::Nil, Reply::float))
            }
            StringCommand::GetRange { key, start, end } => {
                let slice = store.read::<Bytes, _>(key, |value| string::get_range(value, *start, *end))?;
                Ok(Reply::Bulk(slice.unwrap_or_default()))
            }
            StringCommand::SetRange { key, offset, value } => {
                if value.is_empty() {
                    let len = store.read::<Bytes, _>(key, |current| current.len())?;
                    return Ok(Reply::integer(len.unwrap_or(0)));
                }
                let len = store.string_ops(key, true, |current| {
                    *current = string::set_range(Some(&*current), *offset, value)?;
                    Ok(current.len())
                })?;
                Ok(Reply::integer(len.unwrap_or(0)))
            }
        }
    }
}
