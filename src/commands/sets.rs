//! Set commands.

use super::args::Args;
use super::reply::Reply;
use crate::error::{EngineError, Result};
use crate::storage::Store;
use crate::types::set::{difference, intersect, union};
use crate::types::SetValue;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Which multi-set operation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Combine {
    Inter,
    Union,
    Diff,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SetCommand {
    Add { key: Bytes, members: Vec<Bytes> },
    Rem { key: Bytes, members: Vec<Bytes> },
    Members(Bytes),
    IsMember { key: Bytes, member: Bytes },
    Card(Bytes),
    Pop { key: Bytes, count: Option<usize> },
    Combine { op: Combine, keys: Vec<Bytes> },
}

impl SetCommand {
    pub fn parse(name: &str, args: &mut Args<'_>) -> Result<Option<Self>> {
        let command = match name {
            "SADD" | "SREM" => {
                args.at_least(2)?;
                let key = args.bytes()?;
                let members = args.rest();
                if name == "SADD" {
                    SetCommand::Add { key, members }
                } else {
                    SetCommand::Rem { key, members }
                }
            }
            "SMEMBERS" | "SCARD" => {
                args.exact(1)?;
                let key = args.bytes()?;
                if name == "SMEMBERS" {
                    SetCommand::Members(key)
                } else {
                    SetCommand::Card(key)
                }
            }
            "SISMEMBER" => {
                args.exact(2)?;
                SetCommand::IsMember {
                    key: args.bytes()?,
                    member: args.bytes()?,
                }
            }
            "SPOP" => {
                if !(1..=2).contains(&args.len()) {
                    return Err(EngineError::arity(name));
                }
                let key = args.bytes()?;
                let count = if args.remaining() > 0 {
                    Some(args.count()?)
                } else {
                    None
                };
                SetCommand::Pop { key, count }
            }
            "SINTER" | "SUNION" | "SDIFF" => {
                args.at_least(1)?;
                let op = match name {
                    "SINTER" => Combine::Inter,
                    "SUNION" => Combine::Union,
                    _ => Combine::Diff,
                };
                SetCommand::Combine {
                    op,
                    keys: args.rest(),
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(command))
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            SetCommand::Add { .. } | SetCommand::Rem { .. } | SetCommand::Pop { .. }
        )
    }

    /// The form written to the log. SPOP picks members at random, so it is
    /// recorded as an SREM of whatever it actually removed.
    pub fn log_form(&self, reply: &Reply) -> Option<SetCommand> {
        match self {
            SetCommand::Pop { key, .. } => {
                let members: Vec<Bytes> = match reply {
                    Reply::Bulk(member) => vec![member.clone()],
                    Reply::Array(items) => items.iter().filter_map(|r| r.as_bulk().cloned()).collect(),
                    _ => Vec::new(),
                };
                if members.is_empty() {
                    None
                } else {
                    Some(SetCommand::Rem {
                        key: key.clone(),
                        members,
                    })
                }
            }
            other => Some(other.clone()),
        }
    }

    pub fn apply(&self, store: &mut Store) -> Result<Reply> {
        match self {
            SetCommand::Add { key, members } => {
                let added = store.set_ops(key, true, |set| Ok(set.add(members)))?;
                Ok(Reply::integer(added.unwrap_or(0)))
            }
            SetCommand::Rem { key, members } => {
                let removed = store.set_ops(key, false, |set| Ok(set.remove(members)))?;
                Ok(Reply::integer(removed.unwrap_or(0)))
            }
            SetCommand::Members(key) => {
                let members = store.read::<SetValue, _>(key, SetValue::sorted_members)?;
                Ok(Reply::bulks(members.unwrap_or_default()))
            }
            SetCommand::IsMember { key, member } => {
                let found = store.read::<SetValue, _>(key, |set| set.contains(member))?;
                Ok(Reply::integer(found.unwrap_or(false) as i64))
            }
            SetCommand::Card(key) => {
                let len = store.read::<SetValue, _>(key, SetValue::len)?;
                Ok(Reply::integer(len.unwrap_or(0)))
            }
            SetCommand::Pop { key, count } => {
                let n = count.unwrap_or(1);
                let popped = store.set_ops(key, false, |set| Ok(set.pop_random(n)))?;
                Ok(match (popped, count) {
                    (None, Some(_)) => Reply::Array(Vec::new()),
                    (None, None) => Reply::Nil,
                    (Some(items), Some(_)) => Reply::bulks(items),
                    (Some(items), None) => Reply::optional(items.into_iter().next()),
                })
            }
            SetCommand::Combine { op, keys } => {
                for key in keys {
                    store.read::<SetValue, _>(key, |_| ())?;
                }
                let snapshot: &Store = store;
                let sets: Vec<Option<&SetValue>> = keys.iter().map(|key| snapshot.view(key)).collect();
                let members = match op {
                    Combine::Inter => intersect(&sets),
                    Combine::Union => union(&sets),
                    Combine::Diff => difference(&sets),
                };
                Ok(Reply::bulks(members))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Keyspace;

    fn run(store: &mut Store, parts: &[&str]) -> Result<(SetCommand, Reply)> {
        let raw: Vec<Bytes> = parts[1..].iter().map(|s| Bytes::from(s.to_string())).collect();
        let mut args = Args::new(parts[0], &raw);
        let command = SetCommand::parse(parts[0], &mut args)?.expect("set command");
        let reply = command.apply(store)?;
        Ok((command, reply))
    }

    #[test]
    fn test_combine() {
        let keyspace = Keyspace::new();
        let mut store = keyspace.lock();
        run(&mut store, &["SADD", "a", "1", "2", "3"]).unwrap();
        run(&mut store, &["SADD", "b", "2", "3", "4"]).unwrap();

        let (_, inter) = run(&mut store, &["SINTER", "a", "b"]).unwrap();
        assert_eq!(inter, Reply::bulks(["2", "3"].map(Bytes::from)));
        let (_, diff) = run(&mut store, &["SDIFF", "a", "b"]).unwrap();
        assert_eq!(diff, Reply::bulks(["1"].map(Bytes::from)));
        let (_, empty) = run(&mut store, &["SINTER", "a", "missing"]).unwrap();
        assert_eq!(empty, Reply::Array(vec![]));
    }

    #[test]
    fn test_spop_logs_as_srem() {
        let keyspace = Keyspace::new();
        let mut store = keyspace.lock();
        run(&mut store, &["SADD", "s", "x", "y", "z"]).unwrap();

        let (command, reply) = run(&mut store, &["SPOP", "s", "2"]).unwrap();
        let popped: Vec<Bytes> = reply
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_bulk().unwrap().clone())
            .collect();
        assert_eq!(popped.len(), 2);

        match command.log_form(&reply) {
            Some(SetCommand::Rem { key, members }) => {
                assert_eq!(key, Bytes::from("s"));
                assert_eq!(members, popped);
            }
            other => panic!("unexpected log form {:?}", other),
        }

        let (_, missing) = run(&mut store, &["SPOP", "nothing"]).unwrap();
        assert_eq!(command.log_form(&missing), None);
    }
}
