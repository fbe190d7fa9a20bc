//! HyperLogLog commands: PFADD, PFCOUNT and PFMERGE.

use super::args::Args;
use super::reply::Reply;
use crate::error::Result;
use crate::storage::Store;
use crate::types::HyperLogLog;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CardinalityCommand {
    Add { key: Bytes, elements: Vec<Bytes> },
    Count(Vec<Bytes>),
    Merge { dest: Bytes, sources: Vec<Bytes> },
}

impl CardinalityCommand {
    pub fn parse(name: &str, args: &mut Args<'_>) -> Result<Option<Self>> {
        let command = match name {
            "PFADD" => {
                args.at_least(1)?;
                CardinalityCommand::Add {
                    key: args.bytes()?,
                    elements: args.rest(),
                }
            }
            "PFCOUNT" => {
                args.at_least(1)?;
                CardinalityCommand::Count(args.rest())
            }
            "PFMERGE" => {
                args.at_least(1)?;
                CardinalityCommand::Merge {
                    dest: args.bytes()?,
                    sources: args.rest(),
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(command))
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, CardinalityCommand::Count(_))
    }

    pub fn apply(&self, store: &mut Store) -> Result<Reply> {
        match self {
            CardinalityCommand::Add { key, elements } => {
                let existed = store.exists(key);
                let changed = store.cardinality_ops(key, true, |hll| {
                    Ok(elements.iter().fold(false, |acc, e| hll.add(e) || acc))
                })?;
                Ok(Reply::Integer((changed.unwrap_or(false) || !existed) as i64))
            }
            CardinalityCommand::Count(keys) => {
                if let [key] = keys.as_slice() {
                    let n = store.read::<HyperLogLog, _>(key, HyperLogLog::count)?;
                    return Ok(Reply::integer(n.unwrap_or(0)));
                }
                let merged = merge_all(store, keys, HyperLogLog::new())?;
                Ok(Reply::integer(merged.count()))
            }
            CardinalityCommand::Merge { dest, sources } => {
                let base = store
                    .read::<HyperLogLog, _>(dest, HyperLogLog::clone)?
                    .unwrap_or_default();
                let merged = merge_all(store, sources, base)?;
                store.cardinality_ops(dest, true, |hll| {
                    *hll = merged;
                    Ok(())
                })?;
                Ok(Reply::Ok)
            }
        }
    }
}

fn merge_all(store: &mut Store, keys: &[Bytes], mut acc: HyperLogLog) -> Result<HyperLogLog> {
    for key in keys {
        store.read::<HyperLogLog, _>(key, |_| ())?;
    }
    let snapshot: &Store = store;
    for key in keys {
        if let Some(hll) = snapshot.view::<HyperLogLog>(key) {
            acc.merge(hll)?;
        }
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::storage::Keyspace;

    fn run(store: &mut Store, parts: &[&str]) -> Result<Reply> {
        let raw: Vec<Bytes> = parts[1..].iter().map(|s| Bytes::from(s.to_string())).collect();
        let mut args = Args::new(parts[0], &raw);
        CardinalityCommand::parse(parts[0], &mut args)?
            .expect("cardinality command")
            .apply(store)
    }

    #[test]
    fn test_pfadd_reports_changes() {
        let keyspace = Keyspace::new();
        let mut store = keyspace.lock();
        assert_eq!(run(&mut store, &["PFADD", "h"]).unwrap(), Reply::Integer(1));
        assert_eq!(run(&mut store, &["PFADD", "h", "a", "b"]).unwrap(), Reply::Integer(1));
        assert_eq!(run(&mut store, &["PFADD", "h", "a"]).unwrap(), Reply::Integer(0));
        assert_eq!(run(&mut store, &["PFCOUNT", "h"]).unwrap(), Reply::Integer(2));
    }

    #[test]
    fn test_pfcount_union_and_pfmerge() {
        let keyspace = Keyspace::new();
        let mut store = keyspace.lock();
        run(&mut store, &["PFADD", "x", "1", "2", "3"]).unwrap();
        run(&mut store, &["PFADD", "y", "3", "4"]).unwrap();

        assert_eq!(run(&mut store, &["PFCOUNT", "x", "y", "missing"]).unwrap(), Reply::Integer(4));
        // PFCOUNT over several keys leaves them untouched
        assert_eq!(run(&mut store, &["PFCOUNT", "x"]).unwrap(), Reply::Integer(3));

        run(&mut store, &["PFADD", "d", "9"]).unwrap();
        assert_eq!(run(&mut store, &["PFMERGE", "d", "x", "y"]).unwrap(), Reply::Ok);
        assert_eq!(run(&mut store, &["PFCOUNT", "d"]).unwrap(), Reply::Integer(5));

        store.set(Bytes::from("s"), Bytes::from("v").into());
        assert!(matches!(
            run(&mut store, &["PFCOUNT", "s", "x"]).unwrap_err(),
            EngineError::WrongType
        ));
    }
}
