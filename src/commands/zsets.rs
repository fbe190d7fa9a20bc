//! Sorted set commands.

use super::args::Args;
use super::reply::Reply;
use crate::error::{EngineError, Result};
use crate::storage::Store;
use crate::types::string::parse_float;
use crate::types::zset::{AddOptions, AddOutcome};
use crate::types::{ScoreBound, SortedSet};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// `LIMIT offset count` as written. A negative offset selects nothing and a
/// negative count means "to the end".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    pub offset: i64,
    pub count: i64,
}

impl Limit {
    fn resolve(limit: Option<Limit>) -> Option<Option<(usize, Option<usize>)>> {
        match limit {
            None => Some(None),
            Some(Limit { offset, .. }) if offset < 0 => None,
            Some(Limit { offset, count }) => {
                let count = usize::try_from(count).ok();
                Some(Some((offset as usize, count)))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ZSetCommand {
    Add {
        key: Bytes,
        options: AddOptions,
        members: Vec<(f64, Bytes)>,
    },
    Rem {
        key: Bytes,
        members: Vec<Bytes>,
    },
    Score {
        key: Bytes,
        member: Bytes,
    },
    IncrBy {
        key: Bytes,
        delta: f64,
        member: Bytes,
    },
    Card(Bytes),
    Rank {
        key: Bytes,
        member: Bytes,
        reverse: bool,
    },
    Range {
        key: Bytes,
        start: i64,
        stop: i64,
        reverse: bool,
        with_scores: bool,
    },
    RangeByScore {
        key: Bytes,
        min: ScoreBound,
        max: ScoreBound,
        reverse: bool,
        with_scores: bool,
        limit: Option<Limit>,
    },
    Count {
        key: Bytes,
        min: ScoreBound,
        max: ScoreBound,
    },
    Pop {
        key: Bytes,
        count: Option<usize>,
        highest: bool,
    },
    RemRangeByRank {
        key: Bytes,
        start: i64,
        stop: i64,
    },
    RemRangeByScore {
        key: Bytes,
        min: ScoreBound,
        max: ScoreBound,
    },
}

impl ZSetCommand {
    pub fn parse(name: &str, args: &mut Args<'_>) -> Result<Option<Self>> {
        let command = match name {
            "ZADD" => parse_zadd(args)?,
            "ZREM" => {
                args.at_least(2)?;
                ZSetCommand::Rem {
                    key: args.bytes()?,
                    members: args.rest(),
                }
            }
            "ZSCORE" => {
                args.exact(2)?;
                ZSetCommand::Score {
                    key: args.bytes()?,
                    member: args.bytes()?,
                }
            }
            "ZINCRBY" => {
                args.exact(3)?;
                ZSetCommand::IncrBy {
                    key: args.bytes()?,
                    delta: args.float()?,
                    member: args.bytes()?,
                }
            }
            "ZCARD" => {
                args.exact(1)?;
                ZSetCommand::Card(args.bytes()?)
            }
            "ZRANK" | "ZREVRANK" => {
                args.exact(2)?;
                ZSetCommand::Rank {
                    key: args.bytes()?,
                    member: args.bytes()?,
                    reverse: name == "ZREVRANK",
                }
            }
            "ZRANGE" | "ZREVRANGE" => {
                if !(3..=4).contains(&args.len()) {
                    return Err(EngineError::arity(name));
                }
                let key = args.bytes()?;
                let start = args.int()?;
                let stop = args.int()?;
                let with_scores = args.eat("WITHSCORES");
                args.finish()?;
                ZSetCommand::Range {
                    key,
                    start,
                    stop,
                    reverse: name == "ZREVRANGE",
                    with_scores,
                }
            }
            "ZRANGEBYSCORE" | "ZREVRANGEBYSCORE" => {
                args.at_least(3)?;
                let reverse = name == "ZREVRANGEBYSCORE";
                let key = args.bytes()?;
                let first = ScoreBound::parse(&args.bytes()?)?;
                let second = ScoreBound::parse(&args.bytes()?)?;
                let (min, max) = if reverse { (second, first) } else { (first, second) };

                let mut with_scores = false;
                let mut limit = None;
                while args.remaining() > 0 {
                    if args.eat("WITHSCORES") {
                        with_scores = true;
                    } else if args.eat("LIMIT") {
                        if args.remaining() < 2 {
                            return Err(EngineError::syntax());
                        }
                        limit = Some(Limit {
                            offset: args.int()?,
                            count: args.int()?,
                        });
                    } else {
                        return Err(EngineError::syntax());
                    }
                }
                ZSetCommand::RangeByScore {
                    key,
                    min,
                    max,
                    reverse,
                    with_scores,
                    limit,
                }
            }
            "ZCOUNT" | "ZREMRANGEBYSCORE" => {
                args.exact(3)?;
                let key = args.bytes()?;
                let min = ScoreBound::parse(&args.bytes()?)?;
                let max = ScoreBound::parse(&args.bytes()?)?;
                if name == "ZCOUNT" {
                    ZSetCommand::Count { key, min, max }
                } else {
                    ZSetCommand::RemRangeByScore { key, min, max }
                }
            }
            "ZPOPMIN" | "ZPOPMAX" => {
                if !(1..=2).contains(&args.len()) {
                    return Err(EngineError::arity(name));
                }
                let key = args.bytes()?;
                let count = if args.remaining() > 0 {
                    Some(args.count()?)
                } else {
                    None
                };
                ZSetCommand::Pop {
                    key,
                    count,
                    highest: name == "ZPOPMAX",
                }
            }
            "ZREMRANGEBYRANK" => {
                args.exact(3)?;
                ZSetCommand::RemRangeByRank {
                    key: args.bytes()?,
                    start: args.int()?,
                    stop: args.int()?,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(command))
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            ZSetCommand::Add { .. }
                | ZSetCommand::Rem { .. }
                | ZSetCommand::IncrBy { .. }
                | ZSetCommand::Pop { .. }
                | ZSetCommand::RemRangeByRank { .. }
                | ZSetCommand::RemRangeByScore { .. }
        )
    }

    pub fn apply(&self, store: &mut Store) -> Result<Reply> {
        match self {
            ZSetCommand::Add {
                key,
                options,
                members,
            } => {
                let outcomes = store.zset_ops(key, !options.xx, |zset| {
                    members
                        .iter()
                        .map(|(score, member)| zset.add(member.clone(), *score, options))
                        .collect::<Result<Vec<_>>>()
                })?;
                let outcomes = outcomes.unwrap_or_default();

                if options.incr {
                    return Ok(match outcomes.first() {
                        Some(AddOutcome::Added(s) | AddOutcome::Updated(s) | AddOutcome::Unchanged(s)) => {
                            Reply::float(*s)
                        }
                        _ => Reply::Nil,
                    });
                }
                let counted = outcomes
                    .iter()
                    .filter(|outcome| match outcome {
                        AddOutcome::Added(_) => true,
                        AddOutcome::Updated(_) => options.ch,
                        _ => false,
                    })
                    .count();
                Ok(Reply::integer(counted))
            }
            ZSetCommand::Rem { key, members } => {
                let removed = store.zset_ops(key, false, |zset| {
                    Ok(members.iter().filter(|m| zset.remove(m)).count())
                })?;
                Ok(Reply::integer(removed.unwrap_or(0)))
            }
            ZSetCommand::Score { key, member } => {
                let score = store.read::<SortedSet, _>(key, |zset| zset.score(member))?;
                Ok(score.flatten().map_or(Reply::Nil, Reply::float))
            }
            ZSetCommand::IncrBy { key, delta, member } => {
                let score = store.zset_ops(key, true, |zset| zset.incr(member.clone(), *delta))?;
                Ok(score.map_or(Reply::Nil, Reply::float))
            }
            ZSetCommand::Card(key) => {
                let len = store.read::<SortedSet, _>(key, SortedSet::len)?;
                Ok(Reply::integer(len.unwrap_or(0)))
            }
            ZSetCommand::Rank {
                key,
                member,
                reverse,
            } => {
                let rank = store.read::<SortedSet, _>(key, |zset| zset.rank(member, *reverse))?;
                Ok(rank.flatten().map_or(Reply::Nil, Reply::integer))
            }
            ZSetCommand::Range {
                key,
                start,
                stop,
                reverse,
                with_scores,
            } => {
                let items = store.read::<SortedSet, _>(key, |zset| {
                    zset.range_by_rank(*start, *stop, *reverse)
                })?;
                Ok(scored(items.unwrap_or_default(), *with_scores))
            }
            ZSetCommand::RangeByScore {
                key,
                min,
                max,
                reverse,
                with_scores,
                limit,
            } => {
                let Some(limit) = Limit::resolve(*limit) else {
                    store.read::<SortedSet, _>(key, |_| ())?;
                    return Ok(Reply::Array(Vec::new()));
                };
                let items = store.read::<SortedSet, _>(key, |zset| {
                    zset.range_by_score(min, max, *reverse, limit)
                })?;
                Ok(scored(items.unwrap_or_default(), *with_scores))
            }
            ZSetCommand::Count { key, min, max } => {
                let n = store.read::<SortedSet, _>(key, |zset| zset.count(min, max))?;
                Ok(Reply::integer(n.unwrap_or(0)))
            }
            ZSetCommand::Pop {
                key,
                count,
                highest,
            } => {
                let popped = store.zset_ops(key, false, |zset| {
                    Ok(zset.pop(count.unwrap_or(1), *highest))
                })?;
                Ok(scored(popped.unwrap_or_default(), true))
            }
            ZSetCommand::RemRangeByRank { key, start, stop } => {
                let removed = store.zset_ops(key, false, |zset| {
                    Ok(zset.remove_range_by_rank(*start, *stop))
                })?;
                Ok(Reply::integer(removed.unwrap_or(0)))
            }
            ZSetCommand::RemRangeByScore { key, min, max } => {
                let removed = store.zset_ops(key, false, |zset| {
                    Ok(zset.remove_range_by_score(min, max))
                })?;
                Ok(Reply::integer(removed.unwrap_or(0)))
            }
        }
    }
}

fn parse_zadd(args: &mut Args<'_>) -> Result<ZSetCommand> {
    args.at_least(3)?;
    let key = args.bytes()?;

    let mut options = AddOptions::default();
    loop {
        if args.eat("NX") {
            options.nx = true;
        } else if args.eat("XX") {
            options.xx = true;
        } else if args.eat("GT") {
            options.gt = true;
        } else if args.eat("LT") {
            options.lt = true;
        } else if args.eat("CH") {
            options.ch = true;
        } else if args.eat("INCR") {
            options.incr = true;
        } else {
            break;
        }
    }

    if options.nx && options.xx {
        return Err(EngineError::MalformedArgument(
            "XX and NX options at the same time are not compatible".to_string(),
        ));
    }
    if (options.gt && options.lt) || (options.nx && (options.gt || options.lt)) {
        return Err(EngineError::MalformedArgument(
            "GT, LT, and/or NX options at the same time are not compatible".to_string(),
        ));
    }

    let pairs = args.pairs()?;
    if options.incr && pairs.len() != 1 {
        return Err(EngineError::MalformedArgument(
            "INCR option supports a single increment-element pair".to_string(),
        ));
    }

    let mut members = Vec::with_capacity(pairs.len());
    for (score, member) in pairs {
        let score = parse_float(&score)?;
        members.push((score, member));
    }

    Ok(ZSetCommand::Add {
        key,
        options,
        members,
    })
}

fn scored(items: Vec<(Bytes, f64)>, with_scores: bool) -> Reply {
    let mut out = Vec::with_capacity(items.len() * if with_scores { 2 } else { 1 });
    for (member, score) in items {
        out.push(Reply::Bulk(member));
        if with_scores {
            out.push(Reply::float(score));
        }
    }
    Reply::Array(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Keyspace;

    fn run(store: &mut Store, parts: &[&str]) -> Result<Reply> {
        let raw: Vec<Bytes> = parts[1..].iter().map(|s| Bytes::from(s.to_string())).collect();
        let mut args = Args::new(parts[0], &raw);
        ZSetCommand::parse(parts[0], &mut args)?
            .expect("zset command")
            .apply(store)
    }

    fn bulks(items: &[&str]) -> Reply {
        Reply::bulks(items.iter().map(|s| Bytes::from(s.to_string())))
    }

    #[test]
    fn test_zadd_options() {
        let keyspace = Keyspace::new();
        let mut store = keyspace.lock();

        assert_eq!(run(&mut store, &["ZADD", "z", "1", "a", "2", "b"]).unwrap(), Reply::Integer(2));
        assert_eq!(run(&mut store, &["ZADD", "z", "XX", "5", "c"]).unwrap(), Reply::Integer(0));
        assert_eq!(run(&mut store, &["ZADD", "z", "CH", "3", "a"]).unwrap(), Reply::Integer(1));
        assert_eq!(run(&mut store, &["ZADD", "z", "GT", "CH", "1", "a"]).unwrap(), Reply::Integer(0));
        assert_eq!(run(&mut store, &["ZADD", "z", "INCR", "2", "a"]).unwrap(), Reply::bulk("5"));
        assert_eq!(run(&mut store, &["ZADD", "z", "NX", "INCR", "2", "a"]).unwrap(), Reply::Nil);

        assert!(run(&mut store, &["ZADD", "z", "NX", "XX", "1", "a"]).is_err());
        assert!(run(&mut store, &["ZADD", "z", "GT", "LT", "1", "a"]).is_err());
        assert!(run(&mut store, &["ZADD", "z", "INCR", "1", "a", "2", "b"]).is_err());
        assert!(run(&mut store, &["ZADD", "z", "nan", "a"]).is_err());

        // XX on a missing key never creates it
        run(&mut store, &["ZADD", "ghost", "XX", "1", "a"]).unwrap();
        assert!(!store.exists(b"ghost"));
    }

    #[test]
    fn test_ranges() {
        let keyspace = Keyspace::new();
        let mut store = keyspace.lock();
        run(&mut store, &["ZADD", "z", "1", "a", "2", "b", "3", "c", "4", "d"]).unwrap();

        assert_eq!(run(&mut store, &["ZRANGE", "z", "0", "1"]).unwrap(), bulks(&["a", "b"]));
        assert_eq!(
            run(&mut store, &["ZREVRANGE", "z", "0", "0", "WITHSCORES"]).unwrap(),
            bulks(&["d", "4"])
        );
        assert_eq!(
            run(&mut store, &["ZRANGEBYSCORE", "z", "(1", "+inf", "LIMIT", "1", "-1"]).unwrap(),
            bulks(&["c", "d"])
        );
        assert_eq!(
            run(&mut store, &["ZREVRANGEBYSCORE", "z", "3", "-inf"]).unwrap(),
            bulks(&["c", "b", "a"])
        );
        assert_eq!(
            run(&mut store, &["ZRANGEBYSCORE", "z", "-inf", "+inf", "LIMIT", "-1", "2"]).unwrap(),
            Reply::Array(vec![])
        );
        assert_eq!(run(&mut store, &["ZCOUNT", "z", "2", "(4"]).unwrap(), Reply::Integer(2));
        assert_eq!(run(&mut store, &["ZREVRANK", "z", "a"]).unwrap(), Reply::Integer(3));
        assert_eq!(run(&mut store, &["ZRANK", "z", "zz"]).unwrap(), Reply::Nil);
    }

    #[test]
    fn test_pops_and_removals() {
        let keyspace = Keyspace::new();
        let mut store = keyspace.lock();
        run(&mut store, &["ZADD", "z", "1", "a", "2", "b", "3", "c", "4", "d"]).unwrap();

        assert_eq!(run(&mut store, &["ZPOPMAX", "z"]).unwrap(), bulks(&["d", "4"]));
        assert_eq!(run(&mut store, &["ZREMRANGEBYRANK", "z", "0", "0"]).unwrap(), Reply::Integer(1));
        assert_eq!(run(&mut store, &["ZREMRANGEBYSCORE", "z", "-inf", "2"]).unwrap(), Reply::Integer(1));
        assert_eq!(run(&mut store, &["ZPOPMIN", "z", "5"]).unwrap(), bulks(&["c", "3"]));
        assert!(!store.exists(b"z"));
        assert_eq!(run(&mut store, &["ZPOPMIN", "z"]).unwrap(), Reply::Array(vec![]));
    }
}
