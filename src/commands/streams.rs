//! Stream commands, including consumer groups.
//!
//! Entries are replied as `[id, [field, value, ...]]`. An entry that was
//! deleted while still pending in a group replies as `[id, nil]`.

use super::args::Args;
use super::reply::Reply;
use crate::error::{EngineError, Result};
use crate::storage::Store;
use crate::types::stream::{Fields, IdSpec, ReadStart};
use crate::types::{Stream, StreamId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GroupAction {
    Create {
        group: Bytes,
        /// `None` is `$`: start after the current last entry.
        start: Option<StreamId>,
        make_stream: bool,
    },
    Destroy {
        group: Bytes,
    },
    DelConsumer {
        group: Bytes,
        consumer: Bytes,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamCommand {
    Add {
        key: Bytes,
        id: IdSpec,
        fields: Fields,
        max_len: Option<usize>,
        make_stream: bool,
    },
    Len(Bytes),
    Range {
        key: Bytes,
        start: StreamId,
        end: StreamId,
        count: Option<usize>,
        reverse: bool,
    },
    Del {
        key: Bytes,
        ids: Vec<StreamId>,
    },
    Trim {
        key: Bytes,
        max_len: usize,
    },
    Group {
        key: Bytes,
        action: GroupAction,
    },
    ReadGroup {
        group: Bytes,
        consumer: Bytes,
        count: Option<usize>,
        key: Bytes,
        start: ReadStart,
    },
    Ack {
        key: Bytes,
        group: Bytes,
        ids: Vec<StreamId>,
    },
    Pending {
        key: Bytes,
        group: Bytes,
    },
}

impl StreamCommand {
    pub fn parse(name: &str, args: &mut Args<'_>) -> Result<Option<Self>> {
        let command = match name {
            "XADD" => parse_xadd(args)?,
            "XLEN" => {
                args.exact(1)?;
                StreamCommand::Len(args.bytes()?)
            }
            "XRANGE" | "XREVRANGE" => {
                args.at_least(3)?;
                let reverse = name == "XREVRANGE";
                let key = args.bytes()?;
                let first = args.bytes()?;
                let second = args.bytes()?;
                let (start, end) = if reverse {
                    (
                        StreamId::parse_range_start(&second)?,
                        StreamId::parse_range_end(&first)?,
                    )
                } else {
                    (
                        StreamId::parse_range_start(&first)?,
                        StreamId::parse_range_end(&second)?,
                    )
                };
                let count = if args.eat("COUNT") {
                    Some(args.count()?)
                } else {
                    None
                };
                args.finish()?;
                StreamCommand::Range {
                    key,
                    start,
                    end,
                    count,
                    reverse,
                }
            }
            "XDEL" => {
                args.at_least(2)?;
                let key = args.bytes()?;
                let ids = parse_ids(args)?;
                StreamCommand::Del { key, ids }
            }
            "XTRIM" => {
                args.at_least(3)?;
                let key = args.bytes()?;
                let max_len = parse_max_len(args)?.ok_or_else(EngineError::syntax)?;
                args.finish()?;
                StreamCommand::Trim { key, max_len }
            }
            "XGROUP" => parse_xgroup(args)?,
            "XREADGROUP" => parse_xreadgroup(args)?,
            "XACK" => {
                args.at_least(3)?;
                let key = args.bytes()?;
                let group = args.bytes()?;
                let ids = parse_ids(args)?;
                StreamCommand::Ack { key, group, ids }
            }
            "XPENDING" => {
                args.exact(2)?;
                StreamCommand::Pending {
                    key: args.bytes()?,
                    group: args.bytes()?,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(command))
    }

    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            StreamCommand::Len(_) | StreamCommand::Range { .. } | StreamCommand::Pending { .. }
        )
    }

    /// The form written to the log: generated IDs are pinned to the ID
    /// the command actually produced.
    pub fn log_form(&self, reply: &Reply) -> Option<StreamCommand> {
        match self {
            StreamCommand::Add {
                key,
                fields,
                max_len,
                make_stream,
                ..
            } => {
                let id = StreamId::parse(reply.as_bulk()?).ok()?;
                Some(StreamCommand::Add {
                    key: key.clone(),
                    id: IdSpec::Explicit(id),
                    fields: fields.clone(),
                    max_len: *max_len,
                    make_stream: *make_stream,
                })
            }
            other => Some(other.clone()),
        }
    }

    pub fn apply(&self, store: &mut Store) -> Result<Reply> {
        let now_ms = store.now_ms();
        match self {
            StreamCommand::Add {
                key,
                id,
                fields,
                max_len,
                make_stream,
            } => {
                let added = store.stream_ops(key, *make_stream, |stream| {
                    let id = stream.next_id(*id, now_ms)?;
                    stream.append(id, fields.clone());
                    if let Some(max_len) = max_len {
                        stream.trim_to(*max_len);
                    }
                    Ok(id)
                })?;
                Ok(added.map_or(Reply::Nil, |id| Reply::Bulk(id.to_bytes())))
            }
            StreamCommand::Len(key) => {
                let len = store.read::<Stream, _>(key, Stream::len)?;
                Ok(Reply::integer(len.unwrap_or(0)))
            }
            StreamCommand::Range {
                key,
                start,
                end,
                count,
                reverse,
            } => {
                let entries = store.read::<Stream, _>(key, |stream| {
                    stream.range(*start, *end, *count, *reverse)
                })?;
                Ok(Reply::Array(
                    entries
                        .unwrap_or_default()
                        .into_iter()
                        .map(|(id, fields)| entry_reply(id, Some(fields)))
                        .collect(),
                ))
            }
            StreamCommand::Del { key, ids } => {
                let removed = store.stream_ops(key, false, |stream| Ok(stream.delete(ids)))?;
                Ok(Reply::integer(removed.unwrap_or(0)))
            }
            StreamCommand::Trim { key, max_len } => {
                let removed = store.stream_ops(key, false, |stream| Ok(stream.trim_to(*max_len)))?;
                Ok(Reply::integer(removed.unwrap_or(0)))
            }
            StreamCommand::Group { key, action } => apply_group(store, key, action),
            StreamCommand::ReadGroup {
                group,
                consumer,
                count,
                key,
                start,
            } => {
                let entries = store
                    .stream_ops(key, false, |stream| {
                        stream.read_group(group, consumer, *start, *count, now_ms)
                    })?
                    .ok_or_else(|| no_group(key, group))?;

                if entries.is_empty() && *start == ReadStart::New {
                    return Ok(Reply::Nil);
                }
                let entries = entries
                    .into_iter()
                    .map(|(id, fields)| entry_reply(id, fields))
                    .collect();
                Ok(Reply::Array(vec![Reply::Array(vec![
                    Reply::Bulk(key.clone()),
                    Reply::Array(entries),
                ])]))
            }
            StreamCommand::Ack { key, group, ids } => {
                let acked = store.stream_ops(key, false, |stream| stream.ack(group, ids))?;
                Ok(Reply::integer(acked.unwrap_or(0)))
            }
            StreamCommand::Pending { key, group } => {
                let summary = store
                    .read::<Stream, _>(key, |stream| stream.pending_summary(group))?
                    .ok_or_else(|| no_group(key, group))??;

                if summary.count == 0 {
                    return Ok(Reply::Array(vec![
                        Reply::Integer(0),
                        Reply::Nil,
                        Reply::Nil,
                        Reply::Nil,
                    ]));
                }
                let id_reply = |id: Option<StreamId>| id.map_or(Reply::Nil, |id| Reply::Bulk(id.to_bytes()));
                Ok(Reply::Array(vec![
                    Reply::integer(summary.count),
                    id_reply(summary.min),
                    id_reply(summary.max),
                    Reply::Array(
                        summary
                            .per_consumer
                            .into_iter()
                            .map(|(consumer, n)| {
                                Reply::Array(vec![
                                    Reply::Bulk(consumer),
                                    Reply::Bulk(Bytes::from(n.to_string())),
                                ])
                            })
                            .collect(),
                    ),
                ]))
            }
        }
    }
}

fn apply_group(store: &mut Store, key: &Bytes, action: &GroupAction) -> Result<Reply> {
    match action {
        GroupAction::Create {
            group,
            start,
            make_stream,
        } => {
            store
                .stream_ops(key, *make_stream, |stream| {
                    stream.create_group(group.clone(), *start)
                })?
                .ok_or_else(|| {
                    EngineError::MalformedArgument(
                        "The XGROUP subcommand requires the key to exist. \
                         Note that for CREATE you may want to use the MKSTREAM option to create an empty stream automatically."
                            .to_string(),
                    )
                })?;
            Ok(Reply::Ok)
        }
        GroupAction::Destroy { group } => {
            let removed = store.stream_ops(key, false, |stream| Ok(stream.destroy_group(group)))?;
            Ok(Reply::integer(removed.unwrap_or(false) as i64))
        }
        GroupAction::DelConsumer { group, consumer } => {
            let pending = store
                .stream_ops(key, false, |stream| stream.delete_consumer(group, consumer))?
                .ok_or_else(|| no_group(key, group))?;
            Ok(Reply::integer(pending))
        }
    }
}

fn entry_reply(id: StreamId, fields: Option<Fields>) -> Reply {
    let fields = match fields {
        None => Reply::Nil,
        Some(fields) => Reply::Array(
            fields
                .into_iter()
                .flat_map(|(field, value)| [Reply::Bulk(field), Reply::Bulk(value)])
                .collect(),
        ),
    };
    Reply::Array(vec![Reply::Bulk(id.to_bytes()), fields])
}

fn no_group(key: &[u8], group: &[u8]) -> EngineError {
    EngineError::MalformedArgument(format!(
        "NOGROUP No such key '{}' or consumer group '{}'",
        String::from_utf8_lossy(key),
        String::from_utf8_lossy(group)
    ))
}

fn parse_ids(args: &mut Args<'_>) -> Result<Vec<StreamId>> {
    args.rest().iter().map(|raw| StreamId::parse(raw)).collect()
}

/// `MAXLEN [=|~] n`. The approximate form trims exactly.
fn parse_max_len(args: &mut Args<'_>) -> Result<Option<usize>> {
    if !args.eat("MAXLEN") {
        return Ok(None);
    }
    if !args.eat("=") {
        args.eat("~");
    }
    Ok(Some(args.count()?))
}

fn parse_xadd(args: &mut Args<'_>) -> Result<StreamCommand> {
    args.at_least(4)?;
    let key = args.bytes()?;
    let mut make_stream = true;
    let mut max_len = None;
    loop {
        if args.eat("NOMKSTREAM") {
            make_stream = false;
        } else if let Some(n) = parse_max_len(args)? {
            max_len = Some(n);
        } else {
            break;
        }
    }
    let id = IdSpec::parse(&args.bytes()?)?;
    let fields = args.pairs()?;
    Ok(StreamCommand::Add {
        key,
        id,
        fields,
        max_len,
        make_stream,
    })
}

fn parse_xgroup(args: &mut Args<'_>) -> Result<StreamCommand> {
    args.at_least(1)?;
    let sub = args.keyword()?;
    let (key, action) = match sub.as_slice() {
        b"CREATE" => {
            if !(3..=4).contains(&args.remaining()) {
                return Err(EngineError::arity("XGROUP CREATE"));
            }
            let key = args.bytes()?;
            let group = args.bytes()?;
            let raw = args.bytes()?;
            let start = if raw.as_ref() == b"$" {
                None
            } else {
                Some(StreamId::parse(&raw)?)
            };
            let make_stream = args.eat("MKSTREAM");
            args.finish()?;
            (
                key,
                GroupAction::Create {
                    group,
                    start,
                    make_stream,
                },
            )
        }
        b"DESTROY" => {
            if args.remaining() != 2 {
                return Err(EngineError::arity("XGROUP DESTROY"));
            }
            (args.bytes()?, GroupAction::Destroy { group: args.bytes()? })
        }
        b"DELCONSUMER" => {
            if args.remaining() != 3 {
                return Err(EngineError::arity("XGROUP DELCONSUMER"));
            }
            let key = args.bytes()?;
            (
                key,
                GroupAction::DelConsumer {
                    group: args.bytes()?,
                    consumer: args.bytes()?,
                },
            )
        }
        _ => {
            return Err(EngineError::MalformedArgument(format!(
                "unknown subcommand '{}' for 'XGROUP'",
                String::from_utf8_lossy(&sub)
            )))
        }
    };
    Ok(StreamCommand::Group { key, action })
}

fn parse_xreadgroup(args: &mut Args<'_>) -> Result<StreamCommand> {
    args.at_least(6)?;
    if !args.eat("GROUP") {
        return Err(EngineError::syntax());
    }
    let group = args.bytes()?;
    let consumer = args.bytes()?;
    let count = if args.eat("COUNT") {
        Some(args.count()?)
    } else {
        None
    };
    if !args.eat("STREAMS") {
        return Err(EngineError::syntax());
    }
    if args.remaining() != 2 {
        return Err(EngineError::MalformedArgument(
            "XREADGROUP reads exactly one stream".to_string(),
        ));
    }
    let key = args.bytes()?;
    let start = ReadStart::parse(&args.bytes()?)?;
    Ok(StreamCommand::ReadGroup {
        group,
        consumer,
        count,
        key,
        start,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Keyspace;

    fn run(store: &mut Store, parts: &[&str]) -> Result<Reply> {
        let raw: Vec<Bytes> = parts[1..].iter().map(|s| Bytes::from(s.to_string())).collect();
        let mut args = Args::new(parts[0], &raw);
        StreamCommand::parse(parts[0], &mut args)?
            .expect("stream command")
            .apply(store)
    }

    #[test]
    fn test_xadd_and_range() {
        let keyspace = Keyspace::new();
        let mut store = keyspace.lock();

        assert_eq!(run(&mut store, &["XADD", "s", "1-1", "f", "v"]).unwrap(), Reply::bulk("1-1"));
        assert_eq!(run(&mut store, &["XADD", "s", "1-*", "f", "w"]).unwrap(), Reply::bulk("1-2"));
        assert!(run(&mut store, &["XADD", "s", "1-1", "f", "x"]).is_err());
        assert_eq!(
            run(&mut store, &["XADD", "nope", "NOMKSTREAM", "*", "f", "v"]).unwrap(),
            Reply::Nil
        );
        assert!(!store.exists(b"nope"));

        let range = run(&mut store, &["XREVRANGE", "s", "+", "-", "COUNT", "1"]).unwrap();
        assert_eq!(
            range,
            Reply::Array(vec![Reply::Array(vec![
                Reply::bulk("1-2"),
                Reply::Array(vec![Reply::bulk("f"), Reply::bulk("w")]),
            ])])
        );

        run(&mut store, &["XADD", "s", "MAXLEN", "~", "1", "2-0", "f", "z"]).unwrap();
        assert_eq!(run(&mut store, &["XLEN", "s"]).unwrap(), Reply::Integer(1));
    }

    #[test]
    fn test_auto_id_is_pinned_in_log_form() {
        let keyspace = Keyspace::new();
        let mut store = keyspace.lock();
        let raw: Vec<Bytes> = ["s", "*", "f", "v"].iter().map(|s| Bytes::from(*s)).collect();
        let command = StreamCommand::parse("XADD", &mut Args::new("XADD", &raw))
            .unwrap()
            .unwrap();
        let reply = command.apply(&mut store).unwrap();
        let id = StreamId::parse(reply.as_bulk().unwrap()).unwrap();

        match command.log_form(&reply) {
            Some(StreamCommand::Add { id: IdSpec::Explicit(logged), .. }) => assert_eq!(logged, id),
            other => panic!("unexpected log form {:?}", other),
        }
    }

    #[test]
    fn test_consumer_group_flow() {
        let keyspace = Keyspace::new();
        let mut store = keyspace.lock();

        assert!(run(&mut store, &["XGROUP", "CREATE", "s", "g", "$"]).is_err());
        assert_eq!(
            run(&mut store, &["XGROUP", "CREATE", "s", "g", "0", "MKSTREAM"]).unwrap(),
            Reply::Ok
        );
        run(&mut store, &["XADD", "s", "1-0", "a", "1"]).unwrap();
        run(&mut store, &["XADD", "s", "2-0", "b", "2"]).unwrap();

        let read = run(&mut store, &["XREADGROUP", "GROUP", "g", "alice", "COUNT", "1", "STREAMS", "s", ">"]).unwrap();
        let streams = read.as_array().unwrap();
        assert_eq!(streams.len(), 1);
        let entries = streams[0].as_array().unwrap()[1].as_array().unwrap();
        assert_eq!(entries.len(), 1);

        run(&mut store, &["XREADGROUP", "GROUP", "g", "bob", "STREAMS", "s", ">"]).unwrap();
        assert_eq!(
            run(&mut store, &["XREADGROUP", "GROUP", "g", "bob", "STREAMS", "s", ">"]).unwrap(),
            Reply::Nil
        );

        let pending = run(&mut store, &["XPENDING", "s", "g"]).unwrap();
        assert_eq!(pending.as_array().unwrap()[0], Reply::Integer(2));

        assert_eq!(run(&mut store, &["XACK", "s", "g", "1-0", "9-9"]).unwrap(), Reply::Integer(1));
        assert_eq!(
            run(&mut store, &["XGROUP", "DELCONSUMER", "s", "g", "bob"]).unwrap(),
            Reply::Integer(1)
        );
        assert_eq!(
            run(&mut store, &["XPENDING", "s", "g"]).unwrap(),
            Reply::Array(vec![Reply::Integer(0), Reply::Nil, Reply::Nil, Reply::Nil])
        );

        assert!(run(&mut store, &["XREADGROUP", "GROUP", "nog", "c", "STREAMS", "s", ">"]).is_err());
        assert!(run(&mut store, &["XREADGROUP", "GROUP", "g", "c", "STREAMS", "missing", ">"]).is_err());
        assert_eq!(run(&mut store, &["XGROUP", "DESTROY", "s", "g"]).unwrap(), Reply::Integer(1));
    }
}
