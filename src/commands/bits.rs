//! Bitmap commands: SETBIT, GETBIT, BITCOUNT, BITPOS, BITOP and BITFIELD.

use super::args::Args;
use super::reply::Reply;
use crate::error::{EngineError, Result};
use crate::storage::Store;
use crate::types::bitmap::{BitOp, BitUnit, MAX_BIT_OFFSET};
use crate::types::{BitString, BitfieldOp, FieldType, Overflow};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BitCommand {
    SetBit {
        key: Bytes,
        offset: u64,
        on: bool,
    },
    GetBit {
        key: Bytes,
        offset: u64,
    },
    Count {
        key: Bytes,
        range: Option<(i64, i64, BitUnit)>,
    },
    Pos {
        key: Bytes,
        bit: bool,
        start: i64,
        end: Option<i64>,
        unit: BitUnit,
    },
    Op {
        op: BitOp,
        dest: Bytes,
        sources: Vec<Bytes>,
    },
    Field {
        key: Bytes,
        ops: Vec<BitfieldOp>,
    },
}

impl BitCommand {
    pub fn parse(name: &str, args: &mut Args<'_>) -> Result<Option<Self>> {
        let command = match name {
            "SETBIT" => {
                args.exact(3)?;
                let key = args.bytes()?;
                let offset = parse_bit_offset(args)?;
                let on = match args.bytes()?.as_ref() {
                    b"0" => false,
                    b"1" => true,
                    _ => {
                        return Err(EngineError::OutOfRange(
                            "bit is not an integer or out of range".to_string(),
                        ))
                    }
                };
                BitCommand::SetBit { key, offset, on }
            }
            "GETBIT" => {
                args.exact(2)?;
                BitCommand::GetBit {
                    key: args.bytes()?,
                    offset: parse_bit_offset(args)?,
                }
            }
            "BITCOUNT" => {
                args.at_least(1)?;
                let key = args.bytes()?;
                let range = match args.remaining() {
                    0 => None,
                    2 | 3 => {
                        let start = args.int()?;
                        let end = args.int()?;
                        Some((start, end, parse_unit(args)?))
                    }
                    _ => return Err(EngineError::syntax()),
                };
                BitCommand::Count { key, range }
            }
            "BITPOS" => {
                if !(2..=5).contains(&args.len()) {
                    return Err(EngineError::arity(name));
                }
                let key = args.bytes()?;
                let bit = match args.bytes()?.as_ref() {
                    b"0" => false,
                    b"1" => true,
                    _ => {
                        return Err(EngineError::MalformedArgument(
                            "The bit argument must be 1 or 0.".to_string(),
                        ))
                    }
                };
                let start = if args.remaining() > 0 { args.int()? } else { 0 };
                let end = if args.remaining() > 0 {
                    Some(args.int()?)
                } else {
                    None
                };
                let unit = parse_unit(args)?;
                BitCommand::Pos {
                    key,
                    bit,
                    start,
                    end,
                    unit,
                }
            }
            "BITOP" => {
                args.at_least(3)?;
                BitCommand::Op {
                    op: BitOp::parse(&args.bytes()?)?,
                    dest: args.bytes()?,
                    sources: args.rest(),
                }
            }
            "BITFIELD" => {
                args.at_least(1)?;
                let key = args.bytes()?;
                let ops = parse_bitfield_ops(args)?;
                BitCommand::Field { key, ops }
            }
            _ => return Ok(None),
        };
        Ok(Some(command))
    }

    pub fn is_write(&self) -> bool {
        match self {
            BitCommand::SetBit { .. } | BitCommand::Op { .. } => true,
            BitCommand::Field { ops, .. } => ops.iter().any(BitfieldOp::is_write),
            _ => false,
        }
    }

    pub fn apply(&self, store: &mut Store) -> Result<Reply> {
        match self {
            BitCommand::SetBit { key, offset, on } => {
                let old = store.bitfield_ops(key, true, |bits| Ok(bits.set_bit(*offset, *on)))?;
                Ok(Reply::Integer(old.unwrap_or(0) as i64))
            }
            BitCommand::GetBit { key, offset } => {
                let bit = store.read::<BitString, _>(key, |bits| bits.get_bit(*offset))?;
                Ok(Reply::Integer(bit.unwrap_or(0) as i64))
            }
            BitCommand::Count { key, range } => {
                let n = store.read::<BitString, _>(key, |bits| bits.count(*range))?;
                Ok(Reply::integer(n.unwrap_or(0)))
            }
            BitCommand::Pos {
                key,
                bit,
                start,
                end,
                unit,
            } => {
                let pos = store.read::<BitString, _>(key, |bits| {
                    bits.position(*bit, *start, *end, *unit)
                })?;
                Ok(Reply::Integer(pos.unwrap_or(if *bit { -1 } else { 0 })))
            }
            BitCommand::Op { op, dest, sources } => {
                for key in sources {
                    store.read::<BitString, _>(key, |_| ())?;
                }
                let snapshot: &Store = store;
                let operands: Vec<Option<&BitString>> =
                    sources.iter().map(|key| snapshot.view(key)).collect();
                let result = BitString::bitop(*op, &operands)?;

                let len = result.len();
                if result.is_empty() {
                    store.delete(dest);
                } else {
                    store.set(dest.clone(), result.into());
                }
                Ok(Reply::integer(len))
            }
            BitCommand::Field { key, ops } => {
                let results = if self.is_write() {
                    store
                        .bitfield_ops(key, true, |bits| Ok(bits.apply(ops)))?
                        .unwrap_or_default()
                } else {
                    let mut bits = store
                        .read::<BitString, _>(key, BitString::clone)?
                        .unwrap_or_default();
                    bits.apply(ops)
                };
                Ok(Reply::Array(
                    results
                        .into_iter()
                        .map(|r| r.map_or(Reply::Nil, Reply::Integer))
                        .collect(),
                ))
            }
        }
    }
}

fn parse_bit_offset(args: &mut Args<'_>) -> Result<u64> {
    let offset = args.int()?;
    u64::try_from(offset)
        .ok()
        .filter(|o| *o <= MAX_BIT_OFFSET)
        .ok_or_else(|| EngineError::OutOfRange("bit offset is not an integer or out of range".to_string()))
}

fn parse_unit(args: &mut Args<'_>) -> Result<BitUnit> {
    if args.remaining() == 0 {
        return Ok(BitUnit::Byte);
    }
    let unit = match args.keyword()?.as_slice() {
        b"BYTE" => BitUnit::Byte,
        b"BIT" => BitUnit::Bit,
        _ => return Err(EngineError::syntax()),
    };
    args.finish()?;
    Ok(unit)
}

fn parse_bitfield_ops(args: &mut Args<'_>) -> Result<Vec<BitfieldOp>> {
    let mut ops = Vec::new();
    while args.remaining() > 0 {
        let op = match args.keyword()?.as_slice() {
            b"GET" => {
                let ty = FieldType::parse(&args.bytes()?)?;
                let offset = ty.parse_offset(&args.bytes()?)?;
                BitfieldOp::Get { ty, offset }
            }
            b"SET" => {
                let ty = FieldType::parse(&args.bytes()?)?;
                let offset = ty.parse_offset(&args.bytes()?)?;
                BitfieldOp::Set {
                    ty,
                    offset,
                    value: args.int()?,
                }
            }
            b"INCRBY" => {
                let ty = FieldType::parse(&args.bytes()?)?;
                let offset = ty.parse_offset(&args.bytes()?)?;
                BitfieldOp::IncrBy {
                    ty,
                    offset,
                    incr: args.int()?,
                }
            }
            b"OVERFLOW" => BitfieldOp::Overflow(Overflow::parse(&args.bytes()?)?),
            _ => return Err(EngineError::syntax()),
        };
        ops.push(op);
    }
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Keyspace;

    fn run(store: &mut Store, parts: &[&str]) -> Result<Reply> {
        let raw: Vec<Bytes> = parts[1..].iter().map(|s| Bytes::from(s.to_string())).collect();
        let mut args = Args::new(parts[0], &raw);
        BitCommand::parse(parts[0], &mut args)?
            .expect("bit command")
            .apply(store)
    }

    #[test]
    fn test_setbit_getbit_bitcount() {
        let keyspace = Keyspace::new();
        let mut store = keyspace.lock();

        assert_eq!(run(&mut store, &["SETBIT", "b", "7", "1"]).unwrap(), Reply::Integer(0));
        assert_eq!(run(&mut store, &["SETBIT", "b", "7", "0"]).unwrap(), Reply::Integer(1));
        run(&mut store, &["SETBIT", "b", "0", "1"]).unwrap();
        run(&mut store, &["SETBIT", "b", "9", "1"]).unwrap();
        assert_eq!(run(&mut store, &["GETBIT", "b", "9"]).unwrap(), Reply::Integer(1));
        assert_eq!(run(&mut store, &["GETBIT", "b", "1000"]).unwrap(), Reply::Integer(0));
        assert_eq!(run(&mut store, &["BITCOUNT", "b"]).unwrap(), Reply::Integer(2));
        assert_eq!(run(&mut store, &["BITCOUNT", "b", "1", "1"]).unwrap(), Reply::Integer(1));
        assert_eq!(run(&mut store, &["BITCOUNT", "b", "0", "8", "BIT"]).unwrap(), Reply::Integer(1));

        assert!(run(&mut store, &["SETBIT", "b", "-1", "1"]).is_err());
        assert!(run(&mut store, &["SETBIT", "b", "1", "2"]).is_err());
    }

    #[test]
    fn test_bitpos_on_missing_key() {
        let keyspace = Keyspace::new();
        let mut store = keyspace.lock();
        assert_eq!(run(&mut store, &["BITPOS", "none", "1"]).unwrap(), Reply::Integer(-1));
        assert_eq!(run(&mut store, &["BITPOS", "none", "0"]).unwrap(), Reply::Integer(0));

        run(&mut store, &["SETBIT", "b", "10", "1"]).unwrap();
        assert_eq!(run(&mut store, &["BITPOS", "b", "1"]).unwrap(), Reply::Integer(10));
    }

    #[test]
    fn test_bitop_and_wrong_type() {
        let keyspace = Keyspace::new();
        let mut store = keyspace.lock();
        run(&mut store, &["SETBIT", "a", "0", "1"]).unwrap();
        run(&mut store, &["SETBIT", "b", "1", "1"]).unwrap();

        assert_eq!(run(&mut store, &["BITOP", "OR", "dest", "a", "b"]).unwrap(), Reply::Integer(1));
        assert_eq!(run(&mut store, &["BITCOUNT", "dest"]).unwrap(), Reply::Integer(2));

        assert_eq!(run(&mut store, &["BITOP", "AND", "dest", "x", "y"]).unwrap(), Reply::Integer(0));
        assert!(!store.exists(b"dest"));

        store.set(Bytes::from("s"), Bytes::from("text").into());
        let err = run(&mut store, &["BITOP", "OR", "dest", "a", "s"]).unwrap_err();
        assert!(matches!(err, EngineError::WrongType));
    }

    #[test]
    fn test_bitfield() {
        let keyspace = Keyspace::new();
        let mut store = keyspace.lock();

        assert_eq!(
            run(&mut store, &["BITFIELD", "f", "SET", "u8", "0", "200", "GET", "u8", "0"]).unwrap(),
            Reply::Array(vec![Reply::Integer(0), Reply::Integer(200)])
        );
        assert_eq!(
            run(&mut store, &["BITFIELD", "f", "OVERFLOW", "FAIL", "INCRBY", "u8", "0", "100"]).unwrap(),
            Reply::Array(vec![Reply::Nil])
        );
        assert_eq!(
            run(&mut store, &["BITFIELD", "f", "OVERFLOW", "SAT", "INCRBY", "u8", "0", "100"]).unwrap(),
            Reply::Array(vec![Reply::Integer(255)])
        );

        let read_only = BitCommand::Field {
            key: Bytes::from("g"),
            ops: vec![BitfieldOp::Get {
                ty: FieldType::parse(b"i4").unwrap(),
                offset: 0,
            }],
        };
        assert!(!read_only.is_write());
        assert_eq!(read_only.apply(&mut store).unwrap(), Reply::Array(vec![Reply::Integer(0)]));
        assert!(!store.exists(b"g"));
    }
}
