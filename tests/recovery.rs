//! Durability: reopening an engine reproduces the state it had.

use bytes::Bytes;
use emberkv::persistence::FsyncMode;
use emberkv::{Engine, EngineConfig, PersistenceConfig, Reply};
use std::fs::OpenOptions;
use std::io::Write;
use tempfile::TempDir;

fn config(dir: &TempDir) -> EngineConfig {
    EngineConfig {
        persistence: PersistenceConfig {
            fsync: FsyncMode::Always,
            snapshot_interval_secs: 0,
            snapshot_after_writes: 0,
            ..PersistenceConfig::in_dir(dir.path())
        },
        ..EngineConfig::default()
    }
}

fn run(engine: &Engine, lines: &[&str]) -> Vec<Reply> {
    let conn = engine.connect();
    lines
        .iter()
        .map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next().unwrap();
            let args: Vec<Bytes> = parts.map(|s| Bytes::from(s.to_string())).collect();
            engine
                .execute(conn, name, &args)
                .unwrap_or_else(|e| panic!("{line} failed: {e}"))
        })
        .collect()
}

const SCRIPT: &[&str] = &[
    "SET counter 1",
    "INCRBY counter 41",
    "RPUSH queue a b c",
    "LPOP queue",
    "SADD tags x y z w",
    "SPOP tags 2",
    "HSET user name ann age 31",
    "ZADD board 10 alice 20 bob 15 carol",
    "ZINCRBY board 30 alice",
    "XADD events * kind login",
    "XADD events * kind logout",
    "XGROUP CREATE events workers 0",
    "XREADGROUP GROUP workers w1 COUNT 1 STREAMS events >",
    "SETBIT flags 3 1",
    "BITFIELD counters SET u8 0 200 INCRBY u8 0 100",
    "PFADD visitors a b c d",
    "SET session token EX 3600",
    "DEL counter",
    "SET counter 7",
];

#[test]
fn test_replay_reproduces_direct_application() {
    let dir = TempDir::new().unwrap();

    let expected = {
        let engine = Engine::open(config(&dir)).unwrap();
        run(&engine, SCRIPT);
        engine.keyspace().export()
    };

    let engine = Engine::open(config(&dir)).unwrap();
    assert_eq!(engine.keyspace().export(), expected);
    // Every line of the script is a write, so each one is a record.
    assert_eq!(engine.recovery().unwrap().replayed_records, SCRIPT.len());
}

#[test]
fn test_snapshot_then_log_tail() {
    let dir = TempDir::new().unwrap();
    let (head, tail) = SCRIPT.split_at(9);

    let expected = {
        let engine = Engine::open(config(&dir)).unwrap();
        run(&engine, head);
        let info = engine.snapshot().unwrap().unwrap();
        assert_eq!(info.wal_records, 0);
        run(&engine, tail);
        engine.keyspace().export()
    };

    let engine = Engine::open(config(&dir)).unwrap();
    let report = engine.recovery().unwrap();
    assert!(report.snapshot_keys > 0);
    assert_eq!(report.replayed_records, tail.len());
    assert_eq!(engine.keyspace().export(), expected);
}

#[test]
fn test_transaction_is_one_record() {
    let dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config(&dir)).unwrap();
        run(
            &engine,
            &["MULTI", "SET a 1", "SET b 2", "INCR a", "EXEC", "GET a"],
        );
    }

    let engine = Engine::open(config(&dir)).unwrap();
    assert_eq!(engine.recovery().unwrap().replayed_records, 1);
    assert_eq!(run(&engine, &["GET a"]), vec![Reply::bulk("2")]);
}

#[test]
fn test_torn_tail_is_dropped() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir);
    {
        let engine = Engine::open(cfg.clone()).unwrap();
        run(&engine, &["SET a 1", "SET b 2"]);
    }

    // A crash in the middle of an append leaves a partial frame behind.
    let mut wal = OpenOptions::new()
        .append(true)
        .open(cfg.persistence.wal_path())
        .unwrap();
    wal.write_all(&[0x40, 0, 0, 0, 0xde, 0xad]).unwrap();
    drop(wal);

    {
        let engine = Engine::open(cfg.clone()).unwrap();
        let report = engine.recovery().unwrap();
        assert!(report.torn_tail);
        assert_eq!(report.replayed_records, 2);
        run(&engine, &["SET c 3"]);
    }

    // The torn bytes were cut off, so the new record is readable.
    let engine = Engine::open(cfg).unwrap();
    let report = engine.recovery().unwrap();
    assert!(!report.torn_tail);
    assert_eq!(run(&engine, &["DBSIZE"]), vec![Reply::Integer(3)]);
}

#[test]
fn test_corrupt_snapshot_falls_back_to_empty() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir);
    {
        let engine = Engine::open(cfg.clone()).unwrap();
        run(&engine, &["SET a 1"]);
        engine.snapshot().unwrap();
    }
    std::fs::write(cfg.persistence.snapshot_path(), b"EMBRSNP1 not a snapshot").unwrap();

    let engine = Engine::open(cfg).unwrap();
    assert!(engine.recovery().unwrap().snapshot_corrupt);
    assert_eq!(run(&engine, &["DBSIZE"]), vec![Reply::Integer(0)]);
}

#[test]
fn test_shutdown_writes_final_snapshot() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir);
    {
        let engine = Engine::open(cfg.clone()).unwrap();
        run(&engine, &["SET a 1", "LPUSH l x"]);
        engine.shutdown().unwrap();
    }

    let engine = Engine::open(cfg).unwrap();
    let report = engine.recovery().unwrap();
    assert_eq!(report.snapshot_keys, 2);
    assert_eq!(report.replayed_records, 0);
}
