//! End-to-end command scenarios driven through `Engine::execute`.

use bytes::Bytes;
use emberkv::storage::EvictionKind;
use emberkv::{ConnectionId, Engine, EngineConfig, EngineError, Reply};
use std::time::Duration;

struct Client {
    engine: Engine,
    conn: ConnectionId,
}

impl Client {
    fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    fn with_config(config: EngineConfig) -> Self {
        let engine = Engine::in_memory(config);
        let conn = engine.connect();
        Self { engine, conn }
    }

    fn try_run(&self, line: &str) -> Result<Reply, EngineError> {
        let mut parts = line.split_whitespace();
        let name = parts.next().unwrap();
        let args: Vec<Bytes> = parts.map(|s| Bytes::from(s.to_string())).collect();
        self.engine.execute(self.conn, name, &args)
    }

    fn run(&self, line: &str) -> Reply {
        self.try_run(line)
            .unwrap_or_else(|e| panic!("{line} failed: {e}"))
    }
}

fn bulks(items: &[&str]) -> Reply {
    Reply::Array(items.iter().map(|s| Reply::bulk(s.to_string())).collect())
}

#[test]
fn test_list_push_order() {
    let c = Client::new();
    c.run("LPUSH k a");
    c.run("LPUSH k b");
    assert_eq!(c.run("LRANGE k 0 -1"), bulks(&["b", "a"]));
}

#[test]
fn test_sorted_set_rank_and_range() {
    let c = Client::new();
    assert_eq!(c.run("ZADD z 1 one 2 two"), Reply::Integer(2));
    assert_eq!(c.run("ZRANK z two"), Reply::Integer(1));
    assert_eq!(c.run("ZRANGE z 0 -1"), bulks(&["one", "two"]));
    assert_eq!(
        c.run("ZRANGE z 0 -1 WITHSCORES"),
        bulks(&["one", "1", "two", "2"])
    );
    assert_eq!(c.run("ZREVRANK z two"), Reply::Integer(0));
    assert_eq!(c.run("ZRANK z missing"), Reply::Nil);
}

#[test]
fn test_bits() {
    let c = Client::new();
    c.run("SETBIT s 7 1");
    assert_eq!(c.run("GETBIT s 7"), Reply::Integer(1));
    assert_eq!(c.run("BITCOUNT s"), Reply::Integer(1));
    assert_eq!(c.run("BITPOS s 1"), Reply::Integer(7));
}

#[test]
fn test_bitfield_offset_out_of_range() {
    let c = Client::new();
    assert!(matches!(
        c.try_run("BITFIELD k GET u8 18446744073709551615"),
        Err(EngineError::OutOfRange(_))
    ));
    assert!(c.try_run("BITFIELD k SET i64 4294967295 1").is_err());
    assert_eq!(c.run("EXISTS k"), Reply::Integer(0));
}

#[test]
fn test_zincrby_rejects_infinite_result() {
    let c = Client::new();
    c.run("ZINCRBY z 1.7e308 m");
    assert!(c.try_run("ZINCRBY z 1.7e308 m").is_err());
    let score = c.run("ZSCORE z m");
    let score: f64 = std::str::from_utf8(score.as_bulk().unwrap()).unwrap().parse().unwrap();
    assert_eq!(score, 1.7e308);
}

#[test]
fn test_cardinality_small_sets_are_exact() {
    let c = Client::new();
    assert_eq!(c.run("PFADD p a b c"), Reply::Integer(1));
    assert_eq!(c.run("PFCOUNT p"), Reply::Integer(3));
    assert_eq!(c.run("PFADD p a"), Reply::Integer(0));
}

#[test]
fn test_cardinality_estimate_within_error_bound() {
    let c = Client::new();
    let members: Vec<String> = (0..20_000).map(|i| format!("m{i}")).collect();
    for chunk in members.chunks(500) {
        c.run(&format!("PFADD big {}", chunk.join(" ")));
    }
    let estimate = c.run("PFCOUNT big").as_integer().unwrap() as f64;
    let error = (estimate - 20_000.0).abs() / 20_000.0;
    assert!(error < 0.03, "estimate {estimate} off by {error}");
}

#[test]
fn test_wrong_type_is_surfaced() {
    let c = Client::new();
    c.run("SET k v");
    assert!(matches!(c.try_run("LPUSH k x"), Err(EngineError::WrongType)));
    assert!(matches!(c.try_run("ZADD k 1 m"), Err(EngineError::WrongType)));
    assert_eq!(c.run("TYPE k"), Reply::status("string"));
}

#[test]
fn test_ttl_lifecycle() {
    let c = Client::new();
    c.run("SET k v");
    assert_eq!(c.run("TTL k"), Reply::Integer(-1));
    assert_eq!(c.run("TTL missing"), Reply::Integer(-2));

    assert_eq!(c.run("EXPIRE k 100"), Reply::Integer(1));
    let ttl = c.run("TTL k").as_integer().unwrap();
    assert!((99..=100).contains(&ttl));

    assert_eq!(c.run("PERSIST k"), Reply::Integer(1));
    assert_eq!(c.run("TTL k"), Reply::Integer(-1));

    c.run("SET short v PX 30");
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(c.run("GET short"), Reply::Nil);
    assert_eq!(c.run("EXISTS short"), Reply::Integer(0));
}

#[test]
fn test_hash_keeps_insertion_order() {
    let c = Client::new();
    c.run("HSET h z 1 a 2 m 3");
    assert_eq!(c.run("HKEYS h"), bulks(&["z", "a", "m"]));
    assert_eq!(c.run("HGETALL h"), bulks(&["z", "1", "a", "2", "m", "3"]));
    assert_eq!(c.run("HINCRBY h a 5"), Reply::Integer(7));
}

#[test]
fn test_stream_consumer_group_flow() {
    let c = Client::new();
    assert_eq!(c.run("XADD s 1-1 f v"), Reply::bulk("1-1"));
    assert_eq!(c.run("XADD s 1-2 f w"), Reply::bulk("1-2"));
    assert!(c.try_run("XADD s 1-2 f x").is_err());
    assert_eq!(c.run("XGROUP CREATE s g 0"), Reply::Ok);

    let read = c.run("XREADGROUP GROUP g alice COUNT 1 STREAMS s >");
    assert_eq!(
        read,
        Reply::Array(vec![Reply::Array(vec![
            Reply::bulk("s"),
            Reply::Array(vec![Reply::Array(vec![
                Reply::bulk("1-1"),
                bulks(&["f", "v"]),
            ])]),
        ])])
    );

    assert_eq!(
        c.run("XPENDING s g"),
        Reply::Array(vec![
            Reply::Integer(1),
            Reply::bulk("1-1"),
            Reply::bulk("1-1"),
            Reply::Array(vec![bulks(&["alice", "1"])]),
        ])
    );
    assert_eq!(c.run("XACK s g 1-1"), Reply::Integer(1));
    assert_eq!(
        c.run("XPENDING s g"),
        Reply::Array(vec![Reply::Integer(0), Reply::Nil, Reply::Nil, Reply::Nil])
    );
}

#[test]
fn test_lfu_eviction_keeps_hot_keys() {
    let mut config = EngineConfig::default();
    config.eviction.max_memory = 4_096;
    config.eviction.policy = EvictionKind::Lfu;
    let c = Client::with_config(config);

    c.run("SET hot v");
    for _ in 0..50 {
        c.run("GET hot");
    }
    let value = "x".repeat(200);
    for i in 0..100 {
        c.run(&format!("SET cold:{i} {value}"));
    }

    assert_eq!(c.run("GET hot"), Reply::bulk("v"));
    assert!(c.engine.stats().evicted > 0);
    let info = c.engine.memory_info();
    assert!(info.used_memory <= info.max_memory);
}
