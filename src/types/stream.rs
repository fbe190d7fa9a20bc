//! Streams with consumer groups.
//!
//! A stream is an append-only log of entries keyed by [`StreamId`]
//! (`<ms>-<seq>`), each carrying an ordered list of field/value pairs.
//! Consumer groups track a last-delivered ID and a pending entries list
//! (PEL) of deliveries that have not been acknowledged yet.
//!
//! ```text
//! entries:  1-0 ─ 1-1 ─ 5-0 ─ 7-0 ─ 7-1        last_id = 7-1
//!                         ▲
//! group "g": last_delivered = 5-0
//!            pending = { 1-1 → alice, 5-0 → bob }
//! ```

use crate::error::{EngineError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// An entry ID: milliseconds plus a sequence number within that millisecond.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const MIN: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    fn invalid() -> EngineError {
        EngineError::MalformedArgument(
            "Invalid stream ID specified as stream command argument".to_string(),
        )
    }

    fn parse_parts(raw: &[u8], default_seq: u64) -> Result<Self> {
        let text = std::str::from_utf8(raw).map_err(|_| Self::invalid())?;
        let (ms, seq) = match text.split_once('-') {
            Some((ms, seq)) => (
                ms.parse::<u64>().map_err(|_| Self::invalid())?,
                seq.parse::<u64>().map_err(|_| Self::invalid())?,
            ),
            None => (text.parse::<u64>().map_err(|_| Self::invalid())?, default_seq),
        };
        Ok(Self { ms, seq })
    }

    /// Parses `ms-seq` or a bare `ms` (sequence 0).
    pub fn parse(raw: &[u8]) -> Result<Self> {
        Self::parse_parts(raw, 0)
    }

    /// Range start: `-` is the minimum, a bare `ms` means `ms-0`.
    pub fn parse_range_start(raw: &[u8]) -> Result<Self> {
        if raw == b"-" {
            return Ok(Self::MIN);
        }
        Self::parse_parts(raw, 0)
    }

    /// Range end: `+` is the maximum, a bare `ms` means `ms-<max seq>`.
    pub fn parse_range_end(raw: &[u8]) -> Result<Self> {
        if raw == b"+" {
            return Ok(Self::MAX);
        }
        Self::parse_parts(raw, u64::MAX)
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// The ID argument of XADD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdSpec {
    /// `*`: generate from the clock.
    Auto,
    /// `<ms>-*`: fixed milliseconds, generated sequence.
    AutoSeq(u64),
    /// A fully specified ID.
    Explicit(StreamId),
}

impl IdSpec {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw == b"*" {
            return Ok(IdSpec::Auto);
        }
        if let Some(ms) = raw.strip_suffix(b"-*") {
            let ms = std::str::from_utf8(ms)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(StreamId::invalid)?;
            return Ok(IdSpec::AutoSeq(ms));
        }
        StreamId::parse(raw).map(IdSpec::Explicit)
    }
}

/// Where XREADGROUP starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadStart {
    /// `>`: entries never delivered to this group.
    New,
    /// An explicit ID: this consumer's pending entries after it.
    Pending(StreamId),
}

impl ReadStart {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw == b">" {
            Ok(ReadStart::New)
        } else {
            StreamId::parse(raw).map(ReadStart::Pending)
        }
    }
}

pub type Fields = Vec<(Bytes, Bytes)>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub consumer: Bytes,
    pub delivered_at_ms: u64,
    pub delivery_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Consumer {
    pub seen_at_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumerGroup {
    pub last_delivered: StreamId,
    pub pending: BTreeMap<StreamId, PendingEntry>,
    pub consumers: BTreeMap<Bytes, Consumer>,
}

/// Summary form of XPENDING.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSummary {
    pub count: usize,
    pub min: Option<StreamId>,
    pub max: Option<StreamId>,
    pub per_consumer: Vec<(Bytes, usize)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StreamParts", into = "StreamParts")]
pub struct Stream {
    entries: BTreeMap<StreamId, Fields>,
    last_id: StreamId,
    entries_added: u64,
    groups: BTreeMap<Bytes, ConsumerGroup>,
    footprint: usize,
}

/// Serialized form of a [`Stream`]; the size estimate is rebuilt on load.
#[derive(Serialize, Deserialize)]
struct StreamParts {
    entries: BTreeMap<StreamId, Fields>,
    last_id: StreamId,
    entries_added: u64,
    groups: BTreeMap<Bytes, ConsumerGroup>,
}

const PENDING_OVERHEAD: usize = 64;

fn entry_size(fields: &Fields) -> usize {
    16 + fields
        .iter()
        .map(|(f, v)| f.len() + v.len() + 32)
        .sum::<usize>()
}

fn group_size(name: &[u8], group: &ConsumerGroup) -> usize {
    name.len() + 64 + group.pending.len() * PENDING_OVERHEAD
}

impl From<StreamParts> for Stream {
    fn from(parts: StreamParts) -> Self {
        let footprint = parts.entries.values().map(entry_size).sum::<usize>()
            + parts
                .groups
                .iter()
                .map(|(name, g)| group_size(name, g))
                .sum::<usize>();
        Self {
            entries: parts.entries,
            last_id: parts.last_id,
            entries_added: parts.entries_added,
            groups: parts.groups,
            footprint,
        }
    }
}

impl From<Stream> for StreamParts {
    fn from(stream: Stream) -> Self {
        Self {
            entries: stream.entries,
            last_id: stream.last_id,
            entries_added: stream.entries_added,
            groups: stream.groups,
        }
    }
}

fn no_group(name: &[u8]) -> EngineError {
    EngineError::MalformedArgument(format!(
        "NOGROUP No such consumer group '{}' for key name",
        String::from_utf8_lossy(name)
    ))
}

impl Stream {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_id(&self) -> StreamId {
        self.last_id
    }

    /// Resolves an XADD ID argument against the current top ID.
    pub fn next_id(&self, spec: IdSpec, now_ms: u64) -> Result<StreamId> {
        let last = self.last_id;
        let too_small = || {
            EngineError::OutOfRange(
                "The ID specified in XADD is equal or smaller than the target stream top item"
                    .to_string(),
            )
        };
        let exhausted = || {
            EngineError::OutOfRange("The stream has exhausted the last possible ID".to_string())
        };

        let id = match spec {
            IdSpec::Auto => {
                if now_ms > last.ms {
                    StreamId::new(now_ms, 0)
                } else {
                    let seq = last.seq.checked_add(1).ok_or_else(exhausted)?;
                    StreamId::new(last.ms, seq)
                }
            }
            IdSpec::AutoSeq(ms) => {
                if ms < last.ms {
                    return Err(too_small());
                }
                if ms == last.ms && self.entries_added > 0 {
                    let seq = last.seq.checked_add(1).ok_or_else(exhausted)?;
                    StreamId::new(ms, seq)
                } else if ms == 0 {
                    StreamId::new(0, 1)
                } else {
                    StreamId::new(ms, 0)
                }
            }
            IdSpec::Explicit(id) => {
                if id == StreamId::MIN {
                    return Err(EngineError::OutOfRange(
                        "The ID specified in XADD must be greater than 0-0".to_string(),
                    ));
                }
                if id <= last {
                    return Err(too_small());
                }
                id
            }
        };

        if id <= last {
            return Err(too_small());
        }
        Ok(id)
    }

    /// Appends an entry. The caller has validated `id` via [`Stream::next_id`].
    pub fn append(&mut self, id: StreamId, fields: Fields) {
        self.footprint += entry_size(&fields);
        if let Some(old) = self.entries.insert(id, fields) {
            self.footprint -= entry_size(&old);
        }
        self.last_id = id;
        self.entries_added += 1;
    }

    /// Entries with `start <= id <= end`, newest first when `reverse`.
    pub fn range(
        &self,
        start: StreamId,
        end: StreamId,
        count: Option<usize>,
        reverse: bool,
    ) -> Vec<(StreamId, Fields)> {
        if start > end {
            return Vec::new();
        }
        let count = count.unwrap_or(usize::MAX);
        let iter = self.entries.range(start..=end);
        let cloned = |(id, fields): (&StreamId, &Fields)| (*id, fields.clone());

        if reverse {
            iter.rev().take(count).map(cloned).collect()
        } else {
            iter.take(count).map(cloned).collect()
        }
    }

    pub fn delete(&mut self, ids: &[StreamId]) -> usize {
        let mut removed = 0;
        for id in ids {
            if let Some(fields) = self.entries.remove(id) {
                self.footprint -= entry_size(&fields);
                removed += 1;
            }
        }
        removed
    }

    /// Drops the oldest entries until at most `max_len` remain.
    pub fn trim_to(&mut self, max_len: usize) -> usize {
        let mut removed = 0;
        while self.entries.len() > max_len {
            let Some((_, fields)) = self.entries.pop_first() else {
                break;
            };
            self.footprint -= entry_size(&fields);
            removed += 1;
        }
        removed
    }

    /// XGROUP CREATE. `start = None` means `$` (the current top ID).
    pub fn create_group(&mut self, name: Bytes, start: Option<StreamId>) -> Result<()> {
        if self.groups.contains_key(&name) {
            return Err(EngineError::MalformedArgument(
                "BUSYGROUP Consumer Group name already exists".to_string(),
            ));
        }
        let group = ConsumerGroup {
            last_delivered: start.unwrap_or(self.last_id),
            ..Default::default()
        };
        self.footprint += group_size(&name, &group);
        self.groups.insert(name, group);
        Ok(())
    }

    pub fn destroy_group(&mut self, name: &[u8]) -> bool {
        match self.groups.remove(name) {
            Some(group) => {
                self.footprint -= group_size(name, &group);
                true
            }
            None => false,
        }
    }

    /// XGROUP DELCONSUMER, returning how many pending entries it owned.
    pub fn delete_consumer(&mut self, group: &[u8], consumer: &[u8]) -> Result<usize> {
        let group_state = self.groups.get_mut(group).ok_or_else(|| no_group(group))?;
        let before = group_state.pending.len();
        group_state.pending.retain(|_, p| p.consumer != consumer);
        group_state.consumers.remove(consumer);
        let dropped = before - group_state.pending.len();
        self.footprint -= dropped * PENDING_OVERHEAD;
        Ok(dropped)
    }

    pub fn group(&self, name: &[u8]) -> Option<&ConsumerGroup> {
        self.groups.get(name)
    }

    /// XREADGROUP for one stream.
    ///
    /// Entries that were deleted while still pending come back with `None`
    /// fields when reading history.
    pub fn read_group(
        &mut self,
        group: &[u8],
        consumer: &Bytes,
        start: ReadStart,
        count: Option<usize>,
        now_ms: u64,
    ) -> Result<Vec<(StreamId, Option<Fields>)>> {
        let entries = &self.entries;
        let state = self.groups.get_mut(group).ok_or_else(|| no_group(group))?;
        state
            .consumers
            .entry(consumer.clone())
            .or_default()
            .seen_at_ms = now_ms;
        let count = count.unwrap_or(usize::MAX);

        match start {
            ReadStart::New => {
                let lower = std::ops::Bound::Excluded(state.last_delivered);
                let delivered: Vec<(StreamId, Fields)> = entries
                    .range((lower, std::ops::Bound::Unbounded))
                    .take(count)
                    .map(|(id, f)| (*id, f.clone()))
                    .collect();

                for (id, _) in &delivered {
                    let previous = state.pending.insert(
                        *id,
                        PendingEntry {
                            consumer: consumer.clone(),
                            delivered_at_ms: now_ms,
                            delivery_count: 1,
                        },
                    );
                    if previous.is_none() {
                        self.footprint += PENDING_OVERHEAD;
                    }
                    state.last_delivered = *id;
                }

                Ok(delivered
                    .into_iter()
                    .map(|(id, f)| (id, Some(f)))
                    .collect())
            }
            ReadStart::Pending(after) => Ok(state
                .pending
                .range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
                .filter(|(_, p)| p.consumer == *consumer)
                .take(count)
                .map(|(id, _)| (*id, entries.get(id).cloned()))
                .collect()),
        }
    }

    /// XACK: removes IDs from the group's PEL.
    pub fn ack(&mut self, group: &[u8], ids: &[StreamId]) -> Result<usize> {
        let state = self.groups.get_mut(group).ok_or_else(|| no_group(group))?;
        let acked = ids
            .iter()
            .filter(|id| state.pending.remove(*id).is_some())
            .count();
        self.footprint -= acked * PENDING_OVERHEAD;
        Ok(acked)
    }

    pub fn pending_summary(&self, group: &[u8]) -> Result<PendingSummary> {
        let state = self.groups.get(group).ok_or_else(|| no_group(group))?;
        let mut per_consumer: BTreeMap<&Bytes, usize> = BTreeMap::new();
        for entry in state.pending.values() {
            *per_consumer.entry(&entry.consumer).or_default() += 1;
        }

        Ok(PendingSummary {
            count: state.pending.len(),
            min: state.pending.keys().next().copied(),
            max: state.pending.keys().next_back().copied(),
            per_consumer: per_consumer
                .into_iter()
                .map(|(c, n)| (c.clone(), n))
                .collect(),
        })
    }

    pub(crate) fn approx_size(&self) -> usize {
        self.footprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs.iter().map(|(f, v)| (b(f), b(v))).collect()
    }

    #[test]
    fn test_id_parsing() {
        assert_eq!(StreamId::parse(b"5-3").unwrap(), StreamId::new(5, 3));
        assert_eq!(StreamId::parse(b"5").unwrap(), StreamId::new(5, 0));
        assert_eq!(StreamId::parse_range_end(b"5").unwrap(), StreamId::new(5, u64::MAX));
        assert_eq!(StreamId::parse_range_start(b"-").unwrap(), StreamId::MIN);
        assert!(StreamId::parse(b"x-1").is_err());
        assert_eq!(IdSpec::parse(b"*").unwrap(), IdSpec::Auto);
        assert_eq!(IdSpec::parse(b"7-*").unwrap(), IdSpec::AutoSeq(7));
        assert_eq!(StreamId::new(1, 2).to_string(), "1-2");
    }

    #[test]
    fn test_auto_ids_are_monotonic() {
        let mut s = Stream::default();
        let a = s.next_id(IdSpec::Auto, 1000).unwrap();
        s.append(a, fields(&[("f", "v")]));
        // Clock went backwards: sequence bumps instead.
        let b_ = s.next_id(IdSpec::Auto, 900).unwrap();
        assert_eq!(b_, StreamId::new(1000, 1));
        s.append(b_, fields(&[("f", "v")]));

        assert!(s.next_id(IdSpec::Explicit(StreamId::new(1000, 1)), 0).is_err());
        assert!(s.next_id(IdSpec::Explicit(StreamId::MIN), 0).is_err());
        assert_eq!(s.next_id(IdSpec::AutoSeq(1000), 0).unwrap(), StreamId::new(1000, 2));
        assert!(s.next_id(IdSpec::AutoSeq(999), 0).is_err());
    }

    #[test]
    fn test_range_and_trim() {
        let mut s = Stream::default();
        for ms in 1..=5 {
            s.append(StreamId::new(ms, 0), fields(&[("n", &ms.to_string())]));
        }

        let ids: Vec<StreamId> = s
            .range(StreamId::new(2, 0), StreamId::MAX, Some(2), false)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec![StreamId::new(2, 0), StreamId::new(3, 0)]);

        let rev: Vec<StreamId> = s
            .range(StreamId::MIN, StreamId::MAX, Some(1), true)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(rev, vec![StreamId::new(5, 0)]);

        assert_eq!(s.trim_to(2), 3);
        assert_eq!(s.len(), 2);
        assert_eq!(s.delete(&[StreamId::new(5, 0), StreamId::new(9, 9)]), 1);
        assert_eq!(s.last_id(), StreamId::new(5, 0));
    }

    #[test]
    fn test_consumer_group_flow() {
        let mut s = Stream::default();
        for ms in 1..=3 {
            s.append(StreamId::new(ms, 0), fields(&[("k", "v")]));
        }
        s.create_group(b("g"), Some(StreamId::MIN)).unwrap();
        assert!(s.create_group(b("g"), None).is_err());

        let alice = b("alice");
        let got = s.read_group(b"g", &alice, ReadStart::New, Some(2), 50).unwrap();
        assert_eq!(got.len(), 2);

        let bob = b("bob");
        let got = s.read_group(b"g", &bob, ReadStart::New, None, 60).unwrap();
        assert_eq!(got[0].0, StreamId::new(3, 0));
        assert!(s.read_group(b"g", &bob, ReadStart::New, None, 61).unwrap().is_empty());

        let summary = s.pending_summary(b"g").unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.min, Some(StreamId::new(1, 0)));
        assert_eq!(summary.per_consumer, vec![(b("alice"), 2), (b("bob"), 1)]);

        assert_eq!(s.ack(b"g", &[StreamId::new(1, 0), StreamId::new(1, 0)]).unwrap(), 1);

        s.delete(&[StreamId::new(2, 0)]);
        let history = s
            .read_group(b"g", &alice, ReadStart::Pending(StreamId::MIN), None, 70)
            .unwrap();
        assert_eq!(history, vec![(StreamId::new(2, 0), None)]);

        assert_eq!(s.delete_consumer(b"g", b"bob").unwrap(), 1);
        assert!(s.read_group(b"nope", &alice, ReadStart::New, None, 0).is_err());
        assert!(s.destroy_group(b"g"));
    }

    #[test]
    fn test_size_estimate_follows_mutations() {
        let rebuilt = |s: &Stream| {
            let bytes = bincode::serialize(s).unwrap();
            bincode::deserialize::<Stream>(&bytes).unwrap().approx_size()
        };

        let mut s = Stream::default();
        for ms in 1..=6 {
            s.append(StreamId::new(ms, 0), fields(&[("field", &"v".repeat(ms as usize))]));
        }
        s.create_group(b("workers"), Some(StreamId::MIN)).unwrap();
        s.create_group(b("audit"), None).unwrap();
        s.read_group(b"workers", &b("w1"), ReadStart::New, Some(4), 10).unwrap();
        assert_eq!(s.approx_size(), rebuilt(&s));

        s.ack(b"workers", &[StreamId::new(1, 0)]).unwrap();
        s.delete(&[StreamId::new(6, 0)]);
        s.trim_to(3);
        assert_eq!(s.approx_size(), rebuilt(&s));

        s.delete_consumer(b"workers", b"w1").unwrap();
        s.destroy_group(b"audit");
        assert_eq!(s.approx_size(), rebuilt(&s));
    }
}
