//! Sorted sets.
//!
//! A sorted set pairs a `member -> score` dictionary (O(1) score lookup) with
//! a [`SkipList`] ordered by `(score, member)` (O(log n) rank and range
//! queries). Every mutation goes through this type so the two structures
//! never disagree.

pub mod skiplist;

pub use skiplist::{SkipList, SKIPLIST_MAX_LEVEL, SKIPLIST_P};

use super::normalize_range;
use crate::error::{EngineError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One end of a score interval, as written in `ZRANGEBYSCORE`-style
/// arguments: `1.5`, `(1.5` (exclusive), `-inf`, `+inf`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBound {
    pub value: f64,
    pub exclusive: bool,
}

impl ScoreBound {
    pub fn inclusive(value: f64) -> Self {
        Self {
            value,
            exclusive: false,
        }
    }

    pub fn parse(raw: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| EngineError::MalformedArgument("min or max is not a float".into()))?;
        let (exclusive, number) = match text.strip_prefix('(') {
            Some(rest) => (true, rest),
            None => (false, text),
        };

        let value = match number.to_ascii_lowercase().as_str() {
            "-inf" => f64::NEG_INFINITY,
            "+inf" | "inf" => f64::INFINITY,
            other => other
                .parse::<f64>()
                .ok()
                .filter(|v| !v.is_nan())
                .ok_or_else(|| EngineError::MalformedArgument("min or max is not a float".into()))?,
        };

        Ok(Self { value, exclusive })
    }

    /// Whether `score` lies at or above this bound used as a minimum.
    pub fn admits_from_below(&self, score: f64) -> bool {
        if self.exclusive {
            score > self.value
        } else {
            score >= self.value
        }
    }

    /// Whether `score` lies at or below this bound used as a maximum.
    pub fn admits_from_above(&self, score: f64) -> bool {
        if self.exclusive {
            score < self.value
        } else {
            score <= self.value
        }
    }
}

/// ZADD modifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOptions {
    pub nx: bool,
    pub xx: bool,
    pub gt: bool,
    pub lt: bool,
    pub ch: bool,
    pub incr: bool,
}

/// What a single ZADD element did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AddOutcome {
    Added(f64),
    Updated(f64),
    Unchanged(f64),
    Skipped,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<(Bytes, f64)>", into = "Vec<(Bytes, f64)>")]
pub struct SortedSet {
    scores: HashMap<Bytes, f64>,
    list: SkipList,
    footprint: usize,
}

/// Each member is held twice (dictionary and skip list) plus node overhead.
fn member_size(member: &[u8]) -> usize {
    2 * member.len() + 96
}

impl SortedSet {
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    fn insert_new(&mut self, member: Bytes, score: f64) {
        self.footprint += member_size(&member);
        self.list.insert(score, member.clone());
        self.scores.insert(member, score);
    }

    fn rescore(&mut self, member: &Bytes, old: f64, new: f64) {
        self.list.delete(old, member);
        self.list.insert(new, member.clone());
        self.scores.insert(member.clone(), new);
    }

    /// Adds or updates one member under the ZADD modifiers.
    pub fn add(&mut self, member: Bytes, score: f64, opts: &AddOptions) -> Result<AddOutcome> {
        match self.score(&member) {
            None => {
                if opts.xx {
                    return Ok(AddOutcome::Skipped);
                }
                self.insert_new(member, score);
                Ok(AddOutcome::Added(score))
            }
            Some(old) => {
                if opts.nx {
                    return Ok(AddOutcome::Skipped);
                }
                let new = if opts.incr { old + score } else { score };
                if !new.is_finite() {
                    return Err(EngineError::MalformedArgument(
                        "increment would produce NaN or Infinity".to_string(),
                    ));
                }
                if (opts.gt && new <= old) || (opts.lt && new >= old) {
                    return Ok(AddOutcome::Skipped);
                }
                if new == old {
                    return Ok(AddOutcome::Unchanged(new));
                }
                self.rescore(&member, old, new);
                Ok(AddOutcome::Updated(new))
            }
        }
    }

    /// ZINCRBY: adds `delta` to the member's score, creating it at `delta`.
    pub fn incr(&mut self, member: Bytes, delta: f64) -> Result<f64> {
        let opts = AddOptions {
            incr: true,
            ..Default::default()
        };
        match self.add(member, delta, &opts)? {
            AddOutcome::Added(s) | AddOutcome::Updated(s) | AddOutcome::Unchanged(s) => Ok(s),
            AddOutcome::Skipped => Err(EngineError::syntax()),
        }
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.list.delete(score, member);
                self.footprint -= member_size(member);
                true
            }
            None => false,
        }
    }

    /// 0-based rank, counted from the highest score when `reverse`.
    pub fn rank(&self, member: &[u8], reverse: bool) -> Option<usize> {
        let score = self.score(member)?;
        let rank = self.list.rank(score, member)?;
        Some(if reverse { self.len() - 1 - rank } else { rank })
    }

    /// ZRANGE / ZREVRANGE by index.
    pub fn range_by_rank(&self, start: i64, stop: i64, reverse: bool) -> Vec<(Bytes, f64)> {
        let Some((s, e)) = normalize_range(start, stop, self.len()) else {
            return Vec::new();
        };

        if reverse {
            let last = self.len() - 1;
            let mut out = self.list.range_by_rank(last - e, last - s);
            out.reverse();
            out
        } else {
            self.list.range_by_rank(s, e)
        }
    }

    /// ZRANGEBYSCORE / ZREVRANGEBYSCORE with optional `LIMIT offset count`.
    pub fn range_by_score(
        &self,
        min: &ScoreBound,
        max: &ScoreBound,
        reverse: bool,
        limit: Option<(usize, Option<usize>)>,
    ) -> Vec<(Bytes, f64)> {
        let scan = self
            .list
            .scan_scores(|s| min.admits_from_below(s), |s| max.admits_from_above(s))
            .map(|(m, s)| (m.clone(), s));

        let (offset, count) = limit.unwrap_or((0, None));
        let count = count.unwrap_or(usize::MAX);

        if reverse {
            let mut all: Vec<(Bytes, f64)> = scan.collect();
            all.reverse();
            all.into_iter().skip(offset).take(count).collect()
        } else {
            scan.skip(offset).take(count).collect()
        }
    }

    pub fn count(&self, min: &ScoreBound, max: &ScoreBound) -> usize {
        self.list
            .scan_scores(|s| min.admits_from_below(s), |s| max.admits_from_above(s))
            .count()
    }

    /// ZPOPMIN / ZPOPMAX.
    pub fn pop(&mut self, count: usize, highest: bool) -> Vec<(Bytes, f64)> {
        let count = count.min(self.len());
        let victims = if count == 0 {
            Vec::new()
        } else if highest {
            self.range_by_rank(0, count as i64 - 1, true)
        } else {
            self.range_by_rank(0, count as i64 - 1, false)
        };
        for (member, _) in &victims {
            self.remove(member);
        }
        victims
    }

    pub fn remove_range_by_rank(&mut self, start: i64, stop: i64) -> usize {
        let victims = self.range_by_rank(start, stop, false);
        for (member, _) in &victims {
            self.remove(member);
        }
        victims.len()
    }

    pub fn remove_range_by_score(&mut self, min: &ScoreBound, max: &ScoreBound) -> usize {
        let victims = self.range_by_score(min, max, false, None);
        for (member, _) in &victims {
            self.remove(member);
        }
        victims.len()
    }

    /// Members in `(score, member)` order.
    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, f64)> {
        self.list.iter()
    }

    pub(crate) fn approx_size(&self) -> usize {
        self.footprint
    }
}

impl PartialEq for SortedSet {
    fn eq(&self, other: &Self) -> bool {
        self.scores == other.scores
    }
}

impl From<Vec<(Bytes, f64)>> for SortedSet {
    fn from(pairs: Vec<(Bytes, f64)>) -> Self {
        let mut zset = SortedSet::default();
        for (member, score) in pairs {
            if !zset.scores.contains_key(&member) {
                zset.insert_new(member, score);
            }
        }
        zset
    }
}

impl From<SortedSet> for Vec<(Bytes, f64)> {
    fn from(zset: SortedSet) -> Self {
        zset.iter().map(|(m, s)| (m.clone(), s)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    fn members(pairs: Vec<(Bytes, f64)>) -> Vec<Bytes> {
        pairs.into_iter().map(|(m, _)| m).collect()
    }

    fn sample() -> SortedSet {
        let mut z = SortedSet::default();
        let opts = AddOptions::default();
        for (score, m) in [(1.0, "one"), (2.0, "two"), (3.0, "three"), (4.0, "four")] {
            z.add(b(m), score, &opts).unwrap();
        }
        z
    }

    #[test]
    fn test_zadd_zrank_scenario() {
        let mut z = SortedSet::default();
        let opts = AddOptions::default();
        z.add(b("one"), 1.0, &opts).unwrap();
        z.add(b("two"), 2.0, &opts).unwrap();

        assert_eq!(z.rank(b"two", false), Some(1));
        assert_eq!(members(z.range_by_rank(0, -1, false)), vec![b("one"), b("two")]);
    }

    #[test]
    fn test_update_moves_member() {
        let mut z = sample();
        let opts = AddOptions::default();
        assert_eq!(z.add(b("one"), 10.0, &opts).unwrap(), AddOutcome::Updated(10.0));
        assert_eq!(z.rank(b"one", false), Some(3));
        assert_eq!(z.rank(b"one", true), Some(0));
        assert_eq!(z.add(b("one"), 10.0, &opts).unwrap(), AddOutcome::Unchanged(10.0));
    }

    #[test]
    fn test_add_modifiers() {
        let mut z = sample();
        let nx = AddOptions { nx: true, ..Default::default() };
        assert_eq!(z.add(b("one"), 9.0, &nx).unwrap(), AddOutcome::Skipped);

        let xx = AddOptions { xx: true, ..Default::default() };
        assert_eq!(z.add(b("new"), 9.0, &xx).unwrap(), AddOutcome::Skipped);

        let gt = AddOptions { gt: true, ..Default::default() };
        assert_eq!(z.add(b("two"), 1.0, &gt).unwrap(), AddOutcome::Skipped);
        assert_eq!(z.add(b("two"), 5.0, &gt).unwrap(), AddOutcome::Updated(5.0));

        assert_eq!(z.incr(b("three"), 0.5).unwrap(), 3.5);
        assert_eq!(z.incr(b("fresh"), 2.0).unwrap(), 2.0);
    }

    #[test]
    fn test_incr_rejects_non_finite_result() {
        let mut z = SortedSet::default();
        z.incr(b("m"), f64::MAX).unwrap();
        assert!(matches!(
            z.incr(b("m"), f64::MAX),
            Err(EngineError::MalformedArgument(_))
        ));
        assert_eq!(z.score(b"m"), Some(f64::MAX));

        let incr = AddOptions { incr: true, ..Default::default() };
        z.add(b("n"), -f64::MAX, &AddOptions::default()).unwrap();
        assert!(z.add(b("n"), -f64::MAX, &incr).is_err());
        assert_eq!(z.score(b"n"), Some(-f64::MAX));
    }

    #[test]
    fn test_size_estimate_follows_mutations() {
        let rebuilt = |z: &SortedSet| {
            let pairs: Vec<(Bytes, f64)> = z.iter().map(|(m, s)| (m.clone(), s)).collect();
            SortedSet::from(pairs).approx_size()
        };

        let mut z = sample();
        z.add(b("one"), 7.0, &AddOptions::default()).unwrap();
        z.incr(b("a-rather-long-member-name"), 1.5).unwrap();
        assert_eq!(z.approx_size(), rebuilt(&z));

        z.pop(1, true);
        z.remove(b"two");
        z.remove_range_by_rank(0, 0);
        assert_eq!(z.approx_size(), rebuilt(&z));

        let all = ScoreBound::parse(b"-inf").unwrap();
        z.remove_range_by_score(&all, &ScoreBound::parse(b"+inf").unwrap());
        assert_eq!(z.approx_size(), 0);
    }

    #[test]
    fn test_score_ranges() {
        let z = sample();
        let min = ScoreBound::parse(b"(1").unwrap();
        let max = ScoreBound::parse(b"3").unwrap();
        assert_eq!(members(z.range_by_score(&min, &max, false, None)), vec![b("two"), b("three")]);
        assert_eq!(z.count(&min, &max), 2);

        let all_min = ScoreBound::parse(b"-inf").unwrap();
        let all_max = ScoreBound::parse(b"+inf").unwrap();
        assert_eq!(
            members(z.range_by_score(&all_min, &all_max, true, Some((1, Some(2))))),
            vec![b("three"), b("two")]
        );
        assert!(ScoreBound::parse(b"abc").is_err());
    }

    #[test]
    fn test_ties_break_by_member() {
        let mut z = SortedSet::default();
        let opts = AddOptions::default();
        for m in ["c", "a", "b"] {
            z.add(b(m), 1.0, &opts).unwrap();
        }
        assert_eq!(members(z.range_by_rank(0, -1, false)), vec![b("a"), b("b"), b("c")]);
    }

    #[test]
    fn test_pop_and_remove_ranges() {
        let mut z = sample();
        assert_eq!(z.pop(1, true), vec![(b("four"), 4.0)]);
        assert_eq!(z.pop(1, false), vec![(b("one"), 1.0)]);
        assert_eq!(z.len(), 2);

        let mut z = sample();
        assert_eq!(z.remove_range_by_rank(0, 1), 2);
        assert_eq!(members(z.range_by_rank(0, -1, false)), vec![b("three"), b("four")]);

        let mut z = sample();
        let min = ScoreBound::inclusive(2.0);
        let max = ScoreBound::inclusive(3.0);
        assert_eq!(z.remove_range_by_score(&min, &max), 2);
        assert_eq!(z.score(b"two"), None);
        assert_eq!(z.rank(b"four", false), Some(1));
    }

    #[test]
    fn test_serde_rebuilds_skiplist() {
        let z = sample();
        let encoded = bincode::serialize(&z).unwrap();
        let decoded: SortedSet = bincode::deserialize(&encoded).unwrap();
        assert_eq!(z, decoded);
        assert_eq!(decoded.rank(b"three", false), Some(2));
        assert_eq!(decoded.approx_size(), z.approx_size());
    }
}
