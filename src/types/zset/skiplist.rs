//! Rank-aware skip list over an index arena.
//!
//! ```text
//! level 2: HEAD ───────────────4──────────────────▶ D ──▶ nil
//! level 1: HEAD ──────1─────▶ A ───────3────────▶ D ──▶ nil
//! level 0: HEAD ─1─▶ A ─1─▶ B ─1─▶ C ─1─▶ D ──▶ nil
//! ```
//!
//! Each forward link stores a `span`: the number of elements it skips over.
//! Summing spans along a search path yields the rank of the node reached.
//!
//! ## Design
//!
//! Nodes live in a `Vec` and refer to each other by index. Slot 0 is the
//! header, which carries a link at every level. Freed slots go on a free list
//! and are reused by later inserts. Ordering is by `(score, member)`, with
//! byte-wise member comparison breaking score ties.

use bytes::Bytes;
use rand::Rng;
use std::cmp::Ordering;

/// Probability of promoting a node one more level.
pub const SKIPLIST_P: f64 = 0.25;

/// Hard cap on node height.
pub const SKIPLIST_MAX_LEVEL: usize = 32;

const HEAD: usize = 0;

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    forward: Option<usize>,
    span: usize,
}

#[derive(Debug, Clone)]
struct Node {
    member: Bytes,
    score: f64,
    levels: Vec<Link>,
}

#[derive(Debug, Clone)]
pub struct SkipList {
    nodes: Vec<Node>,
    free: Vec<usize>,
    level: usize,
    len: usize,
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

/// Total order on `(score, member)`. Scores are never NaN.
fn compare(score_a: f64, member_a: &[u8], score_b: f64, member_b: &[u8]) -> Ordering {
    score_a
        .partial_cmp(&score_b)
        .unwrap_or(Ordering::Equal)
        .then_with(|| member_a.cmp(member_b))
}

fn random_level() -> usize {
    let mut rng = rand::thread_rng();
    let mut level = 1;
    while level < SKIPLIST_MAX_LEVEL && rng.gen::<f64>() < SKIPLIST_P {
        level += 1;
    }
    level
}

impl SkipList {
    pub fn new() -> Self {
        let head = Node {
            member: Bytes::new(),
            score: f64::NEG_INFINITY,
            levels: vec![Link::default(); SKIPLIST_MAX_LEVEL],
        };
        Self {
            nodes: vec![head],
            free: Vec::new(),
            level: 1,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn precedes(&self, idx: usize, score: f64, member: &[u8]) -> bool {
        let node = &self.nodes[idx];
        compare(node.score, &node.member, score, member) == Ordering::Less
    }

    fn alloc(&mut self, member: Bytes, score: f64, level: usize) -> usize {
        let node = Node {
            member,
            score,
            levels: vec![Link::default(); level],
        };
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) {
        let node = &mut self.nodes[idx];
        node.member = Bytes::new();
        node.levels.clear();
        self.free.push(idx);
    }

    /// Inserts a member. The caller guarantees it is not already present.
    pub fn insert(&mut self, score: f64, member: Bytes) {
        let mut update = [HEAD; SKIPLIST_MAX_LEVEL];
        let mut rank = [0usize; SKIPLIST_MAX_LEVEL];

        let mut x = HEAD;
        for i in (0..self.level).rev() {
            rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };
            while let Some(next) = self.nodes[x].levels[i].forward {
                if !self.precedes(next, score, &member) {
                    break;
                }
                rank[i] += self.nodes[x].levels[i].span;
                x = next;
            }
            update[i] = x;
        }

        let level = random_level();
        if level > self.level {
            for i in self.level..level {
                rank[i] = 0;
                update[i] = HEAD;
                self.nodes[HEAD].levels[i].span = self.len;
            }
            self.level = level;
        }

        let new = self.alloc(member, score, level);
        for i in 0..level {
            let prev = update[i];
            let prev_link = self.nodes[prev].levels[i];
            let skipped = rank[0] - rank[i];

            self.nodes[new].levels[i] = Link {
                forward: prev_link.forward,
                span: prev_link.span - skipped,
            };
            self.nodes[prev].levels[i] = Link {
                forward: Some(new),
                span: skipped + 1,
            };
        }

        for i in level..self.level {
            self.nodes[update[i]].levels[i].span += 1;
        }

        self.len += 1;
    }

    /// Removes a member with the given score.
    ///
    /// # Returns
    ///
    /// `true` if the node was found and unlinked.
    pub fn delete(&mut self, score: f64, member: &[u8]) -> bool {
        let mut update = [HEAD; SKIPLIST_MAX_LEVEL];

        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].levels[i].forward {
                if !self.precedes(next, score, member) {
                    break;
                }
                x = next;
            }
            update[i] = x;
        }

        let target = match self.nodes[x].levels[0].forward {
            Some(idx) if self.nodes[idx].score == score && self.nodes[idx].member == member => idx,
            _ => return false,
        };

        for (i, &prev) in update.iter().enumerate().take(self.level) {
            if self.nodes[prev].levels[i].forward == Some(target) {
                let target_link = self.nodes[target].levels[i];
                let link = &mut self.nodes[prev].levels[i];
                link.span = link.span + target_link.span - 1;
                link.forward = target_link.forward;
            } else {
                self.nodes[prev].levels[i].span -= 1;
            }
        }

        while self.level > 1 && self.nodes[HEAD].levels[self.level - 1].forward.is_none() {
            self.level -= 1;
        }

        self.release(target);
        self.len -= 1;
        true
    }

    /// 0-based rank of `(score, member)`, if present.
    pub fn rank(&self, score: f64, member: &[u8]) -> Option<usize> {
        let mut traversed = 0;
        let mut x = HEAD;

        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].levels[i].forward {
                let node = &self.nodes[next];
                if compare(node.score, &node.member, score, member) == Ordering::Greater {
                    break;
                }
                traversed += self.nodes[x].levels[i].span;
                x = next;
            }

            if x != HEAD && self.nodes[x].score == score && self.nodes[x].member == member {
                return Some(traversed - 1);
            }
        }

        None
    }

    /// Arena index of the element at 0-based `rank`.
    fn node_at(&self, rank: usize) -> Option<usize> {
        if rank >= self.len {
            return None;
        }

        let target = rank + 1;
        let mut traversed = 0;
        let mut x = HEAD;

        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].levels[i].forward {
                let span = self.nodes[x].levels[i].span;
                if traversed + span > target {
                    break;
                }
                traversed += span;
                x = next;
            }
            if traversed == target {
                return Some(x);
            }
        }

        None
    }

    /// Element at 0-based `rank`.
    pub fn get_by_rank(&self, rank: usize) -> Option<(Bytes, f64)> {
        self.node_at(rank).map(|idx| {
            let node = &self.nodes[idx];
            (node.member.clone(), node.score)
        })
    }

    /// Elements with ranks in the inclusive range `[start, stop]`.
    pub fn range_by_rank(&self, start: usize, stop: usize) -> Vec<(Bytes, f64)> {
        let mut out = Vec::new();
        let mut cursor = self.node_at(start);
        let mut remaining = stop.saturating_sub(start) + 1;

        while remaining > 0 {
            let Some(idx) = cursor else {
                break;
            };
            let node = &self.nodes[idx];
            out.push((node.member.clone(), node.score));
            cursor = node.levels[0].forward;
            remaining -= 1;
        }

        out
    }

    /// Index of the first node whose score satisfies `above_min`.
    fn first_where(&self, above_min: impl Fn(f64) -> bool) -> Option<usize> {
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.nodes[x].levels[i].forward {
                if above_min(self.nodes[next].score) {
                    break;
                }
                x = next;
            }
        }
        self.nodes[x].levels[0].forward
    }

    /// Walks forward from the first node satisfying `above_min` for as long
    /// as `below_max` holds.
    pub fn scan_scores<F>(&self, above_min: impl Fn(f64) -> bool, below_max: F) -> ScoreScan<'_, F>
    where
        F: Fn(f64) -> bool,
    {
        ScoreScan {
            list: self,
            cursor: self.first_where(above_min),
            below_max,
        }
    }

    /// All elements in order.
    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, f64)> {
        let mut cursor = self.nodes[HEAD].levels[0].forward;
        std::iter::from_fn(move || {
            let idx = cursor?;
            let node = &self.nodes[idx];
            cursor = node.levels[0].forward;
            Some((&node.member, node.score))
        })
    }
}

/// Iterator returned by [`SkipList::scan_scores`].
pub struct ScoreScan<'a, F> {
    list: &'a SkipList,
    cursor: Option<usize>,
    below_max: F,
}

impl<'a, F: Fn(f64) -> bool> Iterator for ScoreScan<'a, F> {
    type Item = (&'a Bytes, f64);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cursor?;
        let node = &self.list.nodes[idx];
        if !(self.below_max)(node.score) {
            self.cursor = None;
            return None;
        }
        self.cursor = node.levels[0].forward;
        Some((&node.member, node.score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    /// Recomputes every span from scratch and compares with the stored ones.
    fn check_spans(list: &SkipList) {
        let order: Vec<usize> = {
            let mut v = Vec::new();
            let mut c = list.nodes[HEAD].levels[0].forward;
            while let Some(idx) = c {
                v.push(idx);
                c = list.nodes[idx].levels[0].forward;
            }
            v
        };
        assert_eq!(order.len(), list.len());

        let position = |idx: usize| -> usize {
            if idx == HEAD {
                0
            } else {
                order.iter().position(|&o| o == idx).unwrap() + 1
            }
        };

        for &idx in std::iter::once(&HEAD).chain(order.iter()) {
            let height = if idx == HEAD { list.level } else { list.nodes[idx].levels.len() };
            for i in 0..height {
                if let Some(next) = list.nodes[idx].levels[i].forward {
                    assert_eq!(
                        list.nodes[idx].levels[i].span,
                        position(next) - position(idx),
                        "bad span at level {}",
                        i
                    );
                }
            }
        }
    }

    #[test]
    fn test_insert_orders_by_score_then_member() {
        let mut list = SkipList::new();
        list.insert(2.0, b("b"));
        list.insert(1.0, b("z"));
        list.insert(2.0, b("a"));
        list.insert(0.5, b("m"));

        let members: Vec<&Bytes> = list.iter().map(|(m, _)| m).collect();
        assert_eq!(members, vec![&b("m"), &b("z"), &b("a"), &b("b")]);
        check_spans(&list);
    }

    #[test]
    fn test_rank_and_get_by_rank() {
        let mut list = SkipList::new();
        for i in 0..100 {
            list.insert(i as f64, Bytes::from(format!("m{:03}", i)));
        }

        for i in 0..100 {
            let member = format!("m{:03}", i);
            assert_eq!(list.rank(i as f64, member.as_bytes()), Some(i));
            assert_eq!(list.get_by_rank(i).unwrap().0, Bytes::from(member));
        }
        assert_eq!(list.rank(5.0, b"missing"), None);
        assert_eq!(list.get_by_rank(100), None);
    }

    #[test]
    fn test_delete_keeps_spans_consistent() {
        let mut list = SkipList::new();
        for i in 0..50 {
            list.insert(i as f64, Bytes::from(format!("m{}", i)));
        }
        for i in (0..50).step_by(3) {
            assert!(list.delete(i as f64, format!("m{}", i).as_bytes()));
        }
        assert!(!list.delete(0.0, b"m0"));
        assert!(!list.delete(1.0, b"m2"));

        check_spans(&list);
        assert_eq!(list.len(), 50 - 17);
        assert_eq!(list.rank(1.0, b"m1"), Some(0));
    }

    #[test]
    fn test_range_by_rank_and_scores() {
        let mut list = SkipList::new();
        for (i, name) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            list.insert(i as f64 * 10.0, b(name));
        }

        let mid: Vec<Bytes> = list.range_by_rank(1, 3).into_iter().map(|(m, _)| m).collect();
        assert_eq!(mid, vec![b("b"), b("c"), b("d")]);

        let scored: Vec<f64> = list
            .scan_scores(|s| s >= 15.0, |s| s <= 30.0)
            .map(|(_, s)| s)
            .collect();
        assert_eq!(scored, vec![20.0, 30.0]);

        let none: Vec<_> = list.scan_scores(|s| s > 100.0, |_| true).collect();
        assert!(none.is_empty());
    }

    #[test]
    fn test_slots_are_reused() {
        let mut list = SkipList::new();
        list.insert(1.0, b("a"));
        list.insert(2.0, b("b"));
        list.delete(1.0, b"a");
        list.insert(3.0, b("c"));
        assert_eq!(list.nodes.len(), 3);
        check_spans(&list);
    }

    proptest! {
        #[test]
        fn prop_rank_matches_sorted_position(
            entries in proptest::collection::btree_map("[a-z]{1,6}", -1000i32..1000, 1..200),
            removals in proptest::collection::vec(any::<prop::sample::Index>(), 0..50),
        ) {
            let mut list = SkipList::new();
            let mut model: BTreeMap<String, f64> = BTreeMap::new();
            for (member, score) in &entries {
                list.insert(*score as f64, Bytes::from(member.clone()));
                model.insert(member.clone(), *score as f64);
            }

            let keys: Vec<String> = model.keys().cloned().collect();
            for idx in removals {
                let member = idx.get(&keys);
                if let Some(score) = model.remove(member) {
                    prop_assert!(list.delete(score, member.as_bytes()));
                }
            }

            let mut expected: Vec<(f64, String)> =
                model.iter().map(|(m, s)| (*s, m.clone())).collect();
            expected.sort_by(|a, b| compare(a.0, a.1.as_bytes(), b.0, b.1.as_bytes()));

            prop_assert_eq!(list.len(), expected.len());
            for (pos, (score, member)) in expected.iter().enumerate() {
                prop_assert_eq!(list.rank(*score, member.as_bytes()), Some(pos));
            }
            check_spans(&list);
        }
    }
}
