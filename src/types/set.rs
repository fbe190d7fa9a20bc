//! Set values: unordered collections of unique byte strings.

use bytes::Bytes;
use rand::seq::IteratorRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const MEMBER_OVERHEAD: usize = 24;

fn member_size(member: &[u8]) -> usize {
    member.len() + MEMBER_OVERHEAD
}

/// A set with a running size estimate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "HashSet<Bytes>", into = "HashSet<Bytes>")]
pub struct SetValue {
    members: HashSet<Bytes>,
    footprint: usize,
}

impl SetValue {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Adds members, returning how many were new.
    pub fn add(&mut self, members: &[Bytes]) -> usize {
        let mut added = 0;
        for member in members {
            if self.members.insert(member.clone()) {
                self.footprint += member_size(member);
                added += 1;
            }
        }
        added
    }

    /// Removes members, returning how many were present.
    pub fn remove(&mut self, members: &[Bytes]) -> usize {
        let mut removed = 0;
        for member in members {
            if self.members.remove(member) {
                self.footprint -= member_size(member);
                removed += 1;
            }
        }
        removed
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.members.contains(member)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bytes> {
        self.members.iter()
    }

    /// Members in sorted order, so replies are stable.
    pub fn sorted_members(&self) -> Vec<Bytes> {
        let mut out: Vec<Bytes> = self.members.iter().cloned().collect();
        out.sort();
        out
    }

    /// Removes and returns up to `count` random members.
    pub fn pop_random(&mut self, count: usize) -> Vec<Bytes> {
        let mut rng = rand::thread_rng();
        let picked: Vec<Bytes> = self
            .members
            .iter()
            .cloned()
            .choose_multiple(&mut rng, count);
        for member in &picked {
            self.members.remove(member);
            self.footprint -= member_size(member);
        }
        picked
    }

    pub(crate) fn approx_size(&self) -> usize {
        self.footprint
    }
}

impl From<HashSet<Bytes>> for SetValue {
    fn from(members: HashSet<Bytes>) -> Self {
        let footprint = members.iter().map(|m| member_size(m)).sum();
        Self { members, footprint }
    }
}

impl From<SetValue> for HashSet<Bytes> {
    fn from(set: SetValue) -> Self {
        set.members
    }
}

impl FromIterator<Bytes> for SetValue {
    fn from_iter<I: IntoIterator<Item = Bytes>>(iter: I) -> Self {
        iter.into_iter().collect::<HashSet<_>>().into()
    }
}

/// SINTER over a list of optional sets; a missing set empties the result.
pub fn intersect(sets: &[Option<&SetValue>]) -> Vec<Bytes> {
    let Some(first) = sets.first() else {
        return Vec::new();
    };
    let Some(first) = first else {
        return Vec::new();
    };
    if sets.iter().any(|s| s.is_none()) {
        return Vec::new();
    }

    let mut out: Vec<Bytes> = first
        .iter()
        .filter(|m| sets[1..].iter().flatten().all(|s| s.contains(m)))
        .cloned()
        .collect();
    out.sort();
    out
}

/// SUNION over a list of optional sets.
pub fn union(sets: &[Option<&SetValue>]) -> Vec<Bytes> {
    let mut all: HashSet<Bytes> = HashSet::new();
    for set in sets.iter().flatten() {
        all.extend(set.iter().cloned());
    }
    let mut out: Vec<Bytes> = all.into_iter().collect();
    out.sort();
    out
}

/// SDIFF: members of the first set not present in any of the others.
pub fn difference(sets: &[Option<&SetValue>]) -> Vec<Bytes> {
    let Some(Some(first)) = sets.first() else {
        return Vec::new();
    };

    let mut out: Vec<Bytes> = first
        .iter()
        .filter(|m| !sets[1..].iter().flatten().any(|s| s.contains(m)))
        .cloned()
        .collect();
    out.sort();
    out
}
