//! Hash buckets.
//!
//! Each bucket is a `Vec` of slots kept sorted by `(hash, key)`. A lookup
//! picks the bucket with `hash % bucket_count` and binary-searches it. Slots
//! hold only the hash and the node id; keys are read from the arena through
//! a `key_of` closure so they are stored once.

use std::cmp::Ordering;

use crate::graph::NodeId;

/// Position of one node in the bucket table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slot {
    pub hash: u64,
    pub id: NodeId,
}

/// Outcome of a bucket search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Probe {
    /// The key is at `pos` in bucket `bin`.
    Found { bin: usize, pos: usize, id: NodeId },
    /// The key is absent and would be inserted at `pos` in bucket `bin`.
    Vacant { bin: usize, pos: usize },
}

pub(crate) struct Buckets {
    bins: Vec<Vec<Slot>>,
}

impl Buckets {
    /// Create `count` empty buckets. `count` must be at least one.
    pub fn new(count: usize) -> Self {
        debug_assert!(count > 0, "bucket count must be positive");
        Self {
            bins: (0..count).map(|_| Vec::new()).collect(),
        }
    }

    pub fn count(&self) -> usize {
        self.bins.len()
    }

    fn bin_of(&self, hash: u64) -> usize {
        (hash % self.bins.len() as u64) as usize
    }

    /// Find `key` (whose hash is `hash`).
    pub fn probe<'k, K, F>(&self, hash: u64, key: &K, key_of: F) -> Probe
    where
        K: Ord + 'k,
        F: Fn(NodeId) -> Option<&'k K>,
    {
        let bin = self.bin_of(hash);
        let search = self.bins[bin].binary_search_by(|slot| {
            slot.hash
                .cmp(&hash)
                .then_with(|| compare_key(key_of(slot.id), key))
        });
        match search {
            Ok(pos) => Probe::Found {
                bin,
                pos,
                id: self.bins[bin][pos].id,
            },
            Err(pos) => Probe::Vacant { bin, pos },
        }
    }

    pub fn insert(&mut self, bin: usize, pos: usize, slot: Slot) {
        self.bins[bin].insert(pos, slot);
    }

    pub fn remove(&mut self, bin: usize, pos: usize) -> Slot {
        self.bins[bin].remove(pos)
    }

    /// Every slot, bucket by bucket.
    #[cfg(test)]
    pub fn slots(&self) -> impl Iterator<Item = Slot> + '_ {
        self.bins.iter().flatten().copied()
    }

    /// Redistribute `slots` over `count` fresh buckets, sorting each one.
    pub fn rebuild<'k, K, F>(&mut self, count: usize, slots: impl IntoIterator<Item = Slot>, key_of: F)
    where
        K: Ord + 'k,
        F: Fn(NodeId) -> Option<&'k K>,
    {
        let mut fresh = Buckets::new(count);
        for slot in slots {
            let bin = fresh.bin_of(slot.hash);
            fresh.bins[bin].push(slot);
        }
        for bin in &mut fresh.bins {
            bin.sort_by(|a, b| {
                a.hash
                    .cmp(&b.hash)
                    .then_with(|| match (key_of(a.id), key_of(b.id)) {
                        (Some(ka), Some(kb)) => ka.cmp(kb),
                        _ => Ordering::Equal,
                    })
            });
        }
        *self = fresh;
    }

    pub fn clear(&mut self) {
        for bin in &mut self.bins {
            bin.clear();
        }
    }

    /// Sizes of the individual buckets.
    pub fn occupancy(&self) -> Vec<usize> {
        self.bins.iter().map(Vec::len).collect()
    }

    #[cfg(test)]
    fn bins(&self) -> &[Vec<Slot>] {
        &self.bins
    }
}

/// Orders a slot's key against the probe key. A slot whose node is gone
/// sorts first; that only happens mid-update and never matches.
fn compare_key<K: Ord>(slot_key: Option<&K>, key: &K) -> Ordering {
    match slot_key {
        Some(slot_key) => slot_key.cmp(key),
        None => Ordering::Less,
    }
}
