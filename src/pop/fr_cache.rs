/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Memoization of fork resolution outcomes.
//!
//! [`FrCache`] remembers, for pairs of competing tips, which one had the better PoP score. It is
//! never a source of truth: [`evict_subtree`](FrCache::evict_subtree) must be called for a block
//! whenever its payloads change, since the scores of its descendants include them. A miss simply
//! means the score is computed again.
//!
//! Besides direct hits, the cache answers *transitively*: if an ancestor of `a` (down to a height
//! bound) is known to beat `b`, then `a` beats `b` as well, because a descendant only ever adds
//! keystone periods to the score of its ancestor.

use std::collections::{HashMap, HashSet};

use crate::{
    block_tree::block_index::BlockMap,
    types::{block::BlockHeader, data_types::BlockHeight},
};

/// Outcome of [`FrCache::compare`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareResult {
    /// Nothing is known about the pair.
    Unknown,
    Equal,
    ABetter,
    BBetter,
    /// An ancestor of `a` is known to beat `b`.
    ATransitivelyBetter,
    /// An ancestor of `b` is known to beat `a`.
    BTransitivelyBetter,
}

impl CompareResult {
    /// Whether the result says anything about the pair.
    pub fn is_known(&self) -> bool {
        *self != CompareResult::Unknown
    }
}

pub struct FrCache<H: BlockHeader> {
    winners: HashMap<H::Hash, HashSet<H::Hash>>,
    equal: HashMap<H::Hash, HashSet<H::Hash>>,
    min_height: BlockHeight,

    misses: u64,
    hits_equal: u64,
    hits_a_better: u64,
    hits_b_better: u64,
    hits_a_transitive: u64,
    hits_b_transitive: u64,
}

impl<H: BlockHeader> Default for FrCache<H> {
    fn default() -> Self {
        FrCache::new()
    }
}

impl<H: BlockHeader> FrCache<H> {
    pub fn new() -> FrCache<H> {
        FrCache {
            winners: HashMap::new(),
            equal: HashMap::new(),
            min_height: BlockHeight::new(0),
            misses: 0,
            hits_equal: 0,
            hits_a_better: 0,
            hits_b_better: 0,
            hits_a_transitive: 0,
            hits_b_transitive: 0,
        }
    }

    /// Lowest height transitive lookups walk down to.
    pub fn set_min_height(&mut self, min_height: BlockHeight) {
        self.min_height = min_height;
    }

    /// Record the outcome of comparing `a` to `b`. `score` is positive if `a` is better, negative
    /// if `b` is better, and zero if they are equal.
    pub fn store(&mut self, a: &H::Hash, b: &H::Hash, score: i64) {
        match score.signum() {
            1 => {
                self.winners.entry(*a).or_default().insert(*b);
            }
            -1 => {
                self.winners.entry(*b).or_default().insert(*a);
            }
            _ => {
                self.equal.entry(*a).or_default().insert(*b);
                self.equal.entry(*b).or_default().insert(*a);
            }
        }
    }

    /// Look up the outcome of comparing `a` to `b`.
    ///
    /// A transitive hit copies the winning ancestor's set into `a`'s (or `b`'s) entry, so that the
    /// next lookup is a direct hit.
    pub fn compare(&mut self, a: &H::Hash, b: &H::Hash, blocks: &BlockMap<H>) -> CompareResult {
        if self.winners.get(a).map_or(false, |set| set.contains(b)) {
            self.hits_a_better += 1;
            return CompareResult::ABetter;
        }
        if self.winners.get(b).map_or(false, |set| set.contains(a)) {
            self.hits_b_better += 1;
            return CompareResult::BBetter;
        }
        if self.equal.get(a).map_or(false, |set| set.contains(b)) {
            self.hits_equal += 1;
            return CompareResult::Equal;
        }

        if self.inherit_win(a, b, blocks) {
            self.hits_a_transitive += 1;
            return CompareResult::ATransitivelyBetter;
        }
        if self.inherit_win(b, a, blocks) {
            self.hits_b_transitive += 1;
            return CompareResult::BTransitivelyBetter;
        }

        self.misses += 1;
        CompareResult::Unknown
    }

    // Whether some strict ancestor of `winner`, not below `min_height`, beats `loser`.
    fn inherit_win(&mut self, winner: &H::Hash, loser: &H::Hash, blocks: &BlockMap<H>) -> bool {
        let mut cursor = blocks
            .get(winner)
            .and_then(|index| index.pprev)
            .and_then(|hash| blocks.get(&hash));
        while let Some(index) = cursor {
            if index.height < self.min_height {
                break;
            }
            if let Some(beaten) = self.winners.get(&index.hash) {
                if beaten.contains(loser) {
                    let beaten = beaten.clone();
                    self.winners.entry(*winner).or_default().extend(beaten);
                    return true;
                }
            }
            cursor = index.pprev.and_then(|hash| blocks.get(&hash));
        }
        false
    }

    /// Forget everything recorded about `block`, both as a key and as a member of other entries.
    pub fn evict(&mut self, block: &H::Hash) {
        self.winners.remove(block);
        self.equal.remove(block);
        for set in self.winners.values_mut() {
            set.remove(block);
        }
        for set in self.equal.values_mut() {
            set.remove(block);
        }
    }

    /// Forget everything recorded about `block` and every descendant of it in `blocks`.
    pub fn evict_subtree(&mut self, block: &H::Hash, blocks: &BlockMap<H>) {
        let mut stale = HashSet::new();
        let mut pending = vec![*block];
        while let Some(hash) = pending.pop() {
            if stale.insert(hash) {
                if let Some(index) = blocks.get(&hash) {
                    pending.extend(index.pnext.iter().copied());
                }
            }
        }

        self.winners.retain(|key, _| !stale.contains(key));
        self.equal.retain(|key, _| !stale.contains(key));
        for set in self.winners.values_mut().chain(self.equal.values_mut()) {
            set.retain(|member| !stale.contains(member));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.winners.is_empty() && self.equal.is_empty()
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn hits(&self) -> u64 {
        self.hits_equal
            + self.hits_a_better
            + self.hits_b_better
            + self.hits_a_transitive
            + self.hits_b_transitive
    }

    pub fn transitive_hits(&self) -> u64 {
        self.hits_a_transitive + self.hits_b_transitive
    }

    /// Fraction of lookups answered from the cache, or 0 if there were none.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use super::*;
    use crate::{
        block_tree::block_index::BlockIndex,
        types::{
            block::AltBlock,
            data_types::{AltHash, ChainWork},
        },
    };

    fn hash(tag: u8, height: u32) -> AltHash {
        let mut bytes = [tag; 32];
        bytes[28..].copy_from_slice(&height.to_be_bytes());
        AltHash::new(bytes)
    }

    // Two forks of `length` blocks on top of a shared genesis.
    fn forks(length: u32) -> BlockMap<AltBlock> {
        let mut blocks = HashMap::new();
        let genesis = hash(0, 0);
        let header = AltBlock {
            hash: genesis,
            previous_block: AltHash::zero(),
            height: BlockHeight::new(0),
            timestamp: 0,
        };
        blocks.insert(genesis, BlockIndex::new(Arc::new(header), None, BlockHeight::new(0), ChainWork::new(1)));
        for tag in [1u8, 2] {
            let mut previous = genesis;
            for height in 1..=length {
                let header = AltBlock {
                    hash: hash(tag, height),
                    previous_block: previous,
                    height: BlockHeight::new(height),
                    timestamp: height,
                };
                let index = BlockIndex::new(
                    Arc::new(header),
                    Some(previous),
                    BlockHeight::new(height),
                    ChainWork::new(height as u128 + 1),
                );
                blocks.insert(index.hash, index);
                previous = hash(tag, height);
            }
        }
        blocks
    }

    #[test]
    fn direct_hits() {
        let blocks = forks(3);
        let mut cache = FrCache::<AltBlock>::new();
        let (a, b) = (hash(1, 3), hash(2, 3));
        assert_eq!(cache.compare(&a, &b, &blocks), CompareResult::Unknown);

        cache.store(&a, &b, 42);
        assert_eq!(cache.compare(&a, &b, &blocks), CompareResult::ABetter);
        assert_eq!(cache.compare(&b, &a, &blocks), CompareResult::BBetter);

        let c = hash(2, 2);
        cache.store(&a, &c, 0);
        assert_eq!(cache.compare(&c, &a, &blocks), CompareResult::Equal);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 3);
        assert!((cache.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn descendants_of_winners_win_transitively() {
        let blocks = forks(6);
        let mut cache = FrCache::<AltBlock>::new();
        cache.store(&hash(1, 3), &hash(2, 6), 1);

        assert_eq!(
            cache.compare(&hash(1, 6), &hash(2, 6), &blocks),
            CompareResult::ATransitivelyBetter
        );
        // The inherited set makes the next lookup a direct hit.
        assert_eq!(cache.compare(&hash(1, 6), &hash(2, 6), &blocks), CompareResult::ABetter);
        assert_eq!(
            cache.compare(&hash(2, 6), &hash(1, 5), &blocks),
            CompareResult::BTransitivelyBetter
        );
        assert_eq!(cache.transitive_hits(), 2);
    }

    #[test]
    fn transitive_lookup_stops_at_min_height() {
        let blocks = forks(6);
        let mut cache = FrCache::<AltBlock>::new();
        cache.store(&hash(1, 2), &hash(2, 6), 1);
        cache.set_min_height(BlockHeight::new(3));
        assert_eq!(cache.compare(&hash(1, 6), &hash(2, 6), &blocks), CompareResult::Unknown);
    }

    #[test]
    fn evict_removes_keys_and_members() {
        let blocks = forks(3);
        let mut cache = FrCache::<AltBlock>::new();
        let (a, b, c) = (hash(1, 3), hash(2, 3), hash(2, 2));
        cache.store(&a, &b, 1);
        cache.store(&c, &a, 0);

        cache.evict(&b);
        assert_eq!(cache.compare(&a, &b, &blocks), CompareResult::Unknown);
        assert_eq!(cache.compare(&a, &c, &blocks), CompareResult::Equal);

        cache.evict(&a);
        assert_eq!(cache.compare(&a, &c, &blocks), CompareResult::Unknown);
        assert!(cache.is_empty() || cache.winners.values().all(HashSet::is_empty));
    }

    #[test]
    fn evict_subtree_removes_descendants() {
        let mut blocks = forks(4);
        for tag in [1u8, 2] {
            for height in 1..4 {
                let child = hash(tag, height + 1);
                blocks.get_mut(&hash(tag, height)).unwrap().pnext.insert(child);
            }
        }
        let mut cache = FrCache::<AltBlock>::new();
        cache.store(&hash(1, 4), &hash(2, 4), 1);
        cache.store(&hash(2, 3), &hash(1, 1), 1);
        cache.store(&hash(1, 1), &hash(2, 1), 0);

        cache.evict_subtree(&hash(1, 2), &blocks);
        assert_eq!(cache.compare(&hash(1, 4), &hash(2, 4), &blocks), CompareResult::Unknown);
        // Blocks outside the subtree keep their entries.
        assert_eq!(cache.compare(&hash(2, 3), &hash(1, 1), &blocks), CompareResult::ABetter);
        assert_eq!(cache.compare(&hash(2, 1), &hash(1, 1), &blocks), CompareResult::Equal);
    }
}
