/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Height-indexed views over a path of blocks.
//!
//! A [`Chain`] holds the hashes of the blocks on a single path of the tree, from `start_height` up
//! to its tip, in a vector indexed by `height - start_height`. It answers "which block is at height
//! `h` on this path" in O(1), and is how the active chain, fork resolution's chain slices, and the
//! endorsement ledger's settlement windows are represented.
//!
//! A `Chain` never owns blocks. After the tree's `pprev` graph changes, a `Chain` must be told to
//! [`set_tip`](Chain::set_tip) again before being trusted.

use std::marker::PhantomData;

use crate::types::{
    block::BlockHeader,
    data_types::{BlockHeight, EndorsementId},
};

use super::block_index::{BlockIndex, BlockMap};

/// Result of [`Chain::find_fork`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForkPoint<K> {
    /// The deepest block shared by both paths.
    Found(K),
    /// The paths may meet, but only below this chain's `start_height`.
    BelowWindow,
    /// The paths never meet, or this chain is empty.
    Disjoint,
}

impl<K> ForkPoint<K> {
    pub fn found(self) -> Option<K> {
        match self {
            ForkPoint::Found(fork) => Some(fork),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Chain<H: BlockHeader> {
    start_height: BlockHeight,
    chain: Vec<Option<H::Hash>>,
    _header: PhantomData<H>,
}

impl<H: BlockHeader> Chain<H> {
    /// Create an empty chain whose lowest slot is `start_height`.
    pub fn new(start_height: BlockHeight) -> Chain<H> {
        Chain {
            start_height,
            chain: Vec::new(),
            _header: PhantomData,
        }
    }

    /// Create the chain from `start_height` up to `tip`.
    pub fn from_tip(start_height: BlockHeight, tip: &H::Hash, blocks: &BlockMap<H>) -> Chain<H> {
        let mut chain = Chain::new(start_height);
        chain.set_tip(Some(tip), blocks);
        chain
    }

    pub fn start_height(&self) -> BlockHeight {
        self.start_height
    }

    /// Height of the tip, or `None` if the chain is empty.
    pub fn chain_height(&self) -> Option<BlockHeight> {
        if self.chain.is_empty() {
            None
        } else {
            Some(self.start_height + (self.chain.len() as u32 - 1))
        }
    }

    /// Number of slots in the chain.
    pub fn blocks_count(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// The block at `height`, or `None` if `height` is outside `[start_height, tip height]`.
    pub fn get(&self, height: BlockHeight) -> Option<H::Hash> {
        if height < self.start_height {
            return None;
        }
        self.chain
            .get((height - self.start_height) as usize)
            .copied()
            .flatten()
    }

    pub fn tip(&self) -> Option<H::Hash> {
        self.chain.last().copied().flatten()
    }

    pub fn first(&self) -> Option<H::Hash> {
        self.chain.iter().find_map(|slot| *slot)
    }

    /// Whether `index` is on this chain.
    pub fn contains(&self, index: &BlockIndex<H>) -> bool {
        self.contains_at(&index.hash, index.height)
    }

    /// Whether the block `hash` is on this chain at `height`.
    pub fn contains_at(&self, hash: &H::Hash, height: BlockHeight) -> bool {
        self.get(height).as_ref() == Some(hash)
    }

    /// The child of `index` on this chain.
    pub fn next(&self, index: &BlockIndex<H>) -> Option<H::Hash> {
        if !self.contains(index) {
            return None;
        }
        self.get(index.height + 1)
    }

    /// Iterate the hashes on this chain from `start_height` upwards.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = H::Hash> + '_ {
        self.chain.iter().filter_map(|slot| *slot)
    }

    /// Point this chain at `tip`.
    ///
    /// Walks `pprev` from `tip`, overwriting slots, until a slot already holds the visited block or
    /// `start_height` is reached. If `tip` is `None` or below `start_height`, the chain becomes empty.
    ///
    /// # Termination
    ///
    /// Does not terminate on a cyclic ancestor graph. Block trees never create one.
    pub fn set_tip(&mut self, tip: Option<&H::Hash>, blocks: &BlockMap<H>) {
        let tip = match tip.and_then(|hash| blocks.get(hash)) {
            Some(tip) if tip.height >= self.start_height => tip,
            _ => {
                self.chain.clear();
                return;
            }
        };

        let len = (tip.height - self.start_height) as usize + 1;
        self.chain.resize(len, None);

        let mut cursor = Some(tip);
        let mut lowest_written = len;
        while let Some(index) = cursor {
            if index.height < self.start_height {
                return;
            }
            let slot = (index.height - self.start_height) as usize;
            if self.chain[slot] == Some(index.hash) {
                return;
            }
            self.chain[slot] = Some(index.hash);
            lowest_written = slot;
            cursor = index.pprev.and_then(|hash| blocks.get(&hash));
        }

        // Reached a root above `start_height`: nothing lives below it on this path.
        for slot in self.chain[..lowest_written].iter_mut() {
            *slot = None;
        }
    }

    /// Find the deepest block shared by this chain and the path ending at `other`.
    pub fn find_fork(&self, other: &H::Hash, blocks: &BlockMap<H>) -> ForkPoint<H::Hash> {
        let chain_height = match self.chain_height() {
            Some(height) => height,
            None => return ForkPoint::Disjoint,
        };

        let mut cursor = blocks.get(other);
        while let Some(index) = cursor {
            if index.height <= chain_height {
                if index.height < self.start_height {
                    return ForkPoint::BelowWindow;
                }
                if self.contains(index) {
                    return ForkPoint::Found(index.hash);
                }
            }
            cursor = index.pprev.and_then(|hash| blocks.get(&hash));
        }
        ForkPoint::Disjoint
    }

    /// Find the block on this chain that contains the endorsement `id`, looking at most `window`
    /// blocks down from the tip and never below `start_height`.
    pub fn find_block_containing_endorsement(
        &self,
        id: &EndorsementId,
        window: u32,
        blocks: &BlockMap<H>,
    ) -> Option<H::Hash> {
        let mut cursor = self.tip().and_then(|hash| blocks.get(&hash));
        let mut count = 0;
        while let Some(index) = cursor {
            if count >= window || index.height < self.start_height {
                break;
            }
            if index.containing_endorsements.contains_key(id) {
                return Some(index.hash);
            }
            count += 1;
            cursor = index.pprev.and_then(|hash| blocks.get(&hash));
        }
        None
    }
}
