/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The block arena shared by every kind of block tree.
//!
//! [`BaseBlockTree`] owns every [`BlockIndex`] of one chain and the [`Chain`] view of the active chain.
//! It knows how to validate and insert headers, how to bootstrap, and how to flag, unflag and remove
//! subtrees. It does **not** decide which chain is best: that is the job of the
//! [`BestChainRule`](super::best_chain::BestChainRule) a [`BlockTree`](super::BlockTree) composes it with.
//!
//! ## Categories of methods
//!
//! Methods are grouped into three `impl` blocks:
//! 1. Lifecycle methods and getters, usable by library users.
//! 2. Header acceptance and bootstrapping.
//! 3. Structural mutators (`pub(crate)`), called by block trees and their best chain rules.

use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
    time::SystemTime,
};

use crate::{
    config::Configuration,
    events::{
        ChangeTipEvent, Event, FinalizeBlockEvent, InsertBlockEvent, InvalidateBlockEvent,
        RemoveBlockEvent, RevalidateBlockEvent,
    },
    params::ChainParams,
    types::{
        block::BlockHeader,
        data_types::{BlockHeight, HashBytes},
        validation::ValidationState,
    },
};

use super::{
    block_index::{BlockIndex, BlockMap, BlockStatus},
    chain::Chain,
};

pub struct BaseBlockTree<H: BlockHeader> {
    pub(crate) blocks: BlockMap<H>,
    root: Option<H::Hash>,
    active_chain: Chain<H>,
    tips: HashSet<H::Hash>,
    params: H::Params,
    config: Configuration,
}

/// Lifecycle methods and getters.
impl<H: BlockHeader> BaseBlockTree<H> {
    /// Create an empty, not yet bootstrapped tree.
    pub fn new(params: H::Params, config: Configuration) -> BaseBlockTree<H> {
        BaseBlockTree {
            blocks: BlockMap::<H>::new(),
            root: None,
            active_chain: Chain::new(BlockHeight::new(0)),
            tips: HashSet::new(),
            params,
            config,
        }
    }

    pub fn params(&self) -> &H::Params {
        &self.params
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.root.is_some()
    }

    /// The lowest block of the tree: the first bootstrap block, or the lowest preserved block after
    /// finalization.
    pub fn root(&self) -> Option<&BlockIndex<H>> {
        self.root.and_then(|hash| self.blocks.get(&hash))
    }

    pub fn get_block_index(&self, hash: &H::Hash) -> Option<&BlockIndex<H>> {
        self.blocks.get(hash)
    }

    pub fn contains(&self, hash: &H::Hash) -> bool {
        self.blocks.contains_key(hash)
    }

    /// All blocks of the tree, keyed by hash.
    pub fn blocks(&self) -> &BlockMap<H> {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The active chain, from the root up to the active tip.
    pub fn get_best_chain(&self) -> &Chain<H> {
        &self.active_chain
    }

    /// The active tip.
    pub fn tip(&self) -> Option<&BlockIndex<H>> {
        self.active_chain.tip().and_then(|hash| self.blocks.get(&hash))
    }

    /// The blocks that have no children.
    pub fn tips(&self) -> &HashSet<H::Hash> {
        &self.tips
    }

    /// Whether the block `hash` is on the active chain.
    pub fn is_on_active_chain(&self, hash: &H::Hash) -> bool {
        self.blocks
            .get(hash)
            .map_or(false, |index| self.active_chain.contains(index))
    }

    /// The ancestor of `hash` at `height`, or `hash` itself if it is at `height`.
    pub fn ancestor(&self, hash: &H::Hash, height: BlockHeight) -> Option<&BlockIndex<H>> {
        let mut cursor = self.blocks.get(hash);
        while let Some(index) = cursor {
            if index.height == height {
                return Some(index);
            }
            if index.height < height {
                return None;
            }
            if self.active_chain.contains(index) {
                // Below here the active chain answers in O(1).
                return self.active_chain.get(height).and_then(|hash| self.blocks.get(&hash));
            }
            cursor = index.pprev.and_then(|hash| self.blocks.get(&hash));
        }
        None
    }

    /// Whether `ancestor` is `descendant` or one of its ancestors.
    pub fn is_ancestor(&self, ancestor: &H::Hash, descendant: &H::Hash) -> bool {
        match self.blocks.get(ancestor) {
            Some(index) => self
                .ancestor(descendant, index.height)
                .map_or(false, |found| found.hash == *ancestor),
            None => false,
        }
    }

    /// The deepest common ancestor of `a` and `b`, or `None` if they do not share a root.
    pub fn find_fork(&self, a: &H::Hash, b: &H::Hash) -> Option<H::Hash> {
        let mut a = self.blocks.get(a)?;
        let mut b = self.blocks.get(b)?;
        while a.height > b.height {
            a = self.blocks.get(&a.pprev?)?;
        }
        while b.height > a.height {
            b = self.blocks.get(&b.pprev?)?;
        }
        while a.hash != b.hash {
            a = self.blocks.get(&a.pprev?)?;
            b = self.blocks.get(&b.pprev?)?;
        }
        Some(a.hash)
    }

    /// Hashes of the blocks strictly above `ancestor` up to and including `descendant`, lowest first.
    ///
    /// Empty if `ancestor == descendant`. Panics if `ancestor` is not an ancestor of `descendant`.
    pub(crate) fn path_up(&self, ancestor: &H::Hash, descendant: &H::Hash) -> Vec<H::Hash> {
        let mut path = Vec::new();
        let mut cursor = *descendant;
        while cursor != *ancestor {
            path.push(cursor);
            cursor = self
                .blocks
                .get(&cursor)
                .and_then(|index| index.pprev)
                .unwrap_or_else(|| panic!("{} is not an ancestor of {}", ancestor, descendant));
        }
        path.reverse();
        path
    }
}

/// Header acceptance and bootstrapping.
impl<H: BlockHeader> BaseBlockTree<H> {
    /// Bootstrap the tree with a single block, which becomes the root and the active tip.
    pub(crate) fn bootstrap_with_genesis(&mut self, genesis: Arc<H>, state: &mut ValidationState) -> bool {
        let height = genesis.declared_height().unwrap_or(BlockHeight::new(0));
        self.bootstrap_with_chain(height, vec![genesis], state)
    }

    /// Bootstrap the tree with a contiguous chain of blocks whose first block is at `start_height`.
    ///
    /// Only stateless checks are run: the ancestors contextual checks need are not known. Either
    /// every block is inserted or none is.
    pub(crate) fn bootstrap_with_chain(
        &mut self,
        start_height: BlockHeight,
        chain: Vec<Arc<H>>,
        state: &mut ValidationState,
    ) -> bool {
        if self.is_bootstrapped() {
            return state.invalid(
                format!("{}-bootstrap-already", H::NAME),
                "the tree is already bootstrapped",
            );
        }
        if chain.is_empty() {
            return state.invalid(
                format!("{}-bootstrap-empty-chain", H::NAME),
                "can not bootstrap with an empty chain",
            );
        }
        if (chain.len() as u32) < self.params.num_blocks_for_bootstrap() {
            return state.invalid(
                format!("{}-bootstrap-small-chain", H::NAME),
                format!(
                    "bootstrap chain has {} blocks, at least {} are required",
                    chain.len(),
                    self.params.num_blocks_for_bootstrap()
                ),
            );
        }

        let mut previous: Option<H::Hash> = None;
        for (offset, header) in chain.iter().enumerate() {
            let height = start_height + offset as u32;
            if let Some(declared) = header.declared_height() {
                if declared != height {
                    return state.invalid(
                        format!("{}-bootstrap-bad-height", H::NAME),
                        format!("block at bootstrap height {} declares height {}", height, declared),
                    );
                }
            }
            if let Some(previous) = previous {
                if header.previous_hash() != previous {
                    return state.invalid(
                        format!("{}-bad-prev-block", H::NAME),
                        format!("bootstrap block at height {} does not connect", height),
                    );
                }
            }
            if !header.check_block(&self.params, state) {
                return state.wrap(format!("{}-check-block", H::NAME));
            }
            previous = Some(header.hash());
        }

        let mut tip = None;
        for (offset, header) in chain.into_iter().enumerate() {
            let hash = if offset == 0 {
                self.insert_root(header, start_height)
            } else {
                self.insert_block_header(header)
            };
            if let Some(index) = self.blocks.get_mut(&hash) {
                index
                    .status
                    .insert(BlockStatus::BOOTSTRAP | BlockStatus::VALID_CONTEXTUALLY | BlockStatus::APPLIED);
            }
            tip = Some(hash);
        }

        self.active_chain = Chain::new(start_height);
        self.set_active_tip(tip.as_ref());
        true
    }

    /// Validate `header` and insert it into the tree.
    ///
    /// Returns `true` if the block is (or already was) in the tree and valid. A block that fails
    /// stateless or contextual checks is not inserted. A block whose parent is invalid is inserted
    /// with [`BlockStatus::FAILED_CHILD`] and `false` is returned.
    pub(crate) fn validate_and_add_block(
        &mut self,
        header: Arc<H>,
        contextual_check: bool,
        state: &mut ValidationState,
    ) -> bool {
        let hash = header.hash();
        if hash == header.previous_hash() {
            return state.invalid(
                format!("{}-bad-prev-block", H::NAME),
                format!("block {} references itself as previous block", hash),
            );
        }

        if let Some(index) = self.blocks.get(&hash) {
            if index.is_valid() {
                return true;
            }
            return state.invalid(
                format!("{}-bad-chain", H::NAME),
                format!("block {} is known to be invalid: {:?}", hash, index.status),
            );
        }

        if !header.check_block(&self.params, state) {
            return state.wrap(format!("{}-check-block", H::NAME));
        }

        let prev = match self.blocks.get(&header.previous_hash()) {
            Some(prev) => prev,
            None => {
                return state.invalid(
                    format!("{}-bad-prev-block", H::NAME),
                    format!("can not find previous block {}", header.previous_hash()),
                )
            }
        };

        // Contextually invalid headers are rejected outright rather than kept as FAILED_BLOCK: a
        // later resubmission is checked again from scratch.
        if contextual_check && !header.contextually_check_block(prev, self, state) {
            return state.wrap(format!("{}-contextually-check-block", H::NAME));
        }
        let prev_is_valid = prev.is_valid();

        let hash = self.insert_block_header(header);
        let index = self
            .blocks
            .get_mut(&hash)
            .expect("a block that was just inserted must be in the tree");
        if contextual_check {
            index.status.insert(BlockStatus::VALID_CONTEXTUALLY);
        }
        if !prev_is_valid {
            index.status.insert(BlockStatus::FAILED_CHILD);
            return state.invalid(
                format!("{}-bad-chain", H::NAME),
                format!("previous block of {} is invalid", hash),
            );
        }
        true
    }

    /// Insert a header read back from storage with its stored `status`. Only stateless checks are
    /// run. The first header restored into an empty tree becomes its root at `height`; every later
    /// header must extend a restored block and sit at `height`.
    pub(crate) fn restore_block(
        &mut self,
        header: Arc<H>,
        height: BlockHeight,
        status: BlockStatus,
        state: &mut ValidationState,
    ) -> bool {
        if !header.check_block(&self.params, state) {
            return state.wrap(format!("{}-check-block", H::NAME));
        }
        let hash = if self.root.is_none() {
            self.insert_root(header, height)
        } else {
            match self.blocks.get(&header.previous_hash()) {
                Some(prev) if prev.height + 1 == height => {}
                Some(prev) => {
                    return state.invalid(
                        format!("{}-bad-height", H::NAME),
                        format!("stored at height {}, previous block is at {}", height, prev.height),
                    )
                }
                None => {
                    return state.invalid(
                        format!("{}-bad-prev-block", H::NAME),
                        format!("can not find previous block {}", header.previous_hash()),
                    )
                }
            }
            self.insert_block_header(header)
        };
        if let Some(index) = self.blocks.get_mut(&hash) {
            index.status = status.persisted();
        }
        true
    }

    /// Make the root the only applied block and the active tip.
    pub(crate) fn activate_root(&mut self) {
        let (root, height) = match self.root() {
            Some(root) => (root.hash, root.height),
            None => return,
        };
        if let Some(index) = self.blocks.get_mut(&root) {
            index.status.insert(BlockStatus::APPLIED);
        }
        self.active_chain = Chain::new(height);
        self.set_active_tip(Some(&root));
    }

    fn insert_root(&mut self, header: Arc<H>, height: BlockHeight) -> H::Hash {
        let work = header.block_proof();
        let index = BlockIndex::new(header, None, height, work);
        let hash = index.hash;
        self.blocks.insert(hash, index);
        self.tips.insert(hash);
        self.root = Some(hash);
        self.publish_insert(&hash);
        hash
    }

    /// Insert a header whose parent is in the tree, linking it to its parent. Inserting a header
    /// that is already in the tree is a no-op.
    fn insert_block_header(&mut self, header: Arc<H>) -> H::Hash {
        let hash = header.hash();
        if self.blocks.contains_key(&hash) {
            return hash;
        }

        let prev_hash = header.previous_hash();
        let prev = self
            .blocks
            .get_mut(&prev_hash)
            .expect("the previous block of an inserted header must be in the tree");
        prev.pnext.insert(hash);
        let height = prev.height + 1;
        let work = prev.chain_work + header.block_proof();

        self.tips.remove(&prev_hash);
        self.tips.insert(hash);
        self.blocks
            .insert(hash, BlockIndex::new(header, Some(prev_hash), height, work));
        self.publish_insert(&hash);
        hash
    }

    fn publish_insert(&self, hash: &H::Hash) {
        if let Some(index) = self.blocks.get(hash) {
            Event::publish(
                &self.config,
                Event::InsertBlock(InsertBlockEvent {
                    timestamp: SystemTime::now(),
                    chain: H::NAME,
                    block: hash.as_bytes().to_vec(),
                    height: index.height,
                }),
            );
        }
    }
}

/// Structural mutators.
impl<H: BlockHeader> BaseBlockTree<H> {
    pub(crate) fn get_block_index_mut(&mut self, hash: &H::Hash) -> Option<&mut BlockIndex<H>> {
        self.blocks.get_mut(hash)
    }

    /// Point the active chain at `tip`. Does not touch any block's status.
    pub(crate) fn set_active_tip(&mut self, tip: Option<&H::Hash>) {
        let previous_tip = self.active_chain.tip();
        self.active_chain.set_tip(tip, &self.blocks);
        let new_tip = self.active_chain.tip();
        if previous_tip == new_tip {
            return;
        }
        if let Some(index) = new_tip.and_then(|hash| self.blocks.get(&hash)) {
            Event::publish(
                &self.config,
                Event::ChangeTip(ChangeTipEvent {
                    timestamp: SystemTime::now(),
                    chain: H::NAME,
                    previous_tip: previous_tip.map(|hash| hash.as_bytes().to_vec()),
                    tip: index.hash.as_bytes().to_vec(),
                    height: index.height,
                }),
            );
        }
    }

    /// Flag the block `hash` with `reason` and every descendant with [`BlockStatus::FAILED_CHILD`].
    pub(crate) fn mark_invalid(&mut self, hash: &H::Hash, reason: BlockStatus) {
        let index = match self.blocks.get_mut(hash) {
            Some(index) => index,
            None => return,
        };
        index.status.insert(reason);

        let mut queue: VecDeque<H::Hash> = index.pnext.iter().copied().collect();
        while let Some(child) = queue.pop_front() {
            if let Some(index) = self.blocks.get_mut(&child) {
                index.status.insert(BlockStatus::FAILED_CHILD);
                queue.extend(index.pnext.iter().copied());
            }
        }

        Event::publish(
            &self.config,
            Event::InvalidateBlock(InvalidateBlockEvent {
                timestamp: SystemTime::now(),
                chain: H::NAME,
                block: hash.as_bytes().to_vec(),
                reason,
            }),
        );
    }

    /// Clear `reason` from the block `hash`. If that leaves it valid, clear
    /// [`BlockStatus::FAILED_CHILD`] from its descendants, except below descendants that are
    /// invalid in their own right.
    pub(crate) fn mark_revalidated(&mut self, hash: &H::Hash, reason: BlockStatus) {
        let index = match self.blocks.get_mut(hash) {
            Some(index) => index,
            None => return,
        };
        index.status.remove(reason);

        if index.is_valid() {
            let own_failures = BlockStatus::FAILED_BLOCK | BlockStatus::FAILED_POP;
            let mut queue: VecDeque<H::Hash> = index.pnext.iter().copied().collect();
            while let Some(child) = queue.pop_front() {
                if let Some(index) = self.blocks.get_mut(&child) {
                    index.status.remove(BlockStatus::FAILED_CHILD);
                    if !index.status.intersects(own_failures) {
                        queue.extend(index.pnext.iter().copied());
                    }
                }
            }
        }

        Event::publish(
            &self.config,
            Event::RevalidateBlock(RevalidateBlockEvent {
                timestamp: SystemTime::now(),
                chain: H::NAME,
                block: hash.as_bytes().to_vec(),
                reason,
            }),
        );
    }

    /// Remove the block `hash` and all of its descendants, children before parents, and return the
    /// removed hashes in that order.
    ///
    /// The caller must move the active chain off the subtree first.
    pub(crate) fn remove_subtree_nodes(&mut self, hash: &H::Hash) -> Vec<H::Hash> {
        let index = match self.blocks.get(hash) {
            Some(index) => index,
            None => return Vec::new(),
        };
        assert!(
            !self.active_chain.contains(index),
            "can not remove block {} while it is on the active chain",
            hash
        );
        let parent = index.pprev;

        // Preorder, then reversed: every child ends up before its parent.
        let mut order = Vec::new();
        let mut stack = vec![*hash];
        while let Some(next) = stack.pop() {
            if let Some(index) = self.blocks.get(&next) {
                stack.extend(index.pnext.iter().copied());
            }
            order.push(next);
        }
        order.reverse();

        for removed in &order {
            if let Some(index) = self.blocks.remove(removed) {
                self.tips.remove(removed);
                Event::publish(
                    &self.config,
                    Event::RemoveBlock(RemoveBlockEvent {
                        timestamp: SystemTime::now(),
                        chain: H::NAME,
                        block: removed.as_bytes().to_vec(),
                        height: index.height,
                    }),
                );
            }
        }

        match parent.and_then(|parent| self.blocks.get_mut(&parent)) {
            Some(parent) => {
                parent.pnext.remove(hash);
                if parent.pnext.is_empty() {
                    self.tips.insert(parent.hash);
                }
            }
            None => {
                if self.root == Some(*hash) {
                    self.root = None;
                    self.active_chain = Chain::new(BlockHeight::new(0));
                }
            }
        }

        order
    }

    /// Mark the active chain up to `hash` as finalized, then prune everything that can no longer
    /// become part of the active chain: every fork that branches off below `hash`, and every block
    /// more than `preserve_blocks_behind_final` blocks below it.
    ///
    /// Returns the removed hashes, or `None` if `hash` is not on the active chain.
    pub(crate) fn finalize(
        &mut self,
        hash: &H::Hash,
        preserve_blocks_behind_final: u32,
    ) -> Option<Vec<H::Hash>> {
        let final_height = self.blocks.get(hash).filter(|index| self.active_chain.contains(index))?.height;

        let mut cursor = Some(*hash);
        while let Some(index) = cursor.and_then(|hash| self.blocks.get_mut(&hash)) {
            if index.is_finalized() {
                break;
            }
            index.status.insert(BlockStatus::FINALIZED);
            cursor = index.pprev;
        }

        let root_height = self.active_chain.start_height();
        let new_root_height = std::cmp::max(
            root_height,
            final_height.saturating_sub(preserve_blocks_behind_final),
        );

        // Forks that branch off the active chain below the finalized block.
        let mut removed = Vec::new();
        let mut height = root_height;
        while height < final_height {
            let on_chain = self.active_chain.get(height);
            let next_on_chain = self.active_chain.get(height + 1);
            if let Some(index) = on_chain.and_then(|hash| self.blocks.get(&hash)) {
                let forks: Vec<H::Hash> = index
                    .pnext
                    .iter()
                    .filter(|child| Some(**child) != next_on_chain)
                    .copied()
                    .collect();
                for fork in forks {
                    removed.extend(self.remove_subtree_nodes(&fork));
                }
            }
            height += 1;
        }

        // Blocks below the new root, which by now form a single path.
        let new_root = self.active_chain.get(new_root_height)?;
        let mut height = root_height;
        while height < new_root_height {
            if let Some(old) = self.active_chain.get(height) {
                if let Some(index) = self.blocks.remove(&old) {
                    Event::publish(
                        &self.config,
                        Event::RemoveBlock(RemoveBlockEvent {
                            timestamp: SystemTime::now(),
                            chain: H::NAME,
                            block: old.as_bytes().to_vec(),
                            height: index.height,
                        }),
                    );
                    removed.push(old);
                }
            }
            height += 1;
        }
        if let Some(root) = self.blocks.get_mut(&new_root) {
            root.pprev = None;
        }
        self.root = Some(new_root);
        let tip = self.active_chain.tip();
        self.active_chain = Chain::new(new_root_height);
        self.active_chain.set_tip(tip.as_ref(), &self.blocks);

        Event::publish(
            &self.config,
            Event::FinalizeBlock(FinalizeBlockEvent {
                timestamp: SystemTime::now(),
                chain: H::NAME,
                block: hash.as_bytes().to_vec(),
                height: final_height,
            }),
        );
        Some(removed)
    }
}
