/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Block trees of the three chains: BTC, VBK and an altchain.
//!
//! # The Block Tree
//!
//! A block tree is a directed acyclic graph (or "Tree") of [block headers](crate::types::block)
//! rooted at a bootstrap block. Besides the headers, a block tree tracks:
//! 1. Which chain of the tree is **active**, that is, the chain the tree currently believes to be
//!    canonical. Its highest block is the active tip.
//! 2. For chains protected by Proof-of-Proof, the **endorsements** each block carries and receives,
//!    and which blocks' payloads are currently **applied**.
//!
//! # Composition
//!
//! A [`BlockTree`] is a [`BaseBlockTree`] (the arena that owns every
//! [`BlockIndex`](block_index::BlockIndex), plus the [`Chain`](chain::Chain) view of the active
//! chain) composed with a [`BestChainRule`](best_chain::BestChainRule) strategy that decides which
//! chain is active:
//!
//! |Tree|Block|Best chain rule|Protecting tree|
//! |---|---|---|---|
//! |[`BtcBlockTree`]|[`BtcBlock`]|[`ChainWorkRule`]|None|
//! |[`VbkBlockTree`]|[`VbkBlock`]|[`VbkForkResolution`]|[`BtcBlockTree`]|
//! |[`AltBlockTree`]|[`AltBlock`]|[`AltForkResolution`]|[`VbkBlockTree`]|
//!
//! The PoP-aware rules own the tree of the chain that protects theirs. Accepting a block or a
//! payload in an outer tree may therefore change the active chain of an inner tree, always within
//! the outer call.
//!
//! # Pluggable persistence
//!
//! Block trees live in memory. They can be saved into, and loaded back from, any key-value store
//! that implements the traits in [`pluggables`]. See [`persistence`].

pub mod base;

pub mod best_chain;

pub mod block_index;

pub mod chain;

pub mod invariants;

pub mod persistence;

pub mod pluggables;

pub mod validation;

pub mod variables;

use std::{collections::HashSet, sync::Arc};

pub use base::BaseBlockTree;

use crate::{
    config::Configuration,
    pop::PopAwareForkResolution,
    types::{
        block::{AltBlock, BlockHeader, BtcBlock, VbkBlock},
        data_types::{BlockHeight, PayloadId},
        payloads::{AltPayload, Vtb},
        validation::ValidationState,
    },
};

use self::{
    best_chain::{BestChainRule, ChainWorkRule},
    block_index::{BlockIndex, BlockMap, BlockStatus},
    chain::Chain,
};

pub type BtcBlockTree = BlockTree<BtcBlock, ChainWorkRule>;

pub type VbkForkResolution = PopAwareForkResolution<VbkBlock, BtcBlock, ChainWorkRule, Vtb>;

pub type VbkBlockTree = BlockTree<VbkBlock, VbkForkResolution>;

pub type AltForkResolution = PopAwareForkResolution<AltBlock, VbkBlock, VbkForkResolution, AltPayload>;

pub type AltBlockTree = BlockTree<AltBlock, AltForkResolution>;

pub struct BlockTree<H: BlockHeader, R: BestChainRule<H> = ChainWorkRule> {
    pub(crate) base: BaseBlockTree<H>,
    pub(crate) rule: R,
}

impl<H: BlockHeader, R: BestChainRule<H> + Default> BlockTree<H, R> {
    /// Create an empty block tree that does not log or publish events.
    pub fn new(params: H::Params) -> BlockTree<H, R> {
        Self::with_config(params, Configuration::default())
    }

    pub fn with_config(params: H::Params, config: Configuration) -> BlockTree<H, R> {
        Self::with_rule(params, R::default(), config)
    }
}

/// Lifecycle methods and getters.
impl<H: BlockHeader, R: BestChainRule<H>> BlockTree<H, R> {
    /// Create an empty block tree whose active chain is decided by `rule`.
    pub fn with_rule(params: H::Params, rule: R, config: Configuration) -> BlockTree<H, R> {
        BlockTree {
            base: BaseBlockTree::new(params, config),
            rule,
        }
    }

    pub fn base(&self) -> &BaseBlockTree<H> {
        &self.base
    }

    pub fn rule(&self) -> &R {
        &self.rule
    }

    pub fn params(&self) -> &H::Params {
        self.base.params()
    }

    pub fn config(&self) -> &Configuration {
        self.base.config()
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.base.is_bootstrapped()
    }

    pub fn root(&self) -> Option<&BlockIndex<H>> {
        self.base.root()
    }

    pub fn get_block_index(&self, hash: &H::Hash) -> Option<&BlockIndex<H>> {
        self.base.get_block_index(hash)
    }

    pub fn contains(&self, hash: &H::Hash) -> bool {
        self.base.contains(hash)
    }

    pub fn blocks(&self) -> &BlockMap<H> {
        self.base.blocks()
    }

    pub fn len(&self) -> usize {
        self.base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    pub fn get_best_chain(&self) -> &Chain<H> {
        self.base.get_best_chain()
    }

    pub fn tip(&self) -> Option<&BlockIndex<H>> {
        self.base.tip()
    }

    pub fn tips(&self) -> &HashSet<H::Hash> {
        self.base.tips()
    }

    pub fn ancestor(&self, hash: &H::Hash, height: BlockHeight) -> Option<&BlockIndex<H>> {
        self.base.ancestor(hash, height)
    }

    pub fn is_ancestor(&self, ancestor: &H::Hash, descendant: &H::Hash) -> bool {
        self.base.is_ancestor(ancestor, descendant)
    }

    pub fn find_fork(&self, a: &H::Hash, b: &H::Hash) -> Option<H::Hash> {
        self.base.find_fork(a, b)
    }
}

/// Header acceptance.
impl<H: BlockHeader, R: BestChainRule<H>> BlockTree<H, R> {
    /// Bootstrap the tree with a single block. Fails if the tree is already bootstrapped.
    pub fn bootstrap_with_genesis(&mut self, genesis: H, state: &mut ValidationState) -> bool {
        self.base.bootstrap_with_genesis(Arc::new(genesis), state)
    }

    /// Bootstrap the tree with a contiguous chain whose first block is at `start_height`.
    ///
    /// Fails if the tree is already bootstrapped, if `chain` is shorter than the chain's
    /// `num_blocks_for_bootstrap`, or if any block fails its stateless checks.
    pub fn bootstrap_with_chain(
        &mut self,
        start_height: BlockHeight,
        chain: Vec<H>,
        state: &mut ValidationState,
    ) -> bool {
        let chain = chain.into_iter().map(Arc::new).collect();
        self.base.bootstrap_with_chain(start_height, chain, state)
    }

    /// Validate `header` fully, insert it, and make it the active tip if it is better.
    pub fn accept_block_header(&mut self, header: H, state: &mut ValidationState) -> bool {
        self.accept_block(Arc::new(header), true, state)
    }

    /// Validate `header`, insert it, and make it the active tip if it is better.
    ///
    /// Returns `false` only if the header was rejected. Failing to switch to the new block is not
    /// an error: the block stays in the tree and the failure is recorded on the block's status.
    pub fn accept_block(
        &mut self,
        header: Arc<H>,
        contextual_check: bool,
        state: &mut ValidationState,
    ) -> bool {
        let hash = header.hash();
        if !self.base.validate_and_add_block(header, contextual_check, state) {
            return false;
        }
        let mut scratch = ValidationState::new();
        self.rule.determine_best_chain(&mut self.base, &hash, &mut scratch);
        if scratch.is_invalid() {
            log::debug!("{} did not switch to {}: {}", H::NAME, hash, scratch);
        }
        true
    }

    /// Make `to` the active tip, whether or not it is the best block.
    pub fn set_state(&mut self, to: &H::Hash, state: &mut ValidationState) -> bool {
        self.rule.set_state(&mut self.base, to, state)
    }

    /// Like [`set_state`](Self::set_state), for a tree that was just loaded from storage.
    pub(crate) fn restore_state(&mut self, to: &H::Hash, state: &mut ValidationState) -> bool {
        self.rule.restore_state(&mut self.base, to, state)
    }

    /// Attach `payloads` to the block `containing`. Trees whose blocks carry no payloads accept only
    /// an empty list.
    pub fn add_payloads(
        &mut self,
        containing: &H::Hash,
        payloads: Vec<R::Payload>,
        state: &mut ValidationState,
    ) -> bool {
        self.rule.add_payloads(&mut self.base, containing, payloads, state)
    }

    pub fn remove_payloads(&mut self, containing: &H::Hash, ids: &[PayloadId]) {
        self.rule.remove_payloads(&mut self.base, containing, ids)
    }
}

/// Subtree management.
impl<H: BlockHeader, R: BestChainRule<H>> BlockTree<H, R> {
    /// Flag the block `hash` as invalid with `reason` and its descendants with `FAILED_CHILD`.
    ///
    /// If the block is on the active chain, the active chain is first moved to its parent. If
    /// `determine_best` is set, the best chain is then re-determined over the valid tips.
    pub fn invalidate_subtree(&mut self, hash: &H::Hash, reason: BlockStatus, determine_best: bool) {
        let pprev = match self.base.get_block_index(hash) {
            Some(index) => index.pprev(),
            None => return,
        };
        if self.base.is_on_active_chain(hash) {
            // The root has no parent to fall back to; the active chain then ends up empty.
            let moved = match pprev {
                Some(pprev) => {
                    let mut state = ValidationState::new();
                    self.rule.set_state(&mut self.base, &pprev, &mut state)
                }
                None => false,
            };
            if !moved {
                self.base.set_active_tip(None);
            }
        }
        self.base.mark_invalid(hash, reason);
        if determine_best {
            self.determine_best_over_tips();
        }
    }

    /// Clear `reason` from the block `hash` and `FAILED_CHILD` from its descendants.
    pub fn revalidate_subtree(&mut self, hash: &H::Hash, reason: BlockStatus, determine_best: bool) {
        if !self.base.contains(hash) {
            return;
        }
        self.base.mark_revalidated(hash, reason);
        if determine_best {
            self.determine_best_over_tips();
        }
    }

    /// Remove the block `hash` and all of its descendants. The root can not be removed.
    pub fn remove_subtree(&mut self, hash: &H::Hash) -> bool {
        let pprev = match self.base.get_block_index(hash).and_then(|index| index.pprev()) {
            Some(pprev) => pprev,
            None => return false,
        };
        if self.base.is_on_active_chain(hash) {
            let mut state = ValidationState::new();
            if !self.rule.set_state(&mut self.base, &pprev, &mut state) {
                log::debug!("{} could not move off {} before removal: {}", H::NAME, hash, state);
                return false;
            }
        }
        let removed = self.base.remove_subtree_nodes(hash);
        self.rule.on_blocks_removed(&self.base, &removed);
        self.determine_best_over_tips();
        true
    }

    /// Remove the block `hash` if it has no children.
    pub fn remove_leaf(&mut self, hash: &H::Hash) -> bool {
        match self.base.get_block_index(hash) {
            Some(index) if index.pnext().is_empty() => self.remove_subtree(hash),
            _ => false,
        }
    }

    /// Finalize the active chain up to `hash` and prune what can never become active again.
    ///
    /// Blocks more than `preserve_blocks_behind_final` blocks below `hash` are removed, together
    /// with every fork that branches off below `hash`. The rule may raise the number of blocks kept:
    /// a PoP-protected tree keeps at least its endorsement settlement interval, the deepest an
    /// endorsement in a block above `hash` can reach.
    pub fn finalize_block(&mut self, hash: &H::Hash, preserve_blocks_behind_final: u32) -> bool {
        let preserve = preserve_blocks_behind_final.max(self.rule.min_blocks_behind_final(&self.base));
        match self.base.finalize(hash, preserve) {
            Some(removed) => {
                self.rule.on_blocks_removed(&self.base, &removed);
                true
            }
            None => false,
        }
    }

    /// Re-determine the best chain over the valid tips.
    pub(crate) fn determine_best_over_tips(&mut self) {
        best_chain::determine_best_over_tips(&mut self.base, &mut self.rule);
    }

    /// Release one reference to a block used as context by a payload. The block is removed if a
    /// payload inserted it and nothing else needs it.
    pub(crate) fn release_context_block(&mut self, hash: &H::Hash) {
        let removable = match self.base.get_block_index_mut(hash) {
            Some(index) => {
                index.ref_count = index.ref_count.saturating_sub(1);
                index.added_by_payload && index.ref_count == 0 && index.pnext.is_empty() && index.pprev.is_some()
            }
            None => false,
        };
        if removable {
            self.remove_subtree(hash);
        }
    }
}
