/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Strategies that decide which chain of a block tree is active.
//!
//! A [`BlockTree`](super::BlockTree) delegates three things to its [`BestChainRule`]:
//! 1. Deciding whether a candidate block should replace the active tip.
//! 2. Moving the active chain, together with whatever state is attached to applied blocks.
//! 3. Payload management, for trees whose blocks carry payloads.
//!
//! [`ChainWorkRule`] is the rule for unprotected chains: the valid chain with the most accumulated
//! work wins, and blocks carry no payloads. Chains protected by Proof-of-Proof use
//! [`PopAwareForkResolution`](crate::pop::PopAwareForkResolution).

use std::{convert::Infallible, fmt::Debug};

use crate::types::{block::BlockHeader, data_types::PayloadId, validation::ValidationState};

use super::{base::BaseBlockTree, block_index::BlockStatus};

pub trait BestChainRule<H: BlockHeader> {
    /// What can be added to a block of this tree with `add_payloads`.
    type Payload: Clone + Debug;

    /// Id under which `payload` is recorded in a block's `payload_ids`.
    fn payload_id(payload: &Self::Payload) -> PayloadId;

    /// Make `candidate` the active tip if it is better than the current one. Failures to move the
    /// active chain are recorded in `state` and leave the active chain where it was.
    fn determine_best_chain(
        &mut self,
        base: &mut BaseBlockTree<H>,
        candidate: &H::Hash,
        state: &mut ValidationState,
    );

    /// Make `to` the active tip regardless of whether it is better.
    ///
    /// Either the active chain ends up at `to` and `true` is returned, or it stays where it was.
    fn set_state(
        &mut self,
        base: &mut BaseBlockTree<H>,
        to: &H::Hash,
        state: &mut ValidationState,
    ) -> bool;

    /// Move the active chain of a freshly loaded tree from its root to `to`. Blocks and payloads
    /// that applying would add to protecting trees are expected to have been loaded with them.
    fn restore_state(
        &mut self,
        base: &mut BaseBlockTree<H>,
        to: &H::Hash,
        state: &mut ValidationState,
    ) -> bool {
        self.set_state(base, to, state)
    }

    /// Attach `payloads` to the block `containing`.
    fn add_payloads(
        &mut self,
        base: &mut BaseBlockTree<H>,
        containing: &H::Hash,
        payloads: Vec<Self::Payload>,
        state: &mut ValidationState,
    ) -> bool;

    /// Detach the payloads `ids` from the block `containing`.
    fn remove_payloads(&mut self, base: &mut BaseBlockTree<H>, containing: &H::Hash, ids: &[PayloadId]);

    /// Re-attach payloads read back from storage to a block that is not applied, without executing
    /// them.
    fn restore_payloads(
        &mut self,
        base: &mut BaseBlockTree<H>,
        containing: &H::Hash,
        payloads: Vec<Self::Payload>,
        state: &mut ValidationState,
    ) -> bool;

    /// A payload previously added to some block of this tree.
    fn payload(&self, id: &PayloadId) -> Option<&Self::Payload>;

    /// Forget everything kept about blocks that were removed from `base`.
    fn on_blocks_removed(&mut self, base: &BaseBlockTree<H>, removed: &[H::Hash]);

    /// The fewest blocks below a finalized block that must stay in `base`.
    fn min_blocks_behind_final(&self, _base: &BaseBlockTree<H>) -> u32 {
        0
    }
}

/// The heaviest valid chain is the active chain.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChainWorkRule;

impl<H: BlockHeader> BestChainRule<H> for ChainWorkRule {
    type Payload = Infallible;

    fn payload_id(payload: &Infallible) -> PayloadId {
        match *payload {}
    }

    fn determine_best_chain(
        &mut self,
        base: &mut BaseBlockTree<H>,
        candidate: &H::Hash,
        state: &mut ValidationState,
    ) {
        let candidate_work = match base.get_block_index(candidate) {
            Some(index) if index.is_valid() => index.chain_work(),
            _ => return,
        };
        let better = match base.tip() {
            Some(tip) => candidate_work > tip.chain_work(),
            None => true,
        };
        if better {
            self.set_state(base, candidate, state);
        }
    }

    fn set_state(
        &mut self,
        base: &mut BaseBlockTree<H>,
        to: &H::Hash,
        state: &mut ValidationState,
    ) -> bool {
        match base.get_block_index(to) {
            Some(index) if index.is_valid() => {}
            Some(index) => {
                return state.invalid(
                    format!("{}-bad-chain", H::NAME),
                    format!("block {} is invalid: {:?}", to, index.status()),
                )
            }
            None => {
                return state.invalid(
                    format!("{}-unknown-block", H::NAME),
                    format!("block {} is not in the tree", to),
                )
            }
        }
        move_applied_flags(base, to);
        base.set_active_tip(Some(to));
        true
    }

    fn add_payloads(
        &mut self,
        _base: &mut BaseBlockTree<H>,
        _containing: &H::Hash,
        payloads: Vec<Infallible>,
        _state: &mut ValidationState,
    ) -> bool {
        match payloads.into_iter().next() {
            Some(payload) => match payload {},
            None => true,
        }
    }

    fn remove_payloads(&mut self, _base: &mut BaseBlockTree<H>, _containing: &H::Hash, _ids: &[PayloadId]) {}

    fn restore_payloads(
        &mut self,
        base: &mut BaseBlockTree<H>,
        containing: &H::Hash,
        payloads: Vec<Infallible>,
        state: &mut ValidationState,
    ) -> bool {
        self.add_payloads(base, containing, payloads, state)
    }

    fn payload(&self, _id: &PayloadId) -> Option<&Infallible> {
        None
    }

    fn on_blocks_removed(&mut self, _base: &BaseBlockTree<H>, _removed: &[H::Hash]) {}
}

/// Move [`BlockStatus::APPLIED`] from the blocks between the fork point and the active tip to the
/// blocks between the fork point and `to`.
pub(crate) fn move_applied_flags<H: BlockHeader>(base: &mut BaseBlockTree<H>, to: &H::Hash) {
    let from = base.tip().map(|tip| tip.hash());
    let fork = match from {
        Some(from) => base.find_fork(&from, to),
        None => None,
    };

    if let (Some(from), Some(fork)) = (from, fork) {
        for hash in base.path_up(&fork, &from) {
            if let Some(index) = base.get_block_index_mut(&hash) {
                index.status.remove(BlockStatus::APPLIED);
            }
        }
    }

    let applied_from = match fork {
        Some(fork) => base.path_up(&fork, to),
        None => match base.root().map(|root| root.hash()) {
            Some(root) => {
                let mut path = base.path_up(&root, to);
                path.insert(0, root);
                path
            }
            None => Vec::new(),
        },
    };
    for hash in applied_from {
        if let Some(index) = base.get_block_index_mut(&hash) {
            index.status.insert(BlockStatus::APPLIED);
        }
    }
}

/// Offer every valid tip (or, for an invalid tip, its highest valid ancestor) to `rule`.
///
/// If the active tip itself became invalid, the heaviest candidate is made active first, so that
/// the rule always compares candidates against a valid chain.
pub(crate) fn determine_best_over_tips<H: BlockHeader, R: BestChainRule<H>>(
    base: &mut BaseBlockTree<H>,
    rule: &mut R,
) {
    let mut candidates: Vec<H::Hash> = Vec::new();
    for tip in base.tips() {
        let mut cursor = base.get_block_index(tip);
        while let Some(index) = cursor {
            if index.is_valid() {
                if !candidates.contains(&index.hash()) {
                    candidates.push(index.hash());
                }
                break;
            }
            cursor = index.pprev().and_then(|hash| base.get_block_index(&hash));
        }
    }
    // Heaviest first, then by hash so that the order does not depend on the tip set's iteration.
    candidates.sort_by(|a, b| {
        let work = |hash: &H::Hash| base.get_block_index(hash).map(|index| index.chain_work());
        work(b).cmp(&work(a)).then(a.cmp(b))
    });

    if base.tip().map_or(true, |tip| !tip.is_valid()) {
        for candidate in &candidates {
            let mut state = ValidationState::new();
            if rule.set_state(base, candidate, &mut state) {
                break;
            }
        }
    }
    for candidate in candidates {
        let mut state = ValidationState::new();
        rule.determine_best_chain(base, &candidate, &mut state);
    }
}
