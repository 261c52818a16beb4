/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The best chain rule of chains protected by Proof-of-Proof.
//!
//! [`PopAwareForkResolution`] owns the protecting tree, the payloads added to the protected tree's
//! blocks (as command groups), and the journal of applied blocks. It decides between the active tip
//! and a candidate in this order:
//! 1. An invalid candidate, the tip itself, a candidate on the active chain, or a candidate not
//!    above a finalized tip never wins.
//! 2. A descendant of the tip wins if its payloads apply.
//! 3. A fork that branches off below a finalized block never wins.
//! 4. If neither side crosses a keystone boundary above the fork point, the chains are equal in
//!    PoP terms.
//! 5. Otherwise the publication views of both chains are scored against each other with the
//!    candidate's payloads applied. The outcome is memoized in an [`FrCache`].
//!
//! Equal PoP scores are decided by chain work.
//!
//! A payload is accepted into a block at most once per chain: the [`PayloadsIndex`] rejects a
//! payload that an ancestor of the block already carries.

use std::{
    collections::{HashMap, HashSet},
    time::SystemTime,
};

use crate::{
    block_tree::{
        base::BaseBlockTree, best_chain, best_chain::BestChainRule, block_index::BlockStatus, chain::Chain,
        BlockTree,
    },
    config::Configuration,
    events::{AddPayloadsEvent, Event, ForkResolutionEvent, RemovePayloadsEvent},
    keystone,
    params::PopChainParams,
    types::{
        block::BlockHeader,
        data_types::{HashBytes, PayloadId},
        validation::ValidationState,
    },
};

use super::{
    command::{rollback, CommandGroup, Undo},
    fork_resolution::{compare_pop_score, PublicationView},
    fr_cache::{CompareResult, FrCache},
    payloads::PopPayload,
    payloads_index::PayloadsIndex,
    state_machine::{CommandGroups, Journal, PopStateMachine},
};

/// Fork resolution of a tree of `H` blocks, protected by a `BlockTree<G, R>`, whose blocks carry
/// payloads of type `P`.
pub struct PopAwareForkResolution<H, G, R, P>
where
    H: BlockHeader,
    G: BlockHeader<Hash = H::ProtectingHash>,
    R: BestChainRule<G>,
{
    ing: BlockTree<G, R>,
    fr_cache: FrCache<H>,
    payloads: HashMap<PayloadId, P>,
    payloads_index: PayloadsIndex<H>,
    groups: CommandGroups<H, G, R>,
    journal: Journal<H, G>,
}

impl<H, G, R, P> PopAwareForkResolution<H, G, R, P>
where
    H: BlockHeader,
    G: BlockHeader<Hash = H::ProtectingHash>,
    R: BestChainRule<G>,
{
    pub fn new(ing: BlockTree<G, R>) -> PopAwareForkResolution<H, G, R, P> {
        PopAwareForkResolution {
            ing,
            fr_cache: FrCache::new(),
            payloads: HashMap::new(),
            payloads_index: PayloadsIndex::new(),
            groups: HashMap::new(),
            journal: HashMap::new(),
        }
    }

    pub fn protecting_tree(&self) -> &BlockTree<G, R> {
        &self.ing
    }

    pub fn fr_cache(&self) -> &FrCache<H> {
        &self.fr_cache
    }

    pub fn payloads_index(&self) -> &PayloadsIndex<H> {
        &self.payloads_index
    }

    /// The command groups of the block `hash`, one per payload, in the order they were added.
    pub fn command_groups(&self, hash: &H::Hash) -> &[CommandGroup<H, G, R>] {
        self.groups.get(hash).map_or(&[], Vec::as_slice)
    }

    /// Whether the block `hash` has undo entries recorded, that is, whether its command groups are
    /// currently executed.
    pub fn is_journaled(&self, hash: &H::Hash) -> bool {
        self.journal.contains_key(hash)
    }
}

/// Protected block trees.
impl<H, G, R, P> BlockTree<H, PopAwareForkResolution<H, G, R, P>>
where
    H: BlockHeader,
    H::Params: PopChainParams,
    G: BlockHeader<Hash = H::ProtectingHash>,
    R: BestChainRule<G>,
    P: PopPayload<H, G, R>,
{
    /// Create an empty tree protected by `ing`.
    pub fn with_protecting_tree(params: H::Params, ing: BlockTree<G, R>, config: Configuration) -> Self {
        BlockTree::with_rule(params, PopAwareForkResolution::new(ing), config)
    }

    pub fn protecting_tree(&self) -> &BlockTree<G, R> {
        &self.rule.ing
    }

    /// Mutable access to the protecting tree, for example to accept protecting blocks that are not
    /// carried by any payload.
    pub fn protecting_tree_mut(&mut self) -> &mut BlockTree<G, R> {
        &mut self.rule.ing
    }

    pub fn payload(&self, id: &PayloadId) -> Option<&P> {
        self.rule.payloads.get(id)
    }

    /// Apply the candidate's payloads on top of the fork point and compute its PoP score against
    /// the active chain, then unapply them again. Positive if the active chain is better.
    ///
    /// Returns `None` if the candidate does not share a fork point with the active tip or its
    /// payloads do not apply.
    pub fn pop_score(&mut self, candidate: &H::Hash) -> Option<i64> {
        let tip = self.base.tip()?.hash();
        let fork = self.base.find_fork(&tip, candidate)?;
        let mut state = ValidationState::new();
        self.rule.score_fork(&mut self.base, &tip, &fork, candidate, &mut state)
    }
}

impl<H, G, R, P> BestChainRule<H> for PopAwareForkResolution<H, G, R, P>
where
    H: BlockHeader,
    H::Params: PopChainParams,
    G: BlockHeader<Hash = H::ProtectingHash>,
    R: BestChainRule<G>,
    P: PopPayload<H, G, R>,
{
    type Payload = P;

    fn payload_id(payload: &P) -> PayloadId {
        payload.id()
    }

    fn determine_best_chain(
        &mut self,
        base: &mut BaseBlockTree<H>,
        candidate: &H::Hash,
        state: &mut ValidationState,
    ) {
        let tip = match base.tip() {
            Some(tip) => tip.hash(),
            None => {
                self.set_state(base, candidate, state);
                return;
            }
        };
        if tip == *candidate {
            return;
        }

        let (score, outcome) = self.compare_to_tip(base, &tip, candidate, state);
        let work = |hash: &H::Hash| base.get_block_index(hash).map(|index| index.chain_work());
        let candidate_wins = score < 0 || (score == 0 && work(candidate) > work(&tip));
        log::debug!(
            "{} fork resolution between tip {} and {}: score {}, {:?}",
            H::NAME,
            tip,
            candidate,
            score,
            outcome
        );
        Event::publish(
            base.config(),
            Event::ForkResolution(ForkResolutionEvent {
                timestamp: SystemTime::now(),
                chain: H::NAME,
                tip: tip.as_bytes().to_vec(),
                candidate: candidate.as_bytes().to_vec(),
                outcome,
            }),
        );

        if candidate_wins {
            self.set_state(base, candidate, state);
        }
    }

    fn set_state(
        &mut self,
        base: &mut BaseBlockTree<H>,
        to: &H::Hash,
        state: &mut ValidationState,
    ) -> bool {
        if base.tip().map(|tip| tip.hash()) == Some(*to) {
            return true;
        }
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

        let protecting_tip = self.protecting_tip();
        let moved = PopStateMachine::new(base, &mut self.ing, &mut self.groups, &mut self.journal)
            .set_state(to, state);
        if !moved {
            self.restore_protecting_tip(protecting_tip);
        }
        moved
    }

    fn add_payloads(
        &mut self,
        base: &mut BaseBlockTree<H>,
        containing: &H::Hash,
        payloads: Vec<P>,
        state: &mut ValidationState,
    ) -> bool {
        if payloads.is_empty() {
            return true;
        }
        let existing: HashSet<PayloadId> = match base.get_block_index(containing) {
            None => {
                return state.invalid(
                    format!("{}-bad-containing", H::NAME),
                    format!("can not find the block {} to add payloads to", containing),
                )
            }
            Some(index) if !index.is_valid() => {
                return state.invalid(
                    format!("{}-bad-chain", H::NAME),
                    format!("block {} is invalid: {:?}", containing, index.status()),
                )
            }
            Some(index) => index.payload_ids().iter().copied().collect(),
        };

        // Payloads already carried by the block, or repeated in `payloads`, are skipped.
        let mut seen = existing;
        let payloads: Vec<P> = payloads
            .into_iter()
            .filter(|payload| seen.insert(payload.id()))
            .collect();
        if payloads.is_empty() {
            return true;
        }

        for payload in &payloads {
            if !payload.check(containing, &self.ing, state) {
                return state.wrap(format!("{}-invalid-payloads", H::NAME));
            }
            if let Some(carrier) = self.payloads_index.find_on_chain(&payload.id(), containing, base) {
                state.invalid(
                    "payload-duplicate",
                    format!("payload {} is already in block {}", payload.id(), carrier),
                );
                return state.wrap(format!("{}-invalid-payloads", H::NAME));
            }
        }

        if !self.set_state(base, containing, state) {
            best_chain::determine_best_over_tips(base, self);
            return state.wrap(format!("{}-invalid-containing-block", H::NAME));
        }

        let mut new_groups = Vec::with_capacity(payloads.len());
        let mut executed: Vec<Vec<Undo<H, G>>> = Vec::with_capacity(payloads.len());
        for payload in &payloads {
            let group = CommandGroup::new(payload.id(), payload.to_commands(containing));
            match group.execute(base, &mut self.ing, state) {
                Some(undo) => executed.push(undo),
                None => {
                    for undo in executed.into_iter().rev() {
                        rollback(undo, base, &mut self.ing);
                    }
                    best_chain::determine_best_over_tips(base, self);
                    return state.wrap(format!("{}-invalid-payloads", H::NAME));
                }
            }
            new_groups.push(group);
        }

        let ids: Vec<PayloadId> = payloads.iter().map(|payload| payload.id()).collect();
        self.groups.entry(*containing).or_default().extend(new_groups);
        self.journal.entry(*containing).or_default().extend(executed);
        if let Some(index) = base.get_block_index_mut(containing) {
            index.payload_ids.extend(ids.iter().copied());
        }
        for payload in payloads {
            self.payloads_index.add(payload.id(), *containing);
            self.payloads.insert(payload.id(), payload);
        }
        self.fr_cache.evict_subtree(containing, base.blocks());

        Event::publish(
            base.config(),
            Event::AddPayloads(AddPayloadsEvent {
                timestamp: SystemTime::now(),
                chain: H::NAME,
                block: containing.as_bytes().to_vec(),
                payloads: ids,
            }),
        );

        best_chain::determine_best_over_tips(base, self);
        true
    }

    fn remove_payloads(&mut self, base: &mut BaseBlockTree<H>, containing: &H::Hash, ids: &[PayloadId]) {
        if ids.is_empty() {
            return;
        }
        let (applied, pprev) = match base.get_block_index(containing) {
            Some(index) => (index.is_applied(), index.pprev()),
            None => return,
        };
        if applied {
            match pprev {
                Some(pprev) => {
                    let mut state = ValidationState::new();
                    let moved = self.set_state(base, &pprev, &mut state);
                    assert!(moved, "moving back to an applied ancestor can not fail: {}", state);
                }
                None => {
                    log::warn!("{} can not remove payloads from the applied root {}", H::NAME, containing);
                    return;
                }
            }
        }

        if let Some(groups) = self.groups.get_mut(containing) {
            groups.retain(|group| !ids.contains(&group.id));
            if groups.is_empty() {
                self.groups.remove(containing);
            }
        }
        if let Some(index) = base.get_block_index_mut(containing) {
            index.payload_ids.retain(|id| !ids.contains(id));
            index.context_payload_ids.retain(|id| !ids.contains(id));
        }
        self.payloads_index.remove_block(containing, ids);
        self.prune_payloads(ids.iter().copied());
        if base
            .get_block_index(containing)
            .map_or(false, |index| index.status().contains(BlockStatus::FAILED_POP))
        {
            base.mark_revalidated(containing, BlockStatus::FAILED_POP);
        }
        self.fr_cache.evict_subtree(containing, base.blocks());

        Event::publish(
            base.config(),
            Event::RemovePayloads(RemovePayloadsEvent {
                timestamp: SystemTime::now(),
                chain: H::NAME,
                block: containing.as_bytes().to_vec(),
                payloads: ids.to_vec(),
            }),
        );

        best_chain::determine_best_over_tips(base, self);
    }

    fn restore_payloads(
        &mut self,
        base: &mut BaseBlockTree<H>,
        containing: &H::Hash,
        payloads: Vec<P>,
        state: &mut ValidationState,
    ) -> bool {
        let index = match base.get_block_index_mut(containing) {
            Some(index) => index,
            None => {
                return state.invalid(
                    format!("{}-bad-containing", H::NAME),
                    format!("can not find the block {} to restore payloads to", containing),
                )
            }
        };
        if index.is_applied() && !payloads.is_empty() {
            return state.invalid(
                format!("{}-restore-applied", H::NAME),
                format!("block {} is applied", containing),
            );
        }
        for payload in payloads {
            let id = payload.id();
            if index.payload_ids.contains(&id) {
                continue;
            }
            index.payload_ids.push(id);
            self.payloads_index.add(id, *containing);
            self.groups
                .entry(*containing)
                .or_default()
                .push(CommandGroup::new(id, payload.to_commands(containing)));
            self.payloads.insert(id, payload);
        }
        true
    }

    fn payload(&self, id: &PayloadId) -> Option<&P> {
        self.payloads.get(id)
    }

    fn on_blocks_removed(&mut self, base: &BaseBlockTree<H>, removed: &[H::Hash]) {
        let mut orphaned = Vec::new();
        for hash in removed {
            if let Some(groups) = self.groups.remove(hash) {
                let ids: Vec<PayloadId> = groups.into_iter().map(|group| group.id).collect();
                self.payloads_index.remove_block(hash, &ids);
                orphaned.extend(ids);
            }
            self.journal.remove(hash);
            self.fr_cache.evict(hash);
        }
        self.prune_payloads(orphaned);
        if let Some(root) = base.root() {
            self.fr_cache.set_min_height(root.height());
        }
    }

    fn restore_state(
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
        PopStateMachine::new(base, &mut self.ing, &mut self.groups, &mut self.journal).restore(to, state)
    }

    fn min_blocks_behind_final(&self, base: &BaseBlockTree<H>) -> u32 {
        base.params().pop().endorsement_settlement_interval
    }
}

/// Helpers of fork resolution.
impl<H, G, R, P> PopAwareForkResolution<H, G, R, P>
where
    H: BlockHeader,
    H::Params: PopChainParams,
    G: BlockHeader<Hash = H::ProtectingHash>,
    R: BestChainRule<G>,
    P: PopPayload<H, G, R>,
{
    // Positive if `tip` stays, negative if `candidate` is better, zero if they are equal in PoP
    // terms.
    fn compare_to_tip(
        &mut self,
        base: &mut BaseBlockTree<H>,
        tip: &H::Hash,
        candidate: &H::Hash,
        state: &mut ValidationState,
    ) -> (i64, CompareResult) {
        let tip_stays = (1, CompareResult::ABetter);

        let candidate_height = match base.get_block_index(candidate) {
            Some(index) if index.is_valid() => index.height(),
            _ => return tip_stays,
        };
        let (tip_height, tip_finalized) = match base.get_block_index(tip) {
            Some(index) => (index.height(), index.is_finalized()),
            None => return tip_stays,
        };
        if tip_finalized && candidate_height <= tip_height {
            return tip_stays;
        }
        if base.is_on_active_chain(candidate) {
            return tip_stays;
        }
        if base.is_ancestor(tip, candidate) {
            return if self.set_state(base, candidate, state) {
                (-1, CompareResult::BBetter)
            } else {
                tip_stays
            };
        }

        let fork = match base.find_fork(tip, candidate) {
            Some(fork) => fork,
            None => return tip_stays,
        };
        let fork_height = match base.get_block_index(&fork) {
            Some(index) => index.height(),
            None => return tip_stays,
        };
        let next_is_final = base
            .get_best_chain()
            .get(fork_height + 1)
            .and_then(|hash| base.get_block_index(&hash))
            .map_or(false, |index| index.is_finalized());
        if next_is_final {
            return tip_stays;
        }

        let keystone_interval = base.params().pop().keystone_interval;
        let crosses = |height: u32| {
            keystone::is_crossed_keystone_boundary(fork_height.int(), height, keystone_interval)
        };
        if !crosses(tip_height.int()) && !crosses(candidate_height.int()) {
            return (0, CompareResult::Equal);
        }

        let cached = self.fr_cache.compare(tip, candidate, base.blocks());
        match cached {
            CompareResult::ABetter | CompareResult::ATransitivelyBetter => return (1, cached),
            CompareResult::BBetter | CompareResult::BTransitivelyBetter => return (-1, cached),
            CompareResult::Equal => return (0, cached),
            CompareResult::Unknown => {}
        }

        match self.score_fork(base, tip, &fork, candidate, state) {
            Some(score) => {
                self.fr_cache.store(tip, candidate, score);
                let outcome = match score.signum() {
                    1 => CompareResult::ABetter,
                    -1 => CompareResult::BBetter,
                    _ => CompareResult::Equal,
                };
                (score, outcome)
            }
            None => tip_stays,
        }
    }

    // Score the active chain against the chain of `candidate`, which branches off at `fork`. The
    // candidate's blocks are applied for the duration of the call; the protected tree's active
    // chain, and the protecting tree's active tip, are left as they were.
    pub(crate) fn score_fork(
        &mut self,
        base: &mut BaseBlockTree<H>,
        tip: &H::Hash,
        fork: &H::Hash,
        candidate: &H::Hash,
        state: &mut ValidationState,
    ) -> Option<i64> {
        let fork_height = base.get_block_index(fork)?.height();
        let protecting_tip = self.protecting_tip();
        let applied = PopStateMachine::new(base, &mut self.ing, &mut self.groups, &mut self.journal)
            .apply(fork, candidate, state);
        if !applied {
            self.restore_protecting_tip(protecting_tip);
            return None;
        }

        let chain_a = Chain::from_tip(fork_height, tip, base.blocks());
        let chain_b = Chain::from_tip(fork_height, candidate, base.blocks());
        let score = {
            let pop = base.params().pop();
            let view_a = PublicationView::new(base, &chain_a, self.ing.base(), pop);
            let view_b = PublicationView::new(base, &chain_b, self.ing.base(), pop);
            compare_pop_score(&view_a, &view_b, pop)
        };

        PopStateMachine::new(base, &mut self.ing, &mut self.groups, &mut self.journal)
            .unapply(candidate, fork);
        self.restore_protecting_tip(protecting_tip);
        Some(score)
    }

    fn protecting_tip(&self) -> Option<G::Hash> {
        self.ing.tip().map(|tip| tip.hash())
    }

    // Executing and undoing commands may leave the protecting tree on another chain than before.
    fn restore_protecting_tip(&mut self, protecting_tip: Option<G::Hash>) {
        let protecting_tip = match protecting_tip {
            Some(hash) if self.ing.contains(&hash) => hash,
            _ => return,
        };
        if self.protecting_tip() == Some(protecting_tip) {
            return;
        }
        let mut state = ValidationState::new();
        if !self.ing.set_state(&protecting_tip, &mut state) {
            log::warn!(
                "{} could not restore its active tip {}: {}",
                G::NAME,
                protecting_tip,
                state
            );
            self.ing.determine_best_over_tips();
        }
    }

    // Drop stored payloads that no block carries anymore.
    fn prune_payloads(&mut self, ids: impl IntoIterator<Item = PayloadId>) {
        for id in ids {
            let carried = self
                .groups
                .values()
                .any(|groups| groups.iter().any(|group| group.id == id));
            if !carried {
                self.payloads.remove(&id);
            }
        }
    }
}
