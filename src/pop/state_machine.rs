/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Moves a protected tree between states by applying and unapplying blocks' command groups.
//!
//! A block is *applied* when every one of its command groups has been executed. The undo entries
//! of an applied block are kept in a journal; unapplying the block runs them in reverse, so
//! unapplying is always the exact inverse of applying.
//!
//! [`PopStateMachine::apply`] is all-or-nothing over a range of blocks: if a block fails, the block
//! is flagged [`FAILED_POP`](BlockStatus::FAILED_POP) and every block applied by the call is
//! unapplied again.

use std::{collections::HashMap, time::SystemTime};

use crate::{
    block_tree::{best_chain::BestChainRule, block_index::BlockStatus, BaseBlockTree, BlockTree},
    events::{ApplyBlockEvent, Event, UnapplyBlockEvent},
    params::PopChainParams,
    types::{
        block::BlockHeader,
        data_types::HashBytes,
        validation::ValidationState,
    },
};

use super::command::{rollback, CommandGroup, Undo};

pub(crate) type CommandGroups<H, G, R> = HashMap<<H as BlockHeader>::Hash, Vec<CommandGroup<H, G, R>>>;

pub(crate) type Journal<H, G> = HashMap<<H as BlockHeader>::Hash, Vec<Vec<Undo<H, G>>>>;

pub struct PopStateMachine<'a, H, G, R>
where
    H: BlockHeader,
    G: BlockHeader<Hash = H::ProtectingHash>,
    R: BestChainRule<G>,
{
    ed: &'a mut BaseBlockTree<H>,
    ing: &'a mut BlockTree<G, R>,
    groups: &'a mut CommandGroups<H, G, R>,
    journal: &'a mut Journal<H, G>,
}

impl<'a, H, G, R> PopStateMachine<'a, H, G, R>
where
    H: BlockHeader,
    H::Params: PopChainParams,
    G: BlockHeader<Hash = H::ProtectingHash>,
    R: BestChainRule<G>,
{
    pub(crate) fn new(
        ed: &'a mut BaseBlockTree<H>,
        ing: &'a mut BlockTree<G, R>,
        groups: &'a mut CommandGroups<H, G, R>,
        journal: &'a mut Journal<H, G>,
    ) -> PopStateMachine<'a, H, G, R> {
        PopStateMachine {
            ed,
            ing,
            groups,
            journal,
        }
    }

    /// Execute every command group of the block `hash`, in order.
    ///
    /// If a group fails, the groups already executed are undone, the failing group is marked
    /// invalid, and the block is flagged `FAILED_POP`.
    pub fn apply_block(&mut self, hash: &H::Hash, state: &mut ValidationState) -> bool {
        let mut executed: Vec<Vec<Undo<H, G>>> = Vec::new();
        let mut failed = false;

        if let Some(groups) = self.groups.get_mut(hash) {
            for group in groups.iter_mut() {
                if !group.valid {
                    state.invalid(
                        "invalid-command-group",
                        format!("payload {} is known to be invalid", group.id),
                    );
                    failed = true;
                    break;
                }
                match group.execute(self.ed, self.ing, state) {
                    Some(undo) => executed.push(undo),
                    None => {
                        group.valid = false;
                        failed = true;
                        break;
                    }
                }
            }
        }

        if failed {
            for undo in executed.into_iter().rev() {
                rollback(undo, self.ed, self.ing);
            }
            self.ed.mark_invalid(hash, BlockStatus::FAILED_POP);
            return state.wrap(format!("{}-bad-command", H::NAME));
        }

        let command_groups = executed.len();
        self.journal.insert(*hash, executed);
        if let Some(index) = self.ed.get_block_index_mut(hash) {
            index.status.insert(BlockStatus::APPLIED);
            Event::publish(
                self.ed.config(),
                Event::ApplyBlock(ApplyBlockEvent {
                    timestamp: SystemTime::now(),
                    chain: H::NAME,
                    block: hash.as_bytes().to_vec(),
                    height: self.height_of(hash),
                    command_groups,
                }),
            );
        }
        true
    }

    /// Undo every command group of the applied block `hash`, in reverse.
    pub fn unapply_block(&mut self, hash: &H::Hash) {
        if let Some(executed) = self.journal.remove(hash) {
            for undo in executed.into_iter().rev() {
                rollback(undo, self.ed, self.ing);
            }
        }
        if let Some(index) = self.ed.get_block_index_mut(hash) {
            index.status.remove(BlockStatus::APPLIED);
            Event::publish(
                self.ed.config(),
                Event::UnapplyBlock(UnapplyBlockEvent {
                    timestamp: SystemTime::now(),
                    chain: H::NAME,
                    block: hash.as_bytes().to_vec(),
                    height: self.height_of(hash),
                }),
            );
        }
    }

    /// Apply the blocks above `from` up to and including `to`, lowest first. `from` must be an
    /// ancestor of `to`.
    ///
    /// Either every block is applied, or none is.
    pub fn apply(&mut self, from: &H::Hash, to: &H::Hash, state: &mut ValidationState) -> bool {
        let path = self.ed.path_up(from, to);
        for (applied, hash) in path.iter().enumerate() {
            if !self.apply_block(hash, state) {
                for done in path[..applied].iter().rev() {
                    self.unapply_block(done);
                }
                return false;
            }
        }
        true
    }

    /// Unapply the blocks from `from` down to, but excluding, `to`, highest first. `to` must be an
    /// ancestor of `from`.
    pub fn unapply(&mut self, from: &H::Hash, to: &H::Hash) {
        for hash in self.ed.path_up(to, from).iter().rev() {
            self.unapply_block(hash);
        }
    }

    /// Move the protected tree's active chain to `to`, unapplying down to the fork point and
    /// applying up to `to`.
    ///
    /// If applying fails, the old active chain is applied again and `false` is returned.
    pub fn set_state(&mut self, to: &H::Hash, state: &mut ValidationState) -> bool {
        let from = match self.ed.tip() {
            Some(tip) => tip.hash(),
            None => {
                return state.invalid(
                    format!("{}-not-bootstrapped", H::NAME),
                    "the tree has no active chain",
                )
            }
        };
        if from == *to {
            return true;
        }
        let fork = self
            .ed
            .find_fork(&from, to)
            .expect("every two blocks of a block tree share an ancestor");

        self.unapply(&from, &fork);
        if !self.apply(&fork, to, state) {
            let mut reapply = ValidationState::new();
            let restored = self.apply(&fork, &from, &mut reapply);
            assert!(
                restored,
                "the former active chain of {} must apply again: {}",
                H::NAME,
                reapply
            );
            return false;
        }
        self.ed.set_active_tip(Some(to));
        true
    }

    /// Rebuild the journal of every block from the active tip up to `to` from what the protecting
    /// tree already holds, and make `to` the active tip. Used right after loading, when the active
    /// tip is the root.
    ///
    /// On failure the journal is left partially rebuilt and the trees must be discarded.
    pub fn restore(&mut self, to: &H::Hash, state: &mut ValidationState) -> bool {
        let from = match self.ed.tip() {
            Some(tip) => tip.hash(),
            None => {
                return state.invalid(
                    format!("{}-not-bootstrapped", H::NAME),
                    "the tree has no active chain",
                )
            }
        };
        if !self.ed.is_ancestor(&from, to) {
            return state.invalid(
                format!("{}-bad-chain", H::NAME),
                format!("block {} does not descend from the active tip {}", to, from),
            );
        }

        for hash in self.ed.path_up(&from, to) {
            let mut executed = Vec::new();
            for group in self.groups.get(&hash).map_or(&[][..], Vec::as_slice) {
                match group.restore(self.ed, self.ing, state) {
                    Some(undo) => executed.push(undo),
                    None => return state.wrap(format!("{}-bad-stored-block", H::NAME)),
                }
            }
            self.journal.insert(hash, executed);
            if let Some(index) = self.ed.get_block_index_mut(&hash) {
                index.status.insert(BlockStatus::APPLIED);
            }
        }
        self.ed.set_active_tip(Some(to));
        true
    }

    fn height_of(&self, hash: &H::Hash) -> crate::types::data_types::BlockHeight {
        self.ed
            .get_block_index(hash)
            .map(|index| index.height())
            .unwrap_or_default()
    }
}
