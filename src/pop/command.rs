/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Commands: the reversible state changes a payload makes when its block is applied.
//!
//! Every payload added to a block of a protected tree (`ed`) is turned into one [`CommandGroup`].
//! Executing a command mutates `ed`, the protecting tree (`ing`), or both, and records an
//! [`Undo`] entry. Undoing is never derived from the command list: it is whatever the execution
//! recorded, run in reverse.
//!
//! When a tree is loaded from storage, the protecting tree already holds the blocks and payloads
//! the commands added. [`Command::restore`] then rebuilds the undo entries without adding anything
//! again.

use std::{fmt, sync::Arc};

use crate::{
    block_tree::{best_chain::BestChainRule, BaseBlockTree, BlockTree},
    endorsements,
    params::PopChainParams,
    types::{
        block::BlockHeader,
        data_types::{EndorsementId, PayloadId},
        payloads::Endorsement,
        validation::ValidationState,
    },
};

pub enum Command<H, G, R>
where
    H: BlockHeader,
    G: BlockHeader<Hash = H::ProtectingHash>,
    R: BestChainRule<G>,
{
    /// Add a block to the protecting tree, for example the block of proof of an endorsement.
    AddBlock(Arc<G>),
    /// Add a payload to a block of the protecting tree.
    AddPayload { containing: G::Hash, payload: R::Payload },
    /// Record an endorsement in the protected tree's ledger.
    AddEndorsement(Endorsement<H::Hash, H::ProtectingHash>),
}

impl<H, G, R> Clone for Command<H, G, R>
where
    H: BlockHeader,
    G: BlockHeader<Hash = H::ProtectingHash>,
    R: BestChainRule<G>,
{
    fn clone(&self) -> Self {
        match self {
            Command::AddBlock(block) => Command::AddBlock(block.clone()),
            Command::AddPayload { containing, payload } => Command::AddPayload {
                containing: *containing,
                payload: payload.clone(),
            },
            Command::AddEndorsement(endorsement) => Command::AddEndorsement(endorsement.clone()),
        }
    }
}

impl<H, G, R> fmt::Debug for Command<H, G, R>
where
    H: BlockHeader,
    G: BlockHeader<Hash = H::ProtectingHash>,
    R: BestChainRule<G>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::AddBlock(block) => write!(f, "AddBlock({}:{})", G::NAME, block.hash()),
            Command::AddPayload { containing, payload } => {
                write!(f, "AddPayload({}:{}, {})", G::NAME, containing, R::payload_id(payload))
            }
            Command::AddEndorsement(endorsement) => write!(
                f,
                "AddEndorsement({} of {}:{} in {})",
                endorsement.id,
                H::NAME,
                endorsement.endorsed_hash,
                endorsement.containing_hash
            ),
        }
    }
}

/// Inverse of one executed command.
pub enum Undo<H: BlockHeader, G: BlockHeader> {
    /// Drop the reference an `AddBlock` took. The block is removed once the last reference is
    /// dropped, if a payload inserted it.
    ReleaseBlock { hash: G::Hash },
    /// Remove a payload an `AddPayload` added.
    RemovePayload { containing: G::Hash, id: PayloadId },
    /// Remove an endorsement an `AddEndorsement` recorded.
    RemoveEndorsement { containing: H::Hash, id: EndorsementId },
}

impl<H: BlockHeader, G: BlockHeader> Undo<H, G> {
    pub(crate) fn run<R: BestChainRule<G>>(self, ed: &mut BaseBlockTree<H>, ing: &mut BlockTree<G, R>) {
        match self {
            Undo::ReleaseBlock { hash } => ing.release_context_block(&hash),
            Undo::RemovePayload { containing, id } => ing.remove_payloads(&containing, &[id]),
            Undo::RemoveEndorsement { containing, id } => {
                endorsements::remove_endorsement(ed, &containing, &id)
            }
        }
    }
}

impl<H, G, R> Command<H, G, R>
where
    H: BlockHeader,
    H::Params: PopChainParams,
    G: BlockHeader<Hash = H::ProtectingHash>,
    R: BestChainRule<G>,
{
    /// Execute the command. On success, its inverse is pushed onto `undo`; on failure nothing has
    /// changed and nothing is pushed.
    pub fn execute(
        &self,
        ed: &mut BaseBlockTree<H>,
        ing: &mut BlockTree<G, R>,
        undo: &mut Vec<Undo<H, G>>,
        state: &mut ValidationState,
    ) -> bool {
        match self {
            Command::AddBlock(block) => {
                let hash = block.hash();
                let was_known = ing.contains(&hash);
                if !ing.accept_block(block.clone(), true, state) {
                    return false;
                }
                if let Some(index) = ing.base.get_block_index_mut(&hash) {
                    index.ref_count += 1;
                    if !was_known {
                        index.added_by_payload = true;
                    }
                }
                undo.push(Undo::ReleaseBlock { hash });
                true
            }
            Command::AddPayload { containing, payload } => {
                let id = R::payload_id(payload);
                let present = ing
                    .get_block_index(containing)
                    .map_or(false, |index| index.has_payload(&id));
                if present {
                    return true;
                }
                if !ing.add_payloads(containing, vec![payload.clone()], state) {
                    return false;
                }
                if let Some(index) = ing.base.get_block_index_mut(containing) {
                    index.context_payload_ids.push(id);
                }
                undo.push(Undo::RemovePayload {
                    containing: *containing,
                    id,
                });
                true
            }
            Command::AddEndorsement(endorsement) => {
                if !endorsements::check_and_add_endorsement(ed, endorsement, &ing.base, state) {
                    return false;
                }
                undo.push(Undo::RemoveEndorsement {
                    containing: endorsement.containing_hash,
                    id: endorsement.id,
                });
                true
            }
        }
    }

    /// Rebuild the undo entry of a command that was executed before the trees were saved.
    ///
    /// Blocks and payloads must already be in `ing`; they are referenced, not added. Endorsements
    /// are not stored, so they are recorded again.
    pub fn restore(
        &self,
        ed: &mut BaseBlockTree<H>,
        ing: &mut BlockTree<G, R>,
        undo: &mut Vec<Undo<H, G>>,
        state: &mut ValidationState,
    ) -> bool {
        match self {
            Command::AddBlock(block) => {
                let hash = block.hash();
                match ing.base.get_block_index_mut(&hash) {
                    Some(index) => index.ref_count += 1,
                    None => {
                        return state.invalid(
                            format!("{}-missing-context-block", G::NAME),
                            format!("stored block {} is not in the tree", hash),
                        )
                    }
                }
                undo.push(Undo::ReleaseBlock { hash });
                true
            }
            Command::AddPayload { containing, payload } => {
                let id = R::payload_id(payload);
                let added_here = match ing.get_block_index(containing) {
                    Some(index) if index.has_payload(&id) => index.context_payload_ids().contains(&id),
                    _ => {
                        return state.invalid(
                            format!("{}-missing-context-payload", G::NAME),
                            format!("payload {} is not stored in block {}", id, containing),
                        )
                    }
                };
                if added_here {
                    undo.push(Undo::RemovePayload {
                        containing: *containing,
                        id,
                    });
                }
                true
            }
            Command::AddEndorsement(_) => self.execute(ed, ing, undo, state),
        }
    }
}

/// The commands of one payload.
pub struct CommandGroup<H, G, R>
where
    H: BlockHeader,
    G: BlockHeader<Hash = H::ProtectingHash>,
    R: BestChainRule<G>,
{
    /// Id of the payload the commands were made from.
    pub id: PayloadId,
    pub commands: Vec<Command<H, G, R>>,
    /// Cleared once executing the group failed. An invalid group is never executed again.
    pub valid: bool,
}

impl<H, G, R> CommandGroup<H, G, R>
where
    H: BlockHeader,
    H::Params: PopChainParams,
    G: BlockHeader<Hash = H::ProtectingHash>,
    R: BestChainRule<G>,
{
    pub fn new(id: PayloadId, commands: Vec<Command<H, G, R>>) -> CommandGroup<H, G, R> {
        CommandGroup {
            id,
            commands,
            valid: true,
        }
    }

    /// Execute every command in order. If one fails, the ones already executed are undone and
    /// `None` is returned.
    pub fn execute(
        &self,
        ed: &mut BaseBlockTree<H>,
        ing: &mut BlockTree<G, R>,
        state: &mut ValidationState,
    ) -> Option<Vec<Undo<H, G>>> {
        let mut undo = Vec::with_capacity(self.commands.len());
        for command in &self.commands {
            if !command.execute(ed, ing, &mut undo, state) {
                log::trace!("{} command {:?} of group {} failed: {}", H::NAME, command, self.id, state);
                rollback(undo, ed, ing);
                return None;
            }
        }
        Some(undo)
    }

    /// [Restore](Command::restore) every command in order. Nothing is undone on failure: a failed
    /// restore leaves the trees unusable.
    pub fn restore(
        &self,
        ed: &mut BaseBlockTree<H>,
        ing: &mut BlockTree<G, R>,
        state: &mut ValidationState,
    ) -> Option<Vec<Undo<H, G>>> {
        let mut undo = Vec::with_capacity(self.commands.len());
        for command in &self.commands {
            if !command.restore(ed, ing, &mut undo, state) {
                log::trace!("{} command {:?} of group {} can not be restored: {}", H::NAME, command, self.id, state);
                return None;
            }
        }
        Some(undo)
    }
}

/// Run `undo` in reverse.
pub(crate) fn rollback<H, G, R>(undo: Vec<Undo<H, G>>, ed: &mut BaseBlockTree<H>, ing: &mut BlockTree<G, R>)
where
    H: BlockHeader,
    G: BlockHeader,
    R: BestChainRule<G>,
{
    for entry in undo.into_iter().rev() {
        entry.run(ed, ing);
    }
}
