/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! How each kind of payload turns into commands.

use std::{fmt::Debug, iter, sync::Arc};

use crate::{
    block_tree::{best_chain::BestChainRule, BlockTree, VbkForkResolution},
    types::{
        block::{AltBlock, BlockHeader, BtcBlock, VbkBlock},
        data_types::PayloadId,
        payloads::{AltPayload, Vtb},
        validation::ValidationState,
    },
};

use crate::block_tree::best_chain::ChainWorkRule;

use super::command::Command;

/// A payload that can be added to a block of the protected tree `H`, whose protecting tree is a
/// `BlockTree<G, R>`.
pub trait PopPayload<H, G, R>: Clone + Debug
where
    H: BlockHeader,
    G: BlockHeader<Hash = H::ProtectingHash>,
    R: BestChainRule<G>,
{
    fn id(&self) -> PayloadId;

    /// The commands that apply this payload when it is carried by the block `containing`.
    fn to_commands(&self, containing: &H::Hash) -> Vec<Command<H, G, R>>;

    /// Checks that do not need the payload's block to be applied.
    fn check(&self, _containing: &H::Hash, _ing: &BlockTree<G, R>, _state: &mut ValidationState) -> bool {
        true
    }
}

/// A VTB in a VBK block adds its BTC context and block of proof, then its endorsement.
impl PopPayload<VbkBlock, BtcBlock, ChainWorkRule> for Vtb {
    fn id(&self) -> PayloadId {
        Vtb::id(self)
    }

    fn to_commands(&self, _containing: &<VbkBlock as BlockHeader>::Hash) -> Vec<Command<VbkBlock, BtcBlock, ChainWorkRule>> {
        let transaction = &self.transaction;
        transaction
            .block_of_proof_context
            .iter()
            .chain(iter::once(&transaction.block_of_proof))
            .map(|block| Command::AddBlock(Arc::new(block.clone())))
            .chain(iter::once(Command::AddEndorsement(self.endorsement())))
            .collect()
    }

    fn check(
        &self,
        containing: &<VbkBlock as BlockHeader>::Hash,
        ing: &BlockTree<BtcBlock, ChainWorkRule>,
        state: &mut ValidationState,
    ) -> bool {
        if self.containing_block != *containing {
            return state.invalid(
                "bad-containing-block",
                format!("VTB {} names block {} as containing block", Vtb::id(self), self.containing_block),
            );
        }
        let transaction = &self.transaction;
        let first = transaction
            .block_of_proof_context
            .first()
            .unwrap_or(&transaction.block_of_proof);
        if !ing.contains(&first.hash()) && !ing.contains(&first.previous_block) {
            return state.invalid(
                "bad-prev-block",
                format!("first BTC block of VTB {} does not connect to a known block", Vtb::id(self)),
            );
        }
        true
    }
}

/// ALT payloads feed the VBK tree: context blocks are added to it, VTBs are added to its blocks,
/// and ATVs add their block of proof before endorsing.
impl PopPayload<AltBlock, VbkBlock, VbkForkResolution> for AltPayload {
    fn id(&self) -> PayloadId {
        AltPayload::id(self)
    }

    fn to_commands(
        &self,
        containing: &<AltBlock as BlockHeader>::Hash,
    ) -> Vec<Command<AltBlock, VbkBlock, VbkForkResolution>> {
        match self {
            AltPayload::VbkBlock(block) => vec![Command::AddBlock(Arc::new(block.clone()))],
            AltPayload::Vtb(vtb) => vec![Command::AddPayload {
                containing: vtb.containing_block,
                payload: vtb.clone(),
            }],
            AltPayload::Atv(atv) => vec![
                Command::AddBlock(Arc::new(atv.block_of_proof.clone())),
                Command::AddEndorsement(atv.endorsement(*containing)),
            ],
        }
    }
}
