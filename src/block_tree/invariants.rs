/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Predicates over the whole state of a block tree.
//!
//! Every top-level operation of a [`BlockTree`] takes a tree that satisfies these invariants to a
//! tree that satisfies them again. The checks walk every block, so they are meant for tests and
//! debugging rather than for the hot path.
//!
//! # Invariants
//!
//! |Check|Invariant|
//! |---|---|
//! |[`check_links`]|`pprev` and `pnext` mirror each other, and the tip set is exactly the set of leaves.|
//! |[`check_heights`]|Every block is one higher than its parent.|
//! |[`check_chain_work`]|Every block has strictly more accumulated work than its parent.|
//! |[`check_active_tip`]|The active tip, if any, is valid, and so is every block below it.|
//! |[`check_applied`]|A block is flagged applied if and only if it is on the active chain.|
//! |[`check_endorsements`]|Every `endorsed_by` entry names an endorsement its containing block owns.|
//! |[`check_journal`]|In a PoP-protected tree, a block above the root has undo entries if and only if it is applied.|

use std::fmt::{self, Display, Formatter};

use crate::{
    params::PopChainParams,
    pop::{PopAwareForkResolution, PopPayload},
    types::{block::BlockHeader, data_types::BlockHeight},
};

use super::{base::BaseBlockTree, best_chain::BestChainRule, BlockTree};

/// A broken invariant. Blocks are named by the `Display` of their hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    BrokenLink { block: String },
    TipsMismatch { block: String },
    HeightGap { block: String, height: BlockHeight, parent_height: BlockHeight },
    ChainWorkNotIncreasing { block: String },
    InvalidActiveChain { block: String },
    AppliedOffActiveChain { block: String },
    NotAppliedOnActiveChain { block: String },
    DanglingEndorsement { block: String },
    JournalMismatch { block: String, applied: bool },
}

impl Display for InvariantViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            InvariantViolation::BrokenLink { block } => {
                write!(f, "block {} is not linked to its parent both ways", block)
            }
            InvariantViolation::TipsMismatch { block } => {
                write!(f, "block {} is a leaf but not a tip, or a tip but not a leaf", block)
            }
            InvariantViolation::HeightGap {
                block,
                height,
                parent_height,
            } => write!(f, "block {} is at height {} above a parent at {}", block, height, parent_height),
            InvariantViolation::ChainWorkNotIncreasing { block } => {
                write!(f, "block {} does not add work to its parent", block)
            }
            InvariantViolation::InvalidActiveChain { block } => {
                write!(f, "block {} is on the active chain but invalid", block)
            }
            InvariantViolation::AppliedOffActiveChain { block } => {
                write!(f, "block {} is applied but not on the active chain", block)
            }
            InvariantViolation::NotAppliedOnActiveChain { block } => {
                write!(f, "block {} is on the active chain but not applied", block)
            }
            InvariantViolation::DanglingEndorsement { block } => {
                write!(f, "block {} is endorsed by an endorsement nobody owns", block)
            }
            InvariantViolation::JournalMismatch { block, applied } => {
                write!(f, "block {} has applied = {} but disagrees with its journal", block, applied)
            }
        }
    }
}

pub fn check_links<H: BlockHeader>(base: &BaseBlockTree<H>) -> Result<(), InvariantViolation> {
    for (hash, index) in base.blocks() {
        if let Some(pprev) = index.pprev() {
            let linked = base
                .get_block_index(&pprev)
                .map_or(false, |parent| parent.pnext().contains(hash));
            if !linked {
                return Err(InvariantViolation::BrokenLink { block: hash.to_string() });
            }
        }
        for child in index.pnext() {
            if base.get_block_index(child).and_then(|child| child.pprev()) != Some(*hash) {
                return Err(InvariantViolation::BrokenLink { block: child.to_string() });
            }
        }
        if index.pnext().is_empty() != base.tips().contains(hash) {
            return Err(InvariantViolation::TipsMismatch { block: hash.to_string() });
        }
    }
    Ok(())
}

pub fn check_heights<H: BlockHeader>(base: &BaseBlockTree<H>) -> Result<(), InvariantViolation> {
    for (hash, index) in base.blocks() {
        if let Some(parent) = index.pprev().and_then(|pprev| base.get_block_index(&pprev)) {
            if parent.height() + 1 != index.height() {
                return Err(InvariantViolation::HeightGap {
                    block: hash.to_string(),
                    height: index.height(),
                    parent_height: parent.height(),
                });
            }
        }
    }
    Ok(())
}

pub fn check_chain_work<H: BlockHeader>(base: &BaseBlockTree<H>) -> Result<(), InvariantViolation> {
    for (hash, index) in base.blocks() {
        if let Some(parent) = index.pprev().and_then(|pprev| base.get_block_index(&pprev)) {
            if index.chain_work() <= parent.chain_work() {
                return Err(InvariantViolation::ChainWorkNotIncreasing { block: hash.to_string() });
            }
        }
    }
    Ok(())
}

pub fn check_active_tip<H: BlockHeader>(base: &BaseBlockTree<H>) -> Result<(), InvariantViolation> {
    for hash in base.get_best_chain().iter() {
        if !base.get_block_index(&hash).map_or(false, |index| index.is_valid()) {
            return Err(InvariantViolation::InvalidActiveChain { block: hash.to_string() });
        }
    }
    Ok(())
}

pub fn check_applied<H: BlockHeader>(base: &BaseBlockTree<H>) -> Result<(), InvariantViolation> {
    for (hash, index) in base.blocks() {
        let active = base.is_on_active_chain(hash);
        if index.is_applied() && !active {
            return Err(InvariantViolation::AppliedOffActiveChain { block: hash.to_string() });
        }
        if !index.is_applied() && active {
            return Err(InvariantViolation::NotAppliedOnActiveChain { block: hash.to_string() });
        }
    }
    Ok(())
}

pub fn check_endorsements<H: BlockHeader>(base: &BaseBlockTree<H>) -> Result<(), InvariantViolation> {
    for (hash, index) in base.blocks() {
        for key in index.endorsed_by() {
            let owned = base
                .get_block_index(&key.containing_hash)
                .and_then(|containing| containing.containing_endorsements().get(&key.id))
                .map_or(false, |endorsement| endorsement.endorsed_hash == *hash);
            if !owned {
                return Err(InvariantViolation::DanglingEndorsement { block: hash.to_string() });
            }
        }
    }
    Ok(())
}

/// Run every check that applies to any block tree.
pub fn check_all<H: BlockHeader, R: BestChainRule<H>>(tree: &BlockTree<H, R>) -> Result<(), InvariantViolation> {
    let base = tree.base();
    check_links(base)?;
    check_heights(base)?;
    check_chain_work(base)?;
    check_active_tip(base)?;
    check_applied(base)?;
    check_endorsements(base)
}

/// Blocks that were bootstrapped and the root are applied without undo entries; every other block
/// has undo entries exactly while it is applied.
pub fn check_journal<H, G, R, P>(
    tree: &BlockTree<H, PopAwareForkResolution<H, G, R, P>>,
) -> Result<(), InvariantViolation>
where
    H: BlockHeader,
    H::Params: PopChainParams,
    G: BlockHeader<Hash = H::ProtectingHash>,
    R: BestChainRule<G>,
    P: PopPayload<H, G, R>,
{
    let root = tree.root().map(|root| root.hash());
    for (hash, index) in tree.blocks() {
        if Some(*hash) == root || index.is_bootstrap() {
            continue;
        }
        if index.is_applied() != tree.rule().is_journaled(hash) {
            return Err(InvariantViolation::JournalMismatch {
                block: hash.to_string(),
                applied: index.is_applied(),
            });
        }
    }
    Ok(())
}
