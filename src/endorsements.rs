/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The endorsement ledger.
//!
//! Every block of a protected tree records two things:
//! - `containing_endorsements`: the endorsements the block itself carries, keyed by id. The block
//!   owns these.
//! - `endorsed_by`: the (containing block, endorsement id) pairs of endorsements of this block
//!   carried by its descendants.
//!
//! An endorsement is only accepted into a block if the block it endorses is an ancestor at most
//! `endorsement_settlement_interval` blocks below it, if its block of proof is known to the
//! protecting tree, and if no block in that same window already carries it.

use crate::{
    block_tree::BaseBlockTree,
    params::PopChainParams,
    types::{
        block::BlockHeader,
        data_types::EndorsementId,
        payloads::{Endorsement, EndorsementKey},
        validation::ValidationState,
    },
};

use crate::block_tree::chain::Chain;

/// Validate `endorsement` against the protected tree `ed` and the protecting tree `ing`, and on
/// success record it in the ledger.
///
/// The checks run in this order, failing with the reason in brackets:
/// 1. The endorsed height is within the settlement interval below the containing block (`expired`).
/// 2. The containing block's chain has a block at the endorsed height (`no-endorsed-block`), and
///    it is the endorsed block (`block-differs`).
/// 3. The protecting tree knows the block of proof (`block-of-proof-not-found`).
/// 4. No block in the settlement window already carries an endorsement with the same id
///    (`duplicate`).
pub fn check_and_add_endorsement<H, G>(
    ed: &mut BaseBlockTree<H>,
    endorsement: &Endorsement<H::Hash, H::ProtectingHash>,
    ing: &BaseBlockTree<G>,
    state: &mut ValidationState,
) -> bool
where
    H: BlockHeader,
    H::Params: PopChainParams,
    G: BlockHeader<Hash = H::ProtectingHash>,
{
    let window = ed.params().pop().endorsement_settlement_interval;
    let containing = match ed.get_block_index(&endorsement.containing_hash) {
        Some(containing) => containing,
        None => {
            return state.invalid(
                "no-containing-block",
                format!("containing block {} is not in the tree", endorsement.containing_hash),
            )
        }
    };

    let distance = containing.height().int() as i64 - endorsement.endorsed_height.int() as i64;
    if distance > window as i64 {
        return state.invalid(
            "expired",
            format!(
                "endorsement of height {} in block at height {} is older than the settlement interval {}",
                endorsement.endorsed_height,
                containing.height(),
                window
            ),
        );
    }

    let settlement_window = Chain::from_tip(
        containing.height().saturating_sub(window),
        &containing.hash(),
        ed.blocks(),
    );
    match settlement_window.get(endorsement.endorsed_height) {
        None => {
            return state.invalid(
                "no-endorsed-block",
                format!("no block at endorsed height {}", endorsement.endorsed_height),
            )
        }
        Some(endorsed) if endorsed != endorsement.endorsed_hash => {
            return state.invalid(
                "block-differs",
                format!(
                    "endorsed block {} is not the block {} on this chain",
                    endorsement.endorsed_hash, endorsed
                ),
            )
        }
        Some(_) => {}
    }

    if !ing.contains(&endorsement.block_of_proof) {
        return state.invalid(
            "block-of-proof-not-found",
            format!("block of proof {} is not known", endorsement.block_of_proof),
        );
    }

    if let Some(duplicate) =
        settlement_window.find_block_containing_endorsement(&endorsement.id, window, ed.blocks())
    {
        return state.invalid(
            "duplicate",
            format!("endorsement {} is already in block {}", endorsement.id, duplicate),
        );
    }

    add_endorsement(ed, endorsement.clone());
    true
}

/// Record an endorsement that is known to be valid.
pub(crate) fn add_endorsement<H: BlockHeader>(
    ed: &mut BaseBlockTree<H>,
    endorsement: Endorsement<H::Hash, H::ProtectingHash>,
) {
    let key = EndorsementKey {
        containing_hash: endorsement.containing_hash,
        id: endorsement.id,
    };
    let endorsed = ed
        .get_block_index_mut(&endorsement.endorsed_hash)
        .expect("the endorsed block of a valid endorsement must be in the tree");
    endorsed.endorsed_by.push(key);
    let containing = ed
        .get_block_index_mut(&endorsement.containing_hash)
        .expect("the containing block of a valid endorsement must be in the tree");
    containing.containing_endorsements.insert(endorsement.id, endorsement);
}

/// Exact inverse of a successful [`check_and_add_endorsement`].
///
/// Only the last matching `endorsed_by` entry is removed: during a rollback the same key may
/// transiently appear twice.
pub fn remove_endorsement<H: BlockHeader>(
    ed: &mut BaseBlockTree<H>,
    containing_hash: &H::Hash,
    id: &EndorsementId,
) {
    let endorsement = ed
        .get_block_index_mut(containing_hash)
        .and_then(|containing| containing.containing_endorsements.remove(id))
        .unwrap_or_else(|| panic!("endorsement {} is not in block {}", id, containing_hash));

    let endorsed = ed
        .get_block_index_mut(&endorsement.endorsed_hash)
        .unwrap_or_else(|| panic!("endorsed block {} is missing", endorsement.endorsed_hash));
    let key = EndorsementKey {
        containing_hash: *containing_hash,
        id: *id,
    };
    let position = endorsed
        .endorsed_by
        .iter()
        .rposition(|existing| *existing == key)
        .unwrap_or_else(|| panic!("endorsement {} is not in endorsed_by of its endorsed block", id));
    endorsed.endorsed_by.remove(position);
}
