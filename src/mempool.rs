/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Payloads waiting to be carried by the next ALT block.
//!
//! A submitted payload is first checked statelessly. If it passes, it is either *connected* or
//! *in flight*:
//! - A connected payload only depends on VBK blocks that the ALT tree's VBK tree or the mempool
//!   already holds, so it can go into [`PopData`] right away.
//! - An in-flight payload depends on VBK blocks nobody has submitted yet. It is kept, and submitted
//!   again every time the mempool tries to connect payloads.
//!
//! Payloads already carried by the ALT tree's active chain are refused, and connected payloads that
//! become carried by it are dropped by [`MemPool::clean_up`]. Payloads whose VBK blocks fall more
//! than the VBK settlement interval below the VBK tip are stale and dropped too.

use std::collections::HashMap;

use crate::{
    block_tree::AltBlockTree,
    params::PopChainParams,
    types::{
        block::{BlockHeader, VbkBlock},
        data_types::{BlockHeight, PayloadId, VbkHash},
        payloads::{context_block_id, AltPayload, Atv, PopData, Vtb},
        validation::ValidationState,
    },
};

/// Outcome of [`MemPool::submit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitResult {
    /// The payload can be carried by the next ALT block.
    Connected,
    /// The payload is valid on its own but depends on VBK blocks that are not known yet. It is kept
    /// and retried.
    InFlight,
    /// The payload failed its stateless checks, is stale, or is already on the active chain. It
    /// was not kept.
    Rejected,
}

impl SubmitResult {
    /// Whether the mempool kept the payload.
    pub fn is_kept(&self) -> bool {
        !matches!(self, SubmitResult::Rejected)
    }
}

#[derive(Default)]
pub struct MemPool {
    vbk_blocks: HashMap<PayloadId, VbkBlock>,
    vtbs: HashMap<PayloadId, Vtb>,
    atvs: HashMap<PayloadId, Atv>,
    in_flight: HashMap<PayloadId, AltPayload>,
}

impl MemPool {
    pub fn new() -> MemPool {
        MemPool::default()
    }

    /// Check `payload` and keep it if it is, or may become, valid for the next block of `alt`.
    pub fn submit(&mut self, alt: &AltBlockTree, payload: AltPayload, state: &mut ValidationState) -> SubmitResult {
        let id = payload.id();
        if self.is_connected(&id) {
            return SubmitResult::Connected;
        }
        if !check_payload(alt, &payload, state) {
            return SubmitResult::Rejected;
        }
        if is_stale(alt, &payload) {
            state.invalid("too-old", format!("payload {} is below the VBK settlement interval", id));
            return SubmitResult::Rejected;
        }
        if is_on_active_chain(alt, &id) {
            state.invalid("payload-known", format!("payload {} is carried by the active chain", id));
            return SubmitResult::Rejected;
        }
        if let AltPayload::VbkBlock(block) = &payload {
            if alt.protecting_tree().contains(&block.hash()) {
                return SubmitResult::Connected;
            }
        }

        if !self.connects(alt, &payload) {
            log::debug!("mempool keeps {} in flight", id);
            self.in_flight.insert(id, payload);
            state.invalid("not-connected", format!("payload {} depends on unknown VBK blocks", id));
            return SubmitResult::InFlight;
        }

        self.in_flight.remove(&id);
        match payload {
            AltPayload::VbkBlock(block) => {
                self.vbk_blocks.insert(id, block);
            }
            AltPayload::Vtb(vtb) => {
                self.vtbs.insert(id, vtb);
            }
            AltPayload::Atv(atv) => {
                let block_of_proof = &atv.block_of_proof;
                if !alt.protecting_tree().contains(&block_of_proof.hash()) {
                    self.vbk_blocks
                        .insert(context_block_id(&block_of_proof.hash()), block_of_proof.clone());
                }
                self.atvs.insert(id, atv);
            }
        }
        log::debug!("mempool connected {}", id);
        SubmitResult::Connected
    }

    /// Submit every in-flight payload again, VBK blocks from the lowest, then VTBs, then ATVs.
    pub fn try_connect(&mut self, alt: &AltBlockTree) {
        let mut in_flight: Vec<AltPayload> = self.in_flight.drain().map(|(_, payload)| payload).collect();
        in_flight.sort_by_key(submission_order);
        for payload in in_flight {
            let mut state = ValidationState::new();
            self.submit(alt, payload, &mut state);
        }
    }

    /// Connected payloads for the block on top of `alt`'s active tip: VBK context blocks from the
    /// lowest, then VTBs, then ATVs.
    ///
    /// VTBs whose containing block is neither in the VBK tree nor among the context blocks are left
    /// out, as are ATVs whose endorsed block is off the active chain or would be outside the
    /// settlement interval of the new block.
    pub fn generate_pop_data(&mut self, alt: &AltBlockTree) -> PopData {
        self.try_connect(alt);
        let vbk = alt.protecting_tree();

        let mut context: Vec<VbkBlock> = self
            .vbk_blocks
            .values()
            .filter(|block| !vbk.contains(&block.hash()))
            .cloned()
            .collect();
        context.sort_by_key(|block| block.height);
        let known = |hash: &VbkHash| vbk.contains(hash) || context.iter().any(|block| block.hash() == *hash);

        let mut vtbs: Vec<Vtb> = self
            .vtbs
            .values()
            .filter(|vtb| known(&vtb.containing_block))
            .cloned()
            .collect();
        vtbs.sort_by_key(|vtb| vtb.transaction.published_block.height);

        let next_height = alt.tip().map_or(BlockHeight::new(0), |tip| tip.height() + 1);
        let window = alt.params().pop().endorsement_settlement_interval;
        let mut atvs: Vec<Atv> = self
            .atvs
            .values()
            .filter(|atv| {
                let endorsed = &atv.transaction.published_block;
                alt.base().is_on_active_chain(&endorsed.hash)
                    && next_height.int().saturating_sub(endorsed.height.int()) <= window
                    && known(&atv.block_of_proof.previous_block)
            })
            .cloned()
            .collect();
        atvs.sort_by_key(|atv| atv.block_of_proof.height);

        let pop_data = PopData { context, vtbs, atvs };
        log::info!(
            "mempool generated {} context blocks, {} VTBs, {} ATVs for ALT height {}",
            pop_data.context.len(),
            pop_data.vtbs.len(),
            pop_data.atvs.len(),
            next_height
        );
        pop_data
    }

    /// Forget the payloads of `pop_data`, typically because a new block carries them, then clean up
    /// and try to connect what is in flight.
    pub fn remove_all(&mut self, alt: &AltBlockTree, pop_data: &PopData) {
        for block in &pop_data.context {
            self.vbk_blocks.remove(&context_block_id(&block.hash()));
        }
        for vtb in &pop_data.vtbs {
            self.vtbs.remove(&vtb.id());
        }
        for atv in &pop_data.atvs {
            self.atvs.remove(&atv.id());
        }
        self.clean_up(alt);
        self.try_connect(alt);
    }

    /// Drop payloads that can no longer be carried by the next block of `alt`: stale ones, ones the
    /// active chain already carries, and context blocks the VBK tree already holds.
    pub fn clean_up(&mut self, alt: &AltBlockTree) {
        let vbk = alt.protecting_tree();
        let window = alt.params().pop().endorsement_settlement_interval;
        let next_height = alt.tip().map_or(0, |tip| tip.height().int() + 1);

        self.vbk_blocks.retain(|id, block| {
            !vbk.contains(&block.hash())
                && !is_stale(alt, &AltPayload::VbkBlock(block.clone()))
                && !is_on_active_chain(alt, id)
        });
        self.vtbs.retain(|id, vtb| {
            !is_stale(alt, &AltPayload::Vtb(vtb.clone())) && !is_on_active_chain(alt, id)
        });
        self.atvs.retain(|id, atv| {
            let expired = next_height.saturating_sub(atv.transaction.published_block.height.int()) > window;
            !expired && !is_stale(alt, &AltPayload::Atv(atv.clone())) && !is_on_active_chain(alt, id)
        });
        self.in_flight.retain(|_, payload| !is_stale(alt, payload));
    }

    /// Whether `id` is in the mempool or carried by any block of `alt`.
    pub fn is_known(&self, alt: &AltBlockTree, id: &PayloadId) -> bool {
        self.contains(id) || alt.rule().payloads_index().find(id).next().is_some()
    }

    /// Whether `id` is in the mempool, connected or in flight.
    pub fn contains(&self, id: &PayloadId) -> bool {
        self.is_connected(id) || self.in_flight.contains_key(id)
    }

    pub fn is_connected(&self, id: &PayloadId) -> bool {
        self.vbk_blocks.contains_key(id) || self.vtbs.contains_key(id) || self.atvs.contains_key(id)
    }

    pub fn get(&self, id: &PayloadId) -> Option<AltPayload> {
        if let Some(block) = self.vbk_blocks.get(id) {
            return Some(AltPayload::VbkBlock(block.clone()));
        }
        if let Some(vtb) = self.vtbs.get(id) {
            return Some(AltPayload::Vtb(vtb.clone()));
        }
        if let Some(atv) = self.atvs.get(id) {
            return Some(AltPayload::Atv(atv.clone()));
        }
        self.in_flight.get(id).cloned()
    }

    /// Number of connected payloads.
    pub fn len(&self) -> usize {
        self.vbk_blocks.len() + self.vtbs.len() + self.atvs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.in_flight.is_empty()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn clear(&mut self) {
        self.vbk_blocks.clear();
        self.vtbs.clear();
        self.atvs.clear();
        self.in_flight.clear();
    }

    // Whether every VBK block `payload` builds on is known to the VBK tree or to the mempool.
    fn connects(&self, alt: &AltBlockTree, payload: &AltPayload) -> bool {
        let vbk = alt.protecting_tree();
        let known = |hash: &VbkHash| vbk.contains(hash) || self.vbk_blocks.contains_key(&context_block_id(hash));
        match payload {
            AltPayload::VbkBlock(block) => known(&block.previous_block),
            AltPayload::Vtb(vtb) => known(&vtb.containing_block),
            AltPayload::Atv(atv) => {
                alt.contains(&atv.transaction.published_block.hash)
                    && (known(&atv.block_of_proof.hash()) || known(&atv.block_of_proof.previous_block))
            }
        }
    }
}

/// Stateless checks of a payload against the parameters of `alt` and its protecting trees.
pub fn check_payload(alt: &AltBlockTree, payload: &AltPayload, state: &mut ValidationState) -> bool {
    let vbk = alt.protecting_tree();
    let btc_params = vbk.protecting_tree().params();
    let valid = match payload {
        AltPayload::VbkBlock(block) => block.check_block(vbk.params(), state),
        AltPayload::Vtb(vtb) => {
            let transaction = &vtb.transaction;
            transaction.published_block.check_block(vbk.params(), state)
                && transaction
                    .block_of_proof_context
                    .iter()
                    .chain(std::iter::once(&transaction.block_of_proof))
                    .all(|block| block.check_block(btc_params, state))
        }
        AltPayload::Atv(atv) => {
            atv.transaction.published_block.check_block(alt.params(), state)
                && atv.block_of_proof.check_block(vbk.params(), state)
        }
    };
    if !valid {
        return state.wrap(format!("{}-stateless", payload_kind(payload)));
    }
    true
}

fn payload_kind(payload: &AltPayload) -> &'static str {
    match payload {
        AltPayload::VbkBlock(_) => "vbkblock",
        AltPayload::Vtb(_) => "vtb",
        AltPayload::Atv(_) => "atv",
    }
}

// VBK blocks are submitted from the lowest so that each finds its parent already connected.
fn submission_order(payload: &AltPayload) -> (u8, u32) {
    match payload {
        AltPayload::VbkBlock(block) => (0, block.height.int()),
        AltPayload::Vtb(vtb) => (1, vtb.transaction.published_block.height.int()),
        AltPayload::Atv(atv) => (2, atv.block_of_proof.height.int()),
    }
}

// The VBK height a payload is anchored at, compared against the VBK tip to tell if it is stale.
fn anchor_height(payload: &AltPayload) -> BlockHeight {
    match payload {
        AltPayload::VbkBlock(block) => block.height,
        AltPayload::Vtb(vtb) => vtb.transaction.published_block.height,
        AltPayload::Atv(atv) => atv.block_of_proof.height,
    }
}

fn is_stale(alt: &AltBlockTree, payload: &AltPayload) -> bool {
    let vbk = alt.protecting_tree();
    let window = vbk.params().pop.endorsement_settlement_interval;
    vbk.tip()
        .map_or(false, |tip| anchor_height(payload).int() + window < tip.height().int())
}

fn is_on_active_chain(alt: &AltBlockTree, id: &PayloadId) -> bool {
    alt.rule()
        .payloads_index()
        .find(id)
        .any(|block| alt.base().is_on_active_chain(block))
}
