/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The entry point an altchain node talks to.
//!
//! A [`PopContext`] owns the ALT tree (and through it the VBK and BTC trees) together with a
//! [`MemPool`]. The node feeds it ALT headers and the [`PopData`] of ALT blocks, moves its active
//! chain with [`set_state`](PopContext::set_state), and asks it for the `PopData` of the next block
//! it mines. The mempool is cleaned up whenever the active chain may have changed.
//!
//! All three trees and their payload bodies are saved to, and loaded from, one key-value store.

use std::collections::HashSet;

use crate::{
    block_tree::{
        pluggables::{BlockTreeError, KVGet, KVStore, NoPayloads, StoredPayloads},
        AltBlockTree, BtcBlockTree, VbkBlockTree,
    },
    config::Configuration,
    mempool::{self, MemPool, SubmitResult},
    params::{AltChainParams, BtcChainParams, VbkChainParams},
    types::{
        block::{AltBlock, BlockHeader, BtcBlock, VbkBlock},
        data_types::AltHash,
        payloads::{AltPayload, PopData},
        validation::ValidationState,
    },
};

pub struct PopContext {
    alt: AltBlockTree,
    mempool: MemPool,
}

impl PopContext {
    /// Wrap an ALT tree, bootstrapped or not, with an empty mempool.
    pub fn new(alt: AltBlockTree) -> PopContext {
        PopContext {
            alt,
            mempool: MemPool::new(),
        }
    }

    /// A context over three empty trees, to be bootstrapped or loaded.
    pub fn with_params(
        btc_params: BtcChainParams,
        vbk_params: VbkChainParams,
        alt_params: AltChainParams,
        config: Configuration,
    ) -> PopContext {
        let btc = BtcBlockTree::with_config(btc_params, config.clone());
        let vbk = VbkBlockTree::with_protecting_tree(vbk_params, btc, config.clone());
        PopContext::new(AltBlockTree::with_protecting_tree(alt_params, vbk, config))
    }

    /// Bootstrap the BTC, VBK and ALT trees with one genesis block each, innermost first.
    pub fn bootstrap(
        &mut self,
        btc_genesis: BtcBlock,
        vbk_genesis: VbkBlock,
        alt_genesis: AltBlock,
        state: &mut ValidationState,
    ) -> bool {
        self.alt
            .protecting_tree_mut()
            .protecting_tree_mut()
            .bootstrap_with_genesis(btc_genesis, state)
            && self.alt.protecting_tree_mut().bootstrap_with_genesis(vbk_genesis, state)
            && self.alt.bootstrap_with_genesis(alt_genesis, state)
    }

    pub fn alt_tree(&self) -> &AltBlockTree {
        &self.alt
    }

    pub fn alt_tree_mut(&mut self) -> &mut AltBlockTree {
        &mut self.alt
    }

    pub fn vbk_tree(&self) -> &VbkBlockTree {
        self.alt.protecting_tree()
    }

    pub fn btc_tree(&self) -> &BtcBlockTree {
        self.alt.protecting_tree().protecting_tree()
    }

    pub fn mempool(&self) -> &MemPool {
        &self.mempool
    }

    /// Stateless checks of every payload of `pop_data`, and that no payload appears twice in it.
    pub fn check(&self, pop_data: &PopData, state: &mut ValidationState) -> bool {
        let mut seen = HashSet::new();
        for payload in pop_data.clone().into_payloads() {
            let id = payload.id();
            if !seen.insert(id) {
                state.invalid("duplicate-in-pop-data", format!("payload {} appears twice", id));
                return state.wrap("pop-data-stateless");
            }
            if !mempool::check_payload(&self.alt, &payload, state) {
                return state.wrap("pop-data-stateless");
            }
        }
        true
    }

    /// Hand `payload` to the mempool.
    pub fn submit(&mut self, payload: AltPayload, state: &mut ValidationState) -> SubmitResult {
        self.mempool.submit(&self.alt, payload, state)
    }

    /// Accept an ALT header that carries no payloads yet.
    pub fn accept_block_header(&mut self, header: AltBlock, state: &mut ValidationState) -> bool {
        self.alt.accept_block_header(header, state)
    }

    /// Check `pop_data` statelessly and attach it to the already accepted block `containing`.
    pub fn accept_block(&mut self, containing: &AltHash, pop_data: PopData, state: &mut ValidationState) -> bool {
        if !self.check(&pop_data, state) {
            return false;
        }
        let accepted = self.alt.add_payloads(containing, pop_data.into_payloads(), state);
        self.mempool.clean_up(&self.alt);
        accepted
    }

    /// Move the ALT tree's active chain to `to`, then drop the mempool's payloads that the new
    /// active chain carries.
    pub fn set_state(&mut self, to: &AltHash, state: &mut ValidationState) -> bool {
        let moved = self.alt.set_state(to, state);
        self.mempool.clean_up(&self.alt);
        moved
    }

    /// Payloads for the block on top of the active ALT tip.
    pub fn generate_pop_data(&mut self) -> PopData {
        self.mempool.generate_pop_data(&self.alt)
    }

    /// Forget the payloads of `pop_data` in the mempool, for example once a block carrying them
    /// becomes active.
    pub fn remove_from_mempool(&mut self, pop_data: &PopData) {
        self.mempool.remove_all(&self.alt, pop_data);
    }

    /// Save all three trees and the bodies of the payloads their blocks carry into `kv`.
    pub fn save_all_trees<K: KVStore>(&self, kv: &mut K) {
        self.btc_tree().save_to(kv);
        self.vbk_tree().save_to(kv);
        self.vbk_tree().save_payloads_to(kv);
        self.alt.save_to(kv);
        self.alt.save_payloads_to(kv);
    }

    /// Load all three trees from `kv` into this context's empty trees, innermost first.
    ///
    /// Returns `Ok(false)` if `kv` holds no BTC blocks. On error the context is partially loaded
    /// and should be dropped.
    pub fn load_all_trees<K: KVGet>(&mut self, kv: &K) -> Result<bool, BlockTreeError> {
        let vbk = self.alt.protecting_tree_mut();
        if !vbk.protecting_tree_mut().load_from(kv, &NoPayloads)? {
            return Ok(false);
        }
        vbk.load_from(kv, &StoredPayloads::new(kv, VbkBlock::NAME))?;
        self.alt.load_from(kv, &StoredPayloads::new(kv, AltBlock::NAME))?;
        self.mempool.clear();
        log::info!(
            "loaded {} BTC, {} VBK and {} ALT blocks",
            self.btc_tree().len(),
            self.vbk_tree().len(),
            self.alt.len()
        );
        Ok(true)
    }
}
