/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Deterministic header miner for regtest chains.
//!
//! The [`Miner`] builds the next header on top of any block of a tree: it fills in the height, the
//! difficulty the tree expects, keystone references (VBK) and a timestamp one second after the
//! parent's, then searches nonces until the header meets its own target. A running counter goes
//! into every merkle root, so mining twice on the same parent yields two different blocks.
//!
//! Only regtest difficulties are practical to mine. The miner never inserts what it mines: callers
//! accept the header into whichever trees should know it.
//!
//! Proof-of-Proof payloads are built the way they appear on the real networks:
//! 1. [`Miner::mine_vbk_pop_tx`] publishes a VBK block by mining a BTC block of proof that commits
//!    to it.
//! 2. [`Miner::mine_vbk_with_pop_txs`] mines a VBK block that contains such transactions, turning
//!    each into a [`Vtb`].
//! 3. [`Miner::mine_atv`] publishes an ALT block by mining a VBK block of proof that commits to it.

use sha2::Digest;

use crate::{
    block_tree::{
        best_chain::BestChainRule,
        block_index::BlockIndex,
        validation::{self, KeystoneReference},
        BlockTree,
    },
    types::{
        block::{AltBlock, BlockHeader, BtcBlock, CryptoHasher, VbkBlock},
        compact,
        data_types::{AltHash, BlockHeight, BtcHash, CryptoHash, HashBytes, VbkHash},
        payloads::{Atv, VbkPopTx, VbkTx, Vtb},
    },
};

/// Timestamp of the BTC regtest genesis block.
pub const BTC_REGTEST_GENESIS_TIME: u32 = 1_296_688_602;

/// Timestamp of the VBK regtest genesis block.
pub const VBK_REGTEST_GENESIS_TIME: u32 = 1_553_699_059;

/// Timestamp of the ALT regtest genesis block.
pub const ALT_REGTEST_GENESIS_TIME: u32 = 1_600_000_000;

const BTC_REGTEST_BITS: u32 = 0x207fffff;
const VBK_REGTEST_DIFFICULTY: u32 = 0x187fffff;

pub fn btc_regtest_genesis() -> BtcBlock {
    let mut genesis = BtcBlock {
        version: 1,
        previous_block: BtcHash::zero(),
        merkle_root: [0; 32],
        timestamp: BTC_REGTEST_GENESIS_TIME,
        bits: BTC_REGTEST_BITS,
        nonce: 0,
    };
    solve_btc(&mut genesis);
    genesis
}

pub fn vbk_regtest_genesis() -> VbkBlock {
    let mut genesis = VbkBlock {
        height: BlockHeight::new(0),
        version: 2,
        previous_block: VbkHash::zero(),
        previous_keystone: [0; 9],
        second_previous_keystone: [0; 9],
        merkle_root: [0; 16],
        timestamp: VBK_REGTEST_GENESIS_TIME,
        difficulty: VBK_REGTEST_DIFFICULTY,
        nonce: 0,
    };
    solve_vbk(&mut genesis);
    genesis
}

pub fn alt_regtest_genesis() -> AltBlock {
    AltBlock {
        hash: alt_hash(&AltHash::zero(), BlockHeight::new(0), 0),
        previous_block: AltHash::zero(),
        height: BlockHeight::new(0),
        timestamp: ALT_REGTEST_GENESIS_TIME,
    }
}

pub struct Miner {
    counter: u64,
}

impl Default for Miner {
    fn default() -> Self {
        Self::new()
    }
}

impl Miner {
    pub fn new() -> Miner {
        Miner { counter: 0 }
    }

    /// Mine a BTC header on top of `prev`.
    ///
    /// # Panics
    ///
    /// Panics if `prev` is not in `tree`.
    pub fn mine_btc<R: BestChainRule<BtcBlock>>(&mut self, tree: &BlockTree<BtcBlock, R>, prev: &BtcHash) -> BtcBlock {
        let commitment = self.next_commitment(&[]);
        self.mine_btc_committing(tree, prev, commitment)
    }

    /// Mine `count` consecutive BTC headers on top of `prev`, oldest first.
    ///
    /// Headers after the first keep the first header's difficulty, which is exact on chains that do
    /// not retarget.
    pub fn mine_btc_chain<R: BestChainRule<BtcBlock>>(
        &mut self,
        tree: &BlockTree<BtcBlock, R>,
        prev: &BtcHash,
        count: usize,
    ) -> Vec<BtcBlock> {
        let mut chain: Vec<BtcBlock> = Vec::with_capacity(count);
        for _ in 0..count {
            let block = match chain.last() {
                None => self.mine_btc(tree, prev),
                Some(parent) => {
                    let mut block = BtcBlock {
                        version: parent.version,
                        previous_block: parent.hash(),
                        merkle_root: self.next_commitment(&[]),
                        timestamp: parent.timestamp + 1,
                        bits: parent.bits,
                        nonce: 0,
                    };
                    solve_btc(&mut block);
                    block
                }
            };
            chain.push(block);
        }
        chain
    }

    /// Mine a VBK header on top of `prev`.
    ///
    /// # Panics
    ///
    /// Panics if `prev` is not in `tree`.
    pub fn mine_vbk<R: BestChainRule<VbkBlock>>(&mut self, tree: &BlockTree<VbkBlock, R>, prev: &VbkHash) -> VbkBlock {
        let commitment = self.next_commitment(&[]);
        self.mine_vbk_committing(tree, prev, commitment)
    }

    /// Mine an ALT block on top of `prev`. ALT blocks carry no proof of work; their hash only needs
    /// to be unique.
    ///
    /// # Panics
    ///
    /// Panics if `prev` is not in `tree`.
    pub fn mine_alt<R: BestChainRule<AltBlock>>(&mut self, tree: &BlockTree<AltBlock, R>, prev: &AltHash) -> AltBlock {
        let parent = parent_index(tree, prev);
        self.counter += 1;
        let height = parent.height() + 1;
        AltBlock {
            hash: alt_hash(prev, height, self.counter),
            previous_block: *prev,
            height,
            timestamp: parent.timestamp() + 1,
        }
    }

    /// Publish `published` into BTC: mine a block of proof on top of `btc_prev` that commits to it.
    ///
    /// `context` are the BTC blocks, oldest first, that the VBK chain has to learn before the block
    /// of proof connects. See [`missing_context`].
    pub fn mine_vbk_pop_tx<R: BestChainRule<BtcBlock>>(
        &mut self,
        btc: &BlockTree<BtcBlock, R>,
        btc_prev: &BtcHash,
        published: VbkBlock,
        context: Vec<BtcBlock>,
    ) -> VbkPopTx {
        let commitment = self.next_commitment(published.hash().as_bytes());
        let block_of_proof = self.mine_btc_committing(btc, btc_prev, commitment);
        VbkPopTx {
            published_block: published,
            block_of_proof,
            block_of_proof_context: context,
        }
    }

    /// Mine a VBK header on top of `prev` that contains `pop_txs`, and the VTBs they become.
    pub fn mine_vbk_with_pop_txs<R: BestChainRule<VbkBlock>>(
        &mut self,
        tree: &BlockTree<VbkBlock, R>,
        prev: &VbkHash,
        pop_txs: Vec<VbkPopTx>,
    ) -> (VbkBlock, Vec<Vtb>) {
        let ids: Vec<CryptoHash> = pop_txs.iter().map(|tx| tx.id()).collect();
        let mut committed = Vec::with_capacity(ids.len() * CryptoHash::LEN);
        for id in &ids {
            committed.extend_from_slice(id.as_bytes());
        }
        let commitment = self.next_commitment(&committed);
        let containing = self.mine_vbk_committing(tree, prev, commitment);
        let containing_hash = containing.hash();
        let vtbs = pop_txs
            .into_iter()
            .map(|transaction| Vtb {
                transaction,
                containing_block: containing_hash,
            })
            .collect();
        (containing, vtbs)
    }

    /// Publish `published` into VBK: mine a block of proof on top of `vbk_prev` that commits to it.
    pub fn mine_atv<R: BestChainRule<VbkBlock>>(
        &mut self,
        vbk: &BlockTree<VbkBlock, R>,
        vbk_prev: &VbkHash,
        published: AltBlock,
    ) -> Atv {
        let transaction = VbkTx {
            published_block: published,
        };
        let commitment = self.next_commitment(transaction.id().as_bytes());
        let block_of_proof = self.mine_vbk_committing(vbk, vbk_prev, commitment);
        Atv {
            transaction,
            block_of_proof,
        }
    }

    fn mine_btc_committing<R: BestChainRule<BtcBlock>>(
        &mut self,
        tree: &BlockTree<BtcBlock, R>,
        prev: &BtcHash,
        commitment: [u8; 32],
    ) -> BtcBlock {
        let parent = parent_index(tree, prev);
        let mut block = BtcBlock {
            version: parent.header().version,
            previous_block: *prev,
            merkle_root: commitment,
            timestamp: parent.timestamp() + 1,
            bits: 0,
            nonce: 0,
        };
        block.bits = validation::btc_next_work_required(parent, &block, tree.base());
        solve_btc(&mut block);
        block
    }

    fn mine_vbk_committing<R: BestChainRule<VbkBlock>>(
        &mut self,
        tree: &BlockTree<VbkBlock, R>,
        prev: &VbkHash,
        commitment: [u8; 32],
    ) -> VbkBlock {
        let parent = parent_index(tree, prev);
        let height = parent.height() + 1;
        let keystone_interval = tree.params().pop.keystone_interval;
        let reference = |skip| {
            match validation::expected_keystone_reference(height, keystone_interval, skip, parent, tree.base()) {
                KeystoneReference::Expected(suffix) => suffix,
                KeystoneReference::None | KeystoneReference::Unknown => [0; 9],
            }
        };

        let mut merkle_root = [0u8; 16];
        merkle_root.copy_from_slice(&commitment[..16]);
        let mut block = VbkBlock {
            height,
            version: parent.header().version,
            previous_block: *prev,
            previous_keystone: reference(0),
            second_previous_keystone: reference(1),
            merkle_root,
            timestamp: parent.timestamp() + 1,
            difficulty: parent.header().difficulty,
            nonce: 0,
        };
        solve_vbk(&mut block);
        block
    }

    /// A fresh 32-byte commitment to `data`, unique per call.
    fn next_commitment(&mut self, data: &[u8]) -> [u8; 32] {
        self.counter += 1;
        let mut hasher = CryptoHasher::new();
        hasher.update(self.counter.to_le_bytes());
        hasher.update(data);
        hasher.finalize().into()
    }
}

/// Headers on the way from `tip` down to the first block `known` already has, oldest first.
///
/// Used to build the context a payload needs for its blocks to connect in another tree.
pub fn missing_context<H, R1, R2>(source: &BlockTree<H, R1>, known: &BlockTree<H, R2>, tip: &H::Hash) -> Vec<H>
where
    H: BlockHeader,
    R1: BestChainRule<H>,
    R2: BestChainRule<H>,
{
    let mut context = Vec::new();
    let mut cursor = source.get_block_index(tip);
    while let Some(index) = cursor {
        if known.contains(&index.hash()) {
            break;
        }
        context.push(index.header().clone());
        cursor = index.pprev().and_then(|pprev| source.get_block_index(&pprev));
    }
    context.reverse();
    context
}

fn parent_index<'a, H: BlockHeader, R: BestChainRule<H>>(tree: &'a BlockTree<H, R>, prev: &H::Hash) -> &'a BlockIndex<H> {
    match tree.get_block_index(prev) {
        Some(index) => index,
        None => panic!("can not mine on {} block {}: it is not in the tree", H::NAME, prev),
    }
}

fn alt_hash(prev: &AltHash, height: BlockHeight, counter: u64) -> AltHash {
    let mut hasher = CryptoHasher::new();
    hasher.update(prev.as_bytes());
    hasher.update(height.int().to_le_bytes());
    hasher.update(counter.to_le_bytes());
    AltHash::new(hasher.finalize().into())
}

fn solve_btc(block: &mut BtcBlock) {
    let target = decode_target(block.bits);
    while !compact::hash_meets_target(block.hash().as_bytes(), &target) {
        block.nonce = block.nonce.wrapping_add(1);
    }
}

fn solve_vbk(block: &mut VbkBlock) {
    let target = decode_target(block.difficulty);
    while !compact::hash_meets_target(block.hash().as_bytes(), &target) {
        block.nonce = block.nonce.wrapping_add(1);
    }
}

fn decode_target(bits: u32) -> compact::Target {
    match compact::decode(bits) {
        Some(target) => target,
        None => panic!("can not mine against invalid compact target {:#x}", bits),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        params::{AltChainParams, BtcChainParams, VbkChainParams},
        types::validation::ValidationState,
    };

    #[test]
    fn genesis_blocks_pass_their_checks() {
        let mut state = ValidationState::new();
        assert!(btc_regtest_genesis().check_block(&BtcChainParams::regtest(), &mut state), "{}", state);
        assert!(vbk_regtest_genesis().check_block(&VbkChainParams::regtest(), &mut state), "{}", state);
        assert!(alt_regtest_genesis().check_block(&AltChainParams::regtest(), &mut state), "{}", state);
    }

    #[test]
    fn mined_vbk_blocks_reference_their_keystones() {
        let mut tree = BlockTree::<VbkBlock>::new(VbkChainParams::regtest());
        let mut state = ValidationState::new();
        assert!(tree.bootstrap_with_genesis(vbk_regtest_genesis(), &mut state));

        let mut miner = Miner::new();
        for _ in 0..65 {
            let tip = tree.tip().unwrap().hash();
            let block = miner.mine_vbk(&tree, &tip);
            assert!(tree.accept_block_header(block, &mut state), "{}", state);
        }
        let tip = tree.tip().unwrap();
        assert_eq!(tip.height(), BlockHeight::new(65));
        let keystone = tree.ancestor(&tip.hash(), BlockHeight::new(60)).unwrap().hash();
        assert_eq!(tip.header().previous_keystone, crate::types::block::keystone_suffix(&keystone));
    }

    #[test]
    fn mining_twice_on_one_parent_forks() {
        let mut tree = BlockTree::<BtcBlock>::new(BtcChainParams::regtest());
        let mut state = ValidationState::new();
        assert!(tree.bootstrap_with_genesis(btc_regtest_genesis(), &mut state));
        let genesis = tree.tip().unwrap().hash();

        let mut miner = Miner::new();
        let a = miner.mine_btc(&tree, &genesis);
        let b = miner.mine_btc(&tree, &genesis);
        assert_ne!(a.hash(), b.hash());
        assert!(tree.accept_block_header(a, &mut state));
        assert!(tree.accept_block_header(b, &mut state));
        assert_eq!(tree.tips().len(), 2);
    }

    #[test]
    fn chains_connect_and_context_is_collected() {
        let mut source = BlockTree::<BtcBlock>::new(BtcChainParams::regtest());
        let mut known = BlockTree::<BtcBlock>::new(BtcChainParams::regtest());
        let mut state = ValidationState::new();
        assert!(source.bootstrap_with_genesis(btc_regtest_genesis(), &mut state));
        assert!(known.bootstrap_with_genesis(btc_regtest_genesis(), &mut state));
        let genesis = source.tip().unwrap().hash();

        let mut miner = Miner::new();
        for block in miner.mine_btc_chain(&source, &genesis, 4) {
            assert!(source.accept_block_header(block, &mut state), "{}", state);
        }
        let tip = source.tip().unwrap().hash();
        let context = missing_context(&source, &known, &tip);
        assert_eq!(context.len(), 4);
        assert_eq!(context[0].previous_block, genesis);
        for block in context {
            assert!(known.accept_block_header(block, &mut state), "{}", state);
        }
        assert_eq!(known.tip().unwrap().hash(), tip);
    }
}
