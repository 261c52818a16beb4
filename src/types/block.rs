/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Block header types of the three chains, and the [`BlockHeader`] trait the block tree is generic
//! over.
//!
//! Header hashes are computed from the Borsh serialization of the header. Real deployments
//! plug in the chains' own wire formats and hash functions; the block tree only relies on hashes
//! being fixed-size, comparable, and stable.

use std::fmt::Debug;

use borsh::{BorshDeserialize, BorshSerialize};
pub use sha2::Sha256 as CryptoHasher;
use sha2::Digest;

use crate::{
    block_tree::{block_index::BlockIndex, validation, BaseBlockTree},
    params::{AltChainParams, BtcChainParams, ChainParams, VbkChainParams},
    types::{
        compact,
        data_types::{AltHash, BlockHeight, BtcHash, ChainWork, HashBytes, VbkHash},
        validation::ValidationState,
    },
};

/// A block header that a [`BlockTree`](crate::block_tree::BlockTree) can hold.
pub trait BlockHeader:
    Clone + Debug + PartialEq + BorshSerialize + BorshDeserialize + Send + Sync + 'static
{
    /// Hash type that identifies headers of this chain.
    type Hash: HashBytes;

    /// Hash type of the chain that protects this chain. Chains that are not protected use their
    /// own hash type here.
    type ProtectingHash: HashBytes;

    type Params: ChainParams;

    /// Short chain name, prefixed to validation reasons and printed in logs.
    const NAME: &'static str;

    fn hash(&self) -> Self::Hash;

    fn previous_hash(&self) -> Self::Hash;

    /// Seconds since the Unix Epoch.
    fn timestamp(&self) -> u32;

    /// Height written into the header, for chains whose headers carry one.
    fn declared_height(&self) -> Option<BlockHeight>;

    /// Work this header adds to the chain it extends.
    fn block_proof(&self) -> ChainWork;

    /// Checks that only need the header itself.
    fn check_block(&self, params: &Self::Params, state: &mut ValidationState) -> bool;

    /// Checks against the header's parent `prev` and its ancestors in `tree`.
    fn contextually_check_block(
        &self,
        prev: &BlockIndex<Self>,
        tree: &BaseBlockTree<Self>,
        state: &mut ValidationState,
    ) -> bool;
}

/// Header of a Bitcoin-like block.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BtcBlock {
    pub version: u32,
    pub previous_block: BtcHash,
    pub merkle_root: [u8; 32],
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader for BtcBlock {
    type Hash = BtcHash;
    type ProtectingHash = BtcHash;
    type Params = BtcChainParams;
    const NAME: &'static str = "BTC";

    fn hash(&self) -> BtcHash {
        let first = CryptoHasher::digest(&self.try_to_vec().unwrap());
        BtcHash::new(CryptoHasher::digest(&first).into())
    }

    fn previous_hash(&self) -> BtcHash {
        self.previous_block
    }

    fn timestamp(&self) -> u32 {
        self.timestamp
    }

    fn declared_height(&self) -> Option<BlockHeight> {
        None
    }

    fn block_proof(&self) -> ChainWork {
        ChainWork::new(compact::work(self.bits))
    }

    fn check_block(&self, params: &BtcChainParams, state: &mut ValidationState) -> bool {
        validation::check_proof_of_work(self.hash().as_bytes(), self.bits, params.pow_limit_bits, state)
            && validation::check_not_too_new(self.timestamp, params.max_future_block_time(), state)
    }

    fn contextually_check_block(
        &self,
        prev: &BlockIndex<Self>,
        tree: &BaseBlockTree<Self>,
        state: &mut ValidationState,
    ) -> bool {
        let expected_bits = validation::btc_next_work_required(prev, self, tree);
        if self.bits != expected_bits {
            return state.invalid(
                "bad-diffbits",
                format!("incorrect proof of work: {:#x} != {:#x}", self.bits, expected_bits),
            );
        }
        validation::check_median_time_past(self.timestamp, prev, tree, state)
    }
}

/// Header of a VeriBlock-like block.
///
/// Besides its parent, every VBK header references the two keystones before it through the
/// last 9 bytes of their hashes (see [`keystone_suffix`]).
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct VbkBlock {
    pub height: BlockHeight,
    pub version: u16,
    pub previous_block: VbkHash,
    pub previous_keystone: [u8; 9],
    pub second_previous_keystone: [u8; 9],
    pub merkle_root: [u8; 16],
    pub timestamp: u32,
    pub difficulty: u32,
    pub nonce: u64,
}

/// The bytes of a VBK hash a later header uses to reference it as a keystone.
pub fn keystone_suffix(hash: &VbkHash) -> [u8; 9] {
    let mut suffix = [0u8; 9];
    suffix.copy_from_slice(&hash.as_bytes()[VbkHash::LEN - 9..]);
    suffix
}

impl BlockHeader for VbkBlock {
    type Hash = VbkHash;
    type ProtectingHash = BtcHash;
    type Params = VbkChainParams;
    const NAME: &'static str = "VBK";

    fn hash(&self) -> VbkHash {
        VbkHash::from_digest(&CryptoHasher::digest(&self.try_to_vec().unwrap()))
    }

    fn previous_hash(&self) -> VbkHash {
        self.previous_block
    }

    fn timestamp(&self) -> u32 {
        self.timestamp
    }

    fn declared_height(&self) -> Option<BlockHeight> {
        Some(self.height)
    }

    fn block_proof(&self) -> ChainWork {
        ChainWork::new(compact::work(self.difficulty))
    }

    fn check_block(&self, params: &VbkChainParams, state: &mut ValidationState) -> bool {
        validation::check_proof_of_work(
            self.hash().as_bytes(),
            self.difficulty,
            params.pow_limit_bits,
            state,
        ) && validation::check_not_too_new(self.timestamp, params.max_future_block_time(), state)
    }

    fn contextually_check_block(
        &self,
        prev: &BlockIndex<Self>,
        tree: &BaseBlockTree<Self>,
        state: &mut ValidationState,
    ) -> bool {
        validation::check_height(self.height, prev, state)
            && validation::check_vbk_keystones(self, prev, tree, state)
            && validation::check_vbk_difficulty(self, prev, tree, state)
            && validation::check_median_time_past(self.timestamp, prev, tree, state)
    }
}

/// Header of an altchain block.
///
/// The altchain computes its own block hashes; `hash` is taken as given.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AltBlock {
    pub hash: AltHash,
    pub previous_block: AltHash,
    pub height: BlockHeight,
    pub timestamp: u32,
}

impl BlockHeader for AltBlock {
    type Hash = AltHash;
    type ProtectingHash = VbkHash;
    type Params = AltChainParams;
    const NAME: &'static str = "ALT";

    fn hash(&self) -> AltHash {
        self.hash
    }

    fn previous_hash(&self) -> AltHash {
        self.previous_block
    }

    fn timestamp(&self) -> u32 {
        self.timestamp
    }

    fn declared_height(&self) -> Option<BlockHeight> {
        Some(self.height)
    }

    fn block_proof(&self) -> ChainWork {
        ChainWork::new(1)
    }

    fn check_block(&self, params: &AltChainParams, state: &mut ValidationState) -> bool {
        if self.hash.is_zero() {
            return state.invalid("bad-hash", "altchain block hash is empty");
        }
        validation::check_not_too_new(self.timestamp, params.max_future_block_time(), state)
    }

    fn contextually_check_block(
        &self,
        prev: &BlockIndex<Self>,
        tree: &BaseBlockTree<Self>,
        state: &mut ValidationState,
    ) -> bool {
        validation::check_height(self.height, prev, state)
            && validation::check_median_time_past(self.timestamp, prev, tree, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vbk_block(nonce: u64) -> VbkBlock {
        VbkBlock {
            height: BlockHeight::new(1),
            version: 2,
            previous_block: VbkHash::zero(),
            previous_keystone: [0; 9],
            second_previous_keystone: [0; 9],
            merkle_root: [0; 16],
            timestamp: 1_553_699_059,
            difficulty: 0x187fffff,
            nonce,
        }
    }

    #[test]
    fn hashes_depend_on_every_field() {
        assert_ne!(vbk_block(0).hash(), vbk_block(1).hash());
        assert_eq!(vbk_block(7).hash(), vbk_block(7).hash());
    }

    #[test]
    fn keystone_suffix_is_hash_tail() {
        let hash = vbk_block(3).hash();
        assert_eq!(&keystone_suffix(&hash)[..], &hash.bytes()[15..]);
    }

    #[test]
    fn alt_block_hash_is_given() {
        let block = AltBlock {
            hash: AltHash::new([1; 32]),
            previous_block: AltHash::zero(),
            height: BlockHeight::new(0),
            timestamp: 0,
        };
        assert_eq!(block.hash(), AltHash::new([1; 32]));
        let mut state = ValidationState::new();
        assert!(block.check_block(&AltChainParams::regtest(), &mut state));
    }
}
