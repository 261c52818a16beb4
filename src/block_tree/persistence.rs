/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Saving block trees into, and loading them from, a [`KVStore`].
//!
//! Only what can not be recomputed is stored: each block's header, height, [persisted status
//! flags](super::block_index::BlockStatus::persisted) and payload ids, whether a payload of the
//! protected tree inserted the block or some of its payloads, plus the active tip (see
//! [`variables`](super::variables)). Loading restores the blocks lowest first, hands the payloads
//! back to the tree's best chain rule, and then [restores](super::best_chain::BestChainRule::restore_state)
//! the active chain from the root up to the stored tip.
//!
//! A PoP-protected tree expects its protecting tree to be loaded already, holding every block and
//! payload its applied blocks added. Trees are therefore saved together and loaded innermost
//! first: BTC, then VBK, then ALT.

use std::sync::Arc;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    block::BlockHeader,
    data_types::{BlockHeight, HashBytes, PayloadId},
    validation::ValidationState,
};

use super::{
    best_chain::BestChainRule,
    block_index::{BlockIndex, BlockStatus},
    pluggables::{BlockTreeError, KVGet, KVGetError, KVStore, Key, PayloadsProvider, WriteBatch},
    variables::{self, concat},
    BlockTree,
};

/// A block index as it is written to a key-value store.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct StoredBlockIndex {
    pub height: BlockHeight,
    /// Bits of the block's persisted [`BlockStatus`].
    pub status: u8,
    /// Borsh serialization of the header.
    pub header: Vec<u8>,
    pub payload_ids: Vec<PayloadId>,
    /// Whether a payload of the protected tree inserted the block.
    pub added_by_payload: bool,
    /// Ids among `payload_ids` that payloads of the protected tree added.
    pub context_payload_ids: Vec<PayloadId>,
}

impl StoredBlockIndex {
    pub fn from_index<H: BlockHeader>(index: &BlockIndex<H>) -> StoredBlockIndex {
        StoredBlockIndex {
            height: index.height(),
            status: index.status().persisted().bits(),
            header: index.header().try_to_vec().unwrap(),
            payload_ids: index.payload_ids().to_vec(),
            added_by_payload: index.is_added_by_payload(),
            context_payload_ids: index.context_payload_ids().to_vec(),
        }
    }

    pub fn decode_header<H: BlockHeader>(&self) -> std::io::Result<H> {
        H::deserialize(&mut &*self.header)
    }
}

impl<H: BlockHeader, R: BestChainRule<H>> BlockTree<H, R> {
    /// Replace whatever `kv` holds for this tree's chain with the tree's current blocks and tip.
    pub fn save_to<K: KVStore>(&self, kv: &mut K) {
        let mut wb = K::WriteBatch::new();

        let prefix = concat(&variables::BLOCKS, H::NAME.as_bytes());
        for (key, _) in kv.prefix_iter(&prefix) {
            wb.delete(&key);
        }
        for (hash, index) in self.blocks() {
            let stored = StoredBlockIndex::from_index(index);
            wb.set(
                &variables::block_key(H::NAME, hash.as_bytes()),
                &stored.try_to_vec().unwrap(),
            );
        }

        match self.tip() {
            Some(tip) => wb.set(&variables::tip_key(H::NAME), &tip.hash().try_to_vec().unwrap()),
            None => wb.delete(&variables::tip_key(H::NAME)),
        }

        kv.write(wb);
        log::debug!("{} saved {} blocks", H::NAME, self.len());
    }

    /// Write the body of every payload carried by a block of this tree into `kv`, for loading back
    /// with [`StoredPayloads`](super::pluggables::StoredPayloads).
    pub fn save_payloads_to<K: KVStore>(&self, kv: &mut K)
    where
        R::Payload: BorshSerialize,
    {
        let mut wb = K::WriteBatch::new();
        let prefix = concat(&variables::PAYLOADS, H::NAME.as_bytes());
        for (key, _) in kv.prefix_iter(&prefix) {
            wb.delete(&key);
        }
        let mut saved = 0;
        for index in self.blocks().values() {
            for id in index.payload_ids() {
                if let Some(payload) = self.rule.payload(id) {
                    wb.set(&variables::payload_key(H::NAME, id.as_ref()), &payload.try_to_vec().unwrap());
                    saved += 1;
                }
            }
        }
        kv.write(wb);
        log::debug!("{} saved {} payloads", H::NAME, saved);
    }

    /// Load this tree's chain from `kv` into this empty tree. Payload bodies are looked up in
    /// `payloads`.
    ///
    /// Returns `Ok(false)` if `kv` holds no blocks of this chain. On error the tree is left partially
    /// loaded and should be dropped.
    pub fn load_from<K: KVGet, P: PayloadsProvider<R::Payload>>(
        &mut self,
        kv: &K,
        payloads: &P,
    ) -> Result<bool, BlockTreeError> {
        let mut stored = kv.stored_blocks(H::NAME)?;
        if stored.is_empty() {
            return Ok(false);
        }
        if self.is_bootstrapped() {
            return Err(BlockTreeError::AlreadyBootstrapped { chain: H::NAME });
        }
        stored.sort_by_key(|(_, block)| block.height);

        let mut with_payloads = Vec::new();
        for (hash_bytes, block) in stored {
            let header: H = block.decode_header().map_err(|err| KVGetError::DeserializeValueError {
                key: Key::Block {
                    chain: H::NAME,
                    hash: hash_bytes.clone(),
                },
                source: err,
            })?;
            let hash = header.hash();
            let mut state = ValidationState::new();
            if !self.base.restore_block(
                Arc::new(header),
                block.height,
                BlockStatus::new(block.status),
                &mut state,
            ) {
                return Err(BlockTreeError::InvalidStoredBlock {
                    chain: H::NAME,
                    hash: hash_bytes,
                    reason: state.to_string(),
                });
            }
            if let Some(index) = self.base.get_block_index_mut(&hash) {
                index.added_by_payload = block.added_by_payload;
                index.context_payload_ids = block.context_payload_ids;
            }
            if !block.payload_ids.is_empty() {
                with_payloads.push((hash, block.payload_ids));
            }
        }

        for (hash, ids) in with_payloads {
            let bodies = ids
                .iter()
                .map(|id| {
                    payloads
                        .get_payload(id)
                        .ok_or(BlockTreeError::PayloadNotFound { chain: H::NAME, id: *id })
                })
                .collect::<Result<Vec<R::Payload>, BlockTreeError>>()?;
            let mut state = ValidationState::new();
            if !self.rule.restore_payloads(&mut self.base, &hash, bodies, &mut state) {
                return Err(BlockTreeError::InvalidStoredBlock {
                    chain: H::NAME,
                    hash: hash.as_bytes().to_vec(),
                    reason: state.to_string(),
                });
            }
        }

        self.base.activate_root();
        match kv.stored_tip::<H::Hash>(H::NAME)? {
            Some(tip) if !self.contains(&tip) => {
                return Err(BlockTreeError::KVGetError(KVGetError::ValueExpectedButNotFound {
                    key: Key::Block {
                        chain: H::NAME,
                        hash: tip.as_bytes().to_vec(),
                    },
                }))
            }
            Some(tip) => {
                let mut state = ValidationState::new();
                if !self.restore_state(&tip, &mut state) {
                    return Err(BlockTreeError::InvalidStoredTip {
                        chain: H::NAME,
                        hash: tip.as_bytes().to_vec(),
                        reason: state.to_string(),
                    });
                }
            }
            None => self.determine_best_over_tips(),
        }

        log::debug!("{} loaded {} blocks", H::NAME, self.len());
        Ok(true)
    }
}
