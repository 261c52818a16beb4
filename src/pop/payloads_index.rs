/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Which blocks of a protected tree carry each payload.
//!
//! A payload may be carried by several blocks on different forks, but by at most one block of any
//! single chain. [`PayloadsIndex::find_on_chain`] is the lookup behind that rule: adding a payload
//! to a block fails if the payload is already carried by one of the block's ancestors.

use std::collections::{HashMap, HashSet};

use crate::{
    block_tree::BaseBlockTree,
    types::{block::BlockHeader, data_types::PayloadId},
};

pub struct PayloadsIndex<H: BlockHeader> {
    containing: HashMap<PayloadId, HashSet<H::Hash>>,
}

impl<H: BlockHeader> Default for PayloadsIndex<H> {
    fn default() -> Self {
        PayloadsIndex::new()
    }
}

impl<H: BlockHeader> PayloadsIndex<H> {
    pub fn new() -> PayloadsIndex<H> {
        PayloadsIndex {
            containing: HashMap::new(),
        }
    }

    pub fn add(&mut self, id: PayloadId, block: H::Hash) {
        self.containing.entry(id).or_default().insert(block);
    }

    pub fn remove(&mut self, id: &PayloadId, block: &H::Hash) {
        if let Some(blocks) = self.containing.get_mut(id) {
            blocks.remove(block);
            if blocks.is_empty() {
                self.containing.remove(id);
            }
        }
    }

    /// Drop `block` from the entries of every id in `ids`.
    pub fn remove_block<'a>(&mut self, block: &H::Hash, ids: impl IntoIterator<Item = &'a PayloadId>) {
        for id in ids {
            self.remove(id, block);
        }
    }

    /// Every block known to carry `id`.
    pub fn find(&self, id: &PayloadId) -> impl Iterator<Item = &H::Hash> {
        self.containing.get(id).into_iter().flatten()
    }

    /// A block on the chain of `block`, below it, that already carries `id`.
    pub fn find_on_chain(&self, id: &PayloadId, block: &H::Hash, base: &BaseBlockTree<H>) -> Option<H::Hash> {
        self.find(id)
            .find(|carrier| *carrier != block && base.is_ancestor(carrier, block))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.containing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containing.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::Configuration,
        params::AltChainParams,
        types::{
            block::AltBlock,
            data_types::{AltHash, BlockHeight},
            validation::ValidationState,
        },
    };

    fn block(tag: u8, height: u32, previous: AltHash) -> Arc<AltBlock> {
        let mut bytes = [0u8; 32];
        bytes[0] = tag + 1;
        bytes[1..5].copy_from_slice(&height.to_be_bytes());
        Arc::new(AltBlock {
            hash: AltHash::new(bytes),
            previous_block: previous,
            height: BlockHeight::new(height),
            timestamp: 1_600_000_000 + height,
        })
    }

    #[test]
    fn finds_carriers_on_the_same_chain_only() {
        let mut base = BaseBlockTree::<AltBlock>::new(AltChainParams::regtest(), Configuration::default());
        let mut state = ValidationState::new();
        let genesis = block(0, 0, AltHash::zero());
        let genesis_hash = genesis.hash;
        assert!(base.bootstrap_with_genesis(genesis, &mut state), "{}", state);
        let a1 = block(1, 1, genesis_hash);
        let a2 = block(1, 2, a1.hash);
        let b1 = block(2, 1, genesis_hash);
        let (a1, a2, b1) = (a1.hash, a2.hash, b1.hash);
        for header in [block(1, 1, genesis_hash), block(1, 2, a1), block(2, 1, genesis_hash)] {
            assert!(base.validate_and_add_block(header, true, &mut state), "{}", state);
        }

        let mut index = PayloadsIndex::<AltBlock>::new();
        let id = PayloadId::new([7; 32]);
        index.add(id, a1);

        assert_eq!(index.find_on_chain(&id, &a2, &base), Some(a1));
        assert_eq!(index.find_on_chain(&id, &a1, &base), None);
        assert_eq!(index.find_on_chain(&id, &b1, &base), None);

        index.add(id, b1);
        assert_eq!(index.find(&id).count(), 2);
        index.remove_block(&a1, [&id]);
        assert_eq!(index.find_on_chain(&id, &a2, &base), None);
        index.remove(&id, &b1);
        assert!(index.is_empty());
    }
}
