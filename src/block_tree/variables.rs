/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Byte-prefixes that specify where each Block Tree variable is stored in the user-provided key-value
//! store.
//!
//! # List of State Variables
//!
//! |Variable|Type|Description|
//! |---|---|---|
//! |Blocks|chain name ++ block hash -> [`StoredBlockIndex`](super::persistence::StoredBlockIndex)|Every block of a tree: its header, height, persisted status flags and payload ids.|
//! |Tip|chain name -> block hash|The active tip of a tree when it was saved.|
//! |Payloads|chain name ++ payload id -> payload|Bodies of the payloads carried by a tree's blocks, written by [`save_payloads_to`](super::BlockTree::save_payloads_to).|
//!
//! Values are **Borsh-serialized**. Keys are formed by concatenating a one-byte prefix, the chain's
//! [name](crate::types::block::BlockHeader::NAME), and for mappings, the raw bytes of the block
//! hash. Several trees can therefore share one store.
//!
//! Endorsement ledgers, applied flags and reference counts are not stored: they are rebuilt by
//! applying the active chain when the tree is loaded.

// State variables
pub const BLOCKS: [u8; 1] = [0];
pub const TIP: [u8; 1] = [1];
pub const PAYLOADS: [u8; 1] = [2];

/// Concatenate two byteslices into one vector.
pub fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}

/// Key of the block `hash` of `chain`.
pub fn block_key(chain: &str, hash: &[u8]) -> Vec<u8> {
    concat(&concat(&BLOCKS, chain.as_bytes()), hash)
}

/// Key of the tip of `chain`.
pub fn tip_key(chain: &str) -> Vec<u8> {
    concat(&TIP, chain.as_bytes())
}

/// Key of the body of the payload `id` carried by a block of `chain`.
pub fn payload_key(chain: &str, id: &[u8]) -> Vec<u8> {
    concat(&concat(&PAYLOADS, chain.as_bytes()), id)
}
