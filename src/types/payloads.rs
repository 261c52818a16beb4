/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Endorsements, and the Proof-of-Proof payloads that carry them.
//!
//! Two kinds of payload exist:
//! - A [`Vtb`] (VeriBlock-to-Bitcoin) proves that a VBK block was published in a BTC block. It is
//!   added to a VBK block and yields a [`BtcEndorsement`].
//! - An [`Atv`] (Altchain-to-VeriBlock) proves that an ALT block was published in a VBK block. It is
//!   added to an ALT block and yields a [`VbkEndorsement`].
//!
//! ALT blocks additionally carry VBK context blocks and VTBs, so that the VBK tree an ALT tree
//! depends on can be kept up to date through ALT blocks alone. See [`AltPayload`].

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    block::{AltBlock, BlockHeader, BtcBlock, VbkBlock},
    data_types::{AltHash, BlockHeight, BtcHash, CryptoHash, EndorsementId, PayloadId, VbkHash},
};

/// Proof, carried by the block `containing_hash`, that the block `endorsed_hash` existed when
/// `block_of_proof` was mined in the protecting chain.
///
/// `E` is the hash type of the protected chain and `G` that of the protecting chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endorsement<E, G> {
    pub id: EndorsementId,
    pub endorsed_hash: E,
    pub endorsed_height: BlockHeight,
    pub containing_hash: E,
    pub block_of_proof: G,
}

/// Names an endorsement owned by the block `containing_hash`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EndorsementKey<E> {
    pub containing_hash: E,
    pub id: EndorsementId,
}

/// Endorsement of a VBK block, proven by a BTC block.
pub type BtcEndorsement = Endorsement<VbkHash, BtcHash>;

/// Endorsement of an ALT block, proven by a VBK block.
pub type VbkEndorsement = Endorsement<AltHash, VbkHash>;

/// VBK transaction that publishes a VBK block into Bitcoin.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct VbkPopTx {
    pub published_block: VbkBlock,
    pub block_of_proof: BtcBlock,
    /// BTC blocks that connect `block_of_proof` to the BTC blocks the VBK chain already knows,
    /// oldest first.
    pub block_of_proof_context: Vec<BtcBlock>,
}

impl VbkPopTx {
    pub fn id(&self) -> EndorsementId {
        CryptoHash::digest_of(self)
    }
}

/// VeriBlock-to-Bitcoin publication: a [`VbkPopTx`] mined into the VBK block `containing_block`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Vtb {
    pub transaction: VbkPopTx,
    pub containing_block: VbkHash,
}

impl Vtb {
    pub fn id(&self) -> PayloadId {
        CryptoHash::digest_of(self)
    }

    pub fn endorsement(&self) -> BtcEndorsement {
        Endorsement {
            id: self.transaction.id(),
            endorsed_hash: self.transaction.published_block.hash(),
            endorsed_height: self.transaction.published_block.height,
            containing_hash: self.containing_block,
            block_of_proof: self.transaction.block_of_proof.hash(),
        }
    }
}

/// VBK transaction that publishes an ALT block into VeriBlock.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct VbkTx {
    pub published_block: AltBlock,
}

impl VbkTx {
    pub fn id(&self) -> EndorsementId {
        CryptoHash::digest_of(self)
    }
}

/// Altchain-to-VeriBlock publication: a [`VbkTx`] mined into the VBK block `block_of_proof`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Atv {
    pub transaction: VbkTx,
    pub block_of_proof: VbkBlock,
}

impl Atv {
    pub fn id(&self) -> PayloadId {
        CryptoHash::digest_of(self)
    }

    /// The endorsement this ATV yields when carried by the ALT block `containing_hash`.
    pub fn endorsement(&self, containing_hash: AltHash) -> VbkEndorsement {
        Endorsement {
            id: self.transaction.id(),
            endorsed_hash: self.transaction.published_block.hash,
            endorsed_height: self.transaction.published_block.height,
            containing_hash,
            block_of_proof: self.block_of_proof.hash(),
        }
    }
}

/// A single payload that can be added to an ALT block.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum AltPayload {
    VbkBlock(VbkBlock),
    Vtb(Vtb),
    Atv(Atv),
}

impl AltPayload {
    pub fn id(&self) -> PayloadId {
        match self {
            AltPayload::VbkBlock(block) => context_block_id(&block.hash()),
            AltPayload::Vtb(vtb) => vtb.id(),
            AltPayload::Atv(atv) => atv.id(),
        }
    }
}

/// Payload id of the VBK block `hash` carried as context by an ALT block.
pub fn context_block_id(hash: &VbkHash) -> PayloadId {
    CryptoHash::from_digest(&pad_to_32(hash.as_ref()))
}

fn pad_to_32(bytes: &[u8]) -> [u8; 32] {
    let mut padded = [0u8; 32];
    padded[..bytes.len()].copy_from_slice(bytes);
    padded
}

/// Everything an ALT block carries for Proof-of-Proof, grouped by kind.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PopData {
    pub context: Vec<VbkBlock>,
    pub vtbs: Vec<Vtb>,
    pub atvs: Vec<Atv>,
}

impl PopData {
    pub fn is_empty(&self) -> bool {
        self.context.is_empty() && self.vtbs.is_empty() && self.atvs.is_empty()
    }

    /// Flatten into the order payloads are applied in: context blocks, then VTBs, then ATVs.
    pub fn into_payloads(self) -> Vec<AltPayload> {
        let mut payloads = Vec::with_capacity(self.context.len() + self.vtbs.len() + self.atvs.len());
        payloads.extend(self.context.into_iter().map(AltPayload::VbkBlock));
        payloads.extend(self.vtbs.into_iter().map(AltPayload::Vtb));
        payloads.extend(self.atvs.into_iter().map(AltPayload::Atv));
        payloads
    }
}
