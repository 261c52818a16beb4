/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The in-memory node of a block tree.

use std::{
    collections::{HashMap, HashSet},
    fmt::{self, Debug, Formatter},
    ops::BitOr,
    sync::Arc,
};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    block::BlockHeader,
    data_types::{BlockHeight, ChainWork, EndorsementId, PayloadId},
    payloads::{Endorsement, EndorsementKey},
};

/// Validity and state flags of a [`BlockIndex`].
///
/// A block is usable on the active chain only if none of the `FAILED_*` flags are set.
#[derive(Clone, Copy, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockStatus(u8);

impl BlockStatus {
    /// Nothing is known about the block yet.
    pub const UNKNOWN: BlockStatus = BlockStatus(0);
    /// The header passed stateless checks and connects to a known parent.
    pub const VALID_TREE: BlockStatus = BlockStatus(1 << 0);
    /// The header passed checks against its ancestors.
    pub const VALID_CONTEXTUALLY: BlockStatus = BlockStatus(1 << 1);
    /// The block itself was found invalid.
    pub const FAILED_BLOCK: BlockStatus = BlockStatus(1 << 2);
    /// An ancestor of the block is invalid.
    pub const FAILED_CHILD: BlockStatus = BlockStatus(1 << 3);
    /// One of the block's payloads could not be applied.
    pub const FAILED_POP: BlockStatus = BlockStatus(1 << 4);
    /// The block's command groups are currently executed. Never persisted.
    pub const APPLIED: BlockStatus = BlockStatus(1 << 5);
    /// The block was added by a bootstrap call.
    pub const BOOTSTRAP: BlockStatus = BlockStatus(1 << 6);
    /// The block can never be reorganized away.
    pub const FINALIZED: BlockStatus = BlockStatus(1 << 7);

    pub const FAILED_MASK: BlockStatus =
        BlockStatus(Self::FAILED_BLOCK.0 | Self::FAILED_CHILD.0 | Self::FAILED_POP.0);

    pub const fn new(bits: u8) -> BlockStatus {
        BlockStatus(bits)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Whether any of the flags in `flags` are set.
    pub const fn intersects(&self, flags: BlockStatus) -> bool {
        self.0 & flags.0 != 0
    }

    /// Whether all of the flags in `flags` are set.
    pub const fn contains(&self, flags: BlockStatus) -> bool {
        self.0 & flags.0 == flags.0
    }

    pub fn insert(&mut self, flags: BlockStatus) {
        self.0 |= flags.0;
    }

    pub fn remove(&mut self, flags: BlockStatus) {
        self.0 &= !flags.0;
    }

    /// The flags that are written to persistent storage.
    pub const fn persisted(&self) -> BlockStatus {
        BlockStatus(self.0 & !Self::APPLIED.0)
    }
}

impl BitOr for BlockStatus {
    type Output = BlockStatus;
    fn bitor(self, rhs: BlockStatus) -> BlockStatus {
        BlockStatus(self.0 | rhs.0)
    }
}

impl Debug for BlockStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        const NAMES: [&str; 8] = [
            "VALID_TREE",
            "VALID_CONTEXTUALLY",
            "FAILED_BLOCK",
            "FAILED_CHILD",
            "FAILED_POP",
            "APPLIED",
            "BOOTSTRAP",
            "FINALIZED",
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .enumerate()
            .filter(|(i, _)| self.0 & (1 << i) != 0)
            .map(|(_, name)| *name)
            .collect();
        write!(f, "BlockStatus({})", set.join("|"))
    }
}

/// The arena every [`BlockIndex`] of a tree lives in, keyed by block hash.
pub type BlockMap<H> = HashMap<<H as BlockHeader>::Hash, BlockIndex<H>>;

/// A block in a block tree, together with everything the tree knows about it.
///
/// `pprev` and `pnext` are keys into the tree's arena, never owning references. The endorsement
/// ledger lives here too: `containing_endorsements` owns the endorsements this block carries,
/// while `endorsed_by` only names (containing block, endorsement id) pairs owned elsewhere.
pub struct BlockIndex<H: BlockHeader> {
    pub(crate) header: Arc<H>,
    pub(crate) hash: H::Hash,
    pub(crate) pprev: Option<H::Hash>,
    pub(crate) pnext: HashSet<H::Hash>,
    pub(crate) height: BlockHeight,
    pub(crate) chain_work: ChainWork,
    pub(crate) status: BlockStatus,
    pub(crate) containing_endorsements:
        HashMap<EndorsementId, Endorsement<H::Hash, H::ProtectingHash>>,
    pub(crate) endorsed_by: Vec<EndorsementKey<H::Hash>>,
    pub(crate) payload_ids: Vec<PayloadId>,
    pub(crate) ref_count: u32,
    /// Set if the block was inserted by a payload of the protected tree rather than accepted on its
    /// own. Such a block is removed again once no payload references it.
    pub(crate) added_by_payload: bool,
    /// Ids among `payload_ids` that were added by payloads of the protected tree.
    pub(crate) context_payload_ids: Vec<PayloadId>,
}

impl<H: BlockHeader> BlockIndex<H> {
    pub(crate) fn new(
        header: Arc<H>,
        pprev: Option<H::Hash>,
        height: BlockHeight,
        chain_work: ChainWork,
    ) -> BlockIndex<H> {
        BlockIndex {
            hash: header.hash(),
            header,
            pprev,
            pnext: HashSet::new(),
            height,
            chain_work,
            status: BlockStatus::VALID_TREE,
            containing_endorsements: HashMap::new(),
            endorsed_by: Vec::new(),
            payload_ids: Vec::new(),
            ref_count: 0,
            added_by_payload: false,
            context_payload_ids: Vec::new(),
        }
    }

    pub fn header(&self) -> &H {
        &self.header
    }

    pub fn header_arc(&self) -> Arc<H> {
        self.header.clone()
    }

    pub fn hash(&self) -> H::Hash {
        self.hash
    }

    pub fn pprev(&self) -> Option<H::Hash> {
        self.pprev
    }

    pub fn pnext(&self) -> &HashSet<H::Hash> {
        &self.pnext
    }

    pub fn height(&self) -> BlockHeight {
        self.height
    }

    pub fn chain_work(&self) -> ChainWork {
        self.chain_work
    }

    pub fn timestamp(&self) -> u32 {
        self.header.timestamp()
    }

    pub fn status(&self) -> BlockStatus {
        self.status
    }

    /// Whether the block may be part of the active chain.
    pub fn is_valid(&self) -> bool {
        !self.status.intersects(BlockStatus::FAILED_MASK)
    }

    pub fn is_applied(&self) -> bool {
        self.status.contains(BlockStatus::APPLIED)
    }

    pub fn is_finalized(&self) -> bool {
        self.status.contains(BlockStatus::FINALIZED)
    }

    pub fn is_bootstrap(&self) -> bool {
        self.status.contains(BlockStatus::BOOTSTRAP)
    }

    pub fn containing_endorsements(
        &self,
    ) -> &HashMap<EndorsementId, Endorsement<H::Hash, H::ProtectingHash>> {
        &self.containing_endorsements
    }

    pub fn endorsed_by(&self) -> &[EndorsementKey<H::Hash>] {
        &self.endorsed_by
    }

    /// Ids of the payloads added to this block, in the order they were added.
    pub fn payload_ids(&self) -> &[PayloadId] {
        &self.payload_ids
    }

    pub fn has_payload(&self, id: &PayloadId) -> bool {
        self.payload_ids.contains(id)
    }

    /// Number of payload commands that currently reference this block as context.
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn is_added_by_payload(&self) -> bool {
        self.added_by_payload
    }

    pub fn context_payload_ids(&self) -> &[PayloadId] {
        &self.context_payload_ids
    }
}

impl<H: BlockHeader> Debug for BlockIndex<H> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockIndex")
            .field("chain", &H::NAME)
            .field("hash", &self.hash)
            .field("height", &self.height)
            .field("chain_work", &self.chain_work)
            .field("status", &self.status)
            .field("endorsements", &self.containing_endorsements.len())
            .field("endorsed_by", &self.endorsed_by.len())
            .field("payloads", &self.payload_ids.len())
            .field("ref_count", &self.ref_count)
            .field("added_by_payload", &self.added_by_payload)
            .finish()
    }
}
