//! Trees bootstrapped at regtest genesis, and helpers that mine blocks and payloads into them.

use std::collections::{BTreeMap, HashMap};

use pop_rs::{
    block_tree::{
        best_chain::BestChainRule, invariants, AltBlockTree, BlockTree, BtcBlockTree, VbkBlockTree,
    },
    config::Configuration,
    miner::{alt_regtest_genesis, btc_regtest_genesis, missing_context, vbk_regtest_genesis, Miner},
    params::{AltChainParams, BtcChainParams, VbkChainParams},
    types::{
        block::{BlockHeader, VbkBlock},
        data_types::{AltHash, BlockHeight, PayloadId, VbkHash},
        payloads::{AltPayload, Vtb},
        validation::ValidationState,
    },
};

pub(crate) fn btc_tree() -> BtcBlockTree {
    let mut btc = BtcBlockTree::new(BtcChainParams::regtest());
    let mut state = ValidationState::new();
    assert!(btc.bootstrap_with_genesis(btc_regtest_genesis(), &mut state), "{}", state);
    btc
}

pub(crate) fn vbk_tree_with_config(config: Configuration) -> VbkBlockTree {
    let mut vbk = VbkBlockTree::with_protecting_tree(VbkChainParams::regtest(), btc_tree(), config);
    let mut state = ValidationState::new();
    assert!(vbk.bootstrap_with_genesis(vbk_regtest_genesis(), &mut state), "{}", state);
    vbk
}

pub(crate) fn vbk_tree() -> VbkBlockTree {
    vbk_tree_with_config(Configuration::default())
}

pub(crate) fn alt_tree() -> AltBlockTree {
    let mut alt = AltBlockTree::with_protecting_tree(AltChainParams::regtest(), vbk_tree(), Configuration::default());
    let mut state = ValidationState::new();
    assert!(alt.bootstrap_with_genesis(alt_regtest_genesis(), &mut state), "{}", state);
    alt
}

pub(crate) fn tip<H: BlockHeader, R: BestChainRule<H>>(tree: &BlockTree<H, R>) -> H::Hash {
    tree.tip().expect("a bootstrapped tree has an active tip").hash()
}

pub(crate) fn ancestor<H: BlockHeader, R: BestChainRule<H>>(tree: &BlockTree<H, R>, hash: &H::Hash, height: u32) -> H::Hash {
    tree.ancestor(hash, BlockHeight::new(height))
        .expect("the ancestor is in the tree")
        .hash()
}

pub(crate) fn header<H: BlockHeader, R: BestChainRule<H>>(tree: &BlockTree<H, R>, hash: &H::Hash) -> H {
    tree.get_block_index(hash).expect("the block is in the tree").header().clone()
}

// Mine `count` blocks on top of `from` with `mine`, accepting each one. Returns the last hash.
pub(crate) fn extend<H, R>(
    tree: &mut BlockTree<H, R>,
    from: &H::Hash,
    count: usize,
    mut mine: impl FnMut(&BlockTree<H, R>, &H::Hash) -> H,
) -> H::Hash
where
    H: BlockHeader,
    R: BestChainRule<H>,
{
    let mut cursor = *from;
    for _ in 0..count {
        let block = mine(tree, &cursor);
        cursor = block.hash();
        let mut state = ValidationState::new();
        assert!(tree.accept_block_header(block, &mut state), "{}", state);
    }
    cursor
}

// Publish the VBK block `endorsed` into the BTC tree `vbk` is protected by, through a VTB carried by
// a new VBK block mined on `containing_prev`. Returns the containing block.
pub(crate) fn endorse_vbk_block(
    vbk: &mut VbkBlockTree,
    miner: &mut Miner,
    endorsed: &VbkHash,
    containing_prev: &VbkHash,
) -> VbkHash {
    let published = header(vbk, endorsed);
    let btc_tip = tip(vbk.protecting_tree());
    let pop_tx = miner.mine_vbk_pop_tx(vbk.protecting_tree(), &btc_tip, published, Vec::new());
    let (containing, vtbs) = miner.mine_vbk_with_pop_txs(vbk, containing_prev, vec![pop_tx]);
    let containing_hash = containing.hash();

    let mut state = ValidationState::new();
    assert!(vbk.accept_block_header(containing, &mut state), "{}", state);
    assert!(vbk.add_payloads(&containing_hash, vtbs, &mut state), "{}", state);
    containing_hash
}

// Publish the ALT block `endorsed` into the VBK tree `alt` is protected by, through an ATV carried
// by a new ALT block mined on `containing_prev`. Returns the containing block.
pub(crate) fn endorse_alt_block(
    alt: &mut AltBlockTree,
    miner: &mut Miner,
    endorsed: &AltHash,
    containing_prev: &AltHash,
) -> AltHash {
    let published = header(alt, endorsed);
    let vbk_tip = tip(alt.protecting_tree());
    let atv = miner.mine_atv(alt.protecting_tree(), &vbk_tip, published);
    let containing = miner.mine_alt(alt, containing_prev);
    let containing_hash = containing.hash();

    let mut state = ValidationState::new();
    assert!(alt.accept_block_header(containing, &mut state), "{}", state);
    assert!(alt.add_payloads(&containing_hash, vec![AltPayload::Atv(atv)], &mut state), "{}", state);
    containing_hash
}

// A VTB that publishes the block `endorsed` of `source` into BTC, in a VBK block mined on
// `containing_prev` of `source`. The containing block is returned alongside, but accepted nowhere.
pub(crate) fn vtb_for(
    source: &VbkBlockTree,
    miner: &mut Miner,
    endorsed: &VbkHash,
    containing_prev: &VbkHash,
) -> (VbkBlock, Vtb) {
    let published = header(source, endorsed);
    let btc_tip = tip(source.protecting_tree());
    let pop_tx = miner.mine_vbk_pop_tx(source.protecting_tree(), &btc_tip, published, Vec::new());
    let (containing, mut vtbs) = miner.mine_vbk_with_pop_txs(source, containing_prev, vec![pop_tx]);
    (containing, vtbs.remove(0))
}

// VBK blocks of `source` that `alt`'s VBK tree lacks, up to `tip`, as ALT payloads.
pub(crate) fn vbk_context(source: &VbkBlockTree, alt: &AltBlockTree, tip: &VbkHash) -> Vec<AltPayload> {
    missing_context(source, alt.protecting_tree(), tip)
        .into_iter()
        .map(AltPayload::VbkBlock)
        .collect()
}

// Every payload carried by a block of `tree`, for loading the tree back from storage.
pub(crate) fn payload_bodies<H, R>(tree: &BlockTree<H, R>) -> HashMap<PayloadId, R::Payload>
where
    H: BlockHeader,
    R: BestChainRule<H>,
{
    let mut bodies = HashMap::new();
    for index in tree.blocks().values() {
        for id in index.payload_ids() {
            if let Some(payload) = tree.rule().payload(id) {
                bodies.insert(*id, payload.clone());
            }
        }
    }
    bodies
}

pub(crate) fn assert_invariants<H: BlockHeader, R: BestChainRule<H>>(tree: &BlockTree<H, R>) {
    if let Err(violation) = invariants::check_all(tree) {
        panic!("{} tree violates an invariant: {}", H::NAME, violation);
    }
}

pub(crate) fn assert_vbk_invariants(vbk: &VbkBlockTree) {
    assert_invariants(vbk);
    assert_invariants(vbk.protecting_tree());
    if let Err(violation) = invariants::check_journal(vbk) {
        panic!("VBK tree violates an invariant: {}", violation);
    }
}

pub(crate) fn assert_alt_invariants(alt: &AltBlockTree) {
    assert_invariants(alt);
    if let Err(violation) = invariants::check_journal(alt) {
        panic!("ALT tree violates an invariant: {}", violation);
    }
    assert_vbk_invariants(alt.protecting_tree());
}

/// Everything observable about one block, for comparing tree states.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct BlockFingerprint {
    pub(crate) status: u8,
    pub(crate) endorsed_by: usize,
    pub(crate) containing_endorsements: usize,
    pub(crate) payloads: Vec<PayloadId>,
    pub(crate) ref_count: u32,
    pub(crate) added_by_payload: bool,
}

/// Fingerprints of every block of `tree`, keyed by the `Display` of their hash, plus the active tip.
pub(crate) fn fingerprint<H: BlockHeader, R: BestChainRule<H>>(
    tree: &BlockTree<H, R>,
) -> (Option<String>, BTreeMap<String, BlockFingerprint>) {
    let blocks = tree
        .blocks()
        .iter()
        .map(|(hash, index)| {
            (
                hash.to_string(),
                BlockFingerprint {
                    status: index.status().bits(),
                    endorsed_by: index.endorsed_by().len(),
                    containing_endorsements: index.containing_endorsements().len(),
                    payloads: index.payload_ids().to_vec(),
                    ref_count: index.ref_count(),
                    added_by_payload: index.is_added_by_payload(),
                },
            )
        })
        .collect();
    (tree.tip().map(|tip| tip.hash().to_string()), blocks)
}
