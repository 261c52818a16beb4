//! Payloads carried by ALT blocks, and fork resolution of an ALT tree protected by a VBK tree.

use log::LevelFilter;

use pop_rs::{
    block_tree::AltBlockTree,
    miner::Miner,
    types::{
        block::BlockHeader,
        data_types::{AltHash, VbkHash},
        payloads::AltPayload,
        validation::ValidationState,
    },
};

mod common;

use common::{
    fixtures::{
        alt_tree, ancestor, assert_alt_invariants, endorse_alt_block, extend, fingerprint, header, tip, vbk_context,
        vbk_tree, vtb_for,
    },
    logging::setup_logger,
};

fn mine(alt: &mut AltBlockTree, miner: &mut Miner, from: &AltHash, count: usize) -> AltHash {
    extend(alt, from, count, |tree, prev| miner.mine_alt(tree, prev))
}

/// An ALT fork whose keystone was published into VBK beats a longer fork without publications.
#[test]
fn endorsed_fork_wins_test() {
    setup_logger(LevelFilter::Info);
    let mut alt = alt_tree();
    let mut miner = Miner::new();
    let alt_from = tip(&alt);
    let common = mine(&mut alt, &mut miner, &alt_from, 2);
    let a = mine(&mut alt, &mut miner, &common, 10);
    let b = mine(&mut alt, &mut miner, &common, 6);
    assert_eq!(tip(&alt), a);

    let b5 = ancestor(&alt, &b, 5);
    let b9 = endorse_alt_block(&mut alt, &mut miner, &b5, &b);
    assert_eq!(tip(&alt), b9);
    assert_eq!(alt.get_block_index(&b5).unwrap().endorsed_by().len(), 1);
    assert_eq!(alt.protecting_tree().tip().unwrap().height().int(), 1);
    assert!(alt.pop_score(&a).unwrap() > 0);
    assert_alt_invariants(&alt);

    let a13 = mine(&mut alt, &mut miner, &a, 1);
    assert_eq!(tip(&alt), b9);
    assert!(!alt.get_block_index(&a13).unwrap().is_applied());
    assert_alt_invariants(&alt);
}

/// VBK context blocks and a VTB carried by an ALT block update the VBK tree, and through it the BTC
/// tree.
#[test]
fn vbk_context_and_vtb_test() {
    setup_logger(LevelFilter::Info);
    let mut source = vbk_tree();
    let mut miner = Miner::new();
    let source_from = tip(&source);
    let source_tip = extend(&mut source, &source_from, 21, |tree, prev| miner.mine_vbk(tree, prev));
    let endorsed: VbkHash = ancestor(&source, &source_tip, 20);
    let (containing, vtb) = vtb_for(&source, &mut miner, &endorsed, &source_tip);
    let containing_hash = containing.hash();
    let mut state = ValidationState::new();
    assert!(source.accept_block_header(containing, &mut state), "{}", state);

    let mut alt = alt_tree();
    let mut payloads = vbk_context(&source, &alt, &containing_hash);
    assert_eq!(payloads.len(), 22);
    payloads.push(AltPayload::Vtb(vtb.clone()));

    let alt_genesis = tip(&alt);
    let block = miner.mine_alt(&alt, &alt_genesis);
    let block_hash = block.hash();
    assert!(alt.accept_block_header(block, &mut state), "{}", state);
    assert!(alt.add_payloads(&block_hash, payloads, &mut state), "{}", state);

    let vbk = alt.protecting_tree();
    assert_eq!(tip(vbk), containing_hash);
    assert_eq!(vbk.get_block_index(&endorsed).unwrap().endorsed_by().len(), 1);
    assert_eq!(vbk.protecting_tree().len(), 2);
    assert_eq!(alt.get_block_index(&block_hash).unwrap().payload_ids().len(), 23);
    assert_alt_invariants(&alt);

    // Moving the ALT tree off the block takes everything it brought with it.
    let mut state = ValidationState::new();
    assert!(alt.set_state(&alt_genesis, &mut state), "{}", state);
    assert_eq!(alt.protecting_tree().len(), 1);
    assert_eq!(alt.protecting_tree().protecting_tree().len(), 1);
    assert_alt_invariants(&alt);

    assert!(alt.set_state(&block_hash, &mut state), "{}", state);
    assert_eq!(tip(alt.protecting_tree()), containing_hash);
    assert_alt_invariants(&alt);

    // The VTB can not be carried a second time on the same chain.
    let next = mine(&mut alt, &mut miner, &block_hash, 1);
    let mut state = ValidationState::new();
    assert!(!alt.add_payloads(&next, vec![AltPayload::Vtb(vtb)], &mut state));
    assert!(state.has_reason("payload-duplicate"), "{}", state);
}

/// If one payload fails, none of the payloads of the call are added.
#[test]
fn add_payloads_is_atomic_test() {
    setup_logger(LevelFilter::Info);
    let mut alt = alt_tree();
    let mut miner = Miner::new();
    let alt_from = tip(&alt);
    let alt_tip = mine(&mut alt, &mut miner, &alt_from, 3);
    let vbk_tip = tip(alt.protecting_tree());

    let endorsed = header(&alt, &ancestor(&alt, &alt_tip, 2));
    let good = miner.mine_atv(alt.protecting_tree(), &vbk_tip, endorsed.clone());
    let mut bad = miner.mine_atv(alt.protecting_tree(), &vbk_tip, endorsed);
    bad.block_of_proof.previous_block = VbkHash::new([7; 24]);

    let containing = miner.mine_alt(&alt, &alt_tip);
    let containing_hash = containing.hash();
    let mut state = ValidationState::new();
    assert!(alt.accept_block_header(containing, &mut state), "{}", state);

    let before = (
        fingerprint(&alt),
        fingerprint(alt.protecting_tree()),
        fingerprint(alt.protecting_tree().protecting_tree()),
    );
    assert!(!alt.add_payloads(
        &containing_hash,
        vec![AltPayload::Atv(good), AltPayload::Atv(bad)],
        &mut state
    ));
    assert!(state.path().starts_with("ALT-invalid-payloads"), "{}", state);

    let after = (
        fingerprint(&alt),
        fingerprint(alt.protecting_tree()),
        fingerprint(alt.protecting_tree().protecting_tree()),
    );
    assert_eq!(after, before);
    assert_eq!(tip(&alt), containing_hash);
    assert_alt_invariants(&alt);
}

#[test]
fn remove_payloads_test() {
    let mut alt = alt_tree();
    let mut miner = Miner::new();
    let alt_from = tip(&alt);
    let alt_tip = mine(&mut alt, &mut miner, &alt_from, 3);
    let endorsed = ancestor(&alt, &alt_tip, 1);
    let containing = endorse_alt_block(&mut alt, &mut miner, &endorsed, &alt_tip);
    assert_eq!(alt.protecting_tree().len(), 2);

    let ids = alt.get_block_index(&containing).unwrap().payload_ids().to_vec();
    alt.remove_payloads(&containing, &ids);
    assert!(alt.get_block_index(&endorsed).unwrap().endorsed_by().is_empty());
    assert_eq!(alt.protecting_tree().len(), 1);
    assert_eq!(tip(&alt), containing);
    assert!(ids.iter().all(|id| alt.payload(id).is_none()));
    assert_alt_invariants(&alt);
}

#[test]
fn unknown_containing_block_test() {
    let mut alt = alt_tree();
    let mut miner = Miner::new();
    let alt_tip = tip(&alt);
    let vbk_tip = tip(alt.protecting_tree());
    let atv = miner.mine_atv(alt.protecting_tree(), &vbk_tip, header(&alt, &alt_tip));

    let mut state = ValidationState::new();
    assert!(!alt.add_payloads(&AltHash::new([1; 32]), vec![AltPayload::Atv(atv)], &mut state));
    assert_eq!(state.path(), "ALT-bad-containing");
}

/// A payload carried by an ancestor is rejected, while a block on another fork may carry it too.
#[test]
fn duplicate_payload_test() {
    setup_logger(LevelFilter::Info);
    let mut source = vbk_tree();
    let mut miner = Miner::new();
    let source_from = tip(&source);
    let source_tip = extend(&mut source, &source_from, 2, |tree, prev| miner.mine_vbk(tree, prev));

    let mut alt = alt_tree();
    let context = vbk_context(&source, &alt, &source_tip);
    assert_eq!(context.len(), 2);
    let genesis = tip(&alt);
    let a1 = mine(&mut alt, &mut miner, &genesis, 1);
    let mut state = ValidationState::new();
    assert!(alt.add_payloads(&a1, context.clone(), &mut state), "{}", state);

    let a2 = mine(&mut alt, &mut miner, &a1, 1);
    let before = (fingerprint(&alt), fingerprint(alt.protecting_tree()));
    assert!(!alt.add_payloads(&a2, vec![context[1].clone()], &mut state));
    assert_eq!(state.path(), "ALT-invalid-payloads+payload-duplicate");
    assert_eq!((fingerprint(&alt), fingerprint(alt.protecting_tree())), before);
    assert_eq!(tip(&alt), a2);

    let b1 = mine(&mut alt, &mut miner, &genesis, 1);
    let mut state = ValidationState::new();
    assert!(alt.add_payloads(&b1, context.clone(), &mut state), "{}", state);
    assert_eq!(alt.rule().payloads_index().find(&context[0].id()).count(), 2);
    assert_alt_invariants(&alt);

    // Once the ancestor no longer carries it, the payload is accepted.
    let ids = vec![context[1].id()];
    alt.remove_payloads(&a1, &ids);
    let mut state = ValidationState::new();
    assert!(alt.add_payloads(&a2, vec![context[1].clone()], &mut state), "{}", state);
    assert_alt_invariants(&alt);
}

/// Finalizing never prunes blocks that endorsements above the final block still point to, so a
/// later reorg can take those endorsements back.
#[test]
fn reorg_after_finalization_test() {
    setup_logger(LevelFilter::Info);
    let mut alt = alt_tree();
    let mut miner = Miner::new();
    let alt_from = tip(&alt);
    let t10 = mine(&mut alt, &mut miner, &alt_from, 10);
    let endorsed = ancestor(&alt, &t10, 8);
    let t11 = endorse_alt_block(&mut alt, &mut miner, &endorsed, &t10);
    assert_eq!(tip(&alt), t11);

    assert!(alt.finalize_block(&t10, 0));
    assert!(alt.contains(&endorsed));
    assert_eq!(alt.root().unwrap().height().int(), 0);
    assert!(alt.get_block_index(&t10).unwrap().is_finalized());

    let fork = mine(&mut alt, &mut miner, &t10, 2);
    assert_eq!(tip(&alt), fork);
    assert!(!alt.get_block_index(&t11).unwrap().is_applied());
    assert!(alt.get_block_index(&endorsed).unwrap().endorsed_by().is_empty());
    assert_alt_invariants(&alt);
}

/// Blocks far enough below the final block are still pruned.
#[test]
fn finalization_prunes_beyond_settlement_interval_test() {
    let mut alt = alt_tree();
    let mut miner = Miner::new();
    let settlement = alt.params().pop.endorsement_settlement_interval;
    let alt_from = tip(&alt);
    let chain_tip = mine(&mut alt, &mut miner, &alt_from, settlement as usize + 10);

    assert!(alt.finalize_block(&chain_tip, 0));
    assert_eq!(alt.root().unwrap().height().int(), 10);
    assert_eq!(alt.len(), settlement as usize + 1);
    assert_alt_invariants(&alt);
}
