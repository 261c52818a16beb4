//! Bootstrapping a `PopContext`, and saving and loading all of its trees through one store.

use log::LevelFilter;

use pop_rs::{
    config::Configuration,
    context::PopContext,
    mempool::SubmitResult,
    miner::{alt_regtest_genesis, btc_regtest_genesis, vbk_regtest_genesis, Miner},
    params::{AltChainParams, BtcChainParams, VbkChainParams},
    types::{block::BlockHeader, payloads::AltPayload, validation::ValidationState},
};

mod common;

use common::{
    fixtures::{ancestor, assert_alt_invariants, extend, fingerprint, header, tip, vbk_tree, vtb_for},
    logging::setup_logger,
    mem_db::MemDB,
};

fn empty_context() -> PopContext {
    PopContext::with_params(
        BtcChainParams::regtest(),
        VbkChainParams::regtest(),
        AltChainParams::regtest(),
        Configuration::default(),
    )
}

fn bootstrapped_context() -> PopContext {
    let mut context = empty_context();
    let mut state = ValidationState::new();
    assert!(
        context.bootstrap(btc_regtest_genesis(), vbk_regtest_genesis(), alt_regtest_genesis(), &mut state),
        "{}",
        state
    );
    context
}

// Submit `payloads` and mine an ALT block on the active tip carrying whatever the mempool offers.
fn mine_from_mempool(context: &mut PopContext, miner: &mut Miner, payloads: Vec<AltPayload>) {
    for payload in payloads {
        let mut state = ValidationState::new();
        assert!(context.submit(payload, &mut state).is_kept(), "{}", state);
    }
    let pop_data = context.generate_pop_data();
    let alt_tip = tip(context.alt_tree());
    let block = miner.mine_alt(context.alt_tree(), &alt_tip);
    let hash = block.hash();
    let mut state = ValidationState::new();
    assert!(context.accept_block_header(block, &mut state), "{}", state);
    assert!(context.accept_block(&hash, pop_data, &mut state), "{}", state);
    assert_eq!(tip(context.alt_tree()), hash);
}

/// Three trees with VBK context, a VTB and an ATV survive a round trip through one store, payload
/// bodies included.
#[test]
fn save_and_load_all_trees_test() {
    setup_logger(LevelFilter::Info);
    let mut miner = Miner::new();
    let mut context = bootstrapped_context();

    let mut source = vbk_tree();
    let source_from = tip(&source);
    let source_tip = extend(&mut source, &source_from, 21, |tree, prev| miner.mine_vbk(tree, prev));
    let endorsed = ancestor(&source, &source_tip, 20);
    let (containing, vtb) = vtb_for(&source, &mut miner, &endorsed, &source_tip);
    let mut payloads: Vec<AltPayload> = (1..=21)
        .map(|height| AltPayload::VbkBlock(header(&source, &ancestor(&source, &source_tip, height))))
        .collect();
    payloads.push(AltPayload::VbkBlock(containing));
    payloads.push(AltPayload::Vtb(vtb));
    mine_from_mempool(&mut context, &mut miner, payloads);
    assert_eq!(context.btc_tree().len(), 2);

    let endorsed = header(context.alt_tree(), &tip(context.alt_tree()));
    let vbk_tip = tip(context.vbk_tree());
    let atv = miner.mine_atv(context.vbk_tree(), &vbk_tip, endorsed);
    mine_from_mempool(&mut context, &mut miner, vec![AltPayload::Atv(atv)]);
    assert!(context.mempool().is_empty());
    assert_alt_invariants(context.alt_tree());

    let mut db = MemDB::new();
    context.save_all_trees(&mut db);

    let mut loaded = empty_context();
    assert!(loaded.load_all_trees(&db).unwrap());
    assert_eq!(fingerprint(loaded.btc_tree()), fingerprint(context.btc_tree()));
    assert_eq!(fingerprint(loaded.vbk_tree()), fingerprint(context.vbk_tree()));
    assert_eq!(fingerprint(loaded.alt_tree()), fingerprint(context.alt_tree()));
    assert_alt_invariants(loaded.alt_tree());

    // The loaded context keeps working: its next block can carry a fresh payload.
    let vbk_tip = tip(loaded.vbk_tree());
    let block = miner.mine_vbk(loaded.vbk_tree(), &vbk_tip);
    let mut state = ValidationState::new();
    assert_eq!(loaded.submit(AltPayload::VbkBlock(block), &mut state), SubmitResult::Connected);
    mine_from_mempool(&mut loaded, &mut miner, Vec::new());
    assert_alt_invariants(loaded.alt_tree());
}

/// Loading from an empty store leaves the context empty.
#[test]
fn load_from_empty_store_test() {
    setup_logger(LevelFilter::Info);
    let db = MemDB::new();
    let mut context = empty_context();
    assert!(!context.load_all_trees(&db).unwrap());
    assert!(!context.alt_tree().is_bootstrapped());
}
