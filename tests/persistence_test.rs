//! Saving block trees into a key-value store and loading them back.

use std::collections::HashMap;

use log::LevelFilter;

use pop_rs::{
    block_tree::{
        pluggables::{BlockTreeError, NoPayloads},
        AltBlockTree, BtcBlockTree, VbkBlockTree,
    },
    config::Configuration,
    miner::Miner,
    params::{AltChainParams, BtcChainParams, VbkChainParams},
    types::{
        block::BlockHeader,
        data_types::PayloadId,
        payloads::{AltPayload, Vtb},
        validation::ValidationState,
    },
};

mod common;

use common::{
    fixtures::{
        alt_tree, ancestor, assert_alt_invariants, btc_tree, endorse_alt_block, extend, fingerprint, payload_bodies,
        tip, vbk_context, vbk_tree, vtb_for,
    },
    logging::setup_logger,
    mem_db::MemDB,
};

// An ALT tree whose first block carries VBK context and a VTB, and whose third block carries an ATV.
fn populated_alt(miner: &mut Miner) -> AltBlockTree {
    let mut source = vbk_tree();
    let source_from = tip(&source);
    let source_tip = extend(&mut source, &source_from, 21, |tree, prev| miner.mine_vbk(tree, prev));
    let endorsed = ancestor(&source, &source_tip, 20);
    let (containing, vtb) = vtb_for(&source, miner, &endorsed, &source_tip);
    let containing_hash = containing.hash();
    let mut state = ValidationState::new();
    assert!(source.accept_block_header(containing, &mut state), "{}", state);

    let mut alt = alt_tree();
    let mut payloads = vbk_context(&source, &alt, &containing_hash);
    payloads.push(AltPayload::Vtb(vtb));
    let alt_genesis = tip(&alt);
    let first = miner.mine_alt(&alt, &alt_genesis);
    let first_hash = first.hash();
    assert!(alt.accept_block_header(first, &mut state), "{}", state);
    assert!(alt.add_payloads(&first_hash, payloads, &mut state), "{}", state);

    let second = extend(&mut alt, &first_hash, 1, |tree, prev| miner.mine_alt(tree, prev));
    endorse_alt_block(&mut alt, miner, &first_hash, &second);
    alt
}

fn save_all(alt: &AltBlockTree, db: &mut MemDB) {
    alt.protecting_tree().protecting_tree().save_to(db);
    alt.protecting_tree().save_to(db);
    alt.save_to(db);
}

// Load all three trees from `db`, taking payload bodies from `saved`.
fn load_all(db: &MemDB, saved: &AltBlockTree) -> AltBlockTree {
    let mut btc = BtcBlockTree::new(BtcChainParams::regtest());
    assert!(btc.load_from(db, &NoPayloads).unwrap());
    let mut vbk = VbkBlockTree::with_protecting_tree(VbkChainParams::regtest(), btc, Configuration::default());
    assert!(vbk.load_from(db, &payload_bodies(saved.protecting_tree())).unwrap());
    let mut alt = AltBlockTree::with_protecting_tree(AltChainParams::regtest(), vbk, Configuration::default());
    assert!(alt.load_from(db, &payload_bodies(saved)).unwrap());
    alt
}

#[test]
fn save_and_load_test() {
    setup_logger(LevelFilter::Info);
    let mut miner = Miner::new();
    let alt = populated_alt(&mut miner);
    let mut db = MemDB::new();
    save_all(&alt, &mut db);
    assert!(db.len() > 0);

    let loaded = load_all(&db, &alt);

    assert_eq!(tip(&loaded), tip(&alt));
    assert_eq!(loaded.len(), alt.len());
    assert_eq!(tip(loaded.protecting_tree()), tip(alt.protecting_tree()));
    assert_eq!(loaded.protecting_tree().len(), alt.protecting_tree().len());
    assert_eq!(
        tip(loaded.protecting_tree().protecting_tree()),
        tip(alt.protecting_tree().protecting_tree())
    );
    for (hash, index) in alt.blocks() {
        let restored = loaded.get_block_index(hash).unwrap();
        assert_eq!(restored.payload_ids(), index.payload_ids());
        assert_eq!(restored.endorsed_by().len(), index.endorsed_by().len());
        assert_eq!(restored.is_applied(), index.is_applied());
    }
    for (hash, index) in alt.protecting_tree().blocks() {
        let restored = loaded.protecting_tree().get_block_index(hash).unwrap();
        assert_eq!(restored.payload_ids(), index.payload_ids());
        assert_eq!(restored.endorsed_by().len(), index.endorsed_by().len());
    }
    assert_alt_invariants(&loaded);

    // Saving the loaded trees again yields the same store contents.
    let mut again = MemDB::new();
    save_all(&loaded, &mut again);
    assert_eq!(again.len(), db.len());
}

#[test]
fn load_from_empty_store_test() {
    let db = MemDB::new();
    let mut btc = BtcBlockTree::new(BtcChainParams::regtest());
    assert!(!btc.load_from(&db, &NoPayloads).unwrap());
    assert!(!btc.is_bootstrapped());
}

#[test]
fn load_into_bootstrapped_tree_test() {
    let mut db = MemDB::new();
    btc_tree().save_to(&mut db);

    let mut btc = btc_tree();
    assert!(matches!(
        btc.load_from(&db, &NoPayloads),
        Err(BlockTreeError::AlreadyBootstrapped { chain: "BTC" })
    ));
}

#[test]
fn missing_payload_test() {
    let mut miner = Miner::new();
    let alt = populated_alt(&mut miner);
    let mut db = MemDB::new();
    save_all(&alt, &mut db);

    let mut btc = BtcBlockTree::new(BtcChainParams::regtest());
    assert!(btc.load_from(&db, &NoPayloads).unwrap());
    let mut vbk = VbkBlockTree::with_protecting_tree(VbkChainParams::regtest(), btc, Configuration::default());
    let no_bodies: HashMap<PayloadId, Vtb> = HashMap::new();
    assert!(matches!(
        vbk.load_from(&db, &no_bodies),
        Err(BlockTreeError::PayloadNotFound { chain: "VBK", .. })
    ));
}

/// Everything a payload brought into the protecting trees before saving is taken back out by the
/// loaded trees exactly as by the saved ones.
#[test]
fn loaded_trees_undo_like_saved_ones_test() {
    setup_logger(LevelFilter::Info);
    let mut miner = Miner::new();
    let mut alt = populated_alt(&mut miner);
    let mut db = MemDB::new();
    save_all(&alt, &mut db);
    let mut loaded = load_all(&db, &alt);

    let trees = |alt: &AltBlockTree| {
        (
            fingerprint(alt),
            fingerprint(alt.protecting_tree()),
            fingerprint(alt.protecting_tree().protecting_tree()),
        )
    };
    assert_eq!(trees(&loaded), trees(&alt));

    let first = ancestor(&alt, &tip(&alt), 1);
    let ids = alt.get_block_index(&first).unwrap().payload_ids().to_vec();
    alt.remove_payloads(&first, &ids);
    loaded.remove_payloads(&first, &ids);

    assert_eq!(alt.protecting_tree().len(), 1);
    assert_eq!(trees(&loaded), trees(&alt));
    assert_alt_invariants(&loaded);
}

#[test]
fn missing_protecting_blocks_test() {
    let mut miner = Miner::new();
    let alt = populated_alt(&mut miner);
    let mut db = MemDB::new();
    alt.save_to(&mut db);

    // The VBK tree lacks the context blocks the stored ALT chain brought in.
    let mut loaded = AltBlockTree::with_protecting_tree(AltChainParams::regtest(), vbk_tree(), Configuration::default());
    match loaded.load_from(&db, &payload_bodies(&alt)) {
        Err(BlockTreeError::InvalidStoredTip { chain, reason, .. }) => {
            assert_eq!(chain, "ALT");
            assert!(reason.contains("VBK-missing-context-block"), "{}", reason);
        }
        other => panic!("expected an invalid stored tip, got {:?}", other),
    }
}
