//! Heaviest-chain behaviour of an unprotected BTC block tree.

use log::LevelFilter;
use rand::{rngs::StdRng, Rng, SeedableRng};

use pop_rs::{
    block_tree::{block_index::BlockStatus, BtcBlockTree},
    miner::Miner,
    params::BtcChainParams,
    types::{
        block::{BlockHeader, BtcBlock},
        compact,
        data_types::{BlockHeight, BtcHash, HashBytes},
        validation::ValidationState,
    },
};

mod common;

use common::{
    fixtures::{ancestor, assert_invariants, btc_tree, extend, header, tip},
    logging::setup_logger,
};

fn mine(tree: &mut BtcBlockTree, miner: &mut Miner, from: &BtcHash, count: usize) -> BtcHash {
    extend(tree, from, count, |tree, prev| miner.mine_btc(tree, prev))
}

/// Mines a long regtest chain and checks that it is linked, ordered in time, and never retargets.
#[test]
fn mine_ten_thousand_blocks_test() {
    setup_logger(LevelFilter::Info);
    let mut tree = btc_tree();
    let mut miner = Miner::new();
    let genesis = tip(&tree);
    let interval = tree.params().difficulty_adjustment_interval();
    let genesis_bits = header(&tree, &genesis).bits;

    let mut previous: BtcBlock = header(&tree, &genesis);
    for _ in 0..10_000 {
        let block = miner.mine_btc(&tree, &previous.hash());
        assert_eq!(block.previous_block, previous.hash());
        assert!(block.timestamp >= previous.timestamp);
        assert_eq!(block.bits, genesis_bits);

        let mut state = ValidationState::new();
        assert!(tree.accept_block_header(block.clone(), &mut state), "{}", state);
        assert_eq!(tree.params().difficulty_adjustment_interval(), interval);
        previous = block;
    }

    assert_eq!(tip(&tree), previous.hash());
    assert_eq!(tree.tip().unwrap().height().int(), 10_000);
    assert_eq!(tree.get_best_chain().blocks_count(), 10_001);
    assert_eq!(tree.tips().len(), 1);
    assert_invariants(&tree);
}

/// Two 100-block forks share a 50-block prefix. The incumbent keeps the active chain until the
/// challenger has strictly more work.
#[test]
fn competing_forks_test() {
    setup_logger(LevelFilter::Info);
    let mut tree = btc_tree();
    let mut miner = Miner::new();

    let tree_from = tip(&tree);
    let prefix = mine(&mut tree, &mut miner, &tree_from, 50);
    let incumbent = mine(&mut tree, &mut miner, &prefix, 100);
    assert_eq!(tip(&tree), incumbent);

    let challenger = mine(&mut tree, &mut miner, &prefix, 100);
    // Equal work: the first seen chain stays active.
    assert_eq!(tip(&tree), incumbent);
    assert_eq!(tree.tips().len(), 2);

    let incumbent = mine(&mut tree, &mut miner, &incumbent, 10);
    assert_eq!(tree.get_best_chain().blocks_count(), 161);

    let mut cursor = challenger;
    for extension in 1..=40u32 {
        cursor = mine(&mut tree, &mut miner, &cursor, 1);
        let challenger_height = 150 + extension;
        if challenger_height <= 160 {
            assert_eq!(tip(&tree), incumbent, "switched at height {}", challenger_height);
            assert_eq!(tree.get_best_chain().blocks_count(), 161);
        } else {
            assert_eq!(tip(&tree), cursor, "did not switch at height {}", challenger_height);
            assert_eq!(tree.get_best_chain().blocks_count(), challenger_height as usize + 1);
        }
    }

    assert!(!tree.get_block_index(&incumbent).unwrap().is_applied());
    assert!(tree.get_block_index(&prefix).unwrap().is_applied());
    assert_invariants(&tree);
}

/// Mines on randomly chosen blocks and checks after every block that the heaviest tip is active.
#[test]
fn random_forks_test() {
    setup_logger(LevelFilter::Info);
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut tree = btc_tree();
    let mut miner = Miner::new();
    let mut hashes = vec![tip(&tree)];

    for _ in 0..300 {
        // Favor recent blocks so that forks grow long enough to compete.
        let window = std::cmp::min(hashes.len(), 20);
        let parent = hashes[hashes.len() - 1 - rng.gen_range(0, window)];
        let block = mine(&mut tree, &mut miner, &parent, 1);
        hashes.push(block);

        let heaviest = tree
            .tips()
            .iter()
            .filter_map(|tip| tree.get_block_index(tip))
            .map(|index| index.chain_work())
            .max()
            .unwrap();
        assert_eq!(tree.tip().unwrap().chain_work(), heaviest);
        assert_invariants(&tree);
    }
}

/// Invalidating a block on the active chain moves the active chain to the best valid fork, never
/// onto an invalid block.
#[test]
fn invalidate_and_revalidate_test() {
    let mut tree = btc_tree();
    let mut miner = Miner::new();
    let tree_from = tip(&tree);
    let main = mine(&mut tree, &mut miner, &tree_from, 20);
    let fork_base = ancestor(&tree, &main, 10);
    let fork = mine(&mut tree, &mut miner, &fork_base, 5);
    assert_eq!(tip(&tree), main);

    let bad = ancestor(&tree, &main, 12);
    tree.invalidate_subtree(&bad, BlockStatus::FAILED_BLOCK, true);
    assert_eq!(tip(&tree), fork);
    assert!(tree.get_block_index(&tip(&tree)).unwrap().is_valid());
    assert!(tree
        .get_block_index(&main)
        .unwrap()
        .status()
        .contains(BlockStatus::FAILED_CHILD));
    assert_invariants(&tree);

    // Blocks on top of an invalid block are stored, but rejected.
    let mut state = ValidationState::new();
    let child = miner.mine_btc(&tree, &main);
    let child_hash = child.hash();
    assert!(!tree.accept_block_header(child, &mut state));
    assert_eq!(state.path(), "BTC-bad-chain");
    assert!(tree.contains(&child_hash));

    tree.revalidate_subtree(&bad, BlockStatus::FAILED_BLOCK, true);
    assert_eq!(tip(&tree), child_hash);
    assert_invariants(&tree);
}

#[test]
fn rejects_bad_headers_test() {
    let mut tree = btc_tree();
    let mut miner = Miner::new();
    let genesis = tip(&tree);

    let mut orphan = miner.mine_btc(&tree, &genesis);
    orphan.previous_block = BtcHash::new([9; 32]);
    let mut state = ValidationState::new();
    assert!(!tree.accept_block_header(orphan, &mut state));
    // Changing the header invalidates its proof of work before its parent is even looked up.
    assert!(state.path().starts_with("BTC-check-block") || state.path() == "BTC-bad-prev-block");

    let mut too_old = miner.mine_btc(&tree, &genesis);
    too_old.timestamp = header(&tree, &genesis).timestamp - 1;
    let target = compact::decode(too_old.bits).unwrap();
    while !compact::hash_meets_target(too_old.hash().as_bytes(), &target) {
        too_old.nonce += 1;
    }
    let mut state = ValidationState::new();
    assert!(!tree.accept_block_header(too_old, &mut state));
    assert_eq!(state.path(), "BTC-contextually-check-block+time-too-old");

    let mut easy = miner.mine_btc(&tree, &genesis);
    easy.bits = 0x2100ffff;
    let mut state = ValidationState::new();
    assert!(!tree.accept_block_header(easy, &mut state));
    assert_eq!(state.path(), "BTC-check-block+bad-diffbits");

    assert_eq!(tree.len(), 1);
}

#[test]
fn finalize_prunes_forks_and_old_blocks_test() {
    let mut tree = btc_tree();
    let mut miner = Miner::new();
    let tree_from = tip(&tree);
    let main = mine(&mut tree, &mut miner, &tree_from, 30);
    let fork_base = ancestor(&tree, &main, 10);
    let fork = mine(&mut tree, &mut miner, &fork_base, 5);
    let late_fork_base = ancestor(&tree, &main, 25);
    let late_fork = mine(&mut tree, &mut miner, &late_fork_base, 1);
    assert_eq!(tree.tips().len(), 3);

    let last_final = ancestor(&tree, &main, 20);
    assert!(tree.finalize_block(&last_final, 5));

    assert_eq!(tree.root().unwrap().height().int(), 15);
    assert!(!tree.contains(&fork));
    assert!(tree.contains(&late_fork));
    assert!(tree.get_block_index(&last_final).unwrap().is_finalized());
    assert_eq!(tip(&tree), main);
    assert_invariants(&tree);

    // Finalizing a block that is not on the active chain does nothing.
    assert!(!tree.finalize_block(&late_fork, 5));
}

#[test]
fn bootstrap_with_chain_test() {
    let mut source = btc_tree();
    let mut miner = Miner::new();
    let source_from = tip(&source);
    let source_tip = mine(&mut source, &mut miner, &source_from, 10);

    let chain: Vec<BtcBlock> = (5..=10)
        .map(|height| header(&source, &ancestor(&source, &source_tip, height)))
        .collect();
    let mut tree = BtcBlockTree::new(BtcChainParams::regtest());
    let mut state = ValidationState::new();
    assert!(tree.bootstrap_with_chain(BlockHeight::new(5), chain.clone(), &mut state));
    assert_eq!(tip(&tree), source_tip);
    assert_eq!(tree.root().unwrap().height().int(), 5);

    assert!(!tree.bootstrap_with_chain(BlockHeight::new(5), chain, &mut state));
    assert_eq!(state.path(), "BTC-bootstrap-already");

    let mut empty = BtcBlockTree::new(BtcChainParams::regtest());
    let mut state = ValidationState::new();
    assert!(!empty.bootstrap_with_chain(BlockHeight::new(0), Vec::new(), &mut state));
    assert_eq!(state.path(), "BTC-bootstrap-empty-chain");
}
