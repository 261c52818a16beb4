/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Block trees for chains protected by Proof-of-Proof (PoP).
//!
//! Proof-of-Proof lets a chain borrow the security of a stronger one by publishing its block
//! hashes there. This crate tracks three nested chains:
//! 1. **BTC**, the root of security, whose active chain is simply its heaviest valid chain.
//! 2. **VBK**, a chain that publishes its blocks into BTC through [VTBs](types::payloads::Vtb).
//! 3. **ALT**, an altchain that publishes its blocks into VBK through [ATVs](types::payloads::Atv).
//!
//! Every chain is held in a [`BlockTree`](block_tree::BlockTree). The tree of a protected chain owns
//! the tree of the chain that protects it, and decides between competing forks by comparing how
//! early each fork's keystones were published in the protecting chain, falling back to
//! accumulated work when publications do not decide. See [`pop`] for the fork resolution rule and
//! [`block_tree`] for the trees themselves.
//!
//! An altchain node usually talks to a [`PopContext`](context::PopContext) only: it owns the ALT tree
//! and a [`MemPool`](mempool::MemPool) of payloads waiting for the next ALT block.
//!
//! ## Getting started
//!
//! ```rust
//! use pop_rs::{
//!     block_tree::{BtcBlockTree, VbkBlockTree},
//!     config::Configuration,
//!     miner::{btc_regtest_genesis, vbk_regtest_genesis},
//!     params::{BtcChainParams, VbkChainParams},
//!     types::validation::ValidationState,
//! };
//!
//! let mut state = ValidationState::new();
//! let mut btc = BtcBlockTree::new(BtcChainParams::regtest());
//! assert!(btc.bootstrap_with_genesis(btc_regtest_genesis(), &mut state));
//!
//! let mut vbk = VbkBlockTree::with_protecting_tree(VbkChainParams::regtest(), btc, Configuration::default());
//! assert!(vbk.bootstrap_with_genesis(vbk_regtest_genesis(), &mut state));
//! assert_eq!(vbk.protecting_tree().len(), 1);
//! ```

pub mod types;

pub mod params;

pub mod keystone;

pub mod block_tree;

pub mod endorsements;

pub mod pop;

pub mod mempool;

pub mod context;

pub mod miner;

pub mod config;

pub mod events;

pub mod logging;
