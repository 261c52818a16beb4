/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Chain parameters for the three kinds of block tree.
//!
//! Every block tree is constructed with the parameters of the chain it tracks. Parameters are plain
//! data: build them with the generated builders, or start from one of the presets
//! ([`BtcChainParams::regtest`], [`VbkChainParams::mainnet`], ...).
//!
//! ## Example
//!
//! ```rust
//! use pop_rs::params::{AltChainParams, PopParams};
//!
//! let params = AltChainParams::builder()
//!     .pop(
//!         PopParams::builder()
//!             .keystone_interval(5)
//!             .finality_delay(100)
//!             .endorsement_settlement_interval(50)
//!             .build(),
//!     )
//!     .num_blocks_for_bootstrap(1)
//!     .max_future_block_time(600)
//!     .build();
//!
//! assert_eq!(params.pop.keystone_interval, 5);
//! ```

use typed_builder::TypedBuilder;

/// Weights given to a keystone period's endorsement, indexed by how many protecting blocks later
/// than the competing chain's endorsement it landed.
pub const DEFAULT_FORK_RESOLUTION_LOOKUP_TABLE: [u32; 9] = [100, 100, 95, 89, 80, 69, 56, 40, 21];

/// Number of previous blocks whose median timestamp a new block must not precede.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Parameters every chain has, regardless of whether it is protected by Proof-of-Proof.
pub trait ChainParams: Clone + Send + Sync + 'static {
    /// Minimum number of blocks [`bootstrap_with_chain`](crate::block_tree::BlockTree::bootstrap_with_chain)
    /// must be given.
    fn num_blocks_for_bootstrap(&self) -> u32;

    /// How far (in seconds) into the future a block's timestamp may be.
    fn max_future_block_time(&self) -> u32;
}

/// Parameters of a chain that is protected by Proof-of-Proof.
pub trait PopChainParams: ChainParams {
    fn pop(&self) -> &PopParams;
}

/// Fork resolution and endorsement validation parameters of a protected chain.
#[derive(Clone, Debug, PartialEq, Eq, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building [PopParams]. On the builder call the following methods to construct a valid [PopParams].

    Required:
    - `.keystone_interval(...)`
    - `.finality_delay(...)`
    - `.endorsement_settlement_interval(...)`
    "))]
pub struct PopParams {
    #[builder(setter(doc = "Set the distance between consecutive keystone blocks. Required."))]
    pub keystone_interval: u32,
    #[builder(setter(doc = "Set the number of protecting blocks after which a keystone period's publication is final. Required."))]
    pub finality_delay: u32,
    #[builder(
        default = DEFAULT_FORK_RESOLUTION_LOOKUP_TABLE.to_vec(),
        setter(doc = "Set the score weights used by fork resolution. Defaults to `DEFAULT_FORK_RESOLUTION_LOOKUP_TABLE`.")
    )]
    pub fork_resolution_lookup_table: Vec<u32>,
    #[builder(setter(doc = "Set the maximum height distance between an endorsed block and the block containing the endorsement. Required."))]
    pub endorsement_settlement_interval: u32,
    #[builder(
        default = false,
        setter(doc = "Let fork resolution move a publication forward until it lands in a protecting block newer than the keystone. Defaults to `false`.")
    )]
    pub enable_time_adjustment: bool,
    #[builder(
        default = 0,
        setter(doc = "Set how many blocks behind a finalized block are kept when finalizing. Defaults to 0.")
    )]
    pub preserve_blocks_behind_final: u32,
}

/// Parameters of a Bitcoin-like chain.
#[derive(Clone, Debug, PartialEq, Eq, TypedBuilder)]
pub struct BtcChainParams {
    #[builder(setter(doc = "Set the compact encoding of the easiest allowed target. Required."))]
    pub pow_limit_bits: u32,
    #[builder(setter(doc = "Set the targeted duration (seconds) of one difficulty adjustment interval. Required."))]
    pub pow_target_timespan: u32,
    #[builder(setter(doc = "Set the targeted duration (seconds) between two blocks. Required."))]
    pub pow_target_spacing: u32,
    #[builder(setter(doc = "Allow blocks at the pow limit after twice the target spacing without a block. Required."))]
    pub allow_min_difficulty_blocks: bool,
    #[builder(setter(doc = "Disable difficulty retargeting. Required."))]
    pub pow_no_retargeting: bool,
    #[builder(setter(doc = "Set the minimum number of blocks to bootstrap with. Required."))]
    pub num_blocks_for_bootstrap: u32,
    #[builder(default = 2 * 60 * 60, setter(doc = "Set how far into the future (seconds) a block may be. Defaults to two hours."))]
    pub max_future_block_time: u32,
}

impl BtcChainParams {
    pub fn regtest() -> BtcChainParams {
        BtcChainParams::builder()
            .pow_limit_bits(0x207fffff)
            .pow_target_timespan(14 * 24 * 60 * 60)
            .pow_target_spacing(10 * 60)
            .allow_min_difficulty_blocks(true)
            .pow_no_retargeting(true)
            .num_blocks_for_bootstrap(1)
            .build()
    }

    pub fn mainnet() -> BtcChainParams {
        BtcChainParams::builder()
            .pow_limit_bits(0x1d00ffff)
            .pow_target_timespan(14 * 24 * 60 * 60)
            .pow_target_spacing(10 * 60)
            .allow_min_difficulty_blocks(false)
            .pow_no_retargeting(false)
            .num_blocks_for_bootstrap(2016)
            .build()
    }

    /// Number of blocks between difficulty adjustments.
    pub fn difficulty_adjustment_interval(&self) -> u32 {
        self.pow_target_timespan / self.pow_target_spacing
    }
}

impl ChainParams for BtcChainParams {
    fn num_blocks_for_bootstrap(&self) -> u32 {
        self.num_blocks_for_bootstrap
    }

    fn max_future_block_time(&self) -> u32 {
        self.max_future_block_time
    }
}

/// Parameters of a VeriBlock-like chain.
#[derive(Clone, Debug, PartialEq, Eq, TypedBuilder)]
pub struct VbkChainParams {
    #[builder(setter(doc = "Set the Proof-of-Proof parameters of the chain. Required."))]
    pub pop: PopParams,
    #[builder(setter(doc = "Set the compact encoding of the easiest allowed target. Required."))]
    pub pow_limit_bits: u32,
    #[builder(setter(doc = "Disable difficulty retargeting. Required."))]
    pub pow_no_retargeting: bool,
    #[builder(default = 100, setter(doc = "Set the number of blocks the retargeting window spans. Defaults to 100."))]
    pub retarget_period: u32,
    #[builder(default = 30, setter(doc = "Set the targeted duration (seconds) between two blocks. Defaults to 30."))]
    pub target_block_time: u32,
    #[builder(setter(doc = "Set the minimum number of blocks to bootstrap with. Required."))]
    pub num_blocks_for_bootstrap: u32,
    #[builder(default = 5 * 60, setter(doc = "Set how far into the future (seconds) a block may be. Defaults to five minutes."))]
    pub max_future_block_time: u32,
}

impl VbkChainParams {
    fn default_pop() -> PopParams {
        PopParams::builder()
            .keystone_interval(20)
            .finality_delay(11)
            .endorsement_settlement_interval(400)
            .preserve_blocks_behind_final(400)
            .build()
    }

    pub fn regtest() -> VbkChainParams {
        VbkChainParams::builder()
            .pop(Self::default_pop())
            .pow_limit_bits(0x187fffff)
            .pow_no_retargeting(true)
            .num_blocks_for_bootstrap(0)
            .build()
    }

    pub fn mainnet() -> VbkChainParams {
        VbkChainParams::builder()
            .pop(Self::default_pop())
            .pow_limit_bits(0x1a7fffff)
            .pow_no_retargeting(false)
            .num_blocks_for_bootstrap(100)
            .build()
    }
}

impl ChainParams for VbkChainParams {
    fn num_blocks_for_bootstrap(&self) -> u32 {
        self.num_blocks_for_bootstrap
    }

    fn max_future_block_time(&self) -> u32 {
        self.max_future_block_time
    }
}

impl PopChainParams for VbkChainParams {
    fn pop(&self) -> &PopParams {
        &self.pop
    }
}

/// Parameters of an altchain protected by VeriBlock.
#[derive(Clone, Debug, PartialEq, Eq, TypedBuilder)]
pub struct AltChainParams {
    #[builder(setter(doc = "Set the Proof-of-Proof parameters of the chain. Required."))]
    pub pop: PopParams,
    #[builder(setter(doc = "Set the minimum number of blocks to bootstrap with. Required."))]
    pub num_blocks_for_bootstrap: u32,
    #[builder(setter(doc = "Set how far into the future (seconds) a block may be. Required."))]
    pub max_future_block_time: u32,
}

impl AltChainParams {
    pub fn regtest() -> AltChainParams {
        AltChainParams::builder()
            .pop(
                PopParams::builder()
                    .keystone_interval(5)
                    .finality_delay(100)
                    .endorsement_settlement_interval(50)
                    .preserve_blocks_behind_final(50)
                    .build(),
            )
            .num_blocks_for_bootstrap(1)
            .max_future_block_time(10 * 60)
            .build()
    }
}

impl ChainParams for AltChainParams {
    fn num_blocks_for_bootstrap(&self) -> u32 {
        self.num_blocks_for_bootstrap
    }

    fn max_future_block_time(&self) -> u32 {
        self.max_future_block_time
    }
}

impl PopChainParams for AltChainParams {
    fn pop(&self) -> &PopParams {
        &self.pop
    }
}
