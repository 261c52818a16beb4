/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Proof-of-Proof fork resolution.
//!
//! A chain protected by Proof-of-Proof (PoP) publishes its keystone blocks into a protecting chain.
//! When two forks of the protected chain compete, the fork whose keystones were published earlier
//! in the protecting chain wins, regardless of how much work either fork has.
//!
//! Publications reach the protected chain as payloads of its blocks. This module holds:
//! - [`payloads`]: how each payload turns into [commands](command).
//! - [`state_machine`]: applying and unapplying the commands of a range of blocks.
//! - [`fork_resolution`]: publication views and the PoP score that compares them.
//! - [`fr_cache`]: memoized comparison outcomes.
//! - [`payloads_index`]: which blocks carry each payload.
//! - [`rule`]: the [`PopAwareForkResolution`] best chain rule that ties them together.

pub mod command;

pub mod fork_resolution;

pub mod fr_cache;

pub mod payloads;

pub mod payloads_index;

pub mod rule;

pub mod state_machine;

pub use payloads::PopPayload;

pub use rule::PopAwareForkResolution;
