/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that are used across the block trees of every chain.
//!
//! Types specific to one component, for example [command groups](crate::pop::command), live in
//! that component's module.

pub mod data_types;

pub mod compact;

pub mod validation;

pub mod block;

pub mod payloads;
