/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Events emitted by block trees.
//!
//! An event for a given action indicates that the action has been completed. Every block tree
//! emits events for its own chain; `chain` names it (`"BTC"`, `"VBK"` or `"ALT"`). Hashes are
//! carried as raw bytes so that one receiver can listen to all three trees.
//!
//! Events are delivered through the `event_publisher` of the tree's
//! [`Configuration`](crate::config::Configuration), and printed if `log_events` is set.

use std::time::SystemTime;

use crate::{
    block_tree::block_index::BlockStatus,
    config::Configuration,
    logging::Logger,
    pop::fr_cache::CompareResult,
    types::data_types::{BlockHeight, PayloadId},
};

pub enum Event {
    // Events that change the shape of a block tree.
    InsertBlock(InsertBlockEvent),
    RemoveBlock(RemoveBlockEvent),
    FinalizeBlock(FinalizeBlockEvent),
    // Events that change a block's validity.
    InvalidateBlock(InvalidateBlockEvent),
    RevalidateBlock(RevalidateBlockEvent),
    // Events that change the active chain.
    ChangeTip(ChangeTipEvent),
    ApplyBlock(ApplyBlockEvent),
    UnapplyBlock(UnapplyBlockEvent),
    // Events that change a block's payloads.
    AddPayloads(AddPayloadsEvent),
    RemovePayloads(RemovePayloadsEvent),
    // Fork resolution.
    ForkResolution(ForkResolutionEvent),
}

impl Event {
    pub(crate) fn publish(config: &Configuration, event: Event) {
        if config.log_events {
            event.log();
        }
        if let Some(event_publisher) = &config.event_publisher {
            // A dropped receiver only means nobody is listening anymore.
            let _ = event_publisher.send(event);
        }
    }

    fn log(&self) {
        match self {
            Event::InsertBlock(event) => InsertBlockEvent::get_logger()(event),
            Event::RemoveBlock(event) => RemoveBlockEvent::get_logger()(event),
            Event::FinalizeBlock(event) => FinalizeBlockEvent::get_logger()(event),
            Event::InvalidateBlock(event) => InvalidateBlockEvent::get_logger()(event),
            Event::RevalidateBlock(event) => RevalidateBlockEvent::get_logger()(event),
            Event::ChangeTip(event) => ChangeTipEvent::get_logger()(event),
            Event::ApplyBlock(event) => ApplyBlockEvent::get_logger()(event),
            Event::UnapplyBlock(event) => UnapplyBlockEvent::get_logger()(event),
            Event::AddPayloads(event) => AddPayloadsEvent::get_logger()(event),
            Event::RemovePayloads(event) => RemovePayloadsEvent::get_logger()(event),
            Event::ForkResolution(event) => ForkResolutionEvent::get_logger()(event),
        }
    }
}

pub struct InsertBlockEvent {
    pub timestamp: SystemTime,
    pub chain: &'static str,
    pub block: Vec<u8>,
    pub height: BlockHeight,
}

pub struct RemoveBlockEvent {
    pub timestamp: SystemTime,
    pub chain: &'static str,
    pub block: Vec<u8>,
    pub height: BlockHeight,
}

pub struct FinalizeBlockEvent {
    pub timestamp: SystemTime,
    pub chain: &'static str,
    pub block: Vec<u8>,
    pub height: BlockHeight,
}

pub struct InvalidateBlockEvent {
    pub timestamp: SystemTime,
    pub chain: &'static str,
    pub block: Vec<u8>,
    pub reason: BlockStatus,
}

pub struct RevalidateBlockEvent {
    pub timestamp: SystemTime,
    pub chain: &'static str,
    pub block: Vec<u8>,
    pub reason: BlockStatus,
}

pub struct ChangeTipEvent {
    pub timestamp: SystemTime,
    pub chain: &'static str,
    pub previous_tip: Option<Vec<u8>>,
    pub tip: Vec<u8>,
    pub height: BlockHeight,
}

pub struct ApplyBlockEvent {
    pub timestamp: SystemTime,
    pub chain: &'static str,
    pub block: Vec<u8>,
    pub height: BlockHeight,
    pub command_groups: usize,
}

pub struct UnapplyBlockEvent {
    pub timestamp: SystemTime,
    pub chain: &'static str,
    pub block: Vec<u8>,
    pub height: BlockHeight,
}

pub struct AddPayloadsEvent {
    pub timestamp: SystemTime,
    pub chain: &'static str,
    pub block: Vec<u8>,
    pub payloads: Vec<PayloadId>,
}

pub struct RemovePayloadsEvent {
    pub timestamp: SystemTime,
    pub chain: &'static str,
    pub block: Vec<u8>,
    pub payloads: Vec<PayloadId>,
}

pub struct ForkResolutionEvent {
    pub timestamp: SystemTime,
    pub chain: &'static str,
    pub tip: Vec<u8>,
    pub candidate: Vec<u8>,
    pub outcome: CompareResult,
}
