/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the block tree's
//! [config](crate::config::Configuration).
//!
//! This library logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least three values. The first three
//! values are always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//! 3. The chain the event happened on.
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ChangeTip](crate::events::ChangeTipEvent) is printed:
//!
//! ```text
//! ChangeTip, 1701329264, VBK, fNGCJyk, Id5u7f6, 41
//! ```
//!
//! In the snippet:
//! - The fourth value is the first seven characters of the Base64 encoding of the previous tip.
//! - The fifth value is the first seven characters of the Base64 encoding of the new tip.
//! - The sixth value is the height of the new tip.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;
use std::time::SystemTime;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const INSERT_BLOCK: &str = "InsertBlock";
pub const REMOVE_BLOCK: &str = "RemoveBlock";
pub const FINALIZE_BLOCK: &str = "FinalizeBlock";

pub const INVALIDATE_BLOCK: &str = "InvalidateBlock";
pub const REVALIDATE_BLOCK: &str = "RevalidateBlock";

pub const CHANGE_TIP: &str = "ChangeTip";
pub const APPLY_BLOCK: &str = "ApplyBlock";
pub const UNAPPLY_BLOCK: &str = "UnapplyBlock";

pub const ADD_PAYLOADS: &str = "AddPayloads";
pub const REMOVE_PAYLOADS: &str = "RemovePayloads";

pub const FORK_RESOLUTION: &str = "ForkResolution";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for InsertBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &InsertBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                INSERT_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                event.chain,
                first_seven_base64_chars(&event.block),
                event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for RemoveBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &RemoveBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                REMOVE_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                event.chain,
                first_seven_base64_chars(&event.block),
                event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for FinalizeBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &FinalizeBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                FINALIZE_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                event.chain,
                first_seven_base64_chars(&event.block),
                event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for InvalidateBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &InvalidateBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}",
                INVALIDATE_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                event.chain,
                first_seven_base64_chars(&event.block),
                event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for RevalidateBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &RevalidateBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}",
                REVALIDATE_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                event.chain,
                first_seven_base64_chars(&event.block),
                event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for ChangeTipEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &ChangeTipEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                CHANGE_TIP,
                secs_since_unix_epoch(event.timestamp),
                event.chain,
                event
                    .previous_tip
                    .as_ref()
                    .map(|tip| first_seven_base64_chars(tip))
                    .unwrap_or(String::from("None")),
                first_seven_base64_chars(&event.tip),
                event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for ApplyBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &ApplyBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                APPLY_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                event.chain,
                first_seven_base64_chars(&event.block),
                event.height,
                event.command_groups
            )
        };
        Box::new(logger)
    }
}

impl Logger for UnapplyBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &UnapplyBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                UNAPPLY_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                event.chain,
                first_seven_base64_chars(&event.block),
                event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for AddPayloadsEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &AddPayloadsEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                ADD_PAYLOADS,
                secs_since_unix_epoch(event.timestamp),
                event.chain,
                first_seven_base64_chars(&event.block),
                event.payloads.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for RemovePayloadsEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &RemovePayloadsEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                REMOVE_PAYLOADS,
                secs_since_unix_epoch(event.timestamp),
                event.chain,
                first_seven_base64_chars(&event.block),
                event.payloads.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for ForkResolutionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &ForkResolutionEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {:?}",
                FORK_RESOLUTION,
                secs_since_unix_epoch(event.timestamp),
                event.chain,
                first_seven_base64_chars(&event.tip),
                first_seven_base64_chars(&event.candidate),
                event.outcome
            )
        };
        Box::new(logger)
    }
}

/// Get a more readable representation of a byte sequence by base64-encoding it and taking the
/// first 7 characters.
pub(crate) fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_hashes() {
        assert_eq!(first_seven_base64_chars(&[0u8; 32]), "AAAAAAA");
        assert_eq!(first_seven_base64_chars(&[0u8; 3]), "AAAA");
    }
}
