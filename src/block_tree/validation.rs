/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Header checks shared by the three [`BlockHeader`] implementations.
//!
//! Every function here is a pure function of its arguments (and, for the future-time check, the
//! wall clock). Failures are recorded in the passed [`ValidationState`] with a short reason name;
//! the block tree wraps them with `<chain>-check-block` or `<chain>-contextually-check-block`.

use std::time::SystemTime;

use crate::{
    keystone,
    params::MEDIAN_TIME_SPAN,
    types::{
        block::{keystone_suffix, BlockHeader, BtcBlock, VbkBlock},
        compact,
        data_types::BlockHeight,
        validation::ValidationState,
    },
};

use super::{block_index::BlockIndex, BaseBlockTree};

/// Checks that `bits` encodes a target no easier than `pow_limit_bits`, and that `hash` meets it.
pub fn check_proof_of_work(
    hash: &[u8],
    bits: u32,
    pow_limit_bits: u32,
    state: &mut ValidationState,
) -> bool {
    let target = match compact::decode(bits) {
        Some(target) if target != [0u8; 32] => target,
        _ => return state.invalid("bad-diffbits", format!("invalid compact target {:#x}", bits)),
    };
    let limit = compact::decode(pow_limit_bits).unwrap_or([0xff; 32]);
    if target > limit {
        return state.invalid("bad-diffbits", format!("target {:#x} is above the pow limit", bits));
    }
    if !compact::hash_meets_target(hash, &target) {
        return state.invalid("bad-pow", "proof of work does not meet the claimed target");
    }
    true
}

/// Checks that `timestamp` is not more than `max_future` seconds ahead of the local clock.
pub fn check_not_too_new(timestamp: u32, max_future: u32, state: &mut ValidationState) -> bool {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0);
    if timestamp as u64 > now + max_future as u64 {
        return state.invalid(
            "time-too-new",
            format!("block timestamp {} is too far in the future", timestamp),
        );
    }
    true
}

/// Median timestamp of `prev` and up to ten of its ancestors.
pub fn median_time_past<H: BlockHeader>(prev: &BlockIndex<H>, tree: &BaseBlockTree<H>) -> u32 {
    let mut timestamps = Vec::with_capacity(MEDIAN_TIME_SPAN);
    let mut cursor = Some(prev);
    while let Some(index) = cursor {
        if timestamps.len() == MEDIAN_TIME_SPAN {
            break;
        }
        timestamps.push(index.timestamp());
        cursor = index.pprev().and_then(|hash| tree.get_block_index(&hash));
    }
    timestamps.sort_unstable();
    timestamps[timestamps.len() / 2]
}

/// Checks that `timestamp` is not older than the median time past of `prev`.
pub fn check_median_time_past<H: BlockHeader>(
    timestamp: u32,
    prev: &BlockIndex<H>,
    tree: &BaseBlockTree<H>,
    state: &mut ValidationState,
) -> bool {
    let median = median_time_past(prev, tree);
    if timestamp < median {
        return state.invalid(
            "time-too-old",
            format!("block timestamp {} is older than median time past {}", timestamp, median),
        );
    }
    true
}

/// Checks that a header's declared height continues its parent.
pub fn check_height<H: BlockHeader>(
    height: BlockHeight,
    prev: &BlockIndex<H>,
    state: &mut ValidationState,
) -> bool {
    if height != prev.height() + 1 {
        return state.invalid(
            "bad-height",
            format!("block height {} does not follow parent height {}", height, prev.height()),
        );
    }
    true
}

/// Compact target the BTC block following `prev` must declare.
pub fn btc_next_work_required(
    prev: &BlockIndex<BtcBlock>,
    block: &BtcBlock,
    tree: &BaseBlockTree<BtcBlock>,
) -> u32 {
    let params = tree.params();
    let pow_limit_bits = params.pow_limit_bits;
    let interval = params.difficulty_adjustment_interval();
    let next_height = prev.height().int() + 1;

    if next_height % interval != 0 {
        if params.allow_min_difficulty_blocks {
            // A block more than twice the target spacing late may be mined at the pow limit.
            if block.timestamp as u64
                > prev.timestamp() as u64 + 2 * params.pow_target_spacing as u64
            {
                return pow_limit_bits;
            }
            // Otherwise the difficulty is that of the last block not mined under that rule.
            let mut index = prev;
            while index.height().int() % interval != 0 && index.header().bits == pow_limit_bits {
                match index.pprev().and_then(|hash| tree.get_block_index(&hash)) {
                    Some(parent) => index = parent,
                    None => break,
                }
            }
            return index.header().bits;
        }
        return prev.header().bits;
    }

    if params.pow_no_retargeting {
        return prev.header().bits;
    }

    let first_height = match prev.height().checked_sub(interval - 1) {
        Some(height) => height,
        None => return prev.header().bits,
    };
    let first = match tree.ancestor(&prev.hash(), first_height) {
        Some(first) => first,
        // Retargeting window reaches below the bootstrap block.
        None => return prev.header().bits,
    };

    let timespan = params.pow_target_timespan as i64;
    let actual_timespan = (prev.timestamp() as i64 - first.timestamp() as i64)
        .clamp(timespan / 4, timespan * 4);

    let target = match compact::decode(prev.header().bits) {
        Some(target) => target,
        None => return pow_limit_bits,
    };
    let limit = compact::decode(pow_limit_bits).unwrap_or([0xff; 32]);
    let retargeted = compact::mul_div(&target, actual_timespan as u64, timespan as u64);
    if retargeted > limit {
        pow_limit_bits
    } else {
        compact::encode(&retargeted)
    }
}

/// Checks the two keystone references of a VBK header against its ancestors.
///
/// References to keystones below the tree's bootstrap block cannot be checked and are accepted.
pub fn check_vbk_keystones(
    block: &VbkBlock,
    prev: &BlockIndex<VbkBlock>,
    tree: &BaseBlockTree<VbkBlock>,
    state: &mut ValidationState,
) -> bool {
    let keystone_interval = tree.params().pop.keystone_interval;
    let references = [
        (0, &block.previous_keystone),
        (1, &block.second_previous_keystone),
    ];
    for (skip, reference) in references {
        match expected_keystone_reference(block.height, keystone_interval, skip, prev, tree) {
            KeystoneReference::Expected(expected) if expected != *reference => {
                return state.invalid(
                    "bad-keystones",
                    format!("keystone reference {} does not match its ancestor", skip),
                );
            }
            KeystoneReference::None if *reference != [0u8; 9] => {
                return state.invalid(
                    "bad-keystones",
                    format!("keystone reference {} must be empty", skip),
                );
            }
            _ => {}
        }
    }
    true
}

pub(crate) enum KeystoneReference {
    /// The block is too low to reference a keystone.
    None,
    /// The referenced keystone is below the tree's bootstrap block.
    Unknown,
    Expected([u8; 9]),
}

pub(crate) fn expected_keystone_reference(
    height: BlockHeight,
    keystone_interval: u32,
    skip: u32,
    prev: &BlockIndex<VbkBlock>,
    tree: &BaseBlockTree<VbkBlock>,
) -> KeystoneReference {
    let height = height.int();
    if height < 2
        || keystone::highest_keystone_at_or_before(height - 2, keystone_interval)
            < skip * keystone_interval
    {
        return KeystoneReference::None;
    }
    let keystone_height = keystone::previous_keystone_height(height, keystone_interval, skip);
    match tree.ancestor(&prev.hash(), BlockHeight::new(keystone_height)) {
        Some(keystone) => KeystoneReference::Expected(keystone_suffix(&keystone.hash())),
        None => KeystoneReference::Unknown,
    }
}

/// Checks the difficulty of a VBK header. Without retargeting, difficulty never changes.
pub fn check_vbk_difficulty(
    block: &VbkBlock,
    prev: &BlockIndex<VbkBlock>,
    tree: &BaseBlockTree<VbkBlock>,
    state: &mut ValidationState,
) -> bool {
    if tree.params().pow_no_retargeting && block.difficulty != prev.header().difficulty {
        return state.invalid(
            "bad-diffbits",
            format!(
                "difficulty {:#x} differs from parent difficulty {:#x}",
                block.difficulty,
                prev.header().difficulty
            ),
        );
    }
    true
}
