/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Keystone arithmetic.
//!
//! A keystone is a block whose height is a multiple of the chain's keystone interval. Fork
//! resolution groups endorsements into keystone periods, and VBK headers reference the two
//! previous keystones by hash suffix.

/// Whether a block at `height` is a keystone.
pub fn is_keystone(height: u32, keystone_interval: u32) -> bool {
    height % keystone_interval == 0
}

/// The highest keystone height that is `<= height`.
pub fn highest_keystone_at_or_before(height: u32, keystone_interval: u32) -> u32 {
    height - height % keystone_interval
}

/// The lowest keystone height that is `> height`.
pub fn first_keystone_after(height: u32, keystone_interval: u32) -> u32 {
    highest_keystone_at_or_before(height, keystone_interval) + keystone_interval
}

/// The highest block whose endorsements still count towards the keystone at `keystone_height`.
///
/// Panics if `keystone_height` is not a keystone.
pub fn highest_block_which_connects_keystone_to_previous(
    keystone_height: u32,
    keystone_interval: u32,
) -> u32 {
    assert!(
        is_keystone(keystone_height, keystone_interval),
        "{} is not a keystone height",
        keystone_height
    );
    keystone_height + keystone_interval + 1
}

/// Height of the keystone a block at `height` references, skipping `skip` further keystones.
///
/// A block never references its direct parent as a keystone, so the search starts two blocks
/// below it. Clamps to 0.
pub fn previous_keystone_height(height: u32, keystone_interval: u32, skip: u32) -> u32 {
    if height < 2 {
        return 0;
    }
    highest_keystone_at_or_before(height - 2, keystone_interval)
        .saturating_sub(skip * keystone_interval)
}

/// Whether two heights fall into the same keystone interval.
pub fn are_on_same_keystone_interval(height1: u32, height2: u32, keystone_interval: u32) -> bool {
    height1 / keystone_interval == height2 / keystone_interval
}

/// Whether walking from `bottom` up to `tip` passes a keystone boundary.
pub fn is_crossed_keystone_boundary(bottom: u32, tip: u32, keystone_interval: u32) -> bool {
    bottom / keystone_interval < tip / keystone_interval
}

#[cfg(test)]
mod tests {
    use super::*;

    const KI: u32 = 20;

    #[test]
    fn previous_keystones() {
        let cases = [
            (0, 0, 0),
            (0, 1, 0),
            (19, 0, 0),
            (19, 1, 0),
            (20, 0, 0),
            (20, 1, 0),
            (25, 0, 20),
            (25, 1, 0),
            (40, 0, 20),
            (40, 1, 0),
            (41, 0, 20),
            (41, 1, 0),
            (59, 0, 40),
            (59, 1, 20),
            (100, 0, 80),
            (100, 1, 60),
            (101, 0, 80),
            (101, 1, 60),
        ];
        for (height, skip, expected) in cases {
            assert_eq!(
                previous_keystone_height(height, KI, skip),
                expected,
                "height {} skip {}",
                height,
                skip
            );
        }
    }

    #[test]
    fn highest_keystone() {
        for (height, expected) in [(0, 0), (1, 0), (20, 20), (21, 20), (39, 20), (40, 40), (101, 100)] {
            assert_eq!(highest_keystone_at_or_before(height, KI), expected);
        }
    }

    #[test]
    fn keystones() {
        assert!(is_keystone(0, KI));
        assert!(is_keystone(40, KI));
        assert!(!is_keystone(21, KI));
        assert_eq!(first_keystone_after(0, KI), 20);
        assert_eq!(first_keystone_after(19, KI), 20);
        assert_eq!(first_keystone_after(20, KI), 40);
        assert_eq!(highest_block_which_connects_keystone_to_previous(0, KI), 21);
        assert_eq!(highest_block_which_connects_keystone_to_previous(20, KI), 41);
    }

    #[test]
    #[should_panic]
    fn connecting_block_of_non_keystone_panics() {
        highest_block_which_connects_keystone_to_previous(3, KI);
    }

    #[test]
    fn same_interval() {
        assert!(are_on_same_keystone_interval(1, 2, 5));
        assert!(!are_on_same_keystone_interval(1, 5, 5));
        assert!(are_on_same_keystone_interval(6, 5, 5));
        assert!(are_on_same_keystone_interval(22, 21, 20));
        assert!(!are_on_same_keystone_interval(40, 21, 20));
        assert!(are_on_same_keystone_interval(39, 21, 20));
        assert!(is_crossed_keystone_boundary(19, 20, 20));
        assert!(!is_crossed_keystone_boundary(20, 39, 20));
    }
}
