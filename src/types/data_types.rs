/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes or numbers, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    ops::{Add, AddAssign, Sub},
};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};

/// Height of a block in a block tree.
///
/// Starts at 0 for genesis blocks, and increases by 1 for every subsequent block linked by a
/// `previous_block` reference. Trees that are bootstrapped from the middle of a chain start at the
/// height of their first bootstrap block.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct BlockHeight(u32);

impl BlockHeight {
    /// Create a new `BlockHeight` with an `int` inner value.
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    /// Get the inner `u32` value of this `BlockHeight`.
    pub const fn int(&self) -> u32 {
        self.0
    }

    /// Get the height `rhs` levels below this one, stopping at 0.
    pub const fn saturating_sub(&self, rhs: u32) -> Self {
        Self(self.0.saturating_sub(rhs))
    }

    /// Get the height `rhs` levels below this one, or `None` if that would be below 0.
    pub fn checked_sub(&self, rhs: u32) -> Option<Self> {
        self.0.checked_sub(rhs).map(Self)
    }
}

impl Display for BlockHeight {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl AddAssign<u32> for BlockHeight {
    fn add_assign(&mut self, rhs: u32) {
        self.0.add_assign(rhs)
    }
}

impl Add<u32> for BlockHeight {
    type Output = BlockHeight;
    fn add(self, rhs: u32) -> Self::Output {
        BlockHeight::new(self.0.add(rhs))
    }
}

impl Sub<BlockHeight> for BlockHeight {
    type Output = u32;
    fn sub(self, rhs: BlockHeight) -> Self::Output {
        self.0 - rhs.0
    }
}

/// Accumulated proof of work of a chain, from its root up to and including some block.
///
/// The unit is chain-specific: for proof-of-work chains it is the expected number of hashes needed
/// to produce the chain, saturated into 128 bits; for altchains it is simply the number of blocks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChainWork(u128);

impl ChainWork {
    /// Create a new `ChainWork` with an `int` inner value.
    pub const fn new(int: u128) -> Self {
        Self(int)
    }

    /// Get the inner `u128` value of this `ChainWork`.
    pub const fn int(&self) -> u128 {
        self.0
    }
}

impl Add<ChainWork> for ChainWork {
    type Output = ChainWork;
    fn add(self, rhs: ChainWork) -> Self::Output {
        ChainWork(self.0.saturating_add(rhs.0))
    }
}

impl Display for ChainWork {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Functionality common to every fixed-size hash type used as a block tree key.
pub trait HashBytes:
    Copy
    + Eq
    + Ord
    + Hash
    + Debug
    + Display
    + BorshSerialize
    + BorshDeserialize
    + Send
    + Sync
    + 'static
{
    /// Get the bytes of this hash.
    fn as_bytes(&self) -> &[u8];

    /// Whether every byte of this hash is zero.
    fn is_zero(&self) -> bool {
        self.as_bytes().iter().all(|byte| *byte == 0)
    }
}

macro_rules! fixed_hash {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshDeserialize, BorshSerialize)]
        pub struct $name([u8; $len]);

        impl $name {
            /// Number of bytes in this hash type.
            pub const LEN: usize = $len;

            /// Create a new hash wrapping `bytes`.
            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// The all-zero hash.
            pub const fn zero() -> Self {
                Self([0u8; $len])
            }

            /// Get the inner bytes of this hash.
            pub const fn bytes(&self) -> [u8; $len] {
                self.0
            }

            /// Build a hash from the first `$len` bytes of `digest`.
            pub fn from_digest(digest: &[u8]) -> Self {
                let mut bytes = [0u8; $len];
                bytes.copy_from_slice(&digest[..$len]);
                Self(bytes)
            }
        }

        impl HashBytes for $name {
            fn as_bytes(&self) -> &[u8] {
                &self.0
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}", STANDARD_NO_PAD.encode(self.0))
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), STANDARD_NO_PAD.encode(self.0))
            }
        }
    };
}

fixed_hash!(
    /// 32-byte hash of a Bitcoin block header (double SHA256).
    BtcHash,
    32
);

fixed_hash!(
    /// 24-byte hash of a VeriBlock block header.
    VbkHash,
    24
);

fixed_hash!(
    /// 32-byte hash of an altchain block header. Computed by the altchain, opaque to this library.
    AltHash,
    32
);

fixed_hash!(
    /// 32-byte SHA256 hash. Identifies endorsements and payloads.
    CryptoHash,
    32
);

impl CryptoHash {
    /// SHA256 of the Borsh serialization of `value`.
    pub fn digest_of<T: BorshSerialize>(value: &T) -> CryptoHash {
        let mut hasher = Sha256::new();
        hasher.update(&value.try_to_vec().unwrap());
        CryptoHash::new(hasher.finalize().into())
    }
}

/// Identifies an [`Endorsement`](crate::types::payloads::Endorsement).
pub type EndorsementId = CryptoHash;

/// Identifies a payload (VTB, ATV or context block) added to a block.
pub type PayloadId = CryptoHash;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_height_arithmetic() {
        let height = BlockHeight::new(10);
        assert_eq!(height + 5, BlockHeight::new(15));
        assert_eq!(BlockHeight::new(15) - height, 5);
        assert_eq!(height.saturating_sub(20), BlockHeight::new(0));
        assert_eq!(height.checked_sub(11), None);
    }

    #[test]
    fn chain_work_saturates() {
        let work = ChainWork::new(u128::MAX) + ChainWork::new(1);
        assert_eq!(work.int(), u128::MAX);
    }

    #[test]
    fn hashes_from_digest_truncate() {
        let digest = [7u8; 32];
        assert_eq!(VbkHash::from_digest(&digest).bytes(), [7u8; 24]);
        assert!(BtcHash::zero().is_zero());
        assert!(!BtcHash::from_digest(&digest).is_zero());
    }
}
