/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Compact ("nBits") encoding of 256-bit proof-of-work targets.
//!
//! Targets are handled as 32-byte big-endian numbers. Only the arithmetic that difficulty
//! adjustment and block proof computation need is provided: decoding, encoding, multiplying and
//! dividing by small integers, and the expected work of a target.

/// A 256-bit proof-of-work target, big-endian.
pub type Target = [u8; 32];

/// Unsigned 256-bit integer stored as four little-endian `u64` limbs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct U256([u64; 4]);

impl U256 {
    fn from_be_bytes(bytes: &Target) -> U256 {
        let mut limbs = [0u64; 4];
        for (i, limb) in limbs.iter_mut().enumerate() {
            let start = 32 - (i + 1) * 8;
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[start..start + 8]);
            *limb = u64::from_be_bytes(word);
        }
        U256(limbs)
    }

    fn to_be_bytes(self) -> Target {
        let mut bytes = [0u8; 32];
        for (i, limb) in self.0.iter().enumerate() {
            let start = 32 - (i + 1) * 8;
            bytes[start..start + 8].copy_from_slice(&limb.to_be_bytes());
        }
        bytes
    }

    fn bits(&self) -> u32 {
        for i in (0..4).rev() {
            if self.0[i] != 0 {
                return 64 * i as u32 + (64 - self.0[i].leading_zeros());
            }
        }
        0
    }

    /// Returns `None` on overflow past 2^256.
    fn checked_add_one(self) -> Option<U256> {
        let mut limbs = self.0;
        for limb in limbs.iter_mut() {
            let (sum, carry) = limb.overflowing_add(1);
            *limb = sum;
            if !carry {
                return Some(U256(limbs));
            }
        }
        None
    }

    /// Returns `None` on overflow past 2^256.
    fn checked_mul_u64(self, rhs: u64) -> Option<U256> {
        let mut limbs = [0u64; 4];
        let mut carry: u128 = 0;
        for i in 0..4 {
            let product = self.0[i] as u128 * rhs as u128 + carry;
            limbs[i] = product as u64;
            carry = product >> 64;
        }
        if carry != 0 {
            None
        } else {
            Some(U256(limbs))
        }
    }

    fn div_u64(self, rhs: u64) -> U256 {
        let mut limbs = [0u64; 4];
        let mut remainder: u128 = 0;
        for i in (0..4).rev() {
            let dividend = (remainder << 64) | self.0[i] as u128;
            limbs[i] = (dividend / rhs as u128) as u64;
            remainder = dividend % rhs as u128;
        }
        U256(limbs)
    }

    /// The 64 most significant bits, starting at the highest set bit.
    fn top_u64(&self) -> u64 {
        let bits = self.bits();
        if bits <= 64 {
            return self.0[0];
        }
        let shift = bits - 64;
        let limb = (shift / 64) as usize;
        let offset = shift % 64;
        if offset == 0 {
            self.0[limb]
        } else {
            (self.0[limb] >> offset) | (self.0[limb + 1] << (64 - offset))
        }
    }
}

/// Decode compact `bits` into a target. Returns `None` for negative or overflowing encodings.
pub fn decode(bits: u32) -> Option<Target> {
    let size = (bits >> 24) as i64;
    let mut word = bits & 0x007f_ffff;
    if word != 0 && bits & 0x0080_0000 != 0 {
        return None;
    }
    if word != 0 && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32)) {
        return None;
    }

    let mut target = [0u8; 32];
    if size <= 3 {
        word >>= 8 * (3 - size) as u32;
        target[29..32].copy_from_slice(&word.to_be_bytes()[1..]);
    } else {
        let lowest = 31 - (size - 3);
        for (i, byte) in word.to_be_bytes()[1..].iter().rev().enumerate() {
            let index = lowest - i as i64;
            if index >= 0 {
                target[index as usize] = *byte;
            }
        }
    }
    Some(target)
}

/// Encode a target into compact bits. Precision below the three most significant bytes is lost.
pub fn encode(target: &Target) -> u32 {
    let first = match target.iter().position(|byte| *byte != 0) {
        Some(first) => first,
        None => return 0,
    };
    let mut size = (32 - first) as u32;
    let mut compact = if size <= 3 {
        let low = u32::from_be_bytes([0, target[29], target[30], target[31]]);
        low << (8 * (3 - size))
    } else {
        u32::from_be_bytes([0, target[first], target[first + 1], target[first + 2]])
    };
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }
    compact | (size << 24)
}

/// Whether `hash`, read as a big-endian number (left-padded to 32 bytes), does not exceed `target`.
pub fn hash_meets_target(hash: &[u8], target: &Target) -> bool {
    let mut padded = [0u8; 32];
    let len = hash.len().min(32);
    padded[32 - len..].copy_from_slice(&hash[..len]);
    padded <= *target
}

/// Compute `target * mul / div`, saturating at the all-ones target on overflow.
pub fn mul_div(target: &Target, mul: u64, div: u64) -> Target {
    match U256::from_be_bytes(target).checked_mul_u64(mul) {
        Some(product) => product.div_u64(div.max(1)).to_be_bytes(),
        None => [0xff; 32],
    }
}

/// Expected number of hashes needed to meet the target encoded in `bits`, i.e.
/// `2^256 / (target + 1)`, saturated into a `u128`. Invalid encodings have zero work.
pub fn work(bits: u32) -> u128 {
    let target = match decode(bits) {
        Some(target) if target != [0u8; 32] => U256::from_be_bytes(&target),
        _ => return 0,
    };
    let denominator = match target.checked_add_one() {
        Some(denominator) => denominator,
        None => return 1,
    };

    let bit_len = denominator.bits();
    if bit_len <= 64 {
        return u128::MAX;
    }
    let top = denominator.top_u64() as u128;
    let quotient = (1u128 << 127) / top;
    let shift = 193 - bit_len as i64;
    if shift >= 0 {
        if (quotient.leading_zeros() as i64) < shift {
            u128::MAX
        } else {
            quotient << shift
        }
    } else {
        quotient >> (-shift)
    }
}
