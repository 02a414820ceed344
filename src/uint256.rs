//! 256-bit unsigned integer for key-range arithmetic.
//!
//! Four 64-bit limbs, little-endian limb order. Addition and subtraction are
//! modulo 2^256; `checked_add` reports the dropped carry for callers that need
//! the overflow signal. Byte/hex codecs are big-endian, matching private-key
//! serialization.

use std::cmp::Ordering;
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct UInt256 {
    limbs: [u64; 4],
}

impl UInt256 {
    pub const ZERO: UInt256 = UInt256 { limbs: [0; 4] };
    pub const ONE: UInt256 = UInt256 { limbs: [1, 0, 0, 0] };
    pub const MAX: UInt256 = UInt256 { limbs: [u64::MAX; 4] };

    #[inline]
    pub const fn from_u64(value: u64) -> Self {
        Self { limbs: [value, 0, 0, 0] }
    }

    #[inline]
    pub const fn from_u128(value: u128) -> Self {
        Self { limbs: [value as u64, (value >> 64) as u64, 0, 0] }
    }

    #[inline]
    pub const fn from_limbs(limbs: [u64; 4]) -> Self {
        Self { limbs }
    }

    #[inline]
    pub fn limb(&self, i: usize) -> u64 {
        self.limbs[i]
    }

    /// Low 128 bits; high limbs are discarded.
    #[inline]
    pub fn to_u128_lossy(&self) -> u128 {
        (self.limbs[1] as u128) << 64 | self.limbs[0] as u128
    }

    /// Approximate magnitude for progress math; exact up to 53 bits.
    pub fn to_f64_lossy(&self) -> f64 {
        self.limbs
            .iter()
            .enumerate()
            .map(|(i, &limb)| limb as f64 * 2f64.powi(64 * i as i32))
            .sum()
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.limbs == [0; 4]
    }

    /// Wrapping addition, carry past bit 255 is dropped.
    pub fn wrapping_add(&self, other: &UInt256) -> UInt256 {
        self.add_with_carry(other).0
    }

    /// Addition that reports overflow instead of wrapping.
    pub fn checked_add(&self, other: &UInt256) -> Option<UInt256> {
        let (sum, carry) = self.add_with_carry(other);
        if carry { None } else { Some(sum) }
    }

    fn add_with_carry(&self, other: &UInt256) -> (UInt256, bool) {
        let mut result = [0u64; 4];
        let mut carry = 0u64;
        for i in 0..4 {
            let sum = self.limbs[i] as u128 + other.limbs[i] as u128 + carry as u128;
            result[i] = sum as u64;
            carry = (sum >> 64) as u64;
        }
        (UInt256 { limbs: result }, carry != 0)
    }

    /// Wrapping subtraction. Callers must ensure `self >= other`; the result
    /// for `self < other` wraps modulo 2^256.
    pub fn wrapping_sub(&self, other: &UInt256) -> UInt256 {
        debug_assert!(self >= other, "UInt256 subtraction underflow");
        let mut result = [0u64; 4];
        let mut borrow = 0u64;
        for i in 0..4 {
            let (d, b1) = self.limbs[i].overflowing_sub(other.limbs[i]);
            let (d, b2) = d.overflowing_sub(borrow);
            result[i] = d;
            borrow = (b1 || b2) as u64;
        }
        UInt256 { limbs: result }
    }

    pub fn checked_sub(&self, other: &UInt256) -> Option<UInt256> {
        if self < other {
            None
        } else {
            Some(self.wrapping_sub(other))
        }
    }

    /// Pre-increment, wrapping at 2^256.
    pub fn incr(&mut self) {
        for limb in self.limbs.iter_mut() {
            *limb = limb.wrapping_add(1);
            if *limb != 0 {
                break;
            }
        }
    }

    #[inline]
    pub fn bit(&self, pos: usize) -> bool {
        if pos >= 256 {
            return false;
        }
        (self.limbs[pos / 64] >> (pos % 64)) & 1 == 1
    }

    pub fn set_bit(&mut self, pos: usize, value: bool) {
        if pos >= 256 {
            return;
        }
        let mask = 1u64 << (pos % 64);
        if value {
            self.limbs[pos / 64] |= mask;
        } else {
            self.limbs[pos / 64] &= !mask;
        }
    }

    /// Position of the highest set bit, or None if zero.
    pub fn highest_bit(&self) -> Option<u32> {
        for i in (0..4).rev() {
            if self.limbs[i] != 0 {
                return Some(i as u32 * 64 + 63 - self.limbs[i].leading_zeros());
            }
        }
        None
    }

    /// Divide by a 64-bit divisor, returning quotient and remainder.
    /// Divisor of zero panics, same as native integer division.
    pub fn div_rem_u64(&self, divisor: u64) -> (UInt256, u64) {
        assert!(divisor != 0, "division by zero");
        let d = divisor as u128;
        let mut quotient = [0u64; 4];
        let mut rem = 0u128;
        for i in (0..4).rev() {
            let cur = (rem << 64) | self.limbs[i] as u128;
            quotient[i] = (cur / d) as u64;
            rem = cur % d;
        }
        (UInt256 { limbs: quotient }, rem as u64)
    }

    /// Multiply by a 64-bit factor, wrapping at 2^256.
    pub fn wrapping_mul_u64(&self, factor: u64) -> UInt256 {
        let f = factor as u128;
        let mut result = [0u64; 4];
        let mut carry = 0u128;
        for i in 0..4 {
            let prod = self.limbs[i] as u128 * f + carry;
            result[i] = prod as u64;
            carry = prod >> 64;
        }
        UInt256 { limbs: result }
    }

    pub fn to_be_bytes(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        for i in 0..4 {
            bytes[(3 - i) * 8..(4 - i) * 8].copy_from_slice(&self.limbs[i].to_be_bytes());
        }
        bytes
    }

    pub fn from_be_bytes(bytes: &[u8; 32]) -> Self {
        let mut limbs = [0u64; 4];
        for i in 0..4 {
            limbs[i] = u64::from_be_bytes(bytes[(3 - i) * 8..(4 - i) * 8].try_into().unwrap());
        }
        Self { limbs }
    }

    /// Parse from hex. Accepts an optional `0x` prefix, mixed case, and up to
    /// 64 nybbles (zero-padded internally). Returns None on any bad character
    /// or overlength input, never a partial value.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")).unwrap_or(hex);
        if hex.is_empty() || hex.len() > 64 {
            return None;
        }
        let mut limbs = [0u64; 4];
        // Walk nybbles from the least-significant end.
        for (i, c) in hex.bytes().rev().enumerate() {
            let digit = (c as char).to_digit(16)? as u64;
            limbs[i / 16] |= digit << ((i % 16) * 4);
        }
        Some(Self { limbs })
    }

    /// Minimum-width lowercase hex, a single `0` for zero.
    pub fn to_hex(&self) -> String {
        match self.highest_bit() {
            None => "0".to_string(),
            Some(high) => {
                let top = high as usize / 64;
                let mut out = format!("{:x}", self.limbs[top]);
                for i in (0..top).rev() {
                    out.push_str(&format!("{:016x}", self.limbs[i]));
                }
                out
            }
        }
    }
}

impl PartialOrd for UInt256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for UInt256 {
    fn cmp(&self, other: &Self) -> Ordering {
        for i in (0..4).rev() {
            match self.limbs[i].cmp(&other.limbs[i]) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl std::ops::Add for UInt256 {
    type Output = UInt256;
    fn add(self, rhs: UInt256) -> UInt256 {
        self.wrapping_add(&rhs)
    }
}

impl std::ops::Sub for UInt256 {
    type Output = UInt256;
    fn sub(self, rhs: UInt256) -> UInt256 {
        self.wrapping_sub(&rhs)
    }
}

impl fmt::Debug for UInt256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UInt256(0x{})", self.to_hex())
    }
}

impl fmt::Display for UInt256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl From<u64> for UInt256 {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}
