//! Type-safe fixed-size byte arrays for key material.
//!
//! `ByteArray<N, Tag>` carries a phantom tag so a `PrivateKey` can never be
//! passed where a `Hash160` is expected. All arrays are zero-initialized and
//! support hex codecs, XOR and volatile zeroization.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic;

pub struct ByteArray<const N: usize, Tag> {
    data: [u8; N],
    _tag: PhantomData<Tag>,
}

// Manual Clone/Copy: a derive would demand `Tag: Clone`, and the tag types
// are deliberately uninhabited.
impl<const N: usize, Tag> Clone for ByteArray<N, Tag> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<const N: usize, Tag> Copy for ByteArray<N, Tag> {}

impl<const N: usize, Tag> ByteArray<N, Tag> {
    pub const SIZE: usize = N;

    #[inline]
    pub fn new() -> Self {
        Self { data: [0u8; N], _tag: PhantomData }
    }

    #[inline]
    pub fn from_bytes(data: [u8; N]) -> Self {
        Self { data, _tag: PhantomData }
    }

    /// Copies from a slice. Panics in debug if the length is wrong; truncated
    /// or short slices are a caller bug, not a runtime condition.
    #[inline]
    pub fn from_slice(slice: &[u8]) -> Self {
        debug_assert_eq!(slice.len(), N);
        let mut data = [0u8; N];
        data.copy_from_slice(&slice[..N]);
        Self { data, _tag: PhantomData }
    }

    /// Parse exactly `2N` hex nybbles, optional `0x` prefix. None on any
    /// malformed input, never a partial value.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")).unwrap_or(hex);
        if hex.len() != N * 2 {
            return None;
        }
        let mut data = [0u8; N];
        hex::decode_to_slice(hex, &mut data).ok()?;
        Some(Self { data, _tag: PhantomData })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.data)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.data
    }

    #[inline]
    pub fn as_mut_bytes(&mut self) -> &mut [u8; N] {
        &mut self.data
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }

    /// Zeroize with volatile writes the optimizer cannot elide, then fence.
    pub fn secure_zero(&mut self) {
        let ptr = self.data.as_mut_ptr();
        for i in 0..N {
            // Safety: i < N, ptr points at a live [u8; N].
            unsafe { std::ptr::write_volatile(ptr.add(i), 0) };
        }
        atomic::fence(atomic::Ordering::SeqCst);
    }
}

impl<const N: usize, Tag> Default for ByteArray<N, Tag> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, Tag> PartialEq for ByteArray<N, Tag> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl<const N: usize, Tag> Eq for ByteArray<N, Tag> {}

impl<const N: usize, Tag> PartialOrd for ByteArray<N, Tag> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<const N: usize, Tag> Ord for ByteArray<N, Tag> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.data.cmp(&other.data)
    }
}

impl<const N: usize, Tag> Hash for ByteArray<N, Tag> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        // 8-byte prefix is plenty of entropy for RIPEMD/SHA outputs and keeps
        // hash-map probes to a single u64.
        if N >= 8 {
            state.write_u64(u64::from_le_bytes(self.data[..8].try_into().unwrap()));
        } else {
            state.write(&self.data);
        }
    }
}

impl<const N: usize, Tag> std::ops::BitXor for ByteArray<N, Tag> {
    type Output = Self;
    fn bitxor(self, rhs: Self) -> Self {
        let mut out = self;
        out ^= rhs;
        out
    }
}

impl<const N: usize, Tag> std::ops::BitXorAssign for ByteArray<N, Tag> {
    fn bitxor_assign(&mut self, rhs: Self) {
        for i in 0..N {
            self.data[i] ^= rhs.data[i];
        }
    }
}

impl<const N: usize, Tag> fmt::Debug for ByteArray<N, Tag> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// Tag types. Empty enums so they cannot be instantiated.
pub enum PrivateKeyTag {}
pub enum PublicKeyTag {}
pub enum CompressedPublicKeyTag {}
pub enum Hash256Tag {}
pub enum Hash160Tag {}
pub enum AddressBytesTag {}

/// 32-byte secp256k1 private key, big-endian.
pub type PrivateKey = ByteArray<32, PrivateKeyTag>;
/// 65-byte uncompressed public key (0x04 || X || Y).
pub type PublicKey = ByteArray<65, PublicKeyTag>;
/// 33-byte compressed public key (0x02/0x03 || X).
pub type CompressedPublicKey = ByteArray<33, CompressedPublicKeyTag>;
/// SHA-256 digest.
pub type Hash256 = ByteArray<32, Hash256Tag>;
/// RIPEMD160(SHA256(pubkey)), the hash behind Bitcoin addresses.
pub type Hash160 = ByteArray<20, Hash160Tag>;
/// 25-byte Base58Check payload: version || hash160 || checksum.
pub type AddressBytes = ByteArray<25, AddressBytesTag>;
