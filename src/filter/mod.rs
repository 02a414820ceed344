//! Probabilistic membership filters used as the hot-path pre-check before the
//! exact target lookup. False positives are re-checked by callers; false
//! negatives never happen.
//!
//! All variants share one hash family: a single FxHash base digest per key,
//! mixed per-position with an odd multiplier. The `BLM1` on-disk format pins
//! `(m, k)` so a reloaded filter answers queries bit-identically.

mod bloom;
mod cascade;
mod counting;
mod partitioned;

pub use bloom::{BloomFilter, FilterStats};
pub use cascade::CascadingBloomFilter;
pub use counting::CountingBloomFilter;
pub use partitioned::PartitionedBloomFilter;

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use fxhash::FxHasher;
use std::hash::Hasher;

use crate::error::Result;

pub(crate) const MAGIC: &[u8; 4] = b"BLM1";
pub(crate) const VARIANT_CLASSIC: u8 = 1;
pub(crate) const VARIANT_COUNTING: u8 = 2;
pub(crate) const HEADER_SIZE: usize = 40;

/// Golden-ratio odd multiplier for per-index digest mixing.
pub(crate) const MIX: u64 = 0x9E3779B97F4A7C15;

/// One 64-bit digest per key; every position is derived from it.
#[inline]
pub(crate) fn base_digest(data: &[u8]) -> u64 {
    let mut h = FxHasher::default();
    h.write(data);
    h.finish()
}

/// Position of hash function `i` in a table of `m` slots.
#[inline]
pub(crate) fn position(base: u64, i: u64, m: u64) -> u64 {
    (base ^ (i + 1).wrapping_mul(MIX)) % m
}

/// Optimal bit count: m = ceil(-n ln p / (ln 2)^2).
pub fn optimal_bits(items: u64, fp_rate: f64) -> u64 {
    let ln2 = std::f64::consts::LN_2;
    (-(items as f64) * fp_rate.ln() / (ln2 * ln2)).ceil() as u64
}

/// Optimal hash count: k = ceil((m / n) ln 2).
pub fn optimal_hashes(bits: u64, items: u64) -> u64 {
    ((bits as f64 / items as f64) * std::f64::consts::LN_2).ceil().max(1.0) as u64
}

pub(crate) struct FilterHeader {
    pub variant: u8,
    pub counter_bits: u8,
    pub m: u64,
    pub k: u64,
    pub items_added: u64,
    pub payload_len: u64,
}

pub(crate) fn write_filter(path: &Path, header: &FilterHeader, payload: &[u8]) -> Result<()> {
    debug_assert_eq!(header.payload_len as usize, payload.len());
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(MAGIC);
    buf.push(header.variant);
    buf.push(header.counter_bits);
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&header.m.to_le_bytes());
    buf.extend_from_slice(&header.k.to_le_bytes());
    buf.extend_from_slice(&header.items_added.to_le_bytes());
    buf.extend_from_slice(&header.payload_len.to_le_bytes());
    buf.extend_from_slice(payload);

    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(&buf)?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a filter file. `Ok(None)` on bad magic, unsupported variant or a
/// truncated payload; `Err` only for real I/O failures.
pub(crate) fn read_filter(path: &Path, expect_variant: u8) -> Result<Option<(FilterHeader, Vec<u8>)>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut raw = Vec::new();
    file.read_to_end(&mut raw)?;

    if raw.len() < HEADER_SIZE || &raw[0..4] != MAGIC {
        return Ok(None);
    }
    let variant = raw[4];
    if variant != expect_variant {
        return Ok(None);
    }
    let header = FilterHeader {
        variant,
        counter_bits: raw[5],
        m: u64::from_le_bytes(raw[8..16].try_into().unwrap()),
        k: u64::from_le_bytes(raw[16..24].try_into().unwrap()),
        items_added: u64::from_le_bytes(raw[24..32].try_into().unwrap()),
        payload_len: u64::from_le_bytes(raw[32..40].try_into().unwrap()),
    };
    if raw.len() < HEADER_SIZE + header.payload_len as usize {
        return Ok(None);
    }
    let payload = raw[HEADER_SIZE..HEADER_SIZE + header.payload_len as usize].to_vec();
    Ok(Some((header, payload)))
}
