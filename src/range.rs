//! Key-range algebra: inclusive ranges over the 256-bit key space with
//! equal-partition, chunked and weighted splitting for work distribution.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::uint256::UInt256;

/// Inclusive range `[start, end]` of private-key candidates.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct KeyRange {
    pub start: UInt256,
    pub end: UInt256,
}

/// Smallest work chunk the partitioner will hand out.
pub const MIN_CHUNK: u64 = 1 << 20;
/// Largest work chunk; keeps a single unit's wall-clock bounded.
pub const MAX_CHUNK: u64 = 1 << 40;

impl KeyRange {
    pub fn new(start: UInt256, end: UInt256) -> Self {
        Self { start, end }
    }

    /// Range of all keys with exactly `bits` significant bits:
    /// `[2^(bits-1), 2^bits - 1]`.
    pub fn for_bits(bits: u32) -> Result<Self> {
        if bits == 0 || bits > 256 {
            return Err(Error::Validation(format!(
                "bit count must be between 1 and 256, got {bits}"
            )));
        }
        let mut start = UInt256::ZERO;
        start.set_bit(bits as usize - 1, true);
        let mut end = UInt256::ZERO;
        for i in 0..bits as usize {
            end.set_bit(i, true);
        }
        Ok(Self { start, end })
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    /// Number of keys in the range. Zero when inverted; the full 256-bit
    /// domain saturates to `UInt256::MAX` (one short, documented).
    pub fn size(&self) -> UInt256 {
        if self.is_empty() {
            return UInt256::ZERO;
        }
        let width = self.end.wrapping_sub(&self.start);
        width.checked_add(&UInt256::ONE).unwrap_or(UInt256::MAX)
    }

    #[inline]
    pub fn contains(&self, key: &UInt256) -> bool {
        *key >= self.start && *key <= self.end
    }

    /// Split into at most `n` contiguous parts that cover the range exactly
    /// with no overlap. The remainder is spread over the first `size mod n`
    /// parts; when the range is smaller than `n` each key gets its own part.
    pub fn split(&self, n: u64) -> Vec<KeyRange> {
        if n == 0 || self.is_empty() {
            return Vec::new();
        }
        let width = self.size();
        let (q, r) = width.div_rem_u64(n);

        // Fewer keys than parts: singletons.
        if q.is_zero() {
            let mut parts = Vec::with_capacity(r as usize);
            let mut cur = self.start;
            for _ in 0..r {
                parts.push(KeyRange::new(cur, cur));
                cur.incr();
            }
            return parts;
        }

        let mut parts = Vec::with_capacity(n as usize);
        let mut cur = self.start;
        for i in 0..n {
            let extra = (i < r) as u64;
            // Part width is q (+1 for the first r parts); end = cur + width - 1.
            let span = q.wrapping_add(&UInt256::from_u64(extra));
            let end = cur.wrapping_add(&span).wrapping_sub(&UInt256::ONE);
            parts.push(KeyRange::new(cur, end));
            cur = end.wrapping_add(&UInt256::ONE);
        }
        debug_assert_eq!(parts.last().unwrap().end, self.end);
        parts
    }

    /// Consecutive chunks of exactly `chunk` keys, last one possibly shorter.
    pub fn split_by_chunk(&self, chunk: u64) -> Result<Vec<KeyRange>> {
        if chunk == 0 {
            return Err(Error::Validation("chunk width must be positive".into()));
        }
        let mut parts = Vec::new();
        if self.is_empty() {
            return Ok(parts);
        }
        let step = UInt256::from_u64(chunk);
        let mut cur = self.start;
        loop {
            let remaining = self.end.wrapping_sub(&cur);
            if remaining < step {
                parts.push(KeyRange::new(cur, self.end));
                break;
            }
            let end = cur.wrapping_add(&step).wrapping_sub(&UInt256::ONE);
            parts.push(KeyRange::new(cur, end));
            cur = end.wrapping_add(&UInt256::ONE);
        }
        Ok(parts)
    }

    /// Weighted split across devices. Weights are normalized over their sum;
    /// non-positive weights get nothing. Rounding error is absorbed by the
    /// last positive-weight piece so the union is always exact.
    pub fn split_for_devices(&self, weights: &[f64]) -> Vec<KeyRange> {
        let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
        if total <= 0.0 || self.is_empty() {
            return Vec::new();
        }
        let width = self.size();
        let last_positive = weights.iter().rposition(|w| *w > 0.0).unwrap();

        let mut parts = Vec::with_capacity(weights.len());
        let mut cur = self.start;
        for (i, &w) in weights.iter().enumerate() {
            if w <= 0.0 {
                continue;
            }
            let span = if i == last_positive {
                // Everything left.
                self.end.wrapping_sub(&cur).wrapping_add(&UInt256::ONE)
            } else {
                // width * (w / total) in basis points, kept inside 256-bit
                // arithmetic: (width / 10^6) may be zero for tiny ranges.
                let ppm = (w / total * 1_000_000.0).round() as u64;
                let scaled = width.div_rem_u64(1_000_000).0.wrapping_mul_u64(ppm);
                let scaled = if scaled.is_zero() {
                    // Range too small for ppm precision; fall back to u128 math.
                    let approx = (width.to_u128_lossy() as f64 * w / total) as u64;
                    UInt256::from_u64(approx)
                } else {
                    scaled
                };
                if scaled.is_zero() { UInt256::ONE } else { scaled }
            };
            let end = cur.wrapping_add(&span).wrapping_sub(&UInt256::ONE);
            let end = if end > self.end || i == last_positive { self.end } else { end };
            parts.push(KeyRange::new(cur, end));
            if end == self.end {
                break;
            }
            cur = end.wrapping_add(&UInt256::ONE);
        }
        parts
    }

    /// Chunk width that gives each worker roughly `target` seconds of work,
    /// clamped to `[MIN_CHUNK, MAX_CHUNK]`.
    pub fn optimal_chunk(&self, workers: u64, target: Duration) -> u64 {
        let workers = workers.max(1);
        let secs = target.as_secs().max(1);
        let per_worker = self.size().div_rem_u64(workers).0;
        let chunk = per_worker.div_rem_u64(secs).0;
        let chunk = if chunk > UInt256::from_u64(MAX_CHUNK) {
            MAX_CHUNK
        } else {
            chunk.to_u128_lossy() as u64
        };
        chunk.clamp(MIN_CHUNK, MAX_CHUNK)
    }
}

impl std::fmt::Display for KeyRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}
