//! Classic bloom filter. Mutating operations take one mutex; `query` reads
//! the bit vector lock-free (relaxed atomic loads; bits are only ever set,
//! so the race with a concurrent `add` is benign).

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::{Error, Result};

use super::{
    base_digest, optimal_bits, optimal_hashes, position, read_filter, write_filter, FilterHeader,
    VARIANT_CLASSIC,
};

/// Query counters, relaxed; observability only.
#[derive(Debug, Default)]
pub struct FilterStats {
    pub queries: AtomicU64,
    pub positives: AtomicU64,
}

impl FilterStats {
    pub fn positive_rate(&self) -> f64 {
        let q = self.queries.load(Ordering::Relaxed);
        if q == 0 {
            return 0.0;
        }
        self.positives.load(Ordering::Relaxed) as f64 / q as f64
    }
}

pub struct BloomFilter {
    words: Vec<AtomicU64>,
    num_bits: u64,
    num_hashes: u64,
    items_added: AtomicU64,
    write_lock: Mutex<()>,
    stats: FilterStats,
}

impl BloomFilter {
    /// Size the filter for `expected_items` at `fp_rate`.
    pub fn with_params(expected_items: u64, fp_rate: f64) -> Result<Self> {
        if expected_items == 0 {
            return Err(Error::Validation("filter needs at least one expected item".into()));
        }
        if !(0.0..1.0).contains(&fp_rate) || fp_rate == 0.0 {
            return Err(Error::Validation(format!("fp rate must be in (0, 1), got {fp_rate}")));
        }
        let m = optimal_bits(expected_items, fp_rate);
        let k = optimal_hashes(m, expected_items);
        Ok(Self::with_size(m, k))
    }

    /// Explicit geometry. `m` is rounded up to a whole 64-bit word.
    pub fn with_size(num_bits: u64, num_hashes: u64) -> Self {
        let num_bits = num_bits.max(64);
        let num_hashes = num_hashes.max(1);
        let words = (num_bits as usize + 63) / 64;
        Self {
            words: (0..words).map(|_| AtomicU64::new(0)).collect(),
            num_bits,
            num_hashes,
            items_added: AtomicU64::new(0),
            write_lock: Mutex::new(()),
            stats: FilterStats::default(),
        }
    }

    pub fn add(&self, data: &[u8]) {
        let _guard = self.write_lock.lock().unwrap();
        let base = base_digest(data);
        for i in 0..self.num_hashes {
            let pos = position(base, i, self.num_bits);
            self.words[(pos / 64) as usize].fetch_or(1 << (pos % 64), Ordering::Relaxed);
        }
        self.items_added.fetch_add(1, Ordering::Relaxed);
    }

    /// Lock-free; correct under concurrent `add` because bits are monotone.
    pub fn query(&self, data: &[u8]) -> bool {
        self.stats.queries.fetch_add(1, Ordering::Relaxed);
        let base = base_digest(data);
        for i in 0..self.num_hashes {
            let pos = position(base, i, self.num_bits);
            let word = self.words[(pos / 64) as usize].load(Ordering::Relaxed);
            if word & (1 << (pos % 64)) == 0 {
                return false;
            }
        }
        self.stats.positives.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn clear(&self) {
        let _guard = self.write_lock.lock().unwrap();
        for word in &self.words {
            word.store(0, Ordering::Relaxed);
        }
        self.items_added.store(0, Ordering::Relaxed);
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u64 {
        self.num_hashes
    }

    pub fn items_added(&self) -> u64 {
        self.items_added.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> &FilterStats {
        &self.stats
    }

    pub fn memory_usage(&self) -> usize {
        self.words.len() * 8
    }

    /// Expected FP rate for the current fill: (1 - e^(-kn/m))^k.
    pub fn expected_fp_rate(&self) -> f64 {
        let k = self.num_hashes as f64;
        let n = self.items_added() as f64;
        let m = self.num_bits as f64;
        (1.0 - (-k * n / m).exp()).powf(k)
    }

    /// SHA-256 over the bit vector; checkpoints pin the filter they were
    /// taken against with this.
    pub fn digest(&self) -> crate::types::Hash256 {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.num_bits.to_le_bytes());
        hasher.update(self.num_hashes.to_le_bytes());
        for word in &self.words {
            hasher.update(word.load(Ordering::Relaxed).to_le_bytes());
        }
        crate::types::Hash256::from_slice(&hasher.finalize())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let mut payload = Vec::with_capacity(self.words.len() * 8);
        for word in &self.words {
            payload.extend_from_slice(&word.load(Ordering::Relaxed).to_le_bytes());
        }
        let header = FilterHeader {
            variant: VARIANT_CLASSIC,
            counter_bits: 0,
            m: self.num_bits,
            k: self.num_hashes,
            items_added: self.items_added(),
            payload_len: payload.len() as u64,
        };
        write_filter(path, &header, &payload)
    }

    /// `Ok(None)` on missing file, bad magic, wrong variant or truncation.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let Some((header, payload)) = read_filter(path, VARIANT_CLASSIC)? else {
            return Ok(None);
        };
        let expected_words = (header.m as usize + 63) / 64;
        if payload.len() != expected_words * 8 {
            return Ok(None);
        }
        let words = payload
            .chunks_exact(8)
            .map(|c| AtomicU64::new(u64::from_le_bytes(c.try_into().unwrap())))
            .collect();
        Ok(Some(Self {
            words,
            num_bits: header.m,
            num_hashes: header.k,
            items_added: AtomicU64::new(header.items_added),
            write_lock: Mutex::new(()),
            stats: FilterStats::default(),
        }))
    }
}
