//! Counting bloom filter: per-position counters instead of bits, so entries
//! can be removed. Counters saturate at `2^b - 1`; once a position saturates
//! the true count is lost and any entry passing through it is stuck until
//! `clear`; removal refuses rather than corrupting neighbors.

use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use crate::error::{Error, Result};

use super::{
    base_digest, optimal_bits, optimal_hashes, position, read_filter, write_filter, FilterHeader,
    VARIANT_COUNTING,
};

pub struct CountingBloomFilter {
    // Packed counters; `counters_per_byte = 8 / counter_bits`, so a counter
    // never straddles a byte and per-byte atomics suffice for reads.
    bytes: Vec<AtomicU8>,
    num_counters: u64,
    num_hashes: u64,
    counter_bits: u8,
    max_count: u8,
    items_added: u64,
    write_lock: Mutex<()>,
}

impl CountingBloomFilter {
    /// `counter_bits` must divide a byte: 1, 2, 4 or 8.
    pub fn new(expected_items: u64, fp_rate: f64, counter_bits: u8) -> Result<Self> {
        if expected_items == 0 {
            return Err(Error::Validation("filter needs at least one expected item".into()));
        }
        if !(0.0..1.0).contains(&fp_rate) || fp_rate == 0.0 {
            return Err(Error::Validation(format!("fp rate must be in (0, 1), got {fp_rate}")));
        }
        if !matches!(counter_bits, 1 | 2 | 4 | 8) {
            return Err(Error::Validation(format!(
                "counter bits must be 1, 2, 4 or 8, got {counter_bits}"
            )));
        }
        let num_counters = optimal_bits(expected_items, fp_rate).max(64);
        let num_hashes = optimal_hashes(num_counters, expected_items);
        Ok(Self::with_size(num_counters, num_hashes, counter_bits))
    }

    fn with_size(num_counters: u64, num_hashes: u64, counter_bits: u8) -> Self {
        let per_byte = 8 / counter_bits as u64;
        let bytes = ((num_counters + per_byte - 1) / per_byte) as usize;
        Self {
            bytes: (0..bytes).map(|_| AtomicU8::new(0)).collect(),
            num_counters,
            num_hashes: num_hashes.max(1),
            counter_bits,
            max_count: if counter_bits == 8 { u8::MAX } else { (1u8 << counter_bits) - 1 },
            items_added: 0,
            write_lock: Mutex::new(()),
        }
    }

    #[inline]
    fn slot(&self, idx: u64) -> (usize, u32, u8) {
        let per_byte = 8 / self.counter_bits as u64;
        let byte = (idx / per_byte) as usize;
        let shift = ((idx % per_byte) as u32) * self.counter_bits as u32;
        (byte, shift, self.max_count << shift)
    }

    #[inline]
    fn count_at(&self, idx: u64) -> u8 {
        let (byte, shift, mask) = self.slot(idx);
        (self.bytes[byte].load(Ordering::Relaxed) & mask) >> shift
    }

    fn store_count(&self, idx: u64, value: u8) {
        let (byte, shift, mask) = self.slot(idx);
        let old = self.bytes[byte].load(Ordering::Relaxed);
        self.bytes[byte].store((old & !mask) | (value << shift), Ordering::Relaxed);
    }

    fn positions(&self, data: &[u8]) -> impl Iterator<Item = u64> + '_ {
        let base = base_digest(data);
        (0..self.num_hashes).map(move |i| position(base, i, self.num_counters))
    }

    /// Increment every position, saturating at the counter maximum.
    pub fn add(&mut self, data: &[u8]) {
        let _guard = self.write_lock.lock().unwrap();
        for idx in self.positions(data).collect::<Vec<_>>() {
            let count = self.count_at(idx);
            if count < self.max_count {
                self.store_count(idx, count + 1);
            }
        }
        self.items_added += 1;
    }

    /// Decrement the key's positions, but only when the minimum count is at
    /// least one and not saturated. Saturated counters are never decremented
    /// (their true count is unknown), so a fully saturated entry is stuck
    /// until `clear`. Returns whether the removal happened.
    pub fn remove(&mut self, data: &[u8]) -> bool {
        let _guard = self.write_lock.lock().unwrap();
        let positions: Vec<u64> = self.positions(data).collect();
        let counts: Vec<u8> = positions.iter().map(|&idx| self.count_at(idx)).collect();
        let min = counts.iter().copied().min().unwrap_or(0);
        if min == 0 || min == self.max_count {
            return false;
        }
        for (&idx, &count) in positions.iter().zip(&counts) {
            // Saturated counters have lost their true value; leave them alone.
            if count < self.max_count {
                self.store_count(idx, count - 1);
            }
        }
        self.items_added = self.items_added.saturating_sub(1);
        true
    }

    /// Present iff every position has count >= 1. Lock-free.
    pub fn query(&self, data: &[u8]) -> bool {
        self.positions(data).all(|idx| self.count_at(idx) >= 1)
    }

    /// Minimum counter value across the key's positions, an upper bound on
    /// how many times the key was added.
    pub fn min_count(&self, data: &[u8]) -> u8 {
        self.positions(data).map(|idx| self.count_at(idx)).min().unwrap_or(0)
    }

    pub fn clear(&mut self) {
        let _guard = self.write_lock.lock().unwrap();
        for byte in &self.bytes {
            byte.store(0, Ordering::Relaxed);
        }
        self.items_added = 0;
    }

    pub fn num_counters(&self) -> u64 {
        self.num_counters
    }

    pub fn counter_bits(&self) -> u8 {
        self.counter_bits
    }

    pub fn max_count(&self) -> u8 {
        self.max_count
    }

    pub fn items_added(&self) -> u64 {
        self.items_added
    }

    pub fn memory_usage(&self) -> usize {
        self.bytes.len()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let payload: Vec<u8> = self.bytes.iter().map(|b| b.load(Ordering::Relaxed)).collect();
        let header = FilterHeader {
            variant: VARIANT_COUNTING,
            counter_bits: self.counter_bits,
            m: self.num_counters,
            k: self.num_hashes,
            items_added: self.items_added,
            payload_len: payload.len() as u64,
        };
        write_filter(path, &header, &payload)
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        let Some((header, payload)) = read_filter(path, VARIANT_COUNTING)? else {
            return Ok(None);
        };
        if !matches!(header.counter_bits, 1 | 2 | 4 | 8) {
            return Ok(None);
        }
        let per_byte = 8 / header.counter_bits as u64;
        let expected = ((header.m + per_byte - 1) / per_byte) as usize;
        if payload.len() != expected {
            return Ok(None);
        }
        let mut filter = Self::with_size(header.m, header.k, header.counter_bits);
        filter.bytes = payload.into_iter().map(AtomicU8::new).collect();
        filter.items_added = header.items_added;
        Ok(Some(filter))
    }
}
