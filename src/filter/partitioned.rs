//! Partitioned bloom filter: P independent sub-filters selected by the key's
//! base digest. Each partition mutates under its own lock, so adds hitting
//! distinct partitions never contend. Queries stay lock-free end to end.

use crate::error::{Error, Result};

use super::{base_digest, optimal_bits, optimal_hashes, BloomFilter};

pub struct PartitionedBloomFilter {
    partitions: Vec<BloomFilter>,
}

impl PartitionedBloomFilter {
    /// Total geometry for `expected_items` at `fp_rate`, spread evenly over
    /// `partitions` sub-filters.
    pub fn new(expected_items: u64, partitions: usize, fp_rate: f64) -> Result<Self> {
        if partitions == 0 {
            return Err(Error::Validation("need at least one partition".into()));
        }
        if expected_items == 0 {
            return Err(Error::Validation("filter needs at least one expected item".into()));
        }
        let total_bits = optimal_bits(expected_items, fp_rate);
        let per_partition = (total_bits / partitions as u64).max(64);
        let k = optimal_hashes(total_bits, expected_items);
        let filters = (0..partitions)
            .map(|_| BloomFilter::with_size(per_partition, k))
            .collect();
        Ok(Self { partitions: filters })
    }

    #[inline]
    fn partition_of(&self, data: &[u8]) -> usize {
        (base_digest(data) % self.partitions.len() as u64) as usize
    }

    pub fn add(&self, data: &[u8]) {
        self.partitions[self.partition_of(data)].add(data);
    }

    pub fn query(&self, data: &[u8]) -> bool {
        self.partitions[self.partition_of(data)].query(data)
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn items_added(&self) -> u64 {
        self.partitions.iter().map(|p| p.items_added()).sum()
    }

    pub fn memory_usage(&self) -> usize {
        self.partitions.iter().map(|p| p.memory_usage()).sum()
    }

    pub fn clear(&self) {
        for partition in &self.partitions {
            partition.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;

    #[test]
    fn test_membership_across_partitions() {
        let filter = PartitionedBloomFilter::new(10_000, 256, 0.01).unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(17);
        let items: Vec<[u8; 20]> = (0..10_000).map(|_| rng.gen()).collect();
        for item in &items {
            filter.add(item);
        }
        for item in &items {
            assert!(filter.query(item), "false negative");
        }
        assert_eq!(filter.items_added(), 10_000);
    }

    #[test]
    fn test_partition_selection_is_stable() {
        let filter = PartitionedBloomFilter::new(1000, 16, 0.01).unwrap();
        let p1 = filter.partition_of(b"some-key");
        let p2 = filter.partition_of(b"some-key");
        assert_eq!(p1, p2);
    }

    #[test]
    fn test_concurrent_sharded_adds() {
        let filter = Arc::new(PartitionedBloomFilter::new(40_000, 64, 0.01).unwrap());
        let mut handles = Vec::new();
        for t in 0..8u64 {
            let filter = Arc::clone(&filter);
            handles.push(std::thread::spawn(move || {
                for i in 0..5_000u64 {
                    filter.add(&(t << 32 | i).to_le_bytes());
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(filter.items_added(), 40_000);
        for t in 0..8u64 {
            for i in (0..5_000u64).step_by(97) {
                assert!(filter.query(&(t << 32 | i).to_le_bytes()));
            }
        }
    }

    #[test]
    fn test_rejects_zero_partitions() {
        assert!(PartitionedBloomFilter::new(100, 0, 0.01).is_err());
    }
}
