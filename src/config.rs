//! Search parameter record. All knobs a run needs, validated before any work
//! is scheduled.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::range::KeyRange;
use crate::uint256::UInt256;

/// Sweep order over the range.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum SweepMode {
    /// Ascending from the range start.
    Sequential,
    /// Descending from the range end.
    Backward,
    /// Alternate between the two ends, meeting in the middle.
    Both,
    /// Chunks visited in shuffled order.
    Random,
    /// A random unvisited chunk each step.
    Dance,
}

/// Which public-key encodings to hash and test.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum KeyType {
    Uncompressed,
    Compressed,
    Both,
}

#[derive(Clone, Debug)]
pub struct SearchParams {
    /// Enumeration window.
    pub range: KeyRange,
    /// Baby-step table size hint for engines that precompute one.
    pub m: u64,
    /// Time/space trade-off factor.
    pub k_factor: u32,
    /// 0 = one thread per logical core.
    pub num_threads: usize,
    pub mode: SweepMode,
    pub key_type: KeyType,
    pub bloom_bits_per_element: u64,
    pub bloom_hash_functions: u64,
    /// 0 = unlimited.
    pub max_memory_mb: u64,
    pub checkpoint_enabled: bool,
    pub checkpoint_interval_s: u32,
    pub checkpoint_path: PathBuf,
    /// Append-only sink for found keys.
    pub found_path: PathBuf,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            range: KeyRange::new(UInt256::ONE, UInt256::from_u64(u64::MAX)),
            m: 1 << 22,
            k_factor: 1,
            num_threads: 0,
            mode: SweepMode::Sequential,
            key_type: KeyType::Compressed,
            bloom_bits_per_element: 14,
            bloom_hash_functions: 10,
            max_memory_mb: 0,
            checkpoint_enabled: false,
            checkpoint_interval_s: 60,
            checkpoint_path: PathBuf::from("keysweep.checkpoint"),
            found_path: PathBuf::from("FOUND.txt"),
        }
    }
}

impl SearchParams {
    /// Reject impossible configurations before anything is scheduled.
    pub fn validate(&self) -> Result<()> {
        if self.range.is_empty() {
            return Err(Error::Config(format!(
                "range start {} is above end {}",
                self.range.start, self.range.end
            )));
        }
        if self.range.start.is_zero() {
            return Err(Error::Config("range must not include the zero key".into()));
        }
        if self.k_factor == 0 {
            return Err(Error::Config("k_factor must be at least 1".into()));
        }
        if self.bloom_bits_per_element == 0 || self.bloom_hash_functions == 0 {
            return Err(Error::Config("bloom parameters must be positive".into()));
        }
        if self.checkpoint_enabled && self.checkpoint_interval_s == 0 {
            return Err(Error::Config("checkpoint interval must be positive".into()));
        }
        Ok(())
    }

    /// Worst-case filter memory for `targets` entries against the configured
    /// budget. 0 budget means unlimited.
    pub fn check_memory_budget(&self, targets: usize) -> Result<()> {
        if self.max_memory_mb == 0 {
            return Ok(());
        }
        let filter_bytes = targets as u64 * self.bloom_bits_per_element / 8;
        let budget = self.max_memory_mb * 1024 * 1024;
        if filter_bytes > budget {
            return Err(Error::Config(format!(
                "filter needs {} MB but max_memory_mb is {}",
                filter_bytes / (1024 * 1024),
                self.max_memory_mb
            )));
        }
        Ok(())
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_s as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(SearchParams::default().validate().is_ok());
        assert_eq!(SearchParams::default().m, 1 << 22);
    }

    #[test]
    fn test_rejects_inverted_range() {
        let params = SearchParams {
            range: KeyRange::new(UInt256::from_u64(100), UInt256::from_u64(10)),
            ..Default::default()
        };
        assert!(matches!(params.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_start() {
        let params = SearchParams {
            range: KeyRange::new(UInt256::ZERO, UInt256::from_u64(10)),
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_knobs() {
        let mut params = SearchParams::default();
        params.k_factor = 0;
        assert!(params.validate().is_err());

        let mut params = SearchParams::default();
        params.bloom_hash_functions = 0;
        assert!(params.validate().is_err());

        let mut params = SearchParams::default();
        params.checkpoint_enabled = true;
        params.checkpoint_interval_s = 0;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_memory_budget() {
        let mut params = SearchParams::default();
        params.max_memory_mb = 1;
        // 1M targets * 14 bits ≈ 1.75 MB > 1 MB
        assert!(params.check_memory_budget(1_000_000).is_err());
        assert!(params.check_memory_budget(100_000).is_ok());

        params.max_memory_mb = 0;
        assert!(params.check_memory_budget(usize::MAX / 2).is_ok());
    }
}
