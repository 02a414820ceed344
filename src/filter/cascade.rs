//! Cascading bloom filter: a chain of geometrically shrinking filters. A key
//! is reported present only if every level agrees, so the combined false
//! positive rate is roughly the product of the per-level rates.

use std::path::Path;

use crate::error::{Error, Result};

use super::BloomFilter;

pub struct CascadingBloomFilter {
    levels: Vec<BloomFilter>,
    items_added: u64,
}

impl CascadingBloomFilter {
    /// `levels` filters, level `i` sized for `expected_items * ratio^i` at
    /// `fp_rate` each. Default ratio is 0.5.
    pub fn new(expected_items: u64, levels: usize, fp_rate: f64) -> Result<Self> {
        Self::with_ratio(expected_items, levels, fp_rate, 0.5)
    }

    pub fn with_ratio(expected_items: u64, levels: usize, fp_rate: f64, ratio: f64) -> Result<Self> {
        if levels == 0 {
            return Err(Error::Validation("cascade needs at least one level".into()));
        }
        if !(0.0..1.0).contains(&ratio) || ratio == 0.0 {
            return Err(Error::Validation(format!("cascade ratio must be in (0, 1), got {ratio}")));
        }
        let mut filters = Vec::with_capacity(levels);
        let mut capacity = expected_items as f64;
        for _ in 0..levels {
            filters.push(BloomFilter::with_params(capacity.max(1.0) as u64, fp_rate)?);
            capacity *= ratio;
        }
        Ok(Self { levels: filters, items_added: 0 })
    }

    /// Insert into every level.
    pub fn add(&mut self, data: &[u8]) {
        for level in &self.levels {
            level.add(data);
        }
        self.items_added += 1;
    }

    /// Present only if every level accepts.
    pub fn query(&self, data: &[u8]) -> bool {
        self.levels.iter().all(|level| level.query(data))
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, idx: usize) -> &BloomFilter {
        &self.levels[idx]
    }

    pub fn items_added(&self) -> u64 {
        self.items_added
    }

    pub fn memory_usage(&self) -> usize {
        self.levels.iter().map(|l| l.memory_usage()).sum()
    }

    /// Product of per-level expected rates.
    pub fn combined_fp_rate(&self) -> f64 {
        self.levels.iter().map(|l| l.expected_fp_rate()).product()
    }

    /// One file per level: `<base>.0`, `<base>.1`, ...
    pub fn save(&self, base: &Path) -> Result<()> {
        for (i, level) in self.levels.iter().enumerate() {
            level.save(&level_path(base, i))?;
        }
        Ok(())
    }

    /// Loads `<base>.0` .. until the first missing level. `Ok(None)` when
    /// level 0 is absent or malformed.
    pub fn load(base: &Path) -> Result<Option<Self>> {
        let mut levels = Vec::new();
        loop {
            match BloomFilter::load(&level_path(base, levels.len()))? {
                Some(filter) => levels.push(filter),
                None => break,
            }
        }
        if levels.is_empty() {
            return Ok(None);
        }
        let items_added = levels[0].items_added();
        Ok(Some(Self { levels, items_added }))
    }
}

fn level_path(base: &Path, idx: usize) -> std::path::PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!(".{idx}"));
    std::path::PathBuf::from(name)
}
