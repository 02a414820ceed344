//! Target set: the hash160 values the sweep is looking for.
//!
//! Loads plain text (one address or hash160 hex per line) or JSON
//! (`{"addresses": [...]}`), keeps a sorted vector for exact binary-search
//! confirmation, and maintains a sorted binary cache (`KSTG01`) that reloads
//! via mmap in milliseconds. The cache is rebuilt when the source is newer.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use rayon::prelude::*;
use serde::Deserialize;

use crate::address::decode_address;
use crate::error::{Error, Result};
use crate::filter::BloomFilter;
use crate::types::Hash160;

const CACHE_MAGIC: &[u8; 8] = b"KSTG01\0\0";
const HEADER_SIZE: usize = 16;
const RECORD_SIZE: usize = 20;

#[derive(Deserialize)]
struct TargetFile {
    addresses: Vec<String>,
}

#[derive(Default, Clone, Debug)]
pub struct TargetStats {
    pub total: usize,
    pub skipped: usize,
    pub load_time_ms: u64,
}

pub struct TargetSet {
    hashes: Vec<Hash160>,
    pub stats: TargetStats,
}

impl TargetSet {
    pub fn new() -> Self {
        Self { hashes: Vec::new(), stats: TargetStats::default() }
    }

    /// Load targets, preferring the binary cache when it is newer than the
    /// source. Parse failures on individual lines are skipped and counted;
    /// a file with no usable entries is a parse error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let cache = cache_path(path);
        let start = std::time::Instant::now();

        if cache_is_fresh(path, &cache) {
            if let Some(mut set) = Self::load_cache(&cache)? {
                set.stats.load_time_ms = start.elapsed().as_millis() as u64;
                println!(
                    "[Targets] Loaded {} targets from cache in {}ms",
                    set.stats.total, set.stats.load_time_ms
                );
                return Ok(set);
            }
            eprintln!("[Targets] Cache unreadable, rebuilding from source");
        }

        let mut set = Self::parse_source(path)?;
        set.stats.load_time_ms = start.elapsed().as_millis() as u64;
        if let Err(e) = set.save_cache(&cache) {
            eprintln!("[Targets] Failed to save cache: {e}");
        }
        println!(
            "[Targets] Parsed {} targets ({} skipped) in {}ms",
            set.stats.total, set.stats.skipped, set.stats.load_time_ms
        );
        Ok(set)
    }

    fn parse_source(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;

        if path.extension().is_some_and(|e| e == "json") {
            let file: TargetFile = serde_json::from_str(&content)
                .map_err(|e| Error::Parse(format!("bad target JSON: {e}")))?;
            return Self::from_entries(file.addresses.iter().map(|s| s.as_str()).collect());
        }

        let lines: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect();
        Self::from_entries(lines)
    }

    fn from_entries(entries: Vec<&str>) -> Result<Self> {
        let total_in = entries.len();
        let mut hashes: Vec<Hash160> = entries.par_iter().filter_map(|e| parse_entry(e)).collect();
        let skipped = total_in - hashes.len();
        if hashes.is_empty() {
            return Err(Error::Parse("no usable targets in file".into()));
        }
        hashes.par_sort_unstable();
        hashes.dedup();
        let total = hashes.len();
        Ok(Self { hashes, stats: TargetStats { total, skipped, load_time_ms: 0 } })
    }

    pub fn insert(&mut self, hash: Hash160) {
        if let Err(pos) = self.hashes.binary_search(&hash) {
            self.hashes.insert(pos, hash);
            self.stats.total = self.hashes.len();
        }
    }

    #[inline]
    pub fn contains(&self, hash: &Hash160) -> bool {
        self.hashes.binary_search(hash).is_ok()
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hash160> {
        self.hashes.iter()
    }

    /// Classic bloom filter sized `bits_per_element * len` with `hashes`
    /// hash functions: the hot-path pre-check in front of `contains`.
    pub fn build_filter(&self, bits_per_element: u64, hashes: u64) -> BloomFilter {
        let bits = (self.hashes.len() as u64).max(1) * bits_per_element.max(1);
        let filter = BloomFilter::with_size(bits, hashes.max(1));
        for hash in &self.hashes {
            filter.add(hash.as_bytes());
        }
        filter
    }

    fn save_cache(&self, cache: &Path) -> Result<()> {
        let tmp = cache.with_extension("bin.tmp");
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::with_capacity(1 << 20, file);
        writer.write_all(CACHE_MAGIC)?;
        writer.write_all(&(self.hashes.len() as u64).to_le_bytes())?;
        for hash in &self.hashes {
            writer.write_all(hash.as_bytes())?;
        }
        writer.flush()?;
        writer.into_inner().map_err(|e| Error::Io(e.into_error()))?.sync_all()?;
        fs::rename(&tmp, cache)?;
        Ok(())
    }

    fn load_cache(cache: &Path) -> Result<Option<Self>> {
        let file = match File::open(cache) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        // Safety: the mapping is read-only and only read while held.
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() < HEADER_SIZE || &mmap[0..8] != CACHE_MAGIC {
            return Ok(None);
        }
        let count = u64::from_le_bytes(mmap[8..16].try_into().unwrap()) as usize;
        if mmap.len() < HEADER_SIZE + count * RECORD_SIZE {
            return Ok(None);
        }
        let mut hashes = Vec::with_capacity(count);
        for i in 0..count {
            let offset = HEADER_SIZE + i * RECORD_SIZE;
            hashes.push(Hash160::from_slice(&mmap[offset..offset + RECORD_SIZE]));
        }
        Ok(Some(Self {
            hashes,
            stats: TargetStats { total: count, skipped: 0, load_time_ms: 0 },
        }))
    }
}

impl Default for TargetSet {
    fn default() -> Self {
        Self::new()
    }
}

/// A line is either a bare hash160 (40 hex nybbles) or an address.
fn parse_entry(entry: &str) -> Option<Hash160> {
    if entry.len() == 40 {
        if let Some(hash) = Hash160::from_hex(entry) {
            return Some(hash);
        }
    }
    decode_address(entry).map(|(_, hash)| hash)
}

fn cache_path(source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_os_string();
    name.push(".bin");
    PathBuf::from(name)
}

fn cache_is_fresh(source: &Path, cache: &Path) -> bool {
    let (Ok(src), Ok(bin)) = (fs::metadata(source), fs::metadata(cache)) else {
        return cache.exists() && !source.exists();
    };
    match (src.modified(), bin.modified()) {
        (Ok(s), Ok(b)) => b >= s,
        _ => true,
    }
}
