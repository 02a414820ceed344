//! CLI argument parsing for the keysweep binary.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::{KeyType, SearchParams, SweepMode};
use crate::error::{Error, Result};
use crate::range::KeyRange;
use crate::uint256::UInt256;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "keysweep",
    version,
    about = "Parallel private-key range sweeper with bloom-prefiltered target matching"
)]
pub struct Args {
    /// Search range as START:END (hex, 0x prefix optional)
    #[arg(long, value_name = "START:END", conflicts_with = "bits")]
    pub range: Option<String>,

    /// Search all keys with exactly N significant bits
    #[arg(short = 'b', long, value_name = "N")]
    pub bits: Option<u32>,

    /// Target file: addresses or hash160 hex, one per line (or JSON)
    #[arg(short = 'f', long = "targets", value_name = "FILE")]
    pub targets: PathBuf,

    /// Worker threads (0 = one per logical core)
    #[arg(short = 't', long, default_value_t = 0)]
    pub threads: usize,

    /// Sweep order over the range
    #[arg(long, value_enum, default_value_t = CliMode::Sequential)]
    pub mode: CliMode,

    /// Public-key form(s) to test
    #[arg(long = "key-type", value_enum, default_value_t = CliKeyType::Compressed)]
    pub key_type: CliKeyType,

    /// Bloom filter bits per target
    #[arg(long = "bloom-bits", default_value_t = 14)]
    pub bloom_bits: u64,

    /// Bloom filter hash functions
    #[arg(long = "bloom-hashes", default_value_t = 10)]
    pub bloom_hashes: u64,

    /// Memory cap in MB (0 = unlimited)
    #[arg(long = "max-memory", default_value_t = 0)]
    pub max_memory_mb: u64,

    /// Enable checkpointing to FILE
    #[arg(long, value_name = "FILE")]
    pub checkpoint: Option<PathBuf>,

    /// Seconds between checkpoint snapshots
    #[arg(long = "checkpoint-interval", default_value_t = 60)]
    pub checkpoint_interval: u32,

    /// Append-only sink for found keys
    #[arg(long, default_value = "FOUND.txt", value_name = "FILE")]
    pub found: PathBuf,

    /// Seconds between status lines
    #[arg(long = "status-interval", default_value_t = 10)]
    pub status_interval: u64,

    /// Suppress status lines
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliMode {
    Sequential,
    Backward,
    Both,
    Random,
    Dance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliKeyType {
    Uncompressed,
    Compressed,
    Both,
}

impl From<CliMode> for SweepMode {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::Sequential => SweepMode::Sequential,
            CliMode::Backward => SweepMode::Backward,
            CliMode::Both => SweepMode::Both,
            CliMode::Random => SweepMode::Random,
            CliMode::Dance => SweepMode::Dance,
        }
    }
}

impl From<CliKeyType> for KeyType {
    fn from(kt: CliKeyType) -> Self {
        match kt {
            CliKeyType::Uncompressed => KeyType::Uncompressed,
            CliKeyType::Compressed => KeyType::Compressed,
            CliKeyType::Both => KeyType::Both,
        }
    }
}

impl Args {
    /// Turn the raw arguments into a validated parameter record.
    pub fn to_params(&self) -> Result<SearchParams> {
        let range = match (&self.range, self.bits) {
            (Some(spec), _) => parse_range(spec)?,
            (None, Some(bits)) => KeyRange::for_bits(bits)?,
            (None, None) => {
                return Err(Error::Config("either --range or --bits is required".into()));
            }
        };

        let params = SearchParams {
            range,
            num_threads: self.threads,
            mode: self.mode.into(),
            key_type: self.key_type.into(),
            bloom_bits_per_element: self.bloom_bits,
            bloom_hash_functions: self.bloom_hashes,
            max_memory_mb: self.max_memory_mb,
            checkpoint_enabled: self.checkpoint.is_some(),
            checkpoint_interval_s: self.checkpoint_interval,
            checkpoint_path: self
                .checkpoint
                .clone()
                .unwrap_or_else(|| PathBuf::from("keysweep.checkpoint")),
            found_path: self.found.clone(),
            ..Default::default()
        };
        params.validate()?;
        Ok(params)
    }
}

fn parse_range(spec: &str) -> Result<KeyRange> {
    let (start, end) = spec
        .split_once(':')
        .ok_or_else(|| Error::Config(format!("range must be START:END, got '{spec}'")))?;
    let start = UInt256::from_hex(start)
        .ok_or_else(|| Error::Config(format!("bad range start '{start}'")))?;
    let end =
        UInt256::from_hex(end).ok_or_else(|| Error::Config(format!("bad range end '{end}'")))?;
    Ok(KeyRange::new(start, end))
}

/// Thousands separator for status lines.
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::parse_from(std::iter::once("keysweep").chain(args.iter().copied()))
    }

    #[test]
    fn test_bits_range() {
        let args = parse(&["-f", "t.txt", "--bits", "8"]);
        let params = args.to_params().unwrap();
        assert_eq!(params.range.start, UInt256::from_u64(128));
        assert_eq!(params.range.end, UInt256::from_u64(255));
    }

    #[test]
    fn test_explicit_range() {
        let args = parse(&["-f", "t.txt", "--range", "0x100:0x1ff"]);
        let params = args.to_params().unwrap();
        assert_eq!(params.range.start, UInt256::from_u64(0x100));
        assert_eq!(params.range.end, UInt256::from_u64(0x1ff));
    }

    #[test]
    fn test_missing_range_is_config_error() {
        let args = parse(&["-f", "t.txt"]);
        assert!(matches!(args.to_params(), Err(Error::Config(_))));
    }

    #[test]
    fn test_bad_range_spec() {
        for spec in ["zz:ff", "100", "1:zz"] {
            let args = parse(&["-f", "t.txt", "--range", spec]);
            assert!(args.to_params().is_err(), "spec '{spec}' should fail");
        }
    }

    #[test]
    fn test_mode_and_key_type_mapping() {
        let args = parse(&["-f", "t.txt", "-b", "8", "--mode", "dance", "--key-type", "both"]);
        let params = args.to_params().unwrap();
        assert_eq!(params.mode, SweepMode::Dance);
        assert_eq!(params.key_type, KeyType::Both);
    }

    #[test]
    fn test_checkpoint_flag_enables() {
        let args = parse(&["-f", "t.txt", "-b", "8", "--checkpoint", "run.ckpt"]);
        let params = args.to_params().unwrap();
        assert!(params.checkpoint_enabled);
        assert_eq!(params.checkpoint_path, PathBuf::from("run.ckpt"));

        let args = parse(&["-f", "t.txt", "-b", "8"]);
        assert!(!args.to_params().unwrap().checkpoint_enabled);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567890), "1,234,567,890");
    }
}
