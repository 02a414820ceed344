// End-to-end search scenarios over small, fully enumerable ranges.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use keysweep::config::{KeyType, SearchParams, SweepMode};
use keysweep::crypto::{derive_pubkeys, hash160};
use keysweep::range::KeyRange;
use keysweep::types::{Hash160, PrivateKey};
use keysweep::uint256::UInt256;
use keysweep::Search;

fn key_bytes(n: u64) -> PrivateKey {
    let mut bytes = [0u8; 32];
    bytes[24..32].copy_from_slice(&n.to_be_bytes());
    PrivateKey::from_bytes(bytes)
}

fn target_for(n: u64) -> Hash160 {
    let (_, compressed) = derive_pubkeys(&key_bytes(n)).unwrap();
    hash160(compressed.as_bytes())
}

fn base_params(dir: &std::path::Path) -> SearchParams {
    SearchParams {
        range: KeyRange::for_bits(8).unwrap(),
        num_threads: 1,
        mode: SweepMode::Sequential,
        key_type: KeyType::Compressed,
        found_path: dir.join("FOUND.txt"),
        checkpoint_path: dir.join("sweep.ckpt"),
        ..Default::default()
    }
}

#[test]
fn bit8_range_finds_known_key() {
    // Private key 0xAB lives in the 8-bit range [128, 255]. A sequential
    // single-thread sweep must find it within the first 44 candidates.
    let dir = tempfile::tempdir().unwrap();
    let params = base_params(dir.path());

    let mut search = Search::new(params).unwrap();
    search.add_target(target_for(0xAB));
    let results = search.run().unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].private_key, key_bytes(0xAB));
    assert!(results[0].found);
    // The run scans the whole range; the hit itself needed only 44 keys.
    assert!(search.progress().keys_checked >= 0xAB - 128 + 1);
}

#[test]
fn split_widths_for_bits16_by_7() {
    let parts = KeyRange::for_bits(16).unwrap().split(7);
    let widths: Vec<u64> = parts.iter().map(|p| p.size().to_u128_lossy() as u64).collect();
    assert_eq!(widths, vec![4682, 4682, 4682, 4681, 4681, 4681, 4681]);
    assert_eq!(widths.iter().sum::<u64>(), 32768);
}

#[test]
fn every_sweep_mode_covers_the_range() {
    for mode in [
        SweepMode::Sequential,
        SweepMode::Backward,
        SweepMode::Both,
        SweepMode::Random,
        SweepMode::Dance,
    ] {
        let dir = tempfile::tempdir().unwrap();
        let mut params = base_params(dir.path());
        params.mode = mode;
        params.num_threads = 2;

        let mut search = Search::new(params).unwrap();
        search.add_target(target_for(0xE7));
        let results = search.run().unwrap();
        assert_eq!(results.len(), 1, "{mode:?} missed the target");
    }
}

#[test]
fn multiple_targets_all_reported() {
    let dir = tempfile::tempdir().unwrap();
    let params = base_params(dir.path());

    let mut search = Search::new(params).unwrap();
    let wanted = [0x83u64, 0xA0, 0xC7, 0xFF];
    for n in wanted {
        search.add_target(target_for(n));
    }
    let results = search.run().unwrap();
    assert_eq!(results.len(), wanted.len());

    let mut found: Vec<u64> = results
        .iter()
        .map(|r| u64::from_be_bytes(r.private_key.as_bytes()[24..32].try_into().unwrap()))
        .collect();
    found.sort_unstable();
    assert_eq!(found, wanted);
}

#[test]
fn found_sink_is_append_only_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let params = base_params(dir.path());
    let sink = params.found_path.clone();

    for n in [0x90u64, 0x91] {
        let mut search = Search::new(params.clone()).unwrap();
        search.add_target(target_for(n));
        search.run().unwrap();
    }

    let content = std::fs::read_to_string(&sink).unwrap();
    assert_eq!(content.lines().count(), 2, "both runs must append: {content}");
}

#[test]
fn progress_callback_sees_monotone_counts() {
    let dir = tempfile::tempdir().unwrap();
    let mut params = base_params(dir.path());
    params.range = KeyRange::new(UInt256::from_u64(256), UInt256::from_u64(1279));
    params.num_threads = 2;

    let peak = Arc::new(AtomicUsize::new(0));
    let mut search = Search::new(params).unwrap();
    search.add_target(target_for(700));
    let p = Arc::clone(&peak);
    search.on_progress(Arc::new(move |progress| {
        let prev = p.swap(progress.keys_checked as usize, Ordering::SeqCst);
        assert!(progress.keys_checked as usize >= prev, "keys_checked went backwards");
    }));
    search.run().unwrap();
    assert!(peak.load(Ordering::SeqCst) <= 1024);
}

#[test]
fn no_hit_outside_range() {
    // Target's key is outside the swept range: the run must finish clean
    // with zero results.
    let dir = tempfile::tempdir().unwrap();
    let params = base_params(dir.path());

    let mut search = Search::new(params).unwrap();
    search.add_target(target_for(0x1234));
    let results = search.run().unwrap();
    assert!(results.is_empty());
    assert!(!params_found_file_exists(dir.path()));
}

fn params_found_file_exists(dir: &std::path::Path) -> bool {
    dir.join("FOUND.txt").exists()
}
