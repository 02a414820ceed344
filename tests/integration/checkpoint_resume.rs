// Checkpoint round-trips: a run interrupted halfway resumes in a fresh
// coordinator and still covers the range exactly once.

use keysweep::checkpoint::Snapshot;
use keysweep::coordinator::{CoordinatorConfig, WorkCoordinator};
use keysweep::crypto::{derive_pubkeys, hash160};
use keysweep::engine::SearchResult;
use keysweep::filter::BloomFilter;
use keysweep::range::KeyRange;
use keysweep::targets::TargetSet;
use keysweep::types::{Hash160, PrivateKey};
use keysweep::uint256::UInt256;
use std::time::Duration;

fn key_bytes(n: u64) -> PrivateKey {
    let mut bytes = [0u8; 32];
    bytes[24..32].copy_from_slice(&n.to_be_bytes());
    PrivateKey::from_bytes(bytes)
}

fn target_for(n: u64) -> Hash160 {
    let (_, compressed) = derive_pubkeys(&key_bytes(n)).unwrap();
    hash160(compressed.as_bytes())
}

/// Simulated worker: enumerate the unit and return a hit if the filter and
/// the exact set both agree, the same path a real engine takes.
fn scan_unit(
    unit: &KeyRange,
    filter: &BloomFilter,
    targets: &TargetSet,
) -> Option<SearchResult> {
    let mut key = unit.start;
    loop {
        let priv_key = PrivateKey::from_bytes(key.to_be_bytes());
        if let Ok((_, compressed)) = derive_pubkeys(&priv_key) {
            let hash = hash160(compressed.as_bytes());
            if filter.query(hash.as_bytes()) && targets.contains(&hash) {
                return Some(SearchResult::new(priv_key, hash));
            }
        }
        if key == unit.end {
            return None;
        }
        key.incr();
    }
}

fn coordinator(unit_width: u64) -> WorkCoordinator {
    WorkCoordinator::new(CoordinatorConfig {
        unit_width,
        work_timeout: Duration::from_secs(300),
        heartbeat_timeout: Duration::from_secs(60),
    })
}

#[test]
fn interrupted_run_resumes_and_covers_exactly_once() {
    // 2048 keys in 8 units; the only target sits in the second half.
    let range = KeyRange::new(UInt256::from_u64(128), UInt256::from_u64(2175));
    let target_key = 1800u64;

    let mut targets = TargetSet::new();
    targets.insert(target_for(target_key));
    let filter = targets.build_filter(14, 10);
    let digest = filter.digest();

    let dir = tempfile::tempdir().unwrap();
    let ckpt_path = dir.path().join("coord.ckpt");

    let mut scanned: Vec<KeyRange> = Vec::new();
    let mut hits: Vec<SearchResult> = Vec::new();

    // First process: scan 4 of 8 units, snapshot with one unit in flight,
    // then "crash".
    {
        let coord = coordinator(256);
        coord.initialize(range).unwrap();
        for _ in 0..4 {
            let unit = coord.get_next_work("proc-1").unwrap();
            let hit = scan_unit(&unit.range, &filter, &targets);
            scanned.push(unit.range);
            if let Some(h) = &hit {
                hits.push(h.clone());
            }
            coord.report_completion("proc-1", unit.id, hit);
        }
        // One more unit assigned but never finished.
        let _in_flight = coord.get_next_work("proc-1").unwrap();

        let snapshot = coord.snapshot(digest).unwrap();
        snapshot.save(&ckpt_path).unwrap();
    }

    // Second process: load, verify the filter still matches, resume.
    {
        let snapshot = Snapshot::load(&ckpt_path).unwrap();
        snapshot.verify_filter(&digest).unwrap();

        let coord = coordinator(256);
        coord.restore(&snapshot).unwrap();

        while let Some(unit) = coord.get_next_work("proc-2") {
            // Resume must never hand out an already-completed slice.
            for done in &scanned {
                assert!(
                    unit.range.end < done.start || unit.range.start > done.end,
                    "unit {} overlaps already-scanned {}",
                    unit.range,
                    done
                );
            }
            let hit = scan_unit(&unit.range, &filter, &targets);
            scanned.push(unit.range);
            if let Some(h) = &hit {
                hits.push(h.clone());
            }
            coord.report_completion("proc-2", unit.id, hit);
        }
        assert!(coord.is_exhausted());
    }

    // Union of both processes' units covers the range exactly, no overlap.
    scanned.sort_by(|a, b| a.start.cmp(&b.start));
    assert_eq!(scanned.first().unwrap().start, range.start);
    assert_eq!(scanned.last().unwrap().end, range.end);
    for pair in scanned.windows(2) {
        assert_eq!(pair[1].start, pair[0].end.wrapping_add(&UInt256::ONE));
    }

    // And the target was found exactly once, by the second process.
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].private_key, key_bytes(target_key));
}

#[test]
fn resume_rejects_changed_target_set() {
    let range = KeyRange::new(UInt256::from_u64(128), UInt256::from_u64(1151));

    let mut targets = TargetSet::new();
    targets.insert(target_for(500));
    let filter = targets.build_filter(14, 10);

    let dir = tempfile::tempdir().unwrap();
    let ckpt_path = dir.path().join("coord.ckpt");

    let coord = coordinator(256);
    coord.initialize(range).unwrap();
    coord.snapshot(filter.digest()).unwrap().save(&ckpt_path).unwrap();

    // The operator edits the target file; the rebuilt filter digests
    // differently and the stale checkpoint must be refused.
    targets.insert(target_for(501));
    let changed = targets.build_filter(14, 10);

    let snapshot = Snapshot::load(&ckpt_path).unwrap();
    assert!(snapshot.verify_filter(&changed.digest()).is_err());
    assert!(snapshot.verify_filter(&filter.digest()).is_ok());
}

#[test]
fn snapshot_preserves_results() {
    let range = KeyRange::new(UInt256::from_u64(128), UInt256::from_u64(1151));
    let mut targets = TargetSet::new();
    targets.insert(target_for(300));
    let filter = targets.build_filter(14, 10);

    let dir = tempfile::tempdir().unwrap();
    let ckpt_path = dir.path().join("coord.ckpt");

    let coord = coordinator(256);
    coord.initialize(range).unwrap();
    let unit = coord.get_next_work("w").unwrap();
    let hit = scan_unit(&unit.range, &filter, &targets);
    assert!(hit.is_some(), "target 300 lies in the first unit");
    coord.report_completion("w", unit.id, hit);

    coord.snapshot(filter.digest()).unwrap().save(&ckpt_path).unwrap();

    let snapshot = Snapshot::load(&ckpt_path).unwrap();
    assert_eq!(snapshot.results.len(), 1);
    assert_eq!(snapshot.results[0].private_key, key_bytes(300));
    assert!(snapshot.results[0].found);
}
