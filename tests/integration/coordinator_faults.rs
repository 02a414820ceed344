// Fault handling in the distributed coordinator: silent workers, timeouts,
// reassignment, late reports.

use std::sync::Arc;
use std::time::Duration;

use keysweep::coordinator::{CoordinatorConfig, WorkCoordinator};
use keysweep::range::KeyRange;
use keysweep::uint256::UInt256;

fn coordinator(unit_width: u64, work_timeout: Duration) -> WorkCoordinator {
    WorkCoordinator::new(CoordinatorConfig {
        unit_width,
        work_timeout,
        heartbeat_timeout: work_timeout * 2,
    })
}

fn range_1k() -> KeyRange {
    KeyRange::new(UInt256::from_u64(4096), UInt256::from_u64(5119))
}

#[test]
fn silent_worker_unit_reaches_other_worker() {
    // Worker A claims a unit and goes silent. After the work timeout the
    // sweeper reclaims it and B receives exactly that unit.
    let coord = coordinator(512, Duration::from_millis(30));
    coord.initialize(range_1k()).unwrap();
    coord.register_worker("a", "host-a", "cpu");
    coord.register_worker("b", "host-b", "cpu");

    let claimed = coord.get_next_work("a").unwrap();
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(coord.check_timeouts(), 1);

    let reassigned = coord.get_next_work("b").unwrap();
    assert_eq!(reassigned.id, claimed.id);
    assert_eq!(reassigned.range, claimed.range);

    // A's late completion is ignored; B's counts.
    coord.report_completion("a", claimed.id, None);
    assert_eq!(coord.completed_count(), 0);
    coord.report_completion("b", claimed.id, None);
    assert_eq!(coord.completed_count(), 1);
}

#[test]
fn full_run_covers_range_despite_timeouts() {
    let coord = coordinator(100, Duration::from_millis(20));
    let range = range_1k();
    coord.initialize(range).unwrap();

    let mut covered: Vec<KeyRange> = Vec::new();
    let mut flaky_drop = true;
    loop {
        let Some(unit) = coord.get_next_work("w") else {
            if coord.in_progress_count() == 0 {
                break;
            }
            // Outstanding units belong to the "flaky" claims below; let them
            // expire and pick them up again.
            std::thread::sleep(Duration::from_millis(40));
            coord.check_timeouts();
            continue;
        };
        // Every other unit is abandoned once before being processed.
        if flaky_drop {
            flaky_drop = false;
            continue; // claimed but never reported
        }
        flaky_drop = true;
        covered.push(unit.range);
        coord.report_completion("w", unit.id, None);
    }

    assert!(coord.is_exhausted());
    // Exact cover: sort by start, no gaps, ends match the range.
    covered.sort_by(|a, b| a.start.cmp(&b.start));
    assert_eq!(covered.first().unwrap().start, range.start);
    assert_eq!(covered.last().unwrap().end, range.end);
    for pair in covered.windows(2) {
        assert_eq!(pair[1].start, pair[0].end.wrapping_add(&UInt256::ONE));
    }
    assert!((coord.progress() - 1.0).abs() < 1e-9);
}

#[test]
fn heartbeats_keep_worker_alive_and_track_throughput() {
    let coord = coordinator(512, Duration::from_millis(50));
    coord.register_worker("w", "host", "cpu 16c");

    for _ in 0..3 {
        std::thread::sleep(Duration::from_millis(20));
        coord.heartbeat("w", 2_000_000);
        coord.check_timeouts();
    }
    let workers = coord.workers();
    assert!(workers[0].connected, "regular heartbeats must keep the worker connected");
    assert_eq!(coord.total_kps(), 2_000_000);

    std::thread::sleep(Duration::from_millis(150));
    coord.check_timeouts();
    assert!(!coord.workers()[0].connected);
}

#[test]
fn sweeper_thread_runs_unattended() {
    let coord = Arc::new(coordinator(512, Duration::from_millis(30)));
    coord.initialize(range_1k()).unwrap();
    WorkCoordinator::start(&coord);

    let _claimed = coord.get_next_work("ghost").unwrap();
    std::thread::sleep(Duration::from_millis(250));

    assert_eq!(coord.in_progress_count(), 0);
    assert_eq!(coord.pending_count(), 1);
    coord.stop();
}

#[test]
fn unregister_mid_flight_requeues_to_head() {
    let coord = coordinator(256, Duration::from_secs(60));
    coord.initialize(range_1k()).unwrap();
    coord.register_worker("doomed", "host", "cpu");

    let first = coord.get_next_work("doomed").unwrap();
    coord.unregister_worker("doomed");

    // The requeued unit is served before any fresh frontier unit.
    let next = coord.get_next_work("healthy").unwrap();
    assert_eq!(next.id, first.id);
}
