// Priority and ordering guarantees of the task runtime.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keysweep::pool::{parallel_reduce, TaskPriority, ThreadPool};

#[test]
fn high_priority_preempts_queued_lows() {
    // Single worker: submit 5 Lows, then 1 High while the first Low is still
    // executing. The High runs second, before the remaining four Lows.
    let pool = ThreadPool::new(1);
    let order = Arc::new(Mutex::new(Vec::new()));
    let first_started = Arc::new(AtomicBool::new(false));

    {
        let order = Arc::clone(&order);
        let started = Arc::clone(&first_started);
        pool.submit_with_priority(TaskPriority::Low, move || {
            started.store(true, Ordering::Release);
            std::thread::sleep(Duration::from_millis(100));
            order.lock().unwrap().push("low-0".to_string());
        })
        .unwrap();
    }
    // Make sure low-0 is in flight before the rest enqueue.
    while !first_started.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(1));
    }

    for i in 1..5 {
        let order = Arc::clone(&order);
        pool.submit_with_priority(TaskPriority::Low, move || {
            order.lock().unwrap().push(format!("low-{i}"));
        })
        .unwrap();
    }
    {
        let order = Arc::clone(&order);
        pool.submit_with_priority(TaskPriority::High, move || {
            order.lock().unwrap().push("high".to_string());
        })
        .unwrap();
    }

    pool.wait();
    let order = order.lock().unwrap();
    assert_eq!(
        *order,
        vec!["low-0", "high", "low-1", "low-2", "low-3", "low-4"],
        "High must run right after the in-flight Low"
    );
}

#[test]
fn critical_beats_high_beats_normal() {
    let pool = ThreadPool::new(1);
    let order = Arc::new(Mutex::new(Vec::new()));
    let gate = Arc::new(AtomicBool::new(false));

    {
        let gate = Arc::clone(&gate);
        pool.submit(move || {
            while !gate.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(1));
            }
        })
        .unwrap();
    }

    for (priority, label) in [
        (TaskPriority::Normal, "normal"),
        (TaskPriority::High, "high"),
        (TaskPriority::Critical, "critical"),
        (TaskPriority::Low, "low"),
    ] {
        let order = Arc::clone(&order);
        pool.submit_with_priority(priority, move || {
            order.lock().unwrap().push(label);
        })
        .unwrap();
    }

    gate.store(true, Ordering::Release);
    pool.wait();
    assert_eq!(*order.lock().unwrap(), vec!["critical", "high", "normal", "low"]);
}

#[test]
fn stats_invariant_holds_after_burst() {
    let pool = ThreadPool::new(4);
    for _ in 0..200 {
        pool.submit(|| std::thread::sleep(Duration::from_micros(50))).unwrap();
    }
    pool.wait();

    let stats = pool.stats();
    let submitted = stats.tasks_submitted.load(Ordering::Relaxed);
    let completed = stats.tasks_completed.load(Ordering::Relaxed);
    let pending = stats.tasks_pending.load(Ordering::Relaxed);
    assert_eq!(submitted, 200);
    assert_eq!(completed + pending + pool.active(), 200);
    assert!(stats.avg_exec_ms() >= 0.0);
}

#[test]
fn pause_holds_work_until_resume() {
    let pool = ThreadPool::new(2);
    let counter = Arc::new(AtomicU64::new(0));

    pool.pause();
    for _ in 0..20 {
        let c = Arc::clone(&counter);
        pool.submit(move || {
            c.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
    }
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(counter.load(Ordering::Relaxed), 0);

    pool.resume();
    assert!(pool.wait_for(Duration::from_secs(5)));
    assert_eq!(counter.load(Ordering::Relaxed), 20);
}

#[test]
fn parallel_reduce_matches_serial() {
    let pool = ThreadPool::new(4);
    let parallel = parallel_reduce(&pool, 0, 10_000, 0u64, |i| i * i, |a, b| a + b).unwrap();
    let serial: u64 = (0..10_000u64).map(|i| i * i).sum();
    assert_eq!(parallel, serial);
}
