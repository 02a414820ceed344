//! Priority thread pool driving candidate batches.
//!
//! W OS threads pull from one mutex-guarded priority queue. Within a priority
//! class tasks run in submission order; across classes higher priority always
//! wins. Panics inside a task are caught and counted, the worker survives.
//! Pause/resume is a flag observed between tasks; `shutdown` drops whatever
//! is still queued.

use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};

use crate::error::{Error, Result};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub enum TaskPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

/// Cooperative cancellation flag handed to long-running tasks.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Relaxed counters; `pending + active + completed == submitted` holds when
/// sampled under the queue lock.
#[derive(Default)]
pub struct PoolStats {
    pub tasks_submitted: AtomicU64,
    pub tasks_completed: AtomicU64,
    pub tasks_pending: AtomicU64,
    pub tasks_panicked: AtomicU64,
    pub total_wait_ns: AtomicU64,
    pub total_exec_ns: AtomicU64,
}

impl PoolStats {
    pub fn avg_wait_ms(&self) -> f64 {
        let completed = self.tasks_completed.load(Ordering::Relaxed);
        if completed == 0 {
            return 0.0;
        }
        self.total_wait_ns.load(Ordering::Relaxed) as f64 / completed as f64 / 1e6
    }

    pub fn avg_exec_ms(&self) -> f64 {
        let completed = self.tasks_completed.load(Ordering::Relaxed);
        if completed == 0 {
            return 0.0;
        }
        self.total_exec_ns.load(Ordering::Relaxed) as f64 / completed as f64 / 1e6
    }
}

struct QueuedTask {
    priority: TaskPriority,
    seq: u64,
    enqueued_at: Instant,
    func: Box<dyn FnOnce() + Send + 'static>,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: higher priority first, then lower sequence (FIFO).
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct PoolState {
    queue: BinaryHeap<QueuedTask>,
    stopping: bool,
    active: u64,
    next_seq: u64,
}

struct PoolShared {
    state: Mutex<PoolState>,
    work_cv: Condvar,
    done_cv: Condvar,
    paused: AtomicBool,
    stats: PoolStats,
}

/// Handle to an individual submission; await its value with or without a
/// timeout.
pub struct TaskHandle<T> {
    rx: Receiver<std::result::Result<T, String>>,
}

impl<T> TaskHandle<T> {
    /// Block until the task finishes. A panic inside the task surfaces here
    /// as `Error::Runtime`.
    pub fn wait(self) -> Result<T> {
        match self.rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(panic_msg)) => Err(Error::Runtime(format!("task panicked: {panic_msg}"))),
            Err(_) => Err(Error::Runtime("task dropped before completion".into())),
        }
    }

    /// None on timeout; the task keeps running and the handle stays valid.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(value)) => Some(Ok(value)),
            Ok(Err(panic_msg)) => Some(Err(Error::Runtime(format!("task panicked: {panic_msg}")))),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                Some(Err(Error::Runtime("task dropped before completion".into())))
            }
        }
    }
}

pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// `threads == 0` uses the hardware parallelism.
    pub fn new(threads: usize) -> Self {
        let threads = if threads == 0 {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
        } else {
            threads
        };

        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: BinaryHeap::new(),
                stopping: false,
                active: 0,
                next_seq: 0,
            }),
            work_cv: Condvar::new(),
            done_cv: Condvar::new(),
            paused: AtomicBool::new(false),
            stats: PoolStats::default(),
        });

        let workers = (0..threads)
            .map(|id| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("sweep-worker-{id}"))
                    .spawn(move || worker_loop(shared))
                    .expect("spawning worker thread")
            })
            .collect();

        Self { shared, workers }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn submit<T, F>(&self, func: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit_with_priority(TaskPriority::Normal, func)
    }

    pub fn submit_with_priority<T, F>(&self, priority: TaskPriority, func: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let wrapped = move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(func));
            let _ = tx.send(outcome.map_err(panic_message));
        };
        self.enqueue(priority, Box::new(wrapped), true)?;
        Ok(TaskHandle { rx })
    }

    /// Enqueue all tasks under one lock and wake every worker once.
    pub fn submit_batch<F>(&self, tasks: Vec<F>, priority: TaskPriority) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let count = tasks.len() as u64;
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.stopping {
                return Err(Error::Runtime("task rejected: pool is shutting down".into()));
            }
            let now = Instant::now();
            for func in tasks {
                let seq = state.next_seq;
                state.next_seq += 1;
                let shared = Arc::clone(&self.shared);
                state.queue.push(QueuedTask {
                    priority,
                    seq,
                    enqueued_at: now,
                    func: Box::new(move || {
                        if panic::catch_unwind(AssertUnwindSafe(func)).is_err() {
                            shared.stats.tasks_panicked.fetch_add(1, Ordering::Relaxed);
                        }
                    }),
                });
            }
            self.shared.stats.tasks_submitted.fetch_add(count, Ordering::Relaxed);
            self.shared.stats.tasks_pending.fetch_add(count, Ordering::Relaxed);
        }
        self.shared.work_cv.notify_all();
        Ok(())
    }

    fn enqueue(
        &self,
        priority: TaskPriority,
        func: Box<dyn FnOnce() + Send + 'static>,
        notify_one: bool,
    ) -> Result<()> {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.stopping {
                return Err(Error::Runtime("task rejected: pool is shutting down".into()));
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push(QueuedTask { priority, seq, enqueued_at: Instant::now(), func });
            self.shared.stats.tasks_submitted.fetch_add(1, Ordering::Relaxed);
            self.shared.stats.tasks_pending.fetch_add(1, Ordering::Relaxed);
        }
        if notify_one {
            self.shared.work_cv.notify_one();
        }
        Ok(())
    }

    /// Block until the queue is drained and no task is executing.
    pub fn wait(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while !(state.queue.is_empty() && state.active == 0) {
            state = self.shared.done_cv.wait(state).unwrap();
        }
    }

    /// False on timeout; pool state is untouched either way.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock().unwrap();
        while !(state.queue.is_empty() && state.active == 0) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, result) = self.shared.done_cv.wait_timeout(state, deadline - now).unwrap();
            state = next;
            if result.timed_out() && !(state.queue.is_empty() && state.active == 0) {
                return false;
            }
        }
        true
    }

    /// Workers finish their current task and then idle. Already-running tasks
    /// are not interrupted.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
        self.shared.work_cv.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    pub fn pending(&self) -> usize {
        self.shared.state.lock().unwrap().queue.len()
    }

    pub fn active(&self) -> u64 {
        self.shared.state.lock().unwrap().active
    }

    pub fn stats(&self) -> &PoolStats {
        &self.shared.stats
    }

    /// Stop accepting work, wake everyone, join the workers. Tasks still in
    /// the queue are dropped.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.stopping {
                return;
            }
            state.stopping = true;
            let dropped = state.queue.len() as u64;
            if dropped > 0 {
                eprintln!("[Pool] Shutdown dropping {dropped} queued tasks");
                self.shared.stats.tasks_pending.fetch_sub(dropped, Ordering::Relaxed);
            }
            state.queue.clear();
        }
        // Resume so paused workers can observe the stop flag.
        self.shared.paused.store(false, Ordering::Release);
        self.shared.work_cv.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        self.shared.done_cv.notify_all();
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let task = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if state.stopping {
                    return;
                }
                if !state.queue.is_empty() && !shared.paused.load(Ordering::Acquire) {
                    break;
                }
                state = shared.work_cv.wait(state).unwrap();
            }
            let task = state.queue.pop().unwrap();
            state.active += 1;
            shared.stats.tasks_pending.fetch_sub(1, Ordering::Relaxed);
            task
        };

        let wait_ns = task.enqueued_at.elapsed().as_nanos() as u64;
        shared.stats.total_wait_ns.fetch_add(wait_ns, Ordering::Relaxed);

        let exec_start = Instant::now();
        // Task closures handle their own panics (submit wraps with
        // catch_unwind); a second net here keeps a raw batch closure from
        // taking the worker down.
        let outcome = panic::catch_unwind(AssertUnwindSafe(task.func));
        if outcome.is_err() {
            shared.stats.tasks_panicked.fetch_add(1, Ordering::Relaxed);
            eprintln!("[Pool] Task panicked, worker continues");
        }
        let exec_ns = exec_start.elapsed().as_nanos() as u64;
        shared.stats.total_exec_ns.fetch_add(exec_ns, Ordering::Relaxed);
        shared.stats.tasks_completed.fetch_add(1, Ordering::Relaxed);

        let mut state = shared.state.lock().unwrap();
        state.active -= 1;
        let all_done = state.queue.is_empty() && state.active == 0;
        drop(state);
        if all_done {
            shared.done_cv.notify_all();
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Partition `[lo, hi)` into chunks, run `body` over every index, await all.
/// The first panicking chunk surfaces as `Error::Runtime`. `chunk == 0`
/// selects `max(1, (hi - lo) / (4 * workers))`.
pub fn parallel_for<F>(pool: &ThreadPool, lo: u64, hi: u64, chunk: u64, body: F) -> Result<()>
where
    F: Fn(u64) + Send + Sync + 'static,
{
    if lo >= hi {
        return Ok(());
    }
    let total = hi - lo;
    let chunk = if chunk == 0 {
        (total / (4 * pool.size() as u64)).max(1)
    } else {
        chunk
    };

    let body = Arc::new(body);
    let mut handles = Vec::new();
    let mut start = lo;
    while start < hi {
        let end = (start + chunk).min(hi);
        let body = Arc::clone(&body);
        handles.push(pool.submit(move || {
            for i in start..end {
                body(i);
            }
        })?);
        start = end;
    }

    let mut first_err = None;
    for handle in handles {
        if let Err(e) = handle.wait() {
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        None => Ok(()),
        Some(e) => Err(e),
    }
}

/// Map every index of `[lo, hi)` and fold chunk results with an associative
/// `combine`, tree-style: chunks reduce locally, then fold in chunk order.
pub fn parallel_reduce<T, M, C>(
    pool: &ThreadPool,
    lo: u64,
    hi: u64,
    identity: T,
    map: M,
    combine: C,
) -> Result<T>
where
    T: Send + Clone + 'static,
    M: Fn(u64) -> T + Send + Sync + 'static,
    C: Fn(T, T) -> T + Send + Sync + 'static,
{
    if lo >= hi {
        return Ok(identity);
    }
    let total = hi - lo;
    let chunk = (total / (4 * pool.size() as u64)).max(1);

    let map = Arc::new(map);
    let combine = Arc::new(combine);
    let mut handles = Vec::new();
    let mut start = lo;
    while start < hi {
        let end = (start + chunk).min(hi);
        let map = Arc::clone(&map);
        let combine = Arc::clone(&combine);
        let seed = identity.clone();
        handles.push(pool.submit(move || {
            let mut acc = seed;
            for i in start..end {
                acc = combine(acc, map(i));
            }
            acc
        })?);
        start = end;
    }

    let mut acc = identity;
    for handle in handles {
        acc = combine(acc, handle.wait()?);
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_basic_submit() {
        let pool = ThreadPool::new(2);
        let handle = pool.submit(|| 2 + 2).unwrap();
        assert_eq!(handle.wait().unwrap(), 4);
    }

    #[test]
    fn test_auto_thread_count() {
        let pool = ThreadPool::new(0);
        assert!(pool.size() >= 1);
    }

    #[test]
    fn test_wait_drains_queue() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let c = Arc::clone(&counter);
            pool.submit(move || {
                c.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }
        pool.wait();
        assert_eq!(counter.load(Ordering::Relaxed), 100);
        assert_eq!(pool.pending(), 0);
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn test_wait_for_timeout() {
        let pool = ThreadPool::new(1);
        pool.submit(|| std::thread::sleep(Duration::from_millis(300))).unwrap();
        assert!(!pool.wait_for(Duration::from_millis(20)));
        assert!(pool.wait_for(Duration::from_secs(5)));
    }

    #[test]
    fn test_priority_order_single_worker() {
        // One worker, blocked by a gate task, so the queue builds up and
        // priorities decide the drain order.
        let pool = ThreadPool::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(AtomicBool::new(false));

        {
            let gate = Arc::clone(&gate);
            pool.submit(move || while !gate.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(1));
            })
            .unwrap();
        }

        for i in 0..5 {
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

        gate.store(true, Ordering::Release);
        pool.wait();

        let order = order.lock().unwrap();
        assert_eq!(order[0], "high", "high priority must run before queued lows");
        // Lows keep submission order
        assert_eq!(&order[1..], &["low-0", "low-1", "low-2", "low-3", "low-4"]);
    }

    #[test]
    fn test_fifo_within_class() {
        let pool = ThreadPool::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..20 {
            let order = Arc::clone(&order);
            pool.submit(move || order.lock().unwrap().push(i)).unwrap();
        }
        pool.wait();
        assert_eq!(*order.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_pause_resume() {
        let pool = ThreadPool::new(2);
        pool.pause();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let c = Arc::clone(&counter);
            pool.submit(move || {
                c.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::Relaxed), 0, "paused pool ran tasks");
        pool.resume();
        pool.wait();
        assert_eq!(counter.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn test_shutdown_rejects_submissions() {
        let mut pool = ThreadPool::new(2);
        pool.shutdown();
        assert!(matches!(pool.submit(|| ()), Err(Error::Runtime(_))));
    }

    #[test]
    fn test_panic_does_not_kill_worker() {
        let pool = ThreadPool::new(1);
        let handle = pool.submit(|| panic!("boom")).unwrap();
        let err = handle.wait();
        assert!(matches!(err, Err(Error::Runtime(_))));

        // The single worker must still be alive for the next task.
        let handle = pool.submit(|| 7).unwrap();
        assert_eq!(handle.wait().unwrap(), 7);
        assert_eq!(pool.stats().tasks_panicked.load(Ordering::Relaxed), 0); // handle path reports via wait()
    }

    #[test]
    fn test_batch_submit() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let c = Arc::clone(&counter);
                move || {
                    c.fetch_add(1, Ordering::Relaxed);
                }
            })
            .collect();
        pool.submit_batch(tasks, TaskPriority::Normal).unwrap();
        pool.wait();
        assert_eq!(counter.load(Ordering::Relaxed), 50);
    }

    #[test]
    fn test_stats_accounting() {
        let pool = ThreadPool::new(2);
        for _ in 0..25 {
            pool.submit(|| ()).unwrap();
        }
        pool.wait();
        let stats = pool.stats();
        assert_eq!(stats.tasks_submitted.load(Ordering::Relaxed), 25);
        assert_eq!(stats.tasks_completed.load(Ordering::Relaxed), 25);
        assert_eq!(stats.tasks_pending.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_cancel_token() {
        let pool = ThreadPool::new(1);
        let token = CancelToken::new();
        let task_token = token.clone();
        let iterations = Arc::new(AtomicUsize::new(0));
        let iters = Arc::clone(&iterations);
        let handle = pool
            .submit(move || {
                while !task_token.is_cancelled() {
                    iters.fetch_add(1, Ordering::Relaxed);
                    std::thread::sleep(Duration::from_millis(1));
                }
            })
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        token.cancel();
        handle.wait().unwrap();
        assert!(iterations.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn test_parallel_for() {
        let pool = ThreadPool::new(4);
        let sum = Arc::new(AtomicU64::new(0));
        let s = Arc::clone(&sum);
        parallel_for(&pool, 0, 1000, 0, move |i| {
            s.fetch_add(i, Ordering::Relaxed);
        })
        .unwrap();
        assert_eq!(sum.load(Ordering::Relaxed), 999 * 1000 / 2);
    }

    #[test]
    fn test_parallel_for_propagates_panic() {
        let pool = ThreadPool::new(2);
        let result = parallel_for(&pool, 0, 100, 10, |i| {
            if i == 57 {
                panic!("chunk failure");
            }
        });
        assert!(matches!(result, Err(Error::Runtime(_))));
    }

    #[test]
    fn test_parallel_reduce() {
        let pool = ThreadPool::new(4);
        let total = parallel_reduce(&pool, 1, 101, 0u64, |i| i, |a, b| a + b).unwrap();
        assert_eq!(total, 5050);
    }

    #[test]
    fn test_parallel_for_empty_range() {
        let pool = ThreadPool::new(2);
        parallel_for(&pool, 10, 10, 0, |_| panic!("must not run")).unwrap();
        let v = parallel_reduce(&pool, 5, 5, 42u64, |i| i, |a, b| a + b).unwrap();
        assert_eq!(v, 42);
    }
}
