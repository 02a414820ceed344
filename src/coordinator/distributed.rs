//! Distributed work coordinator: carves the range into work units, hands them
//! to registered workers, and reclaims units whose worker went silent.
//!
//! Units are generated lazily from a frontier cursor, so the pending queue
//! only ever holds reassigned units and memory stays bounded no matter how
//! wide the range is. Reassigned units go to the head of the queue (LIFO) so
//! a healthy worker picks up the freshest orphan first.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::checkpoint::{rle_encode, Snapshot, SNAPSHOT_VERSION};
use crate::engine::{ResultCallback, SearchResult};
use crate::error::{Error, Result};
use crate::range::KeyRange;
use crate::types::Hash256;
use crate::uint256::UInt256;

#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Keys per work unit.
    pub unit_width: u64,
    /// Wall-clock limit before an assigned unit is reclaimed.
    pub work_timeout: Duration,
    /// Silence limit before a worker is considered gone.
    pub heartbeat_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            unit_width: 1 << 40,
            work_timeout: Duration::from_secs(300),
            heartbeat_timeout: Duration::from_secs(60),
        }
    }
}

/// One contiguous slice of the range, exclusively owned by its assignee from
/// hand-out until completion or timeout.
#[derive(Clone, Debug)]
pub struct WorkUnit {
    pub id: u64,
    pub range: KeyRange,
    pub assigned_worker: Option<String>,
    pub assigned_at: Option<Instant>,
    pub completed_at: Option<Instant>,
    pub completed: bool,
    pub result: Option<SearchResult>,
}

impl WorkUnit {
    fn new(id: u64, range: KeyRange) -> Self {
        Self {
            id,
            range,
            assigned_worker: None,
            assigned_at: None,
            completed_at: None,
            completed: false,
            result: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WorkerStatus {
    pub id: String,
    pub hostname: String,
    pub device_info: String,
    pub connected: bool,
    pub busy: bool,
    pub units_completed: u64,
    pub keys_per_second: u64,
    pub last_heartbeat: Instant,
}

impl WorkerStatus {
    fn new(id: String, hostname: String, device_info: String) -> Self {
        Self {
            id,
            hostname,
            device_info,
            connected: true,
            busy: false,
            units_completed: 0,
            keys_per_second: 0,
            last_heartbeat: Instant::now(),
        }
    }
}

struct CoordState {
    range: Option<KeyRange>,
    unit_width: u64,
    /// Start of the next unit to generate; meaningless once exhausted.
    frontier: UInt256,
    exhausted: bool,
    next_id: u64,
    /// Reassigned units only; head is the most recently reclaimed.
    pending: VecDeque<WorkUnit>,
    in_progress: HashMap<u64, WorkUnit>,
    completed_ids: Vec<u64>,
    completed_width: f64,
    results: Vec<SearchResult>,
}

pub struct WorkCoordinator {
    config: CoordinatorConfig,
    state: Mutex<CoordState>,
    workers: DashMap<String, WorkerStatus>,
    running: Arc<AtomicBool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    result_cb: Mutex<Option<ResultCallback>>,
}

impl WorkCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        let unit_width = config.unit_width;
        Self {
            config,
            state: Mutex::new(CoordState {
                range: None,
                unit_width,
                frontier: UInt256::ZERO,
                exhausted: true,
                next_id: 0,
                pending: VecDeque::new(),
                in_progress: HashMap::new(),
                completed_ids: Vec::new(),
                completed_width: 0.0,
                results: Vec::new(),
            }),
            workers: DashMap::new(),
            running: Arc::new(AtomicBool::new(false)),
            sweeper: Mutex::new(None),
            result_cb: Mutex::new(None),
        }
    }

    pub fn initialize(&self, range: KeyRange) -> Result<()> {
        if range.is_empty() {
            return Err(Error::Validation("cannot coordinate an empty range".into()));
        }
        let mut state = self.state.lock().unwrap();
        state.range = Some(range);
        state.frontier = range.start;
        state.exhausted = false;
        state.next_id = 0;
        state.pending.clear();
        state.in_progress.clear();
        state.completed_ids.clear();
        state.completed_width = 0.0;
        state.results.clear();
        Ok(())
    }

    pub fn set_result_callback(&self, cb: ResultCallback) {
        *self.result_cb.lock().unwrap() = Some(cb);
    }

    pub fn register_worker(&self, id: &str, hostname: &str, device_info: &str) {
        self.workers.insert(
            id.to_string(),
            WorkerStatus::new(id.to_string(), hostname.to_string(), device_info.to_string()),
        );
        println!("[Coord] Worker registered: {id} ({hostname}, {device_info})");
    }

    /// Disconnect a worker and requeue anything it still held.
    pub fn unregister_worker(&self, id: &str) {
        {
            let mut state = self.state.lock().unwrap();
            let orphaned: Vec<u64> = state
                .in_progress
                .values()
                .filter(|u| u.assigned_worker.as_deref() == Some(id))
                .map(|u| u.id)
                .collect();
            for uid in orphaned {
                if let Some(mut unit) = state.in_progress.remove(&uid) {
                    unit.assigned_worker = None;
                    unit.assigned_at = None;
                    state.pending.push_front(unit);
                }
            }
        }
        if let Some(mut worker) = self.workers.get_mut(id) {
            worker.connected = false;
            worker.busy = false;
        }
    }

    /// Pop a reassigned unit, or carve the next one off the frontier. None
    /// when the range is exhausted and nothing is waiting.
    pub fn get_next_work(&self, worker_id: &str) -> Option<WorkUnit> {
        let unit = {
            let mut state = self.state.lock().unwrap();
            let mut unit = match state.pending.pop_front() {
                Some(unit) => unit,
                None => self.generate_unit(&mut state)?,
            };
            unit.assigned_worker = Some(worker_id.to_string());
            unit.assigned_at = Some(Instant::now());
            state.in_progress.insert(unit.id, unit.clone());
            unit
        };
        // Registry update happens outside the unit lock.
        if let Some(mut worker) = self.workers.get_mut(worker_id) {
            worker.busy = true;
        } else {
            // Unknown workers asking for work get implicitly registered.
            let mut status =
                WorkerStatus::new(worker_id.to_string(), String::new(), String::new());
            status.busy = true;
            self.workers.insert(worker_id.to_string(), status);
        }
        Some(unit)
    }

    fn generate_unit(&self, state: &mut CoordState) -> Option<WorkUnit> {
        if state.exhausted {
            return None;
        }
        let range = state.range?;
        let start = state.frontier;
        let span = UInt256::from_u64(state.unit_width - 1);
        let end = start.wrapping_add(&span).min(range.end);

        if end == range.end {
            state.exhausted = true;
        } else {
            state.frontier = end.wrapping_add(&UInt256::ONE);
        }
        let id = state.next_id;
        state.next_id += 1;
        Some(WorkUnit::new(id, KeyRange::new(start, end)))
    }

    /// Record a finished unit. Unknown ids, and reports from a worker that no
    /// longer owns the unit, are dropped silently: that's a late report for
    /// a unit that timed out and was reassigned.
    pub fn report_completion(&self, worker_id: &str, unit_id: u64, result: Option<SearchResult>) {
        let (worker_id, cb, result_for_cb) = {
            let mut state = self.state.lock().unwrap();
            let owned = state
                .in_progress
                .get(&unit_id)
                .is_some_and(|u| u.assigned_worker.as_deref() == Some(worker_id));
            if !owned {
                return;
            }
            let mut unit = state.in_progress.remove(&unit_id).unwrap();
            unit.completed = true;
            unit.completed_at = Some(Instant::now());
            unit.result = result.clone();
            let worker_id = unit.assigned_worker.clone();
            state.completed_ids.push(unit_id);
            state.completed_width += unit.range.size().to_f64_lossy();
            if let Some(r) = &result {
                state.results.push(r.clone());
            }
            (worker_id, self.result_cb.lock().unwrap().clone(), result)
        };

        if let Some(worker_id) = worker_id {
            if let Some(mut worker) = self.workers.get_mut(&worker_id) {
                worker.busy = false;
                worker.units_completed += 1;
            }
        }
        // Callback fires outside every lock.
        if let (Some(cb), Some(result)) = (cb, result_for_cb) {
            cb(&result);
        }
    }

    /// Idempotent liveness ping; silently re-registers unknown workers.
    pub fn heartbeat(&self, worker_id: &str, keys_per_second: u64) {
        let mut entry = self
            .workers
            .entry(worker_id.to_string())
            .or_insert_with(|| WorkerStatus::new(worker_id.to_string(), String::new(), String::new()));
        entry.last_heartbeat = Instant::now();
        entry.keys_per_second = keys_per_second;
        entry.connected = true;
    }

    /// Reclaim every in-flight unit whose assignment outlived `work_timeout`.
    /// Returns how many units were reassigned.
    pub fn check_timeouts(&self) -> usize {
        let now = Instant::now();
        let (reclaimed, assignees) = {
            let mut state = self.state.lock().unwrap();
            let expired: Vec<u64> = state
                .in_progress
                .values()
                .filter(|u| {
                    u.assigned_at
                        .is_some_and(|at| now.duration_since(at) > self.config.work_timeout)
                })
                .map(|u| u.id)
                .collect();

            let mut assignees = Vec::new();
            let mut count = 0;
            for uid in expired {
                if let Some(mut unit) = state.in_progress.remove(&uid) {
                    if let Some(worker) = unit.assigned_worker.take() {
                        assignees.push(worker);
                    }
                    unit.assigned_at = None;
                    eprintln!("[Coord] Unit {uid} timed out, requeueing");
                    state.pending.push_front(unit);
                    count += 1;
                }
            }
            (count, assignees)
        };

        for worker_id in assignees {
            if let Some(mut worker) = self.workers.get_mut(&worker_id) {
                worker.busy = false;
            }
        }

        // Stale heartbeats flip workers to disconnected.
        for mut worker in self.workers.iter_mut() {
            if worker.connected
                && now.duration_since(worker.last_heartbeat) > self.config.heartbeat_timeout
            {
                worker.connected = false;
            }
        }
        reclaimed
    }

    /// Spawn the periodic timeout sweeper for a shared coordinator.
    pub fn start(coordinator: &Arc<WorkCoordinator>) {
        if coordinator.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let sweeper_ref = Arc::clone(coordinator);
        let interval =
            (coordinator.config.heartbeat_timeout / 4).max(Duration::from_millis(50));
        let handle = std::thread::Builder::new()
            .name("coord-sweeper".to_string())
            .spawn(move || {
                while sweeper_ref.running.load(Ordering::Acquire) {
                    std::thread::sleep(interval);
                    if !sweeper_ref.running.load(Ordering::Acquire) {
                        break;
                    }
                    sweeper_ref.check_timeouts();
                }
            })
            .expect("spawning sweeper thread");
        *coordinator.sweeper.lock().unwrap() = Some(handle);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Completed share of the total range, weighted by unit widths.
    pub fn progress(&self) -> f64 {
        let state = self.state.lock().unwrap();
        let Some(range) = state.range else {
            return 0.0;
        };
        let total = range.size().to_f64_lossy();
        if total == 0.0 {
            return 0.0;
        }
        (state.completed_width / total).min(1.0)
    }

    pub fn total_kps(&self) -> u64 {
        self.workers
            .iter()
            .filter(|w| w.connected)
            .map(|w| w.keys_per_second)
            .sum()
    }

    pub fn workers(&self) -> Vec<WorkerStatus> {
        self.workers.iter().map(|w| w.value().clone()).collect()
    }

    pub fn results(&self) -> Vec<SearchResult> {
        self.state.lock().unwrap().results.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    pub fn in_progress_count(&self) -> usize {
        self.state.lock().unwrap().in_progress.len()
    }

    pub fn completed_count(&self) -> usize {
        self.state.lock().unwrap().completed_ids.len()
    }

    pub fn is_exhausted(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.exhausted && state.pending.is_empty() && state.in_progress.is_empty()
    }

    /// Snapshot the full unit state under the lock. Assignments are recorded
    /// as in-progress tuples but the assignee is dropped; resume requeues.
    pub fn snapshot(&self, filter_digest: Hash256) -> Result<Snapshot> {
        let state = self.state.lock().unwrap();
        let range = state
            .range
            .ok_or_else(|| Error::Runtime("nothing to snapshot before initialize()".into()))?;

        let mut completed = state.completed_ids.clone();
        completed.sort_unstable();

        Ok(Snapshot {
            version: SNAPSHOT_VERSION,
            range,
            unit_width: state.unit_width,
            next_id: state.next_id,
            pending: state.pending.iter().map(|u| (u.id, u.range)).collect(),
            in_progress: state.in_progress.values().map(|u| (u.id, u.range)).collect(),
            completed_runs: rle_encode(&completed),
            results: state.results.clone(),
            filter_digest,
        })
    }

    /// Rebuild coordinator state from a snapshot: pending ∪ in-progress are
    /// requeued unassigned, the frontier resumes past the last generated
    /// unit, completed ids are never regenerated.
    pub fn restore(&self, snapshot: &Snapshot) -> Result<()> {
        let range = snapshot.range;
        if range.is_empty() {
            return Err(Error::Validation("snapshot holds an empty range".into()));
        }
        let mut state = self.state.lock().unwrap();
        state.range = Some(range);
        state.unit_width = snapshot.unit_width;
        state.next_id = snapshot.next_id;

        // Frontier = start + next_id * unit_width, saturating past the end.
        let offset = UInt256::from_u64(snapshot.unit_width).wrapping_mul_u64(snapshot.next_id);
        let frontier = range.start.wrapping_add(&offset);
        if frontier > range.end || frontier < range.start {
            state.exhausted = true;
            state.frontier = range.end;
        } else {
            state.exhausted = false;
            state.frontier = frontier;
        }

        state.pending.clear();
        let mut units: Vec<(u64, KeyRange)> = snapshot.resumable_units();
        units.sort_by_key(|(id, _)| *id);
        for (id, unit_range) in units {
            state.pending.push_back(WorkUnit::new(id, unit_range));
        }
        state.in_progress.clear();
        state.completed_ids = snapshot.completed_ids();
        state.completed_width = state
            .completed_ids
            .iter()
            .map(|_| snapshot.unit_width as f64)
            .sum();
        state.results = snapshot.results.clone();
        Ok(())
    }
}

impl Drop for WorkCoordinator {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}
