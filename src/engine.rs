//! Search engines: the workers that turn a key range into derived hashes and
//! filter hits. `CpuEngine` drives candidate batches through the thread pool;
//! a device-accelerated engine slots in behind the same trait.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::address::{encode_p2pkh, VERSION_P2PKH};
use crate::checkpoint::{rle_decode, rle_encode};
use crate::config::{KeyType, SearchParams, SweepMode};
use crate::crypto::{derive_pubkeys, hash160};
use crate::error::{Error, Result};
use crate::filter::BloomFilter;
use crate::pool::ThreadPool;
use crate::progress::Progress;
use crate::range::KeyRange;
use crate::targets::TargetSet;
use crate::types::{Hash160, PrivateKey};
use crate::uint256::UInt256;

/// A confirmed hit: the candidate key whose derived hash matched a target.
#[derive(Clone, Debug)]
pub struct SearchResult {
    pub found: bool,
    pub private_key: PrivateKey,
    pub target_hash: Hash160,
    pub address: String,
    /// Unix milliseconds at discovery; results are ordered by this.
    pub found_at_ms: u64,
}

impl SearchResult {
    pub fn new(private_key: PrivateKey, target_hash: Hash160) -> Self {
        let found_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            found: true,
            private_key,
            target_hash,
            address: encode_p2pkh(&target_hash, VERSION_P2PKH),
            found_at_ms,
        }
    }
}

pub type ResultCallback = Arc<dyn Fn(&SearchResult) + Send + Sync>;
pub type ProgressCallback = Arc<dyn Fn(&Progress) + Send + Sync>;

/// Capability set every engine provides, CPU or device-accelerated.
pub trait SearchEngine: Send {
    fn initialize(&mut self, targets: &[Hash160]) -> Result<()>;
    /// Adopt an already-built filter and target set instead of rebuilding.
    /// Engines that keep filter state elsewhere (device memory) may override;
    /// the default rebuilds from the set.
    fn initialize_shared(&mut self, targets: Arc<TargetSet>, filter: Arc<BloomFilter>) -> Result<()> {
        let _ = filter;
        let hashes: Vec<Hash160> = targets.iter().copied().collect();
        self.initialize(&hashes)
    }
    fn set_params(&mut self, params: SearchParams) -> Result<()>;
    /// Begin scanning `range` asynchronously; returns once dispatch is live.
    fn start(&mut self, range: KeyRange) -> Result<()>;
    /// Flag the scan to stop and join it.
    fn stop(&mut self);
    fn pause(&self);
    fn resume(&self);
    fn is_running(&self) -> bool;
    /// Block until the scan drains (or is stopped).
    fn wait(&mut self);
    fn progress(&self) -> Progress;
    fn results(&self) -> Vec<SearchResult>;
    fn set_result_callback(&mut self, cb: ResultCallback);
    fn set_progress_callback(&mut self, cb: ProgressCallback);
    fn save_checkpoint(&self, path: &Path) -> Result<()>;
    fn load_checkpoint(&mut self, path: &Path) -> Result<bool>;
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EngineKind {
    Cpu,
    Device,
}

/// Engine factory. The device backend is a capability that may be absent;
/// callers probe and degrade to CPU.
pub fn create_engine(kind: EngineKind, params: SearchParams) -> Result<Box<dyn SearchEngine>> {
    match kind {
        EngineKind::Cpu => Ok(Box::new(CpuEngine::new(params)?)),
        EngineKind::Device => Err(Error::Runtime("no device backend compiled".into())),
    }
}

const ENGINE_CKPT_MAGIC: &[u8; 4] = b"KSEN";
const STOP_CHECK_STRIDE: u64 = 512;

struct SpeedWindow {
    sampled_at: Instant,
    keys_at_sample: u64,
    kps: u64,
}

struct EngineShared {
    stop: AtomicBool,
    running: AtomicBool,
    keys_checked: AtomicU64,
    derive_errors: AtomicU64,
    position: Mutex<UInt256>,
    results: Mutex<Vec<SearchResult>>,
    completed_chunks: Mutex<Vec<u64>>,
    result_cb: Mutex<Option<ResultCallback>>,
    progress_cb: Mutex<Option<ProgressCallback>>,
    speed: Mutex<SpeedWindow>,
    started_at: Mutex<Instant>,
}

impl EngineShared {
    fn record_result(&self, result: SearchResult) {
        // Callback fires outside the results lock.
        let cb = {
            let mut results = self.results.lock().unwrap();
            results.push(result.clone());
            self.result_cb.lock().unwrap().clone()
        };
        if let Some(cb) = cb {
            cb(&result);
        }
    }
}

pub struct CpuEngine {
    params: SearchParams,
    pool: Arc<ThreadPool>,
    shared: Arc<EngineShared>,
    filter: Option<Arc<BloomFilter>>,
    targets: Option<Arc<TargetSet>>,
    range: Option<KeyRange>,
    chunk_width: u64,
    resume_completed: HashSet<u64>,
    dispatcher: Option<JoinHandle<()>>,
}

impl CpuEngine {
    pub fn new(params: SearchParams) -> Result<Self> {
        params.validate()?;
        let now = Instant::now();
        Ok(Self {
            pool: Arc::new(ThreadPool::new(params.num_threads)),
            params,
            shared: Arc::new(EngineShared {
                stop: AtomicBool::new(false),
                running: AtomicBool::new(false),
                keys_checked: AtomicU64::new(0),
                derive_errors: AtomicU64::new(0),
                position: Mutex::new(UInt256::ZERO),
                results: Mutex::new(Vec::new()),
                completed_chunks: Mutex::new(Vec::new()),
                result_cb: Mutex::new(None),
                progress_cb: Mutex::new(None),
                speed: Mutex::new(SpeedWindow { sampled_at: now, keys_at_sample: 0, kps: 0 }),
                started_at: Mutex::new(now),
            }),
            filter: None,
            targets: None,
            range: None,
            chunk_width: 0,
            resume_completed: HashSet::new(),
            dispatcher: None,
        })
    }

    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    pub fn derive_errors(&self) -> u64 {
        self.shared.derive_errors.load(Ordering::Relaxed)
    }

    fn chunk_order(mode: SweepMode, count: u64) -> Vec<u64> {
        match mode {
            SweepMode::Sequential => (0..count).collect(),
            SweepMode::Backward => (0..count).rev().collect(),
            SweepMode::Both => {
                let mut order = Vec::with_capacity(count as usize);
                let (mut lo, mut hi) = (0, count);
                while lo < hi {
                    order.push(lo);
                    lo += 1;
                    if lo < hi {
                        hi -= 1;
                        order.push(hi);
                    }
                }
                order
            }
            SweepMode::Random => {
                let mut order: Vec<u64> = (0..count).collect();
                order.shuffle(&mut rand::thread_rng());
                order
            }
            SweepMode::Dance => {
                // Random draw without replacement, decided per dispatch step.
                let mut remaining: Vec<u64> = (0..count).collect();
                let mut rng = rand::thread_rng();
                let mut order = Vec::with_capacity(count as usize);
                while !remaining.is_empty() {
                    let pick = rng.gen_range(0..remaining.len());
                    order.push(remaining.swap_remove(pick));
                }
                order
            }
        }
    }

    fn chunk_range(range: &KeyRange, chunk_width: u64, id: u64) -> KeyRange {
        let offset = UInt256::from_u64(chunk_width).wrapping_mul_u64(id);
        let start = range.start.wrapping_add(&offset);
        let end = start
            .wrapping_add(&UInt256::from_u64(chunk_width - 1))
            .min(range.end);
        KeyRange::new(start, end)
    }
}

/// Scan one contiguous chunk. Derive failures are logged and skipped; the
/// pool never halts on them.
fn scan_chunk(
    shared: &EngineShared,
    filter: &BloomFilter,
    targets: &TargetSet,
    chunk: KeyRange,
    key_type: KeyType,
    backward: bool,
) {
    let mut key = if backward { chunk.end } else { chunk.start };
    let last = if backward { chunk.start } else { chunk.end };
    let mut checked = 0u64;

    loop {
        if checked % STOP_CHECK_STRIDE == 0 && shared.stop.load(Ordering::Acquire) {
            break;
        }

        let priv_key = PrivateKey::from_bytes(key.to_be_bytes());
        match derive_pubkeys(&priv_key) {
            Ok((uncompressed, compressed)) => {
                if matches!(key_type, KeyType::Compressed | KeyType::Both) {
                    test_candidate(shared, filter, targets, &priv_key, compressed.as_bytes());
                }
                if matches!(key_type, KeyType::Uncompressed | KeyType::Both) {
                    test_candidate(shared, filter, targets, &priv_key, uncompressed.as_bytes());
                }
            }
            Err(e) => {
                let errors = shared.derive_errors.fetch_add(1, Ordering::Relaxed);
                if errors < 8 {
                    eprintln!("[Sweep] Derive failed at {key}: {e}");
                }
            }
        }
        checked += 1;

        if key == last {
            break;
        }
        if backward {
            key = key.wrapping_sub(&UInt256::ONE);
        } else {
            key.incr();
        }
    }

    shared.keys_checked.fetch_add(checked, Ordering::Relaxed);
    let mut position = shared.position.lock().unwrap();
    *position = key;
}

#[inline]
fn test_candidate(
    shared: &EngineShared,
    filter: &BloomFilter,
    targets: &TargetSet,
    priv_key: &PrivateKey,
    pubkey_bytes: &[u8],
) {
    let hash = hash160(pubkey_bytes);
    // Filter first; a positive is only a candidate until the exact set agrees.
    if filter.query(hash.as_bytes()) && targets.contains(&hash) {
        shared.record_result(SearchResult::new(*priv_key, hash));
    }
}

impl SearchEngine for CpuEngine {
    fn initialize(&mut self, targets: &[Hash160]) -> Result<()> {
        if self.shared.running.load(Ordering::Acquire) {
            return Err(Error::Runtime("cannot initialize while running".into()));
        }
        let mut set = TargetSet::new();
        for hash in targets {
            set.insert(*hash);
        }
        if set.is_empty() {
            return Err(Error::Validation("no targets to search for".into()));
        }
        self.params.check_memory_budget(set.len())?;
        // Build phase is exclusive; no scan unit exists yet.
        let filter = set.build_filter(
            self.params.bloom_bits_per_element,
            self.params.bloom_hash_functions,
        );
        println!(
            "[Sweep] Filter built: {} targets, {:.1} KB, k={}",
            set.len(),
            filter.memory_usage() as f64 / 1024.0,
            filter.num_hashes()
        );
        self.filter = Some(Arc::new(filter));
        self.targets = Some(Arc::new(set));
        Ok(())
    }

    fn initialize_shared(&mut self, targets: Arc<TargetSet>, filter: Arc<BloomFilter>) -> Result<()> {
        if self.shared.running.load(Ordering::Acquire) {
            return Err(Error::Runtime("cannot initialize while running".into()));
        }
        if targets.is_empty() {
            return Err(Error::Validation("no targets to search for".into()));
        }
        self.filter = Some(filter);
        self.targets = Some(targets);
        Ok(())
    }

    fn set_params(&mut self, params: SearchParams) -> Result<()> {
        if self.shared.running.load(Ordering::Acquire) {
            return Err(Error::Runtime("cannot change params while running".into()));
        }
        params.validate()?;
        self.params = params;
        Ok(())
    }

    fn start(&mut self, range: KeyRange) -> Result<()> {
        let filter = self
            .filter
            .clone()
            .ok_or_else(|| Error::Runtime("initialize() must run before start()".into()))?;
        let targets = self.targets.clone().unwrap();
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Err(Error::Runtime("engine already running".into()));
        }

        self.shared.stop.store(false, Ordering::Release);
        *self.shared.started_at.lock().unwrap() = Instant::now();
        *self.shared.position.lock().unwrap() = range.start;

        let workers = self.pool.size() as u64;
        let chunk_width = self
            .range
            .filter(|r| *r == range)
            .map(|_| self.chunk_width)
            .filter(|w| *w > 0)
            .unwrap_or_else(|| {
                // Small ranges get per-worker chunks; big ones the clamped size.
                let width = range.size();
                if width <= UInt256::from_u64(crate::range::MIN_CHUNK * workers) {
                    (width.to_u128_lossy() as u64 / workers).max(1)
                } else {
                    range.optimal_chunk(workers, Duration::from_secs(30))
                }
            });
        self.range = Some(range);
        self.chunk_width = chunk_width;

        let chunks = {
            let width = range.size();
            let (q, r) = width.div_rem_u64(chunk_width);
            if q > UInt256::from_u64(1 << 22) {
                self.shared.running.store(false, Ordering::Release);
                return Err(Error::Validation(
                    "range too wide for one engine; split it through a coordinator".into(),
                ));
            }
            q.to_u128_lossy() as u64 + (r > 0) as u64
        };

        let order = Self::chunk_order(self.params.mode, chunks);
        let skip: HashSet<u64> = self.resume_completed.drain().collect();
        if !skip.is_empty() {
            println!("[Sweep] Resuming: {} of {} chunks already done", skip.len(), chunks);
        }

        let shared = Arc::clone(&self.shared);
        let pool = Arc::clone(&self.pool);
        let key_type = self.params.key_type;
        let backward = self.params.mode == SweepMode::Backward;
        let max_in_flight = (2 * pool.size()).max(2);

        let dispatcher = std::thread::Builder::new()
            .name("sweep-dispatch".to_string())
            .spawn(move || {
                let mut in_flight = std::collections::VecDeque::new();
                for id in order {
                    if shared.stop.load(Ordering::Acquire) {
                        break;
                    }
                    if skip.contains(&id) {
                        continue;
                    }
                    let chunk = Self::chunk_range(&range, chunk_width, id);
                    let shared2 = Arc::clone(&shared);
                    let filter = Arc::clone(&filter);
                    let targets = Arc::clone(&targets);
                    let handle = pool.submit(move || {
                        scan_chunk(&shared2, &filter, &targets, chunk, key_type, backward);
                        id
                    });
                    match handle {
                        Ok(h) => in_flight.push_back(h),
                        Err(_) => break, // pool shut down under us
                    }
                    while in_flight.len() >= max_in_flight {
                        let done = in_flight.pop_front().unwrap();
                        if let Ok(id) = done.wait() {
                            shared.completed_chunks.lock().unwrap().push(id);
                        }
                    }
                }
                for done in in_flight {
                    if let Ok(id) = done.wait() {
                        shared.completed_chunks.lock().unwrap().push(id);
                    }
                }
                shared.running.store(false, Ordering::Release);
            })
            .map_err(|e| Error::System(format!("spawning dispatcher: {e}")))?;

        self.dispatcher = Some(dispatcher);
        Ok(())
    }

    fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        // A paused pool would never drain the in-flight queue.
        self.pool.resume();
        self.wait();
    }

    fn pause(&self) {
        self.pool.pause();
    }

    fn resume(&self) {
        self.pool.resume();
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn wait(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.join();
        }
        self.pool.wait();
        self.shared.running.store(false, Ordering::Release);
    }

    fn progress(&self) -> Progress {
        let keys_checked = self.shared.keys_checked.load(Ordering::Relaxed);
        let started_at = *self.shared.started_at.lock().unwrap();

        let kps = {
            let mut window = self.shared.speed.lock().unwrap();
            let dt = window.sampled_at.elapsed();
            if dt >= Duration::from_secs(2) {
                let delta = keys_checked.saturating_sub(window.keys_at_sample);
                window.kps = (delta as f64 / dt.as_secs_f64()) as u64;
                window.sampled_at = Instant::now();
                window.keys_at_sample = keys_checked;
            } else if window.kps == 0 && keys_checked > 0 {
                let elapsed = started_at.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    window.kps = (keys_checked as f64 / elapsed) as u64;
                }
            }
            window.kps
        };

        let total = self.range.map(|r| r.size().to_f64_lossy()).unwrap_or(0.0);
        let percent = if total > 0.0 {
            (keys_checked as f64 / total * 100.0).min(100.0)
        } else {
            0.0
        };

        let progress = Progress {
            keys_checked,
            keys_per_second: kps,
            progress_percent: percent,
            started_at,
            last_update: Instant::now(),
            current_position: *self.shared.position.lock().unwrap(),
            results_found: self.shared.results.lock().unwrap().len(),
        };
        if let Some(cb) = self.shared.progress_cb.lock().unwrap().clone() {
            cb(&progress);
        }
        progress
    }

    fn results(&self) -> Vec<SearchResult> {
        self.shared.results.lock().unwrap().clone()
    }

    fn set_result_callback(&mut self, cb: ResultCallback) {
        *self.shared.result_cb.lock().unwrap() = Some(cb);
    }

    fn set_progress_callback(&mut self, cb: ProgressCallback) {
        *self.shared.progress_cb.lock().unwrap() = Some(cb);
    }

    /// Engine-local checkpoint: which chunks of the configured range are done.
    fn save_checkpoint(&self, path: &Path) -> Result<()> {
        let Some(range) = self.range else {
            return Err(Error::Runtime("nothing to checkpoint before start()".into()));
        };
        let mut completed = self.shared.completed_chunks.lock().unwrap().clone();
        completed.sort_unstable();
        let runs = rle_encode(&completed);

        let mut buf = Vec::new();
        buf.extend_from_slice(ENGINE_CKPT_MAGIC);
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&range.start.to_be_bytes());
        buf.extend_from_slice(&range.end.to_be_bytes());
        buf.extend_from_slice(&self.chunk_width.to_le_bytes());
        buf.extend_from_slice(&self.shared.keys_checked.load(Ordering::Relaxed).to_le_bytes());
        buf.extend_from_slice(&(runs.len() as u64).to_le_bytes());
        for (start, len) in runs {
            buf.extend_from_slice(&start.to_le_bytes());
            buf.extend_from_slice(&len.to_le_bytes());
        }

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &buf)?;
        std::fs::File::open(&tmp)?.sync_all()?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Returns false when no usable checkpoint exists. A checkpoint for a
    /// different range is ignored, not an error.
    fn load_checkpoint(&mut self, path: &Path) -> Result<bool> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if raw.len() < 96 || &raw[0..4] != ENGINE_CKPT_MAGIC {
            return Ok(false);
        }
        let version = u32::from_le_bytes(raw[4..8].try_into().unwrap());
        if version != 1 {
            return Ok(false);
        }
        let start = UInt256::from_be_bytes(&raw[8..40].try_into().unwrap());
        let end = UInt256::from_be_bytes(&raw[40..72].try_into().unwrap());
        let chunk_width = u64::from_le_bytes(raw[72..80].try_into().unwrap());
        let keys_checked = u64::from_le_bytes(raw[80..88].try_into().unwrap());
        let run_count = u64::from_le_bytes(raw[88..96].try_into().unwrap()) as usize;
        if raw.len() < 96 + run_count * 16 {
            return Ok(false);
        }
        let mut runs = Vec::with_capacity(run_count);
        for i in 0..run_count {
            let offset = 96 + i * 16;
            runs.push((
                u64::from_le_bytes(raw[offset..offset + 8].try_into().unwrap()),
                u64::from_le_bytes(raw[offset + 8..offset + 16].try_into().unwrap()),
            ));
        }

        self.range = Some(KeyRange::new(start, end));
        self.chunk_width = chunk_width;
        self.resume_completed = rle_decode(&runs).into_iter().collect();
        self.shared.keys_checked.store(keys_checked, Ordering::Relaxed);
        Ok(true)
    }
}

impl Drop for CpuEngine {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.join();
        }
    }
}
