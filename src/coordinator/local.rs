//! Local multi-device coordinator: one engine per device, the range split by
//! device weight, results merged in discovery order.

use std::sync::{Arc, Mutex};

use crate::config::SearchParams;
use crate::engine::{create_engine, EngineKind, ResultCallback, SearchEngine, SearchResult};
use crate::error::{Error, Result};
use crate::filter::BloomFilter;
use crate::progress::Progress;
use crate::range::KeyRange;
use crate::targets::TargetSet;
use crate::types::Hash160;

/// One searchable device and its relative throughput.
#[derive(Clone, Debug)]
pub struct DeviceSpec {
    pub name: String,
    pub kind: EngineKind,
    /// Relative speed; the range split is proportional to it.
    pub weight: f64,
}

impl DeviceSpec {
    pub fn cpu(name: &str, weight: f64) -> Self {
        Self { name: name.to_string(), kind: EngineKind::Cpu, weight }
    }
}

pub struct LocalCoordinator {
    params: SearchParams,
    devices: Vec<DeviceSpec>,
    engines: Vec<Box<dyn SearchEngine>>,
    filter: Option<Arc<BloomFilter>>,
    results: Arc<Mutex<Vec<SearchResult>>>,
    running: bool,
}

impl LocalCoordinator {
    /// Probes each requested device; ones whose backend is missing are
    /// dropped with a log line. No usable device is a config error.
    pub fn new(params: SearchParams, devices: Vec<DeviceSpec>) -> Result<Self> {
        params.validate()?;
        if devices.is_empty() {
            return Err(Error::Config("at least one device is required".into()));
        }
        Ok(Self {
            params,
            devices,
            engines: Vec::new(),
            filter: None,
            results: Arc::new(Mutex::new(Vec::new())),
            running: false,
        })
    }

    /// Build the filter once, then hand every engine a shared reference.
    /// The build phase completes before any engine can receive work.
    pub fn initialize(&mut self, targets: &[Hash160]) -> Result<()> {
        let mut set = TargetSet::new();
        for hash in targets {
            set.insert(*hash);
        }
        if set.is_empty() {
            return Err(Error::Validation("no targets to search for".into()));
        }
        self.params.check_memory_budget(set.len())?;

        let filter = Arc::new(set.build_filter(
            self.params.bloom_bits_per_element,
            self.params.bloom_hash_functions,
        ));
        let set = Arc::new(set);

        // Threads divide across engines so devices do not oversubscribe.
        let per_engine_threads = match self.params.num_threads {
            0 => 0,
            n => (n / self.devices.len()).max(1),
        };

        self.engines.clear();
        let mut usable = Vec::new();
        for device in &self.devices {
            let mut engine_params = self.params.clone();
            engine_params.num_threads = per_engine_threads;
            match create_engine(device.kind, engine_params) {
                Ok(mut engine) => {
                    engine.initialize_shared(Arc::clone(&set), Arc::clone(&filter))?;
                    let results = Arc::clone(&self.results);
                    engine.set_result_callback(Arc::new(move |result: &SearchResult| {
                        results.lock().unwrap().push(result.clone());
                    }));
                    self.engines.push(engine);
                    usable.push(device.clone());
                }
                Err(e) => {
                    eprintln!("[Coord] Device {} unavailable: {e}", device.name);
                }
            }
        }
        if self.engines.is_empty() {
            return Err(Error::Config("no usable device backend".into()));
        }
        self.devices = usable;
        self.filter = Some(filter);
        println!(
            "[Coord] {} engine(s) ready, filter {:.1} KB",
            self.engines.len(),
            self.filter.as_ref().unwrap().memory_usage() as f64 / 1024.0
        );
        Ok(())
    }

    /// Forward confirmed hits to the caller as well as the internal store.
    pub fn set_result_callback(&mut self, cb: ResultCallback) {
        let results = Arc::clone(&self.results);
        for engine in &mut self.engines {
            let results = Arc::clone(&results);
            let cb = Arc::clone(&cb);
            engine.set_result_callback(Arc::new(move |result: &SearchResult| {
                results.lock().unwrap().push(result.clone());
                cb(result);
            }));
        }
    }

    /// Weighted split, one slice per engine, all started asynchronously.
    pub fn start(&mut self, range: KeyRange) -> Result<()> {
        if self.running {
            return Err(Error::Runtime("coordinator already running".into()));
        }
        if self.engines.is_empty() {
            return Err(Error::Runtime("initialize() must run before start()".into()));
        }
        let weights: Vec<f64> = self.devices.iter().map(|d| d.weight).collect();
        let slices = range.split_for_devices(&weights);
        if slices.is_empty() {
            return Err(Error::Validation("range split produced no work".into()));
        }

        for (engine, slice) in self.engines.iter_mut().zip(&slices) {
            engine.start(*slice)?;
        }
        self.running = true;
        Ok(())
    }

    /// Flag every engine to stop between batches, then join them.
    pub fn stop(&mut self) {
        for engine in &mut self.engines {
            engine.stop();
        }
        self.running = false;
    }

    /// Block until all engines drain their slices.
    pub fn wait(&mut self) {
        for engine in &mut self.engines {
            engine.wait();
        }
        self.running = false;
    }

    pub fn pause(&self) {
        for engine in &self.engines {
            engine.pause();
        }
    }

    pub fn resume(&self) {
        for engine in &self.engines {
            engine.resume();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running && self.engines.iter().any(|e| e.is_running())
    }

    /// Aggregate of the per-engine counters.
    pub fn progress(&self) -> Progress {
        let mut total = Progress::default();
        let mut percent_sum = 0.0;
        for engine in &self.engines {
            let p = engine.progress();
            total.keys_checked += p.keys_checked;
            total.keys_per_second += p.keys_per_second;
            percent_sum += p.progress_percent;
            if p.started_at < total.started_at {
                total.started_at = p.started_at;
            }
            total.current_position = p.current_position;
        }
        if !self.engines.is_empty() {
            total.progress_percent = percent_sum / self.engines.len() as f64;
        }
        total.results_found = self.results.lock().unwrap().len();
        total
    }

    /// Results across all engines in discovery order.
    pub fn results(&self) -> Vec<SearchResult> {
        self.results.lock().unwrap().clone()
    }

    pub fn filter(&self) -> Option<&Arc<BloomFilter>> {
        self.filter.as_ref()
    }

    pub fn engine_count(&self) -> usize {
        self.engines.len()
    }
}
