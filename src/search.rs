//! Top-level search façade: validates parameters up front, loads targets,
//! drives an engine to completion, persists checkpoints on an interval and
//! appends confirmed hits to the found-key sink.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::address::to_wif;
use crate::config::SearchParams;
use crate::engine::{
    create_engine, EngineKind, ProgressCallback, ResultCallback, SearchEngine, SearchResult,
};
use crate::error::{Error, Result};
use crate::progress::Progress;
use crate::targets::TargetSet;
use crate::types::Hash160;

const MONITOR_TICK: Duration = Duration::from_millis(200);

pub struct Search {
    params: SearchParams,
    targets: Vec<Hash160>,
    engine: Box<dyn SearchEngine>,
    stop_flag: Arc<AtomicBool>,
    result_cb: Option<ResultCallback>,
    progress_cb: Option<ProgressCallback>,
    started: bool,
}

impl Search {
    /// Configuration errors surface here, before any work exists.
    pub fn new(params: SearchParams) -> Result<Self> {
        params.validate()?;
        let engine = create_engine(EngineKind::Cpu, params.clone())?;
        Ok(Self {
            params,
            targets: Vec::new(),
            engine,
            stop_flag: Arc::new(AtomicBool::new(false)),
            result_cb: None,
            progress_cb: None,
            started: false,
        })
    }

    pub fn add_target(&mut self, hash: Hash160) {
        self.targets.push(hash);
    }

    /// Load a target file (text or JSON); returns how many targets the run
    /// now has. I/O and parse errors abort per the propagation policy.
    pub fn load_targets<P: AsRef<std::path::Path>>(&mut self, path: P) -> Result<usize> {
        let set = TargetSet::load(path)?;
        self.targets.extend(set.iter().copied());
        Ok(self.targets.len())
    }

    pub fn on_result(&mut self, cb: ResultCallback) {
        self.result_cb = Some(cb);
    }

    pub fn on_progress(&mut self, cb: ProgressCallback) {
        self.progress_cb = Some(cb);
    }

    /// Shared stop flag; a signal handler stores `true` and the run loop
    /// winds down cleanly, checkpoint included.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_flag)
    }

    fn install_callbacks(&mut self) {
        let sink_path = self.params.found_path.clone();
        let user_cb = self.result_cb.clone();
        self.engine.set_result_callback(Arc::new(move |result: &SearchResult| {
            println!(
                "\n[FOUND] key {} -> {}",
                result.private_key.to_hex(),
                result.address
            );
            append_found(&sink_path, result);
            if let Some(cb) = &user_cb {
                cb(result);
            }
        }));
        if let Some(cb) = &self.progress_cb {
            self.engine.set_progress_callback(Arc::clone(cb));
        }
    }

    fn prepare(&mut self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(Error::Validation("no targets configured".into()));
        }
        self.install_callbacks();
        self.engine.initialize(&self.targets)?;

        if self.params.checkpoint_enabled {
            match self.engine.load_checkpoint(&self.params.checkpoint_path) {
                Ok(true) => println!(
                    "[Sweep] Resumed from checkpoint {}",
                    self.params.checkpoint_path.display()
                ),
                Ok(false) => {}
                // Load failures abort; a half-read frontier is worse than a
                // fresh start the operator did not ask for.
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Blocking sweep over the configured range. Returns every confirmed hit.
    pub fn run(&mut self) -> Result<Vec<SearchResult>> {
        self.start_async()?;

        let interval = self.params.checkpoint_interval();
        let mut last_checkpoint = Instant::now();

        while self.engine.is_running() {
            if self.stop_flag.load(Ordering::Acquire) {
                println!("[Sweep] Stop requested, winding down");
                break;
            }
            std::thread::sleep(MONITOR_TICK);
            self.engine.progress();

            if self.params.checkpoint_enabled && last_checkpoint.elapsed() >= interval {
                self.save_checkpoint_logged();
                last_checkpoint = Instant::now();
            }
        }

        self.stop();
        Ok(self.engine.results())
    }

    /// Non-blocking start; poll with `progress()` and finish with `stop()`.
    pub fn start_async(&mut self) -> Result<()> {
        if self.started {
            return Err(Error::Runtime("search already started".into()));
        }
        self.prepare()?;
        self.stop_flag.store(false, Ordering::Release);
        self.engine.start(self.params.range)?;
        self.started = true;
        Ok(())
    }

    /// Stop the engine, join it, and write a final checkpoint. The shared
    /// stop flag is left as-is: it records whether an interrupt was
    /// requested, which a natural completion must not fake.
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.engine.stop();
        self.started = false;
        if self.params.checkpoint_enabled {
            self.save_checkpoint_logged();
        }
    }

    pub fn progress(&self) -> Progress {
        self.engine.progress()
    }

    pub fn results(&self) -> Vec<SearchResult> {
        self.engine.results()
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    /// Save errors are logged and retried at the next interval, never fatal.
    fn save_checkpoint_logged(&self) {
        if let Err(e) = self.engine.save_checkpoint(&self.params.checkpoint_path) {
            eprintln!("[Sweep] Checkpoint save failed ({e}), will retry");
        }
    }
}

fn append_found(path: &std::path::Path, result: &SearchResult) {
    let line = format!(
        "{} | WIF {} | {} | hash160 {}\n",
        result.private_key.to_hex(),
        to_wif(&result.private_key, true),
        result.address,
        result.target_hash.to_hex()
    );
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(mut file) => {
            let _ = file.write_all(line.as_bytes());
            let _ = file.sync_all();
        }
        Err(e) => eprintln!("[!] Cannot write found-key sink {}: {e}", path.display()),
    }
}
