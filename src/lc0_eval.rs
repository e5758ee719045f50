// src/lc0_eval.rs
//
// lc0 attention-body evaluator: feature extraction, WDL -> centipawn mapping,
// a bounded result cache, and an optional worker pool that batches forward
// passes from many search calls.
use crate::evaluator::{EvalBreakdown, EvalStats, Evaluator};
use crate::lc0_features::{extract_features_112, InputPlanes};
use crate::lc0_linear::{LinearBackend, KERNEL_INT8, KERNEL_SCALAR};
use crate::lc0_net::{forward_attention_value, WdlOutput};
use crate::lc0_proto::Lc0Error;
use crate::lc0_weights::{load_from_pb_gz, validate_attention_value_shapes, Weights};
use crate::state::{Position, WHITE};
use ahash::AHashMap;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::cell::{Cell, RefCell};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

pub const BACKEND_SYNC: i32 = 1;
pub const BACKEND_ASYNC: i32 = 2;
pub const BACKEND_INT8: i32 = 3;

const QUEUE_CAPACITY: usize = 1024;
const MAX_ABS_EVAL_CP: i32 = 30000;

#[derive(Clone, Copy, Debug, Default)]
pub struct CacheEntry {
    pub w: f32,
    pub d: f32,
    pub l: f32,
    pub cp: i32,
}

struct EvalRequest {
    key: u64,
    planes: Box<InputPlanes>,
    done: Sender<Result<CacheEntry, Lc0Error>>,
    enqueued: Instant,
}

enum Job {
    Eval(EvalRequest),
    Stop,
}

struct Lc0Shared {
    weights: RwLock<Option<Arc<Weights>>>,
    cache: Mutex<AHashMap<u64, CacheEntry>>,
    stats: Mutex<EvalStats>,
    linear: LinearBackend,

    stop_workers: AtomicBool,
    cache_limit: AtomicUsize,
    cp_scale: AtomicI32,
    score_map: AtomicI32,
    batch_max: AtomicUsize,
    batch_wait_us: AtomicI32,
}

impl Lc0Shared {
    fn map_wdl_to_cp(&self, wdl: &WdlOutput) -> i32 {
        let p_w = wdl.win.clamp(1e-6, 1.0 - 1e-6);
        let p_d = wdl.draw.clamp(1e-6, 1.0 - 1e-6);
        let p_l = wdl.loss.clamp(1e-6, 1.0 - 1e-6);
        let expected = (p_w - p_l).clamp(-0.999, 0.999);
        let cp_scale = self.cp_scale.load(Ordering::Relaxed) as f32;

        let cp = match self.score_map.load(Ordering::Relaxed) {
            0 => cp_scale * expected,
            1 => cp_scale * expected.atanh(),
            2 => {
                let score01 = (p_w + 0.5 * p_d).clamp(1e-5, 1.0 - 1e-5);
                cp_scale * (score01 / (1.0 - score01)).ln()
            }
            _ => 90.0 * (1.5637541897f32 * expected).tan(),
        };

        if !cp.is_finite() {
            return 0;
        }
        (cp.round() as i32).clamp(-MAX_ABS_EVAL_CP, MAX_ABS_EVAL_CP)
    }

    fn run_forward_entry(&self, planes: &InputPlanes) -> Result<CacheEntry, Lc0Error> {
        let weights = self
            .weights
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| Lc0Error::Forward("no weights loaded".into()))?;

        let wdl = forward_attention_value(&weights, planes, &self.linear)?;
        Ok(CacheEntry {
            w: wdl.win,
            d: wdl.draw,
            l: wdl.loss,
            cp: self.map_wdl_to_cp(&wdl),
        })
    }

    fn probe_cache(&self, key: u64) -> Option<CacheEntry> {
        self.cache.lock().unwrap().get(&key).copied()
    }

    fn store_cache(&self, key: u64, entry: CacheEntry) {
        let mut cache = self.cache.lock().unwrap();
        if cache.len() >= self.cache_limit.load(Ordering::Relaxed) {
            cache.clear();
        }
        cache.insert(key, entry);
    }

    fn evaluate_sync(&self, key: u64, planes: &InputPlanes) -> Result<CacheEntry, Lc0Error> {
        if let Some(entry) = self.probe_cache(key) {
            self.stats.lock().unwrap().eval_cache_hits += 1;
            return Ok(entry);
        }
        self.stats.lock().unwrap().eval_cache_misses += 1;

        let started = Instant::now();
        let entry = self.run_forward_entry(planes)?;
        let infer_us = started.elapsed().as_micros() as u64;
        {
            let mut stats = self.stats.lock().unwrap();
            stats.nn_batches += 1;
            stats.nn_batch_positions += 1;
            stats.nn_infer_us += infer_us;
            stats.record_latency(infer_us);
        }
        self.store_cache(key, entry);
        Ok(entry)
    }
}

fn worker_loop(shared: Arc<Lc0Shared>, rx: Receiver<Job>) {
    loop {
        let first = match rx.recv() {
            Ok(Job::Eval(req)) => req,
            Ok(Job::Stop) | Err(_) => return,
        };

        if shared.stop_workers.load(Ordering::Relaxed) {
            let _ = first.done.send(Err(Lc0Error::WorkerStopped));
            continue;
        }

        let batch_max = shared.batch_max.load(Ordering::Relaxed).max(1);
        let batch_wait_us = shared.batch_wait_us.load(Ordering::Relaxed).max(0) as u64;
        let mut batch = vec![first];
        let mut stop_after_batch = false;

        // Accept younger requests until the batch fills or the oldest request
        // has waited batch_wait_us
        if batch_wait_us > 0 {
            let deadline = batch[0].enqueued + Duration::from_micros(batch_wait_us);
            while batch.len() < batch_max {
                match rx.recv_deadline(deadline) {
                    Ok(Job::Eval(req)) => batch.push(req),
                    Ok(Job::Stop) => {
                        stop_after_batch = true;
                        break;
                    }
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => {
                        stop_after_batch = true;
                        break;
                    }
                }
            }
        }

        let infer_started = Instant::now();
        let mut queue_wait_us_sum = 0u64;
        let mut latencies = Vec::with_capacity(batch.len());
        let positions = batch.len() as u64;

        for req in batch {
            if shared.stop_workers.load(Ordering::Relaxed) {
                let _ = req.done.send(Err(Lc0Error::WorkerStopped));
                continue;
            }

            let result = match shared.probe_cache(req.key) {
                Some(entry) => {
                    shared.stats.lock().unwrap().eval_cache_hits += 1;
                    Ok(entry)
                }
                None => {
                    shared.stats.lock().unwrap().eval_cache_misses += 1;
                    match shared.run_forward_entry(&req.planes) {
                        Ok(entry) => {
                            shared.store_cache(req.key, entry);
                            Ok(entry)
                        }
                        Err(e) => Err(e),
                    }
                }
            };

            let _ = req.done.send(result);

            let now = Instant::now();
            queue_wait_us_sum += infer_started
                .saturating_duration_since(req.enqueued)
                .as_micros() as u64;
            latencies.push(now.saturating_duration_since(req.enqueued).as_micros() as u64);
        }

        let infer_us = infer_started.elapsed().as_micros() as u64;
        {
            let mut stats = shared.stats.lock().unwrap();
            stats.nn_batches += 1;
            stats.nn_batch_positions += positions;
            stats.nn_queue_wait_us += queue_wait_us_sum;
            stats.nn_infer_us += infer_us;
            for latency in latencies {
                stats.record_latency(latency);
            }
        }

        if stop_after_batch {
            return;
        }
    }
}

pub struct Lc0Evaluator {
    shared: Arc<Lc0Shared>,

    ready: Cell<bool>,
    weights_path: RefCell<String>,
    last_error: RefCell<String>,
    backend_mode: Cell<i32>,
    eval_threads: Cell<usize>,

    workers: RefCell<Vec<thread::JoinHandle<()>>>,
    job_tx: RefCell<Option<Sender<Job>>>,
    job_rx: RefCell<Option<Receiver<Job>>>,
}

impl Lc0Evaluator {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Lc0Shared {
                weights: RwLock::new(None),
                cache: Mutex::new(AHashMap::new()),
                stats: Mutex::new(EvalStats::default()),
                linear: LinearBackend::new(),
                stop_workers: AtomicBool::new(false),
                cache_limit: AtomicUsize::new(1 << 18),
                cp_scale: AtomicI32::new(220),
                score_map: AtomicI32::new(1),
                batch_max: AtomicUsize::new(16),
                batch_wait_us: AtomicI32::new(1000),
            }),
            ready: Cell::new(false),
            weights_path: RefCell::new(String::new()),
            last_error: RefCell::new(String::new()),
            backend_mode: Cell::new(BACKEND_SYNC),
            eval_threads: Cell::new(1),
            workers: RefCell::new(Vec::new()),
            job_tx: RefCell::new(None),
            job_rx: RefCell::new(None),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.get()
    }

    pub fn last_error(&self) -> String {
        self.last_error.borrow().clone()
    }

    pub fn weights_path(&self) -> String {
        self.weights_path.borrow().clone()
    }

    pub fn load_weights(&self, path: &Path, strict_t1_shape: bool) -> bool {
        self.stop_workers();

        match load_from_pb_gz(path).and_then(|w| {
            validate_attention_value_shapes(&w, strict_t1_shape)?;
            Ok(w)
        }) {
            Ok(weights) => {
                *self.shared.weights.write().unwrap() = Some(Arc::new(weights));
                *self.weights_path.borrow_mut() = path.display().to_string();
                self.last_error.borrow_mut().clear();
                self.ready.set(true);
                self.clear_cache();
                self.shared.linear.clear_cache();
                self.restart_workers();
                true
            }
            Err(e) => {
                self.ready.set(false);
                *self.last_error.borrow_mut() = e.to_string();
                false
            }
        }
    }

    pub fn set_cp_scale(&self, cp_scale: i32) {
        self.shared
            .cp_scale
            .store(cp_scale.clamp(1, 2000), Ordering::Relaxed);
        self.clear_cache();
    }

    pub fn cp_scale(&self) -> i32 {
        self.shared.cp_scale.load(Ordering::Relaxed)
    }

    pub fn set_score_map(&self, score_map: i32) {
        self.shared
            .score_map
            .store(score_map.clamp(0, 3), Ordering::Relaxed);
        self.clear_cache();
    }

    pub fn score_map(&self) -> i32 {
        self.shared.score_map.load(Ordering::Relaxed)
    }

    pub fn set_cache_limit(&self, entries: usize) {
        self.shared
            .cache_limit
            .store(entries.max(1024), Ordering::Relaxed);
    }

    pub fn cache_limit(&self) -> usize {
        self.shared.cache_limit.load(Ordering::Relaxed)
    }

    pub fn set_batch_max(&self, batch_max: i32) {
        self.shared
            .batch_max
            .store(batch_max.clamp(1, 512) as usize, Ordering::Relaxed);
    }

    pub fn set_batch_wait_us(&self, batch_wait_us: i32) {
        self.shared
            .batch_wait_us
            .store(batch_wait_us.clamp(0, 20000), Ordering::Relaxed);
    }

    pub fn set_eval_threads(&self, threads: i32) {
        self.eval_threads.set(threads.clamp(1, 64) as usize);
        self.restart_workers();
    }

    pub fn set_backend_from_int(&self, backend: i32) {
        let mode = match backend {
            BACKEND_ASYNC => BACKEND_ASYNC,
            BACKEND_INT8 => BACKEND_INT8,
            _ => BACKEND_SYNC,
        };
        self.backend_mode.set(mode);
        self.shared.linear.set_kernel(if mode == BACKEND_INT8 {
            KERNEL_INT8
        } else {
            KERNEL_SCALAR
        });
        self.clear_cache();
        self.restart_workers();
    }

    pub fn backend_as_int(&self) -> i32 {
        self.backend_mode.get()
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend_mode.get() {
            BACKEND_ASYNC => "fp32_async",
            BACKEND_INT8 => "int8_sync",
            _ => "fp32_sync",
        }
    }

    pub fn clear_cache(&self) {
        self.shared.cache.lock().unwrap().clear();
    }

    pub fn eval_wdl(&self, pos: &Position) -> Option<(f32, f32, f32, i32)> {
        if !self.ready.get() {
            return None;
        }
        let entry = self.evaluate_position(pos)?;
        Some((entry.w, entry.d, entry.l, entry.cp))
    }

    fn evaluate_position(&self, pos: &Position) -> Option<CacheEntry> {
        let key = pos.key();
        let planes = extract_features_112(pos);

        if self.backend_mode.get() == BACKEND_ASYNC && !self.workers.borrow().is_empty() {
            if let Some(entry) = self.evaluate_async(key, planes.clone()) {
                return Some(entry);
            }
            // Worker failure: fall back to a synchronous forward pass
        }

        self.shared.evaluate_sync(key, &planes).ok()
    }

    fn evaluate_async(&self, key: u64, planes: Box<InputPlanes>) -> Option<CacheEntry> {
        if let Some(entry) = self.shared.probe_cache(key) {
            self.shared.stats.lock().unwrap().eval_cache_hits += 1;
            return Some(entry);
        }

        let (done_tx, done_rx) = bounded(1);
        let request = EvalRequest {
            key,
            planes,
            done: done_tx,
            enqueued: Instant::now(),
        };

        {
            let tx = self.job_tx.borrow();
            let tx = tx.as_ref()?;
            tx.send(Job::Eval(request)).ok()?;
        }

        match done_rx.recv() {
            Ok(Ok(entry)) => Some(entry),
            _ => None,
        }
    }

    fn restart_workers(&self) {
        self.stop_workers();

        if !self.ready.get() || self.backend_mode.get() != BACKEND_ASYNC {
            return;
        }

        let (tx, rx) = bounded::<Job>(QUEUE_CAPACITY);
        let threads = self.eval_threads.get();
        let mut workers = self.workers.borrow_mut();
        for _ in 0..threads {
            let shared = self.shared.clone();
            let rx = rx.clone();
            workers.push(thread::spawn(move || worker_loop(shared, rx)));
        }
        *self.job_tx.borrow_mut() = Some(tx);
        *self.job_rx.borrow_mut() = Some(rx);
    }

    fn stop_workers(&self) {
        let handles: Vec<_> = self.workers.borrow_mut().drain(..).collect();
        if handles.is_empty() {
            *self.job_tx.borrow_mut() = None;
            *self.job_rx.borrow_mut() = None;
            return;
        }

        self.shared.stop_workers.store(true, Ordering::Relaxed);
        if let Some(tx) = self.job_tx.borrow().as_ref() {
            for _ in 0..handles.len() {
                let _ = tx.send(Job::Stop);
            }
        }
        for handle in handles {
            let _ = handle.join();
        }

        // Complete whatever is still queued with a worker-stopped failure
        if let Some(rx) = self.job_rx.borrow().as_ref() {
            while let Ok(job) = rx.try_recv() {
                if let Job::Eval(req) = job {
                    let _ = req.done.send(Err(Lc0Error::WorkerStopped));
                }
            }
        }

        *self.job_tx.borrow_mut() = None;
        *self.job_rx.borrow_mut() = None;
        self.shared.stop_workers.store(false, Ordering::Relaxed);
    }
}

impl Default for Lc0Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Lc0Evaluator {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

impl Evaluator for Lc0Evaluator {
    fn static_eval(&self, pos: &Position) -> i32 {
        self.shared.stats.lock().unwrap().eval_calls += 1;

        if !self.ready.get() {
            return 0;
        }

        self.evaluate_position(pos).map(|e| e.cp).unwrap_or(0)
    }

    fn static_eval_trace(&self, pos: &Position, out: &mut EvalBreakdown) -> i32 {
        let score = self.static_eval(pos);
        *out = EvalBreakdown {
            total_white_pov: if pos.side_to_move() == WHITE { score } else { -score },
            ..EvalBreakdown::default()
        };
        score
    }

    fn stats(&self) -> EvalStats {
        *self.shared.stats.lock().unwrap()
    }

    fn clear_stats(&self) {
        *self.shared.stats.lock().unwrap() = EvalStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unloaded_evaluator_returns_zero() {
        crate::zobrist::init_zobrist();
        crate::bitboard::init_masks();
        crate::movegen::init_move_tables();
        crate::eval_tables::init_psqt();

        let eval = Lc0Evaluator::new();
        let mut pos = Position::new();
        assert!(pos.set_startpos());
        assert!(!eval.is_ready());
        assert_eq!(eval.static_eval(&pos), 0);
        assert_eq!(eval.stats().eval_calls, 1);
    }

    #[test]
    fn test_option_clamps() {
        let eval = Lc0Evaluator::new();
        eval.set_cp_scale(5000);
        assert_eq!(eval.cp_scale(), 2000);
        eval.set_cp_scale(0);
        assert_eq!(eval.cp_scale(), 1);
        eval.set_score_map(7);
        assert_eq!(eval.score_map(), 3);
        eval.set_cache_limit(10);
        assert_eq!(eval.cache_limit(), 1024);
    }

    #[test]
    fn test_wdl_to_cp_maps() {
        let eval = Lc0Evaluator::new();
        let even = WdlOutput {
            win: 0.3,
            draw: 0.4,
            loss: 0.3,
        };
        // Perfectly balanced WDL maps to 0 under every mapping
        for map in 0..=3 {
            eval.set_score_map(map);
            assert_eq!(eval.shared.map_wdl_to_cp(&even), 0, "map {}", map);
        }

        let winning = WdlOutput {
            win: 0.8,
            draw: 0.1,
            loss: 0.1,
        };
        for map in 0..=3 {
            eval.set_score_map(map);
            let cp = eval.shared.map_wdl_to_cp(&winning);
            assert!(cp > 0 && cp <= MAX_ABS_EVAL_CP, "map {} cp {}", map, cp);
        }

        let lost = WdlOutput {
            win: 0.0,
            draw: 0.0,
            loss: 1.0,
        };
        eval.set_score_map(1);
        let cp = eval.shared.map_wdl_to_cp(&lost);
        assert!(cp < 0 && cp >= -MAX_ABS_EVAL_CP);
    }

    #[test]
    fn test_cache_bulk_clear_on_overflow() {
        let eval = Lc0Evaluator::new();
        eval.set_cache_limit(1024);
        for key in 0..1024u64 {
            eval.shared.store_cache(key, CacheEntry::default());
        }
        assert_eq!(eval.shared.cache.lock().unwrap().len(), 1024);
        // Next store crosses the limit: bulk clear, then insert
        eval.shared.store_cache(9999, CacheEntry::default());
        assert_eq!(eval.shared.cache.lock().unwrap().len(), 1);
        assert!(eval.shared.probe_cache(9999).is_some());
    }
}
