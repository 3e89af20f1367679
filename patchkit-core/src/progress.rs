use crate::config::FailurePolicy;
use crate::error::Error;
use crate::executor::{Decision, ExecutionObserver, ExecutionReport};
use crate::manifest::ManifestEntry;
use crate::reconcile::ReconciliationPlan;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

/// Shared run counters with an optional background reporter that logs a
/// status line every `interval` while a run is active.
#[derive(Clone)]
pub struct Progress {
    enabled: bool,
    interval: Duration,
    stage: Arc<Mutex<String>>,
    pub files_done: Arc<AtomicUsize>,
    pub files_total: Arc<AtomicUsize>,
    pub bytes_done: Arc<AtomicU64>,
    pub bytes_total: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        Self::with_interval(enabled, Duration::from_secs(5))
    }

    pub fn with_interval(enabled: bool, interval: Duration) -> Self {
        Self {
            enabled,
            interval,
            stage: Arc::new(Mutex::new(String::new())),
            files_done: Arc::new(AtomicUsize::new(0)),
            files_total: Arc::new(AtomicUsize::new(0)),
            bytes_done: Arc::new(AtomicU64::new(0)),
            bytes_total: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_stage(&self, s: &str) {
        let mut g = self.stage.lock().unwrap_or_else(|p| p.into_inner());
        *g = s.to_string();
    }

    pub fn stage(&self) -> String {
        self.stage.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn reset(&self, files: usize, bytes: u64) {
        self.files_total.store(files, Ordering::Relaxed);
        self.files_done.store(0, Ordering::Relaxed);
        self.bytes_total.store(bytes, Ordering::Relaxed);
        self.bytes_done.store(0, Ordering::Relaxed);
    }

    pub fn inc_file(&self) {
        self.files_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, n: u64) {
        self.bytes_done.fetch_add(n, Ordering::Relaxed);
    }

    pub fn start(&self) {
        if !self.enabled || self.running.swap(true, Ordering::Relaxed) {
            return;
        }
        let this = self.clone();
        thread::spawn(move || {
            let t0 = Instant::now();
            while this.running.load(Ordering::Relaxed) {
                thread::sleep(this.interval);
                if !this.running.load(Ordering::Relaxed) {
                    break;
                }
                let fd = this.files_done.load(Ordering::Relaxed);
                let ft = this.files_total.load(Ordering::Relaxed);
                let bd = this.bytes_done.load(Ordering::Relaxed);
                let bt = this.bytes_total.load(Ordering::Relaxed);
                let pct = if bt > 0 { (bd as f64 / bt as f64) * 100.0 } else { 0.0 };
                info!(
                    "[{:>4}s] {} | files {}/{} | bytes {}%",
                    t0.elapsed().as_secs(),
                    this.stage(),
                    fd,
                    ft,
                    pct as i32
                );
            }
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

impl ExecutionObserver for Progress {
    fn started(&mut self, plan: &ReconciliationPlan) {
        self.reset(plan.to_fetch.len() + plan.to_delete.len(), plan.fetch_bytes());
        self.set_stage("Downloading");
        self.start();
    }

    fn fetched(&mut self, entry: &ManifestEntry) {
        self.inc_file();
        self.add_bytes(entry.identity.size);
    }

    fn fetch_failed(
        &mut self,
        _entry: &ManifestEntry,
        _error: &Error,
        policy: FailurePolicy,
    ) -> Decision {
        self.inc_file();
        Decision::from(policy)
    }

    fn deleting(&mut self, _path: &str) {
        self.set_stage("Removing");
    }

    fn deleted(&mut self, _path: &str) {
        self.inc_file();
    }

    fn delete_failed(&mut self, _path: &str, _error: &Error) {
        self.inc_file();
    }

    fn finished(&mut self, _report: &ExecutionReport) {
        self.stop();
    }
}
