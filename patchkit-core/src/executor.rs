use crate::config::{FailurePolicy, SyncConfig};
use crate::error::{Error, ErrorKind, Result};
use crate::identity::HashingWriter;
use crate::manifest::{Manifest, ManifestEntry};
use crate::path_safety::resolve;
use crate::reconcile::ReconciliationPlan;
use crate::store::LocalManifestStore;
use crate::transport::Transport;
use fs2::FileExt;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Abort,
}

impl From<FailurePolicy> for Decision {
    fn from(p: FailurePolicy) -> Self {
        match p {
            FailurePolicy::Abort => Decision::Abort,
            FailurePolicy::Continue => Decision::Continue,
        }
    }
}

/// Callbacks from a running `PlanExecutor`, in execution order. After a
/// failed fetch the observer chooses whether the run goes on.
pub trait ExecutionObserver {
    fn started(&mut self, _plan: &ReconciliationPlan) {}
    fn fetching(&mut self, _index: usize, _total: usize, _entry: &ManifestEntry) {}
    fn fetched(&mut self, _entry: &ManifestEntry) {}
    fn fetch_failed(
        &mut self,
        _entry: &ManifestEntry,
        _error: &Error,
        policy: FailurePolicy,
    ) -> Decision {
        Decision::from(policy)
    }
    fn deleting(&mut self, _path: &str) {}
    fn deleted(&mut self, _path: &str) {}
    fn delete_failed(&mut self, _path: &str, _error: &Error) {}
    fn finished(&mut self, _report: &ExecutionReport) {}
}

/// Follows the configured policy and reports nothing.
pub struct PolicyObserver;

impl ExecutionObserver for PolicyObserver {}

/// Cooperative cancellation, checked between file operations.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchFailure {
    pub path: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteWarning {
    pub path: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub fetched: Vec<String>,
    pub failed: Vec<FetchFailure>,
    /// Fetches never attempted because the run was aborted or cancelled.
    pub skipped: Vec<String>,
    pub deleted: Vec<String>,
    pub delete_warnings: Vec<DeleteWarning>,
    pub unchanged: usize,
    pub bytes_fetched: u64,
    pub aborted: bool,
    pub cancelled: bool,
}

impl ExecutionReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty() && !self.cancelled
    }
}

/// Applies a `ReconciliationPlan` under the configured root: atomic fetches,
/// best-effort deletions, then a fresh local record.
pub struct PlanExecutor<'t> {
    cfg: SyncConfig,
    transport: &'t dyn Transport,
    cancel: CancelToken,
}

impl<'t> PlanExecutor<'t> {
    pub fn new(cfg: SyncConfig, transport: &'t dyn Transport) -> Self {
        Self { cfg, transport, cancel: CancelToken::new() }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn apply(
        &self,
        plan: &ReconciliationPlan,
        observer: &mut dyn ExecutionObserver,
    ) -> Result<ExecutionReport> {
        plan.validate(&self.cfg.protected)?;
        if let Some(f) = plan.to_fetch.iter().find(|f| self.cfg.is_run_state(&f.entry.path)) {
            return Err(Error::Validation(format!(
                "plan would overwrite patcher run state: {}",
                f.entry.path
            )));
        }
        std::fs::create_dir_all(&self.cfg.root).map_err(|e| Error::io(&self.cfg.root, e))?;
        let _lock = RunLock::acquire(&self.cfg.lock_path())?;
        sweep_stale_temps(&self.cfg.root);

        info!(
            root = %self.cfg.root.display(),
            source = %self.transport.describe(),
            fetch = plan.to_fetch.len(),
            delete = plan.to_delete.len(),
            "applying plan"
        );
        observer.started(plan);
        let mut report = ExecutionReport { unchanged: plan.unchanged.len(), ..Default::default() };
        // Observers see `finished` even when the record cannot be saved.
        let outcome = self.run(plan, observer, &mut report);
        observer.finished(&report);
        outcome?;
        info!(
            fetched = report.fetched.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            deleted = report.deleted.len(),
            "run finished"
        );
        Ok(report)
    }

    fn run(
        &self,
        plan: &ReconciliationPlan,
        observer: &mut dyn ExecutionObserver,
        report: &mut ExecutionReport,
    ) -> Result<()> {
        let total = plan.to_fetch.len();
        for (i, item) in plan.to_fetch.iter().enumerate() {
            let entry = &item.entry;
            if report.aborted || self.cancel.is_cancelled() {
                report.cancelled |= self.cancel.is_cancelled();
                report.skipped.push(entry.path.clone());
                continue;
            }
            observer.fetching(i, total, entry);
            match self.fetch_one(entry) {
                Ok(()) => {
                    debug!(path = %entry.path, "fetched");
                    report.bytes_fetched += entry.identity.size;
                    report.fetched.push(entry.path.clone());
                    observer.fetched(entry);
                }
                Err(e) => {
                    warn!(path = %entry.path, error = %e, "fetch failed");
                    report.failed.push(FetchFailure {
                        path: entry.path.clone(),
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                    if observer.fetch_failed(entry, &e, self.cfg.on_fetch_error)
                        == Decision::Abort
                    {
                        report.aborted = true;
                    }
                }
            }
        }

        let mut retained: Vec<ManifestEntry> = Vec::new();
        for path in &plan.to_delete {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                retained.extend(plan.obsolete_entry(path).cloned());
                continue;
            }
            observer.deleting(path);
            match self.delete_one(path) {
                Ok(()) => {
                    debug!(%path, "deleted");
                    report.deleted.push(path.clone());
                    observer.deleted(path);
                }
                Err(e) => {
                    warn!(%path, error = %e, "could not delete obsolete file");
                    let gone = matches!(&e, Error::Io { source, .. } if source.kind() == io::ErrorKind::NotFound);
                    if !gone {
                        retained.extend(plan.obsolete_entry(path).cloned());
                    }
                    report
                        .delete_warnings
                        .push(DeleteWarning { path: path.clone(), message: e.to_string() });
                    observer.delete_failed(path, &e);
                }
            }
        }

        self.save_record(plan, report, retained)
    }

    /// Download into a temp file next to the destination and rename it into
    /// place only after the whole body arrived and matched the manifest.
    fn fetch_one(&self, entry: &ManifestEntry) -> Result<()> {
        let dest = resolve(&self.cfg.root, &entry.path, self.cfg.path_policy)?;
        let dir = dest.parent().unwrap_or(&self.cfg.root);
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(crate::TEMP_PREFIX)
            .tempfile_in(dir)
            .map_err(|e| Error::io(dir, e))?;
        let mut sink = HashingWriter::new(BufWriter::new(tmp.as_file_mut()));
        self.transport.fetch_file(&entry.path, &mut sink)?;
        let (buffered, got) = sink.finish();
        buffered.into_inner().map_err(|e| Error::io(&dest, e.into_error()))?;

        if !got.matches(&entry.identity) {
            return Err(Error::Integrity {
                path: entry.path.clone(),
                expected: entry.identity.to_string(),
                actual: got.to_string(),
            });
        }
        tmp.as_file().sync_all().map_err(|e| Error::io(tmp.path(), e))?;
        tmp.persist(&dest).map_err(|e| Error::io(&dest, e.error))?;
        Ok(())
    }

    fn delete_one(&self, path: &str) -> Result<()> {
        let abs = resolve(&self.cfg.root, path, self.cfg.path_policy)?;
        std::fs::remove_file(&abs).map_err(|e| Error::io(&abs, e))?;
        prune_empty_dirs(&self.cfg.root, &abs);
        Ok(())
    }

    fn save_record(
        &self,
        plan: &ReconciliationPlan,
        report: &ExecutionReport,
        retained: Vec<ManifestEntry>,
    ) -> Result<()> {
        let fetched: HashSet<&str> = report.fetched.iter().map(String::as_str).collect();
        let mut entries: Vec<ManifestEntry> = plan.unchanged.clone();
        entries.extend(
            plan.to_fetch
                .iter()
                .filter(|f| fetched.contains(f.entry.path.as_str()))
                .map(|f| f.entry.clone()),
        );
        entries.extend(retained);
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        let record = Manifest::new(plan.version.clone(), plan.generated_at, entries)?;
        LocalManifestStore::for_config(&self.cfg).save(&record)
    }
}

/// Exclusive advisory lock on the root; released when dropped.
struct RunLock {
    file: File,
}

impl RunLock {
    fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::io(path, e))?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file }),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Err(Error::Locked(path.to_path_buf()))
            }
            Err(e) => Err(Error::io(path, e)),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Remove temp artifacts an interrupted earlier run left behind.
fn sweep_stale_temps(root: &Path) {
    for ent in walkdir::WalkDir::new(root).min_depth(1).into_iter().filter_map(|e| e.ok()) {
        if !ent.file_type().is_file() {
            continue;
        }
        let stale = ent
            .file_name()
            .to_str()
            .map(|n| n.starts_with(crate::TEMP_PREFIX))
            .unwrap_or(false);
        if stale {
            match std::fs::remove_file(ent.path()) {
                Ok(()) => debug!(path = %ent.path().display(), "removed stale temp file"),
                Err(e) => warn!(path = %ent.path().display(), error = %e, "stale temp file left"),
            }
        }
    }
}

/// Remove directories emptied by a deletion, walking up but never past `root`.
fn prune_empty_dirs(root: &Path, removed: &Path) {
    let mut cur = removed.parent();
    while let Some(dir) = cur {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        if std::fs::remove_dir(dir).is_err() {
            break;
        }
        cur = dir.parent();
    }
}
