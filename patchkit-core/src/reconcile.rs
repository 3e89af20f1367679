use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::identity::ContentIdentity;
use crate::manifest::{Manifest, ManifestEntry};
use crate::path_safety::{resolve, PathPolicy};
use crate::store::LocalManifestStore;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashSet};
use std::io;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Read-only view of the local tree, keyed by manifest path.
pub trait LocalState {
    /// Byte length of the file at `path`, or `None` when nothing is there.
    fn stat(&self, path: &str) -> Result<Option<u64>>;
    /// Full fingerprint; only asked for when the size already matches.
    fn identity(&self, path: &str) -> Result<ContentIdentity>;
}

/// `LocalState` backed by the filesystem under a root directory.
pub struct FsState {
    root: PathBuf,
    policy: PathPolicy,
}

impl FsState {
    pub fn new(root: impl Into<PathBuf>, policy: PathPolicy) -> Self {
        Self { root: root.into(), policy }
    }
}

impl LocalState for FsState {
    fn stat(&self, path: &str) -> Result<Option<u64>> {
        let abs = resolve(&self.root, path, self.policy)?;
        match std::fs::metadata(&abs) {
            Ok(m) if m.is_file() => Ok(Some(m.len())),
            Ok(_) => Err(Error::Validation(format!("not a regular file: {}", abs.display()))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(abs, e)),
        }
    }

    fn identity(&self, path: &str) -> Result<ContentIdentity> {
        let abs = resolve(&self.root, path, self.policy)?;
        ContentIdentity::from_file(&abs)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchReason {
    Missing,
    SizeMismatch,
    HashMismatch,
    /// Present but could not be stat-ed or hashed.
    Unreadable,
}

impl FetchReason {
    pub fn label(self) -> &'static str {
        match self {
            FetchReason::Missing => "MISSING",
            FetchReason::SizeMismatch => "SIZE MISMATCH",
            FetchReason::HashMismatch => "HASH MISMATCH",
            FetchReason::Unreadable => "UNREADABLE",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchItem {
    pub entry: ManifestEntry,
    pub reason: FetchReason,
}

/// Work needed to converge a root onto a target manifest. `to_fetch` keeps
/// target order; a path is never both fetched and deleted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconciliationPlan {
    pub version: String,
    pub generated_at: Option<DateTime<Utc>>,
    pub to_fetch: Vec<FetchItem>,
    pub to_delete: BTreeSet<String>,
    pub unchanged: Vec<ManifestEntry>,
    launcher_updates: Vec<String>,
    /// Previous-record entries behind `to_delete`, kept tracked until removed.
    obsolete: Vec<ManifestEntry>,
}

impl ReconciliationPlan {
    pub fn is_empty(&self) -> bool {
        self.to_fetch.is_empty() && self.to_delete.is_empty()
    }

    pub fn fetch_paths(&self) -> Vec<&str> {
        self.to_fetch.iter().map(|f| f.entry.path.as_str()).collect()
    }

    pub fn fetch_bytes(&self) -> u64 {
        self.to_fetch.iter().map(|f| f.entry.identity.size).sum()
    }

    /// Launcher or control files the target ships in a different version.
    pub fn launcher_updates(&self) -> &[String] {
        &self.launcher_updates
    }

    pub(crate) fn obsolete_entry(&self, path: &str) -> Option<&ManifestEntry> {
        self.obsolete.iter().find(|e| e.path == path)
    }

    /// Reject plans that would delete a protected path or both fetch and delete one.
    pub fn validate(&self, protected: &BTreeSet<String>) -> Result<()> {
        if let Some(p) = self.to_delete.iter().find(|p| protected.contains(*p)) {
            return Err(Error::Validation(format!("protected path scheduled for deletion: {p}")));
        }
        if let Some(f) = self.to_fetch.iter().find(|f| self.to_delete.contains(&f.entry.path)) {
            return Err(Error::Validation(format!(
                "path both fetched and deleted: {}",
                f.entry.path
            )));
        }
        Ok(())
    }
}

pub struct Reconciler {
    cfg: SyncConfig,
}

impl Reconciler {
    pub fn new(cfg: SyncConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.cfg
    }

    /// Classify every target entry against `local` and work out which
    /// previously placed files are obsolete. Reads only; never mutates.
    pub fn plan(
        &self,
        target: &Manifest,
        local: &dyn LocalState,
        previous: Option<&Manifest>,
    ) -> ReconciliationPlan {
        let mut to_fetch = Vec::new();
        let mut unchanged = Vec::new();
        for entry in target.entries() {
            if self.cfg.is_run_state(&entry.path) {
                warn!(path = %entry.path, "target lists patcher run state, ignoring entry");
                continue;
            }
            match classify(entry, local) {
                Some(reason) => {
                    debug!(path = %entry.path, reason = reason.label(), "needs fetch");
                    to_fetch.push(FetchItem { entry: entry.clone(), reason });
                }
                None => {
                    debug!(path = %entry.path, "ok");
                    unchanged.push(entry.clone());
                }
            }
        }

        let obsolete: Vec<ManifestEntry> = match previous {
            // No record of what we placed: deleting anything would be a guess.
            None => Vec::new(),
            Some(prev) => {
                let wanted: HashSet<&str> =
                    target.entries().iter().map(|e| e.path.as_str()).collect();
                prev.entries()
                    .iter()
                    .filter(|e| !wanted.contains(e.path.as_str()))
                    .filter(|e| !self.cfg.is_protected(&e.path))
                    .cloned()
                    .collect()
            }
        };
        let to_delete: BTreeSet<String> = obsolete.iter().map(|e| e.path.clone()).collect();

        let launcher_updates = to_fetch
            .iter()
            .filter(|f| self.cfg.is_protected(&f.entry.path))
            .map(|f| f.entry.path.clone())
            .collect();

        info!(
            fetch = to_fetch.len(),
            delete = to_delete.len(),
            unchanged = unchanged.len(),
            "plan computed"
        );
        ReconciliationPlan {
            version: target.version.clone(),
            generated_at: target.generated_at,
            to_fetch,
            to_delete,
            unchanged,
            launcher_updates,
            obsolete,
        }
    }

    /// Plan against the configured root and its stored record.
    pub fn plan_local(&self, target: &Manifest) -> Result<ReconciliationPlan> {
        let previous = LocalManifestStore::for_config(&self.cfg).load()?;
        let state = FsState::new(&self.cfg.root, self.cfg.path_policy);
        Ok(self.plan(target, &state, previous.as_ref()))
    }
}

fn classify(entry: &ManifestEntry, local: &dyn LocalState) -> Option<FetchReason> {
    let size = match local.stat(&entry.path) {
        Ok(None) => return Some(FetchReason::Missing),
        Ok(Some(size)) => size,
        Err(e) => {
            warn!(path = %entry.path, error = %e, "cannot stat local file, will refetch");
            return Some(FetchReason::Unreadable);
        }
    };
    if size != entry.identity.size {
        return Some(FetchReason::SizeMismatch);
    }
    match local.identity(&entry.path) {
        Ok(id) if id.matches(&entry.identity) => None,
        Ok(_) => Some(FetchReason::HashMismatch),
        Err(e) => {
            warn!(path = %entry.path, error = %e, "cannot hash local file, will refetch");
            Some(FetchReason::Unreadable)
        }
    }
}
