use crate::error::{Error, Result};
use crate::path_safety::PathPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub const MANIFEST_NAME: &str = "manifest.json";
pub const RECORD_NAME: &str = ".patcher-manifest.json";
pub const LOCK_NAME: &str = ".patcher.lock";
pub const PATCHER_CONFIG_NAME: &str = "patcher-config.json";

/// Launcher and control files. Never deleted as obsolete; reported when the
/// target carries a different version of them.
pub const LAUNCHER_FILES: &[&str] =
    &["LaunchPad.exe", "patcher.exe", PATCHER_CONFIG_NAME, RECORD_NAME];

/// Basenames the builder never puts into a manifest.
pub const BUILD_DENYLIST: &[&str] = &[
    MANIFEST_NAME,
    "update-patches.sh",
    "manifest-builder",
    "README.txt",
    "LaunchPad.exe",
    "patcher.exe",
    PATCHER_CONFIG_NAME,
    "manager.exe",
    "news.json",
    "eq-patcher-client.zip",
    RECORD_NAME,
    LOCK_NAME,
    "patchkit",
    "patchkit.exe",
];

#[derive(Clone, Debug)]
pub struct BuilderConfig {
    pub version: String,
    /// Stamp `generated` with the build time.
    pub stamp_time: bool,
    /// Extra glob patterns (relative, slash-separated) to leave out.
    pub exclude: Vec<String>,
    pub manifest_name: String,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            version: crate::manifest::MANIFEST_VERSION.to_string(),
            stamp_time: true,
            exclude: Vec::new(),
            manifest_name: MANIFEST_NAME.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop fetching after the first failed file.
    #[default]
    Abort,
    /// Record the failure and keep going.
    Continue,
}

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub root: PathBuf,
    pub record_name: String,
    pub lock_name: String,
    pub protected: BTreeSet<String>,
    pub on_fetch_error: FailurePolicy,
    pub path_policy: PathPolicy,
}

impl SyncConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            record_name: RECORD_NAME.to_string(),
            lock_name: LOCK_NAME.to_string(),
            protected: LAUNCHER_FILES.iter().copied().chain([LOCK_NAME]).map(String::from).collect(),
            on_fetch_error: FailurePolicy::Abort,
            path_policy: PathPolicy::default(),
        }
    }

    pub fn record_path(&self) -> PathBuf {
        self.root.join(&self.record_name)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(&self.lock_name)
    }

    pub fn is_protected(&self, path: &str) -> bool {
        self.protected.contains(path)
    }

    /// The record and lock files this tool writes under the root. They are
    /// never fetched, whatever the target manifest says.
    pub fn is_run_state(&self, path: &str) -> bool {
        path == self.record_name || path == self.lock_name
    }
}

/// Client settings file, `patcher-config.json`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PatcherConfig {
    pub server_url: String,
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub game_exe: String,
    #[serde(default)]
    pub game_args: String,
}

impl Default for PatcherConfig {
    fn default() -> Self {
        Self {
            server_url: "http://example.com/patches".into(),
            server_name: "EverQuest Emulator Server".into(),
            game_exe: "eqgame.exe".into(),
            game_args: "patchme".into(),
        }
    }
}

impl PatcherConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        let cfg: PatcherConfig = serde_json::from_slice(&bytes)
            .map_err(|e| Error::parse(path.display().to_string(), e))?;
        if cfg.server_url.trim().is_empty() {
            return Err(Error::Validation(format!("{}: server_url is empty", path.display())));
        }
        Ok(cfg)
    }

    /// Load `path`; when it does not exist, write a default file and fail so
    /// the user edits it before the first run.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let body = serde_json::to_string_pretty(&Self::default())
            .map_err(|e| Error::parse("default config", e))?;
        std::fs::write(path, body).map_err(|e| Error::io(path, e))?;
        tracing::info!(path = %path.display(), "created default patcher config");
        Err(Error::Validation(format!(
            "created default {}; edit server_url before running again",
            path.display()
        )))
    }
}
