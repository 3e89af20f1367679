use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The manifest this tool last applied under a root. It lists only files the
/// tool itself placed, which is what makes obsolete-file deletion safe.
pub struct LocalManifestStore {
    path: PathBuf,
}

impl LocalManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_config(cfg: &SyncConfig) -> Self {
        Self::new(cfg.record_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when no record exists. A record that cannot be parsed or fails
    /// validation is also `None`: without a trustworthy basis nothing is deleted.
    pub fn load(&self) -> Result<Option<Manifest>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no local record");
                return Ok(None);
            }
            Err(e) => return Err(Error::io(&self.path, e)),
        };
        match Manifest::from_slice(&bytes, &self.path.display().to_string()) {
            Ok(m) => Ok(Some(m)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring unusable local record");
                Ok(None)
            }
        }
    }

    pub fn save(&self, manifest: &Manifest) -> Result<()> {
        manifest.save(&self.path)?;
        debug!(path = %self.path.display(), files = manifest.len(), "local record saved");
        Ok(())
    }
}
