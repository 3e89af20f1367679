use crate::config::{BuilderConfig, BUILD_DENYLIST};
use crate::error::{Error, Result};
use crate::identity::ContentIdentity;
use crate::manifest::{Manifest, ManifestEntry};
use crate::path_safety::{check_manifest_path, relativize};
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildWarning {
    pub path: String,
    pub message: String,
}

#[derive(Debug)]
pub struct BuildReport {
    pub manifest: Manifest,
    pub manifest_path: PathBuf,
    pub warnings: Vec<BuildWarning>,
}

pub struct ManifestBuilder {
    cfg: BuilderConfig,
    exclude: GlobSet,
}

impl ManifestBuilder {
    pub fn new(cfg: BuilderConfig) -> Result<Self> {
        let mut gb = GlobSetBuilder::new();
        for g in &cfg.exclude {
            let glob = Glob::new(g)
                .map_err(|e| Error::Validation(format!("bad exclude pattern {g:?}: {e}")))?;
            gb.add(glob);
        }
        let exclude =
            gb.build().map_err(|e| Error::Validation(format!("exclude patterns: {e}")))?;
        Ok(Self { cfg, exclude })
    }

    fn is_excluded(&self, rel: &str) -> bool {
        let base = rel.rsplit('/').next().unwrap_or(rel);
        BUILD_DENYLIST.contains(&base)
            || base == self.cfg.manifest_name
            || base.starts_with(crate::TEMP_PREFIX)
            || self.exclude.is_match(rel)
    }

    /// Walk `root` and fingerprint every regular file. Unreadable files are
    /// skipped and reported; the result is sorted by path.
    pub fn scan(&self, root: &Path) -> Result<(Manifest, Vec<BuildWarning>)> {
        let md = std::fs::metadata(root).map_err(|e| Error::io(root, e))?;
        if !md.is_dir() {
            return Err(Error::Validation(format!("not a directory: {}", root.display())));
        }

        let mut warnings = Vec::new();
        let mut files: Vec<(String, PathBuf)> = Vec::new();
        for ent in walkdir::WalkDir::new(root).min_depth(1) {
            let ent = match ent {
                Ok(e) => e,
                Err(e) => {
                    let path = e
                        .path()
                        .and_then(|p| relativize(root, p))
                        .unwrap_or_else(|| "<unknown>".to_string());
                    warn!(%path, error = %e, "skipping unreadable entry");
                    warnings.push(BuildWarning { path, message: e.to_string() });
                    continue;
                }
            };
            if !ent.file_type().is_file() {
                continue;
            }
            let Some(rel) = relativize(root, ent.path()) else {
                let path = ent.path().display().to_string();
                warn!(%path, "skipping path that is not valid UTF-8");
                warnings.push(BuildWarning { path, message: "path is not valid UTF-8".into() });
                continue;
            };
            if self.is_excluded(&rel) {
                debug!(path = %rel, "excluded");
                continue;
            }
            if let Err(message) = check_manifest_path(&rel) {
                warn!(path = %rel, %message, "skipping file with a name clients cannot use");
                warnings.push(BuildWarning { path: rel, message });
                continue;
            }
            files.push((rel, ent.path().to_path_buf()));
        }

        let hashed: Vec<std::result::Result<ManifestEntry, BuildWarning>> = files
            .into_par_iter()
            .map(|(rel, abs)| match ContentIdentity::from_file(&abs) {
                Ok(identity) => Ok(ManifestEntry { path: rel, identity }),
                Err(e) => Err(BuildWarning { path: rel, message: e.to_string() }),
            })
            .collect();

        let mut entries = Vec::with_capacity(hashed.len());
        for h in hashed {
            match h {
                Ok(entry) => {
                    debug!(path = %entry.path, identity = %entry.identity, "added");
                    entries.push(entry);
                }
                Err(w) => {
                    warn!(path = %w.path, error = %w.message, "could not hash, skipping");
                    warnings.push(w);
                }
            }
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        let generated_at = if self.cfg.stamp_time { Some(chrono::Utc::now()) } else { None };
        let manifest = Manifest::new(self.cfg.version.clone(), generated_at, entries)?;
        Ok((manifest, warnings))
    }

    /// Scan and write the result as `<root>/<manifest_name>`, replacing any previous one.
    pub fn build(&self, root: &Path) -> Result<BuildReport> {
        let (manifest, warnings) = self.scan(root)?;
        let manifest_path = root.join(&self.cfg.manifest_name);
        manifest.save(&manifest_path)?;
        info!(
            path = %manifest_path.display(),
            files = manifest.len(),
            warnings = warnings.len(),
            "manifest written"
        );
        Ok(BuildReport { manifest, manifest_path, warnings })
    }
}
