#![allow(dead_code)]

use patchkit_core::identity::ContentIdentity;
use patchkit_core::manifest::{Manifest, ManifestEntry};
use patchkit_core::reconcile::LocalState;
use patchkit_core::transport::Transport;
use patchkit_core::{Error, Result};
use std::cell::Cell;
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::Path;

pub fn entry(path: &str, body: &[u8]) -> ManifestEntry {
    ManifestEntry { path: path.to_string(), identity: ContentIdentity::from_bytes(body) }
}

pub fn manifest(files: &[(&str, &[u8])]) -> Manifest {
    let entries = files.iter().map(|(p, b)| entry(p, b)).collect();
    Manifest::new("1.0", None, entries).unwrap()
}

pub fn write_file(root: &Path, rel: &str, body: &[u8]) {
    let p = root.join(rel);
    if let Some(dir) = p.parent() {
        std::fs::create_dir_all(dir).unwrap();
    }
    std::fs::write(p, body).unwrap();
}

/// In-memory local tree. Paths in `broken` fail to stat; `hash_calls` counts
/// full fingerprint requests.
#[derive(Default)]
pub struct MemState {
    pub files: BTreeMap<String, Vec<u8>>,
    pub broken: HashSet<String>,
    pub hash_calls: Cell<usize>,
}

impl MemState {
    pub fn with(files: &[(&str, &[u8])]) -> Self {
        Self {
            files: files.iter().map(|(p, b)| (p.to_string(), b.to_vec())).collect(),
            ..Default::default()
        }
    }
}

impl LocalState for MemState {
    fn stat(&self, path: &str) -> Result<Option<u64>> {
        if self.broken.contains(path) {
            return Err(Error::Validation(format!("cannot stat {path}")));
        }
        Ok(self.files.get(path).map(|b| b.len() as u64))
    }

    fn identity(&self, path: &str) -> Result<ContentIdentity> {
        self.hash_calls.set(self.hash_calls.get() + 1);
        let body = self
            .files
            .get(path)
            .ok_or_else(|| Error::Validation(format!("gone: {path}")))?;
        Ok(ContentIdentity::from_bytes(body))
    }
}

/// Serves bodies from memory. `fail` paths error before writing anything,
/// `cut` paths write half the body and then error, `lie` paths serve
/// different bytes than the manifest declares.
#[derive(Default)]
pub struct MemTransport {
    pub files: BTreeMap<String, Vec<u8>>,
    pub fail: HashSet<String>,
    pub cut: HashSet<String>,
    pub lie: HashSet<String>,
    pub requests: std::cell::RefCell<Vec<String>>,
}

impl MemTransport {
    pub fn with(files: &[(&str, &[u8])]) -> Self {
        Self {
            files: files.iter().map(|(p, b)| (p.to_string(), b.to_vec())).collect(),
            ..Default::default()
        }
    }

    pub fn manifest(&self) -> Manifest {
        let entries = self
            .files
            .iter()
            .map(|(p, b)| ManifestEntry { path: p.clone(), identity: ContentIdentity::from_bytes(b) })
            .collect();
        Manifest::new("1.0", None, entries).unwrap()
    }
}

impl Transport for MemTransport {
    fn describe(&self) -> String {
        "memory".into()
    }

    fn fetch_manifest(&self) -> Result<Manifest> {
        Ok(self.manifest())
    }

    fn fetch_file(&self, path: &str, sink: &mut dyn Write) -> Result<u64> {
        self.requests.borrow_mut().push(path.to_string());
        if self.fail.contains(path) {
            return Err(Error::Transport { path: path.into(), message: "connection refused".into() });
        }
        let body = self
            .files
            .get(path)
            .ok_or_else(|| Error::Transport { path: path.into(), message: "404".into() })?;
        if self.cut.contains(path) {
            let half = &body[..body.len() / 2];
            sink.write_all(half).unwrap();
            return Err(Error::Transport { path: path.into(), message: "connection reset".into() });
        }
        let served: Vec<u8> = if self.lie.contains(path) {
            body.iter().map(|b| b.wrapping_add(1)).collect()
        } else {
            body.clone()
        };
        sink.write_all(&served).unwrap();
        Ok(served.len() as u64)
    }
}
