use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Default)]
pub struct PathPolicy {
    pub follow_symlinks: bool,
}

/// Check that `rel` is a normalized manifest path: forward slashes, relative,
/// no empty, `.` or `..` segments, no drive prefix or backslash.
pub fn check_manifest_path(rel: &str) -> std::result::Result<(), String> {
    if rel.is_empty() {
        return Err("empty path".into());
    }
    if rel.starts_with('/') {
        return Err(format!("absolute paths are not allowed: {rel:?}"));
    }
    if rel.contains('\\') {
        return Err(format!("backslash in path: {rel:?}"));
    }
    if rel.contains('\0') {
        return Err(format!("NUL byte in path: {rel:?}"));
    }
    for seg in rel.split('/') {
        match seg {
            "" => return Err(format!("empty segment in path: {rel:?}")),
            "." => return Err(format!("`.` segment in path: {rel:?}")),
            ".." => return Err(format!("parent traversal not allowed: {rel:?}")),
            _ => {}
        }
        // `C:` style prefixes resolve outside the root on Windows.
        if seg.contains(':') {
            return Err(format!("drive or stream prefix in path: {rel:?}"));
        }
    }
    Ok(())
}

/// Map a checked manifest path onto the local filesystem under `root`.
pub fn join_under(root: &Path, rel: &str) -> PathBuf {
    let mut out = root.to_path_buf();
    for seg in rel.split('/') {
        out.push(seg);
    }
    out
}

/// Resolve manifest path `rel` under `root`, refusing anything that could land
/// outside it. Without `follow_symlinks`, any symlink on the way is an error;
/// with it, the deepest existing ancestor must canonicalize inside the root.
pub fn resolve(root: &Path, rel: &str, policy: PathPolicy) -> Result<PathBuf> {
    check_manifest_path(rel).map_err(|m| Error::parse("path", m))?;
    let candidate = join_under(root, rel);
    if !policy.follow_symlinks {
        // Also check every ancestor component below the root.
        let mut cur = root.to_path_buf();
        for seg in rel.split('/') {
            cur.push(seg);
            if let Ok(m) = std::fs::symlink_metadata(&cur) {
                if m.file_type().is_symlink() {
                    return Err(Error::Validation(format!(
                        "symlink in path (not following): {cur:?}"
                    )));
                }
            } else {
                break;
            }
        }
        Ok(candidate)
    } else {
        let root_can = std::fs::canonicalize(root).map_err(|e| Error::io(root, e))?;
        let mut probe = candidate.as_path();
        while std::fs::symlink_metadata(probe).is_err() {
            match probe.parent() {
                Some(p) => probe = p,
                None => break,
            }
        }
        let probe_can = std::fs::canonicalize(probe).map_err(|e| Error::io(probe, e))?;
        if !probe_can.starts_with(&root_can) {
            return Err(Error::Validation(format!("path escapes root: {rel:?}")));
        }
        Ok(candidate)
    }
}

/// Slash-normalized form of `path` relative to `root`, or `None` when it is not below it.
pub fn relativize(root: &Path, path: &Path) -> Option<String> {
    let rel = pathdiff::diff_paths(path, root)?;
    let mut parts = Vec::new();
    for comp in rel.components() {
        match comp {
            std::path::Component::Normal(s) => parts.push(s.to_str()?.to_string()),
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}
