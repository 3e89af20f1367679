use crate::error::{Error, Result};
use crate::identity::ContentIdentity;
use crate::path_safety::check_manifest_path;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

pub const MANIFEST_VERSION: &str = "1.0";

/// On-disk / on-wire JSON shape.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ManifestFile {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<String>,
    #[serde(default)]
    pub files: Vec<FileRecord>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FileRecord {
    pub path: String,
    pub md5: String,
    pub size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub path: String,
    pub identity: ContentIdentity,
}

/// A validated snapshot of a file tree. Paths are unique, normalized and
/// contained; construction fails otherwise, so a `Manifest` is always safe to act on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    pub version: String,
    pub generated_at: Option<DateTime<Utc>>,
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(
        version: impl Into<String>,
        generated_at: Option<DateTime<Utc>>,
        entries: Vec<ManifestEntry>,
    ) -> Result<Self> {
        let mut seen = HashSet::with_capacity(entries.len());
        for e in &entries {
            check_manifest_path(&e.path).map_err(|m| Error::parse("manifest entry", m))?;
            if !seen.insert(e.path.as_str()) {
                return Err(Error::Validation(format!("duplicate path in manifest: {}", e.path)));
            }
        }
        Ok(Self { version: version.into(), generated_at, entries })
    }

    pub fn empty() -> Self {
        Self { version: MANIFEST_VERSION.to_string(), generated_at: None, entries: Vec::new() }
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Entries directly or transitively under `folder`; `""` selects top-level files only.
    pub fn files_in_folder(&self, folder: &str) -> Vec<&ManifestEntry> {
        let folder = folder.trim_end_matches('/');
        if folder.is_empty() {
            return self.entries.iter().filter(|e| !e.path.contains('/')).collect();
        }
        let prefix = format!("{folder}/");
        self.entries.iter().filter(|e| e.path.starts_with(&prefix)).collect()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.identity.size).sum()
    }

    pub fn summary(&self) -> ManifestSummary {
        let mut by_folder = BTreeMap::new();
        for e in &self.entries {
            let folder = match e.path.split_once('/') {
                Some((top, _)) => top.to_string(),
                None => "Root".to_string(),
            };
            *by_folder.entry(folder).or_insert(0usize) += 1;
        }
        ManifestSummary {
            version: self.version.clone(),
            generated_at: self.generated_at,
            total_files: self.entries.len(),
            total_bytes: self.total_bytes(),
            by_folder,
        }
    }

    /// Validate the wire form. One bad entry rejects the whole manifest.
    pub fn from_file_format(raw: ManifestFile) -> Result<Self> {
        let generated_at = match raw.generated.as_deref() {
            None | Some("") => None,
            Some(s) => Some(
                DateTime::parse_from_rfc3339(s)
                    .map_err(|e| Error::parse("generated", format!("{s:?}: {e}")))?
                    .with_timezone(&Utc),
            ),
        };
        let mut entries = Vec::with_capacity(raw.files.len());
        for rec in raw.files {
            check_manifest_path(&rec.path).map_err(|m| Error::parse("manifest entry", m))?;
            let identity = ContentIdentity::from_hex(rec.size, &rec.md5).ok_or_else(|| {
                Error::parse("manifest entry", format!("bad md5 {:?} for {}", rec.md5, rec.path))
            })?;
            entries.push(ManifestEntry { path: rec.path, identity });
        }
        Self::new(raw.version, generated_at, entries)
    }

    pub fn to_file_format(&self) -> ManifestFile {
        ManifestFile {
            version: self.version.clone(),
            generated: self.generated_at.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)),
            files: self
                .entries
                .iter()
                .map(|e| FileRecord {
                    path: e.path.clone(),
                    md5: e.identity.hash_hex(),
                    size: e.identity.size,
                })
                .collect(),
        }
    }

    pub fn from_slice(bytes: &[u8], what: &str) -> Result<Self> {
        let raw: ManifestFile = serde_json::from_slice(bytes).map_err(|e| Error::parse(what, e))?;
        Self::from_file_format(raw)
    }

    pub fn from_reader<R: Read>(reader: R, what: &str) -> Result<Self> {
        let raw: ManifestFile =
            serde_json::from_reader(reader).map_err(|e| Error::parse(what, e))?;
        Self::from_file_format(raw)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        Self::from_slice(&bytes, &path.display().to_string())
    }

    pub fn to_json_pretty(&self) -> String {
        // Plain strings and integers only; serialization cannot fail.
        serde_json::to_string_pretty(&self.to_file_format()).unwrap_or_default()
    }

    /// Write via a sibling temp file and rename, so readers never see half a manifest.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(crate::TEMP_PREFIX)
            .tempfile_in(dir)
            .map_err(|e| Error::io(dir, e))?;
        tmp.write_all(self.to_json_pretty().as_bytes()).map_err(|e| Error::io(tmp.path(), e))?;
        tmp.as_file().sync_all().map_err(|e| Error::io(tmp.path(), e))?;
        tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct ManifestSummary {
    pub version: String,
    pub generated_at: Option<DateTime<Utc>>,
    pub total_files: usize,
    pub total_bytes: u64,
    pub by_folder: BTreeMap<String, usize>,
}

impl fmt::Display for ManifestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Manifest Version: {}", self.version)?;
        if let Some(t) = self.generated_at {
            writeln!(f, "Generated: {}", t.to_rfc3339_opts(SecondsFormat::Secs, true))?;
        }
        writeln!(f, "Total Files: {}", self.total_files)?;
        writeln!(f, "Total Size: {}", format_size(self.total_bytes))?;
        writeln!(f)?;
        writeln!(f, "Files by Folder:")?;
        for (folder, count) in &self.by_folder {
            writeln!(f, "  {folder}: {count} files")?;
        }
        Ok(())
    }
}

pub fn format_size(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0usize;
    let mut n = bytes / UNIT;
    while n >= UNIT && exp < 4 {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.1} {}iB", bytes as f64 / div as f64, ["K", "M", "G", "T", "P"][exp])
}
