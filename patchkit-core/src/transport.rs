use crate::config::MANIFEST_NAME;
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::path_safety::{resolve, PathPolicy};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Where target manifests and file bodies come from. Timeouts and retries
/// belong to the implementation; the executor sees an ordinary failure.
pub trait Transport {
    fn describe(&self) -> String;

    fn fetch_manifest(&self) -> Result<Manifest>;

    /// Stream the body of `path` into `sink`, returning the byte count.
    fn fetch_file(&self, path: &str, sink: &mut dyn Write) -> Result<u64>;
}

/// Pick a transport for `location`: `http(s)://` goes over HTTP, anything
/// else (optionally `file://`) is a local mirror directory.
pub fn open(location: &str, timeout: Duration) -> Box<dyn Transport> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Box::new(HttpTransport::new(location, timeout))
    } else {
        let dir = location.strip_prefix("file://").unwrap_or(location);
        Box::new(DirTransport::new(dir))
    }
}

pub struct HttpTransport {
    base: String,
    manifest_name: String,
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new(base: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .user_agent(concat!("patchkit/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            base: base.trim_end_matches('/').to_string(),
            manifest_name: MANIFEST_NAME.to_string(),
            agent,
        }
    }

    pub fn url_for(&self, path: &str) -> String {
        let encoded: Vec<String> = path.split('/').map(encode_segment).collect();
        format!("{}/{}", self.base, encoded.join("/"))
    }

    fn get(&self, path: &str) -> Result<ureq::Response> {
        let url = self.url_for(path);
        debug!(%url, "GET");
        self.agent.get(&url).call().map_err(|e| match e {
            ureq::Error::Status(code, _) => {
                Error::transport(path, format!("server returned status {code}"))
            }
            ureq::Error::Transport(t) => Error::transport(path, t),
        })
    }
}

impl Transport for HttpTransport {
    fn describe(&self) -> String {
        self.base.clone()
    }

    fn fetch_manifest(&self) -> Result<Manifest> {
        let resp = self.get(&self.manifest_name)?;
        let mut body = Vec::new();
        resp.into_reader()
            .read_to_end(&mut body)
            .map_err(|e| Error::transport(&self.manifest_name, e))?;
        Manifest::from_slice(&body, &self.url_for(&self.manifest_name))
    }

    fn fetch_file(&self, path: &str, sink: &mut dyn Write) -> Result<u64> {
        let resp = self.get(path)?;
        copy_body(path, resp.into_reader(), sink)
    }
}

/// Serves files from a directory laid out like the patch server.
pub struct DirTransport {
    dir: PathBuf,
    manifest_name: String,
}

impl DirTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), manifest_name: MANIFEST_NAME.to_string() }
    }
}

impl Transport for DirTransport {
    fn describe(&self) -> String {
        self.dir.display().to_string()
    }

    fn fetch_manifest(&self) -> Result<Manifest> {
        let path = self.dir.join(&self.manifest_name);
        let bytes = std::fs::read(&path)
            .map_err(|e| Error::transport(path.display().to_string(), e))?;
        Manifest::from_slice(&bytes, &path.display().to_string())
    }

    fn fetch_file(&self, path: &str, sink: &mut dyn Write) -> Result<u64> {
        let abs = resolve(&self.dir, path, PathPolicy::default())?;
        let f = File::open(&abs).map_err(|e| Error::transport(path, e))?;
        copy_body(path, f, sink)
    }
}

fn copy_body(path: &str, mut body: impl Read, sink: &mut dyn Write) -> Result<u64> {
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = match body.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::transport(path, e)),
        };
        sink.write_all(&buf[..n]).map_err(|e| Error::io(path, e))?;
        total += n as u64;
    }
    Ok(total)
}

fn encode_segment(seg: &str) -> String {
    let mut out = String::with_capacity(seg.len());
    for b in seg.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}
