use crate::error::{Error, Result};
use md5::{Digest, Md5};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

const READ_BUF: usize = 64 * 1024;

/// Content fingerprint of one file: byte length plus a 128-bit MD5 digest.
///
/// MD5 is used for staleness and corruption detection only, not for
/// adversarial integrity. The digest is what the manifest's `md5` field holds.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentIdentity {
    pub size: u64,
    pub hash: [u8; 16],
}

impl ContentIdentity {
    /// Stream `reader` through the hasher; memory use is independent of input size.
    pub fn compute<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut hasher = Md5::new();
        let mut buf = vec![0u8; READ_BUF];
        let mut size = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buf[..n]);
            size += n as u64;
        }
        Ok(Self { size, hash: digest_bytes(hasher) })
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Md5::new();
        hasher.update(data);
        Self { size: data.len() as u64, hash: digest_bytes(hasher) }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let f = File::open(path).map_err(|e| Error::io(path, e))?;
        Self::compute(f).map_err(|e| Error::io(path, e))
    }

    /// Lowercase hex digest, 32 characters.
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    /// Parse a hex digest as it appears in a manifest. Upper-case input is accepted.
    pub fn from_hex(size: u64, digest: &str) -> Option<Self> {
        if digest.len() != 32 {
            return None;
        }
        let mut hash = [0u8; 16];
        hex::decode_to_slice(digest, &mut hash).ok()?;
        Some(Self { size, hash })
    }

    /// Same content: size first, then digest.
    pub fn matches(&self, other: &ContentIdentity) -> bool {
        self.size == other.size && self.hash == other.hash
    }
}

impl fmt::Debug for ContentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentIdentity({} bytes, {})", self.size, self.hash_hex())
    }
}

impl fmt::Display for ContentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.hash_hex();
        write!(f, "{} ({} bytes)", &hex[..8], self.size)
    }
}

fn digest_bytes(hasher: Md5) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Writer adapter that fingerprints everything passing through it.
pub struct HashingWriter<W: Write> {
    inner: W,
    hasher: Md5,
    size: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, hasher: Md5::new(), size: 0 }
    }

    pub fn bytes_written(&self) -> u64 {
        self.size
    }

    pub fn finish(self) -> (W, ContentIdentity) {
        let id = ContentIdentity { size: self.size, hash: digest_bytes(self.hasher) };
        (self.inner, id)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
