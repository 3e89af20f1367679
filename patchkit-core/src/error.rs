use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("transport error for {path}: {message}")]
    Transport { path: String, message: String },

    #[error("parse error in {what}: {message}")]
    Parse { what: String, message: String },

    #[error("validation failed: {0}")]
    Validation(String),

    /// Downloaded bytes do not match the identity the manifest declares.
    #[error("content mismatch for {path}: expected {expected}, got {actual}")]
    Integrity {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("another run holds the lock at {0:?}")]
    Locked(PathBuf),

    #[error("run cancelled")]
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Transport,
    Parse,
    Validation,
    Integrity,
    Locked,
    Cancelled,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io { .. } => ErrorKind::Io,
            Error::Transport { .. } => ErrorKind::Transport,
            Error::Parse { .. } => ErrorKind::Parse,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Integrity { .. } => ErrorKind::Integrity,
            Error::Locked(_) => ErrorKind::Locked,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }

    pub(crate) fn parse(what: impl Into<String>, message: impl ToString) -> Self {
        Error::Parse { what: what.into(), message: message.to_string() }
    }

    pub(crate) fn transport(path: impl Into<String>, message: impl ToString) -> Self {
        Error::Transport { path: path.into(), message: message.to_string() }
    }
}
