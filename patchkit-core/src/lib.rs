pub mod builder;
pub mod config;
pub mod error;
pub mod executor;
pub mod identity;
pub mod localize;
pub mod manifest;
pub mod path_safety;
pub mod progress;
pub mod reconcile;
pub mod store;
pub mod transport;

pub use error::{Error, ErrorKind, Result};

/// Prefix of in-flight download and manifest temp files.
pub const TEMP_PREFIX: &str = ".patchkit-tmp";
