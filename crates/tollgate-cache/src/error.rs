use std::path::PathBuf;

use thiserror::Error;

use crate::path::ConfigKind;

/// Errors applying a change to the cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("unrecognized config path: {0}")]
    UnknownPath(String),

    #[error("malformed {kind} payload for key '{key}': {source}")]
    Malformed {
        kind: ConfigKind,
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from a coordination store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation failed: {0}")]
    Backend(String),
}

/// Errors loading or publishing a configuration snapshot file.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse snapshot: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid snapshot: {0}")]
    Invalid(String),

    #[error("failed to encode node: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to watch snapshot file: {0}")]
    Watch(#[from] notify::Error),
}
