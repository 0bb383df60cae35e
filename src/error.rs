//! Error types for the reverse-index engine

use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Data corruption: {0}")]
    Corruption(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Corrupted file: {0}")]
    CorruptedFile(PathBuf),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The caller's scheduling budget ran out before the work could be issued.
    /// Distinct from a lookup that completes and finds nothing.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Internal state machine violated (fatal)
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Lower-level failure during index construction, with phase and file context
    #[error("{phase} failed on {}: {source}", path.display())]
    Construction {
        phase: &'static str,
        path: PathBuf,
        #[source]
        source: Box<StorageError>,
    },
}

impl StorageError {
    /// True if this is (or wraps) a timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            StorageError::Timeout(_) => true,
            StorageError::Construction { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Adds construction-phase context to a failure.
pub trait ResultExt<T> {
    fn with_phase(self, phase: &'static str, path: &Path) -> Result<T>;
}

impl<T, E: Into<StorageError>> ResultExt<T> for std::result::Result<T, E> {
    fn with_phase(self, phase: &'static str, path: &Path) -> Result<T> {
        self.map_err(|err| StorageError::Construction {
            phase,
            path: path.to_path_buf(),
            source: Box::new(err.into()),
        })
    }
}
