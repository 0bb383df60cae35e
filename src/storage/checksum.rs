//! File checksums for construction checkpoints
//!
//! A preindex is only reusable after a restart if every file it consists of is
//! byte-for-byte what was flushed when its manifest was written. CRC32 over the
//! whole file is recorded in the manifest and compared on reopen.

use crc32fast::Hasher;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Read granularity for streaming file checksums
const CHECKSUM_CHUNK: usize = 1 << 20;

/// Whole-file CRC32
pub struct FileChecksum;

impl FileChecksum {
    /// CRC32 of a byte slice
    pub fn compute(data: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// CRC32 of a file's full contents, streamed in 1MB chunks
    pub fn compute_file(path: &Path) -> Result<u32, ChecksumError> {
        let mut file = File::open(path)?;
        let mut builder = ChecksumBuilder::new();
        let mut buf = vec![0u8; CHECKSUM_CHUNK];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            builder.update(&buf[..n]);
        }
        Ok(builder.finalize())
    }

    /// Compare a file against a recorded checksum
    pub fn verify_file(path: &Path, expected: u32) -> Result<(), ChecksumError> {
        let actual = Self::compute_file(path)?;
        if actual != expected {
            return Err(ChecksumError::Mismatch {
                path: path.to_path_buf(),
                expected,
                actual,
            });
        }
        Ok(())
    }
}

/// Incremental CRC32 (usable as an `io::Write` sink)
pub struct ChecksumBuilder {
    hasher: Hasher,
}

impl ChecksumBuilder {
    pub fn new() -> Self {
        Self { hasher: Hasher::new() }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

impl Default for ChecksumBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for ChecksumBuilder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    #[error("Checksum mismatch in {}: expected {expected:#010x}, got {actual:#010x}", path.display())]
    Mismatch {
        path: PathBuf,
        expected: u32,
        actual: u32,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ChecksumError> for crate::StorageError {
    fn from(err: ChecksumError) -> Self {
        match err {
            ChecksumError::Mismatch { path, .. } => crate::StorageError::CorruptedFile(path),
            ChecksumError::Io(e) => crate::StorageError::Io(e),
        }
    }
}
