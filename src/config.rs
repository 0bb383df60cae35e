//! Engine configuration
//!
//! Buffer pool sizing for query serving and scratch settings for index construction.

use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Alignment required by O_DIRECT reads
pub const DIRECT_IO_ALIGNMENT: usize = 4096;

/// Buffer pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferPoolConfig {
    /// Page size in bytes (unit of I/O and caching)
    pub page_size: usize,

    /// Number of pages in the pool
    ///
    /// Memory usage: page_size × num_pages
    /// - 64KB × 1024 = 64MB (default)
    pub num_pages: usize,

    /// Pages to prefetch after a miss (0 disables read-ahead, max 3)
    pub read_ahead_pages: usize,

    /// Capacity of the read-ahead instruction queue; instructions are dropped when full
    pub read_ahead_queue_capacity: usize,

    /// Open the backing file with O_DIRECT (falls back to buffered I/O if unsupported)
    pub direct_io: bool,

    /// How long a reader waits on a page being populated before re-checking (ms)
    pub populate_wait_ms: u64,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            page_size: 64 * 1024,
            num_pages: 1024,
            read_ahead_pages: 2,
            read_ahead_queue_capacity: 32,
            direct_io: false,
            populate_wait_ms: 10,
        }
    }
}

impl BufferPoolConfig {
    /// Small pool for tests
    pub fn for_testing() -> Self {
        Self {
            page_size: 4096,
            num_pages: 16,
            read_ahead_pages: 1,
            read_ahead_queue_capacity: 8,
            direct_io: false,
            populate_wait_ms: 5,
        }
    }

    /// Large pool with direct I/O for a query-serving process
    pub fn for_query_serving() -> Self {
        Self {
            page_size: 64 * 1024,
            num_pages: 8192, // 512MB
            read_ahead_pages: 3,
            read_ahead_queue_capacity: 128,
            direct_io: true,
            populate_wait_ms: 10,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.page_size % 8 != 0 {
            return Err(StorageError::InvalidArgument(format!(
                "page_size must be a non-zero multiple of 8, got {}",
                self.page_size
            )));
        }
        if self.direct_io && self.page_size % DIRECT_IO_ALIGNMENT != 0 {
            return Err(StorageError::InvalidArgument(format!(
                "page_size must be a multiple of {} with direct_io, got {}",
                DIRECT_IO_ALIGNMENT, self.page_size
            )));
        }
        if self.num_pages == 0 {
            return Err(StorageError::InvalidArgument("num_pages must be at least 1".into()));
        }
        if self.read_ahead_pages > 3 {
            return Err(StorageError::InvalidArgument(format!(
                "read_ahead_pages must be at most 3, got {}",
                self.read_ahead_pages
            )));
        }
        Ok(())
    }
}

/// Index construction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstructionConfig {
    /// Scratch directory for preindex files and checkpoints
    pub work_dir: PathBuf,

    /// Verify CRC32 of checkpoint files when reopening them
    pub verify_checksums: bool,

    /// Construct independent batches in parallel
    pub parallel_batches: bool,
}

impl Default for ConstructionConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("revdex-work"),
            verify_checksums: true,
            parallel_batches: true,
        }
    }
}

impl ConstructionConfig {
    pub fn with_work_dir<P: AsRef<Path>>(work_dir: P) -> Self {
        Self {
            work_dir: work_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexConfig {
    pub buffer_pool: BufferPoolConfig,
    pub construction: ConstructionConfig,
}

impl IndexConfig {
    pub fn for_testing<P: AsRef<Path>>(work_dir: P) -> Self {
        Self {
            buffer_pool: BufferPoolConfig::for_testing(),
            construction: ConstructionConfig::with_work_dir(work_dir),
        }
    }
}

/// Locations of a finalized index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPaths {
    /// Postings file (skip-list segments)
    pub documents: PathBuf,
    /// Word directory file
    pub words: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(documents: P, words: Q) -> Self {
        Self {
            documents: documents.as_ref().to_path_buf(),
            words: words.as_ref().to_path_buf(),
        }
    }

    /// Conventional file names inside `dir`
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self::new(dir.join("rev-docs.dat"), dir.join("rev-words.dat"))
    }

    pub fn exist(&self) -> bool {
        self.documents.exists() && self.words.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        assert!(BufferPoolConfig::default().validate().is_ok());
        assert!(BufferPoolConfig::for_testing().validate().is_ok());
        assert!(BufferPoolConfig::for_query_serving().validate().is_ok());
    }

    #[test]
    fn test_invalid_pool_configs() {
        let mut config = BufferPoolConfig::for_testing();
        config.page_size = 12;
        assert!(config.validate().is_err());

        let mut config = BufferPoolConfig::for_testing();
        config.direct_io = true;
        config.page_size = 1024;
        assert!(config.validate().is_err());

        let mut config = BufferPoolConfig::for_testing();
        config.num_pages = 0;
        assert!(config.validate().is_err());

        let mut config = BufferPoolConfig::for_testing();
        config.read_ahead_pages = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_index_paths_in_dir() {
        let paths = IndexPaths::in_dir("/data/index");
        assert_eq!(paths.documents, PathBuf::from("/data/index/rev-docs.dat"));
        assert_eq!(paths.words, PathBuf::from("/data/index/rev-words.dat"));
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = IndexConfig::for_testing("/tmp/work");
        let json = serde_json::to_string(&config).unwrap();
        let back: IndexConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.buffer_pool.page_size, 4096);
        assert_eq!(back.construction.work_dir, PathBuf::from("/tmp/work"));
    }
}
