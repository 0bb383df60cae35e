//! Word directory
//!
//! Maps a term id to the byte offset of its postings segment. The directory is a
//! single skip-list segment at the start of the words file with the term id as
//! key and the postings offset as value, so lookups reuse the postings cursor
//! and cost a handful of block reads regardless of vocabulary size.
//!
//! ## File Layout
//! ```text
//! [root block][block 1]...[block k]    one segment, keys = term ids (ascending)
//!                                      values = postings byte offsets
//! ```

use super::skiplist::{estimate_size, SkipListReader, SkipListWriter};
use crate::storage::{LongArray, LongSource};
use crate::{Result, StorageError};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Builds a words file in one pass
pub struct WordDirectoryWriter;

impl WordDirectoryWriter {
    /// Write interleaved `(term_id, offset)` pairs, sorted by term id, to `path`.
    ///
    /// Returns the number of entries written.
    pub fn write<P: AsRef<Path>>(path: P, entries: &[u64]) -> Result<u64> {
        let path = path.as_ref();
        if entries.len() % 2 != 0 {
            return Err(StorageError::InvalidArgument(format!(
                "directory entries must be (term, offset) pairs, got {} words",
                entries.len()
            )));
        }
        let count = entries.len() / 2;
        let size = estimate_size(0, count);

        let mut array = LongArray::create(path, (size / 8) as usize)?;
        SkipListWriter::new(array.as_mut_slice()?, 0).write_segment(entries)?;
        array.flush()?;

        log::debug!("wrote word directory {} with {} terms", path.display(), count);
        Ok(count as u64)
    }
}

/// Read-only word directory over a memory-mapped words file
pub struct WordDirectory {
    source: Arc<dyn LongSource>,
    path: PathBuf,
    len: u64,
}

impl WordDirectory {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(StorageError::FileNotFound(path));
        }
        let array = LongArray::open_read_only(&path)?;
        if array.len() < 2 {
            return Err(StorageError::CorruptedFile(path));
        }
        let source: Arc<dyn LongSource> = Arc::new(array);
        let len = SkipListReader::new(source.clone(), 0).estimate_size()?;
        Ok(Self { source, path, len })
    }

    /// Number of terms
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Postings offset of `term_id`, `None` if the term is not indexed
    pub fn find(&self, term_id: u64) -> Result<Option<u64>> {
        if self.is_empty() {
            return Ok(None);
        }
        let mut cursor = SkipListReader::new(self.source.clone(), 0);
        Ok(cursor.get_values(&[term_id])?.pop().flatten())
    }

    /// Offsets for ascending `term_ids`, in one forward pass
    pub fn find_sorted(&self, term_ids: &[u64]) -> Result<Vec<Option<u64>>> {
        if self.is_empty() {
            return Ok(vec![None; term_ids.len()]);
        }
        SkipListReader::new(self.source.clone(), 0).get_values(term_ids)
    }

    /// Every `(term_id, offset)` entry in term order
    pub fn entries(&self) -> Result<Vec<(u64, u64)>> {
        let mut out = Vec::with_capacity(self.len as usize);
        let mut cursor = SkipListReader::new(self.source.clone(), 0);
        while !cursor.is_at_end() {
            if cursor.read_entries(&mut out, 8192)? == 0 {
                break;
            }
        }
        Ok(out)
    }
}
