//! Reverse index reader
//!
//! Query-time entry point over one finalized index. Term lookups go through
//! the word directory (memory-mapped), postings reads through the buffer pool.
//! An index whose files are missing opens in an empty state, so query serving
//! stays up while an index is being (re)built.

use super::btree::WordDirectory;
use super::query::{
    EmptyEntrySource, EntrySource, PostingsEntrySource, QueryFilterLetThrough, QueryFilterNoPass,
    QueryFilterStep, RejectFilter, RetainFilter, SearchBudget,
};
use super::skiplist::SkipListReader;
use crate::cache::{BufferPool, BufferPoolStats};
use crate::config::{BufferPoolConfig, IndexPaths};
use crate::storage::LongSource;
use crate::{Result, StorageError};
use std::sync::Arc;

/// Metadata of one term for a list of documents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermMetadata {
    pub term_id: u64,
    /// Aligned with the requested documents; `None` where the term is absent
    pub values: Vec<Option<u64>>,
}

struct OpenIndex {
    directory: WordDirectory,
    pool: Arc<BufferPool>,
    source: Arc<dyn LongSource>,
}

pub struct ReverseIndexReader {
    paths: IndexPaths,
    index: Option<OpenIndex>,
}

impl ReverseIndexReader {
    /// Open the index at `paths`; missing files yield an empty reader
    pub fn open(paths: &IndexPaths, config: &BufferPoolConfig) -> Result<Self> {
        if !paths.exist() {
            log::warn!(
                "index files {} / {} not found, serving an empty index",
                paths.documents.display(),
                paths.words.display()
            );
            return Ok(Self::empty(paths));
        }

        let directory = match WordDirectory::open(&paths.words) {
            Ok(directory) => directory,
            Err(StorageError::FileNotFound(path)) => {
                log::warn!("{} vanished during open, serving an empty index", path.display());
                return Ok(Self::empty(paths));
            }
            Err(e) => return Err(e),
        };
        let pool = match BufferPool::open(&paths.documents, config) {
            Ok(pool) => Arc::new(pool),
            Err(StorageError::FileNotFound(path)) => {
                log::warn!("{} vanished during open, serving an empty index", path.display());
                return Ok(Self::empty(paths));
            }
            Err(e) => return Err(e),
        };
        let source: Arc<dyn LongSource> = pool.clone();

        log::info!(
            "opened reverse index {} with {} terms",
            paths.documents.display(),
            directory.len()
        );
        Ok(Self {
            paths: paths.clone(),
            index: Some(OpenIndex {
                directory,
                pool,
                source,
            }),
        })
    }

    fn empty(paths: &IndexPaths) -> Self {
        Self {
            paths: paths.clone(),
            index: None,
        }
    }

    pub fn paths(&self) -> &IndexPaths {
        &self.paths
    }

    /// True when serving without index files
    pub fn is_empty_index(&self) -> bool {
        self.index.is_none()
    }

    /// Number of indexed terms
    pub fn num_terms(&self) -> u64 {
        self.index.as_ref().map_or(0, |index| index.directory.len())
    }

    fn offset_of(&self, term_id: u64) -> Result<Option<(&OpenIndex, u64)>> {
        let Some(index) = &self.index else {
            return Ok(None);
        };
        Ok(index.directory.find(term_id)?.map(|offset| (index, offset)))
    }

    /// Documents containing `term_id`, 0 if absent
    pub fn num_documents(&self, term_id: u64) -> Result<u64> {
        match self.offset_of(term_id)? {
            Some((index, offset)) => SkipListReader::new(index.source.clone(), offset).estimate_size(),
            None => Ok(0),
        }
    }

    /// Ascending cursor over the documents containing `term_id`
    pub fn documents(&self, term_id: u64) -> Result<Box<dyn EntrySource>> {
        Ok(match self.offset_of(term_id)? {
            Some((index, offset)) => Box::new(PostingsEntrySource::new(
                index.source.clone(),
                offset,
                term_id,
            )),
            None => Box::new(EmptyEntrySource),
        })
    }

    /// Filter keeping documents that contain `term_id`
    pub fn also(&self, term_id: u64) -> Result<Box<dyn QueryFilterStep>> {
        Ok(match self.offset_of(term_id)? {
            Some((index, offset)) => {
                let size = SkipListReader::new(index.source.clone(), offset).estimate_size()?;
                Box::new(RetainFilter::new(index.source.clone(), offset, term_id, size))
            }
            None => Box::new(QueryFilterNoPass),
        })
    }

    /// Filter dropping documents that contain `term_id`
    pub fn not(&self, term_id: u64) -> Result<Box<dyn QueryFilterStep>> {
        Ok(match self.offset_of(term_id)? {
            Some((index, offset)) => {
                let size = SkipListReader::new(index.source.clone(), offset).estimate_size()?;
                Box::new(RejectFilter::new(index.source.clone(), offset, term_id, size))
            }
            None => Box::new(QueryFilterLetThrough),
        })
    }

    /// Metadata of each term for each of `doc_ids`.
    ///
    /// All directory lookups are resolved first; if `budget` has run out by
    /// then, nothing is read and `StorageError::Timeout` is returned. The
    /// postings reads themselves run in offset order and are not cut short.
    pub fn get_term_metadata(
        &self,
        term_ids: &[u64],
        doc_ids: &[u64],
        budget: &SearchBudget,
    ) -> Result<Vec<TermMetadata>> {
        let Some(index) = &self.index else {
            return Ok(term_ids
                .iter()
                .map(|&term_id| TermMetadata {
                    term_id,
                    values: vec![None; doc_ids.len()],
                })
                .collect());
        };

        let mut by_term: Vec<(usize, u64)> = term_ids.iter().copied().enumerate().collect();
        by_term.sort_unstable_by_key(|&(_, term_id)| term_id);
        let sorted_terms: Vec<u64> = by_term.iter().map(|&(_, t)| t).collect();
        let offsets = index.directory.find_sorted(&sorted_terms)?;

        if !budget.has_time_left() {
            return Err(StorageError::Timeout(format!(
                "metadata lookup for {} terms could not be scheduled within budget",
                term_ids.len()
            )));
        }

        // Documents in ascending order for the forward-only cursor
        let mut docs: Vec<(usize, u64)> = doc_ids.iter().copied().enumerate().collect();
        docs.sort_unstable_by_key(|&(_, doc)| doc);
        let sorted_docs: Vec<u64> = docs.iter().map(|&(_, d)| d).collect();

        let mut reads: Vec<(u64, usize)> = offsets
            .iter()
            .zip(&by_term)
            .filter_map(|(offset, &(slot, _))| offset.map(|o| (o, slot)))
            .collect();
        reads.sort_unstable();

        let mut results: Vec<TermMetadata> = term_ids
            .iter()
            .map(|&term_id| TermMetadata {
                term_id,
                values: vec![None; doc_ids.len()],
            })
            .collect();
        for (offset, slot) in reads {
            let values = SkipListReader::new(index.source.clone(), offset).get_values(&sorted_docs)?;
            for (&(original, _), value) in docs.iter().zip(values) {
                results[slot].values[original] = value;
            }
        }
        Ok(results)
    }

    /// Buffer pool counters; `None` for an empty reader
    pub fn pool_stats(&self) -> Option<BufferPoolStats> {
        self.index.as_ref().map(|index| index.pool.stats())
    }

    /// Release the index files
    pub fn close(self) {
        if let Some(index) = &self.index {
            index.pool.shutdown();
        }
    }
}
