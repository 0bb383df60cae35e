//! Preindex documents array
//!
//! Interleaved `(document_id, metadata)` records, grouped by term in the order
//! of the word segments and sorted by document id within each term.

use super::segments::{PreindexWordSegments, WordSegment};
use crate::index::doc_id::DocIdRewriter;
use crate::storage::journal::JournalReader;
use crate::storage::LongArray;
use crate::{Result, StorageError};
use ahash::AHashMap;
use std::path::Path;

pub struct PreindexDocuments {
    array: LongArray,
}

impl PreindexDocuments {
    /// Second construction pass: place every posting at its term's offset,
    /// then sort each term's range and drop duplicate documents.
    ///
    /// Updates `segments` if duplicates were dropped.
    pub fn construct(
        journal: &Path,
        segments: &mut PreindexWordSegments,
        rewriter: &dyn DocIdRewriter,
        path: &Path,
    ) -> Result<Self> {
        let total = segments.total_records() as usize;
        let mut array = LongArray::create(path, 2 * total)?;

        let mut cursors: AHashMap<u64, usize> = segments
            .iter()
            .map(|segment| (segment.term_id, segment.start))
            .collect();
        {
            let words = array.as_mut_slice()?;
            for entry in JournalReader::open(journal)? {
                let entry = entry?;
                let cursor = cursors.get_mut(&entry.term_id).ok_or_else(|| {
                    StorageError::Corruption(format!(
                        "term {} missing from the first pass over {}",
                        entry.term_id,
                        journal.display()
                    ))
                })?;
                words[2 * *cursor] = rewriter.rewrite(entry.document_id);
                words[2 * *cursor + 1] = entry.metadata;
                *cursor += 1;
            }
        }

        let mut documents = Self { array };
        documents.sort_segments(segments)?;
        Ok(documents)
    }

    /// Wrap an already-filled array
    pub fn from_array(array: LongArray) -> Self {
        Self { array }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            array: LongArray::open_read_only(path)?,
        })
    }

    fn sort_segments(&mut self, segments: &mut PreindexWordSegments) -> Result<()> {
        let counts = segments.counts().to_vec();
        let mut new_counts = counts.clone();
        let mut scratch: Vec<(u64, u64)> = Vec::new();
        let mut read = 0usize;
        let mut write = 0usize;
        {
            let words = self.array.as_mut_slice()?;
            for (idx, &count) in counts.iter().enumerate() {
                let count = count as usize;
                scratch.clear();
                scratch.extend(
                    words[2 * read..2 * (read + count)]
                        .chunks_exact(2)
                        .map(|r| (r[0], r[1])),
                );
                sort_postings(&mut scratch);

                for (i, &(doc, meta)) in scratch.iter().enumerate() {
                    words[2 * (write + i)] = doc;
                    words[2 * (write + i) + 1] = meta;
                }
                new_counts[idx] = scratch.len() as u64;
                read += count;
                write += scratch.len();
            }
        }

        if write < read {
            log::debug!("dropped {} duplicate postings", read - write);
            segments.set_counts(&new_counts)?;
            self.array.truncate(2 * write)?;
        }
        Ok(())
    }

    /// Total records
    pub fn len_records(&self) -> usize {
        self.array.len() / 2
    }

    pub fn words(&self) -> &[u64] {
        self.array.as_slice()
    }

    /// Interleaved records of one segment
    pub fn records(&self, segment: &WordSegment) -> &[u64] {
        &self.array.as_slice()[segment.word_range()]
    }

    pub fn flush(&self) -> Result<()> {
        self.array.flush()
    }
}

/// Sort by document id; duplicate documents collapse to the largest metadata
pub fn sort_postings(records: &mut Vec<(u64, u64)>) {
    records.sort_unstable_by_key(|&(doc, _)| doc);
    records.dedup_by(|later, kept| {
        if later.0 == kept.0 {
            kept.1 = kept.1.max(later.1);
            true
        } else {
            false
        }
    });
}
