//! Preindex word segments
//!
//! Two parallel word arrays: term ids in ascending order, and the number of
//! postings each term has. A term's postings start where the previous term's
//! end, so record offsets are the running sum of the counts.

use crate::storage::journal::JournalReader;
use crate::storage::LongArray;
use crate::{Result, StorageError};
use ahash::AHashMap;
use std::path::Path;

/// One term's range in the documents file, in records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordSegment {
    pub term_id: u64,
    pub start: usize,
    pub count: usize,
}

impl WordSegment {
    /// Word range inside the interleaved documents array
    pub fn word_range(&self) -> std::ops::Range<usize> {
        2 * self.start..2 * (self.start + self.count)
    }
}

pub struct PreindexWordSegments {
    word_ids: LongArray,
    counts: LongArray,
}

impl PreindexWordSegments {
    /// First construction pass: count postings per term
    pub fn construct(journal: &Path, word_ids_path: &Path, counts_path: &Path) -> Result<Self> {
        let mut counts: AHashMap<u64, u64> = AHashMap::new();
        for entry in JournalReader::open(journal)? {
            *counts.entry(entry?.term_id).or_insert(0) += 1;
        }

        let mut terms: Vec<(u64, u64)> = counts.into_iter().collect();
        terms.sort_unstable_by_key(|&(term_id, _)| term_id);

        let ids: Vec<u64> = terms.iter().map(|&(term_id, _)| term_id).collect();
        let mut segments = Self::create(word_ids_path, counts_path, &ids)?;
        for (idx, &(_, count)) in terms.iter().enumerate() {
            segments.counts.set(idx, count)?;
        }
        Ok(segments)
    }

    /// Segments for `term_ids` (ascending) with all counts zero
    pub fn create(word_ids_path: &Path, counts_path: &Path, term_ids: &[u64]) -> Result<Self> {
        let mut word_ids = LongArray::create(word_ids_path, term_ids.len())?;
        word_ids.copy_from(0, term_ids)?;
        let counts = LongArray::create(counts_path, term_ids.len())?;
        Ok(Self { word_ids, counts })
    }

    /// Reopen checkpointed arrays read-only
    pub fn open(word_ids_path: &Path, counts_path: &Path) -> Result<Self> {
        let word_ids = LongArray::open_read_only(word_ids_path)?;
        let counts = LongArray::open_read_only(counts_path)?;
        if word_ids.len() != counts.len() {
            return Err(StorageError::CorruptedFile(counts_path.to_path_buf()));
        }
        Ok(Self { word_ids, counts })
    }

    pub fn len(&self) -> usize {
        self.word_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.word_ids.is_empty()
    }

    pub fn word_ids(&self) -> &[u64] {
        self.word_ids.as_slice()
    }

    pub fn counts(&self) -> &[u64] {
        self.counts.as_slice()
    }

    pub fn set_counts(&mut self, counts: &[u64]) -> Result<()> {
        self.counts.copy_from(0, counts)
    }

    /// Sum of all counts
    pub fn total_records(&self) -> u64 {
        self.counts().iter().sum()
    }

    /// Segments in term order with their running record offsets
    pub fn iter(&self) -> WordSegmentIter<'_> {
        WordSegmentIter {
            word_ids: self.word_ids(),
            counts: self.counts(),
            idx: 0,
            start: 0,
        }
    }

    /// Segment of `term_id`, if present
    pub fn find(&self, term_id: u64) -> Option<WordSegment> {
        let idx = self.word_ids().binary_search(&term_id).ok()?;
        let start: u64 = self.counts()[..idx].iter().sum();
        Some(WordSegment {
            term_id,
            start: start as usize,
            count: self.counts()[idx] as usize,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.word_ids.flush()?;
        self.counts.flush()
    }
}

pub struct WordSegmentIter<'a> {
    word_ids: &'a [u64],
    counts: &'a [u64],
    idx: usize,
    start: usize,
}

impl Iterator for WordSegmentIter<'_> {
    type Item = WordSegment;

    fn next(&mut self) -> Option<WordSegment> {
        if self.idx >= self.word_ids.len() {
            return None;
        }
        let segment = WordSegment {
            term_id: self.word_ids[self.idx],
            start: self.start,
            count: self.counts[self.idx] as usize,
        };
        self.idx += 1;
        self.start += segment.count;
        Some(segment)
    }
}
