//! Query-side cursors and filter steps
//!
//! The query layer evaluates a multi-term query by enumerating the postings of
//! one term into a `LongQueryBuffer` and then narrowing the buffer with one
//! filter step per remaining term. Filter steps never reorder the buffer.

use super::skiplist::SkipListReader;
use crate::storage::LongSource;
use crate::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Document ids read per `EntrySource::read` call
pub const ENTRY_SOURCE_BATCH: usize = 4096;

/// Ascending candidate document ids
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LongQueryBuffer {
    data: Vec<u64>,
}

impl LongQueryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap ids that are already ascending and duplicate-free
    pub fn from_sorted(data: Vec<u64>) -> Self {
        debug_assert!(data.windows(2).all(|w| w[0] < w[1]));
        Self { data }
    }

    pub fn data(&self) -> &[u64] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Keep only ids for which `pred` holds, preserving order
    pub fn retain_where<F: FnMut(u64) -> bool>(&mut self, mut pred: F) {
        self.data.retain(|&id| pred(id));
    }

    pub fn into_vec(self) -> Vec<u64> {
        self.data
    }

    pub(crate) fn vec_mut(&mut self) -> &mut Vec<u64> {
        &mut self.data
    }
}

/// Forward cursor over the documents of one term
pub trait EntrySource: Send {
    /// Replace the buffer contents with the next batch of ids
    fn read(&mut self, buffer: &mut LongQueryBuffer) -> Result<()>;

    fn has_more(&self) -> bool;

    /// Name for query explain output
    fn index_name(&self) -> &str;
}

/// Step narrowing a candidate buffer
pub trait QueryFilterStep: Send + Sync {
    fn apply(&self, buffer: &mut LongQueryBuffer) -> Result<()>;

    /// Relative cost, used to order steps (cheapest first)
    fn cost(&self) -> f64;

    fn describe(&self) -> String;
}

/// Enumerates one term's postings segment
pub struct PostingsEntrySource {
    reader: SkipListReader,
    name: String,
    exhausted: bool,
}

impl PostingsEntrySource {
    pub fn new(source: Arc<dyn LongSource>, offset: u64, term_id: u64) -> Self {
        Self {
            reader: SkipListReader::new(source, offset),
            name: format!("postings:{}", term_id),
            exhausted: false,
        }
    }
}

impl EntrySource for PostingsEntrySource {
    fn read(&mut self, buffer: &mut LongQueryBuffer) -> Result<()> {
        buffer.clear();
        if self.exhausted {
            return Ok(());
        }
        let read = self.reader.read_keys(buffer.vec_mut(), ENTRY_SOURCE_BATCH)?;
        if read < ENTRY_SOURCE_BATCH || self.reader.is_at_end() {
            self.exhausted = true;
        }
        Ok(())
    }

    fn has_more(&self) -> bool {
        !self.exhausted
    }

    fn index_name(&self) -> &str {
        &self.name
    }
}

/// Source for a term with no postings (or an index with no files)
pub struct EmptyEntrySource;

impl EntrySource for EmptyEntrySource {
    fn read(&mut self, buffer: &mut LongQueryBuffer) -> Result<()> {
        buffer.clear();
        Ok(())
    }

    fn has_more(&self) -> bool {
        false
    }

    fn index_name(&self) -> &str {
        "empty"
    }
}

/// Keep candidates present in a term's postings ("also")
pub struct RetainFilter {
    source: Arc<dyn LongSource>,
    offset: u64,
    term_id: u64,
    size: u64,
}

impl RetainFilter {
    pub fn new(source: Arc<dyn LongSource>, offset: u64, term_id: u64, size: u64) -> Self {
        Self { source, offset, term_id, size }
    }
}

impl QueryFilterStep for RetainFilter {
    fn apply(&self, buffer: &mut LongQueryBuffer) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        SkipListReader::new(self.source.clone(), self.offset).retain_present(buffer.vec_mut())
    }

    fn cost(&self) -> f64 {
        self.size as f64
    }

    fn describe(&self) -> String {
        format!("retain({}, size={})", self.term_id, self.size)
    }
}

/// Drop candidates present in a term's postings ("not")
pub struct RejectFilter {
    source: Arc<dyn LongSource>,
    offset: u64,
    term_id: u64,
    size: u64,
}

impl RejectFilter {
    pub fn new(source: Arc<dyn LongSource>, offset: u64, term_id: u64, size: u64) -> Self {
        Self { source, offset, term_id, size }
    }
}

impl QueryFilterStep for RejectFilter {
    fn apply(&self, buffer: &mut LongQueryBuffer) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        SkipListReader::new(self.source.clone(), self.offset).reject_present(buffer.vec_mut())
    }

    fn cost(&self) -> f64 {
        self.size as f64
    }

    fn describe(&self) -> String {
        format!("reject({}, size={})", self.term_id, self.size)
    }
}

/// "also" on an absent term: nothing can match
pub struct QueryFilterNoPass;

impl QueryFilterStep for QueryFilterNoPass {
    fn apply(&self, buffer: &mut LongQueryBuffer) -> Result<()> {
        buffer.clear();
        Ok(())
    }

    fn cost(&self) -> f64 {
        0.0
    }

    fn describe(&self) -> String {
        "no-pass".to_string()
    }
}

/// "not" on an absent term: everything passes
pub struct QueryFilterLetThrough;

impl QueryFilterStep for QueryFilterLetThrough {
    fn apply(&self, _buffer: &mut LongQueryBuffer) -> Result<()> {
        Ok(())
    }

    fn cost(&self) -> f64 {
        0.0
    }

    fn describe(&self) -> String {
        "let-through".to_string()
    }
}

/// Soft scheduling deadline for bulk lookups
#[derive(Debug, Clone, Copy)]
pub struct SearchBudget {
    deadline: Instant,
}

impl SearchBudget {
    pub fn new(budget: Duration) -> Self {
        Self {
            deadline: Instant::now() + budget,
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    /// Budget that cannot run out in practice
    pub fn unlimited() -> Self {
        Self::new(Duration::from_secs(60 * 60 * 24 * 365))
    }

    pub fn has_time_left(&self) -> bool {
        Instant::now() < self.deadline
    }

    pub fn time_left(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::skiplist::{estimate_size, SkipListWriter};
    use crate::storage::LongArray;

    fn segment(keys: &[u64]) -> Arc<dyn LongSource> {
        let records: Vec<u64> = keys.iter().flat_map(|&k| [k, 0]).collect();
        let mut out = vec![0u64; (estimate_size(0, keys.len()) / 8) as usize];
        SkipListWriter::new(&mut out, 0).write_segment(&records).unwrap();
        Arc::new(LongArray::from_vec(out))
    }

    #[test]
    fn test_entry_source_batches() {
        let keys: Vec<u64> = (0..10_000u64).collect();
        let mut source = PostingsEntrySource::new(segment(&keys), 0, 7);
        assert_eq!(source.index_name(), "postings:7");

        let mut buffer = LongQueryBuffer::new();
        let mut all = Vec::new();
        while source.has_more() {
            source.read(&mut buffer).unwrap();
            assert!(buffer.len() <= ENTRY_SOURCE_BATCH);
            all.extend_from_slice(buffer.data());
        }
        assert_eq!(all, keys);
    }

    #[test]
    fn test_retain_and_reject() {
        let source = segment(&[2, 4, 6, 8]);
        let retain = RetainFilter::new(source.clone(), 0, 1, 4);
        let reject = RejectFilter::new(source, 0, 1, 4);

        let mut buffer = LongQueryBuffer::from_sorted(vec![1, 2, 3, 4, 5]);
        retain.apply(&mut buffer).unwrap();
        assert_eq!(buffer.data(), &[2, 4]);

        let mut buffer = LongQueryBuffer::from_sorted(vec![1, 2, 3, 4, 5]);
        reject.apply(&mut buffer).unwrap();
        assert_eq!(buffer.data(), &[1, 3, 5]);
        assert_eq!(reject.describe(), "reject(1, size=4)");
    }

    #[test]
    fn test_absent_term_filters() {
        let mut buffer = LongQueryBuffer::from_sorted(vec![1, 2, 3]);
        QueryFilterLetThrough.apply(&mut buffer).unwrap();
        assert_eq!(buffer.len(), 3);
        QueryFilterNoPass.apply(&mut buffer).unwrap();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_retain_where() {
        let mut buffer = LongQueryBuffer::from_sorted(vec![1, 2, 3, 4]);
        buffer.retain_where(|id| id % 2 == 0);
        assert_eq!(buffer.into_vec(), vec![2, 4]);
    }

    #[test]
    fn test_budget() {
        assert!(SearchBudget::unlimited().has_time_left());
        let spent = SearchBudget::new(Duration::ZERO);
        assert!(!spent.has_time_left());
        assert_eq!(spent.time_left(), Duration::ZERO);
    }
}
