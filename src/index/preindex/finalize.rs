//! Preindex finalization
//!
//! Compiles a preindex into the immutable query-time files: the postings file
//! (one skip-list segment per term, in term order) and the word directory over
//! the segment offsets. The postings file is sized up front from the segment
//! layout planner, written through a writable map, and renamed into place
//! together with the directory.

use super::Preindex;
use crate::config::IndexPaths;
use crate::error::ResultExt;
use crate::index::btree::WordDirectoryWriter;
use crate::index::skiplist::{estimate_size, SkipListWriter};
use crate::storage::LongArray;
use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizeReport {
    pub num_terms: u64,
    pub num_postings: u64,
    /// Size of the postings file in bytes
    pub documents_bytes: u64,
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

impl Preindex {
    /// Write the final index files to `paths`, replacing any existing ones
    pub fn finalize(&self, paths: &IndexPaths) -> Result<FinalizeReport> {
        log::info!(
            "finalizing {} ({} terms, {} postings) into {}",
            self.name(),
            self.num_terms(),
            self.num_postings(),
            paths.documents.display()
        );

        let docs_tmp = staging_path(&paths.documents);
        let words_tmp = staging_path(&paths.words);
        for path in [&paths.documents, &paths.words] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).with_phase("finalize", parent)?;
            }
        }

        let directory = self
            .write_postings(&docs_tmp)
            .with_phase("finalize", &docs_tmp)?;
        let documents_bytes = fs::metadata(&docs_tmp).with_phase("finalize", &docs_tmp)?.len();
        WordDirectoryWriter::write(&words_tmp, &directory).with_phase("finalize", &words_tmp)?;

        fs::rename(&docs_tmp, &paths.documents).with_phase("finalize", &paths.documents)?;
        fs::rename(&words_tmp, &paths.words).with_phase("finalize", &paths.words)?;

        let report = FinalizeReport {
            num_terms: self.num_terms() as u64,
            num_postings: self.num_postings() as u64,
            documents_bytes,
        };
        log::info!("finalized index: {:?}", report);
        Ok(report)
    }

    /// Write every segment; returns the interleaved `(term_id, offset)` directory
    fn write_postings(&self, path: &Path) -> Result<Vec<u64>> {
        let mut size = 0u64;
        for segment in self.segments().iter() {
            size += estimate_size(size, segment.count);
        }

        let mut output = LongArray::create(path, (size / 8) as usize)?;
        let mut directory = Vec::with_capacity(2 * self.num_terms());
        {
            let mut writer = SkipListWriter::new(output.as_mut_slice()?, 0);
            for segment in self.segments().iter() {
                let offset = writer.write_segment(self.documents().records(&segment))?;
                directory.push(segment.term_id);
                directory.push(offset);
            }
            debug_assert_eq!(writer.position(), size);
        }
        output.flush()?;
        Ok(directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::btree::WordDirectory;
    use crate::index::doc_id::IdentityRewriter;
    use crate::index::skiplist::SkipListReader;
    use crate::storage::journal::JournalWriter;
    use crate::storage::LongSource;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_finalize_roundtrip() {
        let temp = TempDir::new().unwrap();
        let journal = temp.path().join("b.journal");
        let mut writer = JournalWriter::create(&journal).unwrap();
        // one large term spanning several blocks, and a few small ones
        for doc in 0..12_000u64 {
            writer.put(100, doc * 2, doc).unwrap();
        }
        for term in 1..50u64 {
            writer.put(term, term * 7, term).unwrap();
        }
        writer.finish().unwrap();

        let preindex = Preindex::construct(&journal, &IdentityRewriter, temp.path()).unwrap();
        let paths = IndexPaths::in_dir(temp.path().join("index"));
        let report = preindex.finalize(&paths).unwrap();
        assert_eq!(report.num_terms, 50);
        assert_eq!(report.num_postings, 12_049);
        assert!(!staging_path(&paths.documents).exists());

        let directory = WordDirectory::open(&paths.words).unwrap();
        assert_eq!(directory.len(), 50);
        let source: Arc<dyn LongSource> =
            Arc::new(LongArray::open_read_only(&paths.documents).unwrap());
        assert_eq!(source.len_bytes(), report.documents_bytes);

        let offset = directory.find(100).unwrap().unwrap();
        let mut reader = SkipListReader::new(source.clone(), offset);
        assert_eq!(reader.estimate_size().unwrap(), 12_000);
        assert_eq!(reader.get_values(&[0, 2, 23_998]).unwrap(), vec![Some(0), Some(1), Some(11_999)]);

        let offset = directory.find(7).unwrap().unwrap();
        let mut entries = Vec::new();
        SkipListReader::new(source, offset).read_entries(&mut entries, 10).unwrap();
        assert_eq!(entries, vec![(49, 7)]);
    }

    #[test]
    fn test_finalize_empty() {
        let temp = TempDir::new().unwrap();
        let journal = temp.path().join("empty.journal");
        JournalWriter::create(&journal).unwrap().finish().unwrap();

        let preindex = Preindex::construct(&journal, &IdentityRewriter, temp.path()).unwrap();
        let paths = IndexPaths::in_dir(temp.path());
        let report = preindex.finalize(&paths).unwrap();
        assert_eq!(report.documents_bytes, 0);
        assert!(WordDirectory::open(&paths.words).unwrap().is_empty());
    }
}
