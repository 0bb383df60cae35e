//! Preindex: the intermediate, mergeable form of a reverse index
//!
//! Built from one posting journal in two sequential passes, merged pairwise
//! with other preindexes, and finally compiled into the postings file and the
//! word directory.
//!
//! ## Files (in the construction work directory)
//! ```text
//! <name>.word-ids.dat    ascending term ids            (u64 × terms)
//! <name>.counts.dat      postings per term             (u64 × terms)
//! <name>.documents.dat   (document_id, metadata) pairs (u64 × 2 × postings)
//! <name>.manifest.json   checkpoint, present once closed
//! ```

pub mod documents;
pub mod finalize;
pub mod manifest;
pub mod merge;
pub mod segments;

pub use documents::PreindexDocuments;
pub use finalize::FinalizeReport;
pub use manifest::{PreindexManifest, PreindexReference};
pub use segments::{PreindexWordSegments, WordSegment};

use crate::error::ResultExt;
use crate::index::doc_id::DocIdRewriter;
use crate::Result;
use manifest::remove_if_exists;
use rand::Rng;
use std::path::{Path, PathBuf};

/// Prefix shared by every preindex scratch file
pub const PREINDEX_PREFIX: &str = "preindex-";

/// Data file paths of one preindex
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreindexFiles {
    pub word_ids: PathBuf,
    pub counts: PathBuf,
    pub documents: PathBuf,
}

impl PreindexFiles {
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            word_ids: dir.join(format!("{}.word-ids.dat", name)),
            counts: dir.join(format!("{}.counts.dat", name)),
            documents: dir.join(format!("{}.documents.dat", name)),
        }
    }

    pub(crate) fn remove(&self) -> Result<()> {
        remove_if_exists(&self.word_ids)?;
        remove_if_exists(&self.counts)?;
        remove_if_exists(&self.documents)
    }
}

/// Random scratch name, so concurrent batches never collide
pub(crate) fn new_preindex_name() -> String {
    format!("{}{:016x}", PREINDEX_PREFIX, rand::thread_rng().gen::<u64>())
}

pub struct Preindex {
    name: String,
    dir: PathBuf,
    segments: PreindexWordSegments,
    documents: PreindexDocuments,
    sources: Vec<String>,
}

impl Preindex {
    /// Build a preindex from one journal, writing its files into `work_dir`
    pub fn construct(journal: &Path, rewriter: &dyn DocIdRewriter, work_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(work_dir).with_phase("construct", work_dir)?;
        let name = new_preindex_name();
        let files = PreindexFiles::new(work_dir, &name);
        log::info!("constructing {} from {}", name, journal.display());

        let built = (|| {
            let mut segments =
                PreindexWordSegments::construct(journal, &files.word_ids, &files.counts)?;
            let documents =
                PreindexDocuments::construct(journal, &mut segments, rewriter, &files.documents)?;
            Ok::<_, crate::StorageError>((segments, documents))
        })();
        let (segments, documents) = match built {
            Ok(parts) => parts,
            Err(e) => {
                let _ = files.remove();
                return Err(e).with_phase("construct", journal);
            }
        };

        let preindex = Self {
            name,
            dir: work_dir.to_path_buf(),
            segments,
            documents,
            sources: vec![journal.display().to_string()],
        };
        log::info!(
            "constructed {}: {} terms, {} postings",
            preindex.name,
            preindex.num_terms(),
            preindex.num_postings()
        );
        Ok(preindex)
    }

    pub(crate) fn from_parts(
        name: String,
        dir: &Path,
        segments: PreindexWordSegments,
        documents: PreindexDocuments,
        sources: Vec<String>,
    ) -> Self {
        Self {
            name,
            dir: dir.to_path_buf(),
            segments,
            documents,
            sources,
        }
    }

    pub(crate) fn open_files(dir: &Path, name: &str, sources: Vec<String>) -> Result<Self> {
        let files = PreindexFiles::new(dir, name);
        let segments = PreindexWordSegments::open(&files.word_ids, &files.counts)?;
        let documents = PreindexDocuments::open(&files.documents)?;
        Ok(Self::from_parts(name.to_string(), dir, segments, documents, sources))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn files(&self) -> PreindexFiles {
        PreindexFiles::new(&self.dir, &self.name)
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn segments(&self) -> &PreindexWordSegments {
        &self.segments
    }

    pub fn documents(&self) -> &PreindexDocuments {
        &self.documents
    }

    pub fn num_terms(&self) -> usize {
        self.segments.len()
    }

    pub fn num_postings(&self) -> usize {
        self.documents.len_records()
    }

    /// Interleaved `(document_id, metadata)` records of `term_id`
    pub fn postings(&self, term_id: u64) -> Option<&[u64]> {
        self.segments
            .find(term_id)
            .map(|segment| self.documents.records(&segment))
    }

    pub fn flush(&self) -> Result<()> {
        self.segments.flush()?;
        self.documents.flush()
    }

    /// Checkpoint and release the maps
    pub fn close(self) -> Result<PreindexReference> {
        let reference = PreindexReference::checkpoint(&self).with_phase("close", &self.dir)?;
        log::debug!("checkpointed {}", self.name);
        Ok(reference)
    }

    /// Drop the preindex and its files
    pub fn delete(self) -> Result<()> {
        let files = self.files();
        let manifest = PreindexManifest::manifest_path(&self.dir, &self.name);
        drop(self);
        remove_if_exists(&manifest)?;
        files.remove()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::doc_id::IdentityRewriter;
    use crate::storage::journal::JournalWriter;
    use tempfile::TempDir;

    #[test]
    fn test_construct_and_query() {
        let temp = TempDir::new().unwrap();
        let journal = temp.path().join("batch.journal");
        let mut writer = JournalWriter::create(&journal).unwrap();
        writer.put_document(5, &[(1, 50), (2, 51)]).unwrap();
        writer.put_document(1, &[(1, 10)]).unwrap();
        writer.finish().unwrap();

        let preindex = Preindex::construct(&journal, &IdentityRewriter, temp.path()).unwrap();
        assert_eq!(preindex.num_terms(), 2);
        assert_eq!(preindex.num_postings(), 3);
        assert_eq!(preindex.postings(1).unwrap(), &[1, 10, 5, 50]);
        assert_eq!(preindex.postings(3), None);
        assert!(preindex.name().starts_with(PREINDEX_PREFIX));
        preindex.delete().unwrap();
    }

    #[test]
    fn test_empty_journal() {
        let temp = TempDir::new().unwrap();
        let journal = temp.path().join("empty.journal");
        JournalWriter::create(&journal).unwrap().finish().unwrap();

        let preindex = Preindex::construct(&journal, &IdentityRewriter, temp.path()).unwrap();
        assert_eq!(preindex.num_terms(), 0);
        let reference = preindex.close().unwrap();
        assert_eq!(reference.open(true).unwrap().num_postings(), 0);
    }

    #[test]
    fn test_missing_journal_carries_phase() {
        let temp = TempDir::new().unwrap();
        let err = Preindex::construct(&temp.path().join("nope.journal"), &IdentityRewriter, temp.path())
            .err()
            .unwrap();
        assert!(err.to_string().contains("construct"));
        // no scratch files survive a failed construction
        let left = std::fs::read_dir(temp.path()).unwrap().count();
        assert_eq!(left, 0);
    }
}
