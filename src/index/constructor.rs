//! Index construction driver
//!
//! journals ──construct (parallel)──▶ preindexes ──merge rounds──▶ one preindex ──finalize──▶ index
//!
//! Every finished preindex is checkpointed in the work directory, so a build
//! that dies part-way resumes from the last completed batch or merge instead
//! of starting over.

use super::doc_id::DocIdRewriter;
use super::preindex::{merge::merge, Preindex, PreindexReference, PREINDEX_PREFIX};
use crate::config::{ConstructionConfig, IndexPaths};
use crate::error::ResultExt;
use crate::Result;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstructionReport {
    /// Journals turned into fresh preindexes
    pub batches_built: usize,
    /// Journals covered by checkpoints from an earlier run
    pub batches_reused: usize,
    pub merges: usize,
    pub num_terms: u64,
    pub num_postings: u64,
}

pub struct IndexConstructor {
    config: ConstructionConfig,
}

impl IndexConstructor {
    pub fn new(config: ConstructionConfig) -> Self {
        Self { config }
    }

    pub fn work_dir(&self) -> &Path {
        &self.config.work_dir
    }

    /// Build the index at `paths` from `journals`
    pub fn build(
        &self,
        journals: &[PathBuf],
        rewriter: &dyn DocIdRewriter,
        paths: &IndexPaths,
    ) -> Result<ConstructionReport> {
        let work_dir = self.work_dir();
        fs::create_dir_all(work_dir).with_phase("prepare", work_dir)?;
        let wanted: Vec<String> = journals.iter().map(|p| p.display().to_string()).collect();

        let mut report = ConstructionReport::default();
        let mut pending = self.resume(&wanted)?;
        report.batches_reused = pending.iter().map(|r| r.sources().len()).sum();

        let covered: HashSet<&str> = pending
            .iter()
            .flat_map(|r| r.sources().iter().map(String::as_str))
            .collect();
        let todo: Vec<&PathBuf> = journals
            .iter()
            .filter(|j| !covered.contains(j.display().to_string().as_str()))
            .collect();
        report.batches_built = todo.len();

        let build_one = |journal: &&PathBuf| -> Result<PreindexReference> {
            Preindex::construct(journal, rewriter, work_dir)?.close()
        };
        let built: Vec<PreindexReference> = if self.config.parallel_batches {
            todo.par_iter().map(build_one).collect::<Result<_>>()?
        } else {
            todo.iter().map(build_one).collect::<Result<_>>()?
        };
        pending.extend(built);

        let last = match pending.len() {
            0 => {
                // nothing to index: finalize an empty preindex
                let empty = self.empty_journal()?;
                let reference = Preindex::construct(&empty, rewriter, work_dir)?.close()?;
                fs::remove_file(&empty).with_phase("prepare", &empty)?;
                reference
            }
            _ => self.merge_rounds(pending, &mut report)?,
        };

        let preindex = last.open(self.config.verify_checksums)?;
        let finalized = preindex.finalize(paths)?;
        drop(preindex);
        last.delete()?;

        report.num_terms = finalized.num_terms;
        report.num_postings = finalized.num_postings;
        log::info!("index construction finished: {:?}", report);
        Ok(report)
    }

    /// Valid checkpoints that only cover wanted journals, with no two covering
    /// the same journal. Everything else in the work directory is removed.
    fn resume(&self, wanted: &[String]) -> Result<Vec<PreindexReference>> {
        let wanted: HashSet<&str> = wanted.iter().map(String::as_str).collect();
        let mut candidates = Vec::new();
        for (path, loaded) in PreindexReference::scan(self.work_dir())? {
            match loaded {
                Ok(reference) => candidates.push(reference),
                Err(e) => {
                    log::warn!("discarding unreadable checkpoint {}: {}", path.display(), e);
                    fs::remove_file(&path).with_phase("resume", &path)?;
                }
            }
        }

        // Larger checkpoints first: a merge result makes its inputs redundant
        candidates.sort_by(|a, b| {
            b.sources()
                .len()
                .cmp(&a.sources().len())
                .then_with(|| a.name().cmp(b.name()))
        });

        let mut kept = Vec::new();
        let mut covered: HashSet<String> = HashSet::new();
        for reference in candidates {
            let relevant = reference.sources().iter().all(|s| wanted.contains(s.as_str()));
            let overlaps = reference.sources().iter().any(|s| covered.contains(s));
            if !relevant || overlaps {
                log::debug!("discarding redundant checkpoint {}", reference.name());
                reference.delete()?;
                continue;
            }
            if let Err(e) = reference.validate(self.config.verify_checksums) {
                log::warn!("discarding invalid checkpoint {}: {}", reference.name(), e);
                reference.delete()?;
                continue;
            }
            log::info!(
                "reusing checkpoint {} covering {} journal(s)",
                reference.name(),
                reference.sources().len()
            );
            covered.extend(reference.sources().iter().cloned());
            kept.push(reference);
        }

        self.remove_orphans(&kept)?;
        Ok(kept)
    }

    /// Delete preindex files that belong to no kept checkpoint
    fn remove_orphans(&self, kept: &[PreindexReference]) -> Result<()> {
        let names: HashSet<&str> = kept.iter().map(|r| r.name()).collect();
        for entry in fs::read_dir(self.work_dir())? {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !file_name.starts_with(PREINDEX_PREFIX) {
                continue;
            }
            let owner = file_name.split('.').next().unwrap_or_default();
            if !names.contains(owner) {
                log::debug!("removing orphaned scratch file {}", path.display());
                fs::remove_file(&path).with_phase("resume", &path)?;
            }
        }
        Ok(())
    }

    /// Merge pairwise until one preindex is left, checkpointing every result
    fn merge_rounds(
        &self,
        mut pending: Vec<PreindexReference>,
        report: &mut ConstructionReport,
    ) -> Result<PreindexReference> {
        let verify = self.config.verify_checksums;
        let work_dir = self.work_dir();

        while pending.len() > 1 {
            let odd = if pending.len() % 2 == 1 { pending.pop() } else { None };
            let pairs: Vec<(PreindexReference, PreindexReference)> = {
                let mut it = pending.into_iter();
                let mut pairs = Vec::new();
                while let (Some(a), Some(b)) = (it.next(), it.next()) {
                    pairs.push((a, b));
                }
                pairs
            };
            report.merges += pairs.len();

            let merge_pair = |(a, b): &(PreindexReference, PreindexReference)| -> Result<PreindexReference> {
                let left = a.open(verify)?;
                let right = b.open(verify)?;
                let merged = merge(&left, &right, work_dir)?.close()?;
                drop(left);
                drop(right);
                a.delete()?;
                b.delete()?;
                Ok(merged)
            };
            pending = if self.config.parallel_batches {
                pairs.par_iter().map(merge_pair).collect::<Result<_>>()?
            } else {
                pairs.iter().map(merge_pair).collect::<Result<_>>()?
            };
            pending.extend(odd);
        }

        pending.pop().ok_or_else(|| {
            crate::StorageError::Invariant("merge rounds ended with no preindex".into())
        })
    }

    fn empty_journal(&self) -> Result<PathBuf> {
        let path = self.work_dir().join("empty.journal");
        crate::storage::journal::JournalWriter::create(&path)?.finish()
    }
}
