//! Preindex checkpoints
//!
//! A closed preindex is described by `<name>.manifest.json` in the work
//! directory. The manifest is written (temp file + rename) only after every
//! data file is flushed, so a preindex without a manifest is never reused.

use super::{PreindexFiles, Preindex};
use crate::storage::checksum::FileChecksum;
use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const MANIFEST_SUFFIX: &str = ".manifest.json";

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreindexChecksums {
    pub word_ids: u32,
    pub counts: u32,
    pub documents: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreindexManifest {
    pub format_version: u32,
    pub name: String,
    pub num_terms: u64,
    pub num_postings: u64,
    pub checksums: PreindexChecksums,
    /// Journals whose postings this preindex contains
    pub sources: Vec<String>,
}

impl PreindexManifest {
    pub fn manifest_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{}{}", name, MANIFEST_SUFFIX))
    }

    /// Serialize next to the data files, atomically
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = Self::manifest_path(dir, &self.name);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(self)?;
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let manifest: Self = serde_json::from_slice(&bytes)?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(StorageError::InvalidData(format!(
                "{} has format version {}, expected {}",
                path.display(),
                manifest.format_version,
                FORMAT_VERSION
            )));
        }
        Ok(manifest)
    }
}

/// Lightweight handle to a closed preindex
#[derive(Debug, Clone)]
pub struct PreindexReference {
    dir: PathBuf,
    manifest: PreindexManifest,
}

impl PreindexReference {
    /// Flush `preindex`, checksum its files and write its manifest
    pub(crate) fn checkpoint(preindex: &Preindex) -> Result<Self> {
        preindex.flush()?;
        let files = preindex.files();
        let checksums = PreindexChecksums {
            word_ids: FileChecksum::compute_file(&files.word_ids)?,
            counts: FileChecksum::compute_file(&files.counts)?,
            documents: FileChecksum::compute_file(&files.documents)?,
        };
        let manifest = PreindexManifest {
            format_version: FORMAT_VERSION,
            name: preindex.name().to_string(),
            num_terms: preindex.num_terms() as u64,
            num_postings: preindex.num_postings() as u64,
            checksums,
            sources: preindex.sources().to_vec(),
        };
        manifest.write(preindex.dir())?;
        Ok(Self {
            dir: preindex.dir().to_path_buf(),
            manifest,
        })
    }

    /// Load the manifest at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let manifest = PreindexManifest::load(path)?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self { dir, manifest })
    }

    /// Every manifest in `dir`; unreadable ones are returned as errors
    pub fn scan(dir: &Path) -> Result<Vec<(PathBuf, Result<Self>)>> {
        let mut found = Vec::new();
        if !dir.exists() {
            return Ok(found);
        }
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_manifest = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.ends_with(MANIFEST_SUFFIX));
            if is_manifest {
                let loaded = Self::load(&path);
                found.push((path, loaded));
            }
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn manifest(&self) -> &PreindexManifest {
        &self.manifest
    }

    pub fn sources(&self) -> &[String] {
        &self.manifest.sources
    }

    pub fn files(&self) -> PreindexFiles {
        PreindexFiles::new(&self.dir, &self.manifest.name)
    }

    pub fn manifest_path(&self) -> PathBuf {
        PreindexManifest::manifest_path(&self.dir, &self.manifest.name)
    }

    /// Check file sizes (and checksums if asked) against the manifest
    pub fn validate(&self, verify_checksums: bool) -> Result<()> {
        let files = self.files();
        let m = &self.manifest;
        let expected = [
            (&files.word_ids, 8 * m.num_terms, m.checksums.word_ids),
            (&files.counts, 8 * m.num_terms, m.checksums.counts),
            (&files.documents, 16 * m.num_postings, m.checksums.documents),
        ];
        for (path, size, checksum) in expected {
            if !path.exists() {
                return Err(StorageError::FileNotFound(path.clone()));
            }
            if fs::metadata(path)?.len() != size {
                return Err(StorageError::CorruptedFile(path.clone()));
            }
            if verify_checksums {
                FileChecksum::verify_file(path, checksum)?;
            }
        }
        Ok(())
    }

    /// Validate and map the preindex read-only
    pub fn open(&self, verify_checksums: bool) -> Result<Preindex> {
        self.validate(verify_checksums)?;
        let preindex = Preindex::open_files(
            &self.dir,
            &self.manifest.name,
            self.manifest.sources.clone(),
        )?;
        if preindex.num_postings() as u64 != self.manifest.num_postings
            || preindex.segments().total_records() != self.manifest.num_postings
        {
            return Err(StorageError::CorruptedFile(self.files().counts));
        }
        Ok(preindex)
    }

    /// Remove the manifest first, then the data files
    pub fn delete(&self) -> Result<()> {
        remove_if_exists(&self.manifest_path())?;
        self.files().remove()
    }
}

pub(crate) fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
