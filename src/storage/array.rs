//! Long arrays
//!
//! `LongArray` is the one place raw file bytes are reinterpreted as `u64` words.
//! It is backed either by the heap or by a memory-mapped file; every access goes
//! through slice indexing, so out-of-range offsets panic instead of reading
//! foreign memory.
//!
//! ## Layout
//! - Words are little-endian `u64`
//! - A file of `n` words is exactly `8 * n` bytes
//! - Zero-length arrays are never mapped (an empty map is not portable)

use crate::{Result, StorageError};
use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

#[cfg(target_endian = "big")]
compile_error!("revdex on-disk arrays are little-endian and reinterpreted in place");

/// Bytes per word
pub const WORD_SIZE: usize = 8;

/// Word-granular random read access (postings reader backend)
///
/// Implemented by `LongArray` (mmap/heap) and by the buffer pool.
pub trait LongSource: Send + Sync {
    /// Read `dst.len()` words starting at `byte_offset` (must be 8-aligned)
    fn read_words(&self, byte_offset: u64, dst: &mut [u64]) -> Result<()>;

    /// Size of the source in bytes
    fn len_bytes(&self) -> u64;

    fn read_word(&self, byte_offset: u64) -> Result<u64> {
        let mut word = [0u64; 1];
        self.read_words(byte_offset, &mut word)?;
        Ok(word[0])
    }
}

enum Backing {
    Heap(Vec<u64>),
    Mapped { map: MmapMut, file: File },
    ReadOnly(Mmap),
}

/// Fixed-length array of `u64` words
pub struct LongArray {
    backing: Backing,
    path: Option<PathBuf>,
}

impl LongArray {
    /// Zeroed heap array
    pub fn heap(len: usize) -> Self {
        Self::from_vec(vec![0u64; len])
    }

    pub fn from_vec(words: Vec<u64>) -> Self {
        Self {
            backing: Backing::Heap(words),
            path: None,
        }
    }

    /// Create (or overwrite) a zero-filled file of `len` words and map it writable
    pub fn create<P: AsRef<Path>>(path: P, len: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((len * WORD_SIZE) as u64)?;
        Self::map_writable(file, path, len)
    }

    /// Map an existing file writable
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StorageError::FileNotFound(path.to_path_buf()));
        }
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = Self::word_len(&file, path)?;
        Self::map_writable(file, path, len)
    }

    /// Map an existing file read-only
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StorageError::FileNotFound(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let len = Self::word_len(&file, path)?;
        let backing = if len == 0 {
            Backing::Heap(Vec::new())
        } else {
            // SAFETY: finalized and checkpointed files are never modified while mapped
            Backing::ReadOnly(unsafe { Mmap::map(&file)? })
        };
        Ok(Self {
            backing,
            path: Some(path.to_path_buf()),
        })
    }

    fn word_len(file: &File, path: &Path) -> Result<usize> {
        let bytes = file.metadata()?.len();
        if bytes % WORD_SIZE as u64 != 0 {
            return Err(StorageError::CorruptedFile(path.to_path_buf()));
        }
        Ok((bytes / WORD_SIZE as u64) as usize)
    }

    fn map_writable(file: File, path: &Path, len: usize) -> Result<Self> {
        let backing = if len == 0 {
            Backing::Heap(Vec::new())
        } else {
            // SAFETY: the engine is the single writer of its scratch files
            let map = unsafe { MmapOptions::new().len(len * WORD_SIZE).map_mut(&file)? };
            Backing::Mapped { map, file }
        };
        Ok(Self {
            backing,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn as_slice(&self) -> &[u64] {
        match &self.backing {
            Backing::Heap(words) => words,
            Backing::Mapped { map, .. } => bytemuck::cast_slice(&map[..]),
            Backing::ReadOnly(map) => bytemuck::cast_slice(&map[..]),
        }
    }

    /// Mutable view; read-only maps refuse
    pub fn as_mut_slice(&mut self) -> Result<&mut [u64]> {
        match &mut self.backing {
            Backing::Heap(words) => Ok(words),
            Backing::Mapped { map, .. } => Ok(bytemuck::cast_slice_mut(&mut map[..])),
            Backing::ReadOnly(_) => Err(StorageError::InvalidArgument(
                "long array is mapped read-only".into(),
            )),
        }
    }

    #[inline]
    pub fn get(&self, idx: usize) -> u64 {
        self.as_slice()[idx]
    }

    #[inline]
    pub fn set(&mut self, idx: usize, value: u64) -> Result<()> {
        self.as_mut_slice()?[idx] = value;
        Ok(())
    }

    /// Shrink to `len` words; file-backed arrays truncate the file and re-map
    pub fn truncate(&mut self, len: usize) -> Result<()> {
        if len > self.len() {
            return Err(StorageError::InvalidArgument(format!(
                "cannot truncate {} words to {}",
                self.len(),
                len
            )));
        }
        let backing = std::mem::replace(&mut self.backing, Backing::Heap(Vec::new()));
        self.backing = match backing {
            Backing::Heap(mut words) => {
                words.truncate(len);
                Backing::Heap(words)
            }
            Backing::Mapped { map, file } => {
                map.flush()?;
                drop(map);
                file.set_len((len * WORD_SIZE) as u64)?;
                if len == 0 {
                    Backing::Heap(Vec::new())
                } else {
                    // SAFETY: see map_writable
                    let map = unsafe { MmapOptions::new().len(len * WORD_SIZE).map_mut(&file)? };
                    Backing::Mapped { map, file }
                }
            }
            Backing::ReadOnly(_) => {
                return Err(StorageError::InvalidArgument(
                    "cannot truncate a read-only long array".into(),
                ))
            }
        };
        Ok(())
    }

    /// Flush a writable map to disk
    pub fn flush(&self) -> Result<()> {
        if let Backing::Mapped { map, .. } = &self.backing {
            map.flush()?;
        }
        Ok(())
    }

    /// Copy `src` words into this array starting at word `dst_idx`
    pub fn copy_from(&mut self, dst_idx: usize, src: &[u64]) -> Result<()> {
        let dst = self.as_mut_slice()?;
        dst[dst_idx..dst_idx + src.len()].copy_from_slice(src);
        Ok(())
    }
}

impl LongSource for LongArray {
    fn read_words(&self, byte_offset: u64, dst: &mut [u64]) -> Result<()> {
        if byte_offset % WORD_SIZE as u64 != 0 {
            return Err(StorageError::InvalidArgument(format!(
                "unaligned word read at {}",
                byte_offset
            )));
        }
        let start = (byte_offset / WORD_SIZE as u64) as usize;
        let words = self.as_slice();
        let end = start + dst.len();
        if end > words.len() {
            return Err(StorageError::InvalidData(format!(
                "read of words {}..{} past end of array ({} words)",
                start,
                end,
                words.len()
            )));
        }
        dst.copy_from_slice(&words[start..end]);
        Ok(())
    }

    fn len_bytes(&self) -> u64 {
        (self.len() * WORD_SIZE) as u64
    }
}

impl std::fmt::Debug for LongArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.backing {
            Backing::Heap(_) => "heap",
            Backing::Mapped { .. } => "mapped",
            Backing::ReadOnly(_) => "read-only",
        };
        f.debug_struct("LongArray")
            .field("kind", &kind)
            .field("len", &self.len())
            .field("path", &self.path)
            .finish()
    }
}
