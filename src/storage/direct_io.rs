//! Unbuffered file access
//!
//! The buffer pool does its own caching, so its backing file is opened with
//! `O_DIRECT` where the platform and filesystem allow it. Direct reads need the
//! destination buffer, the file offset and the length all aligned to the device
//! block; `AlignedBuffer` provides the buffer side.

use crate::config::DIRECT_IO_ALIGNMENT;
use crate::{Result, StorageError};
use std::alloc::{self, Layout};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::ptr::NonNull;

/// Open a file read-only, with O_DIRECT if requested.
///
/// Returns the file and whether direct I/O is actually in effect. Filesystems
/// that reject O_DIRECT (tmpfs, some overlays) fall back to buffered reads.
pub fn open_for_reading(path: &Path, direct: bool) -> Result<(File, bool)> {
    if !path.exists() {
        return Err(StorageError::FileNotFound(path.to_path_buf()));
    }

    if direct {
        match open_direct(path) {
            Ok(file) => return Ok((file, true)),
            Err(e) => {
                log::warn!(
                    "O_DIRECT unavailable for {} ({}), using buffered reads",
                    path.display(),
                    e
                );
            }
        }
    }

    let file = OpenOptions::new().read(true).open(path)?;
    Ok((file, false))
}

#[cfg(target_os = "linux")]
fn open_direct(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECT)
        .open(path)
}

#[cfg(not(target_os = "linux"))]
fn open_direct(_path: &Path) -> std::io::Result<File> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "O_DIRECT is only used on Linux",
    ))
}

/// Positioned read that fills `buf` until it is full or EOF is hit.
///
/// Returns the number of bytes read. A short read from a regular file means EOF;
/// retrying at the unaligned tail offset would fail under O_DIRECT.
pub fn read_at(file: &File, buf: &mut [u8], offset: u64) -> Result<usize> {
    let mut done = 0;
    while done < buf.len() {
        let wanted = buf.len() - done;
        let n = pread(file, &mut buf[done..], offset + done as u64)?;
        done += n;
        if n < wanted {
            break;
        }
    }
    Ok(done)
}

#[cfg(unix)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    loop {
        match file.read_at(buf, offset) {
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[cfg(windows)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

/// Heap buffer aligned for direct I/O, viewable as bytes or words
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: AlignedBuffer uniquely owns its allocation, like Box<[u8]>
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Zeroed buffer of `size` bytes (must be a non-zero multiple of 8)
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 || size % 8 != 0 {
            return Err(StorageError::InvalidArgument(format!(
                "aligned buffer size must be a non-zero multiple of 8, got {}",
                size
            )));
        }
        let layout = Layout::from_size_align(size, DIRECT_IO_ALIGNMENT)
            .map_err(|e| StorageError::InvalidArgument(e.to_string()))?;
        // SAFETY: layout has non-zero size
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| {
            StorageError::ResourceExhausted(format!("failed to allocate {} byte page", size))
        })?;
        Ok(Self { ptr, layout })
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: ptr is valid for layout.size() initialized (zeroed) bytes
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusivity
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }

    pub fn as_words(&self) -> &[u64] {
        bytemuck::cast_slice(self.as_bytes())
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in new() with the same layout
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}
