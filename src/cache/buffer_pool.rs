//! Buffer pool over one immutable file
//!
//! **Purpose**: serve random word reads against a postings file that may be far
//! larger than memory, with a fixed page budget and without relying on the OS
//! page cache (the file is opened with O_DIRECT when configured).
//!
//! **Lookup**: the last page hit is checked first, then every page is scanned
//! for the address. Misses evict a free page, preferring pages that never held
//! data and otherwise the one with the oldest access tick (approximate LRU).
//!
//! **Read-ahead**: a miss queues the next `read_ahead_pages` pages for the
//! background worker.

use super::page::{Page, PageGuard, ReadAttempt, UNSET_ADDRESS};
use super::read_ahead::ReadAhead;
use crate::config::BufferPoolConfig;
use crate::storage::direct_io::{open_for_reading, read_at};
use crate::storage::LongSource;
use crate::{Result, StorageError};
use parking_lot::Mutex;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Buffer pool statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BufferPoolStats {
    pub hits: u64,
    pub misses: u64,
    /// Misses that replaced a page holding other data
    pub evictions: u64,
    pub read_ahead_queued: u64,
    /// Instructions dropped because the queue was full
    pub read_ahead_dropped: u64,
    pub read_ahead_loaded: u64,
    /// Times a reader waited on a page being populated
    pub wait_events: u64,
}

impl BufferPoolStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    read_ahead_queued: AtomicU64,
    read_ahead_dropped: AtomicU64,
    read_ahead_loaded: AtomicU64,
    wait_events: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> BufferPoolStats {
        BufferPoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            read_ahead_queued: self.read_ahead_queued.load(Ordering::Relaxed),
            read_ahead_dropped: self.read_ahead_dropped.load(Ordering::Relaxed),
            read_ahead_loaded: self.read_ahead_loaded.load(Ordering::Relaxed),
            wait_events: self.wait_events.load(Ordering::Relaxed),
        }
    }
}

/// Result of trying to load an address into some page
enum Populate {
    /// Loaded; the page is read-pinned (or left free for read-ahead)
    Loaded(usize),
    /// Another page already holds (or is loading) the address
    AlreadyCached,
    /// Every page is pinned
    NoVictim,
}

struct PoolInner {
    pages: Vec<Page>,
    file: File,
    file_len: u64,
    page_size: u64,
    populate_wait: Duration,
    clock: AtomicU64,
    last_hit: AtomicUsize,
    /// Serializes "is the address cached anywhere? no: claim it" so two misses
    /// on the same address cannot load it into two pages
    install: Mutex<()>,
    counters: Counters,
}

impl PoolInner {
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn find(&self, address: u64) -> Option<usize> {
        let hint = self.last_hit.load(Ordering::Relaxed);
        if hint < self.pages.len() && self.pages[hint].holds(address) {
            return Some(hint);
        }
        self.pages.iter().position(|page| page.holds(address))
    }

    /// Read-pin the page holding `address`, loading it on a miss
    fn acquire(&self, address: u64) -> Result<(PageGuard<'_>, bool)> {
        let mut attempts: u32 = 0;
        loop {
            if let Some(idx) = self.find(address) {
                let page = &self.pages[idx];
                match page.try_acquire_read(address) {
                    ReadAttempt::Acquired => {
                        page.touch(self.tick());
                        self.last_hit.store(idx, Ordering::Relaxed);
                        Counters::bump(&self.counters.hits);
                        return Ok((PageGuard::new(page, address), false));
                    }
                    ReadAttempt::Busy => {
                        Counters::bump(&self.counters.wait_events);
                        page.wait_populated(self.populate_wait);
                    }
                    ReadAttempt::Mismatch => {}
                }
                continue;
            }

            match self.populate(address, true)? {
                Populate::Loaded(idx) => {
                    self.last_hit.store(idx, Ordering::Relaxed);
                    Counters::bump(&self.counters.misses);
                    return Ok((PageGuard::new(&self.pages[idx], address), true));
                }
                Populate::AlreadyCached => {}
                Populate::NoVictim => {
                    backoff(attempts);
                    attempts = attempts.saturating_add(1);
                }
            }
        }
    }

    /// Free page to evict: never-used pages first, then the least recently touched
    fn pick_victim(&self) -> Option<usize> {
        let mut best: Option<(usize, u64)> = None;
        for (idx, page) in self.pages.iter().enumerate() {
            if !page.is_free() {
                continue;
            }
            if page.address() == UNSET_ADDRESS {
                return Some(idx);
            }
            let tick = page.last_access();
            if best.map_or(true, |(_, t)| tick < t) {
                best = Some((idx, tick));
            }
        }
        best.map(|(idx, _)| idx)
    }

    fn populate(&self, address: u64, pin_for_read: bool) -> Result<Populate> {
        let idx = loop {
            let Some(idx) = self.pick_victim() else {
                return Ok(Populate::NoVictim);
            };
            if self.pages[idx].try_lock_for_write() {
                break idx;
            }
        };
        let page = &self.pages[idx];

        {
            let _install = self.install.lock();
            if self.find(address).is_some() {
                page.unlock_unchanged();
                return Ok(Populate::AlreadyCached);
            }
            if page.address() != UNSET_ADDRESS {
                Counters::bump(&self.counters.evictions);
            }
            page.set_address(address);
        }

        // SAFETY: we won the write lock above and release it before returning
        let buffer = unsafe { page.buffer_mut() };
        match read_at(&self.file, buffer.as_bytes_mut(), address) {
            Ok(n) => {
                page.set_valid_len(n & !7);
                page.touch(self.tick());
                page.finish_write(pin_for_read)?;
                Ok(Populate::Loaded(idx))
            }
            Err(e) => {
                page.abandon_write();
                Err(e)
            }
        }
    }

    /// Load `address` unpinned if it is not cached; best effort
    fn prefetch(&self, address: u64) -> Result<()> {
        if self.find(address).is_some() {
            return Ok(());
        }
        if let Populate::Loaded(_) = self.populate(address, false)? {
            Counters::bump(&self.counters.read_ahead_loaded);
        }
        Ok(())
    }
}

/// Spin briefly, then yield, then sleep while every page is pinned
fn backoff(attempt: u32) {
    if attempt < 8 {
        std::hint::spin_loop();
    } else if attempt < 64 {
        thread::yield_now();
    } else {
        thread::sleep(Duration::from_micros(100));
    }
}

/// Fixed-size page cache over one read-only file
pub struct BufferPool {
    inner: Arc<PoolInner>,
    read_ahead: Option<ReadAhead>,
    read_ahead_pages: u64,
    path: PathBuf,
    direct: bool,
}

impl BufferPool {
    pub fn open<P: AsRef<Path>>(path: P, config: &BufferPoolConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let (file, direct) = open_for_reading(&path, config.direct_io)?;
        let file_len = file.metadata()?.len();

        let pages = (0..config.num_pages)
            .map(|_| Page::new(config.page_size))
            .collect::<Result<Vec<_>>>()?;

        let inner = Arc::new(PoolInner {
            pages,
            file,
            file_len,
            page_size: config.page_size as u64,
            populate_wait: Duration::from_millis(config.populate_wait_ms.max(1)),
            clock: AtomicU64::new(1),
            last_hit: AtomicUsize::new(0),
            install: Mutex::new(()),
            counters: Counters::default(),
        });

        let read_ahead = if config.read_ahead_pages > 0 {
            let worker_inner = inner.clone();
            Some(ReadAhead::start(config.read_ahead_queue_capacity, move |address| {
                if let Err(e) = worker_inner.prefetch(address) {
                    log::debug!("read-ahead of page {} failed: {}", address, e);
                }
            })?)
        } else {
            None
        };

        log::debug!(
            "buffer pool over {} ({} bytes): {} pages of {} bytes, direct_io={}",
            path.display(),
            file_len,
            config.num_pages,
            config.page_size,
            direct
        );

        Ok(Self {
            inner,
            read_ahead,
            read_ahead_pages: config.read_ahead_pages as u64,
            path,
            direct,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether reads bypass the OS page cache
    pub fn is_direct(&self) -> bool {
        self.direct
    }

    pub fn file_len(&self) -> u64 {
        self.inner.file_len
    }

    pub fn page_size(&self) -> u64 {
        self.inner.page_size
    }

    pub fn num_pages(&self) -> usize {
        self.inner.pages.len()
    }

    /// Read-pin the page starting at `address` (a multiple of the page size)
    pub fn get(&self, address: u64) -> Result<PageGuard<'_>> {
        if address % self.inner.page_size != 0 {
            return Err(StorageError::InvalidArgument(format!(
                "page address {} is not a multiple of the page size {}",
                address, self.inner.page_size
            )));
        }
        if address >= self.inner.file_len {
            return Err(StorageError::InvalidData(format!(
                "page address {} is past the end of {} ({} bytes)",
                address,
                self.path.display(),
                self.inner.file_len
            )));
        }
        let (guard, missed) = self.inner.acquire(address)?;
        if missed {
            self.schedule_read_ahead(address);
        }
        Ok(guard)
    }

    fn schedule_read_ahead(&self, address: u64) {
        let Some(worker) = &self.read_ahead else {
            return;
        };
        let counters = &self.inner.counters;
        for i in 1..=self.read_ahead_pages {
            let next = address + i * self.inner.page_size;
            if next >= self.inner.file_len {
                break;
            }
            if worker.submit(next) {
                Counters::bump(&counters.read_ahead_queued);
            } else {
                Counters::bump(&counters.read_ahead_dropped);
            }
        }
    }

    /// Read one little-endian word
    pub fn read_u64(&self, byte_offset: u64) -> Result<u64> {
        self.read_word(byte_offset)
    }

    pub fn stats(&self) -> BufferPoolStats {
        self.inner.counters.snapshot()
    }

    /// Stop the read-ahead worker; later misses simply skip read-ahead
    pub fn shutdown(&self) {
        if let Some(worker) = &self.read_ahead {
            worker.shutdown();
        }
    }
}

impl LongSource for BufferPool {
    fn read_words(&self, byte_offset: u64, dst: &mut [u64]) -> Result<()> {
        if byte_offset % 8 != 0 {
            return Err(StorageError::InvalidArgument(format!(
                "unaligned word read at {}",
                byte_offset
            )));
        }
        let end = byte_offset + 8 * dst.len() as u64;
        if end > self.inner.file_len {
            return Err(StorageError::InvalidData(format!(
                "read of bytes {}..{} past end of {} ({} bytes)",
                byte_offset,
                end,
                self.path.display(),
                self.inner.file_len
            )));
        }

        let page_size = self.inner.page_size;
        let mut offset = byte_offset;
        let mut done = 0;
        while done < dst.len() {
            let address = offset - offset % page_size;
            let page = self.get(address)?;
            let words = page.words();
            let within = ((offset - address) / 8) as usize;
            if within >= words.len() {
                return Err(StorageError::InvalidData(format!(
                    "short read of page {} in {}",
                    address,
                    self.path.display()
                )));
            }
            let take = (words.len() - within).min(dst.len() - done);
            dst[done..done + take].copy_from_slice(&words[within..within + take]);
            done += take;
            offset += 8 * take as u64;
        }
        Ok(())
    }

    fn len_bytes(&self) -> u64 {
        self.inner.file_len
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
