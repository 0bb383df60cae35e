//! Buffer pool pages and pin protocol
//!
//! A page's pin word is the only thing that grants access to its buffer:
//!
//! ```text
//! pin == 0            Free           evictable, no one may touch the buffer
//! pin == u64::MAX     WriteLocked    one owner is (re)populating the buffer
//! pin == n, n >= 1    ReadLocked(n)  n readers share the buffer
//! ```
//!
//! Free -> WriteLocked only happens through a CAS by an evicting thread, and
//! WriteLocked -> ReadLocked(1) / Free only through a CAS by that same owner,
//! so a buffer is never written while any reader can see it.

use crate::storage::direct_io::AlignedBuffer;
use crate::{Result, StorageError};
use parking_lot::{Condvar, Mutex};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

const PIN_FREE: u64 = 0;
const PIN_WRITE_LOCKED: u64 = u64::MAX;

/// Page holds no file range
pub(crate) const UNSET_ADDRESS: u64 = u64::MAX;

/// Decoded pin word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinState {
    Free,
    WriteLocked,
    ReadLocked(u64),
}

impl PinState {
    fn decode(word: u64) -> Self {
        match word {
            PIN_FREE => PinState::Free,
            PIN_WRITE_LOCKED => PinState::WriteLocked,
            n => PinState::ReadLocked(n),
        }
    }
}

/// Outcome of a read-pin attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadAttempt {
    Acquired,
    /// Write-locked; wait for population and look again
    Busy,
    /// The page was repurposed for another address
    Mismatch,
}

pub(crate) struct Page {
    buffer: UnsafeCell<AlignedBuffer>,
    pin: AtomicU64,
    address: AtomicU64,
    valid_len: AtomicUsize,
    last_access: AtomicU64,
    populate_lock: Mutex<()>,
    populated: Condvar,
}

// SAFETY: the buffer is only written by the single WriteLocked owner and only
// read by ReadLocked holders; the pin word's CAS transitions order the two.
unsafe impl Sync for Page {}

impl Page {
    pub fn new(page_size: usize) -> Result<Self> {
        Ok(Self {
            buffer: UnsafeCell::new(AlignedBuffer::new(page_size)?),
            pin: AtomicU64::new(PIN_FREE),
            address: AtomicU64::new(UNSET_ADDRESS),
            valid_len: AtomicUsize::new(0),
            last_access: AtomicU64::new(0),
            populate_lock: Mutex::new(()),
            populated: Condvar::new(),
        })
    }

    pub fn pin_state(&self) -> PinState {
        PinState::decode(self.pin.load(Ordering::Acquire))
    }

    #[inline]
    pub fn address(&self) -> u64 {
        self.address.load(Ordering::Acquire)
    }

    #[inline]
    pub fn holds(&self, address: u64) -> bool {
        self.address() == address
    }

    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    pub fn touch(&self, tick: u64) {
        self.last_access.store(tick, Ordering::Relaxed);
    }

    pub fn is_free(&self) -> bool {
        self.pin.load(Ordering::Acquire) == PIN_FREE
    }

    /// Take one read pin if the page still holds `address`
    pub fn try_acquire_read(&self, address: u64) -> ReadAttempt {
        let mut current = self.pin.load(Ordering::Acquire);
        loop {
            if current == PIN_WRITE_LOCKED {
                return ReadAttempt::Busy;
            }
            match self.pin.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        // Re-check under the pin: the page may have been repurposed between
        // the caller's address scan and the CAS
        if self.address() == address {
            ReadAttempt::Acquired
        } else {
            self.release_read();
            ReadAttempt::Mismatch
        }
    }

    pub fn release_read(&self) {
        let previous = self.pin.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(
            previous != PIN_FREE && previous != PIN_WRITE_LOCKED,
            "released a page that was not read-pinned"
        );
    }

    /// Free -> WriteLocked
    pub fn try_lock_for_write(&self) -> bool {
        self.pin
            .compare_exchange(PIN_FREE, PIN_WRITE_LOCKED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Point a write-locked page at a new address
    pub fn set_address(&self, address: u64) {
        debug_assert_eq!(self.pin.load(Ordering::Acquire), PIN_WRITE_LOCKED);
        self.valid_len.store(0, Ordering::Release);
        self.address.store(address, Ordering::Release);
    }

    /// Buffer of a write-locked page
    ///
    /// # Safety
    /// The caller must hold the write lock (won via `try_lock_for_write`) and
    /// must not keep the reference past releasing it.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn buffer_mut(&self) -> &mut AlignedBuffer {
        &mut *self.buffer.get()
    }

    pub fn set_valid_len(&self, len: usize) {
        self.valid_len.store(len, Ordering::Release);
    }

    pub fn valid_len(&self) -> usize {
        self.valid_len.load(Ordering::Acquire)
    }

    /// Populated words; only meaningful while a read pin is held
    pub fn words(&self) -> &[u64] {
        // SAFETY: readers hold a read pin, so no writer can hold the page
        let buffer = unsafe { &*self.buffer.get() };
        &buffer.as_words()[..self.valid_len() / 8]
    }

    /// WriteLocked -> ReadLocked(1), or -> Free when `keep_pinned` is false.
    pub fn finish_write(&self, keep_pinned: bool) -> Result<()> {
        let next = if keep_pinned { 1 } else { PIN_FREE };
        let flipped = self
            .pin
            .compare_exchange(PIN_WRITE_LOCKED, next, Ordering::AcqRel, Ordering::Acquire);
        self.notify_populated();
        match flipped {
            Ok(_) => Ok(()),
            Err(actual) => Err(StorageError::Invariant(format!(
                "page for address {} left write lock in state {:?}",
                self.address(),
                PinState::decode(actual)
            ))),
        }
    }

    /// Give up a write lock after a failed populate; the page becomes empty
    pub fn abandon_write(&self) {
        self.address.store(UNSET_ADDRESS, Ordering::Release);
        self.valid_len.store(0, Ordering::Release);
        self.release_write_lock();
    }

    /// Release a write lock without having changed the page
    pub fn unlock_unchanged(&self) {
        self.release_write_lock();
    }

    /// WriteLocked -> Free; callers must hold the write lock
    fn release_write_lock(&self) {
        let released = self
            .pin
            .compare_exchange(PIN_WRITE_LOCKED, PIN_FREE, Ordering::AcqRel, Ordering::Acquire);
        if let Err(actual) = released {
            log::error!(
                "page for address {} released while not write-locked ({:?})",
                self.address(),
                PinState::decode(actual)
            );
        }
        debug_assert!(released.is_ok(), "page released while not write-locked");
        self.notify_populated();
    }

    fn notify_populated(&self) {
        let _guard = self.populate_lock.lock();
        self.populated.notify_all();
    }

    /// Block until the page leaves the write lock or `timeout` passes.
    ///
    /// Returns true if the wait timed out with the page still write-locked.
    pub fn wait_populated(&self, timeout: Duration) -> bool {
        let mut guard = self.populate_lock.lock();
        if self.pin.load(Ordering::Acquire) != PIN_WRITE_LOCKED {
            return false;
        }
        self.populated.wait_for(&mut guard, timeout).timed_out()
    }
}

/// Read pin on one page, released on drop
pub struct PageGuard<'a> {
    page: &'a Page,
    address: u64,
}

impl<'a> PageGuard<'a> {
    /// Wrap a pin the caller already acquired
    pub(crate) fn new(page: &'a Page, address: u64) -> Self {
        Self { page, address }
    }

    /// Byte offset of the page in the file
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Words of the file starting at `address()`; shorter than a page at EOF
    pub fn words(&self) -> &[u64] {
        self.page.words()
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.page.release_read();
    }
}
