//! Memory-mapped shared zone
//!
//! A zone is a file mapped `MAP_SHARED` by the master and every worker
//! process. It holds a fixed header, a process-shared lock, and an arena
//! allocator whose blocks are addressed by offset from the zone start, so
//! every process can follow them regardless of where the file is mapped.
//!
//! ```text
//! 0      magic
//! 8      version | lock (owner pid, 0 = free)
//! 16     size
//! 24     free list head
//! 32     bytes allocated | 40 live allocations
//! 48     queue head | 56 queue tail | 64 queue length
//! 128    arena blocks ...
//! ```
//!
//! Arena blocks carry a 16-byte header (`size`, then the next free block or
//! an allocated tag). The free list is kept sorted by offset so neighbours
//! coalesce on free.
//!
//! The only way to touch the header or the arena is through a
//! [`ZoneGuard`], which holds the lock for its lifetime.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering};

use memmap2::MmapMut;

use crate::error::ZoneError;

/// Smallest zone: eight 4 KiB pages
pub const MIN_ZONE_SIZE: usize = 8 * 4096;

/// Bytes reserved for the zone header
pub const HEADER_SIZE: usize = 128;

const MAGIC: u64 = u64::from_le_bytes(*b"SQLTLOGZ");
const VERSION: u32 = 1;

const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 8;
const OFF_LOCK: usize = 12;
const OFF_SIZE: usize = 16;
const OFF_FREE_HEAD: usize = 24;
const OFF_USED: usize = 32;
const OFF_ALLOCATIONS: usize = 40;
pub(crate) const OFF_QUEUE_HEAD: usize = 48;
pub(crate) const OFF_QUEUE_TAIL: usize = 56;
pub(crate) const OFF_QUEUE_LEN: usize = 64;

const ALIGN: usize = 16;
const BLOCK_HEADER: usize = 16;
const MIN_BLOCK: usize = 32;
/// Stored in an allocated block's next-free slot
const ALLOCATED: u64 = u64::MAX;

/// Spin rounds before yielding the CPU while waiting for the lock
const SPIN_ROUNDS: u32 = 11;

#[inline]
const fn align_up(n: usize) -> usize {
    (n + ALIGN - 1) & !(ALIGN - 1)
}

/// Arena usage counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZoneStats {
    /// Arena bytes, headers excluded
    pub capacity: usize,
    /// Bytes in allocated blocks, block headers included
    pub used: usize,
    pub allocations: usize,
}

impl ZoneStats {
    #[inline]
    pub fn free(&self) -> usize {
        self.capacity.saturating_sub(self.used)
    }
}

/// One mapping of a shared zone file
pub struct SharedZone {
    path: PathBuf,
    /// Keeps the mapping alive; accessed only through `base`
    _mmap: MmapMut,
    base: NonNull<u8>,
    size: usize,
}

// Safety: SharedZone is safe to share across threads
// - the mapping address is fixed for the lifetime of `_mmap`
// - all access to the mapped bytes goes through ZoneGuard, which holds the
//   zone lock; the lock word itself is an atomic
unsafe impl Send for SharedZone {}
unsafe impl Sync for SharedZone {}

impl SharedZone {
    /// Create or reuse the zone file at `path`
    ///
    /// An existing file of the same size with a valid header is reused as
    /// is, so rows buffered before a reload survive it. Anything else is
    /// resized and formatted. Call this before any worker attaches.
    pub fn create(path: impl AsRef<Path>, size: usize) -> Result<Self, ZoneError> {
        let path = path.as_ref();
        let size = size & !(ALIGN - 1);
        if size < MIN_ZONE_SIZE {
            return Err(ZoneError::TooSmall {
                size,
                min: MIN_ZONE_SIZE,
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| ZoneError::io(path, e))?;
        let existing = file.metadata().map_err(|e| ZoneError::io(path, e))?.len();
        if existing != size as u64 {
            file.set_len(size as u64).map_err(|e| ZoneError::io(path, e))?;
        }

        let zone = Self::map(path, &file, size)?;
        if existing == size as u64 && zone.header_is_valid() {
            // No worker runs yet, so whoever held the lock is gone
            zone.lock_word().store(0, Ordering::Release);
            tracing::info!(path = %path.display(), size, "reusing shared zone");
        } else {
            zone.format();
            tracing::info!(path = %path.display(), size, "shared zone created");
        }
        Ok(zone)
    }

    /// Map an existing zone created by [`SharedZone::create`]
    pub fn attach(path: impl AsRef<Path>) -> Result<Self, ZoneError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| ZoneError::io(path, e))?;
        let len = file.metadata().map_err(|e| ZoneError::io(path, e))?.len();
        let size = usize::try_from(len).map_err(|_| ZoneError::Invalid {
            path: path.display().to_string(),
            reason: "file too large",
        })?;
        if size < MIN_ZONE_SIZE {
            return Err(ZoneError::Invalid {
                path: path.display().to_string(),
                reason: "file smaller than a zone",
            });
        }

        let zone = Self::map(path, &file, size)?;
        if !zone.header_is_valid() {
            return Err(ZoneError::Invalid {
                path: path.display().to_string(),
                reason: "bad header",
            });
        }
        Ok(zone)
    }

    fn map(path: &Path, file: &std::fs::File, size: usize) -> Result<Self, ZoneError> {
        // SAFETY: the file is only ever mapped by sqlitelog processes, which
        // go through the zone lock for every access
        let mut mmap = unsafe { MmapMut::map_mut(file) }.map_err(|e| ZoneError::io(path, e))?;
        let base = NonNull::new(mmap.as_mut_ptr()).ok_or_else(|| ZoneError::Invalid {
            path: path.display().to_string(),
            reason: "null mapping",
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            _mmap: mmap,
            base,
            size,
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Acquire the zone lock, spinning then yielding until it is free
    pub fn lock(&self) -> ZoneGuard<'_> {
        let owner = lock_owner_id();
        let word = self.lock_word();
        let mut round = 0u32;

        loop {
            if word.load(Ordering::Relaxed) == 0
                && word
                    .compare_exchange_weak(0, owner, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return ZoneGuard { zone: self };
            }

            if round < SPIN_ROUNDS {
                for _ in 0..(1u32 << round) {
                    std::hint::spin_loop();
                }
                round += 1;
            } else {
                std::thread::yield_now();
            }
        }
    }

    /// Acquire the lock only if it is free right now
    pub fn try_lock(&self) -> Option<ZoneGuard<'_>> {
        self.lock_word()
            .compare_exchange(0, lock_owner_id(), Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| ZoneGuard { zone: self })
    }

    /// Process id holding the lock, if any
    pub fn lock_owner(&self) -> Option<u32> {
        match self.lock_word().load(Ordering::Relaxed) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Release a lock left behind by a process that died holding it
    ///
    /// Returns true if `pid` held the lock. Only the host, after it has
    /// reaped `pid`, may call this.
    pub fn force_unlock(&self, pid: u32) -> bool {
        let released = self
            .lock_word()
            .compare_exchange(pid, 0, Ordering::Release, Ordering::Relaxed)
            .is_ok();
        if released {
            tracing::warn!(path = %self.path.display(), pid, "released shared zone lock held by exited process");
        }
        released
    }

    #[inline]
    fn lock_word(&self) -> &AtomicU32 {
        // SAFETY: OFF_LOCK is 4-byte aligned inside the page-aligned mapping
        // and the mapping outlives &self
        unsafe { &*(self.base.as_ptr().add(OFF_LOCK) as *const AtomicU32) }
    }

    /// Raw word access for header checks and formatting, before any other
    /// process can see the zone
    #[inline]
    fn word(&self, off: usize) -> *mut u64 {
        debug_assert!(off % 8 == 0 && off + 8 <= self.size);
        // SAFETY: callers pass fixed header offsets, all inside the mapping
        unsafe { self.base.as_ptr().add(off) as *mut u64 }
    }

    fn header_is_valid(&self) -> bool {
        // SAFETY: header offsets are in bounds and aligned
        unsafe {
            ptr::read(self.word(OFF_MAGIC)) == MAGIC
                && ptr::read(self.base.as_ptr().add(OFF_VERSION) as *const u32) == VERSION
                && ptr::read(self.word(OFF_SIZE)) == self.size as u64
        }
    }

    fn format(&self) {
        // SAFETY: called from create() before the zone is shared; all
        // offsets are inside the header or the first arena block
        unsafe {
            ptr::write_bytes(self.base.as_ptr(), 0, HEADER_SIZE);
            ptr::write(self.word(OFF_MAGIC), MAGIC);
            ptr::write(self.base.as_ptr().add(OFF_VERSION) as *mut u32, VERSION);
            ptr::write(self.word(OFF_SIZE), self.size as u64);
        }
        let mut guard = ZoneGuard { zone: self };
        guard.format_arena();
    }
}

impl std::fmt::Debug for SharedZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedZone")
            .field("path", &self.path)
            .field("size", &self.size)
            .finish()
    }
}

/// Nonzero id stored in the lock word: the process id
#[inline]
fn lock_owner_id() -> u32 {
    std::process::id().max(1)
}

/// Exclusive access to a zone's header and arena
///
/// Holding a guard means holding the zone lock; dropping it releases the
/// lock. Offsets handed out and accepted here are zone-relative.
pub struct ZoneGuard<'a> {
    zone: &'a SharedZone,
}

impl ZoneGuard<'_> {
    #[inline]
    fn check(&self, off: usize, len: usize) -> Result<(), ZoneError> {
        match off.checked_add(len) {
            Some(end) if off >= HEADER_SIZE && end <= self.zone.size => Ok(()),
            _ => Err(ZoneError::Corrupted { offset: off }),
        }
    }

    pub(crate) fn read_u64(&self, off: usize) -> Result<u64, ZoneError> {
        if off % 8 != 0 || off.checked_add(8).is_none_or(|end| end > self.zone.size) {
            return Err(ZoneError::Corrupted { offset: off });
        }
        // SAFETY: bounds and alignment checked above, lock held
        Ok(unsafe { ptr::read(self.zone.word(off)) })
    }

    pub(crate) fn write_u64(&mut self, off: usize, value: u64) -> Result<(), ZoneError> {
        if off % 8 != 0 || off.checked_add(8).is_none_or(|end| end > self.zone.size) {
            return Err(ZoneError::Corrupted { offset: off });
        }
        // SAFETY: bounds and alignment checked above, lock held
        unsafe { ptr::write(self.zone.word(off), value) };
        Ok(())
    }

    /// Read a stored offset, rejecting anything outside the arena
    pub(crate) fn read_offset(&self, off: usize) -> Result<usize, ZoneError> {
        let value = self.read_u64(off)?;
        let value = usize::try_from(value).map_err(|_| ZoneError::Corrupted { offset: off })?;
        if value != 0 && (value < HEADER_SIZE || value >= self.zone.size) {
            return Err(ZoneError::Corrupted { offset: off });
        }
        Ok(value)
    }

    pub(crate) fn bytes(&self, off: usize, len: usize) -> Result<&[u8], ZoneError> {
        self.check(off, len)?;
        // SAFETY: range checked, lock held, no &mut alias while &self lives
        Ok(unsafe { std::slice::from_raw_parts(self.zone.base.as_ptr().add(off), len) })
    }

    pub(crate) fn bytes_mut(&mut self, off: usize, len: usize) -> Result<&mut [u8], ZoneError> {
        self.check(off, len)?;
        // SAFETY: range checked, lock held, &mut self rules out aliasing
        Ok(unsafe { std::slice::from_raw_parts_mut(self.zone.base.as_ptr().add(off), len) })
    }

    /// Allocate `len` bytes; `Ok(None)` when no free block is big enough
    pub fn alloc(&mut self, len: usize) -> Result<Option<usize>, ZoneError> {
        let Some(need) = len.checked_add(BLOCK_HEADER).map(align_up) else {
            return Ok(None);
        };
        let need = need.max(MIN_BLOCK);

        let mut prev = 0usize;
        let mut cur = self.read_offset(OFF_FREE_HEAD)?;
        while cur != 0 {
            let size = self.block_size(cur)?;
            let next = self.read_offset(cur + 8)?;

            if size >= need {
                let taken = if size - need >= MIN_BLOCK {
                    let rest = cur + need;
                    self.write_u64(rest, (size - need) as u64)?;
                    self.write_u64(rest + 8, next as u64)?;
                    self.link_free(prev, rest)?;
                    self.write_u64(cur, need as u64)?;
                    need
                } else {
                    self.link_free(prev, next)?;
                    size
                };
                self.write_u64(cur + 8, ALLOCATED)?;
                self.add_counters(taken as i64, 1)?;
                return Ok(Some(cur + BLOCK_HEADER));
            }

            prev = cur;
            cur = next;
        }
        Ok(None)
    }

    /// Return a block obtained from [`ZoneGuard::alloc`]
    pub fn free(&mut self, payload: usize) -> Result<(), ZoneError> {
        let block = payload
            .checked_sub(BLOCK_HEADER)
            .filter(|b| *b >= HEADER_SIZE)
            .ok_or(ZoneError::Corrupted { offset: payload })?;
        if self.read_u64(block + 8)? != ALLOCATED {
            return Err(ZoneError::Corrupted { offset: block });
        }
        let mut size = self.block_size(block)?;
        self.add_counters(-(size as i64), -1)?;

        let mut prev = 0usize;
        let mut next = self.read_offset(OFF_FREE_HEAD)?;
        while next != 0 && next < block {
            prev = next;
            next = self.read_offset(next + 8)?;
        }

        // merge with the following block
        let mut after = next;
        if next != 0 && block + size == next {
            size += self.block_size(next)?;
            after = self.read_offset(next + 8)?;
        }
        self.write_u64(block, size as u64)?;
        self.write_u64(block + 8, after as u64)?;

        // merge into the preceding block
        if prev != 0 {
            let prev_size = self.block_size(prev)?;
            if prev + prev_size == block {
                self.write_u64(prev, (prev_size + size) as u64)?;
                self.write_u64(prev + 8, after as u64)?;
                return Ok(());
            }
        }
        self.link_free(prev, block)
    }

    /// Usable bytes of an allocation
    pub fn usable_size(&self, payload: usize) -> Result<usize, ZoneError> {
        let block = payload
            .checked_sub(BLOCK_HEADER)
            .ok_or(ZoneError::Corrupted { offset: payload })?;
        Ok(self.block_size(block)? - BLOCK_HEADER)
    }

    pub fn stats(&self) -> Result<ZoneStats, ZoneError> {
        Ok(ZoneStats {
            capacity: self.zone.size - HEADER_SIZE,
            used: self.read_u64(OFF_USED)? as usize,
            allocations: self.read_u64(OFF_ALLOCATIONS)? as usize,
        })
    }

    /// Drop every allocation and empty the queue
    pub fn reset(&mut self) {
        tracing::warn!(path = %self.zone.path.display(), "resetting shared zone");
        self.format_arena();
    }

    fn format_arena(&mut self) {
        let first = HEADER_SIZE;
        let size = self.zone.size - HEADER_SIZE;
        let words = [
            (OFF_FREE_HEAD, first as u64),
            (OFF_USED, 0),
            (OFF_ALLOCATIONS, 0),
            (OFF_QUEUE_HEAD, 0),
            (OFF_QUEUE_TAIL, 0),
            (OFF_QUEUE_LEN, 0),
            (first, size as u64),
            (first + 8, 0),
        ];
        for (off, value) in words {
            // SAFETY: fixed offsets inside the header and first block
            unsafe { ptr::write(self.zone.word(off), value) };
        }
    }

    fn block_size(&self, block: usize) -> Result<usize, ZoneError> {
        let size = self.read_u64(block)? as usize;
        if size < MIN_BLOCK || size % ALIGN != 0 || block.saturating_add(size) > self.zone.size {
            return Err(ZoneError::Corrupted { offset: block });
        }
        Ok(size)
    }

    fn link_free(&mut self, prev: usize, next: usize) -> Result<(), ZoneError> {
        if prev == 0 {
            self.write_u64(OFF_FREE_HEAD, next as u64)
        } else {
            self.write_u64(prev + 8, next as u64)
        }
    }

    fn add_counters(&mut self, bytes: i64, allocations: i64) -> Result<(), ZoneError> {
        let used = self.read_u64(OFF_USED)?.wrapping_add_signed(bytes);
        let count = self.read_u64(OFF_ALLOCATIONS)?.wrapping_add_signed(allocations);
        self.write_u64(OFF_USED, used)?;
        self.write_u64(OFF_ALLOCATIONS, count)
    }
}

impl Drop for ZoneGuard<'_> {
    fn drop(&mut self) {
        self.zone.lock_word().store(0, Ordering::Release);
    }
}

#[cfg(test)]
#[path = "zone_test.rs"]
mod zone_test;
