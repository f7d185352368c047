//! Pinned, offset-addressed memory arena.
//!
//! The arena models the remotely-writable region an RDMA transport
//! registers on a node: one contiguous, cache-line-aligned allocation
//! that every component addresses exclusively by `(offset, length)`.
//! Bounds are checked here, once, at the boundary; no caller recomputes
//! them. In a distributed deployment the transport substitutes an
//! arena backed by the registered region; the engine code above it is
//! identical because all completion signaling lives inside the region.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::sync::atomic::AtomicU64;
use std::sync::Mutex;

use crate::error::{Result, SegflowError};
use crate::memory::footer::{FooterView, FOOTER_SIZE};
use crate::types::CACHELINE_SIZE;

fn align_up(len: usize) -> usize {
    len.div_ceil(CACHELINE_SIZE) * CACHELINE_SIZE
}

/// A fixed-size, remotely-addressable memory region.
///
/// Ring reservations are carved out front-to-back and live for the
/// arena's lifetime; side allocations made with [`Arena::local_alloc`]
/// sit outside the credit-managed ring protocol and can be returned
/// with [`Arena::local_free`].
pub struct Arena {
    base: *mut u8,
    size: usize,
    bump: Mutex<usize>,
    free_list: Mutex<Vec<(u64, usize)>>,
}

// The arena hands out raw views into one shared region. Cross-thread
// payload safety is the credit protocol's responsibility; all metadata
// access goes through the atomic views below.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Allocate a zeroed region of `size` bytes (rounded up to a whole
    /// number of cache lines).
    pub fn new(size: usize) -> Self {
        let size = align_up(size.max(CACHELINE_SIZE));
        let layout = Layout::from_size_align(size, CACHELINE_SIZE)
            .expect("arena layout within platform limits");
        let base = unsafe { alloc_zeroed(layout) };
        assert!(!base.is_null(), "arena allocation of {size} bytes failed");
        tracing::debug!(size, "arena allocated");
        Self {
            base,
            size,
            bump: Mutex::new(0),
            free_list: Mutex::new(Vec::new()),
        }
    }

    /// Total region size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes not yet handed out to any reservation.
    pub fn remaining(&self) -> usize {
        self.size - *self.bump.lock().expect("arena bump lock")
    }

    /// Reserve `len` contiguous bytes (cache-line aligned) for a ring.
    ///
    /// Reservations are permanent: segment rings are recycled through
    /// credit handoff, never returned to the arena.
    pub fn reserve(&self, len: usize) -> Result<u64> {
        let len = align_up(len);
        let mut bump = self.bump.lock().expect("arena bump lock");
        let available = self.size - *bump;
        if len > available {
            return Err(SegflowError::ArenaExhausted {
                requested: len,
                available,
            });
        }
        let offset = *bump as u64;
        *bump += len;
        Ok(offset)
    }

    /// Allocate scratch space outside the ring protocol.
    pub fn local_alloc(&self, len: usize) -> Result<u64> {
        let len = align_up(len);
        {
            let mut free = self.free_list.lock().expect("arena free-list lock");
            if let Some(pos) = free.iter().position(|&(_, flen)| flen == len) {
                let (offset, _) = free.swap_remove(pos);
                return Ok(offset);
            }
        }
        self.reserve(len)
    }

    /// Return a `local_alloc` allocation for reuse.
    pub fn local_free(&self, offset: u64, len: usize) {
        let mut free = self.free_list.lock().expect("arena free-list lock");
        free.push((offset, align_up(len)));
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<()> {
        let end = (offset as usize).checked_add(len);
        match end {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(SegflowError::OutOfBounds {
                offset,
                len,
                size: self.size,
            }),
        }
    }

    /// Immutable view of `len` bytes at `offset`.
    ///
    /// Callers must hold the segment's credit (or have observed its
    /// published counter) so no writer touches the range concurrently.
    pub fn slice(&self, offset: u64, len: usize) -> Result<&[u8]> {
        self.check_range(offset, len)?;
        Ok(unsafe { std::slice::from_raw_parts(self.base.add(offset as usize), len) })
    }

    /// Copy `bytes` into the region at `offset`.
    ///
    /// This is the local stand-in for a one-sided remote write: plain
    /// byte stores, ordered before any subsequent footer publication.
    pub fn write(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.check_range(offset, bytes.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.add(offset as usize), bytes.len());
        }
        Ok(())
    }

    /// Raw destination pointer for `len` bytes at `offset`, for callers
    /// issuing their own stores (the non-temporal write path).
    pub(crate) fn payload_ptr(&self, offset: u64, len: usize) -> Result<*mut u8> {
        self.check_range(offset, len)?;
        Ok(unsafe { self.base.add(offset as usize) })
    }

    /// Atomic view over the segment footer stored at `offset`.
    pub fn footer_at(&self, offset: u64) -> Result<FooterView<'_>> {
        self.check_range(offset, FOOTER_SIZE)?;
        debug_assert_eq!(offset % 4, 0, "footer offset must be 4-byte aligned");
        Ok(unsafe { FooterView::from_ptr(self.base.add(offset as usize)) })
    }

    /// Atomic view over a lane's credit counter stored at `offset`.
    pub fn credit_at(&self, offset: u64) -> Result<&AtomicU64> {
        self.check_range(offset, 8)?;
        debug_assert_eq!(offset % 8, 0, "credit offset must be 8-byte aligned");
        Ok(unsafe { &*(self.base.add(offset as usize) as *const AtomicU64) })
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.size, CACHELINE_SIZE)
            .expect("arena layout within platform limits");
        unsafe { dealloc(self.base, layout) };
    }
}
