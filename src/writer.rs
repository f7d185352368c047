//! Per-lane producer: appends records into the lane's segment
//! subsequence, finalizes footers, rotates slots, and blocks on the
//! consumer's credit when the ring is full.
//!
//! A `RingWriter` owns exactly one lane. Concurrent producers use
//! independent writers on independent lanes; the striping in
//! [`crate::ring`] guarantees they never touch the same segment, so
//! the payload path carries no locks. The single synchronization point
//! with the consumer is the lane's credit counter.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::backoff::Backoff;
use crate::error::Result;
use crate::memory::{Arena, END_FLAG};
use crate::registry::Registry;
use crate::ring::{LaneHandle, SegmentMeta};
use crate::types::{LaneId, OptimizationMode, CACHELINE_SIZE};

pub struct RingWriter {
    arena: Arc<Arena>,
    ring_name: String,
    lane: LaneId,
    segments: Vec<SegmentMeta>,
    credit_offset: u64,
    capacity: usize,
    mode: OptimizationMode,
    slot: usize,
    cursor: usize,
    staging: Vec<u8>,
    slot_open: bool,
    flushed: u64,
    last_footer: Option<u64>,
    closed: bool,
    stall_count: u64,
    sent_count: u64,
}

impl RingWriter {
    /// Join the named ring and attach to the next unclaimed lane.
    pub fn attach(name: &str, registry: &Registry) -> Result<Self> {
        let lane = registry.join_lane(name)?;
        Ok(Self::new(Arc::clone(registry.arena()), lane))
    }

    /// Attach to an already-claimed lane.
    pub fn new(arena: Arc<Arena>, lane: LaneHandle) -> Self {
        let capacity = lane.ring.segment_capacity;
        let staging = match lane.ring.mode {
            OptimizationMode::Bw => vec![0u8; capacity],
            OptimizationMode::Lat => Vec::new(),
        };
        tracing::debug!(ring = %lane.ring.name, lane = lane.lane, mode = %lane.ring.mode, "writer attached");
        Self {
            arena,
            ring_name: lane.ring.name.clone(),
            lane: lane.lane,
            segments: lane.segments(),
            credit_offset: lane.credit_offset(),
            capacity,
            mode: lane.ring.mode,
            slot: 0,
            cursor: 0,
            staging,
            slot_open: false,
            flushed: 0,
            last_footer: None,
            closed: false,
            stall_count: 0,
            sent_count: 0,
        }
    }

    /// Append one record. Returns false when the record exceeds one
    /// segment's capacity (records never span segments) or the writer
    /// is closed.
    ///
    /// Blocks when rotation reaches a slot the consumer has not freed
    /// yet; that credit wait is the backpressure path.
    pub fn add(&mut self, record: &[u8]) -> bool {
        self.append(record, false)
    }

    /// Like [`RingWriter::add`], but payload stores bypass the cache.
    /// Records must be a multiple of the cache line size.
    pub fn add_nontemp(&mut self, record: &[u8]) -> bool {
        if record.len() % CACHELINE_SIZE != 0 {
            return false;
        }
        self.append(record, true)
    }

    /// Finalize the stream: flush the current (possibly partial)
    /// segment with the end flag set, or flag the last finalized
    /// segment when the cursor sits on a boundary. Returns false on a
    /// second close or when the final write fails.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        if self.cursor > 0 {
            return self.finalize(true);
        }
        // Boundary close: the last published footer gets the end flag.
        // On a ring that never saw data, flag the untouched first slot
        // so consumers observe an empty, closed stream.
        let footer_offset = self
            .last_footer
            .unwrap_or_else(|| self.footer_offset(self.segments[self.slot]));
        match self.arena.footer_at(footer_offset) {
            Ok(f) => {
                f.set_end_flag();
                tracing::debug!(ring = %self.ring_name, lane = self.lane, "writer closed on segment boundary");
                true
            }
            Err(e) => {
                tracing::warn!(ring = %self.ring_name, lane = self.lane, error = %e, "close failed");
                false
            }
        }
    }

    /// Number of credit stalls this writer has hit.
    pub fn stall_count(&self) -> u64 {
        self.stall_count
    }

    /// Number of segments flushed to the ring.
    pub fn sent_count(&self) -> u64 {
        self.sent_count
    }

    /// Stalls per flushed segment; 0.0 before the first flush.
    pub fn stall_ratio(&self) -> f64 {
        if self.sent_count == 0 {
            0.0
        } else {
            self.stall_count as f64 / self.sent_count as f64
        }
    }

    fn footer_offset(&self, seg: SegmentMeta) -> u64 {
        seg.offset + self.capacity as u64
    }

    fn append(&mut self, record: &[u8], nontemp: bool) -> bool {
        if self.closed || record.len() > self.capacity {
            return false;
        }
        if record.is_empty() {
            return true;
        }
        // Records never span segments: rotate when this one won't fit.
        if record.len() > self.capacity - self.cursor && !self.finalize(false) {
            return false;
        }

        match self.mode {
            OptimizationMode::Bw => {
                // Stage locally; the whole segment ships in one write.
                let dst = &mut self.staging[self.cursor..self.cursor + record.len()];
                if nontemp {
                    unsafe { copy_nontemporal(dst.as_mut_ptr(), record.as_ptr(), record.len()) };
                } else {
                    dst.copy_from_slice(record);
                }
            }
            OptimizationMode::Lat => {
                // One write per record, straight into the slot. The
                // slot must be credit-clear before its first byte.
                if self.cursor == 0 {
                    self.wait_for_slot();
                }
                let seg = self.segments[self.slot];
                let dst = match self.arena.payload_ptr(seg.offset + self.cursor as u64, record.len())
                {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(ring = %self.ring_name, lane = self.lane, error = %e, "record write failed");
                        return false;
                    }
                };
                unsafe {
                    if nontemp {
                        copy_nontemporal(dst, record.as_ptr(), record.len());
                    } else {
                        std::ptr::copy_nonoverlapping(record.as_ptr(), dst, record.len());
                    }
                }
            }
        }
        self.cursor += record.len();

        if self.cursor == self.capacity {
            return self.finalize(false);
        }
        true
    }

    /// Publish the current segment: payload placed first, footer
    /// counter last. Advances to the lane's next slot.
    fn finalize(&mut self, end: bool) -> bool {
        debug_assert!(self.cursor > 0);
        let seg = self.segments[self.slot];

        if self.mode == OptimizationMode::Bw {
            self.wait_for_slot();
            if let Err(e) = self.arena.write(seg.offset, &self.staging[..self.cursor]) {
                tracing::warn!(ring = %self.ring_name, lane = self.lane, error = %e, "segment write failed");
                return false;
            }
        }

        let footer_offset = self.footer_offset(seg);
        let footer = match self.arena.footer_at(footer_offset) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(ring = %self.ring_name, lane = self.lane, error = %e, "footer write failed");
                return false;
            }
        };
        footer.publish(self.cursor as u32, if end { END_FLAG } else { 0 });

        self.last_footer = Some(footer_offset);
        self.flushed += 1;
        self.sent_count += 1;
        self.cursor = 0;
        self.slot_open = false;
        self.slot = (self.slot + 1) % self.segments.len();
        true
    }

    /// Block until the current slot has been freed by the consumer.
    fn wait_for_slot(&mut self) {
        if self.slot_open {
            return;
        }
        let credit = match self.arena.credit_at(self.credit_offset) {
            Ok(c) => c,
            Err(_) => return,
        };
        if credit.load(Ordering::Acquire) == self.flushed {
            self.stall_count += 1;
            tracing::debug!(
                ring = %self.ring_name,
                lane = self.lane,
                flushed = self.flushed,
                "writer stalled on credit"
            );
            let mut backoff = Backoff::new();
            while credit.load(Ordering::Acquire) == self.flushed {
                backoff.snooze();
            }
        }
        self.slot_open = true;
    }
}

/// Copy `len` bytes with non-temporal stores where the target
/// supports them. `len` must be a multiple of the cache line size.
#[cfg(target_arch = "x86_64")]
unsafe fn copy_nontemporal(dst: *mut u8, src: *const u8, len: usize) {
    use std::arch::x86_64::*;
    debug_assert_eq!(len % CACHELINE_SIZE, 0);
    if dst as usize % 16 != 0 {
        // Streaming stores need 16-byte alignment; fall back.
        std::ptr::copy_nonoverlapping(src, dst, len);
        return;
    }
    let mut off = 0;
    while off < len {
        let chunk = _mm_loadu_si128(src.add(off) as *const __m128i);
        _mm_stream_si128(dst.add(off) as *mut __m128i, chunk);
        off += 16;
    }
    _mm_sfence();
}

#[cfg(not(target_arch = "x86_64"))]
unsafe fn copy_nontemporal(dst: *mut u8, src: *const u8, len: usize) {
    std::ptr::copy_nonoverlapping(src, dst, len);
}
