//! Consumer side: completion polling and credit reclamation.
//!
//! The receiving CPU never runs in reaction to a one-sided write, so a
//! consumer discovers finished segments by polling footer counters:
//! [`RingIterator::has_next`] is one fresh counter read per live lane,
//! never an internal wait. Segments a consumer has taken via
//! [`RingIterator::next`] stay unavailable to their producer until the
//! consumer explicitly returns them with
//! [`RingIterator::free_prev_segments`]; that handoff is the only thing
//! that ever unblocks a stalled writer, because the arena is remotely
//! writable and early reuse would let a producer overwrite bytes still
//! being read.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::backoff::Backoff;
use crate::error::Result;
use crate::memory::Arena;
use crate::registry::Registry;
use crate::ring::{RingDescriptor, SegmentMeta};

/// Outcome of one completion poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// A segment's payload is ready; call [`RingIterator::next`].
    Ready,
    /// Nothing consumable this pass; the caller decides when to retry.
    Pending,
    /// Every lane has delivered its end-flagged segment. Terminal.
    Closed,
}

struct LaneCursor {
    segments: Vec<SegmentMeta>,
    next: usize,
    prev_footer: Option<u64>,
    credit_offset: u64,
    retired: bool,
}

struct Confirmed {
    payload: u64,
    len: u32,
    footer: u64,
    lane: usize,
}

/// In-order consumer over all lanes of one ring.
pub struct RingIterator {
    arena: Arc<Arena>,
    ring_name: String,
    capacity: usize,
    lanes: Vec<LaneCursor>,
    cursor: usize,
    live: usize,
    confirmed: Option<Confirmed>,
    delivered: ArrayQueue<u64>,
}

impl RingIterator {
    /// Retrieve the named ring's metadata and start polling it.
    pub fn attach(name: &str, registry: &Registry) -> Result<Self> {
        let ring = registry.retrieve_ring(name)?;
        Ok(Self::new(&ring, Arc::clone(registry.arena())))
    }

    /// Start polling a ring described by `ring`, local to `arena`.
    pub fn new(ring: &RingDescriptor, arena: Arc<Arena>) -> Self {
        let lanes: Vec<LaneCursor> = (0..ring.lane_count)
            .map(|lane| LaneCursor {
                segments: ring.lane_segments(lane),
                next: 0,
                prev_footer: None,
                credit_offset: ring.credit_offset(lane),
                retired: false,
            })
            .collect();
        let live = lanes.len();
        Self {
            arena,
            ring_name: ring.name.clone(),
            capacity: ring.segment_capacity,
            lanes,
            cursor: 0,
            live,
            confirmed: None,
            delivered: ArrayQueue::new(ring.segments.len().max(1)),
        }
    }

    /// Poll for the next consumable segment, scanning lanes round-robin
    /// in their striped ring order. One fresh footer read per lane, no
    /// waiting: `Pending` means retry later, `Closed` is terminal.
    ///
    /// A `Ready` result is sticky until [`RingIterator::next`] takes
    /// the confirmed segment.
    pub fn has_next(&mut self) -> PollResult {
        if self.confirmed.is_some() {
            return PollResult::Ready;
        }
        let lane_count = self.lanes.len();
        for step in 0..lane_count {
            let li = (self.cursor + step) % lane_count;
            if self.lanes[li].retired {
                continue;
            }

            // The previously delivered footer is re-read fresh each
            // pass: its end flag may land after the segment was
            // consumed (a close racing a fast consumer).
            if let Some(prev) = self.lanes[li].prev_footer {
                let prev_closed = self
                    .arena
                    .footer_at(prev)
                    .expect("lane footer within arena")
                    .is_end();
                if prev_closed {
                    self.retire(li);
                    continue;
                }
            }

            let seg = self.lanes[li].segments[self.lanes[li].next];
            let footer_offset = seg.offset + self.capacity as u64;
            let footer = self
                .arena
                .footer_at(footer_offset)
                .expect("lane footer within arena");
            let counter = footer.counter();
            let end = footer.is_end();
            if counter > 0 {
                let lane = &mut self.lanes[li];
                lane.prev_footer = Some(footer_offset);
                lane.next = (lane.next + 1) % lane.segments.len();
                self.confirmed = Some(Confirmed {
                    payload: seg.offset,
                    len: counter,
                    footer: footer_offset,
                    lane: li,
                });
                self.cursor = (li + 1) % lane_count;
                return PollResult::Ready;
            }
            if end {
                // Lane closed with nothing in this slot.
                self.retire(li);
            }
        }
        if self.live == 0 {
            PollResult::Closed
        } else {
            PollResult::Pending
        }
    }

    /// View over the confirmed segment's payload; length equals the
    /// footer counter.
    ///
    /// Must be preceded by a `Ready` poll; calling it otherwise is a
    /// contract violation and panics.
    pub fn next(&mut self) -> &[u8] {
        let c = self
            .confirmed
            .take()
            .expect("next() called without a ready segment");
        // The counter is only the completion signal; clearing it here
        // keeps the poll cursor from re-confirming this slot when the
        // lane wraps. The payload stays valid (and the slot stays
        // unavailable to its writer) until the credit is returned.
        self.arena
            .footer_at(c.footer)
            .expect("lane footer within arena")
            .clear_counter();
        let credit_offset = self.lanes[c.lane].credit_offset;
        self.delivered
            .push(credit_offset)
            .expect("delivered segments bounded by ring size");
        self.arena
            .slice(c.payload, c.len as usize)
            .expect("segment payload within arena")
    }

    /// Return the oldest `n` delivered segments to their lanes as
    /// credit. Strictly oldest-first; freeing more than was delivered
    /// stops at the newest delivered slot.
    pub fn free_prev_segments(&mut self, n: u32) {
        for _ in 0..n {
            if !self.free_oldest() {
                break;
            }
        }
    }

    /// Return every delivered-but-unfreed segment as credit.
    pub fn free_all_prev_segments(&mut self) {
        while self.free_oldest() {}
    }

    /// Delivered segments not yet returned as credit.
    pub fn outstanding(&self) -> usize {
        self.delivered.len()
    }

    fn free_oldest(&mut self) -> bool {
        match self.delivered.pop() {
            Some(credit) => {
                self.arena
                    .credit_at(credit)
                    .expect("lane credit within arena")
                    .fetch_add(1, Ordering::AcqRel);
                true
            }
            None => false,
        }
    }

    fn retire(&mut self, lane: usize) {
        if !self.lanes[lane].retired {
            self.lanes[lane].retired = true;
            self.live -= 1;
            tracing::debug!(ring = %self.ring_name, lane, live = self.live, "lane drained");
        }
    }
}

/// One-shot consumer: drains a ring to completion into a single
/// contiguous buffer.
///
/// Intended for small, bounded consumption: it frees segments as it
/// copies, but the output buffer grows with the stream, so it is not
/// suited to rings with an unbounded producer.
pub struct RingReader {
    iter: RingIterator,
}

impl RingReader {
    /// Retrieve the named ring's metadata and prepare to drain it.
    pub fn attach(name: &str, registry: &Registry) -> Result<Self> {
        Ok(Self {
            iter: RingIterator::attach(name, registry)?,
        })
    }

    /// Drain until every lane has closed, concatenating all payloads
    /// in delivery order.
    pub fn read_all(mut self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut backoff = Backoff::new();
        loop {
            match self.iter.has_next() {
                PollResult::Ready => {
                    let payload = self.iter.next();
                    out.extend_from_slice(payload);
                    self.iter.free_all_prev_segments();
                }
                PollResult::Pending => backoff.snooze(),
                PollResult::Closed => break,
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegflowConfig;
    use crate::types::OptimizationMode;
    use crate::writer::RingWriter;

    fn setup(segments: usize, lanes: u32) -> Registry {
        let cfg = SegflowConfig {
            full_segment_size: 256,
            segments_per_ring: segments,
            lane_count: lanes,
            mode: OptimizationMode::Bw,
            ..SegflowConfig::default()
        };
        let reg = Registry::new(Arc::new(Arena::new(1024 * 1024)));
        reg.register_ring("r", 1, &cfg).unwrap();
        reg
    }

    #[test]
    fn test_pending_on_unwritten_ring() {
        let reg = setup(4, 1);
        let mut it = RingIterator::attach("r", &reg).unwrap();
        assert_eq!(it.has_next(), PollResult::Pending);
        assert_eq!(it.has_next(), PollResult::Pending);
    }

    #[test]
    fn test_empty_close_reports_closed() {
        let reg = setup(4, 1);
        let mut w = RingWriter::attach("r", &reg).unwrap();
        assert!(w.close());
        let mut it = RingIterator::attach("r", &reg).unwrap();
        assert_eq!(it.has_next(), PollResult::Closed);
    }

    #[test]
    fn test_delivers_partial_segment_then_closes() {
        let reg = setup(4, 1);
        let mut w = RingWriter::attach("r", &reg).unwrap();
        assert!(w.add(b"last tuples"));
        assert!(w.close());

        let mut it = RingIterator::attach("r", &reg).unwrap();
        assert_eq!(it.has_next(), PollResult::Ready);
        assert_eq!(it.next(), b"last tuples");
        assert_eq!(it.has_next(), PollResult::Closed);
    }

    #[test]
    fn test_ready_is_sticky_until_next() {
        let reg = setup(4, 1);
        let mut w = RingWriter::attach("r", &reg).unwrap();
        assert!(w.add(b"one"));
        assert!(w.close());

        let mut it = RingIterator::attach("r", &reg).unwrap();
        assert_eq!(it.has_next(), PollResult::Ready);
        assert_eq!(it.has_next(), PollResult::Ready);
        assert_eq!(it.next(), b"one");
    }

    #[test]
    #[should_panic(expected = "without a ready segment")]
    fn test_next_without_ready_panics() {
        let reg = setup(4, 1);
        let mut it = RingIterator::attach("r", &reg).unwrap();
        let _ = it.next();
    }

    #[test]
    fn test_freeing_returns_credit_oldest_first() {
        let reg = setup(2, 1);
        let ring = reg.retrieve_ring("r").unwrap();
        let cap = ring.segment_capacity;
        let mut w = RingWriter::attach("r", &reg).unwrap();
        assert!(w.add(&vec![1u8; cap]));
        assert!(w.add(&vec![2u8; cap]));
        assert!(w.close());

        let credit = reg.arena().credit_at(ring.credit_offset(0)).unwrap();
        let before = credit.load(Ordering::Acquire);

        let mut it = RingIterator::attach("r", &reg).unwrap();
        assert_eq!(it.has_next(), PollResult::Ready);
        let _ = it.next();
        assert_eq!(it.has_next(), PollResult::Ready);
        let _ = it.next();
        assert_eq!(it.outstanding(), 2);
        // Delivery cleared the completion signal, but no credit has
        // been returned yet.
        let f0 = reg
            .arena()
            .footer_at(ring.footer_offset(&ring.segments[0]))
            .unwrap();
        assert_eq!(f0.counter(), 0);
        assert_eq!(credit.load(Ordering::Acquire), before);

        it.free_prev_segments(1);
        assert_eq!(it.outstanding(), 1);
        assert_eq!(credit.load(Ordering::Acquire), before + 1);

        it.free_all_prev_segments();
        assert_eq!(it.outstanding(), 0);
        assert_eq!(credit.load(Ordering::Acquire), before + 2);
    }

    #[test]
    fn test_freeing_beyond_delivered_is_a_noop() {
        let reg = setup(4, 1);
        let mut it = RingIterator::attach("r", &reg).unwrap();
        it.free_prev_segments(3);
        assert_eq!(it.outstanding(), 0);
    }

    #[test]
    fn test_late_end_flag_still_observed() {
        let reg = setup(2, 1);
        let ring = reg.retrieve_ring("r").unwrap();
        let cap = ring.segment_capacity;
        let mut w = RingWriter::attach("r", &reg).unwrap();
        assert!(w.add(&vec![1u8; cap]));

        let mut it = RingIterator::attach("r", &reg).unwrap();
        assert_eq!(it.has_next(), PollResult::Ready);
        let _ = it.next();
        it.free_all_prev_segments();
        assert_eq!(it.has_next(), PollResult::Pending);

        // The close lands after the final segment was already consumed
        // and freed; the re-polled footer still surfaces it.
        assert!(w.close());
        assert_eq!(it.has_next(), PollResult::Closed);
    }

    #[test]
    fn test_read_all_concatenates_stream() {
        let reg = setup(4, 1);
        let mut w = RingWriter::attach("r", &reg).unwrap();
        assert!(w.add(b"alpha "));
        assert!(w.add(b"beta "));
        assert!(w.add(b"gamma"));
        assert!(w.close());

        let reader = RingReader::attach("r", &reg).unwrap();
        assert_eq!(reader.read_all(), b"alpha beta gamma");
    }
}
