//! Ring metadata and lane assignment.
//!
//! A ring is a fixed sequence of equal-stride segments carved out of
//! one arena reservation, striped across lanes: lane *i* of *L* owns
//! positions *i, i+L, i+2L, …*. Lanes are disjoint by construction, so
//! concurrent writers never touch the same segment and the payload path
//! needs no locks. Ahead of the segment span sits one cache-line-sized
//! credit slot per lane, pre-charged with the lane's ring depth; the
//! consumer's credit returns land there and gate segment reuse.

use std::sync::atomic::Ordering;

use crate::config::SegflowConfig;
use crate::error::{Result, SegflowError};
use crate::memory::{Arena, FOOTER_SIZE};
use crate::types::{LaneId, NodeId, OptimizationMode, CACHELINE_SIZE};

/// One segment slot: payload bytes followed by the trailing footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentMeta {
    /// Arena offset of the first payload byte.
    pub offset: u64,
    /// Position within the ring (0-indexed).
    pub index: u32,
}

/// Static description of one segment ring on one node.
#[derive(Debug, Clone)]
pub struct RingDescriptor {
    /// Unique ring name, as registered.
    pub name: String,
    /// Node hosting the backing arena.
    pub node: NodeId,
    /// Segment table in ring-position order.
    pub segments: Vec<SegmentMeta>,
    /// Concurrent writer lanes striped over the ring.
    pub lane_count: LaneId,
    /// Payload bytes per segment, excluding the footer.
    pub segment_capacity: usize,
    /// Transfer strategy for producers on this ring.
    pub mode: OptimizationMode,
    credit_base: u64,
}

impl RingDescriptor {
    /// Reserve and initialize a ring against `arena`.
    ///
    /// One contiguous reservation holds the per-lane credit block
    /// followed by the segment span. Fails when the arena lacks
    /// contiguous space or the geometry cannot be striped evenly.
    pub fn reserve(
        arena: &Arena,
        name: impl Into<String>,
        node: NodeId,
        config: &SegflowConfig,
    ) -> Result<Self> {
        let name = name.into();
        let lanes = config.lane_count;
        let segments = config.segments_per_ring;
        if lanes == 0 || segments == 0 || segments % lanes as usize != 0 {
            return Err(SegflowError::InvalidGeometry { segments, lanes });
        }
        if config.full_segment_size <= FOOTER_SIZE || config.full_segment_size % 8 != 0 {
            return Err(SegflowError::MisalignedStride {
                stride: config.full_segment_size,
                required: 8,
            });
        }

        let stride = config.full_segment_size;
        let capacity = config.segment_capacity();
        let credit_span = lanes as usize * CACHELINE_SIZE;
        let base = arena.reserve(credit_span + segments * stride)?;
        let segment_base = base + credit_span as u64;

        let table: Vec<SegmentMeta> = (0..segments)
            .map(|i| SegmentMeta {
                offset: segment_base + (i * stride) as u64,
                index: i as u32,
            })
            .collect();

        let ring = Self {
            name,
            node,
            segments: table,
            lane_count: lanes,
            segment_capacity: capacity,
            mode: config.mode,
            credit_base: base,
        };

        // Pre-charge every lane with its full ring depth and zero the
        // footers so polls see an unwritten ring.
        let depth = ring.segments_per_lane() as u64;
        for lane in 0..lanes {
            arena
                .credit_at(ring.credit_offset(lane))?
                .store(depth, Ordering::Release);
        }
        for seg in &ring.segments {
            arena.footer_at(ring.footer_offset(seg))?.reset();
        }

        tracing::debug!(
            name = %ring.name,
            node,
            segments,
            lanes,
            stride,
            "ring reserved"
        );
        Ok(ring)
    }

    /// Full segment stride: payload capacity plus footer.
    pub fn stride(&self) -> usize {
        self.segment_capacity + FOOTER_SIZE
    }

    /// Total bytes spanned by the segment table.
    pub fn span(&self) -> usize {
        self.segments.len() * self.stride()
    }

    /// Segments owned by each lane.
    pub fn segments_per_lane(&self) -> usize {
        self.segments.len() / self.lane_count as usize
    }

    /// The striped subsequence of segments owned by `lane`, in the
    /// lane's ring order.
    pub fn lane_segments(&self, lane: LaneId) -> Vec<SegmentMeta> {
        self.segments
            .iter()
            .skip(lane as usize)
            .step_by(self.lane_count as usize)
            .copied()
            .collect()
    }

    /// Arena offset of `lane`'s credit counter.
    pub fn credit_offset(&self, lane: LaneId) -> u64 {
        self.credit_base + (lane as usize * CACHELINE_SIZE) as u64
    }

    /// Arena offset of `seg`'s trailing footer.
    pub fn footer_offset(&self, seg: &SegmentMeta) -> u64 {
        seg.offset + self.segment_capacity as u64
    }
}

/// Ring metadata scoped to one claimed lane.
///
/// Returned by a join: the writer that holds a `LaneHandle` owns the
/// lane's segment subsequence exclusively.
#[derive(Debug, Clone)]
pub struct LaneHandle {
    pub ring: RingDescriptor,
    pub lane: LaneId,
}

impl LaneHandle {
    /// The claimed lane's segments, in ring order.
    pub fn segments(&self) -> Vec<SegmentMeta> {
        self.ring.lane_segments(self.lane)
    }

    /// Arena offset of the claimed lane's credit counter.
    pub fn credit_offset(&self) -> u64 {
        self.ring.credit_offset(self.lane)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(segments: usize, lanes: u32) -> SegflowConfig {
        SegflowConfig {
            full_segment_size: 256,
            segments_per_ring: segments,
            lane_count: lanes,
            ..SegflowConfig::default()
        }
    }

    #[test]
    fn test_reserve_basic_geometry() {
        let arena = Arena::new(64 * 1024);
        let ring = RingDescriptor::reserve(&arena, "r", 1, &test_config(8, 2)).unwrap();
        assert_eq!(ring.segments.len(), 8);
        assert_eq!(ring.segment_capacity, 256 - FOOTER_SIZE);
        assert_eq!(ring.stride(), 256);
        assert_eq!(ring.segments_per_lane(), 4);
        assert_eq!(ring.span(), 8 * 256);
    }

    #[test]
    fn test_segment_offsets_are_stride_multiples() {
        let arena = Arena::new(64 * 1024);
        let ring = RingDescriptor::reserve(&arena, "r", 1, &test_config(6, 3)).unwrap();
        let base = ring.segments[0].offset;
        for seg in &ring.segments {
            assert_eq!((seg.offset - base) % ring.stride() as u64, 0);
        }
    }

    #[test]
    fn test_lane_striping_disjoint_and_covering() {
        let arena = Arena::new(64 * 1024);
        let ring = RingDescriptor::reserve(&arena, "r", 1, &test_config(8, 4)).unwrap();
        let mut seen = std::collections::HashSet::new();
        for lane in 0..4 {
            let segs = ring.lane_segments(lane);
            assert_eq!(segs.len(), 2);
            for (k, seg) in segs.iter().enumerate() {
                // lane i owns positions i, i + L, i + 2L, ...
                assert_eq!(seg.index as usize, lane as usize + k * 4);
                assert!(seen.insert(seg.index), "segment owned by two lanes");
            }
        }
        assert_eq!(seen.len(), 8);
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        let arena = Arena::new(64 * 1024);
        assert!(matches!(
            RingDescriptor::reserve(&arena, "r", 1, &test_config(7, 4)),
            Err(SegflowError::InvalidGeometry { .. })
        ));
        assert!(matches!(
            RingDescriptor::reserve(&arena, "r", 1, &test_config(0, 1)),
            Err(SegflowError::InvalidGeometry { .. })
        ));
        assert!(matches!(
            RingDescriptor::reserve(&arena, "r", 1, &test_config(4, 0)),
            Err(SegflowError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn test_misaligned_stride_rejected() {
        let arena = Arena::new(64 * 1024);
        let cfg = SegflowConfig {
            full_segment_size: 250,
            ..test_config(4, 1)
        };
        assert!(matches!(
            RingDescriptor::reserve(&arena, "r", 1, &cfg),
            Err(SegflowError::MisalignedStride { .. })
        ));
    }

    #[test]
    fn test_arena_exhaustion_propagates() {
        let arena = Arena::new(512);
        assert!(matches!(
            RingDescriptor::reserve(&arena, "r", 1, &test_config(8, 1)),
            Err(SegflowError::ArenaExhausted { .. })
        ));
    }

    #[test]
    fn test_credit_precharged_to_lane_depth() {
        let arena = Arena::new(64 * 1024);
        let ring = RingDescriptor::reserve(&arena, "r", 1, &test_config(8, 2)).unwrap();
        for lane in 0..2 {
            let credit = arena.credit_at(ring.credit_offset(lane)).unwrap();
            assert_eq!(credit.load(std::sync::atomic::Ordering::Acquire), 4);
        }
    }

    #[test]
    fn test_lane_handle_scopes_to_claimed_lane() {
        let arena = Arena::new(64 * 1024);
        let ring = RingDescriptor::reserve(&arena, "r", 1, &test_config(8, 4)).unwrap();
        let handle = LaneHandle {
            ring: ring.clone(),
            lane: 3,
        };
        let segs = handle.segments();
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].index, 3);
        assert_eq!(segs[1].index, 7);
        assert_eq!(handle.credit_offset(), ring.credit_offset(3));
    }
}
