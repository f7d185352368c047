//! Runtime-configurable parameters for segflow rings.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `SEGFLOW_`) or by constructing a custom `SegflowConfig`.
//! The config is an explicit value handed to constructors; nothing in
//! this crate reads mutable process-wide state.

use crate::memory::footer::FOOTER_SIZE;
use crate::types::OptimizationMode;

/// Geometry and strategy for a segment ring.
#[derive(Debug, Clone)]
pub struct SegflowConfig {
    /// Full on-wire segment size in bytes: payload capacity plus the
    /// trailing footer. Must be a multiple of 8 so footers stay aligned
    /// across the ring.
    pub full_segment_size: usize,

    /// Total segments in the ring, across all lanes.
    pub segments_per_ring: usize,

    /// Number of concurrent writer lanes striped over the ring.
    pub lane_count: u32,

    /// Transfer strategy for producers attached to the ring.
    pub mode: OptimizationMode,

    /// Endpoint of the registry service publishing ring metadata.
    pub registry_endpoint: String,
}

impl Default for SegflowConfig {
    fn default() -> Self {
        Self {
            full_segment_size: 64 * 1024,
            segments_per_ring: 8,
            lane_count: 1,
            mode: OptimizationMode::Bw,
            registry_endpoint: "127.0.0.1:5300".into(),
        }
    }
}

impl SegflowConfig {
    /// Payload bytes available per segment (excluding the footer).
    pub fn segment_capacity(&self) -> usize {
        self.full_segment_size - FOOTER_SIZE
    }

    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `SEGFLOW_FULL_SEGMENT_SIZE`
    /// - `SEGFLOW_SEGMENTS_PER_RING`
    /// - `SEGFLOW_LANE_COUNT`
    /// - `SEGFLOW_MODE` ("bw" or "lat")
    /// - `SEGFLOW_REGISTRY_ENDPOINT`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("SEGFLOW_FULL_SEGMENT_SIZE") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.full_segment_size = n;
            }
        }
        if let Ok(v) = std::env::var("SEGFLOW_SEGMENTS_PER_RING") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.segments_per_ring = n;
            }
        }
        if let Ok(v) = std::env::var("SEGFLOW_LANE_COUNT") {
            if let Ok(n) = v.parse::<u32>() {
                cfg.lane_count = n;
            }
        }
        if let Ok(v) = std::env::var("SEGFLOW_MODE") {
            match v.as_str() {
                "bw" => cfg.mode = OptimizationMode::Bw,
                "lat" => cfg.mode = OptimizationMode::Lat,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("SEGFLOW_REGISTRY_ENDPOINT") {
            cfg.registry_endpoint = v;
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacity_excludes_footer() {
        let cfg = SegflowConfig::default();
        assert_eq!(cfg.segment_capacity(), cfg.full_segment_size - FOOTER_SIZE);
    }

    #[test]
    fn test_default_geometry() {
        let cfg = SegflowConfig::default();
        assert_eq!(cfg.segments_per_ring, 8);
        assert_eq!(cfg.lane_count, 1);
        assert_eq!(cfg.mode, OptimizationMode::Bw);
    }

    #[test]
    fn test_explicit_override() {
        let cfg = SegflowConfig {
            full_segment_size: 2048 + FOOTER_SIZE,
            segments_per_ring: 2,
            lane_count: 1,
            ..SegflowConfig::default()
        };
        assert_eq!(cfg.segment_capacity(), 2048);
    }
}
