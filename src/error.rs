use crate::types::LaneId;

pub type Result<T> = std::result::Result<T, SegflowError>;

#[derive(Debug, thiserror::Error)]
pub enum SegflowError {
    #[error("ring name \"{name}\" is already registered")]
    NameCollision { name: String },

    #[error("arena exhausted: requested {requested} bytes, {available} remaining")]
    ArenaExhausted { requested: usize, available: usize },

    #[error("access out of arena bounds: offset {offset} + len {len} exceeds {size}")]
    OutOfBounds { offset: u64, len: usize, size: usize },

    #[error("no ring registered under \"{name}\"")]
    UnknownRing { name: String },

    #[error("no flow registered under \"{name}\"")]
    UnknownFlow { name: String },

    #[error("invalid ring geometry: {segments} segments cannot be striped across {lanes} lanes")]
    InvalidGeometry { segments: usize, lanes: LaneId },

    #[error("segment stride {stride} is not a multiple of {required} bytes")]
    MisalignedStride { stride: usize, required: usize },

    #[error("barrier for flow \"{flow}\" used before init")]
    BarrierUninitialized { flow: String },

    #[error("internal lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl SegflowError {
    /// Create an `UnknownRing` error.
    pub fn unknown_ring(name: impl Into<String>) -> Self {
        Self::UnknownRing { name: name.into() }
    }

    /// Create an `UnknownFlow` error.
    pub fn unknown_flow(name: impl Into<String>) -> Self {
        Self::UnknownFlow { name: name.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_collision_display() {
        let e = SegflowError::NameCollision {
            name: "shuffle-0".into(),
        };
        assert_eq!(e.to_string(), "ring name \"shuffle-0\" is already registered");
    }

    #[test]
    fn test_arena_exhausted_display() {
        let e = SegflowError::ArenaExhausted {
            requested: 4096,
            available: 1024,
        };
        assert_eq!(
            e.to_string(),
            "arena exhausted: requested 4096 bytes, 1024 remaining"
        );
    }

    #[test]
    fn test_helper_constructors() {
        assert!(matches!(
            SegflowError::unknown_ring("r"),
            SegflowError::UnknownRing { .. }
        ));
        assert!(matches!(
            SegflowError::unknown_flow("f"),
            SegflowError::UnknownFlow { .. }
        ));
    }

    #[test]
    fn test_all_variants_display() {
        // Ensure all variants produce non-empty display strings
        let errors: Vec<SegflowError> = vec![
            SegflowError::NameCollision { name: "x".into() },
            SegflowError::ArenaExhausted {
                requested: 1,
                available: 0,
            },
            SegflowError::OutOfBounds {
                offset: 10,
                len: 20,
                size: 16,
            },
            SegflowError::unknown_ring("r"),
            SegflowError::unknown_flow("f"),
            SegflowError::InvalidGeometry {
                segments: 7,
                lanes: 4,
            },
            SegflowError::MisalignedStride {
                stride: 100,
                required: 8,
            },
            SegflowError::BarrierUninitialized { flow: "f".into() },
            SegflowError::LockPoisoned("registry"),
        ];
        for e in &errors {
            assert!(!e.to_string().is_empty(), "empty display for {e:?}");
        }
    }
}
