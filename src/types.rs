/// Unique identifier for a node hosting a buffer or participating in a flow.
pub type NodeId = u32;

/// Index of a writer lane within a ring (0-indexed).
pub type LaneId = u32;

/// Cache line size assumed for credit slots and non-temporal stores.
pub const CACHELINE_SIZE: usize = 64;

/// Transfer strategy for a ring's producers.
///
/// `Bw` batches a full segment per remote write to amortize transfer
/// cost; `Lat` pushes every record immediately to minimize the time
/// until its bytes are placed remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OptimizationMode {
    Bw = 0,
    Lat = 1,
}

impl OptimizationMode {
    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            OptimizationMode::Bw => "bw",
            OptimizationMode::Lat => "lat",
        }
    }
}

impl std::fmt::Display for OptimizationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Which side of a flow a barrier participant belongs to.
///
/// Source and target rendezvous are fully independent: one role's
/// barrier never blocks on the other role's arrivals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Role {
    Source = 0,
    Target = 1,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Source => f.write_str("source"),
            Role::Target => f.write_str("target"),
        }
    }
}
