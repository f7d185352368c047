//! Name-indexed broker for ring and flow metadata.
//!
//! The registry owns the arena reservations behind every ring, hands
//! out caller-owned metadata copies, assigns writer lanes round-robin,
//! and keeps the rendezvous cells the arrival barrier runs on. In a
//! distributed deployment this broker sits behind the registry service
//! endpoint named in the config; the in-process surface is the same.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::barrier::BarrierCell;
use crate::config::SegflowConfig;
use crate::error::{Result, SegflowError};
use crate::memory::Arena;
use crate::ring::{LaneHandle, RingDescriptor};
use crate::types::{LaneId, NodeId, OptimizationMode};

/// Metadata describing one flow's participants and ring geometry.
#[derive(Debug, Clone)]
pub struct FlowHandle {
    /// Unique flow name.
    pub name: String,
    /// Nodes producing into the flow.
    pub sources: Vec<NodeId>,
    /// Nodes consuming from the flow.
    pub targets: Vec<NodeId>,
    /// Segments per target ring.
    pub segments_per_ring: usize,
    /// Payload bytes per segment.
    pub segment_capacity: usize,
    /// Transfer strategy for the flow's rings.
    pub mode: OptimizationMode,
}

struct RingEntry {
    descriptor: RingDescriptor,
    claimed: LaneId,
}

struct Inner {
    rings: HashMap<String, RingEntry>,
    flows: HashMap<String, FlowHandle>,
    barriers: HashMap<String, Arc<BarrierCell>>,
}

/// In-process metadata broker backed by one arena.
pub struct Registry {
    arena: Arc<Arena>,
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new(arena: Arc<Arena>) -> Self {
        Self {
            arena,
            inner: Mutex::new(Inner {
                rings: HashMap::new(),
                flows: HashMap::new(),
                barriers: HashMap::new(),
            }),
        }
    }

    /// The arena all registered rings live in.
    pub fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| SegflowError::LockPoisoned("registry"))
    }

    /// Create and publish a ring under `name`.
    ///
    /// Fails on a name collision or when the arena lacks contiguous
    /// space; a failed reservation never leaves a half-registered name.
    pub fn register_ring(
        &self,
        name: &str,
        node: NodeId,
        config: &SegflowConfig,
    ) -> Result<RingDescriptor> {
        let mut inner = self.lock()?;
        if inner.rings.contains_key(name) {
            return Err(SegflowError::NameCollision { name: name.into() });
        }
        let descriptor = RingDescriptor::reserve(&self.arena, name, node, config)?;
        inner.rings.insert(
            name.to_string(),
            RingEntry {
                descriptor: descriptor.clone(),
                claimed: 0,
            },
        );
        tracing::debug!(name, node, lanes = config.lane_count, "ring registered");
        Ok(descriptor)
    }

    /// Caller-owned copy of the full ring metadata.
    pub fn retrieve_ring(&self, name: &str) -> Result<RingDescriptor> {
        let inner = self.lock()?;
        inner
            .rings
            .get(name)
            .map(|e| e.descriptor.clone())
            .ok_or_else(|| SegflowError::unknown_ring(name))
    }

    /// Claim the next writer lane of `name`, round-robin.
    ///
    /// Claims beyond the lane count wrap and reuse lanes; that is a
    /// defined fallback, not an error.
    pub fn join_lane(&self, name: &str) -> Result<LaneHandle> {
        let mut inner = self.lock()?;
        let entry = inner
            .rings
            .get_mut(name)
            .ok_or_else(|| SegflowError::unknown_ring(name))?;
        let lane = entry.claimed % entry.descriptor.lane_count;
        if entry.claimed >= entry.descriptor.lane_count {
            tracing::warn!(name, lane, claim = entry.claimed, "lane claims wrapped");
        }
        entry.claimed += 1;
        Ok(LaneHandle {
            ring: entry.descriptor.clone(),
            lane,
        })
    }

    /// Publish flow metadata under its name.
    pub fn register_flow(&self, flow: FlowHandle) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.flows.contains_key(&flow.name) {
            return Err(SegflowError::NameCollision {
                name: flow.name.clone(),
            });
        }
        tracing::debug!(
            name = %flow.name,
            sources = flow.sources.len(),
            targets = flow.targets.len(),
            "flow registered"
        );
        inner.flows.insert(flow.name.clone(), flow);
        Ok(())
    }

    /// Caller-owned copy of a flow's metadata.
    pub fn retrieve_flow(&self, name: &str) -> Result<FlowHandle> {
        let inner = self.lock()?;
        inner
            .flows
            .get(name)
            .cloned()
            .ok_or_else(|| SegflowError::unknown_flow(name))
    }

    /// Arm (or re-arm) the arrival barrier for `flow`.
    ///
    /// Exactly once per flow execution, by the coordinator, before any
    /// participant attaches. Expected counts come from the registered
    /// flow metadata.
    pub fn init_barrier(&self, flow: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let handle = inner
            .flows
            .get(flow)
            .ok_or_else(|| SegflowError::unknown_flow(flow))?;
        let (sources, targets) = (handle.sources.len() as u32, handle.targets.len() as u32);
        let cell = inner
            .barriers
            .entry(flow.to_string())
            .or_insert_with(|| Arc::new(BarrierCell::new()));
        cell.reset(sources, targets);
        tracing::debug!(flow, sources, targets, "barrier armed");
        Ok(())
    }

    pub(crate) fn barrier_cell(&self, flow: &str) -> Result<Arc<BarrierCell>> {
        let inner = self.lock()?;
        inner
            .barriers
            .get(flow)
            .cloned()
            .ok_or_else(|| SegflowError::BarrierUninitialized { flow: flow.into() })
    }
}
