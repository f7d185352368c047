//! Distributed arrival barrier.
//!
//! Rendezvous keyed by (flow, role): every participant of a role
//! increments the role's arrived counter, then polls until the counter
//! reaches the expected participant count taken from the flow's
//! registered metadata. All same-role callers are released together;
//! the two roles never block on each other. There is no timeout: a
//! participant that never arrives stalls its whole role, which is the
//! accepted liveness limitation within a single flow execution.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::backoff::Backoff;
use crate::error::Result;
use crate::registry::Registry;
use crate::types::Role;

struct RoleCell {
    expected: AtomicU32,
    arrived: AtomicU32,
}

impl RoleCell {
    fn new() -> Self {
        Self {
            expected: AtomicU32::new(0),
            arrived: AtomicU32::new(0),
        }
    }
}

/// Shared rendezvous state for one flow, held by the registry.
pub(crate) struct BarrierCell {
    epoch: AtomicU64,
    sources: RoleCell,
    targets: RoleCell,
}

impl BarrierCell {
    pub(crate) fn new() -> Self {
        Self {
            epoch: AtomicU64::new(0),
            sources: RoleCell::new(),
            targets: RoleCell::new(),
        }
    }

    /// Arm the barrier for a fresh flow execution: both role counters
    /// reset, epoch bumped. Coordinator-only, before any participant
    /// attaches.
    pub(crate) fn reset(&self, sources: u32, targets: u32) {
        self.sources.expected.store(sources, Ordering::Release);
        self.sources.arrived.store(0, Ordering::Release);
        self.targets.expected.store(targets, Ordering::Release);
        self.targets.arrived.store(0, Ordering::Release);
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }
}

/// One participant's handle on a flow's rendezvous.
///
/// Single use per [`Registry::init_barrier`]: re-arriving after a
/// release without a fresh init is unsupported.
pub struct ArrivalBarrier {
    flow: String,
    cell: Arc<BarrierCell>,
}

impl ArrivalBarrier {
    /// Attach to the rendezvous state of `flow`.
    ///
    /// The coordinator must have called [`Registry::init_barrier`]
    /// first; attaching earlier fails.
    pub fn attach(flow: &str, registry: &Registry) -> Result<Self> {
        Ok(Self {
            flow: flow.to_string(),
            cell: registry.barrier_cell(flow)?,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_cell(flow: &str, cell: Arc<BarrierCell>) -> Self {
        Self {
            flow: flow.to_string(),
            cell,
        }
    }

    /// Arrive as a source and wait until every source has arrived.
    pub fn arrive_wait_sources(&self) {
        self.arrive_wait(Role::Source);
    }

    /// Arrive as a target and wait until every target has arrived.
    pub fn arrive_wait_targets(&self) {
        self.arrive_wait(Role::Target);
    }

    fn arrive_wait(&self, role: Role) {
        let cell = match role {
            Role::Source => &self.cell.sources,
            Role::Target => &self.cell.targets,
        };
        let epoch = self.cell.epoch.load(Ordering::Acquire);
        let expected = cell.expected.load(Ordering::Acquire);
        let arrived = cell.arrived.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(flow = %self.flow, %role, arrived, expected, epoch, "barrier arrival");
        if arrived >= expected {
            return;
        }
        let mut backoff = Backoff::new();
        while cell.arrived.load(Ordering::Acquire) < expected {
            backoff.snooze();
        }
    }
}
