//! Segment-ring buffer engine for one-sided data flows.
//!
//! Producers append records into lane-striped segment rings inside a
//! remotely-writable memory arena; consumers detect completed segments
//! by polling per-segment footers and return reuse credit explicitly.
//! An arrival barrier sequences a flow's lifecycle phases (attach,
//! produce, drain) across distributed participants.

mod backoff;

pub mod barrier;
pub mod config;
pub mod error;
pub mod memory;
pub mod reader;
pub mod registry;
pub mod ring;
pub mod types;
pub mod writer;

pub use barrier::ArrivalBarrier;
pub use config::SegflowConfig;
pub use error::{Result, SegflowError};
pub use memory::{Arena, FooterView, END_FLAG, FOOTER_SIZE};
pub use reader::{PollResult, RingIterator, RingReader};
pub use registry::{FlowHandle, Registry};
pub use ring::{LaneHandle, RingDescriptor, SegmentMeta};
pub use types::{LaneId, NodeId, OptimizationMode, Role, CACHELINE_SIZE};
pub use writer::RingWriter;
