#![forbid(unsafe_code)]

pub mod core;
pub mod error;
pub mod monitor;
pub mod telemetry;

pub use error::{Error, Severity};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the working set at crate root for convenience
pub use crate::core::{
    ClientCookie, DocKey, InvalidNodeId, Level, Limits, Monotonic, MonotonicError, NodeId, Prepare,
    Requirements, SeqNo, WeaklyMonotonic,
};
pub use crate::monitor::{
    AckError, ActiveDurabilityMonitor, CompletionError, MonitorError, MonitorStats, NodeSeqnos,
    NodeStreams, Partition, Stream, StreamSeqnos, Topology, TopologyError,
};
