//! Telemetry snapshot, read under the state read lock.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::{NodeId, SeqNo};

/// The memory/disk seqno pair returned by the per-node queries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NodeSeqnos {
    pub memory: SeqNo,
    pub disk: SeqNo,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StreamSeqnos {
    pub last_write_seqno: SeqNo,
    pub last_ack_seqno: SeqNo,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NodeStreams {
    pub memory: StreamSeqnos,
    pub disk: StreamSeqnos,
}

#[derive(Clone, Debug, Serialize)]
pub struct MonitorStats {
    pub num_tracked: usize,
    pub high_prepared_seqno: SeqNo,
    pub last_tracked_seqno: SeqNo,
    pub first_chain_size: usize,
    pub first_chain_majority: usize,
    pub nodes: BTreeMap<NodeId, NodeStreams>,
}
