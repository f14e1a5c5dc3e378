//! Tracking of in-flight synchronous writes on the active node.
//!
//! The monitor keeps an ordered log of pending prepares, one position per
//! chain node per acknowledgement stream, and decides per requested
//! durability level when each prepare commits (requirement satisfied) or
//! aborts (deadline passed). Everything lives behind one reader/writer lock.
//!
//! Lock discipline: the partition's commit/abort hooks take its hash-bucket
//! lock, and the front-end write path takes that lock before calling
//! [`ActiveDurabilityMonitor::add_sync_write`]. Finalizing under the state
//! lock would therefore form a cycle. Every mutating entry point first
//! splices the resolved writes into a locally-owned batch under the lock,
//! then drains the batch after releasing it.

use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::core::{ClientCookie, DocKey, Level, Limits, MonotonicError, NodeId, Prepare, SeqNo};
use crate::error::Severity;

pub(crate) mod chain;
mod partition;
mod state;
mod stats;
mod sync_write;
mod tracked;

pub use chain::{Topology, TopologyError};
pub use partition::{CompletionError, Partition};
pub use stats::{MonitorStats, NodeSeqnos, NodeStreams, StreamSeqnos};
pub use sync_write::AckError;
pub use tracked::TrackedListError;

use state::{Batch, State};
use sync_write::SyncWrite;

/// The two acknowledgement channels each node reports independently:
/// enqueued in memory, persisted to disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stream {
    Memory,
    Disk,
}

impl Stream {
    pub fn as_str(self) -> &'static str {
        match self {
            Stream::Memory => "memory",
            Stream::Disk => "disk",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MonitorError {
    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("durability level `none` cannot be tracked")]
    LevelNone,

    #[error("seqno must be positive")]
    ZeroSeqno,

    #[error("node `{0}` is not in the current topology")]
    UnknownNode(NodeId),

    #[error("no replication topology has been set")]
    TopologyNotSet,

    #[error("the current topology cannot satisfy any durability requirement")]
    DurabilityImpossible,

    #[error(transparent)]
    Ack(#[from] AckError),

    #[error(transparent)]
    Monotonic(#[from] MonotonicError),

    #[error(transparent)]
    Tracked(#[from] TrackedListError),

    #[error("no tracked write ahead of `{node}` on the {stream} stream")]
    CursorPastTail { node: NodeId, stream: Stream },

    #[error("commit failed for `{key}` at prepare seqno {seqno}: {source}")]
    CommitFailed {
        key: DocKey,
        seqno: SeqNo,
        #[source]
        source: CompletionError,
    },

    #[error("abort failed for `{key}` at prepare seqno {seqno}: {source}")]
    AbortFailed {
        key: DocKey,
        seqno: SeqNo,
        #[source]
        source: CompletionError,
    },
}

impl MonitorError {
    pub fn severity(&self) -> Severity {
        match self {
            MonitorError::Topology(_)
            | MonitorError::LevelNone
            | MonitorError::ZeroSeqno
            | MonitorError::UnknownNode(_) => Severity::Rejection,
            MonitorError::TopologyNotSet
            | MonitorError::DurabilityImpossible
            | MonitorError::Ack(_)
            | MonitorError::Monotonic(_)
            | MonitorError::Tracked(_)
            | MonitorError::CursorPastTail { .. }
            | MonitorError::CommitFailed { .. }
            | MonitorError::AbortFailed { .. } => Severity::Fatal,
        }
    }
}

/// Per-partition monitor for the active ("master") node.
///
/// The owning partition registers prepares, feeds replica acks and local
/// persistence notifications in, and receives commit/abort callbacks out
/// through its [`Partition`] hooks.
pub struct ActiveDurabilityMonitor {
    state: RwLock<State>,
    limits: Limits,
}

impl ActiveDurabilityMonitor {
    pub fn new() -> Self {
        Self::with_limits(Limits::default())
    }

    pub fn with_limits(limits: Limits) -> Self {
        Self {
            state: RwLock::new(State::new()),
            limits,
        }
    }

    /// Replace the replication topology.
    ///
    /// `topology` is an array of chains; each chain is an array of node ids
    /// with `null` for an unassigned replica slot, the active first. Tracked
    /// writes survive: their ack state is re-scoped to the new chain and
    /// rebuilt from what each retained node had already acknowledged, so a
    /// write can complete as a consequence of the change itself.
    pub fn set_replication_topology(
        &self,
        partition: &dyn Partition,
        topology: &serde_json::Value,
    ) -> Result<(), MonitorError> {
        let topology = Topology::parse(topology, &self.limits)?;
        let batch = {
            let mut state = self.write_state();
            state.set_replication_topology(topology)?
        };
        debug!(
            first_chain_size = self.first_chain_size(),
            majority = self.first_chain_majority(),
            "replication topology replaced"
        );
        self.dispatch_commits(partition, batch)
    }

    /// Start tracking a prepare. The active's memory acknowledgement is
    /// recorded on the spot; in a single-node chain that can already satisfy
    /// the requirement, in which case the commit hook runs before returning
    /// (after the state lock is dropped).
    pub fn add_sync_write(
        &self,
        partition: &dyn Partition,
        cookie: Option<ClientCookie>,
        prepare: Prepare,
    ) -> Result<(), MonitorError> {
        if prepare.requirements.level == Level::None {
            return Err(MonitorError::LevelNone);
        }
        if prepare.seqno.is_zero() {
            return Err(MonitorError::ZeroSeqno);
        }

        let batch = {
            let mut state = self.write_state();
            let possible = state
                .first_chain
                .as_ref()
                .is_some_and(|chain| chain.is_durability_possible());
            if !possible {
                return Err(MonitorError::DurabilityImpossible);
            }
            state.add_sync_write(cookie, prepare, Instant::now())?
        };
        self.dispatch_commits(partition, batch)
    }

    /// Process a replica's acknowledgement of everything it has prepared up
    /// to `prepared_seqno`. Both streams advance: the protocol carries a
    /// single prepared seqno.
    pub fn seqno_ack_received(
        &self,
        partition: &dyn Partition,
        node: &NodeId,
        prepared_seqno: SeqNo,
    ) -> Result<(), MonitorError> {
        if prepared_seqno.is_zero() {
            return Err(MonitorError::ZeroSeqno);
        }

        let batch = {
            let mut state = self.write_state();
            state.ensure_node(node)?;
            let mut batch = Batch::new();
            state.process_seqno_ack(node, Stream::Memory, prepared_seqno, &mut batch)?;
            state.process_seqno_ack(node, Stream::Disk, prepared_seqno, &mut batch)?;
            batch
        };
        self.dispatch_commits(partition, batch)
    }

    /// Advance the active's disk stream to the partition's current persisted
    /// seqno. Required for the persist-to-master levels, which cannot
    /// complete before the master's own disk acknowledgement.
    pub fn notify_local_persistence(
        &self,
        partition: &dyn Partition,
    ) -> Result<(), MonitorError> {
        let persisted = partition.persisted_seqno();
        let batch = {
            let mut state = self.write_state();
            let active = state.chain()?.active().clone();
            let mut batch = Batch::new();
            state.process_seqno_ack(&active, Stream::Disk, persisted, &mut batch)?;
            batch
        };
        self.dispatch_commits(partition, batch)
    }

    /// Abort every tracked write whose deadline has passed as of `as_of`.
    pub fn process_timeout(
        &self,
        partition: &dyn Partition,
        as_of: Instant,
    ) -> Result<(), MonitorError> {
        let batch = {
            let mut state = self.write_state();
            let mut batch = Batch::new();
            state.remove_expired(as_of, &mut batch)?;
            batch
        };
        self.dispatch_aborts(partition, batch)
    }

    /// Whether the current chain has enough assigned nodes to satisfy any
    /// requirement. Used by the partition to fail fast at admission.
    pub fn is_durability_possible(&self) -> bool {
        self.read_state()
            .first_chain
            .as_ref()
            .is_some_and(|chain| chain.is_durability_possible())
    }

    /// Drop every tracked write without committing or aborting. The caller
    /// owns client notification. Returns how many writes were removed.
    pub fn wipe_tracked(&self) -> Result<usize, MonitorError> {
        self.write_state().wipe()
    }

    pub fn num_tracked(&self) -> usize {
        self.read_state().tracked.len()
    }

    /// Highest prepare seqno that is locally durable.
    // TODO: derive this from the active's disk position once the routing
    // layer starts consuming it; reported as zero until then.
    pub fn high_prepared_seqno(&self) -> SeqNo {
        SeqNo::ZERO
    }

    pub fn last_tracked_seqno(&self) -> SeqNo {
        self.read_state().last_tracked_seqno.get()
    }

    /// Assigned nodes in the first chain (undefined slots excluded).
    pub fn first_chain_size(&self) -> usize {
        self.read_state()
            .first_chain
            .as_ref()
            .map_or(0, |chain| chain.assigned())
    }

    pub fn first_chain_majority(&self) -> usize {
        self.read_state()
            .first_chain
            .as_ref()
            .map_or(0, |chain| chain.majority())
    }

    /// The topology as last set, or `None` before the first set.
    pub fn replication_topology(&self) -> Option<serde_json::Value> {
        self.read_state()
            .topology
            .as_ref()
            .map(|topology| topology.to_json())
    }

    /// Seqnos of the writes currently pointed at by `node`'s cursors. These
    /// trail [`Self::node_ack_seqnos`] whenever a node acknowledges past the
    /// end of the tracked log.
    pub fn node_write_seqnos(&self, node: &NodeId) -> Result<NodeSeqnos, MonitorError> {
        self.read_state().node_write_seqnos(node)
    }

    /// Last seqnos `node` reported, per stream, regardless of tracking.
    pub fn node_ack_seqnos(&self, node: &NodeId) -> Result<NodeSeqnos, MonitorError> {
        self.read_state().node_ack_seqnos(node)
    }

    /// Prepare seqnos currently tracked, in log order.
    pub fn tracked_seqnos(&self) -> Vec<SeqNo> {
        self.read_state().tracked_seqnos()
    }

    pub fn stats(&self) -> MonitorStats {
        let state = self.read_state();
        let nodes = state
            .first_chain
            .as_ref()
            .map(|chain| {
                chain
                    .positions()
                    .map(|(node, position)| {
                        (
                            node.clone(),
                            NodeStreams {
                                memory: StreamSeqnos {
                                    last_write_seqno: position.memory.last_write_seqno.get(),
                                    last_ack_seqno: position.memory.last_ack_seqno.get(),
                                },
                                disk: StreamSeqnos {
                                    last_write_seqno: position.disk.last_write_seqno.get(),
                                    last_ack_seqno: position.disk.last_ack_seqno.get(),
                                },
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        MonitorStats {
            num_tracked: state.tracked.len(),
            high_prepared_seqno: self.high_prepared_seqno(),
            last_tracked_seqno: state.last_tracked_seqno.get(),
            first_chain_size: state
                .first_chain
                .as_ref()
                .map_or(0, |chain| chain.assigned()),
            first_chain_majority: state
                .first_chain
                .as_ref()
                .map_or(0, |chain| chain.majority()),
            nodes,
        }
    }

    /// Drain a commit batch, oldest prepare first. Runs without the state
    /// lock; must not touch monitor state.
    fn dispatch_commits(
        &self,
        partition: &dyn Partition,
        mut batch: Batch,
    ) -> Result<(), MonitorError> {
        batch.sort_by_key(SyncWrite::seqno);
        for write in batch {
            if let Err(source) = partition.commit(write.key(), write.seqno(), write.cookie()) {
                error!(%write, %source, "commit hook failed");
                return Err(MonitorError::CommitFailed {
                    key: write.key().clone(),
                    seqno: write.seqno(),
                    source,
                });
            }
        }
        Ok(())
    }

    fn dispatch_aborts(
        &self,
        partition: &dyn Partition,
        mut batch: Batch,
    ) -> Result<(), MonitorError> {
        batch.sort_by_key(SyncWrite::seqno);
        for write in batch {
            warn!(%write, "sync write timed out, aborting");
            if let Err(source) = partition.abort(write.key(), write.seqno(), write.cookie()) {
                error!(%write, %source, "abort hook failed");
                return Err(MonitorError::AbortFailed {
                    key: write.key().clone(),
                    seqno: write.seqno(),
                    source,
                });
            }
        }
        Ok(())
    }

    fn read_state(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().expect("monitor state lock poisoned")
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().expect("monitor state lock poisoned")
    }
}

impl Default for ActiveDurabilityMonitor {
    fn default() -> Self {
        Self::new()
    }
}
