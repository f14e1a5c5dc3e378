//! The single-lock state domain: tracked log, first chain, seqno counters.
//!
//! Every mutating operation here returns extracted writes instead of
//! finalizing them; the hooks into the owning partition run only after the
//! caller has released the state lock.

use std::time::Instant;

use crate::core::{ClientCookie, Monotonic, NodeId, Prepare, SeqNo};

use super::chain::{ReplicationChain, Topology};
use super::stats::NodeSeqnos;
use super::sync_write::SyncWrite;
use super::tracked::{EntryRef, TrackedList};
use super::{MonitorError, Stream};

/// Writes spliced out of the tracked log, solely owned and ready to drain.
pub(crate) type Batch = Vec<SyncWrite>;

#[derive(Debug)]
pub(crate) struct State {
    pub tracked: TrackedList<SyncWrite>,
    pub first_chain: Option<ReplicationChain>,
    pub topology: Option<Topology>,
    pub last_tracked_seqno: Monotonic,
}

impl State {
    pub fn new() -> Self {
        Self {
            tracked: TrackedList::new(),
            first_chain: None,
            topology: None,
            last_tracked_seqno: Monotonic::new("last_tracked_seqno"),
        }
    }

    pub fn chain(&self) -> Result<&ReplicationChain, MonitorError> {
        self.first_chain
            .as_ref()
            .ok_or(MonitorError::TopologyNotSet)
    }

    fn chain_mut(&mut self) -> Result<&mut ReplicationChain, MonitorError> {
        self.first_chain
            .as_mut()
            .ok_or(MonitorError::TopologyNotSet)
    }

    pub fn ensure_node(&self, node: &NodeId) -> Result<(), MonitorError> {
        if !self.chain()?.contains(node) {
            return Err(MonitorError::UnknownNode(node.clone()));
        }
        Ok(())
    }

    /// Install a new first chain.
    ///
    /// Cursors start at the before-first sentinel; ack seqnos are carried
    /// over for nodes retained from the previous chain; every tracked write
    /// is re-scoped to the new chain and the carried acks are then replayed
    /// through the ordinary advance path. Writes whose requirement holds
    /// after the replay land in the returned batch.
    pub fn set_replication_topology(&mut self, topology: Topology) -> Result<Batch, MonitorError> {
        let mut chain = ReplicationChain::new(topology.first_chain())?;

        if let Some(old) = &self.first_chain {
            for (node, old_position) in old.positions() {
                if let Some(position) = chain.position_mut(node) {
                    position
                        .memory
                        .last_ack_seqno
                        .observe_at_least(old_position.memory.last_ack_seqno.get());
                    position
                        .disk
                        .last_ack_seqno
                        .observe_at_least(old_position.disk.last_ack_seqno.get());
                }
            }
        }

        let replay: Vec<(NodeId, SeqNo, SeqNo)> = chain
            .positions()
            .map(|(node, position)| {
                (
                    node.clone(),
                    position.memory.last_ack_seqno.get(),
                    position.disk.last_ack_seqno.get(),
                )
            })
            .collect();

        for write in self.tracked.iter_mut() {
            write.rescope(&chain);
        }
        self.first_chain = Some(chain);
        self.topology = Some(topology);

        let mut to_commit = Batch::new();
        for (node, memory, disk) in replay {
            if !memory.is_zero() {
                self.process_seqno_ack(&node, Stream::Memory, memory, &mut to_commit)?;
            }
            if !disk.is_zero() {
                self.process_seqno_ack(&node, Stream::Disk, disk, &mut to_commit)?;
            }
        }
        Ok(to_commit)
    }

    /// Append a new write and auto-ack the active's memory stream: by the
    /// time the monitor hears about a prepare, the active has already
    /// enqueued it. A write that is satisfied on the spot (single-node
    /// chains) comes back in the batch.
    pub fn add_sync_write(
        &mut self,
        cookie: Option<ClientCookie>,
        prepare: Prepare,
        now: Instant,
    ) -> Result<Batch, MonitorError> {
        let seqno = prepare.seqno;
        self.last_tracked_seqno.advance(seqno)?;

        let chain = self.chain()?;
        let active = chain.active().clone();
        let write = SyncWrite::new(cookie, prepare, chain, now);
        self.tracked.push_back(write);

        self.advance_node_position(&active, Stream::Memory)?;
        self.update_node_ack(&active, Stream::Memory, seqno)?;

        if cfg!(debug_assertions) {
            debug_assert_eq!(self.node_write_seqnos(&active)?.memory, seqno);
            debug_assert_eq!(self.node_ack_seqnos(&active)?.memory, seqno);
        }

        let mut batch = Batch::new();
        if let Some(tail) = self.tracked.last()
            && self.tracked.get(tail)?.is_satisfied()
        {
            batch.push(self.remove_tracked(tail)?);
        }
        Ok(batch)
    }

    /// Advance `node`'s cursor on `stream` over every tracked write with
    /// seqno up to `ack_seqno`, splicing out each write the advance
    /// satisfies, then record the raw acked seqno.
    pub fn process_seqno_ack(
        &mut self,
        node: &NodeId,
        stream: Stream,
        ack_seqno: SeqNo,
        to_commit: &mut Batch,
    ) -> Result<(), MonitorError> {
        self.chain()?;
        loop {
            let Some(next) = self.next_for_node(node, stream)? else {
                break;
            };
            if self.tracked.get(next)?.seqno() > ack_seqno {
                break;
            }
            self.advance_node_position(node, stream)?;
            if self.tracked.get(next)?.is_satisfied() {
                to_commit.push(self.remove_tracked(next)?);
            }
        }
        self.update_node_ack(node, stream, ack_seqno)
    }

    /// Splice every write whose deadline has passed into `expired`.
    ///
    /// Deadlines are per-write and uncorrelated with log order, so the whole
    /// log is scanned.
    pub fn remove_expired(
        &mut self,
        as_of: Instant,
        expired: &mut Batch,
    ) -> Result<(), MonitorError> {
        let mut at = self.tracked.first();
        while let Some(entry) = at {
            at = self.tracked.next(Some(entry))?;
            if self.tracked.get(entry)?.is_expired(as_of) {
                expired.push(self.remove_tracked(entry)?);
            }
        }
        Ok(())
    }

    /// Drop every tracked write without finalizing any of them; cursors end
    /// at the before-first sentinel. Returns how many were removed.
    pub fn wipe(&mut self) -> Result<usize, MonitorError> {
        let mut removed = 0;
        while let Some(first) = self.tracked.first() {
            self.remove_tracked(first)?;
            removed += 1;
        }
        Ok(removed)
    }

    pub fn node_write_seqnos(&self, node: &NodeId) -> Result<NodeSeqnos, MonitorError> {
        let position = self
            .chain()?
            .position(node)
            .ok_or_else(|| MonitorError::UnknownNode(node.clone()))?;
        Ok(NodeSeqnos {
            memory: position.memory.last_write_seqno.get(),
            disk: position.disk.last_write_seqno.get(),
        })
    }

    pub fn node_ack_seqnos(&self, node: &NodeId) -> Result<NodeSeqnos, MonitorError> {
        let position = self
            .chain()?
            .position(node)
            .ok_or_else(|| MonitorError::UnknownNode(node.clone()))?;
        Ok(NodeSeqnos {
            memory: position.memory.last_ack_seqno.get(),
            disk: position.disk.last_ack_seqno.get(),
        })
    }

    pub fn tracked_seqnos(&self) -> Vec<SeqNo> {
        self.tracked.iter().map(|(_, write)| write.seqno()).collect()
    }

    /// The entry after the node's cursor, if any.
    fn next_for_node(
        &self,
        node: &NodeId,
        stream: Stream,
    ) -> Result<Option<EntryRef>, MonitorError> {
        let position = self
            .chain()?
            .position(node)
            .ok_or_else(|| MonitorError::UnknownNode(node.clone()))?;
        Ok(self.tracked.next(position.stream(stream).cursor)?)
    }

    /// Move a node's cursor to its successor, record the pointed seqno and
    /// mark the node's ack on the pointed write.
    fn advance_node_position(&mut self, node: &NodeId, stream: Stream) -> Result<(), MonitorError> {
        let next = self
            .next_for_node(node, stream)?
            .ok_or_else(|| MonitorError::CursorPastTail {
                node: node.clone(),
                stream,
            })?;
        let seqno = self.tracked.get(next)?.seqno();

        let position = self
            .chain_mut()?
            .position_mut(node)
            .ok_or_else(|| MonitorError::UnknownNode(node.clone()))?
            .stream_mut(stream);
        position.cursor = Some(next);
        position.last_write_seqno.advance(seqno)?;

        self.tracked.get_mut(next)?.ack(node, stream)?;
        Ok(())
    }

    fn update_node_ack(
        &mut self,
        node: &NodeId,
        stream: Stream,
        seqno: SeqNo,
    ) -> Result<(), MonitorError> {
        let position = self
            .chain_mut()?
            .position_mut(node)
            .ok_or_else(|| MonitorError::UnknownNode(node.clone()))?;
        position
            .stream_mut(stream)
            .last_ack_seqno
            .observe_at_least(seqno);
        Ok(())
    }

    /// Splice one write out of the log, repointing every cursor parked on it
    /// to its predecessor.
    fn remove_tracked(&mut self, entry: EntryRef) -> Result<SyncWrite, MonitorError> {
        let (write, predecessor) = self.tracked.remove(entry)?;
        if let Some(chain) = &mut self.first_chain {
            chain.rewire(entry, predecessor);
        }
        Ok(write)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::core::{DocKey, Level, Limits, Requirements};

    use super::*;

    fn node(name: &str) -> NodeId {
        NodeId::new(name).unwrap()
    }

    fn topology(value: serde_json::Value) -> Topology {
        Topology::parse(&value, &Limits::default()).unwrap()
    }

    fn state_with_chain(value: serde_json::Value) -> State {
        let mut state = State::new();
        let batch = state.set_replication_topology(topology(value)).unwrap();
        assert!(batch.is_empty());
        state
    }

    fn add(state: &mut State, seqno: u64, level: Level) -> Batch {
        let prepare = Prepare::new(
            DocKey::new(format!("key-{seqno}")),
            SeqNo::new(seqno),
            Requirements::new(level),
        );
        state
            .add_sync_write(None, prepare, Instant::now())
            .unwrap()
    }

    #[test]
    fn add_auto_acks_the_active_memory_stream() {
        let mut state = state_with_chain(json!([["a", "b", "c"]]));
        let batch = add(&mut state, 1, Level::Majority);
        assert!(batch.is_empty());

        assert_eq!(state.tracked.len(), 1);
        assert_eq!(state.last_tracked_seqno.get(), SeqNo::new(1));
        let writes = state.node_write_seqnos(&node("a")).unwrap();
        assert_eq!(writes.memory, SeqNo::new(1));
        assert_eq!(writes.disk, SeqNo::ZERO);
        let acks = state.node_ack_seqnos(&node("a")).unwrap();
        assert_eq!(acks.memory, SeqNo::new(1));
    }

    #[test]
    fn add_rejects_stale_seqnos() {
        let mut state = state_with_chain(json!([["a", "b", "c"]]));
        add(&mut state, 2, Level::Majority);

        let prepare = Prepare::new(
            DocKey::new("stale"),
            SeqNo::new(2),
            Requirements::new(Level::Majority),
        );
        let err = state
            .add_sync_write(None, prepare, Instant::now())
            .unwrap_err();
        assert!(matches!(err, MonitorError::Monotonic(_)));
    }

    #[test]
    fn single_node_chain_commits_at_add() {
        let mut state = state_with_chain(json!([["a"]]));
        let batch = add(&mut state, 1, Level::Majority);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].seqno(), SeqNo::new(1));
        assert!(state.tracked.is_empty());
    }

    #[test]
    fn one_ack_covers_every_pending_write_up_to_it() {
        let mut state = state_with_chain(json!([["a", "b", "c"]]));
        add(&mut state, 1, Level::Majority);
        add(&mut state, 2, Level::Majority);

        let mut batch = Batch::new();
        state
            .process_seqno_ack(&node("b"), Stream::Memory, SeqNo::new(2), &mut batch)
            .unwrap();
        state
            .process_seqno_ack(&node("b"), Stream::Disk, SeqNo::new(2), &mut batch)
            .unwrap();

        let seqnos: Vec<SeqNo> = batch.iter().map(|write| write.seqno()).collect();
        assert_eq!(seqnos, vec![SeqNo::new(1), SeqNo::new(2)]);
        assert!(state.tracked.is_empty());

        // B consumed both writes; its cursor parks at the sentinel but the
        // counters survive the removals.
        let writes = state.node_write_seqnos(&node("b")).unwrap();
        assert_eq!(writes.memory, SeqNo::new(2));
        let acks = state.node_ack_seqnos(&node("b")).unwrap();
        assert_eq!(acks.memory, SeqNo::new(2));
        assert_eq!(acks.disk, SeqNo::new(2));
    }

    #[test]
    fn ack_ahead_of_tracking_is_recorded_verbatim() {
        let mut state = state_with_chain(json!([["a", "b", "c"]]));
        add(&mut state, 1, Level::PersistToMajority);

        let mut batch = Batch::new();
        state
            .process_seqno_ack(&node("b"), Stream::Memory, SeqNo::new(1000), &mut batch)
            .unwrap();
        assert!(batch.is_empty());

        let writes = state.node_write_seqnos(&node("b")).unwrap();
        assert_eq!(writes.memory, SeqNo::new(1));
        let acks = state.node_ack_seqnos(&node("b")).unwrap();
        assert_eq!(acks.memory, SeqNo::new(1000));
    }

    #[test]
    fn topology_replay_rebuilds_retained_acks() {
        let mut state = state_with_chain(json!([["a", "b", "c"]]));
        add(&mut state, 1, Level::Majority);
        add(&mut state, 2, Level::Majority);

        let mut batch = Batch::new();
        state
            .process_seqno_ack(&node("b"), Stream::Memory, SeqNo::new(1), &mut batch)
            .unwrap();
        assert!(batch.is_empty());

        // New chain retains the active only; its memory acks replay, the
        // departed replica's do not.
        let batch = state
            .set_replication_topology(topology(json!([["a", "x", "y"]])))
            .unwrap();
        assert!(batch.is_empty());
        assert_eq!(state.tracked.len(), 2);
        for (_, write) in state.tracked.iter() {
            assert_eq!(write.memory_ack_count(), 1);
        }

        let mut batch = Batch::new();
        state
            .process_seqno_ack(&node("x"), Stream::Memory, SeqNo::new(2), &mut batch)
            .unwrap();
        let seqnos: Vec<SeqNo> = batch.iter().map(|write| write.seqno()).collect();
        assert_eq!(seqnos, vec![SeqNo::new(1), SeqNo::new(2)]);
        assert!(state.tracked.is_empty());
    }

    #[test]
    fn topology_replay_can_commit_on_its_own() {
        let mut state = state_with_chain(json!([["a", "b", "c"]]));
        add(&mut state, 1, Level::Majority);

        // Shrinking to a single-node chain makes the active's carried
        // memory ack a majority by itself.
        let batch = state
            .set_replication_topology(topology(json!([["a"]])))
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].seqno(), SeqNo::new(1));
        assert!(state.tracked.is_empty());
    }

    #[test]
    fn resetting_the_same_topology_is_idempotent() {
        let mut state = state_with_chain(json!([["a", "b", "c"]]));
        add(&mut state, 1, Level::Majority);

        let batch = state
            .set_replication_topology(topology(json!([["a", "b", "c"]])))
            .unwrap();
        assert!(batch.is_empty());
        assert_eq!(state.tracked.len(), 1);

        let writes = state.node_write_seqnos(&node("a")).unwrap();
        assert_eq!(writes.memory, SeqNo::new(1));
        let acks = state.node_ack_seqnos(&node("a")).unwrap();
        assert_eq!(acks.memory, SeqNo::new(1));
    }

    #[test]
    fn wipe_discards_everything_without_finalizing() {
        let mut state = state_with_chain(json!([["a", "b", "c"]]));
        add(&mut state, 1, Level::Majority);
        add(&mut state, 2, Level::PersistToMajority);

        assert_eq!(state.wipe().unwrap(), 2);
        assert!(state.tracked.is_empty());

        // Cursors are back at the sentinel: a fresh add still works.
        add(&mut state, 3, Level::Majority);
        assert_eq!(state.tracked.len(), 1);
        let writes = state.node_write_seqnos(&node("a")).unwrap();
        assert_eq!(writes.memory, SeqNo::new(3));
    }
}
