//! A tracked synchronous write and its acknowledgement tally.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use thiserror::Error;

use crate::core::{ClientCookie, DocKey, Level, NodeId, Prepare, Requirements, SeqNo};

use super::Stream;
use super::chain::ReplicationChain;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AckError {
    #[error("node `{node}` is not part of any chain for this write")]
    UnknownNode { node: NodeId },
    #[error("duplicate {stream} ack from `{node}`")]
    DuplicateAck { node: NodeId, stream: Stream },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Ack {
    memory: bool,
    disk: bool,
}

/// Ack tally of one write against one replication chain.
///
/// The counts mirror the population of the flags so the satisfaction
/// predicate never scans the map.
#[derive(Clone, Debug)]
struct ChainAck {
    active: NodeId,
    majority: usize,
    acks: BTreeMap<NodeId, Ack>,
    memory_count: usize,
    disk_count: usize,
}

impl ChainAck {
    fn new(chain: &ReplicationChain) -> Self {
        Self {
            active: chain.active().clone(),
            majority: chain.majority(),
            acks: chain.nodes().map(|node| (node.clone(), Ack::default())).collect(),
            memory_count: 0,
            disk_count: 0,
        }
    }

    fn contains(&self, node: &NodeId) -> bool {
        self.acks.contains_key(node)
    }

    fn ack(&mut self, node: &NodeId, stream: Stream) -> Result<(), AckError> {
        let Some(ack) = self.acks.get_mut(node) else {
            return Err(AckError::UnknownNode { node: node.clone() });
        };
        let flag = match stream {
            Stream::Memory => &mut ack.memory,
            Stream::Disk => &mut ack.disk,
        };
        if *flag {
            return Err(AckError::DuplicateAck {
                node: node.clone(),
                stream,
            });
        }
        *flag = true;
        match stream {
            Stream::Memory => self.memory_count += 1,
            Stream::Disk => self.disk_count += 1,
        }
        Ok(())
    }

    fn satisfied(&self, level: Level) -> bool {
        match level {
            // Never trackable; rejected before a write is ever constructed.
            Level::None => false,
            Level::Majority => self.memory_count >= self.majority,
            Level::MajorityAndPersistOnMaster => {
                self.memory_count >= self.majority
                    && self.acks.get(&self.active).is_some_and(|ack| ack.disk)
            }
            Level::PersistToMajority => self.disk_count >= self.majority,
        }
    }
}

/// A pending synchronous write awaiting commit or abort.
///
/// Identity (cookie, key, seqno, requirements, deadline) is fixed at
/// construction; only the ack tally mutates, and only while the write sits
/// in the tracked log under the monitor lock.
#[derive(Clone, Debug)]
pub(crate) struct SyncWrite {
    cookie: Option<ClientCookie>,
    key: DocKey,
    seqno: SeqNo,
    requirements: Requirements,
    expires_at: Option<Instant>,
    chain_acks: Vec<ChainAck>,
}

impl SyncWrite {
    pub fn new(
        cookie: Option<ClientCookie>,
        prepare: Prepare,
        chain: &ReplicationChain,
        now: Instant,
    ) -> Self {
        debug_assert!(prepare.requirements.level != Level::None);
        debug_assert!(chain.assigned() >= chain.majority());
        let expires_at = prepare.requirements.deadline_from(now);
        Self {
            cookie,
            key: prepare.key,
            seqno: prepare.seqno,
            requirements: prepare.requirements,
            expires_at,
            chain_acks: vec![ChainAck::new(chain)],
        }
    }

    pub fn cookie(&self) -> Option<ClientCookie> {
        self.cookie
    }

    pub fn key(&self) -> &DocKey {
        &self.key
    }

    pub fn seqno(&self) -> SeqNo {
        self.seqno
    }

    pub fn requirements(&self) -> Requirements {
        self.requirements
    }

    /// Record a node's ack for `stream` on every chain the node belongs to.
    pub fn ack(&mut self, node: &NodeId, stream: Stream) -> Result<(), AckError> {
        if !self.chain_acks.iter().any(|chain| chain.contains(node)) {
            return Err(AckError::UnknownNode { node: node.clone() });
        }
        for chain in self.chain_acks.iter_mut() {
            if chain.contains(node) {
                chain.ack(node, stream)?;
            }
        }
        Ok(())
    }

    /// The durability requirement must hold on every chain.
    pub fn is_satisfied(&self) -> bool {
        !self.chain_acks.is_empty()
            && self
                .chain_acks
                .iter()
                .all(|chain| chain.satisfied(self.requirements.level))
    }

    pub fn is_expired(&self, as_of: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= as_of)
    }

    /// Drop the ack tally and rebuild it empty against `chain`. Acks
    /// re-accumulate through the ordinary cursor advances afterwards.
    pub fn rescope(&mut self, chain: &ReplicationChain) {
        self.chain_acks = vec![ChainAck::new(chain)];
    }

    pub fn memory_ack_count(&self) -> usize {
        self.chain_acks.first().map_or(0, |chain| chain.memory_count)
    }

    pub fn disk_ack_count(&self) -> usize {
        self.chain_acks.first().map_or(0, |chain| chain.disk_count)
    }

    #[cfg(test)]
    fn acked(&self, node: &NodeId, stream: Stream) -> Option<bool> {
        let ack = self.chain_acks.first()?.acks.get(node)?;
        Some(match stream {
            Stream::Memory => ack.memory,
            Stream::Disk => ack.disk,
        })
    }
}

impl fmt::Display for SyncWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SyncWrite{{key: {}, seqno: {}, level: {}, acks: [mem: {}, disk: {}]}}",
            self.key,
            self.seqno,
            self.requirements.level,
            self.memory_ack_count(),
            self.disk_ack_count(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU64;
    use std::time::Duration;

    use serde_json::json;

    use crate::core::Limits;
    use crate::monitor::chain::Topology;

    use super::*;

    fn chain(nodes: serde_json::Value) -> ReplicationChain {
        let topology = Topology::parse(&json!([nodes]), &Limits::default()).unwrap();
        ReplicationChain::new(topology.first_chain()).unwrap()
    }

    fn node(name: &str) -> NodeId {
        NodeId::new(name).unwrap()
    }

    fn write(level: Level, chain: &ReplicationChain) -> SyncWrite {
        let prepare = Prepare::new(DocKey::new("key"), SeqNo::new(1), Requirements::new(level));
        SyncWrite::new(None, prepare, chain, Instant::now())
    }

    #[test]
    fn duplicate_ack_is_an_invariant_breach() {
        let chain = chain(json!(["a", "b", "c"]));
        let mut sw = write(Level::Majority, &chain);

        sw.ack(&node("b"), Stream::Memory).unwrap();
        let err = sw.ack(&node("b"), Stream::Memory).unwrap_err();
        assert_eq!(
            err,
            AckError::DuplicateAck {
                node: node("b"),
                stream: Stream::Memory
            }
        );

        // The disk stream is independent and still open.
        sw.ack(&node("b"), Stream::Disk).unwrap();
    }

    #[test]
    fn unknown_node_cannot_ack() {
        let chain = chain(json!(["a", "b"]));
        let mut sw = write(Level::Majority, &chain);
        let err = sw.ack(&node("x"), Stream::Memory).unwrap_err();
        assert_eq!(err, AckError::UnknownNode { node: node("x") });
    }

    #[test]
    fn majority_counts_memory_acks() {
        let chain = chain(json!(["a", "b", "c"]));
        let mut sw = write(Level::Majority, &chain);
        assert!(!sw.is_satisfied());

        sw.ack(&node("a"), Stream::Memory).unwrap();
        assert!(!sw.is_satisfied());
        sw.ack(&node("b"), Stream::Memory).unwrap();
        assert!(sw.is_satisfied());
        assert_eq!(sw.memory_ack_count(), 2);
    }

    #[test]
    fn persist_on_master_needs_the_active_disk_ack() {
        let chain = chain(json!(["a", "b", "c"]));
        let mut sw = write(Level::MajorityAndPersistOnMaster, &chain);

        sw.ack(&node("a"), Stream::Memory).unwrap();
        sw.ack(&node("b"), Stream::Memory).unwrap();
        assert!(!sw.is_satisfied());

        // A replica's disk ack is not the active's.
        sw.ack(&node("b"), Stream::Disk).unwrap();
        assert!(!sw.is_satisfied());

        sw.ack(&node("a"), Stream::Disk).unwrap();
        assert!(sw.is_satisfied());
    }

    #[test]
    fn persist_to_majority_counts_disk_acks() {
        let chain = chain(json!(["a", "b"]));
        let mut sw = write(Level::PersistToMajority, &chain);

        sw.ack(&node("a"), Stream::Memory).unwrap();
        sw.ack(&node("b"), Stream::Memory).unwrap();
        assert!(!sw.is_satisfied());

        sw.ack(&node("b"), Stream::Disk).unwrap();
        assert!(!sw.is_satisfied());
        sw.ack(&node("a"), Stream::Disk).unwrap();
        assert!(sw.is_satisfied());
    }

    #[test]
    fn expiry_is_inclusive_of_the_deadline() {
        let chain = chain(json!(["a", "b"]));
        let start = Instant::now();
        let prepare = Prepare::new(
            DocKey::new("key"),
            SeqNo::new(1),
            Requirements::with_timeout(Level::Majority, NonZeroU64::new(100).unwrap()),
        );
        let sw = SyncWrite::new(None, prepare, &chain, start);

        assert!(!sw.is_expired(start + Duration::from_millis(50)));
        assert!(sw.is_expired(start + Duration::from_millis(100)));
        assert!(sw.is_expired(start + Duration::from_millis(200)));

        let untimed = write(Level::Majority, &chain);
        assert!(!untimed.is_expired(start + Duration::from_secs(3600)));
    }

    #[test]
    fn rescope_discards_previous_acks() {
        let old = chain(json!(["a", "b", "c"]));
        let mut sw = write(Level::Majority, &old);
        sw.ack(&node("a"), Stream::Memory).unwrap();
        sw.ack(&node("b"), Stream::Memory).unwrap();
        assert!(sw.is_satisfied());

        let new = chain(json!(["a", "x", "y"]));
        sw.rescope(&new);
        assert!(!sw.is_satisfied());
        assert_eq!(sw.memory_ack_count(), 0);
        assert_eq!(sw.acked(&node("a"), Stream::Memory), Some(false));
        assert_eq!(sw.acked(&node("b"), Stream::Memory), None);

        // Acks accumulate against the new chain only.
        sw.ack(&node("a"), Stream::Memory).unwrap();
        sw.ack(&node("x"), Stream::Memory).unwrap();
        assert!(sw.is_satisfied());
    }
}
