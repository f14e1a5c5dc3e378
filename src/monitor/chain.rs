//! Replication topology: chains of nodes and their per-stream positions.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use thiserror::Error;

use crate::core::{InvalidNodeId, Limits, NodeId, WeaklyMonotonic};

use super::Stream;
use super::tracked::{Cursor, EntryRef};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("topology is not an array")]
    NotAnArray,
    #[error("topology is empty")]
    Empty,
    #[error("chain {chain} is not an array")]
    ChainNotAnArray { chain: usize },
    #[error("chain {chain} is empty")]
    EmptyChain { chain: usize },
    #[error("chain {chain} has {len} nodes, limit is {max}")]
    TooManyNodes {
        chain: usize,
        len: usize,
        max: usize,
    },
    #[error("chain {chain} slot {slot} is neither a string nor null")]
    MalformedNode { chain: usize, slot: usize },
    #[error("chain {chain} slot {slot}: {source}")]
    InvalidNode {
        chain: usize,
        slot: usize,
        #[source]
        source: InvalidNodeId,
    },
    #[error("chain {chain} active node cannot be undefined")]
    UndefinedActive { chain: usize },
    #[error("duplicate node `{node}` in chain {chain}")]
    DuplicateNode { chain: usize, node: NodeId },
}

/// Parsed topology input: an array of chains, each an array of node ids with
/// `null` marking an unassigned replica slot.
///
/// Every chain is validated for shape, but only the first one drives
/// durability today.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    chains: Vec<Vec<Option<NodeId>>>,
}

impl Topology {
    pub fn parse(value: &Value, limits: &Limits) -> Result<Self, TopologyError> {
        let chains_json = value.as_array().ok_or(TopologyError::NotAnArray)?;
        if chains_json.is_empty() {
            return Err(TopologyError::Empty);
        }

        let mut chains = Vec::with_capacity(chains_json.len());
        for (chain, chain_json) in chains_json.iter().enumerate() {
            let slots_json = chain_json
                .as_array()
                .ok_or(TopologyError::ChainNotAnArray { chain })?;
            if slots_json.is_empty() {
                return Err(TopologyError::EmptyChain { chain });
            }
            if slots_json.len() > limits.max_chain_len() {
                return Err(TopologyError::TooManyNodes {
                    chain,
                    len: slots_json.len(),
                    max: limits.max_chain_len(),
                });
            }

            let mut slots = Vec::with_capacity(slots_json.len());
            for (slot, slot_json) in slots_json.iter().enumerate() {
                let parsed = match slot_json {
                    Value::Null => None,
                    Value::String(name) => Some(NodeId::new(name.clone()).map_err(|source| {
                        TopologyError::InvalidNode {
                            chain,
                            slot,
                            source,
                        }
                    })?),
                    _ => return Err(TopologyError::MalformedNode { chain, slot }),
                };
                slots.push(parsed);
            }

            if slots[0].is_none() {
                return Err(TopologyError::UndefinedActive { chain });
            }
            let mut seen = BTreeSet::new();
            for node in slots.iter().flatten() {
                if !seen.insert(node.clone()) {
                    return Err(TopologyError::DuplicateNode {
                        chain,
                        node: node.clone(),
                    });
                }
            }

            chains.push(slots);
        }

        Ok(Self { chains })
    }

    pub fn first_chain(&self) -> &[Option<NodeId>] {
        &self.chains[0]
    }

    pub fn chains(&self) -> &[Vec<Option<NodeId>>] {
        &self.chains
    }

    pub fn to_json(&self) -> Value {
        Value::Array(
            self.chains
                .iter()
                .map(|chain| {
                    Value::Array(
                        chain
                            .iter()
                            .map(|slot| match slot {
                                Some(node) => Value::String(node.as_str().to_string()),
                                None => Value::Null,
                            })
                            .collect(),
                    )
                })
                .collect(),
        )
    }
}

/// Cursor into the tracked log plus the two seqno counters for one stream of
/// one node.
///
/// The cursor sits on the last write whose ack this node has consumed on
/// this stream; `last_write_seqno` retains that write's seqno even after the
/// write itself is removed, and `last_ack_seqno` is the highest seqno the
/// node has ever reported, which can run far ahead of the cursor.
#[derive(Debug)]
pub(crate) struct Position {
    pub cursor: Cursor,
    pub last_write_seqno: WeaklyMonotonic,
    pub last_ack_seqno: WeaklyMonotonic,
}

impl Position {
    fn new() -> Self {
        Self {
            cursor: None,
            last_write_seqno: WeaklyMonotonic::new("last_write_seqno"),
            last_ack_seqno: WeaklyMonotonic::new("last_ack_seqno"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct NodePosition {
    pub memory: Position,
    pub disk: Position,
}

impl NodePosition {
    fn new() -> Self {
        Self {
            memory: Position::new(),
            disk: Position::new(),
        }
    }

    pub fn stream(&self, stream: Stream) -> &Position {
        match stream {
            Stream::Memory => &self.memory,
            Stream::Disk => &self.disk,
        }
    }

    pub fn stream_mut(&mut self, stream: Stream) -> &mut Position {
        match stream {
            Stream::Memory => &mut self.memory,
            Stream::Disk => &mut self.disk,
        }
    }
}

/// One replication chain and the tracked positions of its assigned nodes.
///
/// Undefined slots count toward chain length (and therefore majority) but
/// hold no position and never acknowledge anything.
#[derive(Debug)]
pub(crate) struct ReplicationChain {
    active: NodeId,
    len: usize,
    majority: usize,
    positions: BTreeMap<NodeId, NodePosition>,
}

impl ReplicationChain {
    pub fn new(slots: &[Option<NodeId>]) -> Result<Self, TopologyError> {
        let active = slots
            .first()
            .and_then(|slot| slot.clone())
            .ok_or(TopologyError::UndefinedActive { chain: 0 })?;

        let mut positions = BTreeMap::new();
        for node in slots.iter().flatten() {
            if positions.insert(node.clone(), NodePosition::new()).is_some() {
                return Err(TopologyError::DuplicateNode {
                    chain: 0,
                    node: node.clone(),
                });
            }
        }

        Ok(Self {
            active,
            len: slots.len(),
            majority: slots.len() / 2 + 1,
            positions,
        })
    }

    pub fn active(&self) -> &NodeId {
        &self.active
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn assigned(&self) -> usize {
        self.positions.len()
    }

    pub fn majority(&self) -> usize {
        self.majority
    }

    pub fn is_durability_possible(&self) -> bool {
        self.assigned() >= self.majority
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.positions.contains_key(node)
    }

    pub fn position(&self, node: &NodeId) -> Option<&NodePosition> {
        self.positions.get(node)
    }

    pub fn position_mut(&mut self, node: &NodeId) -> Option<&mut NodePosition> {
        self.positions.get_mut(node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.positions.keys()
    }

    pub fn positions(&self) -> impl Iterator<Item = (&NodeId, &NodePosition)> {
        self.positions.iter()
    }

    /// Repoint every cursor parked on `removed` to its in-log predecessor.
    pub fn rewire(&mut self, removed: EntryRef, predecessor: Cursor) {
        for position in self.positions.values_mut() {
            for stream in [Stream::Memory, Stream::Disk] {
                let pos = position.stream_mut(stream);
                if pos.cursor == Some(removed) {
                    pos.cursor = predecessor;
                }
            }
        }
    }
}
