//! Core domain types for the durability monitor.
//!
//! Module hierarchy follows type dependency order:
//! - seqno: SeqNo and the monotonic counter wrappers
//! - node: NodeId
//! - requirements: Level, Requirements
//! - prepare: DocKey, ClientCookie, Prepare
//! - limits: chain sizing defaults

pub mod limits;
pub mod node;
pub mod prepare;
pub mod requirements;
pub mod seqno;

pub use limits::Limits;
pub use node::{InvalidNodeId, NodeId};
pub use prepare::{ClientCookie, DocKey, Prepare};
pub use requirements::{Level, Requirements};
pub use seqno::{Monotonic, MonotonicError, SeqNo, WeaklyMonotonic};
