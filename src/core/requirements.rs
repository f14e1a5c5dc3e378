//! Durability levels and the per-write requirement attached to a prepare.

use std::fmt;
use std::num::NonZeroU64;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// What must be true of replica acknowledgements before a write commits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    /// Not a durable write; never trackable by the monitor.
    None,
    /// A majority of chain nodes have the write in memory.
    Majority,
    /// Majority in memory, and the active node has it on disk.
    MajorityAndPersistOnMaster,
    /// A majority of chain nodes have the write on disk.
    PersistToMajority,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::None => "none",
            Level::Majority => "majority",
            Level::MajorityAndPersistOnMaster => "majority_and_persist_on_master",
            Level::PersistToMajority => "persist_to_majority",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durability requirement carried by a single prepare.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    pub level: Level,
    /// Milliseconds the write may stay pending before it is aborted.
    /// `None` never times out.
    pub timeout_ms: Option<NonZeroU64>,
}

impl Requirements {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            timeout_ms: None,
        }
    }

    pub fn with_timeout(level: Level, timeout_ms: NonZeroU64) -> Self {
        Self {
            level,
            timeout_ms: Some(timeout_ms),
        }
    }

    /// The instant past which the write is considered expired, if it has a
    /// timeout at all.
    pub fn deadline_from(&self, start: Instant) -> Option<Instant> {
        self.timeout_ms
            .map(|ms| start + Duration::from_millis(ms.get()))
    }
}
