//! Normative defaults for chain sizing.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Replica slots allowed in a chain besides the active.
    pub max_replicas: usize,
}

impl Limits {
    /// Longest admissible chain: the active plus every replica slot.
    pub fn max_chain_len(&self) -> usize {
        1 + self.max_replicas
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_replicas: 3 }
    }
}
