//! The monitor-facing slice of an enqueued item.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::requirements::Requirements;
use super::seqno::SeqNo;

/// Document key. Cheap to clone; not required to be UTF-8.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocKey(Bytes);

impl DocKey {
    pub fn new(key: impl Into<Bytes>) -> Self {
        Self(key.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocKey({:?})", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Opaque client token, echoed back through the commit/abort notification.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientCookie(Uuid);

impl ClientCookie {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Debug for ClientCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientCookie({})", self.0)
    }
}

impl fmt::Display for ClientCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A prepare handed to the monitor for tracking. The owning partition has
/// already stored the item and assigned its seqno by the time this exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prepare {
    pub key: DocKey,
    pub seqno: SeqNo,
    pub requirements: Requirements,
}

impl Prepare {
    pub fn new(key: DocKey, seqno: SeqNo, requirements: Requirements) -> Self {
        Self {
            key,
            seqno,
            requirements,
        }
    }
}
