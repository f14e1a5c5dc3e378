//! Hooks into the owning partition.

use thiserror::Error;

use crate::core::{ClientCookie, DocKey, SeqNo};

/// Failure reported by a commit/abort hook. The monitor treats it as fatal:
/// finalization is not expected to fail under the current contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("completion hook reported `{status}`")]
pub struct CompletionError {
    pub status: String,
}

impl CompletionError {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
        }
    }
}

/// Implemented by the partition that owns the monitor.
///
/// `commit` and `abort` finalize the stored item and notify the client
/// behind the cookie. Both acquire the partition's own hash-bucket lock, so
/// the monitor only ever calls them after releasing its state lock.
pub trait Partition {
    fn commit(
        &self,
        key: &DocKey,
        prepare_seqno: SeqNo,
        cookie: Option<ClientCookie>,
    ) -> Result<(), CompletionError>;

    fn abort(
        &self,
        key: &DocKey,
        prepare_seqno: SeqNo,
        cookie: Option<ClientCookie>,
    ) -> Result<(), CompletionError>;

    /// Seqno the partition has durably persisted locally.
    fn persisted_seqno(&self) -> SeqNo;
}
